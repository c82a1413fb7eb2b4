//! In-memory decode stream
//!
//! The built-in source for hosts that decode assets themselves (and for
//! tests): a fully-materialized buffer of interleaved float frames.

use super::DecodeStream;

/// A decode stream over an owned interleaved sample buffer.
///
/// Always realtime-safe, so it never spawns a decode-ahead thread.
pub struct MemoryStream {
    samples: Vec<f32>,
    channels: u32,
    sample_rate: f32,
    /// Read position in frames
    position: u64,
}

impl MemoryStream {
    /// Create a stream over interleaved samples.
    ///
    /// Panics if `channels` is zero or `samples.len()` is not a multiple of
    /// `channels`; the mixer additionally rejects channel counts other than
    /// 1 or 2 at source-load time.
    pub fn new(samples: Vec<f32>, channels: u32, sample_rate: f32) -> Self {
        assert!(channels > 0, "channel count must be nonzero");
        assert!(
            samples.len() % channels as usize == 0,
            "sample count {} is not a whole number of {}-channel frames",
            samples.len(),
            channels
        );
        Self {
            samples,
            channels,
            sample_rate,
            position: 0,
        }
    }

    /// Convenience constructor for mono content
    pub fn mono(samples: Vec<f32>, sample_rate: f32) -> Self {
        Self::new(samples, 1, sample_rate)
    }

    /// Convenience constructor for interleaved stereo content
    pub fn stereo(samples: Vec<f32>, sample_rate: f32) -> Self {
        Self::new(samples, 2, sample_rate)
    }
}

impl DecodeStream for MemoryStream {
    fn num_channels(&self) -> u32 {
        self.channels
    }

    fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    fn length_in_frames(&self) -> Option<u64> {
        Some(self.samples.len() as u64 / self.channels as u64)
    }

    fn realtime_safe(&self) -> bool {
        true
    }

    fn read_samples_float(&mut self, out: &mut [f32], frames: usize) -> usize {
        let ch = self.channels as usize;
        let total_frames = self.samples.len() / ch;
        let available = total_frames.saturating_sub(self.position as usize);
        let n = frames.min(available);
        let start = self.position as usize * ch;
        out[..n * ch].copy_from_slice(&self.samples[start..start + n * ch]);
        self.position += n as u64;
        n
    }
}
