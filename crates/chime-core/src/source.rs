//! Playable audio sources
//!
//! An [`AudioSource`] owns the decode-and-resample pipeline for one asset.
//! The mixer owns all sources; channels refer to them by handle and drive
//! mixing per block. A source learns the output rate through the
//! [`OutputRate`] capability rather than a back-pointer to the mixer.

use std::sync::Arc;

use crate::audio::error::{AudioError, AudioResult};
use crate::stream::{DecodeStream, DecodedStream};

/// Capability handed to sources for looking up the output sample rate.
///
/// Implemented by the mixer's shared state; sources hold it non-owningly.
pub trait OutputRate: Send + Sync {
    /// The fixed mixer output rate in Hz
    fn sample_rate(&self) -> u32;
}

/// Frames per iteration of the throwaway full-decode drive
const FULL_DECODE_BLOCK: usize = 32;

/// A decoded-and-resampled asset that can be played on mixer channels.
pub struct AudioSource {
    decoded: DecodedStream,
    rate: Arc<dyn OutputRate>,
    /// Latched by `prepare_to_play`; mixing always runs at this rate
    mixer_rate: Option<u32>,
    /// Once the audio thread may touch the pipeline, decode-ahead from
    /// other threads is refused
    disallow_full_decode: bool,
}

impl AudioSource {
    /// Build a source over a decode stream.
    ///
    /// Fails if the stream's shape is unusable (channel count, rate).
    pub fn new(stream: Box<dyn DecodeStream>, rate: Arc<dyn OutputRate>) -> AudioResult<Self> {
        Ok(Self {
            decoded: DecodedStream::new(stream)?,
            rate,
            mixer_rate: None,
            disallow_full_decode: false,
        })
    }

    /// Latch the output rate and hand the pipeline over to playback.
    ///
    /// Called by the mixer when the source is first scheduled on a channel;
    /// `full_decode` is refused from this point on.
    pub fn prepare_to_play(&mut self) {
        if self.mixer_rate.is_none() {
            self.mixer_rate = Some(self.rate.sample_rate());
        }
        self.disallow_full_decode = true;
    }

    /// Decode and resample the whole asset up front.
    ///
    /// Useful to preload short one-shot samples before the first trigger so
    /// their first playback does no decode work at all.
    pub fn full_decode(&mut self) -> AudioResult<()> {
        if self.disallow_full_decode {
            return Err(AudioError::FullDecodeAfterPrepare);
        }
        let rate = self.rate.sample_rate();
        let mut left = [0.0f32; FULL_DECODE_BLOCK];
        let mut right = [0.0f32; FULL_DECODE_BLOCK];
        let ramp = [1.0f32; FULL_DECODE_BLOCK];
        let mut offset = 0u64;
        while !self.decoded.fully_decoded() {
            let mut loops = 1u32;
            left.fill(0.0);
            right.fill(0.0);
            self.decoded.mix_into_buffer(
                [&mut left, &mut right],
                &mut offset,
                &mut loops,
                &ramp,
                [0.0, 0.0],
                rate,
            );
        }
        Ok(())
    }

    /// Mix `ramp.len()` frames into the output planes; forwards to the
    /// decoded stream with the latched mixer rate.
    pub fn mix_into_buffer(
        &mut self,
        dst: [&mut [f32]; 2],
        frame_offset: &mut u64,
        loop_count: &mut u32,
        ramp: &[f32],
        volume: [f32; 2],
    ) {
        let rate = self.mixer_rate.unwrap_or_else(|| self.rate.sample_rate());
        self.decoded
            .mix_into_buffer(dst, frame_offset, loop_count, ramp, volume, rate);
    }

    /// Whether the whole asset has been decoded and resampled
    pub fn fully_decoded(&self) -> bool {
        self.decoded.fully_decoded()
    }

    /// Length in mixer-rate frames, once known
    pub fn length_in_frames(&self) -> Option<u64> {
        self.decoded.length_in_frames()
    }

    /// Length in seconds at the mixer rate, once known
    pub fn length_in_seconds(&self) -> Option<f64> {
        let rate = self.mixer_rate.unwrap_or_else(|| self.rate.sample_rate());
        self.decoded
            .length_in_frames()
            .map(|f| f as f64 / rate as f64)
    }

    /// Length in the source's native frames, when the container reports it
    pub fn original_length_in_frames(&self) -> Option<u64> {
        self.decoded.source_length_in_frames()
    }

    /// The source's native sample rate
    pub fn sample_rate(&self) -> f32 {
        self.decoded.source_sample_rate()
    }
}
