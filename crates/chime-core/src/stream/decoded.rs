//! Decode-and-resample pipeline feeding the mixer
//!
//! A `DecodedStream` pulls interleaved frames from a decode stream (possibly
//! through a [`BufferedStream`] producer), resamples each source channel to
//! the mixer rate, and appends the result to per-channel [`ChunkedVec`]s
//! that stay in memory so the source can be re-triggered without decoding
//! again. Decoding is demand-driven: the mix call decodes just far enough
//! ahead to cover the block it is producing.

use crate::audio::error::{AudioError, AudioResult};
use crate::chunked::ChunkedVec;
use crate::resample::{Quality, Resampler};
use crate::types::LOOP_FOREVER;

use super::{BufferedStream, DecodeStream};

/// Frames pulled from the decode stream per pump iteration
pub const CHUNK_FRAMES_DECODER: usize = 128;

/// Chunk length of the decoded-audio storage, in samples per channel
const STORAGE_CHUNK_LEN: u32 = 8192;

/// Resampling quality used for decoded sources
const SOURCE_QUALITY: Quality = Quality::Cubic;

/// Pump state for one source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpState {
    /// Reading frames from the decode stream
    DecodingFromStream,
    /// Stream ended; one zero-block flush collects the resampler tail
    FlushingResamplerTail,
    /// Everything decoded; length is latched
    Terminated,
}

/// Decoded, resampled, chunk-buffered audio for one source
pub struct DecodedStream {
    stream: BufferedStream,
    channels: usize,
    src_rate: f64,
    state: PumpState,

    /// One resampler per source channel, built lazily on the first mix
    /// (that is the first moment the mixer rate is known here)
    resamplers: Vec<Resampler>,
    /// Mixer rate the resamplers were built for
    dst_rate: Option<f64>,
    /// Resampled audio per source channel; lengths always match
    chunks: Vec<ChunkedVec<f32>>,
    /// Frames decoded and resampled so far (== each chunk's length)
    frames_ready: u64,
    /// Frames read from the decode stream so far
    frames_read: u64,
    /// Resampled source length; valid once the pump terminates
    length_in_frames: Option<u64>,

    /// Interleaved read scratch (CHUNK_FRAMES_DECODER frames)
    interleaved: Vec<f32>,
    /// Deinterleaved mirror of `interleaved`
    deinterleaved: Vec<Vec<f32>>,
    /// Pull target reused across resampler drains
    pulled: Vec<f32>,
}

impl DecodedStream {
    /// Wrap a decode stream, buffering it behind a producer thread if it is
    /// not realtime-safe. Rejects channel counts other than 1 or 2.
    pub fn new(stream: Box<dyn DecodeStream>) -> AudioResult<Self> {
        let channels = stream.num_channels();
        if channels != 1 && channels != 2 {
            return Err(AudioError::SourceChannelCount(channels));
        }
        let src_rate = stream.sample_rate();
        if !(src_rate > 0.0 && src_rate.is_finite()) {
            return Err(AudioError::SourceLoadFailed(format!(
                "invalid source sample rate {}",
                src_rate
            )));
        }

        let channels = channels as usize;
        Ok(Self {
            stream: BufferedStream::new(stream),
            channels,
            src_rate: src_rate as f64,
            state: PumpState::DecodingFromStream,
            resamplers: Vec::new(),
            dst_rate: None,
            chunks: (0..channels).map(|_| ChunkedVec::new(STORAGE_CHUNK_LEN)).collect(),
            frames_ready: 0,
            frames_read: 0,
            length_in_frames: None,
            interleaved: vec![0.0; CHUNK_FRAMES_DECODER * channels],
            deinterleaved: (0..channels).map(|_| vec![0.0; CHUNK_FRAMES_DECODER]).collect(),
            pulled: Vec::new(),
        })
    }

    /// Number of source channels (1 or 2)
    pub fn num_channels(&self) -> usize {
        self.channels
    }

    /// The decode stream's native sample rate
    pub fn source_sample_rate(&self) -> f32 {
        self.src_rate as f32
    }

    /// The decode stream's native length, when the container knows it
    pub fn source_length_in_frames(&self) -> Option<u64> {
        self.stream.length_in_frames()
    }

    /// Frames decoded and resampled so far
    pub fn frames_decoded(&self) -> u64 {
        self.frames_ready
    }

    /// Resampled length, known once decoding has terminated
    pub fn length_in_frames(&self) -> Option<u64> {
        self.length_in_frames
    }

    /// Whether the whole source has been decoded and resampled
    pub fn fully_decoded(&self) -> bool {
        self.state == PumpState::Terminated
    }

    /// Mix `ramp.len()` frames into the two output planes, honoring looping.
    ///
    /// `frame_offset` is the read position in resampled frames and is
    /// advanced; `loop_count` is decremented on each wrap (except
    /// [`LOOP_FOREVER`]) and reaches 0 when the sound has ended. Decodes
    /// ahead on demand.
    pub fn mix_into_buffer(
        &mut self,
        dst: [&mut [f32]; 2],
        frame_offset: &mut u64,
        loop_count: &mut u32,
        ramp: &[f32],
        volume: [f32; 2],
        mixer_rate: u32,
    ) {
        let [left, right] = dst;
        let mut remaining = ramp.len() as u64;
        let mut pos = 0usize;

        while remaining > 0 {
            let mut frames_end = *frame_offset + remaining;
            if self.frames_ready < frames_end {
                self.decode_more_samples(frames_end - self.frames_ready, mixer_rate);
            }
            if let Some(len) = self.length_in_frames {
                if len == 0 {
                    *loop_count = 0;
                    return;
                }
                frames_end = frames_end.min(len);
            }
            debug_assert!(frames_end <= self.frames_ready || frames_end <= *frame_offset);

            let to_copy = frames_end.saturating_sub(*frame_offset) as usize;
            if to_copy > 0 {
                let start = *frame_offset as u32;
                let ramp_run = &ramp[pos..pos + to_copy];
                let sc_right = 1.min(self.channels - 1);
                self.chunks[0].mix_into(
                    &mut left[pos..pos + to_copy],
                    start,
                    ramp_run,
                    volume[0],
                );
                self.chunks[sc_right].mix_into(
                    &mut right[pos..pos + to_copy],
                    start,
                    ramp_run,
                    volume[1],
                );
                remaining -= to_copy as u64;
                *frame_offset += to_copy as u64;
                pos += to_copy;
            }

            if remaining > 0 {
                // Hit the end of the source inside this block: wrap
                let Some(len) = self.length_in_frames else {
                    // Can only run out of frames once the pump terminated
                    return;
                };
                *frame_offset -= len;
                if *loop_count != LOOP_FOREVER {
                    *loop_count -= 1;
                    if *loop_count == 0 {
                        return;
                    }
                }
            }
        }
    }

    /// Pump the decoder until at least `frames` new resampled frames exist
    /// or the source is exhausted
    pub fn decode_more_samples(&mut self, frames: u64, mixer_rate: u32) {
        self.ensure_resamplers(mixer_rate);
        let mut produced = 0u64;
        while produced < frames && self.state != PumpState::Terminated {
            produced += self.read_from_stream_and_resample();
        }
    }

    fn ensure_resamplers(&mut self, mixer_rate: u32) {
        if self.resamplers.is_empty() {
            self.resamplers = (0..self.channels)
                .map(|_| Resampler::new(self.src_rate, mixer_rate as f64, SOURCE_QUALITY))
                .collect();
            self.dst_rate = Some(mixer_rate as f64);
        }
    }

    /// One pump iteration; returns the number of new resampled frames
    fn read_from_stream_and_resample(&mut self) -> u64 {
        match self.state {
            PumpState::DecodingFromStream => {
                let got = self
                    .stream
                    .read_samples_float(&mut self.interleaved, CHUNK_FRAMES_DECODER);
                if got < CHUNK_FRAMES_DECODER {
                    self.state = PumpState::FlushingResamplerTail;
                }
                self.frames_read += got as u64;
                for c in 0..self.channels {
                    for f in 0..got {
                        self.deinterleaved[c][f] = self.interleaved[f * self.channels + c];
                    }
                }
                for c in 0..self.channels {
                    self.resamplers[c].push(&self.deinterleaved[c][..got]);
                }
                self.collect_resampled()
            }
            PumpState::FlushingResamplerTail => {
                let zeros = [0.0f32; CHUNK_FRAMES_DECODER];
                for r in &mut self.resamplers {
                    r.push(&zeros);
                }
                let produced = self.collect_resampled();
                self.latch_length();
                self.state = PumpState::Terminated;
                produced
            }
            PumpState::Terminated => 0,
        }
    }

    /// Drain every resampler into its chunk store; all channels advance by
    /// the same amount because they are fed identical frame counts
    fn collect_resampled(&mut self) -> u64 {
        let mut produced = None;
        for c in 0..self.channels {
            self.pulled.clear();
            let n = self.resamplers[c].pull(&mut self.pulled);
            self.chunks[c].extend_from_slice(&self.pulled);
            match produced {
                None => produced = Some(n),
                Some(prev) => debug_assert_eq!(prev, n, "source channels diverged"),
            }
        }
        let n = produced.unwrap_or(0) as u64;
        self.frames_ready += n;
        n
    }

    /// Fix the resampled length from the frames actually read, zero-padding
    /// the chunk stores if the filter tail fell short
    fn latch_length(&mut self) {
        let ratio = self.dst_rate.expect("resamplers built before termination") / self.src_rate;
        let len = (self.frames_read as f64 * ratio).round() as u64;
        if self.frames_ready < len {
            let pad = (len - self.frames_ready) as usize;
            let zeros = vec![0.0f32; pad];
            for chunk in &mut self.chunks {
                chunk.extend_from_slice(&zeros);
            }
            self.frames_ready = len;
        }
        self.length_in_frames = Some(len);
    }
}
