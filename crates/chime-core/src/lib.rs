//! Chime Core - Embeddable audio mixer for games
//!
//! Sources are decoded and resampled once into chunked in-memory buffers,
//! then played concurrently on a pool of logical channels with per-sound
//! gain, pan, looping, scheduled start and cross-fades. Output either goes
//! to an audio device (cpal) or is pulled by the host (loopback).

pub mod types;
pub mod chunked;
pub mod resample;
pub mod stream;
pub mod source;
pub mod effect;
pub mod engine;
pub mod audio;

pub use types::*;
pub use engine::{Mixer, MixerOptions, PlayOptions, SourceId, ANY_MIXER_CHANNEL, LOOP_FOREVER};
