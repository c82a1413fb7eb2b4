//! Real-time mixing engine: channel pool, master chain, output accounting

pub mod channel;
pub mod mixer;

pub use channel::{Channel, MAX_SOUND_PER_CHANNEL};
pub use mixer::{Mixer, MixerOptions, PlayOptions, SourceId};

pub use crate::types::LOOP_FOREVER;

/// Channel choice meaning "first free channel"
pub const ANY_MIXER_CHANNEL: Option<usize> = None;
