//! Mixer and audio backend error types

use thiserror::Error;

/// Errors that can occur while opening devices, loading sources, or
/// streaming audio
#[derive(Error, Debug)]
pub enum AudioError {
    /// No audio output devices available
    #[error("No audio output devices found")]
    NoOutputDevice,

    /// Failed to open or configure the output device
    #[error("Failed to open audio device: {0}")]
    DeviceOpenFailed(String),

    /// Device does not offer f32 output
    #[error("Unsupported sample format: {0}")]
    FormatUnsupported(String),

    /// Device does not offer a stereo layout
    #[error("Unsupported channel layout: {0} channels")]
    ChannelLayoutUnsupported(u16),

    /// The output stream failed after it was running
    #[error("Audio stream error: {0}")]
    StreamUnrecoverable(String),

    /// A source could not be opened or has an unusable shape
    #[error("Failed to load source: {0}")]
    SourceLoadFailed(String),

    /// Source reports a channel count the mixer cannot play
    #[error("Source channel count must be 1 or 2, got {0}")]
    SourceChannelCount(u32),

    /// Decode-ahead was requested after the source entered playback
    #[error("Full decode is not allowed once a source has been prepared for playback")]
    FullDecodeAfterPrepare,
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;
