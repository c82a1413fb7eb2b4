//! Device-facing configuration types
//!
//! Small persistable structs hosts can store in their settings files.

use serde::{Deserialize, Serialize};

/// Default device buffer size when no preference is given (frames).
/// 512 frames is a safe default on most systems (~10.7 ms at 48 kHz).
pub const DEFAULT_BUFFER_SIZE: u32 = 512;

/// Bounds for an explicitly requested buffer size (frames)
pub const MIN_BUFFER_SIZE: u32 = 64;
pub const MAX_BUFFER_SIZE: u32 = 8192;

/// Preferred device buffer size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BufferSize {
    /// Use [`DEFAULT_BUFFER_SIZE`]
    #[default]
    Default,
    /// Request a specific size in frames (clamped to sane bounds)
    Fixed(u32),
}

impl BufferSize {
    /// Resolve to a concrete frame count
    pub fn frames(&self) -> u32 {
        match self {
            BufferSize::Default => DEFAULT_BUFFER_SIZE,
            BufferSize::Fixed(frames) => (*frames).clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE),
        }
    }

    /// Latency in seconds at the given sample rate
    pub fn latency_seconds(&self, sample_rate: u32) -> f64 {
        self.frames() as f64 / sample_rate as f64
    }
}

/// Audio device identifier
///
/// Carries the device name and optionally the host backend (ALSA, WASAPI,
/// CoreAudio, ...) so selections survive on systems with several backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    /// Device name as reported by the system
    pub name: String,
    /// Audio host name; None means the platform default host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
        }
    }

    pub fn with_host(name: &str, host: &str) -> Self {
        Self {
            name: name.to_string(),
            host: Some(host.to_string()),
        }
    }

    /// Display label including the host when known
    pub fn display_label(&self) -> String {
        match &self.host {
            Some(host) => format!("[{}] {}", host, self.name),
            None => self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_size_resolution() {
        assert_eq!(BufferSize::Default.frames(), DEFAULT_BUFFER_SIZE);
        assert_eq!(BufferSize::Fixed(256).frames(), 256);
        assert_eq!(BufferSize::Fixed(1).frames(), MIN_BUFFER_SIZE);
        assert_eq!(BufferSize::Fixed(1 << 20).frames(), MAX_BUFFER_SIZE);
    }

    #[test]
    fn test_latency_calculation() {
        let latency = BufferSize::Fixed(480).latency_seconds(48000);
        assert!((latency - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_device_id_labels() {
        assert_eq!(DeviceId::new("Speakers").display_label(), "Speakers");
        assert_eq!(
            DeviceId::with_host("hw:0,0", "ALSA").display_label(),
            "[ALSA] hw:0,0"
        );
    }
}
