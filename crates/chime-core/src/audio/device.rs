//! Audio device enumeration
//!
//! Lists output devices across every available cpal host so hosts can
//! offer a device picker, and resolves a stored [`DeviceId`] back to a
//! concrete device.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::HostId;

use super::config::DeviceId;
use super::error::{AudioError, AudioResult};

/// Human-readable name for a cpal host
fn host_name(host_id: HostId) -> String {
    let name = format!("{:?}", host_id);
    match name.as_str() {
        "Alsa" => "ALSA".to_string(),
        "Jack" => "JACK".to_string(),
        "Wasapi" => "WASAPI".to_string(),
        _ => name,
    }
}

/// Information about one output device
#[derive(Debug, Clone)]
pub struct OutputDevice {
    /// Identifier to store in configuration
    pub id: DeviceId,
    /// Human-readable device name
    pub name: String,
    /// Host backend name
    pub host: String,
    /// Whether this is its host's default output
    pub is_default: bool,
}

/// Enumerate output devices from all available hosts
pub fn available_output_devices() -> Vec<OutputDevice> {
    let mut all = Vec::new();

    for host_id in cpal::available_hosts() {
        let host = match cpal::host_from_id(host_id) {
            Ok(h) => h,
            Err(e) => {
                log::debug!("could not initialize host {:?}: {}", host_id, e);
                continue;
            }
        };
        let host_label = host_name(host_id);
        let default_name = host.default_output_device().and_then(|d| d.name().ok());

        let devices = match host.output_devices() {
            Ok(d) => d,
            Err(e) => {
                log::debug!("could not enumerate devices for {:?}: {}", host_id, e);
                continue;
            }
        };

        for device in devices {
            let Ok(name) = device.name() else { continue };
            all.push(OutputDevice {
                id: DeviceId::with_host(&name, &host_label),
                is_default: default_name.as_ref() == Some(&name),
                name,
                host: host_label.clone(),
            });
        }
    }
    all
}

/// Resolve a stored device id to a cpal device
pub fn find_device_by_id(id: &DeviceId) -> AudioResult<cpal::Device> {
    for host_id in cpal::available_hosts() {
        if let Some(wanted_host) = &id.host {
            if &host_name(host_id) != wanted_host {
                continue;
            }
        }
        let Ok(host) = cpal::host_from_id(host_id) else {
            continue;
        };
        let Ok(devices) = host.output_devices() else {
            continue;
        };
        for device in devices {
            if device.name().map(|n| n == id.name).unwrap_or(false) {
                return Ok(device);
            }
        }
    }
    Err(AudioError::DeviceOpenFailed(format!(
        "device not found: {}",
        id.display_label()
    )))
}

/// The default output device of the default host
pub fn default_output_device() -> AudioResult<cpal::Device> {
    cpal::default_host()
        .default_output_device()
        .ok_or(AudioError::NoOutputDevice)
}
