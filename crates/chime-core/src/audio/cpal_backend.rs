//! cpal output backend
//!
//! Opens the output device, negotiates an f32 stereo configuration, and
//! runs the mixer's render pass from the stream's data callback. The
//! callback splits large requests into sub-blocks bounded by the mixer's
//! internal buffering so the pre-allocated scratch always suffices.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleFormat, Stream, StreamConfig};

use crate::engine::mixer::MixerShared;

use super::config::{BufferSize, DeviceId};
use super::device::{default_output_device, find_device_by_id};
use super::error::{AudioError, AudioResult};

/// Outcome of output negotiation, ready to build a stream from
pub struct NegotiatedOutput {
    pub device: cpal::Device,
    pub config: StreamConfig,
    pub sample_rate: u32,
    pub buffer_size: u32,
}

/// Pick a device and an f32 stereo configuration for it.
///
/// The requested rate is used when the device supports it; otherwise the
/// device's nearest supported rate wins and the caller latches it.
pub fn negotiate_output(
    device_id: Option<&DeviceId>,
    requested_rate: u32,
    buffer_size: BufferSize,
) -> AudioResult<NegotiatedOutput> {
    let device = match device_id {
        Some(id) => find_device_by_id(id)?,
        None => default_output_device()?,
    };
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("using audio device: {}", device_name);

    let supported: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::DeviceOpenFailed(e.to_string()))?
        .collect();
    if supported.is_empty() {
        return Err(AudioError::DeviceOpenFailed(
            "no supported output configurations".to_string(),
        ));
    }

    // f32 output is required; anything else is an error, not a conversion
    let f32_configs: Vec<_> = supported
        .iter()
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();
    if f32_configs.is_empty() {
        let formats: Vec<String> = supported
            .iter()
            .map(|c| format!("{:?}", c.sample_format()))
            .collect();
        return Err(AudioError::FormatUnsupported(formats.join(", ")));
    }

    // The mixer is stereo; mono-only devices are rejected
    let best = f32_configs
        .iter()
        .filter(|c| c.channels() >= 2)
        .find(|c| {
            requested_rate >= c.min_sample_rate().0 && requested_rate <= c.max_sample_rate().0
        })
        .or_else(|| f32_configs.iter().find(|c| c.channels() >= 2))
        .ok_or_else(|| {
            let max_channels = f32_configs.iter().map(|c| c.channels()).max().unwrap_or(0);
            AudioError::ChannelLayoutUnsupported(max_channels)
        })?;

    let sample_rate = if requested_rate >= best.min_sample_rate().0
        && requested_rate <= best.max_sample_rate().0
    {
        cpal::SampleRate(requested_rate)
    } else {
        let fallback = best.max_sample_rate();
        log::warn!(
            "device does not support {} Hz, falling back to {} Hz",
            requested_rate,
            fallback.0
        );
        fallback
    };

    let frames = buffer_size.frames();
    let config = StreamConfig {
        channels: best.channels(),
        sample_rate,
        buffer_size: CpalBufferSize::Fixed(frames),
    };
    log::info!(
        "audio config: {} channels, {} Hz, {} frames (~{:.1} ms latency)",
        config.channels,
        sample_rate.0,
        frames,
        frames as f32 / sample_rate.0 as f32 * 1000.0
    );

    Ok(NegotiatedOutput {
        device,
        config,
        sample_rate: sample_rate.0,
        buffer_size: frames,
    })
}

/// Build and start the output stream; the data callback renders the mix
pub(crate) fn build_output_stream(
    negotiated: &NegotiatedOutput,
    shared: Arc<MixerShared>,
) -> AudioResult<Stream> {
    let channels = negotiated.config.channels as usize;
    let error_shared = Arc::clone(&shared);

    let stream = negotiated
        .device
        .build_output_stream(
            &negotiated.config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                shared.render_interleaved(data, channels);
            },
            move |err| {
                // A broken stream is fatal; the mixer keeps returning the
                // stored message from here on
                error_shared.latch_error(&AudioError::StreamUnrecoverable(err.to_string()));
            },
            None,
        )
        .map_err(|e| AudioError::DeviceOpenFailed(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::DeviceOpenFailed(e.to_string()))?;
    log::info!("audio stream started");
    Ok(stream)
}
