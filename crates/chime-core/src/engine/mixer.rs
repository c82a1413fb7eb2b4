//! The mixer: channel pool, master effects, and output integration
//!
//! One `Mixer` owns everything: the logical channels, the sources created
//! through it, the master effect chain with its terminal gain, and (in
//! device mode) the cpal output stream. Commands run on any caller thread
//! and synchronize with the audio thread through short critical sections;
//! the audio callback does the whole mixing pass under the channels mutex.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::audio::config::{BufferSize, DeviceId};
use crate::audio::error::{AudioError, AudioResult};
use crate::effect::{AudioEffect, GainEffect, ProcessInfo, MAX_FRAMES_FOR_EFFECTS};
use crate::source::{AudioSource, OutputRate};
use crate::stream::DecodeStream;
use crate::types::{
    seconds_to_frames, Sample, StereoBlock, StereoScratch, DEFAULT_NUM_CHANNELS,
    DEFAULT_SAMPLE_RATE, MAX_INTERNAL_BUFFERING,
};

use super::channel::Channel;

/// Handle to a source owned by the mixer.
///
/// Valid until the mixer is dropped; sources are never freed individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub(crate) usize);

/// Construction options for [`Mixer::new`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixerOptions {
    /// Fixed output rate in Hz; in device mode the negotiated device rate
    /// is latched instead if it differs
    pub sample_rate: u32,
    /// Number of logical channels
    pub num_channels: usize,
    /// Pull mode: the host drives `loopback_generate`, no device is opened
    pub loopback: bool,
    /// Output device (None = system default); ignored in loopback mode
    pub device: Option<DeviceId>,
    /// Preferred device buffer size; ignored in loopback mode
    pub buffer_size: BufferSize,
}

impl Default for MixerOptions {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            num_channels: DEFAULT_NUM_CHANNELS,
            loopback: false,
            device: None,
            buffer_size: BufferSize::Default,
        }
    }
}

impl MixerOptions {
    /// Options for a host-pulled mixer with no audio device
    pub fn loopback() -> Self {
        Self {
            loopback: true,
            ..Default::default()
        }
    }

    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn with_num_channels(mut self, channels: usize) -> Self {
        self.num_channels = channels;
        self
    }

    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_buffer_size(mut self, size: BufferSize) -> Self {
        self.buffer_size = size;
        self
    }
}

/// Per-play options for [`Mixer::play`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayOptions {
    /// Target channel; None picks the first free one. A play is dropped
    /// silently when no channel is free.
    pub channel: Option<usize>,
    /// Linear gain before the pan law
    pub volume: f32,
    /// Stereo position in [-1, 1]; equal-power, unity at center
    pub pan: f32,
    /// Start this many seconds in the future (exclusive with
    /// `start_time_secs`)
    pub delay_before_play: f32,
    /// Skip this far into the source (exclusive with `delay_before_play`)
    pub start_time_secs: f32,
    /// Number of loops; [`crate::LOOP_FOREVER`] repeats until stopped
    pub loop_count: u32,
    /// Fade-in applied when this play cross-fades over a previous sound
    pub cross_fade_in_secs: f32,
    /// Fade-out applied to the previous sound on the channel
    pub cross_fade_out_secs: f32,
    /// Fade-in applied when the channel was silent
    pub fade_in_secs: f32,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            channel: None,
            volume: 1.0,
            pan: 0.0,
            delay_before_play: 0.0,
            start_time_secs: 0.0,
            loop_count: 1,
            cross_fade_in_secs: 0.0,
            cross_fade_out_secs: 0.040,
            fade_in_secs: 0.0,
        }
    }
}

impl PlayOptions {
    pub fn with_channel(mut self, channel: usize) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_pan(mut self, pan: f32) -> Self {
        self.pan = pan;
        self
    }

    pub fn with_delay(mut self, seconds: f32) -> Self {
        self.delay_before_play = seconds;
        self
    }

    pub fn with_start_time(mut self, seconds: f32) -> Self {
        self.start_time_secs = seconds;
        self
    }

    pub fn with_loop_count(mut self, loops: u32) -> Self {
        self.loop_count = loops;
        self
    }

    pub fn with_fade_in(mut self, seconds: f32) -> Self {
        self.fade_in_secs = seconds;
        self
    }

    pub fn with_cross_fade(mut self, fade_in: f32, fade_out: f32) -> Self {
        self.cross_fade_in_secs = fade_in;
        self.cross_fade_out_secs = fade_out;
        self
    }
}

/// Equal-power pan: unity at center, `volume * sqrt(2)` hard-panned
fn equal_power_gains(volume: f32, pan: f32) -> [Sample; 2] {
    let pan = pan.clamp(-1.0, 1.0);
    let angle = (pan + 1.0) * std::f32::consts::FRAC_PI_4;
    let spread = std::f32::consts::SQRT_2;
    [
        volume * angle.cos() * spread,
        volume * angle.sin() * spread,
    ]
}

/// An effect plus its one-shot preparation flag
struct EffectSlot {
    effect: Box<dyn AudioEffect>,
    prepared: bool,
}

impl EffectSlot {
    fn new(effect: Box<dyn AudioEffect>) -> Self {
        Self {
            effect,
            prepared: false,
        }
    }

    fn process(&mut self, block: &mut StereoBlock, info: &ProcessInfo) {
        if !self.prepared {
            self.effect
                .prepare_to_play(info.sample_rate, MAX_FRAMES_FOR_EFFECTS, 2);
            self.prepared = true;
        }
        self.effect.process_audio(block, info);
    }
}

/// Master chain: user effects in order, terminal gain last
struct MasterEffects {
    effects: Vec<EffectSlot>,
    gain: EffectSlot,
}

/// State owned by whichever thread is rendering (device callback or
/// loopback caller)
struct RenderState {
    scratch: StereoScratch,
    frames_elapsed: u64,
}

/// State shared between the command side and the audio thread
pub(crate) struct MixerShared {
    sample_rate: AtomicU32,
    channels: Mutex<Vec<Channel>>,
    sources: Mutex<Vec<Arc<Mutex<AudioSource>>>>,
    master: Mutex<MasterEffects>,
    render: Mutex<RenderState>,
    /// Frames rendered since playback began, published for command threads
    time_frames: AtomicU64,
    errored: AtomicBool,
    error_message: Mutex<Option<String>>,
}

impl OutputRate for MixerShared {
    fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }
}

impl MixerShared {
    fn new(sample_rate: u32, num_channels: usize) -> Self {
        Self {
            sample_rate: AtomicU32::new(sample_rate),
            channels: Mutex::new((0..num_channels).map(|_| Channel::new()).collect()),
            sources: Mutex::new(Vec::new()),
            master: Mutex::new(MasterEffects {
                effects: Vec::new(),
                gain: EffectSlot::new(Box::new(GainEffect::new())),
            }),
            render: Mutex::new(RenderState {
                scratch: StereoScratch::with_capacity(MAX_INTERNAL_BUFFERING),
                frames_elapsed: 0,
            }),
            time_frames: AtomicU64::new(0),
            errored: AtomicBool::new(false),
            error_message: Mutex::new(None),
        }
    }

    /// Latch the errored state; the first error wins
    pub(crate) fn latch_error(&self, error: &AudioError) {
        if !self.errored.swap(true, Ordering::AcqRel) {
            log::error!("mixer entered errored state: {}", error);
            *self.error_message.lock().unwrap() = Some(error.to_string());
        }
    }

    pub(crate) fn is_errored(&self) -> bool {
        self.errored.load(Ordering::Acquire)
    }

    /// Render `frames` frames into the scratch planes
    fn render_into(&self, render: &mut RenderState, frames: usize) {
        debug_assert!(frames <= MAX_INTERNAL_BUFFERING);
        let rate = self.sample_rate();

        render.scratch.fill_silence(frames);

        {
            let mut channels = self.channels.lock().unwrap();
            let [left, right] = render.scratch.planes_mut(frames);
            for channel in channels.iter_mut() {
                channel.produce_sound(&mut *left, &mut *right, rate);
            }
        }

        {
            let mut master = self.master.lock().unwrap();
            let [left, right] = render.scratch.planes_mut(frames);
            let mut pos = 0;
            while pos < frames {
                let end = (pos + MAX_FRAMES_FOR_EFFECTS).min(frames);
                let info = ProcessInfo {
                    sample_rate: rate,
                    time_in_frames: render.frames_elapsed + pos as u64,
                };
                let mut block = StereoBlock {
                    left: &mut left[pos..end],
                    right: &mut right[pos..end],
                };
                for slot in master.effects.iter_mut() {
                    slot.process(&mut block, &info);
                }
                master.gain.process(&mut block, &info);
                pos = end;
            }
        }

        render.frames_elapsed += frames as u64;
        self.time_frames
            .store(render.frames_elapsed, Ordering::Release);
    }

    /// Device-callback entry point: render and interleave into `data`
    pub(crate) fn render_interleaved(&self, data: &mut [f32], device_channels: usize) {
        if self.is_errored() {
            data.fill(0.0);
            return;
        }
        let total_frames = data.len() / device_channels;
        let mut render = self.render.lock().unwrap();
        let mut done = 0;
        while done < total_frames {
            let n = (total_frames - done).min(MAX_INTERNAL_BUFFERING);
            self.render_into(&mut render, n);
            let [left, right] = render.scratch.planes(n);
            let out = &mut data[done * device_channels..(done + n) * device_channels];
            if device_channels == 2 {
                crate::types::interleave_into(out, left, right);
            } else {
                for (i, frame) in out.chunks_mut(device_channels).enumerate() {
                    frame[0] = left[i];
                    if device_channels > 1 {
                        frame[1] = right[i];
                    }
                    for extra in frame.iter_mut().skip(2) {
                        *extra = 0.0;
                    }
                }
            }
            done += n;
        }
    }
}

/// The embeddable game-audio mixer.
///
/// Sources and effects created through a mixer are owned by it and live
/// until it is dropped; handles returned to the caller become invalid at
/// that point.
///
/// Commands take `&self` and are safe to issue while audio is running. In
/// device mode the mixer holds the cpal stream, which pins the `Mixer`
/// value itself to its creating thread; loopback mixers have no such
/// restriction.
pub struct Mixer {
    shared: Arc<MixerShared>,
    /// Device stream; None in loopback mode or when errored
    stream: Option<cpal::Stream>,
    num_channels: usize,
    loopback: bool,
    /// Negotiated device buffer size, for latency reporting
    buffer_frames: u32,
}

impl Mixer {
    /// Build a mixer. Construction never fails outright: device problems
    /// latch the errored state and every subsequent command is a no-op.
    pub fn new(options: MixerOptions) -> Self {
        let shared = Arc::new(MixerShared::new(options.sample_rate, options.num_channels));
        let mut mixer = Self {
            shared,
            stream: None,
            num_channels: options.num_channels,
            loopback: options.loopback,
            buffer_frames: 0,
        };

        if !options.loopback {
            match crate::audio::cpal_backend::negotiate_output(
                options.device.as_ref(),
                options.sample_rate,
                options.buffer_size,
            ) {
                Ok(negotiated) => {
                    if negotiated.sample_rate != options.sample_rate {
                        log::warn!(
                            "device runs at {} Hz, latching that instead of the requested {} Hz",
                            negotiated.sample_rate,
                            options.sample_rate
                        );
                    }
                    mixer
                        .shared
                        .sample_rate
                        .store(negotiated.sample_rate, Ordering::Relaxed);
                    mixer.buffer_frames = negotiated.buffer_size;
                    match crate::audio::cpal_backend::build_output_stream(
                        &negotiated,
                        Arc::clone(&mixer.shared),
                    ) {
                        Ok(stream) => mixer.stream = Some(stream),
                        Err(e) => mixer.shared.latch_error(&e),
                    }
                }
                Err(e) => mixer.shared.latch_error(&e),
            }
        }
        mixer
    }

    /// Whether the mixer has latched a fatal error
    pub fn is_errored(&self) -> bool {
        self.shared.is_errored()
    }

    /// The stored error message, if the mixer is errored
    pub fn last_error_string(&self) -> Option<String> {
        self.shared.error_message.lock().unwrap().clone()
    }

    /// The fixed output rate
    pub fn sample_rate(&self) -> u32 {
        self.shared.sample_rate()
    }

    /// Number of logical channels
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// One-way output latency from the device buffer (0 in loopback mode)
    pub fn output_latency_seconds(&self) -> f64 {
        self.buffer_frames as f64 / self.sample_rate() as f64
    }

    /// Time since playback began, latency-compensated; may be slightly
    /// negative early on
    pub fn playback_time_in_seconds(&self) -> f64 {
        let frames = self.shared.time_frames.load(Ordering::Acquire);
        frames as f64 / self.sample_rate() as f64 - self.output_latency_seconds()
    }

    /// Create a source from a decode stream. Returns None (and logs) when
    /// the stream's shape is unusable or the mixer is errored.
    pub fn create_source(&self, stream: Box<dyn DecodeStream>) -> Option<SourceId> {
        if self.is_errored() {
            return None;
        }
        let rate: Arc<dyn OutputRate> = Arc::clone(&self.shared) as Arc<dyn OutputRate>;
        match AudioSource::new(stream, rate) {
            Ok(source) => {
                let mut sources = self.shared.sources.lock().unwrap();
                sources.push(Arc::new(Mutex::new(source)));
                Some(SourceId(sources.len() - 1))
            }
            Err(e) => {
                log::warn!("source rejected: {}", e);
                None
            }
        }
    }

    /// Decode a source fully up front (before its first play)
    pub fn full_decode(&self, source: SourceId) -> AudioResult<()> {
        let source = self
            .resolve(source)
            .ok_or_else(|| AudioError::SourceLoadFailed("unknown source handle".into()))?;
        let result = source.lock().unwrap().full_decode();
        result
    }

    /// Source length in mixer-rate frames, once decoding has determined it
    pub fn source_length_in_frames(&self, source: SourceId) -> Option<u64> {
        self.resolve(source)?.lock().unwrap().length_in_frames()
    }

    /// Source length in seconds, once known
    pub fn source_length_in_seconds(&self, source: SourceId) -> Option<f64> {
        self.resolve(source)?.lock().unwrap().length_in_seconds()
    }

    /// Start one sound
    pub fn play(&self, source: SourceId, options: &PlayOptions) {
        self.start_plays(std::slice::from_ref(&(source, options.clone())));
    }

    /// Start several sounds with a sample-aligned joint onset: all state
    /// swaps happen under one channels-lock acquisition
    pub fn play_simultaneously(&self, plays: &[(SourceId, PlayOptions)]) {
        self.start_plays(plays);
    }

    fn start_plays(&self, plays: &[(SourceId, PlayOptions)]) {
        if self.is_errored() {
            return;
        }
        let rate = self.sample_rate();

        // Resolve and validate outside the channels lock
        struct Pending {
            source: Arc<Mutex<AudioSource>>,
            volume: [Sample; 2],
            frame_offset: i64,
            options: PlayOptions,
        }
        let mut pending = Vec::with_capacity(plays.len());
        {
            let sources = self.shared.sources.lock().unwrap();
            for (id, options) in plays {
                if options.delay_before_play != 0.0 && options.start_time_secs != 0.0 {
                    log::warn!("play rejected: delay_before_play and start_time_secs are exclusive");
                    continue;
                }
                if let Some(c) = options.channel {
                    if c >= self.num_channels {
                        log::warn!("play rejected: channel {} out of range", c);
                        continue;
                    }
                }
                let Some(source) = sources.get(id.0) else {
                    log::warn!("play rejected: unknown source handle");
                    continue;
                };
                let frame_offset = if options.delay_before_play > 0.0 {
                    -(seconds_to_frames(options.delay_before_play as f64, rate).round() as i64)
                } else {
                    seconds_to_frames(options.start_time_secs as f64, rate).round() as i64
                };
                pending.push(Pending {
                    source: Arc::clone(source),
                    volume: equal_power_gains(options.volume, options.pan),
                    frame_offset,
                    options: options.clone(),
                });
            }
        }

        // Swap channel state under one lock acquisition for joint onset
        let mut started = Vec::with_capacity(pending.len());
        {
            let mut channels = self.shared.channels.lock().unwrap();
            for p in pending {
                let index = match p.options.channel {
                    Some(c) => c,
                    None => match channels.iter().position(|c| c.is_free()) {
                        Some(c) => c,
                        None => {
                            log::debug!("play dropped: no free channel");
                            continue;
                        }
                    },
                };
                channels[index].start_playing(
                    Arc::clone(&p.source),
                    p.volume,
                    p.frame_offset,
                    p.options.loop_count,
                    p.options.cross_fade_in_secs,
                    p.options.cross_fade_out_secs,
                    p.options.fade_in_secs,
                );
                started.push(p.source);
            }
        }

        // Prepare outside the channels lock; only the state swap needs it
        for source in started {
            source.lock().unwrap().prepare_to_play();
        }
    }

    /// Stop everything on one channel over `fade_out_secs` (0 = immediately)
    pub fn stop(&self, channel: usize, fade_out_secs: f32) {
        if self.is_errored() {
            return;
        }
        if channel >= self.num_channels {
            log::warn!("stop rejected: channel {} out of range", channel);
            return;
        }
        self.shared.channels.lock().unwrap()[channel].stop(fade_out_secs);
    }

    /// Stop every channel in one lock acquisition
    pub fn stop_all(&self, fade_out_secs: f32) {
        if self.is_errored() {
            return;
        }
        for channel in self.shared.channels.lock().unwrap().iter_mut() {
            channel.stop(fade_out_secs);
        }
    }

    /// Set the terminal gain; smoothed over ~15 ms on the audio thread
    pub fn set_master_volume(&self, volume: f32) {
        if self.is_errored() {
            return;
        }
        let mut master = self.shared.master.lock().unwrap();
        master.gain.effect.parameters()[0].set(volume);
    }

    /// The terminal gain's current target
    pub fn master_volume(&self) -> f32 {
        let mut master = self.shared.master.lock().unwrap();
        master.gain.effect.parameters()[0].get()
    }

    /// Append an effect to the master chain; returns its index
    pub fn add_master_effect(&self, effect: Box<dyn AudioEffect>) -> usize {
        let mut master = self.shared.master.lock().unwrap();
        master.effects.push(EffectSlot::new(effect));
        master.effects.len() - 1
    }

    /// Set a master effect parameter by (effect, parameter) index
    pub fn set_master_effect_parameter(&self, effect: usize, parameter: usize, value: f32) {
        let mut master = self.shared.master.lock().unwrap();
        if let Some(slot) = master.effects.get_mut(effect) {
            if let Some(param) = slot.effect.parameters().get_mut(parameter) {
                param.set(value);
            }
        }
    }

    /// Read a master effect parameter by (effect, parameter) index
    pub fn master_effect_parameter(&self, effect: usize, parameter: usize) -> Option<f32> {
        let mut master = self.shared.master.lock().unwrap();
        master
            .effects
            .get_mut(effect)?
            .effect
            .parameters()
            .get(parameter)
            .map(|p| p.get())
    }

    /// Loopback pull: render the next `left.len()` frames into the caller's
    /// deinterleaved planes, replacing their contents
    pub fn loopback_generate(&self, left: &mut [Sample], right: &mut [Sample]) {
        assert_eq!(left.len(), right.len());
        left.fill(0.0);
        right.fill(0.0);
        self.loopback_render(left, right, false);
    }

    /// Loopback pull that adds into the caller's planes instead of copying
    pub fn loopback_mix(&self, left: &mut [Sample], right: &mut [Sample]) {
        assert_eq!(left.len(), right.len());
        self.loopback_render(left, right, true);
    }

    fn loopback_render(&self, left: &mut [Sample], right: &mut [Sample], add: bool) {
        if self.is_errored() {
            return;
        }
        let frames = left.len();
        let mut render = self.shared.render.lock().unwrap();
        let mut done = 0;
        while done < frames {
            let n = (frames - done).min(MAX_INTERNAL_BUFFERING);
            self.shared.render_into(&mut render, n);
            let [l, r] = render.scratch.planes(n);
            if add {
                for i in 0..n {
                    left[done + i] += l[i];
                    right[done + i] += r[i];
                }
            } else {
                left[done..done + n].copy_from_slice(l);
                right[done..done + n].copy_from_slice(r);
            }
            done += n;
        }
    }

    fn resolve(&self, id: SourceId) -> Option<Arc<Mutex<AudioSource>>> {
        self.shared.sources.lock().unwrap().get(id.0).cloned()
    }
}

impl Drop for Mixer {
    fn drop(&mut self) {
        // Drive the output to silence, give the audio thread time to apply
        // it, then tear the stream down before sources and channels go away
        self.set_master_volume(0.0);
        if self.stream.is_some() {
            std::thread::sleep(std::time::Duration::from_millis(200));
            self.stream.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryStream;
    use crate::types::LOOP_FOREVER;

    const RATE: u32 = 48000;

    fn loopback_mixer(channels: usize) -> Mixer {
        let mixer = Mixer::new(MixerOptions::loopback().with_num_channels(channels));
        assert!(!mixer.is_errored());
        mixer
    }

    fn ones(mixer: &Mixer, frames: usize) -> SourceId {
        mixer
            .create_source(Box::new(MemoryStream::mono(vec![1.0; frames], RATE as f32)))
            .unwrap()
    }

    fn generate(mixer: &Mixer, frames: usize) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![0.0; frames];
        let mut right = vec![0.0; frames];
        mixer.loopback_generate(&mut left, &mut right);
        (left, right)
    }

    #[test]
    fn test_empty_mixer_generates_silence() {
        let mixer = loopback_mixer(8);
        let (left, right) = generate(&mixer, 256);
        assert!(left.iter().all(|&v| v == 0.0));
        assert!(right.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_one_shot_plays_once_then_silence() {
        let mixer = loopback_mixer(8);
        let source = ones(&mixer, 100);
        mixer.play(source, &PlayOptions::default());

        let (left, right) = generate(&mixer, 128);
        for i in 0..100 {
            assert!((left[i] - 1.0).abs() < 1e-3, "left[{}] = {}", i, left[i]);
            assert!((right[i] - 1.0).abs() < 1e-3, "right[{}] = {}", i, right[i]);
        }
        for i in 100..128 {
            assert_eq!(left[i], 0.0, "left[{}]", i);
            assert_eq!(right[i], 0.0);
        }
    }

    #[test]
    fn test_loop_twice_then_silence() {
        let mixer = loopback_mixer(8);
        let source = ones(&mixer, 100);
        mixer.play(source, &PlayOptions::default().with_loop_count(2));

        let (left, _) = generate(&mixer, 256);
        for i in 0..200 {
            assert!((left[i] - 1.0).abs() < 1e-3, "left[{}] = {}", i, left[i]);
        }
        for i in 200..256 {
            assert_eq!(left[i], 0.0, "left[{}]", i);
        }
    }

    #[test]
    fn test_delayed_start_is_sample_accurate() {
        let mixer = loopback_mixer(8);
        let source = ones(&mixer, 100);
        mixer.play(
            source,
            &PlayOptions::default().with_delay(10.0 / RATE as f32),
        );

        let (left, _) = generate(&mixer, 32);
        for i in 0..10 {
            assert_eq!(left[i], 0.0, "left[{}] before the delay", i);
        }
        for i in 10..32 {
            assert!((left[i] - 1.0).abs() < 1e-3, "left[{}] = {}", i, left[i]);
        }
    }

    #[test]
    fn test_start_time_skips_into_the_source() {
        let mixer = loopback_mixer(8);
        // 50 zeros then 50 ones; start 50 frames in
        let mut samples = vec![0.0; 50];
        samples.extend(std::iter::repeat(1.0).take(50));
        let source = mixer
            .create_source(Box::new(MemoryStream::mono(samples, RATE as f32)))
            .unwrap();
        mixer.play(
            source,
            &PlayOptions::default().with_start_time(50.0 / RATE as f32),
        );

        let (left, _) = generate(&mixer, 64);
        for i in 0..50 {
            assert!((left[i] - 1.0).abs() < 1e-3, "left[{}] = {}", i, left[i]);
        }
        for i in 50..64 {
            assert_eq!(left[i], 0.0);
        }
    }

    #[test]
    fn test_cross_fade_hands_over_without_a_gap() {
        let mixer = loopback_mixer(8);
        let a = ones(&mixer, 48000);
        let b = ones(&mixer, 48000);

        mixer.play(a, &PlayOptions::default().with_channel(0));
        let _ = generate(&mixer, 64);

        // Replace A with B at half volume, 10 ms cross-fade (480 samples)
        mixer.play(
            b,
            &PlayOptions::default()
                .with_channel(0)
                .with_volume(0.5)
                .with_cross_fade(0.01, 0.01),
        );
        let (left, _) = generate(&mixer, 1024);

        // A still dominant at the start, B alone at the end
        assert!(left[0] > 0.9, "start of cross-fade: {}", left[0]);
        assert!((left[600] - 0.5).abs() < 1e-2, "after cross-fade: {}", left[600]);
        // Continuous hand-over: never a fully silent sample in between
        for (i, &v) in left[..600].iter().enumerate() {
            assert!(v > 0.3, "gap at sample {}: {}", i, v);
        }
    }

    #[test]
    fn test_master_mute_then_unmute_smooths() {
        let mixer = loopback_mixer(8);
        let source = ones(&mixer, 20000);

        mixer.set_master_volume(0.0);
        mixer.play(source, &PlayOptions::default().with_loop_count(LOOP_FOREVER));
        let (muted, _) = generate(&mixer, 4096);
        let peak = muted.iter().fold(0.0f32, |m, &v| m.max(v.abs()));
        assert!(peak < 0.01, "muted peak {}", peak);

        mixer.set_master_volume(1.0);
        let (open, _) = generate(&mixer, 4096);
        assert!(open[0] < 0.1, "gain must rise smoothly, got {}", open[0]);
        // One 15 ms time constant in: ~63% of the way up
        assert!(open[720] > 0.5 && open[720] < 0.8, "open[720] = {}", open[720]);
        assert!(open[4000] > 0.95, "settled: {}", open[4000]);
    }

    #[test]
    fn test_equal_power_pan_boundaries() {
        assert_eq!(equal_power_gains(1.0, 0.0)[0], equal_power_gains(1.0, 0.0)[1]);
        let center = equal_power_gains(0.8, 0.0);
        assert!((center[0] - 0.8).abs() < 1e-6);

        let hard_left = equal_power_gains(1.0, -1.0);
        assert!((hard_left[0] - std::f32::consts::SQRT_2).abs() < 1e-6);
        assert!(hard_left[1].abs() < 1e-6);

        let hard_right = equal_power_gains(1.0, 1.0);
        assert!(hard_right[0].abs() < 1e-6);
        assert!((hard_right[1] - std::f32::consts::SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn test_pan_applies_to_output() {
        let mixer = loopback_mixer(8);
        let source = ones(&mixer, 1000);
        mixer.play(source, &PlayOptions::default().with_pan(-1.0));

        let (left, right) = generate(&mixer, 64);
        assert!((left[10] - std::f32::consts::SQRT_2).abs() < 1e-3);
        assert!(right[10].abs() < 1e-6);
    }

    #[test]
    fn test_playback_time_accumulates_rendered_frames() {
        let mixer = loopback_mixer(4);
        assert_eq!(mixer.playback_time_in_seconds(), 0.0);
        let _ = generate(&mixer, 256);
        let _ = generate(&mixer, 256);
        let expected = 512.0 / RATE as f64;
        assert!((mixer.playback_time_in_seconds() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_play_simultaneously_joint_onset() {
        let mixer = loopback_mixer(8);
        let a = ones(&mixer, 1000);
        let b = ones(&mixer, 1000);
        mixer.play_simultaneously(&[
            (a, PlayOptions::default().with_channel(0).with_volume(0.25)),
            (b, PlayOptions::default().with_channel(1).with_volume(0.25)),
        ]);

        let (left, _) = generate(&mixer, 64);
        for i in 0..64 {
            assert!((left[i] - 0.5).abs() < 1e-3, "joint onset at {}: {}", i, left[i]);
        }
    }

    #[test]
    fn test_stop_is_idempotent_and_immediate_at_zero_fade() {
        let mixer = loopback_mixer(4);
        let source = ones(&mixer, 48000);
        mixer.play(source, &PlayOptions::default().with_channel(2));
        let _ = generate(&mixer, 64);

        mixer.stop(2, 0.0);
        mixer.stop(2, 0.0);
        let (left, _) = generate(&mixer, 64);
        assert!(left.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_no_free_channel_drops_play_silently() {
        let mixer = loopback_mixer(1);
        let a = ones(&mixer, 48000);
        let b = ones(&mixer, 48000);
        mixer.play(a, &PlayOptions::default().with_volume(0.5));
        // Channel 0 busy and no explicit channel given: dropped
        mixer.play(b, &PlayOptions::default());

        let (left, _) = generate(&mixer, 64);
        for &v in &left {
            assert!((v - 0.5).abs() < 1e-3, "only the first sound plays: {}", v);
        }
    }

    #[test]
    fn test_callback_effect_runs_in_master_chain() {
        use crate::effect::CallbackEffect;

        let mixer = loopback_mixer(4);
        mixer.add_master_effect(Box::new(CallbackEffect::new(|block, _info| {
            for s in block.left.iter_mut() {
                *s += 0.25;
            }
        })));

        let (left, right) = generate(&mixer, 32);
        assert!(left.iter().all(|&v| (v - 0.25).abs() < 1e-6));
        assert!(right.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_master_effect_parameters_are_reachable() {
        let mixer = loopback_mixer(4);
        let index = mixer.add_master_effect(Box::new(GainEffect::new()));
        assert_eq!(mixer.master_effect_parameter(index, 0), Some(1.0));

        mixer.set_master_effect_parameter(index, 0, 0.3);
        assert_eq!(mixer.master_effect_parameter(index, 0), Some(0.3));
        // Clamped
        mixer.set_master_effect_parameter(index, 0, 9.0);
        assert_eq!(mixer.master_effect_parameter(index, 0), Some(1.0));
    }

    #[test]
    fn test_loopback_mix_adds_instead_of_replacing() {
        let mixer = loopback_mixer(4);
        let source = ones(&mixer, 1000);
        mixer.play(source, &PlayOptions::default());

        let mut left = vec![0.5; 32];
        let mut right = vec![0.5; 32];
        mixer.loopback_mix(&mut left, &mut right);
        for i in 0..32 {
            assert!((left[i] - 1.5).abs() < 1e-3, "left[{}] = {}", i, left[i]);
        }
    }

    #[test]
    fn test_source_length_queries_after_full_decode() {
        let mixer = loopback_mixer(4);
        let source = mixer
            .create_source(Box::new(MemoryStream::mono(vec![1.0; 2400], 24000.0)))
            .unwrap();
        assert_eq!(mixer.source_length_in_frames(source), None);

        mixer.full_decode(source).unwrap();
        assert_eq!(mixer.source_length_in_frames(source), Some(4800));
        assert!((mixer.source_length_in_seconds(source).unwrap() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_source_with_bad_channel_count() {
        let mixer = loopback_mixer(4);
        let stream = MemoryStream::new(vec![0.0; 16], 4, 48000.0);
        assert!(mixer.create_source(Box::new(stream)).is_none());
    }

    #[test]
    fn test_loopback_generate_is_deterministic() {
        let run = || {
            let mixer = loopback_mixer(8);
            let source = ones(&mixer, 500);
            mixer.play(source, &PlayOptions::default().with_pan(0.3).with_loop_count(3));
            let (left, right) = generate(&mixer, 2048);
            (left, right)
        };
        assert_eq!(run(), run());
    }
}
