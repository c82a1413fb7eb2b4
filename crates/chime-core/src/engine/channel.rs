//! Logical mixer channel with cross-fade support
//!
//! A channel holds up to two sounds: the newest in slot 0, the previous
//! (fading out) in slot 1. Triggering a sound on a busy channel rotates the
//! current sound into slot 1 and cross-fades, so one logical voice can hand
//! over without a gap. Slot 0 is the only slot that may be fading in or
//! constant; slot 1 is idle or fading out.

use std::sync::{Arc, Mutex};

use crate::source::AudioSource;
use crate::types::{Sample, MAX_INTERNAL_BUFFERING};

/// Sounds a single channel can voice at once (current + fading-out)
pub const MAX_SOUND_PER_CHANNEL: usize = 2;

/// Fade progression of a playing slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FadeState {
    FadingIn,
    Constant,
    FadingOut,
}

/// One sound scheduled on a channel
pub(crate) struct SoundSlot {
    source: Option<Arc<Mutex<AudioSource>>>,
    /// 0 = idle; u32::MAX = loop forever
    loop_count: u32,
    /// Position in the source in resampled frames; negative while a
    /// delayed start is pending
    frame_offset: i64,
    /// Left/right gains after the pan law
    volume: [Sample; 2],
    fade_state: FadeState,
    /// Current fade gain in [0, 1]
    fade_gain: f32,
    fade_in_secs: f32,
    fade_out_secs: f32,
}

impl SoundSlot {
    fn idle() -> Self {
        Self {
            source: None,
            loop_count: 0,
            frame_offset: 0,
            volume: [0.0; 2],
            fade_state: FadeState::Constant,
            fade_gain: 0.0,
            fade_in_secs: 0.0,
            fade_out_secs: 0.0,
        }
    }

    /// Scheduled or audible
    fn is_playing_or_pending(&self) -> bool {
        self.loop_count != 0
    }

    /// Actually producing samples (start delay has elapsed)
    fn is_playing(&self) -> bool {
        self.loop_count != 0 && self.frame_offset >= 0
    }

    fn make_idle(&mut self) {
        *self = Self::idle();
    }

    fn begin_fade_in(&mut self, fade_in_secs: f32) {
        if fade_in_secs > 0.0 {
            self.fade_state = FadeState::FadingIn;
            self.fade_gain = 0.0;
            self.fade_in_secs = fade_in_secs;
        } else {
            self.fade_state = FadeState::Constant;
            self.fade_gain = 1.0;
        }
    }

    fn begin_fade_out(&mut self, fade_out_secs: f32) {
        if fade_out_secs > 0.0 {
            self.fade_state = FadeState::FadingOut;
            self.fade_out_secs = fade_out_secs;
        } else {
            self.make_idle();
        }
    }

    /// Step the fade state across `ramp.len()` samples, writing the
    /// per-sample gain. Returns true when a fade-out has completed.
    fn fill_ramp(&mut self, ramp: &mut [f32], sample_rate: u32) -> bool {
        match self.fade_state {
            FadeState::Constant => {
                ramp.fill(1.0);
                false
            }
            FadeState::FadingIn => {
                let increment = 1.0 / (sample_rate as f32 * self.fade_in_secs);
                for r in ramp.iter_mut() {
                    self.fade_gain = (self.fade_gain + increment).min(1.0);
                    *r = self.fade_gain;
                }
                if self.fade_gain >= 1.0 {
                    self.fade_state = FadeState::Constant;
                }
                false
            }
            FadeState::FadingOut => {
                let decrement = 1.0 / (sample_rate as f32 * self.fade_out_secs);
                let mut finished = false;
                for r in ramp.iter_mut() {
                    self.fade_gain = (self.fade_gain - decrement).max(0.0);
                    *r = self.fade_gain;
                    if self.fade_gain <= 0.0 {
                        finished = true;
                    }
                }
                finished
            }
        }
    }
}

/// A logical voice: two sound slots plus a reusable volume ramp
pub struct Channel {
    slots: [SoundSlot; MAX_SOUND_PER_CHANNEL],
    ramp: Vec<f32>,
}

impl Channel {
    pub fn new() -> Self {
        Self {
            slots: [SoundSlot::idle(), SoundSlot::idle()],
            ramp: vec![0.0; MAX_INTERNAL_BUFFERING],
        }
    }

    /// Whether slot 0 is free (the channel can take a sound without
    /// cutting anything off)
    pub fn is_free(&self) -> bool {
        !self.slots[0].is_playing_or_pending()
    }

    /// Whether any slot is playing or scheduled
    pub fn is_active(&self) -> bool {
        self.slots.iter().any(|s| s.is_playing_or_pending())
    }

    /// Schedule a sound on this channel, cross-fading out whatever is
    /// currently audible.
    #[allow(clippy::too_many_arguments)]
    pub fn start_playing(
        &mut self,
        source: Arc<Mutex<AudioSource>>,
        volume: [Sample; 2],
        frame_offset: i64,
        loop_count: u32,
        cross_fade_in_secs: f32,
        cross_fade_out_secs: f32,
        fade_in_secs: f32,
    ) {
        // Rotate: the previous sound (if any) moves to the fade-out slot
        self.slots.swap(0, 1);

        let slot = &mut self.slots[0];
        *slot = SoundSlot::idle();
        slot.source = Some(source);
        slot.volume = volume;
        slot.frame_offset = frame_offset;
        slot.loop_count = loop_count;

        if self.slots[1].is_playing() {
            // Audible predecessor: cross-fade the hand-over
            self.slots[1].begin_fade_out(cross_fade_out_secs);
            self.slots[0].begin_fade_in(cross_fade_in_secs);
        } else {
            // A merely scheduled predecessor is cut silently
            if self.slots[1].is_playing_or_pending() {
                self.slots[1].make_idle();
            }
            self.slots[0].begin_fade_in(fade_in_secs);
        }
    }

    /// Fade out (or immediately silence) everything on this channel
    pub fn stop(&mut self, fade_out_secs: f32) {
        for slot in &mut self.slots {
            if !slot.is_playing_or_pending() {
                continue;
            }
            if slot.is_playing() {
                slot.begin_fade_out(fade_out_secs);
            } else {
                // Not audible yet, nothing to fade
                slot.make_idle();
            }
        }
    }

    /// Mix this channel's active slots into the output planes.
    ///
    /// Generates the per-sample volume ramp from the slot fade state, then
    /// lets each slot's source add itself into the block.
    pub fn produce_sound(&mut self, left: &mut [Sample], right: &mut [Sample], sample_rate: u32) {
        let frames = left.len();
        debug_assert!(frames <= self.ramp.len());

        for slot in &mut self.slots {
            if !slot.is_playing_or_pending() {
                continue;
            }

            // Delayed start: consume the pending region of the block
            let mut start = 0usize;
            if slot.frame_offset < 0 {
                let pending = (-slot.frame_offset) as usize;
                if pending >= frames {
                    slot.frame_offset += frames as i64;
                    continue;
                }
                start = pending;
                slot.frame_offset = 0;
            }

            let run = frames - start;
            let ramp = &mut self.ramp[..run];
            let fade_out_finished = slot.fill_ramp(ramp, sample_rate);

            let source = slot.source.as_ref().expect("active slot without source");
            let mut offset = slot.frame_offset as u64;
            let mut loops = slot.loop_count;
            source.lock().unwrap().mix_into_buffer(
                [&mut left[start..], &mut right[start..]],
                &mut offset,
                &mut loops,
                ramp,
                slot.volume,
            );
            slot.frame_offset = offset as i64;
            slot.loop_count = loops;

            if fade_out_finished || slot.loop_count == 0 {
                slot.make_idle();
            }
        }
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::OutputRate;
    use crate::stream::MemoryStream;

    const RATE: u32 = 48000;

    struct FixedRate;
    impl OutputRate for FixedRate {
        fn sample_rate(&self) -> u32 {
            RATE
        }
    }

    fn source(samples: Vec<f32>) -> Arc<Mutex<AudioSource>> {
        let stream = MemoryStream::mono(samples, RATE as f32);
        let mut src = AudioSource::new(Box::new(stream), Arc::new(FixedRate)).unwrap();
        src.prepare_to_play();
        Arc::new(Mutex::new(src))
    }

    fn render(channel: &mut Channel, frames: usize) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![0.0; frames];
        let mut right = vec![0.0; frames];
        channel.produce_sound(&mut left, &mut right, RATE);
        (left, right)
    }

    #[test]
    fn test_idle_channel_adds_nothing() {
        let mut ch = Channel::new();
        assert!(ch.is_free());
        let (left, right) = render(&mut ch, 64);
        assert!(left.iter().all(|&v| v == 0.0));
        assert!(right.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_one_shot_plays_and_frees_the_slot() {
        let mut ch = Channel::new();
        ch.start_playing(source(vec![1.0; 100]), [1.0, 1.0], 0, 1, 0.0, 0.0, 0.0);
        assert!(!ch.is_free());

        let (left, _) = render(&mut ch, 128);
        assert!((left[0] - 1.0).abs() < 1e-3);
        assert!((left[99] - 1.0).abs() < 1e-3);
        assert_eq!(left[100], 0.0);
        assert!(ch.is_free(), "slot released once the loop count hits zero");
    }

    #[test]
    fn test_delayed_start_shifts_onset() {
        let mut ch = Channel::new();
        ch.start_playing(source(vec![1.0; 100]), [1.0, 1.0], -10, 1, 0.0, 0.0, 0.0);

        let (left, _) = render(&mut ch, 32);
        for i in 0..10 {
            assert_eq!(left[i], 0.0, "sample {} before the delay elapsed", i);
        }
        for i in 10..32 {
            assert!((left[i] - 1.0).abs() < 1e-3, "sample {}", i);
        }
    }

    #[test]
    fn test_delay_longer_than_block_stays_pending() {
        let mut ch = Channel::new();
        ch.start_playing(source(vec![1.0; 10]), [1.0, 1.0], -100, 1, 0.0, 0.0, 0.0);

        let (left, _) = render(&mut ch, 64);
        assert!(left.iter().all(|&v| v == 0.0));
        assert!(ch.is_active(), "still scheduled");

        // 36 frames of delay remain, then the 10-frame sound plays
        let (left, _) = render(&mut ch, 64);
        assert!(left[..36].iter().all(|&v| v == 0.0));
        assert!((left[36] - 1.0).abs() < 1e-3);
        assert!((left[45] - 1.0).abs() < 1e-3);
        assert_eq!(left[46], 0.0);
    }

    #[test]
    fn test_fade_in_ramps_to_unity() {
        let mut ch = Channel::new();
        // 1 ms fade-in = 48 samples
        ch.start_playing(source(vec![1.0; 480]), [1.0, 1.0], 0, 1, 0.0, 0.0, 0.001);

        let (left, _) = render(&mut ch, 128);
        assert!(left[0] < 0.1);
        for w in left[..48].windows(2) {
            assert!(w[1] >= w[0], "fade-in must be monotonic");
        }
        assert!((left[60] - 1.0).abs() < 1e-3, "constant after the ramp");
    }

    #[test]
    fn test_stop_with_zero_fade_silences_immediately() {
        let mut ch = Channel::new();
        ch.start_playing(source(vec![1.0; 1000]), [1.0, 1.0], 0, 1, 0.0, 0.0, 0.0);
        let _ = render(&mut ch, 64);

        ch.stop(0.0);
        assert!(!ch.is_active());
        let (left, _) = render(&mut ch, 64);
        assert!(left.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_stop_with_fade_releases_after_ramp() {
        let mut ch = Channel::new();
        ch.start_playing(source(vec![1.0; 10000]), [1.0, 1.0], 0, 1, 0.0, 0.0, 0.0);
        let _ = render(&mut ch, 64);

        // 1 ms fade-out = 48 samples
        ch.stop(0.001);
        let (left, _) = render(&mut ch, 128);
        assert!(left[0] > 0.9);
        for w in left[..48].windows(2) {
            assert!(w[1] <= w[0], "fade-out must be monotonic");
        }
        assert!(left[64] == 0.0);
        assert!(!ch.is_active(), "slot freed once the fade-out completed");
    }

    #[test]
    fn test_retrigger_cross_fades_old_into_slot_one() {
        let mut ch = Channel::new();
        ch.start_playing(source(vec![1.0; 10000]), [1.0, 1.0], 0, 1, 0.0, 0.0, 0.0);
        let _ = render(&mut ch, 64);

        // Second sound at half volume, 1 ms cross-fade each way
        ch.start_playing(source(vec![1.0; 10000]), [0.5, 0.5], 0, 1, 0.001, 0.001, 0.0);
        assert!(!ch.is_free());

        let (left, _) = render(&mut ch, 128);
        // During the overlap the total stays continuous: old fades 1 -> 0
        // while new fades 0 -> 0.5
        assert!(left[0] > 0.9);
        for &v in &left[..48] {
            assert!(v > 0.4, "no gap during cross-fade, got {}", v);
        }
        for i in 50..128 {
            assert!((left[i] - 0.5).abs() < 1e-2, "sample {} = {}", i, left[i]);
        }
    }

    #[test]
    fn test_retrigger_of_pending_sound_cuts_it_silently() {
        let mut ch = Channel::new();
        ch.start_playing(source(vec![1.0; 100]), [1.0, 1.0], -1000, 1, 0.0, 0.0, 0.0);
        ch.start_playing(source(vec![1.0; 100]), [0.25, 0.25], 0, 1, 0.5, 0.5, 0.0);

        // The pending sound was cut, not rotated into a fade-out; the new
        // one starts at constant gain because nothing was audible
        let (left, _) = render(&mut ch, 32);
        for &v in &left[..32] {
            assert!((v - 0.25).abs() < 1e-3);
        }
    }

    #[test]
    fn test_at_most_two_sounds_voice_simultaneously() {
        let mut ch = Channel::new();
        for _ in 0..5 {
            ch.start_playing(source(vec![1.0; 10000]), [0.1, 0.1], 0, 1, 0.01, 0.01, 0.0);
        }
        // Amplitude bounded by two active slots (old fading + new rising)
        let (left, _) = render(&mut ch, 64);
        assert!(left.iter().all(|&v| v <= 0.2 + 1e-3));
    }
}
