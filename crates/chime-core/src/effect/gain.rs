//! Gain effect with exponential smoothing
//!
//! The terminal effect of every mixer, and the mechanism behind
//! `set_master_volume`. The gain parameter is smoothed with a one-pole
//! filter so volume jumps never click.

use crate::types::StereoBlock;

use super::{AudioEffect, Parameter, ProcessInfo};

/// Smoothing time constant: the gain covers ~63% of a jump in 15 ms
const SMOOTHING_TAU_SECS: f32 = 0.015;

/// Smoothed stereo gain
pub struct GainEffect {
    params: [Parameter; 1],
    /// Smoothed gain actually applied; follows the parameter
    current: f32,
    /// Per-sample smoothing factor: 1 - exp(-1 / (tau * fs))
    exp_factor: f32,
}

impl GainEffect {
    pub fn new() -> Self {
        Self {
            params: [Parameter::new("Gain", 1.0, 0.0, 1.0)],
            current: 1.0,
            exp_factor: 0.0,
        }
    }
}

impl Default for GainEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioEffect for GainEffect {
    fn prepare_to_play(&mut self, sample_rate: u32, _max_frames: usize, _num_channels: usize) {
        self.exp_factor = 1.0 - (-1.0 / (SMOOTHING_TAU_SECS * sample_rate as f32)).exp();
        // Start at the configured gain; smoothing is for changes, not startup
        self.current = self.params[0].get();
    }

    fn process_audio(&mut self, block: &mut StereoBlock, _info: &ProcessInfo) {
        let target = self.params[0].get();
        if self.current == target {
            if target == 1.0 {
                return;
            }
            for (l, r) in block.left.iter_mut().zip(block.right.iter_mut()) {
                *l *= target;
                *r *= target;
            }
            return;
        }

        for (l, r) in block.left.iter_mut().zip(block.right.iter_mut()) {
            self.current += (target - self.current) * self.exp_factor;
            *l *= self.current;
            *r *= self.current;
        }
        if (self.current - target).abs() < 1e-6 {
            self.current = target;
        }
    }

    fn parameters(&mut self) -> &mut [Parameter] {
        &mut self.params
    }
}
