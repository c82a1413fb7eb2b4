//! Host-supplied callback effect
//!
//! Lets embedders run arbitrary per-block processing in the master chain
//! without implementing the effect trait themselves. The closure owns its
//! state; in the C ancestry this was a function pointer plus an opaque user
//! data pointer.

use crate::types::StereoBlock;

use super::{AudioEffect, ProcessInfo};

type ProcessFn = dyn FnMut(&mut StereoBlock, &ProcessInfo) + Send;

/// An effect that forwards every block to a boxed closure
pub struct CallbackEffect {
    callback: Box<ProcessFn>,
}

impl CallbackEffect {
    pub fn new(callback: impl FnMut(&mut StereoBlock, &ProcessInfo) + Send + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }
}

impl AudioEffect for CallbackEffect {
    fn prepare_to_play(&mut self, _sample_rate: u32, _max_frames: usize, _num_channels: usize) {}

    fn process_audio(&mut self, block: &mut StereoBlock, info: &ProcessInfo) {
        (self.callback)(block, info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_sees_blocks_and_time() {
        let mut e = CallbackEffect::new(|block, info| {
            for s in block.left.iter_mut() {
                *s += info.time_in_frames as f32;
            }
        });
        e.prepare_to_play(48000, 512, 2);

        let mut left = vec![0.0f32; 8];
        let mut right = vec![0.0f32; 8];
        let mut block = StereoBlock {
            left: &mut left,
            right: &mut right,
        };
        e.process_audio(
            &mut block,
            &ProcessInfo {
                sample_rate: 48000,
                time_in_frames: 100,
            },
        );
        assert!(left.iter().all(|&v| v == 100.0));
        assert!(right.iter().all(|&v| v == 0.0));
    }
}
