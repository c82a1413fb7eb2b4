//! Per-channel sample-rate conversion
//!
//! Converts one channel of audio from a source rate to the mixer rate.
//! Input is pushed in chunks; produced samples accumulate internally and
//! are pulled into a caller-owned buffer. When the input is exhausted the
//! caller feeds silence (or calls [`Resampler::flush`]) to collect the
//! filter tail.
//!
//! Six qualities are available. The interpolating four (zero-order hold,
//! linear, cubic, windowed sinc) read from a short history ring; the
//! bandlimited two (blep, blam) synthesize step/ramp transitions into a
//! write-ahead region and suit impulsive synthetic inputs.

pub mod tables;

use tables::{tables, AHEAD_LEN, RESOLUTION, SINC_WIDTH};

/// History ring capacity; must be a power of two and exceed the widest
/// kernel support (2W for sinc) by a safe margin.
const HISTORY_LEN: usize = 64;

/// Leak divisor for the bandlimited integrator; removes accumulated DC
/// with a ~8192-sample time constant.
const LEAK_DIV: f32 = 8192.0;

/// Magnitudes below this are flushed to zero to keep denormals out of the
/// feedback path.
const DENORMAL_FLOOR: f32 = 1e-20;

/// Interpolation quality for a [`Resampler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    /// Output repeats the most recent input sample
    ZeroOrderHold,
    /// Two-tap linear interpolation
    Linear,
    /// Four-tap Catmull-Rom interpolation via a precomputed table
    Cubic,
    /// 2W-wide windowed sinc, low-passed by the ratio when downsampling
    Sinc,
    /// Bandlimited step synthesis for step-wise inputs
    Blep,
    /// Bandlimited ramp synthesis for piecewise-linear inputs
    Blam,
}

impl Quality {
    /// Input samples required before the first output can be produced
    pub fn min_filled(self) -> u32 {
        match self {
            Quality::ZeroOrderHold | Quality::Blep => 1,
            Quality::Linear | Quality::Blam => 2,
            Quality::Cubic => 4,
            Quality::Sinc => 2 * SINC_WIDTH as u32,
        }
    }

    /// Taps to the left of the read position (pre-fed as silence at init)
    fn left_taps(self) -> u64 {
        match self {
            Quality::ZeroOrderHold | Quality::Linear => 0,
            Quality::Cubic => 1,
            Quality::Sinc => SINC_WIDTH as u64 - 1,
            Quality::Blep | Quality::Blam => 0,
        }
    }

    /// Taps to the right of the read position (gates output emission)
    fn right_taps(self) -> u64 {
        match self {
            Quality::ZeroOrderHold => 0,
            Quality::Linear => 1,
            Quality::Cubic => 2,
            Quality::Sinc => SINC_WIDTH as u64,
            Quality::Blep | Quality::Blam => 0,
        }
    }

    fn is_bandlimited(self) -> bool {
        matches!(self, Quality::Blep | Quality::Blam)
    }
}

/// Push-mode single-channel resampler
pub struct Resampler {
    quality: Quality,
    /// Input samples advanced per output sample (src_rate / dst_rate)
    step: f64,
    /// Kernel time-scale for sinc: dst/src when downsampling, else 1
    kernel_scale: f64,

    // Interpolating-path state
    history: [f32; HISTORY_LEN],
    /// Total input samples consumed, including pre-fed silence
    in_count: u64,
    /// Index of the next output sample to produce
    out_count: u64,

    // Bandlimited-path state
    ahead: [f32; AHEAD_LEN],
    ahead_pos: usize,
    /// Integrated amplitude-so-far; leaks toward zero to remove DC
    base_amp: f32,
    /// Last raw input amplitude (step detection)
    last_amp: f32,
    /// Current slope in output-sample units (blam only)
    slope: f32,

    /// Produced samples awaiting `pull`
    pending: Vec<f32>,
    /// Output samples dropped at the beginning for causal alignment
    output_delay: u64,
}

impl Resampler {
    /// Create a resampler converting `src_rate` to `dst_rate`.
    ///
    /// Panics if either rate is not finite and positive.
    pub fn new(src_rate: f64, dst_rate: f64, quality: Quality) -> Self {
        assert!(src_rate > 0.0 && src_rate.is_finite(), "bad source rate");
        assert!(dst_rate > 0.0 && dst_rate.is_finite(), "bad target rate");

        let step = src_rate / dst_rate;
        let kernel_scale = if dst_rate < src_rate { dst_rate / src_rate } else { 1.0 };

        let mut rs = Self {
            quality,
            step,
            kernel_scale,
            history: [0.0; HISTORY_LEN],
            in_count: 0,
            out_count: 0,
            ahead: [0.0; AHEAD_LEN],
            ahead_pos: 0,
            base_amp: 0.0,
            last_amp: 0.0,
            slope: 0.0,
            pending: Vec::new(),
            output_delay: 0,
        };

        // Pre-feed silence so the widest left tap never underruns, then
        // drop the outputs that correspond to the padding.
        let delay = rs.input_delay();
        if delay > 0 {
            rs.in_count = delay;
            rs.out_count = (delay as f64 / rs.step).ceil() as u64;
            rs.output_delay = rs.out_count;
        }
        rs
    }

    /// The configured quality
    pub fn quality(&self) -> Quality {
        self.quality
    }

    /// Silence pre-fed at initialization, in input samples
    pub fn input_delay(&self) -> u64 {
        self.quality.left_taps()
    }

    /// Output samples dropped from the beginning of the stream
    pub fn output_delay(&self) -> u64 {
        self.output_delay
    }

    /// Feed input samples; produced output accumulates until [`Self::pull`]
    pub fn push(&mut self, input: &[f32]) {
        if self.quality.is_bandlimited() {
            self.push_bandlimited(input);
        } else {
            self.push_interpolating(input);
        }
    }

    /// Append all produced samples to `out`, returning how many were added
    pub fn pull(&mut self, out: &mut Vec<f32>) -> usize {
        let n = self.pending.len();
        out.extend_from_slice(&self.pending);
        self.pending.clear();
        n
    }

    /// Feed enough silence to emit the filter tail for all input so far
    pub fn flush(&mut self) {
        let tail = match self.quality {
            Quality::Blep | Quality::Blam => {
                (AHEAD_LEN as f64 * self.step).ceil() as usize + 2
            }
            q => q.right_taps() as usize + 1,
        };
        // Feeding zeros is the flush mechanism; bounded by the widest tail
        let zeros = vec![0.0f32; tail];
        self.push(&zeros);
    }

    // ── Interpolating qualities ──────────────────────────────────────────

    fn push_interpolating(&mut self, input: &[f32]) {
        let right = self.quality.right_taps();
        for &x in input {
            self.history[(self.in_count as usize) & (HISTORY_LEN - 1)] = x;
            self.in_count += 1;

            // Emit every output whose rightmost tap is now available
            loop {
                let p = self.out_count as f64 * self.step;
                let n = p as u64;
                if n + right >= self.in_count {
                    break;
                }
                let v = self.interpolate(n, p - n as f64);
                self.pending.push(v);
                self.out_count += 1;
            }
        }
    }

    #[inline]
    fn hist(&self, index: u64) -> f32 {
        self.history[(index as usize) & (HISTORY_LEN - 1)]
    }

    fn interpolate(&self, n: u64, frac: f64) -> f32 {
        match self.quality {
            Quality::ZeroOrderHold => self.hist(n),
            Quality::Linear => {
                let a = self.hist(n);
                let b = self.hist(n + 1);
                a + (b - a) * frac as f32
            }
            Quality::Cubic => {
                let t = tables();
                let slot = ((frac * RESOLUTION as f64) as usize).min(RESOLUTION - 1);
                let w = &t.cubic[slot * 4..slot * 4 + 4];
                w[0] * self.hist(n - 1)
                    + w[1] * self.hist(n)
                    + w[2] * self.hist(n + 1)
                    + w[3] * self.hist(n + 2)
            }
            Quality::Sinc => self.interpolate_sinc(n, frac),
            Quality::Blep | Quality::Blam => unreachable!("bandlimited path"),
        }
    }

    fn interpolate_sinc(&self, n: u64, frac: f64) -> f32 {
        let t = tables();
        let w = SINC_WIDTH as i64;
        let lut_max = SINC_WIDTH * RESOLUTION;

        let mut acc = 0.0f64;
        let mut sum = 0.0f64;
        for j in 0..2 * w {
            // Tap at n - (W-1) + j; distance from the read position n + frac
            let d = ((j - (w - 1)) as f64 - frac).abs();
            let si = ((d * self.kernel_scale * RESOLUTION as f64) as usize).min(lut_max);
            let wi = ((d * RESOLUTION as f64) as usize).min(lut_max);
            let k = t.sinc[si] as f64 * t.window[wi] as f64;
            acc += k * self.hist((n as i64 - (w - 1) + j) as u64) as f64;
            sum += k;
        }
        // Renormalise so the kernel has exactly unity DC gain
        (acc / sum) as f32
    }

    // ── Bandlimited qualities ────────────────────────────────────────────

    fn push_bandlimited(&mut self, input: &[f32]) {
        let inv_step = 1.0 / self.step;
        for &x in input {
            // Output-time at which this input sample lands
            let t = self.in_count as f64 * inv_step;
            while (self.out_count as f64) < t {
                self.emit_bandlimited();
            }

            match self.quality {
                Quality::Blep => {
                    let delta = x - self.last_amp;
                    if delta != 0.0 {
                        let frac = self.out_count as f64 - t;
                        self.deposit(delta, frac, false);
                        self.base_amp += delta;
                    }
                }
                Quality::Blam => {
                    // Slope is tracked per output sample; one input sample
                    // spans 1/step output samples.
                    let new_slope = (x - self.last_amp) as f64 * self.step;
                    let dslope = new_slope as f32 - self.slope;
                    if dslope != 0.0 {
                        let frac = self.out_count as f64 - t;
                        self.deposit(dslope, frac, true);
                        // Rebase: the integrator starts following the new
                        // slope now, W-1 samples before the kink's center;
                        // the ramp correction in the write-ahead assumes
                        // this compensation.
                        let u_deposit = frac - (SINC_WIDTH - 1) as f64;
                        self.base_amp += dslope * u_deposit as f32;
                        self.slope = new_slope as f32;
                    }
                }
                _ => unreachable!("interpolating path"),
            }
            self.last_amp = x;
            self.in_count += 1;
        }
    }

    /// Spread a step (or slope change) into the write-ahead region.
    ///
    /// `frac` is the distance from the transition to the next output slot,
    /// in output samples; the transition center sits W-1 slots ahead so the
    /// pre-ripple fits inside the region.
    fn deposit(&mut self, delta: f32, frac: f64, ramp: bool) {
        let t = tables();
        let table = if ramp { &t.ramp_residual } else { &t.step_residual };
        let max = table.len() - 1;
        let w = SINC_WIDTH as f64;
        for i in 0..AHEAD_LEN {
            let u = i as f64 + frac - (w - 1.0);
            let idx = (((u + w) * RESOLUTION as f64) as usize).min(max);
            self.ahead[(self.ahead_pos + i) % AHEAD_LEN] += delta * table[idx];
        }
    }

    fn emit_bandlimited(&mut self) {
        let mut v = self.base_amp + self.ahead[self.ahead_pos];
        self.ahead[self.ahead_pos] = 0.0;
        self.ahead_pos = (self.ahead_pos + 1) % AHEAD_LEN;

        if self.quality == Quality::Blam {
            self.base_amp += self.slope;
        }
        // Leaky integrator: bleeds accumulated DC back to zero
        self.base_amp -= self.base_amp / LEAK_DIV;
        if self.base_amp.abs() < DENORMAL_FLOOR {
            self.base_amp = 0.0;
        }
        if v.abs() < DENORMAL_FLOOR {
            v = 0.0;
        }
        self.pending.push(v);
        self.out_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rs: &mut Resampler) -> Vec<f32> {
        let mut out = Vec::new();
        rs.pull(&mut out);
        out
    }

    fn run(src: f64, dst: f64, quality: Quality, input: &[f32]) -> Vec<f32> {
        let mut rs = Resampler::new(src, dst, quality);
        rs.push(input);
        rs.flush();
        drain(&mut rs)
    }

    #[test]
    fn test_unity_rate_zoh_passthrough() {
        let input: Vec<f32> = (0..32).map(|i| (i as f32 * 0.1).sin()).collect();
        let out = run(48000.0, 48000.0, Quality::ZeroOrderHold, &input);
        assert!(out.len() >= input.len());
        for (a, b) in input.iter().zip(&out) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_unity_rate_linear_passthrough() {
        let input: Vec<f32> = (0..32).map(|i| i as f32).collect();
        let out = run(44100.0, 44100.0, Quality::Linear, &input);
        for (a, b) in input.iter().zip(&out) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_output_length_tracks_ratio() {
        let input = vec![0.5f32; 1000];
        for &(src, dst) in &[(44100.0, 48000.0), (48000.0, 44100.0), (22050.0, 48000.0)] {
            for &q in &[Quality::Linear, Quality::Cubic, Quality::Sinc] {
                let out = run(src, dst, q, &input);
                let expected = (1000.0 * dst / src) as isize;
                let got = out.len() as isize;
                assert!(
                    (got - expected).abs() <= 4,
                    "{:?} {}->{}: expected ~{} got {}",
                    q,
                    src,
                    dst,
                    expected,
                    got
                );
            }
        }
    }

    #[test]
    fn test_dc_preservation_all_interpolating_qualities() {
        // Constant input must come through at the same amplitude once the
        // kernel has warmed past the pre-fed silence.
        let input = vec![1.0f32; 2000];
        for &(src, dst) in &[(44100.0, 48000.0), (48000.0, 44100.0), (48000.0, 48000.0)] {
            for &q in &[
                Quality::ZeroOrderHold,
                Quality::Linear,
                Quality::Cubic,
                Quality::Sinc,
            ] {
                let out = run(src, dst, q, &input);
                let warmup = 2 * 2 * SINC_WIDTH;
                let settled = &out[warmup..out.len() - 2 * SINC_WIDTH - 8];
                for (i, &v) in settled.iter().enumerate() {
                    assert!(
                        (v - 1.0).abs() < 1e-3,
                        "{:?} {}->{}: sample {} = {}",
                        q,
                        src,
                        dst,
                        i + warmup,
                        v
                    );
                }
            }
        }
    }

    #[test]
    fn test_silence_in_silence_out() {
        let input = vec![0.0f32; 512];
        for &q in &[
            Quality::ZeroOrderHold,
            Quality::Linear,
            Quality::Cubic,
            Quality::Sinc,
            Quality::Blep,
            Quality::Blam,
        ] {
            let out = run(44100.0, 48000.0, q, &input);
            assert!(out.iter().all(|&v| v == 0.0), "{:?} leaked noise", q);
        }
    }

    #[test]
    fn test_blep_step_settles_near_input_level() {
        // A unit step through the blep path should settle close to 1.0
        // (the leaky integrator bleeds it down very slowly afterwards).
        let input = vec![1.0f32; 400];
        let out = run(48000.0, 48000.0, Quality::Blep, &input);
        let idx = 3 * SINC_WIDTH;
        assert!(
            (out[idx] - 1.0).abs() < 0.05,
            "sample {} after step = {}",
            idx,
            out[idx]
        );
    }

    #[test]
    fn test_blep_output_is_finite_and_bounded() {
        let input: Vec<f32> = (0..512)
            .map(|i| if (i / 16) % 2 == 0 { 1.0 } else { -1.0 })
            .collect();
        for &q in &[Quality::Blep, Quality::Blam] {
            let out = run(44100.0, 48000.0, q, &input);
            assert!(!out.is_empty());
            for &v in &out {
                assert!(v.is_finite());
                assert!(v.abs() < 4.0, "{:?} blew up: {}", q, v);
            }
        }
    }

    #[test]
    fn test_min_filled_per_quality() {
        assert_eq!(Quality::ZeroOrderHold.min_filled(), 1);
        assert_eq!(Quality::Blep.min_filled(), 1);
        assert_eq!(Quality::Linear.min_filled(), 2);
        assert_eq!(Quality::Blam.min_filled(), 2);
        assert_eq!(Quality::Cubic.min_filled(), 4);
        assert_eq!(Quality::Sinc.min_filled(), 32);
    }

    #[test]
    fn test_pull_clears_pending() {
        let mut rs = Resampler::new(48000.0, 48000.0, Quality::ZeroOrderHold);
        rs.push(&[1.0, 2.0, 3.0, 4.0]);
        let mut out = Vec::new();
        let n = rs.pull(&mut out);
        assert_eq!(n, out.len());
        assert_eq!(rs.pull(&mut Vec::new()), 0);
    }
}
