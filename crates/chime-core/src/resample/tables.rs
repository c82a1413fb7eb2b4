//! Process-wide resampler lookup tables
//!
//! Built once on first use and shared read-only by every resampler
//! instance. Construction is value-identical on concurrent calls, so a
//! `OnceLock` gives idempotent first-touch initialization.

use std::sync::OnceLock;

/// One-sided width of the sinc kernel in input samples (full support 2W)
pub const SINC_WIDTH: usize = 16;

/// Phase slots per input sample in the lookup tables
pub const RESOLUTION: usize = 1024;

/// Write-ahead region for the bandlimited step/ramp qualities, in output
/// samples. A deposited transition touches at most this many future slots.
pub const AHEAD_LEN: usize = 2 * SINC_WIDTH - 1;

/// Shared lookup tables for all resampler qualities
pub struct Tables {
    /// sin(pi x)/(pi x) sampled at x = i / RESOLUTION, i in 0..=W*RESOLUTION
    pub sinc: Vec<f32>,
    /// Window over the kernel support, sampled like `sinc`:
    /// 0.40897 + 0.5 cos(pi y) + 0.09103 cos(2 pi y), y = i / (W*RESOLUTION)
    pub window: Vec<f32>,
    /// Catmull-Rom weights, 4 taps x RESOLUTION fractional slots
    pub cubic: Vec<f32>,
    /// Bandlimited-step residual S(u) - 1 over u in [-W, W], sampled at
    /// RESOLUTION per sample. A step deposit adds `delta * residual` to the
    /// write-ahead while the integrator takes the full `delta` at once, so
    /// the pair sums to the bandlimited step `delta * S(u)`.
    pub step_residual: Vec<f32>,
    /// Bandlimited-ramp correction B(u) - u, where B is the running
    /// integral of S. A slope-change deposit adds `dslope * correction`
    /// while the integrator's base is rebased by `dslope * u_deposit`; the
    /// pair sums to the bandlimited kink.
    pub ramp_residual: Vec<f32>,
}

static TABLES: OnceLock<Tables> = OnceLock::new();

/// Get the shared tables, building them on first call
pub fn tables() -> &'static Tables {
    TABLES.get_or_init(build)
}

fn build() -> Tables {
    let n = SINC_WIDTH * RESOLUTION;

    let mut sinc = Vec::with_capacity(n + 1);
    for i in 0..=n {
        let x = i as f64 / RESOLUTION as f64;
        let v = if i == 0 {
            1.0
        } else {
            let px = std::f64::consts::PI * x;
            px.sin() / px
        };
        sinc.push(v as f32);
    }

    let mut window = Vec::with_capacity(n + 1);
    for i in 0..=n {
        let y = i as f64 / n as f64;
        let v = 0.40897
            + 0.5 * (std::f64::consts::PI * y).cos()
            + 0.09103 * (2.0 * std::f64::consts::PI * y).cos();
        window.push(v as f32);
    }

    let mut cubic = Vec::with_capacity(4 * RESOLUTION);
    for i in 0..RESOLUTION {
        let t = i as f64 / RESOLUTION as f64;
        let t2 = t * t;
        let t3 = t2 * t;
        cubic.push((-0.5 * t3 + t2 - 0.5 * t) as f32);
        cubic.push((1.5 * t3 - 2.5 * t2 + 1.0) as f32);
        cubic.push((-1.5 * t3 + 2.0 * t2 + 0.5 * t) as f32);
        cubic.push((0.5 * t3 - 0.5 * t2) as f32);
    }

    // Bandlimited step: integrate the windowed sinc over [-W, W] and
    // normalise so the step runs exactly 0 -> 1, then subtract the ideal
    // step to get the residual the write-ahead deposits use.
    let full = 2 * n;
    let mut integral = Vec::with_capacity(full + 1);
    let mut acc = 0.0f64;
    integral.push(0.0);
    for i in 1..=full {
        // u in [-W, W]; kernel value at the midpoint of the slice
        let u = (i as f64 - 0.5) / RESOLUTION as f64 - SINC_WIDTH as f64;
        let a = u.abs();
        let idx = ((a * RESOLUTION as f64) as usize).min(n);
        acc += sinc[idx] as f64 * window[idx] as f64 / RESOLUTION as f64;
        integral.push(acc);
    }
    let total = acc;
    let mut step_residual = Vec::with_capacity(full + 1);
    for &v in &integral {
        step_residual.push((v / total - 1.0) as f32);
    }

    // Ramp correction B(u) - u with B(u) = integral of S from -W. The
    // symmetric step integrates to exactly W in the continuum, so the tail
    // lands on 0; the residual quadrature error is pinned out linearly.
    let mut ramp_residual = Vec::with_capacity(full + 1);
    let mut b = 0.0f64;
    ramp_residual.push(SINC_WIDTH as f32);
    for i in 1..=full {
        let s_mid = 0.5 * (integral[i - 1] + integral[i]) / total;
        b += s_mid / RESOLUTION as f64;
        let u = i as f64 / RESOLUTION as f64 - SINC_WIDTH as f64;
        ramp_residual.push((b - u) as f32);
    }
    let tail = *ramp_residual.last().unwrap();
    for (i, v) in ramp_residual.iter_mut().enumerate() {
        *v -= tail * (i as f32 / full as f32);
    }

    Tables {
        sinc,
        window,
        cubic,
        step_residual,
        ramp_residual,
    }
}
