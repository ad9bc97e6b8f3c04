//! Sub-sample delay estimation between a reference waveform and a capture
//!
//! Two FFT-domain estimators share one precomputation: the spectrum of the
//! time-reversed, conjugated reference (circularly shifted by +1), which is
//! a matched filter for circular cross-correlation via multiplication in
//! the frequency domain.
//!
//! - [`CorrelationPeakEstimator`] works for any signal shape: full circular
//!   correlation, then a least-squares parabola through the 6 strongest
//!   magnitude samples; the vertex is the delay. Robust at low SNR, costs a
//!   forward and an inverse transform per call.
//! - [`PhaseSlopeEstimator`] is specialized for band-limited sweeps: a time
//!   delay is a linear phase ramp across frequency, so the delay falls out
//!   of the phase difference between adjacent bins of the correlation
//!   spectrum. The per-bin differences are summed as complex numbers and
//!   the angle is taken of the sum. Never replace that with an average of
//!   per-bin angles: near the ±π wrap the angles scatter to both signs and
//!   the average collapses, while the coherent sum does not.
//!
//! Estimators are immutable after construction and hold no shared mutable
//! state, so one instance can serve `estimate` calls from many threads.

use std::f64::consts::PI;
use std::sync::Arc;

use rustfft::{num_complex::Complex64, Fft, FftPlanner};
use snafu::{ensure, Snafu};
use tracing::trace;

use crate::shift::roll;

/// Number of correlation samples fed to the parabola fit.
const FIT_POINTS: usize = 6;

/// Per-call estimation failure. Recoverable: skip the offending capture,
/// the batch goes on.
#[derive(Debug, Snafu)]
pub enum EstimationError {
    #[snafu(display("signal length {got} does not match reference length {expected}"))]
    LengthMismatch { expected: usize, got: usize },

    #[snafu(display("correlation peak fit is degenerate"))]
    DegeneratePeakFit,
}

/// Estimator construction mistake. Fatal before any capture is processed.
#[derive(Debug, Snafu)]
pub enum ConfigurationError {
    #[snafu(display("frequency mask selects zero bins"))]
    EmptyBandMask,

    #[snafu(display("frequency mask length {got} does not match reference length {expected}"))]
    MaskLengthMismatch { expected: usize, got: usize },
}

/// Common interface over the two estimation algorithms.
///
/// Positive estimates mean the signal lags the reference. Implementations
/// are `Send + Sync`; one instance may be shared across worker threads.
pub trait DelayEstimator: Send + Sync {
    /// Estimate the fractional-sample delay of `signal` against the
    /// reference this estimator was built from.
    fn estimate(&self, signal: &[Complex64]) -> Result<f64, EstimationError>;
}

/// FFT of `conj(roll(reverse(r), 1))`: the matched filter spectrum turning
/// an elementwise product into circular cross-correlation with `r`.
fn matched_spectrum(reference: &[Complex64], fft: &dyn Fft<f64>) -> Vec<Complex64> {
    let n = reference.len();
    let mut spectrum: Vec<Complex64> = (0..n)
        .map(|t| reference[(n - t) % n].conj())
        .collect();
    fft.process(&mut spectrum);
    spectrum
}

/// General-purpose estimator: correlation peak location via parabola fit.
pub struct CorrelationPeakEstimator {
    spectrum: Vec<Complex64>,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
    n: usize,
}

impl CorrelationPeakEstimator {
    /// Prepare the matched filter for `reference`, the noise-free waveform
    /// captures will be compared against.
    pub fn new(reference: &[Complex64]) -> Self {
        let n = reference.len();
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(n);
        let inverse = planner.plan_fft_inverse(n);
        let spectrum = matched_spectrum(reference, forward.as_ref());

        Self {
            spectrum,
            forward,
            inverse,
            n,
        }
    }
}

impl DelayEstimator for CorrelationPeakEstimator {
    fn estimate(&self, signal: &[Complex64]) -> Result<f64, EstimationError> {
        ensure!(
            signal.len() == self.n,
            LengthMismatchSnafu {
                expected: self.n,
                got: signal.len()
            }
        );
        ensure!(self.n >= FIT_POINTS, DegeneratePeakFitSnafu);

        // Circular correlation by multiplication in the frequency domain.
        let mut buf = signal.to_vec();
        self.forward.process(&mut buf);
        for (s, m) in buf.iter_mut().zip(&self.spectrum) {
            *s *= m;
        }
        self.inverse.process(&mut buf);

        let scale = 1.0 / self.n as f64;
        let score: Vec<f64> = buf.iter().map(|v| v.norm() * scale).collect();

        // Stable ascending sort; the last FIT_POINTS indices are the peak
        // neighborhood, ties resolved in index order.
        let mut order: Vec<usize> = (0..self.n).collect();
        order.sort_by(|&i, &j| score[i].total_cmp(&score[j]));
        let top = &order[self.n - FIT_POINTS..];

        // The correlation is circular, so a peak at the array seam shows up
        // as indices near both 0 and N-1. Unwrap the fit abscissae to signed
        // offsets from the strongest sample, fit there, and map the vertex
        // back into [0, N).
        let center = order[self.n - 1] as i64;
        let half = (self.n / 2) as i64;
        let xs: Vec<f64> = top
            .iter()
            .map(|&i| ((i as i64 - center + half).rem_euclid(self.n as i64) - half) as f64)
            .collect();
        let ys: Vec<f64> = top.iter().map(|&i| score[i]).collect();

        let vertex = fit_parabola_vertex(&xs, &ys)?;
        let peak = (center as f64 + vertex).rem_euclid(self.n as f64);
        trace!(peak, "correlation peak");
        Ok(peak)
    }
}

/// Least-squares fit of `a*x + b*x^2 + c` through `(x, y)` points; returns
/// the vertex `-a / (2b)`.
fn fit_parabola_vertex(xs: &[f64], ys: &[f64]) -> Result<f64, EstimationError> {
    // A flat neighborhood has no peak to fit. Magnitudes from an FFT of a
    // degenerate input (all-zero, pure tone) come out equal up to roundoff.
    let max = ys.iter().fold(f64::MIN, |m, &v| m.max(v));
    let min = ys.iter().fold(f64::MAX, |m, &v| m.min(v));
    ensure!(max - min > 1e-9 * max.max(1.0), DegeneratePeakFitSnafu);

    // Normal equations for the basis (x, x^2, 1).
    let mut sx = [0.0f64; 5];
    let (mut sy, mut sxy, mut sx2y) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in xs.iter().zip(ys) {
        let mut p = 1.0;
        for s in sx.iter_mut() {
            *s += p;
            p *= x;
        }
        sy += y;
        sxy += x * y;
        sx2y += x * x * y;
    }

    let m = [
        [sx[2], sx[3], sx[1]],
        [sx[3], sx[4], sx[2]],
        [sx[1], sx[2], sx[0]],
    ];
    let rhs = [sxy, sx2y, sy];

    let det = det3(&m);
    ensure!(det != 0.0, DegeneratePeakFitSnafu);

    let a = det3(&replace_column(&m, 0, &rhs)) / det;
    let b = det3(&replace_column(&m, 1, &rhs)) / det;
    ensure!(b != 0.0, DegeneratePeakFitSnafu);

    let vertex = -a / (2.0 * b);
    ensure!(vertex.is_finite(), DegeneratePeakFitSnafu);
    Ok(vertex)
}

fn det3(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

fn replace_column(m: &[[f64; 3]; 3], col: usize, v: &[f64; 3]) -> [[f64; 3]; 3] {
    let mut out = *m;
    for row in 0..3 {
        out[row][col] = v[row];
    }
    out
}

/// Sweep-specialized estimator: delay from the phase slope of the
/// correlation spectrum, restricted to bins the caller marked reliable.
///
/// Bins outside the sweep's instantaneous bandwidth carry near-zero energy
/// and noise-dominated phase; the `indices_allow` mask (over fftshifted
/// bins, DC at the center) keeps them out of the sum.
pub struct PhaseSlopeEstimator {
    spectrum: Vec<Complex64>,
    forward: Arc<dyn Fft<f64>>,
    indices_allow: Vec<bool>,
    n: usize,
}

impl PhaseSlopeEstimator {
    pub fn new(
        reference: &[Complex64],
        indices_allow: &[bool],
    ) -> Result<Self, ConfigurationError> {
        let n = reference.len();
        ensure!(
            indices_allow.len() == n,
            MaskLengthMismatchSnafu {
                expected: n,
                got: indices_allow.len()
            }
        );
        ensure!(indices_allow.iter().any(|&b| b), EmptyBandMaskSnafu);

        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(n);
        let spectrum = matched_spectrum(reference, forward.as_ref());

        Ok(Self {
            spectrum,
            forward,
            indices_allow: indices_allow.to_vec(),
            n,
        })
    }
}

impl DelayEstimator for PhaseSlopeEstimator {
    fn estimate(&self, signal: &[Complex64]) -> Result<f64, EstimationError> {
        ensure!(
            signal.len() == self.n,
            LengthMismatchSnafu {
                expected: self.n,
                got: signal.len()
            }
        );

        let mut buf = signal.to_vec();
        self.forward.process(&mut buf);
        for (s, m) in buf.iter_mut().zip(&self.spectrum) {
            *s *= m;
        }

        // fftshift so the mask indexes a DC-centered spectrum.
        let shifted = roll(&buf, (self.n / 2) as i64);

        // Per-bin phase difference against the previous bin, kept in
        // rectangular form and summed coherently over the allowed band.
        let mut acc = Complex64::new(0.0, 0.0);
        for i in 0..self.n {
            if self.indices_allow[i] {
                let prev = shifted[(i + self.n - 1) % self.n];
                acc += shifted[i] * prev.conj();
            }
        }

        let tau = acc.arg() * self.n as f64 / (2.0 * PI);
        trace!(tau, "phase slope");
        Ok(-tau)
    }
}
