//! Delay estimation accuracy and robustness on synthetic sweeps.
//!
//! The reference is a unit-amplitude linear sweep occupying the central
//! fifth of the Nyquist band, the same shape the calibration workflows
//! model; the allow mask for the phase-slope estimator selects the bins
//! inside that band.


use std::sync::Arc;

use num::complex::Complex64;
use ordaiq::{
    roll, roll_lerp, CorrelationPeakEstimator, DelayEstimator, PhaseSlopeEstimator,
};
use test_utils::{add_noise, center_mask, circular_error, init_test_tracing, sweep};

const N: usize = 1024;

fn reference() -> Vec<Complex64> {
    // ±10% of the sample rate around DC.
    sweep(N, -0.1 * N as f64, 0.1 * N as f64)
}

fn mask() -> Vec<bool> {
    center_mask(N, 82)
}

#[test]
fn correlation_peak_recovers_integer_shifts() {
    let reference = reference();
    let estimator = CorrelationPeakEstimator::new(&reference);

    for d in [0usize, 1, 5, 17, 100, 500, 900, 1000, 1023] {
        let shifted = roll(&reference, d as i64);
        let estimate = estimator.estimate(&shifted).unwrap();
        let err = circular_error(estimate, d as f64, N);
        assert!(err < 0.05, "d={d}: estimate {estimate}, error {err}");
    }
}

#[test]
fn correlation_peak_handles_peaks_at_the_array_seam() {
    // Delays of 0 and N-1 put correlation energy on both sides of index 0.
    // The fit must treat those samples as one neighborhood, not report a
    // vertex in the middle of the array.
    let reference = reference();
    let estimator = CorrelationPeakEstimator::new(&reference);

    for d in [0usize, 1022, 1023] {
        let shifted = roll(&reference, d as i64);
        let estimate = estimator.estimate(&shifted).unwrap();
        assert!(
            (0.0..(N as f64)).contains(&estimate),
            "d={d}: estimate {estimate} out of range"
        );
        let err = circular_error(estimate, d as f64, N);
        assert!(err < 0.05, "d={d}: estimate {estimate}, error {err}");
    }
}

#[test]
fn phase_slope_recovers_integer_shifts() {
    let reference = reference();
    let estimator = PhaseSlopeEstimator::new(&reference, &mask()).unwrap();

    for d in [0usize, 5, 17, 100, 500, 900] {
        let shifted = roll(&reference, d as i64);
        let estimate = estimator.estimate(&shifted).unwrap();
        let err = circular_error(estimate, d as f64, N);
        assert!(err < 0.05, "d={d}: estimate {estimate}, error {err}");
    }
}

#[test]
fn both_recover_fractional_shifts() {
    let reference = reference();
    let correlation = CorrelationPeakEstimator::new(&reference);
    let phase_slope = PhaseSlopeEstimator::new(&reference, &mask()).unwrap();

    for d in [5.5f64, 17.25, 3.75] {
        let shifted = roll_lerp(&reference, d);

        let estimate = phase_slope.estimate(&shifted).unwrap();
        assert!(
            (estimate - d).abs() < 0.02,
            "phase slope d={d}: {estimate}"
        );

        let estimate = correlation.estimate(&shifted).unwrap();
        assert!(
            (estimate - d).abs() < 0.05,
            "correlation d={d}: {estimate}"
        );
    }
}

#[test]
fn estimates_survive_noise() {
    init_test_tracing();

    let reference = reference();
    let correlation = CorrelationPeakEstimator::new(&reference);
    let phase_slope = PhaseSlopeEstimator::new(&reference, &mask()).unwrap();

    let mut shifted = roll(&reference, 17);
    add_noise(&mut shifted, 0.1, 11);

    let estimate = correlation.estimate(&shifted).unwrap();
    assert!((estimate - 17.0).abs() < 0.1, "correlation: {estimate}");

    let estimate = phase_slope.estimate(&shifted).unwrap();
    assert!((estimate - 17.0).abs() < 0.1, "phase slope: {estimate}");
}

#[test]
fn phase_slope_is_invariant_to_global_phase_rotation() {
    let reference = reference();
    let estimator = PhaseSlopeEstimator::new(&reference, &mask()).unwrap();

    let shifted = roll(&reference, 17);
    let baseline = estimator.estimate(&shifted).unwrap();

    for theta in [0.5f64, 2.0, 3.1, -1.2] {
        let rotation = Complex64::from_polar(1.0, theta);
        let rotated: Vec<Complex64> = shifted.iter().map(|v| v * rotation).collect();
        let estimate = estimator.estimate(&rotated).unwrap();
        assert!(
            (estimate - baseline).abs() < 1e-9,
            "theta={theta}: {estimate} vs {baseline}"
        );
    }
}

#[test]
fn phase_slope_sums_coherently_near_the_wrap() {
    // A delay near N/2 puts every per-bin phase difference next to ±π.
    // With noise, individual differences scatter across the wrap; averaging
    // their angles collapses toward zero (off by hundreds of samples here),
    // the coherent complex sum stays on target.
    let reference = reference();
    let estimator = PhaseSlopeEstimator::new(&reference, &mask()).unwrap();

    let mut shifted = roll(&reference, 500);
    add_noise(&mut shifted, 0.1, 3);

    let estimate = estimator.estimate(&shifted).unwrap();
    assert!(
        (estimate - 500.0).abs() < 0.5,
        "estimate {estimate} drifted from 500"
    );
}

#[test]
fn nulling_the_estimated_delay_restores_the_reference() {
    let reference = reference();
    let estimator = PhaseSlopeEstimator::new(&reference, &mask()).unwrap();

    let shifted = roll(&reference, 17);
    let estimate = estimator.estimate(&shifted).unwrap();
    let aligned = roll_lerp(&shifted, -estimate);

    let worst = aligned
        .iter()
        .zip(&reference)
        .map(|(a, r)| (a - r).norm())
        .fold(0.0f64, f64::max);
    assert!(worst < 1e-6, "worst residual {worst}");
}

#[test]
fn one_estimator_serves_many_threads() {
    let reference = reference();
    let estimator = Arc::new(PhaseSlopeEstimator::new(&reference, &mask()).unwrap());

    let handles: Vec<_> = [5usize, 17, 100, 500]
        .into_iter()
        .map(|d| {
            let estimator = Arc::clone(&estimator);
            let shifted = roll(&reference, d as i64);
            std::thread::spawn(move || (d, estimator.estimate(&shifted).unwrap()))
        })
        .collect();

    for handle in handles {
        let (d, estimate) = handle.join().unwrap();
        assert!(
            circular_error(estimate, d as f64, N) < 0.05,
            "d={d}: {estimate}"
        );
    }
}
