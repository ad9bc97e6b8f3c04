//! Circular shifts, integer and fractional
//!
//! `roll` is the single rotation primitive used everywhere in this crate
//! (spectrum shifting, delay nulling); `roll_lerp` extends it to fractional
//! offsets with a two-tap linear interpolation between the neighboring
//! integer rotations.

use num::complex::Complex64;

/// Circular rotation by an integer number of samples.
///
/// Follows the `np.roll` convention: `out[(i + shift) mod n] == x[i]`, so a
/// positive shift moves content toward higher indices. Any `shift` is
/// accepted, including negative values and magnitudes beyond `x.len()`.
pub fn roll<T: Copy>(x: &[T], shift: i64) -> Vec<T> {
    let n = x.len();
    if n == 0 {
        return Vec::new();
    }

    let s = shift.rem_euclid(n as i64) as usize;
    let mut out = Vec::with_capacity(n);
    out.extend_from_slice(&x[n - s..]);
    out.extend_from_slice(&x[..n - s]);
    out
}

fn lerp(u: Complex64, v: Complex64, w: f64) -> Complex64 {
    u * (1.0 - w) + v * w
}

/// Circular shift by a fractional number of samples.
///
/// Interpolates linearly between the rotations by `floor(shift)` and
/// `ceil(shift)`, weighted by the fractional part. Integer offsets take the
/// rotation path directly and are bit-identical to [`roll`], with no
/// interpolation blur.
///
/// Callers null out an estimated delay with `roll_lerp(signal, -estimate)`.
pub fn roll_lerp(x: &[Complex64], shift: f64) -> Vec<Complex64> {
    let a = shift.floor();
    let w = shift - a;

    let u = roll(x, a as i64);
    if w == 0.0 {
        return u;
    }

    let v = roll(x, a as i64 + 1);
    u.into_iter()
        .zip(v)
        .map(|(u, v)| lerp(u, v, w))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(re: f64) -> Complex64 {
        Complex64::new(re, 0.0)
    }

    #[test]
    fn roll_matches_numpy_convention() {
        assert_eq!(roll(&[1, 0, 0, 0], 1), vec![0, 1, 0, 0]);
        assert_eq!(roll(&[1, 2, 3, 4], -1), vec![2, 3, 4, 1]);
        assert_eq!(roll(&[1, 2, 3, 4], 5), vec![4, 1, 2, 3]);
        assert_eq!(roll(&[1, 2, 3, 4], 0), vec![1, 2, 3, 4]);
    }

    #[test]
    fn roll_empty_is_empty() {
        assert_eq!(roll::<i32>(&[], 3), Vec::<i32>::new());
    }

    #[test]
    fn roll_lerp_halfway() {
        let x = [c(1.0), c(0.0), c(0.0), c(0.0)];
        let shifted = roll_lerp(&x, 0.5);
        assert_eq!(shifted, vec![c(0.5), c(0.5), c(0.0), c(0.0)]);
    }

    #[test]
    fn roll_lerp_integer_is_exact_rotation() {
        let x: Vec<Complex64> = (0..16)
            .map(|i| Complex64::new(0.1 * i as f64, -0.3 * i as f64))
            .collect();

        for k in [-7i64, -1, 0, 1, 3, 16, 21] {
            assert_eq!(roll_lerp(&x, k as f64), roll(&x, k), "shift {k}");
        }
    }

    #[test]
    fn roll_lerp_negative_fraction() {
        let x = [c(1.0), c(0.0), c(0.0), c(0.0)];
        // floor(-0.5) = -1, weight 0.5: halfway between roll -1 and roll 0
        let shifted = roll_lerp(&x, -0.5);
        assert_eq!(shifted, vec![c(0.5), c(0.0), c(0.0), c(0.5)]);
    }
}
