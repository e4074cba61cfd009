//! Baseline estimators
//!
//! Every estimator returns the baseline itself; [`remove_baseline`] turns it
//! into the corrected trace (plain difference, or ΔF/F in percent for image
//! sequences).

use crate::filters::symmetric_index;
use crate::linalg::{least_squares, solve_pentadiagonal};
use nosa_core::FileType;

/// Minimum distance between two baseline markers, in samples
pub const MIN_MARKER_DISTANCE: usize = 4;

/// Highest supported polynomial degree
pub const MAX_POLYNOMIAL_DEGREE: usize = 6;

/// Asymmetric least squares baseline
///
/// Penalty weight is `smooth³`. Returns `None` when a solve is singular.
pub fn als(y: &[f64], iterations: usize, smooth: f64, p: f64) -> Option<Vec<f64>> {
    let n = y.len();
    if n < 3 {
        return Some(y.to_vec());
    }
    let lambda = smooth.powi(3);

    // D·Dᵀ for the second-difference columns [1, -2, 1]
    let stencil = [1.0, -2.0, 1.0];
    let mut penalty_main = vec![0.0; n];
    let mut penalty_first = vec![0.0; n - 1];
    let mut penalty_second = vec![0.0; n - 2];
    for j in 0..n - 2 {
        for a in 0..3 {
            penalty_main[j + a] += stencil[a] * stencil[a];
            if a + 1 < 3 {
                penalty_first[j + a] += stencil[a] * stencil[a + 1];
            }
        }
        penalty_second[j] += stencil[0] * stencil[2];
    }
    let first: Vec<f64> = penalty_first.iter().map(|v| lambda * v).collect();
    let second: Vec<f64> = penalty_second.iter().map(|v| lambda * v).collect();

    let mut weights = vec![1.0; n];
    let mut z = y.to_vec();
    for _ in 0..iterations.max(1) {
        let main: Vec<f64> = weights
            .iter()
            .zip(&penalty_main)
            .map(|(w, d)| w + lambda * d)
            .collect();
        let rhs: Vec<f64> = weights.iter().zip(y).map(|(w, v)| w * v).collect();
        z = solve_pentadiagonal(&main, &first, &second, &rhs)?;

        weights = y
            .iter()
            .zip(&z)
            .map(|(&v, &fit)| {
                if v > fit {
                    p
                } else if v < fit {
                    1.0 - p
                } else {
                    0.0
                }
            })
            .collect();
    }
    Some(z)
}

/// Morphological top-hat baseline: grey opening with a flat element of
/// `round(factor·len)` samples
pub fn top_hat(y: &[f64], factor: f64) -> Vec<f64> {
    let n = y.len();
    if n == 0 {
        return Vec::new();
    }
    let width = ((n as f64 * factor).round_ties_even() as usize).max(1);
    let half = (width / 2) as isize;
    let after = (width - 1) as isize - half;

    let eroded: Vec<f64> = (0..n as isize)
        .map(|i| {
            (i - half..=i + after)
                .map(|k| y[symmetric_index(k, n)])
                .fold(f64::INFINITY, f64::min)
        })
        .collect();

    (0..n as isize)
        .map(|i| {
            (i - after..=i + half)
                .map(|k| eroded[symmetric_index(k, n)])
                .fold(f64::NEG_INFINITY, f64::max)
        })
        .collect()
}

/// Least-squares polynomial through `(fit_x, fit_y)` evaluated at `x`, plus
/// `intercept`
///
/// Degree 0 broadcasts the mean of `fit_y`. `None` when fewer than
/// `degree + 1` points are given or the fit is singular.
pub fn polynomial(x: &[f64], fit_x: &[f64], fit_y: &[f64], intercept: f64, degree: usize) -> Option<Vec<f64>> {
    if fit_x.len() != fit_y.len() || fit_y.is_empty() || degree > MAX_POLYNOMIAL_DEGREE {
        return None;
    }
    if degree == 0 {
        let mean = fit_y.iter().sum::<f64>() / fit_y.len() as f64;
        return Some(vec![mean + intercept; x.len()]);
    }
    if fit_x.len() < degree + 1 {
        return None;
    }

    // Centre and scale abscissae for a well-conditioned Vandermonde matrix
    let centre = fit_x.iter().sum::<f64>() / fit_x.len() as f64;
    let scale = fit_x
        .iter()
        .map(|v| (v - centre).abs())
        .fold(0.0, f64::max)
        .max(1.0);
    let rows: Vec<Vec<f64>> = fit_x
        .iter()
        .map(|&v| {
            let t = (v - centre) / scale;
            (0..=degree).map(|p| t.powi(p as i32)).collect()
        })
        .collect();
    let coefficients = least_squares(&rows, fit_y)?;

    Some(
        x.iter()
            .map(|&v| {
                let t = (v - centre) / scale;
                coefficients.iter().rev().fold(0.0, |acc, c| acc * t + c) + intercept
            })
            .collect(),
    )
}

/// Polynomial baseline fitted on marker samples only
///
/// Markers outside the signal are ignored.
pub fn polynomial_with_markers(y: &[f64], markers: &[usize], intercept: f64, degree: usize) -> Option<Vec<f64>> {
    let x: Vec<f64> = (0..y.len()).map(|i| i as f64).collect();
    let (fit_x, fit_y): (Vec<f64>, Vec<f64>) = markers
        .iter()
        .filter(|&&m| m < y.len())
        .map(|&m| (m as f64, y[m]))
        .unzip();
    polynomial(&x, &fit_x, &fit_y, intercept, degree)
}

/// Relative change against the baseline in percent; 0 where the baseline is 0
pub fn gradient(y: &[f64], baseline: &[f64]) -> Vec<f64> {
    y.iter()
        .zip(baseline)
        .map(|(&v, &b)| if b == 0.0 { 0.0 } else { (v - b) / b * 100.0 })
        .collect()
}

/// Corrected trace for a source type
pub fn remove_baseline(y: &[f64], baseline: &[f64], filetype: FileType) -> Vec<f64> {
    match filetype {
        FileType::ImageSequence => gradient(y, baseline),
        FileType::Electrophysiology => y.iter().zip(baseline).map(|(v, b)| v - b).collect(),
    }
}

/// Marker position near `initial` keeping `min_distance` to existing markers
///
/// Falls back to the middle of the widest gap; `None` when no gap is wide
/// enough.
pub fn find_valid_marker_position(markers: &[usize], initial: usize, len: usize, min_distance: usize) -> Option<usize> {
    let clashes = markers
        .iter()
        .any(|&m| m + min_distance > initial && initial + min_distance > m);
    if !clashes {
        return Some(initial);
    }

    let mut positions = markers.to_vec();
    if !positions.contains(&0) {
        positions.push(0);
    }
    if !positions.contains(&len) {
        positions.push(len);
    }
    positions.sort_unstable();

    // First widest gap wins
    let (gap, start) = positions
        .windows(2)
        .map(|w| (w[1] - w[0], w[0]))
        .fold((0, 0), |best, cur| if cur.0 > best.0 { cur } else { best });

    if gap >= min_distance {
        Some(start + gap / 2)
    } else {
        None
    }
}

/// Add markers until `degree + 1` exist, spreading new ones over the signal
pub fn place_markers(markers: &[usize], len: usize, degree: usize) -> Vec<usize> {
    let mut placed = markers.to_vec();
    let required = degree + 1;
    if placed.len() >= required || len == 0 {
        return placed;
    }
    let missing = required - placed.len();

    let candidates: Vec<usize> = if missing == 1 {
        vec![((len - 1) as f64 / 2.0).round_ties_even() as usize]
    } else {
        let step = (len - 1) / degree.max(1);
        (0..missing).map(|i| step * i).collect()
    };

    for candidate in candidates {
        if let Some(position) = find_valid_marker_position(&placed, candidate, len, MIN_MARKER_DISTANCE) {
            placed.push(position);
        }
    }
    placed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &[f64], b: &[f64], tol: f64) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < tol, "{} != {}", x, y);
        }
    }

    #[test]
    fn test_als_tracks_troughs() {
        // Flat baseline of 1 with two positive peaks
        let mut y = vec![1.0; 200];
        for i in 50..55 {
            y[i] = 10.0;
        }
        for i in 140..146 {
            y[i] = 8.0;
        }
        let baseline = als(&y, 10, 10.0, 0.001).unwrap();
        assert_eq!(baseline.len(), 200);
        assert!((baseline[10] - 1.0).abs() < 0.1);
        assert!((baseline[100] - 1.0).abs() < 0.1);
        assert!(baseline[52] < 3.0);
    }

    #[test]
    fn test_als_single_iteration_keeps_linear_trend() {
        let y: Vec<f64> = (0..50).map(|i| 0.5 * i as f64 + 2.0).collect();
        let baseline = als(&y, 1, 100.0, 0.001).unwrap();
        assert_close(&baseline, &y, 1e-5);
    }

    #[test]
    fn test_top_hat_opening() {
        let mut y = vec![2.0; 50];
        y[20] = 9.0;
        y[21] = 9.0;
        // Element of 5 samples removes the 2-sample peak
        let baseline = top_hat(&y, 0.1);
        assert_close(&baseline, &vec![2.0; 50], 1e-12);

        // Opening never exceeds the signal
        let wave: Vec<f64> = (0..90).map(|i| (i as f64 * 0.3).sin() + i as f64 * 0.01).collect();
        let opened = top_hat(&wave, 0.1);
        assert!(opened.iter().zip(&wave).all(|(o, v)| o <= v));
    }

    #[test]
    fn test_polynomial_fit() {
        let x: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 3.0 * v * v - v + 4.0).collect();
        let fit = polynomial(&x, &x, &y, 0.0, 2).unwrap();
        assert_close(&fit, &y, 1e-6);

        let mean = polynomial(&x, &x, &y, 1.0, 0).unwrap();
        let expected = y.iter().sum::<f64>() / 30.0 + 1.0;
        assert!(mean.iter().all(|v| (v - expected).abs() < 1e-9));
    }

    #[test]
    fn test_polynomial_with_markers() {
        let y: Vec<f64> = (0..40).map(|i| if i % 10 == 5 { 100.0 } else { 2.0 * i as f64 }).collect();
        // Markers avoid the spikes; out-of-range marker ignored
        let baseline = polynomial_with_markers(&y, &[0, 12, 30, 400], 0.0, 1).unwrap();
        let expected: Vec<f64> = (0..40).map(|i| 2.0 * i as f64).collect();
        assert_close(&baseline, &expected, 1e-9);

        assert!(polynomial_with_markers(&y, &[3], 0.0, 1).is_none());
    }

    #[test]
    fn test_gradient() {
        let grad = gradient(&[2.0, 1.5, 3.0], &[1.0, 1.0, 0.0]);
        assert_eq!(grad, vec![100.0, 50.0, 0.0]);

        let plain = remove_baseline(&[2.0, 1.5], &[1.0, 1.0], FileType::Electrophysiology);
        assert_eq!(plain, vec![1.0, 0.5]);
    }

    #[test]
    fn test_marker_positions() {
        assert_eq!(find_valid_marker_position(&[10], 20, 100, 4), Some(20));
        // Too close to 10: middle of the widest gap [10, 100]
        assert_eq!(find_valid_marker_position(&[10], 12, 100, 4), Some(55));
        assert_eq!(find_valid_marker_position(&[0, 2, 4], 2, 6, 4), None);

        assert_eq!(place_markers(&[], 101, 0), vec![50]);
        assert_eq!(place_markers(&[], 101, 2), vec![0, 50, 100]);
        assert_eq!(place_markers(&[0, 50], 101, 1), vec![0, 50]);
    }
}
