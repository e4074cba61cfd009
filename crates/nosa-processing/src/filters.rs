//! Smoothing, filtering and resampling primitives
//!
//! Pure functions over `f64` slices. Filters that can be mis-designed for a
//! given sampling rate return `None` instead of panicking.

use crate::linalg::{least_squares, solve_tridiagonal};
use nosa_core::InterpolationMethod;
use num_complex::Complex;
use rustfft::FftPlanner;
use std::f64::consts::PI;

/// Index into `0..n` for a possibly out-of-range position, mirrored about the
/// edge samples (`d c b | a b c d | c b a`)
pub(crate) fn reflect_index(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let period = 2 * (n as isize - 1);
    let j = i.rem_euclid(period);
    if j >= n as isize {
        (period - j) as usize
    } else {
        j as usize
    }
}

/// Index mirrored including the edge samples (`d c b a | a b c d | d c b a`)
pub(crate) fn symmetric_index(i: isize, n: usize) -> usize {
    let period = 2 * n as isize;
    let j = i.rem_euclid(period);
    if j >= n as isize {
        (period - 1 - j) as usize
    } else {
        j as usize
    }
}

/// Hann window of length `m`, endpoints included
pub fn hanning(m: usize) -> Vec<f64> {
    match m {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => (0..m)
            .map(|k| 0.5 - 0.5 * (2.0 * PI * k as f64 / (m - 1) as f64).cos())
            .collect(),
    }
}

/// Hann-weighted moving average with reflect padding
///
/// Windows `<= 0` return the input, even windows are raised to the next odd
/// value. The output has the input's length.
pub fn moving_average(y: &[f64], window: i64) -> Vec<f64> {
    if window <= 0 || y.is_empty() {
        return y.to_vec();
    }
    let window = (if window % 2 == 0 { window + 1 } else { window }) as usize;
    let half = (window / 2) as isize;
    let weights = hanning(window);
    let total: f64 = weights.iter().sum();
    let weights: Vec<f64> = weights.iter().map(|w| w / total).collect();

    let n = y.len();
    (0..n as isize)
        .map(|i| {
            weights
                .iter()
                .enumerate()
                .map(|(k, w)| w * y[reflect_index(i - half + k as isize, n)])
                .sum()
        })
        .collect()
}

/// Polynomial fitted to `values` sampled at `x`, returned as coefficients
/// of increasing power
fn polyfit(x: &[f64], values: &[f64], order: usize) -> Option<Vec<f64>> {
    let rows: Vec<Vec<f64>> = x
        .iter()
        .map(|&xi| (0..=order).map(|p| xi.powi(p as i32)).collect())
        .collect();
    least_squares(&rows, values)
}

fn polyval(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

/// Savitzky-Golay smoothing with polynomial edge fitting
///
/// Returns the input unchanged when the (odd-forced) window does not exceed
/// `polyorder` or is longer than the signal.
pub fn savitzky_golay(y: &[f64], window: usize, polyorder: usize) -> Vec<f64> {
    let window = if window % 2 == 0 { window + 1 } else { window };
    let n = y.len();
    if window <= polyorder || window > n {
        return y.to_vec();
    }
    let half = window / 2;
    let x: Vec<f64> = (0..window).map(|k| k as f64 - half as f64).collect();

    // Centre value of the fit to a unit impulse at each window position
    let mut coefficients = Vec::with_capacity(window);
    for j in 0..window {
        let mut impulse = vec![0.0; window];
        impulse[j] = 1.0;
        match polyfit(&x, &impulse, polyorder) {
            Some(c) => coefficients.push(c[0]),
            None => return y.to_vec(),
        }
    }

    let mut out = y.to_vec();
    for i in half..n - half {
        out[i] = coefficients
            .iter()
            .zip(&y[i - half..i + half + 1])
            .map(|(c, v)| c * v)
            .sum();
    }

    // Edges from polynomials fitted to the first and last window
    if let Some(head) = polyfit(&x, &y[..window], polyorder) {
        for (i, value) in out.iter_mut().enumerate().take(half) {
            *value = polyval(&head, i as f64 - half as f64);
        }
    }
    if let Some(tail) = polyfit(&x, &y[n - window..], polyorder) {
        for i in n - half..n {
            out[i] = polyval(&tail, (i + window - n) as f64 - half as f64);
        }
    }
    out
}

/// Second order section `y = b0·x + z1`, transposed direct form II
#[derive(Debug, Clone, PartialEq)]
struct BiquadSection {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl BiquadSection {
    /// Run the section with its state settled on the first sample
    fn process(&self, input: &[f64]) -> Vec<f64> {
        let Some(&first) = input.first() else {
            return Vec::new();
        };
        let mut z2 = (self.b2 - self.a2) * first;
        let mut z1 = (self.b1 - self.a1) * first + z2;

        input
            .iter()
            .map(|&x| {
                let y = self.b0 * x + z1;
                z1 = self.b1 * x - self.a1 * y + z2;
                z2 = self.b2 * x - self.a2 * y;
                y
            })
            .collect()
    }
}

/// Butterworth low-pass as a cascade of second order sections
#[derive(Debug, Clone, PartialEq)]
pub struct ButterworthLowpass {
    sections: Vec<BiquadSection>,
}

impl ButterworthLowpass {
    /// Design via the pre-warped bilinear transform
    ///
    /// `None` unless `0 < cutoff < sampling_rate / 2` and `order >= 1`.
    pub fn design(cutoff: f64, sampling_rate: f64, order: usize) -> Option<Self> {
        if order == 0 || !(cutoff > 0.0 && cutoff < sampling_rate / 2.0) {
            return None;
        }
        let k = (PI * cutoff / sampling_rate).tan();
        let k2 = k * k;

        let mut sections = Vec::with_capacity(order / 2 + 1);
        for pair in 0..order / 2 {
            let inv_q = 2.0 * (PI * (2 * pair + 1) as f64 / (2 * order) as f64).sin();
            let norm = 1.0 / (1.0 + k * inv_q + k2);
            let b0 = k2 * norm;
            sections.push(BiquadSection {
                b0,
                b1: 2.0 * b0,
                b2: b0,
                a1: 2.0 * (k2 - 1.0) * norm,
                a2: (1.0 - k * inv_q + k2) * norm,
            });
        }
        if order % 2 == 1 {
            // Real pole as a degenerate section
            let b0 = k / (1.0 + k);
            sections.push(BiquadSection {
                b0,
                b1: b0,
                b2: 0.0,
                a1: (k - 1.0) / (k + 1.0),
                a2: 0.0,
            });
        }

        Some(Self { sections })
    }

    pub fn filter(&self, y: &[f64]) -> Vec<f64> {
        self.sections
            .iter()
            .fold(y.to_vec(), |signal, section| section.process(&signal))
    }
}

/// Highest usable Butterworth cutoff for a sampling rate
pub fn butterworth_max_cutoff(sampling_rate: f64) -> f64 {
    let half = (sampling_rate / 2.0).floor();
    if sampling_rate % 2.0 == 0.0 {
        half - 1.0
    } else {
        half
    }
}

/// Hamming-windowed FIR band-pass
#[derive(Debug, Clone, PartialEq)]
pub struct FirBandpass {
    taps: Vec<f64>,
}

impl FirBandpass {
    /// Design `numtaps` coefficients passing `[low, high]` Hz, unit gain at
    /// the band centre
    pub fn design(numtaps: usize, sampling_rate: f64, low: f64, high: f64) -> Option<Self> {
        let nyquist = sampling_rate / 2.0;
        if numtaps < 2 || !(0.0 < low && low < high && high < nyquist) {
            return None;
        }
        let left = low / nyquist;
        let right = high / nyquist;
        let alpha = (numtaps - 1) as f64 / 2.0;
        let window = hamming(numtaps);

        let mut taps: Vec<f64> = (0..numtaps)
            .map(|n| {
                let m = n as f64 - alpha;
                (right * sinc(right * m) - left * sinc(left * m)) * window[n]
            })
            .collect();

        let centre = (left + right) / 2.0;
        let scale: f64 = taps
            .iter()
            .enumerate()
            .map(|(n, h)| h * (PI * (n as f64 - alpha) * centre).cos())
            .sum();
        if scale == 0.0 || !scale.is_finite() {
            return None;
        }
        taps.iter_mut().for_each(|h| *h /= scale);

        Some(Self { taps })
    }

    pub fn taps(&self) -> &[f64] {
        &self.taps
    }

    /// Causal filtering, history before the first sample held at its value
    pub fn filter(&self, y: &[f64]) -> Vec<f64> {
        let Some(&first) = y.first() else {
            return Vec::new();
        };
        (0..y.len())
            .map(|n| {
                self.taps
                    .iter()
                    .enumerate()
                    .map(|(k, b)| b * if k <= n { y[n - k] } else { first })
                    .sum()
            })
            .collect()
    }
}

fn hamming(m: usize) -> Vec<f64> {
    if m == 1 {
        return vec![1.0];
    }
    (0..m)
        .map(|k| 0.54 - 0.46 * (2.0 * PI * k as f64 / (m - 1) as f64).cos())
        .collect()
}

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Magnitude of the analytic signal (Hilbert envelope)
pub fn hilbert_envelope(y: &[f64]) -> Vec<f64> {
    let n = y.len();
    if n == 0 {
        return Vec::new();
    }
    let mut planner = FftPlanner::<f64>::new();
    let mut buffer: Vec<Complex<f64>> = y.iter().map(|&v| Complex::new(v, 0.0)).collect();
    planner.plan_fft_forward(n).process(&mut buffer);

    // Double positive frequencies, drop negative ones
    for (k, value) in buffer.iter_mut().enumerate() {
        let gain = if k == 0 || (n % 2 == 0 && k == n / 2) {
            1.0
        } else if k < (n + 1) / 2 {
            2.0
        } else {
            0.0
        };
        *value *= gain;
    }

    planner.plan_fft_inverse(n).process(&mut buffer);
    buffer.iter().map(|c| c.norm() / n as f64).collect()
}

/// Resample onto `round(factor·len)` points spanning the original indices
pub fn resample(y: &[f64], factor: f64, method: InterpolationMethod) -> Vec<f64> {
    let n = y.len();
    let num = (factor * n as f64).round().max(0.0) as usize;
    let positions = nosa_core::linspace(0.0, n.saturating_sub(1) as f64, num);

    match method {
        InterpolationMethod::Nearest => positions
            .iter()
            .map(|&x| y[((x - 0.5).ceil().max(0.0) as usize).min(n - 1)])
            .collect(),
        InterpolationMethod::Linear => positions.iter().map(|&x| linear_at(y, x)).collect(),
        InterpolationMethod::Cubic => match not_a_knot_moments(y) {
            Some(moments) => positions.iter().map(|&x| spline_at(y, &moments, x)).collect(),
            None => positions.iter().map(|&x| linear_at(y, x)).collect(),
        },
    }
}

fn linear_at(y: &[f64], x: f64) -> f64 {
    let n = y.len();
    if n == 1 {
        return y[0];
    }
    let i = (x.floor().max(0.0) as usize).min(n - 2);
    let t = x - i as f64;
    y[i] + t * (y[i + 1] - y[i])
}

/// Second derivatives of the not-a-knot cubic spline through unit-spaced
/// samples; `None` below four samples
fn not_a_knot_moments(y: &[f64]) -> Option<Vec<f64>> {
    let n = y.len();
    if n < 4 {
        return None;
    }
    let rhs: Vec<f64> = (0..n)
        .map(|i| {
            if i == 0 || i == n - 1 {
                0.0
            } else {
                6.0 * (y[i + 1] - 2.0 * y[i] + y[i - 1])
            }
        })
        .collect();

    // Not-a-knot collapses the first and last interior rows to M = rhs / 6
    let mut m = vec![0.0; n];
    m[1] = rhs[1] / 6.0;
    m[n - 2] = rhs[n - 2] / 6.0;

    if n > 4 {
        let inner = n - 4; // rows 2..=n-3
        let lower = vec![1.0; inner];
        let upper = vec![1.0; inner];
        let diag = vec![4.0; inner];
        let mut b: Vec<f64> = rhs[2..n - 2].to_vec();
        b[0] -= m[1];
        b[inner - 1] -= m[n - 2];
        let solved = solve_tridiagonal(&lower, &diag, &upper, &b)?;
        m[2..n - 2].copy_from_slice(&solved);
    }

    m[0] = 2.0 * m[1] - m[2];
    m[n - 1] = 2.0 * m[n - 2] - m[n - 3];
    Some(m)
}

fn spline_at(y: &[f64], m: &[f64], x: f64) -> f64 {
    let n = y.len();
    let i = (x.floor().max(0.0) as usize).min(n - 2);
    let t = x - i as f64;
    let s = 1.0 - t;
    s * y[i] + t * y[i + 1] + ((s * s * s - s) * m[i] + (t * t * t - t) * m[i + 1]) / 6.0
}

/// Linear interpolation of `y` (unit-spaced) onto `num` evenly spaced points
pub fn interpolate_linear(y: &[f64], num: usize) -> Vec<f64> {
    if y.is_empty() {
        return Vec::new();
    }
    nosa_core::linspace(0.0, (y.len() - 1) as f64, num)
        .iter()
        .map(|&x| linear_at(y, x))
        .collect()
}
