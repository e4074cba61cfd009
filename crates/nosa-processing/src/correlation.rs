//! Pairwise cross-correlation between objects
//!
//! Series recorded at different rates are linearly resampled to the lowest
//! rate and aligned by their offsets before every pair is correlated on the
//! window both series cover. Spike trains are correlated in bins of
//! `binfactor` lags, amplitudes lag by lag.

use crate::filters::{hilbert_envelope, interpolate_linear, FirBandpass};
use nosa_core::{mean, std_dev};
use num_complex::Complex;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::{debug, warn};

/// One object's share of a cross-signal stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub name: String,
    /// Spike train or processed signal
    pub series: Vec<f64>,
    pub sampling_rate: f64,
    /// Offset in seconds
    pub offset: f64,
}

/// Correlation of one pair of objects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairCorrelation {
    pub first: String,
    pub second: String,
    /// Correlation per lag (or lag bin); empty when the pair has no overlap
    pub values: Vec<f64>,
    /// Lag of the largest absolute correlation in seconds
    pub delay: Option<f64>,
    /// Correlation coefficient of the aligned series
    pub coefficient: Option<f64>,
    /// Correlation coefficient after shifting by `delay`
    pub delay_coefficient: Option<f64>,
}

impl PairCorrelation {
    fn empty(first: &str, second: &str) -> Self {
        Self {
            first: first.to_string(),
            second: second.to_string(),
            values: Vec::new(),
            delay: None,
            coefficient: None,
            delay_coefficient: None,
        }
    }

    /// Points for drawing the pair against `axis`
    ///
    /// Step plots carry one more axis value (bin edges) than values. A
    /// mismatching axis is reported and yields no points.
    pub fn plot_series(&self, axis: &[f64], step_mode: bool) -> (Vec<f64>, Vec<f64>) {
        if self.values.is_empty() {
            return (Vec::new(), Vec::new());
        }
        let expected = self.values.len() + usize::from(step_mode);
        if axis.len() != expected {
            warn!(
                "Correlation {} -- {}: axis has {} values, expected {}",
                self.first,
                self.second,
                axis.len(),
                expected
            );
            return (Vec::new(), Vec::new());
        }
        (axis.to_vec(), self.values.clone())
    }
}

/// Result of a cross-signal stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    /// Lag axis in seconds; bin edges for spike correlation
    pub lags: Vec<f64>,
    pub step_mode: bool,
    /// Pairs `(i, j)` with `i < j` in contribution order
    pub pairs: Vec<PairCorrelation>,
}

impl CorrelationResult {
    pub fn pair(&self, first: &str, second: &str) -> Option<&PairCorrelation> {
        self.pairs.iter().find(|p| p.first == first && p.second == second)
    }
}

/// Settings of the amplitude correlation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmplitudeSettings {
    /// Maximum lag in seconds
    pub maxlag: f64,
    pub use_bandpass: bool,
    /// Number of band-pass taps
    pub order: usize,
    pub highpass_freq: f64,
    pub lowpass_freq: f64,
    pub use_instantaneous: bool,
}

impl Default for AmplitudeSettings {
    fn default() -> Self {
        Self {
            maxlag: 1.0,
            use_bandpass: false,
            order: 4,
            highpass_freq: 7.0,
            lowpass_freq: 12.0,
            use_instantaneous: false,
        }
    }
}

/// Resample every series to the lowest rate, returning that rate
pub fn adjust_frequencies(series: Vec<Vec<f64>>, rates: &[f64]) -> (Vec<Vec<f64>>, f64) {
    let min_rate = rates.iter().copied().fold(f64::INFINITY, f64::min);
    let adjusted = series
        .into_iter()
        .zip(rates)
        .map(|(s, &rate)| {
            if rate == min_rate {
                s
            } else {
                let len = (s.len() as f64 * min_rate / rate).ceil() as usize;
                interpolate_linear(&s, len)
            }
        })
        .collect();
    (adjusted, min_rate)
}

/// Index ranges of two series covering their common well-defined frames
///
/// Offsets are in frames. A series of length 10 at offset 1 and one of length
/// 15 at offset 3 share frames 3 to 9, giving `2..9` and `0..7`. Ranges are
/// empty when the series do not overlap.
pub fn slice_signals(len1: usize, len2: usize, offset1: i64, offset2: i64) -> (Range<usize>, Range<usize>) {
    let start = offset1.max(offset2);
    let end = (offset1 + len1 as i64).min(offset2 + len2 as i64) - 1;
    if end <= start {
        return (0..0, 0..0);
    }
    (
        (start - offset1) as usize..(end - offset1) as usize,
        (start - offset2) as usize..(end - offset2) as usize,
    )
}

/// Pearson correlation coefficient, `None` for constant input
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.len() < 2 {
        return None;
    }
    let (ma, mb) = (mean(a), mean(b));
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for (x, y) in a.iter().zip(b) {
        cov += (x - ma) * (y - mb);
        va += (x - ma) * (x - ma);
        vb += (y - mb) * (y - mb);
    }
    let denominator = (va * vb).sqrt();
    (denominator > 0.0).then(|| cov / denominator)
}

/// Normalized cross-correlation of equal-length series for lags `-max_lag..=max_lag`
///
/// Value at lag ℓ is `Σ a[n+ℓ]·b[n] / (σa·σb·(N−|ℓ|))`, zero where the lag
/// exceeds the data. `None` when either series is constant.
pub fn cross_correlation(a: &[f64], b: &[f64], max_lag: usize) -> Option<Vec<f64>> {
    let n = a.len().min(b.len());
    if n == 0 {
        return None;
    }
    let (a, b) = (&a[..n], &b[..n]);
    let norm = std_dev(a) * std_dev(b);
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    let raw = lagged_products(a, b);
    let lag = max_lag as isize;
    Some(
        (-lag..=lag)
            .map(|l| {
                let overlap = n as isize - l.abs();
                if overlap <= 0 {
                    return 0.0;
                }
                raw[(l + n as isize - 1) as usize] / (norm * overlap as f64)
            })
            .collect(),
    )
}

/// `Σ a[k+ℓ]·b[k]` for every lag `ℓ ∈ -(N-1)..=N-1`, index `ℓ + N - 1`
///
/// Zero-padded FFT correlation: `IFFT(A · conj(B))`, wrapped lags unrolled.
fn lagged_products(a: &[f64], b: &[f64]) -> Vec<f64> {
    let n = a.len();
    let size = (2 * n - 1).next_power_of_two();
    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(size);

    let padded = |y: &[f64]| -> Vec<Complex<f64>> {
        let mut buffer = vec![Complex::new(0.0, 0.0); size];
        for (slot, &v) in buffer.iter_mut().zip(y) {
            slot.re = v;
        }
        buffer
    };
    let mut spectrum = padded(a);
    let mut other = padded(b);
    forward.process(&mut spectrum);
    forward.process(&mut other);
    for (x, y) in spectrum.iter_mut().zip(&other) {
        *x *= y.conj();
    }
    planner.plan_fft_inverse(size).process(&mut spectrum);

    let scale = size as f64;
    (-(n as isize - 1)..n as isize)
        .map(|l| spectrum[l.rem_euclid(size as isize) as usize].re / scale)
        .collect()
}

fn argmax_abs(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (k, v)| match best {
            Some((_, b)) if v.abs() <= b => best,
            _ => Some((k, v.abs())),
        })
        .map(|(k, _)| k)
}

/// Aligned series and offsets in frames, all at the returned rate
fn align(contributions: &[&Contribution]) -> (Vec<Vec<f64>>, Vec<i64>, f64) {
    let series = contributions.iter().map(|c| c.series.clone()).collect();
    let rates: Vec<f64> = contributions.iter().map(|c| c.sampling_rate).collect();
    let (series, rate) = adjust_frequencies(series, &rates);
    let offsets = contributions
        .iter()
        .map(|c| (c.offset * rate).round() as i64)
        .collect();
    (series, offsets, rate)
}

/// Binned correlation of spike trains
///
/// Trains without any spike do not contribute. `None` with fewer than two
/// contributors.
pub fn spike_correlation(contributions: &[Contribution], binfactor: usize, maxlag: f64) -> Option<CorrelationResult> {
    let trains: Vec<&Contribution> = contributions
        .iter()
        .filter(|c| c.series.iter().any(|&v| v != 0.0))
        .collect();
    if trains.len() < 2 {
        debug!("Spike correlation needs two objects with spikes, got {}", trains.len());
        return None;
    }
    let binfactor = binfactor.max(1);
    let (series, offsets, rate) = align(&trains);

    let binsize = binfactor as f64 / rate;
    let bins = (maxlag / binsize).round().max(0.0) as usize;
    let edges: Vec<f64> = (-(bins as i64)..=bins as i64).map(|k| k as f64 * binsize).collect();

    let mut pairs = Vec::new();
    for i in 0..trains.len() {
        for j in i + 1..trains.len() {
            let (first, second) = (&trains[i].name, &trains[j].name);
            let (slice1, slice2) = slice_signals(series[i].len(), series[j].len(), offsets[i], offsets[j]);
            let data1 = &series[i][slice1];
            let data2 = &series[j][slice2];

            let Some(lagged) = cross_correlation(data1, data2, bins * binfactor) else {
                pairs.push(PairCorrelation::empty(first, second));
                continue;
            };
            // lagged[m] is lag m - bins·binfactor; bin k sums `binfactor` lags from (k - bins)·binfactor
            let values: Vec<f64> = (0..2 * bins)
                .map(|k| lagged[k * binfactor..(k + 1) * binfactor].iter().sum())
                .collect();

            pairs.push(PairCorrelation {
                first: first.clone(),
                second: second.clone(),
                delay: argmax_abs(&values).map(|k| edges[k] + binsize / 2.0),
                coefficient: pearson(data1, data2),
                delay_coefficient: None,
                values,
            });
        }
    }

    Some(CorrelationResult {
        lags: edges,
        step_mode: true,
        pairs,
    })
}

/// Band-pass corners after clamping to the usable range at `rate`
///
/// `None` when the band is empty or the tap count does not fit the rate.
pub fn bandpass_corners(rate: f64, order: usize, highpass_freq: f64, lowpass_freq: f64) -> Option<(f64, f64)> {
    if lowpass_freq <= highpass_freq {
        return None;
    }
    let half = (rate / 2.0).floor();
    let low = if highpass_freq <= 0.0 { 1.0 } else { highpass_freq };
    let high = if lowpass_freq >= half { half - 1.0 } else { lowpass_freq };
    if high <= low || order as f64 >= rate.round() || order < 2 {
        return None;
    }
    Some((low, high))
}

/// Lag-by-lag correlation of processed signals
///
/// `None` with fewer than two contributors or an unusable band-pass.
pub fn amplitude_correlation(contributions: &[Contribution], settings: &AmplitudeSettings) -> Option<CorrelationResult> {
    if contributions.len() < 2 {
        debug!("Amplitude correlation needs two objects, got {}", contributions.len());
        return None;
    }
    let all: Vec<&Contribution> = contributions.iter().collect();
    let (series, offsets, rate) = align(&all);

    let bandpass = if settings.use_bandpass {
        let Some((low, high)) = bandpass_corners(rate, settings.order, settings.highpass_freq, settings.lowpass_freq) else {
            warn!(
                "Band-pass {}-{} Hz with {} taps is not usable at {} Hz",
                settings.highpass_freq, settings.lowpass_freq, settings.order, rate
            );
            return None;
        };
        match FirBandpass::design(settings.order, rate, low, high) {
            Some(filter) => Some(filter),
            None => {
                warn!("Band-pass design failed for {}-{} Hz at {} Hz", low, high, rate);
                return None;
            }
        }
    } else {
        None
    };

    let max_lag = (settings.maxlag * rate).round().max(0.0) as usize;
    let lags: Vec<f64> = (-(max_lag as i64)..=max_lag as i64).map(|k| k as f64 / rate).collect();

    let prepare = |data: &[f64]| -> Vec<f64> {
        let mut data = match &bandpass {
            Some(filter) => filter.filter(data),
            None => data.to_vec(),
        };
        if settings.use_instantaneous {
            data = hilbert_envelope(&data);
        }
        let centre = mean(&data);
        data.iter().map(|v| v - centre).collect()
    };

    let mut pairs = Vec::new();
    for i in 0..contributions.len() {
        for j in i + 1..contributions.len() {
            let (first, second) = (&contributions[i].name, &contributions[j].name);
            let (slice1, slice2) = slice_signals(series[i].len(), series[j].len(), offsets[i], offsets[j]);
            if slice1.is_empty() {
                pairs.push(PairCorrelation::empty(first, second));
                continue;
            }
            let data1 = prepare(&series[i][slice1]);
            let data2 = prepare(&series[j][slice2]);

            let Some(values) = cross_correlation(&data1, &data2, max_lag) else {
                pairs.push(PairCorrelation::empty(first, second));
                continue;
            };
            let peak = argmax_abs(&values);
            let delay_coefficient = peak.and_then(|k| {
                let (s1, s2) = slice_signals(data1.len(), data2.len(), 0, k as i64 - max_lag as i64);
                pearson(&data1[s1], &data2[s2])
            });

            pairs.push(PairCorrelation {
                first: first.clone(),
                second: second.clone(),
                delay: peak.map(|k| lags[k]),
                coefficient: pearson(&data1, &data2),
                delay_coefficient,
                values,
            });
        }
    }

    Some(CorrelationResult {
        lags,
        step_mode: false,
        pairs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contribution(name: &str, series: Vec<f64>, rate: f64, offset: f64) -> Contribution {
        Contribution {
            name: name.to_string(),
            series,
            sampling_rate: rate,
            offset,
        }
    }

    fn wave(n: usize, shift: usize) -> Vec<f64> {
        (0..n)
            .map(|i| ((i + shift) as f64 * 0.37).sin() + 0.5 * ((i + shift) as f64 * 0.11).cos())
            .collect()
    }

    #[test]
    fn test_slice_signals() {
        assert_eq!(slice_signals(10, 15, 1, 3), (2..9, 0..7));
        assert_eq!(slice_signals(15, 10, 3, 1), (0..7, 2..9));
        assert_eq!(slice_signals(5, 5, 0, 10), (0..0, 0..0));
    }

    #[test]
    fn test_adjust_frequencies() {
        let (series, rate) = adjust_frequencies(vec![vec![0.0, 1.0, 2.0, 3.0], vec![0.0, 1.0]], &[20.0, 10.0]);
        assert_eq!(rate, 10.0);
        assert_eq!(series[0], vec![0.0, 3.0]);
        assert_eq!(series[1], vec![0.0, 1.0]);
    }

    #[test]
    fn test_pearson() {
        assert!((pearson(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]).unwrap() - 1.0).abs() < 1e-12);
        assert!((pearson(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]).unwrap() + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&[1.0, 1.0], &[1.0, 2.0]), None);
    }

    #[test]
    fn test_cross_correlation_symmetry() {
        let a = wave(64, 0);
        let b = wave(64, 5);
        let ab = cross_correlation(&a, &b, 10).unwrap();
        let ba = cross_correlation(&b, &a, 10).unwrap();
        for k in 0..ab.len() {
            assert!((ab[k] - ba[ab.len() - 1 - k]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_cross_correlation_matches_direct_sum() {
        let a = wave(37, 0);
        let b = wave(37, 4);
        let sa = std_dev(&a);
        let sb = std_dev(&b);
        let values = cross_correlation(&a, &b, 40).unwrap();
        assert_eq!(values.len(), 81);
        for (k, value) in values.iter().enumerate() {
            let l = k as isize - 40;
            let overlap = 37 - l.abs();
            if overlap <= 0 {
                assert_eq!(*value, 0.0);
                continue;
            }
            let sum: f64 = (0..37isize)
                .filter(|&i| (0..37).contains(&(i + l)))
                .map(|i| a[(i + l) as usize] * b[i as usize])
                .sum();
            assert!((value - sum / (sa * sb * overlap as f64)).abs() < 1e-9);
        }
        assert!(cross_correlation(&a, &[1.0; 37], 3).is_none());
    }

    #[test]
    fn test_cross_correlation_long_series() {
        let a = wave(100_000, 0);
        let b = wave(100_000, 7);
        let values = cross_correlation(&a, &b, 10_000).unwrap();
        assert_eq!(values.len(), 20_001);
        // b[n] = a[n + 7], so the products line up at lag 7
        let direct: f64 = (0..100_000 - 7).map(|i| a[i + 7] * b[i]).sum::<f64>()
            / (std_dev(&a) * std_dev(&b) * 99_993.0);
        assert!((values[10_007] - direct).abs() < 1e-9);
    }

    #[test]
    fn test_amplitude_delay() {
        // Second object sees the same signal 3 frames later
        let base = wave(200, 0);
        let delayed: Vec<f64> = (0..200).map(|i| if i < 3 { base[0] } else { base[i - 3] }).collect();
        let contributions = vec![
            contribution("a", base, 10.0, 0.0),
            contribution("b", delayed, 10.0, 0.0),
        ];
        let result = amplitude_correlation(&contributions, &AmplitudeSettings::default()).unwrap();
        assert_eq!(result.lags.len(), 21);

        let pair = result.pair("a", "b").unwrap();
        assert_eq!(pair.values.len(), 21);
        assert!((pair.delay.unwrap() + 0.3).abs() < 1e-9);
        assert!(pair.delay_coefficient.unwrap() > 0.99);
        assert!(pair.coefficient.unwrap() < pair.delay_coefficient.unwrap());

        let (x, y) = pair.plot_series(&result.lags, result.step_mode);
        assert_eq!(x.len(), y.len());
        assert!(pair.plot_series(&result.lags[1..], result.step_mode).0.is_empty());
    }

    #[test]
    fn test_amplitude_mixed_rates_and_offsets() {
        let contributions = vec![
            contribution("a", wave(200, 0), 20.0, 0.0),
            contribution("b", wave(100, 0), 10.0, 2.0),
        ];
        let result = amplitude_correlation(&contributions, &AmplitudeSettings::default()).unwrap();
        assert_eq!(result.pairs.len(), 1);
        assert!((result.lags[1] - result.lags[0] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_amplitude_needs_two_contributors() {
        let single = vec![contribution("a", wave(50, 0), 10.0, 0.0)];
        assert!(amplitude_correlation(&single, &AmplitudeSettings::default()).is_none());
    }

    #[test]
    fn test_bandpass_corners() {
        assert_eq!(bandpass_corners(100.0, 4, 7.0, 12.0), Some((7.0, 12.0)));
        assert_eq!(bandpass_corners(100.0, 4, 0.0, 80.0), Some((1.0, 49.0)));
        assert_eq!(bandpass_corners(100.0, 4, 12.0, 7.0), None);
        assert_eq!(bandpass_corners(10.0, 10, 1.0, 3.0), None);
        assert_eq!(bandpass_corners(100.0, 1, 1.0, 3.0), None);

        let settings = AmplitudeSettings {
            use_bandpass: true,
            highpass_freq: 12.0,
            lowpass_freq: 7.0,
            ..AmplitudeSettings::default()
        };
        let contributions = vec![
            contribution("a", wave(100, 0), 100.0, 0.0),
            contribution("b", wave(100, 1), 100.0, 0.0),
        ];
        assert!(amplitude_correlation(&contributions, &settings).is_none());
    }

    #[test]
    fn test_spike_correlation() {
        let mut a = vec![0.0; 100];
        let mut b = vec![0.0; 100];
        for k in (10..90).step_by(20) {
            a[k] = 1.0;
            b[k + 2] = 1.0;
        }
        let silent = vec![0.0; 100];
        let contributions = vec![
            contribution("a", a, 10.0, 0.0),
            contribution("silent", silent, 10.0, 0.0),
            contribution("b", b, 10.0, 0.0),
        ];
        let result = spike_correlation(&contributions, 1, 1.0).unwrap();
        assert!(result.step_mode);
        assert_eq!(result.lags.len(), 21);
        assert_eq!(result.pairs.len(), 1);

        let pair = &result.pairs[0];
        assert_eq!(pair.values.len(), 20);
        assert_eq!(pair.delay_coefficient, None);
        // b trails a by 2 frames, so a[n + l]·b[n] peaks at l = -2
        assert!((pair.delay.unwrap() - (-0.2 + 0.05)).abs() < 1e-9);
        assert_eq!(pair.plot_series(&result.lags, true).0.len(), 21);
    }

    #[test]
    fn test_spike_correlation_needs_spikes() {
        let contributions = vec![
            contribution("a", vec![0.0, 1.0, 0.0], 10.0, 0.0),
            contribution("b", vec![0.0; 3], 10.0, 0.0),
        ];
        assert!(spike_correlation(&contributions, 1, 1.0).is_none());
    }
}
