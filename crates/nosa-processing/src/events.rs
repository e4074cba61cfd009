//! Spike and burst detection
//!
//! Thresholds are either constant or follow a moving-average envelope, and
//! are either absolute or a multiple of a standard deviation. A missing noise
//! estimate (`None`) falls back to the residual of a light Savitzky-Golay
//! pass; `Some(0.0)` is used as given.

use crate::filters::{moving_average, savitzky_golay};
use crate::linalg::solve_dense;
use nosa_core::{mean, median, std_dev};
use serde::{Deserialize, Serialize};

/// Spread a relative threshold is measured in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RelativeTo {
    /// Standard deviation of the noise estimate
    #[default]
    Noise,
    /// Standard deviation of the signal itself
    Data,
}

impl RelativeTo {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelativeTo::Noise => "noise",
            RelativeTo::Data => "data",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "noise" => Some(RelativeTo::Noise),
            "data" => Some(RelativeTo::Data),
            _ => None,
        }
    }
}

/// Level a relative burst base is measured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RelativeBase {
    #[default]
    Median,
    Mean,
    Zero,
}

impl RelativeBase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelativeBase::Median => "median",
            RelativeBase::Mean => "mean",
            RelativeBase::Zero => "zero",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "median" => Some(RelativeBase::Median),
            "mean" => Some(RelativeBase::Mean),
            "zero" => Some(RelativeBase::Zero),
            _ => None,
        }
    }
}

/// Direction of burst deflections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Polarity {
    #[default]
    Depolarization,
    Hyperpolarization,
}

impl Polarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Polarity::Depolarization => "depolarization",
            Polarity::Hyperpolarization => "hyperpolarization",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "depolarization" => Some(Polarity::Depolarization),
            "hyperpolarization" => Some(Polarity::Hyperpolarization),
            _ => None,
        }
    }
}

/// Shared threshold settings of spike and burst detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSettings {
    pub dynamic: bool,
    pub relative: bool,
    pub dynamic_smooth: i64,
    pub absolute_amplitude: f64,
    pub relative_to: RelativeTo,
    pub relative_amplitude: f64,
}

impl Default for ThresholdSettings {
    fn default() -> Self {
        Self {
            dynamic: false,
            relative: false,
            dynamic_smooth: 300,
            absolute_amplitude: 1.0,
            relative_to: RelativeTo::Noise,
            relative_amplitude: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeSettings {
    pub threshold: ThresholdSettings,
    /// Minimum distance between spikes in ms
    pub distance_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurstSettings {
    pub threshold: ThresholdSettings,
    pub absolute_base: f64,
    pub relative_base: RelativeBase,
    /// Minimum burst duration in ms
    pub duration_ms: f64,
    pub polarity: Polarity,
}

/// Detected spikes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeResult {
    /// Sample index of each spike
    pub times: Vec<usize>,
    pub amplitudes: Vec<f64>,
    /// 0/1 train of length `len - 1`
    pub train: Vec<f64>,
    /// Spikes per second
    pub frequency: f64,
    pub mean_amplitude: Option<f64>,
    pub threshold: Vec<f64>,
}

/// Detected bursts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurstResult {
    pub starts: Vec<usize>,
    pub ends: Vec<usize>,
    /// Sample index of each burst's extremum
    pub peaks: Vec<usize>,
    pub amplitudes: Vec<f64>,
    /// Burst length in samples
    pub durations: Vec<usize>,
    /// Decay time constant in seconds, `None` where the fit failed
    pub decay_times: Vec<Option<f64>>,
    pub train: Vec<f64>,
    /// Bursts per second
    pub frequency: f64,
    pub mean_amplitude: Option<f64>,
    pub mean_duration: Option<f64>,
    pub upper_threshold: Vec<f64>,
    pub lower_threshold: Vec<f64>,
}

/// Standard deviation of the residual after a 5-sample cubic Savitzky-Golay pass
pub fn default_noise_std(y: &[f64]) -> f64 {
    let smoothed = savitzky_golay(y, 5, 3);
    let noise: Vec<f64> = y.iter().zip(&smoothed).map(|(a, b)| a - b).collect();
    std_dev(&noise)
}

/// Threshold level before the optional envelope is added
fn amplitude_level(y: &[f64], settings: &ThresholdSettings, noise_std: Option<f64>) -> f64 {
    if !settings.relative {
        return settings.absolute_amplitude;
    }
    let spread = match settings.relative_to {
        RelativeTo::Noise => noise_std.unwrap_or_else(|| default_noise_std(y)),
        RelativeTo::Data => std_dev(y),
    };
    settings.relative_amplitude * spread
}

/// Per-sample threshold: constant, or moving-average envelope plus level
fn threshold_curve(y: &[f64], level: f64, settings: &ThresholdSettings) -> Vec<f64> {
    if settings.dynamic {
        moving_average(y, settings.dynamic_smooth)
            .into_iter()
            .map(|v| v + level)
            .collect()
    } else {
        vec![level; y.len()]
    }
}

/// Upper threshold used by spike detection
pub fn spike_threshold(y: &[f64], settings: &ThresholdSettings, noise_std: Option<f64>) -> Vec<f64> {
    let level = amplitude_level(y, settings, noise_std);
    threshold_curve(y, level, settings)
}

/// Local maxima above the threshold, thinned to `distance` samples
///
/// Of two spikes closer than `distance` the larger survives; on ties the
/// later one.
pub fn detect_spikes(y: &[f64], threshold: &[f64], distance: f64) -> Vec<usize> {
    let n = y.len();
    let mut spikes: Vec<usize> = (1..n.saturating_sub(1))
        .filter(|&i| y[i] > threshold[i] && y[i] >= y[i - 1] && y[i] >= y[i + 1])
        .collect();

    let mut j = 0;
    while j + 1 < spikes.len() {
        if ((spikes[j + 1] - spikes[j]) as f64) < distance {
            if y[spikes[j]] > y[spikes[j + 1]] {
                spikes.remove(j + 1);
            } else {
                spikes.remove(j);
            }
        } else {
            j += 1;
        }
    }
    spikes
}

/// 0/1 train of length `n - 1` with ones on the given sample ranges
pub fn event_train(ranges: &[(usize, usize)], n: usize) -> Vec<f64> {
    let mut train = vec![0.0; n.saturating_sub(1)];
    let len = train.len();
    for &(start, end) in ranges {
        train[start.min(len)..end.min(len)].fill(1.0);
    }
    train
}

/// Events per second over a trace of `n` samples
fn event_frequency(count: usize, n: usize, sampling_rate: f64) -> f64 {
    if count == 0 || n < 2 {
        return 0.0;
    }
    count as f64 * sampling_rate / (n - 1) as f64
}

pub fn spike_detection(y: &[f64], sampling_rate: f64, noise_std: Option<f64>, settings: &SpikeSettings) -> SpikeResult {
    let threshold = spike_threshold(y, &settings.threshold, noise_std);
    let distance = sampling_rate * settings.distance_ms / 1000.0;
    let times = detect_spikes(y, &threshold, distance);

    let amplitudes: Vec<f64> = times.iter().map(|&i| y[i]).collect();
    let ranges: Vec<(usize, usize)> = times.iter().map(|&i| (i, i + 1)).collect();

    SpikeResult {
        train: event_train(&ranges, y.len()),
        frequency: event_frequency(times.len(), y.len(), sampling_rate),
        mean_amplitude: (!amplitudes.is_empty()).then(|| mean(&amplitudes)),
        times,
        amplitudes,
        threshold,
    }
}

/// Walk from core sample `i` to where the signal meets the lower threshold
///
/// Returns `(start, end, error)`; `error` is set when a walk stopped at a
/// border while still at or above the threshold.
fn burst_borders(y: &[f64], lower: &[f64], i: usize, left_border: usize) -> (usize, usize, bool) {
    let last = y.len() - 1;
    let mut start = i - 1;
    while start > left_border && y[start] >= lower[start] {
        start -= 1;
    }
    let mut end = i + 1;
    while end < last && y[end] >= lower[end] {
        end += 1;
    }
    let error = y[start] >= lower[start] || y[end] >= lower[end];
    (start, end, error)
}

/// Non-overlapping bursts `(start, end)` longer than `min_duration` samples
pub fn detect_bursts(y: &[f64], upper: &[f64], lower: &[f64], min_duration: f64) -> Vec<(usize, usize)> {
    let n = y.len();
    let mut bursts: Vec<(usize, usize)> = Vec::new();
    let mut i = 1;
    while i + 2 < n {
        if y[i] > upper[i] {
            let left_border = bursts.last().map_or(0, |&(_, end)| end + 1);
            let (start, end, error) = burst_borders(y, lower, i, left_border);
            if (end - start) as f64 > min_duration && !error {
                bursts.push((start, end));
            }
            i = end + 2;
        } else {
            i += 1;
        }
    }
    bursts
}

/// Time constant `1/b` of `a·exp(-b·t) + c` fitted to a decaying segment
///
/// Levenberg-Marquardt on the sum of squared residuals, `t` in seconds.
pub fn fit_decay(segment: &[f64], sampling_rate: f64) -> Option<f64> {
    if segment.len() < 4 || sampling_rate <= 0.0 {
        return None;
    }
    let t: Vec<f64> = (0..segment.len()).map(|k| k as f64 / sampling_rate).collect();
    let span = t[t.len() - 1];
    let last = segment[segment.len() - 1];

    let mut params = [segment[0] - last, 3.0 / span, last];
    let cost = |p: &[f64; 3]| -> f64 {
        t.iter()
            .zip(segment)
            .map(|(&ti, &v)| (p[0] * (-p[1] * ti).exp() + p[2] - v).powi(2))
            .sum()
    };
    let mut current = cost(&params);
    let mut damping = 1e-3;

    for _ in 0..200 {
        // Normal equations JᵀJ·δ = -Jᵀr
        let mut jtj = vec![vec![0.0; 3]; 3];
        let mut jtr = vec![0.0; 3];
        for (&ti, &v) in t.iter().zip(segment) {
            let e = (-params[1] * ti).exp();
            let residual = params[0] * e + params[2] - v;
            let jacobian = [e, -params[0] * ti * e, 1.0];
            for r in 0..3 {
                jtr[r] += jacobian[r] * residual;
                for c in 0..3 {
                    jtj[r][c] += jacobian[r] * jacobian[c];
                }
            }
        }

        let mut improved = false;
        while damping < 1e12 {
            let mut damped = jtj.clone();
            for (k, row) in damped.iter_mut().enumerate() {
                row[k] += damping * jtj[k][k].max(1e-12);
            }
            let rhs: Vec<f64> = jtr.iter().map(|v| -v).collect();
            if let Some(step) = solve_dense(&damped, &rhs) {
                let candidate = [params[0] + step[0], params[1] + step[1], params[2] + step[2]];
                let candidate_cost = cost(&candidate);
                if candidate_cost.is_finite() && candidate_cost <= current {
                    let converged = (current - candidate_cost) <= 1e-15 * current.max(1e-300);
                    params = candidate;
                    current = candidate_cost;
                    damping = (damping / 10.0).max(1e-12);
                    improved = !converged;
                    break;
                }
            }
            damping *= 10.0;
        }
        if !improved {
            break;
        }
    }

    let b = params[1];
    (b.is_finite() && b > 0.0).then(|| 1.0 / b)
}

pub fn burst_detection(y: &[f64], sampling_rate: f64, noise_std: Option<f64>, settings: &BurstSettings) -> BurstResult {
    // Hyperpolarizing bursts are depolarizing bursts of the negated trace
    let sign = match settings.polarity {
        Polarity::Depolarization => 1.0,
        Polarity::Hyperpolarization => -1.0,
    };
    let oriented: Vec<f64> = y.iter().map(|v| sign * v).collect();

    let amplitude = amplitude_level(&oriented, &settings.threshold, noise_std);
    let base = if settings.threshold.relative {
        match settings.relative_base {
            RelativeBase::Median => median(&oriented),
            RelativeBase::Mean => mean(&oriented),
            RelativeBase::Zero => 0.0,
        }
    } else {
        settings.absolute_base
    };
    let upper = threshold_curve(&oriented, amplitude, &settings.threshold);
    let lower = threshold_curve(&oriented, base, &settings.threshold);

    let min_duration = sampling_rate * settings.duration_ms / 1000.0;
    let bursts = detect_bursts(&oriented, &upper, &lower, min_duration);

    let mut result = BurstResult {
        starts: Vec::with_capacity(bursts.len()),
        ends: Vec::with_capacity(bursts.len()),
        peaks: Vec::with_capacity(bursts.len()),
        amplitudes: Vec::with_capacity(bursts.len()),
        durations: Vec::with_capacity(bursts.len()),
        decay_times: Vec::with_capacity(bursts.len()),
        train: event_train(&bursts, y.len()),
        frequency: event_frequency(bursts.len(), y.len(), sampling_rate),
        mean_amplitude: None,
        mean_duration: None,
        upper_threshold: upper.iter().map(|v| sign * v).collect(),
        lower_threshold: lower.iter().map(|v| sign * v).collect(),
    };

    for &(start, end) in &bursts {
        let peak = start
            + oriented[start..end]
                .iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (k, &v)| if v > best.1 { (k, v) } else { best })
                .0;
        result.starts.push(start);
        result.ends.push(end);
        result.peaks.push(peak);
        result.amplitudes.push(y[peak]);
        result.durations.push(end - start);
        result.decay_times.push(fit_decay(&oriented[peak..=end], sampling_rate));
    }

    if !bursts.is_empty() {
        result.mean_amplitude = Some(mean(&result.amplitudes));
        let durations: Vec<f64> = result.durations.iter().map(|&d| d as f64).collect();
        result.mean_duration = Some(mean(&durations));
    }
    result
}
