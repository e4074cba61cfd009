//! Power spectrum estimation over a frequency interval

use crate::filters::moving_average;
use nosa_core::mean;
use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};

/// Spectrum restricted to an interval, thresholded and smoothed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerSpectrum {
    pub frequencies: Vec<f64>,
    pub power: Vec<f64>,
    pub max_power: f64,
    pub max_power_frequency: f64,
}

/// Power spectrum of the detrended signal, `|DFT/len|²`
///
/// Bins are taken between the bins closest to `interval.0` and `interval.1`
/// (both included). Powers below `threshold` are zeroed before smoothing.
/// `None` when the interval selects no bins.
pub fn power_spectrum(y: &[f64], sampling_rate: f64, smooth: i64, threshold: f64, interval: (f64, f64)) -> Option<PowerSpectrum> {
    let n = y.len();
    if n == 0 {
        return None;
    }
    let centre = mean(y);
    let mut input: Vec<f64> = y.iter().map(|v| v - centre).collect();

    let mut planner = RealFftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n);
    let mut spectrum = fft.make_output_vec();
    fft.process(&mut input, &mut spectrum).ok()?;

    let scale = n as f64;
    let power: Vec<f64> = spectrum.iter().map(|c| c.norm_sqr() / (scale * scale)).collect();
    let frequencies: Vec<f64> = (0..power.len()).map(|k| k as f64 * sampling_rate / scale).collect();

    let closest = |target: f64| {
        frequencies
            .iter()
            .enumerate()
            .fold((0, f64::INFINITY), |best, (k, f)| {
                let distance = (f - target).abs();
                if distance < best.1 {
                    (k, distance)
                } else {
                    best
                }
            })
            .0
    };
    let left = closest(interval.0);
    let right = closest(interval.1);
    if left > right {
        return None;
    }

    let selected: Vec<f64> = power[left..=right]
        .iter()
        .map(|&p| if p < threshold { 0.0 } else { p })
        .collect();
    let power = moving_average(&selected, smooth);
    let frequencies = frequencies[left..=right].to_vec();

    let (peak, max_power) = power
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (k, &p)| if p > best.1 { (k, p) } else { best });

    Some(PowerSpectrum {
        max_power_frequency: frequencies[peak],
        max_power,
        frequencies,
        power,
    })
}
