//! Signal: sampled trace with rate and start offset

use crate::error::{NosaError, NosaResult};
use crate::signal_error;
use serde::{Deserialize, Serialize};

/// Ordered samples at a known sampling rate, starting at `offset` seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Sample values
    pub samples: Vec<f64>,
    /// Sampling rate in Hz
    pub sampling_rate: f64,
    /// Start offset in seconds
    pub offset: f64,
}

impl Signal {
    /// Create a signal, rejecting empty data and invalid rates
    pub fn new(samples: Vec<f64>, sampling_rate: f64, offset: f64) -> NosaResult<Self> {
        validate_sampling_rate(sampling_rate)?;
        if samples.is_empty() {
            return Err(signal_error!("signal must contain at least one sample"));
        }
        if !offset.is_finite() {
            return Err(signal_error!("offset {} is not finite", offset));
        }

        Ok(Signal {
            samples,
            sampling_rate,
            offset,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sampling_rate
    }

    /// Time of each sample in seconds, including the offset
    pub fn time_vector(&self) -> Vec<f64> {
        let dt = 1.0 / self.sampling_rate;
        (0..self.samples.len())
            .map(|i| self.offset + i as f64 * dt)
            .collect()
    }

    pub fn stats(&self) -> SignalStats {
        SignalStats::calculate(&self.samples)
    }
}

/// Reject zero, negative and non-finite sampling rates
pub fn validate_sampling_rate(rate: f64) -> NosaResult<()> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(NosaError::InvalidSamplingRate { rate });
    }
    Ok(())
}

/// Basic statistics of a trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalStats {
    pub mean: f64,
    pub median: f64,
    /// Population standard deviation
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub peak_to_peak: f64,
}

impl SignalStats {
    pub fn calculate(data: &[f64]) -> Self {
        if data.is_empty() {
            return Self {
                mean: 0.0,
                median: 0.0,
                std_dev: 0.0,
                min: 0.0,
                max: 0.0,
                peak_to_peak: 0.0,
            };
        }

        let mean = mean(data);
        let std_dev = std_dev(data);
        let min = data.iter().fold(f64::INFINITY, |a, &b| a.min(b));
        let max = data.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));

        Self {
            mean,
            median: median(data),
            std_dev,
            min,
            max,
            peak_to_peak: max - min,
        }
    }
}

/// Arithmetic mean, 0 for empty input
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Population standard deviation, 0 for empty input
pub fn std_dev(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let m = mean(data);
    let variance = data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / data.len() as f64;
    variance.sqrt()
}

/// Median (mean of the two middle values for even lengths), 0 for empty input
pub fn median(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_creation() {
        let signal = Signal::new(vec![0.0; 1000], 1000.0, 0.5).unwrap();

        assert_eq!(signal.len(), 1000);
        assert!((signal.duration() - 1.0).abs() < 1e-12);
        assert_eq!(signal.time_vector()[0], 0.5);
        assert!((signal.time_vector()[10] - 0.51).abs() < 1e-12);
    }

    #[test]
    fn test_signal_validation() {
        assert!(Signal::new(vec![], 100.0, 0.0).is_err());
        assert_eq!(
            Signal::new(vec![1.0], 0.0, 0.0),
            Err(NosaError::InvalidSamplingRate { rate: 0.0 })
        );
        assert!(Signal::new(vec![1.0], -5.0, 0.0).is_err());
        assert!(Signal::new(vec![1.0], f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_stats() {
        let stats = SignalStats::calculate(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(stats.mean, 2.5);
        assert_eq!(stats.median, 2.5);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
        assert_eq!(stats.peak_to_peak, 3.0);
        assert!((stats.std_dev - 1.25f64.sqrt()).abs() < 1e-12);

        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(std_dev(&[5.0, 5.0, 5.0]), 0.0);
    }
}
