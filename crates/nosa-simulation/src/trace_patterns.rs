//! Pre-defined activity patterns for synthetic traces

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Deterministic activity component of a trace
///
/// Periodic patterns place their first event at `phase` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TracePattern {
    /// Constant level
    Flat { level: f64 },
    /// Calcium transients: instant rise, exponential decay
    Transients {
        interval: f64,
        phase: f64,
        amplitude: f64,
        decay_tau: f64,
    },
    /// Narrow triangular spikes
    Spikes {
        interval: f64,
        phase: f64,
        amplitude: f64,
        width: f64,
    },
    /// Plateau bursts with exponential decay after each plateau
    Bursts {
        interval: f64,
        phase: f64,
        duration: f64,
        amplitude: f64,
        decay_tau: f64,
    },
    /// Sinusoidal oscillation
    Oscillation { frequency: f64, amplitude: f64 },
}

/// Seconds since the last event, `None` before the first one
fn since_event(time: f64, interval: f64, phase: f64) -> Option<f64> {
    if time < phase || interval <= 0.0 {
        return None;
    }
    Some((time - phase) % interval)
}

impl TracePattern {
    /// Pattern value at a time in seconds
    pub fn value_at(&self, time: f64) -> f64 {
        match *self {
            TracePattern::Flat { level } => level,

            TracePattern::Transients { interval, phase, amplitude, decay_tau } => {
                since_event(time, interval, phase).map_or(0.0, |dt| amplitude * (-dt / decay_tau).exp())
            }

            TracePattern::Spikes { interval, phase, amplitude, width } => match since_event(time, interval, phase) {
                Some(dt) if dt < width => amplitude * (1.0 - dt / width),
                _ => 0.0,
            },

            TracePattern::Bursts { interval, phase, duration, amplitude, decay_tau } => {
                match since_event(time, interval, phase) {
                    Some(dt) if dt < duration => amplitude,
                    Some(dt) => amplitude * (-(dt - duration) / decay_tau).exp(),
                    None => 0.0,
                }
            }

            TracePattern::Oscillation { frequency, amplitude } => amplitude * (2.0 * PI * frequency * time).sin(),
        }
    }

    /// Event onsets in `[0, duration)` for periodic patterns
    pub fn event_times(&self, duration: f64) -> Vec<f64> {
        let (interval, phase) = match *self {
            TracePattern::Transients { interval, phase, .. }
            | TracePattern::Spikes { interval, phase, .. }
            | TracePattern::Bursts { interval, phase, .. } => (interval, phase),
            _ => return Vec::new(),
        };
        if interval <= 0.0 {
            return Vec::new();
        }
        (0..)
            .map(|k| phase + k as f64 * interval)
            .take_while(|&t| t < duration)
            .collect()
    }

    pub fn description(&self) -> &'static str {
        match self {
            TracePattern::Flat { .. } => "Flat",
            TracePattern::Transients { .. } => "Calcium transients",
            TracePattern::Spikes { .. } => "Spikes",
            TracePattern::Bursts { .. } => "Bursts",
            TracePattern::Oscillation { .. } => "Oscillation",
        }
    }

    /// Common preset patterns
    pub fn presets() -> Vec<(&'static str, TracePattern)> {
        vec![
            ("Silent", TracePattern::Flat { level: 0.0 }),
            ("Sparse Transients", TracePattern::Transients {
                interval: 4.0, phase: 1.0, amplitude: 1.0, decay_tau: 0.5
            }),
            ("Regular Spiking", TracePattern::Spikes {
                interval: 0.5, phase: 0.2, amplitude: 5.0, width: 0.004
            }),
            ("Up States", TracePattern::Bursts {
                interval: 3.0, phase: 0.5, duration: 0.8, amplitude: 2.0, decay_tau: 0.2
            }),
            ("Slow Wave", TracePattern::Oscillation { frequency: 1.0, amplitude: 0.5 }),
            ("Theta", TracePattern::Oscillation { frequency: 8.0, amplitude: 0.3 }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_decay() {
        let pattern = TracePattern::Transients {
            interval: 2.0,
            phase: 0.5,
            amplitude: 1.0,
            decay_tau: 0.5,
        };
        assert_eq!(pattern.value_at(0.2), 0.0);
        assert_eq!(pattern.value_at(0.5), 1.0);
        assert!((pattern.value_at(1.0) - (-1.0f64).exp()).abs() < 1e-12);
        assert_eq!(pattern.value_at(2.5), 1.0);
    }

    #[test]
    fn test_burst_plateau() {
        let pattern = TracePattern::Bursts {
            interval: 2.0,
            phase: 0.0,
            duration: 0.5,
            amplitude: 3.0,
            decay_tau: 0.1,
        };
        assert_eq!(pattern.value_at(0.25), 3.0);
        assert!(pattern.value_at(1.5) < 0.01);
    }

    #[test]
    fn test_event_times() {
        let pattern = TracePattern::Spikes {
            interval: 0.5,
            phase: 0.2,
            amplitude: 5.0,
            width: 0.004,
        };
        let times = pattern.event_times(1.5);
        assert_eq!(times.len(), 3);
        assert!((times[2] - 1.2).abs() < 1e-12);
        assert!(TracePattern::Flat { level: 1.0 }.event_times(10.0).is_empty());
    }
}
