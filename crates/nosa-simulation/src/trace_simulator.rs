//! Synthetic fluorescence and electrophysiology traces

use crate::trace_patterns::TracePattern;
use nosa_core::{signal_error, validate_sampling_rate, FileType, FrameStack, ImportedRecording, NosaResult, Region};
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Configuration of a simulated recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    pub name: String,
    pub filetype: FileType,
    pub unit: String,
    /// Sampling rate in Hz (frames per second for image sequences)
    pub sampling_rate: f64,
    /// Activity components, summed
    pub patterns: Vec<TracePattern>,
    /// Resting level
    pub baseline: f64,
    /// Linear drift per second
    pub drift: f64,
    /// Gaussian noise standard deviation (0.0 = no noise)
    pub noise_std: f64,
    /// Random seed for reproducibility
    pub seed: Option<u64>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            name: "simulated.abf".to_string(),
            filetype: FileType::Electrophysiology,
            unit: "mV".to_string(),
            sampling_rate: 1000.0,
            patterns: vec![TracePattern::Spikes {
                interval: 0.5,
                phase: 0.2,
                amplitude: 5.0,
                width: 0.004,
            }],
            baseline: 0.0,
            drift: 0.0,
            noise_std: 0.1,
            seed: None,
        }
    }
}

impl TraceConfig {
    /// Calcium imaging defaults: slow frame rate, transients on a bright baseline
    pub fn calcium_imaging() -> Self {
        Self {
            name: "simulated.tif".to_string(),
            filetype: FileType::ImageSequence,
            unit: "a.u.".to_string(),
            sampling_rate: 20.0,
            patterns: vec![TracePattern::Transients {
                interval: 4.0,
                phase: 1.0,
                amplitude: 50.0,
                decay_tau: 0.5,
            }],
            baseline: 100.0,
            drift: -0.5,
            noise_std: 1.0,
            seed: None,
        }
    }
}

/// Seeded trace generator
pub struct TraceSimulator {
    config: TraceConfig,
    rng: rand::rngs::StdRng,
    normal_dist: Normal<f64>,
}

impl TraceSimulator {
    pub fn new(config: TraceConfig) -> NosaResult<Self> {
        validate_sampling_rate(config.sampling_rate)?;
        let normal_dist = Normal::new(0.0, config.noise_std)
            .map_err(|e| signal_error!("Failed to create normal distribution: {}", e))?;
        let seed = config.seed.unwrap_or_else(rand::random);

        Ok(Self {
            config,
            rng: rand::rngs::StdRng::seed_from_u64(seed),
            normal_dist,
        })
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    /// Noise-free trace value at a time in seconds
    pub fn clean_value(&self, time: f64) -> f64 {
        self.config.baseline
            + self.config.drift * time
            + self.config.patterns.iter().map(|p| p.value_at(time)).sum::<f64>()
    }

    /// Samples for `duration` seconds
    pub fn samples(&mut self, duration: f64) -> Vec<f64> {
        let count = (duration * self.config.sampling_rate).round() as usize;
        let dt = 1.0 / self.config.sampling_rate;
        (0..count)
            .map(|i| {
                let time = i as f64 * dt;
                self.clean_value(time) + self.normal_dist.sample(&mut self.rng)
            })
            .collect()
    }

    /// Recording ready for import
    pub fn generate(&mut self, duration: f64) -> NosaResult<ImportedRecording> {
        let samples = self.samples(duration);
        if samples.is_empty() {
            return Err(signal_error!("duration {} s yields no samples", duration));
        }
        Ok(ImportedRecording {
            name: self.config.name.clone(),
            samples,
            sampling_rate: self.config.sampling_rate,
            filetype: self.config.filetype,
            unit: self.config.unit.clone(),
        })
    }

    /// Image stack with the trace inside `cell` and noisy background elsewhere
    ///
    /// The recording carries the per-frame means, as an importer would hand
    /// them over together with the stack.
    pub fn generate_frames(
        &mut self,
        duration: f64,
        width: usize,
        height: usize,
        cell: &Region,
        background: f64,
    ) -> NosaResult<(FrameStack, ImportedRecording)> {
        let trace = self.samples(duration);
        if trace.is_empty() {
            return Err(signal_error!("duration {} s yields no frames", duration));
        }
        let inside: Vec<bool> = (0..width * height)
            .map(|p| cell.contains((p % width) as f64 + 0.5, (p / width) as f64 + 0.5))
            .collect();

        let frames: Vec<Vec<f64>> = trace
            .iter()
            .map(|&value| {
                inside
                    .iter()
                    .map(|&is_cell| {
                        if is_cell {
                            value
                        } else {
                            background + self.normal_dist.sample(&mut self.rng)
                        }
                    })
                    .collect()
            })
            .collect();

        let stack = FrameStack::new(width, height, frames)?;
        let recording = ImportedRecording {
            name: self.config.name.clone(),
            samples: stack.frame_means(),
            sampling_rate: self.config.sampling_rate,
            filetype: FileType::ImageSequence,
            unit: self.config.unit.clone(),
        };
        Ok((stack, recording))
    }
}
