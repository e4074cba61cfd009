//! Default stage parameters and saveable pipeline presets

use crate::events::{Polarity, RelativeBase, RelativeTo};
use crate::set_params;
use crate::stage::{Method, ParameterRecord, Stage, StageKind};
use nosa_core::{FileType, InterpolationMethod, NosaError, NosaResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Default parameter record of a stage method
pub fn default_parameters(kind: StageKind, method: Method) -> ParameterRecord {
    let mut record = ParameterRecord::new();
    match (kind, method) {
        (StageKind::BackgroundSubtraction, Method::Perisomatic) => {
            set_params!(record, "radius" => 4);
        }
        (StageKind::BackgroundSubtraction, _) => {
            set_params!(record, "background_region" => vec![20.0, 20.0, 20.0, 20.0, 0.0]);
        }
        (StageKind::Baseline, Method::AsymmetricLeastSquares) => {
            set_params!(record,
                "smooth" => 100.0,
                "iterations" => 1,
                "intercept" => 0.0,
                "p" => 0.001,
            );
        }
        (StageKind::Baseline, Method::TopHat) => {
            set_params!(record, "factor" => 0.1);
        }
        (StageKind::Baseline, Method::MovingAverage) => {
            set_params!(record, "window" => 100);
        }
        (StageKind::Baseline, _) => {
            set_params!(record,
                "polyorder" => 1,
                "intercept" => 0.0,
                "use_marker" => false,
                "marker" => Vec::<i64>::new(),
            );
        }
        (StageKind::AdjustFrequency, _) => {
            set_params!(record, "adjusted_frequency" => 250.0);
        }
        (StageKind::Smoothing, Method::MovingAverage) => {
            set_params!(record, "window" => 3);
        }
        (StageKind::Smoothing, Method::Butterworth) => {
            set_params!(record, "highcut" => 100.0, "order" => 3);
        }
        (StageKind::Smoothing, _) => {
            set_params!(record, "window" => 3, "polyorder" => 3);
        }
        (StageKind::SpikeDetection, _) => {
            threshold_defaults(&mut record);
            set_params!(record, "distance" => 50.0);
        }
        (StageKind::BurstDetection, _) => {
            threshold_defaults(&mut record);
            set_params!(record,
                "absolute_base" => 0.0,
                "relative_base" => RelativeBase::default().as_str(),
                "duration" => 50.0,
                "polarity" => Polarity::default().as_str(),
            );
        }
        (StageKind::EventShape, _) => {
            set_params!(record, "smooth" => 3, "interval" => vec![200.0, 200.0]);
        }
        (StageKind::PowerSpectrum, _) => {
            set_params!(record,
                "smooth" => 3,
                "threshold" => 0.0,
                "interval" => vec![0.0, 5.0],
            );
        }
        (StageKind::SpikeCorrelation, _) => {
            set_params!(record, "binfactor" => 1, "maxlag" => 1.0);
        }
        (StageKind::AmplitudeCorrelation, _) => {
            set_params!(record,
                "maxlag" => 1.0,
                "use_bandpass" => false,
                "order" => 4,
                "highpass_freq" => 7.0,
                "lowpass_freq" => 12.0,
                "use_instantaneous" => false,
            );
        }
    }
    record
}

fn threshold_defaults(record: &mut ParameterRecord) {
    set_params!(record,
        "dynamic_threshold" => false,
        "relative_threshold" => false,
        "dynamic_smooth" => 300,
        "absolute_amplitude" => 1.0,
        "relative_amplitude_type" => RelativeTo::default().as_str(),
        "relative_amplitude" => 1.0,
    );
}

/// Whether a stage starts active on a new object of this source type
pub fn default_active(kind: StageKind, filetype: FileType) -> bool {
    kind == StageKind::Baseline && filetype == FileType::ImageSequence
}

/// Whether a stage may be active for this source type at all
pub fn allowed_for(kind: StageKind, filetype: FileType) -> bool {
    kind != StageKind::BackgroundSubtraction || filetype == FileType::ImageSequence
}

/// Frequency-adjustment method for an interpolation kind
pub fn interpolation_method(method: InterpolationMethod) -> Method {
    match method {
        InterpolationMethod::Nearest => Method::NearestNeighbour,
        InterpolationMethod::Linear => Method::Linear,
        InterpolationMethod::Cubic => Method::Cubic,
    }
}

/// Interpolation kind of a frequency-adjustment method
pub fn interpolation_kind(method: Method) -> Option<InterpolationMethod> {
    match method {
        Method::NearestNeighbour => Some(InterpolationMethod::Nearest),
        Method::Linear => Some(InterpolationMethod::Linear),
        Method::Cubic => Some(InterpolationMethod::Cubic),
        _ => None,
    }
}

/// Saved state of one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub kind: StageKind,
    pub active: bool,
    pub method: Method,
    /// Parameters of every method, not only the selected one
    pub parameters: BTreeMap<Method, ParameterRecord>,
}

impl StageConfig {
    pub fn capture(stage: &Stage) -> Self {
        Self {
            kind: stage.kind(),
            active: stage.is_active(),
            method: stage.method(),
            parameters: stage.records().map(|(m, r)| (m, r.clone())).collect(),
        }
    }

    /// Validate and copy this configuration into `stage`
    pub fn apply(&self, stage: &mut Stage) -> NosaResult<()> {
        if stage.kind() != self.kind {
            return Err(NosaError::InvalidStageOperation {
                reason: format!("cannot apply {} settings to {}", self.kind.name(), stage.name()),
            });
        }
        let mut updated = stage.clone();
        updated.set_method(self.method)?;
        for (method, record) in &self.parameters {
            updated.set_record(*method, record)?;
        }
        updated.set_active(self.active);
        *stage = updated;
        Ok(())
    }
}

/// Named set of stage configurations that can be saved and applied to objects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub stages: Vec<StageConfig>,
}

impl PipelineConfig {
    /// Defaults for every stage of a source type
    pub fn defaults(name: &str, filetype: FileType) -> Self {
        let stages = StageKind::ALL
            .iter()
            .map(|&kind| {
                let mut stage = Stage::new(kind);
                stage.set_active(default_active(kind, filetype));
                StageConfig::capture(&stage)
            })
            .collect();
        Self {
            name: name.to_string(),
            stages,
        }
    }

    /// Calcium imaging preset: ΔF/F baseline, smoothing, transient detection
    pub fn calcium_imaging() -> Self {
        let mut config = Self::defaults("Calcium imaging", FileType::ImageSequence);
        for stage in &mut config.stages {
            match stage.kind {
                StageKind::Smoothing
                | StageKind::SpikeDetection
                | StageKind::PowerSpectrum
                | StageKind::SpikeCorrelation => stage.active = true,
                _ => {}
            }
            if stage.kind == StageKind::SpikeDetection {
                if let Some(record) = stage.parameters.get_mut(&Method::Threshold) {
                    set_params!(record,
                        "relative_threshold" => true,
                        "relative_amplitude" => 3.0,
                        "distance" => 200.0,
                    );
                }
            }
        }
        config
    }

    /// Electrophysiology preset: drift removal, low-pass smoothing, spikes and bursts
    pub fn electrophysiology() -> Self {
        let mut config = Self::defaults("Electrophysiology", FileType::Electrophysiology);
        for stage in &mut config.stages {
            match stage.kind {
                StageKind::Baseline => {
                    stage.active = true;
                    stage.method = Method::AsymmetricLeastSquares;
                }
                StageKind::Smoothing => {
                    stage.active = true;
                    stage.method = Method::Butterworth;
                }
                StageKind::SpikeDetection | StageKind::BurstDetection | StageKind::AmplitudeCorrelation => {
                    stage.active = true
                }
                _ => {}
            }
        }
        config
    }

    pub fn stage(&self, kind: StageKind) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.kind == kind)
    }

    /// Export configuration to JSON
    pub fn to_json(&self) -> NosaResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| NosaError::Serialization {
            reason: format!("Failed to serialize configuration: {}", e),
        })
    }

    /// Import configuration from JSON
    pub fn from_json(json: &str) -> NosaResult<Self> {
        serde_json::from_str(json).map_err(|e| NosaError::Serialization {
            reason: format!("Failed to deserialize configuration: {}", e),
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> NosaResult<()> {
        let json = self.to_json()?;
        std::fs::write(path.as_ref(), json).map_err(|e| NosaError::Serialization {
            reason: format!("Failed to write {}: {}", path.as_ref().display(), e),
        })
    }

    pub fn load(path: impl AsRef<Path>) -> NosaResult<Self> {
        let json = std::fs::read_to_string(path.as_ref()).map_err(|e| NosaError::Serialization {
            reason: format!("Failed to read {}: {}", path.as_ref().display(), e),
        })?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::ParameterValue;

    #[test]
    fn test_every_method_has_defaults() {
        for kind in StageKind::ALL {
            for &method in kind.methods() {
                assert!(default_parameters(kind, method).keys().count() > 0, "{:?} {:?}", kind, method);
            }
        }
    }

    #[test]
    fn test_default_activation() {
        assert!(default_active(StageKind::Baseline, FileType::ImageSequence));
        assert!(!default_active(StageKind::Baseline, FileType::Electrophysiology));
        assert!(!default_active(StageKind::SpikeDetection, FileType::ImageSequence));
        assert!(!allowed_for(StageKind::BackgroundSubtraction, FileType::Electrophysiology));
    }

    #[test]
    fn test_string_defaults_parse() {
        let record = default_parameters(StageKind::BurstDetection, Method::Threshold);
        assert_eq!(RelativeBase::parse(record.get_str("relative_base", "")), Some(RelativeBase::Median));
        assert_eq!(Polarity::parse(record.get_str("polarity", "")), Some(Polarity::Depolarization));
        assert_eq!(
            RelativeTo::parse(record.get_str("relative_amplitude_type", "")),
            Some(RelativeTo::Noise)
        );
        for base in [RelativeBase::Median, RelativeBase::Mean, RelativeBase::Zero] {
            assert_eq!(RelativeBase::parse(base.as_str()), Some(base));
        }
        assert_eq!(Polarity::parse(Polarity::Hyperpolarization.as_str()), Some(Polarity::Hyperpolarization));
        assert_eq!(RelativeTo::parse(RelativeTo::Data.as_str()), Some(RelativeTo::Data));
    }

    #[test]
    fn test_json_round_trip() {
        let config = PipelineConfig::electrophysiology();
        let json = config.to_json().unwrap();
        let restored = PipelineConfig::from_json(&json).unwrap();
        assert_eq!(restored, config);
        assert!(PipelineConfig::from_json("{ not json").is_err());
    }

    #[test]
    fn test_apply_validates_whole_stage() {
        let mut stage = Stage::new(StageKind::Smoothing);
        let mut config = StageConfig::capture(&stage);
        config.active = true;
        config.method = Method::Butterworth;
        config
            .parameters
            .get_mut(&Method::Butterworth)
            .unwrap()
            .set_parameter("order", ParameterValue::Integer(4));
        config.apply(&mut stage).unwrap();
        assert!(stage.is_active());
        assert_eq!(stage.method(), Method::Butterworth);
        assert_eq!(stage.parameters().get_int("order", 0), 4);

        // Invalid value leaves the stage untouched
        config
            .parameters
            .get_mut(&Method::Butterworth)
            .unwrap()
            .set_parameter("order", ParameterValue::Integer(40));
        config.active = false;
        assert!(config.apply(&mut stage).is_err());
        assert!(stage.is_active());
        assert_eq!(stage.parameters().get_int("order", 0), 4);
    }
}
