//! Per-object pipelines and the objects that own them

use crate::config::{allowed_for, default_active, interpolation_method, PipelineConfig, StageConfig};
use crate::stage::{Stage, StageKind, StageRole, MAX_OBJECT_INDEX};
use nosa_core::{FileType, FrequencyAdjustment, NosaResult, Region};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed sequence of per-object stages, background subtraction to power spectrum
///
/// Cross-signal stages are shared by all objects and live in the workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Pipeline with the default activation of a source type
    pub fn new(filetype: FileType) -> Self {
        let stages = StageKind::ALL[..=MAX_OBJECT_INDEX]
            .iter()
            .map(|&kind| {
                let mut stage = Stage::new(kind);
                stage.set_active(default_active(kind, filetype));
                stage
            })
            .collect();
        Self { stages }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, kind: StageKind) -> Option<&Stage> {
        self.stages.get(kind.index())
    }

    pub fn stage_mut(&mut self, kind: StageKind) -> Option<&mut Stage> {
        self.stages.get_mut(kind.index())
    }

    /// First active stage that has never been computed
    pub fn first_uncomputed(&self) -> Option<usize> {
        self.stages
            .iter()
            .position(|s| s.is_active() && s.output().is_none())
    }

    /// Copy stage settings from another pipeline, keeping source-type rules
    pub fn copy_settings(&mut self, other: &Pipeline, filetype: FileType) -> NosaResult<()> {
        for (stage, template) in self.stages.iter_mut().zip(&other.stages) {
            let mut config = StageConfig::capture(template);
            config.active &= allowed_for(stage.kind(), filetype);
            config.apply(stage)?;
            stage.set_output(None);
        }
        Ok(())
    }

    /// Apply the per-object part of a saved configuration
    ///
    /// Frequency adjustment follows the source and is not taken from the
    /// configuration.
    pub fn apply_config(&mut self, config: &PipelineConfig, filetype: FileType) -> NosaResult<()> {
        let mut updated = self.clone();
        for entry in &config.stages {
            if entry.kind == StageKind::AdjustFrequency || entry.kind.role() == StageRole::CrossSignal {
                continue;
            }
            if let Some(stage) = updated.stage_mut(entry.kind) {
                let mut entry = entry.clone();
                entry.active &= allowed_for(entry.kind, filetype);
                entry.apply(stage)?;
            }
        }
        *self = updated;
        Ok(())
    }

    /// Mirror the source's frequency adjustment into the adjustment stage
    pub fn mirror_adjustment(&mut self, adjustment: FrequencyAdjustment) -> NosaResult<()> {
        if let Some(stage) = self.stage_mut(StageKind::AdjustFrequency) {
            let method = interpolation_method(adjustment.method);
            stage.set_active(adjustment.active);
            stage.set_method(method)?;
            stage.set_method_parameter(method, "adjusted_frequency", adjustment.adjusted_frequency.into())?;
        }
        Ok(())
    }
}

/// One analysed region or trace bound to a source
#[derive(Debug, Clone)]
pub struct Object {
    pub id: Uuid,
    pub name: String,
    pub source_id: Uuid,
    /// Whether the object contributes to cross-signal stages
    pub active: bool,
    pub invert: bool,
    pub region: Region,
    pub pipeline: Pipeline,
    pub(crate) extracted: Option<Vec<f64>>,
    pub(crate) raw: Option<Vec<f64>>,
    pub(crate) processed: Option<ProcessedSignal>,
}

/// Signal after the processing stages and its sampling rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedSignal {
    pub y: Vec<f64>,
    pub sampling_rate: f64,
}

impl Object {
    pub fn new(name: String, source_id: Uuid, filetype: FileType) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            source_id,
            active: true,
            invert: false,
            region: Region::default(),
            pipeline: Pipeline::new(filetype),
            extracted: None,
            raw: None,
            processed: None,
        }
    }

    /// Signal after the raw stages
    pub fn raw(&self) -> Option<&[f64]> {
        self.raw.as_deref()
    }

    /// Signal after the processing stages
    pub fn processed(&self) -> Option<&[f64]> {
        self.processed.as_ref().map(|p| p.y.as_slice())
    }

    /// Rate of the processed signal
    pub fn processed_rate(&self) -> Option<f64> {
        self.processed.as_ref().map(|p| p.sampling_rate)
    }

    /// Spike times of the last spike detection, when active
    pub fn spike_times(&self) -> Option<&[usize]> {
        self.pipeline
            .stage(StageKind::SpikeDetection)
            .filter(|s| s.is_active())
            .and_then(|s| s.output())
            .and_then(|o| o.spikes())
            .map(|r| r.times.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Method;
    use nosa_core::InterpolationMethod;

    #[test]
    fn test_default_pipeline() {
        let image = Pipeline::new(FileType::ImageSequence);
        assert_eq!(image.stages().len(), MAX_OBJECT_INDEX + 1);
        assert!(image.stage(StageKind::Baseline).unwrap().is_active());
        assert!(image.stage(StageKind::SpikeCorrelation).is_none());
        assert_eq!(image.first_uncomputed(), Some(StageKind::Baseline.index()));

        let ephys = Pipeline::new(FileType::Electrophysiology);
        assert!(ephys.stages().iter().all(|s| !s.is_active()));
        assert_eq!(ephys.first_uncomputed(), None);
    }

    #[test]
    fn test_copy_settings_respects_filetype() {
        let mut template = Pipeline::new(FileType::ImageSequence);
        template
            .stage_mut(StageKind::BackgroundSubtraction)
            .unwrap()
            .set_active(true);
        template
            .stage_mut(StageKind::Smoothing)
            .unwrap()
            .set_method(Method::MovingAverage)
            .unwrap();

        let mut ephys = Pipeline::new(FileType::Electrophysiology);
        ephys.copy_settings(&template, FileType::Electrophysiology).unwrap();
        assert!(!ephys.stage(StageKind::BackgroundSubtraction).unwrap().is_active());
        assert!(ephys.stage(StageKind::Baseline).unwrap().is_active());
        assert_eq!(ephys.stage(StageKind::Smoothing).unwrap().method(), Method::MovingAverage);
    }

    #[test]
    fn test_mirror_adjustment() {
        let mut pipeline = Pipeline::new(FileType::Electrophysiology);
        pipeline
            .mirror_adjustment(FrequencyAdjustment {
                active: true,
                adjusted_frequency: 50.0,
                method: InterpolationMethod::Cubic,
            })
            .unwrap();
        let stage = pipeline.stage(StageKind::AdjustFrequency).unwrap();
        assert!(stage.is_active());
        assert_eq!(stage.method(), Method::Cubic);
        assert_eq!(stage.parameters().get_float("adjusted_frequency", 0.0), 50.0);
    }
}
