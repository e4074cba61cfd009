//! Sources, objects and the shared cross-signal stages
//!
//! The workspace is the mutation boundary: every setter validates its input,
//! updates the model and routes a [`Change`] through the recompute scheduler.
//! Listeners are notified after each recompute with a [`RecomputeReport`].

use crate::baseline::{place_markers, MAX_POLYNOMIAL_DEGREE};
use crate::config::{allowed_for, interpolation_kind, PipelineConfig};
use crate::engine;
use crate::pipeline::Object;
use crate::scheduler::{Change, RecomputePlan};
use crate::stage::{
    check_marker_count, marker_range_error, source_driven, Method, ParameterRecord, ParameterValue, Stage, StageKind,
    StageOutput, StageRole, MAX_OBJECT_INDEX,
};
use nosa_core::{
    FrequencyAdjustment, ImportedRecording, NosaError, NosaResult, Region, RegionSampler, Source,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

/// What a recompute touched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecomputeReport {
    pub objects: Vec<Uuid>,
    pub change: Change,
    pub plan: RecomputePlan,
}

type Listener = Box<dyn Fn(&RecomputeReport)>;

/// Read-only view of one stage for export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageExport {
    pub kind: StageKind,
    pub name: String,
    pub active: bool,
    pub method: String,
    pub parameters: ParameterRecord,
    pub output: Option<StageOutput>,
}

impl StageExport {
    fn capture(stage: &Stage) -> Self {
        Self {
            kind: stage.kind(),
            name: stage.name().to_string(),
            active: stage.is_active(),
            method: stage.method().name().to_string(),
            parameters: stage.parameters().clone(),
            output: stage.output().cloned(),
        }
    }
}

/// Signals and stage outputs of one object for export consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectExport {
    pub id: Uuid,
    pub name: String,
    pub source: String,
    pub unit: String,
    pub offset: f64,
    pub sampling_rate: Option<f64>,
    pub seconds: Vec<f64>,
    pub raw: Option<Vec<f64>>,
    pub processed: Option<Vec<f64>>,
    pub stages: Vec<StageExport>,
}

pub struct Workspace {
    sources: Vec<Source>,
    objects: Vec<Object>,
    samplers: HashMap<Uuid, Box<dyn RegionSampler>>,
    cross_signal: Vec<Stage>,
    listeners: Vec<Listener>,
    next_short_name: usize,
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            cross_signal: StageKind::ALL[MAX_OBJECT_INDEX + 1..]
                .iter()
                .map(|&kind| Stage::new(kind))
                .collect(),
            sources: Vec::new(),
            objects: Vec::new(),
            samplers: HashMap::new(),
            listeners: Vec::new(),
            next_short_name: 1,
        }
    }

    /// Register a callback run after every recompute
    pub fn subscribe(&mut self, listener: impl Fn(&RecomputeReport) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    pub fn source(&self, id: Uuid) -> NosaResult<&Source> {
        self.sources
            .iter()
            .find(|s| s.id == id)
            .ok_or(NosaError::UnknownSource { id })
    }

    pub fn object(&self, id: Uuid) -> NosaResult<&Object> {
        self.objects
            .iter()
            .find(|o| o.id == id)
            .ok_or(NosaError::UnknownObject { id })
    }

    fn source_mut(&mut self, id: Uuid) -> NosaResult<&mut Source> {
        self.sources
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(NosaError::UnknownSource { id })
    }

    fn object_mut(&mut self, id: Uuid) -> NosaResult<&mut Object> {
        self.objects
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or(NosaError::UnknownObject { id })
    }

    fn dependents(&self, source_id: Uuid) -> Vec<Uuid> {
        self.objects
            .iter()
            .filter(|o| o.source_id == source_id)
            .map(|o| o.id)
            .collect()
    }

    /// Stage of an object, or the shared stage for cross-signal kinds
    pub fn stage(&self, object_id: Uuid, kind: StageKind) -> NosaResult<&Stage> {
        if kind.role() == StageRole::CrossSignal {
            return Ok(self.shared_stage(kind));
        }
        let object = self.object(object_id)?;
        object
            .pipeline
            .stage(kind)
            .ok_or(NosaError::UnknownObject { id: object_id })
    }

    fn shared_stage(&self, kind: StageKind) -> &Stage {
        &self.cross_signal[kind.index() - MAX_OBJECT_INDEX - 1]
    }

    fn stage_mut(&mut self, object_id: Uuid, kind: StageKind) -> NosaResult<&mut Stage> {
        if kind.role() == StageRole::CrossSignal {
            return Ok(&mut self.cross_signal[kind.index() - MAX_OBJECT_INDEX - 1]);
        }
        let object = self.object_mut(object_id)?;
        object
            .pipeline
            .stage_mut(kind)
            .ok_or(NosaError::UnknownObject { id: object_id })
    }

    /// Import an electrophysiology trace or a pre-extracted image trace
    pub fn add_source(&mut self, recording: ImportedRecording) -> NosaResult<Uuid> {
        let source = Source::from_recording(recording, self.next_short_name)?;
        self.next_short_name += 1;
        info!("Added source {} ({} samples)", source.name, source.max_end_frame());
        let id = source.id;
        self.sources.push(source);
        Ok(id)
    }

    /// Import an image-sequence source with its region sampler
    pub fn add_image_source(
        &mut self,
        recording: ImportedRecording,
        sampler: Box<dyn RegionSampler>,
    ) -> NosaResult<Uuid> {
        let id = self.add_source(recording)?;
        self.samplers.insert(id, sampler);
        Ok(id)
    }

    /// Remove a source together with all its objects
    pub fn remove_source(&mut self, id: Uuid) -> NosaResult<()> {
        self.source(id)?;
        self.objects.retain(|o| o.source_id != id);
        self.sources.retain(|s| s.id != id);
        self.samplers.remove(&id);
        info!("Removed source {}", id);
        self.recompute_shared(Change::cross_signal());
        Ok(())
    }

    /// Create an object on a source and compute its pipeline
    ///
    /// With `template`, stage activation, methods and parameters are copied
    /// from that object.
    pub fn add_object(&mut self, source_id: Uuid, template: Option<Uuid>) -> NosaResult<Uuid> {
        let template = match template {
            Some(id) => Some(self.object(id)?.pipeline.clone()),
            None => None,
        };
        let source = self.source_mut(source_id)?;
        let name = source.next_object_name();
        let filetype = source.filetype;
        let adjustment = source.adjustment();

        let mut object = Object::new(name, source_id, filetype);
        if let Some(template) = &template {
            object.pipeline.copy_settings(template, filetype)?;
        }
        object.pipeline.mirror_adjustment(adjustment)?;
        let id = object.id;
        info!("Added object {}", object.name);
        self.objects.push(object);

        if let Err(e) = self.recompute(id, Change::full()) {
            self.objects.retain(|o| o.id != id);
            return Err(e);
        }
        Ok(id)
    }

    /// Remove an object; its source goes with the last dependent object
    pub fn remove_object(&mut self, id: Uuid) -> NosaResult<()> {
        let source_id = self.object(id)?.source_id;
        self.objects.retain(|o| o.id != id);
        info!("Removed object {}", id);
        if self.dependents(source_id).is_empty() {
            self.sources.retain(|s| s.id != source_id);
            self.samplers.remove(&source_id);
            info!("Removed source {} with its last object", source_id);
        }
        self.recompute_shared(Change::cross_signal());
        Ok(())
    }

    /// Run `change` for one object, then the cross-signal stages it reaches
    pub fn recompute(&mut self, object_id: Uuid, change: Change) -> NosaResult<RecomputeReport> {
        self.recompute_objects(&[object_id], change)
    }

    /// Run `change` for several objects; cross-signal stages run once at the end
    pub fn recompute_objects(&mut self, object_ids: &[Uuid], change: Change) -> NosaResult<RecomputeReport> {
        let plan = RecomputePlan::for_change(&change);
        let per_object = RecomputePlan::for_change(&change.without_cross_signal());
        // Keep going past a failing object so shared stages and listeners
        // still see the others; the first error is returned afterwards
        let mut failure = None;
        for &id in object_ids {
            if let Err(e) = self.recompute_one(id, &per_object) {
                warn!("Recompute of object {} failed: {}", id, e);
                failure.get_or_insert(e);
            }
        }
        engine::recompute_cross_signal(&mut self.cross_signal, &self.objects, &self.sources, &plan);

        let report = RecomputeReport {
            objects: object_ids.to_vec(),
            change,
            plan,
        };
        for listener in &self.listeners {
            listener(&report);
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    fn recompute_one(&mut self, id: Uuid, plan: &RecomputePlan) -> NosaResult<()> {
        let object = self
            .objects
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or(NosaError::UnknownObject { id })?;
        let source = self
            .sources
            .iter()
            .find(|s| s.id == object.source_id)
            .ok_or(NosaError::UnknownSource { id: object.source_id })?;
        let sampler = self.samplers.get(&source.id).map(|s| s.as_ref());
        engine::recompute_object(object, source, sampler, plan)
    }

    /// Full recompute of every object
    pub fn recompute_all(&mut self) -> NosaResult<RecomputeReport> {
        let ids: Vec<Uuid> = self.objects.iter().map(|o| o.id).collect();
        self.recompute_objects(&ids, Change::full())
    }

    fn recompute_shared(&mut self, change: Change) {
        let plan = RecomputePlan::for_change(&change);
        engine::recompute_cross_signal(&mut self.cross_signal, &self.objects, &self.sources, &plan);
        let report = RecomputeReport {
            objects: Vec::new(),
            change,
            plan,
        };
        for listener in &self.listeners {
            listener(&report);
        }
    }

    /// Recompute all objects of a source from `change`
    fn recompute_source(&mut self, source_id: Uuid, change: Change) -> NosaResult<RecomputeReport> {
        let ids = self.dependents(source_id);
        self.recompute_objects(&ids, change)
    }

    pub fn set_stage_active(&mut self, object_id: Uuid, kind: StageKind, active: bool) -> NosaResult<RecomputeReport> {
        if kind == StageKind::AdjustFrequency {
            return Err(source_driven(kind));
        }
        let filetype = self.source(self.object(object_id)?.source_id)?.filetype;
        if active && !allowed_for(kind, filetype) {
            return Err(NosaError::InvalidStageOperation {
                reason: format!("{} is only available for image sequences", kind.name()),
            });
        }
        self.stage_mut(object_id, kind)?.set_active(active);
        self.recompute(object_id, Change::activation(kind))
    }

    pub fn set_stage_method(&mut self, object_id: Uuid, kind: StageKind, method: Method) -> NosaResult<RecomputeReport> {
        if kind == StageKind::AdjustFrequency {
            return Err(source_driven(kind));
        }
        self.stage_mut(object_id, kind)?.set_method(method)?;
        self.recompute(object_id, Change::stage(kind))
    }

    /// Validated parameter update of the selected method
    ///
    /// Enabling baseline markers or raising the polynomial degree places
    /// missing markers automatically.
    pub fn set_stage_parameter(
        &mut self,
        object_id: Uuid,
        kind: StageKind,
        key: &str,
        value: ParameterValue,
    ) -> NosaResult<RecomputeReport> {
        if kind == StageKind::AdjustFrequency {
            return Err(source_driven(kind));
        }
        if kind == StageKind::Baseline {
            return self.set_baseline_parameter(object_id, key, value);
        }
        self.stage_mut(object_id, kind)?.set_parameter(key, value)?;
        self.recompute(object_id, Change::stage(kind))
    }

    fn baseline_len(&self, object_id: Uuid) -> NosaResult<usize> {
        let object = self.object(object_id)?;
        Ok(match object.raw() {
            Some(raw) => raw.len(),
            None => self.source(object.source_id)?.data().len(),
        })
    }

    fn set_baseline_parameter(&mut self, object_id: Uuid, key: &str, value: ParameterValue) -> NosaResult<RecomputeReport> {
        let len = self.baseline_len(object_id)?;
        let mut stage = self.stage(object_id, StageKind::Baseline)?.clone();
        stage.set_parameter(key, value)?;

        let params = stage.parameters();
        if stage.method() == Method::PolynomialFitting && params.get_bool("use_marker", false) {
            let degree = params.get_int("polyorder", 1).clamp(0, MAX_POLYNOMIAL_DEGREE as i64) as usize;
            let markers = params.get_markers("marker");
            let markers = if key == "marker" {
                check_marker_count(&markers, degree)?;
                markers
            } else {
                place_markers(&markers, len, degree)
            };
            let markers: Vec<i64> = markers.into_iter().map(|m| m as i64).collect();
            stage.set_parameter("marker", markers.into())?;
        }

        *self.stage_mut(object_id, StageKind::Baseline)? = stage;
        self.recompute(object_id, Change::stage(StageKind::Baseline))
    }

    /// Add a baseline marker at a frame of the current signal
    pub fn add_marker(&mut self, object_id: Uuid, position: usize) -> NosaResult<RecomputeReport> {
        if position >= self.baseline_len(object_id)? {
            return Err(marker_range_error(position));
        }
        let stage = self.stage(object_id, StageKind::Baseline)?;
        let mut markers = stage.record(Method::PolynomialFitting).get_markers("marker");
        if !markers.contains(&position) {
            markers.push(position);
            markers.sort_unstable();
        }
        let markers: Vec<i64> = markers.into_iter().map(|m| m as i64).collect();
        self.stage_mut(object_id, StageKind::Baseline)?.set_method_parameter(
            Method::PolynomialFitting,
            "marker",
            markers.into(),
        )?;
        self.recompute(object_id, Change::stage(StageKind::Baseline))
    }

    /// Remove a baseline marker; rejected when fewer than degree + 1 remain
    pub fn remove_marker(&mut self, object_id: Uuid, position: usize) -> NosaResult<RecomputeReport> {
        let record = self.stage(object_id, StageKind::Baseline)?.record(Method::PolynomialFitting);
        let degree = record.get_int("polyorder", 1).max(0) as usize;
        let use_marker = record.get_bool("use_marker", false);
        let markers: Vec<usize> = record
            .get_markers("marker")
            .into_iter()
            .filter(|&m| m != position)
            .collect();
        if use_marker {
            check_marker_count(&markers, degree)?;
        }
        let markers: Vec<i64> = markers.into_iter().map(|m| m as i64).collect();
        self.stage_mut(object_id, StageKind::Baseline)?.set_method_parameter(
            Method::PolynomialFitting,
            "marker",
            markers.into(),
        )?;
        self.recompute(object_id, Change::stage(StageKind::Baseline))
    }

    /// Apply a saved configuration to an object and the shared stages
    pub fn apply_config(&mut self, object_id: Uuid, config: &PipelineConfig) -> NosaResult<RecomputeReport> {
        let filetype = self.source(self.object(object_id)?.source_id)?.filetype;
        let mut shared = self.cross_signal.clone();
        for entry in &config.stages {
            if let Some(stage) = shared.iter_mut().find(|s| s.kind() == entry.kind) {
                entry.apply(stage)?;
            }
        }
        self.object_mut(object_id)?.pipeline.apply_config(config, filetype)?;
        self.cross_signal = shared;
        self.recompute(object_id, Change::stage(StageKind::BackgroundSubtraction))
    }

    pub fn set_region(&mut self, object_id: Uuid, region: Region) -> NosaResult<RecomputeReport> {
        self.object_mut(object_id)?.region = region;
        self.recompute(object_id, Change::region())
    }

    pub fn set_invert(&mut self, object_id: Uuid, invert: bool) -> NosaResult<RecomputeReport> {
        self.object_mut(object_id)?.invert = invert;
        self.recompute(object_id, Change::invert())
    }

    /// Include or exclude an object from the cross-signal stages
    pub fn set_object_active(&mut self, object_id: Uuid, active: bool) -> NosaResult<RecomputeReport> {
        self.object_mut(object_id)?.active = active;
        self.recompute(object_id, Change::cross_signal())
    }

    pub fn rename_object(&mut self, object_id: Uuid, name: &str) -> NosaResult<RecomputeReport> {
        self.object_mut(object_id)?.name = name.to_string();
        self.recompute(object_id, Change::cross_signal())
    }

    pub fn set_crop(&mut self, source_id: Uuid, start: usize, end: usize) -> NosaResult<RecomputeReport> {
        self.source_mut(source_id)?.set_crop(start, end)?;
        self.recompute_source(source_id, Change::source())
    }

    pub fn set_offset(&mut self, source_id: Uuid, offset: f64) -> NosaResult<RecomputeReport> {
        self.source_mut(source_id)?.set_offset(offset)?;
        self.recompute_source(source_id, Change::source())
    }

    /// Substitute motion-corrected samples for the crop window
    ///
    /// Image sequences are corrected frame by frame with
    /// [`Workspace::set_corrected_frames`] instead.
    pub fn set_corrected_data(&mut self, source_id: Uuid, samples: Vec<f64>) -> NosaResult<RecomputeReport> {
        let source = self.source_mut(source_id)?;
        if source.is_image_sequence() {
            return Err(NosaError::InvalidStageOperation {
                reason: format!("{} is an image sequence, correct its frames instead", source.name),
            });
        }
        source.set_corrected_data(samples)?;
        self.recompute_source(source_id, Change::source())
    }

    /// Replace the frames of an image source with motion-corrected ones
    ///
    /// Every dependent object re-extracts its raw trace from the new sampler.
    pub fn set_corrected_frames(
        &mut self,
        source_id: Uuid,
        sampler: Box<dyn RegionSampler>,
    ) -> NosaResult<RecomputeReport> {
        let source = self.source(source_id)?;
        if !source.is_image_sequence() {
            return Err(NosaError::InvalidStageOperation {
                reason: format!("{} has no frames to correct", source.name),
            });
        }
        if sampler.frame_count() != source.max_end_frame() {
            return Err(NosaError::LengthMismatch {
                expected: source.max_end_frame(),
                actual: sampler.frame_count(),
            });
        }
        info!("Motion-corrected frames for {}", source.name);
        self.samplers.insert(source_id, sampler);
        self.recompute_source(source_id, Change::source())
    }

    /// Change the source's frequency adjustment and recompute every dependent object
    pub fn set_frequency_adjustment(
        &mut self,
        source_id: Uuid,
        adjustment: FrequencyAdjustment,
    ) -> NosaResult<RecomputeReport> {
        self.source_mut(source_id)?.set_frequency_adjustment(adjustment)?;
        let ids = self.dependents(source_id);
        for &id in &ids {
            self.object_mut(id)?.pipeline.mirror_adjustment(adjustment)?;
        }
        self.recompute_objects(&ids, Change::stage(StageKind::AdjustFrequency))
    }

    /// Change the interpolation method of a source's frequency adjustment
    pub fn set_adjustment_method(&mut self, source_id: Uuid, method: Method) -> NosaResult<RecomputeReport> {
        let method = interpolation_kind(method).ok_or_else(|| NosaError::UnsupportedMethod {
            stage: StageKind::AdjustFrequency.name().to_string(),
            method: method.name().to_string(),
        })?;
        let adjustment = FrequencyAdjustment {
            method,
            ..self.source(source_id)?.adjustment()
        };
        self.set_frequency_adjustment(source_id, adjustment)
    }

    /// Snapshot of one object's signals and stage outputs
    pub fn export_object(&self, object_id: Uuid) -> NosaResult<ObjectExport> {
        let object = self.object(object_id)?;
        let source = self.source(object.source_id)?;
        Ok(ObjectExport {
            id: object.id,
            name: object.name.clone(),
            source: source.name.clone(),
            unit: source.unit.clone(),
            offset: source.offset(),
            sampling_rate: object.processed_rate(),
            seconds: source.seconds_range(),
            raw: object.raw().map(<[f64]>::to_vec),
            processed: object.processed().map(<[f64]>::to_vec),
            stages: object
                .pipeline
                .stages()
                .iter()
                .chain(&self.cross_signal)
                .map(StageExport::capture)
                .collect(),
        })
    }

    /// Export all objects as JSON
    pub fn export_json(&self) -> NosaResult<String> {
        let exports = self
            .objects
            .iter()
            .map(|o| self.export_object(o.id))
            .collect::<NosaResult<Vec<_>>>()?;
        serde_json::to_string_pretty(&exports).map_err(|e| NosaError::Serialization {
            reason: format!("Failed to serialize export: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::MAX_PROCESSING_INDEX;
    use nosa_core::{FileType, FrameStack, InterpolationMethod, RegionShape};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn ephys(name: &str, samples: Vec<f64>, rate: f64) -> ImportedRecording {
        ImportedRecording {
            name: name.to_string(),
            samples,
            sampling_rate: rate,
            filetype: FileType::Electrophysiology,
            unit: "mV".to_string(),
        }
    }

    fn spiky(n: usize, period: usize, phase: usize) -> Vec<f64> {
        (0..n)
            .map(|i| if i % period == phase { 5.0 } else { (i as f64 * 0.7).sin() * 0.1 })
            .collect()
    }

    #[test]
    fn test_add_object_runs_pipeline() {
        let mut ws = Workspace::new();
        let source = ws.add_source(ephys("trace.abf", spiky(200, 20, 5), 100.0)).unwrap();
        let object = ws.add_object(source, None).unwrap();

        let obj = ws.object(object).unwrap();
        assert_eq!(obj.name, "ABF 1 - 1");
        assert_eq!(obj.raw().unwrap().len(), 200);
        assert_eq!(obj.processed().unwrap(), obj.raw().unwrap());
        assert_eq!(obj.processed_rate(), Some(100.0));
    }

    #[test]
    fn test_stage_updates_and_listeners() {
        let mut ws = Workspace::new();
        let reports = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&reports);
        ws.subscribe(move |r| sink.borrow_mut().push(r.plan));

        let source = ws.add_source(ephys("trace.abf", spiky(300, 30, 10), 100.0)).unwrap();
        let object = ws.add_object(source, None).unwrap();

        ws.set_stage_active(object, StageKind::SpikeDetection, true).unwrap();
        ws.set_stage_parameter(object, StageKind::SpikeDetection, "absolute_amplitude", 2.into())
            .unwrap();
        let times = ws.object(object).unwrap().spike_times().unwrap().to_vec();
        assert_eq!(times, (10..300).step_by(30).collect::<Vec<_>>());

        let plans = reports.borrow();
        assert_eq!(plans.len(), 3);
        assert_eq!((plans[2].start, plans[2].stop), (4, 8));
    }

    #[test]
    fn test_rejected_mutations() {
        let mut ws = Workspace::new();
        let source = ws.add_source(ephys("trace.abf", spiky(100, 20, 5), 100.0)).unwrap();
        let object = ws.add_object(source, None).unwrap();

        assert!(matches!(
            ws.set_stage_active(object, StageKind::BackgroundSubtraction, true),
            Err(NosaError::InvalidStageOperation { .. })
        ));
        assert!(matches!(
            ws.set_stage_parameter(object, StageKind::AdjustFrequency, "adjusted_frequency", 50.0.into()),
            Err(NosaError::InvalidStageOperation { .. })
        ));
        assert!(matches!(ws.set_crop(source, 50, 50), Err(NosaError::InvalidCrop { .. })));
        assert!(matches!(
            ws.set_stage_parameter(object, StageKind::Smoothing, "polyorder", 11.into()),
            Err(NosaError::ParameterOutOfRange { .. })
        ));
        assert!(ws.object(Uuid::new_v4()).is_err());
    }

    #[test]
    fn test_crop_recomputes_dependents() {
        let mut ws = Workspace::new();
        let samples: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let source = ws.add_source(ephys("trace.abf", samples, 10.0)).unwrap();
        let first = ws.add_object(source, None).unwrap();
        let second = ws.add_object(source, None).unwrap();

        let report = ws.set_crop(source, 10, 30).unwrap();
        assert_eq!(report.objects.len(), 2);
        for id in [first, second] {
            let raw = ws.object(id).unwrap().raw().unwrap();
            assert_eq!(raw.len(), 20);
            assert_eq!(raw[0], 10.0);
        }
    }

    #[test]
    fn test_frequency_adjustment() {
        let mut ws = Workspace::new();
        let source = ws.add_source(ephys("trace.abf", spiky(100, 20, 5), 100.0)).unwrap();
        let object = ws.add_object(source, None).unwrap();

        let report = ws
            .set_frequency_adjustment(
                source,
                FrequencyAdjustment {
                    active: true,
                    adjusted_frequency: 50.0,
                    method: InterpolationMethod::Linear,
                },
            )
            .unwrap();
        assert_eq!(report.plan.start, StageKind::AdjustFrequency.index());

        let obj = ws.object(object).unwrap();
        assert_eq!(obj.processed().unwrap().len(), 50);
        assert_eq!(obj.processed_rate(), Some(50.0));
        assert_eq!(obj.raw().unwrap().len(), 100);
        assert_eq!(
            ws.stage(object, StageKind::AdjustFrequency).unwrap().method(),
            Method::Linear
        );
        assert_eq!(ws.export_object(object).unwrap().seconds.len(), 50);

        // 100 samples at 0.4 Hz of 100 Hz would leave nothing to process
        let rejected = ws.set_frequency_adjustment(
            source,
            FrequencyAdjustment {
                active: true,
                adjusted_frequency: 0.4,
                method: InterpolationMethod::Linear,
            },
        );
        assert!(matches!(rejected, Err(NosaError::InvalidSamplingRate { .. })));
        assert_eq!(ws.object(object).unwrap().processed().unwrap().len(), 50);
    }

    #[test]
    fn test_invert_flips_processed() {
        let mut ws = Workspace::new();
        let source = ws.add_source(ephys("trace.abf", vec![1.0, -2.0, 3.0, 0.5], 10.0)).unwrap();
        let object = ws.add_object(source, None).unwrap();

        let report = ws.set_invert(object, true).unwrap();
        assert_eq!(report.plan.start, MAX_PROCESSING_INDEX + 1);
        let obj = ws.object(object).unwrap();
        assert_eq!(obj.processed().unwrap(), &[-1.0, 2.0, -3.0, -0.5]);
        assert_eq!(obj.raw().unwrap(), &[1.0, -2.0, 3.0, 0.5]);

        ws.set_invert(object, false).unwrap();
        assert_eq!(ws.object(object).unwrap().processed().unwrap(), &[1.0, -2.0, 3.0, 0.5]);
    }

    #[test]
    fn test_baseline_markers() {
        let mut ws = Workspace::new();
        let samples: Vec<f64> = (0..100).map(|i| 2.0 + 0.5 * i as f64).collect();
        let source = ws.add_source(ephys("trace.abf", samples, 10.0)).unwrap();
        let object = ws.add_object(source, None).unwrap();
        ws.set_stage_active(object, StageKind::Baseline, true).unwrap();

        ws.set_stage_parameter(object, StageKind::Baseline, "use_marker", true.into())
            .unwrap();
        let markers = ws
            .stage(object, StageKind::Baseline)
            .unwrap()
            .parameters()
            .get_markers("marker");
        assert_eq!(markers.len(), 2);

        // A straight line through the markers removes the whole trend
        for v in ws.object(object).unwrap().processed().unwrap() {
            assert!(v.abs() < 1e-6);
        }

        assert!(matches!(
            ws.remove_marker(object, markers[0]),
            Err(NosaError::NotEnoughMarkers { .. })
        ));
        assert!(matches!(
            ws.set_stage_parameter(object, StageKind::Baseline, "marker", vec![3i64].into()),
            Err(NosaError::NotEnoughMarkers { .. })
        ));
        assert!(ws.add_marker(object, 100).is_err());
        ws.add_marker(object, 70).unwrap();
        ws.remove_marker(object, markers[0]).unwrap();
    }

    #[test]
    fn test_cross_signal_needs_two_active_objects() {
        let mut ws = Workspace::new();
        let a = ws.add_source(ephys("a.abf", spiky(400, 40, 10), 100.0)).unwrap();
        let b = ws.add_source(ephys("b.abf", spiky(400, 40, 15), 100.0)).unwrap();
        let first = ws.add_object(a, None).unwrap();
        ws.set_stage_active(first, StageKind::SpikeDetection, true).unwrap();
        ws.set_stage_active(first, StageKind::SpikeCorrelation, true).unwrap();
        assert_eq!(
            ws.stage(first, StageKind::SpikeCorrelation).unwrap().output(),
            Some(&StageOutput::SpikeCorrelation(None))
        );

        let second = ws.add_object(b, Some(first)).unwrap();
        let result = ws
            .stage(second, StageKind::SpikeCorrelation)
            .unwrap()
            .output()
            .and_then(|o| o.correlation())
            .cloned()
            .unwrap();
        assert_eq!(result.pairs.len(), 1);
        assert_eq!(result.pairs[0].first, ws.object(first).unwrap().name);
        assert!(result.pairs[0].delay.is_some());

        ws.set_object_active(second, false).unwrap();
        assert_eq!(
            ws.stage(first, StageKind::SpikeCorrelation).unwrap().output(),
            Some(&StageOutput::SpikeCorrelation(None))
        );
    }

    #[test]
    fn test_failed_object_still_updates_shared_stages() {
        let mut ws = Workspace::new();
        let calls = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&calls);
        ws.subscribe(move |_| *sink.borrow_mut() += 1);

        let a = ws.add_source(ephys("a.abf", spiky(400, 40, 10), 100.0)).unwrap();
        let b = ws.add_source(ephys("b.abf", spiky(400, 40, 15), 100.0)).unwrap();
        let first = ws.add_object(a, None).unwrap();
        ws.set_stage_active(first, StageKind::SpikeDetection, true).unwrap();
        ws.set_stage_active(first, StageKind::SpikeCorrelation, true).unwrap();
        ws.add_object(b, Some(first)).unwrap();
        let correlation = ws.stage(first, StageKind::SpikeCorrelation).unwrap().output().cloned();
        let before = *calls.borrow();

        // Above every spike of the first trace
        ws.stage_mut(first, StageKind::SpikeDetection)
            .unwrap()
            .set_parameter("absolute_amplitude", 10.into())
            .unwrap();
        let missing = Uuid::new_v4();
        assert!(matches!(
            ws.recompute_objects(&[missing, first], Change::stage(StageKind::SpikeDetection)),
            Err(NosaError::UnknownObject { id }) if id == missing
        ));

        assert!(ws.object(first).unwrap().spike_times().unwrap().is_empty());
        assert_ne!(ws.stage(first, StageKind::SpikeCorrelation).unwrap().output().cloned(), correlation);
        assert_eq!(*calls.borrow(), before + 1);
    }

    #[test]
    fn test_remove_last_object_removes_source() {
        let mut ws = Workspace::new();
        let source = ws.add_source(ephys("trace.abf", spiky(50, 10, 2), 10.0)).unwrap();
        let first = ws.add_object(source, None).unwrap();
        let second = ws.add_object(source, None).unwrap();

        ws.remove_object(first).unwrap();
        assert_eq!(ws.sources().len(), 1);
        ws.remove_object(second).unwrap();
        assert!(ws.sources().is_empty());
    }

    #[test]
    fn test_image_source_with_background() {
        // Object region bright and rising, background region constant 2
        let frames: Vec<Vec<f64>> = (0..20)
            .map(|f| {
                (0..400)
                    .map(|p| {
                        let (x, y) = (p % 20, p / 20);
                        if x < 10 && y < 10 {
                            10.0 + f as f64
                        } else {
                            2.0
                        }
                    })
                    .collect()
            })
            .collect();
        let stack = FrameStack::new(20, 20, frames).unwrap();
        let recording = ImportedRecording {
            name: "cells.tif".to_string(),
            samples: stack.frame_means(),
            sampling_rate: 5.0,
            filetype: FileType::ImageSequence,
            unit: "a.u.".to_string(),
        };

        let mut ws = Workspace::new();
        let source = ws.add_image_source(recording, Box::new(stack)).unwrap();
        let object = ws.add_object(source, None).unwrap();
        assert_eq!(ws.object(object).unwrap().name, "ROI 1 - 1");

        ws.set_region(object, Region::new((0.0, 0.0), (10.0, 10.0), 0.0, RegionShape::Rectangle))
            .unwrap();
        ws.set_stage_active(object, StageKind::Baseline, false).unwrap();
        ws.set_stage_active(object, StageKind::BackgroundSubtraction, true).unwrap();
        ws.set_stage_parameter(
            object,
            StageKind::BackgroundSubtraction,
            "background_region",
            vec![12.0, 12.0, 6.0, 6.0, 0.0].into(),
        )
        .unwrap();

        let raw = ws.object(object).unwrap().raw().unwrap();
        assert_eq!(raw.len(), 20);
        for (f, v) in raw.iter().enumerate() {
            assert!((v - (8.0 + f as f64)).abs() < 1e-9);
        }
    }

    fn cell_stack(level: f64, count: usize) -> FrameStack {
        // 10x10 cell in the top-left corner at `level + frame`, background 2
        let frames = (0..count)
            .map(|f| {
                (0..400)
                    .map(|p| if p % 20 < 10 && p / 20 < 10 { level + f as f64 } else { 2.0 })
                    .collect()
            })
            .collect();
        FrameStack::new(20, 20, frames).unwrap()
    }

    #[test]
    fn test_motion_corrected_frames() {
        let stack = cell_stack(10.0, 20);
        let recording = ImportedRecording {
            name: "cells.tif".to_string(),
            samples: stack.frame_means(),
            sampling_rate: 5.0,
            filetype: FileType::ImageSequence,
            unit: "a.u.".to_string(),
        };
        let mut ws = Workspace::new();
        let source = ws.add_image_source(recording, Box::new(stack)).unwrap();
        let object = ws.add_object(source, None).unwrap();
        ws.set_region(object, Region::new((0.0, 0.0), (10.0, 10.0), 0.0, RegionShape::Rectangle))
            .unwrap();
        ws.set_stage_active(object, StageKind::Baseline, false).unwrap();
        assert_eq!(ws.object(object).unwrap().raw().unwrap()[..3], [10.0, 11.0, 12.0]);

        // A 1-D trace cannot stand in for corrected frames
        assert!(matches!(
            ws.set_corrected_data(source, vec![999.0; 20]),
            Err(NosaError::InvalidStageOperation { .. })
        ));
        assert!(matches!(
            ws.set_corrected_frames(source, Box::new(cell_stack(50.0, 19))),
            Err(NosaError::LengthMismatch { expected: 20, actual: 19 })
        ));

        let report = ws.set_corrected_frames(source, Box::new(cell_stack(50.0, 20))).unwrap();
        assert_eq!(report.plan.start, 0);
        assert!(report.plan.reextract_raw);
        let obj = ws.object(object).unwrap();
        assert_eq!(obj.raw().unwrap()[..3], [50.0, 51.0, 52.0]);
        assert_eq!(obj.processed().unwrap()[19], 69.0);

        let ephys_source = ws.add_source(ephys("trace.abf", spiky(20, 5, 1), 10.0)).unwrap();
        assert!(matches!(
            ws.set_corrected_frames(ephys_source, Box::new(cell_stack(50.0, 20))),
            Err(NosaError::InvalidStageOperation { .. })
        ));
    }

    #[test]
    fn test_image_source_needs_sampler() {
        let mut ws = Workspace::new();
        let source = ws
            .add_source(ImportedRecording {
                name: "cells.tif".to_string(),
                samples: vec![1.0; 10],
                sampling_rate: 5.0,
                filetype: FileType::ImageSequence,
                unit: "a.u.".to_string(),
            })
            .unwrap();
        assert!(matches!(
            ws.add_object(source, None),
            Err(NosaError::MissingRegionSampler { .. })
        ));
        assert!(ws.objects().is_empty());
    }

    #[test]
    fn test_export_json() {
        let mut ws = Workspace::new();
        let source = ws.add_source(ephys("trace.abf", spiky(100, 20, 5), 100.0)).unwrap();
        let object = ws.add_object(source, None).unwrap();
        ws.set_stage_active(object, StageKind::PowerSpectrum, true).unwrap();

        let export = ws.export_object(object).unwrap();
        assert_eq!(export.stages.len(), StageKind::ALL.len());
        assert!(export.stages[StageKind::PowerSpectrum.index()].output.is_some());
        let json = ws.export_json().unwrap();
        assert!(json.contains("Power Spectrum"));
    }
}
