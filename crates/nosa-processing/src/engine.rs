//! Pipeline execution for one object and for the shared cross-signal stages

use crate::correlation::Contribution;
use crate::pipeline::{Object, ProcessedSignal};
use crate::scheduler::RecomputePlan;
use crate::stage::{Method, Stage, StageInput, StageKind, StageOutput, MAX_OBJECT_INDEX, MAX_PROCESSING_INDEX, MAX_RAW_INDEX};
use nosa_core::{FileType, NosaError, NosaResult, Region, RegionSampler, RegionShape, Source};
use tracing::{debug, warn};

/// Running state threaded from stage to stage
struct RunningState {
    y: Vec<f64>,
    sampling_rate: f64,
    noise_std: Option<f64>,
    spike_times: Option<Vec<usize>>,
    burst_times: Option<Vec<usize>>,
}

impl RunningState {
    /// Take over the signal and carried values of a stage output
    fn absorb(&mut self, output: &StageOutput) {
        if let Some(y) = output.signal() {
            self.y = y.to_vec();
        }
        if let Some(rate) = output.sampling_rate() {
            self.sampling_rate = rate;
        }
        match output {
            StageOutput::Smoothing { noise_std, .. } => self.noise_std = *noise_std,
            StageOutput::SpikeDetection(result) => self.spike_times = Some(result.times.clone()),
            StageOutput::BurstDetection(result) => self.burst_times = Some(result.peaks.clone()),
            _ => {}
        }
    }
}

/// Raw trace of an object before any stage: region mean or source samples
pub fn extract_signal(object: &Object, source: &Source, sampler: Option<&dyn RegionSampler>) -> NosaResult<Vec<f64>> {
    if !source.is_image_sequence() {
        return Ok(source.data().to_vec());
    }
    let sampler = sampler.ok_or_else(|| NosaError::MissingRegionSampler {
        source_name: source.name.clone(),
    })?;
    sampler.region_mean(source, &object.region)
}

/// Background trace for the selected background-subtraction method
fn background_trace(
    stage: &Stage,
    object: &Object,
    source: &Source,
    sampler: Option<&dyn RegionSampler>,
    len: usize,
) -> Option<Vec<f64>> {
    let Some(sampler) = sampler else {
        warn!("No region sampler for {}, background not subtracted", source.name);
        return None;
    };
    let params = stage.parameters();
    let trace = match stage.method() {
        Method::Perisomatic => sampler.ring_mean(source, &object.region, params.get_int("radius", 4) as f64),
        _ => {
            let rect = params
                .get_parameter("background_region")
                .and_then(|v| v.as_float_array())
                .unwrap_or_else(|| vec![20.0, 20.0, 20.0, 20.0, 0.0]);
            let region = Region::new((rect[0], rect[1]), (rect[2], rect[3]), rect[4], RegionShape::Rectangle);
            sampler.region_mean(source, &region)
        }
    };
    match trace {
        Ok(trace) if trace.len() == len => Some(trace),
        Ok(trace) => {
            warn!(
                "Background of {} has {} frames, expected {}",
                object.name,
                trace.len(),
                len
            );
            None
        }
        Err(e) => {
            warn!("Background of {} not available: {}", object.name, e);
            None
        }
    }
}

/// Execute the per-object part of `plan` on `object`
///
/// Stages before the start index replay their cached outputs. An active stage
/// that was never computed pulls the start back to itself.
pub fn recompute_object(
    object: &mut Object,
    source: &Source,
    sampler: Option<&dyn RegionSampler>,
    plan: &RecomputePlan,
) -> NosaResult<()> {
    if !plan.runs_objects() {
        return Ok(());
    }
    let stop = plan.stop.min(MAX_OBJECT_INDEX);
    let mut start = plan.start;
    if let Some(uncomputed) = object.pipeline.first_uncomputed() {
        start = start.min(uncomputed);
    }
    if object.processed.is_none() {
        start = start.min(MAX_PROCESSING_INDEX + 1);
    }
    debug!("Recomputing {} stages {}..={}", object.name, start, stop);

    let extracted = match (&object.extracted, plan.reextract_raw) {
        (Some(extracted), false) => extracted.clone(),
        _ => {
            let extracted = extract_signal(object, source, sampler)?;
            object.extracted = Some(extracted.clone());
            start = 0;
            extracted
        }
    };

    let mut state = RunningState {
        y: extracted,
        sampling_rate: source.original_frequency,
        noise_std: None,
        spike_times: None,
        burst_times: None,
    };
    let adjustment = source.adjustment();

    for index in 0..=stop {
        if index == MAX_PROCESSING_INDEX + 1 {
            if object.invert {
                state.y.iter_mut().for_each(|v| *v = -*v);
            }
            object.processed = Some(ProcessedSignal {
                y: state.y.clone(),
                sampling_rate: state.sampling_rate,
            });
        }

        let stage = &object.pipeline.stages()[index];
        let kind = stage.kind();
        if stage.is_active() {
            if index < start {
                if let Some(output) = stage.output() {
                    state.absorb(output);
                }
            } else {
                let background = if kind == StageKind::BackgroundSubtraction {
                    background_trace(stage, object, source, sampler, state.y.len())
                } else {
                    None
                };
                let input = StageInput {
                    y: &state.y,
                    sampling_rate: state.sampling_rate,
                    filetype: source.filetype,
                    noise_std: state.noise_std,
                    spike_times: state.spike_times.as_deref(),
                    burst_times: state.burst_times.as_deref(),
                    background: background.as_deref(),
                    adjustment,
                    contributions: &[],
                };
                let output = stage.execute(&input);
                debug!("{}: {} executed", object.name, stage.name());
                state.absorb(&output);
                if let Some(stage) = object.pipeline.stage_mut(kind) {
                    stage.set_output(Some(output));
                }
            }
        }

        if index == MAX_RAW_INDEX {
            object.raw = Some(state.y.clone());
        }
    }
    Ok(())
}

/// Owned snapshot of what the active objects contribute to a cross-signal stage
pub fn contributions(kind: StageKind, objects: &[Object], sources: &[Source]) -> Vec<Contribution> {
    objects
        .iter()
        .filter(|o| o.active)
        .filter_map(|object| {
            let source = sources.iter().find(|s| s.id == object.source_id)?;
            let sampling_rate = object.processed_rate()?;
            let series = match kind {
                StageKind::SpikeCorrelation => object
                    .pipeline
                    .stage(StageKind::SpikeDetection)
                    .filter(|s| s.is_active())
                    .and_then(|s| s.output())
                    .and_then(|o| o.spikes())
                    .map(|r| r.train.clone())?,
                _ => object.processed()?.to_vec(),
            };
            Some(Contribution {
                name: object.name.clone(),
                series,
                sampling_rate,
                offset: source.offset(),
            })
        })
        .collect()
}

/// Execute the cross-signal part of `plan` on the shared stages
pub fn recompute_cross_signal(stages: &mut [Stage], objects: &[Object], sources: &[Source], plan: &RecomputePlan) {
    if !plan.runs_cross_signal() {
        return;
    }
    for stage in stages.iter_mut() {
        let kind = stage.kind();
        if !stage.is_active() || !plan.executes(kind.index()) {
            continue;
        }
        let snapshot = contributions(kind, objects, sources);
        if snapshot.len() < 2 {
            debug!("{}: {} contributor(s), no result", stage.name(), snapshot.len());
        }
        let mut input = StageInput::new(&[], 0.0, FileType::Electrophysiology);
        input.contributions = &snapshot;
        let output = stage.execute(&input);
        stage.set_output(Some(output));
    }
}
