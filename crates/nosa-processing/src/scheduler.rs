//! Recompute planning over the linear stage sequence
//!
//! A [`Change`] names the stage that changed and why; [`RecomputePlan`] turns
//! it into the contiguous index range that must execute again. Stages before
//! the start index are replayed from their cached outputs.

use crate::stage::{StageKind, StageRole, MAX_OBJECT_INDEX, MAX_PROCESSING_INDEX};
use serde::{Deserialize, Serialize};

const FIRST_CROSS_SIGNAL: usize = MAX_OBJECT_INDEX + 1;
const LAST_STAGE: usize = StageKind::ALL.len() - 1;

/// Why a recompute was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeReason {
    /// Everything from the first stage
    Full,
    /// Source samples, crop window or offset changed
    SourceChanged,
    /// Object region geometry changed
    RegionChanged,
    /// Method or parameter of the origin stage changed
    StageConfig,
    /// Origin stage was switched on or off
    StageActivation,
    /// A setting that only affects stages after the origin changed
    DownstreamOnly,
    /// Sign of the processed signal flipped
    Invert,
    /// Only the contribution set of cross-signal stages changed
    CrossSignalOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub origin: Option<StageKind>,
    pub reason: ChangeReason,
    /// Stop before the cross-signal stages, used when several objects are
    /// recomputed and the cross-signal stages run once afterwards
    pub skip_cross_signal: bool,
}

impl Change {
    fn new(origin: Option<StageKind>, reason: ChangeReason) -> Self {
        Self {
            origin,
            reason,
            skip_cross_signal: false,
        }
    }

    pub fn full() -> Self {
        Self::new(None, ChangeReason::Full)
    }

    pub fn source() -> Self {
        Self::new(None, ChangeReason::SourceChanged)
    }

    pub fn region() -> Self {
        Self::new(None, ChangeReason::RegionChanged)
    }

    pub fn stage(kind: StageKind) -> Self {
        Self::new(Some(kind), ChangeReason::StageConfig)
    }

    pub fn activation(kind: StageKind) -> Self {
        Self::new(Some(kind), ChangeReason::StageActivation)
    }

    pub fn downstream(kind: StageKind) -> Self {
        Self::new(Some(kind), ChangeReason::DownstreamOnly)
    }

    pub fn invert() -> Self {
        Self::new(None, ChangeReason::Invert)
    }

    pub fn cross_signal() -> Self {
        Self::new(None, ChangeReason::CrossSignalOnly)
    }

    pub fn without_cross_signal(mut self) -> Self {
        self.skip_cross_signal = true;
        self
    }
}

/// Inclusive stage range to execute for a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecomputePlan {
    pub start: usize,
    pub stop: usize,
    /// The processed signal changes, so every consumer refreshes
    pub processing_changed: bool,
    /// Extract the raw signal from the source again
    pub reextract_raw: bool,
}

impl RecomputePlan {
    pub fn for_change(change: &Change) -> Self {
        let mut plan = match (change.reason, change.origin) {
            (ChangeReason::Full | ChangeReason::SourceChanged | ChangeReason::RegionChanged, _) => Self {
                start: 0,
                stop: LAST_STAGE,
                processing_changed: true,
                reextract_raw: true,
            },
            (ChangeReason::Invert, _) => Self {
                start: MAX_PROCESSING_INDEX + 1,
                stop: LAST_STAGE,
                processing_changed: true,
                reextract_raw: false,
            },
            (ChangeReason::CrossSignalOnly, _) => Self {
                start: FIRST_CROSS_SIGNAL,
                stop: LAST_STAGE,
                processing_changed: false,
                reextract_raw: false,
            },
            (_, None) => Self {
                start: 0,
                stop: LAST_STAGE,
                processing_changed: true,
                reextract_raw: false,
            },
            (reason, Some(origin)) => {
                let index = origin.index();
                let start = if reason == ChangeReason::DownstreamOnly {
                    index + 1
                } else {
                    index
                };
                match origin.role() {
                    StageRole::Raw | StageRole::Processing => Self {
                        start,
                        stop: LAST_STAGE,
                        processing_changed: true,
                        reextract_raw: false,
                    },
                    StageRole::Analysis | StageRole::CrossSignal => Self {
                        start,
                        stop: origin
                            .dependents()
                            .iter()
                            .map(|d| d.index())
                            .fold(index, usize::max),
                        processing_changed: false,
                        reextract_raw: false,
                    },
                }
            }
        };
        if change.skip_cross_signal {
            plan.stop = plan.stop.min(MAX_OBJECT_INDEX);
        }
        plan
    }

    /// Whether nothing executes
    pub fn is_empty(&self) -> bool {
        self.start > self.stop
    }

    pub fn executes(&self, index: usize) -> bool {
        (self.start..=self.stop).contains(&index)
    }

    /// Whether any per-object stage executes
    pub fn runs_objects(&self) -> bool {
        !self.is_empty() && self.start <= MAX_OBJECT_INDEX
    }

    /// Whether any cross-signal stage executes
    pub fn runs_cross_signal(&self) -> bool {
        !self.is_empty() && self.stop >= FIRST_CROSS_SIGNAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(change: Change) -> (usize, usize) {
        let plan = RecomputePlan::for_change(&change);
        (plan.start, plan.stop)
    }

    #[test]
    fn test_full_and_source_changes() {
        assert_eq!(plan(Change::full()), (0, 9));
        let region = RecomputePlan::for_change(&Change::region());
        assert!(region.reextract_raw);
        assert!(!RecomputePlan::for_change(&Change::stage(StageKind::BackgroundSubtraction)).reextract_raw);
    }

    #[test]
    fn test_processing_origin_runs_to_end() {
        assert_eq!(plan(Change::stage(StageKind::Baseline)), (1, 9));
        assert_eq!(plan(Change::activation(StageKind::Smoothing)), (3, 9));
        assert_eq!(plan(Change::downstream(StageKind::AdjustFrequency)), (3, 9));
        assert!(RecomputePlan::for_change(&Change::stage(StageKind::Smoothing)).processing_changed);
    }

    #[test]
    fn test_analysis_origin_stops_at_dependents() {
        assert_eq!(plan(Change::stage(StageKind::SpikeDetection)), (4, 8));
        assert_eq!(plan(Change::stage(StageKind::BurstDetection)), (5, 6));
        assert_eq!(plan(Change::stage(StageKind::EventShape)), (6, 6));
        assert_eq!(plan(Change::stage(StageKind::PowerSpectrum)), (7, 7));
        assert!(!RecomputePlan::for_change(&Change::stage(StageKind::PowerSpectrum)).processing_changed);
    }

    #[test]
    fn test_downstream_only_may_be_empty() {
        let plan = RecomputePlan::for_change(&Change::downstream(StageKind::PowerSpectrum));
        assert!(plan.is_empty());
        assert!(!plan.runs_objects());
        assert!(!plan.runs_cross_signal());
    }

    #[test]
    fn test_invert_and_cross_signal() {
        let invert = RecomputePlan::for_change(&Change::invert());
        assert_eq!((invert.start, invert.stop), (4, 9));
        assert!(invert.processing_changed);

        let cross = RecomputePlan::for_change(&Change::cross_signal());
        assert_eq!((cross.start, cross.stop), (8, 9));
        assert!(!cross.runs_objects());
        assert!(cross.runs_cross_signal());

        assert_eq!(plan(Change::stage(StageKind::AmplitudeCorrelation)), (9, 9));
        assert_eq!(plan(Change::stage(StageKind::SpikeCorrelation)), (8, 8));
    }

    #[test]
    fn test_skip_cross_signal() {
        assert_eq!(plan(Change::full().without_cross_signal()), (0, 7));
        assert_eq!(plan(Change::stage(StageKind::SpikeDetection).without_cross_signal()), (4, 7));
        assert!(RecomputePlan::for_change(&Change::cross_signal().without_cross_signal()).is_empty());
    }
}
