//! NOSA-Processing: stage pipeline and numerical algorithms
//!
//! Baseline removal, smoothing, event detection, spectra and cross-signal
//! correlation, run as a fixed stage sequence with incremental recompute.

pub mod linalg;
pub mod filters;
pub mod baseline;
pub mod events;
pub mod spectrum;
pub mod shape;
pub mod correlation;
pub mod stage;
pub mod config;
pub mod pipeline;
pub mod scheduler;
pub mod engine;
pub mod workspace;

pub use stage::{Method, ParameterRecord, ParameterValue, Stage, StageInput, StageKind, StageOutput, StageRole};
pub use config::{PipelineConfig, StageConfig};
pub use pipeline::{Object, Pipeline, ProcessedSignal};
pub use scheduler::{Change, ChangeReason, RecomputePlan};
pub use workspace::{ObjectExport, RecomputeReport, StageExport, Workspace};
pub use events::{BurstResult, SpikeResult};
pub use correlation::{Contribution, CorrelationResult, PairCorrelation};
pub use spectrum::PowerSpectrum;
pub use shape::EventShape;
