//! Pipeline stages, their methods and parameter records

use crate::baseline;
use crate::config::default_parameters;
use crate::correlation::{amplitude_correlation, spike_correlation, AmplitudeSettings, Contribution, CorrelationResult};
use crate::events::{
    burst_detection, spike_detection, BurstResult, BurstSettings, Polarity, RelativeBase, RelativeTo, SpikeResult,
    SpikeSettings, ThresholdSettings,
};
use crate::filters::{butterworth_max_cutoff, moving_average, resample, savitzky_golay, ButterworthLowpass};
use crate::shape::{event_shape, EventShape};
use crate::spectrum::{power_spectrum, PowerSpectrum};
use nosa_core::{range_error, std_dev, FileType, FrequencyAdjustment, NosaError, NosaResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Index of the last stage producing the raw signal
pub const MAX_RAW_INDEX: usize = 0;
/// Index of the last stage re-emitting the signal
pub const MAX_PROCESSING_INDEX: usize = 3;
/// Index of the last per-object stage
pub const MAX_OBJECT_INDEX: usize = 7;

/// The fixed stage sequence of every pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StageKind {
    BackgroundSubtraction,
    Baseline,
    AdjustFrequency,
    Smoothing,
    SpikeDetection,
    BurstDetection,
    EventShape,
    PowerSpectrum,
    SpikeCorrelation,
    AmplitudeCorrelation,
}

/// Position of a stage in the data flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageRole {
    /// Produces the raw signal
    Raw,
    /// Consumes and re-emits the signal
    Processing,
    /// Consumes the processed signal
    Analysis,
    /// Consumes data of all active objects
    CrossSignal,
}

impl StageKind {
    pub const ALL: [StageKind; 10] = [
        StageKind::BackgroundSubtraction,
        StageKind::Baseline,
        StageKind::AdjustFrequency,
        StageKind::Smoothing,
        StageKind::SpikeDetection,
        StageKind::BurstDetection,
        StageKind::EventShape,
        StageKind::PowerSpectrum,
        StageKind::SpikeCorrelation,
        StageKind::AmplitudeCorrelation,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            StageKind::BackgroundSubtraction => "Background Subtraction",
            StageKind::Baseline => "Baseline",
            StageKind::AdjustFrequency => "Adjust Frequency",
            StageKind::Smoothing => "Smoothing",
            StageKind::SpikeDetection => "Spike Detection",
            StageKind::BurstDetection => "Burst Detection",
            StageKind::EventShape => "Event Shape",
            StageKind::PowerSpectrum => "Power Spectrum",
            StageKind::SpikeCorrelation => "Spike Cross Correlation",
            StageKind::AmplitudeCorrelation => "Amplitude Cross Correlation",
        }
    }

    pub fn role(self) -> StageRole {
        match self.index() {
            i if i <= MAX_RAW_INDEX => StageRole::Raw,
            i if i <= MAX_PROCESSING_INDEX => StageRole::Processing,
            i if i <= MAX_OBJECT_INDEX => StageRole::Analysis,
            _ => StageRole::CrossSignal,
        }
    }

    /// Whether the stage re-emits the signal
    pub fn emits_signal(self) -> bool {
        matches!(self.role(), StageRole::Raw | StageRole::Processing)
    }

    /// Stages consuming this stage's output besides the signal
    pub fn dependents(self) -> &'static [StageKind] {
        match self {
            StageKind::SpikeDetection => &[StageKind::EventShape, StageKind::SpikeCorrelation],
            StageKind::BurstDetection => &[StageKind::EventShape],
            _ => &[],
        }
    }

    pub fn methods(self) -> &'static [Method] {
        match self {
            StageKind::BackgroundSubtraction => &[Method::Region, Method::Perisomatic],
            StageKind::Baseline => &[
                Method::PolynomialFitting,
                Method::AsymmetricLeastSquares,
                Method::TopHat,
                Method::MovingAverage,
            ],
            StageKind::AdjustFrequency => &[Method::NearestNeighbour, Method::Linear, Method::Cubic],
            StageKind::Smoothing => &[Method::SavitzkyGolay, Method::MovingAverage, Method::Butterworth],
            StageKind::SpikeDetection | StageKind::BurstDetection => &[Method::Threshold],
            StageKind::EventShape => &[Method::SpikeShape, Method::BurstShape],
            StageKind::PowerSpectrum => &[Method::FastFourierTransform],
            StageKind::SpikeCorrelation => &[Method::SpikeTrain],
            StageKind::AmplitudeCorrelation => &[Method::Amplitude],
        }
    }

    pub fn default_method(self) -> Method {
        self.methods()[0]
    }
}

/// Algorithm variant of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Method {
    Region,
    Perisomatic,
    PolynomialFitting,
    AsymmetricLeastSquares,
    TopHat,
    MovingAverage,
    NearestNeighbour,
    Linear,
    Cubic,
    SavitzkyGolay,
    Butterworth,
    Threshold,
    SpikeShape,
    BurstShape,
    FastFourierTransform,
    SpikeTrain,
    Amplitude,
}

impl Method {
    pub fn name(self) -> &'static str {
        match self {
            Method::Region => "ROI",
            Method::Perisomatic => "Perisomatic",
            Method::PolynomialFitting => "Polynomial Fitting",
            Method::AsymmetricLeastSquares => "Asymmetric Least Squares",
            Method::TopHat => "Top Hat",
            Method::MovingAverage => "Moving Average",
            Method::NearestNeighbour => "Nearest Neighbour",
            Method::Linear => "Linear",
            Method::Cubic => "Cubic",
            Method::SavitzkyGolay => "Savitzky Golay",
            Method::Butterworth => "Butterworth",
            Method::Threshold => "Threshold",
            Method::SpikeShape => "Spike Shape",
            Method::BurstShape => "Burst Shape",
            Method::FastFourierTransform => "Fast Fourier Transform",
            Method::SpikeTrain => "Spike Train",
            Method::Amplitude => "Amplitude",
        }
    }
}

/// Parameter value types for stage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterValue {
    Float(f64),
    Integer(i64),
    Boolean(bool),
    String(String),
    FloatArray(Vec<f64>),
    IntegerArray(Vec<i64>),
}

impl ParameterValue {
    /// Convert to f64 if possible
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParameterValue::Float(v) => Some(*v),
            ParameterValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Convert to i64 if possible
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParameterValue::Integer(v) => Some(*v),
            ParameterValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParameterValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParameterValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_float_array(&self) -> Option<Vec<f64>> {
        match self {
            ParameterValue::FloatArray(v) => Some(v.clone()),
            ParameterValue::IntegerArray(v) => Some(v.iter().map(|&x| x as f64).collect()),
            _ => None,
        }
    }

    pub fn as_int_array(&self) -> Option<&[i64]> {
        match self {
            ParameterValue::IntegerArray(v) => Some(v),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            ParameterValue::Float(_) => "a number",
            ParameterValue::Integer(_) => "an integer",
            ParameterValue::Boolean(_) => "a boolean",
            ParameterValue::String(_) => "a string",
            ParameterValue::FloatArray(_) => "a list of numbers",
            ParameterValue::IntegerArray(_) => "a list of integers",
        }
    }

    fn display(&self) -> String {
        match self {
            ParameterValue::Float(v) => v.to_string(),
            ParameterValue::Integer(v) => v.to_string(),
            ParameterValue::Boolean(v) => v.to_string(),
            ParameterValue::String(v) => v.clone(),
            ParameterValue::FloatArray(v) => format!("{:?}", v),
            ParameterValue::IntegerArray(v) => format!("{:?}", v),
        }
    }
}

/// Macro for easy parameter setting
#[macro_export]
macro_rules! set_params {
    ($record:expr, $($key:expr => $value:expr),+ $(,)?) => {
        $(
            $record.set_parameter($key, $value.into());
        )+
    };
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        ParameterValue::Float(value)
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        ParameterValue::Integer(value)
    }
}

impl From<i32> for ParameterValue {
    fn from(value: i32) -> Self {
        ParameterValue::Integer(value as i64)
    }
}

impl From<bool> for ParameterValue {
    fn from(value: bool) -> Self {
        ParameterValue::Boolean(value)
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        ParameterValue::String(value)
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        ParameterValue::String(value.to_string())
    }
}

impl From<Vec<f64>> for ParameterValue {
    fn from(value: Vec<f64>) -> Self {
        ParameterValue::FloatArray(value)
    }
}

impl From<Vec<i64>> for ParameterValue {
    fn from(value: Vec<i64>) -> Self {
        ParameterValue::IntegerArray(value)
    }
}

/// Named parameters of one stage method
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterRecord {
    parameters: BTreeMap<String, ParameterValue>,
}

impl ParameterRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter value without validation
    pub fn set_parameter(&mut self, key: &str, value: ParameterValue) {
        self.parameters.insert(key.to_string(), value);
    }

    pub fn get_parameter(&self, key: &str) -> Option<&ParameterValue> {
        self.parameters.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.parameters.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.parameters.keys().map(String::as_str)
    }

    /// Get float parameter with default
    pub fn get_float(&self, key: &str, default: f64) -> f64 {
        self.get_parameter(key).and_then(ParameterValue::as_float).unwrap_or(default)
    }

    /// Get integer parameter with default
    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.get_parameter(key).and_then(ParameterValue::as_int).unwrap_or(default)
    }

    /// Get boolean parameter with default
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get_parameter(key).and_then(ParameterValue::as_bool).unwrap_or(default)
    }

    pub fn get_str<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get_parameter(key).and_then(ParameterValue::as_str).unwrap_or(default)
    }

    /// Get a two-value interval with default
    pub fn get_interval(&self, key: &str, default: (f64, f64)) -> (f64, f64) {
        match self.get_parameter(key).and_then(ParameterValue::as_float_array) {
            Some(v) if v.len() == 2 => (v[0], v[1]),
            _ => default,
        }
    }

    /// Marker positions; negative entries are dropped
    pub fn get_markers(&self, key: &str) -> Vec<usize> {
        self.get_parameter(key)
            .and_then(ParameterValue::as_int_array)
            .map(|m| m.iter().filter(|&&v| v >= 0).map(|&v| v as usize).collect())
            .unwrap_or_default()
    }
}

/// Check a new value for `key` of a stage and coerce it to the stored type
///
/// `current` is the value the record holds, which fixes the expected type.
pub fn validate_parameter(
    kind: StageKind,
    key: &str,
    current: &ParameterValue,
    value: ParameterValue,
) -> NosaResult<ParameterValue> {
    let value = match (current, value) {
        (ParameterValue::Float(_), ParameterValue::Integer(v)) => ParameterValue::Float(v as f64),
        (ParameterValue::Integer(_), ParameterValue::Float(v)) if v.fract() == 0.0 => ParameterValue::Integer(v as i64),
        (ParameterValue::FloatArray(_), ParameterValue::IntegerArray(v)) => {
            ParameterValue::FloatArray(v.iter().map(|&x| x as f64).collect())
        }
        (_, value) => value,
    };
    if std::mem::discriminant(current) != std::mem::discriminant(&value) {
        return Err(NosaError::ParameterType {
            key: key.to_string(),
            expected: current.type_name(),
        });
    }

    let float = value.as_float();
    let int = value.as_int();
    let shown = value.display();
    let in_range = |ok: bool, range: &'static str| -> NosaResult<()> {
        if ok {
            Ok(())
        } else {
            Err(NosaError::ParameterOutOfRange {
                key: key.to_string(),
                value: shown.clone(),
                valid_range: range,
            })
        }
    };
    let positive = |v: Option<f64>| v.map_or(false, |v| v > 0.0 && v.is_finite());
    let non_negative = |v: Option<f64>| v.map_or(false, |v| v >= 0.0 && v.is_finite());

    use StageKind::*;
    match (kind, key) {
        (BackgroundSubtraction, "background_region") => {
            let ok = matches!(value.as_float_array(), Some(v) if v.len() == 5 && v[2] > 0.0 && v[3] > 0.0);
            in_range(ok, "[x, y, width > 0, height > 0, angle]")?
        }
        (BackgroundSubtraction, "radius") => in_range(int.map_or(false, |v| v >= 1), ">= 1")?,
        (Baseline, "polyorder") => in_range(
            int.map_or(false, |v| (0..=baseline::MAX_POLYNOMIAL_DEGREE as i64).contains(&v)),
            "0..=6",
        )?,
        (Baseline, "smooth") => in_range(positive(float), "> 0")?,
        (Baseline, "iterations") => in_range(int.map_or(false, |v| v >= 1), ">= 1")?,
        (Baseline, "p") => in_range(float.map_or(false, |v| v > 0.0 && v < 1.0), "(0, 1)")?,
        (Baseline, "factor") => in_range(float.map_or(false, |v| v > 0.0 && v <= 1.0), "(0, 1]")?,
        (Baseline, "marker") => in_range(
            value.as_int_array().map_or(false, |m| m.iter().all(|&v| v >= 0)),
            "frame indices >= 0",
        )?,
        (Baseline | Smoothing | EventShape | PowerSpectrum, "window" | "smooth") => {
            in_range(int.map_or(false, |v| v >= 0), ">= 0")?
        }
        (AdjustFrequency, "adjusted_frequency") => in_range(positive(float), "> 0")?,
        (Smoothing, "polyorder") => in_range(int.map_or(false, |v| (0..=10).contains(&v)), "0..=10")?,
        (Smoothing, "highcut") => in_range(positive(float), "> 0")?,
        (Smoothing, "order") => in_range(int.map_or(false, |v| (1..=10).contains(&v)), "1..=10")?,
        (SpikeDetection | BurstDetection, "dynamic_smooth") => in_range(int.map_or(false, |v| v >= 0), ">= 0")?,
        (SpikeDetection | BurstDetection, "relative_amplitude") => in_range(non_negative(float), ">= 0")?,
        (SpikeDetection | BurstDetection, "relative_amplitude_type") => in_range(
            value.as_str().and_then(RelativeTo::parse).is_some(),
            "\"noise\" or \"data\"",
        )?,
        (SpikeDetection, "distance") | (BurstDetection, "duration") => in_range(non_negative(float), ">= 0 ms")?,
        (BurstDetection, "relative_base") => in_range(
            value.as_str().and_then(RelativeBase::parse).is_some(),
            "\"median\", \"mean\" or \"zero\"",
        )?,
        (BurstDetection, "polarity") => in_range(
            value.as_str().and_then(Polarity::parse).is_some(),
            "\"depolarization\" or \"hyperpolarization\"",
        )?,
        (EventShape, "interval") => in_range(
            matches!(value.as_float_array(), Some(v) if v.len() == 2 && v.iter().all(|&x| x >= 0.0)),
            "[left ms >= 0, right ms >= 0]",
        )?,
        (PowerSpectrum, "threshold") => in_range(non_negative(float), ">= 0")?,
        (PowerSpectrum, "interval") => in_range(
            matches!(value.as_float_array(), Some(v) if v.len() == 2 && v[0] >= 0.0 && v[0] <= v[1]),
            "[min Hz, max Hz] with 0 <= min <= max",
        )?,
        (SpikeCorrelation, "binfactor") => in_range(int.map_or(false, |v| v >= 1), ">= 1")?,
        (SpikeCorrelation | AmplitudeCorrelation, "maxlag") => in_range(positive(float), "> 0 s")?,
        (AmplitudeCorrelation, "order") => in_range(int.map_or(false, |v| v >= 0), ">= 0")?,
        (AmplitudeCorrelation, "highpass_freq" | "lowpass_freq") => in_range(non_negative(float), ">= 0 Hz")?,
        _ => {}
    }
    Ok(value)
}

/// Everything a stage reads when it executes
#[derive(Debug, Clone, Copy)]
pub struct StageInput<'a> {
    /// Running signal
    pub y: &'a [f64],
    /// Rate of the running signal
    pub sampling_rate: f64,
    pub filetype: FileType,
    /// Noise estimate carried from smoothing
    pub noise_std: Option<f64>,
    pub spike_times: Option<&'a [usize]>,
    pub burst_times: Option<&'a [usize]>,
    /// Background trace prepared from the source for background subtraction
    pub background: Option<&'a [f64]>,
    /// Source-driven frequency adjustment
    pub adjustment: FrequencyAdjustment,
    /// Snapshot of all active objects for cross-signal stages
    pub contributions: &'a [Contribution],
}

impl<'a> StageInput<'a> {
    pub fn new(y: &'a [f64], sampling_rate: f64, filetype: FileType) -> Self {
        Self {
            y,
            sampling_rate,
            filetype,
            noise_std: None,
            spike_times: None,
            burst_times: None,
            background: None,
            adjustment: FrequencyAdjustment::default(),
            contributions: &[],
        }
    }
}

/// Output of one stage execution
///
/// Unavailable values are explicit: a failed baseline is `baseline: None`, a
/// cross-signal stage without enough contributors holds `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageOutput {
    BackgroundSubtraction { background: Option<Vec<f64>>, y: Vec<f64> },
    Baseline { baseline: Option<Vec<f64>>, y: Vec<f64> },
    AdjustFrequency { y: Vec<f64>, sampling_rate: f64 },
    Smoothing { y: Vec<f64>, noise_std: Option<f64> },
    SpikeDetection(SpikeResult),
    BurstDetection(BurstResult),
    EventShape(Option<EventShape>),
    PowerSpectrum(Option<PowerSpectrum>),
    SpikeCorrelation(Option<CorrelationResult>),
    AmplitudeCorrelation(Option<CorrelationResult>),
}

impl StageOutput {
    /// Signal re-emitted by raw and processing stages
    pub fn signal(&self) -> Option<&[f64]> {
        match self {
            StageOutput::BackgroundSubtraction { y, .. }
            | StageOutput::Baseline { y, .. }
            | StageOutput::AdjustFrequency { y, .. }
            | StageOutput::Smoothing { y, .. } => Some(y),
            _ => None,
        }
    }

    pub fn sampling_rate(&self) -> Option<f64> {
        match self {
            StageOutput::AdjustFrequency { sampling_rate, .. } => Some(*sampling_rate),
            _ => None,
        }
    }

    pub fn noise_std(&self) -> Option<f64> {
        match self {
            StageOutput::Smoothing { noise_std, .. } => *noise_std,
            _ => None,
        }
    }

    pub fn spikes(&self) -> Option<&SpikeResult> {
        match self {
            StageOutput::SpikeDetection(result) => Some(result),
            _ => None,
        }
    }

    pub fn bursts(&self) -> Option<&BurstResult> {
        match self {
            StageOutput::BurstDetection(result) => Some(result),
            _ => None,
        }
    }

    pub fn correlation(&self) -> Option<&CorrelationResult> {
        match self {
            StageOutput::SpikeCorrelation(result) | StageOutput::AmplitudeCorrelation(result) => result.as_ref(),
            _ => None,
        }
    }
}

/// One configurable step of a pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    kind: StageKind,
    active: bool,
    method: Method,
    records: BTreeMap<Method, ParameterRecord>,
    output: Option<StageOutput>,
}

impl Stage {
    /// Inactive stage with default method and parameters
    pub fn new(kind: StageKind) -> Self {
        let records = kind
            .methods()
            .iter()
            .map(|&m| (m, default_parameters(kind, m)))
            .collect();
        Self {
            kind,
            active: false,
            method: kind.default_method(),
            records,
            output: None,
        }
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Toggle the stage; a toggle resets the output to unset
    pub fn set_active(&mut self, active: bool) {
        if self.active != active {
            self.active = active;
            self.output = None;
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn set_method(&mut self, method: Method) -> NosaResult<()> {
        if !self.kind.methods().contains(&method) {
            return Err(NosaError::UnsupportedMethod {
                stage: self.kind.name().to_string(),
                method: method.name().to_string(),
            });
        }
        self.method = method;
        Ok(())
    }

    /// Parameters of the selected method
    pub fn parameters(&self) -> &ParameterRecord {
        self.record(self.method)
    }

    pub fn record(&self, method: Method) -> &ParameterRecord {
        static EMPTY: ParameterRecord = ParameterRecord {
            parameters: BTreeMap::new(),
        };
        self.records.get(&method).unwrap_or(&EMPTY)
    }

    pub fn records(&self) -> impl Iterator<Item = (Method, &ParameterRecord)> {
        self.records.iter().map(|(&m, r)| (m, r))
    }

    /// Validated update of a parameter of the selected method
    pub fn set_parameter(&mut self, key: &str, value: ParameterValue) -> NosaResult<()> {
        let kind = self.kind;
        let method = self.method;
        self.set_method_parameter(method, key, value)
            .map_err(|e| match e {
                NosaError::UnknownParameter { .. } => NosaError::UnknownParameter {
                    stage: format!("{} / {}", kind.name(), method.name()),
                    key: key.to_string(),
                },
                other => other,
            })
    }

    /// Validated update of a parameter of any method of this stage
    pub fn set_method_parameter(&mut self, method: Method, key: &str, value: ParameterValue) -> NosaResult<()> {
        let kind = self.kind;
        let record = self.records.get_mut(&method).ok_or_else(|| NosaError::UnsupportedMethod {
            stage: kind.name().to_string(),
            method: method.name().to_string(),
        })?;
        let current = record.get_parameter(key).ok_or_else(|| NosaError::UnknownParameter {
            stage: kind.name().to_string(),
            key: key.to_string(),
        })?;
        let value = validate_parameter(kind, key, current, value)?;
        record.set_parameter(key, value);
        Ok(())
    }

    /// Replace a whole record, validating every key against the defaults
    pub fn set_record(&mut self, method: Method, record: &ParameterRecord) -> NosaResult<()> {
        for key in record.keys() {
            if let Some(value) = record.get_parameter(key) {
                self.set_method_parameter(method, key, value.clone())?;
            }
        }
        Ok(())
    }

    pub fn output(&self) -> Option<&StageOutput> {
        self.output.as_ref()
    }

    pub fn set_output(&mut self, output: Option<StageOutput>) {
        self.output = output;
    }

    /// Run the selected method on `input`
    ///
    /// Pure with respect to the stage: the output is returned, not stored.
    pub fn execute(&self, input: &StageInput<'_>) -> StageOutput {
        let params = self.parameters();
        match self.kind {
            StageKind::BackgroundSubtraction => match input.background {
                Some(background) => StageOutput::BackgroundSubtraction {
                    background: Some(background.to_vec()),
                    y: input.y.iter().zip(background).map(|(v, b)| v - b).collect(),
                },
                None => StageOutput::BackgroundSubtraction {
                    background: None,
                    y: input.y.to_vec(),
                },
            },
            StageKind::Baseline => self.execute_baseline(params, input),
            StageKind::AdjustFrequency => {
                let adjustment = input.adjustment;
                let factor = adjustment.adjusted_frequency / input.sampling_rate;
                StageOutput::AdjustFrequency {
                    y: resample(input.y, factor, adjustment.method),
                    sampling_rate: adjustment.adjusted_frequency,
                }
            }
            StageKind::Smoothing => self.execute_smoothing(params, input),
            StageKind::SpikeDetection => {
                let settings = SpikeSettings {
                    threshold: threshold_settings(params),
                    distance_ms: params.get_float("distance", 50.0),
                };
                StageOutput::SpikeDetection(spike_detection(input.y, input.sampling_rate, input.noise_std, &settings))
            }
            StageKind::BurstDetection => {
                let settings = BurstSettings {
                    threshold: threshold_settings(params),
                    absolute_base: params.get_float("absolute_base", 0.0),
                    relative_base: RelativeBase::parse(params.get_str("relative_base", RelativeBase::default().as_str()))
                        .unwrap_or_default(),
                    duration_ms: params.get_float("duration", 50.0),
                    polarity: Polarity::parse(params.get_str("polarity", Polarity::default().as_str())).unwrap_or_default(),
                };
                StageOutput::BurstDetection(burst_detection(input.y, input.sampling_rate, input.noise_std, &settings))
            }
            StageKind::EventShape => {
                let peaks = match self.method {
                    Method::BurstShape => input.burst_times,
                    _ => input.spike_times,
                };
                StageOutput::EventShape(peaks.and_then(|peaks| {
                    event_shape(
                        input.y,
                        peaks,
                        input.sampling_rate,
                        params.get_int("smooth", 3),
                        params.get_interval("interval", (200.0, 200.0)),
                    )
                }))
            }
            StageKind::PowerSpectrum => StageOutput::PowerSpectrum(power_spectrum(
                input.y,
                input.sampling_rate,
                params.get_int("smooth", 3),
                params.get_float("threshold", 0.0),
                params.get_interval("interval", (0.0, 5.0)),
            )),
            StageKind::SpikeCorrelation => StageOutput::SpikeCorrelation(spike_correlation(
                input.contributions,
                params.get_int("binfactor", 1).max(1) as usize,
                params.get_float("maxlag", 1.0),
            )),
            StageKind::AmplitudeCorrelation => {
                let settings = AmplitudeSettings {
                    maxlag: params.get_float("maxlag", 1.0),
                    use_bandpass: params.get_bool("use_bandpass", false),
                    order: params.get_int("order", 4).max(0) as usize,
                    highpass_freq: params.get_float("highpass_freq", 7.0),
                    lowpass_freq: params.get_float("lowpass_freq", 12.0),
                    use_instantaneous: params.get_bool("use_instantaneous", false),
                };
                StageOutput::AmplitudeCorrelation(amplitude_correlation(input.contributions, &settings))
            }
        }
    }

    fn execute_baseline(&self, params: &ParameterRecord, input: &StageInput<'_>) -> StageOutput {
        let y = input.y;
        let intercept = params.get_float("intercept", 0.0);
        let estimate = match self.method {
            Method::AsymmetricLeastSquares => baseline::als(
                y,
                params.get_int("iterations", 1).max(1) as usize,
                params.get_float("smooth", 100.0),
                params.get_float("p", 0.001),
            )
            .map(|b| b.into_iter().map(|v| v + intercept).collect()),
            Method::TopHat => Some(baseline::top_hat(y, params.get_float("factor", 0.1))),
            Method::MovingAverage => Some(moving_average(y, params.get_int("window", 100))),
            _ => {
                let degree = params.get_int("polyorder", 1).max(0) as usize;
                if params.get_bool("use_marker", false) {
                    baseline::polynomial_with_markers(y, &params.get_markers("marker"), intercept, degree)
                } else {
                    let x: Vec<f64> = (0..y.len()).map(|i| i as f64).collect();
                    baseline::polynomial(&x, &x, y, intercept, degree)
                }
            }
        };

        match estimate {
            Some(estimate) => StageOutput::Baseline {
                y: baseline::remove_baseline(y, &estimate, input.filetype),
                baseline: Some(estimate),
            },
            None => {
                warn!("{} baseline is not available for this signal", self.method.name());
                StageOutput::Baseline {
                    baseline: None,
                    y: y.to_vec(),
                }
            }
        }
    }

    fn execute_smoothing(&self, params: &ParameterRecord, input: &StageInput<'_>) -> StageOutput {
        let y = input.y;
        let smoothed = match self.method {
            Method::MovingAverage => Some(moving_average(y, params.get_int("window", 3))),
            Method::Butterworth => {
                let highcut = params
                    .get_float("highcut", 100.0)
                    .min(butterworth_max_cutoff(input.sampling_rate));
                let order = params.get_int("order", 3).max(1) as usize;
                let filter = ButterworthLowpass::design(highcut, input.sampling_rate, order);
                if filter.is_none() {
                    warn!(
                        "Butterworth low-pass at {} Hz is not usable at {} Hz, signal left unfiltered",
                        highcut, input.sampling_rate
                    );
                }
                filter.map(|f| f.filter(y))
            }
            _ => Some(savitzky_golay(
                y,
                params.get_int("window", 3).max(0) as usize,
                params.get_int("polyorder", 3).max(0) as usize,
            )),
        };

        match smoothed {
            Some(smoothed) => {
                let noise: Vec<f64> = y.iter().zip(&smoothed).map(|(a, b)| a - b).collect();
                StageOutput::Smoothing {
                    noise_std: Some(std_dev(&noise)),
                    y: smoothed,
                }
            }
            None => StageOutput::Smoothing {
                y: y.to_vec(),
                noise_std: None,
            },
        }
    }
}

fn threshold_settings(params: &ParameterRecord) -> ThresholdSettings {
    ThresholdSettings {
        dynamic: params.get_bool("dynamic_threshold", false),
        relative: params.get_bool("relative_threshold", false),
        dynamic_smooth: params.get_int("dynamic_smooth", 300),
        absolute_amplitude: params.get_float("absolute_amplitude", 1.0),
        relative_to: RelativeTo::parse(params.get_str("relative_amplitude_type", RelativeTo::default().as_str()))
            .unwrap_or_default(),
        relative_amplitude: params.get_float("relative_amplitude", 1.0),
    }
}

/// Error for parameters that must be set through another path
pub(crate) fn source_driven(kind: StageKind) -> NosaError {
    NosaError::InvalidStageOperation {
        reason: format!("{} is configured through the source", kind.name()),
    }
}

/// Reject marker lists too short for the polynomial degree
pub(crate) fn check_marker_count(markers: &[usize], degree: usize) -> NosaResult<()> {
    if markers.len() < degree + 1 {
        return Err(NosaError::NotEnoughMarkers {
            degree,
            required: degree + 1,
            found: markers.len(),
        });
    }
    Ok(())
}

/// Range error for values checked outside [`validate_parameter`]
pub(crate) fn marker_range_error(marker: usize) -> NosaError {
    range_error!("marker", marker, "inside the signal")
}
