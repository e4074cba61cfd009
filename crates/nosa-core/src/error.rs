//! Error handling for the NOSA pipeline
//!
//! Every configuration violation is rejected with a [`NosaError`] before it
//! can reach the recompute scheduler. Soft numerical failures are not errors;
//! they surface as unavailable values in stage outputs.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for NOSA operations
pub type NosaResult<T> = Result<T, NosaError>;

/// Error type for all NOSA operations
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum NosaError {
    /// Invalid signal data or configuration
    #[error("Invalid signal: {reason}")]
    InvalidSignal {
        /// Description of the problem
        reason: String,
    },

    /// Sampling rate is zero, negative or not finite
    #[error("Invalid sampling rate: {rate}Hz, must be a finite value > 0")]
    InvalidSamplingRate {
        /// Provided sampling rate
        rate: f64,
    },

    /// Crop window outside the recording or empty
    #[error("Invalid crop window [{start}, {end}) for a recording of {len} samples")]
    InvalidCrop {
        start: usize,
        end: usize,
        len: usize,
    },

    /// Replacement data does not match the expected length
    #[error("Length mismatch: expected {expected} samples, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Parameter key not declared by the stage method
    #[error("Unknown parameter '{key}' for {stage}")]
    UnknownParameter { stage: String, key: String },

    /// Parameter value has the wrong type
    #[error("Parameter '{key}' expects {expected}")]
    ParameterType { key: String, expected: &'static str },

    /// Parameter value outside its valid range
    #[error("Parameter '{key}' = {value} out of range, valid range: {valid_range}")]
    ParameterOutOfRange {
        key: String,
        value: String,
        valid_range: &'static str,
    },

    /// Method not available for the stage
    #[error("Method '{method}' is not available for {stage}")]
    UnsupportedMethod { stage: String, method: String },

    /// Not enough baseline markers for the polynomial degree
    #[error("Polynomial degree {degree} needs at least {required} markers, found {found}")]
    NotEnoughMarkers {
        degree: usize,
        required: usize,
        found: usize,
    },

    /// Stage cannot be configured through this path
    #[error("Invalid stage operation: {reason}")]
    InvalidStageOperation { reason: String },

    /// No object with this id
    #[error("Unknown object {id}")]
    UnknownObject { id: Uuid },

    /// No source with this id
    #[error("Unknown source {id}")]
    UnknownSource { id: Uuid },

    /// Image-sequence sources need a region sampler
    #[error("Region sampler required for image-sequence source '{source_name}'")]
    MissingRegionSampler { source_name: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {reason}")]
    Serialization { reason: String },
}

/// Convenience macro for creating signal errors
#[macro_export]
macro_rules! signal_error {
    ($($arg:tt)+) => {
        $crate::error::NosaError::InvalidSignal {
            reason: format!($($arg)+),
        }
    };
}

/// Convenience macro for creating out-of-range parameter errors
#[macro_export]
macro_rules! range_error {
    ($key:expr, $value:expr, $range:literal) => {
        $crate::error::NosaError::ParameterOutOfRange {
            key: $key.to_string(),
            value: $value.to_string(),
            valid_range: $range,
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = NosaError::InvalidCrop {
            start: 10,
            end: 5,
            len: 100,
        };
        let display = format!("{}", error);
        assert!(display.contains("Invalid crop window"));
        assert!(display.contains("[10, 5)"));
        assert!(display.contains("100"));
    }

    #[test]
    fn test_error_macros() {
        let error = signal_error!("empty signal of {} samples", 0);
        assert_eq!(
            error,
            NosaError::InvalidSignal {
                reason: "empty signal of 0 samples".to_string()
            }
        );

        let error = range_error!("p", 1.5, "(0, 1)");
        assert!(format!("{}", error).contains("'p' = 1.5"));
    }
}
