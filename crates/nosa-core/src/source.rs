//! Source: one imported recording shared by its objects

use crate::error::{NosaError, NosaResult};
use crate::signal::{validate_sampling_rate, Signal};
use crate::signal_error;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use uuid::Uuid;

/// Kind of recording a source was imported from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    /// Fluorescence image stack; objects are regions of interest
    ImageSequence,
    /// Electrophysiology trace; objects use the trace directly
    Electrophysiology,
}

impl FileType {
    /// Prefix used when naming new objects
    pub fn object_prefix(&self) -> &'static str {
        match self {
            FileType::ImageSequence => "ROI",
            FileType::Electrophysiology => "ABF",
        }
    }
}

/// Interpolation used when the sampling rate is adjusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum InterpolationMethod {
    #[default]
    Nearest,
    Linear,
    Cubic,
}

impl InterpolationMethod {
    pub fn name(&self) -> &'static str {
        match self {
            InterpolationMethod::Nearest => "Nearest Neighbour",
            InterpolationMethod::Linear => "Linear",
            InterpolationMethod::Cubic => "Cubic",
        }
    }
}

/// Data handed over by a file importer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportedRecording {
    pub name: String,
    /// Per-frame (image) or per-sample (electrophysiology) values
    pub samples: Vec<f64>,
    pub sampling_rate: f64,
    pub filetype: FileType,
    pub unit: String,
}

/// Frequency adjustment settings of a source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyAdjustment {
    pub active: bool,
    pub adjusted_frequency: f64,
    pub method: InterpolationMethod,
}

impl Default for FrequencyAdjustment {
    fn default() -> Self {
        Self {
            active: false,
            adjusted_frequency: 250.0,
            method: InterpolationMethod::Nearest,
        }
    }
}

/// One imported recording with crop window, offset and rate settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub name: String,
    /// Short numeric label used in object names
    pub short_name: usize,
    pub filetype: FileType,
    pub unit: String,
    pub original_frequency: f64,
    adjustment: FrequencyAdjustment,
    start: usize,
    end: usize,
    offset: f64,
    samples: Vec<f64>,
    corrected: Option<Vec<f64>>,
    object_number: usize,
}

impl Source {
    /// Create a source covering the whole recording
    pub fn from_recording(recording: ImportedRecording, short_name: usize) -> NosaResult<Self> {
        // Validates rate and length
        let signal = Signal::new(recording.samples, recording.sampling_rate, 0.0)?;
        let end = signal.len();

        Ok(Source {
            id: Uuid::new_v4(),
            name: recording.name,
            short_name,
            filetype: recording.filetype,
            unit: recording.unit,
            original_frequency: signal.sampling_rate,
            adjustment: FrequencyAdjustment::default(),
            start: 0,
            end,
            offset: 0.0,
            samples: signal.samples,
            corrected: None,
            object_number: 1,
        })
    }

    pub fn is_image_sequence(&self) -> bool {
        self.filetype == FileType::ImageSequence
    }

    /// Active sampling rate
    pub fn frequency(&self) -> f64 {
        if self.adjustment.active {
            self.adjustment.adjusted_frequency
        } else {
            self.original_frequency
        }
    }

    pub fn adjustment(&self) -> FrequencyAdjustment {
        self.adjustment
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Frame indices of the crop window
    pub fn frame_range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Number of samples in the full recording
    pub fn max_end_frame(&self) -> usize {
        self.samples.len()
    }

    /// Samples in the crop window at the active rate
    pub fn adjusted_len(&self) -> usize {
        resampled_len(self.original_frequency, &self.adjustment, self.end - self.start)
    }

    /// Time axis of the crop window at the active rate
    pub fn seconds_range(&self) -> Vec<f64> {
        let freq = self.frequency();
        let num = self.adjusted_len();
        let first = self.start as f64 / self.original_frequency;
        let last = self.end as f64 / self.original_frequency - 1.0 / freq;

        linspace(first, last, num)
            .into_iter()
            .map(|t| self.offset + t)
            .collect()
    }

    /// Motion-corrected samples when present, else the cropped recording
    pub fn data(&self) -> &[f64] {
        match &self.corrected {
            Some(corrected) => corrected,
            None => &self.samples[self.start..self.end],
        }
    }

    /// Cropped recording without motion correction
    pub fn original_data(&self) -> &[f64] {
        &self.samples[self.start..self.end]
    }

    pub fn has_corrected_data(&self) -> bool {
        self.corrected.is_some()
    }

    /// Change the crop window; discards motion-corrected samples
    ///
    /// The window must keep at least one sample at the active rate.
    pub fn set_crop(&mut self, start: usize, end: usize) -> NosaResult<()> {
        if start >= end
            || end > self.samples.len()
            || resampled_len(self.original_frequency, &self.adjustment, end - start) == 0
        {
            return Err(NosaError::InvalidCrop {
                start,
                end,
                len: self.samples.len(),
            });
        }
        self.start = start;
        self.end = end;
        self.corrected = None;
        Ok(())
    }

    pub fn set_offset(&mut self, offset: f64) -> NosaResult<()> {
        if !offset.is_finite() {
            return Err(signal_error!("offset {} is not finite", offset));
        }
        self.offset = offset;
        Ok(())
    }

    /// Substitute motion-corrected samples for the crop window
    pub fn set_corrected_data(&mut self, corrected: Vec<f64>) -> NosaResult<()> {
        let expected = self.end - self.start;
        if corrected.len() != expected {
            return Err(NosaError::LengthMismatch {
                expected,
                actual: corrected.len(),
            });
        }
        self.corrected = Some(corrected);
        Ok(())
    }

    /// Change the frequency adjustment
    ///
    /// Rejected when the crop window would shrink to no samples.
    pub fn set_frequency_adjustment(&mut self, adjustment: FrequencyAdjustment) -> NosaResult<()> {
        validate_sampling_rate(adjustment.adjusted_frequency)?;
        if resampled_len(self.original_frequency, &adjustment, self.end - self.start) == 0 {
            return Err(NosaError::InvalidSamplingRate {
                rate: adjustment.adjusted_frequency,
            });
        }
        self.adjustment = adjustment;
        Ok(())
    }

    /// Name for the next object created on this source
    pub fn next_object_name(&mut self) -> String {
        let name = format!(
            "{} {} - {}",
            self.filetype.object_prefix(),
            self.short_name,
            self.object_number
        );
        self.object_number += 1;
        name
    }
}

/// Length of `frames` samples after the adjustment, `round(f/f0 · frames)`
fn resampled_len(original_frequency: f64, adjustment: &FrequencyAdjustment, frames: usize) -> usize {
    if !adjustment.active {
        return frames;
    }
    (adjustment.adjusted_frequency / original_frequency * frames as f64).round() as usize
}

/// Evenly spaced values over `[first, last]`, both ends included
pub fn linspace(first: f64, last: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![first],
        _ => {
            let step = (last - first) / (num - 1) as f64;
            (0..num)
                .map(|i| {
                    if i == num - 1 {
                        last
                    } else {
                        first + i as f64 * step
                    }
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording(len: usize, rate: f64) -> ImportedRecording {
        ImportedRecording {
            name: "trace.abf".to_string(),
            samples: (0..len).map(|i| i as f64).collect(),
            sampling_rate: rate,
            filetype: FileType::Electrophysiology,
            unit: "mV".to_string(),
        }
    }

    #[test]
    fn test_source_from_recording() {
        let source = Source::from_recording(recording(100, 50.0), 1).unwrap();

        assert_eq!(source.frame_range(), 0..100);
        assert_eq!(source.frequency(), 50.0);
        assert_eq!(source.data().len(), 100);
        assert!(!source.is_image_sequence());
    }

    #[test]
    fn test_crop_validation() {
        let mut source = Source::from_recording(recording(100, 50.0), 1).unwrap();

        assert!(source.set_crop(10, 10).is_err());
        assert!(source.set_crop(20, 10).is_err());
        assert!(source.set_crop(0, 101).is_err());

        source.set_crop(10, 30).unwrap();
        assert_eq!(source.data(), &(10..30).map(|i| i as f64).collect::<Vec<_>>()[..]);
    }

    #[test]
    fn test_corrected_data() {
        let mut source = Source::from_recording(recording(100, 50.0), 1).unwrap();
        source.set_crop(0, 10).unwrap();

        assert_eq!(
            source.set_corrected_data(vec![1.0; 5]),
            Err(NosaError::LengthMismatch {
                expected: 10,
                actual: 5
            })
        );

        source.set_corrected_data(vec![1.0; 10]).unwrap();
        assert_eq!(source.data(), &[1.0; 10]);
        assert_eq!(source.original_data()[9], 9.0);

        // Cropping invalidates the correction
        source.set_crop(0, 20).unwrap();
        assert!(!source.has_corrected_data());
    }

    #[test]
    fn test_seconds_range() {
        let mut source = Source::from_recording(recording(100, 10.0), 1).unwrap();
        source.set_crop(10, 20).unwrap();
        source.set_offset(2.0).unwrap();

        let seconds = source.seconds_range();
        assert_eq!(seconds.len(), 10);
        assert!((seconds[0] - 3.0).abs() < 1e-12);
        assert!((seconds[9] - 3.9).abs() < 1e-12);

        source
            .set_frequency_adjustment(FrequencyAdjustment {
                active: true,
                adjusted_frequency: 20.0,
                method: InterpolationMethod::Linear,
            })
            .unwrap();
        let seconds = source.seconds_range();
        assert_eq!(source.frequency(), 20.0);
        assert_eq!(seconds.len(), 20);
        assert!((seconds[19] - 3.95).abs() < 1e-12);
    }

    #[test]
    fn test_adjustment_keeps_samples() {
        let mut source = Source::from_recording(recording(10, 100.0), 1).unwrap();
        let too_slow = FrequencyAdjustment {
            active: true,
            adjusted_frequency: 1.0,
            method: InterpolationMethod::Linear,
        };
        assert_eq!(
            source.set_frequency_adjustment(too_slow),
            Err(NosaError::InvalidSamplingRate { rate: 1.0 })
        );
        assert!(!source.adjustment().active);
        assert_eq!(source.seconds_range().len(), 10);

        // 10 samples at 100 Hz become 1 sample at 10 Hz; a 2-sample crop would become none
        let slower = FrequencyAdjustment {
            adjusted_frequency: 10.0,
            ..too_slow
        };
        source.set_frequency_adjustment(slower).unwrap();
        assert_eq!(source.adjusted_len(), 1);
        assert!(matches!(source.set_crop(0, 2), Err(NosaError::InvalidCrop { .. })));
        assert_eq!(source.frame_range(), 0..10);
        assert_eq!(source.seconds_range().len(), 1);
    }

    #[test]
    fn test_object_names() {
        let mut source = Source::from_recording(recording(10, 10.0), 3).unwrap();
        assert_eq!(source.next_object_name(), "ABF 3 - 1");
        assert_eq!(source.next_object_name(), "ABF 3 - 2");
    }

    #[test]
    fn test_invalid_adjustment_rate() {
        let mut source = Source::from_recording(recording(10, 10.0), 1).unwrap();
        let adjustment = FrequencyAdjustment {
            active: true,
            adjusted_frequency: 0.0,
            method: InterpolationMethod::Cubic,
        };
        assert!(source.set_frequency_adjustment(adjustment).is_err());
        assert_eq!(source.frequency(), 10.0);
    }
}
