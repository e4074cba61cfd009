//! Event shape averaging around spike or burst peaks

use crate::filters::moving_average;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventShape {
    /// One window per event, `left + right` samples each
    pub shapes: Vec<Vec<f64>>,
    pub mean_shape: Vec<f64>,
    pub mean_shape_smoothed: Vec<f64>,
}

/// Window of `left` samples before and `right` samples from `peak`, edge
/// samples repeated outside the signal
pub fn event_window(y: &[f64], peak: usize, left: usize, right: usize) -> Vec<f64> {
    let n = y.len() as isize;
    let peak = peak as isize;
    (peak - left as isize..peak + right as isize)
        .map(|i| y[i.clamp(0, n - 1) as usize])
        .collect()
}

/// Average shape of events given by peak index, interval in ms
///
/// `None` when there are no events or the window is empty.
pub fn event_shape(y: &[f64], peaks: &[usize], sampling_rate: f64, smooth: i64, interval_ms: (f64, f64)) -> Option<EventShape> {
    if peaks.is_empty() || y.is_empty() {
        return None;
    }
    let left = (interval_ms.0 * sampling_rate / 1000.0).round().max(0.0) as usize;
    let right = (interval_ms.1 * sampling_rate / 1000.0).round().max(0.0) as usize;
    if left + right == 0 {
        return None;
    }

    let shapes: Vec<Vec<f64>> = peaks
        .iter()
        .map(|&peak| event_window(y, peak, left, right))
        .collect();

    let count = shapes.len() as f64;
    let mean_shape: Vec<f64> = (0..left + right)
        .map(|k| shapes.iter().map(|s| s[k]).sum::<f64>() / count)
        .collect();
    let mean_shape_smoothed = moving_average(&mean_shape, smooth);

    Some(EventShape {
        shapes,
        mean_shape,
        mean_shape_smoothed,
    })
}
