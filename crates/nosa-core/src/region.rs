//! Region geometry and region-mean extraction for image-sequence sources
//!
//! The core never touches image data directly. Image-side collaborators
//! implement [`RegionSampler`]; [`FrameStack`] is a plain in-memory
//! implementation over row-major frames.

use crate::error::{NosaError, NosaResult};
use crate::source::Source;
use crate::signal_error;
use serde::{Deserialize, Serialize};

/// Outline of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RegionShape {
    #[default]
    Ellipse,
    Rectangle,
}

/// Region of interest: corner position, size and rotation (degrees) around the corner
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub position: (f64, f64),
    pub size: (f64, f64),
    pub angle: f64,
    pub shape: RegionShape,
}

impl Default for Region {
    fn default() -> Self {
        Self {
            position: (10.0, 10.0),
            size: (20.0, 20.0),
            angle: 0.0,
            shape: RegionShape::Ellipse,
        }
    }
}

impl Region {
    pub fn new(position: (f64, f64), size: (f64, f64), angle: f64, shape: RegionShape) -> Self {
        Self {
            position,
            size,
            angle,
            shape,
        }
    }

    /// Enlarged region whose border lies `radius` pixels around this one
    pub fn perisomatic(&self, radius: f64) -> Region {
        let angle_of_position = (self.angle - 135.0).to_radians();
        let shift_x = std::f64::consts::SQRT_2 * angle_of_position.cos() * radius / 2.0;
        let shift_y = std::f64::consts::SQRT_2 * angle_of_position.sin() * radius / 2.0;

        Region {
            position: (self.position.0 + shift_x, self.position.1 + shift_y),
            size: (self.size.0 + radius, self.size.1 + radius),
            angle: self.angle,
            shape: self.shape,
        }
    }

    /// Whether the point lies inside the region
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let (w, h) = self.size;
        if w <= 0.0 || h <= 0.0 {
            return false;
        }
        let dx = x - self.position.0;
        let dy = y - self.position.1;
        let (sin, cos) = self.angle.to_radians().sin_cos();
        let lx = dx * cos + dy * sin;
        let ly = -dx * sin + dy * cos;

        match self.shape {
            RegionShape::Rectangle => (0.0..w).contains(&lx) && (0.0..h).contains(&ly),
            RegionShape::Ellipse => {
                let ex = (lx - w / 2.0) / (w / 2.0);
                let ey = (ly - h / 2.0) / (h / 2.0);
                ex * ex + ey * ey <= 1.0
            }
        }
    }
}

/// Per-frame sum over the pixels of a region
#[derive(Debug, Clone, PartialEq)]
pub struct RegionSum {
    pub sums: Vec<f64>,
    pub pixel_count: usize,
}

impl RegionSum {
    pub fn mean(&self) -> Vec<f64> {
        if self.pixel_count == 0 {
            return vec![0.0; self.sums.len()];
        }
        let count = self.pixel_count as f64;
        self.sums.iter().map(|s| s / count).collect()
    }
}

/// Image-side access to region data of a source's crop window
pub trait RegionSampler {
    /// Number of frames in the full (uncropped) stack
    fn frame_count(&self) -> usize;

    /// Per-frame pixel sums of `region` over `source.frame_range()`
    fn region_sum(&self, source: &Source, region: &Region) -> NosaResult<RegionSum>;

    /// Per-frame mean of a region
    fn region_mean(&self, source: &Source, region: &Region) -> NosaResult<Vec<f64>> {
        let sum = self.region_sum(source, region)?;
        if sum.pixel_count == 0 {
            return Err(signal_error!("region contains no pixels"));
        }
        Ok(sum.mean())
    }

    /// Per-frame mean of the ring of `radius` pixels around a region
    fn ring_mean(&self, source: &Source, region: &Region, radius: f64) -> NosaResult<Vec<f64>> {
        let inner = self.region_sum(source, region)?;
        let outer = self.region_sum(source, &region.perisomatic(radius))?;
        let ring_size = outer.pixel_count.saturating_sub(inner.pixel_count);
        if ring_size == 0 {
            return Err(signal_error!("perisomatic ring contains no pixels"));
        }
        Ok(outer
            .sums
            .iter()
            .zip(&inner.sums)
            .map(|(o, i)| (o - i) / ring_size as f64)
            .collect())
    }
}

/// In-memory image stack, one row-major frame per recording sample
#[derive(Debug, Clone)]
pub struct FrameStack {
    pub width: usize,
    pub height: usize,
    frames: Vec<Vec<f64>>,
}

impl FrameStack {
    pub fn new(width: usize, height: usize, frames: Vec<Vec<f64>>) -> NosaResult<Self> {
        if let Some(frame) = frames.iter().find(|f| f.len() != width * height) {
            return Err(NosaError::LengthMismatch {
                expected: width * height,
                actual: frame.len(),
            });
        }
        Ok(Self {
            width,
            height,
            frames,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Mean of every frame, the trace an importer hands over with the stack
    pub fn frame_means(&self) -> Vec<f64> {
        let count = (self.width * self.height).max(1) as f64;
        self.frames
            .iter()
            .map(|f| f.iter().sum::<f64>() / count)
            .collect()
    }

    /// Row-major pixel indices whose centres lie inside the region
    fn pixels(&self, region: &Region) -> Vec<usize> {
        let mut pixels = Vec::new();
        for y in 0..self.height {
            for x in 0..self.width {
                if region.contains(x as f64 + 0.5, y as f64 + 0.5) {
                    pixels.push(y * self.width + x);
                }
            }
        }
        pixels
    }
}

impl RegionSampler for FrameStack {
    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn region_sum(&self, source: &Source, region: &Region) -> NosaResult<RegionSum> {
        let range = source.frame_range();
        if range.end > self.frames.len() {
            return Err(NosaError::LengthMismatch {
                expected: range.end,
                actual: self.frames.len(),
            });
        }
        let pixels = self.pixels(region);
        let sums = self.frames[range]
            .iter()
            .map(|frame| pixels.iter().map(|&p| frame[p]).sum())
            .collect();

        Ok(RegionSum {
            sums,
            pixel_count: pixels.len(),
        })
    }
}
