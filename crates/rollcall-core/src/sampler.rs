//! Frame sampling: every other pulled frame goes through perception, on a
//! downscaled working copy.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;

/// Default linear downscale factor for the working copy.
pub const DEFAULT_SCALE: f32 = 0.25;

#[derive(Debug, Clone)]
pub struct FrameSampler {
    scale: f32,
    process_next: bool,
}

impl FrameSampler {
    /// `scale` must be in `(0, 1]`; anything else falls back to [`DEFAULT_SCALE`].
    pub fn new(scale: f32) -> Self {
        let scale = if scale > 0.0 && scale <= 1.0 {
            scale
        } else {
            tracing::warn!(scale, default = DEFAULT_SCALE, "invalid downscale factor, using default");
            DEFAULT_SCALE
        };
        Self {
            scale,
            process_next: true,
        }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Decide whether the frame just pulled is processed, and advance the
    /// alternation. Call exactly once per pulled frame.
    pub fn should_process(&mut self) -> bool {
        let process = self.process_next;
        self.process_next = !self.process_next;
        process
    }

    /// Make the next pulled frame a processed one.
    pub fn reset(&mut self) {
        self.process_next = true;
    }

    /// Working copy for perception.
    pub fn downscale(&self, frame: &RgbImage) -> RgbImage {
        if self.scale == 1.0 {
            return frame.clone();
        }
        let w = ((frame.width() as f32 * self.scale).round() as u32).max(1);
        let h = ((frame.height() as f32 * self.scale).round() as u32).max(1);
        imageops::resize(frame, w, h, FilterType::Triangle)
    }

    /// Map a box from working-copy space back to the display frame.
    pub fn upscale_box(&self, bbox: &BoundingBox) -> BoundingBox {
        bbox.scaled(1.0 / self.scale)
    }
}

impl Default for FrameSampler {
    fn default() -> Self {
        Self::new(DEFAULT_SCALE)
    }
}
