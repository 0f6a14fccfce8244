//! Preview output: the latest annotated frame as a JPEG on disk.

use image::{ImageFormat, RgbImage};
use rollcall_core::{DiscardSink, FrameSink};
use std::path::PathBuf;

/// Writes each presented frame to `path`, replacing it atomically.
pub struct JpegPreview {
    path: PathBuf,
    tmp: PathBuf,
    failing: bool,
}

impl JpegPreview {
    pub fn new(path: PathBuf) -> Self {
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        Self {
            path,
            tmp: PathBuf::from(tmp),
            failing: false,
        }
    }

    fn write(&self, frame: &RgbImage) -> Result<(), image::ImageError> {
        frame.save_with_format(&self.tmp, ImageFormat::Jpeg)?;
        std::fs::rename(&self.tmp, &self.path)?;
        Ok(())
    }
}

impl FrameSink for JpegPreview {
    fn present(&mut self, frame: &RgbImage) {
        match self.write(frame) {
            Ok(()) => {
                if self.failing {
                    tracing::info!(path = %self.path.display(), "preview writes recovered");
                    self.failing = false;
                }
            }
            Err(e) => {
                if !self.failing {
                    tracing::warn!(path = %self.path.display(), error = %e, "failed to write preview frame");
                    self.failing = true;
                }
            }
        }
    }
}

/// Preview sink for the configured path, or one that drops frames.
pub fn sink_for(path: Option<PathBuf>) -> Box<dyn FrameSink + Send> {
    match path {
        Some(path) => {
            tracing::info!(path = %path.display(), "writing preview frames");
            Box::new(JpegPreview::new(path))
        }
        None => Box::new(DiscardSink),
    }
}
