//! V4L2 camera as the pipeline's video source.

use rollcall_core::{SourceError, VideoSource};
use rollcall_hw::{Camera, CameraError};
use image::RgbImage;

/// Opens the device on `open` and drops it on `release`, so the camera is
/// only held while the pipeline runs. The capture stream lives inside the
/// [`Camera`] and goes down with it.
pub struct V4lSource {
    device_path: String,
    camera: Option<Camera>,
}

impl V4lSource {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
            camera: None,
        }
    }
}

impl VideoSource for V4lSource {
    fn open(&mut self) -> Result<(), SourceError> {
        if self.camera.is_some() {
            return Ok(());
        }
        let camera = Camera::open(&self.device_path).map_err(|e| match e {
            CameraError::DeviceBusy => SourceError::Unavailable(format!("{} is busy", self.device_path)),
            other => SourceError::Unavailable(other.to_string()),
        })?;
        tracing::info!(
            device = %self.device_path,
            width = camera.width,
            height = camera.height,
            format = ?camera.pixel_format(),
            "camera acquired"
        );
        self.camera = Some(camera);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<RgbImage, SourceError> {
        let camera = self
            .camera
            .as_mut()
            .ok_or_else(|| SourceError::Read("camera not open".to_string()))?;
        camera
            .capture_frame()
            .map(|frame| frame.into_image())
            .map_err(|e| SourceError::Read(e.to_string()))
    }

    fn release(&mut self) {
        if let Some(camera) = self.camera.take() {
            tracing::info!(
                device = %self.device_path,
                streaming = camera.is_streaming(),
                "camera released"
            );
        }
    }
}
