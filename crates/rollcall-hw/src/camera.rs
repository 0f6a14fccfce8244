//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Motion JPEG, one JPEG per buffer.
    Mjpeg,
}

impl PixelFormat {
    fn fourcc(self) -> FourCC {
        match self {
            PixelFormat::Yuyv => FourCC::new(b"YUYV"),
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
        }
    }
}

/// V4L2 camera device handle.
///
/// The mmap stream is started on the first capture and stays on until the
/// camera is dropped.
pub struct Camera {
    stream: Option<MmapStream<'static>>,
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let (pixel_format, width, height) = negotiate(&device)?;

        tracing::info!(width, height, format = ?pixel_format, "negotiated format");

        Ok(Self {
            stream: None,
            device,
            width,
            height,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Dequeue the next frame from the running stream, converted to RGB.
    ///
    /// A dequeue failure tears the stream down; the next call starts a fresh one.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        let device = &self.device;
        let stream = reuse_or_start(&mut self.stream, || {
            tracing::debug!("starting mmap stream");
            MmapStream::with_buffers(device, BufType::VideoCapture, STREAM_BUFFERS).map_err(|e| {
                CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })
        })?;

        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            Err(e) => {
                self.stream = None;
                return Err(CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")));
            }
        };

        let used = (meta.bytesused as usize).min(buf.len());
        let payload = if used > 0 { &buf[..used] } else { buf };

        let image = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(payload, self.width, self.height),
            PixelFormat::Mjpeg => frame::mjpeg_to_rgb(payload),
        }
        .map_err(|e| CameraError::CaptureFailed(format!("frame conversion failed: {e}")))?;

        Ok(Frame {
            image,
            timestamp: std::time::Instant::now(),
            sequence: meta.sequence,
        })
    }

    /// Whether the capture stream is currently on.
    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

/// Hand back the live stream in `slot`, starting one only if there is none.
fn reuse_or_start<T, E>(slot: &mut Option<T>, start: impl FnOnce() -> Result<T, E>) -> Result<&mut T, E> {
    let stream = match slot.take() {
        Some(stream) => stream,
        None => start()?,
    };
    Ok(slot.insert(stream))
}

/// Ask for 640×480 YUYV, then MJPEG. Returns whichever the driver accepts.
fn negotiate(device: &Device) -> Result<(PixelFormat, u32, u32), CameraError> {
    let mut fmt = device.format().map_err(|e| {
        CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
    })?;

    for wanted in [PixelFormat::Yuyv, PixelFormat::Mjpeg] {
        fmt.fourcc = wanted.fourcc();
        fmt.width = CAPTURE_WIDTH;
        fmt.height = CAPTURE_HEIGHT;

        let negotiated = match device.set_format(&fmt) {
            Ok(negotiated) => negotiated,
            Err(e) => {
                tracing::debug!(format = ?wanted, error = %e, "set_format rejected");
                continue;
            }
        };

        if negotiated.fourcc == wanted.fourcc() {
            return Ok((wanted, negotiated.width, negotiated.height));
        }
        tracing::debug!(wanted = ?wanted, got = ?negotiated.fourcc, "driver substituted format");
    }

    Err(CameraError::FormatNegotiationFailed(
        "device offers neither YUYV nor MJPG".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_fourcc() {
        assert_eq!(PixelFormat::Yuyv.fourcc(), FourCC::new(b"YUYV"));
        assert_eq!(PixelFormat::Mjpeg.fourcc(), FourCC::new(b"MJPG"));
    }

    #[test]
    fn test_stream_started_once_and_reused() {
        let mut slot: Option<u32> = None;
        let mut starts = 0;
        for _ in 0..5 {
            let stream = reuse_or_start(&mut slot, || {
                starts += 1;
                Ok::<_, CameraError>(7)
            })
            .unwrap();
            *stream += 1;
        }
        assert_eq!(starts, 1);
        assert_eq!(slot, Some(12));
    }

    #[test]
    fn test_stream_start_failure_leaves_slot_empty() {
        let mut slot: Option<u32> = None;
        let err = reuse_or_start(&mut slot, || Err(CameraError::CaptureFailed("no buffers".into())));
        assert!(err.is_err());
        assert!(slot.is_none());

        // The next attempt starts again.
        assert_eq!(*reuse_or_start(&mut slot, || Ok::<_, CameraError>(1)).unwrap(), 1);
    }

    #[test]
    fn test_open_missing_device() {
        let err = Camera::open("/dev/does-not-exist-video99").err().unwrap();
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
    }
}
