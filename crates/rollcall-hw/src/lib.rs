//! rollcall-hw: V4L2 camera capture for the attendance daemon.
//!
//! Negotiates a colour format with the device and hands out RGB frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
