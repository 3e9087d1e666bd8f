//! Camera frame sources.
//!
//! This module provides different backends for live capture streams:
//! - Synthetic `stub://` cameras (tests, demos, hosts without a camera)
//! - USB/V4L2 devices (feature: camera-v4l2)
//!
//! A backend enumerates devices and opens streams. A stream is refreshed once
//! per display refresh and reports whether a new frame arrived since the
//! previous refresh; the controller copies that frame out as tightly packed
//! RGB24.

#[cfg(feature = "camera-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "camera-v4l2")]
pub mod v4l2;

use std::time::Duration;

use anyhow::Result;

pub use synthetic::{SyntheticCamera, SyntheticCameraBackend};
#[cfg(feature = "camera-v4l2")]
pub use v4l2::V4l2CameraBackend;

/// An enumerated camera.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraDevice {
    /// Identity used to open the device.
    pub name: String,
    pub is_front_facing: bool,
}

impl CameraDevice {
    pub fn new(name: impl Into<String>, is_front_facing: bool) -> Self {
        Self {
            name: name.into(),
            is_front_facing,
        }
    }
}

/// Capture parameters asked of the backend. The backend may negotiate others.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamRequest {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for StreamRequest {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 30,
        }
    }
}

/// Enumerates and opens cameras.
pub trait CameraBackend {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    fn devices(&self) -> Result<Vec<CameraDevice>>;

    /// Open a stream. The stream is created stopped; call `play`.
    fn open(&mut self, device: &CameraDevice, request: StreamRequest)
        -> Result<Box<dyn CameraStream>>;
}

/// A live capture stream.
pub trait CameraStream {
    fn device_name(&self) -> &str;

    fn requested_fps(&self) -> u32;

    /// Begin or resume frame delivery.
    fn play(&mut self) -> Result<()>;

    /// Suspend frame delivery, keeping the device open.
    fn pause(&mut self);

    /// Stop delivery and release the device. Safe to call more than once.
    fn stop(&mut self);

    fn is_playing(&self) -> bool;

    /// Advance by one display refresh of length `dt`.
    fn refresh(&mut self, dt: Duration);

    /// True when the last `refresh` delivered a new frame.
    fn did_update_this_frame(&self) -> bool;

    /// Current capture width. May be a placeholder (≤16) before the first frame.
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Clockwise rotation of the sensor image, degrees.
    fn rotation_angle(&self) -> i32;

    fn vertically_mirrored(&self) -> bool;

    /// Copy the latest frame as RGB24 into `dst`, which must be exactly
    /// `width * height * 3` bytes.
    fn copy_rgb24(&self, dst: &mut [u8]) -> Result<()>;
}

/// Build the backend for a configured camera source.
///
/// `stub://...` selects the synthetic backend; anything else names a V4L2
/// device path or directory.
pub fn backend_for_source(source: &str) -> Result<Box<dyn CameraBackend>> {
    if source.starts_with("stub://") {
        return Ok(Box::new(SyntheticCameraBackend::from_source(source)?));
    }
    #[cfg(feature = "camera-v4l2")]
    {
        Ok(Box::new(V4l2CameraBackend::new(source)))
    }
    #[cfg(not(feature = "camera-v4l2"))]
    {
        anyhow::bail!(
            "camera source '{}' requires the camera-v4l2 feature",
            source
        )
    }
}

/// Prefer the first device that is not front facing, else the first device.
pub fn select_device(devices: &[CameraDevice]) -> Option<&CameraDevice> {
    devices
        .iter()
        .find(|device| !device.is_front_facing)
        .or_else(|| devices.first())
}

/// The first device whose identity differs from `current`.
pub fn next_device<'a>(devices: &'a [CameraDevice], current: &str) -> Option<&'a CameraDevice> {
    devices.iter().find(|device| device.name != current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_rear_camera() {
        let devices = vec![
            CameraDevice::new("cam0", true),
            CameraDevice::new("cam1", false),
        ];
        assert_eq!(select_device(&devices).unwrap().name, "cam1");
    }

    #[test]
    fn falls_back_to_first_device() {
        let devices = vec![
            CameraDevice::new("selfie", true),
            CameraDevice::new("selfie-wide", true),
        ];
        assert_eq!(select_device(&devices).unwrap().name, "selfie");
        assert!(select_device(&[]).is_none());
    }

    #[test]
    fn next_device_skips_current() {
        let devices = vec![
            CameraDevice::new("cam0", true),
            CameraDevice::new("cam1", false),
        ];
        assert_eq!(next_device(&devices, "cam1").unwrap().name, "cam0");
        assert_eq!(next_device(&devices, "cam0").unwrap().name, "cam1");
        assert!(next_device(&devices[..1], "cam0").is_none());
    }

    #[test]
    fn stub_sources_use_synthetic_backend() {
        let backend = backend_for_source("stub://cam0:front,cam1").unwrap();
        assert_eq!(backend.name(), "synthetic");
        assert_eq!(backend.devices().unwrap().len(), 2);
    }
}
