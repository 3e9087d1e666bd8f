//! Synthetic camera backend.
//!
//! `stub://` sources produce generated frames with no hardware. The source
//! string lists devices as comma-separated `name[:front|:back]` entries, e.g.
//! `stub://cam0:front,cam1:back`. `stub://` alone enumerates no devices.
//!
//! Streams deliver frames at the requested rate measured in refresh time, so
//! a refresh shorter than the frame interval reports no new frame.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};

use super::{CameraBackend, CameraDevice, CameraStream, StreamRequest};
use crate::display::{rgb24_len, DEGENERATE_DIMENSION};

/// Behaviour shared by every stream the backend opens.
#[derive(Clone, Debug, Default)]
struct SyntheticProfile {
    /// Size the "hardware" negotiates instead of the requested one.
    negotiated: Option<(u32, u32)>,
    rotation: i32,
    mirrored: bool,
    /// Accept the open but never deliver a frame.
    stalled: bool,
}

/// Backend producing generated frames.
#[derive(Debug)]
pub struct SyntheticCameraBackend {
    devices: Vec<CameraDevice>,
    profile: SyntheticProfile,
    released: Arc<AtomicUsize>,
}

impl SyntheticCameraBackend {
    pub fn new(devices: Vec<CameraDevice>) -> Self {
        Self {
            devices,
            profile: SyntheticProfile::default(),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Parse a `stub://` source string.
    pub fn from_source(source: &str) -> Result<Self> {
        let list = source
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("synthetic camera source must start with stub://"))?;
        let mut devices = Vec::new();
        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, facing) = entry.split_once(':').unwrap_or((entry, "back"));
            let is_front_facing = match facing {
                "front" => true,
                "back" => false,
                other => {
                    return Err(anyhow!(
                        "unknown facing '{}' for synthetic camera '{}'",
                        other,
                        name
                    ))
                }
            };
            devices.push(CameraDevice::new(name, is_front_facing));
        }
        Ok(Self::new(devices))
    }

    /// Negotiate `width`x`height` regardless of the request.
    pub fn with_negotiated_size(mut self, width: u32, height: u32) -> Self {
        self.profile.negotiated = Some((width, height));
        self
    }

    pub fn with_rotation(mut self, degrees: i32) -> Self {
        self.profile.rotation = degrees;
        self
    }

    pub fn with_mirroring(mut self, mirrored: bool) -> Self {
        self.profile.mirrored = mirrored;
        self
    }

    /// Streams open and play but never deliver frames.
    pub fn with_stalled_streams(mut self) -> Self {
        self.profile.stalled = true;
        self
    }

    /// Counter of device releases across all streams opened by this backend.
    pub fn release_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.released)
    }
}

impl CameraBackend for SyntheticCameraBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn devices(&self) -> Result<Vec<CameraDevice>> {
        Ok(self.devices.clone())
    }

    fn open(
        &mut self,
        device: &CameraDevice,
        request: StreamRequest,
    ) -> Result<Box<dyn CameraStream>> {
        if !self.devices.iter().any(|d| d.name == device.name) {
            return Err(anyhow!("no synthetic camera named '{}'", device.name));
        }
        log::info!(
            "SyntheticCamera: opened {} (requested {}x{} @ {} fps)",
            device.name,
            request.width,
            request.height,
            request.fps
        );
        Ok(Box::new(SyntheticCamera::new(
            device.name.clone(),
            request,
            self.profile.clone(),
            Arc::clone(&self.released),
        )))
    }
}

/// A generated capture stream.
pub struct SyntheticCamera {
    device_name: String,
    request: StreamRequest,
    profile: SyntheticProfile,
    playing: bool,
    released: bool,
    release_counter: Arc<AtomicUsize>,
    since_last_frame: Duration,
    frame_count: u64,
    updated: bool,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl SyntheticCamera {
    fn new(
        device_name: String,
        request: StreamRequest,
        profile: SyntheticProfile,
        release_counter: Arc<AtomicUsize>,
    ) -> Self {
        let interval = frame_interval(request.fps);
        Self {
            device_name,
            request,
            profile,
            playing: false,
            released: false,
            release_counter,
            // The first refresh after play delivers a frame.
            since_last_frame: interval,
            frame_count: 0,
            updated: false,
            width: DEGENERATE_DIMENSION,
            height: DEGENERATE_DIMENSION,
            pixels: Vec::new(),
        }
    }

    fn capture_size(&self) -> (u32, u32) {
        self.profile
            .negotiated
            .unwrap_or((self.request.width, self.request.height))
    }

    /// Generate a moving gradient so consecutive frames differ.
    fn generate_frame(&mut self) {
        self.frame_count += 1;
        let (width, height) = self.capture_size();
        self.width = width;
        self.height = height;
        let len = rgb24_len(width, height);
        if self.pixels.len() != len {
            self.pixels = vec![0u8; len];
        }
        for (i, pixel) in self.pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count) % 256) as u8;
        }
    }
}

impl CameraStream for SyntheticCamera {
    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn requested_fps(&self) -> u32 {
        self.request.fps
    }

    fn play(&mut self) -> Result<()> {
        if self.released {
            return Err(anyhow!("synthetic camera {} was stopped", self.device_name));
        }
        self.playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.playing = false;
    }

    fn stop(&mut self) {
        self.playing = false;
        self.updated = false;
        if !self.released {
            self.released = true;
            self.pixels = Vec::new();
            self.release_counter.fetch_add(1, Ordering::SeqCst);
            log::debug!("SyntheticCamera: released {}", self.device_name);
        }
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn refresh(&mut self, dt: Duration) {
        self.updated = false;
        if !self.playing || self.profile.stalled {
            return;
        }
        let interval = frame_interval(self.request.fps);
        self.since_last_frame += dt;
        if self.since_last_frame >= interval {
            // Drop any backlog: one frame per refresh at most.
            self.since_last_frame = (self.since_last_frame - interval).min(interval);
            self.generate_frame();
            self.updated = true;
        }
    }

    fn did_update_this_frame(&self) -> bool {
        self.updated
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn rotation_angle(&self) -> i32 {
        self.profile.rotation
    }

    fn vertically_mirrored(&self) -> bool {
        self.profile.mirrored
    }

    fn copy_rgb24(&self, dst: &mut [u8]) -> Result<()> {
        if self.pixels.is_empty() {
            return Err(anyhow!("no frame captured yet"));
        }
        if dst.len() != self.pixels.len() {
            return Err(anyhow!(
                "destination holds {} bytes, frame has {}",
                dst.len(),
                self.pixels.len()
            ));
        }
        dst.copy_from_slice(&self.pixels);
        Ok(())
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.stop();
    }
}

fn frame_interval(fps: u32) -> Duration {
    if fps == 0 {
        Duration::ZERO
    } else {
        Duration::from_secs(1) / fps
    }
}
