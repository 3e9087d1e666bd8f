//! Camera preview with on-device object detection.
//!
//! This crate opens a camera, shows its stream letterboxed inside a viewport,
//! and forwards frames to an externally supplied detection engine whose
//! annotated output replaces the preview image.
//!
//! # Architecture
//!
//! The host drives a single [`CameraController`] from its refresh loop. Two
//! cooperative startup tasks run side by side:
//!
//! 1. **Authorization → stream start**: wait for camera access, pick the first
//!    rear camera, open it and watch for its first frame.
//! 2. **Model staging → detector init**: copy the bundled model into writable
//!    storage and initialize the detector binding with the copy.
//!
//! Once the detector reports ready, every refresh that delivers a new frame
//! runs the detection pipeline.
//!
//! # Module Structure
//!
//! - `camera`: Camera backends and streams (synthetic, V4L2)
//! - `detect`: Detector binding contract, native and no-op bindings
//! - `display`: Display surface, orientation and aspect fit
//! - `pipeline`: Per-frame detection pipeline and reusable frame buffer
//! - `assets`: Model staging into writable storage
//! - `permission`, `watchdog`, `task`: Startup sequencing
//! - `controller`: The component tying it together
//! - `config`: File + environment configuration

pub mod assets;
pub mod camera;
pub mod config;
pub mod controller;
pub mod detect;
pub mod display;
pub mod permission;
pub mod pipeline;
pub mod task;
pub mod watchdog;

pub use assets::{AssetLocation, ModelStaging};
pub use camera::{
    backend_for_source, CameraBackend, CameraDevice, CameraStream, StreamRequest,
    SyntheticCameraBackend,
};
#[cfg(feature = "camera-v4l2")]
pub use camera::V4l2CameraBackend;
pub use config::PreviewConfig;
pub use controller::{CameraController, ControllerSettings, StreamFailure, StreamStatus};
pub use detect::{select_binding, DetectorBinding, EngineKind, NativeEngineBinding, NoOpBinding};
pub use display::{fit_scale, DisplaySurface, FitScale, TextureSource, Tint, Viewport};
pub use permission::{AuthorizationMode, Authorizer, StaticAuthorizer};
pub use pipeline::{DetectionPipeline, FrameBuffer, FrameOutcome, PipelineStats};
pub use task::TaskState;
pub use watchdog::{StartWatchdog, WatchdogState};
