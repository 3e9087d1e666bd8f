//! Camera preview controller.
//!
//! `CameraController` owns the capture stream, the display surface and the
//! detector binding. The host drives it:
//! 1. `start()` once, launching the authorization and model staging tasks
//! 2. `update(dt)` once per display refresh
//! 3. `on_pause` / `on_destroy` from its lifecycle hooks
//!
//! Everything runs on the caller's thread. The two startup tasks do not wait
//! on each other: the pipeline only checks the readiness flag each refresh.

use std::fmt;
use std::time::Duration;

use anyhow::Result;

use crate::assets::ModelStaging;
use crate::camera::{
    backend_for_source, next_device, select_device, CameraBackend, CameraDevice, CameraStream,
    StreamRequest,
};
use crate::config::PreviewConfig;
use crate::detect::{select_binding, DetectorBinding};
use crate::display::{camera_aspect, fit_scale, DisplaySurface, Viewport};
use crate::permission::{Authorizer, PermissionTask};
use crate::pipeline::{DetectionPipeline, FrameOutcome, PipelineStats};
use crate::task::TaskState;
use crate::watchdog::{StartWatchdog, WatchdogState, DEFAULT_START_TIMEOUT};

const MSG_NO_CAMERA: &str = "No camera found";
const MSG_START_FAILED: &str = "Camera failed to start";

/// Why the stream is not running.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamFailure {
    PermissionDenied,
    NoDeviceFound,
    OpenFailed(String),
    /// Opened, but no frame arrived before the start timeout.
    NoFrames,
}

impl fmt::Display for StreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermissionDenied => f.write_str("camera permission denied"),
            Self::NoDeviceFound => f.write_str("no camera devices found"),
            Self::OpenFailed(reason) => write!(f, "failed to open camera: {reason}"),
            Self::NoFrames => f.write_str("camera failed to start or no frames received"),
        }
    }
}

impl std::error::Error for StreamFailure {}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum StreamStatus {
    #[default]
    Idle,
    AwaitingPermission,
    Running,
    Paused,
    Stopped,
    Failed(StreamFailure),
}

#[derive(Clone, Copy, Debug)]
pub struct ControllerSettings {
    pub request: StreamRequest,
    pub start_timeout: Duration,
    pub viewport: Viewport,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            request: StreamRequest::default(),
            start_timeout: DEFAULT_START_TIMEOUT,
            viewport: Viewport {
                width: 1920,
                height: 1080,
            },
        }
    }
}

impl From<&PreviewConfig> for ControllerSettings {
    fn from(cfg: &PreviewConfig) -> Self {
        Self {
            request: cfg.camera.request,
            start_timeout: cfg.camera.start_timeout,
            viewport: cfg.viewport.viewport,
        }
    }
}

pub struct CameraController {
    settings: ControllerSettings,
    camera: Box<dyn CameraBackend>,
    detector: Box<dyn DetectorBinding>,
    authorizer: Box<dyn Authorizer>,
    model: ModelStaging,
    permission: PermissionTask,
    started: bool,
    model_settled: bool,
    stream: Option<Box<dyn CameraStream>>,
    camera_initialized: bool,
    watchdog: Option<StartWatchdog>,
    detector_ready: bool,
    display: DisplaySurface,
    pipeline: DetectionPipeline,
    status: StreamStatus,
}

impl CameraController {
    pub fn new(
        settings: ControllerSettings,
        camera: Box<dyn CameraBackend>,
        detector: Box<dyn DetectorBinding>,
        authorizer: Box<dyn Authorizer>,
        model: ModelStaging,
    ) -> Self {
        Self {
            settings,
            camera,
            detector,
            authorizer,
            model,
            permission: PermissionTask::new(),
            started: false,
            model_settled: false,
            stream: None,
            camera_initialized: false,
            watchdog: None,
            detector_ready: false,
            display: DisplaySurface::new(),
            pipeline: DetectionPipeline::new(),
            status: StreamStatus::Idle,
        }
    }

    /// Assemble a controller from configuration.
    pub fn from_config(cfg: &PreviewConfig) -> Result<Self> {
        let camera = backend_for_source(&cfg.camera.source)?;
        let detector = select_binding(cfg.detector.engine, cfg.detector.library_path.as_deref());
        let authorizer = cfg.camera.authorization.into_authorizer();
        let model = ModelStaging::new(
            &cfg.model.asset_root,
            &cfg.model.writable_dir,
            &cfg.model.relative_path,
        );
        Ok(Self::new(
            ControllerSettings::from(cfg),
            camera,
            detector,
            authorizer,
            model,
        ))
    }

    pub fn display(&self) -> &DisplaySurface {
        &self.display
    }

    pub fn status(&self) -> &StreamStatus {
        &self.status
    }

    pub fn detector_ready(&self) -> bool {
        self.detector_ready
    }

    pub fn model_state(&self) -> TaskState {
        self.model.state()
    }

    pub fn permission_state(&self) -> TaskState {
        self.permission.state()
    }

    pub fn pipeline_stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    /// Name of the device currently streaming, if any.
    pub fn active_device(&self) -> Option<&str> {
        self.stream.as_ref().map(|stream| stream.device_name())
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.settings.viewport = viewport;
    }

    /// Launch the startup tasks. Later calls do nothing.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        self.status = StreamStatus::AwaitingPermission;
        self.request_permission_and_start();
        self.stage_model_and_init_detector();
    }

    /// One display refresh of length `dt`.
    pub fn update(&mut self, dt: Duration) {
        if let Some(stream) = self.stream.as_mut() {
            stream.refresh(dt);
        }
        if self.started {
            self.request_permission_and_start();
            self.stage_model_and_init_detector();
        }
        self.verify_stream_started(dt);
        self.per_frame_update();
    }

    /// Advance the authorization task; start the stream once granted.
    pub fn request_permission_and_start(&mut self) -> TaskState {
        if self.status != StreamStatus::AwaitingPermission {
            return self.permission.state();
        }
        match self.permission.poll(self.authorizer.as_mut()) {
            TaskState::Succeeded => {
                // Failures are shown on the display and recorded in the status.
                let _ = self.start_stream(self.settings.request);
            }
            TaskState::Failed => {
                self.status = StreamStatus::Failed(StreamFailure::PermissionDenied);
            }
            TaskState::Pending | TaskState::Awaiting => {}
        }
        self.permission.state()
    }

    fn stage_model_and_init_detector(&mut self) {
        if self.model_settled {
            return;
        }
        match self.model.poll() {
            TaskState::Succeeded => {
                self.model_settled = true;
                if let Some(path) = self.model.staged_path() {
                    self.detector_ready = self.detector.initialize(path);
                    log::info!(
                        "detector initialized: {} ({} binding)",
                        self.detector_ready,
                        self.detector.name()
                    );
                }
            }
            TaskState::Failed => {
                self.model_settled = true;
                log::warn!("model staging failed; detection disabled for this session");
            }
            TaskState::Pending | TaskState::Awaiting => {}
        }
    }

    /// Open the preferred camera and bind it to the display.
    ///
    /// Prefers the first device that is not front facing. Failures are
    /// rendered on the display as well as returned.
    pub fn start_stream(&mut self, request: StreamRequest) -> Result<(), StreamFailure> {
        let devices = match self.camera.devices() {
            Ok(devices) => devices,
            Err(err) => {
                log::error!("failed to enumerate cameras: {:#}", err);
                return Err(self.fail(StreamFailure::OpenFailed(err.to_string()), MSG_START_FAILED));
            }
        };
        let Some(device) = select_device(&devices).cloned() else {
            log::error!("no camera devices found");
            return Err(self.fail(StreamFailure::NoDeviceFound, MSG_NO_CAMERA));
        };
        log::info!("using camera: {}", device.name);

        self.release_stream();
        if let Err(err) = self.open_and_play(&device, request) {
            log::error!("failed to start camera {}: {:#}", device.name, err);
            return Err(self.fail(StreamFailure::OpenFailed(err.to_string()), MSG_START_FAILED));
        }
        self.camera_initialized = true;
        self.watchdog = Some(StartWatchdog::new(self.settings.start_timeout));
        self.status = StreamStatus::Running;
        if let Some(stream) = &self.stream {
            log::info!(
                "camera started - resolution: {}x{}",
                stream.width(),
                stream.height()
            );
        }
        Ok(())
    }

    fn open_and_play(&mut self, device: &CameraDevice, request: StreamRequest) -> Result<()> {
        let mut stream = self.camera.open(device, request)?;
        self.display.bind_stream(&device.name);
        stream.play()?;
        self.stream = Some(stream);
        Ok(())
    }

    fn fail(&mut self, failure: StreamFailure, message: &str) -> StreamFailure {
        self.display.show_error(message);
        self.status = StreamStatus::Failed(failure.clone());
        failure
    }

    /// Watch a freshly started stream for its first frame.
    pub fn verify_stream_started(&mut self, dt: Duration) {
        let Some(watchdog) = self.watchdog.as_mut() else {
            return;
        };
        let Some(stream) = self.stream.as_ref() else {
            self.watchdog = None;
            return;
        };
        match watchdog.poll(stream.did_update_this_frame(), dt) {
            WatchdogState::Watching => {}
            WatchdogState::Satisfied => self.watchdog = None,
            WatchdogState::TimedOut => {
                self.watchdog = None;
                log::error!("camera failed to start or no frames received");
                self.fail(StreamFailure::NoFrames, MSG_START_FAILED);
            }
        }
    }

    /// Orientation, letterboxing and detection for the current refresh.
    pub fn per_frame_update(&mut self) {
        let Some(stream) = self.stream.as_deref() else {
            return;
        };
        if !self.camera_initialized || !stream.is_playing() {
            return;
        }

        self.display
            .set_orientation(stream.rotation_angle(), stream.vertically_mirrored());
        let aspect = camera_aspect(
            (stream.width(), stream.height()),
            (self.settings.request.width, self.settings.request.height),
            stream.rotation_angle(),
        );
        self.display
            .set_fit(fit_scale(aspect, self.settings.viewport.aspect()));

        if !(self.detector_ready && stream.did_update_this_frame()) {
            return;
        }
        match self
            .pipeline
            .process(stream, self.detector.as_mut(), &mut self.display)
        {
            Ok(FrameOutcome::Presented { detections }) => {
                log::trace!("presented annotated frame with {} detections", detections);
            }
            Ok(_) => {}
            Err(err) => log::warn!("detection skipped for this frame: {:#}", err),
        }
    }

    /// Move to the next enumerated camera.
    ///
    /// Does nothing until capture has started with permission granted, or
    /// when fewer than two devices exist.
    pub fn switch_device(&mut self) -> Result<(), StreamFailure> {
        if self.permission.state() != TaskState::Succeeded || !self.camera_initialized {
            log::debug!("switch ignored: camera not started");
            return Ok(());
        }
        let devices = match self.camera.devices() {
            Ok(devices) => devices,
            Err(err) => {
                log::warn!("failed to enumerate cameras: {:#}", err);
                return Ok(());
            }
        };
        if devices.len() < 2 {
            return Ok(());
        }
        let current = self.active_device().unwrap_or_default().to_string();
        let Some(next) = next_device(&devices, &current).cloned() else {
            return Ok(());
        };

        self.release_stream();
        if let Err(err) = self.open_and_play(&next, self.settings.request) {
            log::error!("failed to switch to camera {}: {:#}", next.name, err);
            return Err(self.fail(StreamFailure::OpenFailed(err.to_string()), MSG_START_FAILED));
        }
        self.status = StreamStatus::Running;
        log::info!("switched to camera: {}", next.name);
        Ok(())
    }

    /// Pause or resume frame delivery without releasing the device.
    pub fn on_pause(&mut self, paused: bool) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        let tracks_status = matches!(self.status, StreamStatus::Running | StreamStatus::Paused);
        if paused {
            stream.pause();
            if tracks_status {
                self.status = StreamStatus::Paused;
            }
            log::info!("camera paused");
        } else {
            match stream.play() {
                Ok(()) => {
                    if tracks_status {
                        self.status = StreamStatus::Running;
                    }
                    log::info!("camera resumed");
                }
                Err(err) => log::error!("failed to resume camera: {:#}", err),
            }
        }
    }

    /// Stop and release the stream. Safe to call repeatedly.
    pub fn on_destroy(&mut self) {
        self.camera_initialized = false;
        if self.release_stream() {
            self.status = StreamStatus::Stopped;
            log::info!("camera stopped and cleaned up");
        }
        self.pipeline.release();
    }

    fn release_stream(&mut self) -> bool {
        self.watchdog = None;
        match self.stream.take() {
            Some(mut stream) => {
                stream.stop();
                self.display.clear_source();
                true
            }
            None => false,
        }
    }

    /// Human-readable camera status for debugging.
    pub fn camera_info(&self) -> String {
        match &self.stream {
            None => "No camera active".to_string(),
            Some(stream) => format!(
                "Camera: {}\nResolution: {}x{}\nFPS: {}\nRotation: {}°\nMirrored: {}",
                stream.device_name(),
                stream.width(),
                stream.height(),
                stream.requested_fps(),
                stream.rotation_angle(),
                stream.vertically_mirrored()
            ),
        }
    }
}

impl Drop for CameraController {
    fn drop(&mut self) {
        self.on_destroy();
    }
}
