use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::camera::StreamRequest;
use crate::detect::EngineKind;
use crate::display::Viewport;
use crate::permission::AuthorizationMode;

const DEFAULT_CAMERA_SOURCE: &str = "stub://default";
const DEFAULT_CAMERA_WIDTH: u32 = 1920;
const DEFAULT_CAMERA_HEIGHT: u32 = 1080;
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_START_TIMEOUT_SECS: f64 = 5.0;
const DEFAULT_AUTHORIZATION: &str = "granted";
const DEFAULT_ASSET_ROOT: &str = "assets";
const DEFAULT_WRITABLE_DIR: &str = "data";
const DEFAULT_DETECTOR_ENGINE: &str = "none";
const DEFAULT_VIEWPORT_WIDTH: u32 = 1920;
const DEFAULT_VIEWPORT_HEIGHT: u32 = 1080;
const DEFAULT_REFRESH_HZ: u32 = 60;

#[derive(Debug, Deserialize, Default)]
struct PreviewConfigFile {
    camera: Option<CameraConfigFile>,
    model: Option<ModelConfigFile>,
    detector: Option<DetectorConfigFile>,
    viewport: Option<ViewportConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    start_timeout_secs: Option<f64>,
    authorization: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    relative_path: Option<String>,
    asset_root: Option<String>,
    writable_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    engine: Option<String>,
    library_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ViewportConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    refresh_hz: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct PreviewConfig {
    pub camera: CameraSettings,
    pub model: ModelSettings,
    pub detector: DetectorSettings,
    pub viewport: ViewportSettings,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// `stub://...` for synthetic cameras, otherwise a V4L2 node or directory.
    pub source: String,
    pub request: StreamRequest,
    pub start_timeout: Duration,
    pub authorization: AuthorizationMode,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    /// Model path relative to both the asset root and the writable dir.
    pub relative_path: String,
    pub asset_root: String,
    pub writable_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub engine: EngineKind,
    pub library_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ViewportSettings {
    pub viewport: Viewport,
    pub refresh_hz: u32,
}

impl ViewportSettings {
    /// Length of one display refresh.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(1) / self.refresh_hz
    }
}

impl PreviewConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PREVIEW_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PreviewConfigFile) -> Result<Self> {
        let camera = file.camera.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let viewport = file.viewport.unwrap_or_default();

        let start_timeout_secs = camera
            .start_timeout_secs
            .unwrap_or(DEFAULT_START_TIMEOUT_SECS);
        if !start_timeout_secs.is_finite() || start_timeout_secs < 0.0 {
            return Err(anyhow!("camera.start_timeout_secs must be a non-negative number"));
        }

        Ok(Self {
            camera: CameraSettings {
                source: camera
                    .source
                    .unwrap_or_else(|| DEFAULT_CAMERA_SOURCE.to_string()),
                request: StreamRequest {
                    width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                    height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
                    fps: camera.fps.unwrap_or(DEFAULT_CAMERA_FPS),
                },
                start_timeout: Duration::from_secs_f64(start_timeout_secs),
                authorization: AuthorizationMode::parse(
                    camera
                        .authorization
                        .as_deref()
                        .unwrap_or(DEFAULT_AUTHORIZATION),
                )?,
            },
            model: ModelSettings {
                relative_path: model.relative_path.unwrap_or_default(),
                asset_root: model
                    .asset_root
                    .unwrap_or_else(|| DEFAULT_ASSET_ROOT.to_string()),
                writable_dir: model
                    .writable_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_WRITABLE_DIR)),
            },
            detector: DetectorSettings {
                engine: EngineKind::parse(
                    detector
                        .engine
                        .as_deref()
                        .unwrap_or(DEFAULT_DETECTOR_ENGINE),
                )?,
                library_path: detector.library_path,
            },
            viewport: ViewportSettings {
                viewport: Viewport {
                    width: viewport.width.unwrap_or(DEFAULT_VIEWPORT_WIDTH),
                    height: viewport.height.unwrap_or(DEFAULT_VIEWPORT_HEIGHT),
                },
                refresh_hz: viewport.refresh_hz.unwrap_or(DEFAULT_REFRESH_HZ),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(source) = non_empty_env("PREVIEW_CAMERA_SOURCE") {
            self.camera.source = source;
        }
        if let Some(mode) = non_empty_env("PREVIEW_AUTHORIZATION") {
            self.camera.authorization = AuthorizationMode::parse(&mode)?;
        }
        if let Some(path) = non_empty_env("PREVIEW_MODEL_PATH") {
            self.model.relative_path = path;
        }
        if let Some(root) = non_empty_env("PREVIEW_ASSET_ROOT") {
            self.model.asset_root = root;
        }
        if let Some(dir) = non_empty_env("PREVIEW_WRITABLE_DIR") {
            self.model.writable_dir = PathBuf::from(dir);
        }
        if let Some(engine) = non_empty_env("PREVIEW_DETECTOR_ENGINE") {
            self.detector.engine = EngineKind::parse(&engine)?;
        }
        if let Some(lib) = non_empty_env("PREVIEW_DETECTOR_LIB") {
            self.detector.library_path = Some(PathBuf::from(lib));
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let request = self.camera.request;
        if request.width == 0 || request.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        let viewport = self.viewport.viewport;
        if viewport.width == 0 || viewport.height == 0 {
            return Err(anyhow!("viewport width and height must be greater than zero"));
        }
        if self.viewport.refresh_hz == 0 {
            return Err(anyhow!("viewport refresh_hz must be greater than zero"));
        }
        self.model.relative_path = self.model.relative_path.trim().to_string();
        if self.model.relative_path.is_empty() {
            return Err(anyhow!(
                "model.relative_path must be set (or PREVIEW_MODEL_PATH)"
            ));
        }
        if Path::new(&self.model.relative_path).is_absolute() {
            return Err(anyhow!("model.relative_path must be relative"));
        }
        if self.detector.engine == EngineKind::Native && self.detector.library_path.is_none() {
            return Err(anyhow!(
                "detector.library_path must be set for the native engine (or PREVIEW_DETECTOR_LIB)"
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<PreviewConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}
