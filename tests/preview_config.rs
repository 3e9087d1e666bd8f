use std::sync::Mutex;

use tempfile::NamedTempFile;

use camera_detect::config::PreviewConfig;
use camera_detect::{AuthorizationMode, EngineKind};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PREVIEW_CONFIG",
        "PREVIEW_CAMERA_SOURCE",
        "PREVIEW_AUTHORIZATION",
        "PREVIEW_MODEL_PATH",
        "PREVIEW_ASSET_ROOT",
        "PREVIEW_WRITABLE_DIR",
        "PREVIEW_DETECTOR_ENGINE",
        "PREVIEW_DETECTOR_LIB",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "camera": {
                "source": "stub://cam0:front,cam1:back",
                "width": 1280,
                "height": 720,
                "fps": 24,
                "start_timeout_secs": 2.5,
                "authorization": "prompt"
            },
            "model": {
                "relative_path": "models/detect.tflite",
                "asset_root": "/opt/preview/assets",
                "writable_dir": "/var/lib/preview"
            },
            "detector": {
                "engine": "native",
                "library_path": "/opt/preview/libdetector.so"
            },
            "viewport": {
                "width": 1080,
                "height": 1920,
                "refresh_hz": 30
            }
        }"#,
    );

    std::env::set_var("PREVIEW_CONFIG", file.path());
    std::env::set_var("PREVIEW_CAMERA_SOURCE", "stub://rear");
    std::env::set_var("PREVIEW_AUTHORIZATION", "granted");

    let cfg = PreviewConfig::load().expect("load config");

    assert_eq!(cfg.camera.source, "stub://rear");
    assert_eq!(cfg.camera.request.width, 1280);
    assert_eq!(cfg.camera.request.height, 720);
    assert_eq!(cfg.camera.request.fps, 24);
    assert_eq!(cfg.camera.start_timeout.as_millis(), 2500);
    assert_eq!(cfg.camera.authorization, AuthorizationMode::Granted);
    assert_eq!(cfg.model.relative_path, "models/detect.tflite");
    assert_eq!(cfg.model.asset_root, "/opt/preview/assets");
    assert_eq!(cfg.model.writable_dir.to_str(), Some("/var/lib/preview"));
    assert_eq!(cfg.detector.engine, EngineKind::Native);
    assert_eq!(
        cfg.detector.library_path.as_deref().and_then(|p| p.to_str()),
        Some("/opt/preview/libdetector.so")
    );
    assert_eq!(cfg.viewport.viewport.width, 1080);
    assert_eq!(cfg.viewport.viewport.height, 1920);
    assert_eq!(cfg.viewport.refresh_interval().as_nanos(), 1_000_000_000 / 30);

    clear_env();
}

#[test]
fn defaults_apply_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    std::env::set_var("PREVIEW_MODEL_PATH", "model.bin");

    let cfg = PreviewConfig::load().expect("load config");

    assert_eq!(cfg.camera.source, "stub://default");
    assert_eq!(cfg.camera.request.width, 1920);
    assert_eq!(cfg.camera.request.height, 1080);
    assert_eq!(cfg.camera.request.fps, 30);
    assert_eq!(cfg.camera.start_timeout.as_secs(), 5);
    assert_eq!(cfg.camera.authorization, AuthorizationMode::Granted);
    assert_eq!(cfg.model.asset_root, "assets");
    assert_eq!(cfg.model.writable_dir.to_str(), Some("data"));
    assert_eq!(cfg.detector.engine, EngineKind::None);
    assert!(cfg.detector.library_path.is_none());
    assert_eq!(cfg.viewport.refresh_hz, 60);

    clear_env();
}

#[test]
fn rejects_missing_model_path() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let err = PreviewConfig::load().expect_err("model path is required");
    assert!(err.to_string().contains("model.relative_path"));

    clear_env();
}

#[test]
fn native_engine_requires_library() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    std::env::set_var("PREVIEW_MODEL_PATH", "model.bin");
    std::env::set_var("PREVIEW_DETECTOR_ENGINE", "native");

    let err = PreviewConfig::load().expect_err("library path is required");
    assert!(err.to_string().contains("library_path"));

    std::env::set_var("PREVIEW_DETECTOR_LIB", "/opt/libdetector.so");
    let cfg = PreviewConfig::load().expect("load config");
    assert_eq!(cfg.detector.engine, EngineKind::Native);

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(r#"{ "camera": { "width": 0 }, "model": { "relative_path": "m.bin" } }"#);
    std::env::set_var("PREVIEW_CONFIG", file.path());
    assert!(PreviewConfig::load().is_err());

    let file = write_config(r#"{ "camera": { "authorization": "sometimes" } }"#);
    std::env::set_var("PREVIEW_CONFIG", file.path());
    assert!(PreviewConfig::load().is_err());

    let file = write_config("not json");
    std::env::set_var("PREVIEW_CONFIG", file.path());
    let err = PreviewConfig::load().expect_err("invalid json");
    assert!(err.to_string().contains("invalid config file"));

    clear_env();
}
