//! previewd - camera preview with object detection
//!
//! This daemon:
//! 1. Loads configuration (PREVIEW_CONFIG + environment overrides)
//! 2. Requests camera access and opens the preferred camera
//! 3. Stages the detection model and initializes the detector binding
//! 4. Drives the controller once per display refresh until Ctrl-C

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use camera_detect::{CameraController, PreviewConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Stop after this many display refreshes.
    #[arg(long)]
    frames: Option<u64>,
    /// Write the last annotated frame here on exit (PNG).
    #[arg(long)]
    snapshot: Option<PathBuf>,
    /// Seconds between camera status log lines.
    #[arg(long, default_value_t = 5)]
    status_interval: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.status_interval == 0 {
        return Err(anyhow!("status-interval must be >= 1"));
    }

    let cfg = PreviewConfig::load()?;
    log::info!(
        "camera source {} ({}x{} @ {} fps), model {}",
        cfg.camera.source,
        cfg.camera.request.width,
        cfg.camera.request.height,
        cfg.camera.request.fps,
        cfg.model.relative_path
    );

    let mut controller = CameraController::from_config(&cfg)?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    let refresh = cfg.viewport.refresh_interval();
    let status_every = Duration::from_secs(args.status_interval);
    let mut last_refresh = Instant::now();
    let mut last_status = Instant::now();
    let mut refreshes = 0u64;

    controller.start();
    log::info!("previewd running at {} Hz", cfg.viewport.refresh_hz);

    loop {
        if rx.try_recv().is_ok() {
            log::info!("shutdown signal received");
            break;
        }
        if args.frames.is_some_and(|limit| refreshes >= limit) {
            break;
        }

        let now = Instant::now();
        controller.update(now.duration_since(last_refresh));
        last_refresh = now;
        refreshes += 1;

        if last_status.elapsed() >= status_every {
            last_status = Instant::now();
            let stats = controller.pipeline_stats();
            log::info!(
                "status={:?} detector_ready={} eligible={} applied={} discarded={} last_count={}",
                controller.status(),
                controller.detector_ready(),
                stats.eligible_frames,
                stats.annotations_applied,
                stats.annotations_discarded,
                stats.last_detection_count
            );
            log::debug!("{}", controller.camera_info());
        }

        if let Some(remaining) = refresh.checked_sub(last_refresh.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    if let Some(path) = &args.snapshot {
        match controller.display().save_snapshot(path) {
            Ok(()) => log::info!("snapshot written to {}", path.display()),
            Err(err) => log::warn!("no snapshot written: {:#}", err),
        }
    }

    controller.on_destroy();
    log::info!("previewd stopped after {} refreshes", refreshes);
    Ok(())
}
