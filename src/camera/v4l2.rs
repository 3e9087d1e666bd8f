//! V4L2 camera backend.
//!
//! This module provides `V4l2CameraBackend` for live capture from local V4L2
//! device nodes (e.g., /dev/video0).
//!
//! The configured source is either a device node, which enumerates as a single
//! device, or a directory (usually `/dev`), which enumerates every V4L2 node
//! below it. V4L2 does not report facing, so every device counts as rear.
//!
//! Dequeueing blocks, so each playing stream owns a capture thread that hands
//! RGB24 frames to the refresh loop over a bounded channel. Frames arriving
//! while the channel is full are dropped. Dequeues time out periodically so
//! the thread notices `stop`, and `stop` joins the thread, which closes the
//! device node before it returns.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use v4l::video::Capture;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{CameraBackend, CameraDevice, CameraStream, StreamRequest};

/// Longest a dequeue blocks before the capture thread re-checks `stop`.
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(200);

/// Backend over local V4L2 nodes.
#[derive(Clone, Debug)]
pub struct V4l2CameraBackend {
    source: String,
}

impl V4l2CameraBackend {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
        }
    }
}

impl CameraBackend for V4l2CameraBackend {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn devices(&self) -> Result<Vec<CameraDevice>> {
        let root = Path::new(&self.source);
        if root.is_dir() {
            let mut devices: Vec<CameraDevice> = v4l::context::enum_devices()
                .into_iter()
                .filter(|node| node.path().starts_with(root))
                .map(|node| CameraDevice::new(node.path().display().to_string(), false))
                .collect();
            devices.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(devices)
        } else if root.exists() {
            Ok(vec![CameraDevice::new(self.source.clone(), false)])
        } else {
            Ok(Vec::new())
        }
    }

    fn open(
        &mut self,
        device: &CameraDevice,
        request: StreamRequest,
    ) -> Result<Box<dyn CameraStream>> {
        let mut node = v4l::Device::with_path(&device.name)
            .with_context(|| format!("open v4l2 device {}", device.name))?;
        let mut format = node.format().context("read v4l2 format")?;
        format.width = request.width;
        format.height = request.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match node.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Camera: failed to set format on {}: {}",
                    device.name,
                    err
                );
                node.format()
                    .context("read v4l2 format after set failure")?
            }
        };

        if request.fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(request.fps);
            if let Err(err) = node.set_params(&params) {
                log::warn!("V4l2Camera: failed to set fps on {}: {}", device.name, err);
            }
        }

        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "v4l2 device {} negotiated unsupported format {}",
                device.name,
                format.fourcc
            )
        })?;

        log::info!(
            "V4l2Camera: opened {} ({}x{} {:?}, requested {}x{} @ {} fps)",
            device.name,
            format.width,
            format.height,
            pixel_format,
            request.width,
            request.height,
            request.fps
        );

        Ok(Box::new(V4l2Stream {
            device_name: device.name.clone(),
            request,
            width: format.width,
            height: format.height,
            pixel_format,
            node: Some(node),
            frames: None,
            capture: None,
            paused: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            latest: Vec::new(),
            updated: false,
            playing: false,
            released: false,
        }))
    }
}

struct V4l2Stream {
    device_name: String,
    request: StreamRequest,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    /// Held until the capture thread takes it over on first play.
    node: Option<v4l::Device>,
    frames: Option<Receiver<Vec<u8>>>,
    capture: Option<CaptureWorker>,
    paused: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    latest: Vec<u8>,
    updated: bool,
    playing: bool,
    released: bool,
}

impl V4l2Stream {
    fn spawn_capture(&mut self, node: v4l::Device) -> Result<()> {
        let (tx, rx) = mpsc::sync_channel(2);
        let capture = CaptureThread {
            device_name: self.device_name.clone(),
            width: self.width,
            height: self.height,
            pixel_format: self.pixel_format,
            paused: Arc::clone(&self.paused),
            stop: Arc::clone(&self.stop),
        };
        let worker = CaptureWorker::spawn(
            format!("v4l2-capture:{}", self.device_name),
            Arc::clone(&self.stop),
            move || capture.run(node, tx),
        )?;
        self.capture = Some(worker);
        self.frames = Some(rx);
        Ok(())
    }
}

impl CameraStream for V4l2Stream {
    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn requested_fps(&self) -> u32 {
        self.request.fps
    }

    fn play(&mut self) -> Result<()> {
        if self.released {
            return Err(anyhow!("v4l2 stream {} was stopped", self.device_name));
        }
        if let Some(node) = self.node.take() {
            self.spawn_capture(node)?;
        }
        self.paused.store(false, Ordering::SeqCst);
        self.playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.paused.store(true, Ordering::SeqCst);
        self.playing = false;
    }

    fn stop(&mut self) {
        self.playing = false;
        self.updated = false;
        if self.released {
            return;
        }
        self.released = true;
        self.frames = None;
        self.node = None;
        match self.capture.take() {
            Some(worker) => worker.shutdown(),
            None => self.stop.store(true, Ordering::SeqCst),
        }
        self.latest = Vec::new();
        log::info!("V4l2Camera: released {}", self.device_name);
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn refresh(&mut self, _dt: Duration) {
        self.updated = false;
        if !self.playing {
            return;
        }
        let Some(frames) = &self.frames else {
            return;
        };
        loop {
            match frames.try_recv() {
                Ok(frame) => {
                    self.latest = frame;
                    self.updated = true;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    log::warn!("V4l2Camera: capture thread for {} ended", self.device_name);
                    self.frames = None;
                    break;
                }
            }
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
        0
    }

    fn vertically_mirrored(&self) -> bool {
        false
    }

    fn copy_rgb24(&self, dst: &mut [u8]) -> Result<()> {
        if self.latest.is_empty() {
            return Err(anyhow!("no frame captured yet"));
        }
        if dst.len() != self.latest.len() {
            return Err(anyhow!(
                "destination holds {} bytes, frame has {}",
                dst.len(),
                self.latest.len()
            ));
        }
        dst.copy_from_slice(&self.latest);
        Ok(())
    }
}

impl Drop for V4l2Stream {
    fn drop(&mut self) {
        self.stop();
    }
}

struct CaptureThread {
    device_name: String,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    paused: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
}

impl CaptureThread {
    fn run(self, node: v4l::Device, tx: SyncSender<Vec<u8>>) {
        if let Err(err) = self.capture_loop(node, &tx) {
            log::error!("V4l2Camera: capture on {} failed: {:#}", self.device_name, err);
        }
    }

    fn capture_loop(&self, node: v4l::Device, tx: &SyncSender<Vec<u8>>) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::io::traits::CaptureStream;

        let mut rgb = Vec::new();
        while !self.stop.load(Ordering::SeqCst) {
            // A timed-out dequeue leaves its buffer queued, so the buffer
            // stream is rebuilt before capturing again.
            let mut stream = v4l::prelude::MmapStream::with_buffers(&node, Type::VideoCapture, 4)
                .context("create v4l2 buffer stream")?;
            stream.set_timeout(DEQUEUE_TIMEOUT);

            while !self.stop.load(Ordering::SeqCst) {
                let (buf, meta) = match stream.next() {
                    Ok(frame) => frame,
                    Err(err) if is_dequeue_timeout(&err) => {
                        log::trace!("V4l2Camera: no frame from {} yet", self.device_name);
                        break;
                    }
                    Err(err) => return Err(err).context("capture v4l2 frame"),
                };
                if self.paused.load(Ordering::SeqCst) {
                    continue;
                }
                let used = match meta.bytesused as usize {
                    0 => buf.len(),
                    n => n.min(buf.len()),
                };
                normalize_to_rgb(&buf[..used], self.width, self.height, self.pixel_format, &mut rgb)?;
                match tx.try_send(rgb.clone()) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Disconnected(_)) => return Ok(()),
                }
            }
        }
        Ok(())
    }
}

fn is_dequeue_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

/// Handle to a capture thread that polls a shared stop flag.
struct CaptureWorker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl CaptureWorker {
    fn spawn<F>(name: String, stop: Arc<AtomicBool>, body: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name)
            .spawn(body)
            .context("spawn v4l2 capture thread")?;
        Ok(Self { stop, handle })
    }

    /// Signal the thread and wait until it has exited.
    fn shutdown(self) {
        self.stop.store(true, Ordering::SeqCst);
        if self.handle.join().is_err() {
            log::error!("V4l2Camera: capture thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn shutdown_waits_for_capture_thread() -> Result<()> {
        let stop = Arc::new(AtomicBool::new(false));
        let exited = Arc::new(AtomicUsize::new(0));
        let worker = {
            let stop = Arc::clone(&stop);
            let exited = Arc::clone(&exited);
            CaptureWorker::spawn("capture-test".to_string(), Arc::clone(&stop), move || {
                // Stands in for a device that never delivers: every wait times out.
                while !stop.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(5));
                }
                exited.fetch_add(1, Ordering::SeqCst);
            })?
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(exited.load(Ordering::SeqCst), 0);

        worker.shutdown();
        assert_eq!(exited.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn dequeue_timeouts_are_not_capture_errors() {
        assert!(is_dequeue_timeout(&io::Error::new(
            io::ErrorKind::TimedOut,
            "VIDIOC_DQBUF"
        )));
        assert!(!is_dequeue_timeout(&io::Error::from_raw_os_error(5)));
    }
}
