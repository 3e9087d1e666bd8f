//! Per-frame detection pipeline.
//!
//! On each eligible refresh the pipeline copies the current camera frame into
//! a reusable buffer, runs detection, asks for an annotated copy and presents
//! it when its length matches the input exactly. A mismatched or absent
//! annotation leaves the display untouched.

use anyhow::Result;

use crate::camera::CameraStream;
use crate::detect::DetectorBinding;
use crate::display::{rgb24_len, DisplaySurface};

/// Reusable RGB24 frame buffer.
///
/// Reallocated only when the capture resolution changes.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Size the buffer for `width`x`height`. Returns true if it reallocated.
    pub fn ensure(&mut self, width: u32, height: u32) -> bool {
        if !self.data.is_empty() && self.width == width && self.height == height {
            return false;
        }
        self.width = width;
        self.height = height;
        self.data = vec![0u8; rgb24_len(width, height)];
        true
    }

    pub fn release(&mut self) {
        *self = Self::default();
    }
}

/// Counters for diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Refreshes where the detector was ready and a new frame arrived.
    pub eligible_frames: u64,
    pub detect_calls: u64,
    pub annotations_applied: u64,
    pub annotations_discarded: u64,
    pub buffer_allocations: u64,
    pub last_detection_count: u32,
}

/// What happened to one eligible frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The annotated frame is now displayed.
    Presented { detections: u32 },
    /// The engine returned no annotated frame.
    NoAnnotation { detections: u32 },
    /// The annotated frame had the wrong length and was dropped.
    SizeMismatch { detections: u32, expected: usize, actual: usize },
}

#[derive(Debug, Default)]
pub struct DetectionPipeline {
    buffer: FrameBuffer,
    stats: PipelineStats,
}

impl DetectionPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Drop the frame buffer.
    pub fn release(&mut self) {
        self.buffer.release();
    }

    /// Run detection on the stream's current frame and update the display.
    pub fn process(
        &mut self,
        stream: &dyn CameraStream,
        detector: &mut dyn DetectorBinding,
        display: &mut DisplaySurface,
    ) -> Result<FrameOutcome> {
        self.stats.eligible_frames += 1;
        let (width, height) = (stream.width(), stream.height());
        if self.buffer.ensure(width, height) {
            self.stats.buffer_allocations += 1;
            log::debug!("allocated {}x{} frame buffer", width, height);
        }
        stream.copy_rgb24(self.buffer.data_mut())?;

        log::debug!(
            "detecting on frame {}x{}, bytes: {}",
            width,
            height,
            self.buffer.data().len()
        );
        let detections = detector.detect(self.buffer.data(), width, height);
        self.stats.detect_calls += 1;
        self.stats.last_detection_count = detections;

        let Some(annotated) = detector.annotate(self.buffer.data(), width, height) else {
            log::debug!("detect result: {}, no annotated frame", detections);
            return Ok(FrameOutcome::NoAnnotation { detections });
        };

        let expected = self.buffer.data().len();
        if annotated.len() != expected {
            self.stats.annotations_discarded += 1;
            log::warn!(
                "discarding annotated frame: {} bytes, expected {}",
                annotated.len(),
                expected
            );
            return Ok(FrameOutcome::SizeMismatch {
                detections,
                expected,
                actual: annotated.len(),
            });
        }

        display.present_annotated(width, height, &annotated)?;
        self.stats.annotations_applied += 1;
        log::debug!("detect result: {}, annotated frame presented", detections);
        Ok(FrameOutcome::Presented { detections })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use super::*;
    use crate::camera::{CameraBackend, CameraDevice, StreamRequest, SyntheticCameraBackend};
    use crate::display::TextureSource;

    /// Inverts pixels; `trim` shortens the annotated output.
    struct InvertingBinding {
        trim: usize,
    }

    impl DetectorBinding for InvertingBinding {
        fn name(&self) -> &'static str {
            "inverting"
        }

        fn initialize(&mut self, _model_path: &Path) -> bool {
            true
        }

        fn detect(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> u32 {
            2
        }

        fn annotate(&mut self, pixels: &[u8], _width: u32, _height: u32) -> Option<Vec<u8>> {
            let mut out: Vec<u8> = pixels.iter().map(|p| 255 - p).collect();
            out.truncate(out.len() - self.trim);
            Some(out)
        }
    }

    fn playing_stream(width: u32, height: u32) -> Box<dyn CameraStream> {
        let mut backend = SyntheticCameraBackend::new(vec![CameraDevice::new("cam", false)]);
        let mut stream = backend
            .open(
                &CameraDevice::new("cam", false),
                StreamRequest {
                    width,
                    height,
                    fps: 30,
                },
            )
            .unwrap();
        stream.play().unwrap();
        stream.refresh(Duration::from_millis(40));
        stream
    }

    #[test]
    fn buffer_reallocates_only_on_resolution_change() {
        let mut buffer = FrameBuffer::new();
        assert!(buffer.ensure(4, 2));
        assert!(!buffer.ensure(4, 2));
        assert_eq!(buffer.data().len(), 24);
        assert!(buffer.ensure(2, 4));
        assert_eq!(buffer.data().len(), 24);
        buffer.release();
        assert!(buffer.data().is_empty());
    }

    #[test]
    fn presents_matching_annotation() -> Result<()> {
        let stream = playing_stream(4, 3);
        let mut display = DisplaySurface::new();
        let mut pipeline = DetectionPipeline::new();
        let mut binding = InvertingBinding { trim: 0 };

        let outcome = pipeline.process(stream.as_ref(), &mut binding, &mut display)?;
        assert_eq!(outcome, FrameOutcome::Presented { detections: 2 });
        assert_eq!(display.source(), &TextureSource::Annotated);

        let mut frame = vec![0u8; rgb24_len(4, 3)];
        stream.copy_rgb24(&mut frame)?;
        let inverted: Vec<u8> = frame.iter().map(|p| 255 - p).collect();
        assert_eq!(display.annotated().unwrap().data(), inverted.as_slice());
        Ok(())
    }

    #[test]
    fn discards_short_annotation() -> Result<()> {
        let stream = playing_stream(4, 3);
        let mut display = DisplaySurface::new();
        display.bind_stream("cam");
        let mut pipeline = DetectionPipeline::new();
        let mut binding = InvertingBinding { trim: 3 };

        let outcome = pipeline.process(stream.as_ref(), &mut binding, &mut display)?;
        assert_eq!(
            outcome,
            FrameOutcome::SizeMismatch {
                detections: 2,
                expected: 36,
                actual: 33
            }
        );
        assert_eq!(display.source(), &TextureSource::Stream("cam".to_string()));
        assert!(display.annotated().is_none());
        assert_eq!(pipeline.stats().annotations_discarded, 1);
        Ok(())
    }

    #[test]
    fn absent_annotation_is_not_an_error() -> Result<()> {
        let stream = playing_stream(2, 2);
        let mut display = DisplaySurface::new();
        let mut pipeline = DetectionPipeline::new();
        let mut binding = crate::detect::NoOpBinding::new();

        let outcome = pipeline.process(stream.as_ref(), &mut binding, &mut display)?;
        assert_eq!(outcome, FrameOutcome::NoAnnotation { detections: 0 });
        assert_eq!(display.source(), &TextureSource::None);
        assert_eq!(pipeline.stats().detect_calls, 1);
        assert_eq!(pipeline.stats().buffer_allocations, 1);
        Ok(())
    }
}
