use std::ffi::{c_char, c_int, CString};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use libloading::Library;

use crate::detect::backend::DetectorBinding;

type InitializeFn = unsafe extern "C" fn(model_path: *const c_char) -> c_int;
type DetectFn =
    unsafe extern "C" fn(pixels: *const u8, len: usize, width: i32, height: i32) -> i32;
type AnnotateFn = unsafe extern "C" fn(
    pixels: *const u8,
    len: usize,
    width: i32,
    height: i32,
    out: *mut u8,
    out_len: usize,
) -> i64;

const SYMBOL_INITIALIZE: &[u8] = b"detector_initialize\0";
const SYMBOL_DETECT: &[u8] = b"detector_detect\0";
const SYMBOL_ANNOTATE: &[u8] = b"detector_annotate\0";

/// Binding to a detection engine shipped as a shared library.
///
/// The library exports a C ABI:
///
/// ```c
/// int     detector_initialize(const char *model_path);          /* nonzero on success */
/// int32_t detector_detect(const uint8_t *pixels, size_t len,
///                         int32_t width, int32_t height);        /* count, <0 on error */
/// int64_t detector_annotate(const uint8_t *pixels, size_t len,
///                           int32_t width, int32_t height,
///                           uint8_t *out, size_t out_len);       /* bytes written, <0 on error */
/// ```
///
/// `detector_annotate` writes into a caller-owned buffer of the input length,
/// so no memory crosses the boundary in either direction.
pub struct NativeEngineBinding {
    initialize: InitializeFn,
    detect: DetectFn,
    annotate: AnnotateFn,
    initialized: bool,
    // Keeps the symbols above valid; dropped last.
    _library: Option<Library>,
}

impl NativeEngineBinding {
    /// Load the engine library and resolve its entry points.
    pub fn load(library_path: &Path) -> Result<Self> {
        // SAFETY: loading runs the library's initializers; the engine library is
        // trusted configuration, same as the model it loads.
        let library = unsafe { Library::new(library_path) }.with_context(|| {
            format!("failed to load detector library {}", library_path.display())
        })?;
        // SAFETY: the symbol types match the documented C ABI.
        let (initialize, detect, annotate) = unsafe {
            let initialize = *library
                .get::<InitializeFn>(SYMBOL_INITIALIZE)
                .context("detector library lacks detector_initialize")?;
            let detect = *library
                .get::<DetectFn>(SYMBOL_DETECT)
                .context("detector library lacks detector_detect")?;
            let annotate = *library
                .get::<AnnotateFn>(SYMBOL_ANNOTATE)
                .context("detector library lacks detector_annotate")?;
            (initialize, detect, annotate)
        };
        log::info!("loaded detector engine {}", library_path.display());
        Ok(Self {
            initialize,
            detect,
            annotate,
            initialized: false,
            _library: Some(library),
        })
    }

    /// Binding over entry points linked into the test binary.
    #[cfg(test)]
    fn from_entry_points(initialize: InitializeFn, detect: DetectFn, annotate: AnnotateFn) -> Self {
        Self {
            initialize,
            detect,
            annotate,
            initialized: false,
            _library: None,
        }
    }
}

fn frame_dims(width: u32, height: u32) -> Result<(i32, i32)> {
    let w = i32::try_from(width).map_err(|_| anyhow!("frame width {} out of range", width))?;
    let h = i32::try_from(height).map_err(|_| anyhow!("frame height {} out of range", height))?;
    Ok((w, h))
}

impl DetectorBinding for NativeEngineBinding {
    fn name(&self) -> &'static str {
        "native"
    }

    fn initialize(&mut self, model_path: &Path) -> bool {
        let Some(path) = model_path.to_str() else {
            log::error!("model path {} is not valid UTF-8", model_path.display());
            return false;
        };
        let Ok(path) = CString::new(path) else {
            log::error!("model path {} contains a NUL byte", model_path.display());
            return false;
        };
        // SAFETY: `path` is a valid NUL-terminated string for the duration of the call.
        let status = unsafe { (self.initialize)(path.as_ptr()) };
        self.initialized = status != 0;
        self.initialized
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> u32 {
        if !self.initialized {
            return 0;
        }
        let (w, h) = match frame_dims(width, height) {
            Ok(dims) => dims,
            Err(err) => {
                log::warn!("detect skipped: {}", err);
                return 0;
            }
        };
        // SAFETY: the engine reads at most `len` bytes from `pixels`.
        let count = unsafe { (self.detect)(pixels.as_ptr(), pixels.len(), w, h) };
        if count < 0 {
            log::warn!("detector engine reported error {}", count);
            return 0;
        }
        count as u32
    }

    fn annotate(&mut self, pixels: &[u8], width: u32, height: u32) -> Option<Vec<u8>> {
        if !self.initialized {
            return None;
        }
        let (w, h) = match frame_dims(width, height) {
            Ok(dims) => dims,
            Err(err) => {
                log::warn!("annotate skipped: {}", err);
                return None;
            }
        };
        let mut out = vec![0u8; pixels.len()];
        // SAFETY: the engine writes at most `out_len` bytes into `out`.
        let written = unsafe {
            (self.annotate)(
                pixels.as_ptr(),
                pixels.len(),
                w,
                h,
                out.as_mut_ptr(),
                out.len(),
            )
        };
        if written < 0 {
            log::warn!("detector engine failed to annotate: {}", written);
            return None;
        }
        let written = written as usize;
        if written > out.len() {
            log::warn!(
                "detector engine claims {} annotated bytes for a {} byte buffer",
                written,
                out.len()
            );
            return None;
        }
        out.truncate(written);
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static UNINITIALIZED_ENTRIES: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn init_ok(_model_path: *const c_char) -> c_int {
        1
    }

    extern "C" fn init_refused(_model_path: *const c_char) -> c_int {
        0
    }

    extern "C" fn detect_counting(_pixels: *const u8, _len: usize, _w: i32, _h: i32) -> i32 {
        UNINITIALIZED_ENTRIES.fetch_add(1, Ordering::SeqCst);
        7
    }

    extern "C" fn annotate_counting(
        _pixels: *const u8,
        _len: usize,
        _w: i32,
        _h: i32,
        _out: *mut u8,
        _out_len: usize,
    ) -> i64 {
        UNINITIALIZED_ENTRIES.fetch_add(1, Ordering::SeqCst);
        0
    }

    extern "C" fn detect_four(_pixels: *const u8, _len: usize, _w: i32, _h: i32) -> i32 {
        4
    }

    extern "C" fn detect_error(_pixels: *const u8, _len: usize, _w: i32, _h: i32) -> i32 {
        -2
    }

    extern "C" fn annotate_invert(
        pixels: *const u8,
        len: usize,
        _w: i32,
        _h: i32,
        out: *mut u8,
        out_len: usize,
    ) -> i64 {
        let n = len.min(out_len);
        // SAFETY: the binding passes `len` readable and `out_len` writable bytes.
        let (input, output) = unsafe {
            (
                std::slice::from_raw_parts(pixels, n),
                std::slice::from_raw_parts_mut(out, n),
            )
        };
        for (dst, src) in output.iter_mut().zip(input) {
            *dst = 255 - src;
        }
        n as i64
    }

    extern "C" fn annotate_error(
        _pixels: *const u8,
        _len: usize,
        _w: i32,
        _h: i32,
        _out: *mut u8,
        _out_len: usize,
    ) -> i64 {
        -1
    }

    extern "C" fn annotate_oversized(
        _pixels: *const u8,
        _len: usize,
        _w: i32,
        _h: i32,
        _out: *mut u8,
        out_len: usize,
    ) -> i64 {
        out_len as i64 + 1
    }

    #[test]
    fn missing_library_fails_to_load() {
        let err = NativeEngineBinding::load(Path::new("/nonexistent/libdetector.so"))
            .err()
            .expect("load should fail");
        assert!(err.to_string().contains("failed to load detector library"));
    }

    #[test]
    fn rejects_oversized_dimensions() {
        assert!(frame_dims(u32::MAX, 1).is_err());
        assert_eq!(frame_dims(640, 480).unwrap(), (640, 480));
    }

    #[test]
    fn calls_before_initialize_stay_outside_engine() {
        let mut binding =
            NativeEngineBinding::from_entry_points(init_refused, detect_counting, annotate_counting);
        let frame = vec![9u8; 2 * 2 * 3];
        assert_eq!(binding.detect(&frame, 2, 2), 0);
        assert!(binding.annotate(&frame, 2, 2).is_none());

        assert!(!binding.initialize(Path::new("model.bin")));
        assert_eq!(binding.detect(&frame, 2, 2), 0);
        assert!(binding.annotate(&frame, 2, 2).is_none());
        assert_eq!(UNINITIALIZED_ENTRIES.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn initialized_engine_detects_and_annotates() {
        let mut binding =
            NativeEngineBinding::from_entry_points(init_ok, detect_four, annotate_invert);
        assert!(binding.initialize(Path::new("model.bin")));

        let frame: Vec<u8> = (0..12).collect();
        assert_eq!(binding.detect(&frame, 2, 2), 4);
        let annotated = binding.annotate(&frame, 2, 2).unwrap();
        assert_eq!(annotated, frame.iter().map(|p| 255 - p).collect::<Vec<u8>>());
    }

    #[test]
    fn negative_detect_counts_as_zero() {
        let mut binding =
            NativeEngineBinding::from_entry_points(init_ok, detect_error, annotate_invert);
        assert!(binding.initialize(Path::new("model.bin")));
        assert_eq!(binding.detect(&[0u8; 3], 1, 1), 0);
    }

    #[test]
    fn failed_or_oversized_annotation_is_absent() {
        let frame = vec![1u8; 3];

        let mut failing =
            NativeEngineBinding::from_entry_points(init_ok, detect_four, annotate_error);
        assert!(failing.initialize(Path::new("model.bin")));
        assert!(failing.annotate(&frame, 1, 1).is_none());

        let mut oversized =
            NativeEngineBinding::from_entry_points(init_ok, detect_four, annotate_oversized);
        assert!(oversized.initialize(Path::new("model.bin")));
        assert!(oversized.annotate(&frame, 1, 1).is_none());
    }
}
