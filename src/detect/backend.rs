use std::path::Path;

/// Uniform contract over an object-detection engine.
///
/// Bindings never fail loudly: an engine that cannot serve a call reports
/// `false`, zero detections or no annotated frame. Callers treat that as a
/// "detector unavailable" state rather than an error.
///
/// Frames are tightly packed RGB24: one byte per channel, three channels per
/// pixel, row-major, no padding.
pub trait DetectorBinding {
    /// Binding identifier.
    fn name(&self) -> &'static str;

    /// Load the model at `model_path`. Returns whether loading succeeded.
    ///
    /// Must succeed before `detect` and `annotate` return meaningful results.
    fn initialize(&mut self, model_path: &Path) -> bool;

    /// Run inference and return the number of detected objects.
    ///
    /// Updates the engine's most recent detections, which the next
    /// `annotate` call draws.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> u32;

    /// Copy of `pixels` with markers for the most recent detections burned in.
    ///
    /// A present result has the same encoding and dimensions as the input.
    fn annotate(&mut self, pixels: &[u8], width: u32, height: u32) -> Option<Vec<u8>>;
}
