use std::path::Path;

use crate::detect::backend::DetectorBinding;

/// Binding for hosts without a detection engine. Never becomes ready.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpBinding;

impl NoOpBinding {
    pub fn new() -> Self {
        Self
    }
}

impl DetectorBinding for NoOpBinding {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn initialize(&mut self, _model_path: &Path) -> bool {
        false
    }

    fn detect(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> u32 {
        0
    }

    fn annotate(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> Option<Vec<u8>> {
        None
    }
}
