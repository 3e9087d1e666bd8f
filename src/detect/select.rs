use std::path::Path;

use anyhow::{anyhow, Result};

use super::backend::DetectorBinding;
use super::backends::{NativeEngineBinding, NoOpBinding};

/// Which detection engine the host is configured with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EngineKind {
    /// No engine; detection stays unavailable.
    #[default]
    None,
    /// Shared library implementing the native C ABI.
    Native,
}

impl EngineKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "noop" => Ok(Self::None),
            "native" => Ok(Self::Native),
            other => Err(anyhow!(
                "unknown detector engine '{}' (expected none or native)",
                other
            )),
        }
    }
}

/// Pick the binding for this process.
///
/// A native engine that cannot be loaded degrades to `NoOpBinding`: the
/// preview keeps running with detection unavailable.
pub fn select_binding(engine: EngineKind, library_path: Option<&Path>) -> Box<dyn DetectorBinding> {
    match (engine, library_path) {
        (EngineKind::None, _) => {
            log::info!("detector engine disabled; using no-op binding");
            Box::new(NoOpBinding::new())
        }
        (EngineKind::Native, None) => {
            log::warn!("native detector engine selected without a library path; using no-op binding");
            Box::new(NoOpBinding::new())
        }
        (EngineKind::Native, Some(path)) => match NativeEngineBinding::load(path) {
            Ok(binding) => Box::new(binding),
            Err(err) => {
                log::warn!("{:#}; using no-op binding", err);
                Box::new(NoOpBinding::new())
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_engine_names() {
        assert_eq!(EngineKind::parse("Native").unwrap(), EngineKind::Native);
        assert_eq!(EngineKind::parse("none").unwrap(), EngineKind::None);
        assert!(EngineKind::parse("tract").is_err());
    }

    #[test]
    fn unavailable_engine_degrades_to_noop() {
        assert_eq!(select_binding(EngineKind::None, None).name(), "noop");
        assert_eq!(select_binding(EngineKind::Native, None).name(), "noop");
        let binding = select_binding(
            EngineKind::Native,
            Some(Path::new("/nonexistent/libdetector.so")),
        );
        assert_eq!(binding.name(), "noop");
    }
}
