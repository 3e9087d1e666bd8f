//! Detector bindings.
//!
//! The detection engine is opaque: this crate only hands it frames and takes
//! back a detection count and an annotated copy of the frame. `DetectorBinding`
//! is the contract; `select_binding` picks the implementation at startup.

mod backend;
mod backends;
mod select;

pub use backend::DetectorBinding;
pub use backends::{NativeEngineBinding, NoOpBinding};
pub use select::{select_binding, EngineKind};
