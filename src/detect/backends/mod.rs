pub mod native;
pub mod noop;

pub use native::NativeEngineBinding;
pub use noop::NoOpBinding;
