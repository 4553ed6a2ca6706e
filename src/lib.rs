pub mod config;
pub mod core;
pub mod runtime;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::{ConfigError, PipelineConfig};
pub use crate::core::*;
pub use runtime::PipelineRuntime;
