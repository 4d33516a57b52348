//! vodbox
//!
//! This library turns remotely hosted, often obfuscated video source configs
//! into canonical video items. It decodes source payloads, verifies and loads
//! spider plugins, and normalizes their results.

pub mod core;
pub mod plugin;
pub mod source;

// Re-export commonly used types
pub use crate::core::{Config, VodError};
pub use plugin::{PluginLoader, Spider};
pub use source::{SourcePipeline, VideoItem};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
