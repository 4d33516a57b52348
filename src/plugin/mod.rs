//! Plugin system module
//!
//! This module provides the executable side of the pipeline:
//! - Artifact manager for downloading and verifying spider modules
//! - Entry-name candidate tables
//! - Loader caching spider instances and running the content methods
//! - Native loader for spider modules built as dynamic libraries

pub mod artifact;
pub mod candidates;
pub mod loader;
pub mod native;
pub mod types;

pub use artifact::{ArtifactManager, ArtifactRef};
pub use candidates::{entry_candidates, CandidateTable};
pub use loader::{LoadedPlugin, PluginLoader};
pub use native::NativeOpener;
pub use types::{ModuleOpener, PluginArtifact, Spider, SpiderMethod, SpiderModule, SpiderResult};
