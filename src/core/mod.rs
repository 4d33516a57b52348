//! Core module
//!
//! This module provides the ambient layer shared by the pipeline:
//! - Configuration management
//! - Structured logging system
//! - Error handling and type system
//! - Cipher and digest helpers
//! - HTTP and local fetching
//! - URL resolution and header annotations

pub mod config;
pub mod crypto;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod url;

pub use config::Config;
pub use error::{Result, VodError};
pub use fetch::{Fetcher, HttpFetcher};
pub use logging::Logger;
pub use url::AnnotatedUrl;
