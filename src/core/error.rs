//! Error type system for vodbox
//!
//! This module provides the error types used across the pipeline:
//! - A crate-level error (`VodError`) that callers see at the source boundary
//! - Stage errors for decoding, artifact management, loading and invocation

use std::fmt;

/// Main error type for the vodbox pipeline
#[derive(Debug, thiserror::Error)]
pub enum VodError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl VodError {
    /// Get the error type name used in structured logs
    pub fn error_type(&self) -> &'static str {
        match self {
            VodError::ConfigError(_) => "ConfigError",
            VodError::Decode(_) => "DecodeError",
            VodError::ParseError(_) => "ParseError",
            VodError::Artifact(_) => "ArtifactError",
            VodError::Load(_) => "LoadError",
            VodError::SourceNotFound(_) => "SourceNotFound",
            VodError::Unsupported(_) => "Unsupported",
            VodError::NetworkError(_) => "NetworkError",
            VodError::IoError(_) => "IoError",
        }
    }

    /// Check if this error is retryable
    ///
    /// Checksum mismatches are deliberately not retryable: the artifact manager
    /// already re-downloaded once before surfacing them.
    pub fn is_retryable(&self) -> bool {
        match self {
            VodError::NetworkError(_) => true,
            VodError::Decode(e) => e.stage == DecodeStage::Fetch,
            VodError::Artifact(ArtifactError::Network(_)) => true,
            _ => false,
        }
    }
}

/// Stage of the payload decoder that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    /// The raw bytes could not be fetched
    Fetch,
    /// The payload was empty after trimming
    Empty,
    /// Bitmap header or hidden-region extraction failed
    Bitmap,
    /// Hex body of an encrypted payload was malformed
    Hex,
    /// AES/CBC key extraction or decryption failed
    Cipher,
    /// Decoded bytes were not valid text
    Text,
}

impl fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DecodeStage::Fetch => "fetch",
            DecodeStage::Empty => "empty",
            DecodeStage::Bitmap => "bitmap",
            DecodeStage::Hex => "hex",
            DecodeStage::Cipher => "cipher",
            DecodeStage::Text => "text",
        };
        f.write_str(name)
    }
}

/// A payload could not be decoded
#[derive(Debug, Clone, thiserror::Error)]
#[error("Failed to decode {url} at {stage} stage: {reason}")]
pub struct DecodeError {
    pub url: String,
    pub stage: DecodeStage,
    pub reason: String,
}

impl DecodeError {
    pub fn new(url: impl Into<String>, stage: DecodeStage, reason: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stage,
            reason: reason.into(),
        }
    }
}

/// Plugin artifact download and verification errors
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Artifact download failed: {0}")]
    Network(String),

    #[error("Artifact checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Artifact download returned an empty body: {0}")]
    EmptyBody(String),

    #[error("Invalid artifact reference: {0}")]
    InvalidRef(String),

    #[error("Artifact IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Plugin module loading errors
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Spider entry {entry} not found, tried: {}", candidates.join(", "))]
    EntryNotFound {
        entry: String,
        candidates: Vec<String>,
    },

    #[error("Failed to instantiate spider {entry}: {reason}")]
    InstantiationFailed { entry: String, reason: String },

    #[error("Failed to open plugin module {path}: {reason}")]
    ModuleOpen { path: String, reason: String },
}

/// Failure of a single plugin invocation
///
/// Invoke errors never leave the loaded plugin: they are logged and turned
/// into an empty result for that call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InvokeError {
    #[error("Spider has no method {0}")]
    MissingMethod(String),

    #[error("Spider method {method} failed: {reason}")]
    Failed { method: String, reason: String },

    #[error("Spider method {0} panicked")]
    Panicked(String),

    #[error("Spider method {method} returned an invalid result: {reason}")]
    InvalidResult { method: String, reason: String },
}

/// Errors raised by a `Fetcher`
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Request failed: {0}")]
    Network(String),

    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for operations that can fail with VodError
pub type Result<T> = std::result::Result<T, VodError>;
