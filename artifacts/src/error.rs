//! Error types for artifact access.

use thiserror::Error;

/// Result type alias for artifact operations.
pub type Result<T> = std::result::Result<T, ArtifactError>;

/// Errors that can occur while fetching or opening an artifact.
#[derive(Error, Debug)]
pub enum ArtifactError {
    /// Remote artifact unreachable, non-success status, or unreadable file.
    #[error("failed to fetch {descriptor}: {reason}")]
    Fetch { descriptor: String, reason: String },

    /// Local artifact missing.
    #[error("artifact not found: {0}")]
    NotFound(String),

    /// Authentication failed or the envelope is not one we produce.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// Descriptor could not be parsed.
    #[error("invalid artifact descriptor {descriptor:?}: {reason}")]
    InvalidDescriptor { descriptor: String, reason: String },

    /// Key material is malformed.
    #[error("invalid decryption key: {0}")]
    InvalidKey(String),

    /// The process-wide key was already installed.
    #[error("process decryption key is already installed")]
    KeyAlreadyInstalled,

    /// Sealing failed (random source unavailable).
    #[error("failed to seal artifact: {0}")]
    Seal(String),
}
