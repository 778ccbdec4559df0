//! Error types for the retriever.

use std::fmt;

use exemplar_artifacts::ArtifactError;
use exemplar_embeddings::EmbeddingError;
use thiserror::Error;

/// Result type alias for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Which of the two artifacts an error concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// The vector index.
    Index,
    /// The aligned metadata records.
    Metadata,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Index => f.write_str("index"),
            ArtifactKind::Metadata => f.write_str("metadata"),
        }
    }
}

/// Errors surfaced by the retriever.
///
/// `Clone` because a failed load is memoized and handed to every later caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetrievalError {
    /// Remote artifact unreachable or returned a non-success status.
    #[error("failed to fetch {kind} artifact: {reason}")]
    Fetch { kind: ArtifactKind, reason: String },

    /// Local artifact missing.
    #[error("{kind} artifact not found: {path}")]
    NotFound { kind: ArtifactKind, path: String },

    /// Decryption or authentication failed.
    #[error("{kind} artifact failed integrity check: {reason}")]
    Integrity { kind: ArtifactKind, reason: String },

    /// Decrypted bytes did not parse.
    #[error("malformed {kind} artifact: {reason}")]
    Format { kind: ArtifactKind, reason: String },

    /// Metadata and index disagree on the number of entries.
    #[error("metadata holds {records} records but the index holds {vectors} vectors")]
    Consistency { records: usize, vectors: usize },

    /// Query embedding does not match the index dimension.
    #[error("embedding dimension mismatch: index expects {expected}, provider returned {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Embedding provider failed or returned an unusable vector.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// Caller passed arguments that cannot be served.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Key material missing or malformed.
    #[error("decryption key error: {0}")]
    Key(String),

    /// Configuration could not be read or is incomplete.
    #[error("configuration error: {0}")]
    Config(String),

    /// The background load task did not finish.
    #[error("artifact load aborted: {0}")]
    LoadAborted(String),
}

impl RetrievalError {
    /// Map an artifact error, tagging it with the artifact it concerns.
    pub(crate) fn from_artifact(kind: ArtifactKind, err: ArtifactError) -> Self {
        match err {
            ArtifactError::Fetch { reason, .. } => Self::Fetch { kind, reason },
            ArtifactError::NotFound(path) => Self::NotFound { kind, path },
            ArtifactError::Integrity(reason) => Self::Integrity { kind, reason },
            ArtifactError::InvalidKey(reason) => Self::Key(reason),
            ArtifactError::KeyAlreadyInstalled => Self::Key(err.to_string()),
            ArtifactError::InvalidDescriptor { .. } | ArtifactError::Seal(_) => {
                Self::Config(err.to_string())
            }
        }
    }
}

impl From<EmbeddingError> for RetrievalError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            EmbeddingError::Format(reason) => Self::Format {
                kind: ArtifactKind::Index,
                reason,
            },
            EmbeddingError::ZeroNeighbors | EmbeddingError::NonFiniteDistance { .. } => {
                Self::InvalidRequest(err.to_string())
            }
            other => Self::Embedding(other.to_string()),
        }
    }
}
