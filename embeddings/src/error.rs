//! Error types for the embeddings system.

use thiserror::Error;

/// Result type alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Errors that can occur in the embeddings system.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// Provider not configured.
    #[error("embedding provider not configured")]
    ProviderNotConfigured,

    /// API request failed.
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// Invalid response from provider.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A vector contains NaN or infinite components.
    #[error("vector has a non-finite component at position {position}")]
    NonFinite { position: usize },

    /// A query overflowed `f32` against a stored vector.
    #[error("distance to vector {ordinal} is not finite")]
    NonFiniteDistance { ordinal: usize },

    /// Search asked for zero neighbors.
    #[error("neighbor count must be at least 1")]
    ZeroNeighbors,

    /// Malformed index container.
    #[error("malformed index container: {0}")]
    Format(String),

    /// HTTP error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
