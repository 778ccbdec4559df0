//! # Embeddings
//!
//! Query embeddings and the read-only vector index they are searched against.
//!
//! ## Features
//!
//! - **Embedding Providers**: Turn query text into dense vectors (OpenAI-compatible APIs)
//! - **Distance Metrics**: Squared L2, cosine and inner product, all "lower is closer"
//! - **Vector Index**: Immutable index decoded from a self-describing binary container
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Embeddings System                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  EmbeddingProvider ──► Embedding ──► VectorIndex::search        │
//! │       │                                   │                     │
//! │       ▼                                   ▼                     │
//! │  OpenAI-compatible API          Metric ──► Neighbor list        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod index;
pub mod metric;
pub mod provider;

pub use error::{EmbeddingError, Result};
pub use index::{Neighbor, VectorIndex};
pub use metric::Metric;
pub use provider::{EmbeddingProvider, OpenAIProvider};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;
