//! # Retrieval
//!
//! Surfaces the reference exemplars most similar to a free-text input.
//!
//! A [`Retriever`] owns two sealed artifacts: a vector index and a metadata
//! document with one record per vector. On the first query it fetches,
//! decrypts and parses both exactly once, then serves every query from the
//! cached, immutable [`Corpus`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Retriever                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ArtifactSource ──► open (AEAD) ──► VectorIndex ─┐              │
//! │  ArtifactSource ──► open (AEAD) ──► Metadata ────┴─► Corpus     │
//! │                                                      │          │
//! │  query text ──► EmbeddingProvider ──► vector ──► search         │
//! │                                                      │          │
//! │                                                      ▼          │
//! │                                               NeighborResult    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use exemplar_retrieval::{RetrievalConfig, Retriever};
//!
//! let config = RetrievalConfig::load("exemplar.toml")?;
//! let retriever = Retriever::from_config(&config, embedder)?;
//!
//! for hit in retriever.get_nearest_neighbors("How would you enter China?", 3).await? {
//!     println!("{:.3} {:?}", hit.distance, hit.record);
//! }
//! ```

pub mod config;
pub mod corpus;
pub mod error;
pub mod metadata;
pub mod retriever;

pub use config::{DEFAULT_NEIGHBORS, EmbeddingConfig, RetrievalConfig};
pub use corpus::{Corpus, NeighborResult, ScoredRecord};
pub use error::{ArtifactKind, Result, RetrievalError};
pub use metadata::{MetadataRecord, encode_metadata, parse_metadata};
pub use retriever::{LoadState, Retriever, RetrieverBuilder};

// Re-export from dependencies for convenience
pub use exemplar_artifacts::{ArtifactDescriptor, ArtifactSource, DecryptionKey};
pub use exemplar_embeddings::{EmbeddingProvider, Metric, VectorIndex};
