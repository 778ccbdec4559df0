//! # Artifacts
//!
//! Read-only access to the two sealed artifacts a retriever needs.
//!
//! ```text
//! ArtifactDescriptor ──► ArtifactSource::fetch ──► EncryptedArtifact
//!                                                        │
//!                               DecryptionKey ──► open ──┘──► plaintext
//! ```
//!
//! Sources never retry and never write. Decryption is authenticated: a wrong
//! key or any modified byte is an [`ArtifactError::Integrity`], never garbage.

pub mod crypto;
pub mod descriptor;
pub mod error;
pub mod key;
pub mod source;

pub use crypto::{open, seal};
pub use descriptor::ArtifactDescriptor;
pub use error::{ArtifactError, Result};
pub use key::{DecryptionKey, install_process_key, process_key};
pub use source::{
    ArtifactSource, EncryptedArtifact, FetchConfig, LocalFileSource, RemoteSource, open_source,
};
