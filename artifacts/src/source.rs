//! Artifact sources.
//!
//! One trait, two implementations. Callers hold an `Arc<dyn ArtifactSource>`
//! and never care where the bytes come from.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::descriptor::ArtifactDescriptor;
use crate::error::{ArtifactError, Result};

/// Raw sealed bytes together with where they came from.
#[derive(Debug, Clone)]
pub struct EncryptedArtifact {
    descriptor: ArtifactDescriptor,
    bytes: Vec<u8>,
}

impl EncryptedArtifact {
    /// Wrap fetched bytes.
    pub fn new(descriptor: ArtifactDescriptor, bytes: Vec<u8>) -> Self {
        Self { descriptor, bytes }
    }

    /// Where the bytes were fetched from.
    pub fn descriptor(&self) -> &ArtifactDescriptor {
        &self.descriptor
    }

    /// The sealed bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// A read-only supplier of one artifact.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Location this source reads from.
    fn descriptor(&self) -> &ArtifactDescriptor;

    /// Fetch the sealed bytes. No retries.
    async fn fetch(&self) -> Result<EncryptedArtifact>;
}

/// Timeouts for remote fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Whole-request timeout in seconds.
    pub timeout_secs: u64,

    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

/// Build the source matching `descriptor`.
pub fn open_source(
    descriptor: &ArtifactDescriptor,
    config: &FetchConfig,
) -> Result<Arc<dyn ArtifactSource>> {
    Ok(match descriptor {
        ArtifactDescriptor::Local(path) => Arc::new(LocalFileSource::new(path.clone())),
        ArtifactDescriptor::Remote(url) => Arc::new(RemoteSource::new(url.clone(), config)?),
    })
}

/// Reads an artifact from local storage.
pub struct LocalFileSource {
    descriptor: ArtifactDescriptor,
    path: PathBuf,
}

impl LocalFileSource {
    /// Create a source for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            descriptor: ArtifactDescriptor::Local(path.clone()),
            path,
        }
    }
}

#[async_trait]
impl ArtifactSource for LocalFileSource {
    fn descriptor(&self) -> &ArtifactDescriptor {
        &self.descriptor
    }

    async fn fetch(&self) -> Result<EncryptedArtifact> {
        debug!("Reading artifact from {}", self.path.display());

        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ArtifactError::NotFound(self.path.display().to_string())
            } else {
                ArtifactError::Fetch {
                    descriptor: self.descriptor.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        info!("Read {} bytes from {}", bytes.len(), self.path.display());
        Ok(EncryptedArtifact::new(self.descriptor.clone(), bytes))
    }
}

/// Fetches an artifact with a single HTTP GET.
pub struct RemoteSource {
    descriptor: ArtifactDescriptor,
    url: Url,
    client: reqwest::Client,
}

impl RemoteSource {
    /// Create a source for `url` with the configured timeouts.
    pub fn new(url: Url, config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| ArtifactError::Fetch {
                descriptor: url.to_string(),
                reason: format!("cannot build HTTP client: {e}"),
            })?;

        Ok(Self {
            descriptor: ArtifactDescriptor::Remote(url.clone()),
            url,
            client,
        })
    }

    fn fetch_error(&self, reason: impl Into<String>) -> ArtifactError {
        ArtifactError::Fetch {
            descriptor: self.descriptor.to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ArtifactSource for RemoteSource {
    fn descriptor(&self) -> &ArtifactDescriptor {
        &self.descriptor
    }

    async fn fetch(&self) -> Result<EncryptedArtifact> {
        debug!("Fetching artifact from {}", self.url);

        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| self.fetch_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.fetch_error(format!("HTTP status {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.fetch_error(e.to_string()))?;

        info!("Fetched {} bytes from {}", bytes.len(), self.url);
        Ok(EncryptedArtifact::new(self.descriptor.clone(), bytes.to_vec()))
    }
}
