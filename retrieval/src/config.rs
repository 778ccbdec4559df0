//! Configuration for the retriever.

use std::path::{Path, PathBuf};

use exemplar_artifacts::{ArtifactDescriptor, FetchConfig};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RetrievalError};

/// Neighbor count used by [`crate::Retriever::query`].
pub const DEFAULT_NEIGHBORS: usize = 3;

/// Configuration for the retriever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Where the two sealed artifacts live.
    pub artifacts: ArtifactsConfig,

    /// Remote fetch timeouts.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Query embedding configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Neighbors returned when the caller does not ask for a count.
    #[serde(default = "default_neighbors")]
    pub default_neighbors: usize,
}

fn default_neighbors() -> usize {
    DEFAULT_NEIGHBORS
}

impl RetrievalConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(input).map_err(|e| RetrievalError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file. Relative local artifact paths resolve against the
    /// file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RetrievalError::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut config = Self::from_toml_str(&contents)?;

        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(PathBuf::new);
        config.artifacts.index = config.artifacts.index.resolve_against(&base);
        config.artifacts.metadata = config.artifacts.metadata.resolve_against(&base);
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.default_neighbors == 0 {
            return Err(RetrievalError::Config(
                "default_neighbors must be at least 1".to_string(),
            ));
        }
        if self.artifacts.key_env.trim().is_empty() {
            return Err(RetrievalError::Config("artifacts.key_env is empty".to_string()));
        }
        Ok(())
    }
}

/// Locations of the sealed artifacts and of their key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    /// Sealed vector index.
    pub index: ArtifactDescriptor,

    /// Sealed metadata document.
    pub metadata: ArtifactDescriptor,

    /// Environment variable holding the base64 decryption key.
    #[serde(default = "default_key_env")]
    pub key_env: String,
}

fn default_key_env() -> String {
    "EXEMPLAR_ARTIFACT_KEY".to_string()
}

/// Configuration for the query embedding provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Model to request.
    pub model: String,

    /// API base URL.
    pub base_url: String,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    /// Output dimensions to request, for models that can shorten vectors.
    pub dimensions: Option<usize>,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            dimensions: None,
            timeout_secs: 30,
        }
    }
}
