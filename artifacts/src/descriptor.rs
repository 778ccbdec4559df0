//! Where an artifact lives.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

use crate::error::{ArtifactError, Result};

/// Location of an artifact: a local file or an HTTP(S) URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactDescriptor {
    /// File on local storage.
    Local(PathBuf),
    /// Object fetched with a GET request.
    Remote(Url),
}

impl ArtifactDescriptor {
    /// Parse a descriptor string.
    ///
    /// `http://` and `https://` are remote, `file://` and bare paths are
    /// local. Any other URL scheme is rejected.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(invalid(input, "empty descriptor"));
        }

        match Url::parse(input) {
            Ok(url) => match url.scheme() {
                "http" | "https" => Ok(Self::Remote(url)),
                "file" => url
                    .to_file_path()
                    .map(Self::Local)
                    .map_err(|()| invalid(input, "file URL has no local path")),
                // Windows drive letters parse as one-letter schemes.
                scheme if scheme.len() == 1 => Ok(Self::Local(PathBuf::from(input))),
                scheme => Err(invalid(input, &format!("unsupported scheme {scheme:?}"))),
            },
            Err(_) => Ok(Self::Local(PathBuf::from(input))),
        }
    }

    /// Resolve a relative local path against `base`. Remote descriptors and
    /// absolute paths are returned unchanged.
    pub fn resolve_against(self, base: &Path) -> Self {
        match self {
            Self::Local(path) if path.is_relative() => Self::Local(base.join(path)),
            other => other,
        }
    }

    /// Check if this descriptor points at a remote location.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

fn invalid(descriptor: &str, reason: &str) -> ArtifactError {
    ArtifactError::InvalidDescriptor {
        descriptor: descriptor.to_string(),
        reason: reason.to_string(),
    }
}

impl fmt::Display for ArtifactDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote(url) => write!(f, "{url}"),
        }
    }
}

impl FromStr for ArtifactDescriptor {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for ArtifactDescriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ArtifactDescriptor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
