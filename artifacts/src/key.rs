//! The artifact decryption key.

use std::fmt;
use std::sync::{Arc, OnceLock};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{ArtifactError, Result};

/// Key length in bytes.
pub const KEY_LEN: usize = 32;

static PROCESS_KEY: OnceLock<Arc<DecryptionKey>> = OnceLock::new();

/// Symmetric key for sealed artifacts.
///
/// Never printed, never persisted. Key material is securely zeroized from
/// memory when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DecryptionKey {
    bytes: [u8; KEY_LEN],
}

impl DecryptionKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Decode a standard-alphabet base64 key of exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = Zeroizing::new(
            STANDARD
                .decode(encoded.trim())
                .map_err(|e| ArtifactError::InvalidKey(format!("not valid base64: {e}")))?,
        );
        let bytes: [u8; KEY_LEN] = decoded.as_slice().try_into().map_err(|_| {
            ArtifactError::InvalidKey(format!(
                "expected {KEY_LEN} bytes, got {}",
                decoded.len()
            ))
        })?;
        Ok(Self { bytes })
    }

    /// Read a base64 key from the environment variable `var`.
    pub fn from_env(var: &str) -> Result<Self> {
        let encoded = Zeroizing::new(
            std::env::var(var)
                .map_err(|_| ArtifactError::InvalidKey(format!("environment variable {var} is not set")))?,
        );
        Self::from_base64(&encoded)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for DecryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DecryptionKey(<redacted>)")
    }
}

/// Install the key used by the whole process. Call once at startup.
pub fn install_process_key(key: DecryptionKey) -> Result<Arc<DecryptionKey>> {
    let key = Arc::new(key);
    PROCESS_KEY
        .set(Arc::clone(&key))
        .map_err(|_| ArtifactError::KeyAlreadyInstalled)?;
    Ok(key)
}

/// The key installed with [`install_process_key`], if any.
pub fn process_key() -> Option<Arc<DecryptionKey>> {
    PROCESS_KEY.get().cloned()
}
