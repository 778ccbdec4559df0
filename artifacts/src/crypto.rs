//! Sealed artifact envelope.
//!
//! Format: `magic(4) || version(1) || alg(1) || nonce(12) || ciphertext || tag(16)`
//!
//! The 6-byte header is authenticated as associated data, so every byte of
//! the envelope is covered by the Poly1305 tag.

use ring::aead::{Aad, CHACHA20_POLY1305, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use tracing::debug;

use crate::error::{ArtifactError, Result};
use crate::key::DecryptionKey;

const MAGIC: &[u8; 4] = b"EXAE";
const VERSION: u8 = 1;
const ALG_CHACHA20_POLY1305: u8 = 1;
const HEADER_LEN: usize = 6;
const TAG_LEN: usize = 16;

/// Minimum envelope size: header + nonce + tag (empty plaintext).
const MIN_ENVELOPE_LEN: usize = HEADER_LEN + NONCE_LEN + TAG_LEN;

fn header() -> [u8; HEADER_LEN] {
    [
        MAGIC[0],
        MAGIC[1],
        MAGIC[2],
        MAGIC[3],
        VERSION,
        ALG_CHACHA20_POLY1305,
    ]
}

fn aead_key(key: &DecryptionKey) -> Result<LessSafeKey> {
    let unbound = UnboundKey::new(&CHACHA20_POLY1305, key.as_bytes())
        .map_err(|_| ArtifactError::InvalidKey("rejected by cipher".to_string()))?;
    Ok(LessSafeKey::new(unbound))
}

/// Encrypt `plaintext` into a sealed envelope with a fresh random nonce.
pub fn seal(key: &DecryptionKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| ArtifactError::Seal("random generation failed".to_string()))?;

    let header = header();
    let mut in_out = plaintext.to_vec();
    aead_key(key)?
        .seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::from(header),
            &mut in_out,
        )
        .map_err(|_| ArtifactError::Seal("encryption failed".to_string()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + NONCE_LEN + in_out.len());
    out.extend_from_slice(&header);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&in_out);
    Ok(out)
}

/// Decrypt and verify a sealed envelope.
///
/// Every failure, including a truncated or unrecognized envelope, is an
/// [`ArtifactError::Integrity`].
pub fn open(key: &DecryptionKey, envelope: &[u8]) -> Result<Vec<u8>> {
    if envelope.len() < MIN_ENVELOPE_LEN {
        return Err(ArtifactError::Integrity(format!(
            "envelope too short: expected at least {MIN_ENVELOPE_LEN} bytes, got {}",
            envelope.len()
        )));
    }

    let (header_bytes, rest) = envelope.split_at(HEADER_LEN);
    if header_bytes != header() {
        return Err(ArtifactError::Integrity(
            "unrecognized envelope header".to_string(),
        ));
    }

    let (nonce_bytes, sealed) = rest.split_at(NONCE_LEN);
    let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
        .map_err(|_| ArtifactError::Integrity("bad nonce".to_string()))?;

    let mut in_out = sealed.to_vec();
    let plaintext_len = aead_key(key)?
        .open_in_place(nonce, Aad::from(header()), &mut in_out)
        .map_err(|_| {
            ArtifactError::Integrity("authentication failed: wrong key or modified data".to_string())
        })?
        .len();
    in_out.truncate(plaintext_len);

    debug!("Opened sealed envelope ({plaintext_len} plaintext bytes)");
    Ok(in_out)
}
