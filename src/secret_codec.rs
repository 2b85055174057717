//! Reversible codec for account secrets at rest.
//!
//! Stored form is `base64(nonce) ":" base64(ciphertext)` under AES-256-GCM.
//! Rows written by older tooling hold plain percent-encoded text instead; those
//! have no delimiter and are percent-decoded on read.

use aes_gcm::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_SIZE: usize = 12;
const DELIMITER: char = ':';

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("invalid encoded secret: {0}")]
    InvalidFormat(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed (wrong key or corrupted data)")]
    Decryption,

    #[error("decrypted secret is not valid UTF-8")]
    Utf8,
}

#[derive(Clone)]
pub struct SecretCodec {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SecretCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCodec").finish_non_exhaustive()
    }
}

impl SecretCodec {
    /// Derive the AES key from operator-supplied key material.
    pub fn new(key_material: &str) -> Self {
        let key: [u8; 32] = Sha256::digest(key_material.as_bytes()).into();
        Self {
            cipher: Aes256Gcm::new(&key.into()),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, SecretError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| SecretError::Encryption(e.to_string()))?;
        Ok(format!(
            "{}{}{}",
            BASE64.encode(nonce_bytes),
            DELIMITER,
            BASE64.encode(ciphertext)
        ))
    }

    /// Strict decode, used by `decrypt` and by tooling that wants the reason.
    pub fn try_decrypt(&self, stored: &str) -> Result<String, SecretError> {
        let Some((nonce_b64, cipher_b64)) = stored.split_once(DELIMITER) else {
            return Ok(decode_legacy(stored));
        };
        let nonce_bytes = BASE64
            .decode(nonce_b64.trim())
            .map_err(|e| SecretError::InvalidFormat(format!("nonce: {e}")))?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(SecretError::InvalidFormat(format!(
                "nonce must be {NONCE_SIZE} bytes, got {}",
                nonce_bytes.len()
            )));
        }
        let ciphertext = BASE64
            .decode(cipher_b64.trim())
            .map_err(|e| SecretError::InvalidFormat(format!("ciphertext: {e}")))?;
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| SecretError::Decryption)?;
        String::from_utf8(plain).map_err(|_| SecretError::Utf8)
    }

    /// Never fails: a bad secret degrades one account to an empty credential.
    pub fn decrypt(&self, stored: &str) -> String {
        if stored.is_empty() {
            return String::new();
        }
        match self.try_decrypt(stored) {
            Ok(plain) => plain,
            Err(e) => {
                tracing::warn!(error = %e, "secret decode failed, using empty credential");
                String::new()
            }
        }
    }
}

fn decode_legacy(stored: &str) -> String {
    match urlencoding::decode(stored) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => stored.to_string(),
    }
}
