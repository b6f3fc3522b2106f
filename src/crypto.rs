//! Field-level encryption hooks.
//!
//! The symmetric encryption primitive is an external collaborator:
//! builders only ever call `encrypt_field`/`decrypt_field` through
//! the `FieldCrypto` trait. `AesGcmFieldCrypto` is a concrete
//! implementation (AES-256-GCM via `aes-gcm`, keyed by SHA-256 over a
//! secret), provided so hosts have a working option without reaching for
//! another crate; ciphertext format is opaque to the core.

use crate::error::{Error, Result};
use aes_gcm::aead::{Aead, OsRng, rand_core::RngCore};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[async_trait]
pub trait FieldCrypto: Send + Sync {
    async fn encrypt_field(&self, value: &str) -> Result<String, CryptoError>;
    async fn decrypt_field(&self, ciphertext: &str) -> Result<String, CryptoError>;
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("invalid encrypted data format")]
    InvalidFormat,
}

/// AES-256-GCM field encryption. Ciphertext is `hex(nonce || tag || body)`;
/// the nonce is random per call (never reused), as required for GCM.
pub struct AesGcmFieldCrypto {
    cipher: Aes256Gcm,
}

const NONCE_LEN: usize = 12;

impl AesGcmFieldCrypto {
    pub fn new(secret: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(secret);
        let key = hasher.finalize();
        let cipher = Aes256Gcm::new_from_slice(&key).expect("SHA-256 output is exactly 32 bytes");
        AesGcmFieldCrypto { cipher }
    }
}

#[async_trait]
impl FieldCrypto for AesGcmFieldCrypto {
    async fn encrypt_field(&self, value: &str) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, value.as_bytes())
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(hex::encode(out))
    }

    async fn decrypt_field(&self, ciphertext: &str) -> Result<String, CryptoError> {
        let raw = hex::decode(ciphertext).map_err(|_| CryptoError::InvalidFormat)?;
        if raw.len() < NONCE_LEN {
            return Err(CryptoError::InvalidFormat);
        }
        let (nonce_bytes, body) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, body)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
        String::from_utf8(plaintext).map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}

/// Applies `crypto.encrypt_field` to a string value in place, only if a
/// crypto provider is configured; non-string values, missing fields, and
/// marked fields with no provider configured all pass through untouched.
pub async fn encrypt_marked_fields(
    crypto: Option<&dyn FieldCrypto>,
    data: &mut [(String, crate::value::Value)],
    marked: &std::collections::HashSet<String>,
) -> Result<()> {
    if marked.is_empty() {
        return Ok(());
    }
    let crypto = match crypto {
        Some(c) => c,
        None => return Ok(()),
    };
    for (column, value) in data.iter_mut() {
        if !marked.contains(column) {
            continue;
        }
        if let crate::value::Value::Text(plain) = value {
            let cipher = crypto
                .encrypt_field(plain)
                .await
                .map_err(|e| Error::Connection(e.to_string()))?;
            *value = crate::value::Value::Text(cipher);
        }
    }
    Ok(())
}

/// Applies `crypto.decrypt_field` to marked row fields, swallowing
/// per-field failures (original value retained).
pub async fn decrypt_marked_fields(
    crypto: Option<&dyn FieldCrypto>,
    row: &mut crate::connection::Row,
    marked: &std::collections::HashSet<String>,
) {
    let crypto = match crypto {
        Some(c) => c,
        None => return,
    };
    for column in marked {
        let Some(crate::value::Value::Text(ciphertext)) = row.0.get(column).cloned() else {
            continue;
        };
        match crypto.decrypt_field(&ciphertext).await {
            Ok(plain) => {
                row.0.insert(column.clone(), crate::value::Value::Text(plain));
            }
            Err(err) => {
                tracing::warn!(column = %column, error = %err, "field decryption failed, keeping ciphertext");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_encrypt_and_decrypt() {
        let crypto = AesGcmFieldCrypto::new(b"test secret");
        let ciphertext = crypto.encrypt_field("hello world").await.unwrap();
        assert_ne!(ciphertext, "hello world");
        let plain = crypto.decrypt_field(&ciphertext).await.unwrap();
        assert_eq!(plain, "hello world");
    }

    #[tokio::test]
    async fn two_encryptions_of_the_same_value_differ() {
        let crypto = AesGcmFieldCrypto::new(b"test secret");
        let a = crypto.encrypt_field("hello").await.unwrap();
        let b = crypto.encrypt_field("hello").await.unwrap();
        assert_ne!(a, b, "nonce must be fresh per call");
    }

    #[tokio::test]
    async fn decrypt_rejects_malformed_input() {
        let crypto = AesGcmFieldCrypto::new(b"test secret");
        assert!(crypto.decrypt_field("not hex!!").await.is_err());
    }

    #[tokio::test]
    async fn encrypt_without_crypto_provider_passes_through_untouched() {
        let mut data = vec![("ssn".to_string(), crate::value::Value::from("123-45-6789"))];
        let marked: std::collections::HashSet<String> = ["ssn".to_string()].into_iter().collect();
        encrypt_marked_fields(None, &mut data, &marked).await.unwrap();
        assert_eq!(data[0].1, crate::value::Value::from("123-45-6789"));
    }
}
