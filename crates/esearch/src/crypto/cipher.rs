//! AEAD encryption of content records
//!
//! Records are serialized to JSON, compressed with zstd and sealed with
//! XChaCha20-Poly1305 under a fresh random 24-byte nonce.

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};

use super::key_vault::IndexKey;
use crate::error::{IndexError, Result};
use crate::models::ContentRecord;

/// XChaCha20-Poly1305 nonce length
pub const NONCE_LEN: usize = 24;

const COMPRESSION_LEVEL: i32 = 3;

/// Nonce + ciphertext of one sealed record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedRecord {
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Encrypts and decrypts content records with one user's index key
pub struct Cipher {
    aead: XChaCha20Poly1305,
}

impl Cipher {
    pub fn new(key: &IndexKey) -> Self {
        Self {
            aead: XChaCha20Poly1305::new(Key::from_slice(key.as_bytes())),
        }
    }

    pub fn encrypt(&self, record: &ContentRecord) -> Result<SealedRecord> {
        let plaintext = serde_json::to_vec(record)?;
        let compressed = zstd::encode_all(plaintext.as_slice(), COMPRESSION_LEVEL)
            .map_err(|e| IndexError::Serialization(format!("compression failed: {e}")))?;

        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .aead
            .encrypt(&nonce, compressed.as_slice())
            .map_err(|_| IndexError::Serialization("encryption failed".into()))?;

        Ok(SealedRecord {
            iv: nonce.to_vec(),
            ciphertext,
        })
    }

    /// Fails with `AuthenticationFailed` on a wrong key, a wrong nonce or
    /// tampered ciphertext.
    pub fn decrypt(&self, iv: &[u8], ciphertext: &[u8]) -> Result<ContentRecord> {
        if iv.len() != NONCE_LEN {
            return Err(IndexError::AuthenticationFailed);
        }
        let nonce = XNonce::from_slice(iv);
        let compressed = self
            .aead
            .decrypt(nonce, ciphertext)
            .map_err(|_| IndexError::AuthenticationFailed)?;

        let plaintext = zstd::decode_all(compressed.as_slice())
            .map_err(|e| IndexError::Serialization(format!("decompression failed: {e}")))?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

/// Seal `record` under `key`
pub fn encrypt(record: &ContentRecord, key: &IndexKey) -> Result<SealedRecord> {
    Cipher::new(key).encrypt(record)
}

/// Open a record sealed under `key`
pub fn decrypt(iv: &[u8], ciphertext: &[u8], key: &IndexKey) -> Result<ContentRecord> {
    Cipher::new(key).decrypt(iv, ciphertext)
}
