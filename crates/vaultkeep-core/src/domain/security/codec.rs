//! Field encryption
//!
//! AES-256-GCM over a single text field. The output is
//! `v1.` + base64(nonce || ciphertext || tag), with the vault id bound in as
//! associated data so a ciphertext copied into another vault fails to open.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use rand::{RngCore, rngs::OsRng};

use super::entity::{SecureString, VaultKey};
use crate::error::{Error, Result};

/// Size of AES-GCM nonce in bytes
const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes
const TAG_SIZE: usize = 16;

/// Version prefix of the serialized format
const FORMAT_PREFIX: &str = "v1.";

/// Stateless symmetric codec for sensitive item fields
#[derive(Debug, Clone, Copy, Default)]
pub struct EncryptionCodec;

impl EncryptionCodec {
    /// Encrypt `plaintext` under `key`
    pub fn encrypt(&self, plaintext: &str, key: &VaultKey) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| Error::EncryptionFailure(e.to_string()))?;

        let aad = key.vault_id();
        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|e| Error::EncryptionFailure(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(format!("{}{}", FORMAT_PREFIX, STANDARD.encode(sealed)))
    }

    /// Decrypt a value produced by [`EncryptionCodec::encrypt`]
    ///
    /// Wrong key, wrong vault, truncation and bit flips all fail with
    /// [`Error::EncryptionFailure`]; nothing is ever returned as an empty string.
    pub fn decrypt(&self, ciphertext: &str, key: &VaultKey) -> Result<SecureString> {
        let encoded = ciphertext
            .strip_prefix(FORMAT_PREFIX)
            .ok_or_else(|| Error::EncryptionFailure("unknown ciphertext format".to_string()))?;

        let sealed = STANDARD
            .decode(encoded)
            .map_err(|e| Error::EncryptionFailure(format!("invalid encoding: {}", e)))?;

        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(Error::EncryptionFailure("ciphertext truncated".to_string()));
        }

        let (nonce_bytes, body) = sealed.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| Error::EncryptionFailure(e.to_string()))?;

        let aad = key.vault_id();
        let plaintext = cipher
            .decrypt(
                nonce,
                Payload {
                    msg: body,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| {
                Error::EncryptionFailure(
                    "authentication failed (wrong key or corrupted data)".to_string(),
                )
            })?;

        let text = String::from_utf8(plaintext)
            .map_err(|_| Error::EncryptionFailure("plaintext is not UTF-8".to_string()))?;

        Ok(SecureString::new(text))
    }
}
