//! Security domain entities
//!
//! Key material types. Every type here is zeroized on drop and redacts itself
//! in `Debug` output.

use base64::{Engine, engine::general_purpose::STANDARD};
use rand::{RngCore, rngs::OsRng};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// Size of AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// The process-wide server secret that every vault key is derived from
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SigningKey {
    bytes: [u8; KEY_SIZE],
}

impl SigningKey {
    /// Generate a new random signing key
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Create a signing key from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(Error::InvalidSigningKey(format!(
                "expected {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }
        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Create a signing key from a hex-encoded string
    pub fn from_hex(hex: &str) -> Result<Self> {
        let mut bytes =
            hex::decode(hex.trim()).map_err(|e| Error::InvalidSigningKey(e.to_string()))?;
        let key = Self::from_bytes(&bytes);
        bytes.zeroize();
        key
    }

    /// Create a signing key from a base64-encoded string
    pub fn from_base64(b64: &str) -> Result<Self> {
        let mut bytes = STANDARD
            .decode(b64.trim())
            .map_err(|e| Error::InvalidSigningKey(e.to_string()))?;
        let key = Self::from_bytes(&bytes);
        bytes.zeroize();
        key
    }

    /// Accept either encoding; 64 hex characters win over base64
    pub fn parse(encoded: &str) -> Result<Self> {
        let trimmed = encoded.trim();
        if trimmed.len() == KEY_SIZE * 2 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            Self::from_hex(trimmed)
        } else {
            Self::from_base64(trimmed)
        }
    }

    /// Export key as hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A symmetric key scoped to one vault
///
/// Never persisted. Recomputed for every encrypt/decrypt call and dropped
/// (zeroized) right after.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct VaultKey {
    bytes: [u8; KEY_SIZE],
    #[zeroize(skip)]
    vault_id: Uuid,
}

impl VaultKey {
    pub(crate) fn new(bytes: [u8; KEY_SIZE], vault_id: Uuid) -> Self {
        Self { bytes, vault_id }
    }

    /// Vault this key belongs to; bound into every ciphertext as associated data
    pub fn vault_id(&self) -> Uuid {
        self.vault_id
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl PartialEq for VaultKey {
    fn eq(&self, other: &Self) -> bool {
        self.vault_id == other.vault_id && self.bytes == other.bytes
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultKey")
            .field("vault_id", &self.vault_id)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A string that is securely zeroed when dropped
#[derive(Clone, Zeroize, ZeroizeOnDrop, PartialEq, Eq)]
pub struct SecureString {
    inner: String,
}

impl SecureString {
    /// Create a new secure string
    pub fn new(s: String) -> Self {
        Self { inner: s }
    }

    /// Get the string value
    pub fn as_str(&self) -> &str {
        &self.inner
    }
}

impl std::fmt::Debug for SecureString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureString")
            .field("inner", &"[REDACTED]")
            .finish()
    }
}

impl AsRef<str> for SecureString {
    fn as_ref(&self) -> &str {
        &self.inner
    }
}

impl From<&str> for SecureString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_key_generation() {
        let key1 = SigningKey::generate();
        let key2 = SigningKey::generate();
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_signing_key_invalid_length() {
        let result = SigningKey::from_bytes(&[7u8; 16]);
        assert!(matches!(result, Err(Error::InvalidSigningKey(_))));
    }

    #[test]
    fn test_signing_key_hex_roundtrip() {
        let key = SigningKey::generate();
        let restored = SigningKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(key.as_bytes(), restored.as_bytes());
    }

    #[test]
    fn test_parse_accepts_both_encodings() {
        let bytes = [42u8; KEY_SIZE];
        let from_hex = SigningKey::parse(&hex::encode(bytes)).unwrap();
        let from_b64 = SigningKey::parse(&STANDARD.encode(bytes)).unwrap();
        assert_eq!(from_hex.as_bytes(), &bytes);
        assert_eq!(from_b64.as_bytes(), &bytes);

        assert!(SigningKey::parse("not a key").is_err());
    }

    #[test]
    fn test_debug_output_is_redacted() {
        let key = SigningKey::from_bytes(&[1u8; KEY_SIZE]).unwrap();
        assert!(format!("{:?}", key).contains("[REDACTED]"));

        let vault_key = VaultKey::new([9u8; KEY_SIZE], Uuid::nil());
        let debug = format!("{:?}", vault_key);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("9, 9"));

        let secret = SecureString::from("hunter2");
        assert!(!format!("{:?}", secret).contains("hunter2"));
    }
}
