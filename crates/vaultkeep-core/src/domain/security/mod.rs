//! Security domain module
//!
//! Per-vault field encryption with keys derived on demand.
//!
//! # Architecture
//!
//! - **Entities**: `SigningKey`, `VaultKey`, `SecureString`
//! - **Key derivation**: `KeyDerivationService` (HKDF-SHA256 over vault id,
//!   original owner id and the server signing key)
//! - **Codec**: `EncryptionCodec` (AES-256-GCM, vault id as associated data)
//!
//! # Security Features
//!
//! - No key material is ever persisted or returned to callers
//! - Keys are zeroized on drop and redacted in debug output
//! - Unique nonce per encryption operation
//! - Decrypt failures surface as a distinct error, never as empty text

pub mod codec;
pub mod entity;
pub mod kdf;

pub use codec::EncryptionCodec;
pub use entity::{KEY_SIZE, SecureString, SigningKey, VaultKey};
pub use kdf::{KeyDerivationService, derive_vault_key};
