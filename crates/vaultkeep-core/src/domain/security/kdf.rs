//! Per-vault key derivation
//!
//! A vault key is HKDF-SHA256 with the server signing key as input keying
//! material, a fixed domain tag as salt and the vault id followed by the
//! vault's *original* owner id as info. Both ids are fixed width, so the info
//! string is unambiguous.
//!
//! The original owner never changes, which keeps the key stable across
//! ownership transfers: data encrypted before a transfer still decrypts after.

use hkdf::Hkdf;
use sha2::Sha256;
use uuid::Uuid;

use super::entity::{KEY_SIZE, SigningKey, VaultKey};
use crate::error::{Error, Result};

/// Salt separating vault field keys from any other use of the signing key
const VAULT_KEY_SALT: &[u8] = b"vaultkeep/vault-field-key/v1";

/// Derive the symmetric key for `vault_id`
pub fn derive_vault_key(
    vault_id: Uuid,
    original_owner_id: Uuid,
    signing_key: &SigningKey,
) -> Result<VaultKey> {
    let mut info = [0u8; 32];
    info[..16].copy_from_slice(vault_id.as_bytes());
    info[16..].copy_from_slice(original_owner_id.as_bytes());

    let hkdf = Hkdf::<Sha256>::new(Some(VAULT_KEY_SALT), signing_key.as_bytes());
    let mut okm = [0u8; KEY_SIZE];
    hkdf.expand(&info, &mut okm)
        .map_err(|_| Error::EncryptionFailure("failed to derive vault key material".to_string()))?;
    Ok(VaultKey::new(okm, vault_id))
}

/// Holds the signing key and hands out vault keys on demand
///
/// The signing key is passed in explicitly rather than read from global
/// configuration, so tests can run with fixed keys.
#[derive(Clone, Debug)]
pub struct KeyDerivationService {
    signing_key: SigningKey,
}

impl KeyDerivationService {
    pub fn new(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    /// Derive the key for a vault from its immutable identifiers
    pub fn derive(&self, vault_id: Uuid, original_owner_id: Uuid) -> Result<VaultKey> {
        derive_vault_key(vault_id, original_owner_id, &self.signing_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_key(byte: u8) -> SigningKey {
        SigningKey::from_bytes(&[byte; KEY_SIZE]).unwrap()
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let service = KeyDerivationService::new(fixed_key(1));
        let vault = Uuid::new_v4();
        let owner = Uuid::new_v4();

        assert_eq!(service.derive(vault, owner).unwrap(), service.derive(vault, owner).unwrap());
    }

    #[test]
    fn test_every_input_changes_the_key() {
        let vault = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let base = derive_vault_key(vault, owner, &fixed_key(1)).unwrap();

        assert_ne!(base, derive_vault_key(Uuid::new_v4(), owner, &fixed_key(1)).unwrap());
        assert_ne!(
            base.as_bytes(),
            derive_vault_key(vault, Uuid::new_v4(), &fixed_key(1)).unwrap().as_bytes()
        );
        assert_ne!(
            base.as_bytes(),
            derive_vault_key(vault, owner, &fixed_key(2)).unwrap().as_bytes()
        );
        // Swapping the two ids is a different info string
        assert_ne!(
            base.as_bytes(),
            derive_vault_key(owner, vault, &fixed_key(1)).unwrap().as_bytes()
        );
    }

    #[test]
    fn test_key_is_not_the_signing_key() {
        let signing = fixed_key(5);
        let key = derive_vault_key(Uuid::nil(), Uuid::nil(), &signing).unwrap();
        assert_ne!(key.as_bytes(), signing.as_bytes());
        assert_eq!(key.vault_id(), Uuid::nil());
    }
}
