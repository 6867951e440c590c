//! Item entities
//!
//! Item metadata (title, description, type) is stored in plaintext. The
//! payload is a closed sum type with one variant per item kind; its sensitive
//! fields only ever reach storage as ciphertext.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::security::{EncryptionCodec, SecureString, VaultKey};
use crate::error::Result;

/// Kind of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Document,
    Password,
    Note,
    Link,
    CryptoWallet,
}

impl ItemType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "document" => Some(Self::Document),
            "password" => Some(Self::Password),
            "note" => Some(Self::Note),
            "link" => Some(Self::Link),
            "crypto_wallet" => Some(Self::CryptoWallet),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Password => "password",
            Self::Note => "note",
            Self::Link => "link",
            Self::CryptoWallet => "crypto_wallet",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Item lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Active,
    Deleted,
}

impl ItemStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deleted => "deleted",
        }
    }
}

/// Per-item grant stored for a member
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemGrant {
    View,
    Edit,
}

impl ItemGrant {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "view" => Some(Self::View),
            "edit" => Some(Self::Edit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Edit => "edit",
        }
    }
}

impl fmt::Display for ItemGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Item metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultItem {
    pub id: Uuid,
    pub vault_id: Uuid,
    pub created_by_user_id: Uuid,
    pub item_type: ItemType,
    pub title: String,
    pub description: Option<String>,
    pub status: ItemStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<Uuid>,
}

impl VaultItem {
    pub fn is_active(&self) -> bool {
        self.status == ItemStatus::Active
    }
}

/// Decrypted item contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemPayload {
    Password {
        username: Option<String>,
        website_url: Option<String>,
        password: SecureString,
        notes: Option<SecureString>,
    },
    Note {
        content: SecureString,
    },
    Link {
        url: String,
        notes: Option<SecureString>,
    },
    CryptoWallet {
        wallet_type: String,
        public_address: Option<String>,
        secret: SecureString,
        notes: Option<SecureString>,
    },
    /// File bytes live in external object storage under `storage_key`
    Document {
        file_name: String,
        content_type: String,
        size_bytes: i64,
        storage_key: String,
    },
}

impl ItemPayload {
    pub fn item_type(&self) -> ItemType {
        match self {
            Self::Password { .. } => ItemType::Password,
            Self::Note { .. } => ItemType::Note,
            Self::Link { .. } => ItemType::Link,
            Self::CryptoWallet { .. } => ItemType::CryptoWallet,
            Self::Document { .. } => ItemType::Document,
        }
    }

    /// Encrypt the sensitive fields for storage
    pub(crate) fn seal(&self, codec: &EncryptionCodec, key: &VaultKey) -> Result<StoredPayload> {
        let seal_opt = |value: &Option<SecureString>| -> Result<Option<String>> {
            value.as_ref().map(|v| codec.encrypt(v.as_str(), key)).transpose()
        };

        Ok(match self {
            Self::Password {
                username,
                website_url,
                password,
                notes,
            } => StoredPayload::Password {
                username: username.clone(),
                website_url: website_url.clone(),
                password_enc: codec.encrypt(password.as_str(), key)?,
                notes_enc: seal_opt(notes)?,
            },
            Self::Note { content } => StoredPayload::Note {
                content_enc: codec.encrypt(content.as_str(), key)?,
            },
            Self::Link { url, notes } => StoredPayload::Link {
                url: url.clone(),
                notes_enc: seal_opt(notes)?,
            },
            Self::CryptoWallet {
                wallet_type,
                public_address,
                secret,
                notes,
            } => StoredPayload::CryptoWallet {
                wallet_type: wallet_type.clone(),
                public_address: public_address.clone(),
                secret_enc: codec.encrypt(secret.as_str(), key)?,
                notes_enc: seal_opt(notes)?,
            },
            Self::Document {
                file_name,
                content_type,
                size_bytes,
                storage_key,
            } => StoredPayload::Document {
                file_name: file_name.clone(),
                content_type: content_type.clone(),
                size_bytes: *size_bytes,
                storage_key: storage_key.clone(),
            },
        })
    }
}

/// Payload as persisted: sensitive fields are ciphertext
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StoredPayload {
    Password {
        username: Option<String>,
        website_url: Option<String>,
        password_enc: String,
        notes_enc: Option<String>,
    },
    Note {
        content_enc: String,
    },
    Link {
        url: String,
        notes_enc: Option<String>,
    },
    CryptoWallet {
        wallet_type: String,
        public_address: Option<String>,
        secret_enc: String,
        notes_enc: Option<String>,
    },
    Document {
        file_name: String,
        content_type: String,
        size_bytes: i64,
        storage_key: String,
    },
}

impl StoredPayload {
    pub(crate) fn item_type(&self) -> ItemType {
        match self {
            Self::Password { .. } => ItemType::Password,
            Self::Note { .. } => ItemType::Note,
            Self::Link { .. } => ItemType::Link,
            Self::CryptoWallet { .. } => ItemType::CryptoWallet,
            Self::Document { .. } => ItemType::Document,
        }
    }

    /// Decrypt into a payload; any field failing to open fails the whole item
    pub(crate) fn open(self, codec: &EncryptionCodec, key: &VaultKey) -> Result<ItemPayload> {
        let open_opt = |value: Option<String>| -> Result<Option<SecureString>> {
            value.map(|v| codec.decrypt(&v, key)).transpose()
        };

        Ok(match self {
            Self::Password {
                username,
                website_url,
                password_enc,
                notes_enc,
            } => ItemPayload::Password {
                username,
                website_url,
                password: codec.decrypt(&password_enc, key)?,
                notes: open_opt(notes_enc)?,
            },
            Self::Note { content_enc } => ItemPayload::Note {
                content: codec.decrypt(&content_enc, key)?,
            },
            Self::Link { url, notes_enc } => ItemPayload::Link {
                url,
                notes: open_opt(notes_enc)?,
            },
            Self::CryptoWallet {
                wallet_type,
                public_address,
                secret_enc,
                notes_enc,
            } => ItemPayload::CryptoWallet {
                wallet_type,
                public_address,
                secret: codec.decrypt(&secret_enc, key)?,
                notes: open_opt(notes_enc)?,
            },
            Self::Document {
                file_name,
                content_type,
                size_bytes,
                storage_key,
            } => ItemPayload::Document {
                file_name,
                content_type,
                size_bytes,
                storage_key,
            },
        })
    }
}

/// Input for a new item
#[derive(Debug, Clone)]
pub struct NewItem {
    pub title: String,
    pub description: Option<String>,
    pub payload: ItemPayload,
}

/// Partial update of an item; `None` leaves a field unchanged
#[derive(Debug, Clone, Default)]
pub struct ItemUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub payload: Option<ItemPayload>,
}

/// A readable item with its decrypted payload
#[derive(Debug, Clone)]
pub struct ItemDetails {
    pub item: VaultItem,
    pub payload: ItemPayload,
}

/// A member's stored grant on an item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemVisibility {
    pub id: Uuid,
    pub vault_item_id: Uuid,
    pub vault_member_id: Uuid,
    pub permission: ItemGrant,
    pub created_at: DateTime<Utc>,
}
