//! Invite entities and token handling
//!
//! The raw token is 32 random bytes, URL-safe base64 encoded, handed to the
//! inviter exactly once. Only its SHA-256 hash is stored.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use crate::domain::security::SecureString;
use crate::domain::vault::Privilege;

/// Random bytes in an invite token
const TOKEN_BYTES: usize = 32;

/// Invite lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteStatus {
    Pending,
    Sent,
    Accepted,
    Cancelled,
    Expired,
}

impl InviteStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "accepted" => Some(Self::Accepted),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Accepted => "accepted",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Pending and Sent invites can still be redeemed or cancelled
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Sent)
    }
}

impl fmt::Display for InviteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An offer to join a vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultInvite {
    pub id: Uuid,
    pub vault_id: Uuid,
    pub inviter_id: Uuid,
    pub invitee_email: String,
    pub invitee_id: Option<Uuid>,
    pub privilege: Privilege,
    pub status: InviteStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

impl VaultInvite {
    /// Stored status with lazy expiry applied
    pub fn effective_status(&self, now: DateTime<Utc>) -> InviteStatus {
        if self.status.is_open() && self.is_past_expiry(now) {
            InviteStatus::Expired
        } else {
            self.status
        }
    }

    /// Valid up to and including `expires_at`
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Generate a fresh raw token and its storage hash
pub fn generate_token() -> (SecureString, String) {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    let raw = URL_SAFE_NO_PAD.encode(bytes);
    let hash = hash_token(&raw);
    (SecureString::new(raw), hash)
}

/// Hex SHA-256 of a raw token, surrounding whitespace ignored
pub fn hash_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.trim().as_bytes()))
}

/// Result of creating an invite; the only place the raw token ever appears
#[derive(Debug, Clone)]
pub struct CreatedInvite {
    pub invite: VaultInvite,
    pub token: SecureString,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn invite(status: InviteStatus, expires_at: DateTime<Utc>) -> VaultInvite {
        VaultInvite {
            id: Uuid::new_v4(),
            vault_id: Uuid::new_v4(),
            inviter_id: Uuid::new_v4(),
            invitee_email: "x@example.com".into(),
            invitee_id: None,
            privilege: Privilege::Member,
            status,
            expires_at,
            created_at: expires_at - Duration::days(7),
            accepted_at: None,
            note: None,
        }
    }

    #[test]
    fn test_tokens_are_unique_and_hashed() {
        let (a, hash_a) = generate_token();
        let (b, hash_b) = generate_token();
        assert_ne!(a, b);
        assert_ne!(hash_a, hash_b);
        assert_eq!(hash_a.len(), 64);
        assert_eq!(hash_token(a.as_str()), hash_a);
        assert_eq!(hash_token(&format!(" {} ", a.as_str())), hash_a);
        assert!(!hash_a.contains(a.as_str()));
        assert_eq!(a.as_str().len(), 43);
    }

    #[test]
    fn test_effective_status_applies_expiry_lazily() {
        let t = Utc::now();
        let open = invite(InviteStatus::Sent, t);
        assert_eq!(open.effective_status(t), InviteStatus::Sent);
        assert_eq!(open.effective_status(t + Duration::seconds(1)), InviteStatus::Expired);

        let accepted = invite(InviteStatus::Accepted, t);
        assert_eq!(accepted.effective_status(t + Duration::days(1)), InviteStatus::Accepted);
    }
}
