//! Vault and membership entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of a vault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultStatus {
    Active,
    Deleted,
}

impl VaultStatus {
    /// Parse from the stored representation
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

impl fmt::Display for VaultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Role of a member within a vault
///
/// Ordered by rank: `Member < Admin < Owner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privilege {
    Member,
    Admin,
    Owner,
}

impl Privilege {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "owner" => Some(Self::Owner),
            "admin" => Some(Self::Admin),
            "member" => Some(Self::Member),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }

    /// Owner and Admin may invite, remove members and revoke policies
    pub fn can_manage_members(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Membership lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Active,
    Left,
    Removed,
}

impl MemberStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "left" => Some(Self::Left),
            "removed" => Some(Self::Removed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Left => "left",
            Self::Removed => "removed",
        }
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named container of items
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    pub id: Uuid,
    /// Current owner; changes on transfer or account deletion
    pub owner_id: Uuid,
    /// Creator of the vault; never changes and feeds key derivation
    pub original_owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: VaultStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Vault {
    /// Create a new active vault owned by its creator
    pub fn new(
        owner_id: Uuid,
        name: impl Into<String>,
        description: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            original_owner_id: owner_id,
            name: name.into(),
            description,
            status: VaultStatus::Active,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == VaultStatus::Active
    }
}

/// A user's membership in a vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultMember {
    pub id: Uuid,
    pub vault_id: Uuid,
    pub user_id: Uuid,
    pub privilege: Privilege,
    pub status: MemberStatus,
    pub added_by_id: Option<Uuid>,
    pub removed_by_id: Option<Uuid>,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    pub removed_at: Option<DateTime<Utc>>,
}

impl VaultMember {
    /// Create a new active membership
    pub fn new(
        vault_id: Uuid,
        user_id: Uuid,
        privilege: Privilege,
        added_by_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            vault_id,
            user_id,
            privilege,
            status: MemberStatus::Active,
            added_by_id,
            removed_by_id: None,
            joined_at: now,
            left_at: None,
            removed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }

    pub fn is_owner(&self) -> bool {
        self.is_active() && self.privilege == Privilege::Owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privilege_ordering_and_rights() {
        assert!(Privilege::Owner > Privilege::Admin);
        assert!(Privilege::Admin > Privilege::Member);
        assert!(Privilege::Owner.can_manage_members());
        assert!(Privilege::Admin.can_manage_members());
        assert!(!Privilege::Member.can_manage_members());
    }

    #[test]
    fn test_enum_string_conversions() {
        for p in [Privilege::Owner, Privilege::Admin, Privilege::Member] {
            assert_eq!(Privilege::from_str(p.as_str()), Some(p));
        }
        assert_eq!(Privilege::from_str("ADMIN"), Some(Privilege::Admin));
        assert_eq!(MemberStatus::from_str("removed"), Some(MemberStatus::Removed));
        assert_eq!(VaultStatus::from_str("gone"), None);
    }

    #[test]
    fn test_new_vault_records_original_owner() {
        let owner = Uuid::new_v4();
        let vault = Vault::new(owner, "Family", None, Utc::now());
        assert_eq!(vault.owner_id, owner);
        assert_eq!(vault.original_owner_id, owner);
        assert!(vault.is_active());
    }
}
