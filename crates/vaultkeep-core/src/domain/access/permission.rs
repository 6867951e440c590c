//! Permission resolution
//!
//! Owner dominates everything. Below that the release policy gates first and
//! only then does the per-item grant apply. Admin rank buys no item access.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::item::ItemGrant;
use crate::domain::policy::PolicyDecision;
use crate::domain::vault::Privilege;

/// Effective access of a user to an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    NoAccess,
    View,
    Edit,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoAccess => "no_access",
            Self::View => "view",
            Self::Edit => "edit",
        }
    }

    pub fn can_view(&self) -> bool {
        *self >= Self::View
    }

    pub fn can_edit(&self) -> bool {
        *self == Self::Edit
    }
}

impl From<ItemGrant> for Permission {
    fn from(grant: ItemGrant) -> Self {
        match grant {
            ItemGrant::View => Self::View,
            ItemGrant::Edit => Self::Edit,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Combine role, policy outcome and item grant into a permission
///
/// `privilege` is `None` for users without an active membership.
pub fn resolve(
    privilege: Option<Privilege>,
    policy: &PolicyDecision,
    grant: Option<ItemGrant>,
) -> Permission {
    match privilege {
        None => Permission::NoAccess,
        Some(Privilege::Owner) => Permission::Edit,
        Some(Privilege::Admin | Privilege::Member) if !policy.accessible => Permission::NoAccess,
        Some(Privilege::Admin | Privilege::Member) => grant.map(Permission::from).unwrap_or(Permission::NoAccess),
    }
}

/// Management rights are role based and ignore policy and item grants
pub fn can_manage_members(privilege: Option<Privilege>) -> bool {
    privilege.is_some_and(|p| p.can_manage_members())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::policy::{PolicyEngine, PolicyKind, ReleaseStatus, VaultPolicy};
    use chrono::Utc;
    use uuid::Uuid;

    fn decision(status: ReleaseStatus) -> PolicyDecision {
        let policy = VaultPolicy {
            id: Uuid::new_v4(),
            vault_id: Uuid::new_v4(),
            kind: PolicyKind::ManualRelease,
            release_status: status,
            released_at: None,
            released_by_id: None,
            note: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        PolicyEngine.evaluate(&policy, Utc::now())
    }

    #[test]
    fn test_owner_always_edits() {
        for status in [
            ReleaseStatus::Pending,
            ReleaseStatus::Released,
            ReleaseStatus::Expired,
            ReleaseStatus::Revoked,
        ] {
            for grant in [None, Some(ItemGrant::View), Some(ItemGrant::Edit)] {
                assert_eq!(
                    resolve(Some(Privilege::Owner), &decision(status), grant),
                    Permission::Edit
                );
            }
        }
    }

    #[test]
    fn test_policy_gates_before_grants() {
        let closed = decision(ReleaseStatus::Pending);
        assert_eq!(
            resolve(Some(Privilege::Member), &closed, Some(ItemGrant::Edit)),
            Permission::NoAccess
        );
        assert_eq!(
            resolve(Some(Privilege::Admin), &closed, Some(ItemGrant::View)),
            Permission::NoAccess
        );
    }

    #[test]
    fn test_grant_decides_when_open() {
        let open = decision(ReleaseStatus::Released);
        assert_eq!(resolve(Some(Privilege::Member), &open, None), Permission::NoAccess);
        assert_eq!(
            resolve(Some(Privilege::Member), &open, Some(ItemGrant::View)),
            Permission::View
        );
        assert_eq!(
            resolve(Some(Privilege::Admin), &open, Some(ItemGrant::Edit)),
            Permission::Edit
        );
        // Admin rank alone grants nothing on items
        assert_eq!(resolve(Some(Privilege::Admin), &open, None), Permission::NoAccess);
    }

    #[test]
    fn test_non_member_has_nothing() {
        let open = decision(ReleaseStatus::Released);
        assert_eq!(resolve(None, &open, Some(ItemGrant::Edit)), Permission::NoAccess);
        assert!(!can_manage_members(None));
    }

    #[test]
    fn test_manage_rights_by_role() {
        assert!(can_manage_members(Some(Privilege::Owner)));
        assert!(can_manage_members(Some(Privilege::Admin)));
        assert!(!can_manage_members(Some(Privilege::Member)));
    }

    #[test]
    fn test_permission_helpers() {
        assert!(Permission::Edit.can_view());
        assert!(Permission::View.can_view());
        assert!(!Permission::NoAccess.can_view());
        assert!(!Permission::View.can_edit());
    }
}
