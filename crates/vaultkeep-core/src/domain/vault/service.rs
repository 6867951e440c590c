//! Vault service
//!
//! Vault creation and every membership change. Each operation that alters
//! who can see what runs in one transaction together with its audit event.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use super::entity::{MemberStatus, Privilege, Vault, VaultMember};
use super::repository::{self, VaultRepository};
use crate::clock::Clock;
use crate::domain::events::{EventRepository, VaultEvent, VaultEventType, record_event};
use crate::domain::invite::repository as invites;
use crate::domain::item::repository as items;
use crate::domain::policy::{PolicyKind, VaultPolicy};
use crate::domain::policy::repository as policies;
use crate::error::{Error, Result};

/// What happened to a deleted account's vaults and items
#[derive(Debug, Clone, Default, Serialize)]
pub struct AccountDeletion {
    /// Vaults handed to a successor: (vault, new owner)
    pub transferred: Vec<(Uuid, Uuid)>,
    /// Owned vaults with nobody left to inherit them
    pub deleted_vaults: Vec<Uuid>,
    /// Vaults the user was a non-owner member of
    pub left_vaults: Vec<Uuid>,
    /// Items whose authorship moved to a vault owner
    pub reattributed_items: u64,
}

/// Service for vault lifecycle and membership
#[derive(Debug, Clone)]
pub struct VaultService {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    repository: VaultRepository,
}

impl VaultService {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository: VaultRepository::new(pool.clone()),
            pool,
            clock,
        }
    }

    /// Get the underlying repository
    pub fn repository(&self) -> &VaultRepository {
        &self.repository
    }

    // ========== Vault Lifecycle ==========

    /// Create a vault, its Owner membership and its release policy atomically
    pub async fn create_vault(
        &self,
        owner_id: Uuid,
        name: &str,
        description: Option<String>,
        policy: PolicyKind,
    ) -> Result<Vault> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("vault name cannot be empty".to_string()));
        }

        let now = self.clock.now();
        let vault = Vault::new(owner_id, name, description, now);
        let owner = VaultMember::new(vault.id, owner_id, Privilege::Owner, None, now);
        let policy = VaultPolicy::new(vault.id, policy, None, owner_id, now)?;

        let mut tx = self.pool.begin().await?;
        repository::insert_vault(&mut tx, &vault).await?;
        repository::insert_member(&mut tx, &owner).await?;
        policies::insert_policy(&mut tx, &policy).await?;

        let event = VaultEvent::by(vault.id, owner_id, VaultEventType::VaultCreated, now)
            .with_data(json!({ "policy": policy.kind.type_str() }));
        record_event(&mut *tx, &event).await?;
        tx.commit().await?;

        info!(
            vault_id = %vault.id,
            owner_id = %owner_id,
            policy = policy.kind.type_str(),
            "Created vault"
        );

        Ok(vault)
    }

    /// Get an active vault the user is a member of
    pub async fn get_vault(&self, vault_id: Uuid, user_id: Uuid) -> Result<Vault> {
        let mut conn = self.pool.acquire().await?;
        let vault = repository::require_active_vault(&mut conn, vault_id).await?;
        repository::require_active_member(&mut conn, vault_id, user_id).await?;
        Ok(vault)
    }

    /// Active vaults the user belongs to
    pub async fn list_vaults_for_user(&self, user_id: Uuid) -> Result<Vec<Vault>> {
        self.repository.list_for_user(user_id).await
    }

    /// Active members of a vault, visible to any active member
    pub async fn list_members(&self, vault_id: Uuid, user_id: Uuid) -> Result<Vec<VaultMember>> {
        {
            let mut conn = self.pool.acquire().await?;
            repository::require_active_vault(&mut conn, vault_id).await?;
            repository::require_active_member(&mut conn, vault_id, user_id).await?;
        }
        self.repository.list_members(vault_id, false).await
    }

    /// Audit trail of a vault; Owner only
    pub async fn list_events(&self, vault_id: Uuid, user_id: Uuid) -> Result<Vec<VaultEvent>> {
        {
            let mut conn = self.pool.acquire().await?;
            let vault = repository::find_vault(&mut conn, vault_id)
                .await?
                .ok_or(Error::VaultNotFound(vault_id))?;
            if vault.owner_id != user_id {
                return Err(Error::InsufficientPrivilege(
                    "only the owner can read the audit trail".to_string(),
                ));
            }
        }
        EventRepository::new(self.pool.clone()).list_for_vault(vault_id).await
    }

    /// Soft delete a vault and cancel its outstanding invites; Owner only
    pub async fn delete_vault(&self, vault_id: Uuid, owner_id: Uuid) -> Result<()> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        repository::require_active_vault(&mut tx, vault_id).await?;
        let member = repository::require_active_member(&mut tx, vault_id, owner_id).await?;
        if member.privilege != Privilege::Owner {
            return Err(Error::InsufficientPrivilege(
                "only the owner can delete a vault".to_string(),
            ));
        }

        if !repository::soft_delete_vault(&mut tx, vault_id, now).await? {
            return Err(Error::VaultNotFound(vault_id));
        }
        let cancelled = invites::cancel_open_for_vault(&mut tx, vault_id).await?;

        let event = VaultEvent::by(vault_id, owner_id, VaultEventType::VaultDeleted, now)
            .with_data(json!({ "cancelled_invites": cancelled }));
        record_event(&mut *tx, &event).await?;
        tx.commit().await?;

        info!(vault_id = %vault_id, cancelled_invites = cancelled, "Deleted vault");
        Ok(())
    }

    // ========== Membership ==========

    /// Hand the vault to another active member; the old owner becomes Admin
    ///
    /// `original_owner_id` is untouched, so the vault key stays the same.
    pub async fn transfer_ownership(
        &self,
        vault_id: Uuid,
        owner_id: Uuid,
        new_owner_id: Uuid,
    ) -> Result<Vault> {
        if owner_id == new_owner_id {
            return Err(Error::InvalidInput(
                "vault is already owned by this user".to_string(),
            ));
        }

        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        repository::require_active_vault(&mut tx, vault_id).await?;
        let current = repository::require_active_member(&mut tx, vault_id, owner_id).await?;
        if current.privilege != Privilege::Owner {
            return Err(Error::InsufficientPrivilege(
                "only the owner can transfer ownership".to_string(),
            ));
        }
        let successor = repository::require_active_member(&mut tx, vault_id, new_owner_id).await?;

        // Demote first: at most one active owner row may exist at any time
        repository::set_privilege(&mut tx, current.id, Privilege::Admin).await?;
        if !repository::set_privilege(&mut tx, successor.id, Privilege::Owner).await? {
            return Err(Error::MemberNotFound {
                vault_id,
                user_id: new_owner_id,
            });
        }
        repository::set_owner(&mut tx, vault_id, new_owner_id, now).await?;

        let event = VaultEvent::by(vault_id, owner_id, VaultEventType::OwnershipTransferred, now)
            .with_data(json!({ "from": owner_id, "to": new_owner_id }));
        record_event(&mut *tx, &event).await?;

        let vault = repository::require_active_vault(&mut tx, vault_id).await?;
        tx.commit().await?;

        info!(
            vault_id = %vault_id,
            from = %owner_id,
            to = %new_owner_id,
            "Transferred vault ownership"
        );

        Ok(vault)
    }

    /// Set a member's privilege to Admin or Member; Owner only
    pub async fn change_privilege(
        &self,
        vault_id: Uuid,
        owner_id: Uuid,
        target_user_id: Uuid,
        privilege: Privilege,
    ) -> Result<VaultMember> {
        if privilege == Privilege::Owner {
            return Err(Error::InvalidInput(
                "owner privilege is only granted by transferring ownership".to_string(),
            ));
        }

        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        repository::require_active_vault(&mut tx, vault_id).await?;
        let actor = repository::require_active_member(&mut tx, vault_id, owner_id).await?;
        if actor.privilege != Privilege::Owner {
            return Err(Error::InsufficientPrivilege(
                "only the owner can change privileges".to_string(),
            ));
        }

        let mut target = repository::require_active_member(&mut tx, vault_id, target_user_id).await?;
        if target.privilege == Privilege::Owner {
            return Err(Error::InvalidInput(
                "the owner's privilege cannot be changed".to_string(),
            ));
        }

        repository::set_privilege(&mut tx, target.id, privilege).await?;
        let event = VaultEvent::by(vault_id, owner_id, VaultEventType::PrivilegeChanged, now).with_data(json!({
            "user_id": target_user_id,
            "from": target.privilege,
            "to": privilege,
        }));
        record_event(&mut *tx, &event).await?;
        tx.commit().await?;

        info!(
            vault_id = %vault_id,
            user_id = %target_user_id,
            from = %target.privilege,
            to = %privilege,
            "Changed member privilege"
        );

        target.privilege = privilege;
        Ok(target)
    }

    /// Remove a member; their item grants go with them
    ///
    /// The owner can remove anyone but themselves. An admin can remove
    /// plain members only.
    pub async fn remove_member(&self, vault_id: Uuid, actor_id: Uuid, target_user_id: Uuid) -> Result<()> {
        if actor_id == target_user_id {
            return Err(Error::InvalidInput(
                "use leave to give up your own membership".to_string(),
            ));
        }

        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        repository::require_active_vault(&mut tx, vault_id).await?;
        let actor = repository::require_active_member(&mut tx, vault_id, actor_id).await?;
        if !actor.privilege.can_manage_members() {
            return Err(Error::InsufficientPrivilege(
                "only the owner or an admin can remove members".to_string(),
            ));
        }

        let target = repository::require_active_member(&mut tx, vault_id, target_user_id).await?;
        if target.privilege == Privilege::Owner {
            return Err(Error::InsufficientPrivilege(
                "the owner cannot be removed".to_string(),
            ));
        }
        if actor.privilege == Privilege::Admin && target.privilege != Privilege::Member {
            return Err(Error::InsufficientPrivilege(
                "admins can only remove members".to_string(),
            ));
        }

        if !repository::deactivate_member(&mut tx, target.id, MemberStatus::Removed, Some(actor_id), now).await? {
            return Err(Error::MemberNotFound {
                vault_id,
                user_id: target_user_id,
            });
        }
        let grants = repository::delete_member_visibility(&mut tx, target.id).await?;

        let event = VaultEvent::by(vault_id, actor_id, VaultEventType::MemberRemoved, now)
            .with_data(json!({ "user_id": target_user_id, "grants_dropped": grants }));
        record_event(&mut *tx, &event).await?;
        tx.commit().await?;

        info!(
            vault_id = %vault_id,
            user_id = %target_user_id,
            removed_by = %actor_id,
            "Removed vault member"
        );
        Ok(())
    }

    /// Leave a vault; the owner must transfer ownership first
    pub async fn leave_vault(&self, vault_id: Uuid, user_id: Uuid) -> Result<()> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        repository::require_active_vault(&mut tx, vault_id).await?;
        let member = repository::require_active_member(&mut tx, vault_id, user_id).await?;
        if member.privilege == Privilege::Owner {
            return Err(Error::invalid_state("membership", member.privilege, "leave"));
        }

        repository::deactivate_member(&mut tx, member.id, MemberStatus::Left, None, now).await?;
        repository::delete_member_visibility(&mut tx, member.id).await?;
        record_event(
            &mut *tx,
            &VaultEvent::by(vault_id, user_id, VaultEventType::MemberLeft, now),
        )
        .await?;
        tx.commit().await?;

        info!(vault_id = %vault_id, user_id = %user_id, "Member left vault");
        Ok(())
    }

    // ========== Account Deletion ==========

    /// Detach a user from every vault without deleting anyone else's data
    ///
    /// Owned vaults pass to the earliest-joined Admin, else the
    /// earliest-joined Member; with no successor the vault is soft-deleted.
    /// Items the user authored move to the owner of the vault holding them.
    pub async fn delete_account(&self, user_id: Uuid) -> Result<AccountDeletion> {
        let now = self.clock.now();
        let mut summary = AccountDeletion::default();
        let mut tx = self.pool.begin().await?;

        for vault in repository::owned_active_vaults(&mut tx, user_id).await? {
            let owner_row = repository::require_active_member(&mut tx, vault.id, user_id).await?;
            repository::deactivate_member(&mut tx, owner_row.id, MemberStatus::Left, None, now).await?;
            repository::delete_member_visibility(&mut tx, owner_row.id).await?;

            match repository::find_successor(&mut tx, vault.id, user_id).await? {
                Some(successor) => {
                    repository::set_privilege(&mut tx, successor.id, Privilege::Owner).await?;
                    repository::set_owner(&mut tx, vault.id, successor.user_id, now).await?;
                    summary.reattributed_items +=
                        items::reattribute_items(&mut tx, vault.id, user_id, successor.user_id, now).await?;

                    let event = VaultEvent::new(
                        vault.id,
                        Some(user_id),
                        VaultEventType::OwnershipTransferred,
                        Some(json!({ "from": user_id, "to": successor.user_id, "reason": "account_deleted" })),
                        now,
                    );
                    record_event(&mut *tx, &event).await?;
                    summary.transferred.push((vault.id, successor.user_id));
                }
                None => {
                    repository::soft_delete_vault(&mut tx, vault.id, now).await?;
                    invites::cancel_open_for_vault(&mut tx, vault.id).await?;

                    let event = VaultEvent::by(vault.id, user_id, VaultEventType::VaultDeleted, now)
                        .with_data(json!({ "reason": "account_deleted" }));
                    record_event(&mut *tx, &event).await?;
                    summary.deleted_vaults.push(vault.id);
                }
            }
        }

        for membership in repository::active_memberships(&mut tx, user_id).await? {
            let vault = repository::find_vault(&mut tx, membership.vault_id)
                .await?
                .ok_or(Error::VaultNotFound(membership.vault_id))?;

            repository::deactivate_member(&mut tx, membership.id, MemberStatus::Left, None, now).await?;
            repository::delete_member_visibility(&mut tx, membership.id).await?;

            // Rows left behind in a deleted vault are closed without a trail
            if !vault.is_active() {
                continue;
            }

            let moved = items::reattribute_items(&mut tx, vault.id, user_id, vault.owner_id, now).await?;
            if moved > 0 {
                let event = VaultEvent::new(
                    vault.id,
                    Some(user_id),
                    VaultEventType::AuthorshipTransferred,
                    Some(json!({ "to": vault.owner_id, "items": moved })),
                    now,
                );
                record_event(&mut *tx, &event).await?;
            }
            summary.reattributed_items += moved;

            record_event(
                &mut *tx,
                &VaultEvent::by(vault.id, user_id, VaultEventType::MemberLeft, now),
            )
            .await?;
            summary.left_vaults.push(vault.id);
        }

        tx.commit().await?;

        if summary.transferred.is_empty() && summary.deleted_vaults.is_empty() && summary.left_vaults.is_empty() {
            debug!(user_id = %user_id, "Deleted account had no vault memberships");
        }
        info!(
            user_id = %user_id,
            transferred = summary.transferred.len(),
            deleted = summary.deleted_vaults.len(),
            left = summary.left_vaults.len(),
            reattributed_items = summary.reattributed_items,
            "Account removed from vaults"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::storage::Database;

    async fn service() -> (Database, VaultService) {
        let db = Database::in_memory().await.unwrap();
        let service = VaultService::new(db.pool().clone(), Arc::new(SystemClock));
        (db, service)
    }

    async fn add_member(db: &Database, vault_id: Uuid, privilege: Privilege) -> Uuid {
        let user = Uuid::new_v4();
        let mut conn = db.pool().acquire().await.unwrap();
        repository::insert_member(
            &mut conn,
            &VaultMember::new(vault_id, user, privilege, None, chrono::Utc::now()),
        )
        .await
        .unwrap();
        user
    }

    #[tokio::test]
    async fn test_create_vault_is_atomic_with_owner_and_policy() {
        let (db, service) = service().await;
        let owner = Uuid::new_v4();
        let vault = service
            .create_vault(owner, "  Family  ", None, PolicyKind::Immediate)
            .await
            .unwrap();
        assert_eq!(vault.name, "Family");

        let members = service.list_members(vault.id, owner).await.unwrap();
        assert_eq!(members.len(), 1);
        assert!(members[0].is_owner());

        let mut conn = db.pool().acquire().await.unwrap();
        assert!(policies::find_for_vault(&mut conn, vault.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_create_vault_rejects_empty_name() {
        let (_db, service) = service().await;
        let result = service
            .create_vault(Uuid::new_v4(), "   ", None, PolicyKind::Immediate)
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_transfer_keeps_original_owner() {
        let (db, service) = service().await;
        let owner = Uuid::new_v4();
        let vault = service
            .create_vault(owner, "V", None, PolicyKind::Immediate)
            .await
            .unwrap();
        let heir = add_member(&db, vault.id, Privilege::Member).await;

        let moved = service.transfer_ownership(vault.id, owner, heir).await.unwrap();
        assert_eq!(moved.owner_id, heir);
        assert_eq!(moved.original_owner_id, owner);

        let old = service.repository().get_active_member(vault.id, owner).await.unwrap().unwrap();
        assert_eq!(old.privilege, Privilege::Admin);

        // The former owner can no longer transfer
        assert!(matches!(
            service.transfer_ownership(vault.id, owner, heir).await,
            Err(Error::InsufficientPrivilege(_))
        ));
    }

    #[tokio::test]
    async fn test_admin_removal_rules() {
        let (db, service) = service().await;
        let owner = Uuid::new_v4();
        let vault = service
            .create_vault(owner, "V", None, PolicyKind::Immediate)
            .await
            .unwrap();
        let admin = add_member(&db, vault.id, Privilege::Admin).await;
        let other_admin = add_member(&db, vault.id, Privilege::Admin).await;
        let member = add_member(&db, vault.id, Privilege::Member).await;

        assert!(matches!(
            service.remove_member(vault.id, admin, owner).await,
            Err(Error::InsufficientPrivilege(_))
        ));
        assert!(matches!(
            service.remove_member(vault.id, admin, other_admin).await,
            Err(Error::InsufficientPrivilege(_))
        ));
        assert!(matches!(
            service.remove_member(vault.id, member, admin).await,
            Err(Error::InsufficientPrivilege(_))
        ));

        service.remove_member(vault.id, admin, member).await.unwrap();
        assert!(matches!(
            service.remove_member(vault.id, admin, member).await,
            Err(Error::MemberNotFound { .. })
        ));

        service.remove_member(vault.id, owner, other_admin).await.unwrap();
        assert_eq!(service.list_members(vault.id, owner).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_owner_cannot_leave() {
        let (db, service) = service().await;
        let owner = Uuid::new_v4();
        let vault = service
            .create_vault(owner, "V", None, PolicyKind::Immediate)
            .await
            .unwrap();
        let member = add_member(&db, vault.id, Privilege::Member).await;

        assert!(matches!(
            service.leave_vault(vault.id, owner).await,
            Err(Error::InvalidState { .. })
        ));
        service.leave_vault(vault.id, member).await.unwrap();
        assert!(service.list_vaults_for_user(member).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_vault_hides_it() {
        let (_db, service) = service().await;
        let owner = Uuid::new_v4();
        let vault = service
            .create_vault(owner, "Gone", None, PolicyKind::Immediate)
            .await
            .unwrap();

        service.delete_vault(vault.id, owner).await.unwrap();
        assert!(matches!(
            service.get_vault(vault.id, owner).await,
            Err(Error::VaultNotFound(_))
        ));
        assert!(service.list_vaults_for_user(owner).await.unwrap().is_empty());
        assert!(service.delete_vault(vault.id, owner).await.is_err());
    }

    #[tokio::test]
    async fn test_change_privilege() {
        let (db, service) = service().await;
        let owner = Uuid::new_v4();
        let vault = service
            .create_vault(owner, "V", None, PolicyKind::Immediate)
            .await
            .unwrap();
        let member = add_member(&db, vault.id, Privilege::Member).await;

        let promoted = service
            .change_privilege(vault.id, owner, member, Privilege::Admin)
            .await
            .unwrap();
        assert_eq!(promoted.privilege, Privilege::Admin);

        assert!(matches!(
            service.change_privilege(vault.id, owner, member, Privilege::Owner).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            service.change_privilege(vault.id, member, owner, Privilege::Member).await,
            Err(Error::InsufficientPrivilege(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_account_skips_already_deleted_vaults() {
        let (db, service) = service().await;
        let owner = Uuid::new_v4();
        let vault = service
            .create_vault(owner, "Old", None, PolicyKind::Immediate)
            .await
            .unwrap();
        service.delete_vault(vault.id, owner).await.unwrap();

        let summary = service.delete_account(owner).await.unwrap();
        assert!(summary.left_vaults.is_empty());
        assert!(summary.deleted_vaults.is_empty());
        assert!(summary.transferred.is_empty());

        let events = EventRepository::new(db.pool().clone());
        assert_eq!(events.count_of_type(vault.id, VaultEventType::MemberLeft).await.unwrap(), 0);

        let mut conn = db.pool().acquire().await.unwrap();
        assert!(
            repository::find_active_member(&mut conn, vault.id, owner)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_delete_account_without_successor_deletes_vault() {
        let (_db, service) = service().await;
        let owner = Uuid::new_v4();
        let vault = service
            .create_vault(owner, "Solo", None, PolicyKind::Immediate)
            .await
            .unwrap();

        let summary = service.delete_account(owner).await.unwrap();
        assert_eq!(summary.deleted_vaults, vec![vault.id]);
        assert!(summary.transferred.is_empty());

        let stored = service.repository().get(vault.id).await.unwrap().unwrap();
        assert!(!stored.is_active());
    }
}
