//! Item service
//!
//! Item CRUD and per-member visibility. Every call resolves the caller's
//! permission through the gateway first; payloads are sealed and opened with
//! the vault's derived key and nothing else.

use std::sync::Arc;

use serde_json::json;
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use super::entity::{ItemDetails, ItemGrant, ItemStatus, ItemUpdate, ItemVisibility, NewItem, VaultItem};
use super::repository;
use crate::clock::Clock;
use crate::domain::access::{AccessContext, AccessControlGateway, Permission};
use crate::domain::events::{VaultEvent, VaultEventType, record_event};
use crate::domain::vault::Privilege;
use crate::domain::vault::repository as vaults;
use crate::error::{Error, Result};

/// Service for vault items
#[derive(Debug, Clone)]
pub struct ItemService {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    gateway: AccessControlGateway,
}

impl ItemService {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>, gateway: AccessControlGateway) -> Self {
        Self { pool, clock, gateway }
    }

    /// Store a new item; the creator receives an Edit grant on it
    ///
    /// The owner may always add items; other members only while the vault is
    /// open to them.
    pub async fn create_item(&self, vault_id: Uuid, user_id: Uuid, new: NewItem) -> Result<VaultItem> {
        let title = new.title.trim().to_string();
        if title.is_empty() {
            return Err(Error::InvalidInput("item title cannot be empty".to_string()));
        }

        let ctx = self.gateway.context(vault_id, user_id).await?;
        let Some(member) = ctx.member.clone() else {
            return Err(Error::MemberNotFound { vault_id, user_id });
        };
        if !ctx.vault_accessible() {
            return Err(ctx.denial(Permission::Edit));
        }

        let key = self.gateway.vault_key(&ctx.vault)?;
        let stored = new.payload.seal(self.gateway.codec(), &key)?;
        drop(key);

        let now = self.clock.now();
        let item = VaultItem {
            id: Uuid::new_v4(),
            vault_id,
            created_by_user_id: user_id,
            item_type: new.payload.item_type(),
            title,
            description: new.description,
            status: ItemStatus::Active,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            deleted_by: None,
        };

        let mut tx = self.pool.begin().await?;
        repository::insert_item(&mut tx, &item, &stored).await?;
        repository::upsert_grant(&mut tx, item.id, member.id, ItemGrant::Edit, now).await?;
        let event = VaultEvent::by(vault_id, user_id, VaultEventType::ItemCreated, now)
            .with_data(json!({ "item_id": item.id, "item_type": item.item_type }));
        record_event(&mut *tx, &event).await?;
        tx.commit().await?;

        info!(vault_id = %vault_id, item_id = %item.id, item_type = %item.item_type, "Created item");
        Ok(item)
    }

    /// Item with decrypted payload; View required
    pub async fn read_item(&self, vault_id: Uuid, item_id: Uuid, user_id: Uuid) -> Result<ItemDetails> {
        let ctx = self.gateway.context(vault_id, user_id).await?;

        let (item, stored) = {
            let mut conn = self.pool.acquire().await?;
            let item = repository::require_active_item(&mut conn, vault_id, item_id).await?;
            let permission = self.gateway.item_permission(&mut conn, &ctx, &item).await?;
            if !permission.can_view() {
                debug!(vault_id = %vault_id, item_id = %item_id, "Item read denied");
                return Err(ctx.denial(Permission::View));
            }
            let stored = repository::load_payload(&mut conn, &item).await?;
            (item, stored)
        };

        let key = self.gateway.vault_key(&ctx.vault)?;
        let payload = stored.open(self.gateway.codec(), &key)?;
        Ok(ItemDetails { item, payload })
    }

    /// Change title, description or payload; Edit required
    ///
    /// A new payload must be of the item's existing type.
    pub async fn update_item(
        &self,
        vault_id: Uuid,
        item_id: Uuid,
        user_id: Uuid,
        update: ItemUpdate,
    ) -> Result<VaultItem> {
        let ctx = self.gateway.context(vault_id, user_id).await?;
        let now = self.clock.now();

        let stored = update
            .payload
            .as_ref()
            .map(|payload| {
                let key = self.gateway.vault_key(&ctx.vault)?;
                payload.seal(self.gateway.codec(), &key)
            })
            .transpose()?;

        let mut tx = self.pool.begin().await?;
        let mut item = repository::require_active_item(&mut tx, vault_id, item_id).await?;
        self.require(&mut tx, &ctx, &item, Permission::Edit).await?;

        if let Some(title) = update.title {
            let title = title.trim().to_string();
            if title.is_empty() {
                return Err(Error::InvalidInput("item title cannot be empty".to_string()));
            }
            item.title = title;
        }
        if let Some(description) = update.description {
            item.description = description;
        }
        if let Some(stored) = &stored {
            repository::replace_payload(&mut tx, &item, stored).await?;
        }
        item.updated_at = now;
        repository::update_metadata(&mut tx, &item).await?;

        let event = VaultEvent::by(vault_id, user_id, VaultEventType::ItemUpdated, now)
            .with_data(json!({ "item_id": item_id, "payload_changed": stored.is_some() }));
        record_event(&mut *tx, &event).await?;
        tx.commit().await?;

        debug!(vault_id = %vault_id, item_id = %item_id, "Updated item");
        Ok(item)
    }

    /// Soft delete; Edit required
    pub async fn delete_item(&self, vault_id: Uuid, item_id: Uuid, user_id: Uuid) -> Result<()> {
        let ctx = self.gateway.context(vault_id, user_id).await?;
        let now = self.clock.now();

        let mut tx = self.pool.begin().await?;
        let item = repository::require_active_item(&mut tx, vault_id, item_id).await?;
        self.require(&mut tx, &ctx, &item, Permission::Edit).await?;

        if !repository::soft_delete_item(&mut tx, item_id, user_id, now).await? {
            return Err(Error::ItemNotFound(item_id));
        }
        record_event(
            &mut *tx,
            &VaultEvent::by(vault_id, user_id, VaultEventType::ItemDeleted, now)
                .with_data(json!({ "item_id": item_id })),
        )
        .await?;
        tx.commit().await?;

        info!(vault_id = %vault_id, item_id = %item_id, "Deleted item");
        Ok(())
    }

    /// Metadata of the items the user can at least view, with their permission
    pub async fn list_items(&self, vault_id: Uuid, user_id: Uuid) -> Result<Vec<(VaultItem, Permission)>> {
        let ctx = self.gateway.context(vault_id, user_id).await?;
        let Some(member) = &ctx.member else {
            return Err(Error::MemberNotFound { vault_id, user_id });
        };

        let mut conn = self.pool.acquire().await?;
        let all = repository::list_active_items(&mut conn, vault_id).await?;

        if ctx.is_owner() {
            return Ok(all.into_iter().map(|item| (item, Permission::Edit)).collect());
        }
        if !ctx.vault_accessible() {
            return Ok(Vec::new());
        }

        let grants = repository::grants_for_member(&mut conn, vault_id, member.id).await?;
        Ok(all
            .into_iter()
            .filter_map(|item| {
                let permission = ctx.permission(grants.get(&item.id).copied());
                permission.can_view().then_some((item, permission))
            })
            .collect())
    }

    // ========== Visibility ==========

    /// Grant View or Edit on an item to another active member
    ///
    /// Allowed for the owner and for members holding Edit on the item.
    pub async fn set_visibility(
        &self,
        vault_id: Uuid,
        item_id: Uuid,
        actor_id: Uuid,
        target_user_id: Uuid,
        grant: ItemGrant,
    ) -> Result<ItemVisibility> {
        let ctx = self.gateway.context(vault_id, actor_id).await?;
        let now = self.clock.now();

        let mut tx = self.pool.begin().await?;
        let item = repository::require_active_item(&mut tx, vault_id, item_id).await?;
        self.require(&mut tx, &ctx, &item, Permission::Edit).await?;

        let target = vaults::require_active_member(&mut tx, vault_id, target_user_id).await?;
        if target.privilege == Privilege::Owner {
            return Err(Error::InvalidInput(
                "the owner always has full access to every item".to_string(),
            ));
        }

        repository::upsert_grant(&mut tx, item_id, target.id, grant, now).await?;
        let visibility = repository::list_grants(&mut tx, item_id)
            .await?
            .into_iter()
            .find(|v| v.vault_member_id == target.id)
            .ok_or_else(|| Error::InvariantViolation(format!("grant on item {} was not stored", item_id)))?;

        let event = VaultEvent::by(vault_id, actor_id, VaultEventType::VisibilityChanged, now).with_data(json!({
            "item_id": item_id,
            "member_id": target.id,
            "permission": grant,
        }));
        record_event(&mut *tx, &event).await?;
        tx.commit().await?;

        info!(
            vault_id = %vault_id,
            item_id = %item_id,
            member_id = %target.id,
            permission = %grant,
            "Item visibility granted"
        );
        Ok(visibility)
    }

    /// Remove a member's grant; false if there was none
    pub async fn clear_visibility(
        &self,
        vault_id: Uuid,
        item_id: Uuid,
        actor_id: Uuid,
        target_user_id: Uuid,
    ) -> Result<bool> {
        let ctx = self.gateway.context(vault_id, actor_id).await?;
        let now = self.clock.now();

        let mut tx = self.pool.begin().await?;
        let item = repository::require_active_item(&mut tx, vault_id, item_id).await?;
        self.require(&mut tx, &ctx, &item, Permission::Edit).await?;
        let target = vaults::require_active_member(&mut tx, vault_id, target_user_id).await?;

        let removed = repository::delete_grant(&mut tx, item_id, target.id).await?;
        if removed {
            let event = VaultEvent::by(vault_id, actor_id, VaultEventType::VisibilityChanged, now).with_data(json!({
                "item_id": item_id,
                "member_id": target.id,
                "permission": null,
            }));
            record_event(&mut *tx, &event).await?;
            info!(vault_id = %vault_id, item_id = %item_id, member_id = %target.id, "Item visibility cleared");
        }
        tx.commit().await?;

        Ok(removed)
    }

    /// Stored grants of an item; Edit required
    pub async fn list_visibility(&self, vault_id: Uuid, item_id: Uuid, actor_id: Uuid) -> Result<Vec<ItemVisibility>> {
        let ctx = self.gateway.context(vault_id, actor_id).await?;
        let mut conn = self.pool.acquire().await?;
        let item = repository::require_active_item(&mut conn, vault_id, item_id).await?;
        self.require(&mut conn, &ctx, &item, Permission::Edit).await?;
        repository::list_grants(&mut conn, item_id).await
    }

    async fn require(
        &self,
        conn: &mut sqlx::SqliteConnection,
        ctx: &AccessContext,
        item: &VaultItem,
        needed: Permission,
    ) -> Result<Permission> {
        let permission = self.gateway.item_permission(conn, ctx, item).await?;
        if permission < needed {
            debug!(
                vault_id = %item.vault_id,
                item_id = %item.id,
                have = %permission,
                need = %needed,
                "Item permission denied"
            );
            return Err(ctx.denial(needed));
        }
        Ok(permission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::item::{ItemPayload, ItemType};
    use crate::domain::policy::PolicyKind;
    use crate::domain::security::{KEY_SIZE, KeyDerivationService, SecureString, SigningKey};
    use crate::domain::vault::VaultService;
    use crate::identity::StaticDirectory;
    use crate::storage::Database;
    use chrono::{TimeZone, Utc};

    struct Fixture {
        _db: Database,
        vaults: VaultService,
        items: ItemService,
        gateway: AccessControlGateway,
        owner: Uuid,
        alice: Uuid,
        bob: Uuid,
        vault_id: Uuid,
    }

    async fn fixture(kind: PolicyKind) -> Fixture {
        let db = Database::in_memory().await.unwrap();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2032, 1, 10, 9, 0, 0).unwrap()));
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let directory = StaticDirectory::new()
            .with("alice@example.com", alice)
            .with("bob@example.com", bob);
        let keys = KeyDerivationService::new(SigningKey::from_bytes(&[5u8; KEY_SIZE]).unwrap());
        let gateway = AccessControlGateway::new(db.pool().clone(), clock.clone(), keys, Arc::new(directory));
        let vaults = VaultService::new(db.pool().clone(), clock.clone());
        let items = ItemService::new(db.pool().clone(), clock, gateway.clone());

        let owner = Uuid::new_v4();
        let vault = vaults.create_vault(owner, "Family", None, kind).await.unwrap();
        for (email, user) in [("alice@example.com", alice), ("bob@example.com", bob)] {
            let invite = gateway
                .create_invite(vault.id, owner, email, Privilege::Member, None)
                .await
                .unwrap();
            gateway.accept_invite(invite.token.as_str(), email, user).await.unwrap();
        }

        Fixture {
            _db: db,
            vaults,
            items,
            gateway,
            owner,
            alice,
            bob,
            vault_id: vault.id,
        }
    }

    fn password(secret: &str) -> NewItem {
        NewItem {
            title: "Bank".into(),
            description: Some("main account".into()),
            payload: ItemPayload::Password {
                username: Some("owner".into()),
                website_url: Some("https://bank.example".into()),
                password: SecureString::from(secret),
                notes: None,
            },
        }
    }

    #[tokio::test]
    async fn test_creator_gets_edit_and_others_nothing() {
        let f = fixture(PolicyKind::Immediate).await;
        let item = f.items.create_item(f.vault_id, f.alice, password("hunter2")).await.unwrap();
        assert_eq!(item.item_type, ItemType::Password);

        let details = f.items.read_item(f.vault_id, item.id, f.alice).await.unwrap();
        match details.payload {
            ItemPayload::Password { password, .. } => assert_eq!(password.as_str(), "hunter2"),
            other => panic!("unexpected payload {:?}", other),
        }

        assert_eq!(f.gateway.resolve(f.vault_id, item.id, f.bob).await.unwrap(), Permission::NoAccess);
        assert!(matches!(
            f.items.read_item(f.vault_id, item.id, f.bob).await,
            Err(Error::InsufficientPrivilege(_))
        ));
        assert!(f.items.list_items(f.vault_id, f.bob).await.unwrap().is_empty());

        // The owner sees everything regardless of grants
        let listed = f.items.list_items(f.vault_id, f.owner).await.unwrap();
        assert_eq!(listed, vec![(item.clone(), Permission::Edit)]);
        f.items.read_item(f.vault_id, item.id, f.owner).await.unwrap();
    }

    #[tokio::test]
    async fn test_visibility_grants() {
        let f = fixture(PolicyKind::Immediate).await;
        let item = f.items.create_item(f.vault_id, f.owner, password("pw")).await.unwrap();

        f.items
            .set_visibility(f.vault_id, item.id, f.owner, f.bob, ItemGrant::View)
            .await
            .unwrap();
        assert!(f.gateway.can_view(f.vault_id, item.id, f.bob).await.unwrap());
        assert!(!f.gateway.can_edit(f.vault_id, item.id, f.bob).await.unwrap());

        // A viewer cannot edit or share further
        let update = ItemUpdate {
            title: Some("Renamed".into()),
            ..Default::default()
        };
        assert!(matches!(
            f.items.update_item(f.vault_id, item.id, f.bob, update).await,
            Err(Error::InsufficientPrivilege(_))
        ));
        assert!(
            f.items
                .set_visibility(f.vault_id, item.id, f.bob, f.alice, ItemGrant::View)
                .await
                .is_err()
        );

        // Upgrading keeps a single row
        f.items
            .set_visibility(f.vault_id, item.id, f.owner, f.bob, ItemGrant::Edit)
            .await
            .unwrap();
        let grants = f.items.list_visibility(f.vault_id, item.id, f.owner).await.unwrap();
        assert_eq!(grants.len(), 2);
        assert!(grants.iter().any(|g| g.permission == ItemGrant::Edit));

        assert!(f.items.clear_visibility(f.vault_id, item.id, f.owner, f.bob).await.unwrap());
        assert!(!f.items.clear_visibility(f.vault_id, item.id, f.owner, f.bob).await.unwrap());
        assert_eq!(f.gateway.resolve(f.vault_id, item.id, f.bob).await.unwrap(), Permission::NoAccess);

        // Grants never target the owner or outsiders
        assert!(matches!(
            f.items
                .set_visibility(f.vault_id, item.id, f.owner, f.owner, ItemGrant::View)
                .await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            f.items
                .set_visibility(f.vault_id, item.id, f.owner, Uuid::new_v4(), ItemGrant::View)
                .await,
            Err(Error::MemberNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let f = fixture(PolicyKind::Immediate).await;
        let item = f.items.create_item(f.vault_id, f.alice, password("old")).await.unwrap();

        let updated = f
            .items
            .update_item(
                f.vault_id,
                item.id,
                f.alice,
                ItemUpdate {
                    title: Some("Bank (joint)".into()),
                    description: Some(None),
                    payload: Some(password("new").payload),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "Bank (joint)");
        assert_eq!(updated.description, None);

        let details = f.items.read_item(f.vault_id, item.id, f.owner).await.unwrap();
        assert!(matches!(details.payload, ItemPayload::Password { ref password, .. } if password.as_str() == "new"));

        let wrong_type = ItemUpdate {
            payload: Some(ItemPayload::Note {
                content: SecureString::from("x"),
            }),
            ..Default::default()
        };
        assert!(matches!(
            f.items.update_item(f.vault_id, item.id, f.alice, wrong_type).await,
            Err(Error::InvalidInput(_))
        ));

        f.items.delete_item(f.vault_id, item.id, f.alice).await.unwrap();
        assert!(matches!(
            f.items.read_item(f.vault_id, item.id, f.owner).await,
            Err(Error::ItemNotFound(_))
        ));
        assert!(f.items.list_items(f.vault_id, f.owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_members_cannot_add_items_before_release() {
        let f = fixture(PolicyKind::ManualRelease).await;
        assert!(matches!(
            f.items.create_item(f.vault_id, f.alice, password("x")).await,
            Err(Error::PolicyViolation(_))
        ));
        f.items.create_item(f.vault_id, f.owner, password("x")).await.unwrap();
        assert!(f.items.list_items(f.vault_id, f.alice).await.unwrap().is_empty());

        f.gateway.release_vault_manually(f.vault_id, f.owner).await.unwrap();
        f.items.create_item(f.vault_id, f.alice, password("y")).await.unwrap();
        assert_eq!(f.items.list_items(f.vault_id, f.alice).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_items_survive_ownership_transfer() {
        let f = fixture(PolicyKind::Immediate).await;
        let item = f.items.create_item(f.vault_id, f.owner, password("stable")).await.unwrap();

        f.vaults.transfer_ownership(f.vault_id, f.owner, f.alice).await.unwrap();

        let details = f.items.read_item(f.vault_id, item.id, f.alice).await.unwrap();
        assert!(matches!(details.payload, ItemPayload::Password { ref password, .. } if password.as_str() == "stable"));
    }
}
