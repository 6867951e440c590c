//! Access control gateway
//!
//! The single entry point callers use to ask whether someone may see or
//! change something. It composes the policy engine with the permission
//! resolver and owns the key derivation and field codec, so no other code
//! needs to touch the server signing key.
//!
//! Every public method returns [`AccessError`]; internal errors never leak.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::AccessError;
use super::permission::{self, Permission};
use crate::clock::Clock;
use crate::domain::invite::{CreatedInvite, InviteService};
use crate::domain::item::{ItemGrant, VaultItem};
use crate::domain::item::repository as items;
use crate::domain::policy::{PolicyDecision, PolicyService};
use crate::domain::security::{EncryptionCodec, KeyDerivationService, SecureString, VaultKey};
use crate::domain::vault::repository as vaults;
use crate::domain::vault::{Privilege, Vault, VaultMember};
use crate::error::{Error, Result};
use crate::identity::IdentityDirectory;

/// Answer to "can this user see into this vault right now"
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Accessibility {
    pub accessible: bool,
    /// Deny reason, present only when not accessible
    pub reason: Option<String>,
}

/// A user's standing in one vault at one instant
#[derive(Debug, Clone)]
pub struct AccessContext {
    pub vault: Vault,
    /// Active membership, if any
    pub member: Option<VaultMember>,
    /// Policy outcome; not evaluated for owners or non-members
    pub decision: Option<PolicyDecision>,
}

impl AccessContext {
    pub fn privilege(&self) -> Option<Privilege> {
        self.member.as_ref().map(|m| m.privilege)
    }

    pub fn is_owner(&self) -> bool {
        self.privilege() == Some(Privilege::Owner)
    }

    /// Vault contents visible at all, before item grants
    pub fn vault_accessible(&self) -> bool {
        match (self.privilege(), &self.decision) {
            (None, _) => false,
            (Some(Privilege::Owner), _) => true,
            (Some(_), Some(decision)) => decision.accessible,
            (Some(_), None) => false,
        }
    }

    /// Effective permission given the stored grant on an item
    pub fn permission(&self, grant: Option<ItemGrant>) -> Permission {
        let decision = self.decision.unwrap_or_else(PolicyDecision::open);
        permission::resolve(self.privilege(), &decision, grant)
    }

    /// The error explaining why `needed` was not granted
    pub(crate) fn denial(&self, needed: Permission) -> Error {
        let Some(member) = &self.member else {
            return Error::InsufficientPrivilege("not a member of this vault".to_string());
        };

        match &self.decision {
            Some(decision) if decision.is_inconsistent() => Error::InvariantViolation(format!(
                "release policy of vault {} is in an impossible state",
                self.vault.id
            )),
            Some(decision) if !decision.accessible => {
                Error::PolicyViolation(decision.reason().unwrap_or_else(|| "not released".to_string()))
            }
            _ => Error::InsufficientPrivilege(format!(
                "{} access required for member {}",
                needed, member.id
            )),
        }
    }
}

/// Composes policy evaluation, permission resolution and field encryption
#[derive(Debug, Clone)]
pub struct AccessControlGateway {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    policies: PolicyService,
    invites: InviteService,
    keys: KeyDerivationService,
    codec: EncryptionCodec,
}

impl AccessControlGateway {
    pub fn new(
        pool: SqlitePool,
        clock: Arc<dyn Clock>,
        keys: KeyDerivationService,
        identity: Arc<dyn IdentityDirectory>,
    ) -> Self {
        Self {
            policies: PolicyService::new(pool.clone(), clock.clone()),
            invites: InviteService::new(pool.clone(), clock.clone(), identity),
            pool,
            clock,
            keys,
            codec: EncryptionCodec,
        }
    }

    /// Replace the invite service, e.g. to change its default lifetime
    pub fn with_invites(mut self, invites: InviteService) -> Self {
        self.invites = invites;
        self
    }

    pub fn policies(&self) -> &PolicyService {
        &self.policies
    }

    pub fn invites(&self) -> &InviteService {
        &self.invites
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ========== Boundary API ==========

    /// Whether the user can currently see into the vault, with a reason if not
    pub async fn is_vault_accessible(
        &self,
        vault_id: Uuid,
        user_id: Uuid,
    ) -> std::result::Result<Accessibility, AccessError> {
        let ctx = boundary(self.context(vault_id, user_id).await, "is_vault_accessible")?;

        let accessibility = if ctx.vault_accessible() {
            Accessibility {
                accessible: true,
                reason: None,
            }
        } else {
            let reason = match (&ctx.member, &ctx.decision) {
                (None, _) => "not a member of this vault".to_string(),
                (Some(_), Some(decision)) => decision.reason().unwrap_or_else(|| "not released".to_string()),
                (Some(_), None) => "not released".to_string(),
            };
            debug!(vault_id = %vault_id, user_id = %user_id, reason = %reason, "Vault not accessible");
            Accessibility {
                accessible: false,
                reason: Some(reason),
            }
        };

        Ok(accessibility)
    }

    /// Effective permission of a user on one item
    pub async fn resolve(
        &self,
        vault_id: Uuid,
        item_id: Uuid,
        user_id: Uuid,
    ) -> std::result::Result<Permission, AccessError> {
        boundary(self.resolve_inner(vault_id, item_id, user_id).await, "resolve")
    }

    async fn resolve_inner(&self, vault_id: Uuid, item_id: Uuid, user_id: Uuid) -> Result<Permission> {
        let ctx = self.context(vault_id, user_id).await?;
        let mut conn = self.pool.acquire().await?;
        let item = items::require_active_item(&mut conn, vault_id, item_id).await?;
        self.item_permission(&mut conn, &ctx, &item).await
    }

    pub async fn can_view(&self, vault_id: Uuid, item_id: Uuid, user_id: Uuid) -> std::result::Result<bool, AccessError> {
        Ok(self.resolve(vault_id, item_id, user_id).await?.can_view())
    }

    pub async fn can_edit(&self, vault_id: Uuid, item_id: Uuid, user_id: Uuid) -> std::result::Result<bool, AccessError> {
        Ok(self.resolve(vault_id, item_id, user_id).await?.can_edit())
    }

    /// Owner or Admin of an active vault; policy and item grants are irrelevant
    pub async fn can_manage_members(&self, vault_id: Uuid, user_id: Uuid) -> std::result::Result<bool, AccessError> {
        let result = async {
            let mut conn = self.pool.acquire().await?;
            vaults::require_active_vault(&mut conn, vault_id).await?;
            let member = vaults::find_active_member(&mut conn, vault_id, user_id).await?;
            Ok::<_, Error>(permission::can_manage_members(member.map(|m| m.privilege)))
        }
        .await;

        boundary(result, "can_manage_members")
    }

    /// Issue an invite; the raw token in the result is never shown again
    pub async fn create_invite(
        &self,
        vault_id: Uuid,
        inviter_id: Uuid,
        invitee_email: &str,
        privilege: Privilege,
        expires_at: Option<DateTime<Utc>>,
    ) -> std::result::Result<CreatedInvite, AccessError> {
        boundary(
            self.invites
                .create_invite(vault_id, inviter_id, invitee_email, privilege, expires_at, None)
                .await,
            "create_invite",
        )
    }

    /// Redeem an invite token
    pub async fn accept_invite(
        &self,
        raw_token: &str,
        email: &str,
        user_id: Uuid,
    ) -> std::result::Result<VaultMember, AccessError> {
        boundary(
            self.invites.accept_invite(raw_token, email, user_id).await,
            "accept_invite",
        )
    }

    /// Release a ManualRelease vault; Owner only
    pub async fn release_vault_manually(&self, vault_id: Uuid, user_id: Uuid) -> std::result::Result<(), AccessError> {
        boundary(
            self.policies.release_manually(vault_id, user_id).await.map(|_| ()),
            "release_vault_manually",
        )
    }

    /// Encrypt one field under the vault's derived key
    pub async fn encrypt_field(&self, plaintext: &str, vault_id: Uuid) -> std::result::Result<String, AccessError> {
        let result = async {
            let key = self.key_for(vault_id).await?;
            self.codec.encrypt(plaintext, &key)
        }
        .await;

        boundary(result, "encrypt_field")
    }

    /// Decrypt one field; corrupt or foreign ciphertext is an error, never empty text
    pub async fn decrypt_field(&self, ciphertext: &str, vault_id: Uuid) -> std::result::Result<SecureString, AccessError> {
        let result = async {
            let key = self.key_for(vault_id).await?;
            self.codec.decrypt(ciphertext, &key)
        }
        .await;

        boundary(result, "decrypt_field")
    }

    // ========== Crate internals ==========

    /// Load vault, membership and (for non-owner members) the policy decision
    pub(crate) async fn context(&self, vault_id: Uuid, user_id: Uuid) -> Result<AccessContext> {
        let (vault, member) = {
            let mut conn = self.pool.acquire().await?;
            let vault = vaults::require_active_vault(&mut conn, vault_id).await?;
            let member = vaults::find_active_member(&mut conn, vault_id, user_id).await?;
            (vault, member)
        };

        match &member {
            Some(member) => {
                let holds_owner_row = member.privilege == Privilege::Owner;
                let is_vault_owner = member.user_id == vault.owner_id;
                if holds_owner_row != is_vault_owner {
                    warn!(
                        vault_id = %vault_id,
                        member_id = %member.id,
                        "Owner membership disagrees with vault owner"
                    );
                    return Err(Error::InvariantViolation(format!(
                        "vault {} owner does not match its owner membership",
                        vault_id
                    )));
                }
            }
            None if user_id == vault.owner_id => {
                warn!(vault_id = %vault_id, user_id = %user_id, "Vault owner has no active owner membership");
                return Err(Error::InvariantViolation(format!(
                    "vault {} has no active owner membership",
                    vault_id
                )));
            }
            None => {}
        }

        let decision = match &member {
            Some(m) if m.privilege != Privilege::Owner => Some(self.policies.evaluate(vault_id).await?.1),
            _ => None,
        };

        Ok(AccessContext { vault, member, decision })
    }

    /// Permission on a specific item; reads the grant only when it can matter
    pub(crate) async fn item_permission(
        &self,
        conn: &mut SqliteConnection,
        ctx: &AccessContext,
        item: &VaultItem,
    ) -> Result<Permission> {
        let grant = match &ctx.member {
            Some(member) if !ctx.is_owner() && ctx.vault_accessible() => {
                items::find_grant(conn, item.id, member.id).await?
            }
            _ => None,
        };
        Ok(ctx.permission(grant))
    }

    /// Derive the key of a loaded vault
    pub(crate) fn vault_key(&self, vault: &Vault) -> Result<VaultKey> {
        self.keys.derive(vault.id, vault.original_owner_id)
    }

    pub(crate) fn codec(&self) -> &EncryptionCodec {
        &self.codec
    }

    async fn key_for(&self, vault_id: Uuid) -> Result<VaultKey> {
        let mut conn = self.pool.acquire().await?;
        let vault = vaults::require_active_vault(&mut conn, vault_id).await?;
        self.vault_key(&vault)
    }
}

/// Convert at the boundary, logging denials at debug
fn boundary<T>(result: Result<T>, operation: &'static str) -> std::result::Result<T, AccessError> {
    result.map_err(|e| {
        if e.is_denial() {
            debug!(operation, code = e.code(), "Access denied");
        }
        AccessError::from(e)
    })
}
