//! Invite service
//!
//! Issues, tracks and redeems invites. Redemption starts its transaction with
//! the conditional claim update: the write itself decides the winner, and
//! every later check rolls the claim back on failure.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::entity::{CreatedInvite, InviteStatus, VaultInvite, generate_token, hash_token};
use super::repository;
use crate::clock::Clock;
use crate::domain::events::{VaultEvent, VaultEventType, record_event};
use crate::domain::vault::repository as vaults;
use crate::domain::vault::{MemberStatus, Privilege, VaultMember};
use crate::error::{Error, Result};
use crate::identity::{IdentityDirectory, normalize_email};

/// Default lifetime of an invite
pub const DEFAULT_INVITE_TTL_HOURS: i64 = 168;

/// Service for the invite lifecycle
#[derive(Debug, Clone)]
pub struct InviteService {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    identity: Arc<dyn IdentityDirectory>,
    default_ttl: Duration,
}

impl InviteService {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>, identity: Arc<dyn IdentityDirectory>) -> Self {
        Self {
            pool,
            clock,
            identity,
            default_ttl: Duration::hours(DEFAULT_INVITE_TTL_HOURS),
        }
    }

    /// Override how long invites stay valid when no expiry is given
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Issue an invite; Owner or Admin of an active vault
    ///
    /// The returned token is the only copy; it is not stored.
    pub async fn create_invite(
        &self,
        vault_id: Uuid,
        inviter_id: Uuid,
        invitee_email: &str,
        privilege: Privilege,
        expires_at: Option<DateTime<Utc>>,
        note: Option<String>,
    ) -> Result<CreatedInvite> {
        if privilege == Privilege::Owner {
            return Err(Error::InvalidInput(
                "invites grant admin or member privilege only".to_string(),
            ));
        }
        let email = normalize_email(invitee_email)?;
        let now = self.clock.now();
        let expires_at = expires_at.unwrap_or(now + self.default_ttl);
        if expires_at <= now {
            return Err(Error::InvalidInput("invite expiry must be in the future".to_string()));
        }

        let mut tx = self.pool.begin().await?;
        vaults::require_active_vault(&mut tx, vault_id).await?;
        let inviter = vaults::require_active_member(&mut tx, vault_id, inviter_id).await?;
        if !inviter.privilege.can_manage_members() {
            return Err(Error::InsufficientPrivilege(
                "only the owner or an admin can invite".to_string(),
            ));
        }

        let (token, token_hash) = generate_token();
        let invite = VaultInvite {
            id: Uuid::new_v4(),
            vault_id,
            inviter_id,
            invitee_email: email,
            invitee_id: None,
            privilege,
            status: InviteStatus::Pending,
            expires_at,
            created_at: now,
            accepted_at: None,
            note,
        };

        repository::insert_invite(&mut tx, &invite, &token_hash).await?;
        let event = VaultEvent::by(vault_id, inviter_id, VaultEventType::InviteCreated, now)
            .with_data(json!({ "invite_id": invite.id, "privilege": privilege }));
        record_event(&mut *tx, &event).await?;
        tx.commit().await?;

        info!(
            vault_id = %vault_id,
            invite_id = %invite.id,
            privilege = %privilege,
            expires_at = %expires_at,
            "Created invite"
        );

        Ok(CreatedInvite { invite, token })
    }

    /// Record out-of-band delivery: Pending -> Sent
    pub async fn mark_sent(&self, invite_id: Uuid, actor_id: Uuid) -> Result<VaultInvite> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let mut invite = self.require_managed_invite(&mut tx, invite_id, actor_id).await?;

        if invite.is_past_expiry(now) || !repository::close(&mut tx, invite_id, InviteStatus::Sent).await? {
            return Err(Error::invalid_state("invite", invite.effective_status(now), "mark as sent"));
        }

        record_event(
            &mut *tx,
            &VaultEvent::by(invite.vault_id, actor_id, VaultEventType::InviteSent, now)
                .with_data(json!({ "invite_id": invite_id })),
        )
        .await?;
        tx.commit().await?;

        debug!(invite_id = %invite_id, "Invite marked as sent");
        invite.status = InviteStatus::Sent;
        Ok(invite)
    }

    /// Withdraw an open invite; Owner or Admin
    pub async fn cancel_invite(&self, invite_id: Uuid, actor_id: Uuid) -> Result<()> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let invite = self.require_managed_invite(&mut tx, invite_id, actor_id).await?;

        if !repository::close(&mut tx, invite_id, InviteStatus::Cancelled).await? {
            return Err(Error::invalid_state("invite", invite.status, "cancel"));
        }

        record_event(
            &mut *tx,
            &VaultEvent::by(invite.vault_id, actor_id, VaultEventType::InviteCancelled, now)
                .with_data(json!({ "invite_id": invite_id })),
        )
        .await?;
        tx.commit().await?;

        info!(vault_id = %invite.vault_id, invite_id = %invite_id, "Cancelled invite");
        Ok(())
    }

    /// Invites of a vault with expiry applied; Owner or Admin
    pub async fn list_invites(&self, vault_id: Uuid, actor_id: Uuid) -> Result<Vec<VaultInvite>> {
        let now = self.clock.now();
        let mut conn = self.pool.acquire().await?;
        vaults::require_active_vault(&mut conn, vault_id).await?;
        let actor = vaults::require_active_member(&mut conn, vault_id, actor_id).await?;
        if !actor.privilege.can_manage_members() {
            return Err(Error::InsufficientPrivilege(
                "only the owner or an admin can list invites".to_string(),
            ));
        }

        let invites = repository::list_for_vault(&mut conn, vault_id).await?;
        Ok(invites
            .into_iter()
            .map(|mut invite| {
                invite.status = invite.effective_status(now);
                invite
            })
            .collect())
    }

    /// Redeem a token for `user_id`, who must own `email`
    pub async fn accept_invite(&self, raw_token: &str, email: &str, user_id: Uuid) -> Result<VaultMember> {
        let email = normalize_email(email).map_err(|_| Error::InviteInvalid)?;

        // Resolve the identity before taking the write lock
        if self.identity.user_id_for_email(&email).await? != Some(user_id) {
            debug!(user_id = %user_id, "Invite rejected: email does not belong to user");
            return Err(Error::InviteInvalid);
        }

        let token_hash = hash_token(raw_token);
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        if !repository::claim(&mut tx, &token_hash, user_id, now).await? {
            let existing = repository::find_by_token_hash(&mut tx, &token_hash).await?;
            drop(tx);
            return Err(match existing.map(|i| i.status) {
                Some(InviteStatus::Accepted) => Error::InviteAlreadyRedeemed,
                Some(InviteStatus::Expired) => Error::InviteExpired,
                _ => Error::InviteInvalid,
            });
        }

        let invite = repository::find_by_token_hash(&mut tx, &token_hash)
            .await?
            .ok_or(Error::InviteInvalid)?;

        if invite.is_past_expiry(now) {
            tx.rollback().await?;
            self.persist_expired(invite.id).await;
            return Err(Error::InviteExpired);
        }

        if invite.invitee_email.to_lowercase() != email {
            debug!(invite_id = %invite.id, "Invite rejected: email mismatch");
            return Err(Error::InviteInvalid);
        }

        match vaults::find_vault(&mut tx, invite.vault_id).await? {
            Some(vault) if vault.is_active() => {}
            _ => return Err(Error::InviteInvalid),
        }

        let member = self.admit(&mut tx, &invite, user_id, now).await?;

        let event = VaultEvent::by(invite.vault_id, user_id, VaultEventType::InviteAccepted, now).with_data(json!({
            "invite_id": invite.id,
            "privilege": member.privilege,
        }));
        record_event(&mut *tx, &event).await?;
        tx.commit().await?;

        info!(
            vault_id = %invite.vault_id,
            invite_id = %invite.id,
            user_id = %user_id,
            privilege = %member.privilege,
            "Invite accepted"
        );

        Ok(member)
    }

    /// Create or reactivate the membership an accepted invite grants
    ///
    /// An existing active membership is returned unchanged; roles only move
    /// through `change_privilege` and ownership transfer.
    async fn admit(
        &self,
        conn: &mut sqlx::SqliteConnection,
        invite: &VaultInvite,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<VaultMember> {
        if let Some(member) = vaults::find_active_member(conn, invite.vault_id, user_id).await? {
            debug!(
                invite_id = %invite.id,
                member_id = %member.id,
                "Invite accepted by an existing member; privilege kept"
            );
            return Ok(member);
        }

        if let Some(mut member) = vaults::find_latest_inactive_member(conn, invite.vault_id, user_id).await? {
            if vaults::reactivate_member(conn, member.id, invite.privilege, Some(invite.inviter_id), now).await? {
                member.privilege = invite.privilege;
                member.status = MemberStatus::Active;
                member.added_by_id = Some(invite.inviter_id);
                member.joined_at = now;
                member.left_at = None;
                member.removed_at = None;
                member.removed_by_id = None;
                return Ok(member);
            }
        }

        let member = VaultMember::new(invite.vault_id, user_id, invite.privilege, Some(invite.inviter_id), now);
        vaults::insert_member(conn, &member).await?;
        Ok(member)
    }

    async fn persist_expired(&self, invite_id: Uuid) {
        let result = async {
            let mut conn = self.pool.acquire().await?;
            repository::close(&mut conn, invite_id, InviteStatus::Expired).await
        }
        .await;

        match result {
            Ok(true) => info!(invite_id = %invite_id, "Invite expired"),
            Ok(false) => {}
            Err(e) => warn!(invite_id = %invite_id, error = %e, "Failed to persist invite expiry"),
        }
    }

    /// Flip every open invite past its expiry to Expired
    pub async fn expire_stale_invites(&self) -> Result<u64> {
        let now = self.clock.now();
        let mut conn = self.pool.acquire().await?;
        let mut expired = 0;

        for invite in repository::list_open(&mut conn).await? {
            if invite.is_past_expiry(now) && repository::close(&mut conn, invite.id, InviteStatus::Expired).await? {
                expired += 1;
            }
        }

        if expired > 0 {
            info!(count = expired, "Expired stale invites");
        }
        Ok(expired)
    }

    async fn require_managed_invite(
        &self,
        conn: &mut sqlx::SqliteConnection,
        invite_id: Uuid,
        actor_id: Uuid,
    ) -> Result<VaultInvite> {
        let invite = repository::find_by_id(conn, invite_id)
            .await?
            .ok_or(Error::InviteNotFound(invite_id))?;
        let actor = vaults::require_active_member(conn, invite.vault_id, actor_id).await?;
        if !actor.privilege.can_manage_members() {
            return Err(Error::InsufficientPrivilege(
                "only the owner or an admin can manage invites".to_string(),
            ));
        }
        Ok(invite)
    }
}
