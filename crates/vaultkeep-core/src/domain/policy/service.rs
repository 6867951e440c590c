//! Policy service
//!
//! Owner and admin actions on a vault's release policy, plus persistence of
//! the transitions [`PolicyEngine`] observes lazily on read.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::engine::{PolicyDecision, PolicyEngine};
use super::entity::{PolicyKind, ReleaseStatus, VaultPolicy};
use super::repository;
use crate::clock::Clock;
use crate::domain::events::{VaultEvent, VaultEventType, record_event};
use crate::domain::vault::Privilege;
use crate::domain::vault::repository as vaults;
use crate::error::{Error, Result};

/// Service for reading and changing release policies
#[derive(Debug, Clone)]
pub struct PolicyService {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    engine: PolicyEngine,
}

impl PolicyService {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            clock,
            engine: PolicyEngine,
        }
    }

    /// Current policy of a vault, with any due transition applied
    pub async fn get_policy(&self, vault_id: Uuid) -> Result<VaultPolicy> {
        let (policy, _) = self.evaluate(vault_id).await?;
        Ok(policy)
    }

    /// Evaluate a vault's policy now, persisting a lazily observed transition
    pub async fn evaluate(&self, vault_id: Uuid) -> Result<(VaultPolicy, PolicyDecision)> {
        let now = self.clock.now();
        let mut policy = {
            let mut conn = self.pool.acquire().await?;
            repository::require_for_vault(&mut conn, vault_id).await?
        };

        let decision = self.engine.evaluate(&policy, now);
        if let Some(to) = decision.transition {
            match self.persist_observed(&policy, to, now).await {
                Ok(()) => {
                    if to == ReleaseStatus::Released && policy.released_at.is_none() {
                        policy.released_at = policy.kind.release_date();
                    }
                    policy.release_status = to;
                    policy.updated_at = now;
                }
                Err(e) => {
                    // The decision stands; the next read retries the write.
                    tracing::warn!(
                        vault_id = %vault_id,
                        error = %e,
                        "Failed to persist observed policy transition"
                    );
                }
            }
        }

        Ok((policy, decision))
    }

    async fn persist_observed(&self, policy: &VaultPolicy, to: ReleaseStatus, now: DateTime<Utc>) -> Result<()> {
        let (released, event_type) = match to {
            ReleaseStatus::Released => (
                Some((policy.kind.release_date().unwrap_or(now), None)),
                VaultEventType::PolicyReleased,
            ),
            ReleaseStatus::Expired => (None, VaultEventType::PolicyExpired),
            ReleaseStatus::Pending | ReleaseStatus::Revoked => {
                return Err(Error::InvariantViolation(format!(
                    "{} is never observed lazily",
                    to
                )));
            }
        };

        let mut tx = self.pool.begin().await?;
        let applied =
            repository::transition(&mut tx, policy.id, policy.release_status, to, released, now).await?;

        if applied {
            let event = VaultEvent::new(
                policy.vault_id,
                None,
                event_type,
                Some(json!({ "from": policy.release_status, "observed": true })),
                now,
            );
            record_event(&mut *tx, &event).await?;
            tx.commit().await?;

            tracing::info!(
                vault_id = %policy.vault_id,
                from = %policy.release_status,
                to = %to,
                "Release policy transitioned"
            );
        }

        Ok(())
    }

    /// Release a ManualRelease vault; Owner only
    pub async fn release_manually(&self, vault_id: Uuid, user_id: Uuid) -> Result<VaultPolicy> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        vaults::require_active_vault(&mut tx, vault_id).await?;
        let member = vaults::require_active_member(&mut tx, vault_id, user_id).await?;
        if member.privilege != Privilege::Owner {
            return Err(Error::InsufficientPrivilege(
                "only the owner can release a vault".to_string(),
            ));
        }

        let mut policy = repository::require_for_vault(&mut tx, vault_id).await?;
        if policy.kind != PolicyKind::ManualRelease {
            return Err(Error::invalid_state("policy", policy.kind.type_str(), "manually release"));
        }
        if policy.release_status != ReleaseStatus::Pending {
            return Err(Error::invalid_state("policy", policy.release_status, "manually release"));
        }

        let applied = repository::transition(
            &mut tx,
            policy.id,
            ReleaseStatus::Pending,
            ReleaseStatus::Released,
            Some((now, Some(user_id))),
            now,
        )
        .await?;
        if !applied {
            return Err(Error::invalid_state("policy", "changed", "manually release"));
        }

        record_event(
            &mut *tx,
            &VaultEvent::by(vault_id, user_id, VaultEventType::PolicyReleased, now),
        )
        .await?;
        tx.commit().await?;

        tracing::info!(vault_id = %vault_id, user_id = %user_id, "Vault released manually");

        policy.release_status = ReleaseStatus::Released;
        policy.released_at = Some(now);
        policy.released_by_id = Some(user_id);
        policy.updated_at = now;
        Ok(policy)
    }

    /// Revoke access for every non-owner; Owner or Admin
    pub async fn revoke(&self, vault_id: Uuid, user_id: Uuid, note: Option<&str>) -> Result<VaultPolicy> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        vaults::require_active_vault(&mut tx, vault_id).await?;
        let member = vaults::require_active_member(&mut tx, vault_id, user_id).await?;
        if !member.privilege.can_manage_members() {
            return Err(Error::InsufficientPrivilege(
                "only the owner or an admin can revoke a vault".to_string(),
            ));
        }

        let mut policy = repository::require_for_vault(&mut tx, vault_id).await?;
        if policy.release_status == ReleaseStatus::Revoked {
            return Err(Error::invalid_state("policy", policy.release_status, "revoke"));
        }

        if !repository::revoke(&mut tx, policy.id, note, now).await? {
            return Err(Error::invalid_state("policy", ReleaseStatus::Revoked, "revoke"));
        }

        let event = VaultEvent::by(vault_id, user_id, VaultEventType::PolicyRevoked, now)
            .with_data(json!({ "from": policy.release_status }));
        record_event(&mut *tx, &event).await?;
        tx.commit().await?;

        tracing::info!(
            vault_id = %vault_id,
            user_id = %user_id,
            from = %policy.release_status,
            "Vault policy revoked"
        );

        policy.release_status = ReleaseStatus::Revoked;
        if let Some(note) = note {
            policy.note = Some(note.to_string());
        }
        policy.updated_at = now;
        Ok(policy)
    }

    /// Replace the policy kind; Owner only, not once revoked
    pub async fn change_policy(
        &self,
        vault_id: Uuid,
        user_id: Uuid,
        kind: PolicyKind,
        note: Option<String>,
    ) -> Result<VaultPolicy> {
        let now = self.clock.now();
        kind.validate(now)?;

        let mut tx = self.pool.begin().await?;
        vaults::require_active_vault(&mut tx, vault_id).await?;
        let member = vaults::require_active_member(&mut tx, vault_id, user_id).await?;
        if member.privilege != Privilege::Owner {
            return Err(Error::InsufficientPrivilege(
                "only the owner can change the release policy".to_string(),
            ));
        }

        let current = repository::require_for_vault(&mut tx, vault_id).await?;
        if current.release_status == ReleaseStatus::Revoked {
            return Err(Error::invalid_state("policy", current.release_status, "change"));
        }

        let fresh = VaultPolicy::new(vault_id, kind, note.or_else(|| current.note.clone()), user_id, now)?;
        let replacement = VaultPolicy {
            id: current.id,
            created_at: current.created_at,
            ..fresh
        };

        if !repository::replace_kind(&mut tx, &replacement, current.release_status).await? {
            return Err(Error::invalid_state("policy", "changed", "change"));
        }

        let event = VaultEvent::by(vault_id, user_id, VaultEventType::PolicyChanged, now).with_data(json!({
            "from": current.kind.type_str(),
            "to": replacement.kind.type_str(),
        }));
        record_event(&mut *tx, &event).await?;
        tx.commit().await?;

        tracing::info!(
            vault_id = %vault_id,
            from = current.kind.type_str(),
            to = replacement.kind.type_str(),
            "Release policy changed"
        );

        Ok(replacement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::vault::VaultService;
    use crate::storage::Database;
    use chrono::{Duration, TimeZone};

    struct Fixture {
        _db: Database,
        clock: ManualClock,
        vaults: VaultService,
        policies: PolicyService,
    }

    async fn fixture() -> Fixture {
        let db = Database::in_memory().await.unwrap();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2030, 1, 1, 9, 0, 0).unwrap());
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        Fixture {
            vaults: VaultService::new(db.pool().clone(), shared.clone()),
            policies: PolicyService::new(db.pool().clone(), shared),
            clock,
            _db: db,
        }
    }

    #[tokio::test]
    async fn test_time_based_release_is_persisted_lazily() {
        let f = fixture().await;
        let owner = Uuid::new_v4();
        let release_date = f.clock.now() + Duration::days(1);
        let vault = f
            .vaults
            .create_vault(owner, "Later", None, PolicyKind::TimeBased { release_date })
            .await
            .unwrap();

        let (policy, decision) = f.policies.evaluate(vault.id).await.unwrap();
        assert!(!decision.accessible);
        assert_eq!(policy.release_status, ReleaseStatus::Pending);

        f.clock.set(release_date);
        let (_, decision) = f.policies.evaluate(vault.id).await.unwrap();
        assert!(decision.accessible);

        // Reloaded from storage: the transition was written
        let stored = f.policies.get_policy(vault.id).await.unwrap();
        assert_eq!(stored.release_status, ReleaseStatus::Released);
        assert_eq!(stored.released_at, Some(release_date));
    }

    #[tokio::test]
    async fn test_manual_release_owner_only() {
        let f = fixture().await;
        let owner = Uuid::new_v4();
        let vault = f
            .vaults
            .create_vault(owner, "Manual", None, PolicyKind::ManualRelease)
            .await
            .unwrap();

        let stranger = Uuid::new_v4();
        assert!(matches!(
            f.policies.release_manually(vault.id, stranger).await,
            Err(Error::MemberNotFound { .. })
        ));

        let released = f.policies.release_manually(vault.id, owner).await.unwrap();
        assert_eq!(released.release_status, ReleaseStatus::Released);
        assert_eq!(released.released_by_id, Some(owner));

        assert!(matches!(
            f.policies.release_manually(vault.id, owner).await,
            Err(Error::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_release_manually_rejects_other_kinds() {
        let f = fixture().await;
        let owner = Uuid::new_v4();
        let vault = f
            .vaults
            .create_vault(owner, "Now", None, PolicyKind::Immediate)
            .await
            .unwrap();

        assert!(matches!(
            f.policies.release_manually(vault.id, owner).await,
            Err(Error::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_revoke_is_sticky() {
        let f = fixture().await;
        let owner = Uuid::new_v4();
        let vault = f
            .vaults
            .create_vault(owner, "Sticky", None, PolicyKind::Immediate)
            .await
            .unwrap();

        let revoked = f.policies.revoke(vault.id, owner, Some("dispute")).await.unwrap();
        assert_eq!(revoked.release_status, ReleaseStatus::Revoked);
        assert_eq!(revoked.note.as_deref(), Some("dispute"));

        assert!(f.policies.revoke(vault.id, owner, None).await.is_err());
        assert!(matches!(
            f.policies
                .change_policy(vault.id, owner, PolicyKind::Immediate, None)
                .await,
            Err(Error::InvalidState { .. })
        ));

        let (_, decision) = f.policies.evaluate(vault.id).await.unwrap();
        assert_eq!(decision.reason().as_deref(), Some("revoked"));
    }

    #[tokio::test]
    async fn test_change_policy_resets_status() {
        let f = fixture().await;
        let owner = Uuid::new_v4();
        let vault = f
            .vaults
            .create_vault(owner, "Switch", None, PolicyKind::Immediate)
            .await
            .unwrap();

        let changed = f
            .policies
            .change_policy(vault.id, owner, PolicyKind::ManualRelease, Some("hold".into()))
            .await
            .unwrap();
        assert_eq!(changed.release_status, ReleaseStatus::Pending);
        assert_eq!(changed.released_at, None);

        let stored = f.policies.get_policy(vault.id).await.unwrap();
        assert_eq!(stored, changed);
    }
}
