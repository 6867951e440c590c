//! Release policy evaluation
//!
//! [`PolicyEngine::evaluate`] is the one place that decides whether a vault's
//! contents are visible to non-owners at a given instant. It is pure: it
//! reports a transition the caller should persist but never writes anything.
//!
//! Owners are not subject to this evaluation; see the permission resolver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::entity::{PolicyKind, ReleaseStatus, VaultPolicy};

/// Why a vault is currently closed to its members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenyReason {
    Revoked,
    Expired { at: Option<DateTime<Utc>> },
    NotYetReleased { release_date: DateTime<Utc> },
    AwaitingManualRelease,
    /// Stored state that no transition can produce
    Inconsistent,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Revoked => write!(f, "revoked"),
            Self::Expired { at: Some(at) } => write!(f, "expired on {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
            Self::Expired { at: None } => write!(f, "expired"),
            Self::NotYetReleased { release_date } => write!(
                f,
                "not released until {}",
                release_date.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            Self::AwaitingManualRelease => write!(f, "awaiting manual release"),
            Self::Inconsistent => write!(f, "unavailable"),
        }
    }
}

/// Outcome of evaluating a policy at an instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub accessible: bool,
    pub denial: Option<DenyReason>,
    /// Status the stored policy should move to, observed lazily
    pub transition: Option<ReleaseStatus>,
}

impl PolicyDecision {
    pub(crate) fn open() -> Self {
        Self {
            accessible: true,
            denial: None,
            transition: None,
        }
    }

    fn closed(reason: DenyReason) -> Self {
        Self {
            accessible: false,
            denial: Some(reason),
            transition: None,
        }
    }

    fn with_transition(mut self, to: ReleaseStatus) -> Self {
        self.transition = Some(to);
        self
    }

    /// Human readable deny reason, if denied
    pub fn reason(&self) -> Option<String> {
        self.denial.map(|d| d.to_string())
    }

    /// True if the stored state is impossible and should be reported
    pub fn is_inconsistent(&self) -> bool {
        self.denial == Some(DenyReason::Inconsistent)
    }
}

/// Stateless evaluator of the release state machine
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyEngine;

impl PolicyEngine {
    /// Decide accessibility of `policy` at `now`
    pub fn evaluate(&self, policy: &VaultPolicy, now: DateTime<Utc>) -> PolicyDecision {
        match (policy.release_status, policy.kind) {
            (ReleaseStatus::Revoked, _) => PolicyDecision::closed(DenyReason::Revoked),

            (ReleaseStatus::Expired, kind) => {
                PolicyDecision::closed(DenyReason::Expired { at: kind.expires_at() })
            }

            (ReleaseStatus::Released, PolicyKind::ExpiryBased { expires_at }) => {
                if now > expires_at {
                    PolicyDecision::closed(DenyReason::Expired { at: Some(expires_at) })
                        .with_transition(ReleaseStatus::Expired)
                } else {
                    PolicyDecision::open()
                }
            }

            (
                ReleaseStatus::Released,
                PolicyKind::Immediate | PolicyKind::TimeBased { .. } | PolicyKind::ManualRelease,
            ) => PolicyDecision::open(),

            (ReleaseStatus::Pending, PolicyKind::TimeBased { release_date }) => {
                if now >= release_date {
                    PolicyDecision::open().with_transition(ReleaseStatus::Released)
                } else {
                    PolicyDecision::closed(DenyReason::NotYetReleased { release_date })
                }
            }

            (ReleaseStatus::Pending, PolicyKind::ManualRelease) => {
                PolicyDecision::closed(DenyReason::AwaitingManualRelease)
            }

            (ReleaseStatus::Pending, kind @ (PolicyKind::Immediate | PolicyKind::ExpiryBased { .. })) => {
                tracing::warn!(
                    vault_id = %policy.vault_id,
                    policy_id = %policy.id,
                    policy_type = kind.type_str(),
                    "Release policy found pending for a kind that starts released"
                );
                PolicyDecision::closed(DenyReason::Inconsistent)
            }
        }
    }

    /// Convenience wrapper returning only the boolean
    pub fn is_accessible(&self, policy: &VaultPolicy, now: DateTime<Utc>) -> bool {
        self.evaluate(policy, now).accessible
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn t() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap()
    }

    fn policy(kind: PolicyKind, status: ReleaseStatus) -> VaultPolicy {
        VaultPolicy {
            id: Uuid::new_v4(),
            vault_id: Uuid::new_v4(),
            kind,
            release_status: status,
            released_at: None,
            released_by_id: None,
            note: None,
            created_at: t() - Duration::days(30),
            updated_at: t() - Duration::days(30),
        }
    }

    #[test]
    fn test_immediate_released_is_open() {
        let p = policy(PolicyKind::Immediate, ReleaseStatus::Released);
        let decision = PolicyEngine.evaluate(&p, t());
        assert!(decision.accessible);
        assert_eq!(decision.transition, None);
    }

    #[test]
    fn test_time_based_boundary() {
        let p = policy(PolicyKind::TimeBased { release_date: t() }, ReleaseStatus::Pending);

        let before = PolicyEngine.evaluate(&p, t() - Duration::seconds(1));
        assert!(!before.accessible);
        assert!(before.reason().unwrap().starts_with("not released until"));

        let at = PolicyEngine.evaluate(&p, t());
        assert!(at.accessible);
        assert_eq!(at.transition, Some(ReleaseStatus::Released));
    }

    #[test]
    fn test_expiry_based_boundary() {
        let p = policy(PolicyKind::ExpiryBased { expires_at: t() }, ReleaseStatus::Released);

        assert!(PolicyEngine.is_accessible(&p, t()));

        let after = PolicyEngine.evaluate(&p, t() + Duration::seconds(1));
        assert!(!after.accessible);
        assert_eq!(after.transition, Some(ReleaseStatus::Expired));
        assert_eq!(after.reason().unwrap(), "expired on 2030-06-01 12:00:00 UTC");
    }

    #[test]
    fn test_stored_expired_stays_closed() {
        let p = policy(PolicyKind::ExpiryBased { expires_at: t() }, ReleaseStatus::Expired);
        let decision = PolicyEngine.evaluate(&p, t() - Duration::days(1));
        assert!(!decision.accessible);
        assert_eq!(decision.transition, None);
        assert!(decision.reason().unwrap().starts_with("expired on"));
    }

    #[test]
    fn test_revoked_dominates_every_kind() {
        let kinds = [
            PolicyKind::Immediate,
            PolicyKind::TimeBased { release_date: t() - Duration::days(1) },
            PolicyKind::ExpiryBased { expires_at: t() + Duration::days(365) },
            PolicyKind::ManualRelease,
        ];
        for kind in kinds {
            let decision = PolicyEngine.evaluate(&policy(kind, ReleaseStatus::Revoked), t());
            assert!(!decision.accessible, "{kind} should be closed when revoked");
            assert_eq!(decision.reason().as_deref(), Some("revoked"));
            assert_eq!(decision.transition, None);
        }
    }

    #[test]
    fn test_manual_release_waits_for_owner() {
        let pending = policy(PolicyKind::ManualRelease, ReleaseStatus::Pending);
        let decision = PolicyEngine.evaluate(&pending, t() + Duration::days(10_000));
        assert!(!decision.accessible);
        assert_eq!(decision.denial, Some(DenyReason::AwaitingManualRelease));

        let released = policy(PolicyKind::ManualRelease, ReleaseStatus::Released);
        assert!(PolicyEngine.is_accessible(&released, t()));
    }

    #[test]
    fn test_pending_immediate_is_inconsistent_and_closed() {
        let p = policy(PolicyKind::Immediate, ReleaseStatus::Pending);
        let decision = PolicyEngine.evaluate(&p, t());
        assert!(!decision.accessible);
        assert!(decision.is_inconsistent());
    }
}
