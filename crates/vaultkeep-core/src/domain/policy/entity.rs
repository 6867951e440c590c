//! Release policy entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};

/// What kind of release rule a vault uses, with the data that kind needs
///
/// Carrying the dates inside the variants makes "TimeBased without a release
/// date" unrepresentable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyKind {
    /// Released at creation
    #[default]
    Immediate,
    /// Released once `now >= release_date`
    TimeBased { release_date: DateTime<Utc> },
    /// Released at creation, expires once `now > expires_at`
    ExpiryBased { expires_at: DateTime<Utc> },
    /// Released only by an explicit owner action
    ManualRelease,
}

impl PolicyKind {
    /// Stored `policy_type` value
    pub fn type_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::TimeBased { .. } => "time_based",
            Self::ExpiryBased { .. } => "expiry_based",
            Self::ManualRelease => "manual_release",
        }
    }

    pub fn release_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::TimeBased { release_date } => Some(*release_date),
            _ => None,
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::ExpiryBased { expires_at } => Some(*expires_at),
            _ => None,
        }
    }

    /// Status a freshly created policy of this kind starts in
    pub fn initial_status(&self) -> ReleaseStatus {
        match self {
            Self::Immediate | Self::ExpiryBased { .. } => ReleaseStatus::Released,
            Self::TimeBased { .. } | Self::ManualRelease => ReleaseStatus::Pending,
        }
    }

    /// Rebuild from stored columns
    pub fn from_parts(
        policy_type: &str,
        release_date: Option<DateTime<Utc>>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        match (policy_type, release_date, expires_at) {
            ("immediate", None, None) => Ok(Self::Immediate),
            ("time_based", Some(release_date), None) => Ok(Self::TimeBased { release_date }),
            ("expiry_based", None, Some(expires_at)) => Ok(Self::ExpiryBased { expires_at }),
            ("manual_release", None, None) => Ok(Self::ManualRelease),
            _ => Err(Error::Parse(format!(
                "Inconsistent policy columns for type '{}'",
                policy_type
            ))),
        }
    }

    /// Check the dates of a policy being created or replaced at `now`
    pub fn validate(&self, now: DateTime<Utc>) -> Result<()> {
        match self {
            Self::TimeBased { release_date } if *release_date <= now => Err(Error::InvalidInput(
                "release date must be in the future".to_string(),
            )),
            Self::ExpiryBased { expires_at } if *expires_at <= now => Err(Error::InvalidInput(
                "expiry must be in the future".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimeBased { release_date } => write!(f, "time_based (release {})", release_date.to_rfc3339()),
            Self::ExpiryBased { expires_at } => write!(f, "expiry_based (expires {})", expires_at.to_rfc3339()),
            other => write!(f, "{}", other.type_str()),
        }
    }
}

/// Where a vault is in its release lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStatus {
    Pending,
    Released,
    Expired,
    /// Sticky; overrides every other rule
    Revoked,
}

impl ReleaseStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "released" => Some(Self::Released),
            "expired" => Some(Self::Expired),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Released => "released",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The single release policy of a vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultPolicy {
    pub id: Uuid,
    pub vault_id: Uuid,
    pub kind: PolicyKind,
    pub release_status: ReleaseStatus,
    pub released_at: Option<DateTime<Utc>>,
    pub released_by_id: Option<Uuid>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VaultPolicy {
    /// Create the policy for a new vault, validating its dates against `now`
    pub fn new(
        vault_id: Uuid,
        kind: PolicyKind,
        note: Option<String>,
        created_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        kind.validate(now)?;

        let release_status = kind.initial_status();
        let (released_at, released_by_id) = match release_status {
            ReleaseStatus::Released => (Some(now), Some(created_by)),
            _ => (None, None),
        };

        Ok(Self {
            id: Uuid::new_v4(),
            vault_id,
            kind,
            release_status,
            released_at,
            released_by_id,
            note,
            created_at: now,
            updated_at: now,
        })
    }
}
