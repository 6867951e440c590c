//! Boundary error type
//!
//! Everything the gateway returns collapses into [`AccessError`]. Messages
//! carry a deny reason at most: never SQL, token text or key material.

use serde::Serialize;
use thiserror::Error;

use crate::error::Error;

/// Closed set of outcomes a caller of the gateway can see
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "error", content = "reason", rename_all = "snake_case")]
pub enum AccessError {
    /// Vault not released yet, expired or revoked
    #[error("access denied: {0}")]
    PolicyViolation(String),

    /// Not shared with the caller, or the caller's role is too low
    #[error("access denied: insufficient privilege")]
    InsufficientPrivilege,

    /// Unknown token, wrong email or vault gone; deliberately indistinct
    #[error("invite is invalid")]
    InviteInvalid,

    #[error("invite has expired")]
    InviteExpired,

    #[error("invite has already been redeemed")]
    InviteAlreadyRedeemed,

    #[error("stored data could not be decrypted")]
    EncryptionFailure,

    /// Inconsistent stored state; logged and treated as a denial
    #[error("access denied: vault is in an inconsistent state")]
    InvariantViolation,

    #[error("not found")]
    NotFound,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Storage or configuration trouble; safe to retry
    #[error("service temporarily unavailable")]
    Unavailable,
}

impl AccessError {
    /// Stable machine readable identifier
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PolicyViolation(_) => "policy_violation",
            Self::InsufficientPrivilege => "insufficient_privilege",
            Self::InviteInvalid => "invite_invalid",
            Self::InviteExpired => "invite_expired",
            Self::InviteAlreadyRedeemed => "invite_already_redeemed",
            Self::EncryptionFailure => "encryption_failure",
            Self::InvariantViolation => "invariant_violation",
            Self::NotFound => "not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Unavailable => "unavailable",
        }
    }

    /// Deliberate denial as opposed to a failure
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            Self::PolicyViolation(_)
                | Self::InsufficientPrivilege
                | Self::InviteInvalid
                | Self::InviteExpired
                | Self::InviteAlreadyRedeemed
                | Self::InvariantViolation
        )
    }
}

impl From<Error> for AccessError {
    fn from(error: Error) -> Self {
        match error {
            Error::PolicyViolation(reason) => Self::PolicyViolation(reason),
            Error::InsufficientPrivilege(_) | Error::MemberNotFound { .. } => Self::InsufficientPrivilege,
            Error::InviteInvalid | Error::InviteNotFound(_) => Self::InviteInvalid,
            Error::InviteExpired => Self::InviteExpired,
            Error::InviteAlreadyRedeemed => Self::InviteAlreadyRedeemed,
            Error::EncryptionFailure(detail) => {
                tracing::warn!(detail = %detail, "Field decryption or encryption failed");
                Self::EncryptionFailure
            }
            Error::InvariantViolation(detail) => {
                tracing::warn!(detail = %detail, "Invariant violation treated as denial");
                Self::InvariantViolation
            }
            Error::VaultNotFound(_) | Error::ItemNotFound(_) => Self::NotFound,
            Error::InvalidInput(reason) => Self::InvalidRequest(reason),
            e @ Error::InvalidState { .. } => Self::InvalidRequest(e.to_string()),
            other => {
                tracing::error!(code = other.code(), error = %other, "Access check failed");
                Self::Unavailable
            }
        }
    }
}
