//! Error types for Vaultkeep

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using Vaultkeep's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Vaultkeep error types with helpful messages and suggestions
///
/// These carry internal detail for logs and operators. Anything crossing the
/// access-control boundary is converted into [`crate::domain::access::AccessError`].
#[derive(Error, Debug)]
pub enum Error {
    // Entity errors (E001-E099)
    #[error("Vault '{0}' not found.")]
    VaultNotFound(Uuid),

    #[error("Item '{0}' not found.")]
    ItemNotFound(Uuid),

    #[error("User '{user_id}' is not an active member of vault '{vault_id}'.")]
    MemberNotFound { vault_id: Uuid, user_id: Uuid },

    #[error("Invite '{0}' not found.")]
    InviteNotFound(Uuid),

    // Access errors (E100-E199)
    #[error("Access denied: {0}")]
    PolicyViolation(String),

    #[error("Insufficient privilege: {0}")]
    InsufficientPrivilege(String),

    // Invite errors (E200-E299)
    #[error("Invite is invalid")]
    InviteInvalid,

    #[error("Invite has expired")]
    InviteExpired,

    #[error("Invite has already been redeemed")]
    InviteAlreadyRedeemed,

    // Crypto errors (E300-E399)
    #[error("Encryption failure: {0}")]
    EncryptionFailure(String),

    #[error("Invalid signing key: {0}")]
    InvalidSigningKey(String),

    // Consistency errors (E400-E499)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Cannot {operation} {entity} in '{current}' state")]
    InvalidState {
        entity: &'static str,
        current: String,
        operation: &'static str,
    },

    // Database errors (E500-E599)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Stored data could not be parsed: {0}")]
    Parse(String),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::VaultNotFound(_) => "E001",
            Self::ItemNotFound(_) => "E002",
            Self::MemberNotFound { .. } => "E003",
            Self::InviteNotFound(_) => "E004",
            Self::PolicyViolation(_) => "E100",
            Self::InsufficientPrivilege(_) => "E101",
            Self::InviteInvalid => "E200",
            Self::InviteExpired => "E201",
            Self::InviteAlreadyRedeemed => "E202",
            Self::EncryptionFailure(_) => "E300",
            Self::InvalidSigningKey(_) => "E301",
            Self::InvariantViolation(_) => "E400",
            Self::InvalidState { .. } => "E401",
            Self::DatabaseError(_) => "E500",
            Self::Parse(_) => "E501",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::VaultNotFound(_) => Some("vaultkeep vault list --user <id>".to_string()),
            Self::InviteExpired => Some("Ask a vault admin for a new invite".to_string()),
            Self::InvalidSigningKey(_) => Some(
                "Generate one with `vaultkeep keygen` and export VAULTKEEP_SIGNING_KEY".to_string(),
            ),
            Self::DatabaseError(_) => Some("vaultkeep init".to_string()),
            Self::ConfigError(_) => Some("vaultkeep config list".to_string()),
            _ => None,
        }
    }

    /// Whether this error is a deliberate denial rather than a failure
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            Self::PolicyViolation(_)
                | Self::InsufficientPrivilege(_)
                | Self::InviteInvalid
                | Self::InviteExpired
                | Self::InviteAlreadyRedeemed
                | Self::InvariantViolation(_)
        )
    }

    pub(crate) fn invalid_state(
        entity: &'static str,
        current: impl std::fmt::Display,
        operation: &'static str,
    ) -> Self {
        Self::InvalidState {
            entity,
            current: current.to_string(),
            operation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(Error::VaultNotFound(Uuid::nil()).code(), "E001");
        assert_eq!(Error::PolicyViolation("x".into()).code(), "E100");
        assert_eq!(Error::InviteAlreadyRedeemed.code(), "E202");
        assert_eq!(Error::EncryptionFailure("x".into()).code(), "E300");
    }

    #[test]
    fn test_denials_are_classified() {
        assert!(Error::InviteExpired.is_denial());
        assert!(Error::InsufficientPrivilege("edit".into()).is_denial());
        assert!(!Error::Parse("bad".into()).is_denial());
        assert!(!Error::EncryptionFailure("tag".into()).is_denial());
    }

    #[test]
    fn test_suggestion() {
        assert!(Error::InvalidSigningKey("short".into()).suggestion().is_some());
        assert_eq!(Error::InviteInvalid.suggestion(), None);
    }

    #[test]
    fn test_invalid_state_message() {
        let err = Error::invalid_state("policy", "revoked", "release");
        assert_eq!(err.to_string(), "Cannot release policy in 'revoked' state");
    }
}
