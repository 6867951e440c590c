//! Vaultkeep Core Library
//!
//! This crate provides the core functionality for Vaultkeep, including:
//! - Vaults and membership (owner, admin, member)
//! - Release policies (immediate, time based, expiry based, manual)
//! - Permission resolution with per-item visibility grants
//! - Single-use invite tokens
//! - Per-vault key derivation and field encryption
//! - Storage (SQLite) and an audit trail of security transitions

pub mod app;
pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod identity;
pub mod storage;

pub use app::Vaultkeep;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::app::Vaultkeep;
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::Config;
    pub use crate::domain::access::{AccessControlGateway, AccessError, Accessibility, Permission};
    pub use crate::domain::invite::{CreatedInvite, InviteService, InviteStatus};
    pub use crate::domain::item::{ItemGrant, ItemPayload, ItemService, NewItem};
    pub use crate::domain::policy::{PolicyKind, ReleaseStatus};
    pub use crate::domain::security::{KeyDerivationService, SecureString, SigningKey};
    pub use crate::domain::vault::{Privilege, VaultService};
    pub use crate::error::{Error, Result};
    pub use crate::identity::{IdentityDirectory, SqliteIdentityDirectory};
    pub use crate::storage::Database;
}
