//! Vaults and membership
//!
//! A vault has exactly one active Owner member whose user id equals the
//! vault's `owner_id`. The creator is remembered in `original_owner_id`
//! forever; key derivation depends on it.

pub mod entity;
pub(crate) mod repository;
pub mod service;

pub use entity::{MemberStatus, Privilege, Vault, VaultMember, VaultStatus};
pub use repository::VaultRepository;
pub use service::{AccountDeletion, VaultService};
