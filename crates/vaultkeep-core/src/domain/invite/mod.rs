//! Invites
//!
//! Pending ─> Sent ─> Accepted, with Cancelled and Expired as the other
//! terminal states. Expiry is applied lazily when an invite is read.

pub mod entity;
pub(crate) mod repository;
pub mod service;

pub use entity::{CreatedInvite, InviteStatus, VaultInvite, generate_token, hash_token};
pub use service::{DEFAULT_INVITE_TTL_HOURS, InviteService};
