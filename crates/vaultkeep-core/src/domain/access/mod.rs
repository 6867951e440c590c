//! Access control
//!
//! [`AccessControlGateway`] is what the rest of the system calls. It asks the
//! policy engine whether a vault is open, resolves the caller's permission on
//! an item and performs field encryption with a derived vault key. Failures
//! leave it only as [`AccessError`].

pub mod error;
pub mod gateway;
pub mod permission;

pub use error::AccessError;
pub use gateway::{AccessContext, AccessControlGateway, Accessibility};
pub use permission::{Permission, can_manage_members, resolve};
