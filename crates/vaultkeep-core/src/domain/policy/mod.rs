//! Release policies
//!
//! Each vault carries exactly one policy deciding when non-owner members may
//! see its contents:
//!
//! ```text
//! Pending ──(time reached | owner release)──> Released ──(expiry passed)──> Expired
//!    │                                           │                          │
//!    └───────────────────(admin action)──────────┴───────────> Revoked <────┘
//! ```
//!
//! Time-driven transitions are observed lazily on read and then persisted; there
//! is no background timer.

pub mod engine;
pub mod entity;
pub(crate) mod repository;
pub mod service;

pub use engine::{DenyReason, PolicyDecision, PolicyEngine};
pub use entity::{PolicyKind, ReleaseStatus, VaultPolicy};
pub use service::PolicyService;
