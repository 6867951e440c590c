//! Domain layer
//!
//! Contains the core business logic and domain models.

pub mod access;
pub mod events;
pub mod invite;
pub mod item;
pub mod policy;
pub mod security;
pub mod vault;

use uuid::Uuid;

use crate::error::{Error, Result};

/// Parse a UUID column, naming the field in the error
pub(crate) fn parse_uuid(value: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Parse(format!("Invalid {}: {}", what, e)))
}

/// Parse a nullable UUID column
pub(crate) fn parse_optional_uuid(value: Option<String>, what: &str) -> Result<Option<Uuid>> {
    value.map(|v| parse_uuid(&v, what)).transpose()
}
