//! Vault items
//!
//! Metadata stays plaintext for listing; each item kind has its own payload
//! table whose sensitive columns hold ciphertext only.

pub mod entity;
pub(crate) mod repository;
pub mod service;

pub use entity::{
    ItemDetails, ItemGrant, ItemPayload, ItemStatus, ItemType, ItemUpdate, ItemVisibility, NewItem, VaultItem,
};
pub use service::ItemService;
