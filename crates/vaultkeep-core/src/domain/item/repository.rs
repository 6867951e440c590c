//! Item persistence: metadata, typed payload tables and visibility grants

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use uuid::Uuid;

use super::entity::{ItemGrant, ItemStatus, ItemType, ItemVisibility, StoredPayload, VaultItem};
use crate::domain::{parse_optional_uuid, parse_uuid};
use crate::error::{Error, Result};

const ITEM_COLUMNS: &str = "id, vault_id, created_by_user_id, item_type, title, description, status, created_at, updated_at, deleted_at, deleted_by";

// ========== Items ==========

pub(crate) async fn insert_item(
    conn: &mut SqliteConnection,
    item: &VaultItem,
    payload: &StoredPayload,
) -> Result<()> {
    if payload.item_type() != item.item_type {
        return Err(Error::InvalidInput(format!(
            "payload of type {} does not match item type {}",
            payload.item_type(),
            item.item_type
        )));
    }

    sqlx::query(&format!(
        "INSERT INTO vault_items ({ITEM_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(item.id.to_string())
    .bind(item.vault_id.to_string())
    .bind(item.created_by_user_id.to_string())
    .bind(item.item_type.as_str())
    .bind(&item.title)
    .bind(&item.description)
    .bind(item.status.as_str())
    .bind(item.created_at)
    .bind(item.updated_at)
    .bind(item.deleted_at)
    .bind(item.deleted_by.map(|id| id.to_string()))
    .execute(&mut *conn)
    .await?;

    insert_payload(conn, item.id, payload).await
}

async fn insert_payload(conn: &mut SqliteConnection, item_id: Uuid, payload: &StoredPayload) -> Result<()> {
    let id = item_id.to_string();
    match payload {
        StoredPayload::Password {
            username,
            website_url,
            password_enc,
            notes_enc,
        } => {
            sqlx::query(
                "INSERT INTO item_passwords (item_id, username, website_url, password_enc, notes_enc) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(username)
            .bind(website_url)
            .bind(password_enc)
            .bind(notes_enc)
            .execute(&mut *conn)
            .await?;
        }
        StoredPayload::Note { content_enc } => {
            sqlx::query("INSERT INTO item_notes (item_id, content_enc) VALUES (?, ?)")
                .bind(&id)
                .bind(content_enc)
                .execute(&mut *conn)
                .await?;
        }
        StoredPayload::Link { url, notes_enc } => {
            sqlx::query("INSERT INTO item_links (item_id, url, notes_enc) VALUES (?, ?, ?)")
                .bind(&id)
                .bind(url)
                .bind(notes_enc)
                .execute(&mut *conn)
                .await?;
        }
        StoredPayload::CryptoWallet {
            wallet_type,
            public_address,
            secret_enc,
            notes_enc,
        } => {
            sqlx::query(
                "INSERT INTO item_crypto_wallets (item_id, wallet_type, public_address, secret_enc, notes_enc) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(wallet_type)
            .bind(public_address)
            .bind(secret_enc)
            .bind(notes_enc)
            .execute(&mut *conn)
            .await?;
        }
        StoredPayload::Document {
            file_name,
            content_type,
            size_bytes,
            storage_key,
        } => {
            sqlx::query(
                "INSERT INTO item_documents (item_id, file_name, content_type, size_bytes, storage_key) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(file_name)
            .bind(content_type)
            .bind(size_bytes)
            .bind(storage_key)
            .execute(&mut *conn)
            .await?;
        }
    }
    Ok(())
}

fn payload_table(item_type: ItemType) -> &'static str {
    match item_type {
        ItemType::Password => "item_passwords",
        ItemType::Note => "item_notes",
        ItemType::Link => "item_links",
        ItemType::CryptoWallet => "item_crypto_wallets",
        ItemType::Document => "item_documents",
    }
}

/// Replace the payload row of an item with a new one of the same type
pub(crate) async fn replace_payload(
    conn: &mut SqliteConnection,
    item: &VaultItem,
    payload: &StoredPayload,
) -> Result<()> {
    if payload.item_type() != item.item_type {
        return Err(Error::InvalidInput(format!(
            "cannot change a {} item into a {}",
            item.item_type,
            payload.item_type()
        )));
    }

    sqlx::query(&format!(
        "DELETE FROM {} WHERE item_id = ?",
        payload_table(item.item_type)
    ))
    .bind(item.id.to_string())
    .execute(&mut *conn)
    .await?;

    insert_payload(conn, item.id, payload).await
}

pub(crate) async fn find_item(conn: &mut SqliteConnection, item_id: Uuid) -> Result<Option<VaultItem>> {
    let row: Option<ItemRow> = sqlx::query_as(&format!(
        "SELECT {ITEM_COLUMNS} FROM vault_items WHERE id = ?"
    ))
    .bind(item_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(ItemRow::into_item).transpose()
}

/// Active item that belongs to `vault_id`
pub(crate) async fn require_active_item(
    conn: &mut SqliteConnection,
    vault_id: Uuid,
    item_id: Uuid,
) -> Result<VaultItem> {
    match find_item(conn, item_id).await? {
        Some(item) if item.vault_id == vault_id && item.is_active() => Ok(item),
        _ => Err(Error::ItemNotFound(item_id)),
    }
}

pub(crate) async fn load_payload(conn: &mut SqliteConnection, item: &VaultItem) -> Result<StoredPayload> {
    let id = item.id.to_string();
    let missing = || Error::InvariantViolation(format!("item {} has no {} payload", item.id, item.item_type));

    let payload = match item.item_type {
        ItemType::Password => {
            let row: Option<(Option<String>, Option<String>, String, Option<String>)> = sqlx::query_as(
                "SELECT username, website_url, password_enc, notes_enc FROM item_passwords WHERE item_id = ?",
            )
            .bind(&id)
            .fetch_optional(&mut *conn)
            .await?;
            let (username, website_url, password_enc, notes_enc) = row.ok_or_else(missing)?;
            StoredPayload::Password {
                username,
                website_url,
                password_enc,
                notes_enc,
            }
        }
        ItemType::Note => {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT content_enc FROM item_notes WHERE item_id = ?")
                    .bind(&id)
                    .fetch_optional(&mut *conn)
                    .await?;
            let (content_enc,) = row.ok_or_else(missing)?;
            StoredPayload::Note { content_enc }
        }
        ItemType::Link => {
            let row: Option<(String, Option<String>)> =
                sqlx::query_as("SELECT url, notes_enc FROM item_links WHERE item_id = ?")
                    .bind(&id)
                    .fetch_optional(&mut *conn)
                    .await?;
            let (url, notes_enc) = row.ok_or_else(missing)?;
            StoredPayload::Link { url, notes_enc }
        }
        ItemType::CryptoWallet => {
            let row: Option<(String, Option<String>, String, Option<String>)> = sqlx::query_as(
                "SELECT wallet_type, public_address, secret_enc, notes_enc FROM item_crypto_wallets WHERE item_id = ?",
            )
            .bind(&id)
            .fetch_optional(&mut *conn)
            .await?;
            let (wallet_type, public_address, secret_enc, notes_enc) = row.ok_or_else(missing)?;
            StoredPayload::CryptoWallet {
                wallet_type,
                public_address,
                secret_enc,
                notes_enc,
            }
        }
        ItemType::Document => {
            let row: Option<(String, String, i64, String)> = sqlx::query_as(
                "SELECT file_name, content_type, size_bytes, storage_key FROM item_documents WHERE item_id = ?",
            )
            .bind(&id)
            .fetch_optional(&mut *conn)
            .await?;
            let (file_name, content_type, size_bytes, storage_key) = row.ok_or_else(missing)?;
            StoredPayload::Document {
                file_name,
                content_type,
                size_bytes,
                storage_key,
            }
        }
    };

    Ok(payload)
}

pub(crate) async fn update_metadata(conn: &mut SqliteConnection, item: &VaultItem) -> Result<()> {
    sqlx::query("UPDATE vault_items SET title = ?, description = ?, updated_at = ? WHERE id = ? AND status = 'active'")
        .bind(&item.title)
        .bind(&item.description)
        .bind(item.updated_at)
        .bind(item.id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Soft delete; false if the item was already deleted
pub(crate) async fn soft_delete_item(
    conn: &mut SqliteConnection,
    item_id: Uuid,
    deleted_by: Uuid,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE vault_items SET status = 'deleted', deleted_at = ?, deleted_by = ?, updated_at = ?
        WHERE id = ? AND status = 'active'
        "#,
    )
    .bind(now)
    .bind(deleted_by.to_string())
    .bind(now)
    .bind(item_id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Active items of a vault, oldest first
pub(crate) async fn list_active_items(conn: &mut SqliteConnection, vault_id: Uuid) -> Result<Vec<VaultItem>> {
    let rows: Vec<ItemRow> = sqlx::query_as(&format!(
        "SELECT {ITEM_COLUMNS} FROM vault_items WHERE vault_id = ? AND status = 'active' ORDER BY created_at ASC, rowid ASC"
    ))
    .bind(vault_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(ItemRow::into_item).collect()
}

/// Move authorship of a user's items in one vault to someone else
pub(crate) async fn reattribute_items(
    conn: &mut SqliteConnection,
    vault_id: Uuid,
    from_user_id: Uuid,
    to_user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE vault_items SET created_by_user_id = ?, updated_at = ? WHERE vault_id = ? AND created_by_user_id = ?",
    )
    .bind(to_user_id.to_string())
    .bind(now)
    .bind(vault_id.to_string())
    .bind(from_user_id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

// ========== Visibility ==========

pub(crate) async fn find_grant(
    conn: &mut SqliteConnection,
    item_id: Uuid,
    member_id: Uuid,
) -> Result<Option<ItemGrant>> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT permission FROM vault_item_visibility WHERE vault_item_id = ? AND vault_member_id = ?",
    )
    .bind(item_id.to_string())
    .bind(member_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|(p,)| ItemGrant::from_str(&p).ok_or_else(|| Error::Parse(format!("Invalid permission: {}", p))))
        .transpose()
}

/// Grants of one member on every item of a vault, keyed by item id
pub(crate) async fn grants_for_member(
    conn: &mut SqliteConnection,
    vault_id: Uuid,
    member_id: Uuid,
) -> Result<HashMap<Uuid, ItemGrant>> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT v.vault_item_id, v.permission
        FROM vault_item_visibility v
        JOIN vault_items i ON i.id = v.vault_item_id
        WHERE i.vault_id = ? AND v.vault_member_id = ?
        "#,
    )
    .bind(vault_id.to_string())
    .bind(member_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|(item_id, permission)| {
            let grant = ItemGrant::from_str(&permission)
                .ok_or_else(|| Error::Parse(format!("Invalid permission: {}", permission)))?;
            Ok((parse_uuid(&item_id, "item ID")?, grant))
        })
        .collect()
}

/// Insert or overwrite the single grant row of (item, member)
pub(crate) async fn upsert_grant(
    conn: &mut SqliteConnection,
    item_id: Uuid,
    member_id: Uuid,
    grant: ItemGrant,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO vault_item_visibility (id, vault_item_id, vault_member_id, permission, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (vault_item_id, vault_member_id) DO UPDATE SET permission = excluded.permission
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(item_id.to_string())
    .bind(member_id.to_string())
    .bind(grant.as_str())
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn delete_grant(conn: &mut SqliteConnection, item_id: Uuid, member_id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM vault_item_visibility WHERE vault_item_id = ? AND vault_member_id = ?")
        .bind(item_id.to_string())
        .bind(member_id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

pub(crate) async fn list_grants(conn: &mut SqliteConnection, item_id: Uuid) -> Result<Vec<ItemVisibility>> {
    let rows: Vec<(String, String, String, String, DateTime<Utc>)> = sqlx::query_as(
        r#"
        SELECT id, vault_item_id, vault_member_id, permission, created_at
        FROM vault_item_visibility WHERE vault_item_id = ?
        ORDER BY created_at ASC
        "#,
    )
    .bind(item_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|(id, item, member, permission, created_at)| {
            Ok(ItemVisibility {
                id: parse_uuid(&id, "visibility ID")?,
                vault_item_id: parse_uuid(&item, "item ID")?,
                vault_member_id: parse_uuid(&member, "member ID")?,
                permission: ItemGrant::from_str(&permission)
                    .ok_or_else(|| Error::Parse(format!("Invalid permission: {}", permission)))?,
                created_at,
            })
        })
        .collect()
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: String,
    vault_id: String,
    created_by_user_id: String,
    item_type: String,
    title: String,
    description: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
    deleted_by: Option<String>,
}

impl ItemRow {
    fn into_item(self) -> Result<VaultItem> {
        let item_type = ItemType::from_str(&self.item_type)
            .ok_or_else(|| Error::Parse(format!("Invalid item type: {}", self.item_type)))?;
        let status = ItemStatus::from_str(&self.status)
            .ok_or_else(|| Error::Parse(format!("Invalid item status: {}", self.status)))?;

        Ok(VaultItem {
            id: parse_uuid(&self.id, "item ID")?,
            vault_id: parse_uuid(&self.vault_id, "vault ID")?,
            created_by_user_id: parse_uuid(&self.created_by_user_id, "creator ID")?,
            item_type,
            title: self.title,
            description: self.description,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
            deleted_by: parse_optional_uuid(self.deleted_by, "deleted-by ID")?,
        })
    }
}
