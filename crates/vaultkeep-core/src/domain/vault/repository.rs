//! Vault repository for database operations
//!
//! Free functions take a `&mut SqliteConnection` so services can compose them
//! inside a single transaction. [`VaultRepository`] wraps the pool for plain
//! reads.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::entity::{MemberStatus, Privilege, Vault, VaultMember, VaultStatus};
use crate::domain::{parse_optional_uuid, parse_uuid};
use crate::error::{Error, Result};

const VAULT_COLUMNS: &str = "id, owner_id, original_owner_id, name, description, status, created_at, updated_at, deleted_at";

const MEMBER_COLUMNS: &str = "id, vault_id, user_id, privilege, status, added_by_id, removed_by_id, joined_at, left_at, removed_at";

/// Repository for vault reads outside a transaction
#[derive(Debug, Clone)]
pub struct VaultRepository {
    pool: SqlitePool,
}

impl VaultRepository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a vault by ID, whatever its status
    pub async fn get(&self, vault_id: Uuid) -> Result<Option<Vault>> {
        let mut conn = self.pool.acquire().await?;
        find_vault(&mut conn, vault_id).await
    }

    /// Active membership of a user in a vault
    pub async fn get_active_member(&self, vault_id: Uuid, user_id: Uuid) -> Result<Option<VaultMember>> {
        let mut conn = self.pool.acquire().await?;
        find_active_member(&mut conn, vault_id, user_id).await
    }

    /// Active vaults in which the user holds an active membership
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Vault>> {
        let rows: Vec<VaultRow> = sqlx::query_as(&format!(
            r#"
            SELECT {cols} FROM vaults v
            WHERE v.status = 'active'
              AND EXISTS (
                SELECT 1 FROM vault_members m
                WHERE m.vault_id = v.id AND m.user_id = ? AND m.status = 'active'
              )
            ORDER BY v.created_at ASC
            "#,
            cols = prefixed(VAULT_COLUMNS, "v")
        ))
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(VaultRow::into_vault).collect()
    }

    /// Members of a vault, active ones only unless `include_inactive`
    pub async fn list_members(&self, vault_id: Uuid, include_inactive: bool) -> Result<Vec<VaultMember>> {
        let filter = if include_inactive {
            ""
        } else {
            "AND status = 'active'"
        };
        let rows: Vec<MemberRow> = sqlx::query_as(&format!(
            "SELECT {MEMBER_COLUMNS} FROM vault_members WHERE vault_id = ? {filter} ORDER BY joined_at ASC, rowid ASC"
        ))
        .bind(vault_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MemberRow::into_member).collect()
    }
}

fn prefixed(columns: &str, alias: &str) -> String {
    columns
        .split(", ")
        .map(|c| format!("{}.{}", alias, c))
        .collect::<Vec<_>>()
        .join(", ")
}

// ========== Vaults ==========

pub(crate) async fn insert_vault(conn: &mut SqliteConnection, vault: &Vault) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO vaults (
            id, owner_id, original_owner_id, name, description,
            status, created_at, updated_at, deleted_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(vault.id.to_string())
    .bind(vault.owner_id.to_string())
    .bind(vault.original_owner_id.to_string())
    .bind(&vault.name)
    .bind(&vault.description)
    .bind(vault.status.as_str())
    .bind(vault.created_at)
    .bind(vault.updated_at)
    .bind(vault.deleted_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn find_vault(conn: &mut SqliteConnection, vault_id: Uuid) -> Result<Option<Vault>> {
    let row: Option<VaultRow> =
        sqlx::query_as(&format!("SELECT {VAULT_COLUMNS} FROM vaults WHERE id = ?"))
            .bind(vault_id.to_string())
            .fetch_optional(&mut *conn)
            .await?;

    row.map(VaultRow::into_vault).transpose()
}

/// Load a vault that must exist and be active
pub(crate) async fn require_active_vault(conn: &mut SqliteConnection, vault_id: Uuid) -> Result<Vault> {
    match find_vault(conn, vault_id).await? {
        Some(vault) if vault.is_active() => Ok(vault),
        _ => Err(Error::VaultNotFound(vault_id)),
    }
}

/// Active vaults currently owned by a user
pub(crate) async fn owned_active_vaults(conn: &mut SqliteConnection, user_id: Uuid) -> Result<Vec<Vault>> {
    let rows: Vec<VaultRow> = sqlx::query_as(&format!(
        "SELECT {VAULT_COLUMNS} FROM vaults WHERE owner_id = ? AND status = 'active' ORDER BY created_at ASC"
    ))
    .bind(user_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(VaultRow::into_vault).collect()
}

pub(crate) async fn set_owner(
    conn: &mut SqliteConnection,
    vault_id: Uuid,
    new_owner_id: Uuid,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE vaults SET owner_id = ?, updated_at = ? WHERE id = ?")
        .bind(new_owner_id.to_string())
        .bind(now)
        .bind(vault_id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Soft delete; returns false if the vault was not active
pub(crate) async fn soft_delete_vault(
    conn: &mut SqliteConnection,
    vault_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE vaults SET status = 'deleted', deleted_at = ?, updated_at = ? WHERE id = ? AND status = 'active'",
    )
    .bind(now)
    .bind(now)
    .bind(vault_id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

// ========== Members ==========

pub(crate) async fn insert_member(conn: &mut SqliteConnection, member: &VaultMember) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO vault_members ({MEMBER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(member.id.to_string())
    .bind(member.vault_id.to_string())
    .bind(member.user_id.to_string())
    .bind(member.privilege.as_str())
    .bind(member.status.as_str())
    .bind(member.added_by_id.map(|id| id.to_string()))
    .bind(member.removed_by_id.map(|id| id.to_string()))
    .bind(member.joined_at)
    .bind(member.left_at)
    .bind(member.removed_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn find_active_member(
    conn: &mut SqliteConnection,
    vault_id: Uuid,
    user_id: Uuid,
) -> Result<Option<VaultMember>> {
    let row: Option<MemberRow> = sqlx::query_as(&format!(
        "SELECT {MEMBER_COLUMNS} FROM vault_members WHERE vault_id = ? AND user_id = ? AND status = 'active'"
    ))
    .bind(vault_id.to_string())
    .bind(user_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(MemberRow::into_member).transpose()
}

/// Active membership that must exist
pub(crate) async fn require_active_member(
    conn: &mut SqliteConnection,
    vault_id: Uuid,
    user_id: Uuid,
) -> Result<VaultMember> {
    find_active_member(conn, vault_id, user_id)
        .await?
        .ok_or(Error::MemberNotFound { vault_id, user_id })
}

/// Most recent Left/Removed row for a user, used when they rejoin
pub(crate) async fn find_latest_inactive_member(
    conn: &mut SqliteConnection,
    vault_id: Uuid,
    user_id: Uuid,
) -> Result<Option<VaultMember>> {
    let row: Option<MemberRow> = sqlx::query_as(&format!(
        r#"
        SELECT {MEMBER_COLUMNS} FROM vault_members
        WHERE vault_id = ? AND user_id = ? AND status IN ('left', 'removed')
        ORDER BY COALESCE(removed_at, left_at) DESC, rowid DESC
        LIMIT 1
        "#
    ))
    .bind(vault_id.to_string())
    .bind(user_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(MemberRow::into_member).transpose()
}

/// All active memberships of a user across vaults
pub(crate) async fn active_memberships(conn: &mut SqliteConnection, user_id: Uuid) -> Result<Vec<VaultMember>> {
    let rows: Vec<MemberRow> = sqlx::query_as(&format!(
        "SELECT {MEMBER_COLUMNS} FROM vault_members WHERE user_id = ? AND status = 'active'"
    ))
    .bind(user_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(MemberRow::into_member).collect()
}

/// Successor for an owner leaving: earliest Admin, else earliest Member
pub(crate) async fn find_successor(
    conn: &mut SqliteConnection,
    vault_id: Uuid,
    departing_user_id: Uuid,
) -> Result<Option<VaultMember>> {
    let row: Option<MemberRow> = sqlx::query_as(&format!(
        r#"
        SELECT {MEMBER_COLUMNS} FROM vault_members
        WHERE vault_id = ? AND user_id <> ? AND status = 'active' AND privilege <> 'owner'
        ORDER BY CASE privilege WHEN 'admin' THEN 0 ELSE 1 END, joined_at ASC, rowid ASC
        LIMIT 1
        "#
    ))
    .bind(vault_id.to_string())
    .bind(departing_user_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(MemberRow::into_member).transpose()
}

/// Change privilege of an active member; false if the row is no longer active
pub(crate) async fn set_privilege(
    conn: &mut SqliteConnection,
    member_id: Uuid,
    privilege: Privilege,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE vault_members SET privilege = ? WHERE id = ? AND status = 'active'",
    )
    .bind(privilege.as_str())
    .bind(member_id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Move an active member to Left or Removed; false if it was not active
pub(crate) async fn deactivate_member(
    conn: &mut SqliteConnection,
    member_id: Uuid,
    status: MemberStatus,
    actor_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = match status {
        MemberStatus::Left => {
            sqlx::query(
                "UPDATE vault_members SET status = 'left', left_at = ? WHERE id = ? AND status = 'active'",
            )
            .bind(now)
            .bind(member_id.to_string())
            .execute(&mut *conn)
            .await?
        }
        MemberStatus::Removed => {
            sqlx::query(
                r#"
                UPDATE vault_members SET status = 'removed', removed_at = ?, removed_by_id = ?
                WHERE id = ? AND status = 'active'
                "#,
            )
            .bind(now)
            .bind(actor_id.map(|id| id.to_string()))
            .bind(member_id.to_string())
            .execute(&mut *conn)
            .await?
        }
        MemberStatus::Active => {
            return Err(Error::InvalidInput(
                "deactivation target must be left or removed".to_string(),
            ));
        }
    };

    Ok(result.rows_affected() == 1)
}

/// Bring back a Left/Removed row as an active membership
pub(crate) async fn reactivate_member(
    conn: &mut SqliteConnection,
    member_id: Uuid,
    privilege: Privilege,
    added_by_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE vault_members SET
            status = 'active', privilege = ?, added_by_id = ?, joined_at = ?,
            left_at = NULL, removed_at = NULL, removed_by_id = NULL
        WHERE id = ? AND status IN ('left', 'removed')
        "#,
    )
    .bind(privilege.as_str())
    .bind(added_by_id.map(|id| id.to_string()))
    .bind(now)
    .bind(member_id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Drop every item visibility row of a membership
pub(crate) async fn delete_member_visibility(conn: &mut SqliteConnection, member_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM vault_item_visibility WHERE vault_member_id = ?")
        .bind(member_id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

// ========== Row types ==========

#[derive(sqlx::FromRow)]
struct VaultRow {
    id: String,
    owner_id: String,
    original_owner_id: String,
    name: String,
    description: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl VaultRow {
    fn into_vault(self) -> Result<Vault> {
        let status = VaultStatus::from_str(&self.status)
            .ok_or_else(|| Error::Parse(format!("Invalid vault status: {}", self.status)))?;

        Ok(Vault {
            id: parse_uuid(&self.id, "vault ID")?,
            owner_id: parse_uuid(&self.owner_id, "owner ID")?,
            original_owner_id: parse_uuid(&self.original_owner_id, "original owner ID")?,
            name: self.name,
            description: self.description,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MemberRow {
    id: String,
    vault_id: String,
    user_id: String,
    privilege: String,
    status: String,
    added_by_id: Option<String>,
    removed_by_id: Option<String>,
    joined_at: DateTime<Utc>,
    left_at: Option<DateTime<Utc>>,
    removed_at: Option<DateTime<Utc>>,
}

impl MemberRow {
    fn into_member(self) -> Result<VaultMember> {
        let privilege = Privilege::from_str(&self.privilege)
            .ok_or_else(|| Error::Parse(format!("Invalid privilege: {}", self.privilege)))?;
        let status = MemberStatus::from_str(&self.status)
            .ok_or_else(|| Error::Parse(format!("Invalid member status: {}", self.status)))?;

        Ok(VaultMember {
            id: parse_uuid(&self.id, "member ID")?,
            vault_id: parse_uuid(&self.vault_id, "vault ID")?,
            user_id: parse_uuid(&self.user_id, "user ID")?,
            privilege,
            status,
            added_by_id: parse_optional_uuid(self.added_by_id, "added-by ID")?,
            removed_by_id: parse_optional_uuid(self.removed_by_id, "removed-by ID")?,
            joined_at: self.joined_at,
            left_at: self.left_at,
            removed_at: self.removed_at,
        })
    }
}
