//! Policy persistence
//!
//! Every status change is a conditional write on the status it expects to
//! replace, so two racing transitions cannot both apply.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use uuid::Uuid;

use super::entity::{PolicyKind, ReleaseStatus, VaultPolicy};
use crate::domain::{parse_optional_uuid, parse_uuid};
use crate::error::{Error, Result};

const POLICY_COLUMNS: &str = "id, vault_id, policy_type, release_status, release_date, expires_at, released_at, released_by_id, note, created_at, updated_at";

pub(crate) async fn insert_policy(conn: &mut SqliteConnection, policy: &VaultPolicy) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO vault_policies ({POLICY_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(policy.id.to_string())
    .bind(policy.vault_id.to_string())
    .bind(policy.kind.type_str())
    .bind(policy.release_status.as_str())
    .bind(policy.kind.release_date())
    .bind(policy.kind.expires_at())
    .bind(policy.released_at)
    .bind(policy.released_by_id.map(|id| id.to_string()))
    .bind(&policy.note)
    .bind(policy.created_at)
    .bind(policy.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn find_for_vault(conn: &mut SqliteConnection, vault_id: Uuid) -> Result<Option<VaultPolicy>> {
    let row: Option<PolicyRow> = sqlx::query_as(&format!(
        "SELECT {POLICY_COLUMNS} FROM vault_policies WHERE vault_id = ?"
    ))
    .bind(vault_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(PolicyRow::into_policy).transpose()
}

/// Policy that every vault must have
pub(crate) async fn require_for_vault(conn: &mut SqliteConnection, vault_id: Uuid) -> Result<VaultPolicy> {
    find_for_vault(conn, vault_id).await?.ok_or_else(|| {
        Error::InvariantViolation(format!("vault {} has no release policy", vault_id))
    })
}

/// Move `from -> to`; false if the stored status was no longer `from`
pub(crate) async fn transition(
    conn: &mut SqliteConnection,
    policy_id: Uuid,
    from: ReleaseStatus,
    to: ReleaseStatus,
    released: Option<(DateTime<Utc>, Option<Uuid>)>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let (released_at, released_by_id) = match released {
        Some((at, by)) => (Some(at), by.map(|id| id.to_string())),
        None => (None, None),
    };

    let result = sqlx::query(
        r#"
        UPDATE vault_policies SET
            release_status = ?,
            released_at = COALESCE(?, released_at),
            released_by_id = COALESCE(?, released_by_id),
            updated_at = ?
        WHERE id = ? AND release_status = ?
        "#,
    )
    .bind(to.as_str())
    .bind(released_at)
    .bind(released_by_id)
    .bind(now)
    .bind(policy_id.to_string())
    .bind(from.as_str())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Revoke from any non-revoked status
pub(crate) async fn revoke(
    conn: &mut SqliteConnection,
    policy_id: Uuid,
    note: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE vault_policies SET
            release_status = 'revoked',
            note = COALESCE(?, note),
            updated_at = ?
        WHERE id = ? AND release_status <> 'revoked'
        "#,
    )
    .bind(note)
    .bind(now)
    .bind(policy_id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Swap the kind of a policy, guarded on the status it was read in
pub(crate) async fn replace_kind(
    conn: &mut SqliteConnection,
    replacement: &VaultPolicy,
    expected: ReleaseStatus,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE vault_policies SET
            policy_type = ?, release_status = ?, release_date = ?, expires_at = ?,
            released_at = ?, released_by_id = ?, note = ?, updated_at = ?
        WHERE id = ? AND release_status = ?
        "#,
    )
    .bind(replacement.kind.type_str())
    .bind(replacement.release_status.as_str())
    .bind(replacement.kind.release_date())
    .bind(replacement.kind.expires_at())
    .bind(replacement.released_at)
    .bind(replacement.released_by_id.map(|id| id.to_string()))
    .bind(&replacement.note)
    .bind(replacement.updated_at)
    .bind(replacement.id.to_string())
    .bind(expected.as_str())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

#[derive(sqlx::FromRow)]
struct PolicyRow {
    id: String,
    vault_id: String,
    policy_type: String,
    release_status: String,
    release_date: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    released_at: Option<DateTime<Utc>>,
    released_by_id: Option<String>,
    note: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PolicyRow {
    fn into_policy(self) -> Result<VaultPolicy> {
        let kind = PolicyKind::from_parts(&self.policy_type, self.release_date, self.expires_at)?;
        let release_status = ReleaseStatus::from_str(&self.release_status).ok_or_else(|| {
            Error::Parse(format!("Invalid release status: {}", self.release_status))
        })?;

        Ok(VaultPolicy {
            id: parse_uuid(&self.id, "policy ID")?,
            vault_id: parse_uuid(&self.vault_id, "vault ID")?,
            kind,
            release_status,
            released_at: self.released_at,
            released_by_id: parse_optional_uuid(self.released_by_id, "released-by ID")?,
            note: self.note,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
