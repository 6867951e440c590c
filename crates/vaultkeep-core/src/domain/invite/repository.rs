//! Invite persistence
//!
//! Status changes are conditional writes on the open states. The claim
//! update in particular is what makes a token single-use.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use uuid::Uuid;

use super::entity::{InviteStatus, VaultInvite};
use crate::domain::vault::Privilege;
use crate::domain::{parse_optional_uuid, parse_uuid};
use crate::error::{Error, Result};

const INVITE_COLUMNS: &str = "id, vault_id, inviter_id, invitee_email, invitee_id, privilege, status, expires_at, created_at, accepted_at, note";

pub(crate) async fn insert_invite(
    conn: &mut SqliteConnection,
    invite: &VaultInvite,
    token_hash: &str,
) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO vault_invites ({INVITE_COLUMNS}, token_hash) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(invite.id.to_string())
    .bind(invite.vault_id.to_string())
    .bind(invite.inviter_id.to_string())
    .bind(&invite.invitee_email)
    .bind(invite.invitee_id.map(|id| id.to_string()))
    .bind(invite.privilege.as_str())
    .bind(invite.status.as_str())
    .bind(invite.expires_at)
    .bind(invite.created_at)
    .bind(invite.accepted_at)
    .bind(&invite.note)
    .bind(token_hash)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn find_by_id(conn: &mut SqliteConnection, invite_id: Uuid) -> Result<Option<VaultInvite>> {
    let row: Option<InviteRow> = sqlx::query_as(&format!(
        "SELECT {INVITE_COLUMNS} FROM vault_invites WHERE id = ?"
    ))
    .bind(invite_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(InviteRow::into_invite).transpose()
}

pub(crate) async fn find_by_token_hash(conn: &mut SqliteConnection, token_hash: &str) -> Result<Option<VaultInvite>> {
    let row: Option<InviteRow> = sqlx::query_as(&format!(
        "SELECT {INVITE_COLUMNS} FROM vault_invites WHERE token_hash = ?"
    ))
    .bind(token_hash)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(InviteRow::into_invite).transpose()
}

pub(crate) async fn list_for_vault(conn: &mut SqliteConnection, vault_id: Uuid) -> Result<Vec<VaultInvite>> {
    let rows: Vec<InviteRow> = sqlx::query_as(&format!(
        "SELECT {INVITE_COLUMNS} FROM vault_invites WHERE vault_id = ? ORDER BY created_at DESC, rowid DESC"
    ))
    .bind(vault_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(InviteRow::into_invite).collect()
}

/// Pending and Sent invites across all vaults
pub(crate) async fn list_open(conn: &mut SqliteConnection) -> Result<Vec<VaultInvite>> {
    let rows: Vec<InviteRow> = sqlx::query_as(&format!(
        "SELECT {INVITE_COLUMNS} FROM vault_invites WHERE status IN ('pending', 'sent')"
    ))
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(InviteRow::into_invite).collect()
}

/// Open -> Accepted for the invite holding `token_hash`
///
/// Exactly one concurrent caller sees `true`.
pub(crate) async fn claim(
    conn: &mut SqliteConnection,
    token_hash: &str,
    invitee_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE vault_invites SET status = 'accepted', accepted_at = ?, invitee_id = ?
        WHERE token_hash = ? AND status IN ('pending', 'sent')
        "#,
    )
    .bind(now)
    .bind(invitee_id.to_string())
    .bind(token_hash)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Move an invite from one of the open states to `to`
pub(crate) async fn close(conn: &mut SqliteConnection, invite_id: Uuid, to: InviteStatus) -> Result<bool> {
    let from = match to {
        InviteStatus::Sent => "('pending')",
        InviteStatus::Cancelled | InviteStatus::Expired => "('pending', 'sent')",
        InviteStatus::Pending | InviteStatus::Accepted => {
            return Err(Error::InvalidInput(format!("cannot move an invite to {}", to)));
        }
    };

    let result = sqlx::query(&format!(
        "UPDATE vault_invites SET status = ? WHERE id = ? AND status IN {from}"
    ))
    .bind(to.as_str())
    .bind(invite_id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Cancel every open invite of a vault
pub(crate) async fn cancel_open_for_vault(conn: &mut SqliteConnection, vault_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE vault_invites SET status = 'cancelled' WHERE vault_id = ? AND status IN ('pending', 'sent')",
    )
    .bind(vault_id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

#[derive(sqlx::FromRow)]
struct InviteRow {
    id: String,
    vault_id: String,
    inviter_id: String,
    invitee_email: String,
    invitee_id: Option<String>,
    privilege: String,
    status: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    accepted_at: Option<DateTime<Utc>>,
    note: Option<String>,
}

impl InviteRow {
    fn into_invite(self) -> Result<VaultInvite> {
        let privilege = Privilege::from_str(&self.privilege)
            .ok_or_else(|| Error::Parse(format!("Invalid privilege: {}", self.privilege)))?;
        let status = InviteStatus::from_str(&self.status)
            .ok_or_else(|| Error::Parse(format!("Invalid invite status: {}", self.status)))?;

        Ok(VaultInvite {
            id: parse_uuid(&self.id, "invite ID")?,
            vault_id: parse_uuid(&self.vault_id, "vault ID")?,
            inviter_id: parse_uuid(&self.inviter_id, "inviter ID")?,
            invitee_email: self.invitee_email,
            invitee_id: parse_optional_uuid(self.invitee_id, "invitee ID")?,
            privilege,
            status,
            expires_at: self.expires_at,
            created_at: self.created_at,
            accepted_at: self.accepted_at,
            note: self.note,
        })
    }
}
