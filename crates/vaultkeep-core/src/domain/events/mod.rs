//! Domain event infrastructure
//!
//! Security-relevant transitions are recorded as immutable events in the
//! same transaction that performs them, giving every vault an audit trail.
//! Event data never contains secrets: no tokens, ciphertext or key material.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteExecutor, SqlitePool};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Base trait for all domain events
pub trait DomainEvent: Send + Sync {
    /// Get the event type as a string
    fn event_type(&self) -> &str;

    /// Get the aggregate ID this event belongs to
    fn aggregate_id(&self) -> Uuid;

    /// Get the timestamp when this event occurred
    fn timestamp(&self) -> DateTime<Utc>;

    /// Get optional event data as JSON
    fn data(&self) -> Option<&serde_json::Value>;
}

/// Type of vault event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultEventType {
    VaultCreated,
    VaultDeleted,
    OwnershipTransferred,
    MemberRemoved,
    MemberLeft,
    PrivilegeChanged,
    PolicyChanged,
    PolicyReleased,
    PolicyExpired,
    PolicyRevoked,
    InviteCreated,
    InviteSent,
    InviteAccepted,
    InviteCancelled,
    ItemCreated,
    ItemUpdated,
    ItemDeleted,
    VisibilityChanged,
    AuthorshipTransferred,
}

impl VaultEventType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VaultCreated => "vault_created",
            Self::VaultDeleted => "vault_deleted",
            Self::OwnershipTransferred => "ownership_transferred",
            Self::MemberRemoved => "member_removed",
            Self::MemberLeft => "member_left",
            Self::PrivilegeChanged => "privilege_changed",
            Self::PolicyChanged => "policy_changed",
            Self::PolicyReleased => "policy_released",
            Self::PolicyExpired => "policy_expired",
            Self::PolicyRevoked => "policy_revoked",
            Self::InviteCreated => "invite_created",
            Self::InviteSent => "invite_sent",
            Self::InviteAccepted => "invite_accepted",
            Self::InviteCancelled => "invite_cancelled",
            Self::ItemCreated => "item_created",
            Self::ItemUpdated => "item_updated",
            Self::ItemDeleted => "item_deleted",
            Self::VisibilityChanged => "visibility_changed",
            Self::AuthorshipTransferred => "authorship_transferred",
        }
    }
}

impl std::fmt::Display for VaultEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A recorded vault event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultEvent {
    /// Unique event identifier
    pub id: Uuid,
    /// The vault this event relates to
    pub vault_id: Uuid,
    /// Who caused it, if anyone (lazy transitions have no actor)
    pub actor_id: Option<Uuid>,
    /// Stored event type
    pub event_type: String,
    /// Event data (no sensitive data!)
    pub data: Option<serde_json::Value>,
    /// When the event occurred
    pub created_at: DateTime<Utc>,
}

impl VaultEvent {
    /// Create a new vault event
    pub fn new(
        vault_id: Uuid,
        actor_id: Option<Uuid>,
        event_type: VaultEventType,
        data: Option<serde_json::Value>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            vault_id,
            actor_id,
            event_type: event_type.as_str().to_string(),
            data,
            created_at: at,
        }
    }

    /// Shorthand for an event with only an actor
    pub fn by(
        vault_id: Uuid,
        actor_id: Uuid,
        event_type: VaultEventType,
        at: DateTime<Utc>,
    ) -> Self {
        Self::new(vault_id, Some(actor_id), event_type, None, at)
    }

    /// Attach JSON data
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl DomainEvent for VaultEvent {
    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn aggregate_id(&self) -> Uuid {
        self.vault_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn data(&self) -> Option<&serde_json::Value> {
        self.data.as_ref()
    }
}

/// Write an event using any executor, typically the transaction it describes
pub async fn record_event<'e, E>(executor: E, event: &VaultEvent) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    let data = event.data.as_ref().map(|d| d.to_string());

    sqlx::query(
        r#"
        INSERT INTO vault_events (id, vault_id, actor_id, event_type, data, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(event.id.to_string())
    .bind(event.vault_id.to_string())
    .bind(event.actor_id.map(|a| a.to_string()))
    .bind(&event.event_type)
    .bind(data)
    .bind(event.created_at)
    .execute(executor)
    .await?;

    Ok(())
}

/// Read side of the audit trail
#[derive(Debug, Clone)]
pub struct EventRepository {
    pool: SqlitePool,
}

impl EventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Events for one vault, oldest first
    pub async fn list_for_vault(&self, vault_id: Uuid) -> Result<Vec<VaultEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT id, vault_id, actor_id, event_type, data, created_at
            FROM vault_events
            WHERE vault_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(vault_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(EventRow::into_event).collect()
    }

    /// Count events of one type for a vault
    pub async fn count_of_type(&self, vault_id: Uuid, event_type: VaultEventType) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM vault_events WHERE vault_id = ? AND event_type = ?",
        )
        .bind(vault_id.to_string())
        .bind(event_type.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    vault_id: String,
    actor_id: Option<String>,
    event_type: String,
    data: Option<String>,
    created_at: DateTime<Utc>,
}

impl EventRow {
    fn into_event(self) -> Result<VaultEvent> {
        let data = self
            .data
            .map(|d| serde_json::from_str(&d))
            .transpose()
            .map_err(|e| Error::Parse(format!("Invalid event data: {}", e)))?;

        Ok(VaultEvent {
            id: crate::domain::parse_uuid(&self.id, "event ID")?,
            vault_id: crate::domain::parse_uuid(&self.vault_id, "vault ID")?,
            actor_id: crate::domain::parse_optional_uuid(self.actor_id, "actor ID")?,
            event_type: self.event_type,
            data,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    #[test]
    fn test_event_type_strings() {
        assert_eq!(VaultEventType::InviteAccepted.as_str(), "invite_accepted");
        assert_eq!(VaultEventType::PolicyRevoked.to_string(), "policy_revoked");
    }

    #[test]
    fn test_domain_event_impl() {
        let vault = Uuid::new_v4();
        let event = VaultEvent::by(vault, Uuid::new_v4(), VaultEventType::VaultCreated, Utc::now())
            .with_data(serde_json::json!({ "name": "Family" }));

        assert_eq!(DomainEvent::event_type(&event), "vault_created");
        assert_eq!(event.aggregate_id(), vault);
        assert_eq!(event.data().unwrap()["name"], "Family");
    }

    #[tokio::test]
    async fn test_record_and_list_events() {
        let db = Database::in_memory().await.unwrap();
        let repo = EventRepository::new(db.pool().clone());
        let vault = Uuid::new_v4();

        let first = VaultEvent::new(vault, None, VaultEventType::PolicyReleased, None, Utc::now());
        let second = VaultEvent::by(vault, Uuid::new_v4(), VaultEventType::PolicyRevoked, Utc::now())
            .with_data(serde_json::json!({ "from": "released" }));
        record_event(db.pool(), &first).await.unwrap();
        record_event(db.pool(), &second).await.unwrap();
        record_event(
            db.pool(),
            &VaultEvent::new(Uuid::new_v4(), None, VaultEventType::PolicyReleased, None, Utc::now()),
        )
        .await
        .unwrap();

        let events = repo.list_for_vault(vault).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "policy_released");
        assert!(events[0].actor_id.is_none());
        assert_eq!(events[1].data.as_ref().unwrap()["from"], "released");

        let revoked = repo
            .count_of_type(vault, VaultEventType::PolicyRevoked)
            .await
            .unwrap();
        assert_eq!(revoked, 1);
    }
}
