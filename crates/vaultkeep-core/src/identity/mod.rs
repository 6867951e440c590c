//! Identity directory
//!
//! Invite acceptance needs to know which user an email address belongs to.
//! Account registration and login live outside this crate; the engine only
//! consumes the [`IdentityDirectory`] lookup.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::parse_uuid;
use crate::error::{Error, Result};

/// Resolve an email address to a user id
#[async_trait]
pub trait IdentityDirectory: Send + Sync + std::fmt::Debug {
    /// Case-insensitive lookup; `None` if nobody holds this address
    async fn user_id_for_email(&self, email: &str) -> Result<Option<Uuid>>;
}

/// Trim and lowercase an email address, rejecting obvious garbage
pub fn normalize_email(raw: &str) -> Result<String> {
    let email = raw.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => Ok(email),
        _ => Err(Error::InvalidInput(format!("'{}' is not an email address", raw.trim()))),
    }
}

/// A registered account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Directory backed by the `accounts` table
#[derive(Debug, Clone)]
pub struct SqliteIdentityDirectory {
    pool: SqlitePool,
}

impl SqliteIdentityDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register an email address under a fresh user id
    pub async fn register(&self, email: &str) -> Result<Account> {
        let email = normalize_email(email)?;
        if self.user_id_for_email(&email).await?.is_some() {
            return Err(Error::InvalidInput(format!("'{}' is already registered", email)));
        }

        let account = Account {
            id: Uuid::new_v4(),
            email,
            created_at: Utc::now(),
        };

        sqlx::query("INSERT INTO accounts (id, email, created_at) VALUES (?, ?, ?)")
            .bind(account.id.to_string())
            .bind(&account.email)
            .bind(account.created_at)
            .execute(&self.pool)
            .await?;

        tracing::info!(user_id = %account.id, "Registered account");
        Ok(account)
    }

    /// Look up an account by id
    pub async fn get(&self, user_id: Uuid) -> Result<Option<Account>> {
        let row: Option<(String, String, DateTime<Utc>)> =
            sqlx::query_as("SELECT id, email, created_at FROM accounts WHERE id = ?")
                .bind(user_id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(id, email, created_at)| {
            Ok(Account {
                id: parse_uuid(&id, "account ID")?,
                email,
                created_at,
            })
        })
        .transpose()
    }

    /// Remove an account from the directory
    pub async fn remove(&self, user_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl IdentityDirectory for SqliteIdentityDirectory {
    async fn user_id_for_email(&self, email: &str) -> Result<Option<Uuid>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT id FROM accounts WHERE email = ?")
            .bind(email.trim())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(id,)| parse_uuid(&id, "account ID")).transpose()
    }
}

/// Fixed in-memory directory
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    entries: HashMap<String, Uuid>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry; the email is matched case-insensitively
    pub fn with(mut self, email: &str, user_id: Uuid) -> Self {
        self.entries.insert(email.trim().to_lowercase(), user_id);
        self
    }
}

#[async_trait]
impl IdentityDirectory for StaticDirectory {
    async fn user_id_for_email(&self, email: &str) -> Result<Option<Uuid>> {
        Ok(self.entries.get(&email.trim().to_lowercase()).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Alice@Example.COM ").unwrap(), "alice@example.com");
        assert!(normalize_email("no-at-sign").is_err());
        assert!(normalize_email("@example.com").is_err());
        assert!(normalize_email("a@b@c").is_err());
    }

    #[tokio::test]
    async fn test_sqlite_directory_is_case_insensitive() {
        let db = Database::in_memory().await.unwrap();
        let directory = SqliteIdentityDirectory::new(db.pool().clone());

        let account = directory.register("Bob@Example.com").await.unwrap();
        assert_eq!(account.email, "bob@example.com");

        assert_eq!(
            directory.user_id_for_email("BOB@example.COM").await.unwrap(),
            Some(account.id)
        );
        assert_eq!(directory.user_id_for_email("carol@example.com").await.unwrap(), None);
        assert!(directory.register("bob@EXAMPLE.com").await.is_err());

        assert_eq!(directory.get(account.id).await.unwrap(), Some(account.clone()));
        assert!(directory.remove(account.id).await.unwrap());
        assert_eq!(directory.get(account.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_static_directory() {
        let id = Uuid::new_v4();
        let directory = StaticDirectory::new().with("Dana@Example.com", id);
        assert_eq!(directory.user_id_for_email("dana@example.com").await.unwrap(), Some(id));
        assert_eq!(directory.user_id_for_email("eve@example.com").await.unwrap(), None);
    }
}
