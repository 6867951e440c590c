//! Database migrations
//!
//! This module manages SQLite schema migrations for vaultkeep.
//! Migrations are versioned and applied automatically on database connection.
//!
//! Business tables deliberately carry no `ON DELETE CASCADE`: vaults, members
//! and items are soft-deleted and ownership/authorship is reassigned by
//! explicit transactions in the domain services.

use sqlx::SqlitePool;

/// Current schema version
pub const CURRENT_VERSION: i32 = 3;

/// SQL for creating the migrations tracking table
const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version INTEGER PRIMARY KEY NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Migration 1: Vaults, membership, release policies and invites
const MIGRATION_V1: &str = r#"
    CREATE TABLE IF NOT EXISTS vaults (
        id TEXT PRIMARY KEY NOT NULL,
        owner_id TEXT NOT NULL,
        original_owner_id TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT,
        status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'deleted')),
        created_at TIMESTAMP NOT NULL,
        updated_at TIMESTAMP NOT NULL,
        deleted_at TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_vaults_owner_id ON vaults(owner_id);
    CREATE INDEX IF NOT EXISTS idx_vaults_status ON vaults(status);

    -- original_owner_id feeds key derivation and must never change
    CREATE TRIGGER IF NOT EXISTS trg_vaults_original_owner_immutable
    BEFORE UPDATE OF original_owner_id ON vaults
    WHEN NEW.original_owner_id <> OLD.original_owner_id
    BEGIN
        SELECT RAISE(ABORT, 'original_owner_id is immutable');
    END;

    CREATE TABLE IF NOT EXISTS vault_members (
        id TEXT PRIMARY KEY NOT NULL,
        vault_id TEXT NOT NULL REFERENCES vaults(id),
        user_id TEXT NOT NULL,
        privilege TEXT NOT NULL CHECK (privilege IN ('owner', 'admin', 'member')),
        status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'left', 'removed')),
        added_by_id TEXT,
        removed_by_id TEXT,
        joined_at TIMESTAMP NOT NULL,
        left_at TIMESTAMP,
        removed_at TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_vault_members_vault_id ON vault_members(vault_id);
    CREATE INDEX IF NOT EXISTS idx_vault_members_user_id ON vault_members(user_id);
    CREATE UNIQUE INDEX IF NOT EXISTS idx_vault_members_active
        ON vault_members(vault_id, user_id) WHERE status = 'active';
    CREATE UNIQUE INDEX IF NOT EXISTS idx_vault_members_single_owner
        ON vault_members(vault_id) WHERE status = 'active' AND privilege = 'owner';

    CREATE TABLE IF NOT EXISTS vault_policies (
        id TEXT PRIMARY KEY NOT NULL,
        vault_id TEXT NOT NULL UNIQUE REFERENCES vaults(id),
        policy_type TEXT NOT NULL CHECK (policy_type IN ('immediate', 'time_based', 'expiry_based', 'manual_release')),
        release_status TEXT NOT NULL CHECK (release_status IN ('pending', 'released', 'expired', 'revoked')),
        release_date TIMESTAMP,
        expires_at TIMESTAMP,
        released_at TIMESTAMP,
        released_by_id TEXT,
        note TEXT,
        created_at TIMESTAMP NOT NULL,
        updated_at TIMESTAMP NOT NULL,
        CHECK ((policy_type = 'time_based') = (release_date IS NOT NULL)),
        CHECK ((policy_type = 'expiry_based') = (expires_at IS NOT NULL))
    );

    CREATE TABLE IF NOT EXISTS vault_invites (
        id TEXT PRIMARY KEY NOT NULL,
        vault_id TEXT NOT NULL REFERENCES vaults(id),
        inviter_id TEXT NOT NULL,
        invitee_email TEXT NOT NULL,
        invitee_id TEXT,
        privilege TEXT NOT NULL CHECK (privilege IN ('admin', 'member')),
        status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'sent', 'accepted', 'cancelled', 'expired')),
        token_hash TEXT NOT NULL,
        expires_at TIMESTAMP NOT NULL,
        created_at TIMESTAMP NOT NULL,
        accepted_at TIMESTAMP,
        note TEXT
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_vault_invites_token_hash ON vault_invites(token_hash);
    CREATE INDEX IF NOT EXISTS idx_vault_invites_vault_id ON vault_invites(vault_id);
    CREATE INDEX IF NOT EXISTS idx_vault_invites_status ON vault_invites(status);
"#;

/// Migration 2: Items, typed payloads and item visibility
const MIGRATION_V2: &str = r#"
    CREATE TABLE IF NOT EXISTS vault_items (
        id TEXT PRIMARY KEY NOT NULL,
        vault_id TEXT NOT NULL REFERENCES vaults(id),
        created_by_user_id TEXT NOT NULL,
        item_type TEXT NOT NULL CHECK (item_type IN ('document', 'password', 'note', 'link', 'crypto_wallet')),
        title TEXT NOT NULL,
        description TEXT,
        status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'deleted')),
        created_at TIMESTAMP NOT NULL,
        updated_at TIMESTAMP NOT NULL,
        deleted_at TIMESTAMP,
        deleted_by TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_vault_items_vault_id ON vault_items(vault_id);
    CREATE INDEX IF NOT EXISTS idx_vault_items_created_by ON vault_items(created_by_user_id);

    CREATE TABLE IF NOT EXISTS item_passwords (
        item_id TEXT PRIMARY KEY NOT NULL REFERENCES vault_items(id),
        username TEXT,
        website_url TEXT,
        password_enc TEXT NOT NULL,
        notes_enc TEXT
    );

    CREATE TABLE IF NOT EXISTS item_notes (
        item_id TEXT PRIMARY KEY NOT NULL REFERENCES vault_items(id),
        content_enc TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS item_links (
        item_id TEXT PRIMARY KEY NOT NULL REFERENCES vault_items(id),
        url TEXT NOT NULL,
        notes_enc TEXT
    );

    CREATE TABLE IF NOT EXISTS item_crypto_wallets (
        item_id TEXT PRIMARY KEY NOT NULL REFERENCES vault_items(id),
        wallet_type TEXT NOT NULL,
        public_address TEXT,
        secret_enc TEXT NOT NULL,
        notes_enc TEXT
    );

    CREATE TABLE IF NOT EXISTS item_documents (
        item_id TEXT PRIMARY KEY NOT NULL REFERENCES vault_items(id),
        file_name TEXT NOT NULL,
        content_type TEXT NOT NULL,
        size_bytes INTEGER NOT NULL DEFAULT 0,
        storage_key TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS vault_item_visibility (
        id TEXT PRIMARY KEY NOT NULL,
        vault_item_id TEXT NOT NULL REFERENCES vault_items(id),
        vault_member_id TEXT NOT NULL REFERENCES vault_members(id),
        permission TEXT NOT NULL CHECK (permission IN ('view', 'edit')),
        created_at TIMESTAMP NOT NULL
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_visibility_item_member
        ON vault_item_visibility(vault_item_id, vault_member_id);
    CREATE INDEX IF NOT EXISTS idx_visibility_member ON vault_item_visibility(vault_member_id);
"#;

/// Migration 3: Account directory and audit trail
const MIGRATION_V3: &str = r#"
    CREATE TABLE IF NOT EXISTS accounts (
        id TEXT PRIMARY KEY NOT NULL,
        email TEXT NOT NULL COLLATE NOCASE,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_accounts_email ON accounts(email);

    CREATE TABLE IF NOT EXISTS vault_events (
        id TEXT PRIMARY KEY NOT NULL,
        vault_id TEXT NOT NULL,
        actor_id TEXT,
        event_type TEXT NOT NULL,
        data TEXT,
        created_at TIMESTAMP NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_vault_events_vault_id ON vault_events(vault_id);
    CREATE INDEX IF NOT EXISTS idx_vault_events_created_at ON vault_events(created_at);
"#;

/// Get the current schema version from the database
async fn get_current_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    let version: Option<(i32,)> = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_optional(pool)
        .await?;

    Ok(version.map(|(v,)| v).unwrap_or(0))
}

/// Record that a migration has been applied
async fn record_migration(pool: &SqlitePool, version: i32) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let current_version = get_current_version(pool).await?;

    tracing::info!(
        current_version = current_version,
        target_version = CURRENT_VERSION,
        "Checking database migrations"
    );

    if current_version >= CURRENT_VERSION {
        tracing::debug!("Database is up to date");
        return Ok(());
    }

    if current_version < 1 {
        tracing::info!("Applying migration v1: Vaults, membership, policies and invites");
        sqlx::raw_sql(MIGRATION_V1).execute(pool).await?;
        record_migration(pool, 1).await?;
    }

    if current_version < 2 {
        tracing::info!("Applying migration v2: Items and item visibility");
        sqlx::raw_sql(MIGRATION_V2).execute(pool).await?;
        record_migration(pool, 2).await?;
    }

    if current_version < 3 {
        tracing::info!("Applying migration v3: Accounts and audit trail");
        sqlx::raw_sql(MIGRATION_V3).execute(pool).await?;
        record_migration(pool, 3).await?;
    }

    tracing::info!("Database migrations completed");
    Ok(())
}

/// Get migration status information
pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<MigrationStatus> {
    let current_version = get_current_version(pool).await?;
    Ok(MigrationStatus {
        current_version,
        target_version: CURRENT_VERSION,
        needs_migration: current_version < CURRENT_VERSION,
    })
}

/// Migration status information
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Current schema version in the database
    pub current_version: i32,
    /// Target schema version (latest)
    pub target_version: i32,
    /// Whether migrations need to be run
    pub needs_migration: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test pool")
    }

    #[tokio::test]
    async fn test_run_migrations() {
        let pool = create_test_pool().await;

        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.current_version, 0);
        assert!(status.needs_migration);

        run_migrations(&pool).await.unwrap();

        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.current_version, CURRENT_VERSION);
        assert!(!status.needs_migration);
    }

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let pool = create_test_pool().await;

        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.current_version, CURRENT_VERSION);
    }

    #[tokio::test]
    async fn test_tables_created() {
        let pool = create_test_pool().await;
        run_migrations(&pool).await.unwrap();

        let tables = [
            "vaults",
            "vault_members",
            "vault_policies",
            "vault_invites",
            "vault_items",
            "item_passwords",
            "item_notes",
            "item_links",
            "item_crypto_wallets",
            "item_documents",
            "vault_item_visibility",
            "accounts",
            "vault_events",
        ];

        for table in tables {
            let result: (i32,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&pool)
                .await
                .unwrap_or_else(|_| panic!("Table {} should exist", table));
            assert_eq!(result.0, 0, "Table {} should be empty", table);
        }
    }

    #[tokio::test]
    async fn test_original_owner_is_immutable() {
        let pool = create_test_pool().await;
        run_migrations(&pool).await.unwrap();

        sqlx::query(
            "INSERT INTO vaults (id, owner_id, original_owner_id, name, created_at, updated_at)
             VALUES ('v1', 'u1', 'u1', 'Vault', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let ok = sqlx::query("UPDATE vaults SET owner_id = 'u2' WHERE id = 'v1'")
            .execute(&pool)
            .await;
        assert!(ok.is_ok());

        let rejected = sqlx::query("UPDATE vaults SET original_owner_id = 'u2' WHERE id = 'v1'")
            .execute(&pool)
            .await;
        assert!(rejected.is_err());
    }
}
