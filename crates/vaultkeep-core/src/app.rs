//! Application wiring
//!
//! Builds every service over one database, clock and signing key so
//! front-ends (the CLI, tests) don't repeat the plumbing.

use std::sync::Arc;

use anyhow::Context;
use chrono::Duration;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::domain::access::AccessControlGateway;
use crate::domain::events::EventRepository;
use crate::domain::invite::InviteService;
use crate::domain::item::ItemService;
use crate::domain::security::KeyDerivationService;
use crate::domain::vault::VaultService;
use crate::identity::SqliteIdentityDirectory;
use crate::storage::Database;

/// All services sharing one database
#[derive(Debug, Clone)]
pub struct Vaultkeep {
    db: Database,
    identity: SqliteIdentityDirectory,
    vaults: VaultService,
    items: ItemService,
    gateway: AccessControlGateway,
    events: EventRepository,
}

impl Vaultkeep {
    /// Wire services over an open database
    pub fn new(db: Database, clock: Arc<dyn Clock>, keys: KeyDerivationService, invite_ttl: Duration) -> Self {
        let pool = db.pool().clone();
        let identity = SqliteIdentityDirectory::new(pool.clone());
        let invites = InviteService::new(pool.clone(), clock.clone(), Arc::new(identity.clone()))
            .with_default_ttl(invite_ttl);
        let gateway = AccessControlGateway::new(pool.clone(), clock.clone(), keys, Arc::new(identity.clone()))
            .with_invites(invites);

        Self {
            vaults: VaultService::new(pool.clone(), clock.clone()),
            items: ItemService::new(pool.clone(), clock, gateway.clone()),
            events: EventRepository::new(pool),
            identity,
            gateway,
            db,
        }
    }

    /// Open the configured database with the signing key from the environment
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let keys = KeyDerivationService::new(config.security.signing_key()?);
        let db = Database::new(config.database.to_database_config())
            .await
            .context("Failed to open database")?;

        tracing::debug!(path = %db.path().display(), "Opened database");
        Ok(Self::new(
            db,
            Arc::new(SystemClock),
            keys,
            Duration::hours(config.invites.default_ttl_hours),
        ))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn identity(&self) -> &SqliteIdentityDirectory {
        &self.identity
    }

    pub fn vaults(&self) -> &VaultService {
        &self.vaults
    }

    pub fn items(&self) -> &ItemService {
        &self.items
    }

    pub fn gateway(&self) -> &AccessControlGateway {
        &self.gateway
    }

    pub fn events(&self) -> &EventRepository {
        &self.events
    }
}
