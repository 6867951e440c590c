//! Vaultkeep CLI - shared vaults with release policies

use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;
use vaultkeep_core::Vaultkeep;
use vaultkeep_core::config::Config;
use vaultkeep_core::domain::policy::PolicyKind;
use vaultkeep_core::domain::security::SigningKey;
use vaultkeep_core::domain::vault::Privilege;
use vaultkeep_core::identity::SqliteIdentityDirectory;
use vaultkeep_core::storage::{Database, migration_status};

#[derive(Parser)]
#[command(name = "vaultkeep")]
#[command(author, version, about = "Shared vaults with release policies", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Database file, overriding `database.path`
    #[arg(long, global = true)]
    db: Option<PathBuf>,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and run migrations
    Init,

    /// Generate a fresh server signing key (hex)
    Keygen,

    /// Manage accounts in the identity directory
    Account {
        #[command(subcommand)]
        action: AccountAction,
    },

    /// Manage vaults and membership
    Vault {
        #[command(subcommand)]
        action: VaultAction,
    },

    /// Inspect and change release policies
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },

    /// Manage invites
    Invite {
        #[command(subcommand)]
        action: InviteAction,
    },

    /// Ask the access gateway
    Access {
        #[command(subcommand)]
        action: AccessAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum AccountAction {
    /// Register an email address
    Register { email: String },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum PolicyArg {
    Immediate,
    TimeBased,
    ExpiryBased,
    Manual,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum PrivilegeArg {
    Admin,
    Member,
}

impl From<PrivilegeArg> for Privilege {
    fn from(arg: PrivilegeArg) -> Self {
        match arg {
            PrivilegeArg::Admin => Privilege::Admin,
            PrivilegeArg::Member => Privilege::Member,
        }
    }
}

#[derive(Subcommand)]
enum VaultAction {
    /// Create a vault
    Create {
        name: String,
        #[arg(long)]
        owner: Uuid,
        #[arg(short, long)]
        description: Option<String>,
        /// Release policy
        #[arg(long, value_enum, default_value = "immediate")]
        policy: PolicyArg,
        /// Release date for time-based policies (RFC 3339)
        #[arg(long)]
        release_date: Option<DateTime<Utc>>,
        /// Expiry for expiry-based policies (RFC 3339)
        #[arg(long)]
        expires_at: Option<DateTime<Utc>>,
    },
    /// Show a vault
    Show {
        vault: Uuid,
        #[arg(long)]
        user: Uuid,
    },
    /// List the vaults a user belongs to
    List {
        #[arg(long)]
        user: Uuid,
    },
    /// List active members
    Members {
        vault: Uuid,
        #[arg(long)]
        user: Uuid,
    },
    /// Hand the vault to another member
    Transfer {
        vault: Uuid,
        #[arg(long)]
        owner: Uuid,
        #[arg(long)]
        to: Uuid,
    },
    /// Soft delete a vault
    Delete {
        vault: Uuid,
        #[arg(long)]
        owner: Uuid,
    },
}

#[derive(Subcommand)]
enum PolicyAction {
    /// Show the current policy
    Show { vault: Uuid },
    /// Release a manual-release vault
    Release {
        vault: Uuid,
        #[arg(long)]
        user: Uuid,
    },
    /// Revoke member access
    Revoke {
        vault: Uuid,
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        note: Option<String>,
    },
}

#[derive(Subcommand)]
enum InviteAction {
    /// Create an invite and print its token once
    Create {
        vault: Uuid,
        #[arg(long)]
        inviter: Uuid,
        #[arg(long)]
        email: String,
        #[arg(long, value_enum, default_value = "member")]
        privilege: PrivilegeArg,
        /// Expiry (RFC 3339); defaults to `invites.default_ttl_hours` from now
        #[arg(long)]
        expires_at: Option<DateTime<Utc>>,
    },
    /// Redeem a token
    Accept {
        token: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        user: Uuid,
    },
    /// Cancel an open invite
    Cancel {
        invite: Uuid,
        #[arg(long)]
        user: Uuid,
    },
    /// List the invites of a vault
    List {
        vault: Uuid,
        #[arg(long)]
        user: Uuid,
    },
}

#[derive(Subcommand)]
enum AccessAction {
    /// Check vault accessibility, or an item permission with --item
    Check {
        vault: Uuid,
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        item: Option<Uuid>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("vaultkeep=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let out = Output {
        format: cli.format,
        quiet: cli.quiet,
    };

    let load_config = || -> anyhow::Result<Config> {
        let mut config = Config::load()?;
        if let Some(path) = &cli.db {
            config.database.path = Some(path.clone());
        }
        debug!(database = %config.database.resolved_path().display(), "Loaded configuration");
        Ok(config)
    };

    match cli.command {
        Commands::Init => cmd_init(&load_config()?, out).await,
        Commands::Keygen => cmd_keygen(out),
        Commands::Account { action } => cmd_account(&load_config()?, action, out).await,
        Commands::Config { action } => cmd_config(action, out),
        Commands::Vault { action } => {
            let app = Vaultkeep::open(&load_config()?).await?;
            cmd_vault(&app, action, out).await
        }
        Commands::Policy { action } => {
            let app = Vaultkeep::open(&load_config()?).await?;
            cmd_policy(&app, action, out).await
        }
        Commands::Invite { action } => {
            let app = Vaultkeep::open(&load_config()?).await?;
            cmd_invite(&app, action, out).await
        }
        Commands::Access { action } => {
            let app = Vaultkeep::open(&load_config()?).await?;
            cmd_access(&app, action, out).await
        }
    }
}

// ============================================================================
// Output
// ============================================================================

#[derive(Clone, Copy)]
struct Output {
    format: OutputFormat,
    quiet: bool,
}

impl Output {
    /// Print `value` as JSON, or run `text` for human output
    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce()) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Text => text(),
        }
        Ok(())
    }

    fn note(&self, message: &str) {
        if !self.quiet && self.format == OutputFormat::Text {
            println!("{}", message);
        }
    }
}

fn fmt_time(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_init(config: &Config, out: Output) -> anyhow::Result<()> {
    let db = Database::new(config.database.to_database_config())
        .await
        .context("Failed to initialize database")?;
    let status = migration_status(db.pool()).await?;

    out.emit(
        &serde_json::json!({
            "path": db.path().display().to_string(),
            "schema_version": status.current_version,
        }),
        || {
            println!("Database ready at {}", db.path().display());
            println!("  Schema version: {}", status.current_version);
        },
    )?;

    if let Err(e) = config.security.signing_key() {
        warn!(error = %e, "Signing key unavailable");
        out.note(&format!(
            "\nNo signing key found. Run `vaultkeep keygen` and export {}.",
            config.security.signing_key_env
        ));
    }
    Ok(())
}

fn cmd_keygen(out: Output) -> anyhow::Result<()> {
    let key = SigningKey::generate().to_hex();
    out.emit(&serde_json::json!({ "signing_key": key }), || println!("{}", key))
}

async fn cmd_account(config: &Config, action: AccountAction, out: Output) -> anyhow::Result<()> {
    let db = Database::new(config.database.to_database_config())
        .await
        .context("Failed to open database")?;
    let directory = SqliteIdentityDirectory::new(db.pool().clone());

    match action {
        AccountAction::Register { email } => {
            let account = directory.register(&email).await?;
            out.emit(&account, || {
                println!("Registered {}", account.email);
                println!("  User ID: {}", account.id);
            })
        }
    }
}

fn policy_kind(
    policy: PolicyArg,
    release_date: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
) -> anyhow::Result<PolicyKind> {
    match (policy, release_date, expires_at) {
        (PolicyArg::Immediate, None, None) => Ok(PolicyKind::Immediate),
        (PolicyArg::Manual, None, None) => Ok(PolicyKind::ManualRelease),
        (PolicyArg::TimeBased, Some(release_date), None) => Ok(PolicyKind::TimeBased { release_date }),
        (PolicyArg::ExpiryBased, None, Some(expires_at)) => Ok(PolicyKind::ExpiryBased { expires_at }),
        (PolicyArg::TimeBased, _, _) => Err(anyhow::anyhow!("time-based policies need --release-date only")),
        (PolicyArg::ExpiryBased, _, _) => Err(anyhow::anyhow!("expiry-based policies need --expires-at only")),
        _ => Err(anyhow::anyhow!(
            "--release-date and --expires-at apply only to time-based and expiry-based policies"
        )),
    }
}

async fn cmd_vault(app: &Vaultkeep, action: VaultAction, out: Output) -> anyhow::Result<()> {
    match action {
        VaultAction::Create {
            name,
            owner,
            description,
            policy,
            release_date,
            expires_at,
        } => {
            let kind = policy_kind(policy, release_date, expires_at)?;
            let vault = app.vaults().create_vault(owner, &name, description, kind).await?;
            out.emit(&vault, || {
                println!("Vault created.");
                println!("  ID: {}", vault.id);
                println!("  Name: {}", vault.name);
                println!("  Policy: {}", kind);
            })
        }
        VaultAction::Show { vault, user } => {
            let vault = app.vaults().get_vault(vault, user).await?;
            let policy = app.gateway().policies().get_policy(vault.id).await?;
            out.emit(&serde_json::json!({ "vault": vault, "policy": policy }), || {
                println!("Vault: {}", vault.name);
                println!("  ID: {}", vault.id);
                println!("  Owner: {}", vault.owner_id);
                if vault.original_owner_id != vault.owner_id {
                    println!("  Original owner: {}", vault.original_owner_id);
                }
                if let Some(desc) = &vault.description {
                    println!("  Description: {}", desc);
                }
                println!("  Policy: {} ({})", policy.kind, policy.release_status);
                println!("  Created: {}", fmt_time(&vault.created_at));
            })
        }
        VaultAction::List { user } => {
            let vaults = app.vaults().list_vaults_for_user(user).await?;
            out.emit(&vaults, || {
                if vaults.is_empty() {
                    println!("No vaults found.");
                }
                for v in &vaults {
                    let role = if v.owner_id == user { " [owner]" } else { "" };
                    println!("  {} - {}{}", v.id, v.name, role);
                }
            })
        }
        VaultAction::Members { vault, user } => {
            let members = app.vaults().list_members(vault, user).await?;
            out.emit(&members, || {
                for m in &members {
                    println!("  {} {:<6} joined {}", m.user_id, m.privilege.as_str(), fmt_time(&m.joined_at));
                }
            })
        }
        VaultAction::Transfer { vault, owner, to } => {
            let vault = app.vaults().transfer_ownership(vault, owner, to).await?;
            out.emit(&vault, || println!("Vault {} now owned by {}.", vault.id, vault.owner_id))
        }
        VaultAction::Delete { vault, owner } => {
            app.vaults().delete_vault(vault, owner).await?;
            out.emit(&serde_json::json!({ "deleted": vault }), || println!("Vault {} deleted.", vault))
        }
    }
}

async fn cmd_policy(app: &Vaultkeep, action: PolicyAction, out: Output) -> anyhow::Result<()> {
    let policies = app.gateway().policies();
    let policy = match action {
        PolicyAction::Show { vault } => policies.get_policy(vault).await?,
        PolicyAction::Release { vault, user } => {
            app.gateway().release_vault_manually(vault, user).await?;
            policies.get_policy(vault).await?
        }
        PolicyAction::Revoke { vault, user, note } => policies.revoke(vault, user, note.as_deref()).await?,
    };

    out.emit(&policy, || {
        println!("Policy: {}", policy.kind);
        println!("  Status: {}", policy.release_status);
        if let Some(at) = &policy.released_at {
            println!("  Released: {}", fmt_time(at));
        }
        if let Some(note) = &policy.note {
            println!("  Note: {}", note);
        }
    })
}

async fn cmd_invite(app: &Vaultkeep, action: InviteAction, out: Output) -> anyhow::Result<()> {
    match action {
        InviteAction::Create {
            vault,
            inviter,
            email,
            privilege,
            expires_at,
        } => {
            let created = app
                .gateway()
                .create_invite(vault, inviter, &email, privilege.into(), expires_at)
                .await?;
            let token = created.token.as_str();
            out.emit(
                &serde_json::json!({ "invite": created.invite, "token": token }),
                || {
                    println!("Invite created for {}.", created.invite.invitee_email);
                    println!("  Invite ID: {}", created.invite.id);
                    println!("  Expires: {}", fmt_time(&created.invite.expires_at));
                    println!("  Token: {}", token);
                    println!("\nThe token is shown only once. Deliver it to the invitee.");
                },
            )
        }
        InviteAction::Accept { token, email, user } => {
            let member = app.gateway().accept_invite(&token, &email, user).await?;
            out.emit(&member, || {
                println!("Joined vault {} as {}.", member.vault_id, member.privilege);
            })
        }
        InviteAction::Cancel { invite, user } => {
            app.gateway().invites().cancel_invite(invite, user).await?;
            out.emit(&serde_json::json!({ "cancelled": invite }), || {
                println!("Invite {} cancelled.", invite);
            })
        }
        InviteAction::List { vault, user } => {
            let invites = app.gateway().invites().list_invites(vault, user).await?;
            out.emit(&invites, || {
                if invites.is_empty() {
                    println!("No invites.");
                }
                for i in &invites {
                    println!(
                        "  {} {} {} ({}), expires {}",
                        i.id,
                        i.invitee_email,
                        i.privilege,
                        i.status,
                        fmt_time(&i.expires_at)
                    );
                }
            })
        }
    }
}

async fn cmd_access(app: &Vaultkeep, action: AccessAction, out: Output) -> anyhow::Result<()> {
    match action {
        AccessAction::Check { vault, user, item: None } => {
            let accessibility = app.gateway().is_vault_accessible(vault, user).await?;
            let can_manage = app.gateway().can_manage_members(vault, user).await?;
            out.emit(
                &serde_json::json!({ "accessibility": accessibility, "can_manage_members": can_manage }),
                || {
                    match &accessibility.reason {
                        None => println!("Accessible"),
                        Some(reason) => println!("Denied: {}", reason),
                    }
                    println!("  Can manage members: {}", can_manage);
                },
            )
        }
        AccessAction::Check {
            vault,
            user,
            item: Some(item),
        } => {
            let permission = app.gateway().resolve(vault, item, user).await?;
            out.emit(&serde_json::json!({ "item": item, "permission": permission }), || {
                println!("{}", permission)
            })
        }
    }
}

fn cmd_config(action: ConfigAction, out: Output) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            println!("{}", config.get(&key)?);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            out.note(&format!("Set {} = {}", key, value));
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            out.note("Configuration reset to defaults.");
        }
        ConfigAction::Path => {
            println!("{}", Config::config_path()?.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_policy_kind_from_args() {
        let at = Utc::now();
        assert_eq!(policy_kind(PolicyArg::Immediate, None, None).unwrap(), PolicyKind::Immediate);
        assert_eq!(
            policy_kind(PolicyArg::TimeBased, Some(at), None).unwrap(),
            PolicyKind::TimeBased { release_date: at }
        );
        assert!(policy_kind(PolicyArg::TimeBased, None, None).is_err());
        assert!(policy_kind(PolicyArg::Manual, None, Some(at)).is_err());
    }
}
