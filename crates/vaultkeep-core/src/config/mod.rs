//! Configuration management with file persistence
//!
//! The server signing key is never part of the file. It is read from the
//! environment variable named by `security.signing_key_env`.

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::domain::security::SigningKey;
use crate::storage::{DatabaseConfig, default_database_path};

/// Default environment variable carrying the signing key
pub const DEFAULT_SIGNING_KEY_ENV: &str = "VAULTKEEP_SIGNING_KEY";

/// Vaultkeep configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseSettings,
    pub invites: InviteSettings,
    pub security: SecuritySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Database file; the platform data directory when unset
    pub path: Option<PathBuf>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InviteSettings {
    pub default_ttl_hours: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    pub signing_key_env: String,
    /// Only present if someone wrote a key into the file; always rejected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_key: Option<String>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: 5,
        }
    }
}

impl Default for InviteSettings {
    fn default() -> Self {
        Self {
            default_ttl_hours: crate::domain::invite::DEFAULT_INVITE_TTL_HOURS,
        }
    }
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            signing_key_env: DEFAULT_SIGNING_KEY_ENV.to_string(),
            signing_key: None,
        }
    }
}

impl DatabaseSettings {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(default_database_path)
    }

    /// Database settings as a connection config
    pub fn to_database_config(&self) -> DatabaseConfig {
        DatabaseConfig::with_path(self.resolved_path()).max_connections(self.max_connections)
    }
}

impl SecuritySettings {
    pub fn enforce_env_only(&self) -> anyhow::Result<()> {
        if self.signing_key.is_some() {
            return Err(anyhow!(
                "The signing key must be provided via the {} environment variable, not stored in configuration",
                self.signing_key_env
            ));
        }
        Ok(())
    }

    /// Load the signing key from the environment
    pub fn signing_key(&self) -> anyhow::Result<SigningKey> {
        self.enforce_env_only()?;

        let raw = env::var(&self.signing_key_env).with_context(|| {
            format!(
                "{} is not set; generate a key with `vaultkeep keygen`",
                self.signing_key_env
            )
        })?;
        SigningKey::parse(raw.trim())
            .with_context(|| format!("{} does not hold a valid signing key", self.signing_key_env))
    }

    /// Whether the key variable is present, without revealing it
    pub fn signing_key_status(&self) -> String {
        match env::var(&self.signing_key_env) {
            Ok(value) if !value.trim().is_empty() => format!("(set via {})", self.signing_key_env),
            _ => format!("(not set - use the {} env var)", self.signing_key_env),
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("VAULTKEEP_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("vaultkeep")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config = Self::from_toml(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Parse and validate TOML text
    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.security.enforce_env_only()?;
        if self.database.max_connections == 0 {
            return Err(anyhow!("database.max_connections must be at least 1"));
        }
        if self.invites.default_ttl_hours <= 0 {
            return Err(anyhow!("invites.default_ttl_hours must be positive"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "database.path" => Ok(self.database.resolved_path().display().to_string()),
            "database.max_connections" => Ok(self.database.max_connections.to_string()),
            "invites.default_ttl_hours" => Ok(self.invites.default_ttl_hours.to_string()),
            "security.signing_key_env" => Ok(self.security.signing_key_env.clone()),
            "security.signing_key" | "signing_key" => Ok(self.security.signing_key_status()),
            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `vaultkeep config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "database.path" => {
                self.database.path = if value.trim().is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value.trim()))
                };
            }
            "database.max_connections" => {
                let max: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid max_connections value: {}", value))?;
                if max == 0 {
                    return Err(anyhow!("max_connections must be at least 1"));
                }
                self.database.max_connections = max;
            }
            "invites.default_ttl_hours" => {
                let hours: i64 = value
                    .parse()
                    .with_context(|| format!("Invalid default_ttl_hours value: {}", value))?;
                if hours <= 0 {
                    return Err(anyhow!("Invite lifetime must be positive"));
                }
                self.invites.default_ttl_hours = hours;
            }
            "security.signing_key_env" => {
                let name = value.trim();
                if name.is_empty() || name.contains('=') {
                    return Err(anyhow!("Invalid environment variable name: {}", value));
                }
                self.security.signing_key_env = name.to_string();
            }
            "security.signing_key" | "signing_key" => {
                return Err(anyhow!(
                    "The signing key cannot be stored in configuration for security. \
                     Set the {} environment variable instead.",
                    self.security.signing_key_env
                ));
            }
            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `vaultkeep config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = [
            "database.path",
            "database.max_connections",
            "invites.default_ttl_hours",
            "security.signing_key_env",
            "security.signing_key",
        ];

        keys.into_iter()
            .map(|key| Ok((key.to_string(), self.get(key)?)))
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}
