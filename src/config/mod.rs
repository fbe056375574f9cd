use crate::credential::{AccountKey, AcquireError};
use anyhow::{Context, Result};
use serde::Deserialize;

/// Complete Beacon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BeaconConfig {
    #[serde(default)]
    pub credentials: CredentialConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

/// Credential lifecycle configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialConfig {
    /// Safety margin before expiry at which a token is proactively refreshed
    #[serde(default = "default_refresh_buffer")]
    pub refresh_buffer_seconds: i64,
    /// Deadline for each authenticate/refresh call against a provider
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_seconds: u64,
}

fn default_refresh_buffer() -> i64 {
    300
}

fn default_operation_timeout() -> u64 {
    30
}

impl CredentialConfig {
    pub fn refresh_buffer(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_buffer_seconds)
    }

    pub fn operation_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.operation_timeout_seconds)
    }
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            refresh_buffer_seconds: default_refresh_buffer(),
            operation_timeout_seconds: default_operation_timeout(),
        }
    }
}

/// Status API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Port for the status API
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

fn default_api_port() -> u16 {
    3100
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
        }
    }
}

/// One configured integration account.
///
/// Which credential fields are required depends on the provider: the
/// appliance cloud needs `username`/`password`, the workspace provider needs
/// `client_id`/`client_secret`/`refresh_token`.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    /// Provider identifier (e.g., "thinq", "workspace")
    pub provider: String,
    /// Account identity at the provider (username or email)
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Long-lived offline grant captured during account setup
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Region/endpoint selector (provider-specific)
    #[serde(default)]
    pub region: Option<String>,
    /// Override for the provider's API base URL
    #[serde(default)]
    pub base_url: Option<String>,
    /// How often the integration polls for widget data (seconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
}

fn default_poll_interval() -> u64 {
    300
}

impl AccountConfig {
    /// Derives the stable cache key for this account.
    pub fn account_key(&self) -> Result<AccountKey, AcquireError> {
        AccountKey::derive(&self.provider, &self.username, self.region.as_deref())
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<BeaconConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path))?;
    let config: BeaconConfig = toml::from_str(&contents).context("Failed to parse config file")?;
    Ok(config)
}
