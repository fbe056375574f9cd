//! Provider registry.
//!
//! Maps an account's `provider` field to the strategy objects and the
//! integration that exercise it. Adding a provider means implementing
//! `Authenticator`/`Refresher`/`Integration` and registering it here -
//! the lifecycle state machine stays untouched.

pub mod thinq;
pub mod workspace;

use crate::integration::Integration;
use anyhow::{bail, Context, Result};
use beacon::config::AccountConfig;
use beacon::credential::{Authenticator, Refresher};
use std::sync::Arc;

/// Strategy objects plus the integration for one configured account.
pub struct ProviderBundle {
    pub authenticator: Arc<dyn Authenticator>,
    pub refresher: Option<Arc<dyn Refresher>>,
    pub integration: Arc<dyn Integration>,
}

impl std::fmt::Debug for ProviderBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderBundle")
            .field("integration", &self.integration.name())
            .field("has_refresher", &self.refresher.is_some())
            .finish()
    }
}

/// Check if a provider name is supported
pub fn is_supported_provider(name: &str) -> bool {
    matches!(name, "thinq" | "workspace")
}

/// Builds the provider bundle for one account.
///
/// Fails when the provider is unknown or the account is missing the
/// credential fields that provider requires.
pub fn build(account: &AccountConfig) -> Result<ProviderBundle> {
    match account.provider.as_str() {
        "thinq" => {
            let password = account
                .password
                .clone()
                .context("thinq accounts require 'password'")?;
            let country = account.region.clone().unwrap_or_else(|| "US".to_string());

            let provider = match &account.base_url {
                Some(base) => Arc::new(thinq::ThinqProvider::with_base_url(
                    account.username.clone(),
                    password,
                    country,
                    base.clone(),
                )),
                None => Arc::new(thinq::ThinqProvider::new(
                    account.username.clone(),
                    password,
                    country,
                )),
            };
            let integration = match &account.base_url {
                Some(base) => Arc::new(thinq::ThinqIntegration::with_base_url(
                    account.poll_interval_seconds,
                    base.clone(),
                )),
                None => Arc::new(thinq::ThinqIntegration::new(account.poll_interval_seconds)),
            };

            Ok(ProviderBundle {
                authenticator: provider.clone(),
                refresher: Some(provider),
                integration,
            })
        }
        "workspace" => {
            let client_id = account
                .client_id
                .clone()
                .context("workspace accounts require 'client_id'")?;
            let client_secret = account
                .client_secret
                .clone()
                .context("workspace accounts require 'client_secret'")?;
            let offline_token = account
                .refresh_token
                .clone()
                .context("workspace accounts require 'refresh_token'")?;

            let provider = match &account.base_url {
                Some(base) => Arc::new(workspace::WorkspaceProvider::with_base_url(
                    client_id,
                    client_secret,
                    offline_token,
                    base.clone(),
                )),
                None => Arc::new(workspace::WorkspaceProvider::new(
                    client_id,
                    client_secret,
                    offline_token,
                )),
            };
            let integration = Arc::new(workspace::WorkspaceIntegration::new(
                account.poll_interval_seconds,
            ));

            Ok(ProviderBundle {
                authenticator: provider.clone(),
                refresher: Some(provider),
                integration,
            })
        }
        other => bail!("Unknown provider '{}'", other),
    }
}
