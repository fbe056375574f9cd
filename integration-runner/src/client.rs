//! Credential-aware wrapper around integration fetches.
//!
//! Acquires a valid bearer token before each outbound call. When the
//! provider rejects an otherwise-valid-looking cached token, the client
//! invalidates the cached credential and retries exactly once - credential
//! state stays inside the lifecycle manager, the rejection signal stays
//! here.

use crate::integration::{FetchError, Integration};
use anyhow::Result;
use beacon::credential::{AccountKey, AcquireError, Authenticator, CredentialManager, Refresher};
use std::sync::Arc;
use tracing::warn;

/// Per-account handle integrations use to reach their provider.
pub struct IntegrationClient {
    manager: Arc<CredentialManager>,
    key: AccountKey,
    authenticator: Arc<dyn Authenticator>,
    refresher: Option<Arc<dyn Refresher>>,
    refresh_buffer: chrono::Duration,
}

impl IntegrationClient {
    pub fn new(
        manager: Arc<CredentialManager>,
        key: AccountKey,
        authenticator: Arc<dyn Authenticator>,
        refresher: Option<Arc<dyn Refresher>>,
        refresh_buffer: chrono::Duration,
    ) -> Self {
        Self {
            manager,
            key,
            authenticator,
            refresher,
            refresh_buffer,
        }
    }

    pub fn account_key(&self) -> &AccountKey {
        &self.key
    }

    /// Returns a valid bearer token for this account.
    pub async fn bearer_token(&self) -> Result<String, AcquireError> {
        self.manager
            .acquire(
                &self.key,
                self.authenticator.as_ref(),
                self.refresher.as_deref(),
                self.refresh_buffer,
            )
            .await
    }

    /// Runs one fetch against the provider with the 401-retry contract.
    ///
    /// A persistent authentication failure is returned as-is (its display
    /// form is the stable user-facing diagnostic) and is never busy-retried
    /// here - the next attempt happens on the next polling cycle.
    pub async fn fetch(&self, integration: &dyn Integration) -> Result<serde_json::Value> {
        let token = self.bearer_token().await?;

        match integration.fetch(&token).await {
            Ok(data) => Ok(data),
            Err(FetchError::Unauthorized) => {
                warn!(
                    account = %self.key,
                    integration = integration.name(),
                    "provider rejected cached token, re-authenticating"
                );
                self.manager.invalidate(&self.key);
                let token = self.bearer_token().await?;
                integration.fetch(&token).await.map_err(anyhow::Error::from)
            }
            Err(e) => Err(e.into()),
        }
    }
}
