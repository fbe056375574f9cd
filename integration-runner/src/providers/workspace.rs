//! Workspace suite provider (Google Workspace style).
//!
//! There is no interactive login on this path: the account is set up once
//! with a long-lived offline grant, and both `authenticate` and `refresh`
//! exchange a refresh token at the token endpoint. `authenticate` uses the
//! config-held offline grant; `refresh` uses whatever refresh token is on
//! the current record.

use crate::integration::{FetchError, Integration};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use beacon::credential::{Authenticator, CredentialRecord, Refresher};
use chrono::{Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

pub const TOKEN_BASE_URL: &str = "https://oauth2.googleapis.com";
pub const API_BASE_URL: &str = "https://gmail.googleapis.com";

const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Authenticate/refresh strategy for one workspace account.
pub struct WorkspaceProvider {
    client_id: String,
    client_secret: String,
    /// Offline grant captured during account setup
    offline_token: String,
    token_base_url: String,
    http: Client,
}

impl WorkspaceProvider {
    /// Create a provider using the default token endpoint.
    pub fn new(client_id: String, client_secret: String, offline_token: String) -> Self {
        Self::with_base_url(client_id, client_secret, offline_token, TOKEN_BASE_URL.to_string())
    }

    /// Create a provider with a custom token endpoint (for testing with a mock server).
    pub fn with_base_url(
        client_id: String,
        client_secret: String,
        offline_token: String,
        token_base_url: String,
    ) -> Self {
        Self {
            client_id,
            client_secret,
            offline_token,
            token_base_url,
            http: Client::new(),
        }
    }

    /// Exchanges a refresh token for a new access token.
    async fn exchange(&self, refresh_token: &str) -> Result<TokenResponse> {
        let url = format!("{}/token", self.token_base_url);
        let response = self
            .http
            .post(&url)
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
            ])
            .send()
            .await
            .context("Failed to send token request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            bail!("Token request failed with status {}: {}", status, body);
        }

        response
            .json::<TokenResponse>()
            .await
            .context("Failed to parse token response")
    }

    fn record_from(&self, token: TokenResponse, fallback_refresh: &str) -> CredentialRecord {
        let expires_in = token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        CredentialRecord {
            access_token: token.access_token,
            // The provider rarely rotates the grant; keep the one we used.
            refresh_token: token
                .refresh_token
                .or_else(|| Some(fallback_refresh.to_string())),
            expires_at: Utc::now() + Duration::seconds(expires_in),
            auxiliary: None,
            generation: 0,
        }
    }
}

#[async_trait]
impl Authenticator for WorkspaceProvider {
    async fn authenticate(&self) -> Result<CredentialRecord> {
        let token = self.exchange(&self.offline_token).await?;
        Ok(self.record_from(token, &self.offline_token))
    }
}

#[async_trait]
impl Refresher for WorkspaceProvider {
    async fn refresh(&self, current: &CredentialRecord) -> Result<CredentialRecord> {
        let refresh_token = current
            .refresh_token
            .as_deref()
            .ok_or_else(|| anyhow!("no refresh token on record"))?;

        let token = self.exchange(refresh_token).await?;
        Ok(self.record_from(token, refresh_token))
    }
}

#[derive(Deserialize)]
struct MessageListResponse {
    #[serde(rename = "resultSizeEstimate", default)]
    result_size_estimate: u64,
}

/// Widget-data integration: unread mailbox count.
pub struct WorkspaceIntegration {
    base_url: String,
    poll_interval_secs: u64,
    http: Client,
}

impl WorkspaceIntegration {
    pub fn new(poll_interval_secs: u64) -> Self {
        Self::with_base_url(poll_interval_secs, API_BASE_URL.to_string())
    }

    pub fn with_base_url(poll_interval_secs: u64, base_url: String) -> Self {
        Self {
            base_url,
            poll_interval_secs,
            http: Client::new(),
        }
    }
}

#[async_trait]
impl Integration for WorkspaceIntegration {
    fn name(&self) -> &str {
        "workspace"
    }

    async fn fetch(&self, access_token: &str) -> Result<serde_json::Value, FetchError> {
        let url = format!(
            "{}/gmail/v1/users/me/messages?q=is%3Aunread&maxResults=1",
            self.base_url
        );
        let response = self.http.get(&url).bearer_auth(access_token).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(FetchError::from_status(status.as_u16(), body));
        }

        let list: MessageListResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(json!({ "unread_estimate": list.result_size_estimate }))
    }

    fn poll_interval(&self) -> u64 {
        self.poll_interval_secs
    }
}
