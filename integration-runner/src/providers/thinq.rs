//! Appliance-cloud provider (LG ThinQ style).
//!
//! Login is two-step: a pre-login establishes a session and returns a
//! session cookie, then an OAuth-shaped token exchange issues the bearer
//! tokens. Later device calls depend on that session, so the cookie is kept
//! on the credential record as opaque auxiliary state - it is not
//! interchangeable with the access token.

use crate::integration::{FetchError, Integration};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use beacon::credential::{Authenticator, CredentialRecord, Refresher};
use chrono::{Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

pub const BASE_URL: &str = "https://kic.lgthinq.com:46030/api";

/// Default access-token lifetime when the provider omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Pre-login session response.
#[derive(Deserialize)]
struct SessionResponse {
    #[serde(rename = "jsessionId")]
    jsession_id: String,
}

/// Token endpoint response (standard OAuth 2.0 shape).
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Authenticate/refresh strategy for one appliance-cloud account.
pub struct ThinqProvider {
    username: String,
    password: String,
    country: String,
    base_url: String,
    http: Client,
}

impl ThinqProvider {
    /// Create a provider using the default API base URL.
    pub fn new(username: String, password: String, country: String) -> Self {
        Self::with_base_url(username, password, country, BASE_URL.to_string())
    }

    /// Create a provider with a custom base URL (for testing with a mock server).
    pub fn with_base_url(
        username: String,
        password: String,
        country: String,
        base_url: String,
    ) -> Self {
        Self {
            username,
            password,
            country,
            base_url,
            http: Client::new(),
        }
    }

    /// Performs the pre-login that establishes the provider session.
    async fn login_session(&self) -> Result<SessionResponse> {
        let url = format!("{}/member/login", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&json!({
                "username": self.username,
                "password": self.password,
                "country": self.country,
            }))
            .send()
            .await
            .context("Failed to send pre-login request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            bail!("Pre-login failed with status {}: {}", status, body);
        }

        response
            .json::<SessionResponse>()
            .await
            .context("Failed to parse pre-login response")
    }

    /// POSTs to the token endpoint with the given form fields.
    async fn exchange(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let url = format!("{}/oauth/token", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("Accept", "application/json")
            .form(form)
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

    fn record_from(&self, token: TokenResponse, auxiliary: Option<serde_json::Value>) -> CredentialRecord {
        let expires_in = token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        CredentialRecord {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: Utc::now() + Duration::seconds(expires_in),
            auxiliary,
            generation: 0,
        }
    }
}

#[async_trait]
impl Authenticator for ThinqProvider {
    async fn authenticate(&self) -> Result<CredentialRecord> {
        let session = self.login_session().await?;
        debug!(username = %self.username, "established provider session");

        let token = self
            .exchange(&[
                ("grant_type", "login_session"),
                ("session_id", &session.jsession_id),
                ("username", &self.username),
            ])
            .await?;

        Ok(self.record_from(
            token,
            Some(json!({ "jsession_id": session.jsession_id })),
        ))
    }
}

#[async_trait]
impl Refresher for ThinqProvider {
    async fn refresh(&self, current: &CredentialRecord) -> Result<CredentialRecord> {
        let refresh_token = current
            .refresh_token
            .as_deref()
            .ok_or_else(|| anyhow!("no refresh token on record"))?;

        let token = self
            .exchange(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .await?;

        // The session cookie is opaque auxiliary state - carry it forward
        // unchanged across refreshes.
        Ok(self.record_from(token, current.auxiliary.clone()))
    }
}

/// One appliance in the device listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    pub alias: String,
    #[serde(rename = "deviceType")]
    pub device_type: String,
    #[serde(rename = "isOn", default)]
    pub is_on: bool,
    #[serde(rename = "currentPower", default)]
    pub current_power: Option<f64>,
}

#[derive(Deserialize)]
struct DeviceListResponse {
    devices: Vec<DeviceSnapshot>,
}

/// Widget-data integration: lists the account's appliances.
pub struct ThinqIntegration {
    base_url: String,
    poll_interval_secs: u64,
    http: Client,
}

impl ThinqIntegration {
    pub fn new(poll_interval_secs: u64) -> Self {
        Self::with_base_url(poll_interval_secs, BASE_URL.to_string())
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
impl Integration for ThinqIntegration {
    fn name(&self) -> &str {
        "thinq"
    }

    async fn fetch(&self, access_token: &str) -> Result<serde_json::Value, FetchError> {
        let url = format!("{}/service/devices", self.base_url);
        let response = self.http.get(&url).bearer_auth(access_token).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(FetchError::from_status(status.as_u16(), body));
        }

        let list: DeviceListResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(json!({
            "device_count": list.devices.len(),
            "devices": list.devices,
        }))
    }

    fn poll_interval(&self) -> u64 {
        self.poll_interval_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_provider(base_url: String) -> ThinqProvider {
        ThinqProvider::with_base_url(
            "user@example.com".to_string(),
            "hunter2".to_string(),
            "EU".to_string(),
            base_url,
        )
    }

    fn current_record() -> CredentialRecord {
        CredentialRecord {
            access_token: "old_token".to_string(),
            refresh_token: Some("my_refresh".to_string()),
            expires_at: Utc::now() + Duration::seconds(30),
            auxiliary: Some(json!({ "jsession_id": "sess-1" })),
            generation: 3,
        }
    }

    #[tokio::test]
    async fn test_authenticate_captures_session_cookie() {
        let mut server = mockito::Server::new_async().await;
        let login = server
            .mock("POST", "/member/login")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsessionId":"sess-42"}"#)
            .create_async()
            .await;
        let token = server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"at-1","refresh_token":"rt-1","expires_in":3600}"#)
            .create_async()
            .await;

        let provider = make_provider(server.url());
        let record = provider.authenticate().await.unwrap();

        assert_eq!(record.access_token, "at-1");
        assert_eq!(record.refresh_token, Some("rt-1".to_string()));
        assert!(record.expires_at > Utc::now() + Duration::seconds(3000));
        assert_eq!(record.auxiliary.unwrap()["jsession_id"], "sess-42");

        login.assert_async().await;
        token.assert_async().await;
    }

    #[tokio::test]
    async fn test_authenticate_rejected_login() {
        let mut server = mockito::Server::new_async().await;
        let login = server
            .mock("POST", "/member/login")
            .with_status(401)
            .with_body(r#"{"error":"invalid_credentials"}"#)
            .create_async()
            .await;

        let provider = make_provider(server.url());
        let result = provider.authenticate().await;

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("401"));
        login.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_carries_session_state_forward() {
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"at-2","expires_in":3600}"#)
            .create_async()
            .await;

        let provider = make_provider(server.url());
        let record = provider.refresh(&current_record()).await.unwrap();

        assert_eq!(record.access_token, "at-2");
        // Session cookie preserved across refresh
        assert_eq!(record.auxiliary.unwrap()["jsession_id"], "sess-1");
        token.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_without_token_fails_without_http() {
        // No mock server: the call must fail before any request is sent.
        let provider = make_provider("http://127.0.0.1:1".to_string());
        let mut record = current_record();
        record.refresh_token = None;

        let err = provider.refresh(&record).await.unwrap_err();
        assert!(err.to_string().contains("no refresh token"));
    }

    #[tokio::test]
    async fn test_refresh_rejected() {
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("POST", "/oauth/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let provider = make_provider(server.url());
        let result = provider.refresh(&current_record()).await;

        assert!(result.is_err());
        token.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_devices() {
        let mut server = mockito::Server::new_async().await;
        let devices = server
            .mock("GET", "/service/devices")
            .match_header("authorization", "Bearer at-1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"devices":[
                    {"deviceId":"d1","alias":"Washer","deviceType":"washer","isOn":true},
                    {"deviceId":"d2","alias":"Fridge","deviceType":"fridge","isOn":false,"currentPower":42.5}
                ]}"#,
            )
            .create_async()
            .await;

        let integration = ThinqIntegration::with_base_url(300, server.url());
        let data = integration.fetch("at-1").await.unwrap();

        assert_eq!(data["device_count"], 2);
        assert_eq!(data["devices"][0]["alias"], "Washer");
        assert_eq!(data["devices"][1]["currentPower"], 42.5);
        devices.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_maps_401_to_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/service/devices")
            .with_status(401)
            .with_body(r#"{"error":"token_expired"}"#)
            .create_async()
            .await;

        let integration = ThinqIntegration::with_base_url(300, server.url());
        let err = integration.fetch("stale").await.unwrap_err();

        assert!(matches!(err, FetchError::Unauthorized));
    }
}
