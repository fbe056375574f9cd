use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;

/// Integration interface for external service polls.
///
/// Integrations are stateless - credentials are managed externally by the
/// credential lifecycle manager, and the latest snapshot per account lives
/// in the [`SnapshotStore`].
///
/// # Lifecycle
/// 1. The scheduler asks the integration client for widget data
/// 2. The client acquires a valid bearer token for the account
/// 3. `fetch(token)` calls the provider API and maps the response
/// 4. The snapshot is stored and served to display widgets
#[async_trait]
pub trait Integration: Send + Sync {
    /// Returns the unique identifier for this integration.
    ///
    /// Must be lowercase alphanumeric (e.g., "thinq", "workspace").
    fn name(&self) -> &str;

    /// Fetches current widget data from the provider API.
    ///
    /// # Arguments
    /// * `access_token` - Valid bearer token for the account
    ///
    /// # Error Handling
    /// - [`FetchError::Unauthorized`] → the client invalidates the cached
    ///   credential and retries once
    /// - Other errors → surfaced to the scheduler, next attempt on the next
    ///   polling cycle
    async fn fetch(&self, access_token: &str) -> Result<serde_json::Value, FetchError>;

    /// Returns the poll interval in seconds.
    fn poll_interval(&self) -> u64;
}

/// Typed error for integration fetches.
///
/// The client only inspects the variant - an authorization rejection is the
/// signal to invalidate and retry once; everything else is passed through.
#[derive(Debug)]
pub enum FetchError {
    /// Provider rejected the bearer token (HTTP 401)
    Unauthorized,
    /// Provider returned a non-auth API error
    Api { status: u16, message: String },
    /// Transport-level failure (connect, timeout, body read)
    Transport(String),
}

impl FetchError {
    /// Maps a non-2xx provider response to the matching error kind.
    pub fn from_status(status: u16, body: String) -> Self {
        if status == 401 {
            FetchError::Unauthorized
        } else {
            FetchError::Api {
                status,
                message: body,
            }
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Unauthorized => write!(f, "provider rejected the access token"),
            FetchError::Api { status, message } => {
                write!(f, "provider API error (status {}): {}", status, message)
            }
            FetchError::Transport(reason) => write!(f, "transport error: {}", reason),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Transport(err.to_string())
    }
}

/// Latest view-model payload produced by one integration poll.
#[derive(Clone, Debug, Serialize)]
pub struct WidgetSnapshot {
    /// Integration identifier (e.g., "thinq")
    pub integration: String,
    /// Account key string the snapshot belongs to
    pub account: String,
    /// When the poll completed (UTC)
    pub captured_at: DateTime<Utc>,
    /// Mapped widget data
    pub data: serde_json::Value,
}

/// Latest snapshot per account, served to display widgets.
///
/// Process-lifetime only - a restart repopulates on the first poll cycle.
pub struct SnapshotStore {
    snapshots: DashMap<String, WidgetSnapshot>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self {
            snapshots: DashMap::new(),
        }
    }

    /// Replaces the stored snapshot for the snapshot's account.
    pub fn insert(&self, snapshot: WidgetSnapshot) {
        self.snapshots.insert(snapshot.account.clone(), snapshot);
    }

    /// Returns all snapshots, ordered by account key.
    pub fn all(&self) -> Vec<WidgetSnapshot> {
        let mut snapshots: Vec<WidgetSnapshot> =
            self.snapshots.iter().map(|s| s.value().clone()).collect();
        snapshots.sort_by(|a, b| a.account.cmp(&b.account));
        snapshots
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}
