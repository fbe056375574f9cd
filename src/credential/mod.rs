//! Credential lifecycle management for integration accounts.
//!
//! Every integration that talks to an OAuth- or session-protected provider
//! goes through this module to obtain a bearer token. The manager caches one
//! credential per account, proactively refreshes it before expiry, and
//! collapses concurrent callers into a single network round trip.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialManager                  │
//! │  - acquire / invalidate                  │
//! │  - refresh → authenticate fallback       │
//! │  - per-operation timeouts                │
//! └─────────────────────────────────────────┘
//!          ↓                    ↓
//! ┌──────────────────┐  ┌──────────────────────┐
//! │ CredentialStore  │  │ Authenticator /      │
//! │  - cached records│  │ Refresher strategies │
//! │  - single-flight │  │  (per provider,      │
//! │    refresh claims│  │   perform the I/O)   │
//! └──────────────────┘  └──────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use beacon::credential::{AccountKey, CredentialManager, CredentialStore};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example(authenticator: &dyn beacon::credential::Authenticator) -> Result<(), beacon::credential::AcquireError> {
//! let store = Arc::new(CredentialStore::new());
//! let manager = CredentialManager::new(store, Duration::from_secs(30));
//!
//! let key = AccountKey::derive("thinq", "user@example.com", Some("EU"))?;
//! let token = manager
//!     .acquire(&key, authenticator, None, chrono::Duration::seconds(300))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency contract
//!
//! - At most one authenticate-or-refresh operation is in flight per account;
//!   all other callers block on that operation's outcome.
//! - No store lock is held across network I/O - the in-flight marker is an
//!   ownership token, not a mutex held during the HTTP call.
//! - Records are swapped wholesale; `generation` increases on every commit
//!   and a superseded owner's result is discarded, never written.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

mod manager;
mod metrics;
mod provider;
mod store;

pub use manager::CredentialManager;
pub use metrics::{CredentialMetrics, CredentialMetricsSnapshot};
pub use provider::{Authenticator, Refresher};
pub use store::{CommitError, CredentialStore, RefreshClaim, RefreshPermit, RefreshWait};

#[cfg(test)]
mod tests;

/// Stable identifier for one authenticated identity at one provider.
///
/// Used as the cache index in the [`CredentialStore`]. Construction goes
/// through [`AccountKey::derive`] so an empty provider or account name is
/// rejected up front instead of producing a colliding key.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize)]
pub struct AccountKey {
    provider: String,
    account: String,
    region: Option<String>,
}

impl AccountKey {
    /// Derives a key from integration configuration.
    ///
    /// Fails fast with [`AcquireError::InvalidAccountKey`] when the provider
    /// or account name is empty (missing configuration is a programming
    /// error, not a runtime condition to retry).
    pub fn derive(
        provider: &str,
        account: &str,
        region: Option<&str>,
    ) -> Result<Self, AcquireError> {
        if provider.trim().is_empty() {
            return Err(AcquireError::InvalidAccountKey(
                "provider name is empty".to_string(),
            ));
        }
        if account.trim().is_empty() {
            return Err(AcquireError::InvalidAccountKey(
                "account name is empty".to_string(),
            ));
        }
        Ok(Self {
            provider: provider.to_string(),
            account: account.to_string(),
            region: region.map(|r| r.to_string()),
        })
    }

    /// Provider part of the key (e.g., "thinq").
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Account part of the key (e.g., a username or email).
    pub fn account(&self) -> &str {
        &self.account
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.region {
            Some(region) => write!(f, "{}:{}@{}", self.provider, self.account, region),
            None => write!(f, "{}:{}", self.provider, self.account),
        }
    }
}

/// One cached credential for an account.
///
/// Replaced wholesale on every successful refresh or re-authentication -
/// never mutated field-by-field, so concurrent readers always observe a
/// consistent record.
#[derive(Clone, Debug, Serialize)]
pub struct CredentialRecord {
    /// Bearer token attached to outbound API requests.
    pub access_token: String,

    /// Longer-lived token used to obtain new access tokens (absent for
    /// providers without refresh support).
    pub refresh_token: Option<String>,

    /// When the access token expires (UTC).
    pub expires_at: DateTime<Utc>,

    /// Opaque provider-specific extra state (e.g., a session cookie captured
    /// during pre-login). The manager never interprets it.
    pub auxiliary: Option<serde_json::Value>,

    /// Monotonic write counter, assigned by the store on commit. Strategy
    /// implementations leave this at 0.
    pub generation: u64,
}

impl CredentialRecord {
    /// True if the record will remain valid for longer than `buffer`.
    pub fn fresh_for(&self, buffer: chrono::Duration) -> bool {
        self.expires_at - Utc::now() > buffer
    }
}

/// Errors surfaced by [`CredentialManager::acquire`].
///
/// Cloneable so one owner failure can be delivered verbatim to every caller
/// queued behind the in-flight operation.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquireError {
    /// Primary login rejected. Terminal for the current acquire call.
    AuthenticationFailed(String),
    /// Refresh token rejected, expired, or the refresh owner vanished.
    /// Inside the manager this triggers the authenticate fallback; callers
    /// only see it when no fallback result is available.
    RefreshFailed(String),
    /// A bounded authenticate/refresh call exceeded its deadline (seconds).
    Timeout(u64),
    /// Missing or malformed account configuration. Fails fast, not retried.
    InvalidAccountKey(String),
}

impl fmt::Display for AcquireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquireError::AuthenticationFailed(reason) => {
                write!(f, "invalid credentials - check account settings ({})", reason)
            }
            AcquireError::RefreshFailed(reason) => write!(f, "token refresh failed: {}", reason),
            AcquireError::Timeout(secs) => {
                write!(f, "credential operation timed out after {}s", secs)
            }
            AcquireError::InvalidAccountKey(reason) => {
                write!(f, "invalid account key: {}", reason)
            }
        }
    }
}

impl std::error::Error for AcquireError {}
