//! Provider strategy interfaces.
//!
//! Each integration supplies these as pure strategy objects constructed from
//! its own configuration. The manager treats them as opaque functions: it
//! imposes no retry or backoff policy beyond the one-level
//! refresh-then-authenticate fallback.

use super::CredentialRecord;
use anyhow::Result;
use async_trait::async_trait;

/// Performs a full primary login against a provider.
///
/// Implementations run whatever multi-step flow the provider requires (e.g.,
/// a session bootstrap followed by a token exchange) and return a
/// fully-populated record.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self) -> Result<CredentialRecord>;
}

/// Exchanges a refresh token for a new access token.
///
/// Implementations return an error when the provider has no refresh
/// capability (or the current record carries no refresh token), so the
/// manager always falls back to [`Authenticator::authenticate`].
#[async_trait]
pub trait Refresher: Send + Sync {
    async fn refresh(&self, current: &CredentialRecord) -> Result<CredentialRecord>;
}
