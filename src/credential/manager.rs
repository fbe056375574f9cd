//! Credential lifecycle manager.
//!
//! Decides per acquire whether to serve a cached token, trigger a refresh,
//! or trigger full authentication, and serializes concurrent callers for the
//! same account through the store's single-flight claims.

use super::store::{CommitError, CredentialStore, RefreshClaim, RefreshPermit};
use super::{
    AccountKey, AcquireError, Authenticator, CredentialMetrics, CredentialRecord, Refresher,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Shares one valid bearer credential per account across concurrent callers.
///
/// Collapsing concurrent cache-miss callers into one network round trip
/// avoids a thundering herd of simultaneous logins against providers that
/// rate-limit or invalidate sessions on concurrent logins. A failed refresh
/// falls back to a full login rather than surfacing the refresh error -
/// refresh tokens expire or get revoked independently of access tokens.
pub struct CredentialManager {
    store: Arc<CredentialStore>,
    /// Deadline applied to each authenticate/refresh strategy call.
    operation_timeout: Duration,
    metrics: CredentialMetrics,
}

impl CredentialManager {
    /// Creates a manager over a store.
    ///
    /// # Arguments
    /// * `store` - Shared credential store (one per process, injected)
    /// * `operation_timeout` - Bound on each authenticate/refresh call
    pub fn new(store: Arc<CredentialStore>, operation_timeout: Duration) -> Self {
        Self {
            store,
            operation_timeout,
            metrics: CredentialMetrics::new(),
        }
    }

    /// Returns the shared metrics tracker for external monitoring.
    pub fn metrics(&self) -> &CredentialMetrics {
        &self.metrics
    }

    /// Returns a valid access token for the account.
    ///
    /// Serves the cached token when it will outlive `refresh_buffer`,
    /// otherwise performs (or waits on) a single refresh-or-authenticate
    /// cycle. Never returns a silently expired token: when every attempt
    /// fails the caller receives an explicit [`AcquireError`].
    ///
    /// The only suspension point is waiting on another caller's in-flight
    /// operation, which is bounded by that owner's operation timeout.
    pub async fn acquire(
        &self,
        key: &AccountKey,
        authenticator: &dyn Authenticator,
        refresher: Option<&dyn Refresher>,
        refresh_buffer: chrono::Duration,
    ) -> Result<String, AcquireError> {
        loop {
            if let Some(record) = self.store.get(key) {
                if record.fresh_for(refresh_buffer) {
                    self.metrics.record_cache_hit();
                    return Ok(record.access_token);
                }
            }

            match self.store.begin_refresh(key) {
                RefreshClaim::Owner(permit) => {
                    return self
                        .run_owner(key, permit, authenticator, refresher, refresh_buffer)
                        .await;
                }
                RefreshClaim::Waiter(wait) => {
                    self.metrics.record_collapsed_wait();
                    debug!(account = %key, "waiting on in-flight credential refresh");
                    wait.wait().await?;

                    // The owner landed a record. Return it as-is: the owner
                    // just wrote what the provider issued, and re-checking
                    // the buffer here would loop on short-lived tokens.
                    if let Some(record) = self.store.get(key) {
                        return Ok(record.access_token);
                    }
                    // Record vanished (invalidated while we waited): retry.
                }
            }
        }
    }

    /// Drops the cached record, forcing the next acquire to a full miss.
    ///
    /// Called by integration clients when the provider rejects an
    /// otherwise-valid-looking cached token; the manager itself never
    /// inspects provider responses.
    pub fn invalidate(&self, key: &AccountKey) {
        self.metrics.record_invalidation();
        let had_record = self.store.invalidate(key);
        info!(account = %key, had_record, "invalidated cached credential");
    }

    /// Performs the refresh-or-authenticate cycle as the in-flight owner.
    ///
    /// Every exit path resolves the permit exactly once; if this future is
    /// cancelled or panics mid-flight the permit's drop releases the marker.
    async fn run_owner(
        &self,
        key: &AccountKey,
        permit: RefreshPermit,
        authenticator: &dyn Authenticator,
        refresher: Option<&dyn Refresher>,
        refresh_buffer: chrono::Duration,
    ) -> Result<String, AcquireError> {
        // Double-check under ownership: another owner may have landed a
        // usable record between our cache miss and claiming the refresh.
        if let Some(record) = self.store.get(key) {
            if record.fresh_for(refresh_buffer) {
                permit.release();
                self.metrics.record_cache_hit();
                return Ok(record.access_token);
            }
        }

        let cached = self.store.get(key);

        if let Some(refresher) = refresher {
            if let Some(current) = cached.as_ref().filter(|r| r.refresh_token.is_some()) {
                match self.try_refresh(key, refresher, current).await {
                    Ok(record) => return self.finish(key, permit, record, refresh_buffer),
                    Err(e) => {
                        self.metrics.record_refresh_failure();
                        warn!(
                            account = %key,
                            error = %e,
                            "token refresh failed, falling back to full authentication"
                        );
                    }
                }
            }
        }

        match self.try_authenticate(key, authenticator).await {
            Ok(record) => self.finish(key, permit, record, refresh_buffer),
            Err(e) => {
                self.metrics.record_auth_failure();
                error!(account = %key, error = %e, "authentication failed");
                permit.fail(e.clone());
                Err(e)
            }
        }
    }

    /// Invokes the refresher under the operation timeout.
    async fn try_refresh(
        &self,
        key: &AccountKey,
        refresher: &dyn Refresher,
        current: &CredentialRecord,
    ) -> Result<CredentialRecord, AcquireError> {
        self.metrics.record_refresh();
        info!(account = %key, "refreshing access token");

        match tokio::time::timeout(self.operation_timeout, refresher.refresh(current)).await {
            Ok(Ok(mut record)) => {
                // Keep the existing refresh token if the provider did not
                // rotate it.
                if record.refresh_token.is_none() {
                    record.refresh_token = current.refresh_token.clone();
                }
                Ok(record)
            }
            Ok(Err(e)) => Err(AcquireError::RefreshFailed(format!("{:#}", e))),
            Err(_) => Err(AcquireError::Timeout(self.operation_timeout.as_secs())),
        }
    }

    /// Invokes the authenticator under the operation timeout.
    async fn try_authenticate(
        &self,
        key: &AccountKey,
        authenticator: &dyn Authenticator,
    ) -> Result<CredentialRecord, AcquireError> {
        self.metrics.record_authentication();
        info!(account = %key, "performing full authentication");

        match tokio::time::timeout(self.operation_timeout, authenticator.authenticate()).await {
            Ok(Ok(record)) => Ok(record),
            Ok(Err(e)) => Err(AcquireError::AuthenticationFailed(format!("{:#}", e))),
            Err(_) => Err(AcquireError::Timeout(self.operation_timeout.as_secs())),
        }
    }

    /// Commits the owner's record and returns its token.
    fn finish(
        &self,
        key: &AccountKey,
        permit: RefreshPermit,
        record: CredentialRecord,
        refresh_buffer: chrono::Duration,
    ) -> Result<String, AcquireError> {
        match permit.commit(record) {
            Ok(stored) => {
                info!(
                    account = %key,
                    generation = stored.generation,
                    expires_at = %stored.expires_at,
                    "credential updated"
                );
                Ok(stored.access_token)
            }
            Err(CommitError::Superseded) => {
                // A newer record landed while we were in flight (the account
                // was invalidated and re-authenticated). Serve the newer
                // record if usable rather than our discarded result.
                warn!(account = %key, "discarding superseded credential refresh");
                match self.store.get(key) {
                    Some(record) if record.fresh_for(refresh_buffer) => Ok(record.access_token),
                    _ => Err(AcquireError::RefreshFailed(
                        "credential refresh superseded by a newer update".to_string(),
                    )),
                }
            }
        }
    }
}
