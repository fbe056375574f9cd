//! Observability counters for the credential lifecycle.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Tracks credential lifecycle activity across all accounts.
///
/// Cheap to clone - clones share the same counters.
#[derive(Clone)]
pub struct CredentialMetrics {
    /// Acquire calls served straight from the cache (no I/O)
    cache_hits: Arc<AtomicU64>,

    /// Refresh attempts started
    refreshes: Arc<AtomicU64>,

    /// Refresh attempts that failed (fell back to authentication)
    refresh_failures: Arc<AtomicU64>,

    /// Full authentication attempts started
    authentications: Arc<AtomicU64>,

    /// Authentication attempts that failed (terminal for the acquire)
    auth_failures: Arc<AtomicU64>,

    /// Callers that queued behind another caller's in-flight operation
    collapsed_waits: Arc<AtomicU64>,

    /// Explicit invalidations (provider rejected a cached token)
    invalidations: Arc<AtomicU64>,
}

impl CredentialMetrics {
    /// Create a new tracker with all counters at zero.
    pub fn new() -> Self {
        Self {
            cache_hits: Arc::new(AtomicU64::new(0)),
            refreshes: Arc::new(AtomicU64::new(0)),
            refresh_failures: Arc::new(AtomicU64::new(0)),
            authentications: Arc::new(AtomicU64::new(0)),
            auth_failures: Arc::new(AtomicU64::new(0)),
            collapsed_waits: Arc::new(AtomicU64::new(0)),
            invalidations: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh_failure(&self) {
        self.refresh_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_authentication(&self) {
        self.authentications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_collapsed_wait(&self) {
        self.collapsed_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all counters.
    pub fn snapshot(&self) -> CredentialMetricsSnapshot {
        CredentialMetricsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            authentications: self.authentications.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            collapsed_waits: self.collapsed_waits.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

impl Default for CredentialMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of credential metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialMetricsSnapshot {
    pub cache_hits: u64,
    pub refreshes: u64,
    pub refresh_failures: u64,
    pub authentications: u64,
    pub auth_failures: u64,
    pub collapsed_waits: u64,
    pub invalidations: u64,
}
