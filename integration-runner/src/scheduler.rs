//! Per-integration polling scheduler.
//!
//! Each configured account gets its own scheduler task that polls on an
//! interval, stores the resulting widget snapshot, and tracks status. Token
//! refresh is not scheduled here - it happens inside the credential acquire
//! on the request path, so a scheduler never polls with an expired token.

use crate::client::IntegrationClient;
use crate::integration::{Integration, SnapshotStore, WidgetSnapshot};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info};

/// Status information for one integration account.
#[derive(Clone, Debug, Default)]
pub struct IntegrationStatus {
    /// Last successful poll timestamp
    pub last_poll: Option<DateTime<Utc>>,
    /// Last error message (if any)
    pub last_error: Option<String>,
    /// Total number of successful polls
    pub poll_count: u64,
    /// Total number of errors
    pub error_count: u64,
}

/// Polls one integration account on a fixed interval.
pub struct IntegrationScheduler {
    client: IntegrationClient,
    integration: Arc<dyn Integration>,
    snapshots: Arc<SnapshotStore>,
    status: Arc<tokio::sync::Mutex<IntegrationStatus>>,
}

impl IntegrationScheduler {
    pub fn new(
        client: IntegrationClient,
        integration: Arc<dyn Integration>,
        snapshots: Arc<SnapshotStore>,
    ) -> Self {
        Self {
            client,
            integration,
            snapshots,
            status: Arc::new(tokio::sync::Mutex::new(IntegrationStatus::default())),
        }
    }

    /// Returns a clone of the status tracker for external monitoring.
    pub fn status(&self) -> Arc<tokio::sync::Mutex<IntegrationStatus>> {
        Arc::clone(&self.status)
    }

    /// Starts the polling loop (non-blocking).
    ///
    /// Returns a JoinHandle that can be used for graceful shutdown. A failed
    /// poll is recorded and waited out - the next attempt happens on the
    /// next natural tick, never as an immediate retry.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        let poll_interval_secs = self.integration.poll_interval();
        let integration_name = self.integration.name().to_string();
        let account = self.client.account_key().to_string();

        tokio::spawn(async move {
            info!(
                account = %account,
                integration = %integration_name,
                interval_secs = poll_interval_secs,
                "Starting integration scheduler"
            );

            let mut interval = interval(Duration::from_secs(poll_interval_secs));
            let scheduler = self;

            loop {
                interval.tick().await;

                debug!(
                    account = %account,
                    integration = %integration_name,
                    "Polling integration"
                );

                match scheduler.client.fetch(scheduler.integration.as_ref()).await {
                    Ok(data) => {
                        scheduler.snapshots.insert(WidgetSnapshot {
                            integration: integration_name.clone(),
                            account: account.clone(),
                            captured_at: Utc::now(),
                            data,
                        });

                        let mut status = scheduler.status.lock().await;
                        status.last_poll = Some(Utc::now());
                        status.last_error = None;
                        status.poll_count += 1;
                    }
                    Err(e) => {
                        let message = format!("{:#}", e);
                        error!(
                            account = %account,
                            integration = %integration_name,
                            error = %message,
                            "Integration poll failed"
                        );

                        let mut status = scheduler.status.lock().await;
                        status.last_error = Some(message);
                        status.error_count += 1;
                    }
                }
            }
        })
    }
}
