use anyhow::{Context, Result};
use beacon::config::load_config;
use beacon::credential::{CredentialManager, CredentialStore};
use integration_runner::api::{create_router, ApiState, StatusMap};
use integration_runner::client::IntegrationClient;
use integration_runner::integration::SnapshotStore;
use integration_runner::providers;
use integration_runner::scheduler::IntegrationScheduler;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "integration_runner=info,beacon=info".into()),
        )
        .init();

    info!("Integration Runner starting...");

    let config_path =
        std::env::var("BEACON_CONFIG").unwrap_or_else(|_| "beacon.toml".to_string());
    let config = load_config(&config_path)?;

    info!(
        config_path = %config_path,
        account_count = config.accounts.len(),
        api_port = config.server.api_port,
        "Configuration loaded"
    );

    // Credential core: constructed once at startup, injected everywhere.
    // Process restart clears all cached credentials by design.
    let store = Arc::new(CredentialStore::new());
    let manager = Arc::new(CredentialManager::new(
        Arc::clone(&store),
        config.credentials.operation_timeout(),
    ));
    let snapshots = Arc::new(SnapshotStore::new());
    let statuses: StatusMap = Arc::new(tokio::sync::Mutex::new(HashMap::new()));

    // Start one scheduler per configured account
    let mut scheduler_handles = Vec::new();
    for account in &config.accounts {
        let key = match account.account_key() {
            Ok(key) => key,
            Err(e) => {
                warn!(provider = %account.provider, error = %e, "Skipping misconfigured account");
                continue;
            }
        };

        let bundle = match providers::build(account) {
            Ok(bundle) => bundle,
            Err(e) => {
                warn!(account = %key, error = %e, "Skipping account");
                continue;
            }
        };

        let client = IntegrationClient::new(
            Arc::clone(&manager),
            key.clone(),
            bundle.authenticator,
            bundle.refresher,
            config.credentials.refresh_buffer(),
        );
        let scheduler = IntegrationScheduler::new(client, bundle.integration, Arc::clone(&snapshots));

        statuses
            .lock()
            .await
            .insert(key.to_string(), scheduler.status());
        scheduler_handles.push(scheduler.start());

        info!(account = %key, "Integration scheduler started");
    }

    if scheduler_handles.is_empty() {
        warn!("No integration accounts configured");
    }

    // Start status API server
    let api_state = ApiState {
        statuses: Arc::clone(&statuses),
        snapshots: Arc::clone(&snapshots),
        metrics: manager.metrics().clone(),
    };
    let router = create_router(api_state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.server.api_port))
        .await
        .context("Failed to bind status API port")?;
    info!(port = config.server.api_port, "Status API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Status API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    // Graceful shutdown
    server_handle.abort();
    for handle in scheduler_handles {
        handle.abort();
    }
    info!("Integration runner stopped");

    Ok(())
}
