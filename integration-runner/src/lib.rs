// Status API (health, integration status, credential metrics)
pub mod api;

// Credential-aware wrapper around integration fetches
pub mod client;

// Integration trait, fetch errors, widget snapshots
pub mod integration;

// Provider strategies (authenticate/refresh/fetch per provider)
pub mod providers;

// Per-integration polling scheduler
pub mod scheduler;
