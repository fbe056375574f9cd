// Credential lifecycle core (store, manager, provider strategies)
pub mod credential;

// Configuration loading
pub mod config;
