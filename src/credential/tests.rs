//! Lifecycle tests: single-flight collapse, proactive refresh, fallback
//! ordering, invalidation, and timeout behavior.

use super::store::RefreshClaim;
use super::*;
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a scripted strategy does when invoked.
#[derive(Clone)]
enum Script {
    Succeed {
        token: String,
        expires_in_secs: i64,
        refresh_token: Option<String>,
    },
    Fail(String),
    Hang,
}

impl Script {
    fn succeed(token: &str, expires_in_secs: i64, refresh_token: Option<&str>) -> Self {
        Script::Succeed {
            token: token.to_string(),
            expires_in_secs,
            refresh_token: refresh_token.map(|t| t.to_string()),
        }
    }
}

struct ScriptedAuthenticator {
    calls: AtomicU64,
    delay: Duration,
    script: Mutex<Script>,
}

impl ScriptedAuthenticator {
    fn new(script: Script) -> Self {
        Self {
            calls: AtomicU64::new(0),
            delay: Duration::ZERO,
            script: Mutex::new(script),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for ScriptedAuthenticator {
    async fn authenticate(&self) -> Result<CredentialRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().unwrap().clone();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        run_script(script).await
    }
}

struct ScriptedRefresher {
    calls: AtomicU64,
    delay: Duration,
    script: Mutex<Script>,
}

impl ScriptedRefresher {
    fn new(script: Script) -> Self {
        Self {
            calls: AtomicU64::new(0),
            delay: Duration::ZERO,
            script: Mutex::new(script),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Refresher for ScriptedRefresher {
    async fn refresh(&self, _current: &CredentialRecord) -> Result<CredentialRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().unwrap().clone();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        run_script(script).await
    }
}

async fn run_script(script: Script) -> Result<CredentialRecord> {
    match script {
        Script::Succeed {
            token,
            expires_in_secs,
            refresh_token,
        } => Ok(record(&token, expires_in_secs, refresh_token.as_deref())),
        Script::Fail(reason) => bail!("{}", reason),
        Script::Hang => {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }
}

fn record(token: &str, expires_in_secs: i64, refresh_token: Option<&str>) -> CredentialRecord {
    CredentialRecord {
        access_token: token.to_string(),
        refresh_token: refresh_token.map(|t| t.to_string()),
        expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
        auxiliary: None,
        generation: 0,
    }
}

fn key() -> AccountKey {
    AccountKey::derive("thinq", "user@example.com", Some("EU")).unwrap()
}

fn buffer() -> chrono::Duration {
    chrono::Duration::seconds(300)
}

fn make_manager(store: &Arc<CredentialStore>) -> Arc<CredentialManager> {
    Arc::new(CredentialManager::new(
        Arc::clone(store),
        Duration::from_secs(5),
    ))
}

/// Seeds the store directly, bypassing the strategies.
fn seed(store: &CredentialStore, key: &AccountKey, record: CredentialRecord) {
    match store.begin_refresh(key) {
        RefreshClaim::Owner(permit) => {
            permit.commit(record).unwrap();
        }
        RefreshClaim::Waiter(_) => panic!("refresh already in flight"),
    }
}

// --- account keys ---

#[test]
fn test_account_key_derivation() {
    let key = AccountKey::derive("workspace", "admin@example.com", None).unwrap();
    assert_eq!(key.to_string(), "workspace:admin@example.com");

    let key = AccountKey::derive("thinq", "user@example.com", Some("EU")).unwrap();
    assert_eq!(key.to_string(), "thinq:user@example.com@EU");
}

#[test]
fn test_account_key_rejects_missing_configuration() {
    assert!(matches!(
        AccountKey::derive("", "user", None),
        Err(AcquireError::InvalidAccountKey(_))
    ));
    assert!(matches!(
        AccountKey::derive("thinq", "  ", None),
        Err(AcquireError::InvalidAccountKey(_))
    ));
}

#[test]
fn test_error_display_is_stable_diagnostic() {
    let err = AcquireError::AuthenticationFailed("status 401".to_string());
    assert!(err.to_string().contains("check account settings"));
}

// --- cache behavior ---

#[tokio::test]
async fn test_fresh_cached_token_served_without_io() {
    let store = Arc::new(CredentialStore::new());
    let manager = make_manager(&store);
    let auth = ScriptedAuthenticator::new(Script::Fail("must not be called".to_string()));
    let refresher = ScriptedRefresher::new(Script::Fail("must not be called".to_string()));
    let key = key();

    seed(&store, &key, record("t1", 3600, Some("r1")));

    let token = manager
        .acquire(&key, &auth, Some(&refresher), buffer())
        .await
        .unwrap();

    assert_eq!(token, "t1");
    assert_eq!(auth.calls(), 0);
    assert_eq!(refresher.calls(), 0);
    assert_eq!(manager.metrics().snapshot().cache_hits, 1);
}

#[tokio::test]
async fn test_empty_cache_authenticates_once() {
    let store = Arc::new(CredentialStore::new());
    let manager = make_manager(&store);
    let auth = ScriptedAuthenticator::new(Script::succeed("t1", 3600, Some("r1")));
    let key = key();

    let token = manager.acquire(&key, &auth, None, buffer()).await.unwrap();
    assert_eq!(token, "t1");
    assert_eq!(auth.calls(), 1);

    // Second acquire is a pure cache hit.
    let token = manager.acquire(&key, &auth, None, buffer()).await.unwrap();
    assert_eq!(token, "t1");
    assert_eq!(auth.calls(), 1);
}

// --- proactive refresh ---

#[tokio::test]
async fn test_token_within_buffer_triggers_single_refresh() {
    let store = Arc::new(CredentialStore::new());
    let manager = make_manager(&store);
    let auth = ScriptedAuthenticator::new(Script::Fail("must not be called".to_string()));
    let refresher = ScriptedRefresher::new(Script::succeed("t2", 3600, None));
    let key = key();

    // Within the 300s buffer.
    seed(&store, &key, record("t1", 100, Some("r1")));

    let token = manager
        .acquire(&key, &auth, Some(&refresher), buffer())
        .await
        .unwrap();

    assert_eq!(token, "t2");
    assert_eq!(refresher.calls(), 1);
    assert_eq!(auth.calls(), 0);

    // Provider omitted the refresh token: the old one is carried over.
    let stored = store.get(&key).unwrap();
    assert_eq!(stored.refresh_token, Some("r1".to_string()));

    // Refreshed token now serves from cache.
    let token = manager
        .acquire(&key, &auth, Some(&refresher), buffer())
        .await
        .unwrap();
    assert_eq!(token, "t2");
    assert_eq!(refresher.calls(), 1);
}

#[tokio::test]
async fn test_expiry_timeline_end_to_end() {
    let store = Arc::new(CredentialStore::new());
    let manager = make_manager(&store);
    let auth = ScriptedAuthenticator::new(Script::succeed("t1", 3600, Some("r1")));
    let refresher = ScriptedRefresher::new(Script::succeed("t2", 3600, Some("r2")));
    let key = key();

    // t=0: first acquire authenticates.
    let token = manager
        .acquire(&key, &auth, Some(&refresher), buffer())
        .await
        .unwrap();
    assert_eq!(token, "t1");
    assert_eq!((auth.calls(), refresher.calls()), (1, 0));

    // t=10: still fresh, zero network calls.
    let token = manager
        .acquire(&key, &auth, Some(&refresher), buffer())
        .await
        .unwrap();
    assert_eq!(token, "t1");
    assert_eq!((auth.calls(), refresher.calls()), (1, 0));

    // t=3310: inside the refresh buffer. Emulated by re-seeding the same
    // token with its remaining validity under the buffer.
    seed(&store, &key, record("t1", 290, Some("r1")));
    let token = manager
        .acquire(&key, &auth, Some(&refresher), buffer())
        .await
        .unwrap();
    assert_eq!(token, "t2");
    assert_eq!((auth.calls(), refresher.calls()), (1, 1));

    // t=3320: the refreshed token serves from cache.
    let token = manager
        .acquire(&key, &auth, Some(&refresher), buffer())
        .await
        .unwrap();
    assert_eq!(token, "t2");
    assert_eq!((auth.calls(), refresher.calls()), (1, 1));
}

// --- fallback ordering ---

#[tokio::test]
async fn test_refresh_failure_falls_back_to_authentication() {
    let store = Arc::new(CredentialStore::new());
    let manager = make_manager(&store);
    let auth = ScriptedAuthenticator::new(Script::succeed("t2", 3600, Some("r2")));
    let refresher = ScriptedRefresher::new(Script::Fail("refresh token revoked".to_string()));
    let key = key();

    seed(&store, &key, record("t1", 100, Some("r1")));

    let token = manager
        .acquire(&key, &auth, Some(&refresher), buffer())
        .await
        .unwrap();

    assert_eq!(token, "t2");
    assert_eq!(refresher.calls(), 1);
    assert_eq!(auth.calls(), 1);

    let snapshot = manager.metrics().snapshot();
    assert_eq!(snapshot.refresh_failures, 1);
    assert_eq!(snapshot.auth_failures, 0);
}

#[tokio::test]
async fn test_missing_refresh_token_skips_refresher() {
    let store = Arc::new(CredentialStore::new());
    let manager = make_manager(&store);
    let auth = ScriptedAuthenticator::new(Script::succeed("t2", 3600, None));
    let refresher = ScriptedRefresher::new(Script::Fail("must not be called".to_string()));
    let key = key();

    seed(&store, &key, record("t1", 100, None));

    let token = manager
        .acquire(&key, &auth, Some(&refresher), buffer())
        .await
        .unwrap();

    assert_eq!(token, "t2");
    assert_eq!(refresher.calls(), 0);
    assert_eq!(auth.calls(), 1);
}

#[tokio::test]
async fn test_refresh_timeout_falls_back_to_authentication() {
    let store = Arc::new(CredentialStore::new());
    let manager = Arc::new(CredentialManager::new(
        Arc::clone(&store),
        Duration::from_millis(50),
    ));
    let auth = ScriptedAuthenticator::new(Script::succeed("t2", 3600, Some("r2")));
    let refresher = ScriptedRefresher::new(Script::Hang);
    let key = key();

    seed(&store, &key, record("t1", 100, Some("r1")));

    let token = manager
        .acquire(&key, &auth, Some(&refresher), buffer())
        .await
        .unwrap();

    assert_eq!(token, "t2");
    assert_eq!(refresher.calls(), 1);
    assert_eq!(auth.calls(), 1);
}

// --- failure propagation ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_authentication_failure_propagates_to_all_waiters() {
    let store = Arc::new(CredentialStore::new());
    let manager = make_manager(&store);
    let auth = Arc::new(
        ScriptedAuthenticator::new(Script::Fail("bad password".to_string()))
            .with_delay(Duration::from_millis(100)),
    );
    let key = key();

    let tasks: Vec<_> = (0..5)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let auth = Arc::clone(&auth);
            let key = key.clone();
            tokio::spawn(async move { manager.acquire(&key, auth.as_ref(), None, buffer()).await })
        })
        .collect();

    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(auth.calls(), 1, "one failure must serve all waiters");
    let first = results[0].clone().unwrap_err();
    assert!(matches!(first, AcquireError::AuthenticationFailed(_)));
    for result in &results {
        assert_eq!(result.as_ref().unwrap_err(), &first);
    }

    // The in-flight marker is cleared: a later acquire retries and succeeds.
    auth.set_script(Script::succeed("t1", 3600, None));
    let token = manager
        .acquire(&key, auth.as_ref(), None, buffer())
        .await
        .unwrap();
    assert_eq!(token, "t1");
    assert_eq!(auth.calls(), 2);
}

#[tokio::test]
async fn test_authentication_timeout_clears_marker() {
    let store = Arc::new(CredentialStore::new());
    let manager = Arc::new(CredentialManager::new(
        Arc::clone(&store),
        Duration::from_millis(50),
    ));
    let auth = ScriptedAuthenticator::new(Script::Hang);
    let key = key();

    let err = manager
        .acquire(&key, &auth, None, buffer())
        .await
        .unwrap_err();
    assert!(matches!(err, AcquireError::Timeout(_)));

    auth.set_script(Script::succeed("t1", 3600, None));
    let token = manager.acquire(&key, &auth, None, buffer()).await.unwrap();
    assert_eq!(token, "t1");
}

// --- concurrency ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquires_collapse_to_one_authentication() {
    let store = Arc::new(CredentialStore::new());
    let manager = make_manager(&store);
    let auth = Arc::new(
        ScriptedAuthenticator::new(Script::succeed("t1", 3600, Some("r1")))
            .with_delay(Duration::from_millis(50)),
    );
    let key = key();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let auth = Arc::clone(&auth);
            let key = key.clone();
            tokio::spawn(async move { manager.acquire(&key, auth.as_ref(), None, buffer()).await })
        })
        .collect();

    for result in join_all(tasks).await {
        assert_eq!(result.unwrap().unwrap(), "t1");
    }
    assert_eq!(auth.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_refresh_collapses_to_one_call() {
    let store = Arc::new(CredentialStore::new());
    let manager = make_manager(&store);
    let auth = Arc::new(ScriptedAuthenticator::new(Script::Fail(
        "must not be called".to_string(),
    )));
    let refresher = Arc::new(
        ScriptedRefresher::new(Script::succeed("t2", 3600, None))
            .with_delay(Duration::from_millis(50)),
    );
    let key = key();

    seed(&store, &key, record("t1", 100, Some("r1")));

    let tasks: Vec<_> = (0..6)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let auth = Arc::clone(&auth);
            let refresher = Arc::clone(&refresher);
            let key = key.clone();
            tokio::spawn(async move {
                manager
                    .acquire(&key, auth.as_ref(), Some(refresher.as_ref()), buffer())
                    .await
            })
        })
        .collect();

    for result in join_all(tasks).await {
        assert_eq!(result.unwrap().unwrap(), "t2");
    }
    assert_eq!(refresher.calls(), 1);
    assert_eq!(auth.calls(), 0);
}

// --- invalidation ---

#[tokio::test]
async fn test_invalidate_forces_fresh_cycle() {
    let store = Arc::new(CredentialStore::new());
    let manager = make_manager(&store);
    let auth = ScriptedAuthenticator::new(Script::succeed("t1", 3600, None));
    let key = key();

    let token = manager.acquire(&key, &auth, None, buffer()).await.unwrap();
    assert_eq!(token, "t1");
    assert_eq!(auth.calls(), 1);

    manager.invalidate(&key);
    auth.set_script(Script::succeed("t2", 3600, None));

    // The invalidated token is never returned again.
    let token = manager.acquire(&key, &auth, None, buffer()).await.unwrap();
    assert_eq!(token, "t2");
    assert_eq!(auth.calls(), 2);
    assert_eq!(manager.metrics().snapshot().invalidations, 1);
}

#[tokio::test]
async fn test_generation_increases_across_lifecycle() {
    let store = Arc::new(CredentialStore::new());
    let manager = make_manager(&store);
    let auth = ScriptedAuthenticator::new(Script::succeed("t1", 3600, Some("r1")));
    let refresher = ScriptedRefresher::new(Script::succeed("t2", 3600, None));
    let key = key();

    manager
        .acquire(&key, &auth, Some(&refresher), buffer())
        .await
        .unwrap();
    let first = store.get(&key).unwrap().generation;

    seed(&store, &key, record("t1", 100, Some("r1")));
    let second = store.get(&key).unwrap().generation;
    assert!(second > first);

    manager
        .acquire(&key, &auth, Some(&refresher), buffer())
        .await
        .unwrap();
    let third = store.get(&key).unwrap().generation;
    assert!(third > second);
}
