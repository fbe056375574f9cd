//! In-memory credential store with single-flight refresh claims.
//!
//! Maps account keys to cached credential records plus the per-account
//! in-flight refresh marker. All mutations happen in short critical sections
//! inside the concurrent map; network I/O never runs while a map entry is
//! held.

use super::{AccountKey, AcquireError, CredentialRecord};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Outcome broadcast to callers waiting on an in-flight refresh.
#[derive(Clone, Debug)]
enum RefreshOutcome {
    Pending,
    Done(Result<(), AcquireError>),
}

/// In-flight refresh marker for one account.
struct Inflight {
    /// Distinguishes this claim from earlier ones on the same account, so a
    /// superseded owner cannot commit over a newer record.
    epoch: u64,
    tx: watch::Sender<RefreshOutcome>,
}

#[derive(Default)]
struct AccountSlot {
    record: Option<CredentialRecord>,
    generation: u64,
    next_epoch: u64,
    inflight: Option<Inflight>,
}

type Slots = Arc<DashMap<AccountKey, AccountSlot>>;

/// Concurrency-safe mapping from account key to cached credential.
///
/// Store lifetime is the process lifetime: no disk persistence, no eviction
/// (cardinality is one entry per configured integration account). Constructed
/// at service startup and injected where needed - never a global singleton,
/// so test runs stay isolated.
pub struct CredentialStore {
    slots: Slots,
}

impl CredentialStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
        }
    }

    /// Non-blocking read of the current record for an account.
    pub fn get(&self, key: &AccountKey) -> Option<CredentialRecord> {
        self.slots.get(key).and_then(|slot| slot.record.clone())
    }

    /// Claims the right to refresh an account's credential.
    ///
    /// Exactly one caller per account receives [`RefreshClaim::Owner`] and
    /// becomes responsible for performing the authenticate/refresh and
    /// resolving the permit. Every other concurrent caller receives
    /// [`RefreshClaim::Waiter`] with a handle that resolves when the owner
    /// finishes.
    pub fn begin_refresh(&self, key: &AccountKey) -> RefreshClaim {
        let mut slot = self.slots.entry(key.clone()).or_default();

        if let Some(inflight) = &slot.inflight {
            return RefreshClaim::Waiter(RefreshWait {
                rx: inflight.tx.subscribe(),
            });
        }

        let (tx, _rx) = watch::channel(RefreshOutcome::Pending);
        slot.next_epoch += 1;
        let epoch = slot.next_epoch;
        slot.inflight = Some(Inflight { epoch, tx });

        debug!(account = %key, epoch, "claimed credential refresh");

        RefreshClaim::Owner(RefreshPermit {
            key: key.clone(),
            epoch,
            slots: Arc::clone(&self.slots),
            resolved: false,
        })
    }

    /// Removes the cached record so the next acquire starts from a full miss.
    ///
    /// Any in-flight refresh is cancelled: its waiters are released to retry
    /// against the cleared cache, and the now-stale owner's eventual commit
    /// is rejected by the epoch check. The generation counter is kept so it
    /// stays monotonic across the account's lifetime.
    ///
    /// Returns true if a record was present.
    pub fn invalidate(&self, key: &AccountKey) -> bool {
        let Some(mut slot) = self.slots.get_mut(key) else {
            return false;
        };

        let had_record = slot.record.take().is_some();
        if let Some(inflight) = slot.inflight.take() {
            let _ = inflight.tx.send(RefreshOutcome::Done(Ok(())));
        }
        had_record
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of [`CredentialStore::begin_refresh`].
pub enum RefreshClaim {
    /// This caller owns the refresh and must resolve the permit.
    Owner(RefreshPermit),
    /// Another caller owns the refresh; block on the handle.
    Waiter(RefreshWait),
}

/// Handle a non-owning caller blocks on until the owner finishes.
pub struct RefreshWait {
    rx: watch::Receiver<RefreshOutcome>,
}

impl RefreshWait {
    /// Waits for the owner's outcome.
    ///
    /// Bounded by the owner's own operation timeout - the owner always
    /// resolves its permit, including on panic or cancellation (see
    /// [`RefreshPermit`]'s drop behavior).
    pub async fn wait(mut self) -> Result<(), AcquireError> {
        let outcome = self
            .rx
            .wait_for(|outcome| !matches!(outcome, RefreshOutcome::Pending))
            .await;

        match outcome {
            Ok(value) => match &*value {
                RefreshOutcome::Done(result) => result.clone(),
                RefreshOutcome::Pending => unreachable!("wait_for filtered Pending"),
            },
            // Sender dropped while still pending. Cannot normally happen
            // (permit drop publishes a failure first), so surface it as a
            // retryable refresh failure.
            Err(_) => Err(AcquireError::RefreshFailed(
                "refresh owner vanished before publishing a result".to_string(),
            )),
        }
    }
}

/// Ownership token for one in-flight authenticate-or-refresh.
///
/// Must be resolved exactly once via [`commit`](Self::commit),
/// [`fail`](Self::fail), or [`release`](Self::release). Dropping an
/// unresolved permit (panic or cancelled future mid-refresh) publishes a
/// failure and clears the marker, so an account can never stay locked.
pub struct RefreshPermit {
    key: AccountKey,
    epoch: u64,
    slots: Slots,
    resolved: bool,
}

impl RefreshPermit {
    /// Atomically replaces the account's record and wakes all waiters.
    ///
    /// Bumps the generation counter and stamps it on the stored record. If
    /// this permit has been superseded (the account was invalidated and a
    /// newer claim committed in the meantime), the result is discarded and
    /// [`CommitError::Superseded`] is returned - a stale refresh must never
    /// overwrite a newer record.
    pub fn commit(mut self, record: CredentialRecord) -> Result<CredentialRecord, CommitError> {
        self.resolved = true;

        let Some(mut slot) = self.slots.get_mut(&self.key) else {
            return Err(CommitError::Superseded);
        };
        let current = slot
            .inflight
            .as_ref()
            .map(|inflight| inflight.epoch == self.epoch)
            .unwrap_or(false);
        if !current {
            return Err(CommitError::Superseded);
        }

        slot.generation += 1;
        let mut record = record;
        record.generation = slot.generation;
        slot.record = Some(record.clone());

        let inflight = slot.inflight.take().expect("checked above");
        let _ = inflight.tx.send(RefreshOutcome::Done(Ok(())));

        Ok(record)
    }

    /// Records the failure, wakes all waiters with the error, and clears the
    /// in-flight marker so a subsequent caller may retry.
    pub fn fail(mut self, err: AcquireError) {
        self.resolved = true;
        Self::resolve(&self.slots, &self.key, self.epoch, Err(err));
    }

    /// Clears the marker and wakes waiters without writing a record.
    ///
    /// Used when the owner discovers a usable record already landed between
    /// its cache miss and claiming the refresh.
    pub fn release(mut self) {
        self.resolved = true;
        Self::resolve(&self.slots, &self.key, self.epoch, Ok(()));
    }

    fn resolve(slots: &Slots, key: &AccountKey, epoch: u64, outcome: Result<(), AcquireError>) {
        let Some(mut slot) = slots.get_mut(key) else {
            return;
        };
        let current = slot
            .inflight
            .as_ref()
            .map(|inflight| inflight.epoch == epoch)
            .unwrap_or(false);
        if !current {
            // Superseded permit: a newer claim owns the marker now.
            return;
        }
        let inflight = slot.inflight.take().expect("checked above");
        let _ = inflight.tx.send(RefreshOutcome::Done(outcome));
    }
}

impl Drop for RefreshPermit {
    fn drop(&mut self) {
        if !self.resolved {
            Self::resolve(
                &self.slots,
                &self.key,
                self.epoch,
                Err(AcquireError::RefreshFailed(
                    "refresh abandoned before completion".to_string(),
                )),
            );
        }
    }
}

/// Error returned when a permit's write was discarded.
#[derive(Debug, PartialEq)]
pub enum CommitError {
    /// A newer claim replaced this permit; the caller should re-read the
    /// store instead of using its own result.
    Superseded,
}

impl fmt::Display for CommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitError::Superseded => write!(f, "credential write superseded by a newer update"),
        }
    }
}

impl std::error::Error for CommitError {}
