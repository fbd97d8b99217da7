//! Fingerprint-keyed result cache
//!
//! Results are kept for a fixed time after they are written and then removed by
//! a one-shot timer task, whether or not anyone reads them. There is no size
//! bound and no refresh on hit.
//!
//! Each key owns a slot holding a [`OnceCell`]. A caller that misses claims the
//! slot before computing, so concurrent callers for the same key wait on the
//! same cell instead of computing the result again. An empty slot lives only as
//! long as somebody holds a claim on it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::{OnceCell, RwLock};
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use crate::types::ExecutionResult;

/// Shared cell a cached result is computed into
pub type ResultCell = OnceCell<Arc<ExecutionResult>>;

/// Cache key: SHA-256 over the language, version and source code
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(language: &str, version: &str, code: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        // length prefixes keep ("ab", "c") and ("a", "bc") apart
        for part in [language.as_bytes(), version.as_bytes(), code] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        Self(hex::encode(hasher.finalize()))
    }

    /// Lowercase hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct Slot {
    cell: Arc<ResultCell>,
    /// Set once the cell is filled and its expiry is scheduled
    eviction: Option<AbortHandle>,
}

impl Slot {
    fn cancel_eviction(&self) {
        if let Some(handle) = &self.eviction {
            handle.abort();
        }
    }
}

type Entries = RwLock<HashMap<Fingerprint, Slot>>;

/// Process-local result cache with absolute TTL eviction
///
/// Cloning shares the underlying map.
#[derive(Clone)]
pub struct FingerprintCache {
    entries: Arc<Entries>,
    ttl: Duration,
}

impl FingerprintCache {
    /// Create a cache whose entries live for `ttl` after being written
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a completed result
    pub async fn get(&self, key: &Fingerprint) -> Option<Arc<ExecutionResult>> {
        let entries = self.entries.read().await;
        entries.get(key).and_then(|slot| slot.cell.get().cloned())
    }

    /// Store `result` under `key` and schedule its removal after `ttl`
    ///
    /// Replaces whatever the key held before, cancelling its pending eviction.
    pub async fn put(&self, key: Fingerprint, result: Arc<ExecutionResult>, ttl: Duration) {
        let cell = Arc::new(OnceCell::new_with(Some(result)));
        let eviction = self.spawn_eviction(key.clone(), Arc::clone(&cell), ttl);

        let mut entries = self.entries.write().await;
        let previous = entries.insert(
            key,
            Slot {
                cell,
                eviction: Some(eviction),
            },
        );
        if let Some(previous) = previous {
            previous.cancel_eviction();
        }
    }

    /// Claim the in-flight slot for `key`, installing an empty one if there is none
    ///
    /// Every caller for the same key shares one cell; the first to run
    /// [`InFlight::fill`] computes the result and the others wait for it.
    pub async fn claim(&self, key: &Fingerprint) -> InFlight {
        let existing = self
            .entries
            .read()
            .await
            .get(key)
            .map(|slot| Arc::clone(&slot.cell));
        let cell = match existing {
            Some(cell) => cell,
            None => {
                let mut entries = self.entries.write().await;
                let slot = entries.entry(key.clone()).or_insert_with(|| {
                    trace!(%key, "installing in-flight slot");
                    Slot {
                        cell: Arc::new(OnceCell::new()),
                        eviction: None,
                    }
                });
                Arc::clone(&slot.cell)
            }
        };

        InFlight {
            cache: self.clone(),
            key: key.clone(),
            cell: Some(cell),
            pending: true,
        }
    }

    /// Bring the slot for `key` to rest once a claimant has let go of it
    ///
    /// A filled cell gets its expiry scheduled, once; the timer starts when the
    /// result is written. An empty cell is removed when no claimant holds it
    /// any more, so a failed or abandoned computation leaves nothing behind
    /// while another caller may still be retrying it.
    async fn settle(&self, key: &Fingerprint) {
        let mut entries = self.entries.write().await;
        let Some(slot) = entries.get_mut(key) else {
            return;
        };
        if slot.cell.initialized() {
            if slot.eviction.is_none() {
                let cell = Arc::clone(&slot.cell);
                slot.eviction = Some(self.spawn_eviction(key.clone(), cell, self.ttl));
                debug!(%key, ttl = ?self.ttl, "cached result");
            }
        } else if Arc::strong_count(&slot.cell) == 1 {
            entries.remove(key);
            trace!(%key, "released empty in-flight slot");
        }
    }

    /// Remove an entry before its expiry; returns whether one was present
    pub async fn invalidate(&self, key: &Fingerprint) -> bool {
        let removed = self.entries.write().await.remove(key);
        match removed {
            Some(slot) => {
                slot.cancel_eviction();
                true
            }
            None => false,
        }
    }

    /// Remove every entry
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        for (_, slot) in entries.drain() {
            slot.cancel_eviction();
        }
    }

    /// Number of slots whose result is still being computed
    pub async fn in_flight(&self) -> usize {
        self.entries
            .read()
            .await
            .values()
            .filter(|slot| !slot.cell.initialized())
            .count()
    }

    /// Number of completed entries
    pub async fn len(&self) -> usize {
        self.entries
            .read()
            .await
            .values()
            .filter(|slot| slot.cell.initialized())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn spawn_eviction(
        &self,
        key: Fingerprint,
        cell: Arc<ResultCell>,
        ttl: Duration,
    ) -> AbortHandle {
        let entries: Weak<Entries> = Arc::downgrade(&self.entries);
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let Some(entries) = entries.upgrade() else {
                return;
            };
            let mut entries = entries.write().await;
            // a replaced entry has its own timer
            if entries
                .get(&key)
                .is_some_and(|slot| Arc::ptr_eq(&slot.cell, &cell))
            {
                entries.remove(&key);
                debug!(%key, "cache entry expired");
            }
        })
        .abort_handle()
    }
}

/// A caller's claim on an in-flight slot
///
/// The slot is settled when the claim is used up by [`InFlight::fill`] or
/// dropped, including when the caller's future is cancelled mid-computation.
pub struct InFlight {
    cache: FingerprintCache,
    key: Fingerprint,
    cell: Option<Arc<ResultCell>>,
    pending: bool,
}

impl InFlight {
    /// Return the shared result, computing it with `init` if nobody has yet
    ///
    /// When a computation fails its error goes to that caller only, and the
    /// next waiter runs its own `init`.
    pub async fn fill<F, Fut, E>(mut self, init: F) -> Result<Arc<ExecutionResult>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<ExecutionResult>, E>>,
    {
        let outcome = match &self.cell {
            Some(cell) => cell.get_or_try_init(init).await.map(Arc::clone),
            None => init().await,
        };
        // the claim must be gone before settling so it is not counted
        self.cell = None;
        self.cache.settle(&self.key).await;
        self.pending = false;
        outcome
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.cell = None;
        if !self.pending {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let cache = self.cache.clone();
        let key = self.key.clone();
        trace!(%key, "in-flight claim dropped before settling");
        runtime.spawn(async move { cache.settle(&key).await });
    }
}

impl fmt::Debug for InFlight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlight")
            .field("key", &self.key)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for FingerprintCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FingerprintCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
