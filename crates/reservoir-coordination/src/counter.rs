//! Distributed permit counter.
//!
//! A named integer stored as a decimal string in the key-value store. Callers
//! take permits with a bounded blocking acquire, return them with release, and
//! reset the value with a guarded forced set during reinitialization.
//!
//! Every mutation is a compare-and-swap against the exact value observed, so
//! acquire, release and forced set are each atomic with respect to each other.
//! Waiters blocked in [`PermitCounter::try_acquire`] are woken immediately by
//! changes made through the same [`CounterManager`] and otherwise re-poll on a
//! short interval to observe changes made elsewhere.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use parking_lot::Mutex;
use reservoir_core::DeleteRequest;
use reservoir_core::KeyValueStore;
use reservoir_core::KeyValueStoreError;
use reservoir_core::ReadRequest;
use reservoir_core::WriteRequest;
use reservoir_core::constants::COORDINATION_POLL_INTERVAL_MS;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::CoordinationError;
use crate::verified;

/// Per-key wakeups for waiters in this process.
#[derive(Default)]
pub struct CounterNotifier {
    waiters: Mutex<HashMap<String, Arc<Notify>>>,
}

impl CounterNotifier {
    fn notify_for(&self, key: &str) -> Arc<Notify> {
        let mut waiters = self.waiters.lock();
        Arc::clone(waiters.entry(key.to_string()).or_default())
    }

    fn notify(&self, key: &str) {
        if let Some(notify) = self.waiters.lock().get(key) {
            notify.notify_waiters();
        }
    }

    fn forget(&self, key: &str) {
        if let Some(notify) = self.waiters.lock().remove(key) {
            notify.notify_waiters();
        }
    }
}

/// Factory for [`PermitCounter`] handles sharing one store and notifier.
pub struct CounterManager<S: KeyValueStore + ?Sized> {
    store: Arc<S>,
    notifier: Arc<CounterNotifier>,
}

impl<S: KeyValueStore + ?Sized + 'static> CounterManager<S> {
    /// Create a new counter manager.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            notifier: Arc::new(CounterNotifier::default()),
        }
    }

    /// Handle for the counter stored under `key`.
    pub fn counter(&self, key: impl Into<String>) -> PermitCounter<S> {
        let key = key.into();
        debug_assert!(!key.is_empty(), "COUNTER: key must not be empty");
        PermitCounter {
            store: Arc::clone(&self.store),
            key,
            notifier: Arc::clone(&self.notifier),
        }
    }
}

/// Handle to one named permit counter.
pub struct PermitCounter<S: KeyValueStore + ?Sized> {
    store: Arc<S>,
    key: String,
    notifier: Arc<CounterNotifier>,
}

impl<S: KeyValueStore + ?Sized> Clone for PermitCounter<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            key: self.key.clone(),
            notifier: Arc::clone(&self.notifier),
        }
    }
}

impl<S: KeyValueStore + ?Sized> std::fmt::Debug for PermitCounter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermitCounter").field("key", &self.key).finish()
    }
}

impl<S: KeyValueStore + ?Sized + 'static> PermitCounter<S> {
    /// Store key of this counter.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Resource id encoded in the key (the last `:` segment).
    pub fn resource_id(&self) -> &str {
        verified::resource_id_from_counter_key(&self.key)
    }

    /// Whether the counter has been initialized.
    pub async fn exists(&self) -> Result<bool, CoordinationError> {
        Ok(self.read_value().await?.is_some())
    }

    /// Current permit count; an absent counter holds zero.
    pub async fn available_permits(&self) -> Result<i64, CoordinationError> {
        Ok(self.read_value().await?.map(|(_, value)| value).unwrap_or(0))
    }

    /// Take `permits`, waiting up to `timeout` for them to become available.
    ///
    /// Returns `Ok(false)` on timeout. Cancelling `cancel` while waiting (or
    /// before the call) fails with `CoordinationError::Interrupted`.
    pub async fn try_acquire(
        &self,
        permits: u32,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<bool, CoordinationError> {
        if cancel.is_cancelled() {
            return Err(self.interrupted());
        }

        let deadline = Instant::now() + timeout;
        let notify = self.notifier.notify_for(&self.key);

        loop {
            // Register interest before checking so a release between the
            // check and the wait is not missed.
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.try_acquire_now(permits).await? {
                return Ok(true);
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(key = %self.key, permits, "counter acquire timed out");
                return Ok(false);
            }
            let poll = (deadline - now).min(Duration::from_millis(COORDINATION_POLL_INTERVAL_MS));

            tokio::select! {
                _ = cancel.cancelled() => return Err(self.interrupted()),
                _ = &mut notified => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }

    /// Take `permits` if available right now.
    pub async fn try_acquire_now(&self, permits: u32) -> Result<bool, CoordinationError> {
        loop {
            let Some((raw, current)) = self.read_value().await? else {
                return Ok(permits == 0);
            };

            if !verified::can_acquire_permits(current, permits) {
                return Ok(false);
            }

            let next = verified::compute_after_acquire(current, permits);
            debug_assert!(next >= 0, "COUNTER: value must not go negative on acquire");

            if self.cas(Some(raw), next).await? {
                debug!(key = %self.key, permits, remaining = next, "permits acquired");
                return Ok(true);
            }
        }
    }

    /// Return `permits`, creating the counter if it is absent.
    pub async fn release(&self, permits: u32) -> Result<i64, CoordinationError> {
        loop {
            let current = self.read_value().await?;
            let (expected, value) = match current {
                Some((raw, value)) => (Some(raw), value),
                None => (None, 0),
            };

            let next = verified::compute_after_release(value, permits);
            if self.cas(expected, next).await? {
                debug!(key = %self.key, permits, available = next, "permits released");
                self.notifier.notify(&self.key);
                return Ok(next);
            }
        }
    }

    /// Overwrite the counter with `permits`.
    ///
    /// Succeeds only when the counter is absent or non-negative and nobody
    /// changed it between the read and the swap. Returns `Ok(false)` otherwise
    /// so the caller can retry a bounded number of times.
    pub async fn force_set(&self, permits: u64) -> Result<bool, CoordinationError> {
        let current = self.read_value().await?;
        let (expected, value) = match current {
            Some((raw, value)) => (Some(raw), Some(value)),
            None => (None, None),
        };

        if !verified::can_force_set(value) {
            debug!(key = %self.key, current = ?value, "force set refused on negative counter");
            return Ok(false);
        }

        let next = i64::try_from(permits).unwrap_or(i64::MAX);
        let is_set = self.cas(expected, next).await?;
        if is_set {
            debug!(key = %self.key, previous = ?value, permits = next, "counter force set");
            self.notifier.notify(&self.key);
        }
        Ok(is_set)
    }

    /// Remove the counter.
    pub async fn delete(&self) -> Result<bool, CoordinationError> {
        let result = self.store.delete(DeleteRequest::new(self.key.clone())).await?;
        self.notifier.forget(&self.key);
        debug!(key = %self.key, existed = result.is_deleted, "counter deleted");
        Ok(result.is_deleted)
    }

    async fn read_value(&self) -> Result<Option<(String, i64)>, CoordinationError> {
        let result = match self.store.read(ReadRequest::new(self.key.clone())).await {
            Ok(result) => result,
            Err(KeyValueStoreError::NotFound { .. }) => return Ok(None),
            Err(source) => return Err(CoordinationError::Storage { source }),
        };
        let Some(kv) = result.kv else {
            return Ok(None);
        };
        match verified::parse_permits(&kv.value) {
            Some(value) => Ok(Some((kv.value, value))),
            None => Err(CoordinationError::CorruptedData {
                key: self.key.clone(),
                reason: format!("not an integer: {:?}", kv.value),
            }),
        }
    }

    /// Swap to `next` if the stored value is still `expected`.
    async fn cas(&self, expected: Option<String>, next: i64) -> Result<bool, CoordinationError> {
        match self.store.write(WriteRequest::compare_and_swap(self.key.clone(), expected, next.to_string())).await {
            Ok(_) => Ok(true),
            Err(KeyValueStoreError::CompareAndSwapFailed { .. }) => Ok(false),
            Err(source) => Err(CoordinationError::Storage { source }),
        }
    }

    fn interrupted(&self) -> CoordinationError {
        CoordinationError::Interrupted {
            operation: format!("acquire on counter '{}'", self.key),
        }
    }
}
