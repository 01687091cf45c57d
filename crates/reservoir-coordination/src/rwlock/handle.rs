//! Lock handles and multi-lock acquisition.
//!
//! A [`LockHandle`] records one held lock so that all locks taken during an
//! operation can be released together, whichever step failed.

use std::time::Duration;

use reservoir_core::KeyValueStore;
use tracing::debug;
use tracing::warn;

use super::RWLockManager;
use super::types::RWLockMode;
use crate::error::CoordinationError;

/// A held read or write lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    /// Lock name.
    pub name: String,
    /// Holder the lock was acquired for.
    pub holder_id: String,
    /// `Read` or `Write`.
    pub mode: RWLockMode,
    /// Token observed at acquisition (the write token for write locks).
    pub fencing_token: u64,
    /// Lease deadline (Unix ms).
    pub deadline_ms: u64,
}

impl<S: KeyValueStore + ?Sized + 'static> RWLockManager<S> {
    /// Acquire a read lock within `wait`, leased for `lease_ms`.
    ///
    /// Fails with `CoordinationError::Timeout` when the wait elapses.
    pub async fn try_read_lock(
        &self,
        name: &str,
        holder_id: &str,
        wait: Duration,
        lease_ms: u64,
    ) -> Result<LockHandle, CoordinationError> {
        let (fencing_token, deadline_ms, _) = self.acquire_read(name, holder_id, lease_ms, wait).await?;
        Ok(LockHandle {
            name: name.to_string(),
            holder_id: holder_id.to_string(),
            mode: RWLockMode::Read,
            fencing_token,
            deadline_ms,
        })
    }

    /// Acquire a write lock within `wait`, leased for `lease_ms`.
    ///
    /// Fails with `CoordinationError::Timeout` when the wait elapses.
    pub async fn try_write_lock(
        &self,
        name: &str,
        holder_id: &str,
        wait: Duration,
        lease_ms: u64,
    ) -> Result<LockHandle, CoordinationError> {
        let (fencing_token, deadline_ms) = self.acquire_write(name, holder_id, lease_ms, wait).await?;
        Ok(LockHandle {
            name: name.to_string(),
            holder_id: holder_id.to_string(),
            mode: RWLockMode::Write,
            fencing_token,
            deadline_ms,
        })
    }

    /// Release a lock previously returned by this manager.
    pub async fn unlock(&self, handle: &LockHandle) -> Result<(), CoordinationError> {
        match handle.mode {
            RWLockMode::Read => self.release_read(&handle.name, &handle.holder_id).await,
            RWLockMode::Write => self.release_write(&handle.name, &handle.holder_id, handle.fencing_token).await,
            RWLockMode::Free => Ok(()),
        }
    }

    /// Acquire read locks on every name, in the order given.
    ///
    /// Callers pass names in a global order (sorted) so concurrent
    /// multi-lock operations cannot wait on each other in a cycle. On failure
    /// every lock acquired so far is released before the error is returned.
    pub async fn try_read_lock_all(
        &self,
        names: &[String],
        holder_id: &str,
        wait: Duration,
        lease_ms: u64,
    ) -> Result<Vec<LockHandle>, CoordinationError> {
        self.lock_all(names, holder_id, wait, lease_ms, RWLockMode::Read).await
    }

    /// Acquire write locks on every name, in the order given.
    ///
    /// Same ordering and cleanup rules as [`Self::try_read_lock_all`].
    pub async fn try_write_lock_all(
        &self,
        names: &[String],
        holder_id: &str,
        wait: Duration,
        lease_ms: u64,
    ) -> Result<Vec<LockHandle>, CoordinationError> {
        self.lock_all(names, holder_id, wait, lease_ms, RWLockMode::Write).await
    }

    async fn lock_all(
        &self,
        names: &[String],
        holder_id: &str,
        wait: Duration,
        lease_ms: u64,
        mode: RWLockMode,
    ) -> Result<Vec<LockHandle>, CoordinationError> {
        debug_assert!(mode != RWLockMode::Free, "RWLOCK: cannot acquire a Free lock");

        let mut handles = Vec::with_capacity(names.len());
        for name in names {
            let result = match mode {
                RWLockMode::Write => self.try_write_lock(name, holder_id, wait, lease_ms).await,
                _ => self.try_read_lock(name, holder_id, wait, lease_ms).await,
            };
            match result {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    debug!(name = %name, holder_id, acquired = handles.len(), error = %e, "multi-lock failed, releasing");
                    self.unlock_all(handles).await;
                    return Err(e);
                }
            }
        }
        Ok(handles)
    }

    /// Release every handle, continuing past failures.
    ///
    /// Failures are logged; a lock that cannot be released here still frees
    /// itself when its lease elapses.
    pub async fn unlock_all(&self, handles: Vec<LockHandle>) {
        for handle in handles.iter().rev() {
            if let Err(e) = self.unlock(handle).await {
                warn!(name = %handle.name, holder_id = %handle.holder_id, error = %e, "failed to release lock");
            }
        }
    }
}
