//! Read and write lock acquisition logic.

use std::time::Duration;
use std::time::Instant;

use reservoir_core::KeyValueStore;
use reservoir_core::KeyValueStoreError;
use reservoir_core::WriteCommand;
use reservoir_core::WriteRequest;
use reservoir_core::constants::COORDINATION_POLL_INTERVAL_MS;
use reservoir_core::constants::MAX_RWLOCK_READERS;
use reservoir_core::now_unix_ms;
use tracing::debug;

use super::RWLockManager;
use super::types::RWLockMode;
use super::types::RWLockState;
use super::types::ReaderEntry;
use super::types::WriterEntry;
use crate::error::CoordinationError;
use crate::verified;

/// Result of a CAS operation on lock state.
pub(super) enum CasResult<T> {
    /// CAS succeeded with the given result
    Success(T),
    /// CAS failed due to concurrent modification, retry needed
    Retry,
}

impl<S: KeyValueStore + ?Sized + 'static> RWLockManager<S> {
    /// Acquire a read lock, polling until available or `timeout` elapses.
    ///
    /// Returns (fencing_token, deadline_ms, reader_count) on success.
    pub async fn acquire_read(
        &self,
        name: &str,
        holder_id: &str,
        lease_ms: u64,
        timeout: Duration,
    ) -> Result<(u64, u64, u32), CoordinationError> {
        // Tiger Style: argument validation
        debug_assert!(!name.is_empty(), "RWLOCK: name must not be empty");
        debug_assert!(!holder_id.is_empty(), "RWLOCK: holder_id must not be empty");
        debug_assert!(lease_ms > 0, "RWLOCK: lease_ms must be positive");

        let deadline = Instant::now() + timeout;

        loop {
            if let Some(result) = self.try_acquire_read(name, holder_id, lease_ms).await? {
                return Ok(result);
            }
            if !sleep_until_next_poll(deadline).await {
                return Err(CoordinationError::Timeout {
                    operation: format!("read lock on '{}'", name),
                });
            }
        }
    }

    /// Try to acquire a read lock without blocking.
    ///
    /// Returns Some((fencing_token, deadline_ms, reader_count)) on success, None if a writer holds it or the reader limit is reached.
    pub async fn try_acquire_read(
        &self,
        name: &str,
        holder_id: &str,
        lease_ms: u64,
    ) -> Result<Option<(u64, u64, u32)>, CoordinationError> {
        let key = verified::rwlock_key(name);

        loop {
            let current = self.read_state(&key).await?;

            let (expected, mut state) = match current {
                Some((raw, state)) => (Some(raw), state),
                None => (None, RWLockState::free(name)),
            };

            state.cleanup_expired_readers();
            state.cleanup_expired_writer();

            if !verified::can_acquire_read(state.mode, state.is_writer_expired()) {
                return Ok(None);
            }

            let now = now_unix_ms();
            let deadline = verified::compute_lock_deadline(now, lease_ms);

            if let Some(reader) = state.readers.iter_mut().find(|r| r.holder_id == holder_id) {
                // Already holding: refresh the lease.
                reader.deadline_ms = deadline;
            } else {
                // Tiger Style: Enforce reader limit. A full lock is busy, not broken.
                let active_readers = state.active_reader_count();
                if active_readers >= MAX_RWLOCK_READERS {
                    debug!(name, holder_id, active_readers, "read lock at reader limit");
                    return Ok(None);
                }
                state.readers.push(ReaderEntry {
                    holder_id: holder_id.to_string(),
                    deadline_ms: deadline,
                });
            }
            state.mode = RWLockMode::Read;

            let new_json = serde_json::to_string(&state)?;
            match self.cas_write(&key, expected, new_json).await? {
                CasResult::Success(()) => {
                    let count = state.active_reader_count();
                    debug_assert!(state.writer.is_none(), "RWLOCK: no writer must be held when read lock is acquired");
                    debug_assert!(count > 0, "RWLOCK: reader count must be positive after read acquisition");
                    debug!(name, holder_id, count, "read lock acquired");
                    return Ok(Some((state.fencing_token, deadline, count)));
                }
                CasResult::Retry => continue,
            }
        }
    }

    /// Acquire a write lock, polling until available or `timeout` elapses.
    ///
    /// Returns (fencing_token, deadline_ms) on success.
    pub async fn acquire_write(
        &self,
        name: &str,
        holder_id: &str,
        lease_ms: u64,
        timeout: Duration,
    ) -> Result<(u64, u64), CoordinationError> {
        // Tiger Style: argument validation
        debug_assert!(!name.is_empty(), "RWLOCK: name must not be empty for write");
        debug_assert!(!holder_id.is_empty(), "RWLOCK: holder_id must not be empty for write");
        debug_assert!(lease_ms > 0, "RWLOCK: lease_ms must be positive for write");

        let deadline = Instant::now() + timeout;

        loop {
            if let Some(result) = self.try_acquire_write(name, holder_id, lease_ms).await? {
                return Ok(result);
            }
            if !sleep_until_next_poll(deadline).await {
                return Err(CoordinationError::Timeout {
                    operation: format!("write lock on '{}'", name),
                });
            }
        }
    }

    /// Try to acquire a write lock without blocking.
    ///
    /// Returns Some((fencing_token, deadline_ms)) on success, None if blocked.
    pub async fn try_acquire_write(
        &self,
        name: &str,
        holder_id: &str,
        lease_ms: u64,
    ) -> Result<Option<(u64, u64)>, CoordinationError> {
        let key = verified::rwlock_key(name);

        loop {
            let current = self.read_state(&key).await?;

            let (expected, mut state) = match current {
                Some((raw, state)) => (Some(raw), state),
                None => (None, RWLockState::free(name)),
            };

            state.cleanup_expired_readers();
            state.cleanup_expired_writer();

            let now = now_unix_ms();
            let lock_deadline = verified::compute_lock_deadline(now, lease_ms);

            let token = if state.has_write_lock(holder_id) {
                // Already holding: refresh the lease, keep the token.
                let Some(writer) = state.writer.as_mut() else {
                    continue;
                };
                writer.deadline_ms = lock_deadline;
                writer.fencing_token
            } else {
                if !verified::can_acquire_write(state.mode, state.active_reader_count(), state.is_writer_expired()) {
                    return Ok(None);
                }
                let new_token = verified::compute_next_write_token(state.fencing_token);
                debug_assert!(new_token > state.fencing_token, "RWLOCK: write token must increase");
                state.writer = Some(WriterEntry {
                    holder_id: holder_id.to_string(),
                    fencing_token: new_token,
                    deadline_ms: lock_deadline,
                });
                state.fencing_token = new_token;
                new_token
            };
            state.mode = RWLockMode::Write;

            let new_json = serde_json::to_string(&state)?;
            match self.cas_write(&key, expected, new_json).await? {
                CasResult::Success(()) => {
                    debug_assert!(
                        state.active_reader_count() == 0,
                        "RWLOCK: no active readers must be held when write lock is acquired"
                    );
                    debug!(name, holder_id, fencing_token = token, "write lock acquired");
                    return Ok(Some((token, lock_deadline)));
                }
                CasResult::Retry => continue,
            }
        }
    }

    /// Common CAS write helper that handles retry logic.
    pub(super) async fn cas_write(
        &self,
        key: &str,
        expected: Option<String>,
        new_value: String,
    ) -> Result<CasResult<()>, CoordinationError> {
        match self
            .store
            .write(WriteRequest {
                command: WriteCommand::CompareAndSwap {
                    key: key.to_string(),
                    expected,
                    new_value,
                },
            })
            .await
        {
            Ok(_) => Ok(CasResult::Success(())),
            Err(KeyValueStoreError::CompareAndSwapFailed { .. }) => Ok(CasResult::Retry),
            Err(source) => Err(CoordinationError::Storage { source }),
        }
    }
}

/// Sleep one poll interval, clamped to `deadline`.
///
/// Returns false once the deadline has passed.
async fn sleep_until_next_poll(deadline: Instant) -> bool {
    let now = Instant::now();
    if now >= deadline {
        return false;
    }
    let remaining = deadline - now;
    tokio::time::sleep(remaining.min(Duration::from_millis(COORDINATION_POLL_INTERVAL_MS))).await;
    true
}
