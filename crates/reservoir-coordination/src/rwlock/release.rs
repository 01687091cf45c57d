//! Read and write lock release logic.

use reservoir_core::KeyValueStore;
use tracing::debug;

use super::RWLockManager;
use super::acquisition::CasResult;
use super::types::RWLockMode;
use crate::error::CoordinationError;
use crate::verified;

impl<S: KeyValueStore + ?Sized + 'static> RWLockManager<S> {
    /// Release a read lock.
    ///
    /// Releasing a lock that is not held is a no-op.
    pub async fn release_read(&self, name: &str, holder_id: &str) -> Result<(), CoordinationError> {
        let key = verified::rwlock_key(name);

        loop {
            let Some((old_json, mut state)) = self.read_state(&key).await? else {
                // Lock doesn't exist, nothing to release
                return Ok(());
            };

            state.cleanup_expired_readers();

            let original_count = state.readers.len();
            state.readers.retain(|r| r.holder_id != holder_id);

            if state.readers.len() == original_count {
                // Not holding read lock
                return Ok(());
            }

            if state.readers.is_empty() && state.mode == RWLockMode::Read {
                state.mode = RWLockMode::Free;
            }

            let new_json = serde_json::to_string(&state)?;
            match self.cas_write(&key, Some(old_json), new_json).await? {
                CasResult::Success(()) => {
                    debug!(name, holder_id, "read lock released");
                    return Ok(());
                }
                CasResult::Retry => continue,
            }
        }
    }

    /// Release a write lock.
    ///
    /// Fails with `LockLost` when another holder (or another acquisition by
    /// the same holder) owns the lock now.
    pub async fn release_write(&self, name: &str, holder_id: &str, fencing_token: u64) -> Result<(), CoordinationError> {
        let key = verified::rwlock_key(name);

        loop {
            let Some((old_json, mut state)) = self.read_state(&key).await? else {
                return Ok(());
            };

            match state.writer {
                Some(ref writer) if writer.holder_id != holder_id || writer.fencing_token != fencing_token => {
                    return Err(CoordinationError::LockLost {
                        expected_holder: format!("{}@{}", holder_id, fencing_token),
                        current_holder: format!("{}@{}", writer.holder_id, writer.fencing_token),
                    });
                }
                Some(_) => {}
                // No writer, nothing to release
                None => return Ok(()),
            }

            state.writer = None;
            state.mode = RWLockMode::Free;
            state.cleanup_expired_readers();

            let new_json = serde_json::to_string(&state)?;
            match self.cas_write(&key, Some(old_json), new_json).await? {
                CasResult::Success(()) => {
                    debug!(name, holder_id, fencing_token, "write lock released");
                    return Ok(());
                }
                CasResult::Retry => continue,
            }
        }
    }
}
