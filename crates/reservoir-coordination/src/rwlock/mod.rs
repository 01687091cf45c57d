//! Distributed read-write lock with fencing tokens.
//!
//! Provides shared read access or exclusive write access with:
//! - Multiple concurrent readers OR a single exclusive writer
//! - Monotonically increasing fencing tokens
//! - Lease-based automatic expiration for crash recovery
//!
//! Readers are never blocked by waiting writers. Writers only need the lock
//! briefly (to rebuild a counter), and a lease bounds how long any reader can
//! keep them out.
//!
//! ## Lock State
//!
//! The lock state is stored as JSON in the key-value store:
//! ```json
//! {
//!   "name": "...",
//!   "mode": "Read" | "Write" | "Free",
//!   "writer": {"holder_id": "...", "fencing_token": 42, "deadline_ms": ...},
//!   "readers": [{"holder_id": "...", "deadline_ms": ...}, ...],
//!   "fencing_token": 42
//! }
//! ```

mod acquisition;
mod handle;
mod release;
pub mod types;

use std::sync::Arc;

use reservoir_core::KeyValueStore;
use reservoir_core::KeyValueStoreError;
use reservoir_core::ReadRequest;
pub use handle::LockHandle;
pub use types::RWLockMode;
pub use types::RWLockState;
pub use types::ReaderEntry;
pub use types::WriterEntry;

use crate::error::CoordinationError;
use crate::verified;

/// Point-in-time view of a lock, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockStatus {
    /// Mode after expired holders are discounted.
    pub mode: RWLockMode,
    /// Active readers.
    pub reader_count: u32,
    /// Active writer, if any.
    pub writer_holder: Option<String>,
    /// Current global fencing token.
    pub fencing_token: u64,
}

/// Manager for distributed read-write lock operations.
pub struct RWLockManager<S: KeyValueStore + ?Sized> {
    pub(crate) store: Arc<S>,
}

impl<S: KeyValueStore + ?Sized + 'static> RWLockManager<S> {
    /// Create a new RWLock manager.
    pub fn new(store: Arc<S>) -> Self {
        debug_assert!(Arc::strong_count(&store) >= 1, "RWLOCK: store Arc must have at least 1 strong reference");
        Self { store }
    }

    /// Get lock status.
    pub async fn status(&self, name: &str) -> Result<LockStatus, CoordinationError> {
        debug_assert!(!name.is_empty(), "RWLOCK: name must not be empty for status");

        let key = verified::rwlock_key(name);

        match self.read_state(&key).await? {
            Some((_, mut state)) => {
                state.cleanup_expired_readers();
                state.cleanup_expired_writer();
                Ok(LockStatus {
                    mode: state.mode,
                    reader_count: state.active_reader_count(),
                    writer_holder: state.writer.as_ref().map(|w| w.holder_id.clone()),
                    fencing_token: state.fencing_token,
                })
            }
            None => Ok(LockStatus {
                mode: RWLockMode::Free,
                reader_count: 0,
                writer_holder: None,
                fencing_token: 0,
            }),
        }
    }

    /// Read lock state from the store.
    ///
    /// Returns the raw JSON (the CAS precondition for the next update) along
    /// with the parsed state.
    pub(crate) async fn read_state(&self, key: &str) -> Result<Option<(String, RWLockState)>, CoordinationError> {
        debug_assert!(!key.is_empty(), "RWLOCK: key must not be empty for read_state");

        match self.store.read(ReadRequest::new(key.to_string())).await {
            Ok(result) => match result.kv {
                Some(kv) if !kv.value.is_empty() => {
                    let state: RWLockState =
                        serde_json::from_str(&kv.value).map_err(|e| CoordinationError::CorruptedData {
                            key: key.to_string(),
                            reason: format!("failed to parse rwlock state: {}", e),
                        })?;
                    Ok(Some((kv.value, state)))
                }
                _ => Ok(None),
            },
            Err(KeyValueStoreError::NotFound { .. }) => Ok(None),
            Err(source) => Err(CoordinationError::Storage { source }),
        }
    }
}
