//! A deterministic in-memory key-value store.
//!
//! Thread-safe and linearizable, with a fault switch so callers can exercise
//! the paths taken when the shared substrate is unreachable.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::KeyValueStoreError;
use crate::kv::DeleteRequest;
use crate::kv::DeleteResult;
use crate::kv::KeyValueWithRevision;
use crate::kv::ReadRequest;
use crate::kv::ReadResult;
use crate::kv::WriteCommand;
use crate::kv::WriteRequest;
use crate::kv::WriteResult;
use crate::kv::check_key;
use crate::kv::validate_write_command;
use crate::traits::KeyValueStore;

/// Versioned value for tracking revisions.
#[derive(Clone)]
struct VersionedValue {
    value: String,
    create_revision: u64,
    mod_revision: u64,
}

/// Keys and the global revision, guarded together so a write's revision
/// ordering matches its visibility ordering.
#[derive(Default)]
struct Inner {
    data: BTreeMap<String, VersionedValue>,
    revision: u64,
}

impl Inner {
    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    fn put(&mut self, key: &str, value: &str, revision: u64) {
        let create_revision = self.data.get(key).map(|v| v.create_revision).unwrap_or(revision);
        self.data.insert(key.to_string(), VersionedValue {
            value: value.to_string(),
            create_revision,
            mod_revision: revision,
        });
    }
}

/// A deterministic in-memory key-value store.
pub struct DeterministicKeyValueStore {
    inner: RwLock<Inner>,
    is_unavailable: AtomicBool,
}

impl Default for DeterministicKeyValueStore {
    fn default() -> Self {
        Self::new_inner()
    }
}

impl DeterministicKeyValueStore {
    /// Create a new deterministic store wrapped in Arc.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::new_inner())
    }

    fn new_inner() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            is_unavailable: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail with `KeyValueStoreError::Failed` until cleared.
    pub fn set_unavailable(&self, is_unavailable: bool) {
        self.is_unavailable.store(is_unavailable, Ordering::SeqCst);
    }

    /// Number of keys currently stored.
    pub async fn len(&self) -> usize {
        self.inner.read().await.data.len()
    }

    /// Whether the store holds no keys.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.data.is_empty()
    }

    fn check_available(&self) -> Result<(), KeyValueStoreError> {
        if self.is_unavailable.load(Ordering::SeqCst) {
            return Err(KeyValueStoreError::Failed {
                reason: "store unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for DeterministicKeyValueStore {
    async fn read(&self, request: ReadRequest) -> Result<ReadResult, KeyValueStoreError> {
        self.check_available()?;
        check_key(&request.key)?;

        let inner = self.inner.read().await;
        let kv = inner.data.get(&request.key).map(|versioned| KeyValueWithRevision {
            key: request.key.clone(),
            value: versioned.value.clone(),
            create_revision: versioned.create_revision,
            mod_revision: versioned.mod_revision,
        });
        Ok(ReadResult { kv })
    }

    async fn write(&self, request: WriteRequest) -> Result<WriteResult, KeyValueStoreError> {
        self.check_available()?;
        validate_write_command(&request.command)?;

        let mut inner = self.inner.write().await;
        match &request.command {
            WriteCommand::Set { key, value } => {
                let revision = inner.next_revision();
                inner.put(key, value, revision);
                Ok(WriteResult { revision })
            }
            WriteCommand::Delete { key } => {
                let revision = inner.next_revision();
                inner.data.remove(key);
                Ok(WriteResult { revision })
            }
            WriteCommand::DeleteMulti { keys } => {
                let revision = inner.next_revision();
                for key in keys {
                    inner.data.remove(key);
                }
                Ok(WriteResult { revision })
            }
            WriteCommand::CompareAndSwap {
                key,
                expected,
                new_value,
            } => {
                let current = inner.data.get(key).map(|v| v.value.clone());
                if current.as_ref() != expected.as_ref() {
                    return Err(KeyValueStoreError::CompareAndSwapFailed {
                        key: key.clone(),
                        expected: expected.clone(),
                        actual: current,
                    });
                }
                let revision = inner.next_revision();
                inner.put(key, new_value, revision);
                Ok(WriteResult { revision })
            }
            WriteCommand::CompareAndDelete { key, expected } => {
                let current = inner.data.get(key).map(|v| v.value.clone());
                if current.as_deref() != Some(expected.as_str()) {
                    return Err(KeyValueStoreError::CompareAndSwapFailed {
                        key: key.clone(),
                        expected: Some(expected.clone()),
                        actual: current,
                    });
                }
                let revision = inner.next_revision();
                inner.data.remove(key);
                Ok(WriteResult { revision })
            }
        }
    }

    async fn delete(&self, request: DeleteRequest) -> Result<DeleteResult, KeyValueStoreError> {
        self.check_available()?;
        check_key(&request.key)?;

        let mut inner = self.inner.write().await;
        let is_deleted = inner.data.remove(&request.key).is_some();
        if is_deleted {
            inner.next_revision();
        }
        Ok(DeleteResult {
            key: request.key,
            is_deleted,
        })
    }
}
