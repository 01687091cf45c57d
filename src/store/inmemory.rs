//! In-memory durable store with row locks and staged writes.
//!
//! Rows touched by a transaction stay locked until it commits or rolls back,
//! and its writes are visible only to itself until commit. Reads through
//! [`ResourceStore::query_one`] and [`ResourceStore::query_batch`] see
//! committed rows only.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use super::DurableRecord;
use super::ResourceStore;
use super::StoreError;
use super::StoreTransaction;
use crate::pool::Pool;

/// Default bound on waiting for a row lock.
const DEFAULT_ROW_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct Shared {
    rows: Mutex<BTreeMap<String, DurableRecord>>,
    row_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    should_fail_next_commit: AtomicBool,
    is_unavailable: AtomicBool,
    commits: AtomicU64,
}

/// Transactional in-memory [`ResourceStore`].
#[derive(Debug, Clone)]
pub struct InMemoryResourceStore {
    shared: Arc<Shared>,
    row_lock_timeout: Duration,
}

impl Default for InMemoryResourceStore {
    fn default() -> Self {
        Self {
            shared: Arc::default(),
            row_lock_timeout: DEFAULT_ROW_LOCK_TIMEOUT,
        }
    }
}

impl InMemoryResourceStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_row_lock_timeout(row_lock_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::default(),
            row_lock_timeout,
        })
    }

    /// Create or overwrite a committed row.
    pub fn insert(&self, record: DurableRecord) {
        self.shared.rows.lock().insert(record.resource_id.clone(), record);
    }

    /// Committed row, bypassing availability checks.
    pub fn get(&self, resource_id: &str) -> Option<DurableRecord> {
        self.shared.rows.lock().get(resource_id).cloned()
    }

    /// Make the next commit fail and discard its writes.
    pub fn fail_next_commit(&self) {
        self.shared.should_fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Make every call fail until switched back.
    pub fn set_unavailable(&self, is_unavailable: bool) {
        self.shared.is_unavailable.store(is_unavailable, Ordering::SeqCst);
    }

    /// Number of successful commits.
    pub fn commit_count(&self) -> u64 {
        self.shared.commits.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        check_available(&self.shared)
    }
}

fn check_available(shared: &Shared) -> Result<(), StoreError> {
    if shared.is_unavailable.load(Ordering::SeqCst) {
        return Err(StoreError::Unavailable {
            reason: "store switched off".to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> Result<InMemoryTransaction, StoreError> {
        self.check_available()?;
        Ok(InMemoryTransaction {
            shared: Arc::clone(&self.shared),
            row_lock_timeout: self.row_lock_timeout,
            guards: HashMap::new(),
            staged: BTreeMap::new(),
        })
    }

    async fn query_one(&self, resource_id: &str) -> Result<Option<DurableRecord>, StoreError> {
        self.check_available()?;
        Ok(self.get(resource_id))
    }

    async fn query_batch(&self, resource_ids: &[String]) -> Result<Vec<DurableRecord>, StoreError> {
        self.check_available()?;
        let rows = self.shared.rows.lock();
        let mut records: Vec<DurableRecord> = resource_ids.iter().filter_map(|id| rows.get(id).cloned()).collect();
        records.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        records.dedup_by(|a, b| a.resource_id == b.resource_id);
        Ok(records)
    }
}

/// A transaction on [`InMemoryResourceStore`].
///
/// Dropping it without committing discards its writes and frees its rows.
#[derive(Debug)]
pub struct InMemoryTransaction {
    shared: Arc<Shared>,
    row_lock_timeout: Duration,
    guards: HashMap<String, OwnedMutexGuard<()>>,
    staged: BTreeMap<String, Option<DurableRecord>>,
}

impl InMemoryTransaction {
    /// Lock the row and return this transaction's view of it.
    async fn row(&mut self, resource_id: &str) -> Result<Option<DurableRecord>, StoreError> {
        check_available(&self.shared)?;

        if !self.guards.contains_key(resource_id) {
            let lock = Arc::clone(self.shared.row_locks.lock().entry(resource_id.to_string()).or_default());
            let guard = tokio::time::timeout(self.row_lock_timeout, lock.lock_owned()).await.map_err(|_| {
                StoreError::LockTimeout {
                    resource_id: resource_id.to_string(),
                }
            })?;
            self.guards.insert(resource_id.to_string(), guard);
        }

        if let Some(staged) = self.staged.get(resource_id) {
            return Ok(staged.clone());
        }
        let committed = self.shared.rows.lock().get(resource_id).cloned();
        self.staged.insert(resource_id.to_string(), committed.clone());
        Ok(committed)
    }

    fn stage(&mut self, record: DurableRecord) {
        self.staged.insert(record.resource_id.clone(), Some(record));
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn conditional_subtract(&mut self, resource_id: &str, pool: Pool, num: u32) -> Result<u64, StoreError> {
        let Some(mut record) = self.row(resource_id).await? else {
            return Ok(0);
        };
        let count = record.count_mut(pool);
        let Some(next) = count.checked_sub(u64::from(num)) else {
            debug!(resource_id, %pool, num, current = *count, "conditional subtract rejected");
            return Ok(0);
        };
        *count = next;
        self.stage(record);
        Ok(1)
    }

    async fn add(&mut self, resource_id: &str, pool: Pool, num: u32) -> Result<u64, StoreError> {
        let Some(mut record) = self.row(resource_id).await? else {
            return Ok(0);
        };
        let count = record.count_mut(pool);
        *count = count.checked_add(u64::from(num)).ok_or_else(|| StoreError::Overflow {
            resource_id: resource_id.to_string(),
            pool,
        })?;
        self.stage(record);
        Ok(1)
    }

    async fn conditional_subtract_add_pair(
        &mut self,
        resource_id: &str,
        from: Pool,
        to: Pool,
        num: u32,
    ) -> Result<u64, StoreError> {
        debug_assert!(from != to, "STORE: pair update needs two distinct pools");
        let Some(mut record) = self.row(resource_id).await? else {
            return Ok(0);
        };
        let Some(source) = record.count(from).checked_sub(u64::from(num)) else {
            debug!(resource_id, %from, %to, num, "conditional pair update rejected");
            return Ok(0);
        };
        let target = record.count(to).checked_add(u64::from(num)).ok_or_else(|| StoreError::Overflow {
            resource_id: resource_id.to_string(),
            pool: to,
        })?;
        *record.count_mut(from) = source;
        *record.count_mut(to) = target;
        self.stage(record);
        Ok(1)
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        check_available(&self.shared)?;
        if self.shared.should_fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::CommitFailed {
                reason: "injected commit failure".to_string(),
            });
        }

        let staged = std::mem::take(&mut self.staged);
        {
            let mut rows = self.shared.rows.lock();
            for record in staged.into_values().flatten() {
                rows.insert(record.resource_id.clone(), record);
            }
        }
        self.shared.commits.fetch_add(1, Ordering::SeqCst);
        debug!(rows = self.guards.len(), "transaction committed");
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        debug!(rows = self.guards.len(), "transaction rolled back");
        Ok(())
    }
}
