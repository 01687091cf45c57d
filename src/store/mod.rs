//! Durable store interface.
//!
//! The durable store is the source of truth: one row per resource with an
//! available and a pre-locked count, both kept non-negative by conditional
//! updates. The cache layer only reads rows and issues guarded writes inside a
//! transaction; how rows are persisted is up to the implementation.

mod inmemory;

use async_trait::async_trait;
pub use inmemory::InMemoryResourceStore;
pub use inmemory::InMemoryTransaction;
use serde::Deserialize;
use serde::Serialize;
use snafu::Snafu;

use crate::pool::Pool;

/// One durable row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurableRecord {
    pub resource_id: String,
    pub available: u64,
    pub pre_locked: u64,
}

impl DurableRecord {
    pub fn new(resource_id: impl Into<String>, available: u64, pre_locked: u64) -> Self {
        Self {
            resource_id: resource_id.into(),
            available,
            pre_locked,
        }
    }

    /// Count held in `pool`.
    pub fn count(&self, pool: Pool) -> u64 {
        match pool {
            Pool::Available => self.available,
            Pool::PreLocked => self.pre_locked,
        }
    }

    pub(crate) fn count_mut(&mut self, pool: Pool) -> &mut u64 {
        match pool {
            Pool::Available => &mut self.available,
            Pool::PreLocked => &mut self.pre_locked,
        }
    }
}

/// Errors from the durable store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// The store could not be reached.
    #[snafu(display("store unavailable: {reason}"))]
    Unavailable { reason: String },

    /// A row lock was not granted in time.
    #[snafu(display("timed out waiting for row lock on '{resource_id}'"))]
    LockTimeout { resource_id: String },

    /// An add would overflow the column.
    #[snafu(display("count overflow on '{resource_id}' ({pool})"))]
    Overflow { resource_id: String, pool: Pool },

    /// The transaction could not be committed; none of its writes applied.
    #[snafu(display("commit failed: {reason}"))]
    CommitFailed { reason: String },
}

/// Source of truth for resource counts.
#[async_trait]
pub trait ResourceStore: Send + Sync + 'static {
    type Transaction: StoreTransaction;

    /// Start a transaction grouping the writes of one logical operation.
    async fn begin(&self) -> Result<Self::Transaction, StoreError>;

    /// Committed row for one resource.
    async fn query_one(&self, resource_id: &str) -> Result<Option<DurableRecord>, StoreError>;

    /// Committed rows for every id that exists, in id order.
    async fn query_batch(&self, resource_ids: &[String]) -> Result<Vec<DurableRecord>, StoreError>;
}

/// Writes grouped into one atomic unit.
///
/// Each write returns the number of rows affected. Zero rows on a conditional
/// write means the non-negative guard (or the row itself) was missing, which
/// the caller treats as cache/store drift.
#[async_trait]
pub trait StoreTransaction: Send + Sized + 'static {
    /// Subtract `num` from `pool` if the result stays non-negative.
    async fn conditional_subtract(&mut self, resource_id: &str, pool: Pool, num: u32) -> Result<u64, StoreError>;

    /// Add `num` to `pool`.
    async fn add(&mut self, resource_id: &str, pool: Pool, num: u32) -> Result<u64, StoreError>;

    /// Move `num` from `from` to `to`, guarded on `from` staying non-negative.
    async fn conditional_subtract_add_pair(
        &mut self,
        resource_id: &str,
        from: Pool,
        to: Pool,
        num: u32,
    ) -> Result<u64, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}
