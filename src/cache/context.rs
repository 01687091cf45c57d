//! Per-operation bookkeeping: compensation logs and held locks.

use reservoir_coordination::LockHandle;
use tokio_util::sync::CancellationToken;

use crate::pool::Pool;

/// One cache mutation that can be undone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensationEntry {
    pub pool: Pool,
    pub resource_id: String,
    pub permits: u32,
}

#[derive(Debug, Default)]
struct PoolLog {
    /// Permits taken from the cache; undone by releasing them.
    held: Vec<CompensationEntry>,
    /// Permits added to the cache; undone by taking them back.
    leased: Vec<CompensationEntry>,
    read_locks: Vec<LockHandle>,
}

/// Compensation and lock state owned by one logical operation.
///
/// Every lock taken under this context uses [`OperationContext::holder_id`], so
/// two operations never share a lock holder.
#[derive(Debug, Default)]
pub struct OperationContext {
    holder_id: String,
    cancel: CancellationToken,
    pools: [PoolLog; 2],
}

impl OperationContext {
    pub fn new(holder_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            holder_id: holder_id.into(),
            cancel,
            pools: Default::default(),
        }
    }

    /// Context with a fresh random holder and its own cancellation token.
    pub fn detached() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), CancellationToken::new())
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn record_held(&mut self, pool: Pool, resource_id: &str, permits: u32) {
        self.pools[pool.index()].held.push(CompensationEntry {
            pool,
            resource_id: resource_id.to_string(),
            permits,
        });
    }

    pub(crate) fn record_leased(&mut self, pool: Pool, resource_id: &str, permits: u32) {
        self.pools[pool.index()].leased.push(CompensationEntry {
            pool,
            resource_id: resource_id.to_string(),
            permits,
        });
    }

    pub(crate) fn push_read_locks(&mut self, pool: Pool, handles: Vec<LockHandle>) {
        self.pools[pool.index()].read_locks.extend(handles);
    }

    pub fn held(&self, pool: Pool) -> &[CompensationEntry] {
        &self.pools[pool.index()].held
    }

    pub fn leased(&self, pool: Pool) -> &[CompensationEntry] {
        &self.pools[pool.index()].leased
    }

    pub fn read_locks(&self, pool: Pool) -> &[LockHandle] {
        &self.pools[pool.index()].read_locks
    }

    pub(crate) fn take_held(&mut self, pool: Pool) -> Vec<CompensationEntry> {
        std::mem::take(&mut self.pools[pool.index()].held)
    }

    pub(crate) fn take_leased(&mut self, pool: Pool) -> Vec<CompensationEntry> {
        std::mem::take(&mut self.pools[pool.index()].leased)
    }

    pub(crate) fn take_read_locks(&mut self, pool: Pool) -> Vec<LockHandle> {
        std::mem::take(&mut self.pools[pool.index()].read_locks)
    }

    /// Remove and return the pool's read locks on the given lock names.
    pub(crate) fn take_read_locks_named(&mut self, pool: Pool, names: &[String]) -> Vec<LockHandle> {
        let locks = &mut self.pools[pool.index()].read_locks;
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(locks).into_iter().partition(|h| names.contains(&h.name));
        *locks = kept;
        taken
    }

    /// Move everything recorded in `other` into this context.
    pub(crate) fn merge(&mut self, mut other: OperationContext) {
        for pool in Pool::ALL {
            let target = &mut self.pools[pool.index()];
            let source = &mut other.pools[pool.index()];
            target.held.append(&mut source.held);
            target.leased.append(&mut source.leased);
            target.read_locks.append(&mut source.read_locks);
        }
    }

    /// Nothing left to compensate or release.
    pub fn is_empty(&self) -> bool {
        self.pools.iter().all(|p| p.held.is_empty() && p.leased.is_empty() && p.read_locks.is_empty())
    }
}
