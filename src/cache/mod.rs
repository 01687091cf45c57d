//! Counter cache accessor.
//!
//! Single point of access to the AVAILABLE and PRE_LOCKED counters of every
//! resource, their drift markers and their locks. Mutations are recorded in the
//! caller's [`OperationContext`] so they can be undone if a later step fails.
//!
//! Locking discipline:
//! - a read lock on a resource's pool is held while its counter is mutated
//!   during normal operation, until the enclosing scope ends
//! - a write lock is held only while the counter is rebuilt from the store

mod adjust;
mod context;

use std::collections::HashMap;
use std::sync::Arc;

pub use adjust::AutoAdjust;
pub use adjust::is_adjust_draw;
pub use context::CompensationEntry;
pub use context::OperationContext;
use reservoir_coordination::CoordinationError;
use reservoir_coordination::CounterManager;
use reservoir_coordination::LockHandle;
use reservoir_coordination::PermitCounter;
use reservoir_coordination::RWLockManager;
use reservoir_core::DeleteRequest;
use reservoir_core::KeyValueStore;
use reservoir_core::KeyValueStoreError;
use reservoir_core::ReadRequest;
use reservoir_core::WriteRequest;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::config::ReservoirConfig;
use crate::error::ResourceError;
use crate::error::WaitReason;
use crate::pool::Pool;
use crate::store::ResourceStore;
use crate::types::QueryResourceParam;
use crate::types::QueryResourceResult;
use crate::types::UpdateResourceParam;

const DRIFT_MARKER_VALUE: &str = "1";

/// Result of a single-resource cache mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Applied,
    /// The counter does not exist; the caller must initialize and retry.
    Uninitialized,
}

/// Access to both pools' counters, drift markers and locks.
pub struct CacheAccessor<K: KeyValueStore + ?Sized, S: ResourceStore> {
    kv: Arc<K>,
    store: Arc<S>,
    counters: CounterManager<K>,
    locks: RWLockManager<K>,
    config: ReservoirConfig,
    adjust: AutoAdjust,
}

impl<K: KeyValueStore + ?Sized + 'static, S: ResourceStore> CacheAccessor<K, S> {
    pub fn new(kv: Arc<K>, store: Arc<S>, config: ReservoirConfig) -> Self {
        Self {
            counters: CounterManager::new(Arc::clone(&kv)),
            locks: RWLockManager::new(Arc::clone(&kv)),
            adjust: AutoAdjust::new(config.auto_adjust_rate),
            kv,
            store,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &ReservoirConfig {
        &self.config
    }

    pub fn auto_adjust(&self) -> &AutoAdjust {
        &self.adjust
    }

    pub fn locks(&self) -> &RWLockManager<K> {
        &self.locks
    }

    pub fn counter(&self, pool: Pool, resource_id: &str) -> PermitCounter<K> {
        self.counters.counter(pool.counter_key(resource_id))
    }

    /// Cached count, or `None` when the counter does not exist.
    pub async fn read_permits(&self, pool: Pool, resource_id: &str) -> Result<Option<i64>, ResourceError> {
        let counter = self.counter(pool, resource_id);
        if !counter.exists().await? {
            return Ok(None);
        }
        Ok(Some(counter.available_permits().await?))
    }

    /// Cached counts for the queried resources that have a counter.
    ///
    /// A count of zero or one short of the request may flag the resource for
    /// repair (see [`AutoAdjust`]).
    pub async fn query(
        &self,
        pool: Pool,
        params: &[QueryResourceParam],
    ) -> Result<Vec<QueryResourceResult>, ResourceError> {
        let mut results = Vec::with_capacity(params.len());
        for param in params {
            let Some(num) = self.read_permits(pool, &param.resource_id).await? else {
                continue;
            };
            let fill = num >= i64::from(param.acquire);
            if num <= 0 || !fill {
                self.maybe_mark_drift(pool, &param.resource_id).await;
            }
            results.push(QueryResourceResult {
                resource_id: param.resource_id.clone(),
                acquire: param.acquire,
                num,
                fill,
            });
        }
        Ok(results)
    }

    /// Take `permits` from one counter, recording them as held.
    pub async fn try_acquire(
        &self,
        ctx: &mut OperationContext,
        pool: Pool,
        resource_id: &str,
        permits: u32,
    ) -> Result<CacheOutcome, ResourceError> {
        let counter = self.counter(pool, resource_id);
        if !counter.exists().await? {
            return Ok(CacheOutcome::Uninitialized);
        }

        // Only the available pool fails fast at zero; pre-locked waits out `counter_wait`.
        if pool == Pool::Available && counter.available_permits().await? <= 0 {
            self.maybe_mark_drift(pool, resource_id).await;
            return Err(ResourceError::wait(
                pool,
                vec![resource_id.to_string()],
                WaitReason::Exhausted,
                "no permits left",
            ));
        }

        match counter.try_acquire(permits, self.config.counter_wait(), ctx.cancellation_token()).await {
            Ok(true) => {
                ctx.record_held(pool, resource_id, permits);
                Ok(CacheOutcome::Applied)
            }
            Ok(false) => {
                let remain = counter.available_permits().await?;
                self.maybe_mark_drift(pool, resource_id).await;
                Err(ResourceError::wait(
                    pool,
                    vec![resource_id.to_string()],
                    WaitReason::Insufficient,
                    format!("require {permits}, remain {remain}"),
                ))
            }
            Err(CoordinationError::Interrupted { operation }) => {
                Err(ResourceError::run(format!("interrupted while acquiring {resource_id}: {operation}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Add `permits` to one counter, recording them as leased.
    pub async fn try_lease(
        &self,
        ctx: &mut OperationContext,
        pool: Pool,
        resource_id: &str,
        permits: u32,
    ) -> Result<CacheOutcome, ResourceError> {
        let counter = self.counter(pool, resource_id);
        if !counter.exists().await? {
            return Ok(CacheOutcome::Uninitialized);
        }
        counter.release(permits).await?;
        ctx.record_leased(pool, resource_id, permits);
        Ok(CacheOutcome::Applied)
    }

    /// [`Self::try_acquire`] over sorted params.
    ///
    /// Counters found missing are reinitialized and the call fails with a
    /// `Wait`; whatever was already taken stays recorded in `ctx` for the
    /// caller to replay.
    pub async fn try_acquire_batch(
        &self,
        ctx: &mut OperationContext,
        pool: Pool,
        params: &[UpdateResourceParam],
    ) -> Result<(), ResourceError> {
        let mut uninitialized = Vec::new();
        for param in params {
            if self.try_acquire(ctx, pool, &param.resource_id, param.num).await? == CacheOutcome::Uninitialized {
                uninitialized.push(param.resource_id.clone());
            }
        }
        self.finish_batch(ctx, pool, uninitialized).await
    }

    /// [`Self::try_lease`] over sorted params. Same failure rules as
    /// [`Self::try_acquire_batch`].
    pub async fn try_lease_batch(
        &self,
        ctx: &mut OperationContext,
        pool: Pool,
        params: &[UpdateResourceParam],
    ) -> Result<(), ResourceError> {
        let mut uninitialized = Vec::new();
        for param in params {
            if self.try_lease(ctx, pool, &param.resource_id, param.num).await? == CacheOutcome::Uninitialized {
                uninitialized.push(param.resource_id.clone());
            }
        }
        self.finish_batch(ctx, pool, uninitialized).await
    }

    async fn finish_batch(
        &self,
        ctx: &mut OperationContext,
        pool: Pool,
        uninitialized: Vec<String>,
    ) -> Result<(), ResourceError> {
        if uninitialized.is_empty() {
            return Ok(());
        }
        debug!(%pool, ids = ?uninitialized, "counters vanished mid-operation, reinitializing");
        self.reinitialize(ctx, pool, &uninitialized).await?;
        Err(ResourceError::wait(pool, uninitialized, WaitReason::Uninitialized, "waiting for init"))
    }

    /// Rebuild counters from the durable store.
    ///
    /// Ids whose counter exists and carries no drift marker are left alone: a
    /// live counter is newer than any batch read. Read locks `ctx` holds on
    /// these ids are dropped first so the write locks can be taken. Write locks
    /// are always released before returning.
    pub async fn reinitialize(
        &self,
        ctx: &mut OperationContext,
        pool: Pool,
        resource_ids: &[String],
    ) -> Result<(), ResourceError> {
        if resource_ids.is_empty() {
            return Ok(());
        }
        let names: Vec<String> = resource_ids.iter().map(|id| pool.lock_name(id)).collect();

        let own_reads = ctx.take_read_locks_named(pool, &names);
        self.locks.unlock_all(own_reads).await;

        let writer = format!("{}/reinit", ctx.holder_id());
        let handles = self
            .locks
            .try_write_lock_all(&names, &writer, self.config.write_lock_wait(), self.config.lock_lease_ms)
            .await
            .map_err(|e| self.lock_error(e, pool, resource_ids))?;

        let result = self.reinitialize_locked(pool, resource_ids).await;
        self.locks.unlock_all(handles).await;
        result
    }

    async fn reinitialize_locked(&self, pool: Pool, resource_ids: &[String]) -> Result<(), ResourceError> {
        let records = self.store.query_batch(resource_ids).await?;
        let records: HashMap<&str, u64> = records.iter().map(|r| (r.resource_id.as_str(), r.count(pool))).collect();

        for resource_id in resource_ids {
            let counter = self.counter(pool, resource_id);
            let is_drifted = self.is_drifted(pool, resource_id).await?;
            if counter.exists().await? && !is_drifted {
                continue;
            }

            let Some(&value) = records.get(resource_id.as_str()) else {
                return Err(ResourceError::run(format!("unknown resource: {resource_id}")));
            };
            self.force_set(&counter, value).await?;
            if is_drifted {
                self.clear_drift(pool, resource_id).await?;
            }
            info!(%pool, resource_id = %resource_id, value, is_drifted, "counter reinitialized from store");
        }
        Ok(())
    }

    async fn force_set(&self, counter: &PermitCounter<K>, value: u64) -> Result<(), ResourceError> {
        let attempts = self.config.force_set_attempts;
        for attempt in 1..=attempts {
            if counter.force_set(value).await? {
                return Ok(());
            }
            debug!(key = counter.key(), attempt, "force set did not apply, retrying");
        }
        error!(key = counter.key(), attempts, "force set exhausted its retries");
        Err(ResourceError::run(format!(
            "could not reset counter {} after {attempts} attempts",
            counter.key()
        )))
    }

    /// Reinitialize any of `resource_ids` whose counter does not exist yet.
    pub async fn ensure_initialized(
        &self,
        ctx: &mut OperationContext,
        pool: Pool,
        resource_ids: &[String],
    ) -> Result<(), ResourceError> {
        let mut missing = Vec::new();
        for resource_id in resource_ids {
            if !self.counter(pool, resource_id).exists().await? {
                missing.push(resource_id.clone());
            }
        }
        self.reinitialize(ctx, pool, &missing).await
    }

    /// Ids among `resource_ids` that carry a drift marker.
    pub async fn check_drift(&self, pool: Pool, resource_ids: &[String]) -> Result<Vec<String>, ResourceError> {
        let mut drifted = Vec::new();
        for resource_id in resource_ids {
            if self.is_drifted(pool, resource_id).await? {
                drifted.push(resource_id.clone());
            }
        }
        Ok(drifted)
    }

    /// Refuse to proceed on drifted counters: rebuild them and fail with
    /// `DataInconsistent` so the caller retries against corrected state.
    pub async fn check_consistency(
        &self,
        ctx: &mut OperationContext,
        pool: Pool,
        resource_ids: &[String],
    ) -> Result<(), ResourceError> {
        let drifted = self.check_drift(pool, resource_ids).await?;
        if drifted.is_empty() {
            return Ok(());
        }
        self.reinitialize(ctx, pool, &drifted).await?;
        Err(ResourceError::inconsistent(pool, drifted, "reinitialized, retry later"))
    }

    /// Rebuild drifted counters without failing; used by read paths.
    pub async fn repair_drift(
        &self,
        ctx: &mut OperationContext,
        pool: Pool,
        resource_ids: &[String],
    ) -> Result<(), ResourceError> {
        let drifted = self.check_drift(pool, resource_ids).await?;
        self.reinitialize(ctx, pool, &drifted).await
    }

    pub async fn is_drifted(&self, pool: Pool, resource_id: &str) -> Result<bool, ResourceError> {
        match self.kv.read(ReadRequest::new(pool.drift_key(resource_id))).await {
            Ok(result) => Ok(result.kv.is_some()),
            Err(KeyValueStoreError::NotFound { .. }) => Ok(false),
            Err(source) => Err(CoordinationError::Storage { source }.into()),
        }
    }

    pub async fn mark_drift(&self, pool: Pool, resource_id: &str) -> Result<(), ResourceError> {
        self.kv
            .write(WriteRequest::set(pool.drift_key(resource_id), DRIFT_MARKER_VALUE))
            .await
            .map_err(|source| CoordinationError::Storage { source })?;
        Ok(())
    }

    pub async fn clear_drift(&self, pool: Pool, resource_id: &str) -> Result<(), ResourceError> {
        self.kv
            .delete(DeleteRequest::new(pool.drift_key(resource_id)))
            .await
            .map_err(|source| CoordinationError::Storage { source })?;
        Ok(())
    }

    /// Flag the resource for repair with the configured probability.
    pub async fn maybe_mark_drift(&self, pool: Pool, resource_id: &str) {
        if !self.adjust.should_adjust() {
            return;
        }
        match self.mark_drift(pool, resource_id).await {
            Ok(()) => info!(%pool, resource_id, rate = self.adjust.rate(), "low count observed, drift marked"),
            Err(e) => warn!(%pool, resource_id, error = %e, "failed to mark drift"),
        }
    }

    /// Record that the store rejected a guarded write and build the error.
    pub async fn store_rejected(&self, pool: Pool, resource_id: &str, operation: &str) -> ResourceError {
        error!(%pool, resource_id, operation, "store rejected guarded write, cache and store disagree");
        if let Err(e) = self.mark_drift(pool, resource_id).await {
            warn!(%pool, resource_id, error = %e, "failed to mark drift");
        }
        ResourceError::inconsistent(pool, vec![resource_id.to_string()], format!("store rejected {operation}"))
    }

    /// Drop a resource's counter and drift marker under its write lock.
    pub async fn delete_cache(
        &self,
        ctx: &mut OperationContext,
        pool: Pool,
        resource_id: &str,
    ) -> Result<(), ResourceError> {
        let name = pool.lock_name(resource_id);
        let own_reads = ctx.take_read_locks_named(pool, std::slice::from_ref(&name));
        self.locks.unlock_all(own_reads).await;

        let ids = [resource_id.to_string()];
        let handle = self
            .locks
            .try_write_lock(&name, ctx.holder_id(), self.config.write_lock_wait(), self.config.lock_lease_ms)
            .await
            .map_err(|e| self.lock_error(e, pool, &ids))?;

        let result = async {
            let counter = self.counter(pool, resource_id);
            if counter.exists().await? {
                counter.delete().await?;
            }
            self.clear_drift(pool, resource_id).await
        }
        .await;

        if let Err(e) = self.locks.unlock(&handle).await {
            warn!(%pool, resource_id, error = %e, "failed to release write lock");
        }
        info!(%pool, resource_id, is_deleted = result.is_ok(), "cache deleted");
        result
    }

    /// Read-lock every id (already in lock order) and record the handles.
    pub async fn acquire_read_locks(
        &self,
        ctx: &mut OperationContext,
        pool: Pool,
        resource_ids: &[String],
    ) -> Result<(), ResourceError> {
        let names: Vec<String> = resource_ids.iter().map(|id| pool.lock_name(id)).collect();
        let handles = self
            .locks
            .try_read_lock_all(&names, ctx.holder_id(), self.config.read_lock_wait(), self.config.lock_lease_ms)
            .await
            .map_err(|e| self.lock_error(e, pool, resource_ids))?;
        ctx.push_read_locks(pool, handles);
        Ok(())
    }

    fn lock_error(&self, e: CoordinationError, pool: Pool, resource_ids: &[String]) -> ResourceError {
        if e.is_timeout() {
            ResourceError::LockWait {
                pool,
                resource_ids: resource_ids.to_vec(),
            }
        } else {
            e.into()
        }
    }

    /// Give back every permit `ctx` took from `pool`.
    pub async fn replay_held(&self, ctx: &mut OperationContext, pool: Pool) {
        for entry in ctx.take_held(pool).into_iter().rev() {
            let counter = self.counter(pool, &entry.resource_id);
            let result = async {
                if counter.exists().await? {
                    counter.release(entry.permits).await?;
                }
                Ok::<_, CoordinationError>(())
            }
            .await;
            match result {
                Ok(()) => debug!(%pool, resource_id = %entry.resource_id, permits = entry.permits, "held permits returned"),
                Err(e) => warn!(%pool, resource_id = %entry.resource_id, error = %e, "failed to return held permits"),
            }
        }
    }

    /// Take back every permit `ctx` added to `pool`.
    ///
    /// Waits at most the counter wait per entry; if the permits have already
    /// been consumed the resource is flagged for repair instead.
    pub async fn replay_leased(&self, ctx: &mut OperationContext, pool: Pool) {
        // Compensation must run even when the operation itself was cancelled.
        let cancel = CancellationToken::new();
        for entry in ctx.take_leased(pool).into_iter().rev() {
            let counter = self.counter(pool, &entry.resource_id);
            let result = async {
                if !counter.exists().await? {
                    return Ok(true);
                }
                counter.try_acquire(entry.permits, self.config.counter_wait(), &cancel).await
            }
            .await;
            match result {
                Ok(true) => debug!(%pool, resource_id = %entry.resource_id, permits = entry.permits, "leased permits taken back"),
                Ok(false) => {
                    warn!(%pool, resource_id = %entry.resource_id, permits = entry.permits, "leased permits already consumed, marking drift");
                    self.mark_drift_best_effort(pool, &entry.resource_id).await;
                }
                Err(e) => {
                    warn!(%pool, resource_id = %entry.resource_id, error = %e, "failed to take back leased permits");
                    self.mark_drift_best_effort(pool, &entry.resource_id).await;
                }
            }
        }
    }

    async fn mark_drift_best_effort(&self, pool: Pool, resource_id: &str) {
        if let Err(e) = self.mark_drift(pool, resource_id).await {
            warn!(%pool, resource_id, error = %e, "failed to mark drift");
        }
    }

    /// Release every lock recorded in `ctx`.
    pub async fn release_locks(&self, ctx: &mut OperationContext) {
        let mut handles: Vec<LockHandle> = Vec::new();
        for pool in Pool::ALL {
            handles.extend(ctx.take_read_locks(pool));
        }
        self.locks.unlock_all(handles).await;
    }

    /// Undo every cache mutation recorded in `ctx` and release its locks.
    pub async fn rollback(&self, ctx: &mut OperationContext) {
        for pool in Pool::ALL {
            self.replay_held(ctx, pool).await;
            self.replay_leased(ctx, pool).await;
        }
        self.release_locks(ctx).await;
        debug_assert!(ctx.is_empty(), "CACHE: context must be empty after rollback");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reservoir_core::DeterministicKeyValueStore;

    use super::*;
    use crate::store::DurableRecord;
    use crate::store::InMemoryResourceStore;

    fn config(rate: u8) -> ReservoirConfig {
        ReservoirConfig {
            auto_adjust_rate: rate,
            counter_wait_ms: 50,
            read_lock_wait_ms: 100,
            write_lock_wait_ms: 100,
            ..Default::default()
        }
    }

    fn accessor(rate: u8) -> (CacheAccessor<DeterministicKeyValueStore, InMemoryResourceStore>, Arc<InMemoryResourceStore>) {
        let store = InMemoryResourceStore::new();
        store.insert(DurableRecord::new("r1", 10, 2));
        store.insert(DurableRecord::new("r2", 0, 0));
        let cache = CacheAccessor::new(DeterministicKeyValueStore::new(), Arc::clone(&store), config(rate));
        (cache, store)
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_absent_counter_needs_init() {
        let (cache, _) = accessor(0);
        let mut ctx = OperationContext::detached();
        let outcome = cache.try_acquire(&mut ctx, Pool::Available, "r1", 1).await.unwrap();
        assert_eq!(outcome, CacheOutcome::Uninitialized);
        assert!(cache.query(Pool::Available, &[QueryResourceParam::new("r1", 1)]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_initialized_loads_both_pools() {
        let (cache, _) = accessor(0);
        let mut ctx = OperationContext::detached();
        cache.ensure_initialized(&mut ctx, Pool::Available, &ids(&["r1"])).await.unwrap();
        cache.ensure_initialized(&mut ctx, Pool::PreLocked, &ids(&["r1"])).await.unwrap();

        assert_eq!(cache.read_permits(Pool::Available, "r1").await.unwrap(), Some(10));
        assert_eq!(cache.read_permits(Pool::PreLocked, "r1").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_reinitialize_unknown_resource_is_run_error() {
        let (cache, _) = accessor(0);
        let mut ctx = OperationContext::detached();
        let err = cache.ensure_initialized(&mut ctx, Pool::Available, &ids(&["ghost"])).await.unwrap_err();
        assert!(matches!(err, ResourceError::Run { .. }));
        // The write lock was released on the error path.
        let status = cache.locks().status(&Pool::Available.lock_name("ghost")).await.unwrap();
        assert!(status.writer_holder.is_none());
    }

    #[tokio::test]
    async fn test_reinitialize_leaves_live_counter_alone() {
        let (cache, _) = accessor(0);
        let mut ctx = OperationContext::detached();
        cache.counter(Pool::Available, "r1").force_set(7).await.unwrap();

        cache.reinitialize(&mut ctx, Pool::Available, &ids(&["r1"])).await.unwrap();
        assert_eq!(cache.read_permits(Pool::Available, "r1").await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_drifted_counter_is_rebuilt_and_marker_cleared() {
        let (cache, _) = accessor(0);
        let mut ctx = OperationContext::detached();
        cache.counter(Pool::Available, "r1").force_set(3).await.unwrap();
        cache.mark_drift(Pool::Available, "r1").await.unwrap();

        let err = cache.check_consistency(&mut ctx, Pool::Available, &ids(&["r1"])).await.unwrap_err();
        assert!(matches!(err, ResourceError::DataInconsistent { .. }));
        assert_eq!(cache.read_permits(Pool::Available, "r1").await.unwrap(), Some(10));
        assert!(!cache.is_drifted(Pool::Available, "r1").await.unwrap());

        cache.check_consistency(&mut ctx, Pool::Available, &ids(&["r1"])).await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_available_is_exhausted_wait() {
        let (cache, _) = accessor(10);
        let mut ctx = OperationContext::detached();
        cache.ensure_initialized(&mut ctx, Pool::Available, &ids(&["r2"])).await.unwrap();

        let err = cache.try_acquire(&mut ctx, Pool::Available, "r2", 1).await.unwrap_err();
        assert_eq!(err.wait_reason(), Some(WaitReason::Exhausted));
        assert!(cache.is_drifted(Pool::Available, "r2").await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_pre_locked_waits_then_is_insufficient() {
        let (cache, _) = accessor(0);
        let mut ctx = OperationContext::detached();
        cache.ensure_initialized(&mut ctx, Pool::PreLocked, &ids(&["r2"])).await.unwrap();

        let started = tokio::time::Instant::now();
        let err = cache.try_acquire(&mut ctx, Pool::PreLocked, "r2", 1).await.unwrap_err();
        assert_eq!(err.wait_reason(), Some(WaitReason::Insufficient));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(ctx.held(Pool::PreLocked).is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_is_wait_with_amounts() {
        let (cache, _) = accessor(0);
        let mut ctx = OperationContext::detached();
        cache.ensure_initialized(&mut ctx, Pool::Available, &ids(&["r1"])).await.unwrap();

        let err = cache.try_acquire(&mut ctx, Pool::Available, "r1", 11).await.unwrap_err();
        assert_eq!(err.wait_reason(), Some(WaitReason::Insufficient));
        assert!(err.to_string().contains("require 11, remain 10"));
        assert!(ctx.held(Pool::Available).is_empty());
        assert!(!cache.is_drifted(Pool::Available, "r1").await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_acquire_is_run_error() {
        let (cache, _) = accessor(0);
        let cancel = CancellationToken::new();
        let mut ctx = OperationContext::new("h", cancel.clone());
        cache.ensure_initialized(&mut ctx, Pool::Available, &ids(&["r1"])).await.unwrap();

        cancel.cancel();
        let err = cache.try_acquire(&mut ctx, Pool::Available, "r1", 20).await.unwrap_err();
        assert!(matches!(err, ResourceError::Run { .. }));
    }

    #[tokio::test]
    async fn test_rollback_restores_both_logs() {
        let (cache, _) = accessor(0);
        let mut ctx = OperationContext::detached();
        let r1 = ids(&["r1"]);
        cache.ensure_initialized(&mut ctx, Pool::Available, &r1).await.unwrap();
        cache.ensure_initialized(&mut ctx, Pool::PreLocked, &r1).await.unwrap();
        cache.acquire_read_locks(&mut ctx, Pool::Available, &r1).await.unwrap();

        cache.try_acquire(&mut ctx, Pool::Available, "r1", 4).await.unwrap();
        cache.try_lease(&mut ctx, Pool::PreLocked, "r1", 4).await.unwrap();
        assert_eq!(cache.read_permits(Pool::Available, "r1").await.unwrap(), Some(6));
        assert_eq!(cache.read_permits(Pool::PreLocked, "r1").await.unwrap(), Some(6));

        cache.rollback(&mut ctx).await;
        assert_eq!(cache.read_permits(Pool::Available, "r1").await.unwrap(), Some(10));
        assert_eq!(cache.read_permits(Pool::PreLocked, "r1").await.unwrap(), Some(2));
        let status = cache.locks().status(&Pool::Available.lock_name("r1")).await.unwrap();
        assert_eq!(status.reader_count, 0);
    }

    #[tokio::test]
    async fn test_leased_replay_marks_drift_when_permits_are_gone() {
        let (cache, _) = accessor(0);
        let mut ctx = OperationContext::detached();
        cache.ensure_initialized(&mut ctx, Pool::PreLocked, &ids(&["r1"])).await.unwrap();
        cache.try_lease(&mut ctx, Pool::PreLocked, "r1", 3).await.unwrap();

        // Someone else consumed everything in between.
        cache.counter(Pool::PreLocked, "r1").force_set(0).await.unwrap();

        cache.replay_leased(&mut ctx, Pool::PreLocked).await;
        assert!(cache.is_drifted(Pool::PreLocked, "r1").await.unwrap());
        assert!(ctx.is_empty());
    }

    #[tokio::test]
    async fn test_batch_with_vanished_counter_reinitializes_and_waits() {
        let (cache, _) = accessor(0);
        let mut ctx = OperationContext::detached();
        let both = ids(&["r1", "r2"]);
        cache.ensure_initialized(&mut ctx, Pool::PreLocked, &both).await.unwrap();
        cache.counter(Pool::PreLocked, "r2").delete().await.unwrap();

        let params = vec![UpdateResourceParam::new("r1", 1), UpdateResourceParam::new("r2", 1)];
        let err = cache.try_lease_batch(&mut ctx, Pool::PreLocked, &params).await.unwrap_err();
        assert_eq!(err.wait_reason(), Some(WaitReason::Uninitialized));
        assert_eq!(ctx.leased(Pool::PreLocked).len(), 1);
        assert_eq!(cache.read_permits(Pool::PreLocked, "r2").await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_query_flags_low_counts_at_full_rate() {
        let (cache, _) = accessor(10);
        let mut ctx = OperationContext::detached();
        cache.ensure_initialized(&mut ctx, Pool::Available, &ids(&["r1"])).await.unwrap();

        let results = cache.query(Pool::Available, &[QueryResourceParam::new("r1", 5)]).await.unwrap();
        assert!(results[0].fill);
        assert!(!cache.is_drifted(Pool::Available, "r1").await.unwrap());

        let results = cache.query(Pool::Available, &[QueryResourceParam::new("r1", 50)]).await.unwrap();
        assert!(!results[0].fill);
        assert!(cache.is_drifted(Pool::Available, "r1").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_cache_removes_counter_and_marker() {
        let (cache, _) = accessor(0);
        let mut ctx = OperationContext::detached();
        cache.ensure_initialized(&mut ctx, Pool::Available, &ids(&["r1"])).await.unwrap();
        cache.acquire_read_locks(&mut ctx, Pool::Available, &ids(&["r1"])).await.unwrap();
        cache.mark_drift(Pool::Available, "r1").await.unwrap();

        cache.delete_cache(&mut ctx, Pool::Available, "r1").await.unwrap();
        assert_eq!(cache.read_permits(Pool::Available, "r1").await.unwrap(), None);
        assert!(!cache.is_drifted(Pool::Available, "r1").await.unwrap());
        assert!(ctx.read_locks(Pool::Available).is_empty());
    }

    #[tokio::test]
    async fn test_read_lock_blocks_reinitialization() {
        let (cache, _) = accessor(0);
        let r1 = ids(&["r1"]);
        let mut reader = OperationContext::detached();
        cache.acquire_read_locks(&mut reader, Pool::Available, &r1).await.unwrap();

        let mut other = OperationContext::detached();
        let started = tokio::time::Instant::now();
        let err = cache.reinitialize(&mut other, Pool::Available, &r1).await.unwrap_err();
        assert!(matches!(err, ResourceError::LockWait { .. }));
        assert!(started.elapsed() >= Duration::from_millis(100));

        cache.release_locks(&mut reader).await;
        cache.reinitialize(&mut other, Pool::Available, &r1).await.unwrap();
    }
}
