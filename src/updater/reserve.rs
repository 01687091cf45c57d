//! Available ↔ pre-locked transitions.

use std::sync::Arc;

use reservoir_core::KeyValueStore;
use tracing::debug;

use super::ResourceUpdater;
use super::UpdateScope;
use crate::cache::OperationContext;
use crate::config::ReservoirConfig;
use crate::error::ResourceError;
use crate::pool::Pool;
use crate::store::ResourceStore;
use crate::store::StoreTransaction;
use crate::types::QueryResourceParam;
use crate::types::QueryResourceResult;
use crate::types::UpdateResourceParam;
use crate::types::normalize_params;
use crate::types::normalize_queries;
use crate::types::resource_ids;

/// Reservation orchestrator, layered on a [`ResourceUpdater`].
///
/// Calls touching both pools lock the AVAILABLE ids before the PRE_LOCKED
/// ids, each in sorted order, so all calls share one lock order.
pub struct ReservationUpdater<K: KeyValueStore + ?Sized + 'static, S: ResourceStore> {
    basic: ResourceUpdater<K, S>,
}

impl<K: KeyValueStore + ?Sized + 'static, S: ResourceStore> Clone for ReservationUpdater<K, S> {
    fn clone(&self) -> Self {
        Self {
            basic: self.basic.clone(),
        }
    }
}

impl<K: KeyValueStore + ?Sized + 'static, S: ResourceStore> ReservationUpdater<K, S> {
    pub fn new(basic: ResourceUpdater<K, S>) -> Self {
        Self { basic }
    }

    /// Shortcut for `ReservationUpdater::new(ResourceUpdater::new(..))`.
    pub fn with_stores(kv: Arc<K>, store: Arc<S>, config: ReservoirConfig) -> Self {
        Self::new(ResourceUpdater::new(kv, store, config))
    }

    pub fn basic(&self) -> &ResourceUpdater<K, S> {
        &self.basic
    }

    pub async fn begin(&self) -> Result<UpdateScope<K, S>, ResourceError> {
        self.basic.begin().await
    }

    /// Pre-locked count for one resource, loading and repairing it first.
    pub async fn query_pre_locked(
        &self,
        param: QueryResourceParam,
    ) -> Result<Option<QueryResourceResult>, ResourceError> {
        Ok(self.query_pre_locked_batch(vec![param]).await?.into_iter().next())
    }

    /// Pre-locked counts, loading and repairing the counters first.
    pub async fn query_pre_locked_batch(
        &self,
        params: Vec<QueryResourceParam>,
    ) -> Result<Vec<QueryResourceResult>, ResourceError> {
        let params = normalize_queries(params)?;
        let mut ids: Vec<String> = params.iter().map(|p| p.resource_id.clone()).collect();
        ids.dedup();

        let cache = self.basic.cache();
        let mut ctx = OperationContext::detached();
        let prepared = async {
            cache.ensure_initialized(&mut ctx, Pool::PreLocked, &ids).await?;
            cache.repair_drift(&mut ctx, Pool::PreLocked, &ids).await
        }
        .await;
        cache.release_locks(&mut ctx).await;
        prepared?;

        cache.query(Pool::PreLocked, &params).await
    }

    /// Reserve: available → pre-locked.
    ///
    /// Cache first: take AVAILABLE permits, grow PRE_LOCKED, then move the
    /// units in the store under the AVAILABLE guard.
    pub async fn try_subtract_available_add_pre_lock(
        &self,
        scope: &mut UpdateScope<K, S>,
        params: Vec<UpdateResourceParam>,
    ) -> Result<(), ResourceError> {
        let params = normalize_params(params, false)?;
        let mut ctx = scope.child();
        let result = match scope.tx() {
            Ok(tx) => self.reserve_in(tx, &mut ctx, &params).await,
            Err(e) => Err(e),
        };
        scope.absorb(ctx, result).await
    }

    async fn reserve_in(
        &self,
        tx: &mut S::Transaction,
        ctx: &mut OperationContext,
        params: &[UpdateResourceParam],
    ) -> Result<(), ResourceError> {
        let cache = self.basic.cache();
        let ids = self.prepare_both_pools(ctx, params).await?;

        cache.try_acquire_batch(ctx, Pool::Available, params).await?;
        cache.try_lease_batch(ctx, Pool::PreLocked, params).await?;
        for param in params {
            let rows = tx
                .conditional_subtract_add_pair(&param.resource_id, Pool::Available, Pool::PreLocked, param.num)
                .await?;
            if rows == 0 {
                return Err(cache.store_rejected(Pool::Available, &param.resource_id, "reserve").await);
            }
        }
        debug!(holder = ctx.holder_id(), ids = ?ids, "reserved");
        Ok(())
    }

    /// Release a reservation: pre-locked → available.
    ///
    /// Store first, unlike every other transition: the store move happens
    /// before the cache is touched, so AVAILABLE never shows units the store
    /// would still refuse.
    pub async fn try_subtract_pre_lock_add_available(
        &self,
        scope: &mut UpdateScope<K, S>,
        params: Vec<UpdateResourceParam>,
    ) -> Result<(), ResourceError> {
        let params = normalize_params(params, false)?;
        let mut ctx = scope.child();
        let result = match scope.tx() {
            Ok(tx) => self.release_in(tx, &mut ctx, &params).await,
            Err(e) => Err(e),
        };
        scope.absorb(ctx, result).await
    }

    async fn release_in(
        &self,
        tx: &mut S::Transaction,
        ctx: &mut OperationContext,
        params: &[UpdateResourceParam],
    ) -> Result<(), ResourceError> {
        let cache = self.basic.cache();
        let ids = self.prepare_both_pools(ctx, params).await?;

        for param in params {
            let rows = tx
                .conditional_subtract_add_pair(&param.resource_id, Pool::PreLocked, Pool::Available, param.num)
                .await?;
            if rows == 0 {
                return Err(cache.store_rejected(Pool::PreLocked, &param.resource_id, "release").await);
            }
        }
        cache.try_acquire_batch(ctx, Pool::PreLocked, params).await?;
        cache.try_lease_batch(ctx, Pool::Available, params).await?;
        debug!(holder = ctx.holder_id(), ids = ?ids, "reservation released");
        Ok(())
    }

    /// Consume a reservation: pre-locked → consumed.
    pub async fn try_subtract_pre_lock(
        &self,
        scope: &mut UpdateScope<K, S>,
        params: Vec<UpdateResourceParam>,
    ) -> Result<(), ResourceError> {
        self.basic.subtract(scope, Pool::PreLocked, params).await
    }

    /// → pre-locked. An empty list is a no-op.
    pub async fn add_pre_lock(
        &self,
        scope: &mut UpdateScope<K, S>,
        params: Vec<UpdateResourceParam>,
    ) -> Result<(), ResourceError> {
        self.basic.add(scope, Pool::PreLocked, params).await
    }

    /// Drop the pre-locked counter so the next access reloads it.
    pub async fn delete_pre_lock_cache(&self, resource_id: &str) -> Result<(), ResourceError> {
        self.basic.delete_cache(Pool::PreLocked, resource_id).await
    }

    /// Initialize and drift-check both pools, then read-lock AVAILABLE ids
    /// followed by PRE_LOCKED ids.
    async fn prepare_both_pools(
        &self,
        ctx: &mut OperationContext,
        params: &[UpdateResourceParam],
    ) -> Result<Vec<String>, ResourceError> {
        let cache = self.basic.cache();
        let ids = resource_ids(params);
        for pool in Pool::ALL {
            cache.ensure_initialized(ctx, pool, &ids).await?;
            cache.check_consistency(ctx, pool, &ids).await?;
        }
        for pool in Pool::ALL {
            cache.acquire_read_locks(ctx, pool, &ids).await?;
        }
        Ok(ids)
    }
}

impl<K: KeyValueStore + ?Sized + 'static, S: ResourceStore> From<ResourceUpdater<K, S>> for ReservationUpdater<K, S> {
    fn from(basic: ResourceUpdater<K, S>) -> Self {
        Self::new(basic)
    }
}

#[cfg(test)]
mod tests {
    use reservoir_core::DeterministicKeyValueStore;

    use super::*;
    use crate::error::WaitReason;
    use crate::store::DurableRecord;
    use crate::store::InMemoryResourceStore;

    type Updater = ReservationUpdater<DeterministicKeyValueStore, InMemoryResourceStore>;

    fn updater() -> (Updater, Arc<InMemoryResourceStore>) {
        let store = InMemoryResourceStore::new();
        store.insert(DurableRecord::new("a", 6, 1));
        let config = ReservoirConfig {
            auto_adjust_rate: 0,
            counter_wait_ms: 50,
            read_lock_wait_ms: 100,
            write_lock_wait_ms: 100,
            ..Default::default()
        };
        (ReservationUpdater::with_stores(DeterministicKeyValueStore::new(), Arc::clone(&store), config), store)
    }

    fn one(num: u32) -> Vec<UpdateResourceParam> {
        vec![UpdateResourceParam::new("a", num)]
    }

    async fn cached(updater: &Updater) -> (Option<i64>, Option<i64>) {
        let permit = updater.basic().read_cached("a").await.unwrap();
        (permit.available, permit.pre_locked)
    }

    #[tokio::test]
    async fn test_reserve_moves_units_in_store_and_cache() {
        let (updater, store) = updater();
        let mut scope = updater.begin().await.unwrap();
        updater.try_subtract_available_add_pre_lock(&mut scope, one(4)).await.unwrap();
        scope.commit().await.unwrap();

        assert_eq!(store.get("a").unwrap(), DurableRecord::new("a", 2, 5));
        assert_eq!(cached(&updater).await, (Some(2), Some(5)));
    }

    #[tokio::test]
    async fn test_reserve_beyond_available_leaves_everything_untouched() {
        let (updater, store) = updater();
        let mut scope = updater.begin().await.unwrap();
        let err = updater.try_subtract_available_add_pre_lock(&mut scope, one(7)).await.unwrap_err();
        assert_eq!(err.wait_reason(), Some(WaitReason::Insufficient));
        scope.rollback().await;

        assert_eq!(store.get("a").unwrap(), DurableRecord::new("a", 6, 1));
        assert_eq!(cached(&updater).await, (Some(6), Some(1)));
    }

    // Release writes the store before the cache; a release larger than the
    // stored reservation is rejected by the store before AVAILABLE grows.
    #[tokio::test]
    async fn test_release_is_store_first() {
        let (updater, store) = updater();
        let mut scope = updater.begin().await.unwrap();
        let err = updater.try_subtract_pre_lock_add_available(&mut scope, one(3)).await.unwrap_err();
        assert!(matches!(err, ResourceError::DataInconsistent { .. }));
        assert!(scope.context().is_empty());
        scope.rollback().await;

        assert_eq!(cached(&updater).await, (Some(6), Some(1)));
        assert!(updater.basic().cache().is_drifted(Pool::PreLocked, "a").await.unwrap());
        assert_eq!(store.get("a").unwrap(), DurableRecord::new("a", 6, 1));
    }

    #[tokio::test]
    async fn test_consume_reservation() {
        let (updater, store) = updater();
        let mut scope = updater.begin().await.unwrap();
        updater.try_subtract_available_add_pre_lock(&mut scope, one(2)).await.unwrap();
        updater.try_subtract_pre_lock(&mut scope, one(3)).await.unwrap();
        scope.commit().await.unwrap();

        assert_eq!(store.get("a").unwrap(), DurableRecord::new("a", 4, 0));
        assert_eq!(cached(&updater).await, (Some(4), Some(0)));
    }

    #[tokio::test]
    async fn test_add_pre_lock() {
        let (updater, store) = updater();
        let mut scope = updater.begin().await.unwrap();
        updater.add_pre_lock(&mut scope, one(2)).await.unwrap();
        updater.add_pre_lock(&mut scope, vec![]).await.unwrap();
        scope.commit().await.unwrap();

        assert_eq!(store.get("a").unwrap().pre_locked, 3);
        assert_eq!(cached(&updater).await.1, Some(3));
    }

    #[tokio::test]
    async fn test_query_pre_locked_initializes_and_repairs() {
        let (updater, _) = updater();
        let result = updater.query_pre_locked(QueryResourceParam::new("a", 1)).await.unwrap().unwrap();
        assert_eq!(result.num, 1);
        assert!(result.fill);

        let cache = updater.basic().cache();
        cache.counter(Pool::PreLocked, "a").force_set(9).await.unwrap();
        cache.mark_drift(Pool::PreLocked, "a").await.unwrap();

        let result = updater.query_pre_locked(QueryResourceParam::new("a", 2)).await.unwrap().unwrap();
        assert_eq!(result.num, 1);
        assert!(!result.fill);
        assert!(!cache.is_drifted(Pool::PreLocked, "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_pre_lock_cache_reloads_on_next_use() {
        let (updater, _) = updater();
        updater.query_pre_locked(QueryResourceParam::new("a", 1)).await.unwrap();
        updater.delete_pre_lock_cache("a").await.unwrap();
        assert_eq!(cached(&updater).await.1, None);

        let mut scope = updater.begin().await.unwrap();
        updater.try_subtract_pre_lock(&mut scope, one(1)).await.unwrap();
        scope.commit().await.unwrap();
        assert_eq!(cached(&updater).await.1, Some(0));
    }

    #[tokio::test]
    async fn test_empty_and_duplicate_params_are_run_errors() {
        let (updater, _) = updater();
        let mut scope = updater.begin().await.unwrap();
        let err = updater.try_subtract_available_add_pre_lock(&mut scope, vec![]).await.unwrap_err();
        assert!(matches!(err, ResourceError::Run { .. }));
        let dup = vec![UpdateResourceParam::new("a", 1), UpdateResourceParam::new("a", 1)];
        let err = updater.try_subtract_pre_lock_add_available(&mut scope, dup).await.unwrap_err();
        assert!(matches!(err, ResourceError::Run { .. }));
        scope.rollback().await;
    }
}
