//! Direct subtract/add orchestration on a single pool.

use std::sync::Arc;

use reservoir_core::KeyValueStore;
use tracing::debug;

use super::UpdateScope;
use crate::cache::CacheAccessor;
use crate::cache::OperationContext;
use crate::config::ReservoirConfig;
use crate::error::ResourceError;
use crate::pool::Pool;
use crate::store::ResourceStore;
use crate::store::StoreTransaction;
use crate::types::QueryResourceParam;
use crate::types::QueryResourceResult;
use crate::types::ResourcePermit;
use crate::types::UpdateResourceParam;
use crate::types::normalize_params;
use crate::types::normalize_queries;
use crate::types::resource_ids;

/// Available-pool orchestrator.
///
/// Subtracting takes cache permits first and then applies the guarded store
/// write; adding writes the store first and then grows the cache. Either way a
/// failure undoes the cache side before the error is returned.
pub struct ResourceUpdater<K: KeyValueStore + ?Sized + 'static, S: ResourceStore> {
    cache: Arc<CacheAccessor<K, S>>,
}

impl<K: KeyValueStore + ?Sized + 'static, S: ResourceStore> Clone for ResourceUpdater<K, S> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<K: KeyValueStore + ?Sized + 'static, S: ResourceStore> ResourceUpdater<K, S> {
    pub fn new(kv: Arc<K>, store: Arc<S>, config: ReservoirConfig) -> Self {
        Self {
            cache: Arc::new(CacheAccessor::new(kv, store, config)),
        }
    }

    pub fn cache(&self) -> &Arc<CacheAccessor<K, S>> {
        &self.cache
    }

    /// Start a transaction scope for mutating calls.
    pub async fn begin(&self) -> Result<UpdateScope<K, S>, ResourceError> {
        UpdateScope::begin(Arc::clone(&self.cache)).await
    }

    /// Cached available count for one resource; `None` if not cached.
    pub async fn query_available(
        &self,
        param: QueryResourceParam,
    ) -> Result<Option<QueryResourceResult>, ResourceError> {
        Ok(self.cache.query(Pool::Available, std::slice::from_ref(&param)).await?.into_iter().next())
    }

    /// Cached available counts for the resources that are cached.
    pub async fn query_available_batch(
        &self,
        params: Vec<QueryResourceParam>,
    ) -> Result<Vec<QueryResourceResult>, ResourceError> {
        let params = normalize_queries(params)?;
        self.cache.query(Pool::Available, &params).await
    }

    /// Both pools' cached counts, without touching drift state.
    pub async fn read_cached(&self, resource_id: &str) -> Result<ResourcePermit, ResourceError> {
        Ok(ResourcePermit {
            resource_id: resource_id.to_string(),
            available: self.cache.read_permits(Pool::Available, resource_id).await?,
            pre_locked: self.cache.read_permits(Pool::PreLocked, resource_id).await?,
        })
    }

    /// Available → consumed.
    pub async fn try_subtract_available(
        &self,
        scope: &mut UpdateScope<K, S>,
        params: Vec<UpdateResourceParam>,
    ) -> Result<(), ResourceError> {
        self.subtract(scope, Pool::Available, params).await
    }

    pub async fn try_subtract_one_available(
        &self,
        scope: &mut UpdateScope<K, S>,
        resource_id: &str,
        num: u32,
    ) -> Result<(), ResourceError> {
        self.try_subtract_available(scope, vec![UpdateResourceParam::new(resource_id, num)]).await
    }

    /// → available. An empty list is a no-op.
    pub async fn add_available(
        &self,
        scope: &mut UpdateScope<K, S>,
        params: Vec<UpdateResourceParam>,
    ) -> Result<(), ResourceError> {
        self.add(scope, Pool::Available, params).await
    }

    pub async fn add_one_available(
        &self,
        scope: &mut UpdateScope<K, S>,
        resource_id: &str,
        num: u32,
    ) -> Result<(), ResourceError> {
        self.add_available(scope, vec![UpdateResourceParam::new(resource_id, num)]).await
    }

    /// Drop the available counter so the next access reloads it from the store.
    pub async fn delete_available_cache(&self, resource_id: &str) -> Result<(), ResourceError> {
        self.delete_cache(Pool::Available, resource_id).await
    }

    pub fn set_auto_adjust_rate(&self, rate: u8) -> Result<(), ResourceError> {
        self.cache.auto_adjust().set_rate(rate)
    }

    pub fn auto_adjust_rate(&self) -> u8 {
        self.cache.auto_adjust().rate()
    }

    pub(crate) async fn delete_cache(&self, pool: Pool, resource_id: &str) -> Result<(), ResourceError> {
        if resource_id.is_empty() {
            return Err(ResourceError::run("resource id must not be empty"));
        }
        let mut ctx = OperationContext::detached();
        let result = self.cache.delete_cache(&mut ctx, pool, resource_id).await;
        self.cache.release_locks(&mut ctx).await;
        result
    }

    /// Cache-acquire then guarded store subtract, on one pool.
    pub(crate) async fn subtract(
        &self,
        scope: &mut UpdateScope<K, S>,
        pool: Pool,
        params: Vec<UpdateResourceParam>,
    ) -> Result<(), ResourceError> {
        let params = normalize_params(params, false)?;
        let mut ctx = scope.child();
        let result = match scope.tx() {
            Ok(tx) => self.subtract_in(tx, &mut ctx, pool, &params).await,
            Err(e) => Err(e),
        };
        scope.absorb(ctx, result).await
    }

    async fn subtract_in(
        &self,
        tx: &mut S::Transaction,
        ctx: &mut OperationContext,
        pool: Pool,
        params: &[UpdateResourceParam],
    ) -> Result<(), ResourceError> {
        let ids = resource_ids(params);
        self.cache.ensure_initialized(ctx, pool, &ids).await?;
        self.cache.check_consistency(ctx, pool, &ids).await?;
        self.cache.acquire_read_locks(ctx, pool, &ids).await?;
        self.cache.try_acquire_batch(ctx, pool, params).await?;

        for param in params {
            if tx.conditional_subtract(&param.resource_id, pool, param.num).await? == 0 {
                return Err(self.cache.store_rejected(pool, &param.resource_id, "subtract").await);
            }
        }
        debug!(%pool, holder = ctx.holder_id(), ids = ?ids, "subtracted");
        Ok(())
    }

    /// Store add then cache lease, on one pool.
    pub(crate) async fn add(
        &self,
        scope: &mut UpdateScope<K, S>,
        pool: Pool,
        params: Vec<UpdateResourceParam>,
    ) -> Result<(), ResourceError> {
        let params = normalize_params(params, true)?;
        if params.is_empty() {
            return Ok(());
        }
        let mut ctx = scope.child();
        let result = match scope.tx() {
            Ok(tx) => self.add_in(tx, &mut ctx, pool, &params).await,
            Err(e) => Err(e),
        };
        scope.absorb(ctx, result).await
    }

    async fn add_in(
        &self,
        tx: &mut S::Transaction,
        ctx: &mut OperationContext,
        pool: Pool,
        params: &[UpdateResourceParam],
    ) -> Result<(), ResourceError> {
        let ids = resource_ids(params);
        self.cache.ensure_initialized(ctx, pool, &ids).await?;
        self.cache.acquire_read_locks(ctx, pool, &ids).await?;

        for param in params {
            if tx.add(&param.resource_id, pool, param.num).await? == 0 {
                return Err(self.cache.store_rejected(pool, &param.resource_id, "add").await);
            }
        }
        self.cache.try_lease_batch(ctx, pool, params).await?;
        debug!(%pool, holder = ctx.holder_id(), ids = ?ids, "added");
        Ok(())
    }
}
