//! Resource orchestrators and the transaction scope they run in.
//!
//! Every mutating call runs inside an [`UpdateScope`], which owns one store
//! transaction and the cache compensation gathered by the calls made in it.
//! Committing the scope commits the store and releases the resource locks;
//! rolling it back (explicitly, on a failed commit or on drop) undoes every
//! cache mutation first.

mod basic;
mod reserve;

use std::sync::Arc;

pub use basic::ResourceUpdater;
pub use reserve::ReservationUpdater;
use reservoir_core::KeyValueStore;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::cache::CacheAccessor;
use crate::cache::OperationContext;
use crate::error::ResourceError;
use crate::store::ResourceStore;
use crate::store::StoreTransaction;

/// One logical transaction spanning the durable store and the cache.
///
/// A call that fails inside the scope has its own cache effects undone
/// immediately and poisons the scope: it can then only be rolled back.
pub struct UpdateScope<K: KeyValueStore + ?Sized + 'static, S: ResourceStore> {
    cache: Arc<CacheAccessor<K, S>>,
    id: String,
    tx: Option<S::Transaction>,
    ctx: OperationContext,
    cancel: CancellationToken,
    next_op: u32,
    is_poisoned: bool,
}

impl<K: KeyValueStore + ?Sized + 'static, S: ResourceStore> UpdateScope<K, S> {
    pub(crate) async fn begin(cache: Arc<CacheAccessor<K, S>>) -> Result<Self, ResourceError> {
        let tx = cache.store().begin().await?;
        let id = uuid::Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        debug!(scope = %id, "update scope started");
        Ok(Self {
            ctx: OperationContext::new(id.clone(), cancel.clone()),
            cache,
            id,
            tx: Some(tx),
            cancel,
            next_op: 0,
            is_poisoned: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Cancelling this token interrupts calls blocked on counter permits.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_poisoned(&self) -> bool {
        self.is_poisoned
    }

    /// Compensation and locks accumulated by the successful calls so far.
    pub fn context(&self) -> &OperationContext {
        &self.ctx
    }

    /// Fresh context for the next call, with its own lock holder.
    pub(crate) fn child(&mut self) -> OperationContext {
        self.next_op += 1;
        OperationContext::new(format!("{}/{}", self.id, self.next_op), self.cancel.child_token())
    }

    pub(crate) fn tx(&mut self) -> Result<&mut S::Transaction, ResourceError> {
        if self.is_poisoned {
            return Err(ResourceError::run(format!(
                "scope {} has a failed operation, roll it back",
                self.id
            )));
        }
        self.tx.as_mut().ok_or_else(|| ResourceError::run(format!("scope {} already finished", self.id)))
    }

    /// Keep a successful call's effects, or undo a failed call's effects.
    pub(crate) async fn absorb<T>(
        &mut self,
        mut child: OperationContext,
        result: Result<T, ResourceError>,
    ) -> Result<T, ResourceError> {
        match result {
            Ok(value) => {
                self.ctx.merge(child);
                Ok(value)
            }
            Err(e) => {
                debug!(scope = %self.id, holder = child.holder_id(), error = %e, "operation failed, compensating");
                self.cache.rollback(&mut child).await;
                if self.tx.is_some() {
                    self.is_poisoned = true;
                }
                Err(e)
            }
        }
    }

    /// Commit the store transaction and release the scope's locks.
    ///
    /// A poisoned scope is rolled back instead. If the commit itself fails,
    /// all cache mutations are undone before the error is returned.
    pub async fn commit(mut self) -> Result<(), ResourceError> {
        if self.is_poisoned {
            self.rollback_inner().await;
            return Err(ResourceError::run(format!(
                "scope {} has a failed operation and was rolled back",
                self.id
            )));
        }
        let Some(tx) = self.tx.take() else {
            return Err(ResourceError::run(format!("scope {} already finished", self.id)));
        };

        match tx.commit().await {
            Ok(()) => {
                self.cache.release_locks(&mut self.ctx).await;
                debug!(scope = %self.id, "update scope committed");
                Ok(())
            }
            Err(e) => {
                warn!(scope = %self.id, error = %e, "commit failed, compensating cache");
                self.cache.rollback(&mut self.ctx).await;
                Err(e.into())
            }
        }
    }

    /// Roll back the store transaction and undo every cache mutation.
    pub async fn rollback(mut self) {
        self.rollback_inner().await;
    }

    async fn rollback_inner(&mut self) {
        if let Some(tx) = self.tx.take()
            && let Err(e) = tx.rollback().await
        {
            warn!(scope = %self.id, error = %e, "store rollback failed");
        }
        self.cache.rollback(&mut self.ctx).await;
        debug!(scope = %self.id, "update scope rolled back");
    }
}

impl<K: KeyValueStore + ?Sized + 'static, S: ResourceStore> Drop for UpdateScope<K, S> {
    fn drop(&mut self) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        warn!(scope = %self.id, "update scope dropped without commit or rollback, rolling back");

        let mut ctx = std::mem::take(&mut self.ctx);
        let cache = Arc::clone(&self.cache);
        let scope = self.id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = tx.rollback().await {
                        warn!(scope = %scope, error = %e, "store rollback failed");
                    }
                    cache.rollback(&mut ctx).await;
                });
            }
            Err(_) => {
                warn!(scope = %scope, "no runtime to compensate on; locks expire with their lease");
            }
        }
    }
}
