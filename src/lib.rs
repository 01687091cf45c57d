//! Distributed resource admission over a shared counter cache.
//!
//! Many callers reserve and release countable resources against a fast,
//! shared counter cache while a transactional store stays the source of
//! truth. Each resource has two pools:
//!
//! - [`Pool::Available`] - units that can be consumed right away
//! - [`Pool::PreLocked`] - units reserved but not yet consumed
//!
//! The cache may drift from the store. Drift is detected (a guarded store write
//! affects no rows, or a low count is observed) and flagged per resource, and
//! the next access rebuilds the counter from the store under a write lock.
//!
//! # Example
//!
//! ```ignore
//! let updater = ReservationUpdater::with_stores(kv, store, ReservoirConfig::default());
//!
//! let mut scope = updater.begin().await?;
//! updater
//!     .try_subtract_available_add_pre_lock(&mut scope, vec![UpdateResourceParam::new("sku-1", 4)])
//!     .await?;
//! scope.commit().await?;
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod pool;
pub mod store;
pub mod types;
pub mod updater;

pub use cache::CacheAccessor;
pub use cache::OperationContext;
pub use config::ConfigError;
pub use config::ReservoirConfig;
pub use error::ResourceError;
pub use error::WaitReason;
pub use pool::Pool;
pub use store::DurableRecord;
pub use store::InMemoryResourceStore;
pub use store::ResourceStore;
pub use store::StoreError;
pub use store::StoreTransaction;
pub use types::QueryResourceParam;
pub use types::QueryResourceResult;
pub use types::ResourcePermit;
pub use types::UpdateResourceParam;
pub use updater::ReservationUpdater;
pub use updater::ResourceUpdater;
pub use updater::UpdateScope;
