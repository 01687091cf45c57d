//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use reservoir::DurableRecord;
use reservoir::InMemoryResourceStore;
use reservoir::Pool;
use reservoir::ReservationUpdater;
use reservoir::ReservoirConfig;
use reservoir::UpdateResourceParam;
use reservoir_core::DeterministicKeyValueStore;

pub type Updater = ReservationUpdater<DeterministicKeyValueStore, InMemoryResourceStore>;

/// Short waits and no probabilistic drift marking, so outcomes are
/// deterministic.
pub fn test_config() -> ReservoirConfig {
    ReservoirConfig {
        auto_adjust_rate: 0,
        counter_wait_ms: 100,
        read_lock_wait_ms: 500,
        write_lock_wait_ms: 1000,
        ..Default::default()
    }
}

/// Updater over fresh stores seeded with `(id, available, pre_locked)` rows.
pub fn setup(rows: &[(&str, u64, u64)]) -> (Updater, Arc<InMemoryResourceStore>, Arc<DeterministicKeyValueStore>) {
    setup_with(rows, test_config())
}

pub fn setup_with(
    rows: &[(&str, u64, u64)],
    config: ReservoirConfig,
) -> (Updater, Arc<InMemoryResourceStore>, Arc<DeterministicKeyValueStore>) {
    let store = InMemoryResourceStore::new();
    for (id, available, pre_locked) in rows {
        store.insert(DurableRecord::new(*id, *available, *pre_locked));
    }
    let kv = DeterministicKeyValueStore::new();
    let updater = ReservationUpdater::with_stores(Arc::clone(&kv), Arc::clone(&store), config);
    (updater, store, kv)
}

pub fn params(items: &[(&str, u32)]) -> Vec<UpdateResourceParam> {
    items.iter().map(|(id, num)| UpdateResourceParam::new(*id, *num)).collect()
}

/// `(available, pre_locked)` as cached.
pub async fn cached(updater: &Updater, resource_id: &str) -> (Option<i64>, Option<i64>) {
    let permit = updater.basic().read_cached(resource_id).await.unwrap();
    (permit.available, permit.pre_locked)
}

/// `(available, pre_locked)` as committed in the store.
pub fn stored(store: &InMemoryResourceStore, resource_id: &str) -> (u64, u64) {
    let record = store.get(resource_id).unwrap();
    (record.available, record.pre_locked)
}

/// Load both pools of every id into the cache.
pub async fn warm(updater: &Updater, ids: &[&str]) {
    let cache = updater.basic().cache();
    let ids: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
    let mut ctx = reservoir::OperationContext::detached();
    for pool in Pool::ALL {
        cache.ensure_initialized(&mut ctx, pool, &ids).await.unwrap();
    }
}
