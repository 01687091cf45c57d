//! End-to-end reservation flows against the in-memory stores.

mod common;

use common::cached;
use common::params;
use common::setup;
use common::stored;
use common::warm;
use reservoir::Pool;
use reservoir::ResourceError;
use reservoir::WaitReason;
use tokio::task::JoinSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_three_concurrent_reservations_of_four_out_of_ten() {
    let (updater, store, _) = setup(&[("r1", 10, 0)]);

    let mut tasks = JoinSet::new();
    for _ in 0..3 {
        let updater = updater.clone();
        tasks.spawn(async move {
            let mut scope = updater.begin().await?;
            match updater.try_subtract_available_add_pre_lock(&mut scope, params(&[("r1", 4)])).await {
                Ok(()) => scope.commit().await,
                Err(e) => {
                    scope.rollback().await;
                    Err(e)
                }
            }
        });
    }

    let mut succeeded = 0;
    let mut waits = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined.unwrap() {
            Ok(()) => succeeded += 1,
            Err(e) => waits.push(e),
        }
    }

    assert_eq!(succeeded, 2);
    assert_eq!(waits.len(), 1);
    assert_eq!(waits[0].wait_reason(), Some(WaitReason::Insufficient), "unexpected failure: {}", waits[0]);
    assert_eq!(stored(&store, "r1"), (2, 8));
    assert_eq!(cached(&updater, "r1").await, (Some(2), Some(8)));
}

#[tokio::test]
async fn test_reserve_then_release_round_trip() {
    let (updater, store, _) = setup(&[("r1", 7, 3)]);
    warm(&updater, &["r1"]).await;

    let mut scope = updater.begin().await.unwrap();
    updater.try_subtract_available_add_pre_lock(&mut scope, params(&[("r1", 5)])).await.unwrap();
    scope.commit().await.unwrap();
    assert_eq!(stored(&store, "r1"), (2, 8));

    // Release goes to the store before the cache; both end where they began.
    let mut scope = updater.begin().await.unwrap();
    updater.try_subtract_pre_lock_add_available(&mut scope, params(&[("r1", 5)])).await.unwrap();
    scope.commit().await.unwrap();

    assert_eq!(stored(&store, "r1"), (7, 3));
    assert_eq!(cached(&updater, "r1").await, (Some(7), Some(3)));
}

#[tokio::test]
async fn test_reserve_and_consume_in_one_scope() {
    let (updater, store, _) = setup(&[("r1", 5, 0), ("r2", 5, 0)]);

    let mut scope = updater.begin().await.unwrap();
    updater
        .try_subtract_available_add_pre_lock(&mut scope, params(&[("r2", 2), ("r1", 3)]))
        .await
        .unwrap();
    updater.try_subtract_pre_lock(&mut scope, params(&[("r1", 3), ("r2", 2)])).await.unwrap();
    scope.commit().await.unwrap();

    assert_eq!(stored(&store, "r1"), (2, 0));
    assert_eq!(stored(&store, "r2"), (3, 0));
    assert_eq!(cached(&updater, "r1").await, (Some(2), Some(0)));
    assert_eq!(cached(&updater, "r2").await, (Some(3), Some(0)));
}

#[tokio::test]
async fn test_batch_reservation_is_all_or_nothing() {
    let (updater, store, _) = setup(&[("r1", 5, 0), ("r2", 1, 0)]);

    let mut scope = updater.begin().await.unwrap();
    let err = updater
        .try_subtract_available_add_pre_lock(&mut scope, params(&[("r1", 2), ("r2", 2)]))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    scope.rollback().await;

    assert_eq!(stored(&store, "r1"), (5, 0));
    assert_eq!(cached(&updater, "r1").await, (Some(5), Some(0)));
    assert_eq!(cached(&updater, "r2").await, (Some(1), Some(0)));
}

#[tokio::test]
async fn test_restock_after_sell_out() {
    let (updater, store, _) = setup(&[("r1", 2, 0)]);

    let mut scope = updater.begin().await.unwrap();
    updater.basic().try_subtract_one_available(&mut scope, "r1", 2).await.unwrap();
    scope.commit().await.unwrap();

    let mut scope = updater.begin().await.unwrap();
    let err = updater.basic().try_subtract_one_available(&mut scope, "r1", 1).await.unwrap_err();
    assert_eq!(err.wait_reason(), Some(WaitReason::Exhausted));
    scope.rollback().await;

    let mut scope = updater.begin().await.unwrap();
    updater.basic().add_one_available(&mut scope, "r1", 3).await.unwrap();
    scope.commit().await.unwrap();

    let mut scope = updater.begin().await.unwrap();
    updater.basic().try_subtract_one_available(&mut scope, "r1", 1).await.unwrap();
    scope.commit().await.unwrap();
    assert_eq!(stored(&store, "r1"), (2, 0));
}

#[tokio::test]
async fn test_release_more_than_reserved_is_rejected_by_store() {
    let (updater, store, _) = setup(&[("r1", 5, 1)]);
    warm(&updater, &["r1"]).await;

    let mut scope = updater.begin().await.unwrap();
    let err = updater.try_subtract_pre_lock_add_available(&mut scope, params(&[("r1", 2)])).await.unwrap_err();
    assert!(matches!(err, ResourceError::DataInconsistent { pool: Pool::PreLocked, .. }));
    scope.rollback().await;

    // The cache was never touched on this path.
    assert_eq!(cached(&updater, "r1").await, (Some(5), Some(1)));
    assert_eq!(stored(&store, "r1"), (5, 1));
}
