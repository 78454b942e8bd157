//! Cancellation and deadlines roll the batch back.

use crate::fixtures::*;
use crate::helpers::*;
use cubapi_migrations::MigrationError;
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_cancel_before_start() {
    let db = TestDb::new();
    let migrator = db.migrator().await;

    let err = migrator
        .apply_until(sample_catalog(), std::future::ready(()))
        .await
        .unwrap_err();

    assert!(matches!(err, MigrationError::Cancelled));
    assert!(!table_exists(&migrator, "users").await);
}

#[tokio::test]
async fn test_cancel_mid_batch_rolls_back() {
    let db = TestDb::new();
    let migrator = db.migrator().await;
    migrator.init().await.unwrap();

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = tx.send(());
    });

    let started = Instant::now();
    let err = migrator
        .apply_until(vec![create_table(1, "first"), slow(2)], async {
            let _ = rx.await;
        })
        .await
        .unwrap_err();

    // Returns without waiting for the slow script to finish.
    assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
    assert!(matches!(err, MigrationError::Cancelled));
    assert!(!table_exists(&migrator, "first").await);
    assert!(ledger_versions(&migrator).await.is_empty());
}

#[tokio::test]
async fn test_deadline_rolls_back() {
    let db = TestDb::new();
    let migrator = db
        .migrator_with(|c| c.migration_timeout(Duration::from_millis(250)))
        .await;
    migrator.init().await.unwrap();

    let started = Instant::now();
    let err = migrator
        .apply(vec![create_table(1, "first"), slow(2), create_table(3, "third")])
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
    assert!(matches!(err, MigrationError::Timeout(d) if d == Duration::from_millis(250)));
    assert!(!table_exists(&migrator, "first").await);
    assert!(!table_exists(&migrator, "third").await);
    assert!(ledger_versions(&migrator).await.is_empty());
}

#[tokio::test]
async fn test_generous_deadline_does_not_interfere() {
    let db = TestDb::new();
    let migrator = db
        .migrator_with(|c| c.migration_timeout(Duration::from_secs(60)))
        .await;

    let applied = migrator.apply(sample_catalog()).await.unwrap();
    assert_eq!(applied.len(), 4);
}
