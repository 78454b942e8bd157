//! Batch apply against a real ledger.

use crate::fixtures::*;
use crate::helpers::*;
use cubapi_migrations::{checksum, Migration};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_apply_fresh_database() {
    let db = TestDb::new();
    let migrator = db.migrator().await;

    let applied = migrator.apply(sample_catalog()).await.unwrap();

    let versions: Vec<i64> = applied.iter().map(|r| r.version).collect();
    assert_eq!(versions, vec![1, 2, 3, 4]);
    assert_eq!(ledger_versions(&migrator).await, vec![1, 2, 3, 4]);

    for table in ["users", "names", "attendance"] {
        assert!(table_exists(&migrator, table).await, "{table} missing");
    }
    assert_eq!(row_count(&migrator, "names").await, 1);
}

#[tokio::test]
async fn test_apply_is_idempotent() {
    let db = TestDb::new();
    let migrator = db.migrator().await;

    migrator.apply(sample_catalog()).await.unwrap();
    let before = migrator.applied().await.unwrap();

    let second = migrator.apply(sample_catalog()).await.unwrap();
    assert!(second.is_empty());

    // Nothing re-ran: the seeded row would have been duplicated otherwise.
    assert_eq!(migrator.applied().await.unwrap(), before);
    assert_eq!(row_count(&migrator, "names").await, 1);
}

#[tokio::test]
async fn test_ledger_rows_describe_the_migrations() {
    let db = TestDb::new();
    let migrator = db.migrator().await;
    let catalog = sample_catalog();

    migrator.apply(catalog.clone()).await.unwrap();
    let rows = migrator.applied().await.unwrap();

    for (row, migration) in rows.iter().zip(&catalog) {
        assert_eq!(row.version, migration.version);
        assert_eq!(row.checksum, checksum(&migration.script));
        assert_eq!(row.checksum.len(), 64);
        assert_eq!(row.date_created, migration.authored_at);
        assert_eq!(row.description, migration.description);
        assert!(row.matches(migration));
    }
}

#[tokio::test]
async fn test_date_applied_strictly_increases() {
    let db = TestDb::new();
    let migrator = db.migrator().await;

    migrator.apply(sample_prefix(2)).await.unwrap();
    migrator.apply(sample_catalog()).await.unwrap();

    let rows = migrator.applied().await.unwrap();
    assert_eq!(rows.len(), 4);
    for pair in rows.windows(2) {
        assert!(
            pair[0].date_applied < pair[1].date_applied,
            "V{} applied at {} is not before V{} at {}",
            pair[0].version,
            pair[0].date_applied,
            pair[1].version,
            pair[1].date_applied
        );
    }
}

#[tokio::test]
async fn test_apply_sorts_unordered_input() {
    let db = TestDb::new();
    let migrator = db.migrator().await;

    let mut shuffled = sample_catalog();
    shuffled.reverse();

    // V2 alters the table V1 creates, so this only succeeds in version order.
    let applied = migrator.apply(shuffled).await.unwrap();
    let versions: Vec<i64> = applied.iter().map(|r| r.version).collect();
    assert_eq!(versions, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_resume_from_partial_history() {
    let db = TestDb::new();
    let migrator = db.migrator().await;

    migrator.apply(sample_prefix(2)).await.unwrap();
    assert!(!table_exists(&migrator, "names").await);

    let applied = migrator.apply(sample_catalog()).await.unwrap();
    let versions: Vec<i64> = applied.iter().map(|r| r.version).collect();
    assert_eq!(versions, vec![3, 4]);
    assert_eq!(ledger_versions(&migrator).await, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_empty_catalog_bootstraps_ledger() {
    let db = TestDb::new();
    let migrator = db.migrator().await;

    let applied = migrator.apply(Vec::<Migration>::new()).await.unwrap();

    assert!(applied.is_empty());
    assert!(table_exists(&migrator, "migrations").await);
    assert!(migrator.latest_applied().await.unwrap().is_none());
}

#[tokio::test]
async fn test_init_is_idempotent() {
    let db = TestDb::new();
    let migrator = db.migrator().await;

    migrator.init().await.unwrap();
    migrator.apply(sample_prefix(1)).await.unwrap();
    migrator.init().await.unwrap();
    migrator.init().await.unwrap();

    assert_eq!(ledger_versions(&migrator).await, vec![1]);
}

#[tokio::test]
async fn test_latest_applied() {
    let db = TestDb::new();
    let migrator = db.migrator().await;

    migrator.apply(sample_prefix(3)).await.unwrap();

    let latest = migrator.latest_applied().await.unwrap().unwrap();
    assert_eq!(latest.version, 3);
    assert_eq!(latest.description, "Track how many times each name has been seen.");
}

#[tokio::test]
async fn test_custom_ledger_table() {
    let db = TestDb::new();
    let migrator = db.migrator_with(|c| c.table_name("schema_history")).await;

    migrator.apply(sample_prefix(1)).await.unwrap();

    assert!(table_exists(&migrator, "schema_history").await);
    assert!(!table_exists(&migrator, "migrations").await);
    assert_eq!(migrator.ledger().table(), "schema_history");
}

#[tokio::test]
async fn test_plan_does_not_apply() {
    let db = TestDb::new();
    let migrator = db.migrator().await;

    let plan = migrator.plan(sample_catalog()).await.unwrap();
    let versions: Vec<i64> = plan.iter().map(|m| m.version).collect();
    assert_eq!(versions, vec![1, 2, 3, 4]);
    assert!(!table_exists(&migrator, "users").await);

    migrator.apply(sample_prefix(3)).await.unwrap();
    let plan = migrator.plan(sample_catalog()).await.unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].version, 4);
}

#[tokio::test]
async fn test_separate_migrators_share_the_ledger() {
    let db = TestDb::new();

    db.migrator().await.apply(sample_prefix(2)).await.unwrap();

    let restarted = db.migrator().await;
    let applied = restarted.apply(sample_catalog()).await.unwrap();
    assert_eq!(applied.len(), 2);
    assert_eq!(applied[0].version, 3);
}
