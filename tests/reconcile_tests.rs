mod common;

use std::collections::{BTreeMap, BTreeSet};

use common::{database, ids, record};
use telemetry_sync::{
    error::SyncError,
    ingest::{ChangeDetector, DetectorMode},
    models::Delta,
    sync::ReconciliationEngine,
};
use tokio_util::sync::CancellationToken;

fn full_detector() -> ChangeDetector {
    ChangeDetector::new(DetectorMode::FullRescan, false)
}

#[tokio::test]
async fn first_scan_then_removal_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let db = database(&dir);
    let mut engine = ReconciliationEngine::new(db.clone());
    let cancel = CancellationToken::new();
    let detector = full_detector();

    let first = detector.diff_full(common::TWO_ROWS, engine.tracked());
    assert_eq!(ids(&first.upserts), vec![1, 2]);
    assert!(first.deletions.is_empty());

    let outcome = engine.apply(&first, &cancel).await;
    assert!(outcome.is_complete());
    assert!(outcome.applied.deleted.is_empty());
    assert_eq!(ids(&outcome.applied.upserted), vec![1, 2]);

    let second = detector.diff_full("1,T1,20.5,A,1.0,50,2,OK,80\n", engine.tracked());
    assert_eq!(ids(&second.upserts), vec![1]);
    assert_eq!(second.deletions, BTreeSet::from([2]));

    let outcome = engine.apply(&second, &cancel).await;
    assert_eq!(outcome.applied.deleted, vec![2]);
    assert_eq!(ids(&db.list_records().await.unwrap()), vec![1]);
}

#[tokio::test]
async fn persisted_ids_converge_to_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let db = database(&dir);
    for id in [3, 5, 8, 13] {
        db.upsert_record(&record(id, 1.0)).await.unwrap();
    }

    let mut engine = ReconciliationEngine::new(db.clone());
    assert_eq!(engine.hydrate().await.unwrap(), 4);

    let text = "5,T5,1,A,1,1,1,OK,1\n21,T21,1,A,1,1,1,OK,1\n8,T8,9,A,1,1,1,OK,1\n";
    let delta = full_detector().diff_full(text, engine.tracked());
    assert_eq!(delta.deletions, BTreeSet::from([3, 13]));

    let outcome = engine.apply(&delta, &CancellationToken::new()).await;
    assert!(outcome.is_complete());
    assert_eq!(outcome.applied.deleted, vec![3, 13]);

    let stored = db.list_records().await.unwrap();
    assert_eq!(ids(&stored), vec![5, 8, 21]);
    assert_eq!(stored[1].temperature, 9.0);
    assert_eq!(
        engine.tracked().keys().copied().collect::<Vec<_>>(),
        vec![5, 8, 21]
    );
}

#[tokio::test]
async fn empty_source_clears_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let db = database(&dir);
    let mut engine = ReconciliationEngine::new(db.clone());
    let cancel = CancellationToken::new();

    let seeded = full_detector().diff_full(common::TWO_ROWS, engine.tracked());
    engine.apply(&seeded, &cancel).await;

    let delta = full_detector().diff_full("", engine.tracked());
    assert!(delta.upserts.is_empty());
    assert_eq!(delta.deletions, BTreeSet::from([1, 2]));

    let outcome = engine.apply(&delta, &cancel).await;
    assert_eq!(outcome.applied.deleted, vec![1, 2]);
    assert_eq!(db.count_records().await.unwrap(), 0);
}

#[tokio::test]
async fn deleting_absent_ids_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let db = database(&dir);
    let mut engine = ReconciliationEngine::new(db.clone());

    // The mirror believes id 9 exists; the store does not have it.
    let delta = Delta {
        upserts: vec![record(1, 1.0)],
        deletions: BTreeSet::from([9]),
        retain: Some(BTreeSet::from([1])),
        malformed: 0,
    };
    let outcome = engine.apply(&delta, &CancellationToken::new()).await;
    assert!(outcome.is_complete());
    assert!(outcome.applied.deleted.is_empty());
    assert_eq!(ids(&outcome.applied.upserted), vec![1]);
}

#[tokio::test]
async fn upsert_replaces_every_field() {
    let dir = tempfile::tempdir().unwrap();
    let db = database(&dir);

    db.upsert_record(&record(1, 10.0)).await.unwrap();
    let mut changed = record(1, 30.0);
    changed.status = "WARN".into();
    changed.humidity = f64::NAN;
    db.upsert_record(&changed).await.unwrap();

    let stored = db.list_records().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].temperature, 30.0);
    assert_eq!(stored[0].status, "WARN");
    assert!(stored[0].humidity.is_nan());
}

#[tokio::test]
async fn incremental_delta_never_deletes() {
    let dir = tempfile::tempdir().unwrap();
    let db = database(&dir);
    db.upsert_record(&record(1, 1.0)).await.unwrap();

    let mut engine = ReconciliationEngine::new(db.clone());
    let detector = ChangeDetector::new(DetectorMode::IncrementalTail, false);
    let tail = detector.diff_tail(b"2,T2,1,A,1,1,1,OK,1\n", 1, &BTreeMap::new());
    assert!(tail.delta.retain.is_none());

    let outcome = engine.apply(&tail.delta, &CancellationToken::new()).await;
    assert!(outcome.applied.deleted.is_empty());
    assert_eq!(ids(&db.list_records().await.unwrap()), vec![1, 2]);
}

#[tokio::test]
async fn failure_mid_delta_reports_only_confirmed_writes() {
    let dir = tempfile::tempdir().unwrap();
    let db = database(&dir);
    db.execute(|conn| {
        conn.execute_batch(
            "CREATE TRIGGER reject_three BEFORE INSERT ON telemetry_data
             WHEN NEW.id = 3
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )?;
        Ok(())
    })
    .await
    .unwrap();

    let mut engine = ReconciliationEngine::new(db.clone());
    let text = "1,T1,1,A,1,1,1,OK,1\n2,T2,1,A,1,1,1,OK,1\n3,T3,1,A,1,1,1,OK,1\n4,T4,1,A,1,1,1,OK,1\n";
    let delta = full_detector().diff_full(text, engine.tracked());

    let outcome = engine.apply(&delta, &CancellationToken::new()).await;
    assert!(matches!(outcome.failure, Some(SyncError::PersistenceFailure(_))));
    assert_eq!(ids(&outcome.applied.upserted), vec![1, 2]);
    assert_eq!(ids(&db.list_records().await.unwrap()), vec![1, 2]);
    assert!(!engine.tracked().contains_key(&3));
}

#[tokio::test]
async fn cancelled_apply_stops_between_writes() {
    let dir = tempfile::tempdir().unwrap();
    let db = database(&dir);
    let mut engine = ReconciliationEngine::new(db.clone());

    let cancel = CancellationToken::new();
    cancel.cancel();

    let delta = full_detector().diff_full(common::TWO_ROWS, engine.tracked());
    let outcome = engine.apply(&delta, &cancel).await;
    assert!(matches!(outcome.failure, Some(SyncError::Cancelled)));
    assert!(outcome.applied.upserted.is_empty());
    assert_eq!(db.count_records().await.unwrap(), 0);
}

#[tokio::test]
async fn cancelled_apply_leaves_stored_rows_alone() {
    let dir = tempfile::tempdir().unwrap();
    let db = database(&dir);
    for id in [1, 2] {
        db.upsert_record(&record(id, 1.0)).await.unwrap();
    }
    let mut engine = ReconciliationEngine::new(db.clone());
    engine.hydrate().await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();

    let delta = Delta {
        upserts: Vec::new(),
        deletions: BTreeSet::from([1, 2]),
        retain: Some(BTreeSet::new()),
        malformed: 0,
    };
    let outcome = engine.apply(&delta, &cancel).await;
    assert!(matches!(outcome.failure, Some(SyncError::Cancelled)));
    assert!(outcome.applied.deleted.is_empty());
    assert_eq!(ids(&db.list_records().await.unwrap()), vec![1, 2]);
    assert_eq!(engine.tracked().len(), 2);
}
