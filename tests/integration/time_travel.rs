#![allow(missing_docs)]

use std::sync::Arc;

use tessera::connection::{Connection, ConnectionConfig, ConnectionOptions};
use tessera::db::async_db::AsyncDb;
use tessera::db::IndexingOptions;
use tessera::flake::FlakeValue;
use tessera::ledger::indexer::Indexer;
use tessera::ledger::CommitOpts;
use tessera::nameservice::memory::MemoryNameService;
use tessera::storage::{memory::MemoryStore, Catalog};
use tessera::transact::{ObjectSpec, TxOp};
use tessera::LedgerError;

fn connection() -> Connection {
    let ns = Arc::new(MemoryNameService::new());
    Connection::connect(ConnectionConfig {
        catalog: Arc::new(Catalog::new(Arc::new(MemoryStore::new()))),
        primary_publisher: ns.clone(),
        secondary_publishers: vec![],
        publications: vec![ns],
        options: ConnectionOptions::default(),
        indexing: IndexingOptions {
            indexing_disabled: true,
            ..Default::default()
        },
    })
}

fn assert_op(o: i64) -> TxOp {
    TxOp::Assert {
        s: "ex:a".to_string(),
        p: "ex:p".to_string(),
        o: ObjectSpec::Value(FlakeValue::Int(o)),
    }
}

fn retract_op(o: i64) -> TxOp {
    TxOp::Retract {
        s: "ex:a".to_string(),
        p: "ex:p".to_string(),
        o: ObjectSpec::Value(FlakeValue::Int(o)),
    }
}

#[tokio::test]
async fn as_of_answers_with_superseded_value() {
    let conn = connection();
    let ledger = conn.create_ledger("alice/main").await.unwrap();

    let db0 = ledger.current_db().unwrap().db().await.unwrap();
    let staged = db0.stage(&[assert_op(1)]).unwrap();
    let db1 = ledger.commit(staged, CommitOpts::default()).await.unwrap();
    let staged = db1.stage(&[assert_op(2), retract_op(1)]).unwrap();
    let db2 = ledger.commit(staged, CommitOpts::default()).await.unwrap();

    let s = db2.subject_sid("ex:a").unwrap();
    let p = db2.predicate_sid("ex:p").unwrap();

    assert_eq!(
        db2.match_objects(s, p).await.unwrap(),
        vec![FlakeValue::Int(2)]
    );
    let past = db2.as_of(-1).unwrap();
    assert_eq!(
        past.match_objects(s, p).await.unwrap(),
        vec![FlakeValue::Int(1)]
    );
}

#[tokio::test]
async fn as_of_replays_leaf_history_after_indexing() {
    let conn = connection();
    let ledger = conn.create_ledger("indexed/main").await.unwrap();

    let db0 = ledger.current_db().unwrap().db().await.unwrap();
    let staged = db0.stage(&[assert_op(1)]).unwrap();
    let db1 = ledger.commit(staged, CommitOpts::default()).await.unwrap();
    let staged = db1.stage(&[assert_op(2), retract_op(1)]).unwrap();
    let db2 = ledger.commit(staged, CommitOpts::default()).await.unwrap();

    // Force everything through the persistent tree so the superseded
    // assertion lives only in leaf history.
    let indexer = Indexer::new(Arc::clone(&db2.catalog), Arc::clone(&db2.cache));
    let indexed = indexer.index(&db2, true, None).await.unwrap();
    assert!(indexed.novelty.is_empty());

    let s = indexed.subject_sid("ex:a").unwrap();
    let p = indexed.predicate_sid("ex:p").unwrap();
    assert_eq!(
        indexed.match_objects(s, p).await.unwrap(),
        vec![FlakeValue::Int(2)]
    );
    let past = indexed.as_of(-1).unwrap();
    assert_eq!(
        past.match_objects(s, p).await.unwrap(),
        vec![FlakeValue::Int(1)]
    );
    let genesis = indexed.as_of(0).unwrap();
    assert!(genesis.match_objects(s, p).await.unwrap().is_empty());
}

#[tokio::test]
async fn async_handle_defers_time_travel() {
    let conn = connection();
    let ledger = conn.create_ledger("deferred/main").await.unwrap();

    let db0 = ledger.current_db().unwrap().db().await.unwrap();
    let staged = db0.stage(&[assert_op(1)]).unwrap();
    let db1 = ledger.commit(staged, CommitOpts::default()).await.unwrap();
    let staged = db1.stage(&[assert_op(2), retract_op(1)]).unwrap();
    let db2 = ledger.commit(staged, CommitOpts::default()).await.unwrap();

    let s = db2.subject_sid("ex:a").unwrap();
    let p = db2.predicate_sid("ex:p").unwrap();

    let handle = AsyncDb::resolved(db2);
    let past = handle.as_of(-1);
    assert_eq!(past.latest_t(), -1);
    let resolved = past.db().await.unwrap();
    assert_eq!(
        resolved.match_objects(s, p).await.unwrap(),
        vec![FlakeValue::Int(1)]
    );
}

#[tokio::test]
async fn invalid_targets_surface_invalid_time() {
    let conn = connection();
    let ledger = conn.create_ledger("bounds/main").await.unwrap();
    let db0 = ledger.current_db().unwrap().db().await.unwrap();
    let staged = db0.stage(&[assert_op(1)]).unwrap();
    let db1 = ledger.commit(staged, CommitOpts::default()).await.unwrap();

    assert!(matches!(db1.as_of(-5), Err(LedgerError::InvalidTime(_))));
    assert!(matches!(db1.as_of(1), Err(LedgerError::InvalidTime(_))));
}
