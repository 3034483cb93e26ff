#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use tessera::connection::{Connection, ConnectionConfig, ConnectionOptions};
use tessera::db::IndexingOptions;
use tessera::flake::FlakeValue;
use tessera::ledger::indexer::{IndexResult, Indexer};
use tessera::ledger::CommitOpts;
use tessera::nameservice::memory::MemoryNameService;
use tessera::nameservice::{Publication, Publisher};
use tessera::storage::{memory::MemoryStore, Catalog};
use tessera::transact::{ObjectSpec, TxOp};

fn connection(indexing_disabled: bool) -> (Connection, Arc<MemoryNameService>) {
    let ns = Arc::new(MemoryNameService::new());
    let conn = Connection::connect(ConnectionConfig {
        catalog: Arc::new(Catalog::new(Arc::new(MemoryStore::new()))),
        primary_publisher: ns.clone(),
        secondary_publishers: vec![],
        publications: vec![ns.clone()],
        options: ConnectionOptions::default(),
        indexing: IndexingOptions {
            reindex_min_bytes: 64,
            reindex_max_bytes: 4096,
            max_old_indexes: 2,
            indexing_disabled,
        },
    });
    (conn, ns)
}

fn assert_op(s: &str, o: i64) -> TxOp {
    TxOp::Assert {
        s: s.to_string(),
        p: "ex:p".to_string(),
        o: ObjectSpec::Value(FlakeValue::Int(o)),
    }
}

#[tokio::test]
async fn index_result_merges_onto_commits_that_advanced_meanwhile() {
    let (conn, _ns) = connection(true);
    let ledger = conn.create_ledger("race/main").await.unwrap();

    // Commit c1 and snapshot it for the "long" index run.
    let db0 = ledger.current_db().unwrap().db().await.unwrap();
    let staged = db0
        .stage(&(0..6).map(|i| assert_op(&format!("ex:a{i}"), i)).collect::<Vec<_>>())
        .unwrap();
    let db1 = ledger.commit(staged, CommitOpts::default()).await.unwrap();

    // The indexer works against db1 while two more commits land.
    let indexer = Indexer::new(Arc::clone(&db1.catalog), Arc::clone(&db1.cache));
    let indexed_at_c1 = indexer.index(&db1, true, None).await.unwrap();

    let staged = db1.stage(&[assert_op("ex:b", 100)]).unwrap();
    let db2 = ledger.commit(staged, CommitOpts::default()).await.unwrap();
    let staged = db2.stage(&[assert_op("ex:c", 200)]).unwrap();
    let db3 = ledger.commit(staged, CommitOpts::default()).await.unwrap();
    assert_eq!(db3.t, -3);

    // Merging the stale index result grafts the pointer onto the newest
    // commit instead of rewinding the branch.
    let branch = ledger.branch(None).unwrap();
    let outcome = branch.update_index(indexed_at_c1.clone()).await.unwrap();
    assert!(outcome.changed);
    assert_eq!(outcome.current.id, db3.commit.id);
    assert_eq!(outcome.current.index.as_ref().unwrap().data.t, -1);

    // The merged DB answers from both the index (c1 data) and the novelty
    // that arrived afterwards (c2, c3 data).
    let merged = branch.current_db().db().await.unwrap();
    assert_eq!(merged.t, -3);
    let p = merged.predicate_sid("ex:p").unwrap();
    let s_old = merged.subject_sid("ex:a0").unwrap();
    assert_eq!(merged.match_objects(s_old, p).await.unwrap().len(), 1);
    let s_new = merged.subject_sid("ex:c").unwrap();
    assert_eq!(
        merged.match_objects(s_new, p).await.unwrap(),
        vec![FlakeValue::Int(200)]
    );
    // Novelty now holds only what the index does not cover.
    assert_eq!(merged.novelty.len(), 2);
}

#[tokio::test]
async fn future_index_is_rejected() {
    let (conn, _ns) = connection(true);
    let ledger = conn.create_ledger("future/main").await.unwrap();

    let db0 = ledger.current_db().unwrap().db().await.unwrap();
    let staged = db0.stage(&[assert_op("ex:a", 1)]).unwrap();
    let db1 = ledger.commit(staged, CommitOpts::default()).await.unwrap();

    // Index at c1, then pretend the branch is still at genesis by
    // building a second ledger over the same storage snapshot.
    let indexer = Indexer::new(Arc::clone(&db1.catalog), Arc::clone(&db1.cache));
    let indexed = indexer.index(&db1, true, None).await.unwrap();

    let (conn2, _ns2) = connection(true);
    let stale_ledger = conn2.create_ledger("future/main").await.unwrap();
    let stale_branch = stale_ledger.branch(None).unwrap();
    assert!(stale_branch.update_index(indexed).await.is_err());
    assert_eq!(stale_branch.current_t(), Some(0));
}

#[tokio::test]
async fn repeated_merge_of_same_index_is_a_no_op() {
    let (conn, _ns) = connection(true);
    let ledger = conn.create_ledger("noop/main").await.unwrap();

    let db0 = ledger.current_db().unwrap().db().await.unwrap();
    let staged = db0.stage(&[assert_op("ex:a", 1)]).unwrap();
    let db1 = ledger.commit(staged, CommitOpts::default()).await.unwrap();

    let indexer = Indexer::new(Arc::clone(&db1.catalog), Arc::clone(&db1.cache));
    let indexed = indexer.index(&db1, true, None).await.unwrap();

    let branch = ledger.branch(None).unwrap();
    let first = branch.update_index(indexed.clone()).await.unwrap();
    assert!(first.changed);
    let second = branch.update_index(indexed).await.unwrap();
    assert!(!second.changed, "same index pointer must not re-apply");
}

#[tokio::test]
async fn triggered_runs_complete_in_order() {
    let (conn, _ns) = connection(false);
    let ledger = conn.create_ledger("serial/main").await.unwrap();

    for round in 0..3 {
        let db = ledger.current_db().unwrap().db().await.unwrap();
        let staged = db
            .stage(&[assert_op(&format!("ex:r{round}"), round)])
            .unwrap();
        ledger.commit(staged, CommitOpts::default()).await.unwrap();
        let result = ledger
            .trigger_index_with_timeout(None, Duration::from_secs(10))
            .await
            .unwrap();
        let commit_t = match result {
            IndexResult::Success { commit, .. } => commit.t,
            IndexResult::Error { message } => panic!("run failed: {message}"),
        };
        assert_eq!(commit_t, -(round + 1));
    }
}

#[tokio::test]
async fn amended_head_is_republished_once() {
    let (conn, ns) = connection(false);
    let ledger = conn.create_ledger("publish/main").await.unwrap();

    let db = ledger.current_db().unwrap().db().await.unwrap();
    let staged = db
        .stage(&(0..8).map(|i| assert_op(&format!("ex:p{i}"), i)).collect::<Vec<_>>())
        .unwrap();
    let db1 = ledger.commit(staged, CommitOpts::default()).await.unwrap();
    ledger
        .trigger_index_with_timeout(None, Duration::from_secs(10))
        .await
        .unwrap();

    let history = ns.known_addresses("publish/main").await.unwrap();
    // genesis + c1 + the amended c1 republish, nothing more.
    let c1_count = history.iter().filter(|a| **a == db1.commit.address).count();
    assert!(c1_count <= 2, "c1 must not be republished per spurious run");

    // After the amendment the head record carries the index address.
    let record = ns
        .lookup(&ns.publishing_address("publish/main"))
        .await
        .unwrap()
        .unwrap();
    assert!(record.index_address.is_some());
}
