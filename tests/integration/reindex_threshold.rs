#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use tessera::connection::{Connection, ConnectionConfig, ConnectionOptions};
use tessera::db::IndexingOptions;
use tessera::flake::FlakeValue;
use tessera::ledger::indexer::IndexResult;
use tessera::ledger::CommitOpts;
use tessera::nameservice::memory::MemoryNameService;
use tessera::storage::{memory::MemoryStore, Catalog};
use tessera::transact::{ObjectSpec, TxOp};

const REINDEX_MIN: usize = 256;

fn connection() -> (Connection, Arc<Catalog>) {
    let ns = Arc::new(MemoryNameService::new());
    let catalog = Arc::new(Catalog::new(Arc::new(MemoryStore::new())));
    let conn = Connection::connect(ConnectionConfig {
        catalog: Arc::clone(&catalog),
        primary_publisher: ns.clone(),
        secondary_publishers: vec![],
        publications: vec![ns],
        options: ConnectionOptions::default(),
        indexing: IndexingOptions {
            reindex_min_bytes: REINDEX_MIN,
            reindex_max_bytes: 4096,
            max_old_indexes: 2,
            indexing_disabled: false,
        },
    });
    (conn, catalog)
}

fn ops(round: usize, n: usize) -> Vec<TxOp> {
    (0..n)
        .map(|i| TxOp::Assert {
            s: format!("ex:s{round}_{i}"),
            p: "ex:p".to_string(),
            o: ObjectSpec::Value(FlakeValue::Int((round * 100 + i) as i64)),
        })
        .collect()
}

async fn commit_and_index(
    ledger: &Arc<tessera::ledger::Ledger>,
    round: usize,
) -> tessera::Db {
    let db = ledger.current_db().unwrap().db().await.unwrap();
    let mut staged = db;
    // Commit until spot novelty crosses the threshold.
    let mut round_part = 0usize;
    while staged.novelty.size() < REINDEX_MIN {
        let next = staged.stage(&ops(round * 10 + round_part, 4)).unwrap();
        staged = ledger.commit(next, CommitOpts::default()).await.unwrap();
        round_part += 1;
    }
    let result = ledger
        .trigger_index_with_timeout(None, Duration::from_secs(10))
        .await
        .unwrap();
    match result {
        IndexResult::Success { .. } => {}
        IndexResult::Error { message } => panic!("index run failed: {message}"),
    }
    ledger.current_db().unwrap().db().await.unwrap()
}

#[tokio::test]
async fn reindex_fires_at_threshold_and_clears_novelty() {
    let (conn, _catalog) = connection();
    let ledger = conn.create_ledger("alice/main").await.unwrap();

    let indexed = commit_and_index(&ledger, 1).await;

    // One index root was produced covering the current t.
    let index = indexed.commit.index.as_ref().expect("index pointer");
    assert_eq!(index.data.t, indexed.t);
    assert!(indexed.indexes.spot.is_some());
    assert!(indexed.indexes.psot.is_some());
    assert!(indexed.indexes.post.is_some());
    assert!(indexed.indexes.opst.is_some());
    assert!(indexed.indexes.tspo.is_some());

    // Novelty for each of the five indexes is empty afterwards.
    assert!(indexed.novelty.is_empty());
    assert!(indexed.novelty.check_consistent());

    // Queries keep answering from the persistent tree.
    let s = indexed.subject_sid("ex:s10_0").unwrap();
    let p = indexed.predicate_sid("ex:p").unwrap();
    assert_eq!(indexed.match_objects(s, p).await.unwrap().len(), 1);
}

#[tokio::test]
async fn old_roots_are_collected_after_retention_window() {
    let (conn, catalog) = connection();
    let ledger = conn.create_ledger("gc/main").await.unwrap();

    let first = commit_and_index(&ledger, 1).await;
    let first_root = first.commit.index.as_ref().unwrap().address.clone();
    assert!(catalog.read_bytes(&first_root).await.is_ok());

    // max_old_indexes = 2: the window holds the current root plus two
    // retired ones, so the third following cycle pushes the first out.
    let mut last_root = first_root.clone();
    for round in 2..=4 {
        let indexed = commit_and_index(&ledger, round).await;
        let root = indexed.commit.index.as_ref().unwrap().address.clone();
        assert_ne!(root, last_root, "each cycle produces a new root");
        last_root = root;
    }

    assert!(
        catalog.read_bytes(&first_root).await.is_err(),
        "first index root should be garbage-collected"
    );
    assert!(
        catalog.read_bytes(&last_root).await.is_ok(),
        "latest root stays live"
    );
}

#[tokio::test]
async fn data_survives_across_many_index_cycles() {
    let (conn, _catalog) = connection();
    let ledger = conn.create_ledger("cycles/main").await.unwrap();

    for round in 1..=3 {
        commit_and_index(&ledger, round).await;
    }
    let db = ledger.current_db().unwrap().db().await.unwrap();
    // Every committed subject is still reachable through the index.
    let p = db.predicate_sid("ex:p").unwrap();
    let s = db.subject_sid("ex:s10_1").unwrap();
    assert_eq!(db.match_objects(s, p).await.unwrap().len(), 1);
    let s = db.subject_sid("ex:s30_0").unwrap();
    assert_eq!(db.match_objects(s, p).await.unwrap().len(), 1);
}
