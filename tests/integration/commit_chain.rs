#![allow(missing_docs)]

use std::sync::Arc;

use tessera::commit::jsonld::{commit_jsonld, parse_commit};
use tessera::connection::{Connection, ConnectionConfig, ConnectionOptions};
use tessera::db::IndexingOptions;
use tessera::flake::FlakeValue;
use tessera::ledger::CommitOpts;
use tessera::nameservice::memory::MemoryNameService;
use tessera::storage::{memory::MemoryStore, Catalog};
use tessera::transact::{ObjectSpec, TxOp};
use tessera::LedgerError;

fn connection() -> (Connection, Arc<MemoryNameService>, Arc<Catalog>) {
    let ns = Arc::new(MemoryNameService::new());
    let catalog = Arc::new(Catalog::new(Arc::new(MemoryStore::new())));
    let conn = Connection::connect(ConnectionConfig {
        catalog: Arc::clone(&catalog),
        primary_publisher: ns.clone(),
        secondary_publishers: vec![],
        publications: vec![ns.clone()],
        options: ConnectionOptions::default(),
        indexing: IndexingOptions {
            indexing_disabled: true,
            ..Default::default()
        },
    });
    (conn, ns, catalog)
}

fn assert_op(s: &str, p: &str, o: i64) -> TxOp {
    TxOp::Assert {
        s: s.to_string(),
        p: p.to_string(),
        o: ObjectSpec::Value(FlakeValue::Int(o)),
    }
}

fn retract_op(s: &str, p: &str, o: i64) -> TxOp {
    TxOp::Retract {
        s: s.to_string(),
        p: p.to_string(),
        o: ObjectSpec::Value(FlakeValue::Int(o)),
    }
}

#[tokio::test]
async fn commit_chain_basics() {
    let (conn, _ns, _catalog) = connection();
    let ledger = conn.create_ledger("alice/main").await.unwrap();

    // First assertion: t = -1, no index yet, one flake of data.
    let db0 = ledger.current_db().unwrap().db().await.unwrap();
    let staged = db0.stage(&[assert_op("ex:a", "ex:p", 1)]).unwrap();
    let db1 = ledger.commit(staged, CommitOpts::default()).await.unwrap();
    let c1 = db1.commit.clone();
    assert_eq!(c1.t, -1);
    assert_eq!(c1.data.as_ref().unwrap().flakes, 1);
    assert_eq!(c1.previous.as_ref().unwrap().id, db0.commit.id);

    // Second transaction: assert 2, retract 1.
    let staged = db1
        .stage(&[assert_op("ex:a", "ex:p", 2), retract_op("ex:a", "ex:p", 1)])
        .unwrap();
    let db2 = ledger.commit(staged, CommitOpts::default()).await.unwrap();
    let c2 = db2.commit.clone();
    assert_eq!(c2.t, -2);
    assert_eq!(c2.previous.as_ref().unwrap().id, c1.id);
    assert_eq!(c2.data.as_ref().unwrap().flakes, 2);

    // The query sees only the surviving assertion.
    let s = db2.subject_sid("ex:a").unwrap();
    let p = db2.predicate_sid("ex:p").unwrap();
    let objects = db2.match_objects(s, p).await.unwrap();
    assert_eq!(objects, vec![FlakeValue::Int(2)]);
}

#[tokio::test]
async fn successive_commits_step_t_and_link_ids() {
    let (conn, _ns, _catalog) = connection();
    let ledger = conn.create_ledger("chain/main").await.unwrap();

    let mut commits = vec![ledger.branch(None).unwrap().current_commit().unwrap()];
    let mut db = ledger.current_db().unwrap().db().await.unwrap();
    for i in 0..5 {
        let staged = db.stage(&[assert_op("ex:s", "ex:p", i)]).unwrap();
        db = ledger.commit(staged, CommitOpts::default()).await.unwrap();
        commits.push(db.commit.clone());
    }

    for pair in commits.windows(2) {
        assert_eq!(pair[1].t, pair[0].t - 1);
        assert_eq!(pair[1].previous.as_ref().unwrap().id, pair[0].id);
    }
}

#[tokio::test]
async fn commit_round_trips_through_jsonld() {
    let (conn, _ns, _catalog) = connection();
    let ledger = conn.create_ledger("serde/main").await.unwrap();
    let db = ledger.current_db().unwrap().db().await.unwrap();
    let staged = db.stage(&[assert_op("ex:a", "ex:p", 1)]).unwrap();
    let db = ledger
        .commit(
            staged,
            CommitOpts {
                message: Some("first".to_string()),
                tag: vec!["v1".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let doc = commit_jsonld(&db.commit);
    let parsed = parse_commit(&doc).unwrap();
    assert_eq!(parsed, db.commit);
}

#[tokio::test]
async fn load_after_write_sees_committed_t() {
    let (conn, ns, catalog) = connection();
    let ledger = conn.create_ledger("law7/main").await.unwrap();
    let db = ledger.current_db().unwrap().db().await.unwrap();
    let staged = db.stage(&[assert_op("ex:a", "ex:p", 42)]).unwrap();
    let committed = ledger.commit(staged, CommitOpts::default()).await.unwrap();
    assert_eq!(committed.t, -1);

    // A fresh connection sharing storage and nameservice reloads the head.
    let fresh = Connection::connect(ConnectionConfig {
        catalog,
        primary_publisher: ns.clone(),
        secondary_publishers: vec![],
        publications: vec![ns],
        options: ConnectionOptions::default(),
        indexing: IndexingOptions {
            indexing_disabled: true,
            ..Default::default()
        },
    });
    let reloaded = fresh.load_ledger("law7/main").await.unwrap();
    let head = reloaded.current_db().unwrap().db().await.unwrap();
    assert_eq!(head.t, -1);

    let s = head.subject_sid("ex:a").unwrap();
    let p = head.predicate_sid("ex:p").unwrap();
    assert_eq!(
        head.match_objects(s, p).await.unwrap(),
        vec![FlakeValue::Int(42)]
    );
}

#[tokio::test]
async fn diverged_commit_is_rejected() {
    let (conn, _ns, _catalog) = connection();
    let ledger = conn.create_ledger("fork/main").await.unwrap();
    let db0 = ledger.current_db().unwrap().db().await.unwrap();

    let staged = db0.stage(&[assert_op("ex:a", "ex:p", 1)]).unwrap();
    let _db1 = ledger.commit(staged, CommitOpts::default()).await.unwrap();

    // Committing again from the stale db0 produces a second t = -1 commit
    // whose previous pointer no longer matches the branch head.
    let staged = db0.stage(&[assert_op("ex:a", "ex:p", 9)]).unwrap();
    let result = ledger.commit(staged, CommitOpts::default()).await;
    assert!(matches!(result, Err(LedgerError::InvalidCommit(_))));

    // Branch state is unchanged by the failure.
    let head = ledger.branch(None).unwrap().current_commit().unwrap();
    assert_eq!(head.t, -1);
}
