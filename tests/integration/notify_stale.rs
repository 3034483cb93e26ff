#![allow(missing_docs)]

use std::sync::Arc;

use tessera::commit::jsonld::commit_id;
use tessera::commit::CommitRef;
use tessera::connection::{Connection, ConnectionConfig, ConnectionOptions};
use tessera::db::IndexingOptions;
use tessera::flake::FlakeValue;
use tessera::ledger::{CommitOpts, NotifyOutcome};
use tessera::nameservice::memory::MemoryNameService;
use tessera::storage::{memory::MemoryStore, Catalog};
use tessera::transact::{ObjectSpec, TxOp};

fn shared_world() -> (Arc<MemoryNameService>, Arc<Catalog>) {
    (
        Arc::new(MemoryNameService::new()),
        Arc::new(Catalog::new(Arc::new(MemoryStore::new()))),
    )
}

fn connect(ns: &Arc<MemoryNameService>, catalog: &Arc<Catalog>) -> Connection {
    Connection::connect(ConnectionConfig {
        catalog: Arc::clone(catalog),
        primary_publisher: ns.clone(),
        secondary_publishers: vec![],
        publications: vec![ns.clone()],
        options: ConnectionOptions::default(),
        indexing: IndexingOptions {
            indexing_disabled: true,
            ..Default::default()
        },
    })
}

fn assert_op(s: &str, o: i64) -> TxOp {
    TxOp::Assert {
        s: s.to_string(),
        p: "ex:p".to_string(),
        o: ObjectSpec::Value(FlakeValue::Int(o)),
    }
}

#[tokio::test]
async fn notify_applies_the_direct_successor() {
    let (ns, catalog) = shared_world();
    let writer = connect(&ns, &catalog);
    let reader = connect(&ns, &catalog);

    let ledger = writer.create_ledger("shared/main").await.unwrap();
    let loaded = reader.load_ledger("shared/main").await.unwrap();
    assert_eq!(loaded.current_db().unwrap().db().await.unwrap().t, 0);

    // Writer commits; reader is notified with the new commit address.
    let db0 = ledger.current_db().unwrap().db().await.unwrap();
    let staged = db0.stage(&[assert_op("ex:a", 7)]).unwrap();
    let db1 = ledger.commit(staged, CommitOpts::default()).await.unwrap();

    // The subscription may already have applied the push; either way the
    // notify handler tolerates the duplicate.
    let outcome = reader.notify(&db1.commit.address).await.unwrap().unwrap();
    assert!(
        matches!(outcome, NotifyOutcome::Updated | NotifyOutcome::Current),
        "unexpected outcome: {outcome:?}"
    );

    let advanced = loaded.current_db().unwrap().db().await.unwrap();
    assert_eq!(advanced.t, -1);
    let s = advanced.subject_sid("ex:a").unwrap();
    let p = advanced.predicate_sid("ex:p").unwrap();
    assert_eq!(
        advanced.match_objects(s, p).await.unwrap(),
        vec![FlakeValue::Int(7)]
    );
}

#[tokio::test]
async fn duplicate_notify_is_current() {
    let (ns, catalog) = shared_world();
    let writer = connect(&ns, &catalog);
    let reader = connect(&ns, &catalog);

    let ledger = writer.create_ledger("dup/main").await.unwrap();
    reader.load_ledger("dup/main").await.unwrap();

    let db0 = ledger.current_db().unwrap().db().await.unwrap();
    let staged = db0.stage(&[assert_op("ex:a", 1)]).unwrap();
    let db1 = ledger.commit(staged, CommitOpts::default()).await.unwrap();

    let first = reader.notify(&db1.commit.address).await.unwrap().unwrap();
    assert!(matches!(
        first,
        NotifyOutcome::Updated | NotifyOutcome::Current
    ));
    // The same address again is a no-op.
    assert_eq!(
        reader.notify(&db1.commit.address).await.unwrap(),
        Some(NotifyOutcome::Current)
    );
}

#[tokio::test]
async fn stale_commit_releases_the_ledger() {
    let (ns, catalog) = shared_world();
    let writer = connect(&ns, &catalog);
    let reader = connect(&ns, &catalog);

    let ledger = writer.create_ledger("stale/main").await.unwrap();
    reader.load_ledger("stale/main").await.unwrap();

    // Advance the shared ledger several commits.
    let mut db = ledger.current_db().unwrap().db().await.unwrap();
    for i in 0..5 {
        let staged = db.stage(&[assert_op("ex:s", i)]).unwrap();
        db = ledger.commit(staged, CommitOpts::default()).await.unwrap();
        reader.notify(&db.commit.address).await.unwrap();
    }
    assert_eq!(reader.cached_aliases(), vec!["stale/main".to_string()]);

    // A divergent t = 0 commit with an unrelated previous pointer.
    let mut foreign = db.commit.clone();
    foreign.t = 0;
    foreign.previous = Some(CommitRef {
        id: "fluree:commit:sha256:unrelated".to_string(),
        address: "fluree:memory://unrelated".to_string(),
    });
    foreign.address = String::new();
    foreign.id = commit_id(&foreign);
    let doc = tessera::commit::jsonld::commit_jsonld(&foreign);
    let bytes = tessera::commit::jsonld::canonical_bytes(&doc);
    let write = catalog
        .content_write_bytes("stale/main/commit", bytes::Bytes::from(bytes))
        .await
        .unwrap();

    let outcome = reader.notify(&write.address).await.unwrap();
    assert_eq!(outcome, Some(NotifyOutcome::Stale));
    assert!(
        reader.cached_aliases().is_empty(),
        "stale notify releases the cached ledger"
    );
}

#[tokio::test]
async fn far_ahead_commit_reports_newer() {
    use tessera::db::IndexingOptions;
    use tessera::ledger::{Ledger, LedgerConfig};

    let (ns, catalog) = shared_world();
    let writer = connect(&ns, &catalog);

    let ledger = writer.create_ledger("ahead/main").await.unwrap();
    let genesis = ledger.branch(None).unwrap().current_commit().unwrap();

    // A reader pinned at genesis, wired to its own quiet nameservice so
    // nothing advances it behind our back.
    let reader_ns = Arc::new(MemoryNameService::new());
    let reader = Ledger::instantiate(
        LedgerConfig {
            alias: "ahead/main".to_string(),
            catalog: Arc::clone(&catalog),
            index_catalog: Arc::clone(&catalog),
            cache: writer.cache(),
            primary_publisher: reader_ns.clone(),
            secondary_publishers: vec![],
            publication: Some(reader_ns),
            opts: IndexingOptions {
                indexing_disabled: true,
                ..Default::default()
            },
            did: None,
        },
        genesis,
    )
    .await
    .unwrap();

    // Writer advances twice; the reader only hears about the second
    // commit, which it cannot fast-forward to.
    let db0 = ledger.current_db().unwrap().db().await.unwrap();
    let staged = db0.stage(&[assert_op("ex:a", 1)]).unwrap();
    let db1 = ledger.commit(staged, CommitOpts::default()).await.unwrap();
    let staged = db1.stage(&[assert_op("ex:a", 2)]).unwrap();
    let db2 = ledger.commit(staged, CommitOpts::default()).await.unwrap();

    assert_eq!(
        reader.notify(&db2.commit).await.unwrap(),
        NotifyOutcome::Newer
    );
    // The reader's branch is untouched.
    assert_eq!(reader.branch(None).unwrap().current_commit().unwrap().t, 0);
}
