#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use tessera::connection::{Connection, ConnectionConfig, ConnectionOptions};
use tessera::db::IndexingOptions;
use tessera::nameservice::memory::MemoryNameService;
use tessera::nameservice::IndexingStatus;
use tessera::storage::{memory::MemoryStore, Catalog};

fn connection(idle_ms: u64, check_ms: u64) -> (Connection, Arc<MemoryNameService>) {
    let ns = Arc::new(MemoryNameService::new());
    let conn = Connection::connect(ConnectionConfig {
        catalog: Arc::new(Catalog::new(Arc::new(MemoryStore::new()))),
        primary_publisher: ns.clone(),
        secondary_publishers: vec![],
        publications: vec![ns.clone()],
        options: ConnectionOptions {
            idle_timeout: Duration::from_millis(idle_ms),
            check_interval: Duration::from_millis(check_ms),
            ..Default::default()
        },
        indexing: IndexingOptions {
            indexing_disabled: true,
            ..Default::default()
        },
    });
    (conn, ns)
}

#[tokio::test]
async fn idle_ledger_is_evicted_and_reloadable() {
    let (conn, _ns) = connection(100, 50);
    conn.create_ledger("x/main").await.unwrap();
    assert_eq!(conn.cached_aliases(), vec!["x/main".to_string()]);

    // Untouched past the idle timeout: the sweeper drops it.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(conn.cached_aliases().is_empty(), "idle ledger evicted");

    // The next load re-reads from the publisher.
    let reloaded = conn.load_ledger("x/main").await.unwrap();
    assert_eq!(
        reloaded.branch(None).unwrap().current_commit().unwrap().t,
        0
    );
}

#[tokio::test]
async fn indexing_ledgers_are_not_evicted() {
    let (conn, ns) = connection(100, 50);
    conn.create_ledger("busy/main").await.unwrap();
    ns.set_indexing(
        "busy/main",
        Some(IndexingStatus {
            started: "2026-01-01T00:00:00Z".to_string(),
            machine_id: "host:1".to_string(),
            last_heartbeat: "2026-01-01T00:00:05Z".to_string(),
        }),
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        conn.cached_aliases(),
        vec!["busy/main".to_string()],
        "ledger mid-indexing must stay cached"
    );

    // Once indexing clears, the next sweeps evict it.
    ns.set_indexing("busy/main", None);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(conn.cached_aliases().is_empty());
}

#[tokio::test]
async fn release_closes_index_queues() {
    let (conn, _ns) = connection(60_000, 60_000);
    let ledger = conn.create_ledger("closing/main").await.unwrap();
    let branch = ledger.branch(None).unwrap();
    assert!(!branch.queue().is_closed());

    conn.release_ledger("closing/main").await;
    assert!(branch.queue().is_closed());
    assert!(conn.cached_aliases().is_empty());
}

#[tokio::test]
async fn touching_a_ledger_resets_the_idle_clock() {
    let (conn, _ns) = connection(200, 50);
    conn.create_ledger("touched/main").await.unwrap();

    // Keep accessing it more often than the timeout.
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(80)).await;
        conn.load_ledger("touched/main").await.unwrap();
    }
    assert_eq!(conn.cached_aliases(), vec!["touched/main".to_string()]);
}

#[tokio::test]
async fn disconnect_releases_everything() {
    let (conn, _ns) = connection(60_000, 60_000);
    conn.create_ledger("a/main").await.unwrap();
    conn.create_ledger("b/main").await.unwrap();
    assert_eq!(conn.cached_aliases().len(), 2);

    conn.disconnect().await;
    assert!(conn.cached_aliases().is_empty());
}
