//! The connection: a keyed, promise-based cache of loaded ledgers.
//!
//! Loading is single-flight per alias: the registry hands out one promise
//! per alias and only the first registrant fulfills it. A background task
//! sweeps idle ledgers out of the cache, skipping any the nameservice
//! reports as mid-indexing. Releasing a ledger closes its index queues but
//! never cancels an in-flight run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::commit::jsonld::parse_commit;
use crate::commit::{Commit, IndexData, IndexRef};
use crate::db::IndexingOptions;
use crate::error::{LedgerError, Result};
use crate::index::cache::NodeCache;
use crate::index::IndexRootDoc;
use crate::ledger::{normalize_alias, Ledger, LedgerConfig, NotifyOutcome};
use crate::nameservice::{NsRecord, Publication, Publisher, SubscriptionMessage};
use crate::primitives::promise::Promise;
use crate::storage::Catalog;

/// Connection tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions {
    /// How long a ledger may sit unaccessed before eviction.
    pub idle_timeout: Duration,
    /// How often the cleanup task wakes.
    pub check_interval: Duration,
    /// Worker parallelism hint for embedders sizing their runtime.
    pub parallelism: usize,
    /// Resolved-node cache capacity.
    pub cache_capacity: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        ConnectionOptions {
            idle_timeout: Duration::from_secs(30 * 60),
            check_interval: Duration::from_secs(60),
            parallelism: 4,
            cache_capacity: 10_000,
        }
    }
}

/// Everything a connection needs at startup.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Content storage shared by all ledgers on this connection.
    pub catalog: Arc<Catalog>,
    /// Publisher receiving head updates first.
    pub primary_publisher: Arc<dyn Publisher>,
    /// Best-effort additional publishers.
    pub secondary_publishers: Vec<Arc<dyn Publisher>>,
    /// Lookup/subscription surfaces, consulted in order.
    pub publications: Vec<Arc<dyn Publication>>,
    /// Tuning knobs.
    pub options: ConnectionOptions,
    /// Indexing defaults for ledgers opened through this connection.
    pub indexing: IndexingOptions,
}

type LedgerResult = std::result::Result<Arc<Ledger>, LedgerError>;
type LedgerPromise = Promise<LedgerResult>;

struct Subscription {
    task: JoinHandle<()>,
}

#[derive(Default)]
struct ConnState {
    ledgers: FxHashMap<String, LedgerPromise>,
    subscriptions: FxHashMap<String, Subscription>,
    last_accessed: FxHashMap<String, Instant>,
    disconnecting: bool,
}

struct ConnectionInner {
    catalog: Arc<Catalog>,
    cache: Arc<NodeCache>,
    primary_publisher: Arc<dyn Publisher>,
    secondary_publishers: Vec<Arc<dyn Publisher>>,
    publications: Vec<Arc<dyn Publication>>,
    options: ConnectionOptions,
    indexing: IndexingOptions,
    state: Mutex<ConnState>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

/// A handle to the process-wide ledger cache. Clones share state.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Connection")
            .field("ledgers", &state.ledgers.len())
            .field("disconnecting", &state.disconnecting)
            .finish()
    }
}

impl Connection {
    /// Opens a connection and starts its idle-cleanup task.
    pub fn connect(config: ConnectionConfig) -> Connection {
        let inner = Arc::new(ConnectionInner {
            cache: Arc::new(NodeCache::new(config.options.cache_capacity)),
            catalog: config.catalog,
            primary_publisher: config.primary_publisher,
            secondary_publishers: config.secondary_publishers,
            publications: config.publications,
            options: config.options,
            indexing: config.indexing,
            state: Mutex::new(ConnState::default()),
            cleanup: Mutex::new(None),
        });
        let connection = Connection { inner };
        connection.spawn_cleanup();
        connection
    }

    /// The shared resolved-node cache.
    pub fn cache(&self) -> Arc<NodeCache> {
        Arc::clone(&self.inner.cache)
    }

    /// Aliases currently cached.
    pub fn cached_aliases(&self) -> Vec<String> {
        self.inner.state.lock().ledgers.keys().cloned().collect()
    }

    /// Atomically registers interest in an alias. Returns `(cached,
    /// promise)`; when `cached` is true another caller owns fulfillment.
    pub fn register_ledger(&self, alias: &str) -> (bool, LedgerPromise) {
        let mut state = self.inner.state.lock();
        state.last_accessed.insert(alias.to_string(), Instant::now());
        match state.ledgers.get(alias) {
            Some(promise) => (true, promise.clone()),
            None => {
                let promise = LedgerPromise::new();
                state.ledgers.insert(alias.to_string(), promise.clone());
                (false, promise)
            }
        }
    }

    fn ledger_config(&self, alias: &str) -> LedgerConfig {
        LedgerConfig {
            alias: alias.to_string(),
            catalog: Arc::clone(&self.inner.catalog),
            index_catalog: Arc::clone(&self.inner.catalog),
            cache: Arc::clone(&self.inner.cache),
            primary_publisher: Arc::clone(&self.inner.primary_publisher),
            secondary_publishers: self.inner.secondary_publishers.clone(),
            publication: self.inner.publications.first().cloned(),
            opts: self.inner.indexing,
            did: None,
        }
    }

    /// Creates a new ledger and caches it.
    pub async fn create_ledger(&self, alias: &str) -> Result<Arc<Ledger>> {
        let (alias, _branch) = normalize_alias(alias);
        let (cached, promise) = self.register_ledger(&alias);
        if cached {
            return match promise.get().await {
                Some(Ok(_)) | None => Err(LedgerError::LedgerExists(alias)),
                Some(Err(e)) => Err(e),
            };
        }
        let result = Ledger::create(self.ledger_config(&alias)).await;
        self.finish_load(&alias, result, promise).await
    }

    /// Loads a ledger by alias or publishing address, deduplicating
    /// concurrent loads through the registry.
    pub async fn load_ledger(&self, alias_or_address: &str) -> Result<Arc<Ledger>> {
        let (alias, address) = if alias_or_address.contains("://") {
            match self.alias_for_address(alias_or_address) {
                Some(alias) => (alias, alias_or_address.to_string()),
                None => {
                    return Err(LedgerError::UnknownAddress(alias_or_address.to_string()))
                }
            }
        } else {
            let (alias, _branch) = normalize_alias(alias_or_address);
            let address = self.inner.primary_publisher.publishing_address(&alias);
            (alias, address)
        };

        let (cached, promise) = self.register_ledger(&alias);
        if cached {
            trace!(alias = %alias, "connection.load.cached");
            return match promise.get().await {
                Some(result) => result,
                None => Err(LedgerError::UnknownLedger(alias)),
            };
        }

        let result = self.load_fresh(&alias, &address).await;
        self.finish_load(&alias, result, promise).await
    }

    async fn finish_load(
        &self,
        alias: &str,
        result: Result<Arc<Ledger>>,
        promise: LedgerPromise,
    ) -> Result<Arc<Ledger>> {
        match result {
            Ok(ledger) => {
                self.subscribe(alias).await;
                promise.deliver(Ok(Arc::clone(&ledger)));
                Ok(ledger)
            }
            Err(e) => {
                promise.deliver(Err(e.clone()));
                self.inner.state.lock().ledgers.remove(alias);
                Err(e)
            }
        }
    }

    fn alias_for_address(&self, address: &str) -> Option<String> {
        // Publishing addresses are deterministic per publisher, so the
        // alias is recoverable by construction.
        address.rsplit_once("://ns/").map(|(_, alias)| {
            let (alias, _branch) = normalize_alias(alias);
            alias
        })
    }

    async fn lookup_record(&self, address: &str) -> Result<Option<NsRecord>> {
        for publication in &self.inner.publications {
            match publication.lookup(address).await {
                Ok(Some(record)) => return Ok(Some(record)),
                Ok(None) => continue,
                Err(e) => warn!(error = %e, "connection.lookup.failed"),
            }
        }
        Ok(None)
    }

    async fn load_fresh(&self, alias: &str, address: &str) -> Result<Arc<Ledger>> {
        let record = self
            .lookup_record(address)
            .await?
            .ok_or_else(|| LedgerError::UnknownLedger(alias.to_string()))?;
        let commit = self.read_commit(&record).await?;
        info!(alias = %alias, t = commit.t, "connection.load");
        Ledger::instantiate(self.ledger_config(alias), commit).await
    }

    /// Reads and parses the head commit a record points at, grafting the
    /// record's index metadata on when the stored document predates it.
    async fn read_commit(&self, record: &NsRecord) -> Result<Commit> {
        let doc = self.inner.catalog.read_json(&record.commit_address).await?;
        let mut commit = parse_commit(&doc)?;
        if commit.address.is_empty() {
            commit.address = record.commit_address.clone();
        }
        if let Some(index_address) = &record.index_address {
            let stale = commit
                .index
                .as_ref()
                .map(|i| &i.address != index_address)
                .unwrap_or(true);
            if stale {
                let root: IndexRootDoc =
                    self.inner.catalog.read_json_as(index_address).await?;
                commit.index = Some(IndexRef {
                    id: format!("fluree:index:{}", root.t),
                    address: index_address.clone(),
                    data: IndexData {
                        t: root.t,
                        flakes: root.flakes,
                        size: root.size as u64,
                    },
                });
            }
        }
        Ok(commit)
    }

    async fn subscribe(&self, alias: &str) {
        let (tx, mut rx) = mpsc::channel(8);
        for publication in &self.inner.publications {
            if let Err(e) = publication.subscribe(alias, tx.clone()).await {
                warn!(alias = %alias, error = %e, "connection.subscribe.failed");
            }
        }
        drop(tx);
        let connection = self.clone();
        let task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match SubscriptionMessage::from_json(&message) {
                    Some(SubscriptionMessage::NewCommit { address }) => {
                        if let Err(e) = connection.notify(&address).await {
                            // The loop survives bad pushes.
                            warn!(error = %e, "connection.notify.failed");
                        }
                    }
                    None => {}
                }
            }
        });
        self.inner
            .state
            .lock()
            .subscriptions
            .insert(alias.to_string(), Subscription { task });
    }

    /// Handles a pushed commit address: reads the commit, routes it to the
    /// cached ledger, and releases the ledger when it reports stale state.
    pub async fn notify(&self, address: &str) -> Result<Option<NotifyOutcome>> {
        let doc = self.inner.catalog.read_json(address).await?;
        let mut commit = parse_commit(&doc)?;
        if commit.address.is_empty() {
            commit.address = address.to_string();
        }
        let promise = {
            let state = self.inner.state.lock();
            state.ledgers.get(&commit.alias).cloned()
        };
        let ledger = match promise.and_then(|p| p.peek()) {
            Some(Ok(ledger)) => ledger,
            _ => {
                debug!(alias = %commit.alias, "connection.notify.not_cached");
                return Ok(None);
            }
        };
        self.touch(&commit.alias);
        let outcome = ledger.notify(&commit).await?;
        if outcome == NotifyOutcome::Stale {
            self.release_ledger(&commit.alias).await;
        }
        Ok(Some(outcome))
    }

    fn touch(&self, alias: &str) {
        self.inner
            .state
            .lock()
            .last_accessed
            .insert(alias.to_string(), Instant::now());
    }

    /// Removes a ledger from the cache: closes its index queues,
    /// completes its promise for any stragglers, unsubscribes everywhere,
    /// and drops the bookkeeping entries.
    pub async fn release_ledger(&self, alias: &str) {
        let (promise, subscription) = {
            let mut state = self.inner.state.lock();
            (
                state.ledgers.remove(alias),
                state.subscriptions.remove(alias),
            )
        };
        if let Some(promise) = &promise {
            match promise.peek() {
                Some(Ok(ledger)) => ledger.close(),
                Some(Err(_)) => {}
                None => {
                    promise.deliver(Err(LedgerError::Unavailable(format!(
                        "ledger {alias} released while loading"
                    ))));
                }
            }
        }
        if subscription.is_some() {
            for publication in &self.inner.publications {
                if let Err(e) = publication.unsubscribe(alias).await {
                    warn!(alias = %alias, error = %e, "connection.unsubscribe.failed");
                }
            }
        }
        if let Some(subscription) = subscription {
            subscription.task.abort();
        }
        self.inner.state.lock().last_accessed.remove(alias);
        info!(alias = %alias, "connection.release");
    }

    fn spawn_cleanup(&self) {
        let connection = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(connection.inner.options.check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if connection.inner.state.lock().disconnecting {
                    break;
                }
                connection.cleanup_idle().await;
            }
        });
        *self.inner.cleanup.lock() = Some(task);
    }

    /// One idle sweep. Separated out so tests can drive it directly.
    pub async fn cleanup_idle(&self) {
        let idle_timeout = self.inner.options.idle_timeout;
        let now = Instant::now();
        let expired: Vec<String> = {
            let state = self.inner.state.lock();
            state
                .last_accessed
                .iter()
                .filter(|(_, at)| now.duration_since(**at) > idle_timeout)
                .map(|(alias, _)| alias.clone())
                .collect()
        };
        for alias in expired {
            let address = self.inner.primary_publisher.publishing_address(&alias);
            let indexing = match self.lookup_record(&address).await {
                Ok(Some(record)) => record.indexing.is_some(),
                Ok(None) => false,
                Err(e) => {
                    // Errors never abort the sweep.
                    warn!(alias = %alias, error = %e, "connection.cleanup.lookup_failed");
                    continue;
                }
            };
            if indexing {
                debug!(alias = %alias, "connection.cleanup.indexing_skip");
                self.touch(&alias);
                continue;
            }
            self.release_ledger(&alias).await;
        }
    }

    /// Shuts the connection down: stops the cleanup task and releases
    /// every cached ledger. In-flight index runs complete and their
    /// results are discarded.
    pub async fn disconnect(&self) {
        let cleanup = {
            let mut state = self.inner.state.lock();
            state.disconnecting = true;
            self.inner.cleanup.lock().take()
        };
        if let Some(task) = cleanup {
            task.abort();
        }
        for alias in self.cached_aliases() {
            self.release_ledger(&alias).await;
        }
        info!("connection.disconnect");
    }
}
