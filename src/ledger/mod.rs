//! The ledger: branches, catalogs, and publishers for one alias.

pub mod branch;
pub mod indexer;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::commit::jsonld::{commit_id, commit_jsonld, verify_commit_id};
use crate::commit::{Commit, CommitData, CommitDataDoc, DATA_VERSION};
use crate::db::async_db::DbHandle;
use crate::db::{Db, DbStats, IndexingOptions, Staged};
use crate::error::{LedgerError, Result};
use crate::flake::t;
use crate::index::cache::NodeCache;
use crate::nameservice::{publish_to_all, Publication, Publisher};
use crate::storage::Catalog;
use branch::Branch;
use indexer::{spawn_indexer, IndexResult, Indexer};

/// Everything a ledger needs to operate.
#[derive(Clone)]
pub struct LedgerConfig {
    /// Ledger alias, typically `name/branch`.
    pub alias: String,
    /// Commit and data document storage.
    pub catalog: Arc<Catalog>,
    /// Index node storage; usually the same catalog.
    pub index_catalog: Arc<Catalog>,
    /// Shared resolved-node cache.
    pub cache: Arc<NodeCache>,
    /// Publisher receiving every head update first.
    pub primary_publisher: Arc<dyn Publisher>,
    /// Best-effort additional publishers.
    pub secondary_publishers: Vec<Arc<dyn Publisher>>,
    /// Lookup surface used for existence checks, when available.
    pub publication: Option<Arc<dyn Publication>>,
    /// Indexing thresholds.
    pub opts: IndexingOptions,
    /// Ledger identity DID, when operating signed.
    pub did: Option<String>,
}

/// Optional commit metadata.
#[derive(Debug, Clone, Default)]
pub struct CommitOpts {
    /// Commit message.
    pub message: Option<String>,
    /// Tags.
    pub tag: Vec<String>,
    /// Author identity.
    pub author: Option<String>,
    /// Structured annotation.
    pub annotation: Option<String>,
    /// Wall-clock override, for reproducible runs.
    pub time: Option<String>,
}

/// What `notify` decided about a pushed commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Already the branch head.
    Current,
    /// Ahead by more than one step; the caller should reload.
    Newer,
    /// Applied; the branch advanced.
    Updated,
    /// Behind or divergent; the caller should drop its cached state.
    Stale,
}

/// One ledger: a set of branches sharing catalogs and publishers.
pub struct Ledger {
    /// Ledger alias.
    pub alias: String,
    /// Publishing address at the primary publisher.
    pub address: String,
    /// Ledger identity DID, when operating signed.
    pub did: Option<String>,
    catalog: Arc<Catalog>,
    cache: Arc<NodeCache>,
    primary_publisher: Arc<dyn Publisher>,
    secondary_publishers: Vec<Arc<dyn Publisher>>,
    branches: RwLock<FxHashMap<String, Arc<Branch>>>,
    default_branch: String,
    opts: IndexingOptions,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("alias", &self.alias)
            .field("branches", &self.branches.read().len())
            .finish()
    }
}

/// Splits an alias into `(alias, branch)`, defaulting the branch to
/// `main` when the alias has no `/` segment.
pub fn normalize_alias(input: &str) -> (String, String) {
    match input.rsplit_once('/') {
        Some((_, branch)) if !branch.is_empty() => (input.to_string(), branch.to_string()),
        _ => (format!("{input}/main"), "main".to_string()),
    }
}

impl Ledger {
    /// Creates a new ledger with a genesis commit at `t = 0` and registers
    /// its primary branch.
    pub async fn create(config: LedgerConfig) -> Result<Arc<Ledger>> {
        if let Some(publication) = &config.publication {
            if publication.published_ledger(&config.alias).await? {
                return Err(LedgerError::LedgerExists(config.alias.clone()));
            }
        }
        let (alias, branch_name) = normalize_alias(&config.alias);
        let genesis = Db::genesis(
            Arc::clone(&config.catalog),
            Arc::clone(&config.cache),
            &alias,
            &branch_name,
            config.opts,
        );
        let staged = Staged {
            delta: Vec::new(),
            db: genesis,
        };
        let ledger = Self::from_config(config, alias, branch_name.clone());
        let db = ledger
            .write_commit(staged, None, CommitOpts::default())
            .await?;
        let branch = Branch::new(db, ledger.opts);
        ledger.register_branch(branch);
        info!(alias = %ledger.alias, "ledger.create");
        Ok(ledger)
    }

    /// Builds a ledger around an already-loaded commit (the load path).
    pub async fn instantiate(config: LedgerConfig, commit: Commit) -> Result<Arc<Ledger>> {
        let (alias, branch_name) = normalize_alias(&config.alias);
        let db = Db::load(
            Arc::clone(&config.catalog),
            Arc::clone(&config.cache),
            config.opts,
            commit,
        )
        .await?;
        let ledger = Self::from_config(config, alias, branch_name);
        let branch = Branch::new(db, ledger.opts);
        ledger.register_branch(branch);
        debug!(alias = %ledger.alias, "ledger.instantiate");
        Ok(ledger)
    }

    fn from_config(config: LedgerConfig, alias: String, default_branch: String) -> Arc<Ledger> {
        let address = config.primary_publisher.publishing_address(&alias);
        Arc::new(Ledger {
            alias,
            address,
            did: config.did,
            catalog: config.catalog,
            cache: config.cache,
            primary_publisher: config.primary_publisher,
            secondary_publishers: config.secondary_publishers,
            branches: RwLock::new(FxHashMap::default()),
            default_branch,
            opts: config.opts,
            tasks: Mutex::new(Vec::new()),
        })
    }

    fn register_branch(self: &Arc<Self>, branch: Arc<Branch>) {
        let indexer = Indexer::new(Arc::clone(&self.catalog), Arc::clone(&self.cache));
        let publishers = self.publishers();
        let task = spawn_indexer(Arc::clone(&branch), indexer, publishers);
        self.branches
            .write()
            .insert(branch.name.clone(), Arc::clone(&branch));
        self.tasks.lock().push(task);
    }

    fn publishers(&self) -> Vec<Arc<dyn Publisher>> {
        let mut all = vec![Arc::clone(&self.primary_publisher)];
        all.extend(self.secondary_publishers.iter().cloned());
        all
    }

    /// The branch registered under `name`, or the primary branch.
    pub fn branch(&self, name: Option<&str>) -> Result<Arc<Branch>> {
        let name = name.unwrap_or(&self.default_branch);
        self.branches
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownLedger(format!("{}@{name}", self.alias)))
    }

    /// Current database of the primary branch.
    pub fn current_db(&self) -> Result<DbHandle> {
        Ok(self.branch(None)?.current_db())
    }

    /// Current database of a named branch.
    pub fn current_db_for(&self, branch: &str) -> Result<DbHandle> {
        Ok(self.branch(Some(branch))?.current_db())
    }

    /// Stages, validates, persists, publishes, and applies a transaction:
    /// the write path.
    pub async fn commit(&self, staged: Staged, opts: CommitOpts) -> Result<Db> {
        let branch = self.branch(Some(&staged.db.branch.clone()))?;
        let previous = branch.current_commit().ok_or_else(|| {
            LedgerError::Unexpected(format!("branch {} has no head", branch.name))
        })?;
        // Check the chain step before anything is written or published.
        if staged.db.t != t::next(previous.t) {
            return Err(LedgerError::InvalidCommit(format!(
                "staged t {} does not follow head t {}",
                staged.db.t, previous.t
            )));
        }
        let db = self.write_commit(staged, Some(&previous), opts).await?;
        let handle = branch.update_commit(db)?;
        handle.db().await
    }

    /// Writes the data document and commit document, publishes the head,
    /// and returns the DB with its commit attached. Does not touch branch
    /// state.
    async fn write_commit(
        &self,
        staged: Staged,
        previous: Option<&Commit>,
        opts: CommitOpts,
    ) -> Result<Db> {
        let db = staged.db;
        let data_doc = CommitDataDoc {
            v: DATA_VERSION,
            alias: db.alias.clone(),
            branch: db.branch.clone(),
            t: db.t,
            flakes: staged.delta.clone(),
            namespaces: db.namespaces.clone(),
            stats: DbStats {
                flakes: db.stats.flakes,
                size: db.stats.size,
            },
        };
        let data_write = self
            .catalog
            .content_write_json(&format!("{}/data", db.alias), &data_doc)
            .await?;

        let mut commit = Commit {
            id: String::new(),
            address: String::new(),
            alias: db.alias.clone(),
            branch: db.branch.clone(),
            t: db.t,
            previous: previous.map(Commit::commit_ref),
            data: Some(CommitData {
                id: format!("fluree:db:sha256:{}", data_write.hash),
                address: data_write.address,
                t: db.t,
                flakes: staged.delta.len() as u64,
                size: staged.delta.iter().map(|f| f.size_bytes() as u64).sum(),
            }),
            index: db.commit.index.clone(),
            time: opts.time.unwrap_or_else(now_iso),
            message: opts.message,
            tag: opts.tag,
            author: opts.author,
            annotation: opts.annotation,
            ns: vec![self.address.clone()],
            v: DATA_VERSION,
        };
        commit.id = commit_id(&commit);

        let doc = commit_jsonld(&commit);
        let write = self
            .catalog
            .content_write_bytes(
                &format!("{}/commit", db.alias),
                bytes::Bytes::from(crate::commit::jsonld::canonical_bytes(&doc)),
            )
            .await?;
        commit.address = write.address;

        publish_to_all(&commit_jsonld(&commit), &self.publishers()).await;
        debug!(alias = %db.alias, t = commit.t, id = %commit.id, "ledger.commit.write");
        Ok(db.with_commit(commit))
    }

    /// Decides what a pushed external commit means for this ledger and,
    /// when it is the direct successor, advances the branch.
    pub async fn notify(&self, commit: &Commit) -> Result<NotifyOutcome> {
        verify_commit_id(commit)?;
        let branch = self.branch(Some(&commit.branch))?;
        let current = branch.current_commit().ok_or_else(|| {
            LedgerError::Unexpected(format!("branch {} has no head", branch.name))
        })?;

        if commit.id == current.id {
            return Ok(NotifyOutcome::Current);
        }
        if commit.t == t::next(current.t)
            && commit
                .previous
                .as_ref()
                .map(|p| p.id == current.id)
                .unwrap_or(false)
        {
            let data = commit.data.as_ref().ok_or_else(|| {
                LedgerError::InvalidCommit("pushed commit carries no data".to_string())
            })?;
            let doc: CommitDataDoc = self.catalog.read_json_as(&data.address).await?;
            let current_db = branch.current_db().db().await?;
            let new_db = Db {
                t: commit.t,
                novelty: current_db.novelty.add_all(doc.flakes),
                schema: crate::db::Schema::from_iri_map(&doc.namespaces),
                namespaces: doc.namespaces,
                stats: doc.stats,
                commit: commit.clone(),
                ..current_db
            };
            branch.update_commit(new_db)?;
            info!(alias = %self.alias, t = commit.t, "ledger.notify.updated");
            return Ok(NotifyOutcome::Updated);
        }
        if t::newer(commit.t, t::next(current.t)) {
            debug!(alias = %self.alias, t = commit.t, "ledger.notify.newer");
            return Ok(NotifyOutcome::Newer);
        }
        warn!(alias = %self.alias, t = commit.t, current_t = current.t, "ledger.notify.stale");
        Ok(NotifyOutcome::Stale)
    }

    /// JSON entry point for `notify`, used by subscription handlers.
    pub async fn notify_json(&self, commit_doc: &Value) -> Result<NotifyOutcome> {
        let commit = crate::commit::jsonld::parse_commit(commit_doc)?;
        self.notify(&commit).await
    }

    /// Manually enqueues an index run for the current DB. The completion
    /// channel may be abandoned; the run is not cancelled.
    pub async fn trigger_index(
        &self,
        branch: Option<&str>,
        complete: Option<oneshot::Sender<IndexResult>>,
    ) -> Result<bool> {
        let branch = self.branch(branch)?;
        let db = branch.current_db().db().await?;
        Ok(branch.enqueue_index(db, true, None, complete))
    }

    /// Triggers an index run and waits up to `timeout` for it. On timeout
    /// the run keeps going in the background and the caller is told so.
    pub async fn trigger_index_with_timeout(
        &self,
        branch: Option<&str>,
        timeout: Duration,
    ) -> Result<IndexResult> {
        let (tx, rx) = oneshot::channel();
        if !self.trigger_index(branch, Some(tx)).await? {
            return Err(LedgerError::Unavailable(
                "index queue is closed".to_string(),
            ));
        }
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(LedgerError::Unexpected(
                "index job superseded by a newer one".to_string(),
            )),
            Err(_) => Err(LedgerError::Timeout(
                "indexer still running in the background".to_string(),
            )),
        }
    }

    /// Closes every branch's index queue. In-flight runs complete and
    /// their results are discarded.
    pub fn close(&self) {
        for branch in self.branches.read().values() {
            branch.close();
        }
        debug!(alias = %self.alias, "ledger.close");
    }
}

fn now_iso() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
