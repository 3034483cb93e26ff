//! The async indexer: one sequential consumer per branch.
//!
//! The loop takes the latest queued DB, compacts its novelty into the five
//! persistent trees, merges the result back into branch state, republishes
//! the amended commit, and retires index roots that fell out of the
//! retention window. Failures are reported on the job's completion channel
//! and never poison branch state.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::commit::{jsonld, Commit, IndexData, IndexRef};
use crate::db::Db;
use crate::error::Result;
use crate::flake::ord::{FlakeOrder, Opst, Post, Psot, Spot, Tspo};
use crate::index::cache::NodeCache;
use crate::index::garbage::{
    collect_garbage, write_garbage_record, GarbageRecord, IndexRetention, RetainedRoot,
};
use crate::index::reindex::reindex;
use crate::index::{IndexRootDoc, IndexRoots};
use crate::nameservice::{publish_to_all, Publisher};
use crate::storage::Catalog;

use super::branch::Branch;

/// Outcome delivered on a job's completion channel.
#[derive(Debug, Clone)]
pub enum IndexResult {
    /// The run finished; `commit` is the branch head afterwards.
    Success {
        /// Branch head commit after the merge.
        commit: Commit,
        /// The indexed DB the run produced.
        t: crate::flake::T,
    },
    /// The run failed; branch state is unchanged.
    Error {
        /// Failure rendering.
        message: String,
    },
}

/// Compacts novelty into persistent indexes for one branch at a time.
pub struct Indexer {
    catalog: Arc<Catalog>,
    cache: Arc<NodeCache>,
}

impl Indexer {
    /// Creates an indexer writing through `catalog`.
    pub fn new(catalog: Arc<Catalog>, cache: Arc<NodeCache>) -> Indexer {
        Indexer { catalog, cache }
    }

    /// Runs one index pass over `db`.
    ///
    /// Below the novelty threshold (and not forced) the DB comes back
    /// unchanged. Otherwise all five trees merge the shared novelty, the
    /// index root document is written, and the returned DB carries the new
    /// roots, cleared novelty, and the amended commit. Always a concrete
    /// DB, never a deferred handle.
    pub async fn index(
        &self,
        db: &Db,
        force: bool,
        changes: Option<&mpsc::Sender<String>>,
    ) -> Result<Db> {
        if db.novelty.is_empty() || (!force && !db.needs_reindex()) {
            return Ok(db.clone());
        }
        let t = db.t;
        let opts = db.opts.reindex_opts();
        let key = |name: &str| format!("{}/index/{name}", db.alias);

        let spot = reindex::<Spot>(
            &self.catalog,
            &self.cache,
            &key(Spot::NAME),
            db.indexes.spot.as_ref(),
            &db.novelty.spot,
            t,
            opts,
        )
        .await?;
        let psot = reindex::<Psot>(
            &self.catalog,
            &self.cache,
            &key(Psot::NAME),
            db.indexes.psot.as_ref(),
            &db.novelty.psot,
            t,
            opts,
        )
        .await?;
        let post = reindex::<Post>(
            &self.catalog,
            &self.cache,
            &key(Post::NAME),
            db.indexes.post.as_ref(),
            &db.novelty.post,
            t,
            opts,
        )
        .await?;
        let opst = reindex::<Opst>(
            &self.catalog,
            &self.cache,
            &key(Opst::NAME),
            db.indexes.opst.as_ref(),
            &db.novelty.opst,
            t,
            opts,
        )
        .await?;
        let tspo = reindex::<Tspo>(
            &self.catalog,
            &self.cache,
            &key(Tspo::NAME),
            db.indexes.tspo.as_ref(),
            &db.novelty.tspo,
            t,
            opts,
        )
        .await?;

        let outcomes = [&spot, &psot, &post, &opst, &tspo];
        if let Some(changes) = changes {
            for outcome in outcomes {
                for address in &outcome.written {
                    // Replication lag must not stall indexing.
                    let _ = changes.try_send(address.clone());
                }
            }
        }

        let garbage: Vec<String> = outcomes
            .iter()
            .flat_map(|o| o.garbage.iter().cloned())
            .collect();
        let garbage_address = write_garbage_record(
            &self.catalog,
            &GarbageRecord {
                alias: db.alias.clone(),
                branch: db.branch.clone(),
                t,
                garbage,
            },
        )
        .await?;

        let roots = IndexRoots {
            spot: spot.root,
            psot: psot.root,
            post: post.root,
            opst: opst.root,
            tspo: tspo.root,
        };
        let root_doc = IndexRootDoc {
            v: crate::index::node::NODE_VERSION,
            alias: db.alias.clone(),
            branch: db.branch.clone(),
            t,
            flakes: roots.flakes(),
            size: roots.size(),
            garbage: garbage_address,
            roots,
        };
        let write = self
            .catalog
            .content_write_json(&format!("{}/index", db.alias), &root_doc)
            .await?;
        let index_ref = IndexRef {
            id: format!("fluree:index:sha256:{}", write.hash),
            address: write.address,
            data: IndexData {
                t,
                flakes: root_doc.flakes,
                size: root_doc.size as u64,
            },
        };

        let mut commit = db.commit.clone();
        commit.index = Some(index_ref);
        info!(
            alias = %db.alias,
            t,
            flakes = root_doc.flakes,
            leaves = spot.stats.leaves_written,
            "indexer.run.complete"
        );
        Ok(Db {
            indexes: root_doc.roots,
            novelty: db.novelty.cleared(),
            commit,
            ..db.clone()
        })
    }
}

/// Spawns the consumer loop for one branch. The task ends when the
/// branch's queue is closed and drained.
pub fn spawn_indexer(
    branch: Arc<Branch>,
    indexer: Indexer,
    publishers: Vec<Arc<dyn Publisher>>,
) -> JoinHandle<()> {
    let machine_id = format!(
        "{}:{}",
        std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
        std::process::id()
    );
    tokio::spawn(async move {
        let mut retention = IndexRetention::new(branch.opts().max_old_indexes);
        let queue = branch.queue();
        while let Some(job) = queue.recv().await {
            let db = use_latest_index(job.db, &branch).await;
            if db.novelty.is_empty() {
                complete(
                    job.complete,
                    IndexResult::Success {
                        commit: db.commit.clone(),
                        t: db.t,
                    },
                );
                continue;
            }

            if let Some(primary) = publishers.first() {
                let _ = primary.index_start(&branch.alias, &machine_id).await;
            }
            let result = run_once(&branch, &indexer, db, job.force, job.changes.as_ref()).await;
            if let Some(primary) = publishers.first() {
                let _ = primary.index_finish(&branch.alias).await;
            }

            match result {
                Ok(Some((outcome_commit, indexed_t, retired))) => {
                    publish_to_all(&jsonld::commit_jsonld(&outcome_commit), &publishers).await;
                    if let Some(retired) = retired {
                        sweep(&indexer.catalog, retention.push(retired)).await;
                    }
                    complete(
                        job.complete,
                        IndexResult::Success {
                            commit: outcome_commit,
                            t: indexed_t,
                        },
                    );
                }
                Ok(None) => {
                    // Below threshold or already covered; nothing changed.
                    match branch.current_commit() {
                        Some(commit) => {
                            let t = commit.t;
                            complete(job.complete, IndexResult::Success { commit, t });
                        }
                        None => complete(
                            job.complete,
                            IndexResult::Error {
                                message: format!("branch {} has no head commit", branch.alias),
                            },
                        ),
                    }
                }
                Err(e) => {
                    warn!(alias = %branch.alias, error = %e, "indexer.run.failed");
                    complete(
                        job.complete,
                        IndexResult::Error {
                            message: e.to_string(),
                        },
                    );
                }
            }
        }
        debug!(alias = %branch.alias, "indexer.loop.closed");
    })
}

type RunOutcome = Option<(Commit, crate::flake::T, Option<RetainedRoot>)>;

async fn run_once(
    branch: &Arc<Branch>,
    indexer: &Indexer,
    db: Db,
    force: bool,
    changes: Option<&mpsc::Sender<String>>,
) -> Result<RunOutcome> {
    let indexed = indexer.index(&db, force, changes).await?;
    let index_ref = match &indexed.commit.index {
        Some(index) if indexed.commit.index != db.commit.index => index.clone(),
        _ => return Ok(None),
    };

    let merge = match branch.update_index(indexed.clone()).await {
        Ok(merge) => merge,
        Err(first_error) => {
            // Last resort: rebuild the DB from the catalog through the
            // index pointer, then retry the merge once.
            warn!(alias = %branch.alias, error = %first_error, "indexer.merge.retry_from_catalog");
            let mut commit = indexed.commit.clone();
            commit.index = Some(index_ref.clone());
            let reloaded = Db::load(
                Arc::clone(&indexer.catalog),
                Arc::clone(&indexer.cache),
                db.opts,
                commit,
            )
            .await?;
            branch.update_index(reloaded).await?
        }
    };

    if !merge.changed {
        return Ok(None);
    }
    let garbage_address = indexer
        .catalog
        .read_json_as::<IndexRootDoc>(&index_ref.address)
        .await
        .map(|doc| doc.garbage)
        .unwrap_or(None);
    Ok(Some((
        merge.current,
        indexed.t,
        Some(RetainedRoot {
            t: index_ref.data.t,
            index_address: index_ref.address.clone(),
            garbage_address,
        }),
    )))
}

/// Resolves against the branch's latest state so the run never compacts a
/// stale snapshot: if commits advanced past the queued DB, index the
/// current one instead.
async fn use_latest_index(job_db: Db, branch: &Arc<Branch>) -> Db {
    let current_t = branch.current_t();
    match current_t {
        Some(t) if crate::flake::t::newer(t, job_db.t) => match branch.current_db().db().await {
            Ok(db) => db,
            Err(e) => {
                warn!(alias = %branch.alias, error = %e, "indexer.latest_db.unresolved");
                job_db
            }
        },
        _ => job_db,
    }
}

async fn sweep(catalog: &Arc<Catalog>, retired: Option<RetainedRoot>) {
    if let Some(retired) = retired {
        if let Err(e) = collect_garbage(catalog, &retired).await {
            warn!(error = %e, "indexer.garbage.sweep_failed");
        }
    }
}

fn complete(channel: Option<tokio::sync::oneshot::Sender<IndexResult>>, result: IndexResult) {
    if let Some(channel) = channel {
        // The submitter may have abandoned the wait; that is fine.
        let _ = channel.send(result);
    }
}
