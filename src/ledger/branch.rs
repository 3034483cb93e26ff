//! Branch state: one named linear chain of commits.
//!
//! The state is a single atomic cell holding `{commit, current-db}`;
//! writers validate against the snapshot they read and retry when the cell
//! moved underneath them. Each branch also owns the queue feeding its
//! indexer: a sliding buffer of one, because indexing is idempotent over
//! the latest DB and stale jobs are worthless.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, trace, warn};

use crate::commit::{index_newer, validate_successor, Commit};
use crate::db::async_db::{AsyncDb, DbHandle};
use crate::db::{Db, IndexingOptions};
use crate::error::{LedgerError, Result};
use crate::flake::{t, T};

use super::indexer::IndexResult;

/// The atomic cell contents.
#[derive(Debug, Clone)]
pub struct BranchState {
    /// Head commit; `None` only before genesis lands.
    pub commit: Option<Commit>,
    /// Current database, possibly still resolving after a rebase.
    pub current: DbHandle,
}

/// One job for the branch's indexer.
#[derive(Debug)]
pub struct IndexJob {
    /// The DB to index.
    pub db: Db,
    /// Manual triggers index below the novelty threshold too.
    pub force: bool,
    /// Sink for addresses of nodes written during the run, for
    /// replication.
    pub changes: Option<mpsc::Sender<String>>,
    /// One-shot completion channel; dropped jobs close it, which the
    /// submitter observes as abandonment.
    pub complete: Option<oneshot::Sender<IndexResult>>,
}

/// Single-consumer queue with a sliding buffer of one.
#[derive(Default)]
pub struct IndexQueue {
    slot: Mutex<Option<IndexJob>>,
    notify: Notify,
    closed: AtomicBool,
}

impl IndexQueue {
    /// Creates an open, empty queue.
    pub fn new() -> IndexQueue {
        IndexQueue::default()
    }

    /// Enqueues a job, replacing any pending one. Returns `false` when the
    /// queue is closed.
    pub fn push(&self, job: IndexJob) -> bool {
        if self.closed.load(AtomicOrdering::Acquire) {
            return false;
        }
        let replaced = self.slot.lock().replace(job).is_some();
        if replaced {
            trace!("branch.index_queue.dropped_stale_job");
        }
        self.notify.notify_one();
        true
    }

    /// Waits for the next job; `None` once the queue is closed and
    /// drained.
    pub async fn recv(&self) -> Option<IndexJob> {
        loop {
            if let Some(job) = self.slot.lock().take() {
                return Some(job);
            }
            if self.closed.load(AtomicOrdering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Closes the queue. Pending and in-flight work still completes.
    pub fn close(&self) {
        self.closed.store(true, AtomicOrdering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// True once closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(AtomicOrdering::Acquire)
    }
}

/// Outcome of merging an indexed DB into branch state.
#[derive(Debug, Clone)]
pub struct IndexMergeOutcome {
    /// Head commit before the merge.
    pub previous: Commit,
    /// Head commit after the merge.
    pub current: Commit,
    /// True when the cell was actually replaced.
    pub changed: bool,
}

/// A named branch of one ledger.
pub struct Branch {
    /// Ledger alias.
    pub alias: String,
    /// Branch name.
    pub name: String,
    state: RwLock<BranchState>,
    queue: Arc<IndexQueue>,
    opts: IndexingOptions,
}

impl std::fmt::Debug for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Branch")
            .field("alias", &self.alias)
            .field("name", &self.name)
            .field("t", &self.current_t())
            .finish()
    }
}

impl Branch {
    /// Creates a branch seeded with its genesis DB (commit attached).
    pub fn new(db: Db, opts: IndexingOptions) -> Arc<Branch> {
        Arc::new(Branch {
            alias: db.alias.clone(),
            name: db.branch.clone(),
            state: RwLock::new(BranchState {
                commit: Some(db.commit.clone()),
                current: DbHandle::Ready(db),
            }),
            queue: Arc::new(IndexQueue::new()),
            opts,
        })
    }

    /// The feeder queue for this branch's indexer.
    pub fn queue(&self) -> Arc<IndexQueue> {
        Arc::clone(&self.queue)
    }

    /// Indexing options in force for this branch.
    pub fn opts(&self) -> IndexingOptions {
        self.opts
    }

    /// Snapshot of the state cell.
    pub fn state(&self) -> BranchState {
        self.state.read().clone()
    }

    /// The current database handle.
    pub fn current_db(&self) -> DbHandle {
        self.state.read().current.clone()
    }

    /// The head commit.
    pub fn current_commit(&self) -> Option<Commit> {
        self.state.read().commit.clone()
    }

    /// The head transaction.
    pub fn current_t(&self) -> Option<T> {
        self.state.read().commit.as_ref().map(|c| c.t)
    }

    /// Applies a new commit to the branch per the update protocol:
    /// validate the chain step, rebase onto a newer index when the commit
    /// carries one the DB has not applied, publish the new state, and
    /// enqueue an index job unless indexing is disabled.
    pub fn update_commit(&self, new_db: Db) -> Result<DbHandle> {
        let new_commit = new_db.commit.clone();
        let handle = {
            let mut state = self.state.write();
            validate_successor(state.commit.as_ref(), &new_commit)?;

            let commit_index_t = new_commit.index_t();
            let applied_index_t = new_db.indexes.spot.as_ref().map(|r| r.t);
            let needs_rebase = match (commit_index_t, applied_index_t) {
                (Some(ci), Some(ai)) => t::newer(ci, ai),
                (Some(_), None) => true,
                (None, _) => false,
            };

            let handle = if needs_rebase {
                // The commit references an index this DB never applied;
                // publish a deferred handle that applies it in the
                // background.
                let index = new_commit.index.clone().expect("needs_rebase implies index");
                let pending = AsyncDb::pending(
                    &new_db.alias,
                    &new_db.branch,
                    new_commit.commit_ref(),
                    new_db.t,
                );
                let deliver = pending.clone();
                let source = new_db.clone();
                tokio::spawn(async move {
                    let result = source.apply_index(&index).await;
                    if let Err(e) = &result {
                        warn!(error = %e, "branch.rebase.failed");
                    }
                    deliver.deliver(result);
                });
                DbHandle::Deferred(pending)
            } else {
                DbHandle::Ready(new_db.clone())
            };

            debug!(
                alias = %self.alias,
                branch = %self.name,
                t = new_commit.t,
                "branch.commit.accept"
            );
            *state = BranchState {
                commit: Some(new_commit),
                current: handle.clone(),
            };
            handle
        };

        if !self.opts.indexing_disabled {
            self.enqueue_index(new_db, false, None, None);
        }
        Ok(handle)
    }

    /// Merges an indexed DB back into branch state per the index-update
    /// protocol.
    pub async fn update_index(&self, indexed: Db) -> Result<IndexMergeOutcome> {
        loop {
            let (current_commit, current_handle) = {
                let state = self.state.read();
                let commit = state.commit.clone().ok_or_else(|| {
                    LedgerError::Unexpected("branch has no commit".to_string())
                })?;
                (commit, state.current.clone())
            };

            if t::newer(indexed.t, current_commit.t) {
                // An index for a commit the branch never saw.
                warn!(
                    alias = %self.alias,
                    indexed_t = indexed.t,
                    current_t = current_commit.t,
                    "branch.index.future_rejected"
                );
                return Err(LedgerError::Unexpected(format!(
                    "index at t {} is ahead of branch at t {}",
                    indexed.t, current_commit.t
                )));
            }

            if indexed.t == current_commit.t {
                if !index_newer(indexed.commit.index.as_ref(), current_commit.index.as_ref()) {
                    return Ok(IndexMergeOutcome {
                        previous: current_commit.clone(),
                        current: current_commit,
                        changed: false,
                    });
                }
                let mut state = self.state.write();
                let unchanged = state
                    .commit
                    .as_ref()
                    .map(|c| c.id == current_commit.id && c.index_t() == current_commit.index_t())
                    .unwrap_or(false);
                if !unchanged {
                    continue;
                }
                let new_commit = indexed.commit.clone();
                *state = BranchState {
                    commit: Some(new_commit.clone()),
                    current: DbHandle::Ready(indexed),
                };
                return Ok(IndexMergeOutcome {
                    previous: current_commit,
                    current: new_commit,
                    changed: true,
                });
            }

            // Commits advanced while indexing ran: graft the new index
            // pointer onto the latest DB.
            let index = indexed.commit.index.clone().ok_or_else(|| {
                LedgerError::Unexpected("indexed db carries no index pointer".to_string())
            })?;
            if !index_newer(Some(&index), current_commit.index.as_ref()) {
                return Ok(IndexMergeOutcome {
                    previous: current_commit.clone(),
                    current: current_commit,
                    changed: false,
                });
            }
            let current_db = current_handle.db().await?;
            let merged = current_db.apply_index(&index).await?;
            let merged_commit = merged.commit.clone();

            let mut state = self.state.write();
            let unchanged = state
                .commit
                .as_ref()
                .map(|c| c.id == current_commit.id && c.index_t() == current_commit.index_t())
                .unwrap_or(false);
            if !unchanged {
                // Another commit or index landed first; retry against it.
                continue;
            }
            debug!(
                alias = %self.alias,
                t = merged_commit.t,
                index_t = ?merged_commit.index_t(),
                "branch.index.merged"
            );
            *state = BranchState {
                commit: Some(merged_commit.clone()),
                current: DbHandle::Ready(merged),
            };
            return Ok(IndexMergeOutcome {
                previous: current_commit,
                current: merged_commit,
                changed: true,
            });
        }
    }

    /// Enqueues an index job for `db`. Returns `false` when the queue is
    /// closed.
    pub fn enqueue_index(
        &self,
        db: Db,
        force: bool,
        changes: Option<mpsc::Sender<String>>,
        complete: Option<oneshot::Sender<IndexResult>>,
    ) -> bool {
        self.queue.push(IndexJob {
            db,
            force,
            changes,
            complete,
        })
    }

    /// Closes the index queue; an in-flight run completes and its result
    /// is discarded.
    pub fn close(&self) {
        self.queue.close();
    }
}
