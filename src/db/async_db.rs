//! Deferred database handles.
//!
//! An [`AsyncDb`] stands in for a DB that is still loading or re-indexing:
//! a handle carrying `{alias, branch, commit, t}` synchronously plus a
//! promise cell that will eventually hold the DB or the error that sank
//! it. Every capability awaits the cell, propagates the error, and
//! delegates — callers never observe an in-between state, and printing the
//! handle never blocks.

use async_trait::async_trait;
use tracing::warn;

use crate::commit::{CommitRef, IndexRef};
use crate::error::{LedgerError, Result};
use crate::flake::{Flake, FlakeValue, Sid, T};
use crate::primitives::promise::Promise;

use super::range::Pattern;
use super::{Db, Matcher};

type DbCell = Promise<std::result::Result<Db, LedgerError>>;

/// A database handle whose value may still be in flight.
#[derive(Clone)]
pub struct AsyncDb {
    /// Ledger alias.
    pub alias: String,
    /// Branch name.
    pub branch: String,
    /// Reference to the commit this handle was issued for.
    pub commit: CommitRef,
    /// Transaction counter, known at issue time.
    pub t: T,
    cell: DbCell,
}

impl std::fmt::Debug for AsyncDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never touches the cell: printing must not block on resolution.
        f.debug_struct("AsyncDb")
            .field("alias", &self.alias)
            .field("branch", &self.branch)
            .field("t", &self.t)
            .finish()
    }
}

impl AsyncDb {
    /// A handle that is already resolved.
    pub fn resolved(db: Db) -> AsyncDb {
        AsyncDb {
            alias: db.alias.clone(),
            branch: db.branch.clone(),
            commit: db.commit.commit_ref(),
            t: db.t,
            cell: Promise::delivered(Ok(db)),
        }
    }

    /// An unresolved handle; the returned handle doubles as the delivery
    /// side via [`AsyncDb::deliver`].
    pub fn pending(alias: &str, branch: &str, commit: CommitRef, t: T) -> AsyncDb {
        AsyncDb {
            alias: alias.to_string(),
            branch: branch.to_string(),
            commit,
            t,
            cell: Promise::new(),
        }
    }

    /// Completes the handle. Exactly one delivery wins; the rest are
    /// no-ops.
    pub fn deliver(&self, result: Result<Db>) -> bool {
        self.cell.deliver(result)
    }

    /// Waits for the underlying DB, propagating a delivery error.
    pub async fn db(&self) -> Result<Db> {
        match self.cell.get().await {
            Some(Ok(db)) => Ok(db),
            Some(Err(e)) => Err(e),
            None => Err(LedgerError::Unavailable(format!(
                "db handle for {} abandoned before resolution",
                self.alias
            ))),
        }
    }

    /// The resolved DB if delivery already happened.
    pub fn peek(&self) -> Option<Result<Db>> {
        self.cell.peek()
    }

    /// Latest known transaction, available synchronously.
    pub fn latest_t(&self) -> T {
        self.t
    }

    /// Aliases this handle answers for, available synchronously.
    pub fn aliases(&self) -> Vec<String> {
        vec![self.alias.clone()]
    }

    /// A handle resolving to this DB with a newer index applied. Returns
    /// immediately; the application happens behind the new handle's cell.
    pub fn index_update(&self, index: IndexRef) -> AsyncDb {
        let next = AsyncDb {
            alias: self.alias.clone(),
            branch: self.branch.clone(),
            commit: self.commit.clone(),
            t: self.t,
            cell: Promise::new(),
        };
        let source = self.clone();
        let target = next.clone();
        tokio::spawn(async move {
            let result = match source.db().await {
                Ok(db) => db.apply_index(&index).await,
                Err(e) => Err(e),
            };
            if let Err(e) = &result {
                warn!(alias = %target.alias, error = %e, "async_db.index_update.failed");
            }
            target.deliver(result);
        });
        next
    }

    /// A handle resolving to the view of the underlying DB at `target`.
    pub fn as_of(&self, target: T) -> AsyncDb {
        let next = AsyncDb {
            alias: self.alias.clone(),
            branch: self.branch.clone(),
            commit: self.commit.clone(),
            t: target,
            cell: Promise::new(),
        };
        let source = self.clone();
        let handle = next.clone();
        tokio::spawn(async move {
            let result = match source.db().await {
                Ok(db) => db.as_of(target),
                Err(e) => Err(e),
            };
            handle.deliver(result);
        });
        next
    }

    /// A handle resolving to a policy-restricted view of the underlying
    /// DB.
    pub fn wrap_policy(&self, identity: &str) -> AsyncDb {
        let next = AsyncDb {
            alias: self.alias.clone(),
            branch: self.branch.clone(),
            commit: self.commit.clone(),
            t: self.t,
            cell: Promise::new(),
        };
        let identity = identity.to_string();
        let source = self.clone();
        let handle = next.clone();
        tokio::spawn(async move {
            let result = source.db().await.map(|db| db.wrap_policy(&identity));
            handle.deliver(result);
        });
        next
    }

    /// A handle resolving to the unrestricted root view.
    pub fn root(&self) -> AsyncDb {
        let next = AsyncDb {
            alias: self.alias.clone(),
            branch: self.branch.clone(),
            commit: self.commit.clone(),
            t: self.t,
            cell: Promise::new(),
        };
        let source = self.clone();
        let handle = next.clone();
        tokio::spawn(async move {
            let result = source.db().await.map(|db| db.policy_root());
            handle.deliver(result);
        });
        next
    }

    /// Stages a transaction against the resolved DB.
    pub async fn stage(&self, ops: &[crate::transact::TxOp]) -> Result<super::Staged> {
        self.db().await?.stage(ops)
    }
}

#[async_trait]
impl Matcher for AsyncDb {
    async fn match_pattern(&self, pattern: &Pattern) -> Result<Vec<Flake>> {
        self.db().await?.match_pattern(pattern).await
    }
}

/// Either a concrete snapshot or a deferred handle. Branch state and
/// datasets hold this, so a pending load never blocks bookkeeping.
#[derive(Debug, Clone)]
pub enum DbHandle {
    /// A resolved snapshot.
    Ready(Db),
    /// A handle still resolving.
    Deferred(AsyncDb),
}

impl DbHandle {
    /// The transaction counter known without blocking.
    pub fn t(&self) -> T {
        match self {
            DbHandle::Ready(db) => db.t,
            DbHandle::Deferred(handle) => handle.t,
        }
    }

    /// Waits for the concrete DB.
    pub async fn db(&self) -> Result<Db> {
        match self {
            DbHandle::Ready(db) => Ok(db.clone()),
            DbHandle::Deferred(handle) => handle.db().await,
        }
    }

    /// Objects currently asserted for `(s, p)`, resolving first if needed.
    pub async fn match_objects(&self, s: Sid, p: Sid) -> Result<Vec<FlakeValue>> {
        self.db().await?.match_objects(s, p).await
    }
}

#[async_trait]
impl Matcher for DbHandle {
    async fn match_pattern(&self, pattern: &Pattern) -> Result<Vec<Flake>> {
        self.db().await?.match_pattern(pattern).await
    }
}
