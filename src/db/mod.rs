//! The immutable database snapshot.
//!
//! A [`Db`] is a value: the five persistent index roots, the novelty
//! staged since the last reindex, cumulative stats, the IRI mapping, and
//! the commit it reflects. Staging produces a new value one transaction
//! ahead; older values remain valid views forever.

pub mod async_db;
pub mod dataset;
pub mod iri;
pub mod range;
pub mod time_travel;

use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::commit::{Commit, CommitDataDoc, IndexRef};
use crate::error::{LedgerError, Result};
use crate::flake::{t, Flake, FlakeValue, Sid, T};
use crate::index::cache::NodeCache;
use crate::index::novelty::Novelty;
use crate::index::{IndexRootDoc, IndexRoots};
use crate::storage::Catalog;
use crate::transact::{ObjectSpec, TxOp};
use iri::IriMap;
use range::Pattern;

/// Cumulative database statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbStats {
    /// Total flakes ever staged, assertions and retractions alike.
    pub flakes: u64,
    /// Estimated total byte size.
    pub size: u64,
}

/// Indexing knobs carried by every DB and branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexingOptions {
    /// Novelty size that makes the branch enqueue an index run.
    pub reindex_min_bytes: usize,
    /// Leaf size ceiling during reindex.
    pub reindex_max_bytes: usize,
    /// Historical index roots kept before garbage collection.
    pub max_old_indexes: usize,
    /// When set, commits never enqueue index runs.
    pub indexing_disabled: bool,
}

impl Default for IndexingOptions {
    fn default() -> Self {
        IndexingOptions {
            reindex_min_bytes: 100_000,
            reindex_max_bytes: 1_000_000,
            max_old_indexes: 2,
            indexing_disabled: false,
        }
    }
}

impl IndexingOptions {
    pub(crate) fn reindex_opts(&self) -> crate::index::reindex::ReindexOptions {
        crate::index::reindex::ReindexOptions {
            min_bytes: self.reindex_min_bytes,
            max_bytes: self.reindex_max_bytes,
        }
    }
}

/// Predicate metadata tracked by the schema registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredicateInfo {
    /// Predicate IRI.
    pub iri: String,
    /// True when the predicate has carried reference objects.
    pub ref_type: bool,
}

/// Thin vocabulary registry rebuilt from the IRI map on load.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    /// Known predicates by SID.
    pub predicates: FxHashMap<Sid, PredicateInfo>,
}

impl Schema {
    pub(crate) fn from_iri_map(map: &IriMap) -> Schema {
        let mut predicates = FxHashMap::default();
        for (iri, sid) in map.predicates() {
            predicates.insert(
                sid,
                PredicateInfo {
                    iri: iri.to_string(),
                    ref_type: false,
                },
            );
        }
        Schema { predicates }
    }
}

/// Access policy attached to a DB view. Evaluation is an external
/// collaborator; the engine only carries the wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Policy {
    /// Unrestricted root view.
    #[default]
    Root,
    /// View restricted to an identity.
    Restricted {
        /// The restricted identity (a DID).
        identity: String,
    },
}

/// An immutable database snapshot.
#[derive(Clone)]
pub struct Db {
    /// Ledger alias.
    pub alias: String,
    /// Branch name.
    pub branch: String,
    /// Transaction counter of this snapshot.
    pub t: T,
    /// Time-travel bound; queries ignore anything newer.
    pub to_t: Option<T>,
    /// The commit this snapshot reflects.
    pub commit: Commit,
    /// Persistent index roots.
    pub indexes: IndexRoots,
    /// Staged flakes not yet in the persistent trees.
    pub novelty: Novelty,
    /// Cumulative stats.
    pub stats: DbStats,
    /// IRI↔SID mapping snapshot.
    pub namespaces: IriMap,
    /// Predicate registry.
    pub schema: Schema,
    /// Policy wrapper.
    pub policy: Policy,
    /// Indexing thresholds.
    pub opts: IndexingOptions,
    /// Storage the snapshot resolves nodes from.
    pub catalog: Arc<Catalog>,
    /// Shared resolved-node cache.
    pub cache: Arc<NodeCache>,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("alias", &self.alias)
            .field("branch", &self.branch)
            .field("t", &self.t)
            .field("novelty", &self.novelty.len())
            .finish()
    }
}

/// A freshly staged DB plus the flake delta that produced it.
#[derive(Debug, Clone)]
pub struct Staged {
    /// The new snapshot, one transaction ahead.
    pub db: Db,
    /// Flakes introduced by the transaction.
    pub delta: Vec<Flake>,
}

impl Db {
    /// An empty snapshot at the genesis transaction with no commit
    /// attached yet.
    pub fn genesis(
        catalog: Arc<Catalog>,
        cache: Arc<NodeCache>,
        alias: &str,
        branch: &str,
        opts: IndexingOptions,
    ) -> Db {
        Db {
            alias: alias.to_string(),
            branch: branch.to_string(),
            t: t::GENESIS,
            to_t: None,
            commit: placeholder_commit(alias, branch),
            indexes: IndexRoots::default(),
            novelty: Novelty::new(),
            stats: DbStats::default(),
            namespaces: IriMap::new(),
            schema: Schema::default(),
            policy: Policy::Root,
            opts,
            catalog,
            cache,
        }
    }

    /// The `t` queries against this view observe.
    pub fn effective_t(&self) -> T {
        self.to_t.unwrap_or(self.t)
    }

    /// Stages a transaction, producing a snapshot at the next `t`.
    pub fn stage(&self, ops: &[TxOp]) -> Result<Staged> {
        if ops.is_empty() {
            return Err(LedgerError::InvalidArgument(
                "transaction contains no operations".to_string(),
            ));
        }
        if self.to_t.is_some() {
            return Err(LedgerError::InvalidArgument(
                "cannot stage against a time-travel view".to_string(),
            ));
        }
        let new_t = t::next(self.t);
        let mut namespaces = self.namespaces.clone();
        let mut schema = self.schema.clone();
        let mut delta = Vec::with_capacity(ops.len());
        for op in ops {
            let (s_iri, p_iri, object, assert) = match op {
                TxOp::Assert { s, p, o } => (s, p, o, true),
                TxOp::Retract { s, p, o } => (s, p, o, false),
            };
            let s = namespaces.ensure_subject(s_iri);
            let p = namespaces.ensure_predicate(p_iri);
            let (o, is_ref) = match object {
                ObjectSpec::Iri(iri) => (FlakeValue::Ref(namespaces.ensure_subject(iri)), true),
                ObjectSpec::Value(v) => (v.clone(), false),
            };
            let entry = schema.predicates.entry(p).or_insert_with(|| PredicateInfo {
                iri: p_iri.clone(),
                ref_type: false,
            });
            entry.ref_type |= is_ref;
            delta.push(Flake::new(s, p, o, new_t, assert, None));
        }

        let novelty = self.novelty.add_all(delta.clone());
        let stats = DbStats {
            flakes: self.stats.flakes + delta.len() as u64,
            size: self.stats.size + delta.iter().map(|f| f.size_bytes() as u64).sum::<u64>(),
        };
        debug!(alias = %self.alias, t = new_t, flakes = delta.len(), "db.stage");
        Ok(Staged {
            db: Db {
                t: new_t,
                novelty,
                stats,
                namespaces,
                schema,
                ..self.clone()
            },
            delta,
        })
    }

    /// Attaches the commit the snapshot now reflects.
    pub fn with_commit(mut self, commit: Commit) -> Db {
        self.commit = commit;
        self
    }

    /// Applies a published index root: loads the root document, swaps the
    /// five trees in, and drops the novelty the index now covers.
    pub async fn apply_index(&self, index: &IndexRef) -> Result<Db> {
        let doc: IndexRootDoc = self.catalog.read_json_as(&index.address).await?;
        if doc.alias != self.alias {
            return Err(LedgerError::Unexpected(format!(
                "index root for {} applied to {}",
                doc.alias, self.alias
            )));
        }
        // The index may trail the commit, never lead it.
        if t::newer(doc.t, self.t) {
            return Err(LedgerError::InvalidCommit(format!(
                "index at t {} is newer than db at t {}",
                doc.t, self.t
            )));
        }
        let remaining = self.novelty.flakes_newer_than(doc.t);
        let novelty = Novelty::new().add_all(remaining);
        let mut commit = self.commit.clone();
        commit.index = Some(index.clone());
        debug!(alias = %self.alias, t = self.t, index_t = doc.t, "db.apply_index");
        Ok(Db {
            indexes: doc.roots,
            novelty,
            commit,
            ..self.clone()
        })
    }

    /// Rebuilds a snapshot from a loaded commit: the index root document
    /// plus the data documents of every commit the index does not cover.
    pub async fn load(
        catalog: Arc<Catalog>,
        cache: Arc<NodeCache>,
        opts: IndexingOptions,
        commit: Commit,
    ) -> Result<Db> {
        let (indexes, index_t) = match &commit.index {
            None => (IndexRoots::default(), None),
            Some(index) => {
                let doc: IndexRootDoc = catalog.read_json_as(&index.address).await?;
                let doc_t = doc.t;
                (doc.roots, Some(doc_t))
            }
        };

        let mut namespaces = None;
        let mut stats = DbStats::default();
        let mut staged: Vec<Flake> = Vec::new();
        let mut cursor = Some(commit.clone());
        while let Some(current) = cursor {
            let covered = index_t.map(|it| current.t >= it).unwrap_or(false);
            let data = current.data.as_ref().ok_or_else(|| {
                LedgerError::InvalidCommit(format!("commit {} carries no data", current.id))
            })?;
            if namespaces.is_none() {
                let doc: CommitDataDoc = catalog.read_json_as(&data.address).await?;
                namespaces = Some(doc.namespaces);
                stats = doc.stats;
                if !covered {
                    staged.extend(doc.flakes);
                }
            } else if !covered {
                let doc: CommitDataDoc = catalog.read_json_as(&data.address).await?;
                staged.extend(doc.flakes);
            } else {
                break;
            }
            if covered {
                break;
            }
            cursor = match &current.previous {
                None => None,
                Some(prev) => {
                    let doc = catalog.read_json(&prev.address).await?;
                    Some(crate::commit::jsonld::parse_commit(&doc)?)
                }
            };
        }

        let namespaces = namespaces.unwrap_or_default();
        let schema = Schema::from_iri_map(&namespaces);
        debug!(alias = %commit.alias, t = commit.t, staged = staged.len(), "db.load");
        Ok(Db {
            alias: commit.alias.clone(),
            branch: commit.branch.clone(),
            t: commit.t,
            to_t: None,
            indexes,
            novelty: Novelty::new().add_all(staged),
            stats,
            schema,
            namespaces,
            policy: Policy::Root,
            opts,
            catalog,
            cache,
            commit,
        })
    }

    /// The unrestricted root view of this snapshot.
    pub fn policy_root(&self) -> Db {
        Db {
            policy: Policy::Root,
            ..self.clone()
        }
    }

    /// A view restricted to `identity`. Policy evaluation happens outside
    /// the engine; the wrapper just travels with the value.
    pub fn wrap_policy(&self, identity: &str) -> Db {
        Db {
            policy: Policy::Restricted {
                identity: identity.to_string(),
            },
            ..self.clone()
        }
    }

    /// Resolves a subject IRI against this snapshot's mapping.
    pub fn subject_sid(&self, iri: &str) -> Option<Sid> {
        self.namespaces.subject_sid(iri)
    }

    /// Resolves a predicate IRI against this snapshot's mapping.
    pub fn predicate_sid(&self, iri: &str) -> Option<Sid> {
        self.namespaces.predicate_sid(iri)
    }

    /// True when staged novelty has reached the reindex threshold.
    pub fn needs_reindex(&self) -> bool {
        self.novelty.size() >= self.opts.reindex_min_bytes
    }
}

fn placeholder_commit(alias: &str, branch: &str) -> Commit {
    Commit {
        id: String::new(),
        address: String::new(),
        alias: alias.to_string(),
        branch: branch.to_string(),
        t: t::GENESIS,
        previous: None,
        data: None,
        index: None,
        time: String::new(),
        message: None,
        tag: Vec::new(),
        author: None,
        annotation: None,
        ns: Vec::new(),
        v: crate::commit::DATA_VERSION,
    }
}

/// Triple-pattern matching, the overlap shared by concrete DBs, deferred
/// handles, and composed datasets.
#[async_trait]
pub trait Matcher: Send + Sync {
    /// Current assertions matching the pattern, netted against
    /// retractions at the view's effective `t`.
    async fn match_pattern(&self, pattern: &Pattern) -> Result<Vec<Flake>>;
}

#[async_trait]
impl Matcher for Db {
    async fn match_pattern(&self, pattern: &Pattern) -> Result<Vec<Flake>> {
        range::match_pattern(self, pattern).await
    }
}
