//! The commit chain.
//!
//! Commits are immutable, hash-linked records: each non-genesis commit
//! points at its predecessor by id and advances the transaction counter by
//! exactly one step. The canonical JSON-LD wire form and its hash live in
//! [`jsonld`].

pub mod jsonld;

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::flake::{t, Flake, T};

/// Current data format version carried in `v`.
pub const DATA_VERSION: u32 = 4;

/// Reference to another commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRef {
    /// Commit id (content hash of its canonical form).
    pub id: String,
    /// Storage address of the commit document.
    pub address: String,
}

/// Pointer to the flake-delta document of a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitData {
    /// Content id of the data document.
    pub id: String,
    /// Storage address of the data document.
    pub address: String,
    /// Transaction; always equals the owning commit's `t`.
    pub t: T,
    /// Flakes in the delta.
    pub flakes: u64,
    /// Byte estimate of the delta.
    pub size: u64,
}

/// Stats of a published index root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexData {
    /// Transaction the index covers.
    pub t: T,
    /// Indexed flake count.
    pub flakes: u64,
    /// Indexed byte size.
    pub size: u64,
}

/// Pointer to a published index root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRef {
    /// Content id of the index root document.
    pub id: String,
    /// Storage address of the index root document.
    pub address: String,
    /// Coverage stats.
    pub data: IndexData,
}

/// One commit in a branch's chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    /// Content hash of the canonical form (sans id and address).
    pub id: String,
    /// Storage address; empty until the commit document is written.
    pub address: String,
    /// Ledger alias.
    pub alias: String,
    /// Branch name.
    pub branch: String,
    /// Transaction counter.
    pub t: T,
    /// Predecessor, absent only on the genesis commit.
    pub previous: Option<CommitRef>,
    /// The flake delta. A commit without data is invalid.
    pub data: Option<CommitData>,
    /// Latest published index at commit time.
    pub index: Option<IndexRef>,
    /// ISO-8601 wall-clock time of the commit.
    pub time: String,
    /// Optional commit message.
    pub message: Option<String>,
    /// Optional tags.
    pub tag: Vec<String>,
    /// Optional author identity.
    pub author: Option<String>,
    /// Optional structured annotation.
    pub annotation: Option<String>,
    /// Nameservice addresses the commit was published to.
    pub ns: Vec<String>,
    /// Data format version.
    pub v: u32,
}

impl Commit {
    /// Reference to this commit.
    pub fn commit_ref(&self) -> CommitRef {
        CommitRef {
            id: self.id.clone(),
            address: self.address.clone(),
        }
    }

    /// The `t` the commit's index covers, when it carries one.
    pub fn index_t(&self) -> Option<T> {
        self.index.as_ref().map(|i| i.data.t)
    }
}

/// True when `x` carries a strictly newer index than `y`: `x` has one, and
/// `y` either has none or covers an older `t` (newer = smaller under the
/// decreasing-`t` convention).
pub fn index_newer(x: Option<&IndexRef>, y: Option<&IndexRef>) -> bool {
    match (x, y) {
        (Some(x), Some(y)) => t::newer(x.data.t, y.data.t),
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// Validates `next` as the successor of `current` on a branch.
///
/// Rules: `next` must carry data with `data.t == next.t`; when a current
/// commit exists, `next.t` must be exactly one step newer and
/// `next.previous.id` must equal the current commit's id.
pub fn validate_successor(current: Option<&Commit>, next: &Commit) -> Result<()> {
    let data = next
        .data
        .as_ref()
        .ok_or_else(|| LedgerError::InvalidCommit("commit carries no data".to_string()))?;
    if data.t != next.t {
        return Err(LedgerError::InvalidCommit(format!(
            "data t {} does not match commit t {}",
            data.t, next.t
        )));
    }
    match current {
        None => Ok(()),
        Some(current) => {
            if next.t != t::next(current.t) {
                return Err(LedgerError::InvalidCommit(format!(
                    "commit t {} does not follow {}",
                    next.t, current.t
                )));
            }
            match &next.previous {
                Some(prev) if prev.id == current.id => Ok(()),
                Some(prev) => Err(LedgerError::InvalidCommit(format!(
                    "previous id {} does not match current commit {}",
                    prev.id, current.id
                ))),
                None => Err(LedgerError::InvalidCommit(
                    "non-genesis commit missing previous pointer".to_string(),
                )),
            }
        }
    }
}

/// The stored flake-delta document a commit's `data.address` points at.
///
/// Besides the delta itself it snapshots the IRI mapping and cumulative
/// stats, so a loader rebuilds both from the head commit alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitDataDoc {
    /// Document version.
    pub v: u32,
    /// Ledger alias.
    pub alias: String,
    /// Branch name.
    pub branch: String,
    /// Transaction of the delta.
    pub t: T,
    /// Asserted and retracted flakes of the transaction, in tspo order.
    pub flakes: Vec<Flake>,
    /// Full IRI↔SID mapping at this `t`.
    pub namespaces: crate::db::iri::IriMap,
    /// Cumulative stats at this `t`.
    pub stats: crate::db::DbStats,
}

impl CommitDataDoc {
    /// Byte estimate of the delta.
    pub fn size(&self) -> u64 {
        self.flakes.iter().map(|f| f.size_bytes() as u64).sum()
    }
}
