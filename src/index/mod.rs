//! The sorted-index engine: novelty buffers, persistent trees, the shared
//! node cache, reindexing, and garbage collection.

pub mod cache;
pub mod garbage;
pub mod node;
pub mod novelty;
pub mod reindex;

use serde::{Deserialize, Serialize};

use crate::flake::T;
use node::ChildRef;

/// The five persistent tree roots of one DB snapshot. `None` means the
/// index has never been written; all data then lives in novelty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexRoots {
    /// Subject-first tree.
    pub spot: Option<ChildRef>,
    /// Predicate-subject tree.
    pub psot: Option<ChildRef>,
    /// Predicate-object tree.
    pub post: Option<ChildRef>,
    /// Object-first tree.
    pub opst: Option<ChildRef>,
    /// Transaction-first tree.
    pub tspo: Option<ChildRef>,
}

impl IndexRoots {
    /// True when no index has been written yet.
    pub fn is_empty(&self) -> bool {
        self.spot.is_none()
            && self.psot.is_none()
            && self.post.is_none()
            && self.opst.is_none()
            && self.tspo.is_none()
    }

    /// Total indexed flakes, read off the spot root.
    pub fn flakes(&self) -> u64 {
        self.spot.as_ref().map(|r| r.flakes).unwrap_or(0)
    }

    /// Total indexed bytes, read off the spot root.
    pub fn size(&self) -> usize {
        self.spot.as_ref().map(|r| r.size).unwrap_or(0)
    }
}

/// The stored index-root document a commit's `index.address` points at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRootDoc {
    /// Document version.
    pub v: u32,
    /// Ledger alias.
    pub alias: String,
    /// Branch name.
    pub branch: String,
    /// Transaction the roots cover.
    pub t: T,
    /// The five tree roots.
    pub roots: IndexRoots,
    /// Address of the garbage record for this run, if any.
    pub garbage: Option<String>,
    /// Indexed flake count.
    pub flakes: u64,
    /// Indexed byte size.
    pub size: usize,
}
