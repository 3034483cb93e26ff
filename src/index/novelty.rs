//! The novelty buffer: staged flakes awaiting indexing.
//!
//! One flake set per ordering, all holding the same flakes. The byte size
//! used for reindex threshold decisions is the spot set's alone.

use crate::flake::ord::{Opst, Post, Psot, Spot, Tspo};
use crate::flake::set::FlakeSet;
use crate::flake::{Flake, T};

/// Five parallel sorted views over the staged flakes of one DB.
#[derive(Debug, Clone, Default)]
pub struct Novelty {
    /// Subject-first view.
    pub spot: FlakeSet<Spot>,
    /// Predicate-subject view.
    pub psot: FlakeSet<Psot>,
    /// Predicate-object view.
    pub post: FlakeSet<Post>,
    /// Object-first view.
    pub opst: FlakeSet<Opst>,
    /// Transaction-first view.
    pub tspo: FlakeSet<Tspo>,
    size: usize,
}

impl Novelty {
    /// Empty buffer.
    pub fn new() -> Novelty {
        Novelty::default()
    }

    /// Stages a batch of flakes into all five orderings.
    pub fn add_all(&self, flakes: Vec<Flake>) -> Novelty {
        if flakes.is_empty() {
            return self.clone();
        }
        let spot = self.spot.conj_all(flakes.iter().cloned());
        let size = spot.size_bytes();
        Novelty {
            spot,
            psot: self.psot.conj_all(flakes.iter().cloned()),
            post: self.post.conj_all(flakes.iter().cloned()),
            opst: self.opst.conj_all(flakes.iter().cloned()),
            tspo: self.tspo.conj_all(flakes),
            size,
        }
    }

    /// Staged byte size (spot ordering only, per the threshold contract).
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of staged flakes.
    pub fn len(&self) -> usize {
        self.spot.len()
    }

    /// True when nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.spot.is_empty()
    }

    /// Staged flakes newer than `t`, in transaction order. Time travel
    /// filters on this to drop novelty the target `t` cannot see.
    pub fn flakes_newer_than(&self, t: T) -> Vec<Flake> {
        self.tspo.iter().filter(|f| f.t < t).cloned().collect()
    }

    /// An emptied buffer, used after novelty lands in the persistent tree.
    pub fn cleared(&self) -> Novelty {
        Novelty::new()
    }

    /// Checks the five views agree, for tests and integrity sweeps.
    pub fn check_consistent(&self) -> bool {
        let n = self.spot.len();
        self.psot.len() == n && self.post.len() == n && self.opst.len() == n && self.tspo.len() == n
    }
}
