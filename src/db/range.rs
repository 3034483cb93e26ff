//! Range scans and triple-pattern matching.
//!
//! A scan walks one persistent tree, resolving only the nodes whose key
//! range overlaps the requested bounds, overlays the staged novelty, and
//! returns raw flakes — assertions and retractions alike — in index order.
//! Pattern matching sits on top: it picks the most selective index for the
//! bound components, scans, then nets each `(s, p, o)` group down to its
//! newest assertion.

use std::cmp::Ordering;

use crate::error::Result;
use crate::flake::ord::{BoundSide, FlakeBound, FlakeOrder, Opst, Post, Psot, Spot, Tspo};
use crate::flake::set::FlakeSet;
use crate::flake::{Flake, FlakeValue, Sid, T};
use crate::index::node::{ChildRef, IndexNode};
use crate::index::novelty::Novelty;

use super::time_travel;
use super::Db;

/// Ties each ordering to its tree root and novelty view, so scans can be
/// generic over the index the way the tree code is generic over the order.
pub trait IndexSelect: FlakeOrder {
    /// This index's persistent root on a DB.
    fn root(db: &Db) -> Option<&ChildRef>;
    /// This index's novelty view.
    fn novelty(novelty: &Novelty) -> &FlakeSet<Self>;
}

macro_rules! index_select {
    ($order:ident, $field:ident) => {
        impl IndexSelect for $order {
            fn root(db: &Db) -> Option<&ChildRef> {
                db.indexes.$field.as_ref()
            }
            fn novelty(novelty: &Novelty) -> &FlakeSet<Self> {
                &novelty.$field
            }
        }
    };
}

index_select!(Spot, spot);
index_select!(Psot, psot);
index_select!(Post, post);
index_select!(Opst, opst);
index_select!(Tspo, tspo);

/// A triple pattern with any combination of bound components.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pattern {
    /// Bound subject.
    pub s: Option<Sid>,
    /// Bound predicate.
    pub p: Option<Sid>,
    /// Bound object.
    pub o: Option<FlakeValue>,
}

impl Pattern {
    /// Pattern with a bound subject.
    pub fn subject(s: Sid) -> Pattern {
        Pattern {
            s: Some(s),
            ..Default::default()
        }
    }

    /// Adds a predicate constraint.
    pub fn with_p(mut self, p: Sid) -> Pattern {
        self.p = Some(p);
        self
    }

    /// Adds an object constraint.
    pub fn with_o(mut self, o: FlakeValue) -> Pattern {
        self.o = Some(o);
        self
    }

    fn matches(&self, f: &Flake) -> bool {
        self.s.map(|s| f.s == s).unwrap_or(true)
            && self.p.map(|p| f.p == p).unwrap_or(true)
            && self.o.as_ref().map(|o| &f.o == o).unwrap_or(true)
    }
}

fn slice_range<'a, C: FlakeOrder>(
    flakes: &'a [Flake],
    lo: &FlakeBound,
    hi: &FlakeBound,
) -> &'a [Flake] {
    let start =
        flakes.partition_point(|f| C::cmp_bound(lo, f, BoundSide::Lower) == Ordering::Greater);
    let end = flakes.partition_point(|f| C::cmp_bound(hi, f, BoundSide::Upper) != Ordering::Less);
    &flakes[start.min(end)..end]
}

fn child_overlaps<C: FlakeOrder>(child: &ChildRef, lo: &FlakeBound, hi: &FlakeBound) -> bool {
    // Entirely before the range: everything under the child sorts before lo.
    if let Some(rhs) = &child.rhs {
        if C::cmp_bound(lo, rhs, BoundSide::Lower) != Ordering::Less {
            return false;
        }
    }
    // Entirely after the range.
    C::cmp_bound(hi, &child.first, BoundSide::Upper) != Ordering::Less
}

impl Db {
    /// Inclusive range scan over one index, persistent tree plus novelty,
    /// honoring the view's time-travel bound. Returns raw flakes in index
    /// order.
    pub async fn range<C: IndexSelect>(
        &self,
        lo: &FlakeBound,
        hi: &FlakeBound,
    ) -> Result<Vec<Flake>> {
        let to_t = self.to_t;
        let mut out: Vec<Flake> = Vec::new();

        if let Some(root) = C::root(self) {
            let mut stack: Vec<ChildRef> = vec![root.clone()];
            while let Some(child) = stack.pop() {
                if !child_overlaps::<C>(&child, lo, hi) {
                    continue;
                }
                let node = self.cache.resolve(&self.catalog, &child).await?;
                match node.as_ref() {
                    IndexNode::Branch(branch) => {
                        for c in branch.children.iter().rev() {
                            stack.push(c.clone());
                        }
                    }
                    IndexNode::Leaf(leaf) => match to_t {
                        None => out.extend_from_slice(slice_range::<C>(&leaf.flakes, lo, hi)),
                        Some(target) => {
                            let rewound =
                                time_travel::leaf_flakes_as_of::<C>(&self.catalog, leaf, target)
                                    .await?;
                            out.extend_from_slice(slice_range::<C>(&rewound, lo, hi));
                        }
                    },
                }
            }
        }

        let staged = C::novelty(&self.novelty).range(lo, hi);
        match to_t {
            None => out.extend_from_slice(staged),
            Some(target) => out.extend(staged.iter().filter(|f| f.t >= target).cloned()),
        }

        out.sort_by(|a, b| C::cmp(a, b));
        out.dedup_by(|a, b| C::cmp(a, b) == Ordering::Equal);
        Ok(out)
    }

    /// Raw transaction-ordered scan between two transactions (inclusive),
    /// `newest` being the smaller value under the decreasing convention.
    pub async fn history_range(&self, newest: T, oldest: T) -> Result<Vec<Flake>> {
        let lo = FlakeBound::any().with_t(newest);
        let hi = FlakeBound::any().with_t(oldest);
        self.range::<Tspo>(&lo, &hi).await
    }

    /// Current assertions matching `pattern` at the view's effective `t`.
    pub async fn match_flakes(&self, pattern: &Pattern) -> Result<Vec<Flake>> {
        match_pattern(self, pattern).await
    }

    /// Objects currently asserted for `(s, p)`.
    pub async fn match_objects(&self, s: Sid, p: Sid) -> Result<Vec<FlakeValue>> {
        let flakes = self
            .match_flakes(&Pattern::subject(s).with_p(p))
            .await?;
        Ok(flakes.into_iter().map(|f| f.o).collect())
    }
}

/// Picks the most selective index for the bound components and nets the
/// scan down to current assertions.
pub(crate) async fn match_pattern(db: &Db, pattern: &Pattern) -> Result<Vec<Flake>> {
    let run = match (pattern.s, pattern.p, &pattern.o) {
        (Some(s), p, o) => {
            let mut bound = FlakeBound::subject(s);
            if let Some(p) = p {
                bound = bound.with_p(p);
                if let Some(o) = o {
                    bound = bound.with_o(o.clone());
                }
            }
            db.range::<Spot>(&bound, &bound).await?
        }
        (None, Some(p), Some(o)) => {
            let bound = FlakeBound::predicate(p).with_o(o.clone());
            db.range::<Post>(&bound, &bound).await?
        }
        (None, Some(p), None) => {
            let bound = FlakeBound::predicate(p);
            db.range::<Psot>(&bound, &bound).await?
        }
        (None, None, Some(o)) => {
            let bound = FlakeBound::any().with_o(o.clone());
            db.range::<Opst>(&bound, &bound).await?
        }
        (None, None, None) => {
            db.range::<Spot>(&FlakeBound::any(), &FlakeBound::any())
                .await?
        }
    };
    let current = net_current(run);
    Ok(current
        .into_iter()
        .filter(|f| pattern.matches(f))
        .collect())
}

/// Collapses an `(s, p, o)`-grouped run to its current assertions: within
/// each group the first flake is the newest, and it survives only when it
/// asserts.
pub(crate) fn net_current(run: Vec<Flake>) -> Vec<Flake> {
    let mut out: Vec<Flake> = Vec::new();
    let mut group_head: Option<Flake> = None;
    for f in run {
        let same_group = group_head
            .as_ref()
            .map(|head| head.same_spo(&f))
            .unwrap_or(false);
        if same_group {
            continue;
        }
        if f.op {
            out.push(f.clone());
        }
        group_head = Some(f);
    }
    out
}
