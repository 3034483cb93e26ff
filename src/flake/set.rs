//! Sorted flake collections.
//!
//! A [`FlakeSet`] is an immutable sorted run of flakes shared behind an
//! `Arc`, generic over one of the five orderings. Snapshots clone in O(1);
//! mutation goes through linear merges, which is also how novelty lands in
//! the persistent tree, so nothing here needs better than linear bulk ops.

use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;

use super::ord::{BoundSide, FlakeBound, FlakeOrder};
use super::Flake;

/// An immutable sorted set of flakes under ordering `C`.
///
/// Set semantics are over the full comparator: two flakes equal under `C`
/// (identical 6-tuples, for every supplied ordering) collapse to one.
#[derive(Debug, Clone)]
pub struct FlakeSet<C: FlakeOrder> {
    flakes: Arc<Vec<Flake>>,
    _order: PhantomData<C>,
}

impl<C: FlakeOrder> Default for FlakeSet<C> {
    fn default() -> Self {
        FlakeSet::new()
    }
}

impl<C: FlakeOrder> FlakeSet<C> {
    /// The empty set.
    pub fn new() -> FlakeSet<C> {
        FlakeSet {
            flakes: Arc::new(Vec::new()),
            _order: PhantomData,
        }
    }

    /// Builds a set from arbitrary flakes, sorting and deduplicating.
    pub fn from_unsorted(mut flakes: Vec<Flake>) -> FlakeSet<C> {
        flakes.sort_by(|a, b| C::cmp(a, b));
        flakes.dedup_by(|a, b| C::cmp(a, b) == Ordering::Equal);
        FlakeSet {
            flakes: Arc::new(flakes),
            _order: PhantomData,
        }
    }

    /// Builds a set from flakes already sorted under `C`.
    pub fn from_sorted(flakes: Vec<Flake>) -> FlakeSet<C> {
        debug_assert!(flakes.windows(2).all(|w| C::cmp(&w[0], &w[1]) == Ordering::Less));
        FlakeSet {
            flakes: Arc::new(flakes),
            _order: PhantomData,
        }
    }

    /// Number of flakes.
    pub fn len(&self) -> usize {
        self.flakes.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.flakes.is_empty()
    }

    /// Iterates in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Flake> {
        self.flakes.iter()
    }

    /// The whole run as a slice.
    pub fn as_slice(&self) -> &[Flake] {
        &self.flakes
    }

    /// Smallest flake under `C`.
    pub fn first(&self) -> Option<&Flake> {
        self.flakes.first()
    }

    /// Largest flake under `C`.
    pub fn last(&self) -> Option<&Flake> {
        self.flakes.last()
    }

    fn position(&self, f: &Flake) -> std::result::Result<usize, usize> {
        self.flakes.binary_search_by(|probe| C::cmp(probe, f))
    }

    /// Membership under the full comparator.
    pub fn contains(&self, f: &Flake) -> bool {
        self.position(f).is_ok()
    }

    /// Returns a new set with `f` added.
    pub fn insert(&self, f: Flake) -> FlakeSet<C> {
        match self.position(&f) {
            Ok(_) => self.clone(),
            Err(idx) => {
                let mut next = Vec::with_capacity(self.flakes.len() + 1);
                next.extend_from_slice(&self.flakes[..idx]);
                next.push(f);
                next.extend_from_slice(&self.flakes[idx..]);
                FlakeSet {
                    flakes: Arc::new(next),
                    _order: PhantomData,
                }
            }
        }
    }

    /// Returns a new set with `f` removed.
    pub fn remove(&self, f: &Flake) -> FlakeSet<C> {
        match self.position(f) {
            Err(_) => self.clone(),
            Ok(idx) => {
                let mut next = Vec::with_capacity(self.flakes.len() - 1);
                next.extend_from_slice(&self.flakes[..idx]);
                next.extend_from_slice(&self.flakes[idx + 1..]);
                FlakeSet {
                    flakes: Arc::new(next),
                    _order: PhantomData,
                }
            }
        }
    }

    /// Merges a batch of flakes in one linear pass.
    pub fn conj_all<I>(&self, additions: I) -> FlakeSet<C>
    where
        I: IntoIterator<Item = Flake>,
    {
        let mut incoming: Vec<Flake> = additions.into_iter().collect();
        if incoming.is_empty() {
            return self.clone();
        }
        incoming.sort_by(|a, b| C::cmp(a, b));
        incoming.dedup_by(|a, b| C::cmp(a, b) == Ordering::Equal);

        let mut merged = Vec::with_capacity(self.flakes.len() + incoming.len());
        let mut left = self.flakes.iter().cloned().peekable();
        let mut right = incoming.into_iter().peekable();
        loop {
            match (left.peek(), right.peek()) {
                (Some(a), Some(b)) => match C::cmp(a, b) {
                    Ordering::Less => merged.push(left.next().unwrap()),
                    Ordering::Greater => merged.push(right.next().unwrap()),
                    Ordering::Equal => {
                        left.next();
                        merged.push(right.next().unwrap());
                    }
                },
                (Some(_), None) => merged.push(left.next().unwrap()),
                (None, Some(_)) => merged.push(right.next().unwrap()),
                (None, None) => break,
            }
        }
        FlakeSet {
            flakes: Arc::new(merged),
            _order: PhantomData,
        }
    }

    /// Removes a batch of flakes in one linear pass.
    pub fn disj_all<'a, I>(&self, removals: I) -> FlakeSet<C>
    where
        I: IntoIterator<Item = &'a Flake>,
    {
        let mut outgoing: Vec<&Flake> = removals.into_iter().collect();
        if outgoing.is_empty() {
            return self.clone();
        }
        outgoing.sort_by(|a, b| C::cmp(a, b));

        let mut kept = Vec::with_capacity(self.flakes.len());
        let mut out = outgoing.into_iter().peekable();
        for f in self.flakes.iter() {
            while let Some(o) = out.peek() {
                match C::cmp(o, f) {
                    Ordering::Less => {
                        out.next();
                    }
                    Ordering::Equal | Ordering::Greater => break,
                }
            }
            match out.peek() {
                Some(o) if C::cmp(o, f) == Ordering::Equal => {
                    out.next();
                }
                _ => kept.push(f.clone()),
            }
        }
        FlakeSet {
            flakes: Arc::new(kept),
            _order: PhantomData,
        }
    }

    /// Inclusive range scan between two bounds, as an ordered slice view.
    pub fn range(&self, lo: &FlakeBound, hi: &FlakeBound) -> &[Flake] {
        let start = self
            .flakes
            .partition_point(|f| C::cmp_bound(lo, f, BoundSide::Lower) == Ordering::Greater);
        let end = self
            .flakes
            .partition_point(|f| C::cmp_bound(hi, f, BoundSide::Upper) != Ordering::Less);
        &self.flakes[start.min(end)..end]
    }

    /// Subset at or after `lo`.
    pub fn range_from(&self, lo: &FlakeBound) -> &[Flake] {
        self.range(lo, &FlakeBound::any())
    }

    /// Splits into `(left, right)` where `left` holds everything up to and
    /// including `key`.
    pub fn split_at_key(&self, key: &Flake) -> (FlakeSet<C>, FlakeSet<C>) {
        let idx = self
            .flakes
            .partition_point(|f| C::cmp(f, key) != Ordering::Greater);
        (
            FlakeSet {
                flakes: Arc::new(self.flakes[..idx].to_vec()),
                _order: PhantomData,
            },
            FlakeSet {
                flakes: Arc::new(self.flakes[idx..].to_vec()),
                _order: PhantomData,
            },
        )
    }

    /// The first `n` flakes, retaining set semantics.
    pub fn take(&self, n: usize) -> FlakeSet<C> {
        if n >= self.flakes.len() {
            return self.clone();
        }
        FlakeSet {
            flakes: Arc::new(self.flakes[..n].to_vec()),
            _order: PhantomData,
        }
    }

    /// Sum of per-flake size estimates.
    pub fn size_bytes(&self) -> usize {
        self.flakes.iter().map(Flake::size_bytes).sum()
    }
}

impl<'a, C: FlakeOrder> IntoIterator for &'a FlakeSet<C> {
    type Item = &'a Flake;
    type IntoIter = std::slice::Iter<'a, Flake>;

    fn into_iter(self) -> Self::IntoIter {
        self.flakes.iter()
    }
}
