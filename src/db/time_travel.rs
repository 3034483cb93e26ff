//! Time travel: viewing a DB as of an earlier transaction.
//!
//! Persistent leaves carry the current run plus a history document of
//! superseded flakes; rewinding a leaf replays that history and drops
//! anything newer than the target. Novelty is filtered the same way at
//! scan time, so an `as_of` view needs no data copying at all.

use crate::error::{LedgerError, Result};
use crate::flake::ord::FlakeOrder;
use crate::flake::{t, Flake, T};
use crate::index::node::{resolve_history, LeafNode};
use crate::storage::Catalog;

use super::Db;

/// The flakes a leaf held at `target`: the current run with everything
/// newer removed, plus replayed history, in index order.
pub(crate) async fn leaf_flakes_as_of<C: FlakeOrder>(
    catalog: &Catalog,
    leaf: &LeafNode,
    target: T,
) -> Result<Vec<Flake>> {
    let mut flakes: Vec<Flake> = leaf.flakes.iter().filter(|f| f.t >= target).cloned().collect();
    // History is only populated once something in the leaf was superseded
    // after its base t; skip the read when the leaf already predates the
    // target.
    if t::newer(leaf.t, target) && leaf.history.is_some() {
        let history = resolve_history(catalog, leaf).await?;
        flakes.extend(history.into_iter().filter(|f| f.t >= target));
        flakes.sort_by(|a, b| C::cmp(a, b));
        flakes.dedup_by(|a, b| C::cmp(a, b) == std::cmp::Ordering::Equal);
    }
    Ok(flakes)
}

/// Rewinds a resolved leaf to `target`, producing the leaf value as it
/// stood then.
pub async fn resolve_leaf_to_t<C: FlakeOrder>(
    catalog: &Catalog,
    leaf: &LeafNode,
    target: T,
) -> Result<LeafNode> {
    let flakes = leaf_flakes_as_of::<C>(catalog, leaf, target).await?;
    Ok(LeafNode {
        v: leaf.v,
        t: target.max(leaf.t),
        first: leaf.first.clone(),
        rhs: leaf.rhs.clone(),
        flakes,
        history: None,
    })
}

impl Db {
    /// A view of this DB as of transaction `target`.
    ///
    /// `target` must lie between genesis and this snapshot's `t`; anything
    /// else is `InvalidTime`.
    pub fn as_of(&self, target: T) -> Result<Db> {
        if target > t::GENESIS || target < self.t {
            return Err(LedgerError::InvalidTime(format!(
                "t {} outside ledger range {}..{}",
                target,
                self.t,
                t::GENESIS
            )));
        }
        Ok(Db {
            to_t: Some(target),
            ..self.clone()
        })
    }
}
