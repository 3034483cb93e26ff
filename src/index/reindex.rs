//! Merging novelty into a persistent index tree.
//!
//! The merge descends to every leaf whose key range overlaps staged
//! novelty, forms new leaves, splits any leaf over `reindex_max_bytes` and
//! merges any leaf under `reindex_min_bytes / 4` into a sibling, then
//! rewrites the branch levels bottom-up. Every produced node is
//! content-addressed, so the whole operation is idempotent: the same input
//! DB and novelty yield byte-identical roots.
//!
//! Retraction flakes stay in the leaf as part of the record; the
//! assertions they cancel move to the leaf's history document, which time
//! travel replays.

use std::cmp::Ordering;
use std::future::Future;
use std::pin::Pin;

use tracing::{debug, trace};

use super::cache::NodeCache;
use super::node::{BranchNode, ChildRef, IndexNode, LeafHistory, LeafNode, NODE_VERSION};
use crate::error::Result;
use crate::flake::ord::FlakeOrder;
use crate::flake::set::FlakeSet;
use crate::flake::{Flake, T};
use crate::storage::Catalog;

/// Children per branch node before the branch itself splits.
const MAX_BRANCH_FANOUT: usize = 64;

/// Byte thresholds steering leaf geometry.
#[derive(Debug, Clone, Copy)]
pub struct ReindexOptions {
    /// Novelty size that triggers a reindex; leaves a quarter of this size
    /// merge into siblings.
    pub min_bytes: usize,
    /// Leaves above this size split.
    pub max_bytes: usize,
}

impl Default for ReindexOptions {
    fn default() -> Self {
        ReindexOptions {
            min_bytes: 100_000,
            max_bytes: 1_000_000,
        }
    }
}

/// Counters reported per reindex run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReindexStats {
    /// Leaves written.
    pub leaves_written: usize,
    /// Branches written.
    pub branches_written: usize,
}

/// Result of one per-index reindex.
#[derive(Debug, Clone)]
pub struct ReindexOutcome {
    /// The new root reference, `None` only when the index stays empty.
    pub root: Option<ChildRef>,
    /// Addresses superseded by this run, destined for the garbage log.
    pub garbage: Vec<String>,
    /// Addresses of every node written by this run, for replication.
    pub written: Vec<String>,
    /// Run counters.
    pub stats: ReindexStats,
}

struct ReindexCtx<'a> {
    catalog: &'a Catalog,
    cache: &'a NodeCache,
    key: &'a str,
    t: T,
    opts: ReindexOptions,
    garbage: Vec<String>,
    written: Vec<String>,
    stats: ReindexStats,
}

/// Merges `novelty` into the tree rooted at `old_root`.
///
/// `key` is the storage prefix for produced nodes (one per ledger/index).
pub async fn reindex<C: FlakeOrder>(
    catalog: &Catalog,
    cache: &NodeCache,
    key: &str,
    old_root: Option<&ChildRef>,
    novelty: &FlakeSet<C>,
    t: T,
    opts: ReindexOptions,
) -> Result<ReindexOutcome> {
    if novelty.is_empty() {
        return Ok(ReindexOutcome {
            root: old_root.cloned(),
            garbage: Vec::new(),
            written: Vec::new(),
            stats: ReindexStats::default(),
        });
    }

    let mut ctx = ReindexCtx {
        catalog,
        cache,
        key,
        t,
        opts,
        garbage: Vec::new(),
        written: Vec::new(),
        stats: ReindexStats::default(),
    };

    let incoming: Vec<Flake> = novelty.iter().cloned().collect();
    let mut level = match old_root {
        None => {
            let first = incoming[0].clone();
            write_leaf_run::<C>(&mut ctx, incoming, Vec::new(), first, None).await?
        }
        Some(root) => update_child::<C>(&mut ctx, root.clone(), incoming).await?,
    };

    // Wrap into branch levels until a single root remains.
    while level.len() > 1 {
        level = write_branch_level::<C>(&mut ctx, level).await?;
    }
    let root = level.into_iter().next();

    debug!(
        index = C::NAME,
        leaves = ctx.stats.leaves_written,
        branches = ctx.stats.branches_written,
        garbage = ctx.garbage.len(),
        "index.reindex.done"
    );
    Ok(ReindexOutcome {
        root,
        garbage: ctx.garbage,
        written: ctx.written,
        stats: ctx.stats,
    })
}

fn update_child<'a, 'b, C: FlakeOrder>(
    ctx: &'a mut ReindexCtx<'b>,
    child: ChildRef,
    novelty: Vec<Flake>,
) -> Pin<Box<dyn Future<Output = Result<Vec<ChildRef>>> + Send + 'a>>
where
    'b: 'a,
{
    Box::pin(async move {
        if novelty.is_empty() {
            return Ok(vec![child]);
        }
        let node = ctx.cache.resolve(ctx.catalog, &child).await?;
        ctx.garbage.push(child.id.clone());
        match node.as_ref() {
            IndexNode::Leaf(leaf) => update_leaf::<C>(ctx, &child, leaf, novelty).await,
            IndexNode::Branch(branch) => update_branch::<C>(ctx, &child, branch, novelty).await,
        }
    })
}

async fn update_branch<'b, C: FlakeOrder>(
    ctx: &mut ReindexCtx<'b>,
    child: &ChildRef,
    branch: &BranchNode,
    novelty: Vec<Flake>,
) -> Result<Vec<ChildRef>> {
    // Partition novelty by child boundaries: everything before the second
    // child's first routes to the leftmost child, matching lookup.
    let mut slices: Vec<Vec<Flake>> = vec![Vec::new(); branch.children.len()];
    let mut idx = 0usize;
    for f in novelty {
        while idx + 1 < branch.children.len()
            && C::cmp(&branch.children[idx + 1].first, &f) != Ordering::Greater
        {
            idx += 1;
        }
        slices[idx].push(f);
    }

    let mut children: Vec<ChildRef> = Vec::with_capacity(branch.children.len());
    for (old, slice) in branch.children.iter().zip(slices) {
        let mut updated = update_child::<C>(ctx, old.clone(), slice).await?;
        children.append(&mut updated);
    }

    let children = merge_small_leaves::<C>(ctx, children).await?;
    let children = reseat_rhs(children, child.rhs.clone());

    if children.len() <= MAX_BRANCH_FANOUT {
        let reference = write_branch::<C>(ctx, children, child.rhs.clone()).await?;
        Ok(vec![reference])
    } else {
        // Over-full branch: split into sibling branches; the parent (or the
        // root wrap-up loop) absorbs them.
        let mut out = Vec::new();
        for chunk in chunk_children(children, MAX_BRANCH_FANOUT) {
            let rhs = chunk_rhs(&chunk, &child.rhs);
            out.push(write_branch::<C>(ctx, chunk, rhs).await?);
        }
        Ok(out)
    }
}

async fn update_leaf<'b, C: FlakeOrder>(
    ctx: &mut ReindexCtx<'b>,
    child: &ChildRef,
    leaf: &LeafNode,
    novelty: Vec<Flake>,
) -> Result<Vec<ChildRef>> {
    // Assertions in the stored leaf cancelled by an incoming retraction
    // move to history; the retraction flakes themselves stay in the run.
    let mut removed: Vec<Flake> = Vec::new();
    let mut kept: Vec<Flake> = Vec::with_capacity(leaf.flakes.len());
    for existing in &leaf.flakes {
        let cancelled = existing.op
            && novelty
                .iter()
                .any(|n| !n.op && n.same_spo(existing));
        if cancelled {
            removed.push(existing.clone());
        } else {
            kept.push(existing.clone());
        }
    }

    let merged = FlakeSet::<C>::from_sorted(kept).conj_all(novelty);
    let flakes: Vec<Flake> = merged.iter().cloned().collect();
    let total: usize = flakes.iter().map(Flake::size_bytes).sum();

    let mut history = super::node::resolve_history(ctx.catalog, leaf).await?;
    let history_rewritten = !removed.is_empty() || total > ctx.opts.max_bytes;
    if let Some(old) = &leaf.history {
        if history_rewritten {
            ctx.garbage.push(old.clone());
        }
    }
    if !removed.is_empty() {
        history.extend(removed);
        history.sort_by(|a, b| C::cmp(a, b));
    }

    // The routing key never shrinks: history replay depends on superseded
    // flakes still falling inside this leaf's range.
    let first = match flakes.first() {
        Some(f) if C::cmp(f, &child.first) == Ordering::Less => f.clone(),
        _ => child.first.clone(),
    };
    trace!(
        index = C::NAME,
        flakes = flakes.len(),
        history = history.len(),
        "index.reindex.leaf"
    );
    write_leaf_run::<C>(ctx, flakes, history, first, child.rhs.clone()).await
}

/// Writes one logical leaf as one or more stored leaves, splitting on
/// balanced byte boundaries when over `reindex_max_bytes`.
async fn write_leaf_run<'b, C: FlakeOrder>(
    ctx: &mut ReindexCtx<'b>,
    flakes: Vec<Flake>,
    history: Vec<Flake>,
    first: Flake,
    rhs: Option<Flake>,
) -> Result<Vec<ChildRef>> {
    let total: usize = flakes.iter().map(Flake::size_bytes).sum();
    let parts = if total > ctx.opts.max_bytes {
        split_balanced(flakes, total, ctx.opts.max_bytes)
    } else {
        vec![flakes]
    };

    // Routing keys per part: the run's own first for part 0, each part's
    // first flake afterwards.
    let firsts: Vec<Flake> = parts
        .iter()
        .enumerate()
        .map(|(i, part)| {
            if i == 0 {
                first.clone()
            } else {
                part.first().cloned().unwrap_or_else(|| first.clone())
            }
        })
        .collect();

    // Route history flakes to the part covering their key range.
    let mut histories: Vec<Vec<Flake>> = vec![Vec::new(); parts.len()];
    'hist: for h in history {
        for (i, part_first) in firsts.iter().enumerate().rev() {
            if i == 0 || C::cmp(part_first, &h) != Ordering::Greater {
                histories[i].push(h);
                continue 'hist;
            }
        }
    }

    let count = parts.len();
    let mut out = Vec::with_capacity(count);
    for (i, (part, part_history)) in parts.into_iter().zip(histories).enumerate() {
        let part_rhs = if i + 1 < count {
            Some(firsts[i + 1].clone())
        } else {
            rhs.clone()
        };
        out.push(write_leaf::<C>(ctx, part, part_history, firsts[i].clone(), part_rhs).await?);
    }
    Ok(out)
}

async fn write_leaf<'b, C: FlakeOrder>(
    ctx: &mut ReindexCtx<'b>,
    flakes: Vec<Flake>,
    history: Vec<Flake>,
    first: Flake,
    rhs: Option<Flake>,
) -> Result<ChildRef> {
    let history_address = if history.is_empty() {
        None
    } else {
        let doc = LeafHistory {
            v: NODE_VERSION,
            flakes: history,
        };
        let write = ctx
            .catalog
            .content_write_json(&format!("{}/history", ctx.key), &doc)
            .await?;
        ctx.written.push(write.address.clone());
        Some(write.address)
    };

    let size: usize = flakes.iter().map(Flake::size_bytes).sum();
    let count = flakes.len() as u64;
    let leaf = LeafNode {
        v: NODE_VERSION,
        t: ctx.t,
        first: first.clone(),
        rhs: rhs.clone(),
        flakes,
        history: history_address,
    };
    let write = ctx
        .catalog
        .content_write_json(ctx.key, &IndexNode::Leaf(leaf))
        .await?;
    ctx.written.push(write.address.clone());
    ctx.stats.leaves_written += 1;
    Ok(ChildRef {
        id: write.address,
        leaf: true,
        first,
        rhs,
        t: ctx.t,
        size,
        flakes: count,
    })
}

async fn write_branch<'b, C: FlakeOrder>(
    ctx: &mut ReindexCtx<'b>,
    children: Vec<ChildRef>,
    rhs: Option<Flake>,
) -> Result<ChildRef> {
    debug_assert!(!children.is_empty());
    let first = children[0].first.clone();
    let size = children.iter().map(|c| c.size).sum();
    let flakes = children.iter().map(|c| c.flakes).sum();
    let t = children.iter().map(|c| c.t).min().unwrap_or(ctx.t);
    let branch = BranchNode {
        v: NODE_VERSION,
        t,
        first: first.clone(),
        rhs: rhs.clone(),
        children,
    };
    let write = ctx
        .catalog
        .content_write_json(ctx.key, &IndexNode::Branch(branch))
        .await?;
    ctx.written.push(write.address.clone());
    ctx.stats.branches_written += 1;
    Ok(ChildRef {
        id: write.address,
        leaf: false,
        first,
        rhs,
        t,
        size,
        flakes,
    })
}

async fn write_branch_level<'b, C: FlakeOrder>(
    ctx: &mut ReindexCtx<'b>,
    children: Vec<ChildRef>,
) -> Result<Vec<ChildRef>> {
    let mut out = Vec::new();
    let chunks = chunk_children(children, MAX_BRANCH_FANOUT);
    let last = chunks.len() - 1;
    for (i, chunk) in chunks.into_iter().enumerate() {
        let rhs = if i == last {
            None
        } else {
            chunk.last().and_then(|c| c.rhs.clone())
        };
        out.push(write_branch::<C>(ctx, chunk, rhs).await?);
    }
    Ok(out)
}

/// Merges adjacent leaves where the left one dropped below a quarter of
/// `reindex_min_bytes`. Single pass, left to right.
async fn merge_small_leaves<'b, C: FlakeOrder>(
    ctx: &mut ReindexCtx<'b>,
    children: Vec<ChildRef>,
) -> Result<Vec<ChildRef>> {
    let floor = ctx.opts.min_bytes / 4;
    if children.len() < 2 {
        return Ok(children);
    }
    let mut out: Vec<ChildRef> = Vec::with_capacity(children.len());
    for child in children {
        let mergeable = child.leaf
            && child.size < floor
            && out.last().map(|prev: &ChildRef| prev.leaf).unwrap_or(false);
        if !mergeable {
            out.push(child);
            continue;
        }
        let left = out.pop().expect("mergeable implies a left sibling");
        let merged = merge_leaf_pair::<C>(ctx, left, child).await?;
        out.push(merged);
    }
    Ok(out)
}

async fn merge_leaf_pair<'b, C: FlakeOrder>(
    ctx: &mut ReindexCtx<'b>,
    left: ChildRef,
    right: ChildRef,
) -> Result<ChildRef> {
    let left_node = ctx.cache.resolve(ctx.catalog, &left).await?;
    let right_node = ctx.cache.resolve(ctx.catalog, &right).await?;
    let left_leaf = left_node.as_leaf()?;
    let right_leaf = right_node.as_leaf()?;

    let mut flakes = left_leaf.flakes.clone();
    flakes.extend(right_leaf.flakes.iter().cloned());
    let mut history = super::node::resolve_history(ctx.catalog, left_leaf).await?;
    history.extend(super::node::resolve_history(ctx.catalog, right_leaf).await?);
    history.sort_by(|a, b| C::cmp(a, b));

    for addr in [&left.id, &right.id] {
        if !ctx.garbage.contains(addr) {
            ctx.garbage.push(addr.clone());
        }
    }
    for h in [&left_leaf.history, &right_leaf.history].into_iter().flatten() {
        if !ctx.garbage.contains(h) {
            ctx.garbage.push(h.clone());
        }
    }

    trace!(index = C::NAME, left = %left.id, right = %right.id, "index.reindex.merge");
    write_leaf::<C>(ctx, flakes, history, left.first.clone(), right.rhs.clone()).await
}

/// Splits a flake run into byte-balanced parts no larger than `max_bytes`.
fn split_balanced(flakes: Vec<Flake>, total: usize, max_bytes: usize) -> Vec<Vec<Flake>> {
    let parts = total.div_ceil(max_bytes).max(2);
    let target = total.div_ceil(parts);
    let mut out = Vec::with_capacity(parts);
    let mut current = Vec::new();
    let mut current_bytes = 0usize;
    let mut remaining = parts;
    for f in flakes {
        current_bytes += f.size_bytes();
        current.push(f);
        if current_bytes >= target && remaining > 1 {
            out.push(std::mem::take(&mut current));
            current_bytes = 0;
            remaining -= 1;
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Rewrites the `rhs` chain so each child points at its successor's first
/// flake, with the final child taking the parent's `rhs`.
fn reseat_rhs(mut children: Vec<ChildRef>, rhs: Option<Flake>) -> Vec<ChildRef> {
    let n = children.len();
    for i in 0..n {
        children[i].rhs = if i + 1 < n {
            Some(children[i + 1].first.clone())
        } else {
            rhs.clone()
        };
    }
    children
}

fn chunk_children(children: Vec<ChildRef>, size: usize) -> Vec<Vec<ChildRef>> {
    let mut out = Vec::new();
    let mut current = Vec::with_capacity(size);
    for c in children {
        current.push(c);
        if current.len() == size {
            out.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn chunk_rhs(chunk: &[ChildRef], parent_rhs: &Option<Flake>) -> Option<Flake> {
    chunk
        .last()
        .and_then(|c| c.rhs.clone())
        .or_else(|| parent_rhs.clone())
}
