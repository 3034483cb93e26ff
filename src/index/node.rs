//! Persistent index nodes.
//!
//! A persistent index is a balanced tree of content-addressed nodes: branch
//! nodes hold ordered child references, leaf nodes hold a sorted flake run
//! plus an optional history document of flakes superseded since the leaf's
//! base `t`. Nodes are immutable; a reindex writes new nodes and abandons
//! the old addresses to the garbage log.

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::flake::ord::FlakeOrder;
use crate::flake::{Flake, T};
use crate::storage::Catalog;

/// Serialization version for stored node documents.
pub const NODE_VERSION: u32 = 1;

/// Reference to a stored node, carried inside its parent (or, for the
/// root, inside the index root document).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildRef {
    /// Content address of the node document.
    pub id: String,
    /// True when the target is a leaf.
    pub leaf: bool,
    /// Smallest flake at or below this node, under the index ordering.
    pub first: Flake,
    /// First flake of the next sibling; `None` for the rightmost child.
    pub rhs: Option<Flake>,
    /// Base transaction of the node.
    pub t: T,
    /// Estimated byte size of flakes at or below this node.
    pub size: usize,
    /// Number of flakes at or below this node.
    pub flakes: u64,
}

impl ChildRef {
    /// Node invariant: the first flake sorts strictly before `rhs`.
    pub fn check_invariant<C: FlakeOrder>(&self) -> Result<()> {
        if let Some(rhs) = &self.rhs {
            if C::cmp(&self.first, rhs) != std::cmp::Ordering::Less {
                return Err(LedgerError::Corruption(format!(
                    "node {} first/rhs out of order under {}",
                    self.id,
                    C::NAME
                )));
            }
        }
        Ok(())
    }
}

/// A stored leaf: sorted flakes plus the address of its history document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafNode {
    /// Document version.
    pub v: u32,
    /// Base transaction: the newest `t` merged into this leaf.
    pub t: T,
    /// Routing key; equals the first flake when the leaf is non-empty.
    pub first: Flake,
    /// First flake of the next sibling at write time.
    pub rhs: Option<Flake>,
    /// The sorted flake run.
    pub flakes: Vec<Flake>,
    /// Address of the history document, when any flake has been superseded.
    pub history: Option<String>,
}

/// A stored branch: ordered child references partitioning the flake space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchNode {
    /// Document version.
    pub v: u32,
    /// Base transaction: the newest `t` among the children.
    pub t: T,
    /// Smallest flake below this branch.
    pub first: Flake,
    /// First flake of the next sibling at write time.
    pub rhs: Option<Flake>,
    /// Children in index order.
    pub children: Vec<ChildRef>,
}

impl BranchNode {
    /// Picks the child covering `f`: the greatest child whose `first` is at
    /// or before `f` under the ordering. Flakes before the leftmost child
    /// route to it.
    pub fn lookup_child<C: FlakeOrder>(&self, f: &Flake) -> &ChildRef {
        let idx = self
            .children
            .partition_point(|c| C::cmp(&c.first, f) != std::cmp::Ordering::Greater);
        &self.children[idx.saturating_sub(1)]
    }

    /// Picks the child strictly after the one covering `f`, if any.
    pub fn lookup_child_after<C: FlakeOrder>(&self, f: &Flake) -> Option<&ChildRef> {
        let idx = self
            .children
            .partition_point(|c| C::cmp(&c.first, f) != std::cmp::Ordering::Greater);
        self.children.get(idx)
    }
}

/// A resolved node document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexNode {
    /// Leaf document.
    Leaf(LeafNode),
    /// Branch document.
    Branch(BranchNode),
}

impl IndexNode {
    /// The node's base transaction.
    pub fn t(&self) -> T {
        match self {
            IndexNode::Leaf(l) => l.t,
            IndexNode::Branch(b) => b.t,
        }
    }

    /// The node's routing key.
    pub fn first(&self) -> &Flake {
        match self {
            IndexNode::Leaf(l) => &l.first,
            IndexNode::Branch(b) => &b.first,
        }
    }

    /// Borrows the leaf, or errors when the node is a branch.
    pub fn as_leaf(&self) -> Result<&LeafNode> {
        match self {
            IndexNode::Leaf(l) => Ok(l),
            IndexNode::Branch(_) => Err(LedgerError::Corruption(
                "expected leaf node, found branch".to_string(),
            )),
        }
    }

    /// Borrows the branch, or errors when the node is a leaf.
    pub fn as_branch(&self) -> Result<&BranchNode> {
        match self {
            IndexNode::Branch(b) => Ok(b),
            IndexNode::Leaf(_) => Err(LedgerError::Corruption(
                "expected branch node, found leaf".to_string(),
            )),
        }
    }
}

/// History document: flakes superseded since the owning leaf's base `t`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeafHistory {
    /// Document version.
    pub v: u32,
    /// Superseded flakes, sorted under the index ordering.
    pub flakes: Vec<Flake>,
}

/// Reads and parses a leaf's history document. Histories are small and
/// read rarely (time travel only), so they bypass the node cache.
pub async fn resolve_history(catalog: &Catalog, leaf: &LeafNode) -> Result<Vec<Flake>> {
    match &leaf.history {
        None => Ok(Vec::new()),
        Some(addr) => {
            let doc: LeafHistory = catalog.read_json_as(addr).await?;
            Ok(doc.flakes)
        }
    }
}
