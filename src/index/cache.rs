//! Shared LRU cache of resolved index nodes.
//!
//! Entries are keyed by content address, so concurrent resolution races are
//! harmless: every winner produces identical bytes. A resolving entry holds
//! a single-flight cell so concurrent callers share one in-flight read; a
//! failed read evicts the entry.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::trace;

use super::node::{ChildRef, IndexNode};
use crate::error::Result;
use crate::storage::Catalog;

type Slot = Arc<OnceCell<Arc<IndexNode>>>;

/// Process-wide cache of resolved nodes, shared by every DB and branch.
pub struct NodeCache {
    slots: Mutex<LruCache<String, Slot>>,
}

impl std::fmt::Debug for NodeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCache")
            .field("len", &self.slots.lock().len())
            .finish()
    }
}

impl NodeCache {
    /// Creates a cache bounded to `capacity` resolved nodes.
    pub fn new(capacity: usize) -> NodeCache {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("max(1) is nonzero");
        NodeCache {
            slots: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Resolves a node reference, reading through the catalog on miss.
    ///
    /// Idempotent: concurrent calls for the same address share one read.
    pub async fn resolve(&self, catalog: &Catalog, child: &ChildRef) -> Result<Arc<IndexNode>> {
        let slot: Slot = {
            let mut slots = self.slots.lock();
            match slots.get(&child.id) {
                Some(slot) => Arc::clone(slot),
                None => {
                    let slot: Slot = Arc::new(OnceCell::new());
                    slots.put(child.id.clone(), Arc::clone(&slot));
                    slot
                }
            }
        };

        let address = child.id.clone();
        let result = slot
            .get_or_try_init(|| async {
                trace!(address = %address, "index.cache.miss");
                let node: IndexNode = catalog.read_json_as(&address).await?;
                Ok::<_, crate::error::LedgerError>(Arc::new(node))
            })
            .await;

        match result {
            Ok(node) => Ok(Arc::clone(node)),
            Err(e) => {
                // Drop the failed entry so the next caller retries the read.
                self.slots.lock().pop(&child.id);
                Err(e)
            }
        }
    }

    /// Drops every cached entry. Tests use this to force re-reads.
    pub fn clear(&self) {
        self.slots.lock().clear();
    }
}
