//! Garbage log for superseded index nodes.
//!
//! Each index run records the addresses its new root no longer references.
//! Roots are retained for `max_old_indexes` further runs so readers holding
//! older DB values keep resolving; after that the garbage record is swept
//! and the addresses deleted.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::flake::T;
use crate::storage::Catalog;

/// Stored garbage record for one index run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GarbageRecord {
    /// Ledger alias.
    pub alias: String,
    /// Branch name.
    pub branch: String,
    /// Transaction the run indexed up to.
    pub t: T,
    /// Addresses superseded by the run.
    pub garbage: Vec<String>,
}

/// Writes a garbage record, returning its address. No record is written
/// when the run produced no garbage.
pub async fn write_garbage_record(
    catalog: &Catalog,
    record: &GarbageRecord,
) -> Result<Option<String>> {
    if record.garbage.is_empty() {
        return Ok(None);
    }
    let key = format!("{}/garbage", record.alias);
    let write = catalog.content_write_json(&key, record).await?;
    debug!(t = record.t, count = record.garbage.len(), "index.garbage.record");
    Ok(Some(write.address))
}

/// One retained historical index root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedRoot {
    /// Transaction of the root.
    pub t: T,
    /// Address of the index root document.
    pub index_address: String,
    /// Address of the garbage record accumulated when the root was
    /// superseded, if any.
    pub garbage_address: Option<String>,
}

/// Bounded history of index roots for one branch.
#[derive(Debug, Clone)]
pub struct IndexRetention {
    max_old_indexes: usize,
    retained: VecDeque<RetainedRoot>,
}

impl IndexRetention {
    /// Retains at most `max_old_indexes` historical roots.
    pub fn new(max_old_indexes: usize) -> IndexRetention {
        IndexRetention {
            max_old_indexes,
            retained: VecDeque::new(),
        }
    }

    /// Number of roots currently retained.
    pub fn len(&self) -> usize {
        self.retained.len()
    }

    /// True when no roots are retained.
    pub fn is_empty(&self) -> bool {
        self.retained.is_empty()
    }

    /// Records a newly published root, returning any root that fell out of
    /// the retention window and is now eligible for collection.
    pub fn push(&mut self, root: RetainedRoot) -> Option<RetainedRoot> {
        self.retained.push_back(root);
        if self.retained.len() > self.max_old_indexes + 1 {
            self.retained.pop_front()
        } else {
            None
        }
    }
}

/// Deletes everything a retired root holds: the recorded garbage
/// addresses, the garbage record, and the root document itself.
/// Individual delete failures are logged and skipped; a vanished document
/// is already collected.
pub async fn collect_garbage(catalog: &Catalog, retired: &RetainedRoot) -> Result<usize> {
    let mut deleted = 0usize;
    if let Some(garbage_address) = &retired.garbage_address {
        match catalog.read_json_as::<GarbageRecord>(garbage_address).await {
            Ok(record) => {
                for addr in &record.garbage {
                    match catalog.delete(addr).await {
                        Ok(()) => deleted += 1,
                        Err(e) => warn!(address = %addr, error = %e, "index.garbage.delete_failed"),
                    }
                }
            }
            Err(e) => {
                warn!(address = %garbage_address, error = %e, "index.garbage.record_unreadable")
            }
        }
        catalog.delete(garbage_address).await?;
    }
    catalog.delete(&retired.index_address).await?;
    debug!(t = retired.t, deleted, "index.garbage.collected");
    Ok(deleted)
}
