//! In-process nameservice, for tests and embedded deployments.

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{IndexingStatus, NsRecord, Publication, Publisher, SubscriptionMessage};
use crate::commit::jsonld::parse_commit;
use crate::error::{LedgerError, Result};

#[derive(Debug, Clone, Default)]
struct NsEntry {
    record: Option<NsRecord>,
    history: Vec<String>,
}

/// A nameservice backed by process memory, implementing both the publish
/// and lookup surfaces.
#[derive(Default)]
pub struct MemoryNameService {
    entries: RwLock<FxHashMap<String, NsEntry>>,
    subscribers: RwLock<FxHashMap<String, Vec<mpsc::Sender<Value>>>>,
}

impl MemoryNameService {
    /// Creates an empty nameservice.
    pub fn new() -> MemoryNameService {
        MemoryNameService::default()
    }

    fn alias_of(&self, address: &str) -> Option<String> {
        address
            .strip_prefix("fluree:memory://ns/")
            .map(str::to_string)
    }

    /// Directly sets the indexing marker, used by tests and by the
    /// indexer's start/heartbeat/finish calls.
    pub fn set_indexing(&self, alias: &str, status: Option<IndexingStatus>) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(alias) {
            if let Some(record) = entry.record.as_mut() {
                record.indexing = status;
            }
        }
    }

    async fn notify_subscribers(&self, alias: &str, address: &str) {
        let senders = {
            let subscribers = self.subscribers.read();
            subscribers.get(alias).cloned().unwrap_or_default()
        };
        let message = SubscriptionMessage::NewCommit {
            address: address.to_string(),
        }
        .to_json();
        for sender in senders {
            // A full or closed sink is the subscriber's problem, not ours.
            let _ = sender.send(message.clone()).await;
        }
    }
}

#[async_trait]
impl Publisher for MemoryNameService {
    fn publishing_address(&self, alias: &str) -> String {
        format!("fluree:memory://ns/{alias}")
    }

    async fn publish(&self, commit: &Value) -> Result<()> {
        let parsed = parse_commit(commit)?;
        if parsed.address.is_empty() {
            return Err(LedgerError::Publishing(
                "commit has no storage address".to_string(),
            ));
        }
        {
            let mut entries = self.entries.write();
            let entry = entries.entry(parsed.alias.clone()).or_default();
            let indexing = entry.record.as_ref().and_then(|r| r.indexing.clone());
            entry.record = Some(NsRecord {
                commit_address: parsed.address.clone(),
                index_address: parsed.index.as_ref().map(|i| i.address.clone()),
                indexing,
            });
            entry.history.push(parsed.address.clone());
        }
        debug!(alias = %parsed.alias, t = parsed.t, "nameservice.memory.publish");
        self.notify_subscribers(&parsed.alias, &parsed.address).await;
        Ok(())
    }

    async fn retract(&self, alias: &str) -> Result<()> {
        self.entries.write().remove(alias);
        Ok(())
    }

    async fn index_start(&self, alias: &str, machine_id: &str) -> Result<()> {
        let now = now_iso();
        self.set_indexing(
            alias,
            Some(IndexingStatus {
                started: now.clone(),
                machine_id: machine_id.to_string(),
                last_heartbeat: now,
            }),
        );
        Ok(())
    }

    async fn index_heartbeat(&self, alias: &str) -> Result<()> {
        let mut entries = self.entries.write();
        if let Some(record) = entries.get_mut(alias).and_then(|e| e.record.as_mut()) {
            if let Some(indexing) = record.indexing.as_mut() {
                indexing.last_heartbeat = now_iso();
            }
        }
        Ok(())
    }

    async fn index_finish(&self, alias: &str) -> Result<()> {
        self.set_indexing(alias, None);
        Ok(())
    }
}

#[async_trait]
impl Publication for MemoryNameService {
    async fn lookup(&self, address: &str) -> Result<Option<NsRecord>> {
        let alias = match self.alias_of(address) {
            Some(alias) => alias,
            None => return Ok(None),
        };
        Ok(self
            .entries
            .read()
            .get(&alias)
            .and_then(|e| e.record.clone()))
    }

    async fn subscribe(&self, alias: &str, sink: mpsc::Sender<Value>) -> Result<()> {
        trace!(alias, "nameservice.memory.subscribe");
        self.subscribers
            .write()
            .entry(alias.to_string())
            .or_default()
            .push(sink);
        Ok(())
    }

    async fn unsubscribe(&self, alias: &str) -> Result<()> {
        trace!(alias, "nameservice.memory.unsubscribe");
        self.subscribers.write().remove(alias);
        Ok(())
    }

    async fn known_addresses(&self, alias: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .get(alias)
            .map(|e| e.history.clone())
            .unwrap_or_default())
    }

    async fn published_ledger(&self, alias: &str) -> Result<bool> {
        Ok(self.entries.read().contains_key(alias))
    }
}

fn now_iso() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
