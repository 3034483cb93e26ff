//! Nameservices: the directory of ledger head addresses.
//!
//! A [`Publisher`] pushes new commit heads out; a [`Publication`] answers
//! lookups and feeds subscriptions. One backend usually implements both
//! (see [`memory`]). Publishing to many publishers is best-effort: a
//! failing publisher is logged as a publishing error and never aborts the
//! caller.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{LedgerError, Result};

/// Progress marker present in a record only while an index build runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexingStatus {
    /// ISO-8601 start time.
    pub started: String,
    /// `host:pid` of the indexing process.
    pub machine_id: String,
    /// ISO-8601 time of the latest heartbeat.
    pub last_heartbeat: String,
}

/// The record a lookup returns for a ledger's latest known commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsRecord {
    /// Address of the latest commit document.
    pub commit_address: String,
    /// Address of the latest index root, when one exists.
    pub index_address: Option<String>,
    /// Present only while a process is producing a new index.
    pub indexing: Option<IndexingStatus>,
}

impl NsRecord {
    /// Wire form: `f:commit` / `f:index` / `f:indexing` keys.
    pub fn to_json(&self) -> Value {
        let mut doc = json!({ "f:commit": { "@id": self.commit_address } });
        if let Some(index) = &self.index_address {
            doc["f:index"] = json!({ "@id": index });
        }
        if let Some(indexing) = &self.indexing {
            doc["f:indexing"] = json!({
                "started": indexing.started,
                "machineId": indexing.machine_id,
                "lastHeartbeat": indexing.last_heartbeat,
            });
        }
        doc
    }

    /// Parses the wire form.
    pub fn from_json(doc: &Value) -> Result<NsRecord> {
        let commit_address = doc
            .get("f:commit")
            .and_then(|c| c.get("@id"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                LedgerError::Serialization("nameservice record missing f:commit".to_string())
            })?
            .to_string();
        let index_address = doc
            .get("f:index")
            .and_then(|i| i.get("@id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let indexing = doc.get("f:indexing").and_then(|i| {
            Some(IndexingStatus {
                started: i.get("started")?.as_str()?.to_string(),
                machine_id: i.get("machineId")?.as_str()?.to_string(),
                last_heartbeat: i.get("lastHeartbeat")?.as_str()?.to_string(),
            })
        });
        Ok(NsRecord {
            commit_address,
            index_address,
            indexing,
        })
    }
}

/// A message delivered to subscribers. Only `new-commit` carries meaning;
/// everything else is ignored with a log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionMessage {
    /// A new commit head was published.
    NewCommit {
        /// Address of the commit document.
        address: String,
    },
}

impl SubscriptionMessage {
    /// Wire form per the subscription protocol.
    pub fn to_json(&self) -> Value {
        match self {
            SubscriptionMessage::NewCommit { address } => json!({
                "action": "new-commit",
                "data": { "address": address },
            }),
        }
    }

    /// Parses a subscription payload; unknown actions yield `None`.
    pub fn from_json(doc: &Value) -> Option<SubscriptionMessage> {
        match doc.get("action").and_then(Value::as_str) {
            Some("new-commit") => {
                let address = doc
                    .get("data")
                    .and_then(|d| d.get("address"))
                    .and_then(Value::as_str)?;
                Some(SubscriptionMessage::NewCommit {
                    address: address.to_string(),
                })
            }
            other => {
                debug!(action = ?other, "nameservice.subscription.ignored");
                None
            }
        }
    }
}

/// Pushes ledger heads to a directory.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Deterministic record address for an alias within this publisher.
    fn publishing_address(&self, alias: &str) -> String;

    /// Publishes a commit (canonical JSON-LD) as the new head.
    async fn publish(&self, commit: &Value) -> Result<()>;

    /// Withdraws the record for an alias.
    async fn retract(&self, alias: &str) -> Result<()>;

    /// Marks the alias as being indexed by `machine_id`.
    async fn index_start(&self, _alias: &str, _machine_id: &str) -> Result<()> {
        Ok(())
    }

    /// Refreshes the indexing heartbeat.
    async fn index_heartbeat(&self, _alias: &str) -> Result<()> {
        Ok(())
    }

    /// Clears the indexing marker.
    async fn index_finish(&self, _alias: &str) -> Result<()> {
        Ok(())
    }
}

/// Answers lookups and feeds subscriptions.
#[async_trait]
pub trait Publication: Send + Sync {
    /// The record stored at a publishing address, if any.
    async fn lookup(&self, address: &str) -> Result<Option<NsRecord>>;

    /// Streams future heads for `alias` into `sink`.
    async fn subscribe(&self, alias: &str, sink: mpsc::Sender<Value>) -> Result<()>;

    /// Stops streaming for `alias`. Messages may still arrive afterwards
    /// and must be dropped by the receiver.
    async fn unsubscribe(&self, alias: &str) -> Result<()>;

    /// Every address this publication has seen for `alias`.
    async fn known_addresses(&self, alias: &str) -> Result<Vec<String>>;

    /// True when the alias has a published record.
    async fn published_ledger(&self, alias: &str) -> Result<bool>;
}

/// Publishes to every publisher concurrently. Per-publisher failures are
/// logged as publishing errors; the merged outcome never aborts the
/// caller.
pub async fn publish_to_all(commit: &Value, publishers: &[Arc<dyn Publisher>]) -> usize {
    let outcomes = join_all(publishers.iter().map(|p| p.publish(commit))).await;
    let mut delivered = 0usize;
    for outcome in outcomes {
        match outcome {
            Ok(()) => delivered += 1,
            Err(e) => warn!(error = %e, "nameservice.publishing_error"),
        }
    }
    delivered
}
