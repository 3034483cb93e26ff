//! Content-addressed storage.
//!
//! Everything the engine persists — commits, commit data, index nodes,
//! garbage logs — goes through a [`ContentStore`]. Stores are addressed by
//! the `fluree:…://` scheme parsed in [`address`] and collected into a
//! [`Catalog`] that routes reads by method and owns one default store for
//! writes.

pub mod address;
pub mod file;
pub mod memory;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{LedgerError, Result};
use address::parse_address;

/// Outcome of a content write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentWrite {
    /// Full address of the stored document.
    pub address: String,
    /// Hex content hash.
    pub hash: String,
    /// Stored byte length.
    pub size: usize,
}

/// SHA-256 hex digest used for content addressing.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// A single pluggable storage backend.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Method token this store answers to (`memory`, `file`, ...).
    fn method(&self) -> &str;

    /// The location half of addresses this store produces.
    fn location(&self) -> String;

    /// Writes `bytes` under a content-derived path below `key`, returning
    /// the address and hash. Writing the same bytes twice yields the same
    /// address.
    async fn content_write_bytes(&self, key: &str, bytes: Bytes) -> Result<ContentWrite>;

    /// Writes `bytes` at an explicit path (replicated byte stores).
    async fn write_bytes(&self, path: &str, bytes: Bytes) -> Result<()>;

    /// Reads the document at a full address.
    async fn read_bytes(&self, address: &str) -> Result<Bytes>;

    /// Removes the document at a full address.
    async fn delete(&self, address: &str) -> Result<()>;

    /// Lists stored paths below a prefix. Optional; stores without cheap
    /// listing return `Unavailable`.
    async fn list_paths_recursive(&self, _prefix: &str) -> Result<Vec<String>> {
        Err(LedgerError::Unavailable(
            "store does not support listing".to_string(),
        ))
    }
}

/// A collection of stores routed by address method, with one default store
/// receiving all new writes.
#[derive(Clone)]
pub struct Catalog {
    stores: HashMap<String, Arc<dyn ContentStore>>,
    default_method: String,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("methods", &self.stores.keys().collect::<Vec<_>>())
            .field("default", &self.default_method)
            .finish()
    }
}

impl Catalog {
    /// Builds a catalog around one primary store.
    pub fn new(primary: Arc<dyn ContentStore>) -> Catalog {
        let default_method = primary.method().to_string();
        let mut stores = HashMap::new();
        stores.insert(default_method.clone(), primary);
        Catalog {
            stores,
            default_method,
        }
    }

    /// Registers an additional read store.
    pub fn with_store(mut self, store: Arc<dyn ContentStore>) -> Catalog {
        self.stores.insert(store.method().to_string(), store);
        self
    }

    /// The store receiving new writes.
    pub fn primary(&self) -> &Arc<dyn ContentStore> {
        &self.stores[&self.default_method]
    }

    /// Routes an address to the store that can read it.
    pub fn store_for(&self, addr: &str) -> Result<&Arc<dyn ContentStore>> {
        let parsed = parse_address(addr)?;
        self.stores
            .get(&parsed.method)
            .ok_or_else(|| LedgerError::UnknownAddress(addr.to_string()))
    }

    /// Content-writes raw bytes through the primary store.
    pub async fn content_write_bytes(&self, key: &str, bytes: Bytes) -> Result<ContentWrite> {
        self.primary().content_write_bytes(key, bytes).await
    }

    /// Content-writes a JSON document through the primary store.
    pub async fn content_write_json<T: Serialize>(
        &self,
        key: &str,
        doc: &T,
    ) -> Result<ContentWrite> {
        let bytes = serde_json::to_vec(doc)?;
        self.content_write_bytes(key, Bytes::from(bytes)).await
    }

    /// Reads raw bytes from whichever store owns the address.
    pub async fn read_bytes(&self, addr: &str) -> Result<Bytes> {
        self.store_for(addr)?.read_bytes(addr).await
    }

    /// Reads and parses a JSON document.
    pub async fn read_json(&self, addr: &str) -> Result<serde_json::Value> {
        let bytes = self.read_bytes(addr).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Reads and deserializes a typed JSON document.
    pub async fn read_json_as<T: DeserializeOwned>(&self, addr: &str) -> Result<T> {
        let bytes = self.read_bytes(addr).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Deletes a stored document.
    pub async fn delete(&self, addr: &str) -> Result<()> {
        self.store_for(addr)?.delete(addr).await
    }
}
