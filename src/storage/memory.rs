//! Heap-backed content store, used by tests and single-process deployments.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::address::{build_address, parse_address};
use super::{content_hash, ContentStore, ContentWrite};
use crate::error::{LedgerError, Result};

/// In-memory store keyed by path.
#[derive(Default)]
pub struct MemoryStore {
    contents: RwLock<FxHashMap<String, Bytes>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.contents.read().len()
    }

    /// True when nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.contents.read().is_empty()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    fn method(&self) -> &str {
        "memory"
    }

    fn location(&self) -> String {
        "fluree:memory".to_string()
    }

    async fn content_write_bytes(&self, key: &str, bytes: Bytes) -> Result<ContentWrite> {
        let hash = content_hash(&bytes);
        let path = format!("{key}/{hash}");
        let size = bytes.len();
        self.contents.write().insert(path.clone(), bytes);
        Ok(ContentWrite {
            address: build_address(&self.location(), &path),
            hash,
            size,
        })
    }

    async fn write_bytes(&self, path: &str, bytes: Bytes) -> Result<()> {
        self.contents.write().insert(path.to_string(), bytes);
        Ok(())
    }

    async fn read_bytes(&self, address: &str) -> Result<Bytes> {
        let parsed = parse_address(address)?;
        self.contents
            .read()
            .get(&parsed.path)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownAddress(address.to_string()))
    }

    async fn delete(&self, address: &str) -> Result<()> {
        let parsed = parse_address(address)?;
        self.contents.write().remove(&parsed.path);
        Ok(())
    }

    async fn list_paths_recursive(&self, prefix: &str) -> Result<Vec<String>> {
        let mut paths: Vec<String> = self
            .contents
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        paths.sort();
        Ok(paths)
    }
}
