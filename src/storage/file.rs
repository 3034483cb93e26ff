//! Filesystem-backed content store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::address::{build_address, parse_address};
use super::{content_hash, ContentStore, ContentWrite};
use crate::error::{LedgerError, Result};

/// Content store rooted at a directory. Document paths map directly to
/// files below the root.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl AsRef<Path>) -> Result<FileStore> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(FileStore { root })
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        if path.split('/').any(|seg| seg == "..") {
            return Err(LedgerError::InvalidArgument(format!(
                "path escapes store root: {path}"
            )));
        }
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl ContentStore for FileStore {
    fn method(&self) -> &str {
        "file"
    }

    fn location(&self) -> String {
        "fluree:file".to_string()
    }

    async fn content_write_bytes(&self, key: &str, bytes: Bytes) -> Result<ContentWrite> {
        let hash = content_hash(&bytes);
        let path = format!("{key}/{hash}");
        let size = bytes.len();
        self.write_bytes(&path, bytes).await?;
        debug!(path, size, "storage.file.content_write");
        Ok(ContentWrite {
            address: build_address(&self.location(), &path),
            hash,
            size,
        })
    }

    async fn write_bytes(&self, path: &str, bytes: Bytes) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write-then-rename so concurrent readers never observe a torn file.
        let tmp = full.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &full).await?;
        Ok(())
    }

    async fn read_bytes(&self, address: &str) -> Result<Bytes> {
        let parsed = parse_address(address)?;
        let full = self.resolve(&parsed.path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(LedgerError::UnknownAddress(address.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, address: &str) -> Result<()> {
        let parsed = parse_address(address)?;
        let full = self.resolve(&parsed.path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_paths_recursive(&self, prefix: &str) -> Result<Vec<String>> {
        let mut pending = vec![self.resolve(prefix)?];
        let mut paths = Vec::new();
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.root) {
                    paths.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }
        paths.sort();
        Ok(paths)
    }
}
