//! Directory-backed object store
//!
//! Maps object keys onto paths under a root directory. Useful as a local
//! mirror destination and as the filesystem backend in integration tests.
//! Listing hashes each file, so entries always carry a trustworthy digest.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use super::{ObjectStore, RemoteObject, StoreError};
use crate::manifest::{hash_file, normalized_rel_path};

/// Object store rooted at a local directory
#[derive(Debug)]
pub struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    /// Create a store rooted at `root`. The directory is created lazily on
    /// first write.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// The store's root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for part in key.split('/').filter(|p| !p.is_empty()) {
            path.push(part);
        }
        path
    }
}

impl ObjectStore for LocalDirStore {
    fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>, StoreError> {
        let base = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.key_path(prefix)
        };
        if !base.exists() {
            return Ok(Vec::new());
        }

        let mut objects = Vec::new();
        for entry in WalkDir::new(&base).follow_links(false) {
            let entry = entry.map_err(|e| StoreError::Io(std::io::Error::other(e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|_| StoreError::Protocol("listing escaped the store root".to_string()))?;
            let metadata = entry.metadata().map_err(|e| StoreError::Io(std::io::Error::other(e)))?;

            objects.push(RemoteObject {
                key: normalized_rel_path(rel),
                size: metadata.len(),
                sha256: Some(hash_file(entry.path())?),
                modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    fn put(&self, key: &str, source: &Path, _sha256: &str) -> Result<(), StoreError> {
        let dest = self.key_path(key);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        // Stage next to the destination, then rename, so a failed copy
        // never leaves a half-written object at the final key. The full
        // file name keeps staging paths distinct across concurrent puts.
        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "object".to_string());
        let staging = dest.with_file_name(format!("{file_name}.part"));
        fs::copy(source, &staging)?;
        fs::rename(&staging, &dest)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.key_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}
