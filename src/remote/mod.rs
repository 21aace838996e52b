//! Remote object store interface
//!
//! The sync components talk to the store through the [`ObjectStore`] trait:
//! prefix-scoped listing (pagination folded away by the backend), whole-
//! object put, and delete, each idempotent. Backends: the B2-style HTTP
//! store, a local directory store, and an in-memory store with failure
//! injection for tests.

mod b2;
mod local;
mod memory;

pub use b2::B2Store;
pub use local::LocalDirStore;
pub use memory::{FailurePlan, MemoryStore, StoreOp};

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::manifest::{FileEntry, Manifest};

/// One object as reported by a store listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    /// Full object key, prefix included
    pub key: String,

    /// Size in bytes
    pub size: u64,

    /// SHA-256 digest when the store reports one compatible with local
    /// manifests; `None` must be treated as untrustworthy-absent
    pub sha256: Option<String>,

    /// Last-modified / upload timestamp when known
    pub modified_at: Option<DateTime<Utc>>,
}

/// Remote store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("remote API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unusable destination: {0}")]
    Destination(String),
}

impl StoreError {
    /// True for failures worth retrying: timeouts, connection drops, and
    /// 5xx/429/408-class responses. Auth and other 4xx responses are
    /// deterministic and are never retried.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Network(_) => true,
            StoreError::Api { status, .. } => {
                *status >= 500 || *status == 429 || *status == 408
            }
            _ => false,
        }
    }
}

/// Remote object store: list, put, delete. Implementations must be safe to
/// call from multiple worker threads at once; each path is written by at
/// most one task per run.
pub trait ObjectStore: Send + Sync {
    /// List every object under `prefix`, following pagination to the end.
    fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>, StoreError>;

    /// Upload the file at `source` as `key`, whole-object. The local
    /// SHA-256 travels with the object so later listings can report it.
    fn put(&self, key: &str, source: &Path, sha256: &str) -> Result<(), StoreError>;

    /// Delete `key`. Deleting an absent object is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// A parsed destination: a store plus the prefix all keys live under
pub struct Destination {
    /// The opened backend
    pub store: Box<dyn ObjectStore>,

    /// Key prefix within the store ("" for none)
    pub prefix: String,

    /// Human-readable description for reporting
    pub describe: String,
}

/// Parse a destination URL and open the matching backend.
///
/// `b2://bucket/prefix` opens the B2-style HTTP store with credentials from
/// the environment; `file://path` or a bare path opens a local directory
/// store.
pub fn open_destination(url: &str) -> Result<Destination, StoreError> {
    if let Some(rest) = url.strip_prefix("b2://") {
        let (bucket, prefix) = match rest.split_once('/') {
            Some((bucket, prefix)) => (bucket, prefix.trim_matches('/')),
            None => (rest, ""),
        };
        if bucket.is_empty() {
            return Err(StoreError::Destination(format!("no bucket in '{}'", url)));
        }
        let store = B2Store::from_env(bucket)?;
        return Ok(Destination {
            store: Box::new(store),
            prefix: prefix.to_string(),
            describe: url.to_string(),
        });
    }

    if let Some((scheme, _)) = url.split_once("://") {
        if scheme != "file" {
            return Err(StoreError::Destination(format!(
                "unsupported destination scheme: '{}'",
                scheme
            )));
        }
    }

    let path = url.strip_prefix("file://").unwrap_or(url);
    if path.is_empty() {
        return Err(StoreError::Destination(format!("empty path in '{}'", url)));
    }
    Ok(Destination {
        store: Box::new(LocalDirStore::new(PathBuf::from(path))),
        prefix: String::new(),
        describe: url.to_string(),
    })
}

/// Join a prefix and a relative path into an object key
pub fn join_key(prefix: &str, rel_path: &str) -> String {
    if prefix.is_empty() {
        rel_path.to_string()
    } else {
        format!("{}/{}", prefix.trim_end_matches('/'), rel_path)
    }
}

/// Fold a store listing into a manifest keyed by path relative to `prefix`.
///
/// Objects outside the prefix (the backend should not return any) and the
/// prefix marker itself are ignored.
pub fn read_remote_manifest(
    store: &dyn ObjectStore,
    prefix: &str,
) -> Result<Manifest, StoreError> {
    let objects = store.list(prefix)?;
    let strip = if prefix.is_empty() {
        String::new()
    } else {
        format!("{}/", prefix.trim_end_matches('/'))
    };

    let entries = objects.into_iter().filter_map(|object| {
        let rel = if strip.is_empty() {
            object.key.as_str()
        } else {
            object.key.strip_prefix(&strip)?
        };
        if rel.is_empty() {
            return None;
        }
        Some(FileEntry {
            path: rel.to_string(),
            size: object.size,
            sha256: object.sha256,
            modified_at: object.modified_at,
            source_target: None,
        })
    });

    Ok(Manifest::from_entries(entries))
}
