//! File manifests for local output trees and remote listings
//!
//! A manifest maps normalized relative paths to file metadata. Local
//! manifests are produced by walking the canonical output tree and hashing
//! every regular file; remote manifests are assembled from store listings
//! and may lack a trustworthy hash for some entries. The sync planner
//! consumes one of each.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::{Component, Path};
use walkdir::WalkDir;

/// Schema version for manifest.json
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "crossdock/manifest@1";

/// Root-level bookkeeping files excluded from manifests. These are run
/// artifacts the pipeline itself writes into the output tree; syncing them
/// would make every re-run look dirty.
pub const EXCLUDED_FILES: &[&str] = &["manifest.json", "run_summary.json"];

/// Errors for manifest operations
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("JCS canonicalization error: {0}")]
    Jcs(String),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Path is not within the indexed root: {0}")]
    PathNotInRoot(String),
}

/// Metadata for a single file, local or remote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the tree root, `/`-separated on every host OS
    pub path: String,

    /// Size in bytes
    pub size: u64,

    /// SHA-256 of the content. Always present for local entries; absent for
    /// remote entries whose store reported no compatible digest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,

    /// Last-modified timestamp, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,

    /// Target that produced this artifact (local manifests only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_target: Option<String>,
}

/// A path-keyed manifest. Exactly one entry per relative path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Entries keyed by relative path
    pub entries: BTreeMap<String, FileEntry>,
}

/// Result of indexing a local tree
#[derive(Debug)]
pub struct IndexReport {
    /// The manifest of regular files
    pub manifest: Manifest,

    /// Symlinks and other non-regular entries that were skipped
    pub skipped: Vec<String>,
}

impl Manifest {
    /// Create an empty manifest
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list of entries (later duplicates overwrite earlier ones)
    pub fn from_entries(entries: impl IntoIterator<Item = FileEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|e| (e.path.clone(), e))
            .collect();
        Self { entries }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the manifest has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by relative path
    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.entries.get(path)
    }

    /// Total size of all entries
    pub fn total_size(&self) -> u64 {
        self.entries.values().map(|e| e.size).sum()
    }

    /// Walk the tree rooted at `root` and index every regular file.
    ///
    /// Symbolic links and other non-regular files are skipped and reported,
    /// not fatal. Deterministic: identical content always yields identical
    /// hashes, which is what lets the planner detect "unchanged" across
    /// machines.
    pub fn index_tree(root: &Path) -> Result<IndexReport, ManifestError> {
        let mut entries = BTreeMap::new();
        let mut skipped = Vec::new();

        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry?;
            let path = entry.path();

            let rel_path = path
                .strip_prefix(root)
                .map_err(|_| ManifestError::PathNotInRoot(path.display().to_string()))?;
            if rel_path.as_os_str().is_empty() {
                continue;
            }
            let rel = normalized_rel_path(rel_path);

            if EXCLUDED_FILES.contains(&rel.as_str()) {
                continue;
            }

            let file_type = entry.file_type();
            if file_type.is_dir() {
                continue;
            }
            if !file_type.is_file() {
                skipped.push(rel);
                continue;
            }

            let metadata = entry.metadata()?;
            let modified_at = metadata.modified().ok().map(DateTime::<Utc>::from);
            let sha256 = hash_file(path)?;

            entries.insert(
                rel.clone(),
                FileEntry {
                    path: rel,
                    size: metadata.len(),
                    sha256: Some(sha256),
                    modified_at,
                    source_target: None,
                },
            );
        }

        Ok(IndexReport {
            manifest: Manifest { entries },
            skipped,
        })
    }

    /// Attribute each entry to the target whose output subdirectory
    /// contains it.
    pub fn annotate_sources(&mut self, subdir_to_target: &[(String, String)]) {
        for entry in self.entries.values_mut() {
            for (subdir, target_id) in subdir_to_target {
                let prefix = format!("{}/", subdir);
                if entry.path.starts_with(&prefix) || entry.path == *subdir {
                    entry.source_target = Some(target_id.clone());
                    break;
                }
            }
        }
    }

    /// SHA-256 over the JCS-canonicalized entry list, binding the manifest
    /// contents into a single digest.
    pub fn root_sha256(&self) -> Result<String, ManifestError> {
        let entries: Vec<&FileEntry> = self.entries.values().collect();
        let jcs_bytes = serde_json_canonicalizer::to_vec(&entries)
            .map_err(|e| ManifestError::Jcs(e.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(&jcs_bytes);
        Ok(hex::encode(hasher.finalize()))
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write to file
    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = self.to_json().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e))
        })?;
        std::fs::write(path, json)
    }
}

/// Join path components with `/` so manifests are portable across host
/// operating systems.
pub fn normalized_rel_path(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Stream a file through SHA-256
pub fn hash_file(path: &Path) -> Result<String, io::Error> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
