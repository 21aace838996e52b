//! Sync planning - pure diff of local against remote state
//!
//! The planner decides what to transfer; it performs no I/O and no safety
//! checks. The uploads, deletes and skips sets partition the union of the
//! two manifests' path sets: every local path that is new or changed is an
//! upload, every remote-only path is a delete (only when stale deletion is
//! enabled), everything identical is a skip.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::manifest::{FileEntry, Manifest};

/// The computed reconciliation between local and remote state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPlan {
    /// Local paths that are new or changed remotely
    pub uploads: BTreeSet<String>,

    /// Remote-only paths to remove (empty unless stale deletion is enabled)
    pub deletes: BTreeSet<String>,

    /// Paths present and identical on both sides
    pub skips: BTreeSet<String>,
}

impl SyncPlan {
    /// True when the plan transfers nothing
    pub fn is_noop(&self) -> bool {
        self.uploads.is_empty() && self.deletes.is_empty()
    }

    /// Number of operations the executor will perform
    pub fn operation_count(&self) -> usize {
        self.uploads.len() + self.deletes.len()
    }

    /// One-line description for progress output
    pub fn describe(&self) -> String {
        format!(
            "{} upload(s), {} delete(s), {} unchanged",
            self.uploads.len(),
            self.deletes.len(),
            self.skips.len()
        )
    }
}

/// Decide whether a local entry and its remote counterpart hold identical
/// content.
///
/// Hash comparison takes precedence whenever both sides carry a digest.
/// Without a trustworthy remote hash the test weakens to size plus
/// last-modified: the pair only counts as identical when sizes match and
/// the remote object is not older than the local file. Every doubtful case
/// resolves to "different", so changed content is never left un-uploaded;
/// the cost is an occasional re-upload of identical bytes.
pub fn entries_match(local: &FileEntry, remote: &FileEntry) -> bool {
    if let (Some(local_hash), Some(remote_hash)) = (&local.sha256, &remote.sha256) {
        return local_hash == remote_hash;
    }

    if local.size != remote.size {
        return false;
    }
    match (local.modified_at, remote.modified_at) {
        (Some(local_mtime), Some(remote_mtime)) => remote_mtime >= local_mtime,
        _ => false,
    }
}

/// Diff `local` against `remote` into a [`SyncPlan`].
///
/// Pure and deterministic. With `delete_stale` false, remote-only paths are
/// left untouched and unreported. An empty local manifest with
/// `delete_stale` true plans to delete everything remote; the executor, not
/// the planner, guards that case.
pub fn plan(local: &Manifest, remote: &Manifest, delete_stale: bool) -> SyncPlan {
    let mut result = SyncPlan::default();

    for (path, local_entry) in &local.entries {
        match remote.get(path) {
            Some(remote_entry) if entries_match(local_entry, remote_entry) => {
                result.skips.insert(path.clone());
            }
            _ => {
                result.uploads.insert(path.clone());
            }
        }
    }

    if delete_stale {
        for path in remote.entries.keys() {
            if local.get(path).is_none() {
                result.deletes.insert(path.clone());
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn entry(path: &str, sha256: Option<&str>, size: u64) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            size,
            sha256: sha256.map(str::to_string),
            modified_at: Some(Utc::now()),
            source_target: None,
        }
    }

    fn manifest(entries: Vec<FileEntry>) -> Manifest {
        Manifest::from_entries(entries)
    }

    #[test]
    fn new_local_paths_are_uploads() {
        let local = manifest(vec![entry("a.bin", Some("h1"), 10)]);
        let remote = manifest(vec![]);

        let plan = plan(&local, &remote, false);
        assert!(plan.uploads.contains("a.bin"));
        assert!(plan.skips.is_empty());
        assert!(plan.deletes.is_empty());
    }

    #[test]
    fn changed_hash_is_an_upload() {
        let local = manifest(vec![entry("a.bin", Some("new"), 10)]);
        let remote = manifest(vec![entry("a.bin", Some("old"), 10)]);

        let plan = plan(&local, &remote, false);
        assert!(plan.uploads.contains("a.bin"));
    }

    #[test]
    fn identical_hash_is_a_skip() {
        let local = manifest(vec![entry("a.bin", Some("same"), 10)]);
        let remote = manifest(vec![entry("a.bin", Some("same"), 10)]);

        let plan = plan(&local, &remote, true);
        assert!(plan.skips.contains("a.bin"));
        assert!(plan.is_noop());
    }

    #[test]
    fn hash_wins_over_mtime_difference() {
        // Content unchanged but mtimes differ wildly: trustworthy hashes on
        // both sides must place the path in skips.
        let mut local_entry = entry("a.bin", Some("same"), 10);
        local_entry.modified_at = Some(Utc::now());
        let mut remote_entry = entry("a.bin", Some("same"), 10);
        remote_entry.modified_at = Some(Utc::now() - Duration::days(30));

        let plan = plan(
            &manifest(vec![local_entry]),
            &manifest(vec![remote_entry]),
            false,
        );
        assert!(plan.skips.contains("a.bin"));
        assert!(plan.uploads.is_empty());
    }

    #[test]
    fn unknown_remote_hash_falls_back_to_size_and_mtime() {
        let now = Utc::now();

        // Same size, remote newer: skip
        let mut remote_newer = entry("a.bin", None, 10);
        remote_newer.modified_at = Some(now + Duration::hours(1));
        let plan_skip = plan(
            &manifest(vec![entry("a.bin", Some("h"), 10)]),
            &manifest(vec![remote_newer]),
            false,
        );
        assert!(plan_skip.skips.contains("a.bin"));

        // Same size, remote older: conservative upload
        let mut remote_older = entry("a.bin", None, 10);
        remote_older.modified_at = Some(now - Duration::hours(1));
        let plan_upload = plan(
            &manifest(vec![entry("a.bin", Some("h"), 10)]),
            &manifest(vec![remote_older]),
            false,
        );
        assert!(plan_upload.uploads.contains("a.bin"));

        // Different size: upload regardless of mtime
        let mut remote_big = entry("a.bin", None, 99);
        remote_big.modified_at = Some(now + Duration::hours(1));
        let plan_size = plan(
            &manifest(vec![entry("a.bin", Some("h"), 10)]),
            &manifest(vec![remote_big]),
            false,
        );
        assert!(plan_size.uploads.contains("a.bin"));
    }

    #[test]
    fn missing_mtime_resolves_to_upload() {
        let mut remote_entry = entry("a.bin", None, 10);
        remote_entry.modified_at = None;

        let plan = plan(
            &manifest(vec![entry("a.bin", Some("h"), 10)]),
            &manifest(vec![remote_entry]),
            false,
        );
        assert!(plan.uploads.contains("a.bin"));
    }

    #[test]
    fn deletes_disabled_means_no_deletes_ever() {
        let local = manifest(vec![entry("a.bin", Some("h1"), 10)]);
        let remote = manifest(vec![
            entry("a.bin", Some("h1"), 10),
            entry("stale.bin", Some("h2"), 20),
        ]);

        let plan = plan(&local, &remote, false);
        assert!(plan.deletes.is_empty());
        assert!(!plan.skips.contains("stale.bin"));
        assert!(!plan.uploads.contains("stale.bin"));
    }

    #[test]
    fn remote_only_paths_deleted_when_enabled() {
        let local = manifest(vec![]);
        let remote = manifest(vec![entry("stale.bin", Some("h"), 20)]);

        let plan = plan(&local, &remote, true);
        assert_eq!(plan.deletes.len(), 1);
        assert!(plan.deletes.contains("stale.bin"));
    }

    #[test]
    fn mixed_manifests_split_three_ways() {
        let local = manifest(vec![
            entry("a.bin", Some("hashA"), 10),
            entry("b.bin", Some("hashB"), 20),
        ]);
        let remote = manifest(vec![
            entry("a.bin", Some("hashA"), 10),
            entry("c.bin", Some("hashC"), 30),
        ]);

        let result = plan(&local, &remote, true);
        assert_eq!(result.uploads.iter().collect::<Vec<_>>(), vec!["b.bin"]);
        assert_eq!(result.deletes.iter().collect::<Vec<_>>(), vec!["c.bin"]);
        assert_eq!(result.skips.iter().collect::<Vec<_>>(), vec!["a.bin"]);
    }

    #[test]
    fn plan_partitions_the_path_union() {
        let local = manifest(vec![
            entry("a", Some("h1"), 1),
            entry("b", Some("h2"), 2),
            entry("c", Some("h3"), 3),
        ]);
        let remote = manifest(vec![
            entry("b", Some("h2"), 2),
            entry("c", Some("changed"), 3),
            entry("d", Some("h4"), 4),
        ]);

        let result = plan(&local, &remote, true);

        let mut union: BTreeSet<String> = local.entries.keys().cloned().collect();
        union.extend(remote.entries.keys().cloned());

        let mut covered = BTreeSet::new();
        for set in [&result.uploads, &result.deletes, &result.skips] {
            for path in set {
                assert!(covered.insert(path.clone()), "path '{path}' in two sets");
            }
        }
        assert_eq!(covered, union);
    }
}
