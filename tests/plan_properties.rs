//! Planner invariants exercised through the public API

use std::collections::BTreeSet;

use chrono::{Duration, Utc};
use crossdock::manifest::{FileEntry, Manifest};
use crossdock::sync::plan;

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

/// Fixture pairs covering empty, disjoint, overlapping and hash-less cases
fn fixture_pairs() -> Vec<(Manifest, Manifest)> {
    let hashless = FileEntry {
        sha256: None,
        ..entry("n.bin", None, 5)
    };
    vec![
        (manifest(vec![]), manifest(vec![])),
        (manifest(vec![entry("a", Some("h1"), 1)]), manifest(vec![])),
        (manifest(vec![]), manifest(vec![entry("r", Some("h2"), 2)])),
        (
            manifest(vec![entry("a", Some("h1"), 1), entry("b", Some("h2"), 2)]),
            manifest(vec![entry("b", Some("h2"), 2), entry("c", Some("h3"), 3)]),
        ),
        (
            manifest(vec![entry("x", Some("old"), 9), entry("n.bin", Some("h"), 5)]),
            manifest(vec![entry("x", Some("new"), 9), hashless]),
        ),
    ]
}

#[test]
fn deletes_are_empty_whenever_stale_deletion_is_off() {
    for (local, remote) in fixture_pairs() {
        let result = plan(&local, &remote, false);
        assert!(
            result.deletes.is_empty(),
            "plan(_, _, false) must never delete"
        );
    }
}

#[test]
fn plan_partitions_the_union_of_path_sets() {
    for (local, remote) in fixture_pairs() {
        let result = plan(&local, &remote, true);

        let mut union: BTreeSet<String> = local.entries.keys().cloned().collect();
        union.extend(remote.entries.keys().cloned());

        let mut covered = BTreeSet::new();
        for set in [&result.uploads, &result.deletes, &result.skips] {
            for path in set {
                assert!(
                    covered.insert(path.clone()),
                    "path '{path}' appears in more than one set"
                );
            }
        }
        assert_eq!(covered, union, "sets must cover the union exactly once each");
    }
}

#[test]
fn every_local_path_is_uploaded_or_skipped() {
    for (local, remote) in fixture_pairs() {
        let result = plan(&local, &remote, true);
        for path in local.entries.keys() {
            assert!(
                result.uploads.contains(path) || result.skips.contains(path),
                "local path '{path}' must be an upload or a skip"
            );
            assert!(!result.deletes.contains(path));
        }
    }
}

#[test]
fn mtime_only_change_with_trustworthy_hashes_is_a_skip() {
    let mut local_entry = entry("app", Some("same-digest"), 42);
    local_entry.modified_at = Some(Utc::now());
    let mut remote_entry = entry("app", Some("same-digest"), 42);
    remote_entry.modified_at = Some(Utc::now() - Duration::days(90));

    let result = plan(
        &manifest(vec![local_entry]),
        &manifest(vec![remote_entry]),
        true,
    );
    assert!(result.skips.contains("app"));
    assert!(result.uploads.is_empty());
}

#[test]
fn two_sided_diff_reconciles_exactly() {
    let local = manifest(vec![
        entry("a.bin", Some("hashA"), 10),
        entry("b.bin", Some("hashB"), 20),
    ]);
    let remote = manifest(vec![
        entry("a.bin", Some("hashA"), 10),
        entry("c.bin", Some("hashC"), 30),
    ]);

    let result = plan(&local, &remote, true);
    assert_eq!(result.uploads, BTreeSet::from(["b.bin".to_string()]));
    assert_eq!(result.deletes, BTreeSet::from(["c.bin".to_string()]));
    assert_eq!(result.skips, BTreeSet::from(["a.bin".to_string()]));
}

#[test]
fn empty_local_with_deletion_plans_a_full_wipe() {
    // The planner itself performs no safety check; the executor guards this.
    let remote = manifest(vec![entry("a", Some("h1"), 1), entry("b", Some("h2"), 2)]);
    let result = plan(&Manifest::new(), &remote, true);
    assert_eq!(result.deletes.len(), 2);
    assert!(result.uploads.is_empty());
    assert!(result.skips.is_empty());
}
