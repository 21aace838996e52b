//! Run summary (run_summary.json)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

use super::failure::{FailureKind, OutcomeAggregator, Status};

/// Schema version for run_summary.json
pub const RUN_SUMMARY_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for run_summary.json
pub const RUN_SUMMARY_SCHEMA_ID: &str = "crossdock/run_summary@1";

/// One failed target with its cause
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetFailure {
    /// Target platform identifier
    pub target_id: String,
    /// Failure category
    pub kind: FailureKind,
    /// Why the build failed
    pub error: String,
}

impl TargetFailure {
    /// A failed toolchain invocation
    pub fn build(target_id: String, error: String) -> Self {
        Self {
            target_id,
            kind: FailureKind::Build,
            error,
        }
    }
}

/// One path that failed to transfer after retries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferFailureReport {
    /// Relative path within the output tree
    pub path: String,
    /// Failure category
    pub kind: FailureKind,
    /// Last observed cause
    pub error: String,
}

impl TransferFailureReport {
    /// An upload or delete that exhausted its attempts
    pub fn transfer(path: String, error: String) -> Self {
        Self {
            path,
            kind: FailureKind::Transfer,
            error,
        }
    }
}

/// Run summary (run_summary.json)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// Run identifier
    pub run_id: String,

    /// When the summary was created
    pub created_at: DateTime<Utc>,

    /// Aggregated status
    pub status: Status,

    /// Aggregated exit code
    pub exit_code: i32,

    /// Targets attempted this run
    pub targets_attempted: usize,

    /// Targets that built and staged successfully
    pub targets_built: usize,

    /// Targets whose toolchain invocation failed, with cause
    pub targets_failed: Vec<TargetFailure>,

    /// Targets never started because of cancellation or fail-fast
    pub targets_skipped: usize,

    /// Paths uploaded
    pub uploaded: usize,

    /// Remote-only paths deleted
    pub deleted: usize,

    /// Unchanged paths left untouched
    pub skipped: usize,

    /// Paths that failed to transfer after retries, with cause
    pub transfer_failures: Vec<TransferFailureReport>,

    /// Wall-clock duration of the entire run in milliseconds
    pub duration_ms: u64,

    /// Human-readable summary
    pub human_summary: String,
}

impl RunSummary {
    /// Aggregate per-target and per-path outcomes into a summary.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        run_id: String,
        targets_attempted: usize,
        targets_built: usize,
        targets_failed: Vec<TargetFailure>,
        targets_skipped: usize,
        uploaded: usize,
        deleted: usize,
        skipped: usize,
        transfer_failures: Vec<TransferFailureReport>,
        cancelled: bool,
        duration_ms: u64,
    ) -> Self {
        let mut aggregator = OutcomeAggregator::new();
        for _ in &targets_failed {
            aggregator.add_build_failure();
        }
        for _ in &transfer_failures {
            aggregator.add_transfer_failure();
        }
        if cancelled {
            aggregator.set_cancelled();
        }

        let status = aggregator.status();
        let exit_code = aggregator.exit_code().as_i32();
        let human_summary = Self::generate_human_summary(
            status,
            targets_built,
            targets_failed.len(),
            uploaded,
            deleted,
            skipped,
            transfer_failures.len(),
        );

        Self {
            schema_version: RUN_SUMMARY_SCHEMA_VERSION,
            schema_id: RUN_SUMMARY_SCHEMA_ID.to_string(),
            run_id,
            created_at: Utc::now(),
            status,
            exit_code,
            targets_attempted,
            targets_built,
            targets_failed,
            targets_skipped,
            uploaded,
            deleted,
            skipped,
            transfer_failures,
            duration_ms,
            human_summary,
        }
    }

    /// Generate a human-readable summary
    fn generate_human_summary(
        status: Status,
        targets_built: usize,
        targets_failed: usize,
        uploaded: usize,
        deleted: usize,
        skipped: usize,
        transfer_failures: usize,
    ) -> String {
        let sync_part = format!(
            "{} uploaded, {} deleted, {} unchanged",
            uploaded, deleted, skipped
        );
        match status {
            Status::Success => {
                format!("Run succeeded: {} target(s) built, {}", targets_built, sync_part)
            }
            Status::Failed => format!(
                "Run failed: {} target(s) built, {} target(s) failed, {}, {} transfer failure(s)",
                targets_built, targets_failed, sync_part, transfer_failures
            ),
            Status::Cancelled => format!(
                "Run cancelled: {} target(s) built before interrupt, {}",
                targets_built, sync_part
            ),
        }
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
        fs::write(path, json)
    }

    /// Load from file
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary_with(
        targets_failed: Vec<TargetFailure>,
        transfer_failures: Vec<TransferFailureReport>,
        cancelled: bool,
    ) -> RunSummary {
        RunSummary::from_parts(
            "run-123".to_string(),
            2,
            2 - targets_failed.len(),
            targets_failed,
            0,
            3,
            1,
            4,
            transfer_failures,
            cancelled,
            1500,
        )
    }

    #[test]
    fn test_all_success() {
        let summary = summary_with(vec![], vec![], false);
        assert_eq!(summary.status, Status::Success);
        assert_eq!(summary.exit_code, 0);
        assert!(summary.human_summary.starts_with("Run succeeded"));
    }

    #[test]
    fn test_build_failure_exit_code() {
        let failed = vec![TargetFailure::build(
            "aarch64-unknown-linux-gnu".to_string(),
            "toolchain exited with status 1".to_string(),
        )];
        let summary = summary_with(failed, vec![], false);
        assert_eq!(summary.status, Status::Failed);
        assert_eq!(summary.exit_code, 10);
    }

    #[test]
    fn test_transfer_failure_exit_code() {
        let failed = vec![TransferFailureReport::transfer(
            "linux-x64/app".to_string(),
            "upload failed after 3 attempts".to_string(),
        )];
        let summary = summary_with(vec![], failed, false);
        assert_eq!(summary.exit_code, 20);
    }

    #[test]
    fn test_combined_failure_exit_code() {
        let builds = vec![TargetFailure::build(
            "x86_64-pc-windows-gnu".to_string(),
            "missing artifact".to_string(),
        )];
        let transfers = vec![TransferFailureReport::transfer(
            "macos-arm64/app".to_string(),
            "timeout".to_string(),
        )];
        let summary = summary_with(builds, transfers, false);
        assert_eq!(summary.exit_code, 30);
    }

    #[test]
    fn test_cancelled_dominates() {
        let builds = vec![TargetFailure::build(
            "x86_64-pc-windows-gnu".to_string(),
            "missing artifact".to_string(),
        )];
        let summary = summary_with(builds, vec![], true);
        assert_eq!(summary.status, Status::Cancelled);
        assert_eq!(summary.exit_code, 80);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let summary = summary_with(vec![], vec![], false);
        let json = summary.to_json().unwrap();
        assert!(json.contains(r#""schema_id": "crossdock/run_summary@1""#));

        let parsed = RunSummary::from_json(&json).unwrap();
        assert_eq!(parsed.run_id, summary.run_id);
        assert_eq!(parsed.exit_code, summary.exit_code);
        assert_eq!(parsed.uploaded, summary.uploaded);
    }

    #[test]
    fn test_write_and_read_file() {
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let summary = summary_with(vec![], vec![], false);
        let path = dir.path().join("run_summary.json");

        summary.write_to_file(&path).unwrap();
        let loaded = RunSummary::from_file(&path).unwrap();
        assert_eq!(loaded.run_id, summary.run_id);
    }
}
