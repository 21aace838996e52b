//! Plan execution against the remote store
//!
//! Uploads and deletes run concurrently through the bounded worker pool.
//! Transient failures are retried with bounded exponential backoff up to
//! the configured attempt ceiling; permanent per-path failures are
//! recorded and the rest of the plan proceeds. Side effects are strictly
//! confined to the declared plan.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::manifest::Manifest;
use crate::pool;
use crate::remote::{join_key, ObjectStore, StoreError};
use crate::signal::CancelFlag;

use super::plan::SyncPlan;

/// Upper bound on a single backoff sleep
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Executor tuning
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Worker pool size for transfers
    pub concurrency: usize,

    /// Attempts per path before recording a permanent failure
    pub retry_limit: u32,

    /// First backoff sleep; doubles per retry
    pub retry_base_delay: Duration,

    /// Permit a plan that deletes everything while uploading nothing.
    /// Off by default: an empty local manifest combined with stale
    /// deletion would otherwise wipe the remote prefix on a bad out-dir.
    pub allow_empty_local: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            retry_limit: 3,
            retry_base_delay: Duration::from_millis(500),
            allow_empty_local: false,
        }
    }
}

/// Which direction a failed transfer was going
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Upload,
    Delete,
}

/// A path that failed after exhausting its attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferFailure {
    /// Upload or delete
    pub kind: TransferKind,

    /// Last observed cause
    pub error: String,

    /// Attempts made
    pub attempts: u32,
}

/// Outcome of executing a plan; immutable once the executor returns
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncResult {
    /// Paths uploaded successfully
    pub uploaded: BTreeSet<String>,

    /// Paths deleted successfully
    pub deleted: BTreeSet<String>,

    /// Paths the plan skipped as unchanged
    pub skipped: BTreeSet<String>,

    /// Paths that failed after retries, with the last cause
    pub failed: BTreeMap<String, TransferFailure>,

    /// True when cancellation dropped queued operations
    pub cancelled: bool,
}

impl SyncResult {
    /// True when every planned operation succeeded
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }
}

/// Executor refusals - raised before any side effect
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error(
        "refusing to delete {deletes} remote object(s) against an empty local manifest \
         (pass --force-delete-all to confirm)"
    )]
    EmptyLocalMassDelete { deletes: usize },
}

enum Operation {
    Upload { path: String, source: PathBuf, sha256: String },
    Delete { path: String },
}

enum OperationOutcome {
    Uploaded(String),
    Deleted(String),
    Failed(String, TransferFailure),
}

/// Execute `plan` against `store`.
///
/// Uploads stream file content from `local_root`; the digests recorded in
/// `local` travel with each object. The executor touches no path absent
/// from the plan. Ordering between independent paths is not guaranteed.
pub fn execute(
    store: &dyn ObjectStore,
    plan: &SyncPlan,
    local: &Manifest,
    local_root: &Path,
    prefix: &str,
    cancel: &CancelFlag,
    options: &ExecuteOptions,
) -> Result<SyncResult, ExecuteError> {
    // Mass-delete guard: a plan whose local side is empty but which deletes
    // remote objects must be explicitly confirmed by the caller.
    let local_side_empty = plan.uploads.is_empty() && plan.skips.is_empty();
    if local_side_empty && !plan.deletes.is_empty() && !options.allow_empty_local {
        return Err(ExecuteError::EmptyLocalMassDelete {
            deletes: plan.deletes.len(),
        });
    }

    let mut operations = Vec::with_capacity(plan.operation_count());
    for path in &plan.uploads {
        let sha256 = local
            .get(path)
            .and_then(|entry| entry.sha256.clone())
            .unwrap_or_default();
        operations.push(Operation::Upload {
            path: path.clone(),
            source: local_root.join(path),
            sha256,
        });
    }
    for path in &plan.deletes {
        operations.push(Operation::Delete { path: path.clone() });
    }

    let outcomes = pool::run_bounded(options.concurrency, operations, cancel, |_, op| {
        run_operation(store, prefix, op, options)
    });

    let mut result = SyncResult {
        skipped: plan.skips.clone(),
        ..Default::default()
    };
    for outcome in outcomes.into_iter().flatten() {
        match outcome {
            OperationOutcome::Uploaded(path) => {
                result.uploaded.insert(path);
            }
            OperationOutcome::Deleted(path) => {
                result.deleted.insert(path);
            }
            OperationOutcome::Failed(path, failure) => {
                result.failed.insert(path, failure);
            }
        }
    }
    result.cancelled = cancel.is_set();

    Ok(result)
}

fn run_operation(
    store: &dyn ObjectStore,
    prefix: &str,
    op: Operation,
    options: &ExecuteOptions,
) -> OperationOutcome {
    match op {
        Operation::Upload { path, source, sha256 } => {
            let key = join_key(prefix, &path);
            match transfer_with_retry(options, || store.put(&key, &source, &sha256)) {
                Ok(()) => OperationOutcome::Uploaded(path),
                Err((error, attempts)) => OperationOutcome::Failed(
                    path,
                    TransferFailure {
                        kind: TransferKind::Upload,
                        error: error.to_string(),
                        attempts,
                    },
                ),
            }
        }
        Operation::Delete { path } => {
            let key = join_key(prefix, &path);
            match transfer_with_retry(options, || store.delete(&key)) {
                Ok(()) => OperationOutcome::Deleted(path),
                Err((error, attempts)) => OperationOutcome::Failed(
                    path,
                    TransferFailure {
                        kind: TransferKind::Delete,
                        error: error.to_string(),
                        attempts,
                    },
                ),
            }
        }
    }
}

/// Run `attempt` up to the retry ceiling, sleeping between transient
/// failures. Non-transient errors fail immediately.
fn transfer_with_retry<F>(
    options: &ExecuteOptions,
    attempt: F,
) -> Result<(), (StoreError, u32)>
where
    F: Fn() -> Result<(), StoreError>,
{
    let limit = options.retry_limit.max(1);
    let mut attempts = 0;
    loop {
        attempts += 1;
        match attempt() {
            Ok(()) => return Ok(()),
            Err(error) if error.is_transient() && attempts < limit => {
                std::thread::sleep(backoff_delay(options.retry_base_delay, attempts));
            }
            Err(error) => return Err((error, attempts)),
        }
    }
}

/// Exponential backoff: base * 2^(attempt-1), capped
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_BACKOFF)
}
