//! Failure taxonomy and stable exit codes

use serde::{Deserialize, Serialize};

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Every attempted build and transfer succeeded
    Success,
    /// At least one target or path failed
    Failed,
    /// The run was cancelled before completion
    Cancelled,
}

impl Status {
    /// Check if this is a terminal failure state
    pub fn is_failure(&self) -> bool {
        matches!(self, Status::Failed | Status::Cancelled)
    }
}

/// Failure kind - categorizes the cause of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Malformed target registry or run configuration
    Config,
    /// One target's toolchain invocation failed
    Build,
    /// Remote listing or authentication failed
    Remote,
    /// A single upload or delete failed after retries
    Transfer,
    /// The run was cancelled
    Cancelled,
}

impl FailureKind {
    /// Human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            FailureKind::Config => "Configuration invalid",
            FailureKind::Build => "Toolchain invocation failed",
            FailureKind::Remote => "Remote store unreachable",
            FailureKind::Transfer => "Transfer failed after retries",
            FailureKind::Cancelled => "Run cancelled",
        }
    }
}

/// Stable exit codes
///
/// Build-only, sync-only and combined failures get distinct codes so
/// calling automation can retry or alert differently for each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum ExitCode {
    /// Full success
    Success = 0,
    /// Configuration error, aborted before any work
    Config = 1,
    /// One or more targets failed to build; sync of the rest succeeded
    BuildFailed = 10,
    /// All builds succeeded but one or more transfers failed
    SyncFailed = 20,
    /// Both build and transfer failures occurred
    BuildAndSyncFailed = 30,
    /// Remote listing/auth failure, run aborted before executing
    Remote = 40,
    /// Run was cancelled
    Cancelled = 80,
}

impl ExitCode {
    /// Get the integer value of the exit code
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    /// Create from integer value
    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(ExitCode::Success),
            1 => Some(ExitCode::Config),
            10 => Some(ExitCode::BuildFailed),
            20 => Some(ExitCode::SyncFailed),
            30 => Some(ExitCode::BuildAndSyncFailed),
            40 => Some(ExitCode::Remote),
            80 => Some(ExitCode::Cancelled),
            _ => None,
        }
    }

    /// Check if this exit code indicates success
    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }
}

impl Default for ExitCode {
    fn default() -> Self {
        ExitCode::Success
    }
}

/// Aggregates per-target and per-path outcomes into a status and exit code.
///
/// Cancellation dominates; otherwise the code reflects which categories
/// recorded failures.
#[derive(Debug, Default)]
pub struct OutcomeAggregator {
    build_failures: usize,
    transfer_failures: usize,
    cancelled: bool,
}

impl OutcomeAggregator {
    /// Create a new aggregator
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed target build
    pub fn add_build_failure(&mut self) {
        self.build_failures += 1;
    }

    /// Record a failed transfer (upload or delete)
    pub fn add_transfer_failure(&mut self) {
        self.transfer_failures += 1;
    }

    /// Record that the run was cancelled
    pub fn set_cancelled(&mut self) {
        self.cancelled = true;
    }

    /// Get the aggregated status
    pub fn status(&self) -> Status {
        if self.cancelled {
            Status::Cancelled
        } else if self.build_failures > 0 || self.transfer_failures > 0 {
            Status::Failed
        } else {
            Status::Success
        }
    }

    /// Get the aggregated exit code
    pub fn exit_code(&self) -> ExitCode {
        if self.cancelled {
            ExitCode::Cancelled
        } else {
            match (self.build_failures > 0, self.transfer_failures > 0) {
                (false, false) => ExitCode::Success,
                (true, false) => ExitCode::BuildFailed,
                (false, true) => ExitCode::SyncFailed,
                (true, true) => ExitCode::BuildAndSyncFailed,
            }
        }
    }
}
