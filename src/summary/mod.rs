//! Run outcome taxonomy and summary artifacts
//!
//! Per-target and per-path failures are isolated and aggregated here rather
//! than aborting the run; the process exit code encodes which categories
//! failed so calling automation can react differently to build failures,
//! sync failures, or both.

mod failure;
mod run_summary;

pub use failure::{ExitCode, FailureKind, OutcomeAggregator, Status};
pub use run_summary::{RunSummary, TargetFailure, TransferFailureReport};
