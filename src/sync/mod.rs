//! Manifest diffing and plan execution
//!
//! Stage 1: [`plan`] - pure diff of the local manifest against the remote
//! one, no I/O. Stage 2: [`execute`] - carry the plan out against the
//! store. Keeping the policy in a pure function makes it testable without
//! any network access.

mod execute;
mod plan;

pub use execute::{
    execute, ExecuteError, ExecuteOptions, SyncResult, TransferFailure, TransferKind,
};
pub use plan::{entries_match, plan, SyncPlan};
