//! crossdock - cross-compilation release pipeline
//!
//! Drives an external toolchain once per target platform, stages the
//! resulting binaries into a canonical output tree, and synchronizes that
//! tree to a remote object-store bucket: only new or changed files are
//! uploaded, remote-only files are optionally deleted, and re-running the
//! same sync is a no-op.

pub mod build;
pub mod config;
pub mod manifest;
pub mod pipeline;
pub mod pool;
pub mod registry;
pub mod remote;
pub mod signal;
pub mod summary;
pub mod sync;

pub use build::{BuildDriver, BuildError, BuildOutcome};
pub use config::{CliOverrides, ConfigError, FileConfig, RunConfig};
pub use manifest::{FileEntry, Manifest};
pub use pipeline::{Pipeline, PipelineError};
pub use registry::{TargetRegistry, TargetSpec};
pub use remote::{ObjectStore, RemoteObject, StoreError};
pub use signal::CancelFlag;
pub use summary::{ExitCode, RunSummary, Status};
pub use sync::{SyncPlan, SyncResult};
