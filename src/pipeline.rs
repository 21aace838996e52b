//! Pipeline orchestration
//!
//! Wires the stages together: select targets, drive builds through the
//! worker pool, index the output tree, read remote state, plan, execute,
//! and aggregate everything into a run summary written alongside the
//! artifacts.
//!
//! Failure isolation: per-target build errors and per-path transfer
//! errors are recorded and the run continues; only configuration errors
//! and remote listing/auth failures abort the run outright (planning
//! against unknown remote state could over-delete or over-upload).

use std::io;
use std::time::Instant;

use thiserror::Error;
use ulid::Ulid;

use crate::build::{BuildDriver, BuildOutcome};
use crate::config::{ConfigError, RunConfig};
use crate::manifest::{Manifest, ManifestError};
use crate::registry::TargetRegistry;
use crate::remote::{open_destination, read_remote_manifest, Destination, StoreError};
use crate::signal::CancelFlag;
use crate::summary::{ExitCode, RunSummary, TargetFailure, TransferFailureReport};
use crate::sync::{self, ExecuteError, ExecuteOptions, SyncPlan, SyncResult};

/// Fatal pipeline errors. Everything else lands in the run summary.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("remote store error: {0}")]
    Remote(#[from] StoreError),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("{0}")]
    Execute(#[from] ExecuteError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl PipelineError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Config(_) => ExitCode::Config.as_i32(),
            PipelineError::Remote(_) => ExitCode::Remote.as_i32(),
            PipelineError::Manifest(_) => ExitCode::Config.as_i32(),
            PipelineError::Execute(_) => ExitCode::Config.as_i32(),
            PipelineError::Io(_) => ExitCode::Config.as_i32(),
        }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Outcome of the build phase
struct BuildPhase {
    attempted: usize,
    built: Vec<BuildOutcome>,
    failed: Vec<TargetFailure>,
    skipped: usize,
}

/// Pipeline execution context
pub struct Pipeline {
    config: RunConfig,
    registry: TargetRegistry,
    cancel: CancelFlag,
}

impl Pipeline {
    /// Create a pipeline over a validated configuration and registry
    pub fn new(config: RunConfig, registry: TargetRegistry, cancel: CancelFlag) -> Self {
        Self {
            config,
            registry,
            cancel,
        }
    }

    /// Full run: build the selected targets, then synchronize the output
    /// tree to the destination.
    pub fn run(&self, target_filter: &[String]) -> PipelineResult<RunSummary> {
        let start = Instant::now();
        let run_id = Ulid::new().to_string();

        let builds = self.build_phase(target_filter)?;

        // Cancelled or stopped by fail-fast: report what happened, skip sync.
        if self.cancel.is_set() || (self.config.fail_fast && !builds.failed.is_empty()) {
            let summary = self.summarize(run_id, start, builds, None);
            self.write_summary(&summary)?;
            return Ok(summary);
        }

        let local = self.index_local()?;
        let sync_result = self.sync_phase(&local)?;

        let summary = self.summarize(run_id, start, builds, Some(sync_result));
        self.write_summary(&summary)?;
        Ok(summary)
    }

    /// Build only; no remote interaction.
    pub fn build_only(&self, target_filter: &[String]) -> PipelineResult<RunSummary> {
        let start = Instant::now();
        let run_id = Ulid::new().to_string();

        let builds = self.build_phase(target_filter)?;
        let summary = self.summarize(run_id, start, builds, None);
        self.write_summary(&summary)?;
        Ok(summary)
    }

    /// Synchronize an existing output tree; no builds.
    pub fn sync_only(&self) -> PipelineResult<RunSummary> {
        let start = Instant::now();
        let run_id = Ulid::new().to_string();

        let local = self.index_local()?;
        let sync_result = self.sync_phase(&local)?;

        let builds = BuildPhase {
            attempted: 0,
            built: Vec::new(),
            failed: Vec::new(),
            skipped: 0,
        };
        let summary = self.summarize(run_id, start, builds, Some(sync_result));
        self.write_summary(&summary)?;
        Ok(summary)
    }

    /// Compute the sync plan without executing it.
    pub fn plan_only(&self) -> PipelineResult<(SyncPlan, Manifest, Manifest)> {
        let local = self.index_local()?;
        let destination = self.open_destination()?;
        let remote = read_remote_manifest(destination.store.as_ref(), &destination.prefix)?;
        let plan = sync::plan(&local, &remote, self.config.delete_stale);
        Ok((plan, local, remote))
    }

    /// The registry this pipeline selects targets from
    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    fn build_phase(&self, target_filter: &[String]) -> PipelineResult<BuildPhase> {
        let targets = self.registry.select(target_filter)?;
        if self.config.verbose {
            eprintln!(
                "building {} target(s) with concurrency {}",
                targets.len(),
                self.config.concurrency
            );
        }

        let driver = BuildDriver::new(
            self.config.program.clone(),
            self.config.work_dir.clone(),
            self.config.out_root.clone(),
            self.config.verbose,
        );
        let results = driver.build_all(
            &targets,
            self.config.concurrency,
            self.config.fail_fast,
            &self.cancel,
        );

        let mut phase = BuildPhase {
            attempted: 0,
            built: Vec::new(),
            failed: Vec::new(),
            skipped: 0,
        };
        for result in results {
            match result {
                Some(Ok(outcome)) => {
                    phase.attempted += 1;
                    phase.built.push(outcome);
                }
                Some(Err(error)) => {
                    phase.attempted += 1;
                    phase
                        .failed
                        .push(TargetFailure::build(error.target_id, error.kind.to_string()));
                }
                None => phase.skipped += 1,
            }
        }
        Ok(phase)
    }

    fn index_local(&self) -> PipelineResult<Manifest> {
        std::fs::create_dir_all(&self.config.out_root)?;
        let report = Manifest::index_tree(&self.config.out_root)?;
        for skipped in &report.skipped {
            eprintln!("skipping non-regular file: {}", skipped);
        }

        let mut manifest = report.manifest;
        let subdir_map: Vec<(String, String)> = self
            .registry
            .targets()
            .iter()
            .map(|t| (t.output_subdir.clone(), t.id.clone()))
            .collect();
        manifest.annotate_sources(&subdir_map);

        if self.config.verbose {
            eprintln!(
                "indexed {} file(s), {} byte(s) under {}",
                manifest.len(),
                manifest.total_size(),
                self.config.out_root.display()
            );
        }

        manifest.write_to_file(&self.config.out_root.join("manifest.json"))?;
        Ok(manifest)
    }

    fn open_destination(&self) -> PipelineResult<Destination> {
        let url = self.config.destination()?;
        Ok(open_destination(url)?)
    }

    fn sync_phase(&self, local: &Manifest) -> PipelineResult<SyncResult> {
        let destination = self.open_destination()?;
        if self.config.verbose {
            eprintln!("listing remote state at {}", destination.describe);
        }

        // A failed or untrustworthy listing is fatal for the run.
        let remote = read_remote_manifest(destination.store.as_ref(), &destination.prefix)?;

        let plan = sync::plan(local, &remote, self.config.delete_stale);
        if self.config.verbose {
            eprintln!("plan: {}", plan.describe());
        }

        let options = ExecuteOptions {
            concurrency: self.config.concurrency,
            retry_limit: self.config.retry_limit,
            allow_empty_local: self.config.force_delete_all,
            ..ExecuteOptions::default()
        };
        let result = sync::execute(
            destination.store.as_ref(),
            &plan,
            local,
            &self.config.out_root,
            &destination.prefix,
            &self.cancel,
            &options,
        )?;
        Ok(result)
    }

    fn summarize(
        &self,
        run_id: String,
        start: Instant,
        builds: BuildPhase,
        sync_result: Option<SyncResult>,
    ) -> RunSummary {
        let (uploaded, deleted, skipped, transfer_failures, sync_cancelled) = match sync_result {
            Some(result) => (
                result.uploaded.len(),
                result.deleted.len(),
                result.skipped.len(),
                result
                    .failed
                    .iter()
                    .map(|(path, failure)| {
                        TransferFailureReport::transfer(
                            path.clone(),
                            format!("{} (after {} attempt(s))", failure.error, failure.attempts),
                        )
                    })
                    .collect(),
                result.cancelled,
            ),
            None => (0, 0, 0, Vec::new(), false),
        };

        RunSummary::from_parts(
            run_id,
            builds.attempted,
            builds.built.len(),
            builds.failed,
            builds.skipped,
            uploaded,
            deleted,
            skipped,
            transfer_failures,
            self.cancel.is_set() || sync_cancelled,
            start.elapsed().as_millis() as u64,
        )
    }

    fn write_summary(&self, summary: &RunSummary) -> PipelineResult<()> {
        std::fs::create_dir_all(&self.config.out_root)?;
        let path = self.config.out_root.join("run_summary.json");
        summary.write_to_file(&path)?;
        if self.config.verbose {
            eprintln!("wrote {}", path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_map_to_config_exit_code() {
        let error = PipelineError::Config(ConfigError::MissingDestination);
        assert_eq!(error.exit_code(), 1);
    }

    #[test]
    fn remote_errors_map_to_remote_exit_code() {
        let error = PipelineError::Remote(StoreError::Auth("denied".to_string()));
        assert_eq!(error.exit_code(), 40);
    }

    #[test]
    fn mass_delete_refusal_maps_to_config_exit_code() {
        let error = PipelineError::Execute(ExecuteError::EmptyLocalMassDelete { deletes: 4 });
        assert_eq!(error.exit_code(), 1);
    }
}
