//! Build driver
//!
//! Invokes the external cross-compilation toolchain once per target and
//! stages the declared artifacts into the canonical output tree at
//! `<out_root>/<output_subdir>/<file_name>`. The toolchain contract: after
//! a zero exit status, every artifact pattern of the target matches at
//! least one file under the work directory; anything else is a build
//! error for that target.
//!
//! Build failures are deterministic and never retried. Targets are fully
//! independent and run in parallel through the worker pool; by default one
//! broken target does not block the others.

use globset::{Glob, GlobMatcher};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use crate::pool;
use crate::registry::TargetSpec;
use crate::signal::CancelFlag;

/// Longest stderr excerpt carried in a build error
const STDERR_TAIL_BYTES: usize = 800;

/// What went wrong for one target
#[derive(Debug, thiserror::Error)]
pub enum BuildErrorKind {
    #[error("failed to invoke '{program}': {message}")]
    Spawn { program: String, message: String },

    #[error("toolchain exited with status {status}: {stderr_tail}")]
    ToolchainFailed { status: String, stderr_tail: String },

    #[error("no artifacts matched '{pattern}'")]
    NoArtifacts { pattern: String },

    #[error("invalid artifact pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error("staging failed: {0}")]
    Stage(String),
}

/// A failed build, tagged with its target
#[derive(Debug, thiserror::Error)]
#[error("target '{target_id}': {kind}")]
pub struct BuildError {
    /// The target whose invocation failed
    pub target_id: String,
    /// The cause
    pub kind: BuildErrorKind,
}

/// A successful build: where the artifacts landed
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    /// The target that built
    pub target_id: String,

    /// Staged paths, relative to the output root (`subdir/file_name`)
    pub staged: Vec<String>,

    /// Wall-clock build duration in milliseconds
    pub duration_ms: u64,
}

/// Drives toolchain invocations and artifact staging.
///
/// Holds no mutable state; concurrent `build` calls for different targets
/// share nothing but the filesystem, and each target stages into its own
/// output subdirectory.
#[derive(Debug, Clone)]
pub struct BuildDriver {
    program: String,
    work_dir: PathBuf,
    out_root: PathBuf,
    verbose: bool,
}

impl BuildDriver {
    /// Create a driver
    pub fn new(program: String, work_dir: PathBuf, out_root: PathBuf, verbose: bool) -> Self {
        Self {
            program,
            work_dir,
            out_root,
            verbose,
        }
    }

    /// Build one target: invoke the toolchain, then collect and stage its
    /// artifacts.
    pub fn build(&self, target: &TargetSpec) -> Result<BuildOutcome, BuildError> {
        let start = Instant::now();
        let fail = |kind| BuildError {
            target_id: target.id.clone(),
            kind,
        };

        let args: Vec<String> = target.build_args.iter().map(|a| target.expand(a)).collect();
        if self.verbose {
            eprintln!("[{}] {} {}", target.id, self.program, args.join(" "));
        }

        let output = Command::new(&self.program)
            .args(&args)
            .current_dir(&self.work_dir)
            .output()
            .map_err(|e| {
                fail(BuildErrorKind::Spawn {
                    program: self.program.clone(),
                    message: e.to_string(),
                })
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(fail(BuildErrorKind::ToolchainFailed {
                status: output
                    .status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                stderr_tail: tail(&stderr),
            }));
        }

        let staged = self.stage_artifacts(target)?;

        Ok(BuildOutcome {
            target_id: target.id.clone(),
            staged,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Build many targets through the worker pool.
    ///
    /// Returns one slot per target in input order: `Some(result)` for
    /// attempted targets, `None` for targets never started (cancellation,
    /// or an earlier failure under fail-fast).
    pub fn build_all(
        &self,
        targets: &[TargetSpec],
        concurrency: usize,
        fail_fast: bool,
        cancel: &CancelFlag,
    ) -> Vec<Option<Result<BuildOutcome, BuildError>>> {
        let stop = CancelFlag::new();
        let items: Vec<TargetSpec> = targets.to_vec();

        let results = pool::run_bounded(concurrency, items, &stop, |_, target| {
            if cancel.is_set() {
                stop.set();
                return None;
            }
            let result = self.build(&target);
            if result.is_err() && fail_fast {
                stop.set();
            }
            if self.verbose {
                match &result {
                    Ok(outcome) => eprintln!(
                        "[{}] built, {} artifact(s) staged",
                        target.id,
                        outcome.staged.len()
                    ),
                    Err(e) => eprintln!("[{}] failed: {}", target.id, e.kind),
                }
            }
            Some(result)
        });

        results.into_iter().map(Option::flatten).collect()
    }

    /// Resolve the target's artifact patterns and copy every match into
    /// `<out_root>/<output_subdir>/`. Every pattern must match at least
    /// one file.
    fn stage_artifacts(&self, target: &TargetSpec) -> Result<Vec<String>, BuildError> {
        let fail = |kind| BuildError {
            target_id: target.id.clone(),
            kind,
        };

        let dest_dir = self.out_root.join(&target.output_subdir);
        fs::create_dir_all(&dest_dir)
            .map_err(|e| fail(BuildErrorKind::Stage(e.to_string())))?;

        let mut staged = Vec::new();
        for raw_pattern in &target.artifacts {
            let pattern = target.expand(raw_pattern);
            let matched = self
                .resolve_pattern(&pattern)
                .map_err(|message| {
                    fail(BuildErrorKind::Pattern {
                        pattern: pattern.clone(),
                        message,
                    })
                })?;
            if matched.is_empty() {
                return Err(fail(BuildErrorKind::NoArtifacts { pattern }));
            }

            for source in matched {
                let file_name = source
                    .file_name()
                    .ok_or_else(|| {
                        fail(BuildErrorKind::Stage(format!(
                            "matched path has no file name: {}",
                            source.display()
                        )))
                    })?
                    .to_owned();
                let dest = dest_dir.join(&file_name);
                fs::copy(&source, &dest).map_err(|e| {
                    fail(BuildErrorKind::Stage(format!(
                        "copy {} -> {}: {}",
                        source.display(),
                        dest.display(),
                        e
                    )))
                })?;
                staged.push(format!(
                    "{}/{}",
                    target.output_subdir,
                    file_name.to_string_lossy()
                ));
            }
        }

        staged.sort();
        Ok(staged)
    }

    /// Files under the work dir matching one glob pattern, sorted.
    ///
    /// The walk starts from the pattern's longest literal directory prefix
    /// rather than the work-dir root; build trees are large and most of
    /// them can never match.
    fn resolve_pattern(&self, pattern: &str) -> Result<Vec<PathBuf>, String> {
        let matcher: GlobMatcher = Glob::new(pattern).map_err(|e| e.to_string())?.compile_matcher();

        let base = self.work_dir.join(literal_base(pattern));
        if !base.exists() {
            return Ok(Vec::new());
        }

        let mut matched = BTreeSet::new();
        for entry in walkdir::WalkDir::new(&base).follow_links(false) {
            let entry = entry.map_err(|e| e.to_string())?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(&self.work_dir) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            if matcher.is_match(rel) {
                matched.insert(entry.path().to_path_buf());
            }
        }
        Ok(matched.into_iter().collect())
    }
}

/// Longest directory prefix of a glob pattern containing no metacharacters
fn literal_base(pattern: &str) -> &Path {
    let meta = ['*', '?', '[', '{'];
    let prefix_end = pattern
        .split('/')
        .take_while(|part| !part.contains(meta))
        .map(|part| part.len() + 1)
        .sum::<usize>()
        .saturating_sub(1);
    // A pattern whose final component is literal keeps its parent as base
    let prefix = &pattern[..prefix_end.min(pattern.len())];
    let base = if prefix.len() == pattern.len() {
        Path::new(prefix).parent().unwrap_or(Path::new(""))
    } else {
        Path::new(prefix)
    };
    base
}

fn tail(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.len() <= STDERR_TAIL_BYTES {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - STDERR_TAIL_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &trimmed[start..])
}
