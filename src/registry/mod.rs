//! Target registry
//!
//! The fixed set of platforms a run may build for. Targets come from
//! `[[target]]` entries in crossdock.toml, or from the built-in set when
//! the file defines none. The registry is validated once at startup and
//! read-only afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::config::ConfigError;

/// One target platform and its build parameters.
///
/// `{id}` in `build_args` and `artifacts` is substituted with the target id
/// at invocation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    /// Platform/architecture identifier, unique within the registry
    pub id: String,

    /// Arguments passed to the toolchain, in order
    pub build_args: Vec<String>,

    /// Subdirectory of the output tree this target's artifacts land in
    pub output_subdir: String,

    /// Glob patterns (relative to the work dir) the toolchain must have
    /// deposited after a successful invocation
    #[serde(default)]
    pub artifacts: Vec<String>,
}

impl TargetSpec {
    /// Substitute `{id}` into a pattern or argument
    pub fn expand(&self, template: &str) -> String {
        template.replace("{id}", &self.id)
    }
}

/// Validated, ordered target registry
#[derive(Debug, Clone)]
pub struct TargetRegistry {
    targets: Vec<TargetSpec>,
}

impl TargetRegistry {
    /// Build a registry from explicit specs, validating uniqueness and
    /// completeness.
    pub fn from_specs(targets: Vec<TargetSpec>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for target in &targets {
            if !seen.insert(target.id.clone()) {
                return Err(ConfigError::DuplicateTarget(target.id.clone()));
            }
            if target.build_args.is_empty() {
                return Err(ConfigError::EmptyBuildArgs(target.id.clone()));
            }
            if target.artifacts.is_empty() {
                return Err(ConfigError::EmptyArtifacts(target.id.clone()));
            }
        }
        Ok(Self { targets })
    }

    /// The built-in registry used when crossdock.toml defines no targets.
    pub fn builtin() -> Self {
        let triples = [
            ("x86_64-unknown-linux-gnu", "linux-x64"),
            ("aarch64-unknown-linux-gnu", "linux-arm64"),
            ("x86_64-pc-windows-gnu", "windows-x64"),
            ("x86_64-apple-darwin", "macos-x64"),
            ("aarch64-apple-darwin", "macos-arm64"),
        ];
        let targets = triples
            .iter()
            .map(|(id, subdir)| TargetSpec {
                id: id.to_string(),
                build_args: vec![
                    "build".to_string(),
                    "--release".to_string(),
                    "--target".to_string(),
                    "{id}".to_string(),
                ],
                output_subdir: subdir.to_string(),
                artifacts: vec!["target/{id}/release/*".to_string()],
            })
            .collect();
        // The builtin set is known-valid; from_specs cannot fail on it.
        Self { targets }
    }

    /// All targets, in declaration order
    pub fn targets(&self) -> &[TargetSpec] {
        &self.targets
    }

    /// Look up a single target by id
    pub fn get(&self, id: &str) -> Option<&TargetSpec> {
        self.targets.iter().find(|t| t.id == id)
    }

    /// Select a subset by id. An empty filter (or the literal "all")
    /// selects every target; unknown ids fail.
    pub fn select(&self, filter: &[String]) -> Result<Vec<TargetSpec>, ConfigError> {
        if filter.is_empty() || (filter.len() == 1 && filter[0] == "all") {
            return Ok(self.targets.clone());
        }
        let mut selected = Vec::with_capacity(filter.len());
        for id in filter {
            match self.get(id) {
                Some(target) => selected.push(target.clone()),
                None => return Err(ConfigError::UnknownTarget(id.clone())),
            }
        }
        Ok(selected)
    }
}
