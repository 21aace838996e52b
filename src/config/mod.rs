//! Run configuration
//!
//! Three-layer merge: built-in defaults, then the optional `crossdock.toml`
//! project file, then CLI flags. The merged result is an explicit value
//! passed into each component at construction; nothing reads ambient
//! globals after startup.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::registry::TargetSpec;

/// Default project config file name
pub const DEFAULT_CONFIG_FILE: &str = "crossdock.toml";

/// Default transfer/build concurrency
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Default upload retry ceiling (attempts per path)
pub const DEFAULT_RETRY_LIMIT: u32 = 3;

/// Configuration errors - all fatal, aborted before any work
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Duplicate target id: '{0}'")]
    DuplicateTarget(String),

    #[error("Target '{0}': build_args must not be empty")]
    EmptyBuildArgs(String),

    #[error("Target '{0}': artifacts must not be empty")]
    EmptyArtifacts(String),

    #[error("Unknown target: '{0}'")]
    UnknownTarget(String),

    #[error("No destination configured: pass --dest or set [sync].destination")]
    MissingDestination,
}

/// `[build]` section of crossdock.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSection {
    /// Toolchain executable invoked once per target
    #[serde(default = "default_program")]
    pub program: String,

    /// Directory the toolchain runs in (default: current directory)
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Root of the canonical local output tree
    #[serde(default = "default_out_root")]
    pub out_root: PathBuf,
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            program: default_program(),
            work_dir: default_work_dir(),
            out_root: default_out_root(),
        }
    }
}

fn default_program() -> String {
    "cross".to_string()
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_out_root() -> PathBuf {
    PathBuf::from("dist")
}

/// `[sync]` section of crossdock.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSection {
    /// Destination URL (`b2://bucket/prefix` or a local directory)
    pub destination: Option<String>,

    /// Delete remote-only objects (default: leave them untouched)
    #[serde(default)]
    pub delete_stale: bool,

    /// Worker pool size for builds and transfers
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Upload attempts per path before recording a permanent failure
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            destination: None,
            delete_stale: false,
            concurrency: default_concurrency(),
            retry_limit: default_retry_limit(),
        }
    }
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_retry_limit() -> u32 {
    DEFAULT_RETRY_LIMIT
}

/// Parsed crossdock.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    /// Build settings
    #[serde(default)]
    pub build: BuildSection,

    /// Sync settings
    #[serde(default)]
    pub sync: SyncSection,

    /// Target definitions; when absent the built-in registry applies
    #[serde(default, rename = "target")]
    pub targets: Vec<TargetSpec>,
}

impl FileConfig {
    /// Load and parse a crossdock.toml file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse from a TOML string
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let config: FileConfig = toml::from_str(s)?;
        Ok(config)
    }

    /// Load the file at `path` if given, else `crossdock.toml` if present,
    /// else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::from_file(p),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

/// CLI-level overrides applied on top of the file config
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub out_root: Option<PathBuf>,
    pub destination: Option<String>,
    pub delete_stale: bool,
    pub force_delete_all: bool,
    pub concurrency: Option<usize>,
    pub fail_fast: bool,
    pub verbose: bool,
}

/// Effective run configuration after the layer merge
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub program: String,
    pub work_dir: PathBuf,
    pub out_root: PathBuf,
    pub destination: Option<String>,
    pub delete_stale: bool,
    pub force_delete_all: bool,
    pub concurrency: usize,
    pub retry_limit: u32,
    pub fail_fast: bool,
    pub verbose: bool,
}

impl RunConfig {
    /// Merge file config and CLI overrides, then validate.
    pub fn resolve(file: &FileConfig, cli: &CliOverrides) -> Result<Self, ConfigError> {
        let config = Self {
            program: file.build.program.clone(),
            work_dir: file.build.work_dir.clone(),
            out_root: cli
                .out_root
                .clone()
                .unwrap_or_else(|| file.build.out_root.clone()),
            destination: cli
                .destination
                .clone()
                .or_else(|| file.sync.destination.clone()),
            delete_stale: cli.delete_stale || file.sync.delete_stale,
            force_delete_all: cli.force_delete_all,
            concurrency: cli.concurrency.unwrap_or(file.sync.concurrency),
            retry_limit: file.sync.retry_limit,
            fail_fast: cli.fail_fast,
            verbose: cli.verbose,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate merged values
    fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 || self.concurrency > 64 {
            return Err(ConfigError::Validation(
                "concurrency must be in (0, 64]".to_string(),
            ));
        }
        if self.retry_limit == 0 || self.retry_limit > 10 {
            return Err(ConfigError::Validation(
                "retry_limit must be in (0, 10]".to_string(),
            ));
        }
        if self.program.is_empty() {
            return Err(ConfigError::Validation(
                "build.program must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Destination URL, or the error sync commands report when none is set
    pub fn destination(&self) -> Result<&str, ConfigError> {
        self.destination
            .as_deref()
            .ok_or(ConfigError::MissingDestination)
    }
}
