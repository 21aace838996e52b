//! crossdock CLI
//!
//! Entry point for the `crossdock` command-line tool.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use crossdock::config::{CliOverrides, FileConfig, RunConfig};
use crossdock::pipeline::Pipeline;
use crossdock::registry::TargetRegistry;
use crossdock::signal::{self, CancelFlag};
use crossdock::summary::RunSummary;

#[derive(Parser)]
#[command(name = "crossdock")]
#[command(about = "Cross-compile per-target binaries and sync them to remote object storage", version)]
struct Cli {
    /// Path to the config file (default: crossdock.toml when present)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Verbose progress output
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by the commands that talk to the remote store
#[derive(Args, Clone, Default)]
struct SyncArgs {
    /// Destination URL (`b2://bucket/prefix` or a local directory)
    #[arg(long)]
    dest: Option<String>,

    /// Delete remote objects absent from the local output tree
    #[arg(long)]
    delete_stale: bool,

    /// Confirm deleting against an empty local tree (dangerous)
    #[arg(long)]
    force_delete_all: bool,
}

#[derive(Args, Clone, Default)]
struct CommonArgs {
    /// Local output root
    #[arg(long)]
    out: Option<PathBuf>,

    /// Worker pool size for builds and transfers
    #[arg(long, short = 'j')]
    concurrency: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the selected targets, then sync the output tree
    Run {
        /// Targets to build: ids, comma-separated, or "all" (default)
        #[arg(long, short = 't', value_delimiter = ',')]
        targets: Vec<String>,

        /// Abort the whole run on the first build failure
        #[arg(long)]
        fail_fast: bool,

        #[command(flatten)]
        common: CommonArgs,

        #[command(flatten)]
        sync: SyncArgs,
    },

    /// Build the selected targets without touching the remote store
    Build {
        /// Targets to build: ids, comma-separated, or "all" (default)
        #[arg(long, short = 't', value_delimiter = ',')]
        targets: Vec<String>,

        /// Abort on the first build failure
        #[arg(long)]
        fail_fast: bool,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Sync an existing output tree without building
    Sync {
        #[command(flatten)]
        common: CommonArgs,

        #[command(flatten)]
        sync: SyncArgs,
    },

    /// Print the sync plan without executing it
    Plan {
        /// Output the plan as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        common: CommonArgs,

        #[command(flatten)]
        sync: SyncArgs,
    },

    /// List the configured targets
    Targets {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let file = match FileConfig::load(cli.config.as_deref()) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    };

    match cli.command {
        Commands::Run {
            targets,
            fail_fast,
            common,
            sync,
        } => {
            let pipeline = make_pipeline(&file, &common, Some(&sync), fail_fast, cli.verbose);
            match pipeline.run(&targets) {
                Ok(summary) => finish(summary),
                Err(e) => fail(e),
            }
        }
        Commands::Build {
            targets,
            fail_fast,
            common,
        } => {
            let pipeline = make_pipeline(&file, &common, None, fail_fast, cli.verbose);
            match pipeline.build_only(&targets) {
                Ok(summary) => finish(summary),
                Err(e) => fail(e),
            }
        }
        Commands::Sync { common, sync } => {
            let pipeline = make_pipeline(&file, &common, Some(&sync), false, cli.verbose);
            match pipeline.sync_only() {
                Ok(summary) => finish(summary),
                Err(e) => fail(e),
            }
        }
        Commands::Plan { json, common, sync } => {
            let pipeline = make_pipeline(&file, &common, Some(&sync), false, cli.verbose);
            match pipeline.plan_only() {
                Ok((plan, local, remote)) => {
                    if json {
                        match serde_json::to_string_pretty(&plan) {
                            Ok(out) => println!("{}", out),
                            Err(e) => {
                                eprintln!("Error serializing plan: {}", e);
                                process::exit(1);
                            }
                        }
                    } else {
                        println!(
                            "Local: {} file(s). Remote: {} object(s).",
                            local.len(),
                            remote.len()
                        );
                        if let Ok(digest) = local.root_sha256() {
                            println!("Local manifest root: {}", digest);
                        }
                        println!("Plan: {}", plan.describe());
                        for path in &plan.uploads {
                            println!("  upload {}", path);
                        }
                        for path in &plan.deletes {
                            println!("  delete {}", path);
                        }
                    }
                    process::exit(0);
                }
                Err(e) => fail(e),
            }
        }
        Commands::Targets { json } => {
            run_targets(&file, json);
        }
    }
}

/// Assemble the pipeline from the config layers, exiting on invalid input.
fn make_pipeline(
    file: &FileConfig,
    common: &CommonArgs,
    sync: Option<&SyncArgs>,
    fail_fast: bool,
    verbose: bool,
) -> Pipeline {
    let overrides = CliOverrides {
        out_root: common.out.clone(),
        destination: sync.and_then(|s| s.dest.clone()),
        delete_stale: sync.map(|s| s.delete_stale).unwrap_or(false),
        force_delete_all: sync.map(|s| s.force_delete_all).unwrap_or(false),
        concurrency: common.concurrency,
        fail_fast,
        verbose,
    };

    let config = match RunConfig::resolve(file, &overrides) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    };

    let registry = if file.targets.is_empty() {
        TargetRegistry::builtin()
    } else {
        match TargetRegistry::from_specs(file.targets.clone()) {
            Ok(registry) => registry,
            Err(e) => {
                eprintln!("Configuration error: {}", e);
                process::exit(1);
            }
        }
    };

    let cancel = CancelFlag::new();
    if let Err(e) = signal::install_handler(cancel.clone()) {
        eprintln!("Warning: could not install signal handler: {}", e);
    }

    Pipeline::new(config, registry, cancel)
}

fn run_targets(file: &FileConfig, json_output: bool) {
    let registry = if file.targets.is_empty() {
        TargetRegistry::builtin()
    } else {
        match TargetRegistry::from_specs(file.targets.clone()) {
            Ok(registry) => registry,
            Err(e) => {
                eprintln!("Configuration error: {}", e);
                process::exit(1);
            }
        }
    };

    if json_output {
        match serde_json::to_string_pretty(registry.targets()) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Error serializing targets: {}", e);
                process::exit(1);
            }
        }
    } else {
        println!("Configured targets ({} total):\n", registry.targets().len());
        for target in registry.targets() {
            println!("  {} -> {}/", target.id, target.output_subdir);
        }
    }
    process::exit(0);
}

/// Print the human summary and exit with its aggregated code.
fn finish(summary: RunSummary) -> ! {
    println!("{}", summary.human_summary);
    for failure in &summary.targets_failed {
        eprintln!("  target {}: {}", failure.target_id, failure.error);
    }
    for failure in &summary.transfer_failures {
        eprintln!("  path {}: {}", failure.path, failure.error);
    }
    process::exit(summary.exit_code);
}

fn fail(error: crossdock::pipeline::PipelineError) -> ! {
    eprintln!("Error: {}", error);
    process::exit(error.exit_code());
}
