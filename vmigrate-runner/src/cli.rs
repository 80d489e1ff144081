//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// vmigrate - migration validation harness tooling
#[derive(Debug, Parser)]
#[command(name = "vmigrate")]
#[command(about = "Validate migration plans and clean up resources left by test sessions")]
#[command(long_about = r"
EXAMPLES:
  # Check a plan before handing it to a test run
  vmigrate validate-plan plans/rhel9-warm.yaml

  # Delete everything a crashed session left behind
  vmigrate cleanup --socket /tmp/kubectl-proxy.sock --tracking resources.json

CONFIGURATION:
  Precedence: CLI flags > --config TOML file > defaults.
  Set RUST_LOG to change verbosity (default: vmigrate=info).
")]
#[command(version)]
pub struct Cli {
    /// Executor configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Seconds between samples of every poll
    #[arg(long, global = true)]
    pub poll_interval_secs: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Parse and validate a migration plan (JSON, or YAML for any other extension)
    ValidatePlan {
        /// Plan file
        file: PathBuf,
    },

    /// Tear down the resources listed in a tracking file
    Cleanup {
        /// Unix socket served by `kubectl proxy --unix-socket`
        #[arg(long)]
        socket: PathBuf,

        /// Tracking file to consume (defaults to the configured `tracking_file`)
        #[arg(long)]
        tracking: Option<PathBuf>,

        /// Seconds to wait for each object to disappear
        #[arg(long)]
        deletion_timeout_secs: Option<u64>,
    },

    /// Print the effective executor configuration as TOML
    ShowConfig,
}
