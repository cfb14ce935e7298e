//! Command-line argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "registry-replicator")]
#[command(about = "Replicate images and charts between container registries")]
#[command(version, author)]
pub struct Args {
    /// Configuration file path
    #[arg(long = "config", short = 'c', global = true, help = "Path to a JSON configuration file")]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(long = "verbose", short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Quiet output
    #[arg(long = "quiet", short = 'q', global = true, conflicts_with = "verbose", help = "Only print errors")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the registry types an adapter is registered for
    Adapters,
    /// Check a policy file without contacting any registry
    Validate {
        /// Policy file in JSON
        policy: PathBuf,
    },
    /// Show what a registry supports
    Info {
        /// Registry file in JSON
        registry: PathBuf,
    },
    /// List what a policy would replicate right now
    Plan {
        /// Policy file in JSON
        policy: PathBuf,
    },
    /// Start a replication of a policy
    Run {
        /// Policy file in JSON
        policy: PathBuf,

        #[arg(long = "dry-run", short = 'n', help = "Plan and record the execution without submitting jobs")]
        dry_run: bool,
    },
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }
}
