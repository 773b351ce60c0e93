//! CLI parse: clap types for lode. No behavior; definitions only.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// lode CLI - Track large data artifacts with granular Merkle trees
#[derive(Parser)]
#[command(name = "lode")]
#[command(about = "Content-addressed tracking of large data artifacts", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace directory (any directory inside it)
    #[arg(long, global = true, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (default: warnings only)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long, global = true)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

/// Which units an operation applies to
#[derive(Args, Debug, Clone, Default)]
pub struct SelectionArgs {
    /// Outputs, unit files, or paths inside outputs (default: every unit)
    pub targets: Vec<PathBuf>,

    /// Treat directory targets as "every unit below"
    #[arg(short = 'R', long)]
    pub recursive: bool,

    /// Include the units producing the targets' dependencies
    #[arg(long)]
    pub with_deps: bool,
}

/// Remote selection and parallelism
#[derive(Args, Debug, Clone, Default)]
pub struct TransferArgs {
    /// Remote name (default: core.default_remote)
    #[arg(short, long)]
    pub remote: Option<String>,

    /// Parallel transfers (default: core.jobs)
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a workspace in the current (or --workspace) directory
    Init,
    /// Start tracking files or directories, or record changes inside tracked ones
    Add {
        /// Paths to track
        #[arg(required = true)]
        targets: Vec<PathBuf>,
    },
    /// Record the working copy of tracked outputs
    Commit {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Keep the recorded state of outputs that no longer exist
        #[arg(long)]
        allow_missing: bool,
    },
    /// Materialize tracked content in the working copy
    Checkout {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Overwrite modified files
        #[arg(short, long)]
        force: bool,

        #[command(flatten)]
        transfer: TransferArgs,
    },
    /// Upload objects the remote lacks
    Push {
        #[command(flatten)]
        selection: SelectionArgs,

        #[command(flatten)]
        transfer: TransferArgs,
    },
    /// Download objects the cache lacks, without touching the working copy
    Fetch {
        #[command(flatten)]
        selection: SelectionArgs,

        #[command(flatten)]
        transfer: TransferArgs,
    },
    /// Fetch, then check out
    Pull {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Overwrite modified files
        #[arg(short, long)]
        force: bool,

        #[command(flatten)]
        transfer: TransferArgs,
    },
    /// Compare tracked outputs with their recorded state
    Status {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

impl Commands {
    /// Stable command name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Init => "init",
            Commands::Add { .. } => "add",
            Commands::Commit { .. } => "commit",
            Commands::Checkout { .. } => "checkout",
            Commands::Push { .. } => "push",
            Commands::Fetch { .. } => "fetch",
            Commands::Pull { .. } => "pull",
            Commands::Status { .. } => "status",
        }
    }
}
