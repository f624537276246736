use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "wpstack")]
#[command(version)]
#[command(about = "Provision a development WordPress host on Compute Engine", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Stack to operate on; selects the config file and the state snapshot
    #[arg(short, long, global = true, env = "WPSTACK_STACK", default_value = "dev")]
    pub stack: String,

    /// Stack configuration file (default: Stack.<stack>.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    /// Override a configuration value, e.g. --config wp:machineType=e2-medium
    #[arg(short = 'c', long = "config", global = true, value_name = "KEY=VALUE")]
    pub config: Vec<String>,

    /// Use a local simulated cloud instead of the Compute Engine API
    #[arg(long, global = true)]
    pub simulate: bool,

    /// Exit with 3 when the plan has no changes
    #[arg(long, global = true)]
    pub detailed_exitcode: bool,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what apply would change, without changing anything
    Preview(PreviewArgs),

    /// Create or update the stack's resources
    Apply(ApplyArgs),

    /// Delete every resource recorded for the stack
    Destroy(DestroyArgs),

    /// Print the stack's exported values
    Outputs(OutputsArgs),

    /// Remove a lock left behind by an interrupted run
    Unlock,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct PreviewArgs {
    /// Read live resources before planning
    #[arg(long)]
    pub refresh: bool,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Number of operations to run in parallel
    #[arg(short, long, default_value = "4")]
    pub jobs: usize,

    /// Read live resources before planning
    #[arg(long)]
    pub refresh: bool,
}

#[derive(Args)]
pub struct DestroyArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Number of operations to run in parallel
    #[arg(short, long, default_value = "4")]
    pub jobs: usize,
}

#[derive(Args)]
pub struct OutputsArgs {
    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}
