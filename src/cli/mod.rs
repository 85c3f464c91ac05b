//! CLI module for eksform
//!
//! Argument parsing, shared command context and subcommand handling.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// eksform - Declarative EKS stack planner
///
/// Builds the unit dependency graph for an EKS stack, validates it, diffs it
/// against recorded state and applies it through a provider.
#[derive(Parser, Debug, Clone)]
#[command(name = "eksform")]
#[command(author = "eksform Contributors")]
#[command(version)]
#[command(about = "Declarative EKS stack planner", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Stack variables file
    #[arg(short = 's', long, global = true, env = "EKSFORM_STACK")]
    pub stack: Option<PathBuf>,

    /// State file
    #[arg(long, global = true, env = "EKSFORM_STATE")]
    pub state: Option<PathBuf>,

    /// Stack variable overrides (key=value or @file.yml)
    #[arg(short = 'e', long = "var", global = true, action = clap::ArgAction::Append)]
    pub extra_vars: Vec<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(long, global = true, default_value = "human")]
    pub output: OutputFormat,

    /// Units reconciled concurrently within a wave
    #[arg(short = 'p', long, global = true)]
    pub parallelism: Option<usize>,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true, env = "EKSFORM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format for diagnostics on stderr
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output with colors
    #[default]
    Human,
    /// JSON output for scripting
    Json,
}

/// Diagnostic log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Show what apply would change
    Plan(commands::plan::PlanArgs),

    /// Reconcile the stack with recorded state
    Apply(commands::apply::ApplyArgs),

    /// Delete every recorded unit
    Destroy(commands::destroy::DestroyArgs),

    /// Validate the stack without reading state
    Validate(commands::validate::ValidateArgs),

    /// Print the unit dependency graph
    Graph(commands::graph::GraphArgs),

    /// Write a sample stack file
    Init(commands::init::InitArgs),

    /// Inspect recorded state
    State(commands::state::StateArgs),
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }

    /// Check if JSON output is requested
    pub fn is_json(&self) -> bool {
        matches!(self.output, OutputFormat::Json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["eksform", "plan"]).unwrap();
        assert!(matches!(cli.command, Commands::Plan(_)));
    }

    #[test]
    fn test_verbosity() {
        let cli = Cli::try_parse_from(["eksform", "-vvvv", "apply"]).unwrap();
        assert_eq!(cli.verbosity(), 3);
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::try_parse_from([
            "eksform",
            "plan",
            "-e",
            "node_group.scaling.desired_size=3",
            "-e",
            "@overrides.yml",
        ])
        .unwrap();
        assert_eq!(cli.extra_vars.len(), 2);
    }

    #[test]
    fn test_state_subcommand() {
        let cli = Cli::try_parse_from(["eksform", "state", "show", "vpc"]).unwrap();
        assert!(matches!(cli.command, Commands::State(_)));
    }
}
