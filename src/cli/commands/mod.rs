//! Subcommands module for eksform CLI
//!
//! This module contains all the subcommand implementations.

pub mod apply;
pub mod destroy;
pub mod graph;
pub mod init;
pub mod plan;
pub mod state;
pub mod validate;

use crate::cli::output::OutputFormatter;
use anyhow::Result;
use eksform::config::Config;
use eksform::context::{ProviderContext, CONTEXT_UNIT};
use eksform::engine::{Engine, EngineConfig, SimulatedProvider};
use eksform::error::Error;
use eksform::planner::{Blueprint, Planner};
use eksform::stack::StackConfig;
use eksform::state::{JsonPersistence, StateManager, StateRecord};
use std::path::PathBuf;
use std::sync::Arc;

/// Common context shared between commands
pub struct CommandContext {
    /// Configuration
    pub config: Config,
    /// Output formatter
    pub output: OutputFormatter,
    /// Stack file path from the command line
    pub stack_path: Option<PathBuf>,
    /// State file path from the command line
    pub state_path: Option<PathBuf>,
    /// Stack variable overrides
    pub extra_vars: Vec<String>,
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &crate::cli::Cli, mut config: Config) -> Self {
        let use_color = !cli.no_color && config.colors.enabled;
        let output = OutputFormatter::new(use_color, cli.is_json(), cli.verbosity());
        if let Some(parallelism) = cli.parallelism {
            config.defaults.parallelism = parallelism.max(1);
        }

        Self {
            config,
            output,
            stack_path: cli.stack.clone(),
            state_path: cli.state.clone(),
            extra_vars: cli.extra_vars.clone(),
        }
    }

    /// Effective stack file
    pub fn stack_file(&self) -> PathBuf {
        self.stack_path
            .clone()
            .unwrap_or_else(|| self.config.defaults.stack_file.clone())
    }

    /// Effective state file
    pub fn state_file(&self) -> PathBuf {
        self.state_path
            .clone()
            .unwrap_or_else(|| self.config.defaults.state_path.clone())
    }

    /// Load the stack file with `-e` overrides applied
    pub fn load_stack(&self) -> eksform::Result<StackConfig> {
        let path = self.stack_file();
        self.output
            .info(&format!("Loading stack from {}", path.display()));
        StackConfig::load(&path)?.apply_overrides(&self.extra_vars)
    }

    /// Load the stack and plan its units
    pub fn blueprint(&self) -> eksform::Result<Blueprint> {
        let stack = self.load_stack()?;
        Planner::build(&stack)
    }

    /// Open the state file
    pub fn open_state(&self) -> eksform::Result<Arc<StateManager>> {
        let persistence =
            JsonPersistence::new(self.state_file())?.with_backup(self.config.defaults.state_backup);
        Ok(Arc::new(StateManager::with_persistence(Box::new(persistence))?))
    }

    /// Engine over the simulated provider
    pub fn engine(&self, context: ProviderContext, state: Arc<StateManager>) -> Engine {
        let provider = Arc::new(SimulatedProvider::new(context));
        Engine::new(provider, state).with_config(EngineConfig::from_config(&self.config))
    }

    /// Caller identity recorded by the context unit, for runs that do not
    /// load the stack file
    pub fn recorded_provider(&self, state: &StateRecord) -> Option<ProviderContext> {
        let outputs = &state.get(CONTEXT_UNIT)?.outputs;
        let field = |key: &str| outputs.get(key).and_then(|v| v.as_str());
        Some(ProviderContext::new(
            field("region")?,
            field("account_id")?,
            field("caller_arn")?,
        ))
    }

    /// Report a library error and map it to an exit code
    pub fn fail(&self, error: &Error) -> Result<i32> {
        self.output.error(&error.to_string());
        if let Error::Lockout { .. } = error {
            self.output.hint(
                "add an access entry with AmazonEKSClusterAdminPolicy at cluster scope, or enable bootstrap_cluster_creator_admin_permissions",
            );
        }
        Ok(error.exit_code())
    }
}
