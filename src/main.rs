//! eksform - Declarative EKS stack composition
//!
//! This is the main entry point for the eksform CLI.

mod cli;

use anyhow::Result;
use cli::commands::CommandContext;
use cli::{Cli, Commands, LogFormat};
use eksform::config::Config;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

/// Application version information
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration
    let config_result = Config::load(cli.config.as_ref());
    let config = config_result.as_ref().cloned().unwrap_or_default();

    init_logging(&cli, &config);

    if let Err(e) = config_result {
        tracing::warn!("Failed to load config, using defaults: {}", e);
    }
    if cli.verbosity() >= 2 {
        tracing::debug!("eksform v{}", VERSION);
    }

    // Create command context
    let mut ctx = CommandContext::new(&cli, config);

    // Execute the appropriate command
    let exit_code = match &cli.command {
        Commands::Plan(args) => args.execute(&mut ctx).await?,
        Commands::Apply(args) => args.execute(&mut ctx).await?,
        Commands::Destroy(args) => args.execute(&mut ctx).await?,
        Commands::Validate(args) => args.execute(&mut ctx).await?,
        Commands::Graph(args) => args.execute(&mut ctx).await?,
        Commands::Init(args) => args.execute(&mut ctx).await?,
        Commands::State(args) => args.execute(&mut ctx).await?,
    };

    std::process::exit(exit_code);
}

/// Initialize logging from verbosity and the logging section of the config.
///
/// Diagnostics go to stderr so `--output json` documents stay parseable.
fn init_logging(cli: &Cli, config: &Config) {
    let verbosity = cli.verbosity();
    let filter = match verbosity {
        0 => config.logging.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let json = match cli.log_format {
        Some(format) => format == LogFormat::Json,
        None => config.logging.log_format.eq_ignore_ascii_case("json"),
    };

    let stderr_layer: Box<dyn Layer<Registry> + Send + Sync> = if json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(verbosity >= 3)
            .boxed()
    };

    let file_layer = config.logging.log_path.as_ref().and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file))),
            Err(e) => {
                eprintln!("Warning: cannot open log file {}: {}", path.display(), e);
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .with(env_filter)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
