//! mcplex - Model Context Protocol multiplexer CLI
//!
#![doc = "Main entry point for the mcplex command-line client."]

use anyhow::{Context, Result};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcplex::cli::Cli;
use mcplex::commands;
use mcplex::config::{resolve_config_path, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose, cli.json_logs);

    // Load configuration
    let config_path = resolve_config_path(cli.config.as_deref());
    tracing::debug!("Loading configuration from {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    // Validate configuration
    config.validate()?;

    if let Some(user) = &cli.user {
        tracing::debug!("Including servers for user {}", user);
    }
    commands::run(config, cli.user, cli.command).await
}

/// Initialize tracing subscriber with environment filter
///
/// Logs go to stderr so command output on stdout stays machine-readable.
fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "mcplex=debug" } else { "mcplex=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
