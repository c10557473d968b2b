//! Command handlers for the mcplex CLI
//!
//! Every handler receives a connected [`SessionManager`]; [`open_session`]
//! builds one from the loaded configuration and [`run`] dispatches a parsed
//! command and shuts the session down afterwards.

pub mod inspect;
pub mod invoke;

use anyhow::{Context, Result};
use colored::Colorize;

use crate::cli::Commands;
use crate::config::Config;
use crate::manager::SessionManager;

/// Build a session manager and connect the system servers plus `user`'s.
///
/// Servers that fail to connect are reported on stderr; they do not stop
/// the command.
pub async fn open_session(config: &Config, user: Option<&str>) -> SessionManager {
    let manager = SessionManager::from_config(config);
    let summary = manager.initialize(user).await;
    for (id, error) in &summary.failed {
        eprintln!("{} {}: {}", "warning:".yellow(), id, error);
    }
    manager
}

/// Execute `command` against a fresh session.
///
/// # Errors
///
/// Returns the command's error after the session has been shut down.
pub async fn run(config: Config, user: Option<String>, command: Commands) -> Result<()> {
    let manager = open_session(&config, user.as_deref()).await;
    let outcome = dispatch(&manager, command).await;
    manager.shutdown().await;
    outcome
}

async fn dispatch(manager: &SessionManager, command: Commands) -> Result<()> {
    match command {
        Commands::Status { json } => inspect::show_status(manager, json).await,
        Commands::Tools { listing } => inspect::list_tools(manager, &listing).await,
        Commands::Resources { listing } => inspect::list_resources(manager, &listing).await,
        Commands::Prompts { listing } => inspect::list_prompts(manager, &listing).await,
        Commands::Call {
            name,
            server,
            args,
            json,
        } => {
            let arguments: serde_json::Value = serde_json::from_str(&args)
                .with_context(|| format!("--args is not valid JSON: {args}"))?;
            invoke::call_tool(manager, &name, server.as_deref(), arguments, json).await
        }
        Commands::Read { uri, server } => {
            invoke::read_resource(manager, &uri, server.as_deref()).await
        }
        Commands::Prompt { name, server, args } => {
            let arguments = invoke::parse_prompt_args(&args)?;
            invoke::get_prompt(manager, &name, server.as_deref(), arguments).await
        }
    }
}

/// Shorten `text` to at most `max` characters for table cells.
pub(crate) fn truncate(text: &str, max: usize) -> String {
    let first_line = text.lines().next().unwrap_or_default();
    if first_line.chars().count() > max {
        let cut: String = first_line.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        first_line.to_string()
    }
}
