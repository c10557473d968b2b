//! Read-only commands: `status`, `tools`, `resources`, `prompts`

use anyhow::Result;
use colored::Colorize;
use prettytable::{format, row, Table};
use serde::Serialize;

use crate::cli::ListingArgs;
use crate::commands::truncate;
use crate::manager::{ServerStatus, SessionManager};

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn keep(listing: &ListingArgs, server_id: &str) -> bool {
    listing.server.as_deref().map_or(true, |s| s == server_id)
}

/// Print per-server status and totals
pub async fn show_status(manager: &SessionManager, json: bool) -> Result<()> {
    let status = manager.status().await;
    if json {
        return print_json(&status);
    }

    if status.servers.is_empty() {
        println!("{}", "No MCP servers configured.".yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row![
        "Server".bold(),
        "Transport".bold(),
        "State".bold(),
        "Protocol".bold(),
        "Tools".bold(),
        "Resources".bold(),
        "Prompts".bold()
    ]);
    for server in &status.servers {
        table.add_row(row![
            server.id.cyan(),
            server.transport,
            state_cell(server),
            server.protocol_version.as_deref().unwrap_or("-"),
            count_cell(server.tools.as_ref()),
            count_cell(server.resources.as_ref()),
            count_cell(server.prompts.as_ref())
        ]);
    }

    println!("\nMCP servers:");
    table.printstd();
    println!(
        "\n{}/{} connected, {} tools, {} resources, {} prompts\n",
        status.connected_servers,
        status.total_servers,
        status.total_tools,
        status.total_resources,
        status.total_prompts
    );

    for server in status.servers.iter().filter(|s| s.last_error.is_some()) {
        if let Some(error) = &server.last_error {
            println!("{} {}: {}", "error".red(), server.id, error);
        }
    }
    Ok(())
}

fn state_cell(server: &ServerStatus) -> String {
    if server.connected {
        server.state.green().to_string()
    } else {
        server.state.red().to_string()
    }
}

fn count_cell<T>(items: Option<&Vec<T>>) -> String {
    items.map_or_else(|| "-".to_string(), |items| items.len().to_string())
}

/// Print the tools of every connected server
pub async fn list_tools(manager: &SessionManager, listing: &ListingArgs) -> Result<()> {
    let tools: Vec<_> = manager
        .list_all_tools(listing.refresh)
        .await
        .into_iter()
        .filter(|t| keep(listing, &t.server_id))
        .collect();
    if listing.json {
        return print_json(&tools);
    }
    if tools.is_empty() {
        println!("{}", "No tools available.".yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row!["Server".bold(), "Tool".bold(), "Description".bold()]);
    for entry in &tools {
        table.add_row(row![
            entry.server_id.cyan(),
            entry.tool.name,
            truncate(entry.tool.description.as_deref().unwrap_or(""), 60)
        ]);
    }
    println!("\nTools:");
    table.printstd();
    println!();
    Ok(())
}

/// Print the resources of every connected server
pub async fn list_resources(manager: &SessionManager, listing: &ListingArgs) -> Result<()> {
    let resources: Vec<_> = manager
        .list_all_resources(listing.refresh)
        .await
        .into_iter()
        .filter(|r| keep(listing, &r.server_id))
        .collect();
    if listing.json {
        return print_json(&resources);
    }
    if resources.is_empty() {
        println!("{}", "No resources available.".yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row![
        "Server".bold(),
        "URI".bold(),
        "Name".bold(),
        "MIME type".bold()
    ]);
    for entry in &resources {
        table.add_row(row![
            entry.server_id.cyan(),
            entry.resource.uri,
            entry.resource.name,
            entry.resource.mime_type.as_deref().unwrap_or("-")
        ]);
    }
    println!("\nResources:");
    table.printstd();
    println!();
    Ok(())
}

/// Print the prompts of every connected server
pub async fn list_prompts(manager: &SessionManager, listing: &ListingArgs) -> Result<()> {
    let prompts: Vec<_> = manager
        .list_all_prompts(listing.refresh)
        .await
        .into_iter()
        .filter(|p| keep(listing, &p.server_id))
        .collect();
    if listing.json {
        return print_json(&prompts);
    }
    if prompts.is_empty() {
        println!("{}", "No prompts available.".yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row![
        "Server".bold(),
        "Prompt".bold(),
        "Arguments".bold(),
        "Description".bold()
    ]);
    for entry in &prompts {
        let arguments = entry
            .prompt
            .arguments
            .iter()
            .map(|a| {
                if a.required {
                    format!("{}*", a.name)
                } else {
                    a.name.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(row![
            entry.server_id.cyan(),
            entry.prompt.name,
            arguments,
            truncate(entry.prompt.description.as_deref().unwrap_or(""), 50)
        ]);
    }
    println!("\nPrompts:");
    table.printstd();
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keep_filters_by_server() {
        let all = ListingArgs::default();
        assert!(keep(&all, "files"));

        let only = ListingArgs {
            server: Some("files".to_string()),
            ..ListingArgs::default()
        };
        assert!(keep(&only, "files"));
        assert!(!keep(&only, "search"));
    }

    #[test]
    fn test_count_cell() {
        assert_eq!(count_cell::<u8>(None), "-");
        assert_eq!(count_cell(Some(&vec![1, 2, 3])), "3");
    }
}
