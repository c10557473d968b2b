//! Commands that act on a server: `call`, `read`, `prompt`
//!
//! When no `--server` is given the first connected server exposing the
//! tool, resource or prompt is used.

use std::collections::HashMap;

use anyhow::{anyhow, bail, Result};
use colored::Colorize;
use serde_json::Value;

use crate::manager::SessionManager;
use crate::types::{Content, ResourceContents, Role};

/// Call a tool and print its content
///
/// # Errors
///
/// Fails when the call fails or the tool reports `isError`.
pub async fn call_tool(
    manager: &SessionManager,
    name: &str,
    server: Option<&str>,
    arguments: Value,
    json: bool,
) -> Result<()> {
    let result = match server {
        Some(server) => manager.call_tool(server, name, arguments).await?,
        None => manager.call_tool_by_name(name, arguments).await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for content in &result.content {
            print_content(content);
        }
    }

    if result.is_error {
        bail!("tool '{}' reported an error", name);
    }
    Ok(())
}

/// Read a resource and print its contents
pub async fn read_resource(manager: &SessionManager, uri: &str, server: Option<&str>) -> Result<()> {
    let server = match server {
        Some(server) => server.to_string(),
        None => manager
            .find_resource(uri)
            .await
            .map(|entry| entry.server_id)
            .ok_or_else(|| anyhow!("no connected server lists resource '{}'", uri))?,
    };

    for contents in manager.read_resource(&server, uri).await? {
        match contents {
            ResourceContents::Text(text) => println!("{}", text.text),
            ResourceContents::Blob(blob) => println!(
                "{}",
                format!(
                    "[binary {} ({} base64 bytes)]",
                    blob.mime_type.as_deref().unwrap_or("application/octet-stream"),
                    blob.blob.len()
                )
                .dimmed()
            ),
        }
    }
    Ok(())
}

/// Render a prompt and print its messages
pub async fn get_prompt(
    manager: &SessionManager,
    name: &str,
    server: Option<&str>,
    arguments: HashMap<String, String>,
) -> Result<()> {
    let server = match server {
        Some(server) => server.to_string(),
        None => manager
            .find_prompt(name)
            .await
            .map(|entry| entry.server_id)
            .ok_or_else(|| anyhow!("no connected server exposes prompt '{}'", name))?,
    };

    let prompt = manager.get_prompt(&server, name, arguments).await?;
    if let Some(description) = &prompt.description {
        println!("{}\n", description.dimmed());
    }
    for message in &prompt.messages {
        let role = match message.role {
            Role::User => "user".cyan(),
            Role::Assistant => "assistant".green(),
        };
        println!("{}:", role.bold());
        print_content(&message.content);
    }
    Ok(())
}

fn print_content(content: &Content) {
    match content {
        Content::Text { text } => println!("{}", text),
        Content::Image { mime_type, .. } => println!("{}", format!("[image {}]", mime_type).dimmed()),
        Content::Audio { mime_type, .. } => println!("{}", format!("[audio {}]", mime_type).dimmed()),
        Content::Resource { resource } => println!("{}", format!("[resource {}]", resource.uri()).dimmed()),
    }
}

/// Parse repeated `KEY=VALUE` prompt arguments
///
/// # Errors
///
/// Fails on an entry without `=` or with an empty key.
pub fn parse_prompt_args(args: &[String]) -> Result<HashMap<String, String>> {
    args.iter()
        .map(|arg| match arg.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(anyhow!("prompt argument must be KEY=VALUE, got '{}'", arg)),
        })
        .collect()
}
