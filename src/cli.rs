//! Command-line interface definition for mcplex
//!
//! This module defines the CLI structure using clap's derive API. Every
//! subcommand runs against the servers in the configuration file plus the
//! records of the user selected with `--user`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// mcplex - Model Context Protocol multiplexer
///
/// Connect to the configured MCP servers and inspect or invoke their
/// tools, resources and prompts.
#[derive(Parser, Debug, Clone)]
#[command(name = "mcplex")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    ///
    /// Falls back to `MCPLEX_CONFIG`, then the platform config directory.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Also connect this user's servers
    #[arg(short, long, env = "MCPLEX_USER")]
    pub user: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for mcplex
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Show connection status of every server
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List tools across servers
    Tools {
        #[command(flatten)]
        listing: ListingArgs,
    },

    /// List resources across servers
    Resources {
        #[command(flatten)]
        listing: ListingArgs,
    },

    /// List prompts across servers
    Prompts {
        #[command(flatten)]
        listing: ListingArgs,
    },

    /// Call a tool
    Call {
        /// Tool name
        name: String,

        /// Server to call; defaults to the first server exposing the tool
        #[arg(short, long)]
        server: Option<String>,

        /// Tool arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,

        /// Print the raw JSON result
        #[arg(long)]
        json: bool,
    },

    /// Read a resource
    Read {
        /// Resource URI
        uri: String,

        /// Server to read from; defaults to the first server listing the URI
        #[arg(short, long)]
        server: Option<String>,
    },

    /// Render a prompt
    Prompt {
        /// Prompt name
        name: String,

        /// Server to ask; defaults to the first server exposing the prompt
        #[arg(short, long)]
        server: Option<String>,

        /// Prompt argument as KEY=VALUE (repeatable)
        #[arg(short, long = "arg", value_name = "KEY=VALUE")]
        args: Vec<String>,
    },
}

/// Options shared by the listing commands
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ListingArgs {
    /// Only list this server
    #[arg(short, long)]
    pub server: Option<String>,

    /// Bypass cached listings
    #[arg(long)]
    pub refresh: bool,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
