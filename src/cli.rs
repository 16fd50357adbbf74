//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Backend-for-Frontend OAuth2 broker with an authenticated upstream proxy
#[derive(Parser, Debug)]
#[command(name = "bff-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "BFF_GATEWAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on (overrides the selected server's port)
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// Host to bind to (overrides the selected server's host)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "BFF_GATEWAY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "BFF_GATEWAY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to the BFF server)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start the BFF gateway (default)
    Serve,

    /// Start the downstream resource server
    Resource,
}
