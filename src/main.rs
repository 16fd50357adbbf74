//! BFF Gateway - OAuth2 Backend-for-Frontend broker
//!
//! Runs either the BFF (`serve`, default) or the downstream resource server
//! (`resource`).

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use bff_gateway::{
    cli::{Cli, Command},
    config::Config,
    gateway::Gateway,
    resource::ResourceServer,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Resource) => run_resource(&cli).await,
        Some(Command::Serve) | None => run_server(&cli).await,
    }
}

/// Load configuration, reporting failures
fn load_config(cli: &Cli) -> Option<Config> {
    match Config::load(cli.config.as_deref()) {
        Ok(config) => Some(config),
        Err(e) => {
            error!("Failed to load configuration: {e}");
            None
        }
    }
}

/// Run the BFF gateway
async fn run_server(cli: &Cli) -> ExitCode {
    let Some(mut config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };

    // Apply CLI overrides
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        upstream = %config.upstream.base_url,
        "Starting BFF Gateway"
    );

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run with graceful shutdown
    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}

/// Run the downstream resource server
async fn run_resource(cli: &Cli) -> ExitCode {
    let Some(mut config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };

    if let Some(port) = cli.port {
        config.resource.port = port;
    }
    if let Some(ref host) = cli.host {
        config.resource.host = host.clone();
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.resource.port,
        security = config.resource.security_enabled,
        "Starting resource server"
    );

    if let Err(e) = ResourceServer::new(config).run().await {
        error!("Resource server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Resource server shutdown complete");
    ExitCode::SUCCESS
}
