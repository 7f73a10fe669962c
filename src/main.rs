//! stack-gateway
//!
//! A path-routing reverse proxy in front of a web frontend and an API backend.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────┐
//!                      │                    GATEWAY                       │
//!   Client Request     │  ┌─────────┐   ┌─────────┐   ┌──────────────┐    │
//!   ───────────────────┼─▶│   net   │──▶│  http   │──▶│   routing    │    │
//!                      │  │listener │   │ server  │   │ prefix match │    │
//!                      │  └─────────┘   └─────────┘   └──────┬───────┘    │
//!                      │                                     ▼            │
//!   Client Response    │  ┌─────────┐   ┌─────────┐   ┌──────────────┐    │
//!   ◀──────────────────┼──│ stream  │◀──│upstream │◀──│  connection  │◀───┼── /api → backend
//!                      │  │  body   │   │forwarder│   │     pool     │    │   /    → frontend
//!                      │  └─────────┘   └─────────┘   └──────────────┘    │
//!                      └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use stack_gateway::config::{load_config, validate_config, GatewayConfig};
use stack_gateway::lifecycle::{spawn_signal_handler, start, Shutdown};
use stack_gateway::observability::init_logging;

#[derive(Debug, Parser)]
#[command(name = "stack-gateway")]
#[command(about = "Path-routing reverse proxy for a frontend + API stack", long_about = None)]
struct Cli {
    /// TOML configuration file. Built-in defaults when omitted.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long, env = "GATEWAY_BIND")]
    bind: Option<String>,

    /// Validate the configuration, print the route table and exit.
    #[arg(long)]
    check: bool,
}

fn load(cli: &Cli) -> Result<GatewayConfig, String> {
    let mut config = match &cli.config {
        Some(path) => load_config(path).map_err(|e| e.to_string())?,
        None => GatewayConfig::default(),
    };

    if let Some(bind) = &cli.bind {
        config.listener.bind_address = bind.clone();
    }

    validate_config(&config).map_err(|errors| {
        errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    })?;

    Ok(config)
}

fn print_routes(config: &GatewayConfig) {
    println!("listening on {}", config.listener.bind_address);
    for (index, route) in config.routes.iter().enumerate() {
        println!(
            "{:>2}. {:<12} {:<16} -> {}://{}:{}{}",
            index + 1,
            route.display_name(),
            route.prefix.as_deref().filter(|p| !p.is_empty()).unwrap_or("/ (catch-all)"),
            route.scheme,
            route.upstream_host,
            route.upstream_port,
            if route.strip_prefix { "  [strip prefix]" } else { "" },
        );
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load(&cli) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("stack-gateway: invalid configuration: {message}");
            return ExitCode::FAILURE;
        }
    };

    if cli.check {
        print_routes(&config);
        return ExitCode::SUCCESS;
    }

    if let Err(e) = init_logging(&config.observability) {
        eprintln!("stack-gateway: logging already initialized: {e}");
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        request_timeout_secs = config.timeouts.request_secs,
        pool_enabled = config.pool.enabled,
        "stack-gateway starting"
    );

    let gateway = match start(config).await {
        Ok(gateway) => gateway,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    spawn_signal_handler(shutdown.clone());

    if let Err(e) = gateway.run(signal).await {
        tracing::error!(error = %e, "Gateway terminated with error");
        return ExitCode::FAILURE;
    }

    tracing::info!("Shutdown complete");
    ExitCode::SUCCESS
}
