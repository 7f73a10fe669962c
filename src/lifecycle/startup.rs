//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order
//! - Install the metrics exporter when enabled
//! - Bind the listener and hand back a gateway ready to serve
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listener binds last (traffic only when ready)

use std::net::SocketAddr;

use thiserror::Error;
use tokio::sync::broadcast;

use crate::config::{ConfigError, GatewayConfig};
use crate::http::GatewayServer;
use crate::net::{Listener, ListenerError};
use crate::observability::init_metrics;

/// Anything that stops the gateway from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("invalid metrics address `{0}`")]
    MetricsAddress(String),

    #[error("failed to install metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// A started gateway: routes compiled, listener bound, not yet serving.
#[derive(Debug)]
pub struct Gateway {
    server: GatewayServer,
    listener: Listener,
}

impl Gateway {
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    pub fn server(&self) -> &GatewayServer {
        &self.server
    }

    /// Serve until `shutdown` fires, then drain.
    pub async fn run(self, shutdown: broadcast::Receiver<()>) -> Result<(), ListenerError> {
        self.server.run(self.listener, shutdown).await
    }
}

/// Build every subsystem from `config` and bind the listener.
pub async fn start(config: GatewayConfig) -> Result<Gateway, StartupError> {
    if config.observability.metrics_enabled {
        let address = &config.observability.metrics_address;
        let addr: SocketAddr = address
            .parse()
            .map_err(|_| StartupError::MetricsAddress(address.clone()))?;
        init_metrics(addr)?;
    }

    let server = GatewayServer::new(config)?;
    for route in server.router().registry().routes() {
        tracing::info!(
            route = %route.name,
            predicate = %route.predicate,
            strip_prefix = route.strip_prefix,
            upstream = %route.upstream,
            "Route loaded"
        );
    }

    let listener = Listener::bind(&server.config().listener).await?;
    Ok(Gateway { server, listener })
}
