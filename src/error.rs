//! Runtime error taxonomy.
//!
//! Configuration problems (`ConfigError`) stop the process at startup.
//! Everything here is recoverable: the connection handler turns it into an
//! HTTP error response and the process keeps serving.

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

pub use crate::http::request::ProtocolError;
pub use crate::routing::RoutingError;

type BoxError = Box<dyn StdError + Send + Sync>;

/// Failure while relaying a request to an upstream.
#[derive(Debug, Error)]
pub enum ForwardingError {
    #[error("connection refused by {upstream}")]
    ConnectionRefused { upstream: String },

    #[error("connecting to {upstream} timed out after {elapsed:?}")]
    ConnectTimeout { upstream: String, elapsed: Duration },

    #[error("{upstream} went silent for {elapsed:?}")]
    Timeout { upstream: String, elapsed: Duration },

    #[error("connection to {upstream} reset")]
    Reset {
        upstream: String,
        #[source]
        source: BoxError,
    },

    #[error("{upstream} unreachable")]
    Unreachable {
        upstream: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS with {upstream} failed: {message}")]
    Tls { upstream: String, message: String },

    #[error("HTTP error talking to {upstream}")]
    Protocol {
        upstream: String,
        #[source]
        source: hyper::Error,
    },
}

impl ForwardingError {
    /// Classify a failed connection attempt.
    pub fn from_connect(upstream: impl Into<String>, err: io::Error) -> Self {
        let upstream = upstream.into();
        match err.kind() {
            io::ErrorKind::ConnectionRefused => ForwardingError::ConnectionRefused { upstream },
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                ForwardingError::Reset {
                    upstream,
                    source: Box::new(err),
                }
            }
            _ => ForwardingError::Unreachable {
                upstream,
                source: err,
            },
        }
    }

    /// Classify an error from an established upstream connection.
    pub fn from_hyper(upstream: impl Into<String>, err: hyper::Error) -> Self {
        let upstream = upstream.into();
        if err.is_timeout() {
            return ForwardingError::Timeout {
                upstream,
                elapsed: Duration::ZERO,
            };
        }
        if err.is_canceled() || err.is_incomplete_message() || err.is_closed() || is_reset(&err) {
            return ForwardingError::Reset {
                upstream,
                source: Box::new(err),
            };
        }
        ForwardingError::Protocol {
            upstream,
            source: err,
        }
    }

    /// Short machine-readable reason, used in logs, metrics and error bodies.
    pub fn reason(&self) -> &'static str {
        match self {
            ForwardingError::ConnectionRefused { .. } => "connection_refused",
            ForwardingError::ConnectTimeout { .. } | ForwardingError::Timeout { .. } => "timeout",
            ForwardingError::Reset { .. } => "reset",
            ForwardingError::Unreachable { .. } => "unreachable",
            ForwardingError::Tls { .. } => "tls",
            ForwardingError::Protocol { .. } => "protocol",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ForwardingError::ConnectTimeout { .. } | ForwardingError::Timeout { .. } => {
                StatusCode::GATEWAY_TIMEOUT
            }
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

fn is_reset(err: &(dyn StdError + 'static)) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<io::Error>() {
            return matches!(
                io.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            );
        }
        source = cause.source();
    }
    false
}

/// Anything that can go wrong while handling one request.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Forwarding(#[from] ForwardingError),

    #[error("request exceeded its {budget:?} budget")]
    RequestTimeout { budget: Duration },

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Protocol(_) => StatusCode::BAD_REQUEST,
            GatewayError::Routing(RoutingError::NoMatch { .. }) => StatusCode::NOT_FOUND,
            GatewayError::Routing(RoutingError::InvalidRewrite { .. }) => StatusCode::BAD_REQUEST,
            GatewayError::Forwarding(err) => err.status(),
            GatewayError::RequestTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error code for response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Protocol(_) => "bad_request",
            GatewayError::Routing(RoutingError::NoMatch { .. }) => "no_route",
            GatewayError::Routing(RoutingError::InvalidRewrite { .. }) => "bad_request",
            GatewayError::Forwarding(err) if err.status() == StatusCode::GATEWAY_TIMEOUT => {
                "gateway_timeout"
            }
            GatewayError::Forwarding(_) => "bad_gateway",
            GatewayError::RequestTimeout { .. } => "gateway_timeout",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    /// Forwarding reason, when there is one.
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            GatewayError::Forwarding(err) => Some(err.reason()),
            GatewayError::RequestTimeout { .. } => Some("timeout"),
            _ => None,
        }
    }

    /// Text shown to the client. Upstream details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::Protocol(err) => err.to_string(),
            GatewayError::Routing(err) => err.to_string(),
            GatewayError::Forwarding(_) => "upstream request failed".to_string(),
            GatewayError::RequestTimeout { .. } => "upstream did not respond in time".to_string(),
            GatewayError::Internal(_) => "internal gateway error".to_string(),
        }
    }
}
