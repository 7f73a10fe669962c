//! stack-gateway: a path-routing reverse proxy.
//!
//! Requests whose path starts with a configured prefix (by default `/api/`)
//! go to the API backend, optionally with the prefix stripped; everything
//! else goes to the catch-all frontend. Bodies are streamed, hop-by-hop
//! headers are dropped, and upstream failures become 502/504 responses.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod upstream;

pub use config::GatewayConfig;
pub use error::{ForwardingError, GatewayError};
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
