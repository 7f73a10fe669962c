//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper connection, Axum service, middleware)
//!     → request.rs (validate target, Host, URI length)
//!     → [routing decides the upstream]
//!     → headers.rs (hop-by-hop removal, X-Forwarded-*)
//!     → response.rs (gateway errors and redirects)
//!     → Send to client
//! ```

pub mod headers;
pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::{GatewayServer, GatewayState};
