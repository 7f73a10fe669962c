//! Upstream forwarding subsystem.
//!
//! # Data Flow
//! ```text
//! ForwardTarget from the router
//!     → forwarder.rs (rewrite request, single attempt)
//!     → pool.rs (reuse an idle connection or dial)
//!     → connector.rs (TCP, optional TLS, HTTP/1.1 handshake)
//!     → response head back to the handler, body streamed afterwards
//! ```

pub mod connector;
pub mod forwarder;
pub mod pool;

pub use connector::{Connector, UpstreamConnection};
pub use forwarder::{outbound_request, ClientInfo, ForwardingEngine, UpstreamBody};
pub use pool::{build_pool, ConnectionPool, DirectPool, IdlePool, PoolStats};
