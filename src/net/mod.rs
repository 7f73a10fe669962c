//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (lifecycle tracking, state machine)
//!     → Hand off to HTTP layer
//!
//! Connection States:
//!     Accepted → Parsing → Routing → Forwarding → Responding → Closed
//!     (Responding → Parsing on keep-alive; any → Errored → Closed)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown

pub mod connection;
pub mod listener;

pub use connection::{ConnectionContext, ConnectionId, ConnectionState, ConnectionTracker};
pub use listener::{Listener, ListenerError};
