//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to upstream:
//!     → timeouts.rs (request budget, connect timeout, body idle timeout)
//!     → On expiry: in-flight upstream work is dropped, client gets 504
//!       (or the connection is aborted once headers are out)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - No automatic retries: one forwarding attempt per client request

pub mod timeouts;

pub use timeouts::{Deadline, Expired, IdleTimer};
