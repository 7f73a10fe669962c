//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (path, query)
//!     → router.rs (route lookup, prefix rewrite)
//!     → matcher.rs (evaluate path predicates)
//!     → Return: ForwardTarget, Redirect, or NoMatch
//!
//! Route Compilation (at startup):
//!     RouteConfig[]
//!     → registry.rs (validate, intern upstreams)
//!     → Freeze as immutable Router
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route
//! - First match wins (configuration order)

pub mod matcher;
pub mod registry;
pub mod router;

pub use matcher::PathPredicate;
pub use registry::{Route, Upstream, UpstreamRegistry};
pub use router::{ForwardTarget, RouteOutcome, Router, RoutingError};
