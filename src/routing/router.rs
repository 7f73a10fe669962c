//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store the compiled route table
//! - Look up the route for a request path
//! - Compute the forwarded path (prefix stripping, query preserved)
//! - Return a forward target, a redirect, or an explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) path prefix scan (acceptable for typical route counts)
//! - Explicit NoMatch rather than silent default

use std::sync::Arc;

use axum::http::uri::PathAndQuery;
use axum::http::Uri;
use thiserror::Error;

use crate::config::{ConfigError, RouteConfig};
use crate::routing::registry::{Route, Upstream, UpstreamRegistry};

/// Routing failures. Recoverable; rendered as a fixed client response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("no route matches `{path}`")]
    NoMatch { path: String },

    #[error("rewritten target `{target}` is not a valid request target")]
    InvalidRewrite { target: String },
}

/// Where a matched request goes.
#[derive(Debug, Clone)]
pub struct ForwardTarget {
    /// Name of the matched route.
    pub route: String,
    pub upstream: Arc<Upstream>,
    /// Path and query to send upstream.
    pub path_and_query: PathAndQuery,
    /// The prefix removed from the path, if any.
    pub stripped_prefix: Option<String>,
    pub preserve_host: bool,
}

/// Result of routing one request.
#[derive(Debug, Clone)]
pub enum RouteOutcome {
    Forward(ForwardTarget),
    /// Answer with a permanent redirect to this location.
    Redirect { route: String, location: String },
}

/// The request router.
#[derive(Debug)]
pub struct Router {
    registry: UpstreamRegistry,
}

impl Router {
    pub fn new(registry: UpstreamRegistry) -> Self {
        Self { registry }
    }

    /// Compile routes straight from configuration.
    pub fn from_config(routes: &[RouteConfig]) -> Result<Self, ConfigError> {
        UpstreamRegistry::from_config(routes).map(Self::new)
    }

    pub fn registry(&self) -> &UpstreamRegistry {
        &self.registry
    }

    /// Route a request URI.
    ///
    /// Routes are tried in order. A route whose trailing-slash prefix equals
    /// the path plus `/` answers with a redirect to the slash form, at its own
    /// position in the order, so `/api` never falls through to the catch-all.
    pub fn route(&self, uri: &Uri) -> Result<RouteOutcome, RoutingError> {
        let path = uri.path();

        for route in self.registry.routes() {
            if route.predicate.matches(path) {
                return forward_target(route, uri).map(RouteOutcome::Forward);
            }
            if route.predicate.bare_form() == Some(path) {
                let location = match uri.query() {
                    Some(query) => format!("{}?{}", route.predicate.as_str(), query),
                    None => route.predicate.as_str().to_string(),
                };
                return Ok(RouteOutcome::Redirect {
                    route: route.name.clone(),
                    location,
                });
            }
        }

        Err(RoutingError::NoMatch {
            path: path.to_string(),
        })
    }
}

fn forward_target(route: &Route, uri: &Uri) -> Result<ForwardTarget, RoutingError> {
    let path = uri.path();
    let (forward_path, stripped_prefix) = if route.strip_prefix && !route.predicate.is_catch_all() {
        let stripped = route.predicate.strip(path);
        let prefix = route.predicate.as_str().trim_end_matches('/').to_string();
        (stripped, Some(prefix))
    } else {
        (path.to_string(), None)
    };

    let target = match uri.query() {
        Some(query) => format!("{}?{}", forward_path, query),
        None => forward_path,
    };
    let path_and_query = PathAndQuery::try_from(target.as_str())
        .map_err(|_| RoutingError::InvalidRewrite { target: target.clone() })?;

    Ok(ForwardTarget {
        route: route.name.clone(),
        upstream: Arc::clone(&route.upstream),
        path_and_query,
        stripped_prefix,
        preserve_host: route.preserve_host,
    })
}
