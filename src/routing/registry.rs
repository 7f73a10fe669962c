//! Upstream registry.
//!
//! # Responsibilities
//! - Compile route configs into an ordered route table
//! - Share one `Upstream` between routes that target the same address
//! - Reject malformed or ambiguous tables before anything listens
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Evaluation order is configuration order; catch-all is last
//! - Identical duplicate routes are dropped with a warning

use std::sync::Arc;

use url::Url;

use crate::config::validation::{same_target, upstream_url, validate_routes};
use crate::config::{ConfigError, RouteConfig, UpstreamScheme};
use crate::routing::matcher::PathPredicate;

/// An upstream network target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    host: String,
    port: u16,
    scheme: UpstreamScheme,
    /// Pre-calculated base URL for logging.
    base_url: Url,
}

impl Upstream {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn scheme(&self) -> UpstreamScheme {
        self.scheme
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `host:port`, suitable for dialing and for the Host header.
    pub fn authority(&self) -> String {
        match self.base_url.host_str() {
            Some(host) => format!("{}:{}", host, self.port),
            None => format!("{}:{}", self.host, self.port),
        }
    }

    /// Value for the outbound Host header; the port is omitted when it is
    /// the scheme default.
    pub fn host_header(&self) -> String {
        let host = self.base_url.host_str().unwrap_or(&self.host);
        match self.base_url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Key under which connections to this upstream are pooled.
    pub fn pool_key(&self) -> String {
        format!("{}://{}", self.scheme, self.authority())
    }
}

impl std::fmt::Display for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.pool_key())
    }
}

/// A compiled route.
#[derive(Debug, Clone)]
pub struct Route {
    pub name: String,
    pub predicate: PathPredicate,
    pub strip_prefix: bool,
    pub preserve_host: bool,
    pub upstream: Arc<Upstream>,
}

/// The ordered, immutable route table.
#[derive(Debug, Default)]
pub struct UpstreamRegistry {
    routes: Vec<Route>,
    upstreams: Vec<Arc<Upstream>>,
}

impl UpstreamRegistry {
    /// Build the registry, failing on any malformed or ambiguous entry.
    pub fn from_config(configs: &[RouteConfig]) -> Result<Self, ConfigError> {
        let errors = validate_routes(configs);
        if !errors.is_empty() {
            return Err(ConfigError::Validation(errors));
        }

        let mut registry = Self::default();
        let mut accepted: Vec<&RouteConfig> = Vec::with_capacity(configs.len());

        for config in configs {
            let predicate = PathPredicate::from_prefix(config.prefix.as_deref());

            let duplicate = accepted.iter().any(|prev| {
                PathPredicate::from_prefix(prev.prefix.as_deref()) == predicate
                    && same_target(prev, config)
            });
            if duplicate {
                tracing::warn!(
                    route = %config.display_name(),
                    predicate = %predicate,
                    "Duplicate route ignored"
                );
                continue;
            }

            let base_url = upstream_url(config).map_err(|reason| {
                ConfigError::Validation(vec![crate::config::ValidationError::InvalidUpstream {
                    route: config.display_name(),
                    reason,
                }])
            })?;
            let upstream = registry.intern(Upstream {
                host: config.upstream_host.trim().to_string(),
                port: config.upstream_port,
                scheme: config.scheme,
                base_url,
            });

            registry.routes.push(Route {
                name: config.display_name(),
                predicate,
                strip_prefix: config.strip_prefix,
                preserve_host: config.preserve_host,
                upstream,
            });
            accepted.push(config);
        }

        for route in &registry.routes {
            tracing::debug!(
                route = %route.name,
                predicate = %route.predicate,
                strip_prefix = route.strip_prefix,
                upstream = %route.upstream,
                "Route registered"
            );
        }

        Ok(registry)
    }

    fn intern(&mut self, upstream: Upstream) -> Arc<Upstream> {
        if let Some(existing) = self.upstreams.iter().find(|u| ***u == upstream) {
            return Arc::clone(existing);
        }
        let upstream = Arc::new(upstream);
        self.upstreams.push(Arc::clone(&upstream));
        upstream
    }

    /// First route whose predicate matches `path`, in evaluation order.
    pub fn resolve(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|route| route.predicate.matches(path))
    }

    /// All routes in evaluation order.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Distinct upstreams referenced by the routes.
    pub fn upstreams(&self) -> &[Arc<Upstream>] {
        &self.upstreams
    }

    pub fn has_catch_all(&self) -> bool {
        self.routes.last().is_some_and(|r| r.predicate.is_catch_all())
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
