//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate upstream addresses and route prefixes
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Detect ambiguous routes and a misplaced catch-all
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::{Ipv6Addr, SocketAddr};

use thiserror::Error;
use url::Url;

use crate::config::schema::{GatewayConfig, RouteConfig};

/// A single semantic problem found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid {field} `{value}`: not a socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("no routes configured")]
    NoRoutes,

    #[error("a catch-all route (no prefix) is required")]
    MissingCatchAll,

    #[error("more than one catch-all route ({first}, {second})")]
    MultipleCatchAll { first: String, second: String },

    #[error("catch-all route `{route}` must be the last route")]
    CatchAllNotLast { route: String },

    #[error("route `{route}`: prefix `{prefix}` must start with `/`")]
    InvalidPrefix { route: String, prefix: String },

    #[error("route `{route}`: invalid upstream: {reason}")]
    InvalidUpstream { route: String, reason: String },

    #[error("routes `{first}` and `{second}` share prefix `{prefix}` with different targets")]
    AmbiguousRoute {
        prefix: String,
        first: String,
        second: String,
    },
}

/// Validate a whole configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::Zero("listener.max_connections"));
    }
    if config.listener.max_uri_length == 0 {
        errors.push(ValidationError::Zero("listener.max_uri_length"));
    }

    let timeouts = [
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
        ("timeouts.header_read_secs", config.timeouts.header_read_secs),
        ("timeouts.body_idle_secs", config.timeouts.body_idle_secs),
    ];
    for (field, value) in timeouts {
        if value == 0 {
            errors.push(ValidationError::Zero(field));
        }
    }

    if config.pool.enabled {
        if config.pool.max_idle_per_upstream == 0 {
            errors.push(ValidationError::Zero("pool.max_idle_per_upstream"));
        }
        if config.pool.idle_timeout_ms == 0 {
            errors.push(ValidationError::Zero("pool.idle_timeout_ms"));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if config.routes.is_empty() {
        errors.push(ValidationError::NoRoutes);
    } else if !config.routes.iter().any(RouteConfig::is_catch_all) {
        errors.push(ValidationError::MissingCatchAll);
    }

    errors.extend(validate_routes(&config.routes));

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Checks every route table must pass before a registry can be built from it.
///
/// A missing catch-all is not reported here: a table without one is usable,
/// it just answers unmatched paths with a routing error.
pub fn validate_routes(routes: &[RouteConfig]) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut catch_all: Option<(usize, &RouteConfig)> = None;

    for (index, route) in routes.iter().enumerate() {
        let name = route.display_name();

        if let Some(prefix) = route.prefix.as_deref() {
            if !route.is_catch_all() && !prefix.starts_with('/') {
                errors.push(ValidationError::InvalidPrefix {
                    route: name.clone(),
                    prefix: prefix.to_string(),
                });
            }
        }

        if let Err(reason) = upstream_url(route) {
            errors.push(ValidationError::InvalidUpstream {
                route: name.clone(),
                reason,
            });
        }

        if route.is_catch_all() {
            match catch_all {
                // An identical copy is a duplicate, dropped by the registry.
                Some((_, first)) if same_target(first, route) => {}
                Some((_, first)) => errors.push(ValidationError::MultipleCatchAll {
                    first: first.display_name(),
                    second: name.clone(),
                }),
                None => catch_all = Some((index, route)),
            }
        }

        let earlier = routes[..index]
            .iter()
            .find(|other| predicate_key(other) == predicate_key(route));
        if let Some(other) = earlier {
            if !same_target(other, route) && !(route.is_catch_all() && other.is_catch_all()) {
                errors.push(ValidationError::AmbiguousRoute {
                    prefix: predicate_key(route).to_string(),
                    first: other.display_name(),
                    second: name,
                });
            }
        }
    }

    if let Some((index, first)) = catch_all {
        let trailing_duplicates = routes[index + 1..]
            .iter()
            .all(|route| route.is_catch_all() && same_target(first, route));
        if !trailing_duplicates {
            errors.push(ValidationError::CatchAllNotLast {
                route: first.display_name(),
            });
        }
    }

    errors
}

/// Build the base URL of a route's upstream, rejecting malformed addresses.
pub(crate) fn upstream_url(route: &RouteConfig) -> Result<Url, String> {
    let host = route.upstream_host.trim();
    if host.is_empty() {
        return Err("upstream_host is empty".to_string());
    }
    if route.upstream_port == 0 {
        return Err("upstream_port must be between 1 and 65535".to_string());
    }

    let host = match host.parse::<Ipv6Addr>() {
        Ok(v6) => format!("[{}]", v6),
        Err(_) => host.to_string(),
    };
    let raw = format!("{}://{}:{}/", route.scheme, host, route.upstream_port);
    let url = Url::parse(&raw).map_err(|e| format!("`{}:{}`: {}", host, route.upstream_port, e))?;

    // Anything that smuggles a path, userinfo or query into the host shows up here.
    if url.host_str().is_none()
        || url.path() != "/"
        || url.query().is_some()
        || !url.username().is_empty()
        || url.port_or_known_default() != Some(route.upstream_port)
    {
        return Err(format!("`{}:{}` is not a host:port pair", host, route.upstream_port));
    }

    Ok(url)
}

/// Routes with equal keys have identical predicates.
pub(crate) fn predicate_key(route: &RouteConfig) -> &str {
    if route.is_catch_all() {
        ""
    } else {
        route.prefix.as_deref().unwrap_or_default()
    }
}

/// True when two routes would forward identically.
pub(crate) fn same_target(a: &RouteConfig, b: &RouteConfig) -> bool {
    a.upstream_host.trim().eq_ignore_ascii_case(b.upstream_host.trim())
        && a.upstream_port == b.upstream_port
        && a.scheme == b.scheme
        && a.strip_prefix == b.strip_prefix
        && a.preserve_host == b.preserve_host
}
