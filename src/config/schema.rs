//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, connection limits).
    pub listener: ListenerConfig,

    /// Ordered route definitions. The catch-all entry must come last.
    pub routes: Vec<RouteConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Upstream connection pooling.
    pub pool: PoolConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            routes: vec![
                RouteConfig {
                    name: "api".to_string(),
                    prefix: Some("/api/".to_string()),
                    strip_prefix: true,
                    upstream_host: "backend".to_string(),
                    upstream_port: 8000,
                    scheme: UpstreamScheme::Http,
                    preserve_host: false,
                },
                RouteConfig::catch_all("frontend", "frontend", 3000),
            ],
            timeouts: TimeoutConfig::default(),
            pool: PoolConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Longest request target accepted, in bytes.
    pub max_uri_length: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
            max_uri_length: 8192,
        }
    }
}

/// Transport used to reach an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamScheme {
    /// Plain TCP.
    #[default]
    Http,
    /// TLS over TCP.
    Https,
}

impl UpstreamScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamScheme::Http => "http",
            UpstreamScheme::Https => "https",
        }
    }
}

impl std::fmt::Display for UpstreamScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single route entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    #[serde(default)]
    pub name: String,

    /// Path prefix to match. `None` or `"/"` makes this the catch-all.
    #[serde(default)]
    pub prefix: Option<String>,

    /// Remove the matched prefix before forwarding.
    #[serde(default)]
    pub strip_prefix: bool,

    /// Upstream host name or IP address.
    pub upstream_host: String,

    /// Upstream TCP port.
    pub upstream_port: u16,

    /// Upstream transport.
    #[serde(default)]
    pub scheme: UpstreamScheme,

    /// Forward the client's Host header instead of the upstream authority.
    #[serde(default)]
    pub preserve_host: bool,
}

impl RouteConfig {
    /// A prefix route forwarding to `host:port`.
    pub fn prefix(
        name: impl Into<String>,
        prefix: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            prefix: Some(prefix.into()),
            strip_prefix: false,
            upstream_host: host.into(),
            upstream_port: port,
            scheme: UpstreamScheme::Http,
            preserve_host: false,
        }
    }

    /// A catch-all route forwarding to `host:port`.
    pub fn catch_all(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            prefix: None,
            strip_prefix: false,
            upstream_host: host.into(),
            upstream_port: port,
            scheme: UpstreamScheme::Http,
            preserve_host: false,
        }
    }

    /// Builder-style toggle for prefix stripping.
    pub fn with_strip_prefix(mut self, strip: bool) -> Self {
        self.strip_prefix = strip;
        self
    }

    /// True when this entry matches every path.
    pub fn is_catch_all(&self) -> bool {
        match self.prefix.as_deref() {
            None => true,
            Some(p) => p.is_empty() || p == "/",
        }
    }

    /// Name used in logs, falling back to the prefix.
    pub fn display_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        match self.prefix.as_deref() {
            Some(p) if !self.is_catch_all() => p.to_string(),
            _ => "default".to_string(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Budget for one request, up to the upstream response head, in seconds.
    pub request_secs: u64,

    /// Time allowed for a client to send request headers, in seconds.
    pub header_read_secs: u64,

    /// Longest pause between upstream body frames, in seconds.
    pub body_idle_secs: u64,

    /// How long shutdown waits for in-flight connections, in seconds.
    pub shutdown_grace_secs: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn header_read(&self) -> Duration {
        Duration::from_secs(self.header_read_secs)
    }

    pub fn body_idle(&self) -> Duration {
        Duration::from_secs(self.body_idle_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 60,
            header_read_secs: 30,
            body_idle_secs: 60,
            shutdown_grace_secs: 30,
        }
    }
}

/// Upstream connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Keep idle upstream connections for reuse.
    pub enabled: bool,

    /// Idle connections kept per upstream.
    pub max_idle_per_upstream: usize,

    /// Idle connections older than this are discarded, in milliseconds.
    /// Keep it below the upstream's own keep-alive timeout.
    pub idle_timeout_ms: u64,
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_idle_per_upstream: 32,
            idle_timeout_ms: 4_000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_mirrors_the_compose_stack() {
        let config = GatewayConfig::default();
        assert_eq!(config.routes.len(), 2);

        let api = &config.routes[0];
        assert_eq!(api.prefix.as_deref(), Some("/api/"));
        assert!(api.strip_prefix);
        assert_eq!((api.upstream_host.as_str(), api.upstream_port), ("backend", 8000));

        let frontend = &config.routes[1];
        assert!(frontend.is_catch_all());
        assert_eq!((frontend.upstream_host.as_str(), frontend.upstream_port), ("frontend", 3000));
    }

    #[test]
    fn catch_all_detection() {
        assert!(RouteConfig::catch_all("web", "web", 80).is_catch_all());

        let mut slash = RouteConfig::prefix("web", "/", "web", 80);
        assert!(slash.is_catch_all());
        slash.prefix = Some(String::new());
        assert!(slash.is_catch_all());

        assert!(!RouteConfig::prefix("api", "/api", "api", 80).is_catch_all());
    }

    #[test]
    fn display_name_falls_back() {
        let mut route = RouteConfig::prefix("", "/api/", "api", 80);
        assert_eq!(route.display_name(), "/api/");
        route.prefix = None;
        assert_eq!(route.display_name(), "default");
    }
}
