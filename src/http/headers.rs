//! Header manipulation for forwarded requests and relayed responses.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers (and any header named in `Connection`)
//! - Add X-Forwarded-For, X-Real-IP, X-Forwarded-Proto, X-Forwarded-Host
//! - Add X-Forwarded-Prefix when a route strips its prefix
//!
//! # Design Decisions
//! - Connection-scoped headers are regenerated per hop, never copied
//! - X-Forwarded-For appends the peer to the existing chain
//! - Duplicate end-to-end headers are preserved in order

use std::net::IpAddr;

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
pub const X_FORWARDED_PREFIX: &str = "x-forwarded-prefix";
pub const X_REAL_IP: &str = "x-real-ip";

/// Headers that only describe a single connection.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Remove hop-by-hop headers, including those listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(&name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Facts about the client side of a forwarded request.
#[derive(Debug, Clone, Default)]
pub struct ForwardedFor {
    /// Peer IP of the client connection.
    pub client_ip: Option<IpAddr>,
    /// Host the client addressed.
    pub host: Option<String>,
    /// `http` or `https` as seen by the client.
    pub proto: &'static str,
    /// Prefix removed from the path, if any.
    pub prefix: Option<String>,
}

/// Set the standard forwarding headers on an outbound request.
pub fn apply_forwarded(headers: &mut HeaderMap, forwarded: &ForwardedFor) {
    if let Some(ip) = forwarded.client_ip {
        let ip = ip.to_string();
        let chain = headers
            .get_all(X_FORWARDED_FOR)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .chain(std::iter::once(ip.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert(X_FORWARDED_FOR, value);
        }
        if let Ok(value) = HeaderValue::from_str(&ip) {
            headers.insert(X_REAL_IP, value);
        }
    }

    if let Some(host) = forwarded.host.as_deref() {
        if let Ok(value) = HeaderValue::from_str(host) {
            headers.insert(X_FORWARDED_HOST, value);
        }
    }

    let proto = if forwarded.proto.is_empty() { "http" } else { forwarded.proto };
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static(proto));

    if let Some(prefix) = forwarded.prefix.as_deref() {
        if let Ok(value) = HeaderValue::from_str(prefix) {
            headers.insert(X_FORWARDED_PREFIX, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_standard_and_listed_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive, X-Secret"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("upgrade", HeaderValue::from_static("websocket"));
        headers.insert("x-secret", HeaderValue::from_static("1"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));

        strip_hop_by_hop(&mut headers);

        assert!(headers.get("connection").is_none());
        assert!(headers.get("keep-alive").is_none());
        assert!(headers.get("transfer-encoding").is_none());
        assert!(headers.get("upgrade").is_none());
        assert!(headers.get("x-secret").is_none());
        assert_eq!(headers.get("content-type").unwrap(), "application/json");
        assert_eq!(headers.get_all("set-cookie").iter().count(), 2);
    }

    #[test]
    fn hop_by_hop_names() {
        assert!(is_hop_by_hop(&header::CONNECTION));
        assert!(is_hop_by_hop(&header::TE));
        assert!(!is_hop_by_hop(&header::CONTENT_LENGTH));
        assert!(!is_hop_by_hop(&header::HOST));
    }

    #[test]
    fn appends_to_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("203.0.113.9"));

        apply_forwarded(
            &mut headers,
            &ForwardedFor {
                client_ip: Some("10.0.0.2".parse().unwrap()),
                host: Some("app.example.com".into()),
                proto: "http",
                prefix: Some("/api".into()),
            },
        );

        assert_eq!(headers.get(X_FORWARDED_FOR).unwrap(), "203.0.113.9, 10.0.0.2");
        assert_eq!(headers.get(X_REAL_IP).unwrap(), "10.0.0.2");
        assert_eq!(headers.get(X_FORWARDED_HOST).unwrap(), "app.example.com");
        assert_eq!(headers.get(X_FORWARDED_PROTO).unwrap(), "http");
        assert_eq!(headers.get(X_FORWARDED_PREFIX).unwrap(), "/api");
    }

    #[test]
    fn without_client_ip_only_proto_is_set() {
        let mut headers = HeaderMap::new();
        apply_forwarded(&mut headers, &ForwardedFor::default());

        assert!(headers.get(X_FORWARDED_FOR).is_none());
        assert!(headers.get(X_FORWARDED_PREFIX).is_none());
        assert_eq!(headers.get(X_FORWARDED_PROTO).unwrap(), "http");
    }
}
