//! Request validation.
//!
//! # Responsibilities
//! - Reject requests the gateway cannot forward (CONNECT, `*` targets)
//! - Enforce Host header rules and URI length limits
//! - Extract the request ID and original host for forwarding
//!
//! # Design Decisions
//! - Runs before routing: a malformed request never reaches the Router
//! - Syntax errors are already answered with 400 by the HTTP parser

use axum::http::{header, HeaderMap, Method, Request, Version};
use thiserror::Error;

/// Header carrying the per-request correlation ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// A request the gateway refuses to route.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("method {0} is not supported by the gateway")]
    UnsupportedMethod(Method),

    #[error("request target must be an absolute path")]
    InvalidTarget,

    #[error("missing Host header")]
    MissingHost,

    #[error("multiple Host headers")]
    DuplicateHost,

    #[error("request target is {length} bytes, limit is {limit}")]
    UriTooLong { length: usize, limit: usize },
}

/// Check an inbound request before it is routed.
pub fn validate_inbound<B>(request: &Request<B>, max_uri_length: usize) -> Result<(), ProtocolError> {
    if request.method() == Method::CONNECT {
        return Err(ProtocolError::UnsupportedMethod(Method::CONNECT));
    }

    let uri = request.uri();
    if !uri.path().starts_with('/') {
        return Err(ProtocolError::InvalidTarget);
    }

    let length = uri
        .path_and_query()
        .map(|pq| pq.as_str().len())
        .unwrap_or_else(|| uri.path().len());
    if length > max_uri_length {
        return Err(ProtocolError::UriTooLong {
            length,
            limit: max_uri_length,
        });
    }

    let hosts = request.headers().get_all(header::HOST).iter().count();
    if hosts > 1 {
        return Err(ProtocolError::DuplicateHost);
    }
    if hosts == 0 && request.version() == Version::HTTP_11 && uri.authority().is_none() {
        return Err(ProtocolError::MissingHost);
    }

    Ok(())
}

/// The host the client addressed: Host header, else the URI authority.
pub fn original_host<B>(request: &Request<B>) -> Option<String> {
    request
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.to_string()))
}

/// The request ID set by the request-id layer, if any.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}
