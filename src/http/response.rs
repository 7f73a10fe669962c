//! Gateway-generated responses.
//!
//! # Responsibilities
//! - Render request failures as JSON error bodies
//! - Build the trailing-slash redirect
//! - Render panics caught by middleware as 500s
//!
//! # Design Decisions
//! - Every error response carries `Connection: close`
//! - Upstream details are logged, never echoed to the client

use std::any::Any;

use axum::body::Body;
use axum::http::{header, HeaderValue, Response, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::error::GatewayError;

/// JSON body of every gateway-generated error.
#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub error: &'a str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'a str>,
}

fn error_response(status: StatusCode, body: ErrorBody<'_>) -> Response<Body> {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        error_response(
            self.status(),
            ErrorBody {
                error: self.code(),
                message: self.public_message(),
                reason: self.reason(),
            },
        )
    }
}

/// 301 to `location`.
pub fn redirect(location: &str) -> Response<Body> {
    match HeaderValue::from_str(location) {
        Ok(value) => {
            let mut response = StatusCode::MOVED_PERMANENTLY.into_response();
            response.headers_mut().insert(header::LOCATION, value);
            response
        }
        Err(_) => GatewayError::Internal(format!("unusable redirect target `{location}`")).into_response(),
    }
}

/// Response for a panic caught while handling a request.
pub fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic"
    };
    tracing::error!(panic = %detail, "Request handler panicked");

    GatewayError::Internal(detail.to_string()).into_response()
}
