//! Request forwarding.
//!
//! # Responsibilities
//! - Rewrite the inbound request for the upstream (target, Host, headers)
//! - Send it over a pooled connection, one attempt only
//! - Stream the response body back, guarded by an idle timeout
//! - Return the connection to the pool once the body has ended
//!
//! # Design Decisions
//! - Bodies are never buffered in either direction
//! - A response body that errors or is abandoned takes its connection down
//!   with it; only a fully read exchange is reused

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderValue, Request, Response, Uri, Version};
use hyper::body::{Body as HttpBody, Bytes, Frame, Incoming, SizeHint};

use crate::error::ForwardingError;
use crate::http::headers::{apply_forwarded, strip_hop_by_hop, ForwardedFor};
use crate::http::request::original_host;
use crate::resilience::IdleTimer;
use crate::routing::ForwardTarget;
use crate::upstream::connector::UpstreamConnection;
use crate::upstream::pool::ConnectionPool;

/// The client side of the request being forwarded.
#[derive(Debug, Clone, Copy)]
pub struct ClientInfo {
    pub peer: Option<SocketAddr>,
    /// Scheme the client used to reach the gateway.
    pub proto: &'static str,
}

impl ClientInfo {
    pub fn new(peer: Option<SocketAddr>) -> Self {
        Self { peer, proto: "http" }
    }
}

/// Relays requests to upstreams.
#[derive(Clone)]
pub struct ForwardingEngine {
    pool: Arc<dyn ConnectionPool>,
    body_idle: Duration,
}

impl std::fmt::Debug for ForwardingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardingEngine")
            .field("body_idle", &self.body_idle)
            .finish_non_exhaustive()
    }
}

impl ForwardingEngine {
    pub fn new(pool: Arc<dyn ConnectionPool>, body_idle: Duration) -> Self {
        Self { pool, body_idle }
    }

    pub fn pool(&self) -> &Arc<dyn ConnectionPool> {
        &self.pool
    }

    /// Forward `request` to the target's upstream and return the upstream
    /// response with a streaming body.
    ///
    /// Resolves once the response head has arrived. Dropping the returned
    /// future cancels the exchange and closes the upstream connection.
    pub async fn forward(
        &self,
        request: Request<Body>,
        target: &ForwardTarget,
        client: &ClientInfo,
    ) -> Result<Response<Body>, ForwardingError> {
        let outbound = outbound_request(request, target, client);

        let mut conn = self.pool.acquire(&target.upstream).await?;
        tracing::debug!(
            route = %target.route,
            upstream = %target.upstream,
            connection = conn.id(),
            reused = conn.requests() > 0,
            path = %target.path_and_query,
            "Forwarding request"
        );

        let response = conn.send(outbound).await?;
        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);

        let body = UpstreamBody {
            inner: body,
            lease: Some(Lease {
                conn,
                pool: Arc::clone(&self.pool),
            }),
            idle: IdleTimer::new(self.body_idle),
            upstream: target.upstream.authority(),
        };

        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

/// Build the request sent upstream.
///
/// Connection-scoped headers are dropped, forwarding headers added, the
/// Host rewritten to the upstream unless the route preserves it, and the
/// target replaced by the routed path and query.
pub fn outbound_request(request: Request<Body>, target: &ForwardTarget, client: &ClientInfo) -> Request<Body> {
    let host = original_host(&request);
    let (mut parts, body) = request.into_parts();

    strip_hop_by_hop(&mut parts.headers);
    apply_forwarded(
        &mut parts.headers,
        &ForwardedFor {
            client_ip: client.peer.map(|addr| addr.ip()),
            host: host.clone(),
            proto: client.proto,
            prefix: target.stripped_prefix.clone(),
        },
    );

    let host_value = match host {
        Some(original) if target.preserve_host => original,
        _ => target.upstream.host_header(),
    };
    match HeaderValue::from_str(&host_value) {
        Ok(value) => {
            parts.headers.insert(header::HOST, value);
        }
        Err(_) => {
            tracing::warn!(host = %host_value, "Unusable Host value, leaving header unset");
            parts.headers.remove(header::HOST);
        }
    }

    parts.uri = Uri::from(target.path_and_query.clone());
    parts.version = Version::HTTP_11;

    Request::from_parts(parts, body)
}

/// A borrowed upstream connection, returned to its pool on release.
struct Lease {
    conn: UpstreamConnection,
    pool: Arc<dyn ConnectionPool>,
}

impl Lease {
    fn release(self) {
        self.pool.release(self.conn);
    }
}

/// Response body relayed from an upstream.
pub struct UpstreamBody {
    inner: Incoming,
    lease: Option<Lease>,
    idle: IdleTimer,
    upstream: String,
}

impl UpstreamBody {
    fn finish(&mut self) {
        if let Some(lease) = self.lease.take() {
            lease.release();
        }
    }

    fn abandon(&mut self) {
        self.lease.take();
    }
}

impl HttpBody for UpstreamBody {
    type Data = Bytes;
    type Error = ForwardingError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                this.idle.reset();
                if this.inner.is_end_stream() {
                    this.finish();
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.abandon();
                Poll::Ready(Some(Err(ForwardingError::from_hyper(this.upstream.clone(), err))))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => match this.idle.poll_expired(cx) {
                Poll::Ready(()) => {
                    this.abandon();
                    tracing::warn!(
                        upstream = %this.upstream,
                        idle = ?this.idle.idle(),
                        "Upstream body stalled, aborting"
                    );
                    Poll::Ready(Some(Err(ForwardingError::Timeout {
                        upstream: this.upstream.clone(),
                        elapsed: this.idle.idle(),
                    })))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for UpstreamBody {
    fn drop(&mut self) {
        // Bodiless responses (HEAD, 204, 304) are never polled.
        if self.inner.is_end_stream() {
            self.finish();
        }
    }
}
