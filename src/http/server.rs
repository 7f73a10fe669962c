//! HTTP server setup and request dispatch.
//!
//! # Responsibilities
//! - Build the Axum service with middleware (request ID, tracing, panics)
//! - Accept connections and serve each on its own task (HTTP/1.1 and h2c)
//! - Drive the per-connection state machine (HTTP/1 request sequencing)
//! - Dispatch requests: validate → route → forward within the request budget
//! - Drain in-flight connections on shutdown
//!
//! # Design Decisions
//! - One task per connection; no shared mutable state besides the pool
//! - One forwarding attempt per request, no retries
//! - Gateway-generated errors close the client connection

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, Response, Version};
use axum::response::IntoResponse;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::{ConfigError, GatewayConfig};
use crate::error::GatewayError;
use crate::http::request::{request_id, validate_inbound};
use crate::http::response::{panic_response, redirect};
use crate::net::connection::{ConnectionContext, ConnectionGuard, ConnectionState, ConnectionTracker};
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::observability::metrics::{self, NO_ROUTE};
use crate::resilience::Deadline;
use crate::routing::{RouteOutcome, Router};
use crate::upstream::{build_pool, ClientInfo, ConnectionPool, Connector, ForwardingEngine};

/// Application state injected into the handler.
#[derive(Clone, Debug)]
pub struct GatewayState {
    pub router: Arc<Router>,
    pub engine: ForwardingEngine,
    pub request_timeout: Duration,
    pub max_uri_length: usize,
}

/// The gateway server.
#[derive(Debug)]
pub struct GatewayServer {
    config: GatewayConfig,
    state: GatewayState,
    tracker: ConnectionTracker,
}

impl GatewayServer {
    /// Compile routes and set up forwarding with the configured pool.
    pub fn new(config: GatewayConfig) -> Result<Self, ConfigError> {
        let connector = Connector::new(config.timeouts.connect())?;
        let pool = build_pool(&config.pool, connector);
        Self::with_pool(config, pool)
    }

    /// Like [`GatewayServer::new`], with a caller-supplied pool.
    pub fn with_pool(config: GatewayConfig, pool: Arc<dyn ConnectionPool>) -> Result<Self, ConfigError> {
        let router = Router::from_config(&config.routes)?;
        if !router.registry().has_catch_all() {
            tracing::warn!("No catch-all route configured; unmatched paths will get 404");
        }

        let state = GatewayState {
            router: Arc::new(router),
            engine: ForwardingEngine::new(pool, config.timeouts.body_idle()),
            request_timeout: config.timeouts.request(),
            max_uri_length: config.listener.max_uri_length,
        };

        Ok(Self {
            config,
            state,
            tracker: ConnectionTracker::new(),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.state.router
    }

    pub fn pool(&self) -> &Arc<dyn ConnectionPool> {
        self.state.engine.pool()
    }

    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// The request-handling service, with all middleware layers.
    pub fn app(&self) -> axum::Router {
        axum::Router::new()
            .fallback(gateway_handler)
            .with_state(self.state.clone())
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    request_id = %request_id(request.headers()),
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Serve connections from `listener` until `shutdown` fires, then drain.
    pub async fn run(self, listener: Listener, mut shutdown: broadcast::Receiver<()>) -> Result<(), ListenerError> {
        let app = self.app();
        let header_read = self.config.timeouts.header_read();
        let (drain_tx, drain_rx) = watch::channel(false);
        let mut connections = JoinSet::new();

        tracing::info!(
            address = %listener.local_addr().map_err(ListenerError::Bind)?,
            routes = self.state.router.registry().routes().len(),
            "Gateway listening"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let guard = self.tracker.track(peer);
                        connections.spawn(serve_connection(
                            stream,
                            guard,
                            permit,
                            app.clone(),
                            header_read,
                            drain_rx.clone(),
                        ));
                    }
                    Err(ListenerError::Closed) => break,
                    Err(err) => {
                        // Typically fd exhaustion; back off instead of spinning.
                        tracing::warn!(error = %err, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(err) = joined {
                        if err.is_panic() {
                            tracing::error!(error = %err, "Connection task panicked");
                        }
                    }
                }
            }
        }

        drop(listener);
        let _ = drain_tx.send(true);

        let grace = self.config.timeouts.shutdown_grace();
        tracing::info!(
            active = self.tracker.active_count(),
            grace_secs = grace.as_secs(),
            "Draining connections"
        );
        let drained = tokio::time::timeout(grace, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                remaining = connections.len(),
                "Grace period expired, closing remaining connections"
            );
            connections.abort_all();
            while connections.join_next().await.is_some() {}
        }

        tracing::info!("Gateway stopped");
        Ok(())
    }
}

/// Serve one client connection until it closes or the server drains.
async fn serve_connection(
    stream: TcpStream,
    guard: ConnectionGuard,
    _permit: ConnectionPermit,
    app: axum::Router,
    header_read: Duration,
    mut drain: watch::Receiver<bool>,
) {
    let context = Arc::clone(guard.context());
    let service_context = Arc::clone(&context);
    let service = service_fn(move |mut request: Request<Incoming>| {
        attach_context(&mut request, &service_context);
        app.clone().oneshot(request)
    });

    let mut builder = AutoBuilder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(header_read);
    builder.http2().timer(TokioTimer::new());

    let conn = builder.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = drain.changed() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };

    if let Err(err) = result {
        context.fail();
        tracing::debug!(
            connection_id = %context.id(),
            peer_addr = %context.peer(),
            error = %err,
            "Connection ended with error"
        );
    }

    drop(guard);
}

/// Give the request its connection's state machine.
///
/// Only HTTP/1 requests drive it: they run one at a time on a connection.
/// HTTP/2 streams are concurrent, so for them the context tracks the
/// connection lifetime alone (`Accepted`, then `Closed` or `Errored`).
fn attach_context<B>(request: &mut Request<B>, context: &Arc<ConnectionContext>) {
    if request.version() < Version::HTTP_2 {
        request.extensions_mut().insert(Arc::clone(context));
    }
}

/// Handles every request: validate, route, forward.
async fn gateway_handler(State(state): State<GatewayState>, request: Request<Body>) -> Response<Body> {
    let started = Instant::now();
    let deadline = Deadline::start(state.request_timeout);
    let context = request.extensions().get::<Arc<ConnectionContext>>().cloned();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    advance(context.as_deref(), ConnectionState::Parsing);

    let (route, result) = dispatch(&state, request, context.as_deref(), deadline).await;
    let route = route.unwrap_or_else(|| NO_ROUTE.to_string());

    match result {
        Ok(response) => {
            advance(context.as_deref(), ConnectionState::Responding);
            metrics::record_request(&route, response.status().as_u16(), started);
            tracing::info!(
                route = %route,
                method = %method,
                path = %path,
                status = response.status().as_u16(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Request completed"
            );
            response
        }
        Err(err) => {
            if let Some(ctx) = context.as_deref() {
                ctx.fail();
            }
            let status = err.status();
            metrics::record_request(&route, status.as_u16(), started);
            match &err {
                GatewayError::Protocol(_) | GatewayError::Routing(_) => tracing::info!(
                    route = %route,
                    method = %method,
                    path = %path,
                    status = status.as_u16(),
                    error = %err,
                    "Request rejected"
                ),
                _ => tracing::warn!(
                    route = %route,
                    method = %method,
                    path = %path,
                    status = status.as_u16(),
                    reason = err.reason().unwrap_or("internal"),
                    error = %err,
                    "Request failed"
                ),
            }
            err.into_response()
        }
    }
}

async fn dispatch(
    state: &GatewayState,
    request: Request<Body>,
    context: Option<&ConnectionContext>,
    deadline: Deadline,
) -> (Option<String>, Result<Response<Body>, GatewayError>) {
    if let Err(err) = validate_inbound(&request, state.max_uri_length) {
        return (None, Err(err.into()));
    }

    advance(context, ConnectionState::Routing);
    let target = match state.router.route(request.uri()) {
        Ok(RouteOutcome::Forward(target)) => target,
        Ok(RouteOutcome::Redirect { route, location }) => {
            return (Some(route), Ok(redirect(&location)));
        }
        Err(err) => return (None, Err(err.into())),
    };

    advance(context, ConnectionState::Forwarding);
    let client = ClientInfo::new(context.map(ConnectionContext::peer));
    let result = match deadline.run(state.engine.forward(request, &target, &client)).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(err)) => {
            metrics::record_upstream_error(&target.route, err.reason());
            Err(err.into())
        }
        Err(expired) => {
            metrics::record_upstream_error(&target.route, "timeout");
            Err(GatewayError::RequestTimeout {
                budget: expired.budget,
            })
        }
    };

    (Some(target.route), result)
}

fn advance(context: Option<&ConnectionContext>, next: ConnectionState) {
    if let Some(ctx) = context {
        ctx.transition(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RouteConfig, UpstreamScheme};
    use crate::net::connection::ConnectionId;
    use axum::http::{header, StatusCode};

    fn config(routes: Vec<RouteConfig>) -> GatewayConfig {
        GatewayConfig {
            routes,
            ..GatewayConfig::default()
        }
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("host", "gateway")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn bare_prefix_redirects() {
        let server = GatewayServer::new(GatewayConfig::default()).unwrap();
        let response = server.app().oneshot(get("/api?x=1")).await.unwrap();

        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()[header::LOCATION], "/api/?x=1");
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn unmatched_path_is_404_without_catch_all() {
        let server = GatewayServer::new(config(vec![RouteConfig::prefix(
            "api", "/api/", "127.0.0.1", 9,
        )]))
        .unwrap();
        let response = server.app().oneshot(get("/elsewhere")).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[header::CONNECTION], "close");
    }

    #[tokio::test]
    async fn missing_host_is_400() {
        let server = GatewayServer::new(GatewayConfig::default()).unwrap();
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = server.app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn request_id_is_kept() {
        let server = GatewayServer::new(GatewayConfig::default()).unwrap();
        let request = Request::builder()
            .uri("/api")
            .header("host", "gateway")
            .header("x-request-id", "abc-123")
            .body(Body::empty())
            .unwrap();
        let response = server.app().oneshot(request).await.unwrap();
        assert_eq!(response.headers()["x-request-id"], "abc-123");
    }

    #[tokio::test]
    async fn only_http1_requests_drive_connection_state() {
        let server = GatewayServer::new(config(vec![RouteConfig::prefix(
            "api", "/api/", "127.0.0.1", 9,
        )]))
        .unwrap();

        let h2 = Arc::new(ConnectionContext::new(ConnectionId::new(), "127.0.0.1:1".parse().unwrap()));
        for _ in 0..2 {
            let mut request = Request::builder()
                .version(Version::HTTP_2)
                .uri("http://gateway/elsewhere")
                .body(Body::empty())
                .unwrap();
            attach_context(&mut request, &h2);
            assert!(request.extensions().get::<Arc<ConnectionContext>>().is_none());
            let response = server.app().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
        assert_eq!(h2.state(), ConnectionState::Accepted);

        let h1 = Arc::new(ConnectionContext::new(ConnectionId::new(), "127.0.0.1:2".parse().unwrap()));
        let mut request = get("/elsewhere");
        attach_context(&mut request, &h1);
        let response = server.app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(h1.state(), ConnectionState::Errored);
    }

    #[test]
    fn https_upstream_builds() {
        let server = GatewayServer::new(config(vec![
            RouteConfig {
                scheme: UpstreamScheme::Https,
                ..RouteConfig::prefix("docs", "/docs/", "docs.example.com", 443)
            },
            RouteConfig::catch_all("frontend", "frontend", 3000),
        ]))
        .unwrap();
        assert_eq!(server.router().registry().routes().len(), 2);
    }

    #[tokio::test]
    async fn invalid_routes_fail_construction() {
        let result = GatewayServer::new(config(vec![
            RouteConfig::catch_all("a", "frontend", 3000),
            RouteConfig::catch_all("b", "other", 3001),
        ]));
        assert!(result.is_err());
    }
}
