//! Shared utilities for integration and load testing.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};

use stack_gateway::config::{GatewayConfig, ListenerConfig, RouteConfig};
use stack_gateway::lifecycle::{start, Shutdown};
use stack_gateway::upstream::ConnectionPool;

/// What the echo backend saw.
#[derive(Debug, Serialize, Deserialize)]
pub struct Echo {
    pub backend: String,
    pub method: String,
    /// Path and query as received.
    pub target: String,
    pub headers: BTreeMap<String, String>,
    pub body_len: usize,
}

impl Echo {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

async fn bind_local() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for name in headers.keys() {
        let joined = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(", ");
        map.insert(name.as_str().to_string(), joined);
    }
    map
}

/// Start a backend that answers every request with an [`Echo`] of it.
pub async fn start_echo_backend(name: &'static str) -> SocketAddr {
    let (listener, addr) = bind_local().await;
    let app = axum::Router::new().fallback(move |request: Request<Body>| async move {
        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX).await.unwrap_or_default();
        Json(Echo {
            backend: name.to_string(),
            method: parts.method.to_string(),
            target: parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_default(),
            headers: header_map(&parts.headers),
            body_len: body.len(),
        })
    });

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Read a request head from a raw socket.
async fn read_head(socket: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

/// Start a backend that reads a request head, then writes `response` verbatim
/// and closes the connection.
pub async fn start_raw_backend(response: &'static str) -> SocketAddr {
    let (listener, addr) = bind_local().await;

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                read_head(&mut socket).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Start a backend that writes `head` and then stalls for `stall` before closing.
pub async fn start_stalling_backend(head: &'static str, stall: Duration) -> SocketAddr {
    let (listener, addr) = bind_local().await;

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                read_head(&mut socket).await;
                let _ = socket.write_all(head.as_bytes()).await;
                tokio::time::sleep(stall).await;
            });
        }
    });
    addr
}

/// Start a programmable mock backend with async support.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let (listener, addr) = bind_local().await;
    let f = Arc::new(f);

    let app = axum::Router::new().fallback(move || {
        let f = Arc::clone(&f);
        async move {
            let (status, body) = f().await;
            let status = axum::http::StatusCode::from_u16(status).unwrap();
            (status, body)
        }
    });

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Start a backend that accepts connections and never answers.
pub async fn start_silent_backend() -> SocketAddr {
    let (listener, addr) = bind_local().await;

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

/// What a holding backend observed on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Held {
    Head,
    Eof,
}

/// Start a backend that reads a request head and never answers, reporting
/// when the head arrived and when the gateway closed the connection.
pub async fn start_holding_backend() -> (SocketAddr, mpsc::UnboundedReceiver<Held>) {
    let (listener, addr) = bind_local().await;
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                read_head(&mut socket).await;
                let _ = tx.send(Held::Head);
                let mut chunk = [0u8; 1024];
                loop {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
                let _ = tx.send(Held::Eof);
            });
        }
    });
    (addr, rx)
}

/// Start a backend streaming `chunks` chunks of `chunk_size` bytes.
///
/// The first chunk goes out immediately; the rest wait until `gate` is
/// notified.
pub async fn start_streaming_backend(chunks: usize, chunk_size: usize, gate: Arc<Notify>) -> SocketAddr {
    let (listener, addr) = bind_local().await;

    let app = axum::Router::new().fallback(move || {
        let gate = Arc::clone(&gate);
        async move {
            let stream = futures_util::stream::unfold(0usize, move |sent| {
                let gate = Arc::clone(&gate);
                async move {
                    if sent == chunks {
                        return None;
                    }
                    if sent == 1 {
                        gate.notified().await;
                    }
                    let chunk = Bytes::from(vec![b'x'; chunk_size]);
                    Some((Ok::<_, std::io::Error>(chunk), sent + 1))
                }
            });
            Body::from_stream(stream)
        }
    });

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// An address nothing listens on.
pub async fn refused_addr() -> SocketAddr {
    let (listener, addr) = bind_local().await;
    drop(listener);
    addr
}

pub fn api_route(backend: SocketAddr) -> RouteConfig {
    RouteConfig::prefix("api", "/api/", backend.ip().to_string(), backend.port()).with_strip_prefix(true)
}

pub fn frontend_route(frontend: SocketAddr) -> RouteConfig {
    RouteConfig::catch_all("frontend", frontend.ip().to_string(), frontend.port())
}

/// Gateway config for the usual two-service stack.
pub fn stack_config(backend: SocketAddr, frontend: SocketAddr) -> GatewayConfig {
    GatewayConfig {
        routes: vec![api_route(backend), frontend_route(frontend)],
        ..GatewayConfig::default()
    }
}

/// A gateway running on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub pool: Arc<dyn ConnectionPool>,
    pub handle: tokio::task::JoinHandle<()>,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the drain to finish.
    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(10), self.handle).await;
    }
}

pub async fn start_gateway(mut config: GatewayConfig) -> TestGateway {
    config.listener = ListenerConfig {
        bind_address: "127.0.0.1:0".into(),
        ..config.listener
    };

    let gateway = start(config).await.unwrap();
    let addr = gateway.local_addr().unwrap();
    let pool = Arc::clone(gateway.server().pool());
    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    let handle = tokio::spawn(async move {
        gateway.run(signal).await.unwrap();
    });

    TestGateway {
        addr,
        shutdown,
        pool,
        handle,
    }
}

/// HTTP client that does not follow redirects.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(15))
        .build()
        .unwrap()
}

/// Send raw bytes and read until the gateway closes the connection.
pub async fn raw_request(addr: SocketAddr, request: &[u8]) -> String {
    let mut socket = TcpStream::connect(addr).await.unwrap();
    socket.write_all(request).await.unwrap();

    let mut response = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(10), socket.read_to_end(&mut response)).await;
    String::from_utf8_lossy(&response).into_owned()
}
