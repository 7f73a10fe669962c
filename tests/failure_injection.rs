//! Failure injection tests: dead, silent and misbehaving upstreams, bad clients.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

mod common;

use common::{Echo, Held};

#[tokio::test]
async fn test_refused_upstream_is_bad_gateway() {
    let dead = common::refused_addr().await;
    let frontend = common::start_echo_backend("frontend").await;
    let gateway = common::start_gateway(common::stack_config(dead, frontend)).await;
    let client = common::client();

    let response = client.get(gateway.url("/api/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(response.headers()["connection"], "close");
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "bad_gateway");
    assert_eq!(body["reason"], "connection_refused");

    // The frontend is unaffected.
    let echo: Echo = client.get(gateway.url("/")).send().await.unwrap().json().await.unwrap();
    assert_eq!(echo.backend, "frontend");

    gateway.stop().await;
}

#[tokio::test]
async fn test_silent_upstream_hits_request_budget() {
    let silent = common::start_silent_backend().await;
    let frontend = common::start_echo_backend("frontend").await;
    let mut config = common::stack_config(silent, frontend);
    config.timeouts.request_secs = 1;
    let gateway = common::start_gateway(config).await;

    let started = Instant::now();
    let response = common::client().get(gateway.url("/api/slow")).send().await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert!(elapsed >= Duration::from_millis(900), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "{elapsed:?}");
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "gateway_timeout");
    assert_eq!(body["reason"], "timeout");

    gateway.stop().await;
}

#[tokio::test]
async fn test_client_disconnect_cancels_upstream_exchange() {
    let (backend, mut held) = common::start_holding_backend().await;
    let frontend = common::start_echo_backend("frontend").await;
    let gateway = common::start_gateway(common::stack_config(backend, frontend)).await;

    let mut socket = TcpStream::connect(gateway.addr).await.unwrap();
    socket
        .write_all(b"GET /api/slow HTTP/1.1\r\nHost: gateway\r\n\r\n")
        .await
        .unwrap();
    let seen = tokio::time::timeout(Duration::from_secs(5), held.recv()).await.unwrap();
    assert_eq!(seen, Some(Held::Head));

    drop(socket);
    let seen = tokio::time::timeout(Duration::from_secs(5), held.recv()).await.unwrap();
    assert_eq!(seen, Some(Held::Eof));

    // The abandoned connection never went back to the pool.
    let stats = gateway.pool.stats();
    assert_eq!(stats.dialed(), 1);
    assert_eq!(stats.released(), 0);

    gateway.stop().await;
}

#[tokio::test]
async fn test_upstream_errors_are_relayed_not_rewritten() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let backend = common::start_programmable_backend(move || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            (503, "backend overloaded".to_string())
        }
    })
    .await;
    let frontend = common::start_echo_backend("frontend").await;
    let gateway = common::start_gateway(common::stack_config(backend, frontend)).await;

    let response = common::client().get(gateway.url("/api/items")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.text().await.unwrap(), "backend overloaded");

    // One attempt only: no retries.
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    gateway.stop().await;
}

#[tokio::test]
async fn test_truncated_upstream_body_aborts_client_response() {
    let backend = common::start_raw_backend(
        "HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nonly ten b",
    )
    .await;
    let frontend = common::start_echo_backend("frontend").await;
    let gateway = common::start_gateway(common::stack_config(backend, frontend)).await;
    let client = common::client();

    let response = client.get(gateway.url("/api/partial")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.bytes().await.is_err());

    // Still serving.
    let response = client.get(gateway.url("/")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    gateway.stop().await;
}

#[tokio::test]
async fn test_stalled_upstream_body_is_cut_off() {
    let backend = common::start_stalling_backend(
        "HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nhello",
        Duration::from_secs(30),
    )
    .await;
    let frontend = common::start_echo_backend("frontend").await;
    let mut config = common::stack_config(backend, frontend);
    config.timeouts.body_idle_secs = 1;
    let gateway = common::start_gateway(config).await;

    let started = Instant::now();
    let response = common::client().get(gateway.url("/api/stall")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.bytes().await.is_err());
    assert!(started.elapsed() < Duration::from_secs(10));

    gateway.stop().await;
}

#[tokio::test]
async fn test_malformed_request_is_bad_request() {
    let backend = common::start_echo_backend("backend").await;
    let frontend = common::start_echo_backend("frontend").await;
    let gateway = common::start_gateway(common::stack_config(backend, frontend)).await;

    let response = common::raw_request(gateway.addr, b"THIS IS NOT HTTP\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 400"), "{response}");

    gateway.stop().await;
}

#[tokio::test]
async fn test_missing_host_is_bad_request() {
    let backend = common::start_echo_backend("backend").await;
    let frontend = common::start_echo_backend("frontend").await;
    let gateway = common::start_gateway(common::stack_config(backend, frontend)).await;

    let response = common::raw_request(gateway.addr, b"GET /api/x HTTP/1.1\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 400"), "{response}");
    assert!(response.contains("bad_request"), "{response}");
    assert!(response.to_ascii_lowercase().contains("connection: close"), "{response}");

    gateway.stop().await;
}

#[tokio::test]
async fn test_overlong_target_is_bad_request() {
    let backend = common::start_echo_backend("backend").await;
    let frontend = common::start_echo_backend("frontend").await;
    let mut config = common::stack_config(backend, frontend);
    config.listener.max_uri_length = 64;
    let gateway = common::start_gateway(config).await;

    let path = format!("/api/{}", "a".repeat(100));
    let response = common::client().get(gateway.url(&path)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    gateway.stop().await;
}

#[tokio::test]
async fn test_no_catch_all_gives_not_found() {
    let backend = common::start_echo_backend("backend").await;
    let mut config = common::stack_config(backend, backend);
    config.routes.truncate(1);
    let gateway = common::start_gateway(config).await;

    let response = common::client().get(gateway.url("/dashboard")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "no_route");

    gateway.stop().await;
}
