//! Upstream connection establishment.
//!
//! # Responsibilities
//! - Dial the upstream with a connect timeout
//! - Optional TLS handshake (rustls, webpki roots, SNI = upstream host)
//! - HTTP/1.1 client handshake and connection driver task
//!
//! # Design Decisions
//! - The whole dial (TCP + TLS + HTTP handshake) shares one timeout
//! - The driver task ends when the sender is dropped, so a dropped
//!   connection never lingers as an orphan

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use hyper::body::Incoming;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_rustls::TlsConnector;

use crate::config::UpstreamScheme;
use crate::error::ForwardingError;
use crate::routing::Upstream;

static UPSTREAM_CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// An established HTTP/1.1 connection to one upstream.
#[derive(Debug)]
pub struct UpstreamConnection {
    id: u64,
    upstream: Arc<Upstream>,
    sender: SendRequest<Body>,
    created_at: Instant,
    requests: u64,
}

impl UpstreamConnection {
    fn new(upstream: Arc<Upstream>, sender: SendRequest<Body>) -> Self {
        Self {
            id: UPSTREAM_CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed),
            upstream,
            sender,
            created_at: Instant::now(),
            requests: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn upstream(&self) -> &Arc<Upstream> {
        &self.upstream
    }

    /// Requests sent over this connection so far.
    pub fn requests(&self) -> u64 {
        self.requests
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// True once the upstream side has gone away.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Wait until the connection can take a request.
    pub async fn ready(&mut self) -> Result<(), ForwardingError> {
        self.sender
            .ready()
            .await
            .map_err(|e| ForwardingError::from_hyper(self.upstream.authority(), e))
    }

    /// Send one request and wait for the response head.
    pub async fn send(&mut self, request: Request<Body>) -> Result<Response<Incoming>, ForwardingError> {
        self.requests += 1;
        self.sender
            .send_request(request)
            .await
            .map_err(|e| ForwardingError::from_hyper(self.upstream.authority(), e))
    }
}

/// Dials upstreams.
#[derive(Clone)]
pub struct Connector {
    connect_timeout: Duration,
    tls: TlsConnector,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl Connector {
    /// Build a connector using the ring provider explicitly; other crates
    /// in the graph may enable a second rustls provider.
    pub fn new(connect_timeout: Duration) -> Result<Self, rustls::Error> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self {
            connect_timeout,
            tls: TlsConnector::from(Arc::new(tls)),
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Open a new connection, bounded by the connect timeout.
    pub async fn connect(&self, upstream: &Arc<Upstream>) -> Result<UpstreamConnection, ForwardingError> {
        let started = Instant::now();
        match tokio::time::timeout(self.connect_timeout, self.dial(upstream)).await {
            Ok(Ok(sender)) => {
                tracing::debug!(
                    upstream = %upstream,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Upstream connection established"
                );
                Ok(UpstreamConnection::new(Arc::clone(upstream), sender))
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ForwardingError::ConnectTimeout {
                upstream: upstream.authority(),
                elapsed: self.connect_timeout,
            }),
        }
    }

    async fn dial(&self, upstream: &Arc<Upstream>) -> Result<SendRequest<Body>, ForwardingError> {
        let authority = upstream.authority();
        let tcp = TcpStream::connect(authority.as_str())
            .await
            .map_err(|e| ForwardingError::from_connect(authority.clone(), e))?;
        if let Err(e) = tcp.set_nodelay(true) {
            tracing::trace!(upstream = %authority, error = %e, "Failed to set TCP_NODELAY");
        }

        match upstream.scheme() {
            UpstreamScheme::Http => handshake(tcp, upstream).await,
            UpstreamScheme::Https => {
                let server_name = ServerName::try_from(upstream.host())
                    .map_err(|e| ForwardingError::Tls {
                        upstream: authority.clone(),
                        message: e.to_string(),
                    })?
                    .to_owned();
                let tls = self
                    .tls
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| ForwardingError::Tls {
                        upstream: authority.clone(),
                        message: e.to_string(),
                    })?;
                handshake(tls, upstream).await
            }
        }
    }
}

async fn handshake<T>(io: T, upstream: &Arc<Upstream>) -> Result<SendRequest<Body>, ForwardingError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sender, connection) = http1::Builder::new()
        .handshake::<_, Body>(TokioIo::new(io))
        .await
        .map_err(|e| ForwardingError::from_hyper(upstream.authority(), e))?;

    let key = upstream.pool_key();
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            tracing::debug!(upstream = %key, error = %err, "Upstream connection closed with error");
        }
    });

    Ok(sender)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;
    use crate::routing::UpstreamRegistry;
    use tokio::net::TcpListener;

    fn upstream(port: u16) -> Arc<Upstream> {
        let registry =
            UpstreamRegistry::from_config(&[RouteConfig::catch_all("t", "127.0.0.1", port)]).unwrap();
        Arc::clone(&registry.upstreams()[0])
    }

    #[test]
    fn builds_tls_client_alongside_other_providers() {
        // The dependency graph enables both ring and aws-lc-rs in rustls.
        let connector = Connector::new(Duration::from_secs(3)).unwrap();
        assert_eq!(connector.connect_timeout(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn refused_connection_is_classified() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = Connector::new(Duration::from_secs(2)).unwrap();
        let err = connector.connect(&upstream(port)).await.unwrap_err();
        assert_eq!(err.reason(), "connection_refused");
    }

    #[tokio::test]
    async fn connects_to_a_listening_upstream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _held = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let connector = Connector::new(Duration::from_secs(2)).unwrap();
        let conn = connector.connect(&upstream(port)).await.unwrap();
        assert_eq!(conn.requests(), 0);
        assert!(!conn.is_closed());
        assert_eq!(conn.upstream().port(), port);
    }
}
