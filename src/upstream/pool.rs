//! Upstream connection pooling.
//!
//! # Responsibilities
//! - Hand out connections to an upstream (`acquire`)
//! - Take back connections whose exchange finished cleanly (`release`)
//! - Discard idle connections that expired or were closed by the upstream
//!
//! # Design Decisions
//! - Pooling is a capability: `DirectPool` dials every time, `IdlePool`
//!   keeps idle connections keyed by upstream; both sit behind one trait
//! - Idle queues are LIFO so the warmest connection is reused first
//! - A connection is only released after its response body ended; anything
//!   interrupted is dropped instead

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use tokio::time::Instant;

use crate::config::PoolConfig;
use crate::error::ForwardingError;
use crate::observability::metrics;
use crate::routing::Upstream;
use crate::upstream::connector::{Connector, UpstreamConnection};

/// Source of upstream connections.
pub trait ConnectionPool: Send + Sync + 'static {
    /// Get a connection ready to carry one request.
    fn acquire<'a>(
        &'a self,
        upstream: &'a Arc<Upstream>,
    ) -> BoxFuture<'a, Result<UpstreamConnection, ForwardingError>>;

    /// Return a connection whose last exchange completed.
    fn release(&self, conn: UpstreamConnection);

    fn stats(&self) -> &PoolStats;
}

/// Counters shared by pool implementations.
#[derive(Debug, Default)]
pub struct PoolStats {
    dialed: AtomicU64,
    reused: AtomicU64,
    released: AtomicU64,
    discarded: AtomicU64,
}

impl PoolStats {
    pub fn record_dial(&self) {
        self.dialed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reuse(&self) {
        self.reused.fetch_add(1, Ordering::Relaxed);
        metrics::record_pool_reuse();
    }

    pub fn record_release(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discard(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dialed(&self) -> u64 {
        self.dialed.load(Ordering::Relaxed)
    }

    pub fn reused(&self) -> u64 {
        self.reused.load(Ordering::Relaxed)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

/// Dials a fresh connection for every request; release closes it.
#[derive(Debug)]
pub struct DirectPool {
    connector: Connector,
    stats: PoolStats,
}

impl DirectPool {
    pub fn new(connector: Connector) -> Self {
        Self {
            connector,
            stats: PoolStats::default(),
        }
    }
}

impl ConnectionPool for DirectPool {
    fn acquire<'a>(
        &'a self,
        upstream: &'a Arc<Upstream>,
    ) -> BoxFuture<'a, Result<UpstreamConnection, ForwardingError>> {
        Box::pin(async move {
            let conn = self.connector.connect(upstream).await?;
            self.stats.record_dial();
            Ok(conn)
        })
    }

    fn release(&self, conn: UpstreamConnection) {
        self.stats.record_discard();
        drop(conn);
    }

    fn stats(&self) -> &PoolStats {
        &self.stats
    }
}

/// An idle connection waiting in the pool.
#[derive(Debug)]
struct IdleEntry {
    conn: UpstreamConnection,
    idle_since: Instant,
}

impl IdleEntry {
    fn is_usable(&self, idle_timeout: Duration) -> bool {
        !self.conn.is_closed() && self.idle_since.elapsed() < idle_timeout
    }
}

/// Keeps idle connections per upstream for reuse.
#[derive(Debug)]
pub struct IdlePool {
    connector: Connector,
    idle: DashMap<String, VecDeque<IdleEntry>>,
    max_idle_per_upstream: usize,
    idle_timeout: Duration,
    stats: PoolStats,
}

impl IdlePool {
    pub fn new(connector: Connector, config: &PoolConfig) -> Self {
        Self {
            connector,
            idle: DashMap::new(),
            max_idle_per_upstream: config.max_idle_per_upstream,
            idle_timeout: config.idle_timeout(),
            stats: PoolStats::default(),
        }
    }

    /// Idle connections currently held for `upstream`.
    pub fn idle_count(&self, upstream: &Upstream) -> usize {
        self.idle
            .get(&upstream.pool_key())
            .map(|queue| queue.len())
            .unwrap_or(0)
    }

    fn take_idle(&self, key: &str) -> Option<IdleEntry> {
        self.idle.get_mut(key).and_then(|mut queue| queue.pop_back())
    }
}

impl ConnectionPool for IdlePool {
    fn acquire<'a>(
        &'a self,
        upstream: &'a Arc<Upstream>,
    ) -> BoxFuture<'a, Result<UpstreamConnection, ForwardingError>> {
        Box::pin(async move {
            let key = upstream.pool_key();

            while let Some(entry) = self.take_idle(&key) {
                if !entry.is_usable(self.idle_timeout) {
                    self.stats.record_discard();
                    continue;
                }
                let mut conn = entry.conn;
                if conn.ready().await.is_err() {
                    self.stats.record_discard();
                    continue;
                }
                self.stats.record_reuse();
                tracing::trace!(upstream = %key, connection = conn.id(), "Reusing pooled connection");
                return Ok(conn);
            }

            let conn = self.connector.connect(upstream).await?;
            self.stats.record_dial();
            Ok(conn)
        })
    }

    fn release(&self, conn: UpstreamConnection) {
        if conn.is_closed() {
            self.stats.record_discard();
            return;
        }

        let key = conn.upstream().pool_key();
        let mut queue = self.idle.entry(key).or_default();
        let idle_timeout = self.idle_timeout;
        let before = queue.len();
        queue.retain(|entry| entry.is_usable(idle_timeout));
        let mut dropped = before - queue.len();

        while queue.len() >= self.max_idle_per_upstream {
            queue.pop_front();
            dropped += 1;
        }
        queue.push_back(IdleEntry {
            conn,
            idle_since: Instant::now(),
        });
        drop(queue);

        for _ in 0..dropped {
            self.stats.record_discard();
        }
        self.stats.record_release();
    }

    fn stats(&self) -> &PoolStats {
        &self.stats
    }
}

/// Build the pool selected by configuration.
pub fn build_pool(config: &PoolConfig, connector: Connector) -> Arc<dyn ConnectionPool> {
    if config.enabled {
        tracing::debug!(
            max_idle = config.max_idle_per_upstream,
            idle_timeout_ms = config.idle_timeout_ms,
            "Upstream connection pool enabled"
        );
        Arc::new(IdlePool::new(connector, config))
    } else {
        tracing::debug!("Upstream connection pooling disabled");
        Arc::new(DirectPool::new(connector))
    }
}
