//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Track connection state (Accepted → Parsing → Routing → Forwarding →
//!   Responding → Closed, with Errored on failure)
//! - Generate unique connection IDs for tracing
//! - Count open connections for shutdown and metrics
//!
//! # Design Decisions
//! - State lives in an atomic so the connection task and the request
//!   handler can both advance it without locking
//! - Illegal transitions are refused and logged, never panicked on

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use std::net::SocketAddr;

use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Where a client connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Socket accepted, no request yet.
    Accepted = 0,
    /// A request head has arrived and is being checked.
    Parsing = 1,
    Routing = 2,
    /// Waiting on the upstream.
    Forwarding = 3,
    /// Response head handed back to the client.
    Responding = 4,
    /// Something failed; the connection will close.
    Errored = 5,
    Closed = 6,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Accepted,
            1 => ConnectionState::Parsing,
            2 => ConnectionState::Routing,
            3 => ConnectionState::Forwarding,
            4 => ConnectionState::Responding,
            5 => ConnectionState::Errored,
            _ => ConnectionState::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Accepted => "accepted",
            ConnectionState::Parsing => "parsing",
            ConnectionState::Routing => "routing",
            ConnectionState::Forwarding => "forwarding",
            ConnectionState::Responding => "responding",
            ConnectionState::Errored => "errored",
            ConnectionState::Closed => "closed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }

    /// Whether `self → next` is a legal step.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, next) {
            (Closed, _) => false,
            (Errored, Closed) => true,
            (Errored, _) => false,
            (_, Errored) => true,
            (Accepted, Parsing) | (Accepted, Closed) => true,
            (Parsing, Routing) => true,
            (Routing, Forwarding) | (Routing, Responding) => true,
            (Forwarding, Responding) => true,
            // Keep-alive: the next request on the same connection.
            (Responding, Parsing) | (Responding, Closed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-connection facts shared between the connection task and its requests.
#[derive(Debug)]
pub struct ConnectionContext {
    id: ConnectionId,
    peer: SocketAddr,
    state: AtomicU8,
}

impl ConnectionContext {
    pub fn new(id: ConnectionId, peer: SocketAddr) -> Self {
        Self {
            id,
            peer,
            state: AtomicU8::new(ConnectionState::Accepted as u8),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `next`. Returns false, leaving the state unchanged, when the
    /// step is not legal from the current state.
    pub fn transition(&self, next: ConnectionState) -> bool {
        let result = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                ConnectionState::from_u8(current)
                    .can_transition_to(next)
                    .then_some(next as u8)
            });

        match result {
            Ok(previous) => {
                tracing::trace!(
                    connection_id = %self.id,
                    from = %ConnectionState::from_u8(previous),
                    to = %next,
                    "Connection state changed"
                );
                true
            }
            Err(current) => {
                tracing::debug!(
                    connection_id = %self.id,
                    from = %ConnectionState::from_u8(current),
                    to = %next,
                    "Ignored illegal connection state change"
                );
                false
            }
        }
    }

    /// Mark the connection failed.
    pub fn fail(&self) {
        self.transition(ConnectionState::Errored);
    }

    /// Finish the connection. Anything still in flight is a failure first.
    pub fn close(&self) {
        match self.state() {
            ConnectionState::Accepted | ConnectionState::Responding | ConnectionState::Errored => {}
            ConnectionState::Closed => return,
            _ => self.fail(),
        }
        self.transition(ConnectionState::Closed);
    }
}

/// Tracks open connections.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection. The returned guard closes it on drop.
    pub fn track(&self, peer: SocketAddr) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        metrics::connection_opened();
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            context: Arc::new(ConnectionContext::new(ConnectionId::new(), peer)),
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }
}

/// Owns one connection's slot in the tracker.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    context: Arc<ConnectionContext>,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.context.id()
    }

    pub fn context(&self) -> &Arc<ConnectionContext> {
        &self.context
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.context.close();
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        metrics::connection_closed();
        tracing::trace!(connection_id = %self.context.id(), "Connection closed");
    }
}
