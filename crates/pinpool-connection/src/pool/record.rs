//! Pooled connection records

use std::fmt;
use std::sync::Arc;

use pinpool_core::Connection;
use tokio::time::Instant;
use uuid::Uuid;

/// Opaque identifier of one native connection in the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A native connection plus the bookkeeping the pool keeps for it.
///
/// `in_use` is only ever flipped while the pool lock is held, in the same
/// step that hands the connection to (or takes it back from) a caller.
pub(crate) struct ConnectionRecord {
    pub(crate) id: ConnectionId,
    pub(crate) connection: Arc<dyn Connection>,
    pub(crate) in_use: bool,
    pub(crate) created_at: Instant,
    pub(crate) last_used_at: Instant,
}

impl ConnectionRecord {
    /// Record for a freshly opened connection, already claimed by its creator
    pub(crate) fn claimed(connection: Arc<dyn Connection>) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            connection,
            in_use: true,
            created_at: now,
            last_used_at: now,
        }
    }

    pub(crate) fn claim(&mut self) -> Checkout {
        debug_assert!(!self.in_use, "claimed a connection that is already in use");
        self.in_use = true;
        self.touch();
        self.checkout()
    }

    pub(crate) fn touch(&mut self) {
        self.last_used_at = Instant::now();
    }

    pub(crate) fn checkout(&self) -> Checkout {
        Checkout {
            id: self.id,
            connection: Arc::clone(&self.connection),
        }
    }

    pub(crate) fn idle_for(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.last_used_at)
    }

    pub(crate) fn age(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.created_at)
    }
}

/// The caller-side half of a claimed record: which record, and its handle.
pub(crate) struct Checkout {
    pub(crate) id: ConnectionId,
    pub(crate) connection: Arc<dyn Connection>,
}
