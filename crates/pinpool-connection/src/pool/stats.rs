//! Pool statistics types

use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of a connection pool
///
/// Computed by counting flags under the pool lock; carries no guarantees
/// once returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Connections currently handed out
    active: usize,
    /// Connections available for immediate reuse
    idle: usize,
    /// Live connections (active + idle)
    total: usize,
    /// Configured maximum
    max: usize,
    /// Callers waiting in the acquisition queue
    queued: usize,
}

impl PoolStats {
    /// Create new pool statistics
    pub fn new(active: usize, idle: usize, max: usize, queued: usize) -> Self {
        Self {
            active,
            idle,
            total: active + idle,
            max,
            queued,
        }
    }

    /// Get the number of active (in-use) connections
    pub fn active(&self) -> usize {
        self.active
    }

    /// Get the number of idle connections
    pub fn idle(&self) -> usize {
        self.idle
    }

    /// Get the total number of connections
    pub fn total(&self) -> usize {
        self.total
    }

    /// Get the configured maximum
    pub fn max(&self) -> usize {
        self.max
    }

    /// Get the number of queued callers
    pub fn queued(&self) -> usize {
        self.queued
    }

    /// Share of the maximum currently in use (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            0.0
        } else {
            self.active as f64 / self.max as f64
        }
    }

    /// Every allowed connection exists and is in use
    pub fn is_saturated(&self) -> bool {
        self.idle == 0 && self.total >= self.max
    }
}
