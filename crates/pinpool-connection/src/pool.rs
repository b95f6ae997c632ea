//! Connection pooling for database connections
//!
//! This module provides a bounded pool with FIFO queueing of callers once the
//! pool is saturated, acquisition timeouts, idle reaping and statistics.
//!
//! # Example
//!
//! ```ignore
//! use pinpool_connection::pool::{Pool, PoolConfig};
//!
//! let config = PoolConfig::new(5)
//!     .with_acquire_timeout_ms(5000)
//!     .with_idle_timeout_ms(300000);
//!
//! let pool = Pool::new(config, connection_factory);
//! let row = pool.get("SELECT name FROM users WHERE id = ?", &[1.into()]).await?;
//!
//! let conn = pool.acquire().await?;
//! // Use connection...
//! // Connection returned to pool on drop
//! ```

mod config;
mod pool;
mod queue;
mod reaper;
mod record;
mod stats;

#[cfg(test)]
mod tests;

pub use config::PoolConfig;
pub use pool::{Pool, PooledConnection};
pub use record::ConnectionId;
pub use stats::PoolStats;
