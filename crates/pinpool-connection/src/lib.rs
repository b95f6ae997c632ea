//! pinpool connection - bounded connection pooling with transactional pinning
//!
//! This crate owns the connection lifecycle: it opens connections lazily up to
//! a configured bound, queues callers once the bound is reached, reaps idle
//! connections in the background, and pins one connection for the duration of
//! a transaction.

pub mod pool;
mod transaction;

pub use pinpool_core::{Connection, ConnectionFactory, PoolError, Result, Row, RunResult, Value};
pub use pool::{ConnectionId, Pool, PoolConfig, PoolStats, PooledConnection};
pub use transaction::{Savepoint, TransactionBehavior, TransactionContext};

#[cfg(feature = "sqlite")]
pub use pinpool_driver_sqlite::{SqliteDriver, SqliteOptions};
