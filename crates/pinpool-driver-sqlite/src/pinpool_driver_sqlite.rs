//! SQLite driver for pinpool
//!
//! Wraps a blocking `rusqlite` connection behind the async `Connection`
//! trait. Every statement runs on tokio's blocking pool so a slow query never
//! stalls the executor threads the pool's callers are scheduled on.

mod connection;
mod driver;
mod options;

pub use connection::SqliteConnection;
pub use driver::SqliteDriver;
pub use options::{SqliteOptions, DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_MMAP_SIZE};
