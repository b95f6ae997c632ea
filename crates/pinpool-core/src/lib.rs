//! pinpool core - driver-agnostic abstractions for the connection pool
//!
//! This crate defines the pieces every other pinpool crate depends on:
//!
//! - `Connection` - one live handle to the storage engine
//! - `ConnectionFactory` - how the pool opens new connections
//! - `PoolError` - the error taxonomy surfaced to pool callers
//! - Common types like `Value`, `Row` and `RunResult`

mod connection;
mod error;
mod types;

pub use connection::*;
pub use error::*;
pub use types::*;
