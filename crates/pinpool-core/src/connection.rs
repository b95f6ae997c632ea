//! Connection and connection factory traits

use crate::{Result, Row, RunResult, Value};
use async_trait::async_trait;
use std::sync::Arc;

/// One live handle to the storage engine
///
/// A connection is safe to use for one operation at a time. The pool never
/// hands the same connection to two callers; drivers may still serialize
/// internally.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the driver name (e.g., "sqlite")
    fn driver_name(&self) -> &str;

    /// Execute a statement that modifies data (INSERT/UPDATE/DELETE/DDL)
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<RunResult>;

    /// Execute a query and collect every row
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a query and return only the first row
    ///
    /// The default implementation collects every row; drivers should
    /// override it to stop stepping after the first one.
    async fn query_row(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.query(sql, params).await?.into_iter().next())
    }

    /// Execute one or more parameterless statements (transaction control, pragmas)
    async fn execute_batch(&self, sql: &str) -> Result<()>;

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;
}

/// Factory trait for creating new connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Create a new, fully initialized connection
    async fn create(&self) -> Result<Arc<dyn Connection>>;

    /// Validate that an idle connection is still usable before handing it out
    ///
    /// Default implementation only checks that it has not been closed.
    fn validate(&self, conn: &dyn Connection) -> bool {
        !conn.is_closed()
    }

    /// Storage location the factory connects to (a path or DSN), for logs and stats
    fn location(&self) -> &str {
        "<unknown>"
    }
}

#[async_trait]
impl<T: ConnectionFactory> ConnectionFactory for Arc<T> {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        (**self).create().await
    }

    fn validate(&self, conn: &dyn Connection) -> bool {
        (**self).validate(conn)
    }

    fn location(&self) -> &str {
        (**self).location()
    }
}
