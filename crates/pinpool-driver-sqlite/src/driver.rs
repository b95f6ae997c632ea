//! SQLite driver: the connection factory handed to the pool

use std::sync::Arc;

use async_trait::async_trait;
use pinpool_core::{Connection, ConnectionFactory, Result};

use crate::{SqliteConnection, SqliteOptions};

/// SQLite database driver
///
/// Opens a fresh, pragma-initialized native connection each time the pool
/// grows.
pub struct SqliteDriver {
    options: SqliteOptions,
}

impl SqliteDriver {
    /// Create a driver for the given options
    pub fn new(options: SqliteOptions) -> Self {
        tracing::debug!(path = %options.path(), "SQLite driver initialized");
        Self { options }
    }

    /// Create a driver for a database path with default options
    pub fn open(path: impl Into<String>) -> Self {
        Self::new(SqliteOptions::new(path))
    }

    pub fn options(&self) -> &SqliteOptions {
        &self.options
    }
}

#[async_trait]
impl ConnectionFactory for SqliteDriver {
    #[tracing::instrument(skip(self), fields(path = %self.options.path()))]
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        let conn = SqliteConnection::connect(self.options.clone()).await?;
        Ok(Arc::new(conn))
    }

    fn location(&self) -> &str {
        self.options.path()
    }
}
