//! Transactions pinned to a single pooled connection
//!
//! [`Pool::transaction`](crate::Pool::transaction) acquires one connection,
//! issues `BEGIN`, and hands the callback a [`TransactionContext`] whose
//! statements all run on that same connection. The connection goes back to
//! the pool exactly once, after `COMMIT` or `ROLLBACK`.

use pinpool_core::{PoolError, Result, Row, RunResult, Value};

use crate::pool::{ConnectionId, PooledConnection};

/// How a transaction takes its locks when it begins
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransactionBehavior {
    /// Locks are taken on first read or write
    #[default]
    Deferred,
    /// A write lock is taken immediately
    Immediate,
    /// An exclusive lock is taken immediately
    Exclusive,
}

impl TransactionBehavior {
    fn begin_sql(self) -> &'static str {
        match self {
            TransactionBehavior::Deferred => "BEGIN TRANSACTION",
            TransactionBehavior::Immediate => "BEGIN IMMEDIATE TRANSACTION",
            TransactionBehavior::Exclusive => "BEGIN EXCLUSIVE TRANSACTION",
        }
    }
}

/// A savepoint within a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    name: String,
}

impl Savepoint {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Statement surface bound to the connection a transaction is pinned to
///
/// Only lives for the duration of the transaction callback.
pub struct TransactionContext {
    id: ConnectionId,
    conn: Option<PooledConnection>,
    finished: bool,
}

impl TransactionContext {
    /// Issue `BEGIN` on `conn`.
    ///
    /// The context exists before `BEGIN` is sent so that dropping this future
    /// mid-way still rolls back whatever the driver ends up executing.
    pub(crate) async fn begin(conn: PooledConnection, behavior: TransactionBehavior) -> Result<Self> {
        let mut tx = Self {
            id: conn.id(),
            conn: Some(conn),
            finished: false,
        };

        let begun = tx.connection()?.execute_batch(behavior.begin_sql()).await;
        if let Err(err) = begun {
            tracing::warn!(error = %err, "failed to begin transaction");
            tx.finished = true;
            return Err(err);
        }

        tracing::debug!(connection_id = %tx.connection_id(), ?behavior, "transaction started");
        Ok(tx)
    }

    fn connection(&self) -> Result<&PooledConnection> {
        self.conn
            .as_ref()
            .ok_or_else(|| PoolError::Driver("transaction already finished".into()))
    }

    /// Identifier of the pinned connection
    pub fn connection_id(&self) -> ConnectionId {
        self.id
    }

    /// Run a query on the pinned connection and return its first row
    pub async fn get(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        self.connection()?.query_row(sql, params).await
    }

    /// Run a query on the pinned connection and return every row
    pub async fn all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.connection()?.query(sql, params).await
    }

    /// Run a statement on the pinned connection
    pub async fn run(&self, sql: &str, params: &[Value]) -> Result<RunResult> {
        self.connection()?.execute(sql, params).await
    }

    /// Create a savepoint with the given name.
    ///
    /// Names must be plain identifiers: ASCII letters, digits and underscores,
    /// not starting with a digit.
    pub async fn savepoint(&self, name: &str) -> Result<Savepoint> {
        validate_savepoint_name(name)?;
        self.connection()?
            .execute_batch(&format!("SAVEPOINT {}", name))
            .await?;
        Ok(Savepoint {
            name: name.to_string(),
        })
    }

    /// Rollback to a previously created savepoint, keeping it active.
    pub async fn rollback_to_savepoint(&self, savepoint: &Savepoint) -> Result<()> {
        self.connection()?
            .execute_batch(&format!("ROLLBACK TO SAVEPOINT {}", savepoint.name))
            .await
    }

    /// Release (delete) a savepoint, keeping its changes in the transaction.
    pub async fn release_savepoint(&self, savepoint: Savepoint) -> Result<()> {
        self.connection()?
            .execute_batch(&format!("RELEASE SAVEPOINT {}", savepoint.name))
            .await
    }

    /// Commit. A failed `COMMIT` is followed by a best-effort rollback and
    /// the commit error is returned.
    pub(crate) async fn commit(mut self) -> Result<()> {
        let committed = self.connection()?.execute_batch("COMMIT").await;
        match committed {
            Ok(()) => {
                self.finished = true;
                tracing::debug!(connection_id = %self.connection_id(), "transaction committed");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "commit failed, rolling back");
                self.rollback_in_place().await;
                Err(err)
            }
        }
    }

    /// Best-effort rollback; failures are logged, never returned.
    pub(crate) async fn rollback(mut self) {
        self.rollback_in_place().await;
    }

    async fn rollback_in_place(&mut self) {
        let rolled_back = match self.conn.as_ref() {
            Some(conn) => conn.execute_batch("ROLLBACK").await,
            None => Ok(()),
        };

        match rolled_back {
            Ok(()) => {
                tracing::debug!(connection_id = %self.connection_id(), "transaction rolled back");
            }
            Err(err) => {
                let err = PoolError::Rollback(err.to_string());
                tracing::warn!(
                    connection_id = %self.connection_id(),
                    error = %err,
                    "rollback failed, retiring connection"
                );
                // Its transaction state is unknown; keep it out of circulation.
                if let Some(conn) = self.conn.as_mut() {
                    conn.mark_discard();
                }
            }
        }
        self.finished = true;
    }
}

impl Drop for TransactionContext {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let Some(mut conn) = self.conn.take() else {
            return;
        };

        tracing::warn!(connection_id = %conn.id(), "transaction abandoned, rolling back in background");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = conn.execute_batch("ROLLBACK").await {
                        tracing::warn!(connection_id = %conn.id(), error = %err, "background rollback failed");
                        conn.mark_discard();
                    }
                });
            }
            Err(_) => conn.mark_discard(),
        }
    }
}

fn validate_savepoint_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(PoolError::Statement(format!(
            "invalid savepoint name '{}'",
            name
        )))
    }
}
