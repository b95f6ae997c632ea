//! SQLite connection implementation

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use pinpool_core::{Connection, PoolError, Result, Row, RunResult, Value};
use rusqlite::{Connection as RusqliteConnection, OpenFlags, params_from_iter};

use crate::options::SqliteOptions;

/// SQLite connection wrapper
///
/// The native handle sits behind a mutex so statements issued from the
/// blocking pool are serialized; `None` once the connection is closed.
pub struct SqliteConnection {
    conn: Arc<Mutex<Option<RusqliteConnection>>>,
    closed: AtomicBool,
}

impl SqliteConnection {
    /// Open a SQLite database and run the one-time initialization pragmas.
    ///
    /// This blocks; use [`SqliteConnection::connect`] from async code.
    pub fn open(options: &SqliteOptions) -> Result<Self> {
        let path = options.resolved_path()?;
        tracing::info!(path = %path, "opening SQLite database");

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = if options.is_memory() {
            RusqliteConnection::open_in_memory().map_err(|e| {
                PoolError::Connection(format!("Failed to open in-memory database: {}", e))
            })?
        } else {
            if !path.starts_with("file:") {
                let file_path = std::path::Path::new(&path);
                if let Some(parent) = file_path.parent()
                    && !parent.exists()
                {
                    return Err(PoolError::Connection(format!(
                        "Parent directory does not exist: {}",
                        parent.display()
                    )));
                }
            }

            RusqliteConnection::open_with_flags(&path, flags).map_err(|e| {
                PoolError::Connection(format!(
                    "Failed to open SQLite database at '{}': {}",
                    path, e
                ))
            })?
        };

        conn.busy_timeout(options.busy_timeout())
            .map_err(|e| PoolError::Connection(format!("Failed to set busy timeout: {}", e)))?;

        for (name, value) in options.init_pragmas() {
            apply_pragma(&conn, name, &value)?;
        }

        tracing::info!(path = %path, "SQLite database connection established");
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            closed: AtomicBool::new(false),
        })
    }

    /// Open a connection without blocking the calling task
    pub async fn connect(options: SqliteOptions) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::open(&options))
            .await
            .map_err(|e| PoolError::Driver(format!("SQLite open task failed: {}", e)))?
    }

    /// Run `f` against the native handle on the blocking pool
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&RusqliteConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_closed() {
            return Err(PoolError::Connection("SQLite connection is closed".into()));
        }

        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            match guard.as_ref() {
                Some(conn) => f(conn),
                None => Err(PoolError::Connection("SQLite connection is closed".into())),
            }
        })
        .await
        .map_err(|e| PoolError::Driver(format!("SQLite worker task failed: {}", e)))?
    }
}

/// Issue `PRAGMA name = value`, discarding whatever row the pragma echoes back.
///
/// Some pragmas (journal_mode, mmap_size) answer with the new value and
/// others return nothing, so the statement is stepped once instead of
/// executed.
fn apply_pragma(conn: &RusqliteConnection, name: &str, value: &str) -> Result<()> {
    let sql = format!("PRAGMA {} = {}", name, value);
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| PoolError::Connection(format!("Failed to set {}: {}", name, e)))?;
    let mut rows = stmt
        .query([])
        .map_err(|e| PoolError::Connection(format!("Failed to set {}: {}", name, e)))?;
    let echoed = rows
        .next()
        .map_err(|e| PoolError::Connection(format!("Failed to set {}: {}", name, e)))?
        .and_then(|row| row.get::<_, rusqlite::types::Value>(0).ok());

    tracing::debug!(pragma = name, requested = value, echoed = ?echoed, "pragma applied");
    Ok(())
}

#[async_trait]
impl Connection for SqliteConnection {
    fn driver_name(&self) -> &str {
        "sqlite"
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<RunResult> {
        let sql = sql.to_string();
        let params = values_to_rusqlite(params);

        let result = self
            .with_conn(move |conn| {
                let mut stmt = conn
                    .prepare(&sql)
                    .map_err(|e| PoolError::Statement(e.to_string()))?;
                let writes = !stmt.readonly();

                // Step to completion; RETURNING clauses and pragmas yield rows.
                let mut rows = stmt
                    .query(params_from_iter(params.iter()))
                    .map_err(|e| PoolError::Statement(e.to_string()))?;
                while rows
                    .next()
                    .map_err(|e| PoolError::Statement(e.to_string()))?
                    .is_some()
                {}
                drop(rows);
                drop(stmt);

                // sqlite3_changes is not reset by read-only statements.
                let changes = if writes { conn.changes() as u64 } else { 0 };
                // Connection-scoped, like sqlite3_last_insert_rowid: 0 until the first INSERT.
                let rowid = conn.last_insert_rowid();

                Ok(RunResult {
                    last_insert_id: (rowid != 0).then_some(rowid),
                    changes,
                })
            })
            .await?;

        tracing::debug!(changes = result.changes, last_insert_id = ?result.last_insert_id, "statement executed");
        Ok(result)
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let sql = sql.to_string();
        let params = values_to_rusqlite(params);

        let rows = self
            .with_conn(move |conn| collect_rows(conn, &sql, &params, None))
            .await?;

        tracing::debug!(row_count = rows.len(), "query executed");
        Ok(rows)
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query_row(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        let sql = sql.to_string();
        let params = values_to_rusqlite(params);

        let rows = self
            .with_conn(move |conn| collect_rows(conn, &sql, &params, Some(1)))
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn execute_batch(&self, sql: &str) -> Result<()> {
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            conn.execute_batch(&sql)
                .map_err(|e| PoolError::Statement(e.to_string()))
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        tracing::debug!("closing SQLite connection");
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || match conn.lock().take() {
            Some(native) => native
                .close()
                .map_err(|(_, e)| PoolError::Connection(format!("Failed to close: {}", e))),
            None => Ok(()),
        })
        .await
        .map_err(|e| PoolError::Driver(format!("SQLite close task failed: {}", e)))?
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Prepare, bind and step `sql`, converting up to `limit` rows
fn collect_rows(
    conn: &RusqliteConnection,
    sql: &str,
    params: &[rusqlite::types::Value],
    limit: Option<usize>,
) -> Result<Vec<Row>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| PoolError::Statement(e.to_string()))?;

    let columns: Arc<[String]> = stmt
        .column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect();

    let mut rows = Vec::new();
    let mut query_rows = stmt
        .query(params_from_iter(params.iter()))
        .map_err(|e| PoolError::Statement(e.to_string()))?;

    while let Some(row) = query_rows
        .next()
        .map_err(|e| PoolError::Statement(e.to_string()))?
    {
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            values.push(rusqlite_to_value(row, i)?);
        }
        rows.push(Row::new(Arc::clone(&columns), values));

        if limit.is_some_and(|limit| rows.len() >= limit) {
            break;
        }
    }

    Ok(rows)
}

/// Convert our Value types to rusqlite-compatible types
fn values_to_rusqlite(values: &[Value]) -> Vec<rusqlite::types::Value> {
    values.iter().map(value_to_rusqlite).collect()
}

fn value_to_rusqlite(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(if *b { 1 } else { 0 }),
        Value::Int64(i) => rusqlite::types::Value::Integer(*i),
        Value::Float64(f) => rusqlite::types::Value::Real(*f),
        Value::String(s) => rusqlite::types::Value::Text(s.clone()),
        Value::Bytes(b) => rusqlite::types::Value::Blob(b.clone()),
        Value::Uuid(u) => rusqlite::types::Value::Text(u.to_string()),
        Value::DateTimeUtc(dt) => rusqlite::types::Value::Text(dt.to_rfc3339()),
        Value::Json(j) => rusqlite::types::Value::Text(j.to_string()),
    }
}

/// Convert rusqlite row value to our Value type
fn rusqlite_to_value(row: &rusqlite::Row, idx: usize) -> Result<Value> {
    use rusqlite::types::ValueRef;

    let value_ref = row
        .get_ref(idx)
        .map_err(|e| PoolError::Statement(e.to_string()))?;

    let value = match value_ref {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).to_string()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    };

    Ok(value)
}
