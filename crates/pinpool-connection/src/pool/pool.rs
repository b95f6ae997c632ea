//! Connection pool implementation

use std::ops::Deref;
use std::sync::Arc;

use futures::future::{BoxFuture, join_all};
use parking_lot::Mutex;
use pinpool_core::{Connection, ConnectionFactory, PoolError, Result, Row, RunResult, Value};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::config::PoolConfig;
use super::queue::{Grant, GrantReceiver, WaitQueue, WaiterId};
use super::reaper;
use super::record::{Checkout, ConnectionId, ConnectionRecord};
use super::stats::PoolStats;
use crate::transaction::{TransactionBehavior, TransactionContext};

/// A bounded pool of database connections
///
/// Statement calls (`get`, `all`, `run`) borrow a connection for exactly one
/// statement. `transaction` pins one connection for the whole callback.
/// Cloning is cheap; every clone drives the same pool.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

pub(crate) struct PoolInner {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    state: Mutex<PoolState>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

/// Everything guarded by the pool lock.
///
/// The lock is only held for synchronous segments (scan/claim/grow/enqueue,
/// release/handoff, reap selection); it is never held across an await.
#[derive(Default)]
struct PoolState {
    connections: Vec<ConnectionRecord>,
    /// Connections being opened; they count toward `max_connections`
    creating: usize,
    waiters: WaitQueue,
    closing: bool,
}

impl PoolState {
    fn has_capacity(&self, max: usize) -> bool {
        self.connections.len() + self.creating < max
    }
}

/// Outcome of the synchronous claim segment of `acquire`
enum Claim {
    Ready(Checkout),
    Create,
    Wait(WaiterId, GrantReceiver),
}

impl Pool {
    /// Create a pool that opens connections through `factory`.
    ///
    /// No connection is opened up front. When called inside a tokio runtime
    /// the idle reaper starts immediately.
    pub fn new<F: ConnectionFactory>(config: PoolConfig, factory: F) -> Self {
        tracing::info!(
            location = %factory.location(),
            max_connections = config.max_connections(),
            acquire_timeout_ms = config.acquire_timeout().as_millis() as u64,
            "creating connection pool"
        );

        let inner = Arc::new(PoolInner {
            config,
            factory: Arc::new(factory),
            state: Mutex::new(PoolState::default()),
            reaper: Mutex::new(None),
        });
        *inner.reaper.lock() = reaper::spawn(&inner);

        Self { inner }
    }

    /// Create a pool of SQLite connections
    ///
    /// Every `:memory:` connection is its own private database, so an
    /// in-memory pool is capped at one connection.
    #[cfg(feature = "sqlite")]
    pub fn sqlite(config: PoolConfig, options: pinpool_driver_sqlite::SqliteOptions) -> Self {
        let config = if options.is_memory() && config.max_connections() > 1 {
            tracing::warn!(
                max_connections = config.max_connections(),
                "in-memory SQLite databases are per connection; limiting pool to 1"
            );
            config.with_max_connections(1)
        } else {
            config
        };
        Self::new(config, pinpool_driver_sqlite::SqliteDriver::new(options))
    }

    /// Borrow a connection until the returned guard is dropped
    ///
    /// Waits at most the configured acquire timeout when the pool is
    /// saturated, then fails with `PoolError::AcquireTimeout`.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        self.inner.acquire().await
    }

    /// Run a query and return its first row
    pub async fn get(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        let conn = self.acquire().await?;
        conn.query_row(sql, params).await
    }

    /// Run a query and return every row
    pub async fn all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let conn = self.acquire().await?;
        conn.query(sql, params).await
    }

    /// Run a statement that returns no rows
    pub async fn run(&self, sql: &str, params: &[Value]) -> Result<RunResult> {
        let conn = self.acquire().await?;
        conn.execute(sql, params).await
    }

    /// Run `callback` inside a transaction pinned to one connection
    ///
    /// Commits when the callback succeeds and rolls back when it (or the
    /// commit) fails. A failed rollback is logged; the original error is
    /// what the caller sees.
    ///
    /// ```ignore
    /// let id = pool
    ///     .transaction(|tx| Box::pin(async move {
    ///         let run = tx.run("INSERT INTO users (email) VALUES (?)", &["a@b.c".into()]).await?;
    ///         tx.run("INSERT INTO audit (user_id) VALUES (?)", &[run.last_insert_id.into()]).await?;
    ///         Ok::<_, PoolError>(run.last_insert_id)
    ///     }))
    ///     .await?;
    /// ```
    pub async fn transaction<F, T, E>(&self, callback: F) -> std::result::Result<T, E>
    where
        F: for<'c> FnOnce(&'c TransactionContext) -> BoxFuture<'c, std::result::Result<T, E>>,
        E: From<PoolError>,
    {
        self.transaction_with(TransactionBehavior::Deferred, callback)
            .await
    }

    /// Like [`Pool::transaction`], choosing how the transaction takes its locks
    pub async fn transaction_with<F, T, E>(
        &self,
        behavior: TransactionBehavior,
        callback: F,
    ) -> std::result::Result<T, E>
    where
        F: for<'c> FnOnce(&'c TransactionContext) -> BoxFuture<'c, std::result::Result<T, E>>,
        E: From<PoolError>,
    {
        let conn = self.acquire().await?;
        let tx = TransactionContext::begin(conn, behavior).await?;

        let outcome = callback(&tx).await;
        match outcome {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                tx.rollback().await;
                Err(err)
            }
        }
    }

    /// Point-in-time counts of active, idle and queued
    pub fn stats(&self) -> PoolStats {
        self.inner.stats()
    }

    /// Run one idle-reaper pass now; returns how many connections were closed
    pub async fn reap_idle(&self) -> usize {
        self.inner.reap_idle().await
    }

    /// Shut the pool down.
    ///
    /// Stops the reaper, rejects every queued caller with
    /// `PoolError::PoolClosing`, and closes every connection concurrently.
    /// Close failures are logged per connection. Calling it again is a no-op.
    pub async fn close(&self) {
        self.inner.close().await
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closing
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Storage location the pool connects to
    pub fn location(&self) -> &str {
        self.inner.factory.location()
    }
}

impl PoolInner {
    pub(super) fn config(&self) -> &PoolConfig {
        &self.config
    }

    async fn acquire(self: &Arc<Self>) -> Result<PooledConnection> {
        let started = Instant::now();

        let checkout = match self.claim()? {
            Claim::Ready(checkout) => checkout,
            Claim::Create => self.create_connection().await?,
            Claim::Wait(id, rx) => self.wait_for_grant(id, rx).await?,
        };

        tracing::debug!(
            connection_id = %checkout.id,
            waited_ms = started.elapsed().as_millis() as u64,
            "connection acquired"
        );
        Ok(PooledConnection::new(checkout, Arc::clone(self)))
    }

    /// The synchronous claim step: reuse an idle record, reserve a creation
    /// slot, or join the queue.
    fn claim(&self) -> Result<Claim> {
        let mut discarded = Vec::new();
        let now = Instant::now();

        let claim = {
            let mut state = self.state.lock();
            if state.closing {
                return Err(PoolError::PoolClosing);
            }

            let mut claimed = None;
            let mut index = 0;
            while index < state.connections.len() {
                let record = &state.connections[index];
                if record.in_use {
                    index += 1;
                    continue;
                }

                let expired = self
                    .config
                    .max_lifetime()
                    .is_some_and(|max| record.age(now) >= max);
                if expired || !self.factory.validate(record.connection.as_ref()) {
                    discarded.push(state.connections.remove(index));
                    continue;
                }

                claimed = Some(state.connections[index].claim());
                break;
            }

            match claimed {
                Some(checkout) => Claim::Ready(checkout),
                None if state.has_capacity(self.config.max_connections()) => {
                    state.creating += 1;
                    Claim::Create
                }
                None => {
                    let (id, rx) = state.waiters.enqueue();
                    tracing::debug!(waiter = id, queued = state.waiters.len(), "pool saturated, queueing caller");
                    Claim::Wait(id, rx)
                }
            }
        };

        if !discarded.is_empty() {
            tracing::debug!(count = discarded.len(), "discarding stale idle connections");
            close_detached(discarded);
        }
        Ok(claim)
    }

    /// Open a new connection using a creation slot the caller already holds
    async fn create_connection(self: &Arc<Self>) -> Result<Checkout> {
        let mut slot = CreationSlot {
            pool: self,
            armed: true,
        };

        let connection = match self.factory.create().await {
            Ok(connection) => connection,
            Err(err) => {
                tracing::warn!(error = %err, location = %self.factory.location(), "failed to open pooled connection");
                return Err(err);
            }
        };
        slot.armed = false;

        let checkout = {
            let mut state = self.state.lock();
            state.creating -= 1;
            if state.closing {
                None
            } else {
                let record = ConnectionRecord::claimed(Arc::clone(&connection));
                let checkout = record.checkout();
                state.connections.push(record);
                tracing::debug!(
                    connection_id = %checkout.id,
                    total = state.connections.len(),
                    "opened pooled connection"
                );
                Some(checkout)
            }
        };

        match checkout {
            Some(checkout) => Ok(checkout),
            None => {
                if let Err(err) = connection.close().await {
                    tracing::warn!(error = %err, "failed to close connection opened during shutdown");
                }
                Err(PoolError::PoolClosing)
            }
        }
    }

    async fn wait_for_grant(self: &Arc<Self>, id: WaiterId, rx: GrantReceiver) -> Result<Checkout> {
        let timeout = self.config.acquire_timeout();
        let mut waiter = QueuedWaiter {
            pool: self,
            id,
            rx,
            armed: true,
        };

        let grant = match tokio::time::timeout(timeout, &mut waiter.rx).await {
            Ok(Ok(grant)) => grant,
            // The queue only drops a sender without a grant when the pool goes away.
            Ok(Err(_)) => Grant::Closing,
            Err(_) => {
                let removed = self.state.lock().waiters.remove(id);
                if removed {
                    waiter.armed = false;
                    tracing::debug!(waiter = id, timeout_ms = timeout.as_millis() as u64, "acquire timed out");
                    return Err(PoolError::AcquireTimeout(timeout));
                }
                // Dequeued under the lock we just took, so the grant is already in the channel.
                match waiter.rx.try_recv() {
                    Ok(grant) => grant,
                    Err(_) => Grant::Closing,
                }
            }
        };
        waiter.armed = false;

        match grant {
            Grant::Connection(checkout) => Ok(checkout),
            Grant::Slot => self.create_connection().await,
            Grant::Closing => Err(PoolError::PoolClosing),
        }
    }

    /// Give a connection back, handing it straight to the oldest waiter if any
    fn release(&self, checkout: Checkout) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(index) = state.connections.iter().position(|r| r.id == checkout.id) else {
            // Closed or discarded while it was out.
            tracing::trace!(connection_id = %checkout.id, "released connection no longer pooled");
            return;
        };

        if !self.factory.validate(state.connections[index].connection.as_ref()) {
            let record = state.connections.remove(index);
            tracing::debug!(connection_id = %record.id, "released connection is unusable, dropping it");
            Self::free_slot(state);
            drop(guard);
            close_detached(vec![record]);
            return;
        }

        let record = &mut state.connections[index];
        record.touch();
        if state.closing {
            record.in_use = false;
            return;
        }

        match state.waiters.grant(Grant::Connection(record.checkout())) {
            Ok(waiter) => {
                tracing::debug!(connection_id = %record.id, waiter, "handed connection to queued caller");
            }
            Err(_) => {
                record.in_use = false;
                tracing::trace!(connection_id = %record.id, "connection returned to pool");
            }
        }
    }

    /// Take a checked-out connection out of the pool instead of reusing it
    pub(crate) fn discard(&self, checkout: Checkout) {
        let record = {
            let mut state = self.state.lock();
            let Some(index) = state.connections.iter().position(|r| r.id == checkout.id) else {
                return;
            };
            let record = state.connections.remove(index);
            Self::free_slot(&mut state);
            record
        };
        tracing::debug!(connection_id = %record.id, "discarding pooled connection");
        close_detached(vec![record]);
    }

    /// Give back a creation slot nobody used
    fn release_slot(&self) {
        let mut state = self.state.lock();
        state.creating -= 1;
        Self::free_slot(&mut state);
    }

    /// Capacity just opened up: offer it to the oldest waiter as a creation slot.
    fn free_slot(state: &mut PoolState) {
        if state.closing {
            return;
        }
        if let Ok(waiter) = state.waiters.grant(Grant::Slot) {
            state.creating += 1;
            tracing::debug!(waiter, "handed creation slot to queued caller");
        }
    }

    /// Return a grant that reached a waiter which is no longer listening
    fn return_grant(&self, grant: Grant) {
        match grant {
            Grant::Connection(checkout) => self.release(checkout),
            Grant::Slot => self.release_slot(),
            Grant::Closing => {}
        }
    }

    fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        let active = state.connections.iter().filter(|r| r.in_use).count();
        let idle = state.connections.len() - active;
        PoolStats::new(active, idle, self.config.max_connections(), state.waiters.len())
    }

    pub(super) async fn reap_idle(&self) -> usize {
        let reaped = {
            let mut state = self.state.lock();
            if state.closing {
                return 0;
            }
            let connections = std::mem::take(&mut state.connections);
            let (kept, reaped) = reaper::partition_reapable(connections, Instant::now(), &self.config);
            state.connections = kept;
            reaped
        };

        let count = reaped.len();
        if count > 0 {
            tracing::debug!(reaped = count, "idle reaper closing connections");
            close_all(reaped).await;
        }
        count
    }

    async fn close(&self) {
        if let Some(handle) = self.reaper.lock().take() {
            handle.abort();
        }

        let (records, rejected, already_closing) = {
            let mut state = self.state.lock();
            let already_closing = state.closing;
            state.closing = true;
            let rejected = state.waiters.reject_all();
            (std::mem::take(&mut state.connections), rejected, already_closing)
        };

        if already_closing && records.is_empty() {
            return;
        }

        tracing::info!(
            connections = records.len(),
            rejected_waiters = rejected,
            "closing connection pool"
        );
        close_all(records).await;
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if let Some(handle) = self.reaper.get_mut().take() {
            handle.abort();
        }
    }
}

/// Close connections concurrently, logging failures without stopping the others
async fn close_all(records: Vec<ConnectionRecord>) {
    join_all(records.into_iter().map(|record| async move {
        if let Err(err) = record.connection.close().await {
            tracing::warn!(connection_id = %record.id, error = %err, "failed to close pooled connection");
        }
    }))
    .await;
}

/// Close connections from a synchronous context
fn close_detached(records: Vec<ConnectionRecord>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(close_all(records));
        }
        // Without a runtime the handles are simply dropped, which closes them.
        Err(_) => drop(records),
    }
}

/// Releases a reserved creation slot unless the connection was opened
struct CreationSlot<'a> {
    pool: &'a PoolInner,
    armed: bool,
}

impl Drop for CreationSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.release_slot();
        }
    }
}

/// A caller parked in the acquisition queue.
///
/// If the acquiring future is dropped, the waiter leaves the queue; a grant
/// that already reached it is passed back to the pool.
struct QueuedWaiter<'a> {
    pool: &'a PoolInner,
    id: WaiterId,
    rx: GrantReceiver,
    armed: bool,
}

impl Drop for QueuedWaiter<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let removed = self.pool.state.lock().waiters.remove(self.id);
        if !removed && let Ok(grant) = self.rx.try_recv() {
            self.pool.return_grant(grant);
        }
    }
}

/// A connection borrowed from the pool
///
/// When dropped, the connection is returned to the pool (or handed directly
/// to the oldest queued caller).
pub struct PooledConnection {
    id: ConnectionId,
    connection: Arc<dyn Connection>,
    pool: Arc<PoolInner>,
    discard: bool,
}

impl PooledConnection {
    fn new(checkout: Checkout, pool: Arc<PoolInner>) -> Self {
        Self {
            id: checkout.id,
            connection: checkout.connection,
            pool,
            discard: false,
        }
    }

    /// Identifier of the underlying pooled connection
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remove the connection from the pool on drop instead of reusing it
    pub(crate) fn mark_discard(&mut self) {
        self.discard = true;
    }
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.connection.as_ref()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let checkout = Checkout {
            id: self.id,
            connection: Arc::clone(&self.connection),
        };
        if self.discard {
            self.pool.discard(checkout);
        } else {
            self.pool.release(checkout);
        }
    }
}
