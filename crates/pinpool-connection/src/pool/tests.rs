//! Tests for connection pool functionality

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pinpool_core::{Connection, ConnectionFactory, PoolError, Result, Row, RunResult, Value};
use pretty_assertions::assert_eq;

use super::config::PoolConfig;
use super::pool::Pool;
use super::stats::PoolStats;

fn initialize_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("pinpool_connection=debug".parse().unwrap()),
            )
            .with_test_writer()
            .finish();

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// Shared bookkeeping between the mock factory and its connections
#[derive(Default)]
struct MockState {
    created: AtomicUsize,
    closed: AtomicUsize,
    failing_creates: AtomicUsize,
    create_delay_ms: AtomicU64,
    failing_sql: Mutex<Vec<String>>,
    statements: Mutex<Vec<(usize, String)>>,
    connections: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockState {
    fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn fail_sql(&self, sql: &str) {
        self.failing_sql.lock().push(sql.to_string());
    }

    fn statements(&self) -> Vec<(usize, String)> {
        self.statements.lock().clone()
    }

    fn connection(&self, index: usize) -> Arc<MockConnection> {
        Arc::clone(&self.connections.lock()[index])
    }
}

/// Mock connection for testing
struct MockConnection {
    id: usize,
    closed: AtomicBool,
    state: Arc<MockState>,
}

impl MockConnection {
    fn record(&self, sql: &str) -> Result<()> {
        if self.is_closed() {
            return Err(PoolError::Connection("connection closed".into()));
        }
        self.state.statements.lock().push((self.id, sql.to_string()));
        if self.state.failing_sql.lock().iter().any(|s| s == sql) {
            return Err(PoolError::Statement(format!("mock failure: {}", sql)));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn driver_name(&self) -> &str {
        "mock"
    }

    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<RunResult> {
        self.record(sql)?;
        Ok(RunResult {
            last_insert_id: None,
            changes: 1,
        })
    }

    async fn query(&self, sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
        self.record(sql)?;
        let columns: Arc<[String]> = Arc::from(vec!["connection".to_string()]);
        Ok(vec![Row::new(columns, vec![Value::Int64(self.id as i64)])])
    }

    async fn execute_batch(&self, sql: &str) -> Result<()> {
        self.record(sql)
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Mock factory that counts connections created
struct MockConnectionFactory {
    state: Arc<MockState>,
}

impl MockConnectionFactory {
    fn new() -> (Self, Arc<MockState>) {
        let state = Arc::new(MockState::default());
        (
            Self {
                state: Arc::clone(&state),
            },
            state,
        )
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        let delay = self.state.create_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let failing = self
            .state
            .failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(PoolError::Connection("mock refused connection".into()));
        }

        let id = self.state.created.fetch_add(1, Ordering::SeqCst);
        let conn = Arc::new(MockConnection {
            id,
            closed: AtomicBool::new(false),
            state: Arc::clone(&self.state),
        });
        self.state.connections.lock().push(Arc::clone(&conn));
        Ok(conn)
    }

    fn location(&self) -> &str {
        "mock://test"
    }
}

fn mock_pool(config: PoolConfig) -> (Pool, Arc<MockState>) {
    initialize_logging();
    let (factory, state) = MockConnectionFactory::new();
    (Pool::new(config, factory), state)
}

async fn wait_for_queued(pool: &Pool, expected: usize) {
    for _ in 0..100 {
        if pool.stats().queued() >= expected {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!(
        "expected {} queued callers, found {}",
        expected,
        pool.stats().queued()
    );
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

// =============================================================================
// PoolConfig tests
// =============================================================================

#[test]
fn test_pool_config_creation() {
    let config = PoolConfig::new(5);
    assert_eq!(config.max_connections(), 5);
    assert_eq!(config.min_connections(), 0);
    assert_eq!(config.acquire_timeout(), Duration::from_millis(10_000));
    assert_eq!(config.idle_timeout(), Duration::from_millis(300_000));
    assert_eq!(config.reap_interval(), Duration::from_millis(30_000));
    assert!(config.max_lifetime().is_none());
}

#[test]
fn test_pool_config_with_timeouts() {
    let config = PoolConfig::new(5)
        .with_acquire_timeout_ms(5000)
        .with_idle_timeout_ms(60000)
        .with_max_lifetime_ms(3600000);

    assert_eq!(config.acquire_timeout(), Duration::from_millis(5000));
    assert_eq!(config.idle_timeout(), Duration::from_millis(60000));
    assert_eq!(config.max_lifetime(), Some(Duration::from_millis(3600000)));
}

#[test]
fn test_pool_config_default() {
    assert_eq!(PoolConfig::default(), PoolConfig::new(5));
}

#[test]
#[should_panic(expected = "max_connections must be greater than 0")]
fn test_pool_config_invalid_max_connections() {
    PoolConfig::new(0);
}

#[test]
#[should_panic(expected = "min_connections (10) cannot exceed max_connections (5)")]
fn test_pool_config_min_exceeds_max() {
    PoolConfig::new(5).with_min_connections(10);
}

#[test]
fn test_pool_config_try_new_rejects_zero() {
    assert!(matches!(
        PoolConfig::try_new(0),
        Err(PoolError::Configuration(_))
    ));
}

#[test]
fn test_pool_config_from_lookup() {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("PINPOOL_MAX_CONNECTIONS", "8"),
        ("PINPOOL_MIN_CONNECTIONS", "2"),
        ("PINPOOL_ACQUIRE_TIMEOUT_MS", "250"),
        ("PINPOOL_MAX_LIFETIME_MS", "60000"),
    ]);
    let config = PoolConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()))
        .expect("valid configuration");

    assert_eq!(config.max_connections(), 8);
    assert_eq!(config.min_connections(), 2);
    assert_eq!(config.acquire_timeout(), Duration::from_millis(250));
    assert_eq!(config.idle_timeout(), Duration::from_millis(300_000));
    assert_eq!(config.max_lifetime(), Some(Duration::from_secs(60)));
}

#[test]
fn test_pool_config_from_lookup_rejects_bad_values() {
    let not_a_number = PoolConfig::from_lookup(|key| {
        (key == "PINPOOL_MAX_CONNECTIONS").then(|| "lots".to_string())
    });
    assert!(matches!(not_a_number, Err(PoolError::Configuration(_))));

    let min_above_max = PoolConfig::from_lookup(|key| match key {
        "PINPOOL_MAX_CONNECTIONS" => Some("2".to_string()),
        "PINPOOL_MIN_CONNECTIONS" => Some("3".to_string()),
        _ => None,
    });
    assert!(matches!(min_above_max, Err(PoolError::Configuration(_))));

    let zero_interval =
        PoolConfig::from_lookup(|key| (key == "PINPOOL_REAP_INTERVAL_MS").then(|| "0".to_string()));
    assert!(matches!(zero_interval, Err(PoolError::Configuration(_))));
}

#[test]
fn test_pool_config_serialization() {
    let config = PoolConfig::new(10)
        .with_acquire_timeout_ms(5000)
        .with_max_lifetime_ms(3600000);

    let json = serde_json::to_string(&config).expect("serialize");
    let deserialized: PoolConfig = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(deserialized, config);
}

// =============================================================================
// PoolStats tests
// =============================================================================

#[test]
fn test_pool_stats_creation() {
    let stats = PoolStats::new(4, 6, 10, 2);
    assert_eq!(stats.total(), 10);
    assert_eq!(stats.idle(), 6);
    assert_eq!(stats.active(), 4);
    assert_eq!(stats.queued(), 2);
}

#[test]
fn test_pool_stats_utilization() {
    let stats = PoolStats::new(5, 5, 10, 0);
    assert!((stats.utilization() - 0.5).abs() < 0.001);

    let full_stats = PoolStats::new(10, 0, 10, 0);
    assert!((full_stats.utilization() - 1.0).abs() < 0.001);
}

#[test]
fn test_pool_stats_is_saturated() {
    assert!(PoolStats::new(10, 0, 10, 5).is_saturated());
    assert!(!PoolStats::new(5, 5, 10, 0).is_saturated());
    assert!(!PoolStats::new(3, 0, 10, 0).is_saturated());
}

#[test]
fn test_pool_stats_serialization() {
    let stats = PoolStats::new(4, 6, 10, 2);
    let json = serde_json::to_string(&stats).expect("serialize");
    let deserialized: PoolStats = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(stats, deserialized);
}

// =============================================================================
// Pool tests
// =============================================================================

#[tokio::test]
async fn test_pool_starts_empty() {
    let (pool, state) = mock_pool(PoolConfig::new(5));

    assert_eq!(pool.stats(), PoolStats::new(0, 0, 5, 0));
    assert_eq!(state.created(), 0);
    assert_eq!(pool.location(), "mock://test");
}

#[tokio::test]
async fn test_pool_connection_return() {
    let (pool, state) = mock_pool(PoolConfig::new(5));

    {
        let conn = pool.acquire().await.expect("acquire");
        assert_eq!(conn.driver_name(), "mock");
        assert_eq!(pool.stats().active(), 1);
    }

    assert_eq!(pool.stats().active(), 0);
    assert_eq!(pool.stats().idle(), 1);

    // Getting another connection should reuse the idle one
    let _conn = pool.acquire().await.expect("acquire");
    assert_eq!(state.created(), 1);
}

#[tokio::test]
async fn test_statement_calls_release_their_connection() {
    let (pool, state) = mock_pool(PoolConfig::new(5));

    let row = pool.get("SELECT 1", &[]).await.expect("get");
    assert!(row.is_some());
    pool.all("SELECT 1", &[]).await.expect("all");
    pool.run("UPDATE t SET x = 1", &[]).await.expect("run");

    assert_eq!(pool.stats(), PoolStats::new(0, 1, 5, 0));
    assert_eq!(state.created(), 1);
}

#[tokio::test]
async fn test_failed_statement_still_releases() {
    let (pool, state) = mock_pool(PoolConfig::new(1));
    state.fail_sql("SELEC 1");

    let err = pool.get("SELEC 1", &[]).await.unwrap_err();
    assert!(matches!(err, PoolError::Statement(_)));
    assert_eq!(pool.stats(), PoolStats::new(0, 1, 1, 0));

    // The single connection is usable again right away
    pool.get("SELECT 1", &[]).await.expect("get after failure");
}

#[tokio::test]
async fn test_saturated_pool_serializes_callers() {
    let (pool, state) = mock_pool(PoolConfig::new(1));

    let held = pool.acquire().await.expect("acquire");
    let second = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get("SELECT 1", &[]).await })
    };

    wait_for_queued(&pool, 1).await;
    assert_eq!(pool.stats(), PoolStats::new(1, 0, 1, 1));

    drop(held);
    let row = second.await.expect("join").expect("get");
    assert!(row.is_some());
    assert_eq!(state.created(), 1);
    assert_eq!(pool.stats(), PoolStats::new(0, 1, 1, 0));
}

#[tokio::test(start_paused = true)]
async fn test_acquire_times_out_when_saturated() {
    let (pool, _state) = mock_pool(PoolConfig::new(2).with_acquire_timeout_ms(100));

    let _first = pool.acquire().await.expect("acquire");
    let _second = pool.acquire().await.expect("acquire");
    let started = tokio::time::Instant::now();
    let err = pool.get("SELECT 1", &[]).await.unwrap_err();

    assert!(matches!(err, PoolError::AcquireTimeout(t) if t == Duration::from_millis(100)));
    assert!(err.is_transient());
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(pool.stats().queued(), 0);
}

#[tokio::test]
async fn test_waiters_are_served_in_arrival_order() {
    let (pool, _state) = mock_pool(PoolConfig::new(1));
    let order = Arc::new(Mutex::new(Vec::new()));

    let held = pool.acquire().await.expect("acquire");
    let mut tasks = Vec::new();
    for i in 0..3 {
        let task_pool = pool.clone();
        let order = Arc::clone(&order);
        tasks.push(tokio::spawn(async move {
            let conn = task_pool.acquire().await?;
            order.lock().push(i);
            drop(conn);
            Ok::<_, PoolError>(())
        }));
        wait_for_queued(&pool, i + 1).await;
    }

    drop(held);
    for task in tasks {
        task.await.expect("join").expect("acquire");
    }

    assert_eq!(*order.lock(), vec![0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_pool_never_exceeds_max_connections() {
    let (pool, state) = mock_pool(PoolConfig::new(3));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let pool = pool.clone();
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            tokio::spawn(async move {
                let _conn = pool.acquire().await?;
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, PoolError>(())
            })
        })
        .collect();

    for task in tasks {
        task.await.expect("join").expect("acquire");
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(state.created(), 3);
    assert_eq!(pool.stats(), PoolStats::new(0, 3, 3, 0));
}

#[tokio::test]
async fn test_cancelled_waiter_leaves_the_queue() {
    let (pool, _state) = mock_pool(PoolConfig::new(1));

    let held = pool.acquire().await.expect("acquire");
    let abandoned = tokio::time::timeout(Duration::from_millis(10), pool.acquire()).await;
    assert!(abandoned.is_err());
    assert_eq!(pool.stats().queued(), 0);

    drop(held);
    assert_eq!(pool.stats(), PoolStats::new(0, 1, 1, 0));
}

#[tokio::test(start_paused = true)]
async fn test_failed_creation_hands_slot_to_waiter() {
    let (pool, state) = mock_pool(PoolConfig::new(1));
    state.failing_creates.store(1, Ordering::SeqCst);
    state.create_delay_ms.store(50, Ordering::SeqCst);

    let first = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await.map(|conn| conn.id()) })
    };
    tokio::task::yield_now().await;

    let second = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await.map(|conn| conn.id()) })
    };
    wait_for_queued(&pool, 1).await;

    let first = first.await.expect("join");
    assert!(matches!(first, Err(PoolError::Connection(_))));
    second.await.expect("join").expect("second caller gets a fresh connection");
    assert_eq!(state.created(), 1);
    assert_eq!(pool.stats(), PoolStats::new(0, 1, 1, 0));
}

#[tokio::test]
async fn test_closed_connection_is_not_handed_out_again() {
    let (pool, state) = mock_pool(PoolConfig::new(2));

    drop(pool.acquire().await.expect("acquire"));
    state.connection(0).close().await.expect("close");

    let conn = pool.acquire().await.expect("acquire");
    assert!(!conn.is_closed());
    drop(conn);

    assert_eq!(state.created(), 2);
    assert_eq!(pool.stats(), PoolStats::new(0, 1, 2, 0));
}

#[tokio::test]
async fn test_connection_closed_while_borrowed_frees_capacity() {
    let (pool, state) = mock_pool(PoolConfig::new(1));

    let conn = pool.acquire().await.expect("acquire");
    conn.close().await.expect("close");
    drop(conn);

    assert_eq!(pool.stats().total(), 0);
    pool.get("SELECT 1", &[]).await.expect("get");
    assert_eq!(state.created(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_connection_past_max_lifetime_is_replaced() {
    let (pool, state) = mock_pool(PoolConfig::new(2).with_max_lifetime_ms(1000));

    drop(pool.acquire().await.expect("acquire"));
    tokio::time::advance(Duration::from_millis(1500)).await;

    drop(pool.acquire().await.expect("acquire"));
    settle().await;

    assert_eq!(state.created(), 2);
    assert_eq!(state.closed(), 1);
    assert_eq!(pool.stats().total(), 1);
}

// =============================================================================
// Idle reaping
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_reaper_closes_idle_connections() {
    let (pool, state) = mock_pool(
        PoolConfig::new(2)
            .with_idle_timeout_ms(1000)
            .with_reap_interval_ms(500),
    );

    pool.get("SELECT 1", &[]).await.expect("get");
    assert_eq!(pool.stats().idle(), 1);

    tokio::time::advance(Duration::from_millis(600)).await;
    settle().await;
    assert_eq!(pool.stats().idle(), 1);

    tokio::time::advance(Duration::from_millis(1000)).await;
    settle().await;
    assert_eq!(pool.stats().total(), 0);
    assert_eq!(state.closed(), 1);
}

#[tokio::test]
async fn test_reap_idle_respects_min_connections() {
    let (pool, state) = mock_pool(
        PoolConfig::new(3)
            .with_min_connections(1)
            .with_idle_timeout_ms(0),
    );

    let conns = vec![
        pool.acquire().await.expect("acquire"),
        pool.acquire().await.expect("acquire"),
        pool.acquire().await.expect("acquire"),
    ];
    drop(conns);
    assert_eq!(pool.stats().idle(), 3);

    assert_eq!(pool.reap_idle().await, 2);
    assert_eq!(pool.stats().total(), 1);
    assert_eq!(state.closed(), 2);
}

#[tokio::test]
async fn test_reap_idle_leaves_borrowed_connections_alone() {
    let (pool, state) = mock_pool(PoolConfig::new(2).with_idle_timeout_ms(0));

    let held = pool.acquire().await.expect("acquire");
    assert_eq!(pool.reap_idle().await, 0);
    assert!(!held.is_closed());
    drop(held);

    assert_eq!(pool.reap_idle().await, 1);
    assert_eq!(state.closed(), 1);
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_close_rejects_queued_callers() {
    let (pool, state) = mock_pool(PoolConfig::new(1));

    let held = pool.acquire().await.expect("acquire");
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
    };
    wait_for_queued(&pool, 1).await;

    pool.close().await;

    let rejected = waiter.await.expect("join");
    assert!(matches!(rejected, Err(PoolError::PoolClosing)));
    assert!(held.is_closed());
    assert_eq!(state.closed(), 1);

    drop(held);
    assert_eq!(pool.stats(), PoolStats::new(0, 0, 1, 0));
}

#[tokio::test]
async fn test_acquire_after_close_fails() {
    let (pool, _state) = mock_pool(PoolConfig::new(2));
    pool.close().await;

    assert!(pool.is_closed());
    let err = pool.get("SELECT 1", &[]).await.unwrap_err();
    assert!(matches!(err, PoolError::PoolClosing));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (pool, state) = mock_pool(PoolConfig::new(2));
    pool.get("SELECT 1", &[]).await.expect("get");

    pool.close().await;
    pool.close().await;

    assert_eq!(state.closed(), 1);
    assert_eq!(pool.stats().total(), 0);
}

// =============================================================================
// Transactions
// =============================================================================

#[tokio::test]
async fn test_transaction_commits_on_one_connection() {
    let (pool, state) = mock_pool(PoolConfig::new(2));

    let value = pool
        .transaction(|tx| {
            Box::pin(async move {
                tx.run("INSERT INTO a VALUES (1)", &[]).await?;
                tx.run("INSERT INTO b VALUES (1)", &[]).await?;
                Ok::<_, PoolError>(42)
            })
        })
        .await
        .expect("transaction");

    assert_eq!(value, 42);
    let statements = state.statements();
    let sql: Vec<&str> = statements.iter().map(|(_, sql)| sql.as_str()).collect();
    assert_eq!(
        sql,
        vec![
            "BEGIN TRANSACTION",
            "INSERT INTO a VALUES (1)",
            "INSERT INTO b VALUES (1)",
            "COMMIT"
        ]
    );
    assert!(statements.iter().all(|(id, _)| *id == statements[0].0));
    assert_eq!(pool.stats(), PoolStats::new(0, 1, 2, 0));
}

#[tokio::test]
async fn test_transaction_rolls_back_on_error() {
    let (pool, state) = mock_pool(PoolConfig::new(2));
    state.fail_sql("INSERT INTO b VALUES (1)");

    let err = pool
        .transaction(|tx| {
            Box::pin(async move {
                tx.run("INSERT INTO a VALUES (1)", &[]).await?;
                tx.run("INSERT INTO b VALUES (1)", &[]).await?;
                Ok::<_, PoolError>(())
            })
        })
        .await
        .unwrap_err();

    assert!(matches!(err, PoolError::Statement(_)));
    let last = state.statements().last().cloned().map(|(_, sql)| sql);
    assert_eq!(last.as_deref(), Some("ROLLBACK"));
    assert_eq!(pool.stats(), PoolStats::new(0, 1, 2, 0));
}

#[tokio::test]
async fn test_failed_rollback_keeps_original_error() {
    let (pool, state) = mock_pool(PoolConfig::new(2));
    state.fail_sql("ROLLBACK");

    let err = pool
        .transaction(|_tx| {
            Box::pin(async move { Err::<(), _>(PoolError::Statement("callback failed".into())) })
        })
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Statement error: callback failed");
    settle().await;
    // The connection's transaction state is unknown, so it is retired
    assert_eq!(pool.stats().total(), 0);
    assert_eq!(state.closed(), 1);
}

#[tokio::test]
async fn test_failed_commit_rolls_back() {
    let (pool, state) = mock_pool(PoolConfig::new(1));
    state.fail_sql("COMMIT");

    let result = pool
        .transaction(|tx| Box::pin(async move { tx.run("INSERT INTO a VALUES (1)", &[]).await }))
        .await;

    assert!(matches!(result, Err(PoolError::Statement(_))));
    let last = state.statements().last().cloned().map(|(_, sql)| sql);
    assert_eq!(last.as_deref(), Some("ROLLBACK"));
    assert_eq!(pool.stats(), PoolStats::new(0, 1, 1, 0));
}

#[tokio::test]
async fn test_abandoned_transaction_rolls_back() {
    let (pool, state) = mock_pool(PoolConfig::new(1));

    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        pool.transaction(|tx| {
            Box::pin(async move {
                tx.run("INSERT INTO a VALUES (1)", &[]).await?;
                std::future::pending::<()>().await;
                Ok::<_, PoolError>(())
            })
        }),
    )
    .await;
    assert!(abandoned.is_err());

    settle().await;
    let last = state.statements().last().cloned().map(|(_, sql)| sql);
    assert_eq!(last.as_deref(), Some("ROLLBACK"));
    assert_eq!(pool.stats(), PoolStats::new(0, 1, 1, 0));
}

#[tokio::test]
async fn test_transaction_holds_its_connection() {
    let (pool, _state) = mock_pool(PoolConfig::new(2));

    let outside = pool
        .transaction(|tx| {
            let pool = pool.clone();
            Box::pin(async move {
                let pinned = tx.get("SELECT 1", &[]).await?;
                let other = pool.get("SELECT 1", &[]).await?;
                Ok::<_, PoolError>((pinned, other))
            })
        })
        .await
        .expect("transaction");

    let (pinned, other) = outside;
    assert_ne!(pinned, other);
}
