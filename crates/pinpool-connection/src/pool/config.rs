//! Pool configuration types

use std::time::Duration;

use pinpool_core::{PoolError, Result};
use serde::{Deserialize, Serialize};

const ENV_MAX_CONNECTIONS: &str = "PINPOOL_MAX_CONNECTIONS";
const ENV_MIN_CONNECTIONS: &str = "PINPOOL_MIN_CONNECTIONS";
const ENV_ACQUIRE_TIMEOUT_MS: &str = "PINPOOL_ACQUIRE_TIMEOUT_MS";
const ENV_IDLE_TIMEOUT_MS: &str = "PINPOOL_IDLE_TIMEOUT_MS";
const ENV_REAP_INTERVAL_MS: &str = "PINPOOL_REAP_INTERVAL_MS";
const ENV_MAX_LIFETIME_MS: &str = "PINPOOL_MAX_LIFETIME_MS";

/// Configuration for a connection pool
///
/// Controls pool sizing, the acquisition wait window and idle reaping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of live connections
    max_connections: usize,
    /// The idle reaper never shrinks the pool below this many connections
    min_connections: usize,
    /// How long a queued caller waits for a connection before failing
    acquire_timeout_ms: u64,
    /// How long a connection may sit unused before the reaper closes it
    idle_timeout_ms: u64,
    /// Tick interval of the idle reaper
    reap_interval_ms: u64,
    /// Maximum lifetime of a connection before it's recycled
    max_lifetime_ms: Option<u64>,
}

impl PoolConfig {
    /// Create a new pool configuration bounded at `max_connections`
    ///
    /// # Panics
    ///
    /// Panics if `max_connections` is 0.
    pub fn new(max_connections: usize) -> Self {
        assert!(
            max_connections > 0,
            "max_connections must be greater than 0, got {}",
            max_connections
        );

        Self {
            max_connections,
            min_connections: 0,
            acquire_timeout_ms: 10_000, // 10 seconds
            idle_timeout_ms: 300_000,   // 5 minutes
            reap_interval_ms: 30_000,   // 30 seconds
            max_lifetime_ms: None,
        }
    }

    /// Fallible counterpart of [`PoolConfig::new`]
    pub fn try_new(max_connections: usize) -> Result<Self> {
        if max_connections == 0 {
            return Err(PoolError::Configuration(
                "max_connections must be greater than 0".into(),
            ));
        }
        Ok(Self::new(max_connections))
    }

    /// Set the retention floor for the idle reaper
    ///
    /// # Panics
    ///
    /// Panics if `min_connections > max_connections`.
    pub fn with_min_connections(mut self, min_connections: usize) -> Self {
        assert!(
            min_connections <= self.max_connections,
            "min_connections ({}) cannot exceed max_connections ({})",
            min_connections,
            self.max_connections
        );
        self.min_connections = min_connections;
        self
    }

    /// Change the maximum pool size, lowering `min_connections` to fit
    ///
    /// # Panics
    ///
    /// Panics if `max_connections` is 0.
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        assert!(
            max_connections > 0,
            "max_connections must be greater than 0, got {}",
            max_connections
        );
        self.max_connections = max_connections;
        self.min_connections = self.min_connections.min(max_connections);
        self
    }

    /// Set the acquire timeout in milliseconds
    pub fn with_acquire_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.acquire_timeout_ms = timeout_ms;
        self
    }

    /// Set the idle timeout in milliseconds
    pub fn with_idle_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.idle_timeout_ms = timeout_ms;
        self
    }

    /// Set the reaper tick interval in milliseconds
    pub fn with_reap_interval_ms(mut self, interval_ms: u64) -> Self {
        self.reap_interval_ms = interval_ms;
        self
    }

    /// Set the maximum connection lifetime in milliseconds
    pub fn with_max_lifetime_ms(mut self, lifetime_ms: u64) -> Self {
        self.max_lifetime_ms = Some(lifetime_ms);
        self
    }

    /// Read a configuration from `PINPOOL_*` environment variables
    ///
    /// Missing variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |key: &str| -> Result<Option<u64>> {
            match lookup(key) {
                None => Ok(None),
                Some(raw) => raw.trim().parse::<u64>().map(Some).map_err(|e| {
                    PoolError::Configuration(format!("{} must be an integer, got '{}': {}", key, raw, e))
                }),
            }
        };

        let max_connections = parse(ENV_MAX_CONNECTIONS)?.unwrap_or(5) as usize;
        let mut config = Self::try_new(max_connections)?;

        if let Some(min) = parse(ENV_MIN_CONNECTIONS)? {
            let min = min as usize;
            if min > config.max_connections {
                return Err(PoolError::Configuration(format!(
                    "{} ({}) cannot exceed {} ({})",
                    ENV_MIN_CONNECTIONS, min, ENV_MAX_CONNECTIONS, config.max_connections
                )));
            }
            config.min_connections = min;
        }
        if let Some(ms) = parse(ENV_ACQUIRE_TIMEOUT_MS)? {
            config.acquire_timeout_ms = ms;
        }
        if let Some(ms) = parse(ENV_IDLE_TIMEOUT_MS)? {
            config.idle_timeout_ms = ms;
        }
        if let Some(ms) = parse(ENV_REAP_INTERVAL_MS)? {
            if ms == 0 {
                return Err(PoolError::Configuration(format!(
                    "{} must be greater than 0",
                    ENV_REAP_INTERVAL_MS
                )));
            }
            config.reap_interval_ms = ms;
        }
        config.max_lifetime_ms = parse(ENV_MAX_LIFETIME_MS)?;

        Ok(config)
    }

    /// Get the maximum pool size
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Get the reaper's retention floor
    pub fn min_connections(&self) -> usize {
        self.min_connections
    }

    /// Get the acquire timeout as a Duration
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Get the idle timeout as a Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Get the reaper tick interval as a Duration
    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }

    /// Get the maximum lifetime as a Duration if set
    pub fn max_lifetime(&self) -> Option<Duration> {
        self.max_lifetime_ms.map(Duration::from_millis)
    }
}

impl Default for PoolConfig {
    /// Defaults:
    /// - max_connections: 5
    /// - min_connections: 0
    /// - acquire_timeout: 10 seconds
    /// - idle_timeout: 5 minutes
    /// - reap_interval: 30 seconds
    /// - max_lifetime: None
    fn default() -> Self {
        Self::new(5)
    }
}
