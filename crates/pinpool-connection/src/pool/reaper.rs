//! Idle reaper: periodically closes connections nobody has used for a while

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::config::PoolConfig;
use super::pool::PoolInner;
use super::record::ConnectionRecord;

/// Start the reaper for `pool` on the current tokio runtime.
///
/// The task only holds a weak reference, so it ends on its own once every
/// handle to the pool is gone. Returns `None` outside a runtime; the pool
/// then works without background reaping.
pub(super) fn spawn(pool: &Arc<PoolInner>) -> Option<JoinHandle<()>> {
    let handle = match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle,
        Err(_) => {
            tracing::warn!("no tokio runtime available, idle reaper disabled");
            return None;
        }
    };

    let period = pool.config().reap_interval().max(Duration::from_millis(1));
    let weak = Arc::downgrade(pool);

    Some(handle.spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let Some(pool) = weak.upgrade() else {
                break;
            };
            let reaped = pool.reap_idle().await;
            if reaped > 0 {
                tracing::debug!(reaped, "idle reaper pass finished");
            }
        }
    }))
}

/// Split records into those to keep and those to close.
///
/// A record is reapable when it is idle and has either been unused for at
/// least the idle timeout or outlived the max lifetime. Records in use are
/// never touched, and the pool is not shrunk below `min_connections`.
pub(super) fn partition_reapable(
    connections: Vec<ConnectionRecord>,
    now: Instant,
    config: &PoolConfig,
) -> (Vec<ConnectionRecord>, Vec<ConnectionRecord>) {
    let idle_timeout = config.idle_timeout();
    let max_lifetime = config.max_lifetime();
    let floor = config.min_connections();

    let mut remaining = connections.len();
    let mut kept = Vec::with_capacity(remaining);
    let mut reaped = Vec::new();

    for record in connections {
        let stale = !record.in_use
            && (record.idle_for(now) >= idle_timeout
                || max_lifetime.is_some_and(|max| record.age(now) >= max));

        if stale && remaining > floor {
            remaining -= 1;
            reaped.push(record);
        } else {
            kept.push(record);
        }
    }

    (kept, reaped)
}
