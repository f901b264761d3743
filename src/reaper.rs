use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::clock::Clock;
use crate::engine::{Engine, EngineError};
use crate::model::{DAY_MS, Ms};

const REAP_INTERVAL: Duration = Duration::from_secs(3600);
const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// One retention pass: forget reservations that ended more than
/// `retention_days` before `now`.
pub async fn reap_once(engine: &Engine, now: Ms, retention_days: u32) -> Result<usize, EngineError> {
    let cutoff = now - Ms::from(retention_days) * DAY_MS;
    let purged = engine.purge_finished_before(cutoff).await?;
    if purged > 0 {
        info!("purged {purged} reservations that ended before {cutoff}");
    }
    Ok(purged)
}

/// Background task that periodically drops old reservations.
pub async fn run_reaper(engine: Arc<Engine>, clock: Arc<dyn Clock>, retention_days: u32) {
    let mut interval = tokio::time::interval(REAP_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = reap_once(&engine, clock.now_ms(), retention_days).await {
            tracing::warn!("retention pass failed: {e}");
        }
    }
}

/// Compact once the WAL has seen `threshold` appends since the last rewrite.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    engine.compact_wal().await?;
    info!("compacted WAL after {appends} appends");
    Ok(true)
}

pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_due(&engine, threshold).await {
            tracing::error!("WAL compaction failed: {e}");
        }
    }
}
