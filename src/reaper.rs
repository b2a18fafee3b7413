use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

/// Background task that cancels pending bookings whose approval TTL passed.
/// Expired pending bookings already stopped blocking; this makes the state
/// catch up with what the conflict checks assume.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        let expired = engine.collect_expired_pending(now);
        for (booking_id, _resource_id) in expired {
            match engine.cancel_booking(booking_id).await {
                Ok(_) => {
                    metrics::counter!(crate::observability::PENDING_REAPED_TOTAL).increment(1);
                    info!("reaped expired pending booking {booking_id}");
                }
                Err(e) => {
                    // May already have been cancelled — that's fine
                    tracing::debug!("reaper skip {booking_id}: {e}");
                }
            }
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends >= threshold {
            match engine.compact_wal().await {
                Ok(()) => info!("compacted WAL after {appends} appends"),
                Err(e) => tracing::warn!("WAL compaction failed: {e}"),
            }
        }
    }
}
