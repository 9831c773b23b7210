use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use ulid::Ulid;

use crate::engine::{now_ms, Engine};
use crate::limits::{SWEEP_BATCH_SIZE, SWEEP_WINDOW_MS};
use crate::mailer::Mailer;
use crate::model::Ms;
use crate::notify::{deliver_booking, Delivery};
use crate::observability;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepResult {
    pub booking_id: Ulid,
    pub success: bool,
    pub error: Option<String>,
}

/// Retry notifications for recent bookings whose customer was never reached.
///
/// Looks at most `SWEEP_BATCH_SIZE` bookings created in the last
/// `SWEEP_WINDOW_MS`, oldest first. One failure never stops the rest of the batch.
pub async fn sweep_once(engine: &Engine, mailer: &dyn Mailer, now: Ms) -> Vec<SweepResult> {
    let candidates = engine
        .unconfirmed_bookings(now, SWEEP_WINDOW_MS, SWEEP_BATCH_SIZE)
        .await;
    metrics::histogram!(observability::SWEEP_BATCH_SIZE).record(candidates.len() as f64);

    let mut results = Vec::with_capacity(candidates.len());
    for booking in candidates {
        let result = match deliver_booking(engine, mailer, booking.id).await {
            Ok(Delivery::Sent | Delivery::AlreadyConfirmed) => SweepResult {
                booking_id: booking.id,
                success: true,
                error: None,
            },
            Ok(Delivery::InFlight) => SweepResult {
                booking_id: booking.id,
                success: false,
                error: Some("delivery already in progress".into()),
            },
            Err(e) => {
                warn!(booking = %booking.id, "sweep delivery failed: {e}");
                SweepResult {
                    booking_id: booking.id,
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        };
        results.push(result);
    }
    results
}

/// Background task that runs the sweep on a fixed interval.
pub async fn run_sweeper(engine: Arc<Engine>, mailer: Arc<dyn Mailer>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        interval.tick().await;
        let results = sweep_once(&engine, mailer.as_ref(), now_ms()).await;
        if !results.is_empty() {
            let delivered = results.iter().filter(|r| r.success).count();
            info!(attempted = results.len(), delivered, "notification sweep");
        }
    }
}

/// Background task that compacts the ledger once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!(appends, "ledger compacted"),
            Err(e) => warn!("ledger compaction failed: {e}"),
        }
    }
}
