use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, warn};
use uuid::Uuid;

use coursehub_core::{CoreError, CoreResult};
use coursehub_lifecycle::ReconciliationReport;

use crate::state::AppState;

const LEASE_NAME: &str = "reconciliation";

/// Periodic reconciliation. Every replica runs this loop; the Redis lease
/// lets one of them do the pass per interval.
pub async fn start_reconciliation_worker(state: AppState) {
    let holder = Uuid::new_v4().to_string();
    let period = Duration::from_secs(state.reconciliation.policy().interval_seconds.max(1));
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Reconciliation worker started, every {:?}", period);

    loop {
        ticker.tick().await;
        match run_pass(&state, &holder).await {
            Ok(Some(report)) => info!(
                courses = report.courses_checked,
                drifted = report.drift.len(),
                anomalies = report.anomalies.len(),
                "Scheduled reconciliation done"
            ),
            Ok(None) => info!("Reconciliation lease held elsewhere, skipping this tick"),
            Err(e) => error!("Reconciliation pass failed: {}", e),
        }
    }
}

/// One leased pass. `Ok(None)` means another replica holds the lease.
pub async fn run_pass(state: &AppState, holder: &str) -> CoreResult<Option<ReconciliationReport>> {
    let lease_seconds = state.reconciliation.policy().lease_seconds;

    let leased = match &state.redis {
        Some(redis) => match redis.acquire_lease(LEASE_NAME, holder, lease_seconds).await {
            Ok(true) => true,
            Ok(false) => return Ok(None),
            Err(e) => {
                // the pass is idempotent, so a duplicate run is harmless
                warn!("Could not take reconciliation lease, running anyway: {}", e);
                false
            }
        },
        None => false,
    };

    let result = state.reconciliation.run().await;

    if leased {
        if let Some(redis) = &state.redis {
            if let Err(e) = redis.release_lease(LEASE_NAME, holder).await {
                warn!("Failed to release reconciliation lease: {}", e);
            }
        }
    }

    let report = result?;
    state.metrics.observe_reconciliation(&report);
    Ok(Some(report))
}

pub fn lease_conflict() -> CoreError {
    CoreError::ConflictError("a reconciliation pass is already running".to_string())
}
