//! Runs the daily accrual sweep at every local midnight.

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Utc};
use tokio::sync::watch;
use tracing::{error, info};

use crate::service::Bank;

/// The first local midnight strictly after `now`.
pub fn next_local_midnight(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let tomorrow = now.with_timezone(&offset).date_naive() + Duration::days(1);
    let midnight = tomorrow.and_time(NaiveTime::MIN);
    // A fixed offset has no gaps, so local midnight always exists.
    (midnight - Duration::seconds(i64::from(offset.local_minus_utc())))
        .and_utc()
}

/// Sleeps until the next local midnight, sweeps every account, and re-arms,
/// until `shutdown` flips to `true`.
pub async fn run_daily_accrual(bank: Bank, mut shutdown: watch::Receiver<bool>) {
    let offset = bank.policy().utc_offset;
    loop {
        let now = Utc::now();
        let next = next_local_midnight(now, offset);
        let wait = (next - now).to_std().unwrap_or_default();
        info!(next = %next, "next daily accrual scheduled");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => {
                info!("daily accrual scheduler stopped");
                return;
            }
        }

        // Run at the fire time rather than `Utc::now()`, which could still
        // read as the previous day if the timer fires a little early.
        let at = Utc::now().max(next);
        if let Err(e) = bank.accrue_all(at).await {
            error!("daily accrual sweep failed: {e}");
        }
    }
}
