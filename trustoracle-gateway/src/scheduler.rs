//! Scheduled batch submission.
//!
//! Fires daily at 02:00 local time. The manual REST trigger runs the
//! same `run_batch` path; a failed run is logged and the next one
//! proceeds normally.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use tokio::task::JoinHandle;

use trustoracle_core::{run_batch, ChainGateway, Store};

const BATCH_HOUR: u32 = 2;

pub fn spawn_batch_scheduler(
    store: Store,
    chain: Arc<dyn ChainGateway>,
    call_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let wait = duration_until_next_run(Local::now());
            tracing::info!(
                seconds = wait.as_secs(),
                "next scheduled batch submission"
            );
            tokio::time::sleep(wait).await;

            match run_batch(&store, chain.as_ref(), call_timeout).await {
                Ok(summary) => {
                    tracing::info!(
                        run_id = %summary.run_id,
                        submitted = summary.submitted_records,
                        pending = summary.pending_records,
                        "scheduled batch finished"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "scheduled batch failed");
                }
            }
        }
    })
}

fn duration_until_next_run(now: DateTime<Local>) -> Duration {
    let mut target = now
        .date_naive()
        .and_hms_opt(BATCH_HOUR, 0, 0)
        .expect("02:00 is a valid time");
    if now.naive_local() >= target {
        target += chrono::Duration::days(1);
    }

    // A DST gap can make 02:00 nonexistent locally; fall back to the
    // earliest valid interpretation, or an hour if even that fails.
    let target = match Local.from_local_datetime(&target) {
        chrono::LocalResult::Single(t) => t,
        chrono::LocalResult::Ambiguous(earliest, _) => earliest,
        chrono::LocalResult::None => return Duration::from_secs(3_600),
    };

    (target - now).to_std().unwrap_or(Duration::from_secs(3_600))
}
