//! Periodic rollup and retention driver
//!
//! Two cooperative loops share one shutdown signal:
//!
//! - **Aggregation loop**: fires at wall-clock boundaries aligned to the
//!   aggregate interval and rolls raw → hourly → daily → monthly. The
//!   raw → hourly window reaches two hours back so late inserts and clock
//!   skew land in the re-summed bucket.
//! - **Cleanup loop**: enforces retention on the metric tables and the
//!   health-check history. Long cleanup intervals are pinned to 02:00 UTC
//!   so the delete churn happens off-peak.
//!
//! Each rollup/cleanup step runs under its own timeout; a failed step is
//! logged and the remaining steps still run. Either loop panicking is
//! contained to that loop.
//!
//! Single-writer assumption: one scheduler per deployment drives the
//! rollup tables.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument};

use crate::storage::{Granularity, StorageBackend};
use crate::util;

/// Deadline for each individual rollup or cleanup step.
const TASK_TIMEOUT: Duration = Duration::from_secs(30);

/// How long `stop` waits for the loops before detaching them.
const STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Cleanup intervals at or above this are aligned to 02:00 UTC instead of
/// free-running.
const CLEANUP_ALIGNMENT_THRESHOLD: Duration = Duration::from_secs(20 * 60 * 60);

/// Overlap of the raw → hourly window past the previous tick, in hours.
const HOURLY_ROLLUP_LOOKBACK_HOURS: i64 = 2;

/// Scheduler cadence configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Aggregation cadence; ticks are aligned to multiples of this.
    pub aggregate_interval: Duration,

    /// Cleanup cadence; values ≥ 20 h snap to 02:00 UTC daily.
    pub cleanup_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            aggregate_interval: Duration::from_secs(60 * 60),
            cleanup_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Handle over the two running loops.
pub struct MetricsScheduler {
    stop_tx: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl MetricsScheduler {
    /// Spawn both loops against the given store.
    pub fn start(store: Arc<dyn StorageBackend>, config: SchedulerConfig) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);

        info!(
            "starting metrics scheduler (aggregate every {:?}, cleanup every {:?})",
            config.aggregate_interval, config.cleanup_interval
        );

        let agg_store = store.clone();
        let agg_rx = stop_rx.clone();
        let agg_interval = config.aggregate_interval;
        let aggregation = tokio::spawn(panic_fenced(
            "aggregation",
            aggregation_loop(agg_store, agg_interval, agg_rx),
        ));

        let cleanup_interval = config.cleanup_interval;
        let cleanup = tokio::spawn(panic_fenced(
            "cleanup",
            cleanup_loop(store, cleanup_interval, stop_rx),
        ));

        Self {
            stop_tx,
            tasks: vec![("aggregation", aggregation), ("cleanup", cleanup)],
        }
    }

    /// Signal shutdown and wait for both loops.
    ///
    /// The signal is idempotent; loops that do not exit within the stop
    /// timeout are logged and detached rather than blocking the host.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);

        for (name, task) in self.tasks {
            match timeout(STOP_TIMEOUT, task).await {
                Ok(Ok(())) => debug!("{name} loop stopped"),
                Ok(Err(e)) => error!("{name} loop aborted: {e}"),
                Err(_) => error!(
                    "{name} loop did not stop within {:?}, detaching",
                    STOP_TIMEOUT
                ),
            }
        }

        info!("metrics scheduler stopped");
    }
}

/// Contain a loop panic to that loop; the sibling keeps running.
async fn panic_fenced(name: &'static str, fut: impl Future<Output = ()>) {
    if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
        error!("{name} loop panicked, loop is down until restart");
    }
}

async fn aggregation_loop(
    store: Arc<dyn StorageBackend>,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    let step = chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::hours(1));

    loop {
        let now = Utc::now();
        let next = util::align_to_next(now, step);
        let wait = (next - now).to_std().unwrap_or_default();
        debug!("next aggregation tick at {}", next);

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                run_aggregation_tick(store.as_ref(), Utc::now()).await;
            }
            _ = stop_rx.changed() => {
                debug!("aggregation loop received stop signal");
                break;
            }
        }
    }
}

async fn cleanup_loop(
    store: Arc<dyn StorageBackend>,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        let now = Utc::now();
        let next = if interval >= CLEANUP_ALIGNMENT_THRESHOLD {
            util::next_daily_at_two_utc(now)
        } else {
            now + chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::hours(1))
        };
        let wait = (next - now).to_std().unwrap_or_default();
        debug!("next cleanup tick at {}", next);

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                run_cleanup_tick(store.as_ref(), Utc::now()).await;
            }
            _ = stop_rx.changed() => {
                debug!("cleanup loop received stop signal");
                break;
            }
        }
    }
}

/// One aggregation pass: raw → hourly over the trailing two hours, then
/// hourly → daily for yesterday, then daily → monthly for last month.
///
/// Steps are independent; a failed or timed-out step does not stop the
/// later ones.
#[instrument(skip(store), fields(now = %now))]
pub async fn run_aggregation_tick(store: &dyn StorageBackend, now: DateTime<Utc>) {
    let hourly_from = now - chrono::Duration::hours(HOURLY_ROLLUP_LOOKBACK_HOURS);
    rollup_step(store, Granularity::Hourly, hourly_from, now).await;

    let day_start = util::truncate_to_day(now);
    rollup_step(
        store,
        Granularity::Daily,
        day_start - chrono::Duration::hours(24),
        day_start,
    )
    .await;

    let month_start = util::truncate_to_month(now);
    rollup_step(
        store,
        Granularity::Monthly,
        util::previous_month_start(now),
        month_start,
    )
    .await;
}

async fn rollup_step(
    store: &dyn StorageBackend,
    target: Granularity,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) {
    match timeout(TASK_TIMEOUT, store.aggregate_metrics(None, target, from, to)).await {
        Ok(Ok(written)) => {
            if written > 0 {
                debug!("{} rollup wrote {} buckets", target, written);
            }
        }
        Ok(Err(e)) => error!("{} rollup failed: {}", target, e),
        Err(_) => error!("{} rollup timed out after {:?}", target, TASK_TIMEOUT),
    }
}

/// One cleanup pass: metric retention first, then health-check history.
#[instrument(skip(store), fields(now = %now))]
pub async fn run_cleanup_tick(store: &dyn StorageBackend, now: DateTime<Utc>) {
    match timeout(TASK_TIMEOUT, store.cleanup_metrics(None, now)).await {
        Ok(Ok(deleted)) => {
            if deleted > 0 {
                info!("metrics cleanup deleted {} rows", deleted);
            }
        }
        Ok(Err(e)) => error!("metrics cleanup failed: {}", e),
        Err(_) => error!("metrics cleanup timed out after {:?}", TASK_TIMEOUT),
    }

    match timeout(TASK_TIMEOUT, store.cleanup_health_checks(None)).await {
        Ok(Ok(deleted)) => {
            if deleted > 0 {
                info!("health-check cleanup deleted {} rows", deleted);
            }
        }
        Ok(Err(e)) => error!("health-check cleanup failed: {}", e),
        Err(_) => error!("health-check cleanup timed out after {:?}", TASK_TIMEOUT),
    }
}
