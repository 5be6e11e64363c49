//! Periodic scheduling and the retry shell
//!
//! Each pipeline direction runs on its own fixed interval. A run that
//! fails with a transient error (I/O, database, timeout) gets a bounded
//! number of immediate retries with a fixed backoff; permanent errors
//! are surfaced at once. A run that still fails after its retries is
//! logged and the schedule keeps ticking, so one bad interval never
//! stops the pipeline.

use crate::consumer::BatchConsumer;
use crate::producer::BatchProducer;
use crate::store::{ExportSource, ImportTarget};
use crate::types::ExportOutcome;
use anyhow::Result;
use relay_common::RelayError;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Timing knobs for one scheduled pipeline direction.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Time between run starts
    pub interval: Duration,
    /// Additional attempts after a transient failure
    pub max_retries: u32,
    /// Pause before each retry
    pub retry_backoff: Duration,
    /// Ceiling on each individual attempt
    pub run_timeout: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_retries: 2,
            retry_backoff: Duration::from_secs(30),
            run_timeout: Duration::from_secs(300),
        }
    }
}

/// Execute one run with the retry policy applied.
///
/// `task` names the direction for logging, e.g. `"export/requests"`.
/// Only transient failures are retried; a permanent error (malformed
/// input, bad config) returns immediately since the same input would
/// fail the same way.
pub async fn run_with_retry<T, F, Fut>(
    task: &str,
    schedule: &ScheduleConfig,
    mut attempt_fn: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        let result = match tokio::time::timeout(schedule.run_timeout, attempt_fn()).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::Timeout(schedule.run_timeout.as_secs()).into()),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if RelayError::chain_is_transient(&e) && attempt < schedule.max_retries => {
                attempt += 1;
                warn!(
                    task = %task,
                    attempt,
                    max_retries = schedule.max_retries,
                    error = %format!("{e:#}"),
                    "transient failure, retrying after backoff"
                );
                tokio::time::sleep(schedule.retry_backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Spawn a producer on its schedule. Runs until the task is aborted.
pub fn spawn_producer<S>(
    producer: BatchProducer<S>,
    schedule: ScheduleConfig,
) -> JoinHandle<()>
where
    S: ExportSource + 'static,
{
    let task = format!("export/{}", producer.batch_type());
    tokio::spawn(async move {
        info!(task = %task, interval_secs = schedule.interval.as_secs(), "schedule started");
        let mut ticker = tokio::time::interval(schedule.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            debug!(task = %task, "run starting");
            let started = std::time::Instant::now();
            match run_with_retry(&task, &schedule, || producer.run()).await {
                Ok(ExportOutcome::Noop) => {}
                Ok(ExportOutcome::Exported { record_count, .. }) => {
                    info!(
                        task = %task,
                        record_count,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "scheduled export run succeeded"
                    );
                }
                Err(e) => {
                    error!(
                        task = %task,
                        error = %format!("{e:#}"),
                        "scheduled export run failed, waiting for next interval"
                    );
                }
            }
        }
    })
}

/// Spawn a consumer on its schedule. Runs until the task is aborted.
pub fn spawn_consumer<T>(
    consumer: BatchConsumer<T>,
    schedule: ScheduleConfig,
) -> JoinHandle<()>
where
    T: ImportTarget + 'static,
{
    let task = format!("import/{}", consumer.batch_type());
    tokio::spawn(async move {
        info!(task = %task, interval_secs = schedule.interval.as_secs(), "schedule started");
        let mut ticker = tokio::time::interval(schedule.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            debug!(task = %task, "run starting");
            let started = std::time::Instant::now();
            match run_with_retry(&task, &schedule, || consumer.run()).await {
                Ok(summary) if summary.is_noop() => {}
                Ok(summary) => {
                    info!(
                        task = %task,
                        processed = summary.processed,
                        quarantined = summary.quarantined,
                        records_applied = summary.records_applied,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "scheduled import run finished"
                    );
                }
                Err(e) => {
                    error!(
                        task = %task,
                        error = %format!("{e:#}"),
                        "scheduled import run failed, waiting for next interval"
                    );
                }
            }
        }
    })
}
