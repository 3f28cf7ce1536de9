//! Background thread that runs the fulfillment job on an interval.

use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{error, info, warn};

use creditforge_events::EventBus;
use creditforge_ledger::CreditEvent;

use super::fulfillment_job::FulfillmentJob;
use crate::store::CreditStore;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to spawn scheduler thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pause between runs.
    pub poll_interval: Duration,
    /// Thread name, also used in logs.
    pub name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            name: "fulfillment-scheduler".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Scheduler runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SchedulerStats {
    pub runs: u64,
    pub failed_runs: u64,
    pub fulfillments_processed: u64,
    pub fulfillments_failed: u64,
    pub uptime_secs: u64,
}

/// Handle to control a running scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<SchedulerStats>>,
}

impl SchedulerHandle {
    /// Stop after the current run and wait for the thread.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

pub struct FulfillmentScheduler;

impl FulfillmentScheduler {
    /// Spawn the polling loop on its own thread.
    pub fn spawn<S, B>(job: FulfillmentJob<S, B>, config: SchedulerConfig) -> Result<SchedulerHandle, SchedulerError>
    where
        S: CreditStore + 'static,
        B: EventBus<CreditEvent> + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(SchedulerStats::default()));
        let stats_clone = stats.clone();

        let join = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || scheduler_loop(job, config, shutdown_rx, stats_clone))?;

        Ok(SchedulerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}

fn scheduler_loop<S, B>(
    job: FulfillmentJob<S, B>,
    config: SchedulerConfig,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<SchedulerStats>>,
) where
    S: CreditStore,
    B: EventBus<CreditEvent>,
{
    info!(scheduler = %config.name, "fulfillment scheduler started");
    let start_time = Instant::now();

    loop {
        let outcome = job.run_now();

        if let Ok(mut s) = stats.lock() {
            s.runs += 1;
            s.uptime_secs = start_time.elapsed().as_secs();
            match &outcome {
                Ok(report) => {
                    s.fulfillments_processed += report.processed as u64;
                    s.fulfillments_failed += report.failed as u64;
                }
                Err(_) => s.failed_runs += 1,
            }
        } else {
            warn!(scheduler = %config.name, "scheduler stats lock poisoned");
        }

        if let Err(e) = outcome {
            error!(scheduler = %config.name, error = %e, "fulfillment run failed");
        }

        // Sleeps for the interval unless a shutdown arrives first.
        match shutdown_rx.recv_timeout(config.poll_interval) {
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(scheduler = %config.name, "fulfillment scheduler stopped");
}
