//! The scheduled entry point: process every due fulfillment once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::bail;
use chrono::{DateTime, Utc};
use tracing::{error, info};

use creditforge_events::EventBus;
use creditforge_ledger::CreditEvent;

use crate::engine::CreditEngine;
use crate::store::CreditStore;

/// Counts from one job run.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub duration: Duration,
}

/// Safe to re-run at any point: each fulfillment is independently idempotent.
pub struct FulfillmentJob<S, B> {
    engine: Arc<CreditEngine<S, B>>,
}

impl<S, B> Clone for FulfillmentJob<S, B> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

impl<S, B> FulfillmentJob<S, B>
where
    S: CreditStore,
    B: EventBus<CreditEvent>,
{
    pub fn new(engine: Arc<CreditEngine<S, B>>) -> Self {
        Self { engine }
    }

    /// Process everything due at `now`.
    ///
    /// Business failures (missing catalog entries, insufficient credits) are
    /// logged and counted. Infrastructure failures make the run return `Err`
    /// after every sibling was attempted, so the runner's retry policy applies.
    pub fn run(&self, now: DateTime<Utc>) -> anyhow::Result<JobReport> {
        let started = Instant::now();
        let report = self.engine.fulfillments().process_pending(now)?;

        let summary = JobReport {
            processed: report.processed,
            skipped: report.skipped,
            failed: report.failed.len(),
            duration: started.elapsed(),
        };
        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            duration_ms = summary.duration.as_millis() as u64,
            "fulfillment job finished"
        );

        let unexpected: Vec<_> = report.infrastructure_failures().collect();
        if let Some((id, first)) = unexpected.first() {
            error!(failures = unexpected.len(), fulfillment_id = %id, error = %first, "fulfillment job hit infrastructure failures");
            bail!(
                "{} fulfillment(s) failed unexpectedly; first {id}: {first}",
                unexpected.len()
            );
        }
        Ok(summary)
    }

    /// Run against the wall clock.
    pub fn run_now(&self) -> anyhow::Result<JobReport> {
        self.run(Utc::now())
    }
}
