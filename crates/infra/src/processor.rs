//! Fulfillment processor: turns due fulfillment slots into grants.
//!
//! ## Design
//!
//! `process` takes the fulfillment's lock, then its wallet's lock, and
//! re-checks `is_due` with both held. A scheduler run and a manual trigger
//! racing on the same slot therefore grant it once; the loser sees
//! `ProcessOutcome::Skipped`. A scheduled downgrade whose `plan_change_at` has
//! passed is applied before the grant is resolved. If the pending plan left
//! the catalog, the pending change is cleared and the current plan granted.
//!
//! | Fulfillment type | Amount | Category | Expiry |
//! |------------------|--------|----------|--------|
//! | Subscription | plan credits per period | `subscription_credits` | `now + period + grace`, none with rollover |
//! | CreditPack | pack base + bonus | `credit_pack` | none |
//! | Manual | `credits_last_fulfillment` | `fulfillment` | none |
//!
//! The grant, `last_fulfilled_at`, `credits_last_fulfillment` and the next
//! slot commit in one unit of work. The next slot skips ahead to
//! `now + period` when the current one is already past.
//!
//! ## Thread Safety
//!
//! The processor borrows the engine and holds no state of its own. Any number
//! of threads or processes may run `process_pending` over the same store.
//!
//! ## Error Mapping
//!
//! | Failure | Result |
//! |---------|--------|
//! | Unknown fulfillment id | `NotFound` |
//! | Plan or pack missing from the catalog | `InvalidOperation`, slot left due |
//! | Store or lock failure | `Storage` / `Conflict` |
//!
//! `process_pending` collects per-item failures in [`ProcessReport`] and keeps
//! going; [`ProcessReport::infrastructure_failures`] picks out the ones a job
//! runner should retry.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use creditforge_core::{CreditError, CreditResult, FulfillmentId};
use creditforge_events::EventBus;
use creditforge_ledger::{
    Category, CreditEvent, CreditTransaction, Fulfillment, FulfillmentMeta, NewTransaction, TransactionMeta,
};

use crate::engine::CreditEngine;
use crate::ledger_ops::{self, Applied};
use crate::store::CreditStore;

/// What `process` did with one fulfillment.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Fulfilled {
        transaction: CreditTransaction,
        next_fulfillment_at: Option<DateTime<Utc>>,
    },
    /// Not due once the lock was held (already processed, stopped, or not yet time).
    Skipped,
}

/// Summary of one batch run.
#[derive(Debug, Default)]
pub struct ProcessReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: Vec<(FulfillmentId, CreditError)>,
}

impl ProcessReport {
    /// Failures that are not business outcomes (storage, conflicts).
    pub fn infrastructure_failures(&self) -> impl Iterator<Item = &(FulfillmentId, CreditError)> {
        self.failed.iter().filter(|(_, e)| !e.is_domain())
    }
}

/// Grants due fulfillment slots through the engine's store.
pub struct FulfillmentProcessor<'e, S, B> {
    engine: &'e CreditEngine<S, B>,
}

impl<'e, S, B> FulfillmentProcessor<'e, S, B>
where
    S: CreditStore,
    B: EventBus<CreditEvent>,
{
    pub(crate) fn new(engine: &'e CreditEngine<S, B>) -> Self {
        Self { engine }
    }

    /// Grant the due slot of one fulfillment.
    ///
    /// Locks the fulfillment, then its wallet, and re-checks `is_due` under
    /// both locks so concurrent runs grant each slot once.
    pub fn process(&self, id: FulfillmentId, now: DateTime<Utc>) -> CreditResult<ProcessOutcome> {
        let store = self.engine.store();
        store.with_fulfillment_lock(id, || {
            let wallet_id = store
                .fulfillment(id)?
                .ok_or_else(|| CreditError::not_found(format!("fulfillment {id}")))?
                .wallet_id;

            let granted = store.with_wallet_lock(wallet_id, |tx| {
                let mut fulfillment = tx
                    .fulfillment(id)
                    .cloned()
                    .ok_or_else(|| CreditError::not_found(format!("fulfillment {id}")))?;
                if !fulfillment.is_due(now) {
                    return Ok(None);
                }

                self.apply_due_plan_change(&mut fulfillment, now);
                let grant = self.resolve_grant(&fulfillment, now)?;
                let applied = ledger_ops::add_credits(tx, grant, self.engine.config())?;
                fulfillment.mark_fulfilled(applied.transaction.amount, now)?;
                tx.save_fulfillment(fulfillment.clone())?;
                Ok(Some((applied, fulfillment)))
            })?;

            match granted {
                None => {
                    debug!(fulfillment_id = %id, "fulfillment not due, skipped");
                    Ok(ProcessOutcome::Skipped)
                }
                Some((applied, fulfillment)) => Ok(self.announce(applied, &fulfillment, now)),
            }
        })
    }

    /// Process every due fulfillment independently; failures are logged and collected.
    pub fn process_pending(&self, now: DateTime<Utc>) -> CreditResult<ProcessReport> {
        let due = self.engine.store().due_fulfillments(now)?;
        let mut report = ProcessReport::default();

        for fulfillment in due {
            match self.process(fulfillment.id, now) {
                Ok(ProcessOutcome::Fulfilled { .. }) => report.processed += 1,
                Ok(ProcessOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    error!(
                        fulfillment_id = %fulfillment.id,
                        wallet_id = %fulfillment.wallet_id,
                        error = %e,
                        "fulfillment failed"
                    );
                    report.failed.push((fulfillment.id, e));
                }
            }
        }
        Ok(report)
    }

    /// Swap in a scheduled downgrade whose effective time has come.
    fn apply_due_plan_change(&self, fulfillment: &mut Fulfillment, now: DateTime<Utc>) {
        let catalog = self.engine.catalog();
        let id = fulfillment.id;
        let Some(meta) = fulfillment.subscription_meta_mut() else {
            return;
        };
        let Some(pending) = meta.pending_plan_change.clone() else {
            return;
        };
        if meta.plan_change_at.is_some_and(|at| at > now) {
            return;
        }

        meta.clear_pending_change();
        match catalog.plan(&pending) {
            Some(plan) => {
                info!(fulfillment_id = %id, from = %meta.plan, to = %plan.id, "applying scheduled plan change");
                meta.plan = plan.id.clone();
                fulfillment.period = Some(plan.period);
            }
            None => warn!(fulfillment_id = %id, plan = %pending, "scheduled plan no longer exists, keeping current plan"),
        }
    }

    fn resolve_grant(&self, fulfillment: &Fulfillment, now: DateTime<Utc>) -> CreditResult<NewTransaction> {
        let catalog = self.engine.catalog();
        let grace = self.engine.config().fulfillment_grace_period;
        let base = TransactionMeta::from_source(fulfillment.source.clone());

        let (amount, category, expires_at, metadata) = match &fulfillment.metadata {
            FulfillmentMeta::Subscription(meta) => {
                let plan = catalog.require_plan(&meta.plan)?;
                (
                    plan.credits_per_period,
                    Category::SubscriptionCredits,
                    plan.credit_expiration(now, grace)?,
                    base.plan(plan.id.clone()),
                )
            }
            FulfillmentMeta::CreditPack(meta) => {
                let pack = catalog.require_pack(&meta.pack)?;
                (pack.total_credits(), Category::CreditPack, None, base.pack(pack.id.clone()))
            }
            FulfillmentMeta::Manual { note } => {
                let metadata = match note {
                    Some(note) => TransactionMeta {
                        reason: Some(note.clone()),
                        ..base
                    },
                    None => base,
                };
                (fulfillment.credits_last_fulfillment, Category::Fulfillment, None, metadata)
            }
        };

        Ok(NewTransaction {
            wallet_id: fulfillment.wallet_id,
            amount,
            category,
            expires_at,
            metadata,
            fulfillment_id: Some(fulfillment.id),
            created_at: now,
        })
    }

    fn announce(&self, applied: Applied, fulfillment: &Fulfillment, now: DateTime<Utc>) -> ProcessOutcome {
        info!(
            fulfillment_id = %fulfillment.id,
            wallet_id = %fulfillment.wallet_id,
            credits = applied.transaction.amount,
            next_fulfillment_at = ?fulfillment.next_fulfillment_at,
            "fulfillment processed"
        );
        let notifier = self.engine.notifier();
        notifier.credits_added(&applied);
        notifier.fulfillment_processed(fulfillment, applied.transaction.amount, now);
        ProcessOutcome::Fulfilled {
            transaction: applied.transaction,
            next_fulfillment_at: fulfillment.next_fulfillment_at,
        }
    }
}
