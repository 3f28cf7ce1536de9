//! Subscription lifecycle: processor subscription events to grants and fulfillment rows.
//!
//! ## Events
//!
//! | Event | Effect |
//! |-------|--------|
//! | `Created` (active) | Signup bonus, first period's credits, recurring fulfillment row |
//! | `Created` (trialing) | Trial credits expiring with the trial; no row |
//! | `PlanChanged` (up) | Full new-plan amount as `subscription_upgrade`, plan swapped now |
//! | `PlanChanged` (down) | Pending change recorded for the period end; nothing granted |
//! | `PlanChanged` (to a plan without credits) | Stop scheduled at the period end; no clawback |
//! | `Renewed` | Pending change applied, downgraded-away rows reactivated |
//! | `Canceled` | Stop scheduled at the end of access |
//!
//! A `Renewed` or `PlanChanged` event for an active subscription on a credit
//! plan that has no row yet is a trial converting to paid, and gets the same
//! first award as `Created`.
//!
//! ## Idempotency
//!
//! The fulfillment row keyed on the subscription id is the guard: every
//! branch reads it under the wallet lock before writing. Trial grants are
//! guarded by the trial entry itself.
//!
//! ## Errors
//!
//! Events that do not concern credits (unknown prices, inactive statuses,
//! owners without a wallet) are `LifecycleOutcome::Ignored`, never errors.
//! Store failures and invalid plan periods propagate as `CreditError`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use creditforge_catalog::SubscriptionPlan;
use creditforge_core::{CreditResult, OwnerRef, SourceRef, WalletId};
use creditforge_events::EventBus;
use creditforge_ledger::{
    Category, CreditEvent, Fulfillment, NewTransaction, STOP_DOWNGRADE_TO_NON_CREDIT_PLAN,
    STOP_SUBSCRIPTION_CANCELED, SubscriptionFulfillmentMeta, TransactionMeta,
};

use super::{LifecycleOutcome, Step, announce};
use crate::engine::CreditEngine;
use crate::ledger_ops::{self, Applied};
use crate::store::{CreditStore, LedgerTx};

/// Subscription status as reported by the payment processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    Incomplete,
    IncompleteExpired,
    PastDue,
    Unpaid,
    Paused,
    Canceled,
}

/// The subscription as the processor sees it when the event fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSnapshot {
    pub subscription_id: String,
    pub owner: OwnerRef,
    pub status: SubscriptionStatus,
    pub processor_plan_id: String,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    #[serde(default)]
    pub trial_ends_at: Option<DateTime<Utc>>,
    /// End of access for a canceled subscription.
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

impl SubscriptionSnapshot {
    fn source(&self) -> SourceRef {
        SourceRef::subscription(self.subscription_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscriptionEvent {
    Created(SubscriptionSnapshot),
    PlanChanged {
        subscription: SubscriptionSnapshot,
        previous_processor_plan_id: String,
    },
    Renewed(SubscriptionSnapshot),
    Canceled(SubscriptionSnapshot),
}

impl SubscriptionEvent {
    pub fn snapshot(&self) -> &SubscriptionSnapshot {
        match self {
            SubscriptionEvent::Created(s)
            | SubscriptionEvent::Renewed(s)
            | SubscriptionEvent::Canceled(s)
            | SubscriptionEvent::PlanChanged { subscription: s, .. } => s,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            SubscriptionEvent::Created(_) => "created",
            SubscriptionEvent::PlanChanged { .. } => "plan_changed",
            SubscriptionEvent::Renewed(_) => "renewed",
            SubscriptionEvent::Canceled(_) => "canceled",
        }
    }
}

/// Turns subscription events into grants and fulfillment-row updates.
///
/// Every branch is idempotent: replaying an event finds the fulfillment row
/// (or trial entry) it created and does nothing.
pub struct SubscriptionLifecycle<'e, S, B> {
    engine: &'e CreditEngine<S, B>,
}

impl<'e, S, B> SubscriptionLifecycle<'e, S, B>
where
    S: CreditStore,
    B: EventBus<CreditEvent>,
{
    pub(crate) fn new(engine: &'e CreditEngine<S, B>) -> Self {
        Self { engine }
    }

    pub fn handle(&self, event: &SubscriptionEvent) -> CreditResult<LifecycleOutcome> {
        let snapshot = event.snapshot();
        let step = match event {
            SubscriptionEvent::Created(s) => self.created(s)?,
            SubscriptionEvent::PlanChanged {
                subscription,
                previous_processor_plan_id,
            } => self.plan_changed(subscription, previous_processor_plan_id)?,
            SubscriptionEvent::Renewed(s) => self.renewed(s)?,
            SubscriptionEvent::Canceled(s) => self.canceled(s)?,
        };

        match &step {
            Step::Applied(applied) => info!(
                subscription_id = %snapshot.subscription_id,
                event = event.name(),
                entries = applied.len(),
                "subscription event applied"
            ),
            Step::Ignored(reason) => debug!(
                subscription_id = %snapshot.subscription_id,
                event = event.name(),
                reason = %reason,
                "subscription event ignored"
            ),
        }
        Ok(announce(self.engine.notifier(), step))
    }

    fn created(&self, s: &SubscriptionSnapshot) -> CreditResult<Step> {
        match s.status {
            SubscriptionStatus::Active => self.activated(s),
            SubscriptionStatus::Trialing => self.trial_started(s),
            other => Ok(Step::ignored(format!("{other:?} subscriptions do not grant credits"))),
        }
    }

    fn activated(&self, s: &SubscriptionSnapshot) -> CreditResult<Step> {
        let Some(plan) = self.engine.catalog().plan_for_processor_id(&s.processor_plan_id) else {
            return Ok(Step::ignored(format!("price {} grants no credits", s.processor_plan_id)));
        };
        let now = s.occurred_at;
        let source = s.source();
        let store = self.engine.store();
        let wallet = store.find_or_create_wallet(&s.owner, now)?;

        store.with_wallet_lock(wallet.id, |tx| {
            let existing = tx.fulfillment_for_source(&source).cloned();
            match existing {
                Some(existing) if !existing.is_stopped(now) => Ok(Step::ignored("subscription already fulfilled")),
                Some(existing) => self.reactivate(tx, existing, plan, s).map(Step::Applied),
                None => self.first_award(tx, wallet.id, source.clone(), plan, s).map(Step::Applied),
            }
        })
    }

    /// Signup bonus, first period's credits, and the recurring row.
    fn first_award(
        &self,
        tx: &mut dyn LedgerTx,
        wallet_id: WalletId,
        source: SourceRef,
        plan: &SubscriptionPlan,
        s: &SubscriptionSnapshot,
    ) -> CreditResult<Vec<Applied>> {
        let config = self.engine.config();
        let now = s.occurred_at;
        // A backdated period start must not yield credits that are already expired.
        let anchor = s.current_period_start.max(now);
        let next = plan.period.advance(anchor)?;

        let fulfillment = Fulfillment::subscription(
            wallet_id,
            source.clone(),
            plan.period,
            plan.credits_per_period,
            now,
            next,
            SubscriptionFulfillmentMeta::new(plan.id.clone(), s.subscription_id.clone()),
        )?;
        let metadata = TransactionMeta::from_source(source).plan(plan.id.clone());

        let mut applied = Vec::with_capacity(2);
        if plan.signup_bonus > 0 {
            applied.push(ledger_ops::add_credits(
                tx,
                NewTransaction {
                    wallet_id,
                    amount: plan.signup_bonus,
                    category: Category::SubscriptionSignupBonus,
                    expires_at: None,
                    metadata: metadata.clone(),
                    fulfillment_id: Some(fulfillment.id),
                    created_at: now,
                },
                config,
            )?);
        }

        let expires_at = (!plan.rollover_enabled).then(|| next + config.fulfillment_grace_period);
        applied.push(ledger_ops::add_credits(
            tx,
            NewTransaction {
                wallet_id,
                amount: plan.credits_per_period,
                category: Category::SubscriptionCredits,
                expires_at,
                metadata,
                fulfillment_id: Some(fulfillment.id),
                created_at: now,
            },
            config,
        )?);

        tx.save_fulfillment(fulfillment)?;
        Ok(applied)
    }

    /// Trial credits expire with the trial; no recurring row until activation.
    fn trial_started(&self, s: &SubscriptionSnapshot) -> CreditResult<Step> {
        let Some(plan) = self.engine.catalog().plan_for_processor_id(&s.processor_plan_id) else {
            return Ok(Step::ignored(format!("price {} grants no credits", s.processor_plan_id)));
        };
        if plan.trial_credits <= 0 {
            return Ok(Step::ignored(format!("plan {} has no trial credits", plan.id)));
        }
        let now = s.occurred_at;
        let Some(trial_ends_at) = s.trial_ends_at.filter(|at| *at > now) else {
            warn!(subscription_id = %s.subscription_id, trial_ends_at = ?s.trial_ends_at, "trialing subscription without a future trial end");
            return Ok(Step::ignored("trial has no future end"));
        };

        let source = s.source();
        let store = self.engine.store();
        let wallet = store.find_or_create_wallet(&s.owner, now)?;
        store.with_wallet_lock(wallet.id, |tx| {
            let already = tx
                .transactions()
                .iter()
                .any(|t| t.category == Category::SubscriptionTrial && t.came_from(&source));
            if already {
                return Ok(Step::ignored("trial credits already granted"));
            }
            let applied = ledger_ops::add_credits(
                tx,
                NewTransaction {
                    wallet_id: wallet.id,
                    amount: plan.trial_credits,
                    category: Category::SubscriptionTrial,
                    expires_at: Some(trial_ends_at),
                    metadata: TransactionMeta::from_source(source.clone()).plan(plan.id.clone()),
                    fulfillment_id: None,
                    created_at: now,
                },
                self.engine.config(),
            )?;
            Ok(Step::Applied(vec![applied]))
        })
    }

    fn plan_changed(&self, s: &SubscriptionSnapshot, previous_processor_plan_id: &str) -> CreditResult<Step> {
        if s.status != SubscriptionStatus::Active {
            return Ok(Step::ignored(format!("plan change on a {:?} subscription", s.status)));
        }
        let catalog = self.engine.catalog();
        // Moving off a plan without credits is an activation, handled on creation.
        let Some(previous) = catalog.plan_for_processor_id(previous_processor_plan_id) else {
            return Ok(Step::ignored(format!(
                "previous price {previous_processor_plan_id} grants no credits"
            )));
        };
        let store = self.engine.store();
        let target = catalog.plan_for_processor_id(&s.processor_plan_id);
        let now = s.occurred_at;
        let wallet = match target {
            Some(_) => store.find_or_create_wallet(&s.owner, now)?,
            None => match store.wallet_for_owner(&s.owner)? {
                Some(wallet) => wallet,
                None => return Ok(Step::ignored("owner has no wallet")),
            },
        };
        let source = s.source();

        store.with_wallet_lock(wallet.id, |tx| {
            let Some(mut fulfillment) = tx.fulfillment_for_source(&source).cloned() else {
                // Trial converting to paid on a different plan.
                return match target {
                    Some(target) => self.first_award(tx, wallet.id, source.clone(), target, s).map(Step::Applied),
                    None => Ok(Step::ignored("no fulfillment for subscription")),
                };
            };
            let Some(meta) = fulfillment.subscription_meta() else {
                return Ok(Step::ignored("fulfillment is not a subscription"));
            };
            let has_pending = meta.pending_plan_change.is_some();
            let current = catalog.plan(&meta.plan).unwrap_or(previous);

            let Some(target) = target else {
                // No clawback: granted credits stay until they expire.
                fulfillment.schedule_stop(s.current_period_end, STOP_DOWNGRADE_TO_NON_CREDIT_PLAN, now);
                clear_pending(&mut fulfillment);
                tx.save_fulfillment(fulfillment)?;
                return Ok(Step::unchanged());
            };

            if target.id == current.id {
                if !has_pending {
                    return Ok(Step::ignored(format!("already on plan {}", current.id)));
                }
                clear_pending(&mut fulfillment);
                fulfillment.updated_at = now;
                tx.save_fulfillment(fulfillment)?;
                return Ok(Step::unchanged());
            }

            if target.credits_per_period > current.credits_per_period {
                let applied = ledger_ops::add_credits(
                    tx,
                    NewTransaction {
                        wallet_id: wallet.id,
                        amount: target.credits_per_period,
                        category: Category::SubscriptionUpgrade,
                        expires_at: target.credit_expiration(now, self.engine.config().fulfillment_grace_period)?,
                        metadata: TransactionMeta::from_source(source.clone())
                            .plan(target.id.clone())
                            .extra("previous_plan", current.id.clone().into()),
                        fulfillment_id: Some(fulfillment.id),
                        created_at: now,
                    },
                    self.engine.config(),
                )?;
                switch_plan(&mut fulfillment, target, now);
                fulfillment.credits_last_fulfillment = target.credits_per_period;
                tx.save_fulfillment(fulfillment)?;
                return Ok(Step::Applied(vec![applied]));
            }

            if target.credits_per_period < current.credits_per_period {
                if let Some(meta) = fulfillment.subscription_meta_mut() {
                    meta.pending_plan_change = Some(target.id.clone());
                    meta.plan_change_at = Some(s.current_period_end);
                }
                fulfillment.updated_at = now;
                tx.save_fulfillment(fulfillment)?;
                return Ok(Step::unchanged());
            }

            switch_plan(&mut fulfillment, target, now);
            tx.save_fulfillment(fulfillment)?;
            Ok(Step::unchanged())
        })
    }

    fn renewed(&self, s: &SubscriptionSnapshot) -> CreditResult<Step> {
        let catalog = self.engine.catalog();
        let store = self.engine.store();
        let now = s.occurred_at;
        let renewed_on = catalog.plan_for_processor_id(&s.processor_plan_id);
        let converting = s.status == SubscriptionStatus::Active && renewed_on.is_some();
        let wallet = if converting {
            store.find_or_create_wallet(&s.owner, now)?
        } else {
            match store.wallet_for_owner(&s.owner)? {
                Some(wallet) => wallet,
                None => return Ok(Step::ignored("owner has no wallet")),
            }
        };
        let source = s.source();

        store.with_wallet_lock(wallet.id, |tx| {
            let Some(mut fulfillment) = tx.fulfillment_for_source(&source).cloned() else {
                // A trial converting to paid has no recurring row yet.
                return match renewed_on.filter(|_| converting) {
                    Some(plan) => self.first_award(tx, wallet.id, source.clone(), plan, s).map(Step::Applied),
                    None => Ok(Step::ignored("no fulfillment for subscription")),
                };
            };
            let Some(meta) = fulfillment.subscription_meta().cloned() else {
                return Ok(Step::ignored("fulfillment is not a subscription"));
            };

            if let Some(pending) = meta.pending_plan_change {
                match catalog.plan(&pending) {
                    Some(plan) => switch_plan(&mut fulfillment, plan, now),
                    None => {
                        warn!(
                            subscription_id = %s.subscription_id,
                            plan = %pending,
                            "pending plan no longer exists, keeping current plan"
                        );
                        clear_pending(&mut fulfillment);
                        fulfillment.updated_at = now;
                    }
                }
                tx.save_fulfillment(fulfillment)?;
                return Ok(Step::unchanged());
            }

            if meta.stopped_reason.as_deref() == Some(STOP_DOWNGRADE_TO_NON_CREDIT_PLAN) {
                return match renewed_on {
                    Some(plan) => self.reactivate(tx, fulfillment, plan, s).map(Step::Applied),
                    None => Ok(Step::ignored("still on a plan without credits")),
                };
            }

            Ok(Step::ignored("period credits are granted by the fulfillment processor"))
        })
    }

    fn canceled(&self, s: &SubscriptionSnapshot) -> CreditResult<Step> {
        let store = self.engine.store();
        let Some(wallet) = store.wallet_for_owner(&s.owner)? else {
            return Ok(Step::ignored("owner has no wallet"));
        };
        let now = s.occurred_at;
        let stops_at = s.ends_at.unwrap_or(s.current_period_end);
        let source = s.source();

        store.with_wallet_lock(wallet.id, |tx| {
            let Some(mut fulfillment) = tx.fulfillment_for_source(&source).cloned() else {
                return Ok(Step::ignored("no fulfillment for subscription"));
            };
            let already = fulfillment.stops_at == Some(stops_at)
                && fulfillment
                    .subscription_meta()
                    .and_then(|m| m.stopped_reason.as_deref())
                    == Some(STOP_SUBSCRIPTION_CANCELED);
            if already {
                return Ok(Step::ignored("cancellation already recorded"));
            }
            fulfillment.schedule_stop(stops_at, STOP_SUBSCRIPTION_CANCELED, now);
            clear_pending(&mut fulfillment);
            tx.save_fulfillment(fulfillment)?;
            Ok(Step::unchanged())
        })
    }

    /// Fresh award on `plan` for a stopped row, then resume its schedule.
    fn reactivate(
        &self,
        tx: &mut dyn LedgerTx,
        mut fulfillment: Fulfillment,
        plan: &SubscriptionPlan,
        s: &SubscriptionSnapshot,
    ) -> CreditResult<Vec<Applied>> {
        let config = self.engine.config();
        let now = s.occurred_at;
        let applied = ledger_ops::add_credits(
            tx,
            NewTransaction {
                wallet_id: fulfillment.wallet_id,
                amount: plan.credits_per_period,
                category: Category::SubscriptionCredits,
                expires_at: plan.credit_expiration(now, config.fulfillment_grace_period)?,
                metadata: TransactionMeta::from_source(fulfillment.source.clone()).plan(plan.id.clone()),
                fulfillment_id: Some(fulfillment.id),
                created_at: now,
            },
            config,
        )?;

        let next = if s.current_period_end > now {
            s.current_period_end
        } else {
            plan.period.advance(now)?
        };
        switch_plan(&mut fulfillment, plan, now);
        fulfillment.last_fulfilled_at = Some(now);
        fulfillment.credits_last_fulfillment = plan.credits_per_period;
        fulfillment.reactivate(next, now);
        info!(
            subscription_id = %s.subscription_id,
            plan = %plan.id,
            next_fulfillment_at = %next,
            "subscription fulfillment reactivated"
        );
        tx.save_fulfillment(fulfillment)?;
        Ok(vec![applied])
    }
}

fn clear_pending(fulfillment: &mut Fulfillment) {
    if let Some(meta) = fulfillment.subscription_meta_mut() {
        meta.clear_pending_change();
    }
}

fn switch_plan(fulfillment: &mut Fulfillment, plan: &SubscriptionPlan, now: DateTime<Utc>) {
    if let Some(meta) = fulfillment.subscription_meta_mut() {
        meta.plan = plan.id.clone();
        meta.clear_pending_change();
    }
    fulfillment.period = Some(plan.period);
    fulfillment.updated_at = now;
}
