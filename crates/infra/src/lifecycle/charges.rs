//! Charge lifecycle: credit-pack purchases and their refunds.
//!
//! ## Purchases
//!
//! A succeeded charge grants the pack's base plus bonus credits under
//! `credit_pack_purchase`, never expiring, and records a one-shot fulfillment
//! row keyed on the charge id. Charges that are not pack purchases, name an
//! unknown pack, or claim a credit count the pack does not grant are ignored.
//!
//! ## Refunds
//!
//! The processor reports the cumulative refunded amount on every change. The
//! row remembers how many credits were already taken back, so each event
//! deducts only `round(granted * refunded / amount) - already_refunded` with
//! the configured rounding (ceil unless configured otherwise). Two 25% refunds
//! of a 1000-credit pack deduct 250 and 250; refunding 2450 of 4900 cents
//! deducts 500.
//!
//! ## Errors
//!
//! A refund the wallet can no longer cover fails with `InsufficientCredits`
//! and writes nothing, unless negative balances are allowed. Over-refunds and
//! charges without an owner or wallet are ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use creditforge_core::{CreditResult, OwnerRef, SourceRef};
use creditforge_events::EventBus;
use creditforge_ledger::{
    Category, CreditEvent, Fulfillment, NewTransaction, PackFulfillmentMeta, RefundMeta, TransactionMeta,
};

use super::{LifecycleOutcome, Step, announce};
use crate::engine::CreditEngine;
use crate::ledger_ops::{self, Debit};
use crate::store::CreditStore;

/// `purchase_type` marking a charge as a credit-pack purchase.
pub const PURCHASE_TYPE_CREDIT_PACK: &str = "credit_pack";

/// Free-form metadata the checkout attached to the charge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeMetadata {
    #[serde(default)]
    pub purchase_type: Option<String>,
    #[serde(default)]
    pub pack_name: Option<String>,
    #[serde(default)]
    pub credits: Option<i64>,
}

impl ChargeMetadata {
    pub fn credit_pack(pack_name: impl Into<String>, credits: i64) -> Self {
        Self {
            purchase_type: Some(PURCHASE_TYPE_CREDIT_PACK.to_string()),
            pack_name: Some(pack_name.into()),
            credits: Some(credits),
        }
    }
}

/// A one-time charge as the processor sees it when the event fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeSnapshot {
    pub charge_id: String,
    #[serde(default)]
    pub owner: Option<OwnerRef>,
    pub amount_cents: i64,
    /// Cumulative amount refunded so far.
    #[serde(default)]
    pub amount_refunded_cents: i64,
    #[serde(default)]
    pub metadata: ChargeMetadata,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChargeEvent {
    Succeeded(ChargeSnapshot),
    /// Fires again on every change of the refunded amount.
    Refunded(ChargeSnapshot),
}

/// Pack purchases and their (partial) refunds.
pub struct ChargeLifecycle<'e, S, B> {
    engine: &'e CreditEngine<S, B>,
}

impl<'e, S, B> ChargeLifecycle<'e, S, B>
where
    S: CreditStore,
    B: EventBus<CreditEvent>,
{
    pub(crate) fn new(engine: &'e CreditEngine<S, B>) -> Self {
        Self { engine }
    }

    pub fn handle(&self, event: &ChargeEvent) -> CreditResult<LifecycleOutcome> {
        let (charge, step) = match event {
            ChargeEvent::Succeeded(c) => (c, self.succeeded(c)?),
            ChargeEvent::Refunded(c) => (c, self.refunded(c)?),
        };
        match &step {
            Step::Applied(applied) => info!(charge_id = %charge.charge_id, entries = applied.len(), "charge event applied"),
            Step::Ignored(reason) => debug!(charge_id = %charge.charge_id, reason = %reason, "charge event ignored"),
        }
        Ok(announce(self.engine.notifier(), step))
    }

    fn succeeded(&self, c: &ChargeSnapshot) -> CreditResult<Step> {
        let Some(owner) = &c.owner else {
            return Ok(Step::ignored("charge has no owner"));
        };
        if c.metadata.purchase_type.as_deref() != Some(PURCHASE_TYPE_CREDIT_PACK) {
            return Ok(Step::ignored("not a credit pack purchase"));
        }
        let Some(pack_name) = c.metadata.pack_name.as_deref() else {
            return Ok(Step::ignored("credit pack purchase without a pack name"));
        };
        let Some(pack) = self.engine.catalog().pack(pack_name) else {
            return Ok(Step::ignored(format!("unknown pack {pack_name}")));
        };
        if let Some(credits) = c.metadata.credits {
            if credits != pack.total_credits() {
                return Ok(Step::ignored(format!(
                    "charge claims {credits} credits but pack {} grants {}",
                    pack.id,
                    pack.total_credits()
                )));
            }
        }

        let now = c.occurred_at;
        let source = SourceRef::charge(c.charge_id.clone());
        let store = self.engine.store();
        let wallet = store.find_or_create_wallet(owner, now)?;

        store.with_wallet_lock(wallet.id, |tx| {
            if tx.fulfillment_for_source(&source).is_some() {
                return Ok(Step::ignored("charge already fulfilled"));
            }
            let fulfillment = Fulfillment::credit_pack(
                wallet.id,
                source.clone(),
                now,
                PackFulfillmentMeta {
                    pack: pack.id.clone(),
                    charge_id: c.charge_id.clone(),
                    credits_granted: pack.total_credits(),
                    refunded_credits: 0,
                    amount_refunded_cents: 0,
                },
            )?;
            let applied = ledger_ops::add_credits(
                tx,
                NewTransaction {
                    wallet_id: wallet.id,
                    amount: pack.total_credits(),
                    category: Category::CreditPackPurchase,
                    expires_at: None,
                    metadata: TransactionMeta::from_source(source.clone())
                        .pack(pack.id.clone())
                        .extra("amount_cents", c.amount_cents.into()),
                    fulfillment_id: Some(fulfillment.id),
                    created_at: now,
                },
                self.engine.config(),
            )?;
            tx.save_fulfillment(fulfillment)?;
            Ok(Step::Applied(vec![applied]))
        })
    }

    /// Deduct the refunded share of the pack so cumulative partial refunds add up exactly.
    fn refunded(&self, c: &ChargeSnapshot) -> CreditResult<Step> {
        let Some(owner) = &c.owner else {
            return Ok(Step::ignored("charge has no owner"));
        };
        if c.amount_cents <= 0 {
            return Ok(Step::ignored("charge has no amount"));
        }
        if c.amount_refunded_cents <= 0 {
            return Ok(Step::ignored("nothing refunded"));
        }
        if c.amount_refunded_cents > c.amount_cents {
            return Ok(Step::ignored(format!(
                "refund of {} exceeds the charge of {}",
                c.amount_refunded_cents, c.amount_cents
            )));
        }
        let store = self.engine.store();
        let Some(wallet) = store.wallet_for_owner(owner)? else {
            return Ok(Step::ignored("owner has no wallet"));
        };

        let config = self.engine.config();
        let now = c.occurred_at;
        let source = SourceRef::charge(c.charge_id.clone());

        store.with_wallet_lock(wallet.id, |tx| {
            let Some(mut fulfillment) = tx.fulfillment_for_source(&source).cloned() else {
                return Ok(Step::ignored("no pack fulfillment for charge"));
            };
            let Some(meta) = fulfillment.pack_meta().cloned() else {
                return Ok(Step::ignored("fulfillment is not a pack purchase"));
            };

            let target = config.rounding.apply_ratio(
                i128::from(meta.credits_granted) * i128::from(c.amount_refunded_cents),
                i128::from(c.amount_cents),
            )?;
            let delta = target - meta.refunded_credits;
            if delta <= 0 {
                return Ok(Step::ignored("refund already applied"));
            }

            let metadata = TransactionMeta {
                refund: Some(RefundMeta {
                    charge_id: c.charge_id.clone(),
                    amount_refunded_cents: c.amount_refunded_cents,
                    original_amount_cents: c.amount_cents,
                    target_refunded_credits: target,
                }),
                ..TransactionMeta::from_source(source.clone()).pack(meta.pack.clone())
            };
            let applied = ledger_ops::deduct_credits(
                tx,
                Debit {
                    amount: delta,
                    category: Category::CreditPackRefund,
                    metadata,
                    fulfillment_id: Some(fulfillment.id),
                    at: now,
                },
                config,
            )?;

            if let Some(meta) = fulfillment.pack_meta_mut() {
                meta.refunded_credits = target;
                meta.amount_refunded_cents = c.amount_refunded_cents;
            }
            fulfillment.updated_at = now;
            tx.save_fulfillment(fulfillment)?;
            Ok(Step::Applied(vec![applied]))
        })
    }
}
