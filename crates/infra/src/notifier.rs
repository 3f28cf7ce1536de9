//! Post-commit notifications: bus publication and the low-balance hook.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use creditforge_core::{EngineConfig, WalletId};
use creditforge_events::{Event, EventBus};
use creditforge_ledger::{CreditEvent, Fulfillment};

use crate::ledger_ops::Applied;

/// Payload handed to the low-balance hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LowBalanceAlert {
    pub wallet_id: WalletId,
    pub balance: i64,
    pub threshold: i64,
    pub occurred_at: DateTime<Utc>,
}

pub type LowBalanceHook = Arc<dyn Fn(&LowBalanceAlert) + Send + Sync>;

/// Publishes [`CreditEvent`]s after commit. Publish failures are logged, never propagated.
pub struct Notifier<B> {
    bus: B,
    config: Arc<EngineConfig>,
    low_balance_hook: Option<LowBalanceHook>,
}

impl<B> fmt::Debug for Notifier<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("low_balance_threshold", &self.config.low_balance_threshold)
            .field("has_hook", &self.low_balance_hook.is_some())
            .finish()
    }
}

impl<B> Notifier<B>
where
    B: EventBus<CreditEvent>,
{
    pub fn new(bus: B, config: Arc<EngineConfig>) -> Self {
        Self {
            bus,
            config,
            low_balance_hook: None,
        }
    }

    pub fn with_low_balance_hook(mut self, hook: LowBalanceHook) -> Self {
        self.low_balance_hook = Some(hook);
        self
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn credits_added(&self, applied: &Applied) {
        let tx = &applied.transaction;
        self.publish(CreditEvent::CreditsAdded {
            wallet_id: tx.wallet_id,
            transaction_id: tx.id,
            amount: tx.amount,
            category: tx.category,
            balance_before: applied.balance_before,
            balance_after: applied.balance_after,
            occurred_at: tx.created_at,
        });
        self.check_low_balance(applied);
    }

    pub fn credits_deducted(&self, applied: &Applied) {
        let tx = &applied.transaction;
        self.publish(CreditEvent::CreditsDeducted {
            wallet_id: tx.wallet_id,
            transaction_id: tx.id,
            amount: -tx.amount,
            category: tx.category,
            balance_before: applied.balance_before,
            balance_after: applied.balance_after,
            occurred_at: tx.created_at,
        });
        self.check_low_balance(applied);
    }

    pub fn fulfillment_processed(&self, fulfillment: &Fulfillment, credits: i64, at: DateTime<Utc>) {
        self.publish(CreditEvent::FulfillmentProcessed {
            fulfillment_id: fulfillment.id,
            wallet_id: fulfillment.wallet_id,
            credits,
            next_fulfillment_at: fulfillment.next_fulfillment_at,
            occurred_at: at,
        });
    }

    /// Fires only on the transition into low balance, not while already below.
    fn check_low_balance(&self, applied: &Applied) {
        let Some(threshold) = self.config.low_balance_threshold else {
            return;
        };
        if !(applied.balance_before > threshold && applied.balance_after <= threshold) {
            return;
        }

        let alert = LowBalanceAlert {
            wallet_id: applied.transaction.wallet_id,
            balance: applied.balance_after,
            threshold,
            occurred_at: applied.transaction.created_at,
        };
        self.publish(CreditEvent::LowBalanceReached {
            wallet_id: alert.wallet_id,
            balance: alert.balance,
            threshold,
            occurred_at: alert.occurred_at,
        });
        if let Some(hook) = &self.low_balance_hook {
            hook(&alert);
        }
    }

    fn publish(&self, event: CreditEvent) {
        let event_type = event.event_type();
        let wallet_id = event.wallet_id();
        match self.bus.publish(event) {
            Ok(delivered) => debug!(event_type, wallet_id = %wallet_id, delivered, "published credit event"),
            Err(e) => warn!(event_type, wallet_id = %wallet_id, error = %e, "failed to publish credit event"),
        }
    }
}
