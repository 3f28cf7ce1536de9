//! Billing lifecycle handlers.
//!
//! The payment processor is an external event source; these handlers turn its
//! subscription and charge events into idempotent grants, deductions and
//! fulfillment-row updates. Events that do not concern credits are ignored
//! with a reason rather than rejected.
//!
//! ## Locking
//!
//! Each event runs in one `with_wallet_lock` scope: the idempotency check,
//! the ledger writes and the fulfillment update commit together or not at
//! all. Notifications go out only after that commit, through `announce`.

mod charges;
mod subscriptions;

pub use charges::{ChargeEvent, ChargeLifecycle, ChargeMetadata, ChargeSnapshot, PURCHASE_TYPE_CREDIT_PACK};
pub use subscriptions::{SubscriptionEvent, SubscriptionLifecycle, SubscriptionSnapshot, SubscriptionStatus};

use creditforge_events::EventBus;
use creditforge_ledger::{CreditEvent, CreditTransaction};

use crate::ledger_ops::Applied;
use crate::notifier::Notifier;

/// Result of handling one billing event.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleOutcome {
    /// The event was acted on; ledger entries written, if any.
    Applied(Vec<CreditTransaction>),
    /// The event did not concern credits or was already handled.
    Ignored(String),
}

impl LifecycleOutcome {
    pub fn is_ignored(&self) -> bool {
        matches!(self, LifecycleOutcome::Ignored(_))
    }

    pub fn transactions(&self) -> &[CreditTransaction] {
        match self {
            LifecycleOutcome::Applied(transactions) => transactions,
            LifecycleOutcome::Ignored(_) => &[],
        }
    }
}

/// Decision taken inside the wallet lock, announced after commit.
pub(crate) enum Step {
    Applied(Vec<Applied>),
    Ignored(String),
}

impl Step {
    pub(crate) fn ignored(reason: impl Into<String>) -> Self {
        Step::Ignored(reason.into())
    }

    pub(crate) fn unchanged() -> Self {
        Step::Applied(Vec::new())
    }
}

pub(crate) fn announce<B>(notifier: &Notifier<B>, step: Step) -> LifecycleOutcome
where
    B: EventBus<CreditEvent>,
{
    match step {
        Step::Applied(applied) => LifecycleOutcome::Applied(
            applied
                .into_iter()
                .map(|a| {
                    if a.transaction.is_grant() {
                        notifier.credits_added(&a);
                    } else {
                        notifier.credits_deducted(&a);
                    }
                    a.transaction
                })
                .collect(),
        ),
        Step::Ignored(reason) => LifecycleOutcome::Ignored(reason),
    }
}
