//! Notifications published after committed wallet mutations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use creditforge_core::{FulfillmentId, TransactionId, WalletId};
use creditforge_events::Event;

use crate::transaction::Category;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreditEvent {
    CreditsAdded {
        wallet_id: WalletId,
        transaction_id: TransactionId,
        amount: i64,
        category: Category,
        balance_before: i64,
        balance_after: i64,
        occurred_at: DateTime<Utc>,
    },
    CreditsDeducted {
        wallet_id: WalletId,
        transaction_id: TransactionId,
        amount: i64,
        category: Category,
        balance_before: i64,
        balance_after: i64,
        occurred_at: DateTime<Utc>,
    },
    /// The balance crossed from above the threshold to at-or-below it.
    LowBalanceReached {
        wallet_id: WalletId,
        balance: i64,
        threshold: i64,
        occurred_at: DateTime<Utc>,
    },
    FulfillmentProcessed {
        fulfillment_id: FulfillmentId,
        wallet_id: WalletId,
        credits: i64,
        next_fulfillment_at: Option<DateTime<Utc>>,
        occurred_at: DateTime<Utc>,
    },
}

impl CreditEvent {
    pub fn wallet_id(&self) -> WalletId {
        match self {
            CreditEvent::CreditsAdded { wallet_id, .. }
            | CreditEvent::CreditsDeducted { wallet_id, .. }
            | CreditEvent::LowBalanceReached { wallet_id, .. }
            | CreditEvent::FulfillmentProcessed { wallet_id, .. } => *wallet_id,
        }
    }
}

impl Event for CreditEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CreditEvent::CreditsAdded { .. } => "credits.wallet.credits_added",
            CreditEvent::CreditsDeducted { .. } => "credits.wallet.credits_deducted",
            CreditEvent::LowBalanceReached { .. } => "credits.wallet.low_balance_reached",
            CreditEvent::FulfillmentProcessed { .. } => "credits.fulfillment.processed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CreditEvent::CreditsAdded { occurred_at, .. }
            | CreditEvent::CreditsDeducted { occurred_at, .. }
            | CreditEvent::LowBalanceReached { occurred_at, .. }
            | CreditEvent::FulfillmentProcessed { occurred_at, .. } => *occurred_at,
        }
    }
}
