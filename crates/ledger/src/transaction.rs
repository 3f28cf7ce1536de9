//! Immutable ledger entries.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use creditforge_core::{CreditError, Entity, FulfillmentId, SourceRef, TransactionId, WalletId};

/// Why a ledger entry exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    SignupBonus,
    ReferralBonus,
    SubscriptionCredits,
    SubscriptionTrial,
    SubscriptionSignupBonus,
    SubscriptionUpgrade,
    CreditPack,
    CreditPackPurchase,
    CreditPackRefund,
    OperationCharge,
    ManualAdjustment,
    CreditAdded,
    CreditDeducted,
    Fulfillment,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::SignupBonus => "signup_bonus",
            Category::ReferralBonus => "referral_bonus",
            Category::SubscriptionCredits => "subscription_credits",
            Category::SubscriptionTrial => "subscription_trial",
            Category::SubscriptionSignupBonus => "subscription_signup_bonus",
            Category::SubscriptionUpgrade => "subscription_upgrade",
            Category::CreditPack => "credit_pack",
            Category::CreditPackPurchase => "credit_pack_purchase",
            Category::CreditPackRefund => "credit_pack_refund",
            Category::OperationCharge => "operation_charge",
            Category::ManualAdjustment => "manual_adjustment",
            Category::CreditAdded => "credit_added",
            Category::CreditDeducted => "credit_deducted",
            Category::Fulfillment => "fulfillment",
        }
    }
}

impl core::fmt::Display for Category {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What was spent, recorded on `operation_charge` entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationCharge {
    pub name: String,
    pub params: serde_json::Map<String, Value>,
    pub cost: i64,
}

/// Refund bookkeeping recorded on `credit_pack_refund` entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundMeta {
    pub charge_id: String,
    pub amount_refunded_cents: i64,
    pub original_amount_cents: i64,
    /// Cumulative credits that should be gone after this entry.
    pub target_refunded_credits: i64,
}

/// Typed metadata; serialized to the persisted blob at the store boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<OperationCharge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund: Option<RefundMeta>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl TransactionMeta {
    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn from_source(source: SourceRef) -> Self {
        Self {
            source: Some(source),
            ..Self::default()
        }
    }

    pub fn plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = Some(plan.into());
        self
    }

    pub fn pack(mut self, pack: impl Into<String>) -> Self {
        self.pack = Some(pack.into());
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// A ledger entry about to be written (the store assigns id and sequence).
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub wallet_id: WalletId,
    pub amount: i64,
    pub category: Category,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: TransactionMeta,
    pub fulfillment_id: Option<FulfillmentId>,
    pub created_at: DateTime<Utc>,
}

impl NewTransaction {
    pub fn validate(&self) -> Result<(), CreditError> {
        if self.amount == 0 {
            return Err(CreditError::invalid_argument("transaction amount must not be zero"));
        }
        if self.amount < 0 && self.expires_at.is_some() {
            return Err(CreditError::invalid_argument("debits cannot expire"));
        }
        if let Some(expires_at) = self.expires_at {
            if expires_at <= self.created_at {
                return Err(CreditError::invalid_argument(format!(
                    "expiration {expires_at} is not after {}",
                    self.created_at
                )));
            }
        }
        Ok(())
    }

    pub fn into_transaction(self, id: TransactionId, sequence: u64) -> CreditTransaction {
        CreditTransaction {
            id,
            wallet_id: self.wallet_id,
            sequence,
            amount: self.amount,
            category: self.category,
            expires_at: self.expires_at,
            metadata: self.metadata,
            fulfillment_id: self.fulfillment_id,
            created_at: self.created_at,
        }
    }
}

/// Immutable signed ledger entry: positive grants credits, negative spends them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub id: TransactionId,
    pub wallet_id: WalletId,
    /// Creation order within the store; breaks allocation ties.
    pub sequence: u64,
    pub amount: i64,
    pub category: Category,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: TransactionMeta,
    pub fulfillment_id: Option<FulfillmentId>,
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    pub fn is_grant(&self) -> bool {
        self.amount > 0
    }

    pub fn is_spend(&self) -> bool {
        self.amount < 0
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn came_from(&self, source: &SourceRef) -> bool {
        self.metadata.source.as_ref() == Some(source)
    }
}

impl Entity for CreditTransaction {
    type Id = TransactionId;

    fn id(&self) -> TransactionId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_tx(amount: i64, expires_in: Option<Duration>) -> NewTransaction {
        let now = Utc::now();
        NewTransaction {
            wallet_id: WalletId::new(),
            amount,
            category: Category::CreditAdded,
            expires_at: expires_in.map(|d| now + d),
            metadata: TransactionMeta::default(),
            fulfillment_id: None,
            created_at: now,
        }
    }

    #[test]
    fn zero_amounts_are_rejected() {
        assert!(new_tx(0, None).validate().is_err());
    }

    #[test]
    fn expirations_must_be_in_the_future() {
        assert!(new_tx(10, Some(Duration::days(1))).validate().is_ok());
        assert!(new_tx(10, Some(Duration::zero())).validate().is_err());
        assert!(new_tx(-10, Some(Duration::days(1))).validate().is_err());
    }

    #[test]
    fn expiry_is_inclusive_of_the_boundary() {
        let tx = new_tx(10, Some(Duration::days(1))).into_transaction(TransactionId::new(), 1);
        let at = tx.expires_at.unwrap();
        assert!(!tx.is_expired_at(at - Duration::seconds(1)));
        assert!(tx.is_expired_at(at));
    }

    #[test]
    fn metadata_serializes_sparse() {
        let meta = TransactionMeta::with_reason("welcome");
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json, serde_json::json!({"reason": "welcome"}));
        assert_eq!(Category::SubscriptionUpgrade.to_string(), "subscription_upgrade");
    }
}
