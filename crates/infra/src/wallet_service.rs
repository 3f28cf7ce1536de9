//! Wallet operations: balance, grants, deductions and operation spends.
//!
//! Every mutation runs inside [`CreditStore::with_wallet_lock`], so the ledger
//! row, its allocations and the balance cache commit together. Notifications
//! go out only after the commit.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use creditforge_catalog::OperationParams;
use creditforge_core::{
    CreditError, CreditResult, FulfillmentId, FulfillmentPeriod, OwnerRef, SourceRef, TransactionId, WalletId,
};
use creditforge_events::EventBus;
use creditforge_ledger::{
    Allocation, Category, CreditEvent, CreditTransaction, Fulfillment, LedgerView, NewTransaction,
    OperationCharge, TransactionMeta, Wallet,
};

use crate::engine::CreditEngine;
use crate::ledger_ops::{self, Debit};
use crate::store::CreditStore;

/// Grant request.
#[derive(Debug, Clone)]
pub struct AddCredits {
    pub amount: i64,
    pub category: Category,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: TransactionMeta,
    pub fulfillment_id: Option<FulfillmentId>,
    pub occurred_at: DateTime<Utc>,
}

impl AddCredits {
    pub fn new(amount: i64, category: Category, occurred_at: DateTime<Utc>) -> Self {
        Self {
            amount,
            category,
            expires_at: None,
            metadata: TransactionMeta::default(),
            fulfillment_id: None,
            occurred_at,
        }
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn with_metadata(mut self, metadata: TransactionMeta) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Deduction request.
#[derive(Debug, Clone)]
pub struct DeductCredits {
    pub amount: i64,
    pub category: Category,
    pub metadata: TransactionMeta,
    pub occurred_at: DateTime<Utc>,
}

impl DeductCredits {
    pub fn new(amount: i64, category: Category, occurred_at: DateTime<Utc>) -> Self {
        Self {
            amount,
            category,
            metadata: TransactionMeta::default(),
            occurred_at,
        }
    }

    pub fn with_metadata(mut self, metadata: TransactionMeta) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Spend on a catalog operation.
#[derive(Debug, Clone)]
pub struct SpendCredits {
    pub operation: String,
    pub params: OperationParams,
    pub occurred_at: DateTime<Utc>,
}

impl SpendCredits {
    pub fn new(operation: impl Into<String>, params: OperationParams, occurred_at: DateTime<Utc>) -> Self {
        Self {
            operation: operation.into(),
            params,
            occurred_at,
        }
    }
}

/// Administrative grant; the category is inferred from `reason`.
#[derive(Debug, Clone)]
pub struct GiveCredits {
    pub amount: i64,
    pub reason: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

impl GiveCredits {
    pub fn new(amount: i64, reason: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        Self {
            amount,
            reason: reason.into(),
            expires_at: None,
            occurred_at,
        }
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }
}

/// Recurring administrative grant, granted by the fulfillment processor.
#[derive(Debug, Clone)]
pub struct ScheduleGrant {
    /// Caller-chosen key; one schedule per key.
    pub key: String,
    pub credits: i64,
    pub period: FulfillmentPeriod,
    pub starts_at: DateTime<Utc>,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

fn category_for_reason(reason: &str) -> Category {
    match reason.trim().to_ascii_lowercase().as_str() {
        "signup" | "signup_bonus" => Category::SignupBonus,
        "referral" | "referral_bonus" => Category::ReferralBonus,
        _ => Category::ManualAdjustment,
    }
}

pub struct WalletService<'e, S, B> {
    engine: &'e CreditEngine<S, B>,
}

impl<'e, S, B> WalletService<'e, S, B>
where
    S: CreditStore,
    B: EventBus<CreditEvent>,
{
    pub(crate) fn new(engine: &'e CreditEngine<S, B>) -> Self {
        Self { engine }
    }

    /// The owner's wallet, created on first access.
    pub fn wallet_for_owner(&self, owner: &OwnerRef, now: DateTime<Utc>) -> CreditResult<Wallet> {
        self.engine.store().find_or_create_wallet(owner, now)
    }

    /// Balance computed from the ledger (not the cache).
    pub fn balance(&self, wallet_id: WalletId, now: DateTime<Utc>) -> CreditResult<i64> {
        let store = self.engine.store();
        store.wallet(wallet_id)?;
        let transactions = store.transactions(wallet_id)?;
        let allocations = store.allocations(wallet_id)?;
        Ok(LedgerView::new(&transactions, &allocations).balance(now, self.engine.config().allow_negative_balance))
    }

    pub fn add_credits(&self, wallet_id: WalletId, request: AddCredits) -> CreditResult<CreditTransaction> {
        let config = self.engine.config();
        let applied = self.engine.store().with_wallet_lock(wallet_id, |tx| {
            ledger_ops::add_credits(
                tx,
                NewTransaction {
                    wallet_id,
                    amount: request.amount,
                    category: request.category,
                    expires_at: request.expires_at,
                    metadata: request.metadata,
                    fulfillment_id: request.fulfillment_id,
                    created_at: request.occurred_at,
                },
                config,
            )
        })?;

        info!(
            wallet_id = %wallet_id,
            amount = applied.transaction.amount,
            category = %applied.transaction.category,
            balance = applied.balance_after,
            "credits added"
        );
        self.engine.notifier().credits_added(&applied);
        Ok(applied.transaction)
    }

    pub fn deduct_credits(&self, wallet_id: WalletId, request: DeductCredits) -> CreditResult<CreditTransaction> {
        let config = self.engine.config();
        let applied = self.engine.store().with_wallet_lock(wallet_id, |tx| {
            ledger_ops::deduct_credits(
                tx,
                Debit {
                    amount: request.amount,
                    category: request.category,
                    metadata: request.metadata,
                    fulfillment_id: None,
                    at: request.occurred_at,
                },
                config,
            )
        })?;

        info!(
            wallet_id = %wallet_id,
            amount = request.amount,
            category = %applied.transaction.category,
            balance = applied.balance_after,
            "credits deducted"
        );
        self.engine.notifier().credits_deducted(&applied);
        Ok(applied.transaction)
    }

    /// Cost of `operation` for `params`, validated and rounded.
    pub fn estimate_cost(&self, operation: &str, params: &OperationParams) -> CreditResult<i64> {
        self.engine
            .catalog()
            .require_operation(operation)?
            .cost_for(params, self.engine.config().rounding)
    }

    pub fn has_enough_credits_to(
        &self,
        wallet_id: WalletId,
        operation: &str,
        params: &OperationParams,
        now: DateTime<Utc>,
    ) -> CreditResult<bool> {
        let cost = self.estimate_cost(operation, params)?;
        Ok(self.engine.config().allow_negative_balance || self.balance(wallet_id, now)? >= cost)
    }

    pub fn spend_credits_on(&self, wallet_id: WalletId, request: SpendCredits) -> CreditResult<CreditTransaction> {
        self.spend_credits_on_with(wallet_id, request, || Ok::<_, CreditError>(()))
            .map(|(transaction, ())| transaction)
    }

    /// Spend on `request.operation`, charging only if `work` succeeds.
    ///
    /// `work` runs inside the wallet lock after the sufficiency check and
    /// before the deduction; an error from it leaves the wallet untouched.
    pub fn spend_credits_on_with<T, E, F>(
        &self,
        wallet_id: WalletId,
        request: SpendCredits,
        work: F,
    ) -> Result<(CreditTransaction, T), E>
    where
        E: From<CreditError>,
        F: FnOnce() -> Result<T, E>,
    {
        let config = self.engine.config();
        let operation = self.engine.catalog().require_operation(&request.operation)?;
        let cost = operation.cost_for(&request.params, config.rounding)?;
        if cost == 0 {
            return Err(CreditError::invalid_operation(format!("{}: computed a zero cost", operation.name)).into());
        }

        let at = request.occurred_at;
        let metadata = TransactionMeta {
            operation: Some(OperationCharge {
                name: operation.name.clone(),
                params: request.params,
                cost,
            }),
            ..TransactionMeta::default()
        };

        let mut work_error: Option<E> = None;
        let result = self.engine.store().with_wallet_lock(wallet_id, |tx| {
            let available = ledger_ops::balance_of(tx, at, config);
            if !config.allow_negative_balance && cost > available {
                return Err(CreditError::insufficient(cost, available.max(0)));
            }
            let output = match work() {
                Ok(output) => output,
                Err(e) => {
                    work_error = Some(e);
                    return Err(CreditError::invalid_operation(format!(
                        "{}: work failed, nothing charged",
                        operation.name
                    )));
                }
            };
            let applied = ledger_ops::deduct_credits(
                tx,
                Debit {
                    amount: cost,
                    category: Category::OperationCharge,
                    metadata,
                    fulfillment_id: None,
                    at,
                },
                config,
            )?;
            Ok((applied, output))
        });

        if let Some(e) = work_error {
            debug!(wallet_id = %wallet_id, operation = %operation.name, "spend aborted by work failure");
            return Err(e);
        }
        let (applied, output) = result?;

        info!(
            wallet_id = %wallet_id,
            operation = %operation.name,
            cost,
            balance = applied.balance_after,
            "credits spent"
        );
        self.engine.notifier().credits_deducted(&applied);
        Ok((applied.transaction, output))
    }

    pub fn give_credits(&self, wallet_id: WalletId, request: GiveCredits) -> CreditResult<CreditTransaction> {
        if request.amount <= 0 {
            return Err(CreditError::invalid_argument(format!(
                "credit amount must be positive, got {}",
                request.amount
            )));
        }
        if let Some(expires_at) = request.expires_at {
            if expires_at <= request.occurred_at {
                return Err(CreditError::invalid_argument(format!(
                    "expiration {expires_at} is in the past"
                )));
            }
        }

        let category = category_for_reason(&request.reason);
        self.add_credits(
            wallet_id,
            AddCredits {
                amount: request.amount,
                category,
                expires_at: request.expires_at,
                metadata: TransactionMeta::with_reason(request.reason),
                fulfillment_id: None,
                occurred_at: request.occurred_at,
            },
        )
    }

    /// Register a recurring grant; the first slot is due at `starts_at`.
    pub fn schedule_grant(&self, wallet_id: WalletId, request: ScheduleGrant) -> CreditResult<Fulfillment> {
        request
            .period
            .ensure_at_least(self.engine.config().minimum_fulfillment_period)?;
        if request.starts_at < request.occurred_at {
            return Err(CreditError::invalid_argument(format!(
                "grant schedule cannot start in the past ({})",
                request.starts_at
            )));
        }
        let fulfillment = self.engine.store().with_wallet_lock(wallet_id, |tx| {
            let fulfillment = Fulfillment::manual(
                wallet_id,
                SourceRef::manual(request.key.clone()),
                request.period,
                request.credits,
                request.starts_at,
                request.note.clone(),
                request.occurred_at,
            )?;
            tx.save_fulfillment(fulfillment.clone())?;
            Ok(fulfillment)
        })?;

        info!(
            wallet_id = %wallet_id,
            fulfillment_id = %fulfillment.id,
            credits = request.credits,
            period = %request.period,
            "recurring grant scheduled"
        );
        Ok(fulfillment)
    }

    /// Ledger entries, newest first.
    pub fn history(&self, wallet_id: WalletId) -> CreditResult<Vec<CreditTransaction>> {
        let mut transactions = self.engine.store().transactions(wallet_id)?;
        transactions.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        Ok(transactions)
    }

    /// Grants a spend drew from.
    pub fn allocations_for(&self, wallet_id: WalletId, spend_id: TransactionId) -> CreditResult<Vec<Allocation>> {
        Ok(self
            .engine
            .store()
            .allocations(wallet_id)?
            .into_iter()
            .filter(|a| a.spend_id == spend_id)
            .collect())
    }

    /// Credits still available on a grant; zero for spends.
    pub fn remaining_amount(&self, wallet_id: WalletId, transaction_id: TransactionId) -> CreditResult<i64> {
        let store = self.engine.store();
        let transactions = store.transactions(wallet_id)?;
        if !transactions.iter().any(|t| t.id == transaction_id) {
            return Err(CreditError::not_found(format!("transaction {transaction_id}")));
        }
        let allocations = store.allocations(wallet_id)?;
        Ok(LedgerView::new(&transactions, &allocations).remaining(transaction_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_map_to_categories() {
        assert_eq!(category_for_reason("signup"), Category::SignupBonus);
        assert_eq!(category_for_reason(" Referral "), Category::ReferralBonus);
        assert_eq!(category_for_reason("admin"), Category::ManualAdjustment);
        assert_eq!(category_for_reason("goodwill after outage"), Category::ManualAdjustment);
    }
}
