//! Balance-affecting writes inside an open wallet lock.
//!
//! Callers hold the lock via [`CreditStore::with_wallet_lock`] and publish
//! notifications only after the closure committed.
//!
//! [`CreditStore::with_wallet_lock`]: crate::store::CreditStore::with_wallet_lock

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use creditforge_core::{CreditError, CreditResult, EngineConfig, FulfillmentId, WalletId};
use creditforge_ledger::{
    Allocation, Category, CreditTransaction, LedgerView, NewTransaction, TransactionMeta, plan_allocations,
};

use crate::store::LedgerTx;

/// A committed-on-success mutation and the balance around it.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub transaction: CreditTransaction,
    pub balance_before: i64,
    pub balance_after: i64,
}

/// A deduction request inside the lock.
#[derive(Debug, Clone)]
pub(crate) struct Debit {
    pub amount: i64,
    pub category: Category,
    pub metadata: TransactionMeta,
    pub fulfillment_id: Option<FulfillmentId>,
    pub at: DateTime<Utc>,
}

pub(crate) fn balance_of(tx: &dyn LedgerTx, now: DateTime<Utc>, config: &EngineConfig) -> i64 {
    LedgerView::new(tx.transactions(), tx.allocations()).balance(now, config.allow_negative_balance)
}

/// Insert a grant and refresh the balance cache.
pub(crate) fn add_credits(
    tx: &mut dyn LedgerTx,
    new: NewTransaction,
    config: &EngineConfig,
) -> CreditResult<Applied> {
    if new.amount <= 0 {
        return Err(CreditError::invalid_argument(format!(
            "credit amount must be positive, got {}",
            new.amount
        )));
    }
    let now = new.created_at;
    let balance_before = balance_of(tx, now, config);

    let transaction = tx.insert_transaction(new)?;

    let balance_after = balance_of(tx, now, config);
    tx.set_balance(balance_after, now);
    Ok(Applied {
        transaction,
        balance_before,
        balance_after,
    })
}

/// Insert a debit, allocate it FIFO over unexpired grants, refresh the cache.
pub(crate) fn deduct_credits(
    tx: &mut dyn LedgerTx,
    debit: Debit,
    config: &EngineConfig,
) -> CreditResult<Applied> {
    if debit.amount <= 0 {
        return Err(CreditError::invalid_argument(format!(
            "deduction amount must be positive, got {}",
            debit.amount
        )));
    }
    let now = debit.at;
    let wallet_id: WalletId = tx.wallet().id;

    let (balance_before, plan, remaining) = {
        let view = LedgerView::new(tx.transactions(), tx.allocations());
        let balance_before = view.balance(now, config.allow_negative_balance);
        if !config.allow_negative_balance && debit.amount > balance_before {
            return Err(CreditError::insufficient(debit.amount, balance_before.max(0)));
        }
        let buckets = view.grant_buckets(now);
        let plan = plan_allocations(&buckets, debit.amount)?;
        let remaining: HashMap<_, _> = buckets
            .iter()
            .map(|b| (b.transaction_id, b.remaining))
            .collect();
        (balance_before, plan, remaining)
    };
    if plan.unbacked > 0 && !config.allow_negative_balance {
        return Err(CreditError::insufficient(debit.amount, plan.allocated()));
    }

    let spend = tx.insert_transaction(NewTransaction {
        wallet_id,
        amount: -debit.amount,
        category: debit.category,
        expires_at: None,
        metadata: debit.metadata,
        fulfillment_id: debit.fulfillment_id,
        created_at: now,
    })?;

    for draw in &plan.draws {
        let source_remaining = remaining.get(&draw.source_id).copied().unwrap_or(0);
        tx.insert_allocation(Allocation::new(spend.id, draw.source_id, draw.amount, source_remaining)?)?;
    }

    let balance_after = balance_of(tx, now, config);
    tx.set_balance(balance_after, now);
    Ok(Applied {
        transaction: spend,
        balance_before,
        balance_after,
    })
}
