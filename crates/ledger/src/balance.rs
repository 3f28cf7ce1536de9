//! Balance math over a wallet's transactions and allocations.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use creditforge_core::TransactionId;

use crate::allocation::{Allocation, GrantBucket};
use crate::transaction::CreditTransaction;

/// Read-only view over one wallet's ledger.
#[derive(Debug)]
pub struct LedgerView<'a> {
    transactions: &'a [CreditTransaction],
    drawn_from: HashMap<TransactionId, i64>,
    backed: HashMap<TransactionId, i64>,
}

impl<'a> LedgerView<'a> {
    pub fn new(transactions: &'a [CreditTransaction], allocations: &[Allocation]) -> Self {
        let mut drawn_from = HashMap::new();
        let mut backed = HashMap::new();
        for a in allocations {
            *drawn_from.entry(a.source_id).or_insert(0) += a.amount;
            *backed.entry(a.spend_id).or_insert(0) += a.amount;
        }
        Self {
            transactions,
            drawn_from,
            backed,
        }
    }

    /// Sum of allocations drawn against `grant`.
    pub fn allocated_from(&self, grant: TransactionId) -> i64 {
        self.drawn_from.get(&grant).copied().unwrap_or(0)
    }

    /// Credits still available on a grant (zero for spends and unknown ids).
    pub fn remaining(&self, id: TransactionId) -> i64 {
        self.transactions
            .iter()
            .find(|t| t.id == id && t.is_grant())
            .map(|t| (t.amount - self.allocated_from(t.id)).max(0))
            .unwrap_or(0)
    }

    /// Part of spends not covered by any grant (only possible with negative balances).
    pub fn unbacked_debits(&self) -> i64 {
        self.transactions
            .iter()
            .filter(|t| t.is_spend())
            .map(|t| (-t.amount - self.backed.get(&t.id).copied().unwrap_or(0)).max(0))
            .sum()
    }

    /// Unexpired grants with credits left, in no particular order.
    pub fn grant_buckets(&self, now: DateTime<Utc>) -> Vec<GrantBucket> {
        self.transactions
            .iter()
            .filter(|t| t.is_grant() && !t.is_expired_at(now))
            .filter_map(|t| {
                let remaining = t.amount - self.allocated_from(t.id);
                (remaining > 0).then(|| GrantBucket {
                    transaction_id: t.id,
                    sequence: t.sequence,
                    expires_at: t.expires_at,
                    remaining,
                })
            })
            .collect()
    }

    /// Σ max(0, amount − allocated) over unexpired grants, minus unbacked debits.
    ///
    /// Floored at zero unless `allow_negative` is set.
    pub fn balance(&self, now: DateTime<Utc>, allow_negative: bool) -> i64 {
        let available: i64 = self
            .transactions
            .iter()
            .filter(|t| t.is_grant() && !t.is_expired_at(now))
            .map(|t| (t.amount - self.allocated_from(t.id)).max(0))
            .sum();
        let balance = available - self.unbacked_debits();
        if allow_negative { balance } else { balance.max(0) }
    }
}
