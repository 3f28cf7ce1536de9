//! Staged unit of work shared by every store.
//!
//! A [`StagedTx`] starts from the committed rows of one wallet and collects the
//! writes a `with_wallet_lock` closure makes. Reads see committed rows plus
//! everything staged so far. Stores persist only the tail past the committed
//! prefix, and only when the closure returned `Ok`.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use creditforge_core::{CreditError, CreditResult, FulfillmentId, SourceRef, TransactionId};
use creditforge_ledger::{Allocation, CreditTransaction, Fulfillment, NewTransaction, Wallet};

use super::LedgerTx;

/// Snapshot of one wallet plus everything staged against it.
#[derive(Debug)]
pub(crate) struct StagedTx {
    wallet: Wallet,
    transactions: Vec<CreditTransaction>,
    committed_transactions: usize,
    allocations: Vec<Allocation>,
    committed_allocations: usize,
    fulfillments: Vec<Fulfillment>,
    dirty_fulfillments: HashSet<FulfillmentId>,
    next_sequence: u64,
}

impl StagedTx {
    /// `transactions` must be ordered by sequence.
    pub(crate) fn new(
        wallet: Wallet,
        transactions: Vec<CreditTransaction>,
        allocations: Vec<Allocation>,
        fulfillments: Vec<Fulfillment>,
    ) -> Self {
        let next_sequence = transactions.last().map_or(1, |t| t.sequence + 1);
        Self {
            committed_transactions: transactions.len(),
            committed_allocations: allocations.len(),
            wallet,
            transactions,
            allocations,
            fulfillments,
            dirty_fulfillments: HashSet::new(),
            next_sequence,
        }
    }

    pub(crate) fn staged_wallet(&self) -> &Wallet {
        &self.wallet
    }

    pub(crate) fn new_transactions(&self) -> &[CreditTransaction] {
        &self.transactions[self.committed_transactions..]
    }

    pub(crate) fn new_allocations(&self) -> &[Allocation] {
        &self.allocations[self.committed_allocations..]
    }

    pub(crate) fn changed_fulfillments(&self) -> impl Iterator<Item = &Fulfillment> {
        self.fulfillments
            .iter()
            .filter(|f| self.dirty_fulfillments.contains(&f.id))
    }

    pub(crate) fn into_parts(self) -> StagedParts {
        let dirty = self.dirty_fulfillments;
        StagedParts {
            wallet: self.wallet,
            transactions: self.transactions.into_iter().skip(self.committed_transactions).collect(),
            allocations: self.allocations.into_iter().skip(self.committed_allocations).collect(),
            fulfillments: self
                .fulfillments
                .into_iter()
                .filter(|f| dirty.contains(&f.id))
                .collect(),
        }
    }

    fn transaction(&self, id: TransactionId) -> Option<&CreditTransaction> {
        self.transactions.iter().find(|t| t.id == id)
    }
}

/// The writes of a successful unit of work.
#[derive(Debug)]
pub(crate) struct StagedParts {
    pub(crate) wallet: Wallet,
    pub(crate) transactions: Vec<CreditTransaction>,
    pub(crate) allocations: Vec<Allocation>,
    pub(crate) fulfillments: Vec<Fulfillment>,
}

impl LedgerTx for StagedTx {
    fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    fn transactions(&self) -> &[CreditTransaction] {
        &self.transactions
    }

    fn allocations(&self) -> &[Allocation] {
        &self.allocations
    }

    fn insert_transaction(&mut self, new: NewTransaction) -> CreditResult<CreditTransaction> {
        if new.wallet_id != self.wallet.id {
            return Err(CreditError::invalid_argument(format!(
                "transaction targets wallet {} inside the lock of {}",
                new.wallet_id, self.wallet.id
            )));
        }
        new.validate()?;
        let tx = new.into_transaction(TransactionId::new(), self.next_sequence);
        self.next_sequence += 1;
        self.transactions.push(tx.clone());
        Ok(tx)
    }

    fn insert_allocation(&mut self, allocation: Allocation) -> CreditResult<()> {
        let source = self
            .transaction(allocation.source_id)
            .filter(|t| t.is_grant())
            .ok_or_else(|| {
                CreditError::invalid_argument(format!("allocation source {} is not a grant", allocation.source_id))
            })?;
        let spend = self
            .transaction(allocation.spend_id)
            .filter(|t| t.is_spend())
            .ok_or_else(|| {
                CreditError::invalid_argument(format!("allocation spend {} is not a debit", allocation.spend_id))
            })?;

        let drawn: i64 = self
            .allocations
            .iter()
            .filter(|a| a.source_id == allocation.source_id)
            .map(|a| a.amount)
            .sum();
        if drawn + allocation.amount > source.amount {
            return Err(CreditError::invalid_argument(format!(
                "allocation overdraws grant {} ({} of {} already drawn)",
                source.id, drawn, source.amount
            )));
        }

        let backed: i64 = self
            .allocations
            .iter()
            .filter(|a| a.spend_id == allocation.spend_id)
            .map(|a| a.amount)
            .sum();
        if backed + allocation.amount > -spend.amount {
            return Err(CreditError::invalid_argument(format!(
                "allocations exceed debit {} of {}",
                spend.id, -spend.amount
            )));
        }

        self.allocations.push(allocation);
        Ok(())
    }

    fn set_balance(&mut self, balance: i64, at: DateTime<Utc>) {
        self.wallet.balance = balance;
        self.wallet.updated_at = at;
    }

    fn fulfillment(&self, id: FulfillmentId) -> Option<&Fulfillment> {
        self.fulfillments.iter().find(|f| f.id == id)
    }

    fn fulfillment_for_source(&self, source: &SourceRef) -> Option<&Fulfillment> {
        self.fulfillments.iter().find(|f| &f.source == source)
    }

    fn save_fulfillment(&mut self, fulfillment: Fulfillment) -> CreditResult<()> {
        if fulfillment.wallet_id != self.wallet.id {
            return Err(CreditError::invalid_argument(format!(
                "fulfillment {} belongs to wallet {}",
                fulfillment.id, fulfillment.wallet_id
            )));
        }
        fulfillment.validate()?;
        if let Some(other) = self
            .fulfillments
            .iter()
            .find(|f| f.source == fulfillment.source && f.id != fulfillment.id)
        {
            return Err(CreditError::conflict(format!(
                "fulfillment {} already covers {:?} {}",
                other.id, fulfillment.source.kind, fulfillment.source.id
            )));
        }

        self.dirty_fulfillments.insert(fulfillment.id);
        match self.fulfillments.iter_mut().find(|f| f.id == fulfillment.id) {
            Some(slot) => *slot = fulfillment,
            None => self.fulfillments.push(fulfillment),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use creditforge_core::OwnerRef;
    use creditforge_ledger::{Category, TransactionMeta};

    fn entry(wallet: &Wallet, amount: i64, at: DateTime<Utc>) -> NewTransaction {
        NewTransaction {
            wallet_id: wallet.id,
            amount,
            category: Category::CreditAdded,
            expires_at: None,
            metadata: TransactionMeta::default(),
            fulfillment_id: None,
            created_at: at,
        }
    }

    #[test]
    fn only_the_staged_tail_is_reported() {
        let now = Utc::now();
        let wallet = Wallet::open(OwnerRef::new("user", "1"), now);
        let committed = entry(&wallet, 10, now).into_transaction(TransactionId::new(), 7);
        let mut staged = StagedTx::new(wallet.clone(), vec![committed], Vec::new(), Vec::new());

        let added = staged.insert_transaction(entry(&wallet, 5, now)).unwrap();
        assert_eq!(added.sequence, 8);
        assert_eq!(staged.transactions().len(), 2);
        assert_eq!(staged.new_transactions(), &[added]);
        assert!(staged.new_allocations().is_empty());
        assert_eq!(staged.changed_fulfillments().count(), 0);
    }

    #[test]
    fn entries_for_another_wallet_are_rejected() {
        let now = Utc::now();
        let wallet = Wallet::open(OwnerRef::new("user", "1"), now);
        let other = Wallet::open(OwnerRef::new("user", "2"), now);
        let mut staged = StagedTx::new(wallet, Vec::new(), Vec::new(), Vec::new());
        assert!(matches!(
            staged.insert_transaction(entry(&other, 5, now)),
            Err(CreditError::InvalidArgument(_))
        ));
    }
}
