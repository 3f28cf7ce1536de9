//! In-memory credit store for tests and development.
//!
//! Row locks are `Mutex`es in a lazily filled lock map, so exclusion is
//! process-local. Use [`super::PostgresCreditStore`] when several processes
//! share wallets.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};

use creditforge_core::{CreditError, CreditResult, Entity, FulfillmentId, OwnerRef, SourceRef, WalletId};
use creditforge_ledger::{Allocation, CreditTransaction, Fulfillment, Wallet};

use super::staged::{StagedParts, StagedTx};
use super::{CreditStore, LedgerTx};

fn poisoned(what: &str) -> CreditError {
    CreditError::storage(format!("{what} lock poisoned"))
}

/// One exclusive row lock per key, created on first use.
#[derive(Debug)]
struct LockMap<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for LockMap<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Copy> LockMap<K> {
    fn handle(&self, key: K) -> CreditResult<Arc<Mutex<()>>> {
        let mut locks = self.locks.lock().map_err(|_| poisoned("lock table"))?;
        Ok(locks.entry(key).or_default().clone())
    }

    fn forget(&self, key: K) {
        if let Ok(mut locks) = self.locks.lock() {
            locks.remove(&key);
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    wallets: HashMap<WalletId, Wallet>,
    owners: HashMap<OwnerRef, WalletId>,
    transactions: HashMap<WalletId, Vec<CreditTransaction>>,
    allocations: HashMap<WalletId, Vec<Allocation>>,
    fulfillments: HashMap<FulfillmentId, Fulfillment>,
    sources: HashMap<SourceRef, FulfillmentId>,
}

/// In-memory credit store.
///
/// Intended for tests/dev. Wallet writes are serialized by a per-wallet row
/// lock; the table lock is only held for snapshot and commit.
#[derive(Debug, Default)]
pub struct InMemoryCreditStore {
    tables: RwLock<Tables>,
    wallet_locks: LockMap<WalletId>,
    fulfillment_locks: LockMap<FulfillmentId>,
}

impl InMemoryCreditStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> CreditResult<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| poisoned("table"))
    }

    fn write(&self) -> CreditResult<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|_| poisoned("table"))
    }

    fn snapshot(&self, wallet_id: WalletId) -> CreditResult<StagedTx> {
        let tables = self.read()?;
        let wallet = tables
            .wallets
            .get(&wallet_id)
            .cloned()
            .ok_or_else(|| CreditError::not_found(format!("wallet {wallet_id}")))?;
        let transactions = tables.transactions.get(&wallet_id).cloned().unwrap_or_default();
        let allocations = tables.allocations.get(&wallet_id).cloned().unwrap_or_default();
        let fulfillments = tables
            .fulfillments
            .values()
            .filter(|f| f.wallet_id == wallet_id)
            .cloned()
            .collect();

        Ok(StagedTx::new(wallet, transactions, allocations, fulfillments))
    }

    fn commit(&self, staged: StagedTx) -> CreditResult<()> {
        let mut tables = self.write()?;
        let wallet_id = staged.staged_wallet().id;
        if !tables.wallets.contains_key(&wallet_id) {
            return Err(CreditError::not_found(format!("wallet {wallet_id}")));
        }

        // Check every constraint before touching anything.
        for f in staged.changed_fulfillments() {
            if let Some(existing) = tables.sources.get(&f.source) {
                if *existing != f.id {
                    return Err(CreditError::conflict(format!(
                        "a fulfillment already exists for {:?} {}",
                        f.source.kind, f.source.id
                    )));
                }
            }
        }

        let StagedParts {
            wallet,
            transactions,
            allocations,
            fulfillments,
        } = staged.into_parts();

        tables.transactions.entry(wallet_id).or_default().extend(transactions);
        tables.allocations.entry(wallet_id).or_default().extend(allocations);
        for f in fulfillments {
            tables.sources.insert(f.source.clone(), f.id);
            tables.fulfillments.insert(f.id(), f);
        }
        tables.wallets.insert(wallet_id, wallet);
        Ok(())
    }
}

impl CreditStore for InMemoryCreditStore {
    fn find_or_create_wallet(&self, owner: &OwnerRef, at: DateTime<Utc>) -> CreditResult<Wallet> {
        if let Some(wallet) = self.wallet_for_owner(owner)? {
            return Ok(wallet);
        }

        let mut tables = self.write()?;
        // Re-check under the write lock; another caller may have won the race.
        if let Some(id) = tables.owners.get(owner).copied() {
            if let Some(wallet) = tables.wallets.get(&id) {
                return Ok(wallet.clone());
            }
        }
        let wallet = Wallet::open(owner.clone(), at);
        tables.owners.insert(owner.clone(), wallet.id);
        tables.wallets.insert(wallet.id, wallet.clone());
        Ok(wallet)
    }

    fn wallet(&self, id: WalletId) -> CreditResult<Wallet> {
        self.read()?
            .wallets
            .get(&id)
            .cloned()
            .ok_or_else(|| CreditError::not_found(format!("wallet {id}")))
    }

    fn wallet_for_owner(&self, owner: &OwnerRef) -> CreditResult<Option<Wallet>> {
        let tables = self.read()?;
        Ok(tables
            .owners
            .get(owner)
            .and_then(|id| tables.wallets.get(id))
            .cloned())
    }

    fn delete_wallet(&self, id: WalletId) -> CreditResult<()> {
        let handle = self.wallet_locks.handle(id)?;
        let _row = handle.lock().map_err(|_| poisoned("wallet"))?;

        let mut tables = self.write()?;
        let wallet = tables
            .wallets
            .remove(&id)
            .ok_or_else(|| CreditError::not_found(format!("wallet {id}")))?;
        tables.owners.remove(&wallet.owner);
        tables.transactions.remove(&id);
        tables.allocations.remove(&id);
        let removed: Vec<Fulfillment> = tables
            .fulfillments
            .values()
            .filter(|f| f.wallet_id == id)
            .cloned()
            .collect();
        for f in removed {
            tables.fulfillments.remove(&f.id);
            tables.sources.remove(&f.source);
            self.fulfillment_locks.forget(f.id);
        }
        drop(tables);
        self.wallet_locks.forget(id);
        Ok(())
    }

    fn transactions(&self, wallet_id: WalletId) -> CreditResult<Vec<CreditTransaction>> {
        Ok(self.read()?.transactions.get(&wallet_id).cloned().unwrap_or_default())
    }

    fn allocations(&self, wallet_id: WalletId) -> CreditResult<Vec<Allocation>> {
        Ok(self.read()?.allocations.get(&wallet_id).cloned().unwrap_or_default())
    }

    fn fulfillment(&self, id: FulfillmentId) -> CreditResult<Option<Fulfillment>> {
        Ok(self.read()?.fulfillments.get(&id).cloned())
    }

    fn fulfillment_for_source(&self, source: &SourceRef) -> CreditResult<Option<Fulfillment>> {
        let tables = self.read()?;
        Ok(tables
            .sources
            .get(source)
            .and_then(|id| tables.fulfillments.get(id))
            .cloned())
    }

    fn due_fulfillments(&self, now: DateTime<Utc>) -> CreditResult<Vec<Fulfillment>> {
        let tables = self.read()?;
        let mut due: Vec<Fulfillment> = tables
            .fulfillments
            .values()
            .filter(|f| f.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|f| (f.next_fulfillment_at, f.created_at));
        Ok(due)
    }

    fn with_wallet_lock<R, F>(&self, wallet_id: WalletId, work: F) -> CreditResult<R>
    where
        F: FnOnce(&mut dyn LedgerTx) -> CreditResult<R>,
    {
        let handle = self.wallet_locks.handle(wallet_id)?;
        let _row = handle.lock().map_err(|_| poisoned("wallet"))?;

        let mut staged = self.snapshot(wallet_id)?;
        let out = work(&mut staged)?;
        self.commit(staged)?;
        Ok(out)
    }

    fn with_fulfillment_lock<R, F>(&self, id: FulfillmentId, work: F) -> CreditResult<R>
    where
        F: FnOnce() -> CreditResult<R>,
    {
        let handle = self.fulfillment_locks.handle(id)?;
        let _row = handle.lock().map_err(|_| poisoned("fulfillment"))?;
        work()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use creditforge_ledger::{Category, NewTransaction, TransactionMeta};

    fn grant(wallet_id: WalletId, amount: i64, at: DateTime<Utc>) -> NewTransaction {
        NewTransaction {
            wallet_id,
            amount,
            category: Category::CreditAdded,
            expires_at: None,
            metadata: TransactionMeta::default(),
            fulfillment_id: None,
            created_at: at,
        }
    }

    #[test]
    fn wallets_are_created_once_per_owner() {
        let store = InMemoryCreditStore::new();
        let owner = OwnerRef::new("user", "42");
        let now = Utc::now();

        let a = store.find_or_create_wallet(&owner, now).unwrap();
        let b = store.find_or_create_wallet(&owner, now).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(store.wallet_for_owner(&owner).unwrap().map(|w| w.id), Some(a.id));
    }

    #[test]
    fn staged_writes_are_discarded_on_error() {
        let store = InMemoryCreditStore::new();
        let now = Utc::now();
        let wallet = store.find_or_create_wallet(&OwnerRef::new("user", "1"), now).unwrap();

        let result: CreditResult<()> = store.with_wallet_lock(wallet.id, |tx| {
            tx.insert_transaction(grant(wallet.id, 100, now))?;
            tx.set_balance(100, now);
            Err(CreditError::invalid_operation("abort"))
        });
        assert!(result.is_err());
        assert!(store.transactions(wallet.id).unwrap().is_empty());
        assert_eq!(store.wallet(wallet.id).unwrap().balance, 0);
    }

    #[test]
    fn sequences_increase_across_commits() {
        let store = InMemoryCreditStore::new();
        let now = Utc::now();
        let wallet = store.find_or_create_wallet(&OwnerRef::new("user", "1"), now).unwrap();

        for amount in [10, 20, 30] {
            store
                .with_wallet_lock(wallet.id, |tx| tx.insert_transaction(grant(wallet.id, amount, now)))
                .unwrap();
        }
        let seqs: Vec<u64> = store.transactions(wallet.id).unwrap().iter().map(|t| t.sequence).collect();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn allocations_cannot_overdraw_a_grant() {
        let store = InMemoryCreditStore::new();
        let now = Utc::now();
        let wallet = store.find_or_create_wallet(&OwnerRef::new("user", "1"), now).unwrap();

        let result = store.with_wallet_lock(wallet.id, |tx| {
            let source = tx.insert_transaction(grant(wallet.id, 10, now))?;
            let spend = tx.insert_transaction(grant(wallet.id, -20, now))?;
            tx.insert_allocation(Allocation::new(spend.id, source.id, 10, 10)?)?;
            tx.insert_allocation(Allocation::new(spend.id, source.id, 5, 5)?)
        });
        assert!(matches!(result, Err(CreditError::InvalidArgument(_))));
        assert!(store.allocations(wallet.id).unwrap().is_empty());
    }

    #[test]
    fn deleting_a_wallet_cascades() {
        let store = InMemoryCreditStore::new();
        let now = Utc::now();
        let owner = OwnerRef::new("user", "1");
        let wallet = store.find_or_create_wallet(&owner, now).unwrap();
        store
            .with_wallet_lock(wallet.id, |tx| tx.insert_transaction(grant(wallet.id, 10, now)))
            .unwrap();

        store.delete_wallet(wallet.id).unwrap();
        assert!(matches!(store.wallet(wallet.id), Err(CreditError::NotFound(_))));
        assert!(store.transactions(wallet.id).unwrap().is_empty());
        assert!(store.wallet_for_owner(&owner).unwrap().is_none());
    }
}
