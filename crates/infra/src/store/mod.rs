//! Persistence port for wallets, ledger entries, allocations and fulfillments.
//!
//! ## Unit of work
//!
//! Every balance-affecting write goes through [`CreditStore::with_wallet_lock`]:
//! the wallet row is locked exclusively, the closure reads and stages writes
//! through a [`LedgerTx`], and the staged writes are applied only if the
//! closure returns `Ok`. Lock scope and commit scope coincide, so
//! "insert entry + insert allocations + update balance cache" is atomic.
//! Sequences are assigned per wallet while the lock is held.
//!
//! ## Lock order
//!
//! Fulfillment before wallet. The processor nests `with_wallet_lock` inside
//! `with_fulfillment_lock`; nothing takes them the other way round. Wallets
//! are independent; no cross-wallet or global lock is taken.
//!
//! ## Thread safety
//!
//! Stores are `Send + Sync` and shared behind `Arc`. The port is synchronous;
//! async-backed stores block on their own runtime and must not be called from
//! inside an async task.
//!
//! ## Error mapping
//!
//! | Condition | CreditError |
//! |-----------|-------------|
//! | Missing wallet or fulfillment | `NotFound` |
//! | Second fulfillment for the same source, lost creation race | `Conflict` |
//! | Allocation overdraws a grant or overbacks a debit | `InvalidArgument` |
//! | Lock poisoning, driver and connection failures | `Storage` |
//!
//! ## Implementations
//!
//! - [`InMemoryCreditStore`]: process-local, for tests and single-process use.
//! - [`PostgresCreditStore`]: sqlx-backed, shared between processes.

mod in_memory;
mod postgres;
mod staged;

pub use in_memory::InMemoryCreditStore;
pub use postgres::{DATABASE_URL_ENV, PostgresCreditStore, SCHEMA};

use std::sync::Arc;

use chrono::{DateTime, Utc};

use creditforge_core::{CreditResult, FulfillmentId, OwnerRef, SourceRef, WalletId};
use creditforge_ledger::{Allocation, CreditTransaction, Fulfillment, NewTransaction, Wallet};

/// Reads and staged writes inside one locked wallet.
///
/// Reads observe the committed state plus everything staged so far.
pub trait LedgerTx {
    /// The locked wallet row.
    fn wallet(&self) -> &Wallet;

    /// All entries of the wallet, ordered by sequence.
    fn transactions(&self) -> &[CreditTransaction];

    /// All allocations between entries of the wallet.
    fn allocations(&self) -> &[Allocation];

    /// Stage a new ledger entry; the store assigns id and sequence.
    fn insert_transaction(&mut self, new: NewTransaction) -> CreditResult<CreditTransaction>;

    /// Stage an allocation; rejected if it overdraws the grant or overbacks the spend.
    fn insert_allocation(&mut self, allocation: Allocation) -> CreditResult<()>;

    /// Stage the recomputed balance cache.
    fn set_balance(&mut self, balance: i64, at: DateTime<Utc>);

    fn fulfillment(&self, id: FulfillmentId) -> Option<&Fulfillment>;

    fn fulfillment_for_source(&self, source: &SourceRef) -> Option<&Fulfillment>;

    /// Stage an insert or update of a fulfillment belonging to this wallet.
    fn save_fulfillment(&mut self, fulfillment: Fulfillment) -> CreditResult<()>;
}

/// Storage abstraction over wallets, entries, allocations and fulfillments.
pub trait CreditStore: Send + Sync {
    /// Lazily create the owner's wallet on first access.
    fn find_or_create_wallet(&self, owner: &OwnerRef, at: DateTime<Utc>) -> CreditResult<Wallet>;

    /// `NotFound` when the wallet does not exist.
    fn wallet(&self, id: WalletId) -> CreditResult<Wallet>;

    fn wallet_for_owner(&self, owner: &OwnerRef) -> CreditResult<Option<Wallet>>;

    /// Delete a wallet and cascade to its entries, allocations and fulfillments.
    fn delete_wallet(&self, id: WalletId) -> CreditResult<()>;

    /// Entries of a wallet ordered by sequence.
    fn transactions(&self, wallet_id: WalletId) -> CreditResult<Vec<CreditTransaction>>;

    fn allocations(&self, wallet_id: WalletId) -> CreditResult<Vec<Allocation>>;

    fn fulfillment(&self, id: FulfillmentId) -> CreditResult<Option<Fulfillment>>;

    fn fulfillment_for_source(&self, source: &SourceRef) -> CreditResult<Option<Fulfillment>>;

    /// Fulfillments with `is_due(now)`, soonest slot first.
    fn due_fulfillments(&self, now: DateTime<Utc>) -> CreditResult<Vec<Fulfillment>>;

    /// Run `work` with the wallet row locked; commit its staged writes on `Ok`.
    fn with_wallet_lock<R, F>(&self, wallet_id: WalletId, work: F) -> CreditResult<R>
    where
        F: FnOnce(&mut dyn LedgerTx) -> CreditResult<R>;

    /// Run `work` holding the fulfillment's lock; no other caller can hold it concurrently.
    fn with_fulfillment_lock<R, F>(&self, id: FulfillmentId, work: F) -> CreditResult<R>
    where
        F: FnOnce() -> CreditResult<R>;
}

impl<S> CreditStore for Arc<S>
where
    S: CreditStore + ?Sized,
{
    fn find_or_create_wallet(&self, owner: &OwnerRef, at: DateTime<Utc>) -> CreditResult<Wallet> {
        (**self).find_or_create_wallet(owner, at)
    }

    fn wallet(&self, id: WalletId) -> CreditResult<Wallet> {
        (**self).wallet(id)
    }

    fn wallet_for_owner(&self, owner: &OwnerRef) -> CreditResult<Option<Wallet>> {
        (**self).wallet_for_owner(owner)
    }

    fn delete_wallet(&self, id: WalletId) -> CreditResult<()> {
        (**self).delete_wallet(id)
    }

    fn transactions(&self, wallet_id: WalletId) -> CreditResult<Vec<CreditTransaction>> {
        (**self).transactions(wallet_id)
    }

    fn allocations(&self, wallet_id: WalletId) -> CreditResult<Vec<Allocation>> {
        (**self).allocations(wallet_id)
    }

    fn fulfillment(&self, id: FulfillmentId) -> CreditResult<Option<Fulfillment>> {
        (**self).fulfillment(id)
    }

    fn fulfillment_for_source(&self, source: &SourceRef) -> CreditResult<Option<Fulfillment>> {
        (**self).fulfillment_for_source(source)
    }

    fn due_fulfillments(&self, now: DateTime<Utc>) -> CreditResult<Vec<Fulfillment>> {
        (**self).due_fulfillments(now)
    }

    fn with_wallet_lock<R, F>(&self, wallet_id: WalletId, work: F) -> CreditResult<R>
    where
        F: FnOnce(&mut dyn LedgerTx) -> CreditResult<R>,
    {
        (**self).with_wallet_lock(wallet_id, work)
    }

    fn with_fulfillment_lock<R, F>(&self, id: FulfillmentId, work: F) -> CreditResult<R>
    where
        F: FnOnce() -> CreditResult<R>,
    {
        (**self).with_fulfillment_lock(id, work)
    }
}

/// Store chosen at startup: Postgres when a database URL is configured.
#[derive(Debug, Clone)]
pub enum AnyCreditStore {
    InMemory(Arc<InMemoryCreditStore>),
    Postgres(PostgresCreditStore),
}

impl AnyCreditStore {
    /// Read `CREDITFORGE_DATABASE_URL`; fall back to memory when it is unset.
    pub fn from_env() -> CreditResult<Self> {
        let url = std::env::var(DATABASE_URL_ENV).ok();
        Self::from_database_url(url.as_deref())
    }

    pub fn from_database_url(url: Option<&str>) -> CreditResult<Self> {
        match url.map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => {
                let store = PostgresCreditStore::connect(url, 10)?;
                store.ensure_schema()?;
                tracing::info!("using postgres credit store");
                Ok(Self::Postgres(store))
            }
            None => {
                tracing::warn!("{DATABASE_URL_ENV} not set, using the in-memory credit store");
                Ok(Self::InMemory(Arc::new(InMemoryCreditStore::new())))
            }
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Postgres(_))
    }
}

macro_rules! dispatch {
    ($self:ident, $store:ident => $call:expr) => {
        match $self {
            AnyCreditStore::InMemory($store) => $call,
            AnyCreditStore::Postgres($store) => $call,
        }
    };
}

impl CreditStore for AnyCreditStore {
    fn find_or_create_wallet(&self, owner: &OwnerRef, at: DateTime<Utc>) -> CreditResult<Wallet> {
        dispatch!(self, s => s.find_or_create_wallet(owner, at))
    }

    fn wallet(&self, id: WalletId) -> CreditResult<Wallet> {
        dispatch!(self, s => s.wallet(id))
    }

    fn wallet_for_owner(&self, owner: &OwnerRef) -> CreditResult<Option<Wallet>> {
        dispatch!(self, s => s.wallet_for_owner(owner))
    }

    fn delete_wallet(&self, id: WalletId) -> CreditResult<()> {
        dispatch!(self, s => s.delete_wallet(id))
    }

    fn transactions(&self, wallet_id: WalletId) -> CreditResult<Vec<CreditTransaction>> {
        dispatch!(self, s => s.transactions(wallet_id))
    }

    fn allocations(&self, wallet_id: WalletId) -> CreditResult<Vec<Allocation>> {
        dispatch!(self, s => s.allocations(wallet_id))
    }

    fn fulfillment(&self, id: FulfillmentId) -> CreditResult<Option<Fulfillment>> {
        dispatch!(self, s => s.fulfillment(id))
    }

    fn fulfillment_for_source(&self, source: &SourceRef) -> CreditResult<Option<Fulfillment>> {
        dispatch!(self, s => s.fulfillment_for_source(source))
    }

    fn due_fulfillments(&self, now: DateTime<Utc>) -> CreditResult<Vec<Fulfillment>> {
        dispatch!(self, s => s.due_fulfillments(now))
    }

    fn with_wallet_lock<R, F>(&self, wallet_id: WalletId, work: F) -> CreditResult<R>
    where
        F: FnOnce(&mut dyn LedgerTx) -> CreditResult<R>,
    {
        dispatch!(self, s => s.with_wallet_lock(wallet_id, work))
    }

    fn with_fulfillment_lock<R, F>(&self, id: FulfillmentId, work: F) -> CreditResult<R>
    where
        F: FnOnce() -> CreditResult<R>,
    {
        dispatch!(self, s => s.with_fulfillment_lock(id, work))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn without_a_database_url_the_store_stays_in_memory() {
        for url in [None, Some(""), Some("   ")] {
            let store = AnyCreditStore::from_database_url(url).unwrap();
            assert!(!store.is_persistent());
        }
    }

    #[test]
    fn the_selected_store_serves_the_port() {
        let store = AnyCreditStore::from_database_url(None).unwrap();
        let owner = OwnerRef::new("user", "42");
        let wallet = store.find_or_create_wallet(&owner, Utc::now()).unwrap();
        assert_eq!(store.wallet_for_owner(&owner).unwrap(), Some(wallet.clone()));
        store.delete_wallet(wallet.id).unwrap();
        assert!(store.wallet_for_owner(&owner).unwrap().is_none());
    }
}
