use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use creditforge_core::{Entity, OwnerRef, WalletId};

/// One credit account per owner.
///
/// `balance` is a denormalized cache of [`crate::LedgerView::balance`]; the
/// ledger is the ground truth and the cache is rewritten on every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub owner: OwnerRef,
    pub balance: i64,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn open(owner: OwnerRef, at: DateTime<Utc>) -> Self {
        Self {
            id: WalletId::new(),
            owner,
            balance: 0,
            metadata: serde_json::Map::new(),
            created_at: at,
            updated_at: at,
        }
    }
}

impl Entity for Wallet {
    type Id = WalletId;

    fn id(&self) -> WalletId {
        self.id
    }
}
