use serde::{Deserialize, Serialize};

/// A one-time credit purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditPack {
    pub id: String,
    pub name: String,
    pub credits: i64,
    pub bonus_credits: i64,
    pub price_cents: i64,
}

impl CreditPack {
    /// Base plus bonus credits.
    pub fn total_credits(&self) -> i64 {
        self.credits + self.bonus_credits
    }
}
