//! Allocation index: which grants a spend consumed, and how much of each.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use creditforge_core::{AllocationId, CreditError, CreditResult, Entity, TransactionId};

/// Join record between one spend and one grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocationId,
    pub spend_id: TransactionId,
    pub source_id: TransactionId,
    pub amount: i64,
}

impl Allocation {
    /// Validates `0 < amount <= source_remaining` before building the record.
    pub fn new(
        spend_id: TransactionId,
        source_id: TransactionId,
        amount: i64,
        source_remaining: i64,
    ) -> CreditResult<Self> {
        if amount <= 0 {
            return Err(CreditError::invalid_argument("allocation amount must be positive"));
        }
        if amount > source_remaining {
            return Err(CreditError::invalid_argument(format!(
                "allocation of {amount} exceeds remaining {source_remaining} on {source_id}"
            )));
        }
        Ok(Self {
            id: AllocationId::new(),
            spend_id,
            source_id,
            amount,
        })
    }
}

impl Entity for Allocation {
    type Id = AllocationId;

    fn id(&self) -> AllocationId {
        self.id
    }
}

/// An unexpired grant with credits left to draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantBucket {
    pub transaction_id: TransactionId,
    pub sequence: u64,
    pub expires_at: Option<DateTime<Utc>>,
    pub remaining: i64,
}

impl GrantBucket {
    /// Soonest expiry first, non-expiring last, then creation order.
    fn drain_order(&self) -> (bool, Option<DateTime<Utc>>, u64) {
        (self.expires_at.is_none(), self.expires_at, self.sequence)
    }
}

/// One planned draw against a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Draw {
    pub source_id: TransactionId,
    pub amount: i64,
}

/// Result of planning a deduction over the available grants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationPlan {
    pub draws: Vec<Draw>,
    /// Part of the deduction no grant could back.
    pub unbacked: i64,
}

impl AllocationPlan {
    pub fn allocated(&self) -> i64 {
        self.draws.iter().map(|d| d.amount).sum()
    }
}

/// Greedy FIFO plan for deducting `amount` from `buckets`.
///
/// Buckets with nothing remaining are skipped. Whatever cannot be covered is
/// reported as `unbacked`; the caller decides whether that is acceptable.
pub fn plan_allocations(buckets: &[GrantBucket], amount: i64) -> CreditResult<AllocationPlan> {
    if amount <= 0 {
        return Err(CreditError::invalid_argument("deduction amount must be positive"));
    }

    let mut ordered: Vec<&GrantBucket> = buckets.iter().filter(|b| b.remaining > 0).collect();
    ordered.sort_by_key(|b| b.drain_order());

    let mut outstanding = amount;
    let mut draws = Vec::new();
    for bucket in ordered {
        if outstanding == 0 {
            break;
        }
        let take = outstanding.min(bucket.remaining);
        draws.push(Draw {
            source_id: bucket.transaction_id,
            amount: take,
        });
        outstanding -= take;
    }

    Ok(AllocationPlan {
        draws,
        unbacked: outstanding,
    })
}
