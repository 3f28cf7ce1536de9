//! Credit ledger domain (append-only transactions, FIFO allocation, fulfillments).
//!
//! Pure domain logic only: no IO, no locking, no persistence concerns.

pub mod allocation;
pub mod balance;
pub mod events;
pub mod fulfillment;
pub mod transaction;
pub mod wallet;

pub use allocation::{Allocation, AllocationPlan, Draw, GrantBucket, plan_allocations};
pub use balance::LedgerView;
pub use events::CreditEvent;
pub use fulfillment::{
    Fulfillment, FulfillmentMeta, FulfillmentState, FulfillmentType, PackFulfillmentMeta,
    STOP_DOWNGRADE_TO_NON_CREDIT_PLAN, STOP_SUBSCRIPTION_CANCELED, SubscriptionFulfillmentMeta,
};
pub use transaction::{
    Category, CreditTransaction, NewTransaction, OperationCharge, RefundMeta, TransactionMeta,
};
pub use wallet::Wallet;
