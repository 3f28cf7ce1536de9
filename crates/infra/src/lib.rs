//! Infrastructure layer: persistence port, wallet and lifecycle services, scheduling.
//!
//! The domain crates are pure; everything that locks, persists, logs or
//! spawns threads lives here.

pub mod engine;
pub mod jobs;
pub mod ledger_ops;
pub mod lifecycle;
pub mod notifier;
pub mod processor;
pub mod store;
pub mod wallet_service;


pub use engine::CreditEngine;
pub use jobs::{FulfillmentJob, FulfillmentScheduler, JobReport, SchedulerConfig, SchedulerHandle};
pub use ledger_ops::Applied;
pub use lifecycle::{
    ChargeEvent, ChargeLifecycle, ChargeMetadata, ChargeSnapshot, LifecycleOutcome, SubscriptionEvent,
    SubscriptionLifecycle, SubscriptionSnapshot, SubscriptionStatus,
};
pub use notifier::{LowBalanceAlert, LowBalanceHook, Notifier};
pub use processor::{FulfillmentProcessor, ProcessOutcome, ProcessReport};
pub use store::{AnyCreditStore, CreditStore, InMemoryCreditStore, LedgerTx, PostgresCreditStore};
pub use wallet_service::{AddCredits, DeductCredits, GiveCredits, ScheduleGrant, SpendCredits, WalletService};
