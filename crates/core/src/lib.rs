//! `creditforge-core` — shared building blocks for the credit engine.
//!
//! This crate contains **pure** primitives (no infrastructure concerns): typed
//! identifiers, the error taxonomy, engine configuration and period arithmetic.

pub mod config;
pub mod entity;
pub mod error;
pub mod id;
pub mod period;
pub mod rounding;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use entity::Entity;
pub use error::{CreditError, CreditResult};
pub use id::{AllocationId, FulfillmentId, OwnerRef, SourceKind, SourceRef, TransactionId, WalletId};
pub use period::{FulfillmentPeriod, PeriodUnit};
pub use rounding::RoundingStrategy;
