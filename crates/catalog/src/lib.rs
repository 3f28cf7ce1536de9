//! Static catalog of subscription plans, credit packs and billable operations.
//!
//! The catalog is declared once at startup through [`CatalogBuilder`] and is
//! read-only afterwards; lookups are plain keyed reads.

pub mod builder;
pub mod catalog;
pub mod operation;
pub mod pack;
pub mod plan;

pub use builder::{CatalogBuilder, OperationDef, PackDef, PlanDef};
pub use catalog::Catalog;
pub use operation::{Cost, Operation, OperationParams, Validation};
pub use pack::CreditPack;
pub use plan::SubscriptionPlan;
