//! Post-commit notification plumbing for the credit engine.
//!
//! Wallet mutations, fulfillment runs and low-balance crossings are reported
//! as [`Event`]s once their ledger writes have committed. An [`EventBus`]
//! fans them out to listeners (alerting, analytics, cache invalidation),
//! each of which may narrow what it receives with an [`EventFilter`].
//!
//! The ledger stays the source of truth: a lost or duplicated notification
//! never changes a balance.

pub mod bus;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, EventFilter, Subscription};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
