//! Notification bus contract.
//!
//! ## Delivery
//!
//! Publishers call [`EventBus::publish`] only after the ledger write that the
//! event describes has committed. A failed publish is logged by the caller and
//! never rolls credits back. Delivery is best-effort fan-out: each matching
//! subscription receives its own copy, in publish order per publisher.
//! Listeners must tolerate duplicates and gaps, and re-read the wallet when
//! they need an authoritative balance.
//!
//! ## Filtering
//!
//! A subscription created with [`EventBus::subscribe_to`] only receives events
//! whose [`Event::event_type`] is in its [`EventFilter`]. A low-balance mailer
//! listening for `credits.wallet.low_balance_reached` never queues the far
//! more frequent spend notifications.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use crate::event::Event;

/// Which event types a subscription wants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    types: Option<BTreeSet<&'static str>>,
}

impl EventFilter {
    /// Everything published on the bus.
    pub fn all() -> Self {
        Self::default()
    }

    /// Only the listed event types.
    pub fn only<I>(types: I) -> Self
    where
        I: IntoIterator<Item = &'static str>,
    {
        Self {
            types: Some(types.into_iter().collect()),
        }
    }

    pub fn accepts<E: Event>(&self, event: &E) -> bool {
        self.types
            .as_ref()
            .is_none_or(|types| types.contains(event.event_type()))
    }
}

/// Receiving end of a bus subscription; consume from a single thread.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next event arrives or the bus is dropped.
    pub fn recv(&self) -> Result<M, RecvError> {
        self.receiver.recv()
    }

    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything queued so far, oldest first.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Fan-out of committed-change notifications.
pub trait EventBus<M: Event>: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Deliver `event` to every matching subscription; returns how many received it.
    fn publish(&self, event: M) -> Result<usize, Self::Error>;

    fn subscribe_to(&self, filter: EventFilter) -> Subscription<M>;

    fn subscribe(&self) -> Subscription<M> {
        self.subscribe_to(EventFilter::all())
    }
}

impl<M, B> EventBus<M> for Arc<B>
where
    M: Event,
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, event: M) -> Result<usize, Self::Error> {
        (**self).publish(event)
    }

    fn subscribe_to(&self, filter: EventFilter) -> Subscription<M> {
        (**self).subscribe_to(filter)
    }
}
