//! Process-local notification bus over `mpsc` channels.

use std::sync::{Mutex, mpsc};

use thiserror::Error;

use crate::bus::{EventBus, EventFilter, Subscription};
use crate::event::Event;

#[derive(Debug, Error)]
pub enum InMemoryBusError {
    #[error("subscriber registry poisoned by a panicking publisher")]
    Poisoned,
}

struct Subscriber<M> {
    filter: EventFilter,
    sender: mpsc::Sender<M>,
}

/// In-memory bus for a single process.
///
/// Subscriptions that were dropped are pruned on the next matching publish.
pub struct InMemoryEventBus<M> {
    subscribers: Mutex<Vec<Subscriber<M>>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered subscriptions, including dropped ones not yet pruned.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<M> std::fmt::Debug for InMemoryEventBus<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl<M: Event> EventBus<M> for InMemoryEventBus<M> {
    type Error = InMemoryBusError;

    fn publish(&self, event: M) -> Result<usize, Self::Error> {
        let mut subscribers = self.subscribers.lock().map_err(|_| InMemoryBusError::Poisoned)?;
        let mut delivered = 0;
        subscribers.retain(|sub| {
            if !sub.filter.accepts(&event) {
                return true;
            }
            let alive = sub.sender.send(event.clone()).is_ok();
            delivered += usize::from(alive);
            alive
        });
        Ok(delivered)
    }

    fn subscribe_to(&self, filter: EventFilter) -> Subscription<M> {
        let (sender, receiver) = mpsc::channel();
        // A poisoned registry yields a subscription that never receives.
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(Subscriber { filter, sender });
        }
        Subscription::new(receiver)
    }
}
