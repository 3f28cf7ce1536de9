use chrono::{DateTime, Utc};

/// A domain-agnostic notification.
///
/// Events are immutable facts describing a committed change, and are versioned
/// so subscribers can evolve independently.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "credits.wallet.credits_added").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the change happened (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
