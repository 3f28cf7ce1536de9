//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Wallets, ledger entries and fulfillment records are entities; the store
/// indexes them by this identifier.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> Self::Id;
}
