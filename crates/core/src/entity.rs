//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Printers are entities: they are mutated in place by the registry and have
/// no event history of their own.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
