//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Implemented by every persisted row type so storage can key tables generically.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> Self::Id;

    /// Soft-deleted rows stay stored but are invisible to every guard and recomputation.
    fn is_deleted(&self) -> bool {
        false
    }
}
