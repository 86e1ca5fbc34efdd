//! Entity trait: a stored row identified by its primary key.

/// A row whose identity is its key, independent of its other (mutable) fields.
pub trait Entity {
    /// Primary key type; displayed in constraint messages.
    type Id: Copy + Eq + Ord + core::hash::Hash + core::fmt::Debug + core::fmt::Display;

    fn id(&self) -> Self::Id;
}
