//! Value object trait: equality by value, not identity.
//!
//! Value objects are domain objects that have **no identity** - they are defined entirely
//! by their attribute values. Two value objects with the same values are considered equal.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. To "modify" one,
/// build a new one.
///
/// In this domain the canonical value object is the query snapshot recorded on a
/// disk/query association: a copy of the query's purpose and size taken when the
/// association is made, which never follows later changes to the query itself.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct QuerySnapshot {
///     purpose: String,
///     size: i64,
/// }
///
/// impl ValueObject for QuerySnapshot {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
