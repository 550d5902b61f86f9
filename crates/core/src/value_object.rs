//! Value object trait: equality by value, not identity.
//!
//! Value objects have **no identity**; they are defined entirely by their
//! attribute values. `Money`, `BuildVolume` and `PrintSettings` are the value
//! objects of this workspace.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by value. To "modify" one, build
/// a new one.
///
/// ```ignore
/// let a = BuildVolume::new(220.0, 220.0, 250.0);
/// let b = BuildVolume::new(220.0, 220.0, 250.0);
/// assert_eq!(a, b); // equal by value, not identity
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
