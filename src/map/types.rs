use crate::common::Handle;

/// A key or value as presented to the map.
///
/// Plain values are boxed: the map allocates a store object it owns to hold
/// the serialized value, and destroys that box when the entry releases it.
/// Managed references point at objects whose lifetime belongs to the caller;
/// the map records the handle and never destroys the object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stored<T> {
    Value(T),
    /// The referenced object must deserialize as the map's key or value type.
    Managed(Handle),
}

impl<T> From<T> for Stored<T> {
    fn from(value: T) -> Self {
        Stored::Value(value)
    }
}
