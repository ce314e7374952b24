//! Conversions between backend-native values and [`TaggedValue`].
//!
//! [`tree`] covers the key/value tree store, which has no list type and needs
//! the array-vs-object heuristic. [`typemap`] covers the document store's
//! explicit type-tag wire format. Both are lossy only for native values the
//! codec cannot classify; those are logged and become null instead of
//! failing the conversion.
//!
//! [`TaggedValue`]: crate::value::TaggedValue

pub mod tree;
pub mod typemap;
