//! Cache key derivation.
//!
//! A key is the class name followed by one component per constructor
//! argument, all joined with the configured separator:
//!
//! ```text
//! Money-USD-1000      Money("USD", 1000)
//! Pair-#0-#1          Pair(Arc<..>, Arc<..>)   object ids, by reference
//! Label-\0            Label(None)
//! Quote-a\-b-c        Quote("a-b", "c")        separator escaped
//! ```
//!
//! Primitives contribute their stringified value. Object arguments contribute
//! the id their *reference* was given by the class's [`ObjectIdentityMap`], so
//! two structurally equal but distinct allocations never share a key.

use std::sync::Arc;

use crate::identity::{ObjectId, ObjectIdentityMap};

/// One key component, before rendering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPart {
    /// Stringified primitive value.
    Primitive(String),
    /// Identity of an object argument.
    Object(ObjectId),
    /// A missing value (`None`).
    Absent,
}

impl KeyPart {
    pub fn primitive(value: impl ToString) -> Self {
        Self::Primitive(value.to_string())
    }

    fn render_into(&self, sep: char, out: &mut String) {
        match self {
            KeyPart::Primitive(text) => {
                for c in text.chars() {
                    if c == '\\' || c == '#' || c == sep {
                        out.push('\\');
                    }
                    out.push(c);
                }
            }
            KeyPart::Object(id) => {
                out.push('#');
                out.push_str(&id.get().to_string());
            }
            KeyPart::Absent => out.push_str("\\0"),
        }
    }
}

/// Composite cache key: class name plus rendered components.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn compose(class: &str, sep: char, parts: &[KeyPart]) -> Self {
        let mut key = String::from(class);
        for part in parts {
            key.push(sep);
            part.render_into(sep, &mut key);
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl core::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A single constructor argument that can contribute to a cache key.
pub trait KeyArg {
    fn key_part(&self, ids: &mut ObjectIdentityMap) -> KeyPart;
}

/// A whole constructor argument list.
///
/// Implemented for tuples of [`KeyArg`]s (up to eight), for `()` (no
/// arguments) and for every single [`KeyArg`] type.
pub trait KeyArgs {
    fn key_parts(&self, ids: &mut ObjectIdentityMap, parts: &mut Vec<KeyPart>);
}

macro_rules! impl_display_key_arg {
    ($($t:ty),+ $(,)?) => {
        $(
            impl KeyArg for $t {
                fn key_part(&self, _ids: &mut ObjectIdentityMap) -> KeyPart {
                    KeyPart::primitive(self)
                }
            }

            impl KeyArgs for $t {
                fn key_parts(&self, ids: &mut ObjectIdentityMap, parts: &mut Vec<KeyPart>) {
                    parts.push(self.key_part(ids));
                }
            }
        )+
    };
}

impl_display_key_arg!(
    bool, char, str, String, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize,
);

macro_rules! impl_float_key_arg {
    ($($t:ty),+) => {
        $(
            impl KeyArg for $t {
                fn key_part(&self, _ids: &mut ObjectIdentityMap) -> KeyPart {
                    // -0.0 and 0.0 are the same value.
                    if *self == 0.0 {
                        KeyPart::primitive("0")
                    } else {
                        KeyPart::primitive(self)
                    }
                }
            }

            impl KeyArgs for $t {
                fn key_parts(&self, ids: &mut ObjectIdentityMap, parts: &mut Vec<KeyPart>) {
                    parts.push(self.key_part(ids));
                }
            }
        )+
    };
}

impl_float_key_arg!(f32, f64);

impl<T: KeyArg + ?Sized> KeyArg for &T {
    fn key_part(&self, ids: &mut ObjectIdentityMap) -> KeyPart {
        (**self).key_part(ids)
    }
}

impl<T: KeyArgs + ?Sized> KeyArgs for &T {
    fn key_parts(&self, ids: &mut ObjectIdentityMap, parts: &mut Vec<KeyPart>) {
        (**self).key_parts(ids, parts)
    }
}

impl<T: KeyArg> KeyArg for Option<T> {
    fn key_part(&self, ids: &mut ObjectIdentityMap) -> KeyPart {
        match self {
            Some(value) => value.key_part(ids),
            None => KeyPart::Absent,
        }
    }
}

impl<T: KeyArg> KeyArgs for Option<T> {
    fn key_parts(&self, ids: &mut ObjectIdentityMap, parts: &mut Vec<KeyPart>) {
        parts.push(self.key_part(ids));
    }
}

/// Shared allocations are keyed by reference identity, not by contents.
impl<T: ?Sized + Send + Sync + 'static> KeyArg for Arc<T> {
    fn key_part(&self, ids: &mut ObjectIdentityMap) -> KeyPart {
        KeyPart::Object(ids.identify_arc(self))
    }
}

impl<T: ?Sized + Send + Sync + 'static> KeyArgs for Arc<T> {
    fn key_parts(&self, ids: &mut ObjectIdentityMap, parts: &mut Vec<KeyPart>) {
        parts.push(self.key_part(ids));
    }
}

impl KeyArgs for () {
    fn key_parts(&self, _ids: &mut ObjectIdentityMap, _parts: &mut Vec<KeyPart>) {}
}

macro_rules! impl_key_args_for_tuple {
    ($($name:ident),+) => {
        impl<$($name: KeyArg),+> KeyArgs for ($($name,)+) {
            #[allow(non_snake_case)]
            fn key_parts(&self, ids: &mut ObjectIdentityMap, parts: &mut Vec<KeyPart>) {
                let ($($name,)+) = self;
                $(parts.push($name.key_part(ids));)+
            }
        }
    };
}

impl_key_args_for_tuple!(A);
impl_key_args_for_tuple!(A, B);
impl_key_args_for_tuple!(A, B, C);
impl_key_args_for_tuple!(A, B, C, D);
impl_key_args_for_tuple!(A, B, C, D, E);
impl_key_args_for_tuple!(A, B, C, D, E, F);
impl_key_args_for_tuple!(A, B, C, D, E, F, G);
impl_key_args_for_tuple!(A, B, C, D, E, F, G, H);

/// Collect the key components of `args`.
pub fn key_parts_of<A: KeyArgs + ?Sized>(args: &A, ids: &mut ObjectIdentityMap) -> Vec<KeyPart> {
    let mut parts = Vec::new();
    args.key_parts(ids, &mut parts);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_of<A: KeyArgs + ?Sized>(class: &str, args: &A, ids: &mut ObjectIdentityMap) -> String {
        CacheKey::compose(class, '-', &key_parts_of(args, ids)).into_string()
    }

    #[test]
    fn primitives_render_as_their_value() {
        let mut ids = ObjectIdentityMap::new();
        assert_eq!(key_of("Money", &("USD", 1000u64), &mut ids), "Money-USD-1000");
        assert_eq!(key_of("Flag", &(true, 'x', -3i8), &mut ids), r"Flag-true-x-\-3");
    }

    #[test]
    fn no_arguments_is_just_the_class_name() {
        let mut ids = ObjectIdentityMap::new();
        assert_eq!(key_of("Unit", &(), &mut ids), "Unit");
        assert_ne!(key_of("Unit", &(), &mut ids), key_of("Unit", &("",), &mut ids));
    }

    #[test]
    fn separator_inside_strings_cannot_collide() {
        let mut ids = ObjectIdentityMap::new();
        let left = key_of("Quote", &("a-b", "c"), &mut ids);
        let right = key_of("Quote", &("a", "b-c"), &mut ids);

        assert_eq!(left, r"Quote-a\-b-c");
        assert_ne!(left, right);
    }

    #[test]
    fn hash_prefixed_strings_do_not_look_like_objects() {
        let mut ids = ObjectIdentityMap::new();
        let obj = Arc::new(0u8);

        let as_object = key_of("Ref", &obj, &mut ids);
        let as_string = key_of("Ref", "#0", &mut ids);

        assert_eq!(as_object, "Ref-#0");
        assert_eq!(as_string, r"Ref-\#0");
    }

    #[test]
    fn none_differs_from_empty_and_from_the_marker_text() {
        let mut ids = ObjectIdentityMap::new();
        let none = key_of("Label", &None::<&str>, &mut ids);
        let empty = key_of("Label", &Some(""), &mut ids);
        let marker = key_of("Label", &Some(r"\0"), &mut ids);

        assert_eq!(none, r"Label-\0");
        assert_ne!(none, empty);
        assert_ne!(none, marker);
    }

    #[test]
    fn zero_sign_does_not_split_keys() {
        let mut ids = ObjectIdentityMap::new();
        assert_eq!(key_of("F", &0.0f64, &mut ids), key_of("F", &-0.0f64, &mut ids));
        assert_eq!(key_of("F", &1.5f32, &mut ids), "F-1.5");
    }

    #[test]
    fn object_arguments_key_by_reference() {
        let mut ids = ObjectIdentityMap::new();
        let a = Arc::new(vec![1]);
        let b = Arc::new(vec![1]);

        assert_eq!(
            key_of("Pair", &(a.clone(), a.clone()), &mut ids),
            key_of("Pair", &(Arc::clone(&a), a.clone()), &mut ids)
        );
        assert_ne!(
            key_of("Pair", &(a.clone(), 1), &mut ids),
            key_of("Pair", &(b.clone(), 1), &mut ids)
        );
    }

    #[test]
    fn custom_separator_is_escaped_instead_of_dash() {
        let mut ids = ObjectIdentityMap::new();
        let parts = key_parts_of(&("a|b", "c-d"), &mut ids);
        assert_eq!(CacheKey::compose("Q", '|', &parts).as_str(), r"Q|a\|b|c-d");
    }
}
