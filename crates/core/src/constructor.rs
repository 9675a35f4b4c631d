//! Constructor values and the predicate that recognises them.

use std::any::Any;

/// A named constructor: how to build a `T` from an argument list `A`.
pub struct Constructor<T, A> {
    name: &'static str,
    build: fn(A) -> T,
}

impl<T, A> Constructor<T, A> {
    pub const fn new(name: &'static str, build: fn(A) -> T) -> Self {
        Self { name, build }
    }

    /// Constructor named after `T`.
    pub fn of(build: fn(A) -> T) -> Self {
        Self::new(short_type_name::<T>(), build)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn call(&self, args: A) -> T {
        (self.build)(args)
    }
}

impl<T, A> Clone for Constructor<T, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, A> Copy for Constructor<T, A> {}

impl<T, A> core::fmt::Debug for Constructor<T, A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Constructor").field("name", &self.name).finish()
    }
}

/// Whether `value` can build `T` from `A`: true for a [`Constructor<T, A>`]
/// and for a plain `fn(A) -> T`, false for anything else.
///
/// A type whose own constructor is private still qualifies as long as some
/// function building it is handed over.
pub fn is_constructor<T: 'static, A: 'static>(value: &dyn Any) -> bool {
    value.is::<Constructor<T, A>>() || value.is::<fn(A) -> T>()
}

/// Extract the constructor from a value accepted by [`is_constructor`].
pub(crate) fn as_constructor<T: 'static, A: 'static>(value: &dyn Any) -> Option<Constructor<T, A>> {
    if let Some(ctor) = value.downcast_ref::<Constructor<T, A>>() {
        return Some(*ctor);
    }
    value
        .downcast_ref::<fn(A) -> T>()
        .map(|build| Constructor::of(*build))
}

/// `type_name` without the module path: `my_crate::money::Money` -> `Money`.
///
/// Generic arguments are kept as reported by the compiler.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let head_end = full.find('<').unwrap_or(full.len());
    let start = full[..head_end].rfind("::").map_or(0, |i| i + 2);
    &full[start..]
}
