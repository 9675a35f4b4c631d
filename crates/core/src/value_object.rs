//! Value objects: equality by value, made observable as equality by identity.
//!
//! Value objects are domain objects with **no identity** of their own; they
//! are defined entirely by their attribute values. The decorator in this
//! module turns a type into a *value class*: constructing it twice with
//! equal arguments yields the same shared instance, so identity comparison
//! stands in for value comparison.
//!
//! ## Usage Pattern
//!
//! ```
//! use std::sync::LazyLock;
//! use valueref_core::{Interned, ValueClass, ValueObject, value_object};
//!
//! #[derive(Debug)]
//! struct Money {
//!     currency: &'static str,
//!     amount: u64,
//! }
//!
//! impl ValueObject for Money {
//!     type Args = (&'static str, u64);
//!
//!     fn construct((currency, amount): Self::Args) -> Self {
//!         Money { currency, amount }
//!     }
//! }
//!
//! static MONEY: LazyLock<ValueClass<Money, (&'static str, u64)>> =
//!     LazyLock::new(|| value_object().decorate::<Money>());
//!
//! let a = MONEY.construct(("USD", 1000));
//! assert!(Interned::ptr_eq(&a, &MONEY.construct(("USD", 1000))));
//! assert!(!Interned::ptr_eq(&a, &MONEY.construct(("EUR", 1000))));
//! ```
//!
//! ## Caveats
//!
//! - Object arguments (`Arc`, [`Interned`]) are keyed by reference: two
//!   structurally equal but distinct allocations give distinct instances.
//! - Sharing lasts only while some handle is alive. Once every handle to an
//!   instance is dropped, the next construction builds a fresh one.

use std::any::Any;

use crate::config::InternerConfig;
use crate::constructor::{Constructor, as_constructor, short_type_name};
use crate::error::{InvalidTargetError, ValueResult};
use crate::interner::{Interned, Interner, PoolStats};
use crate::key::{CacheKey, KeyArgs};

/// A type that can be decorated without runtime checks.
///
/// Implementations should be immutable once constructed: instances are
/// shared between every caller that asked for the same arguments.
pub trait ValueObject: Sized + 'static {
    /// Constructor argument list.
    type Args: KeyArgs;

    fn construct(args: Self::Args) -> Self;

    /// Name used as the first key component.
    fn class_name() -> &'static str {
        short_type_name::<Self>()
    }
}

/// The class transformer returned by [`value_object`].
#[derive(Debug, Clone, Default)]
pub struct ValueObjectDecorator {
    config: InternerConfig,
}

/// Zero-argument factory for the decorator, using default configuration.
pub fn value_object() -> ValueObjectDecorator {
    ValueObjectDecorator::new()
}

impl ValueObjectDecorator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: InternerConfig) -> ValueResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &InternerConfig {
        &self.config
    }

    /// Decorate a [`ValueObject`] type.
    pub fn decorate<T: ValueObject>(&self) -> ValueClass<T, T::Args> {
        self.wrap(Constructor::new(T::class_name(), T::construct))
    }

    /// Decorate an untyped target.
    ///
    /// The target must pass [`is_constructor`](crate::is_constructor) for
    /// `T` and `A`; anything else is rejected before a pool is created.
    pub fn apply<T: 'static, A: 'static>(
        &self,
        target: &dyn Any,
    ) -> Result<ValueClass<T, A>, InvalidTargetError> {
        match as_constructor::<T, A>(target) {
            Some(ctor) => Ok(self.wrap(ctor)),
            None => {
                let err =
                    InvalidTargetError::new(std::any::type_name::<T>(), std::any::type_name::<A>());
                tracing::warn!("{err}");
                Err(err)
            }
        }
    }

    fn wrap<T, A>(&self, constructor: Constructor<T, A>) -> ValueClass<T, A> {
        tracing::debug!("decorating {} as a value class", constructor.name());
        ValueClass {
            constructor,
            interner: Interner::from_parts(constructor.name().to_string(), self.config.clone()),
        }
    }
}

/// A decorated class: the wrapped constructor plus its private pool.
///
/// Each decorated class owns its own pool and identity map, so two classes
/// never hand out each other's instances even for identical arguments.
pub struct ValueClass<T, A> {
    constructor: Constructor<T, A>,
    interner: Interner<T>,
}

impl<T, A: KeyArgs> ValueClass<T, A> {
    /// Shared instance for `args`, built with the wrapped constructor on a
    /// miss.
    pub fn construct(&self, args: A) -> Interned<T> {
        let constructor = self.constructor;
        self.interner
            .get_or_create(args, move |args| constructor.call(args))
    }

    /// Live instance for `args`, if any.
    pub fn get(&self, args: &A) -> Option<Interned<T>> {
        self.interner.get(args)
    }

    /// See [`Interner::key_for`].
    pub fn key_for(&self, args: &A) -> Option<CacheKey> {
        self.interner.key_for(args)
    }
}

impl<T, A> ValueClass<T, A> {
    pub fn name(&self) -> &'static str {
        self.constructor.name()
    }

    pub fn constructor(&self) -> Constructor<T, A> {
        self.constructor
    }

    /// The underlying pool, for constructions that bypass the stored
    /// constructor (see [`Interner::get_or_create`]).
    pub fn interner(&self) -> &Interner<T> {
        &self.interner
    }

    pub fn len(&self) -> usize {
        self.interner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interner.is_empty()
    }

    pub fn purge(&self) -> usize {
        self.interner.purge()
    }

    pub fn clear(&self) {
        self.interner.clear()
    }

    pub fn stats(&self) -> PoolStats {
        self.interner.stats()
    }
}

impl<T, A> core::fmt::Debug for ValueClass<T, A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ValueClass")
            .field("name", &self.constructor.name())
            .field("interner", &self.interner)
            .finish()
    }
}
