//! `valueref-core` — interned value objects.
//!
//! Decorating a type turns construction into a cache lookup: equal arguments
//! yield the identical shared instance, so comparing handles by identity is
//! the same as comparing the values they hold.
//!
//! Building blocks, bottom-up:
//! - [`key`]: cache key derivation from constructor arguments.
//! - [`identity`]: reference-identity ids for object arguments.
//! - [`interner`]: the per-class pool of weakly held instances.
//! - [`constructor`]: constructor values and the `is_constructor` predicate.
//! - [`value_object`]: the decorator and decorated classes.

pub mod config;
pub mod constructor;
pub mod error;
pub mod identity;
pub mod interner;
pub mod key;
pub mod value_object;

pub use config::{InternerConfig, ReclamationPolicy};
pub use constructor::{Constructor, is_constructor, short_type_name};
pub use error::{InvalidTargetError, ValueError, ValueResult};
pub use identity::{ObjectId, ObjectIdentityMap};
pub use interner::{Interned, Interner, PoolStats};
pub use key::{CacheKey, KeyArg, KeyArgs, KeyPart};
pub use value_object::{ValueClass, ValueObject, ValueObjectDecorator, value_object};
