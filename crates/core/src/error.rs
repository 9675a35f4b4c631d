//! Error model for value-object interning.

use thiserror::Error;

/// Result type used across the crate.
pub type ValueResult<T> = Result<T, ValueError>;

/// The decorator was applied to something that is not a constructor.
///
/// Raised synchronously at decoration time, before any instance exists.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error(
    "value object decorator can only be applied to classes: expected `Constructor<{target}, {args}>` or `fn({args}) -> {target}`"
)]
pub struct InvalidTargetError {
    target: &'static str,
    args: &'static str,
}

impl InvalidTargetError {
    pub fn new(target: &'static str, args: &'static str) -> Self {
        Self { target, args }
    }

    /// Type name of the instances the rejected target was expected to build.
    pub fn target(&self) -> &'static str {
        self.target
    }

    /// Type name of the expected constructor argument list.
    pub fn args(&self) -> &'static str {
        self.args
    }
}

/// Crate-level error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// The decorator target failed the constructor predicate.
    #[error(transparent)]
    InvalidTarget(#[from] InvalidTargetError),

    /// Interner configuration could not be parsed or failed validation.
    #[error("invalid interner configuration: {0}")]
    InvalidConfig(String),
}

impl ValueError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
