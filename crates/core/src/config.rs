//! Interner configuration.
//!
//! Defaults match the common case (`-` separator, entries released as soon as
//! the last handle drops). Values can come from code, JSON, or the process
//! environment.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ValueError, ValueResult};

/// Environment variable holding the key separator (a single character).
pub const SEPARATOR_ENV: &str = "VALUEREF_SEPARATOR";

/// Environment variable holding the reclamation policy (`on_drop` | `manual`).
pub const RECLAMATION_ENV: &str = "VALUEREF_RECLAMATION";

/// How pool entries are released once their instance is gone.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReclamationPolicy {
    /// Remove the entry when the last handle to the instance is dropped.
    #[default]
    OnDrop,
    /// Leave dead entries in place until the same key is constructed again or
    /// `purge`/`clear` is called.
    Manual,
}

impl FromStr for ReclamationPolicy {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on_drop" | "on-drop" | "ondrop" => Ok(Self::OnDrop),
            "manual" => Ok(Self::Manual),
            other => Err(ValueError::invalid_config(format!(
                "unknown reclamation policy `{other}` (expected `on_drop` or `manual`)"
            ))),
        }
    }
}

/// Per-class interner settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InternerConfig {
    /// Character placed between the class name and each key component.
    pub separator: char,
    pub reclamation: ReclamationPolicy,
}

impl Default for InternerConfig {
    fn default() -> Self {
        Self {
            separator: '-',
            reclamation: ReclamationPolicy::OnDrop,
        }
    }
}

impl InternerConfig {
    /// Parse and validate a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> ValueResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ValueError::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Build from `VALUEREF_SEPARATOR` / `VALUEREF_RECLAMATION`.
    ///
    /// Unset variables keep their default; unusable values are logged and
    /// ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`InternerConfig::from_env`] with a caller-supplied variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(SEPARATOR_ENV) {
            let mut chars = raw.chars();
            match (chars.next(), chars.next()) {
                (Some(sep), None) if validate_separator(sep).is_ok() => config.separator = sep,
                _ => tracing::warn!(
                    "{SEPARATOR_ENV}={raw:?} is not a usable separator; using {:?}",
                    config.separator
                ),
            }
        }

        if let Some(raw) = lookup(RECLAMATION_ENV) {
            match raw.parse() {
                Ok(policy) => config.reclamation = policy,
                Err(err) => tracing::warn!("{RECLAMATION_ENV} ignored: {err}"),
            }
        }

        config
    }

    pub fn validate(&self) -> ValueResult<()> {
        validate_separator(self.separator)
    }
}

fn validate_separator(sep: char) -> ValueResult<()> {
    // `\` and `#` carry meaning inside rendered key components.
    if sep == '\\' || sep == '#' {
        return Err(ValueError::invalid_config(format!(
            "separator {sep:?} is reserved"
        )));
    }
    Ok(())
}
