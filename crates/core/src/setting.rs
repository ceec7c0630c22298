//! Three-valued configuration parameters.
//!
//! A leg parameter is either set to a value, explicitly disabled, or left
//! unset. Only an unset parameter may inherit a strategy-level default; an
//! explicitly disabled one stays disabled even when the strategy defines a
//! value.

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Words accepted as "explicitly disabled" in configuration files.
const DISABLED_WORDS: &[&str] = &["off", "none", "null", "disabled", ""];

/// A configuration parameter with an explicit "disabled" state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Setting<T> {
    /// Not present in the configuration.
    #[default]
    Unset,
    /// Present, but switched off (`"off"`, `false`, `null`).
    Disabled,
    /// Present with a concrete value.
    Value(T),
}

impl<T> Setting<T> {
    #[must_use]
    pub const fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled)
    }

    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        match self {
            Self::Value(v) => Some(v),
            Self::Unset | Self::Disabled => None,
        }
    }
}

impl<T: Clone> Setting<T> {
    /// This setting's own value, never falling back.
    #[must_use]
    pub fn resolve(&self) -> Option<T> {
        self.value().cloned()
    }

    /// Falls back to `fallback` only when this setting is unset.
    #[must_use]
    pub fn or_inherit(&self, fallback: &Self) -> Self {
        match self {
            Self::Unset => fallback.clone(),
            other => other.clone(),
        }
    }

    /// Resolves against a strategy-level default.
    #[must_use]
    pub fn resolve_with(&self, fallback: &Self) -> Option<T> {
        self.or_inherit(fallback).resolve()
    }
}

impl<T> From<T> for Setting<T> {
    fn from(value: T) -> Self {
        Self::Value(value)
    }
}

impl<'de, T> Deserialize<'de> for Setting<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw<T> {
            Flag(bool),
            Value(T),
            Text(String),
        }

        match Option::<Raw<T>>::deserialize(deserializer)? {
            None | Some(Raw::Flag(false)) => Ok(Self::Disabled),
            Some(Raw::Flag(true)) => Err(de::Error::custom(
                "`true` is not a parameter value; give a number or \"off\"",
            )),
            Some(Raw::Value(v)) => Ok(Self::Value(v)),
            Some(Raw::Text(text)) => {
                let word = text.trim().to_ascii_lowercase();
                if DISABLED_WORDS.contains(&word.as_str()) {
                    Ok(Self::Disabled)
                } else {
                    Err(de::Error::custom(format!(
                        "unrecognised parameter value {text:?}"
                    )))
                }
            }
        }
    }
}

impl<T: Serialize> Serialize for Setting<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Value(v) => v.serialize(serializer),
            Self::Disabled => serializer.serialize_str("off"),
            Self::Unset => serializer.serialize_none(),
        }
    }
}
