//! Typed parameter store.
//!
//! Parameters are named configuration values persisted as strings in a
//! [`KvBackend`](crate::backend::KvBackend). Each declared parameter has a
//! fixed type and a default that is seeded once, on the first boot that
//! sees it.
//!
//! # Textual encoding
//!
//! | Type | Code | Encoding |
//! |------|------|----------|
//! | String | `s` | as-is |
//! | Bool | `b` | `"1"` / `"0"` |
//! | Long (i32) | `l` | decimal |
//! | Double (f64) | `d` | shortest round-trip decimal |
//!
//! Decoding is lenient: absent or malformed values read as the zero value
//! of the type (`false`, `0`, `0.0`).
//!
//! # Live synchronization
//!
//! A [`SyncCell`] registered with [`ParameterStore::sync`] (or a typed
//! variant) mirrors a parameter. The store refreshes every cell bound to a
//! name before `set`/`unset` returns.

mod store;
mod sync;

pub use store::ParameterStore;
pub use sync::{SyncCell, SyncRegistry, SyncTarget, Syncable};

use serde::{Deserialize, Serialize};

/// Parameter type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Bool,
    Long,
    Double,
}

impl ParamType {
    /// Single-character code used in the schema listing.
    pub fn code(&self) -> char {
        match self {
            ParamType::String => 's',
            ParamType::Bool => 'b',
            ParamType::Long => 'l',
            ParamType::Double => 'd',
        }
    }

    pub fn from_code(code: char) -> Option<Self> {
        match code {
            's' => Some(ParamType::String),
            'b' => Some(ParamType::Bool),
            'l' => Some(ParamType::Long),
            'd' => Some(ParamType::Double),
            _ => None,
        }
    }

    /// Whether `raw` is a well-formed encoding for this type.
    pub fn accepts(&self, raw: &str) -> bool {
        match self {
            ParamType::String => true,
            ParamType::Bool => raw == "0" || raw == "1",
            ParamType::Long => raw.trim().parse::<i32>().is_ok(),
            ParamType::Double => raw.trim().parse::<f64>().is_ok(),
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ParamType::String => "string",
            ParamType::Bool => "bool",
            ParamType::Long => "long",
            ParamType::Double => "double",
        };
        f.write_str(name)
    }
}

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    String(String),
    Bool(bool),
    Long(i32),
    Double(f64),
}

impl ParamValue {
    pub fn param_type(&self) -> ParamType {
        match self {
            ParamValue::String(_) => ParamType::String,
            ParamValue::Bool(_) => ParamType::Bool,
            ParamValue::Long(_) => ParamType::Long,
            ParamValue::Double(_) => ParamType::Double,
        }
    }

    /// Textual representation as persisted in the backend.
    pub fn encode(&self) -> String {
        match self {
            ParamValue::String(s) => s.clone(),
            ParamValue::Bool(b) => encode_bool(*b).to_string(),
            ParamValue::Long(l) => l.to_string(),
            ParamValue::Double(d) => d.to_string(),
        }
    }

    /// Decode `raw` as `ty` using the lenient rules.
    pub fn decode(ty: ParamType, raw: &str) -> Self {
        match ty {
            ParamType::String => ParamValue::String(raw.to_string()),
            ParamType::Bool => ParamValue::Bool(decode_bool(raw)),
            ParamType::Long => ParamValue::Long(decode_long(raw)),
            ParamType::Double => ParamValue::Double(decode_double(raw)),
        }
    }
}

pub(crate) fn encode_bool(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

/// True only when the value parses as the integer 1.
pub(crate) fn decode_bool(raw: &str) -> bool {
    raw.trim().parse::<i64>() == Ok(1)
}

pub(crate) fn decode_long(raw: &str) -> i32 {
    raw.trim().parse().unwrap_or(0)
}

pub(crate) fn decode_double(raw: &str) -> f64 {
    raw.trim().parse().unwrap_or(0.0)
}

/// A statically declared parameter.
#[derive(Debug, Clone)]
pub struct Parameter {
    name: String,
    default: ParamValue,
    sync: Option<SyncTarget>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, default: ParamValue) -> Self {
        Self {
            name: name.into(),
            default,
            sync: None,
        }
    }

    pub fn string(name: impl Into<String>, default: impl Into<String>) -> Self {
        Self::new(name, ParamValue::String(default.into()))
    }

    pub fn bool(name: impl Into<String>, default: bool) -> Self {
        Self::new(name, ParamValue::Bool(default))
    }

    pub fn long(name: impl Into<String>, default: i32) -> Self {
        Self::new(name, ParamValue::Long(default))
    }

    pub fn double(name: impl Into<String>, default: f64) -> Self {
        Self::new(name, ParamValue::Double(default))
    }

    /// Request a sync binding to `cell`, registered during
    /// [`ParameterStore::init`].
    pub fn synced(mut self, cell: impl Into<SyncTarget>) -> Self {
        self.sync = Some(cell.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn param_type(&self) -> ParamType {
        self.default.param_type()
    }

    pub fn default_value(&self) -> &ParamValue {
        &self.default
    }

    pub fn sync_target(&self) -> Option<&SyncTarget> {
        self.sync.as_ref()
    }
}
