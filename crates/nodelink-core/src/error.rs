//! Error types for the parameter store and lifecycle manager.
//!
//! Malformed or absent parameter values are never errors: typed getters
//! fall back to the zero value of their type. What remains here are faults
//! the caller has to act on.

use thiserror::Error;

use crate::params::ParamType;

/// Faults reported by a persistent key-value backend.
///
/// A missing key is not a fault; backends report it as `None`/`false`.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The storage medium could not be read.
    #[error("backend read failed for '{key}': {message}")]
    Read { key: String, message: String },

    /// The storage medium could not be written.
    #[error("backend write failed for '{key}': {message}")]
    Write { key: String, message: String },

    /// The backend could not be opened or is corrupted.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned by the parameter store.
#[derive(Debug, Error)]
pub enum ParamError {
    /// Persistent storage fault. Treated as fatal by the runtime.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Sync registration with an empty parameter name.
    #[error("parameter name must not be empty")]
    EmptyName,

    /// The sync registry reached its configured maximum.
    #[error("sync registry full (capacity {capacity})")]
    RegistryFull { capacity: usize },

    /// The declared type of a parameter differs from the requested one.
    #[error("parameter '{name}' is declared as {declared}, not {requested}")]
    TypeMismatch {
        name: String,
        declared: ParamType,
        requested: ParamType,
    },

    /// A textual value does not parse as the declared type.
    #[error("invalid value '{value}' for {expected} parameter '{name}'")]
    InvalidValue {
        name: String,
        value: String,
        expected: ParamType,
    },

    /// Two declarations share the same name.
    #[error("parameter '{0}' declared more than once")]
    DuplicateDeclaration(String),
}

impl ParamError {
    /// Whether this error is a persistent storage fault.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ParamError::Backend(_))
    }
}

/// Errors surfaced by lifecycle transitions.
///
/// Link and session losses are state transitions, not errors. The only
/// failure a transition can report is a parameter store fault, either while
/// reading configuration or while forwarding a message.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("parameter store fault: {0}")]
    Params(#[from] ParamError),
}
