//! Sync cells and the binding registry.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{trace, warn};

use super::{decode_bool, decode_double, decode_long, ParamType};
use crate::error::ParamError;

/// Shared handle to an in-memory variable mirrored from a parameter.
///
/// The application keeps one clone and reads it; the store writes through
/// another. Cloning a cell clones the handle, not the value.
pub struct SyncCell<T>(Arc<RwLock<T>>);

impl<T> SyncCell<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    /// Replace the current value.
    pub fn set(&self, value: T) {
        let mut guard = self.0.write().unwrap_or_else(PoisonError::into_inner);
        *guard = value;
    }

    /// Run `f` against the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.0.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Whether both handles point to the same variable.
    pub fn ptr_eq(&self, other: &SyncCell<T>) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: Clone> SyncCell<T> {
    pub fn get(&self) -> T {
        self.with(T::clone)
    }
}

impl<T> Clone for SyncCell<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: Default> Default for SyncCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for SyncCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.with(|value| f.debug_tuple("SyncCell").field(value).finish())
    }
}

/// A type that can be mirrored from a parameter.
pub trait Syncable: Sized {
    const PARAM_TYPE: ParamType;

    /// Lenient decoding of the persisted string.
    fn decode(raw: &str) -> Self;

    fn into_target(cell: SyncCell<Self>) -> SyncTarget;
}

impl Syncable for String {
    const PARAM_TYPE: ParamType = ParamType::String;

    fn decode(raw: &str) -> Self {
        raw.to_string()
    }

    fn into_target(cell: SyncCell<Self>) -> SyncTarget {
        SyncTarget::String(cell)
    }
}

impl Syncable for bool {
    const PARAM_TYPE: ParamType = ParamType::Bool;

    fn decode(raw: &str) -> Self {
        decode_bool(raw)
    }

    fn into_target(cell: SyncCell<Self>) -> SyncTarget {
        SyncTarget::Bool(cell)
    }
}

impl Syncable for i32 {
    const PARAM_TYPE: ParamType = ParamType::Long;

    fn decode(raw: &str) -> Self {
        decode_long(raw)
    }

    fn into_target(cell: SyncCell<Self>) -> SyncTarget {
        SyncTarget::Long(cell)
    }
}

impl Syncable for f64 {
    const PARAM_TYPE: ParamType = ParamType::Double;

    fn decode(raw: &str) -> Self {
        decode_double(raw)
    }

    fn into_target(cell: SyncCell<Self>) -> SyncTarget {
        SyncTarget::Double(cell)
    }
}

/// Type-erased sync cell.
#[derive(Debug, Clone)]
pub enum SyncTarget {
    String(SyncCell<String>),
    Bool(SyncCell<bool>),
    Long(SyncCell<i32>),
    Double(SyncCell<f64>),
}

impl SyncTarget {
    pub fn param_type(&self) -> ParamType {
        match self {
            SyncTarget::String(_) => ParamType::String,
            SyncTarget::Bool(_) => ParamType::Bool,
            SyncTarget::Long(_) => ParamType::Long,
            SyncTarget::Double(_) => ParamType::Double,
        }
    }

    /// Write the decoded form of `raw` into the cell.
    pub fn apply(&self, raw: &str) {
        match self {
            SyncTarget::String(cell) => cell.set(String::decode(raw)),
            SyncTarget::Bool(cell) => cell.set(bool::decode(raw)),
            SyncTarget::Long(cell) => cell.set(i32::decode(raw)),
            SyncTarget::Double(cell) => cell.set(f64::decode(raw)),
        }
    }
}

impl<T: Syncable> From<SyncCell<T>> for SyncTarget {
    fn from(cell: SyncCell<T>) -> Self {
        T::into_target(cell)
    }
}

impl<T: Syncable> From<&SyncCell<T>> for SyncTarget {
    fn from(cell: &SyncCell<T>) -> Self {
        T::into_target(cell.clone())
    }
}

#[derive(Debug)]
struct SyncBinding {
    name: String,
    target: SyncTarget,
}

/// Ordered, append-only collection of sync bindings with a fixed maximum.
///
/// Registration is expected to finish during boot, before concurrent
/// writers exist.
#[derive(Debug)]
pub struct SyncRegistry {
    capacity: usize,
    bindings: RwLock<Vec<SyncBinding>>,
}

impl SyncRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            bindings: RwLock::new(Vec::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a binding.
    pub fn register(&self, name: &str, target: SyncTarget) -> Result<(), ParamError> {
        if name.is_empty() {
            return Err(ParamError::EmptyName);
        }

        let mut bindings = self
            .bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if bindings.len() >= self.capacity {
            warn!(param = name, capacity = self.capacity, "sync registry full");
            return Err(ParamError::RegistryFull {
                capacity: self.capacity,
            });
        }

        bindings.push(SyncBinding {
            name: name.to_string(),
            target,
        });
        Ok(())
    }

    /// Re-apply `raw` to every binding of `name`, in registration order.
    /// Returns the number of cells updated.
    pub fn refresh(&self, name: &str, raw: &str) -> usize {
        let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        let mut updated = 0;
        for binding in bindings.iter().filter(|b| b.name == name) {
            binding.target.apply(raw);
            updated += 1;
        }
        if updated > 0 {
            trace!(param = name, updated, "sync bindings refreshed");
        }
        updated
    }
}
