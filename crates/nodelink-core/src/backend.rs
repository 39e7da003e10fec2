//! Persistent key-value backend abstraction.
//!
//! The parameter store persists every value as a string under its
//! parameter name. Implementations provide the platform-specific medium:
//! - Host: a JSON file (see the simulator binary)
//! - Microcontroller: a namespaced flash key-value partition
//!
//! All methods are synchronous to support embedded platforms.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::BackendError;

/// Namespaced string key-value storage.
///
/// A missing key is a defined state (`Ok(None)` / `Ok(false)`), never an
/// error. Every other failure is a [`BackendError`].
pub trait KvBackend: Send + Sync {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<(), BackendError>;

    /// Remove `key`. Returns whether it existed.
    fn erase(&self, key: &str) -> Result<bool, BackendError>;

    /// Check if a key exists.
    fn contains(&self, key: &str) -> Result<bool, BackendError> {
        Ok(self.get(key)?.is_some())
    }
}

/// In-memory backend.
///
/// Used by tests and by hosts that do not need persistence across restarts.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    namespace: String,
    data: RwLock<HashMap<String, String>>,
}

impl MemoryBackend {
    /// Create an empty backend for the given namespace.
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            data: RwLock::new(HashMap::new()),
        }
    }

    /// Create a backend pre-populated with values, as if they had been
    /// persisted by an earlier boot.
    pub fn with_values<I, K, V>(namespace: &str, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let data = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            namespace: namespace.to_string(),
            data: RwLock::new(data),
        }
    }

    /// The namespace this backend was opened with.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned(&self) -> BackendError {
        BackendError::Unavailable(format!("namespace '{}' lock poisoned", self.namespace))
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let data = self.data.read().map_err(|_| self.poisoned())?;
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
        let mut data = self.data.write().map_err(|_| self.poisoned())?;
        data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn erase(&self, key: &str) -> Result<bool, BackendError> {
        let mut data = self.data.write().map_err(|_| self.poisoned())?;
        Ok(data.remove(key).is_some())
    }

    fn contains(&self, key: &str) -> Result<bool, BackendError> {
        let data = self.data.read().map_err(|_| self.poisoned())?;
        Ok(data.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_is_not_an_error() {
        let backend = MemoryBackend::new("test");
        assert_eq!(backend.get("absent").unwrap(), None);
        assert!(!backend.contains("absent").unwrap());
        assert!(!backend.erase("absent").unwrap());
    }

    #[test]
    fn test_set_erase() {
        let backend = MemoryBackend::new("test");
        backend.set("name", "value").unwrap();
        assert_eq!(backend.get("name").unwrap().as_deref(), Some("value"));
        assert!(backend.erase("name").unwrap());
        assert!(backend.is_empty());
    }

    #[test]
    fn test_with_values() {
        let backend = MemoryBackend::with_values("test", [("a", "1"), ("b", "2")]);
        assert_eq!(backend.len(), 2);
        assert_eq!(backend.namespace(), "test");
        assert_eq!(backend.get("b").unwrap().as_deref(), Some("2"));
    }
}
