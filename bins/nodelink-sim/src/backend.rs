//! JSON file backend.
//!
//! Each namespace is persisted as `<dir>/<namespace>.json`, a flat object of
//! string values. The whole file is rewritten (through a temporary file and
//! a rename) on every write.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use nodelink_core::{BackendError, KvBackend};
use tracing::debug;

#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    data: RwLock<BTreeMap<String, String>>,
}

impl FileBackend {
    /// Open (or create) the namespace file under `dir`.
    pub fn open(dir: impl AsRef<Path>, namespace: &str) -> Result<Self, BackendError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .map_err(|e| BackendError::Unavailable(format!("{}: {e}", dir.display())))?;

        let path = dir.join(format!("{namespace}.json"));
        let data = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                BackendError::Unavailable(format!("{} is corrupted: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(BackendError::Unavailable(format!("{}: {e}", path.display())));
            }
        };

        debug!(path = %path.display(), keys = data.len(), "file backend opened");
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, key: &str, data: &BTreeMap<String, String>) -> Result<(), BackendError> {
        let write_error = |message: String| BackendError::Write {
            key: key.to_string(),
            message,
        };

        let text = serde_json::to_string_pretty(data).map_err(|e| write_error(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, text).map_err(|e| write_error(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| write_error(e.to_string()))
    }

    fn poisoned(&self) -> BackendError {
        BackendError::Unavailable(format!("{} lock poisoned", self.path.display()))
    }
}

impl KvBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let data = self.data.read().map_err(|_| self.poisoned())?;
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
        let mut data = self.data.write().map_err(|_| self.poisoned())?;
        data.insert(key.to_string(), value.to_string());
        self.persist(key, &data)
    }

    fn erase(&self, key: &str) -> Result<bool, BackendError> {
        let mut data = self.data.write().map_err(|_| self.poisoned())?;
        if data.remove(key).is_none() {
            return Ok(false);
        }
        self.persist(key, &data)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("nodelink-sim-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = scratch_dir();
        {
            let backend = FileBackend::open(&dir, "node").unwrap();
            backend.set("wifi_ssid", "lab").unwrap();
            backend.set("retries", "3").unwrap();
            assert!(backend.erase("retries").unwrap());
            assert!(!backend.erase("retries").unwrap());
        }

        let backend = FileBackend::open(&dir, "node").unwrap();
        assert_eq!(backend.get("wifi_ssid").unwrap(), Some("lab".to_string()));
        assert_eq!(backend.get("retries").unwrap(), None);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_corrupted_file_is_unavailable() {
        let dir = scratch_dir();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("node.json"), "{ not json").unwrap();

        assert!(matches!(
            FileBackend::open(&dir, "node"),
            Err(BackendError::Unavailable(_))
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
