use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::warn;

use crate::config::ConfigLocator;

use super::StorageError;

/// Key-value persistence that survives restarts of the client.
pub trait ClientStorage: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Process-local storage, useful when nothing durable is available.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClientStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

impl<T: ClientStorage> ClientStorage for std::sync::Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove(key)
    }
}

/// Filesystem-backed storage: one user-only file per key.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Storage namespaced by profile inside the user configuration directory.
    pub fn for_profile(profile: &str) -> Result<Self, StorageError> {
        let locator = ConfigLocator::new()?;
        Ok(Self::new(locator.storage_dir(profile)))
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
            && !key.starts_with('.');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_owned()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }

    fn write_file(path: &Path, payload: &str) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.write_all(payload.as_bytes())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perm = file.metadata()?.permissions();
            perm.set_mode(0o600);
            fs::set_permissions(path, perm)?;
        }

        Ok(())
    }
}

impl ClientStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        Self::write_file(&path, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(path) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Wraps a backend so failures are logged and the caller carries on in memory.
///
/// A failed write or remove marks the backend degraded until the next one succeeds;
/// while degraded, what it holds may lag behind the in-memory session.
pub(crate) struct BestEffort<S> {
    inner: S,
    degraded: AtomicBool,
}

impl<S: ClientStorage> BestEffort<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            degraded: AtomicBool::new(false),
        }
    }

    /// `Err` only when the backend itself failed; absent keys are `Ok(None)`.
    pub fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.inner.get(key).map_err(|err| {
            warn!(key, error = %err, "storage read failed; using in-memory session");
            err
        })
    }

    pub fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let result = self.inner.set(key, value);
        if let Err(err) = &result {
            warn!(key, error = %err, "storage write failed; session kept in memory only");
        }
        self.record(result)
    }

    pub fn clear(&self, key: &str) -> Result<(), StorageError> {
        let result = self.inner.remove(key);
        if let Err(err) = &result {
            warn!(key, error = %err, "storage remove failed");
        }
        self.record(result)
    }

    /// The last write or remove failed.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    fn record(&self, result: Result<(), StorageError>) -> Result<(), StorageError> {
        self.degraded.store(result.is_err(), Ordering::SeqCst);
        result
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Backend whose every call fails, for exercising degraded paths.
    pub(crate) struct BrokenStorage;

    impl ClientStorage for BrokenStorage {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into())
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into())
        }

        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into())
        }
    }

    #[test]
    fn file_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path().join("default"));
        storage.set("dashboard.session", "{\"version\":1}").unwrap();
        assert_eq!(
            storage.get("dashboard.session").unwrap().as_deref(),
            Some("{\"version\":1}")
        );
        storage.remove("dashboard.session").unwrap();
        assert!(storage.get("dashboard.session").unwrap().is_none());
    }

    #[test]
    fn missing_keys_are_absent() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path());
        assert!(storage.get("missing").unwrap().is_none());
        storage.remove("missing").unwrap();
    }

    #[test]
    fn rejects_path_like_keys() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path());
        assert!(matches!(
            storage.set("../escape", "x"),
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(storage.get(""), Err(StorageError::InvalidKey(_))));
    }

    #[cfg(unix)]
    #[test]
    fn files_are_user_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path());
        storage.set("dashboard.session", "{}").unwrap();
        let mode = fs::metadata(temp_dir.path().join("dashboard.session.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    /// Backend that reads normally but rejects every change, like a read-only config dir.
    pub(crate) struct ReadOnlyStorage;

    impl ClientStorage for ReadOnlyStorage {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Ok(None)
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only").into())
        }

        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only").into())
        }
    }

    #[test]
    fn best_effort_reports_failures() {
        let storage = BestEffort::new(BrokenStorage);
        assert!(storage.write("dashboard.session", "{}").is_err());
        assert!(storage.clear("dashboard.session").is_err());
        assert!(storage.read("dashboard.session").is_err());
        assert!(storage.is_degraded());
    }

    #[test]
    fn degraded_until_a_write_succeeds() {
        let temp_dir = TempDir::new().unwrap();
        let storage = BestEffort::new(FileStorage::new(temp_dir.path()));
        assert!(!storage.is_degraded());

        assert!(storage.write("../escape", "{}").is_err());
        assert!(storage.is_degraded());

        storage.write("dashboard.session", "{}").unwrap();
        assert!(!storage.is_degraded());
    }
}
