use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::SessionConfig;
use crate::error::{BoxError, Error};
use crate::types::StorageKey;

/// Consumer-provided persistent key-value medium.
///
/// The session only ever stores two string values in it (the access and the
/// refresh token). Implement this for a keychain, a database row, browser
/// local storage behind `wasm-bindgen`, etc.
///
/// # Example
///
/// ```rust,ignore
/// impl KeyValueStore for Keychain {
///     fn get(&self, key: &str) -> Result<Option<String>, BoxError> {
///         Ok(self.entry(key)?.get_password().ok())
///     }
///     fn set(&self, key: &str, value: &str) -> Result<(), BoxError> {
///         Ok(self.entry(key)?.set_password(value)?)
///     }
///     fn remove(&self, key: &str) -> Result<(), BoxError> {
///         Ok(self.entry(key)?.delete_credential()?)
///     }
/// }
/// ```
pub trait KeyValueStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<String>, BoxError>;

    fn set(&self, key: &str, value: &str) -> Result<(), BoxError>;

    fn remove(&self, key: &str) -> Result<(), BoxError>;
}

/// In-process store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, BoxError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), BoxError> {
        self.entries.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), BoxError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON object on disk.
///
/// The file is read once on open and rewritten on every mutation.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Opens (or lazily creates) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` if the file exists but cannot be read or is not
    /// a JSON object of strings.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| Error::Store(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(Error::Store(format!("{}: {e}", path.display()))),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), BoxError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_vec_pretty(entries)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, BoxError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    // Both mutations write a copy first; memory only changes once disk has.
    fn set(&self, key: &str, value: &str) -> Result<(), BoxError> {
        let mut entries = self.entries.lock();
        let mut next = entries.clone();
        next.insert(key.to_owned(), value.to_owned());
        self.flush(&next)?;
        *entries = next;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), BoxError> {
        let mut entries = self.entries.lock();
        if !entries.contains_key(key) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.remove(key);
        self.flush(&next)?;
        *entries = next;
        Ok(())
    }
}

/// Which of the two tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Access => f.write_str("access"),
            Self::Refresh => f.write_str("refresh"),
        }
    }
}

/// Token persistence on top of a [`KeyValueStore`].
///
/// No business logic: absent reads as `""`, empty writes are ignored, and
/// backend failures are logged rather than returned.
#[derive(Clone)]
pub struct CredentialStore {
    backend: Arc<dyn KeyValueStore>,
    access_key: StorageKey,
    refresh_key: StorageKey,
}

impl CredentialStore {
    #[must_use]
    pub fn new(backend: Arc<dyn KeyValueStore>, config: &SessionConfig) -> Self {
        Self {
            backend,
            access_key: config.access_token_key.clone(),
            refresh_key: config.refresh_token_key.clone(),
        }
    }

    fn key(&self, kind: TokenKind) -> &str {
        match kind {
            TokenKind::Access => self.access_key.as_str(),
            TokenKind::Refresh => self.refresh_key.as_str(),
        }
    }

    /// Stored token, or `""` when absent or unreadable.
    #[must_use]
    pub fn get(&self, kind: TokenKind) -> String {
        match self.backend.get(self.key(kind)) {
            Ok(value) => value.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, kind = %kind, "Token read failed");
                String::new()
            }
        }
    }

    /// Persists `value`. An empty value never overwrites a stored token.
    pub fn set(&self, kind: TokenKind, value: &str) {
        if value.is_empty() {
            return;
        }
        if let Err(e) = self.backend.set(self.key(kind), value) {
            tracing::warn!(error = %e, kind = %kind, "Token write failed");
        }
    }

    pub fn clear(&self, kind: TokenKind) {
        if let Err(e) = self.backend.remove(self.key(kind)) {
            tracing::warn!(error = %e, kind = %kind, "Token removal failed");
        }
    }

    /// Removes both tokens.
    pub fn clear_all(&self) {
        self.clear(TokenKind::Access);
        self.clear(TokenKind::Refresh);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn get(&self, _key: &str) -> Result<Option<String>, BoxError> {
            Err("unavailable".into())
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), BoxError> {
            Err("unavailable".into())
        }

        fn remove(&self, _key: &str) -> Result<(), BoxError> {
            Err("unavailable".into())
        }
    }

    fn memory_store() -> (Arc<MemoryStore>, CredentialStore) {
        let backend = Arc::new(MemoryStore::new());
        let store = CredentialStore::new(backend.clone(), &SessionConfig::new());
        (backend, store)
    }

    #[test]
    fn absent_reads_as_empty() {
        let (_, store) = memory_store();
        assert_eq!(store.get(TokenKind::Access), "");
        assert_eq!(store.get(TokenKind::Refresh), "");
    }

    #[test]
    fn set_get_clear() {
        let (_, store) = memory_store();
        store.set(TokenKind::Access, "a1");
        store.set(TokenKind::Refresh, "r1");
        assert_eq!(store.get(TokenKind::Access), "a1");
        assert_eq!(store.get(TokenKind::Refresh), "r1");

        store.clear(TokenKind::Access);
        assert_eq!(store.get(TokenKind::Access), "");
        assert_eq!(store.get(TokenKind::Refresh), "r1");

        store.clear_all();
        assert_eq!(store.get(TokenKind::Refresh), "");
    }

    #[test]
    fn empty_value_never_overwrites() {
        let (_, store) = memory_store();
        store.set(TokenKind::Refresh, "r1");
        store.set(TokenKind::Refresh, "");
        assert_eq!(store.get(TokenKind::Refresh), "r1");
    }

    #[test]
    fn uses_configured_keys() {
        let backend = Arc::new(MemoryStore::new());
        let config = SessionConfig::new()
            .with_access_token_key("app.access")
            .with_refresh_token_key("app.refresh");
        let store = CredentialStore::new(backend.clone(), &config);

        store.set(TokenKind::Access, "a1");
        store.set(TokenKind::Refresh, "r1");

        assert_eq!(backend.get("app.access").unwrap().as_deref(), Some("a1"));
        assert_eq!(backend.get("app.refresh").unwrap().as_deref(), Some("r1"));
        assert_eq!(backend.get("token").unwrap(), None);
    }

    #[test]
    fn backend_failures_degrade_to_empty() {
        let store = CredentialStore::new(Arc::new(FailingStore), &SessionConfig::new());
        store.set(TokenKind::Access, "a1");
        store.clear_all();
        assert_eq!(store.get(TokenKind::Access), "");
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tokens.json");

        let store = FileStore::open(&path).unwrap();
        store.set("token", "a1").unwrap();
        store.set("refresh_token", "r1").unwrap();
        store.remove("refresh_token").unwrap();
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get("token").unwrap().as_deref(), Some("a1"));
        assert_eq!(reopened.get("refresh_token").unwrap(), None);
        assert_eq!(reopened.path(), path.as_path());
    }

    #[test]
    fn file_store_failed_write_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tokens.json");
        let store = FileStore::open(&path).unwrap();
        store.set("token", "a1").unwrap();

        // Parent directory replaced by a plain file: every write now fails.
        std::fs::remove_file(&path).unwrap();
        std::fs::remove_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested"), b"").unwrap();

        assert!(store.set("token", "a2").is_err());
        assert_eq!(store.get("token").unwrap().as_deref(), Some("a1"));
        assert!(store.set("refresh_token", "r1").is_err());
        assert_eq!(store.get("refresh_token").unwrap(), None);
        assert!(store.remove("token").is_err());
        assert_eq!(store.get("token").unwrap().as_deref(), Some("a1"));
    }

    #[test]
    fn file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, b"not json").unwrap();

        assert!(matches!(FileStore::open(&path), Err(Error::Store(_))));
    }
}
