//! Source and target storage.
//!
//! The service reads originals from one [`Storage`] and writes thumbnails to
//! another. Names are storage-relative, `/`-separated paths. A name that is
//! absolute or climbs out of the root with `..` is never resolved.
//!
//! Backends are picked once at startup by [`from_config`].

use crate::config::{StorageBackend, StorageConfig};
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("'{0}' is not a valid storage name")]
    InvalidName(String),
    #[error("'{0}' does not exist")]
    NotFound(String),
}

/// File storage collaborator.
pub trait Storage: Send + Sync {
    fn exists(&self, name: &str) -> bool;
    fn open(&self, name: &str) -> Result<Vec<u8>, StorageError>;
    /// Write `bytes` under `name`, replacing whatever is there.
    fn save(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError>;
    /// Native filesystem location, if the backend has one.
    fn path(&self, name: &str) -> Option<PathBuf>;
    /// Public URL of a stored file.
    fn url(&self, name: &str) -> String;
}

/// Build the backend a storage section asks for.
pub fn from_config(config: &StorageConfig) -> Arc<dyn Storage> {
    match config.backend {
        StorageBackend::Filesystem => Arc::new(FileSystemStorage::new(&config.root, &config.base_url)),
        StorageBackend::Memory => Arc::new(MemoryStorage::new(&config.base_url)),
    }
}

/// Join `base_url` and a storage name, percent-encoding each path segment.
pub fn join_url(base_url: &str, name: &str) -> String {
    let encoded: Vec<_> = name
        .split('/')
        .map(urlencoding::encode)
        .collect();
    format!("{}/{}", base_url.trim_end_matches('/'), encoded.join("/"))
}

/// Relative path for a name, rejecting anything that leaves the root.
fn relative_path(name: &str) -> Result<PathBuf, StorageError> {
    let path = Path::new(name);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return Err(StorageError::InvalidName(name.to_string())),
        }
    }
    if out.as_os_str().is_empty() {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(out)
}

// =============================================================================
// Filesystem
// =============================================================================

/// Files under a root directory.
pub struct FileSystemStorage {
    root: PathBuf,
    base_url: String,
}

/// Distinguishes temp files written concurrently by one process.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

impl FileSystemStorage {
    pub fn new(root: impl Into<PathBuf>, base_url: &str) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join(relative_path(name)?))
    }
}

impl Storage for FileSystemStorage {
    fn exists(&self, name: &str) -> bool {
        self.resolve(name).is_ok_and(|p| p.is_file())
    }

    fn open(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(name)?;
        fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(name.to_string()),
            _ => StorageError::Io(e),
        })
    }

    /// Writes to a sibling temp file and renames it into place, so readers
    /// never observe a partial thumbnail.
    fn save(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension(format!(
            "{}.{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&tmp, bytes)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        debug!(path = %path.display(), bytes = bytes.len(), "saved file");
        Ok(())
    }

    fn path(&self, name: &str) -> Option<PathBuf> {
        self.resolve(name).ok()
    }

    fn url(&self, name: &str) -> String {
        join_url(&self.base_url, name)
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// Process-local storage, for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryStorage {
    files: RwLock<HashMap<String, Vec<u8>>>,
    base_url: String,
}

impl MemoryStorage {
    pub fn new(base_url: &str) -> Self {
        Self {
            files: RwLock::default(),
            base_url: base_url.to_string(),
        }
    }

    fn key(name: &str) -> Result<String, StorageError> {
        let path = relative_path(name)?;
        Ok(path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"))
    }

    pub fn len(&self) -> usize {
        self.files.read().map(|files| files.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Storage for MemoryStorage {
    fn exists(&self, name: &str) -> bool {
        let Ok(key) = Self::key(name) else {
            return false;
        };
        self.files
            .read()
            .is_ok_and(|files| files.contains_key(&key))
    }

    fn open(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let key = Self::key(name)?;
        let files = self
            .files
            .read()
            .map_err(|_| StorageError::Io(std::io::Error::other("storage lock poisoned")))?;
        files
            .get(&key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    fn save(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let key = Self::key(name)?;
        let mut files = self
            .files
            .write()
            .map_err(|_| StorageError::Io(std::io::Error::other("storage lock poisoned")))?;
        files.insert(key, bytes.to_vec());
        Ok(())
    }

    fn path(&self, _name: &str) -> Option<PathBuf> {
        None
    }

    fn url(&self, name: &str) -> String {
        join_url(&self.base_url, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // =========================================================================
    // Names and URLs
    // =========================================================================

    #[test]
    fn names_cannot_escape_the_root() {
        assert!(relative_path("a/b.jpg").is_ok());
        assert!(relative_path("./a/b.jpg").is_ok());
        assert!(relative_path("../b.jpg").is_err());
        assert!(relative_path("a/../../b.jpg").is_err());
        assert!(relative_path("/etc/passwd").is_err());
        assert!(relative_path("").is_err());
    }

    #[test]
    fn urls_encode_segments() {
        assert_eq!(
            join_url("/media/", "my photos/a b.jpg"),
            "/media/my%20photos/a%20b.jpg"
        );
        assert_eq!(join_url("/media", "a.jpg"), "/media/a.jpg");
        assert_eq!(
            join_url("https://cdn.example.com/t/", "x/y.png"),
            "https://cdn.example.com/t/x/y.png"
        );
    }

    // =========================================================================
    // Filesystem backend
    // =========================================================================

    #[test]
    fn filesystem_save_then_open() {
        let tmp = TempDir::new().unwrap();
        let storage = FileSystemStorage::new(tmp.path(), "/media/");

        assert!(!storage.exists("nested/dir/a.jpg"));
        storage.save("nested/dir/a.jpg", b"bytes").unwrap();
        assert!(storage.exists("nested/dir/a.jpg"));
        assert_eq!(storage.open("nested/dir/a.jpg").unwrap(), b"bytes");
        assert_eq!(
            storage.path("nested/dir/a.jpg").unwrap(),
            tmp.path().join("nested/dir/a.jpg")
        );
        assert_eq!(storage.url("nested/dir/a.jpg"), "/media/nested/dir/a.jpg");
    }

    #[test]
    fn filesystem_save_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let storage = FileSystemStorage::new(tmp.path(), "/");
        storage.save("a.jpg", b"one").unwrap();
        storage.save("a.jpg", b"two").unwrap();
        let entries: Vec<_> = fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(storage.open("a.jpg").unwrap(), b"two");
    }

    #[test]
    fn filesystem_open_missing_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let storage = FileSystemStorage::new(tmp.path(), "/");
        assert!(matches!(
            storage.open("nope.jpg"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn filesystem_directories_do_not_exist_as_files() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("dir")).unwrap();
        let storage = FileSystemStorage::new(tmp.path(), "/");
        assert!(!storage.exists("dir"));
    }

    #[test]
    fn filesystem_rejects_traversal() {
        let tmp = TempDir::new().unwrap();
        let storage = FileSystemStorage::new(tmp.path().join("root"), "/");
        fs::write(tmp.path().join("secret.txt"), "x").unwrap();
        assert!(!storage.exists("../secret.txt"));
        assert!(matches!(
            storage.save("../escape.jpg", b""),
            Err(StorageError::InvalidName(_))
        ));
    }

    // =========================================================================
    // Memory backend
    // =========================================================================

    #[test]
    fn memory_storage_roundtrip() {
        let storage = MemoryStorage::new("/m/");
        assert!(storage.is_empty());
        storage.save("./a/b.jpg", b"x").unwrap();
        assert!(storage.exists("a/b.jpg"));
        assert_eq!(storage.open("a/b.jpg").unwrap(), b"x");
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.path("a/b.jpg"), None);
        assert_eq!(storage.url("a/b.jpg"), "/m/a/b.jpg");
        assert!(matches!(storage.open("c.jpg"), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn registry_builds_configured_backend() {
        let tmp = TempDir::new().unwrap();
        let config = StorageConfig {
            backend: StorageBackend::Filesystem,
            root: tmp.path().to_string_lossy().into_owned(),
            base_url: "/f/".into(),
        };
        let storage = from_config(&config);
        storage.save("x.png", b"p").unwrap();
        assert!(tmp.path().join("x.png").is_file());

        let config = StorageConfig {
            backend: StorageBackend::Memory,
            root: String::new(),
            base_url: "/m/".into(),
        };
        let storage = from_config(&config);
        assert!(storage.path("x.png").is_none());
    }
}
