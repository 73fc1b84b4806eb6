//! Generation locks with a time-to-live.
//!
//! A [`LockStore`] is a shared key-value mutex: [`set_with_ttl`](LockStore::set_with_ttl)
//! atomically claims a key unless a live entry already holds it, and entries
//! expire on their own after the TTL. Expiry is what keeps a crashed worker
//! from blocking a thumbnail forever.
//!
//! [`acquire`] claims a key under a fresh owner value and wraps it in a
//! [`LockGuard`], which releases the entry when dropped. Every exit path out
//! of generation (success, error, panic unwinding) therefore releases the
//! lock. Release only removes an entry still holding the guard's own value,
//! so a guard that outlived its TTL cannot free a successor's claim.
//!
//! Two stores ship:
//!
//! | Store | Scope | Atomic claim |
//! |---|---|---|
//! | [`MemoryLockStore`] | threads of one process | `Mutex<HashMap>` |
//! | [`FileLockStore`] | processes sharing a directory | `link(2)` of a written lock file |

use crate::config::{LockBackend, LockConfig};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum LockError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("lock store poisoned")]
    Poisoned,
}

/// Shared mutex store keyed by descriptor key.
pub trait LockStore: Send + Sync {
    /// Whether a live entry exists for `key`.
    fn get(&self, key: &str) -> Result<bool, LockError>;
    /// Claim `key` for `ttl`, storing `value` as the owner. Returns `false`
    /// if a live entry already holds it.
    fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, LockError>;
    fn delete(&self, key: &str) -> Result<(), LockError>;
    /// Delete `key` only if its entry still holds `value`.
    fn release(&self, key: &str, value: &str) -> Result<(), LockError>;
}

/// Build the store the `[locks]` section asks for.
pub fn from_config(config: &LockConfig) -> Arc<dyn LockStore> {
    match config.backend {
        LockBackend::Memory => Arc::new(MemoryLockStore::new()),
        LockBackend::File => Arc::new(FileLockStore::new(&config.dir)),
    }
}

/// Held lock; releases its entry on drop.
pub struct LockGuard<'a> {
    store: &'a dyn LockStore,
    key: String,
    owner: String,
}

impl LockGuard<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        match self.store.release(&self.key, &self.owner) {
            Ok(()) => debug!(key = %self.key, "lock released"),
            // The TTL still bounds how long the entry survives.
            Err(e) => warn!(key = %self.key, error = %e, "failed to release lock"),
        }
    }
}

/// Try to claim `key`. `Ok(None)` means another worker holds it.
pub fn acquire<'a>(
    store: &'a dyn LockStore,
    key: &str,
    ttl: Duration,
) -> Result<Option<LockGuard<'a>>, LockError> {
    let owner = owner_token();
    if !store.set_with_ttl(key, &owner, ttl)? {
        debug!(key, "lock held elsewhere");
        return Ok(None);
    }
    debug!(key, %owner, ttl_secs = ttl.as_secs_f64(), "lock acquired");
    Ok(Some(LockGuard {
        store,
        key: key.to_string(),
        owner,
    }))
}

/// Unique per claim: process id, wall clock and a process-wide counter.
fn owner_token() -> String {
    format!(
        "{}-{}-{}",
        std::process::id(),
        now_millis(),
        CLAIM_COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

// =============================================================================
// In-memory store
// =============================================================================

/// Expiry instant and owner per key, guarded by one mutex.
#[derive(Default)]
pub struct MemoryLockStore {
    entries: Mutex<HashMap<String, (Instant, String)>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockStore for MemoryLockStore {
    fn get(&self, key: &str) -> Result<bool, LockError> {
        let entries = self.entries.lock().map_err(|_| LockError::Poisoned)?;
        Ok(entries.get(key).is_some_and(|(expiry, _)| *expiry > Instant::now()))
    }

    fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, LockError> {
        let mut entries = self.entries.lock().map_err(|_| LockError::Poisoned)?;
        let now = Instant::now();
        if entries.get(key).is_some_and(|(expiry, _)| *expiry > now) {
            return Ok(false);
        }
        entries.insert(key.to_string(), (now + ttl, value.to_string()));
        Ok(true)
    }

    fn delete(&self, key: &str) -> Result<(), LockError> {
        let mut entries = self.entries.lock().map_err(|_| LockError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }

    fn release(&self, key: &str, value: &str) -> Result<(), LockError> {
        let mut entries = self.entries.lock().map_err(|_| LockError::Poisoned)?;
        if entries.get(key).is_some_and(|(_, owner)| owner == value) {
            entries.remove(key);
        }
        Ok(())
    }
}

// =============================================================================
// Lock-file store
// =============================================================================

/// One file per key in a shared directory. The first line holds the expiry in
/// unix millis, the second the owner value.
///
/// Claims are atomic links, so exactly one process wins a free key. An
/// expired file is moved aside and the claim retried once; if the file moved
/// aside turns out to be a fresh claim, it is linked back. A file with an
/// unreadable expiry is judged by its modification time instead.
pub struct FileLockStore {
    dir: PathBuf,
}

impl FileLockStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.lock"))
    }

    /// Hard-link a fully written temp file into place. The link fails if
    /// the lock file exists, and readers never see a half-written expiry.
    fn try_create(&self, path: &Path, value: &str, ttl: Duration) -> Result<bool, LockError> {
        let tmp = Self::side_path(path, "tmp");
        fs::write(&tmp, format!("{}\n{value}", now_millis() + ttl.as_millis()))?;
        let claimed = match fs::hard_link(&tmp, path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        };
        let _ = fs::remove_file(&tmp);
        claimed
    }

    /// A sibling of `path` no other claim in any process will pick.
    fn side_path(path: &Path, tag: &str) -> PathBuf {
        path.with_extension(format!(
            "{}.{}.{tag}",
            std::process::id(),
            CLAIM_COUNTER.fetch_add(1, Ordering::Relaxed)
        ))
    }

    /// Whether the lock file at `path` is still live. Missing files are not.
    fn is_live(path: &Path, ttl: Duration) -> Result<bool, LockError> {
        let Some(entry) = read_entry(path)? else {
            return Ok(false);
        };
        if let Some(expiry) = entry.expiry {
            return Ok(expiry > now_millis());
        }
        let modified = fs::metadata(path)?.modified()?;
        Ok(modified.elapsed().map_or(true, |age| age < ttl))
    }

    /// Move an expired lock file out of the way. Returns `false` when the
    /// file moved aside was a live claim, which is then put back.
    ///
    /// Another worker may clear the same expired file and claim the key
    /// between our liveness check and the rename, so the moved file is
    /// checked again before it is removed.
    fn clear_stale(&self, path: &Path, ttl: Duration) -> Result<bool, LockError> {
        let stale = Self::side_path(path, "stale");
        match fs::rename(path, &stale) {
            Ok(()) => {}
            // Someone else cleared it first.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        }
        let live = Self::is_live(&stale, ttl);
        if matches!(live, Ok(true)) {
            debug!(path = %path.display(), "restoring live lock moved aside");
            let restored = match fs::hard_link(&stale, path) {
                // A newer claim already took the slot; it holds the key now.
                Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
                other => other,
            };
            let _ = fs::remove_file(&stale);
            restored?;
            return Ok(false);
        }
        let _ = fs::remove_file(&stale);
        live.map(|_| true)
    }
}

/// Parsed lock file contents.
struct Entry {
    /// `None` when the first line is not a timestamp.
    expiry: Option<u128>,
    owner: String,
}

/// Read the lock file at `path`; `None` if it does not exist.
fn read_entry(path: &Path) -> Result<Option<Entry>, LockError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let (expiry, owner) = content.split_once('\n').unwrap_or((&content, ""));
    Ok(Some(Entry {
        expiry: expiry.trim().parse().ok(),
        owner: owner.trim().to_string(),
    }))
}

/// Distinguishes side files and owner values of concurrent claims within one process.
static CLAIM_COUNTER: AtomicU64 = AtomicU64::new(0);

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

impl LockStore for FileLockStore {
    fn get(&self, key: &str) -> Result<bool, LockError> {
        let Some(entry) = read_entry(&self.lock_path(key))? else {
            return Ok(false);
        };
        // Unreadable expiries count as held; claims judge those by age.
        Ok(entry.expiry.map_or(true, |expiry| expiry > now_millis()))
    }

    fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, LockError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.lock_path(key);
        if self.try_create(&path, value, ttl)? {
            return Ok(true);
        }
        if Self::is_live(&path, ttl)? {
            return Ok(false);
        }

        debug!(key, path = %path.display(), "removing expired lock file");
        if !self.clear_stale(&path, ttl)? {
            return Ok(false);
        }
        self.try_create(&path, value, ttl)
    }

    fn delete(&self, key: &str) -> Result<(), LockError> {
        match fs::remove_file(self.lock_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn release(&self, key: &str, value: &str) -> Result<(), LockError> {
        let path = self.lock_path(key);
        match read_entry(&path)? {
            Some(entry) if entry.owner == value => self.delete(key),
            _ => Ok(()),
        }
    }
}
