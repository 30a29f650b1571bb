//! Durable key/value storage injected into the config manager and the event queue.
//!
//! The core never touches `localStorage`, files, or any other ambient store directly; the
//! host supplies a [`Storage`] implementation. Every operation is fallible, and callers in
//! the core treat failures as non-fatal.

use std::collections::HashMap;
#[cfg(not(target_arch = "wasm32"))]
use std::fs;
#[cfg(not(target_arch = "wasm32"))]
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{persistence_error, TrackingResult};

/// Synchronous, fallible string storage keyed by name.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> TrackingResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> TrackingResult<()>;
    fn remove(&self, key: &str) -> TrackingResult<()>;
}

pub type StorageHandle = Arc<dyn Storage>;

/// Process-local storage. Survives nothing, which makes it the default for tests and for
/// hosts that opt out of persistence.
#[derive(Default, Clone)]
pub struct InMemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

impl Storage for InMemoryStorage {
    fn get(&self, key: &str) -> TrackingResult<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> TrackingResult<()> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> TrackingResult<()> {
        self.lock().remove(key);
        Ok(())
    }
}

/// Stores each key as `<dir>/<key>.json`.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Clone, Debug)]
pub struct FileStorage {
    dir: Arc<PathBuf>,
}

#[cfg(not(target_arch = "wasm32"))]
impl FileStorage {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: Arc::new(dir.as_ref().to_path_buf()),
        }
    }

    /// Uses `$UNIFIED_TRACKING_STORAGE_DIR` when set, otherwise a directory under the
    /// system temp dir.
    pub fn from_env() -> Self {
        if let Ok(dir) = std::env::var("UNIFIED_TRACKING_STORAGE_DIR") {
            return Self::new(dir);
        }
        let mut base = std::env::temp_dir();
        base.push("unified-tracking");
        Self::new(base)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file_name}.json"))
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl Storage for FileStorage {
    fn get(&self, key: &str) -> TrackingResult<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .map_err(|err| persistence_error(format!("failed to read {}: {err}", path.display())))?;
        if raw.is_empty() {
            return Ok(None);
        }
        Ok(Some(raw))
    }

    fn set(&self, key: &str, value: &str) -> TrackingResult<()> {
        fs::create_dir_all(&*self.dir).map_err(|err| {
            persistence_error(format!("failed to create {}: {err}", self.dir.display()))
        })?;
        let path = self.path_for(key);
        fs::write(&path, value)
            .map_err(|err| persistence_error(format!("failed to write {}: {err}", path.display())))
    }

    fn remove(&self, key: &str) -> TrackingResult<()> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(());
        }
        fs::remove_file(&path)
            .map_err(|err| persistence_error(format!("failed to remove {}: {err}", path.display())))
    }
}

/// `window.localStorage` backed storage for browser builds.
#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
#[derive(Clone, Debug, Default)]
pub struct WebStorage;

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
impl WebStorage {
    pub fn new() -> Self {
        Self
    }

    fn local_storage() -> TrackingResult<web_sys::Storage> {
        let window = web_sys::window()
            .ok_or_else(|| persistence_error("window object is not available in this environment"))?;
        window
            .local_storage()
            .map_err(|err| persistence_error(format!("localStorage access denied: {err:?}")))?
            .ok_or_else(|| persistence_error("localStorage is unavailable"))
    }
}

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
impl Storage for WebStorage {
    fn get(&self, key: &str) -> TrackingResult<Option<String>> {
        Self::local_storage()?
            .get_item(key)
            .map_err(|err| persistence_error(format!("localStorage read failed: {err:?}")))
    }

    fn set(&self, key: &str, value: &str) -> TrackingResult<()> {
        Self::local_storage()?
            .set_item(key, value)
            .map_err(|err| persistence_error(format!("localStorage write failed: {err:?}")))
    }

    fn remove(&self, key: &str) -> TrackingResult<()> {
        Self::local_storage()?
            .remove_item(key)
            .map_err(|err| persistence_error(format!("localStorage remove failed: {err:?}")))
    }
}
