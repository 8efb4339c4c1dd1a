//! Storage layer for murmur data.
//!
//! This module handles persistence of relationships, rumors, posts, profiles
//! and auto-post settings.
//!
//! ## Storage Backends
//!
//! - **SQLite backend** (default): `murmur.db` in the data directory
//!   (`~/.local/share/murmur/` unless overridden)
//! - **Memory backend**: process-local, for tests and dry runs
//!
//! Every store keeps one whole JSON value per key (see the `*_KEY` constants)
//! and rewrites it on each mutation. Missing keys read as empty defaults.

pub mod backend;
pub mod sqlite;

pub use backend::{BackendType, KvBackend};
pub use sqlite::SqliteBackend;

use crate::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const RELATIONSHIPS_KEY: &str = "relationships";
pub const RUMORS_KEY: &str = "rumors";
pub const POSTS_KEY: &str = "posts";
pub const AUTO_POST_SETTINGS_KEY: &str = "auto_post_settings";
pub const PROFILES_KEY: &str = "profiles";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "MURMUR_DATA_DIR";

/// In-memory backend.
#[derive(Default)]
pub struct MemoryBackend {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Value>>> {
        self.values
            .lock()
            .map_err(|_| Error::Other("memory backend lock poisoned".to_string()))
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.lock()?.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn location(&self) -> String {
        "memory".to_string()
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

/// A typed view of one backend key.
///
/// `update` serializes read-modify-write cycles made through the same table,
/// so two tasks mutating one key cannot lose each other's writes.
pub struct JsonTable<T> {
    backend: Arc<dyn KvBackend>,
    key: &'static str,
    write_lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonTable<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(backend: Arc<dyn KvBackend>, key: &'static str) -> Self {
        Self {
            backend,
            key,
            write_lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    /// Load the current value, or the default when the key is missing.
    pub fn load(&self) -> Result<T> {
        match self.backend.get(self.key)? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(T::default()),
        }
    }

    pub fn save(&self, value: &T) -> Result<()> {
        self.backend.set(self.key, &serde_json::to_value(value)?)
    }

    /// Load, mutate with `f`, and save unless `f` fails.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> Result<R>) -> Result<R> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| Error::Other(format!("{} table lock poisoned", self.key)))?;
        let mut value = self.load()?;
        let result = f(&mut value)?;
        self.save(&value)?;
        Ok(result)
    }
}

/// Resolve the data directory.
///
/// Priority: explicit path > `MURMUR_DATA_DIR` > `<XDG data dir>/murmur`.
pub fn resolve_data_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let data_dir = dirs::data_dir()
        .ok_or_else(|| Error::Other("Could not determine data directory".to_string()))?;
    Ok(data_dir.join("murmur"))
}

/// Open a backend of the given type rooted at `data_dir`.
pub fn open_backend(backend_type: BackendType, data_dir: &Path) -> Result<Arc<dyn KvBackend>> {
    match backend_type {
        BackendType::Memory => Ok(Arc::new(MemoryBackend::new())),
        BackendType::Sqlite => Ok(Arc::new(SqliteBackend::open(data_dir)?)),
    }
}
