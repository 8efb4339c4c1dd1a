//! Key-value backend trait and backend selection.
//!
//! This module provides the persistence seam for murmur data:
//! - `MemoryBackend` - Process-local map (tests, dry runs)
//! - `SqliteBackend` - Single-table SQLite file (default)

use crate::Result;
use serde_json::Value;

/// Trait for backends that persist whole JSON values by string key.
///
/// Implementations use interior mutability so one backend can be shared
/// by every store through an `Arc`.
pub trait KvBackend: Send + Sync {
    /// Read the value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Replace the value stored under `key`.
    fn set(&self, key: &str, value: &Value) -> Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// All keys currently stored, sorted.
    fn keys(&self) -> Result<Vec<String>>;

    /// Get the storage location description (for display purposes).
    fn location(&self) -> String;

    /// Get the backend type name.
    fn backend_type(&self) -> &'static str;
}

/// Available backend types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// In-memory map, lost on exit
    Memory,
    /// SQLite file in the data directory (default)
    Sqlite,
}

impl BackendType {
    /// Parse a backend type from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" => Some(Self::Memory),
            "sqlite" | "file" | "default" => Some(Self::Sqlite),
            _ => None,
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite => "sqlite",
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
