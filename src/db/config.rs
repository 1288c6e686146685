//! Node database configuration

use crate::model::Namespace;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default size of the decoded node cache in bytes
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 16 * 1024 * 1024;

/// Node database backend configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the database
    pub db: PathBuf,
    /// Skip fsync where possible; use `sync` to flush explicitly
    pub no_fsync: bool,
    /// Keep everything in memory (if the backend supports it)
    pub memory_only: bool,
    /// Reject every mutating operation
    pub read_only: bool,
    /// Namespace contained within the database
    pub namespace: Namespace,
    /// Maximum in-memory cache size in bytes; zero disables the cache
    pub max_cache_size: u64,
    /// Discard all write logs instead of storing them
    pub discard_write_logs: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db: PathBuf::new(),
            no_fsync: false,
            memory_only: false,
            read_only: false,
            namespace: Namespace::default(),
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            discard_write_logs: false,
        }
    }
}

impl Config {
    /// A memory-only configuration for the given namespace
    pub fn memory(namespace: Namespace) -> Self {
        Config {
            memory_only: true,
            namespace,
            ..Default::default()
        }
    }

    /// A configuration persisting to `path`
    pub fn at_path(path: impl AsRef<Path>, namespace: Namespace) -> Self {
        Config {
            db: path.as_ref().to_path_buf(),
            namespace,
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert!(!cfg.memory_only);
        assert!(!cfg.read_only);
        assert_eq!(cfg.max_cache_size, DEFAULT_MAX_CACHE_SIZE);

        let mem = Config::memory(Namespace::from_bytes([1u8; 32]));
        assert!(mem.memory_only);
    }

    #[test]
    fn test_from_json_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let ns = Namespace::from_bytes([9u8; 32]);
        let json = serde_json::json!({
            "db": "/tmp/node.db",
            "read_only": true,
            "namespace": ns,
        });
        std::fs::write(&path, json.to_string()).unwrap();

        let cfg = Config::from_json_file(&path).unwrap();
        assert_eq!(cfg.db, PathBuf::from("/tmp/node.db"));
        assert!(cfg.read_only);
        assert_eq!(cfg.namespace, ns);
        assert!(!cfg.discard_write_logs);
        assert_eq!(cfg.max_cache_size, DEFAULT_MAX_CACHE_SIZE);
    }
}
