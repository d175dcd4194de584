//! TTL cache tier for job records.
//!
//! Backed by redb when a cache directory is available, with an in-process
//! DashMap fallback when it is not. The cache is strictly best effort: every
//! public operation is infallible, and backend failures degrade to a miss
//! with a warning rather than an error. Values are wrapped in a bincode
//! envelope carrying the expiry instant; expired entries are evicted lazily
//! on read.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::StoreResult;

const CACHE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("cache");

/// Stored value plus its expiry instant (unix seconds).
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    expires_at: u64,
    payload: Vec<u8>,
}

enum Backend {
    Durable(Database),
    Memory(DashMap<String, Vec<u8>>),
}

/// Best-effort TTL cache.
pub struct CacheStore {
    backend: Backend,
    ttl_secs: u64,
}

impl CacheStore {
    /// Open a redb-backed cache in the given directory. Falls back to the
    /// in-memory backend when the database cannot be opened.
    pub fn open(dir: &Path, ttl_secs: u64) -> Self {
        let backend = match Self::open_durable(dir) {
            Ok(db) => Backend::Durable(db),
            Err(e) => {
                tracing::warn!(error = %e, "cache database unavailable, using in-memory cache");
                Backend::Memory(DashMap::new())
            }
        };
        Self { backend, ttl_secs }
    }

    /// Purely in-process cache, used when no data directory is configured.
    pub fn in_memory(ttl_secs: u64) -> Self {
        Self {
            backend: Backend::Memory(DashMap::new()),
            ttl_secs,
        }
    }

    fn open_durable(dir: &Path) -> StoreResult<Database> {
        std::fs::create_dir_all(dir).map_err(|e| StoreError::Io { source: e })?;
        let path = dir.join("cache.redb");
        Database::create(&path).map_err(|e| StoreError::Redb {
            message: format!("failed to open cache at {}: {e}", path.display()),
        })
    }

    /// Store a value under `key` with the configured TTL.
    pub fn set(&self, key: &str, payload: &[u8]) {
        let envelope = Envelope {
            expires_at: now_secs().saturating_add(self.ttl_secs),
            payload: payload.to_vec(),
        };
        let bytes = match bincode::serialize(&envelope) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache set skipped: envelope encode failed");
                return;
            }
        };
        if let Err(e) = self.put_raw(key, &bytes) {
            tracing::warn!(key, error = %e, "cache set failed");
        }
    }

    /// Fetch a value; expired entries are evicted and report a miss.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let bytes = match self.get_raw(key) {
            Ok(b) => b?,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache get failed");
                return None;
            }
        };
        let envelope: Envelope = match bincode::deserialize(&bytes) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache entry undecodable, evicting");
                self.delete(key);
                return None;
            }
        };
        if envelope.expires_at <= now_secs() {
            tracing::debug!(key, "cache entry expired");
            self.delete(key);
            return None;
        }
        Some(envelope.payload)
    }

    /// Remove a key if present.
    pub fn delete(&self, key: &str) {
        if let Err(e) = self.remove_raw(key) {
            tracing::warn!(key, error = %e, "cache delete failed");
        }
    }

    /// Remove every key starting with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) {
        if let Err(e) = self.invalidate_prefix_raw(prefix) {
            tracing::warn!(prefix, error = %e, "cache invalidation failed");
        }
    }

    /// Serialize `value` as JSON and store it under `key`.
    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.set(key, &bytes),
            Err(e) => tracing::warn!(key, error = %e, "cache set skipped: JSON encode failed"),
        }
    }

    /// Fetch and decode a JSON value; decode failures evict and miss.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get(key)?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "cached JSON undecodable, evicting");
                self.delete(key);
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Backend plumbing
    // -----------------------------------------------------------------------

    fn put_raw(&self, key: &str, bytes: &[u8]) -> StoreResult<()> {
        match &self.backend {
            Backend::Memory(map) => {
                map.insert(key.to_string(), bytes.to_vec());
                Ok(())
            }
            Backend::Durable(db) => {
                let txn = db.begin_write().map_err(|e| StoreError::Redb {
                    message: format!("begin_write failed: {e}"),
                })?;
                {
                    let mut table = txn.open_table(CACHE_TABLE).map_err(|e| StoreError::Redb {
                        message: format!("open_table failed: {e}"),
                    })?;
                    table.insert(key, bytes).map_err(|e| StoreError::Redb {
                        message: format!("insert failed: {e}"),
                    })?;
                }
                txn.commit().map_err(|e| StoreError::Redb {
                    message: format!("commit failed: {e}"),
                })?;
                Ok(())
            }
        }
    }

    fn get_raw(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        match &self.backend {
            Backend::Memory(map) => Ok(map.get(key).map(|v| v.value().clone())),
            Backend::Durable(db) => {
                let txn = db.begin_read().map_err(|e| StoreError::Redb {
                    message: format!("begin_read failed: {e}"),
                })?;
                let table = match txn.open_table(CACHE_TABLE) {
                    Ok(table) => table,
                    // First read before any write: the table does not exist yet.
                    Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
                    Err(e) => {
                        return Err(StoreError::Redb {
                            message: format!("open_table failed: {e}"),
                        })
                    }
                };
                let value = table.get(key).map_err(|e| StoreError::Redb {
                    message: format!("get failed: {e}"),
                })?;
                Ok(value.map(|guard| guard.value().to_vec()))
            }
        }
    }

    fn remove_raw(&self, key: &str) -> StoreResult<()> {
        match &self.backend {
            Backend::Memory(map) => {
                map.remove(key);
                Ok(())
            }
            Backend::Durable(db) => {
                let txn = db.begin_write().map_err(|e| StoreError::Redb {
                    message: format!("begin_write failed: {e}"),
                })?;
                {
                    let mut table = txn.open_table(CACHE_TABLE).map_err(|e| StoreError::Redb {
                        message: format!("open_table failed: {e}"),
                    })?;
                    table.remove(key).map_err(|e| StoreError::Redb {
                        message: format!("remove failed: {e}"),
                    })?;
                }
                txn.commit().map_err(|e| StoreError::Redb {
                    message: format!("commit failed: {e}"),
                })?;
                Ok(())
            }
        }
    }

    fn invalidate_prefix_raw(&self, prefix: &str) -> StoreResult<()> {
        match &self.backend {
            Backend::Memory(map) => {
                map.retain(|key, _| !key.starts_with(prefix));
                Ok(())
            }
            Backend::Durable(db) => {
                let txn = db.begin_write().map_err(|e| StoreError::Redb {
                    message: format!("begin_write failed: {e}"),
                })?;
                {
                    let mut table = txn.open_table(CACHE_TABLE).map_err(|e| StoreError::Redb {
                        message: format!("open_table failed: {e}"),
                    })?;
                    let doomed: Vec<String> = table
                        .iter()
                        .map_err(|e| StoreError::Redb {
                            message: format!("iter failed: {e}"),
                        })?
                        .filter_map(|entry| entry.ok())
                        .map(|(key, _)| key.value().to_string())
                        .filter(|key| key.starts_with(prefix))
                        .collect();
                    for key in doomed {
                        table.remove(key.as_str()).map_err(|e| StoreError::Redb {
                            message: format!("remove failed: {e}"),
                        })?;
                    }
                }
                txn.commit().map_err(|e| StoreError::Redb {
                    message: format!("commit failed: {e}"),
                })?;
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match self.backend {
            Backend::Durable(_) => "durable",
            Backend::Memory(_) => "memory",
        };
        f.debug_struct("CacheStore")
            .field("backend", &backend)
            .field("ttl_secs", &self.ttl_secs)
            .finish()
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn set_get_delete_in_memory() {
        let cache = CacheStore::in_memory(60);
        cache.set("grafo:job:1", b"payload");
        assert_eq!(cache.get("grafo:job:1"), Some(b"payload".to_vec()));

        cache.delete("grafo:job:1");
        assert_eq!(cache.get("grafo:job:1"), None);
    }

    #[test]
    fn durable_backend_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let cache = CacheStore::open(dir.path(), 60);
            cache.set("key", b"value");
        }
        let cache = CacheStore::open(dir.path(), 60);
        assert_eq!(cache.get("key"), Some(b"value".to_vec()));
    }

    #[test]
    fn zero_ttl_expires_immediately() {
        let cache = CacheStore::in_memory(0);
        cache.set("ephemeral", b"gone");
        assert_eq!(cache.get("ephemeral"), None);
    }

    #[test]
    fn prefix_invalidation_spares_other_keys() {
        let cache = CacheStore::in_memory(60);
        cache.set("grafo:job:1", b"a");
        cache.set("grafo:job:2", b"b");
        cache.set("other:1", b"c");

        cache.invalidate_prefix("grafo:job:");
        assert_eq!(cache.get("grafo:job:1"), None);
        assert_eq!(cache.get("grafo:job:2"), None);
        assert_eq!(cache.get("other:1"), Some(b"c".to_vec()));
    }

    #[test]
    fn json_round_trip() {
        let cache = CacheStore::in_memory(60);
        let value = serde_json::json!({"status": "completed", "progress": 1.0});
        cache.set_json("grafo:job:3", &value);
        let loaded: Option<serde_json::Value> = cache.get_json("grafo:job:3");
        assert_eq!(loaded, Some(value));
    }

    #[test]
    fn missing_key_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::open(dir.path(), 60);
        assert_eq!(cache.get("never-written"), None);
    }
}
