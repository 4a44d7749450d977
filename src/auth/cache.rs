//! Persisted storage for fetched signing-key batches.
//!
//! A batch is valid as a unit: one timestamp covers every key in it, and a
//! refresh replaces the whole batch rather than patching entries. The
//! store is injected into the resolver so tests can run against memory and
//! deployments can point the file wherever they like.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A fetched set of raw JWKs keyed by kid, stamped as a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyBatch {
    /// Unix timestamp (seconds) of the fetch that produced this batch.
    pub timestamp: f64,
    /// Raw JWK objects keyed by kid.
    pub keys: HashMap<String, serde_json::Value>,
}

impl KeyBatch {
    /// Stamp a freshly fetched key set with the current time.
    pub fn new(keys: HashMap<String, serde_json::Value>) -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
            keys,
        }
    }

    /// Whether the whole batch is still within its time-to-live.
    pub fn is_fresh(&self, ttl_secs: u64) -> bool {
        let age = Utc::now().timestamp_millis() as f64 / 1000.0 - self.timestamp;
        age < ttl_secs as f64
    }
}

/// Storage backing for the key cache.
///
/// `load` errors are reported to the caller so it can treat them as a
/// cache miss; they are never surfaced to a client.
pub trait JwksCacheStore: Send + Sync {
    fn load(&self) -> Result<Option<KeyBatch>>;
    fn save(&self, batch: &KeyBatch) -> Result<()>;
}

/// File-backed cache store.
///
/// On-disk format: `{"timestamp": <unix seconds>, "keys": {kid: jwk}}`.
/// Concurrent refreshes may race on the file; both writers hold equally
/// fresh data, so last-writer-wins needs no locking.
pub struct FileCacheStore {
    path: PathBuf,
}

impl FileCacheStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl JwksCacheStore for FileCacheStore {
    fn load(&self) -> Result<Option<KeyBatch>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read key cache: {:?}", self.path))?;
        let batch = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse key cache: {:?}", self.path))?;
        Ok(Some(batch))
    }

    fn save(&self, batch: &KeyBatch) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {:?}", parent))?;
            }
        }
        let data = serde_json::to_string(batch).context("Failed to serialize key cache")?;
        fs::write(&self.path, data)
            .with_context(|| format!("Failed to write key cache: {:?}", self.path))?;
        Ok(())
    }
}

/// In-memory cache store for tests.
#[derive(Default)]
pub struct MemoryCacheStore {
    inner: RwLock<Option<KeyBatch>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JwksCacheStore for MemoryCacheStore {
    fn load(&self) -> Result<Option<KeyBatch>> {
        let guard = self
            .inner
            .read()
            .map_err(|_| anyhow::anyhow!("Cache lock poisoned"))?;
        Ok(guard.clone())
    }

    fn save(&self, batch: &KeyBatch) -> Result<()> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| anyhow::anyhow!("Cache lock poisoned"))?;
        *guard = Some(batch.clone());
        Ok(())
    }
}
