//! Keyed object storage shared by every node.
//!
//! Queues, checkpoints and status documents are all plain objects addressed
//! by `/`-separated keys. Coordination relies on exactly two conditional
//! writes: create-if-absent and compare-and-swap on an opaque version token.

pub mod error;
pub mod local;
pub mod memory;
pub mod s3;

pub use error::{Result, StorageError};
pub use local::LocalStore;
pub use memory::MemoryStore;
pub use s3::S3Store;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use prospector_common::{Config, StorageMode};

/// Condition a write must satisfy to take effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    None,
    DoesNotExist,
    MatchesVersion(String),
}

/// A failed precondition is an expected outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    Written { version: String },
    PreconditionFailed,
}

impl PutOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Object {
    pub data: Bytes,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
}

#[async_trait]
pub trait Storage: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// `None` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Object>>;

    async fn put(&self, key: &str, data: Bytes, precondition: Precondition) -> Result<PutOutcome>;

    /// Succeeds when the key is already gone.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Every object whose key starts with `prefix`, sorted by key.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Remove directories left empty under `prefix`. Returns how many were
    /// removed. Object stores have no directories.
    async fn prune(&self, _prefix: &str) -> Result<usize> {
        Ok(0)
    }
}

/// Read and decode a JSON object, returning its version alongside.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn Storage,
    key: &str,
) -> Result<Option<(T, String)>> {
    match store.get(key).await? {
        None => Ok(None),
        Some(obj) => {
            let value = serde_json::from_slice(&obj.data).map_err(|e| StorageError::Corrupt {
                key: key.to_string(),
                message: e.to_string(),
            })?;
            Ok(Some((value, obj.version)))
        }
    }
}

pub async fn put_json<T: Serialize>(
    store: &dyn Storage,
    key: &str,
    value: &T,
    precondition: Precondition,
) -> Result<PutOutcome> {
    let data = serde_json::to_vec_pretty(value).map_err(|e| StorageError::Corrupt {
        key: key.to_string(),
        message: e.to_string(),
    })?;
    store.put(key, Bytes::from(data), precondition).await
}

/// Build the shared store described by the configuration.
pub fn from_config(config: &Config) -> Result<Arc<dyn Storage>> {
    match &config.storage {
        StorageMode::Local => Ok(Arc::new(LocalStore::new(&config.data_root))),
        StorageMode::S3 {
            bucket,
            region,
            endpoint,
        } => Ok(Arc::new(S3Store::new(bucket, region, endpoint.as_deref())?)),
    }
}

/// Keys may not escape the store root or contain empty segments.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty()
        || key.starts_with('/')
        || key.ends_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
