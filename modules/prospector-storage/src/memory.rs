use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Result, StorageError};
use crate::{validate_key, Object, ObjectMeta, Precondition, PutOutcome, Storage};

/// In-memory store for tests. Versions are a global write counter.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    objects: BTreeMap<String, (Bytes, u64)>,
    next_version: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|_| StorageError::Remote("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl Storage for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Object>> {
        validate_key(key)?;
        let inner = self.lock()?;
        Ok(inner.objects.get(key).map(|(data, version)| Object {
            data: data.clone(),
            version: version.to_string(),
        }))
    }

    async fn put(&self, key: &str, data: Bytes, precondition: Precondition) -> Result<PutOutcome> {
        validate_key(key)?;
        let mut inner = self.lock()?;
        let current = inner.objects.get(key).map(|(_, v)| v.to_string());
        let allowed = match (&precondition, &current) {
            (Precondition::None, _) => true,
            (Precondition::DoesNotExist, None) => true,
            (Precondition::DoesNotExist, Some(_)) => false,
            (Precondition::MatchesVersion(want), Some(have)) => want == have,
            (Precondition::MatchesVersion(_), None) => false,
        };
        if !allowed {
            return Ok(PutOutcome::PreconditionFailed);
        }
        inner.next_version += 1;
        let version = inner.next_version;
        inner.objects.insert(key.to_string(), (data, version));
        Ok(PutOutcome::Written {
            version: version.to_string(),
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.lock()?.objects.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let inner = self.lock()?;
        Ok(inner
            .objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, (data, _))| ObjectMeta {
                key: k.clone(),
                size: data.len() as u64,
            })
            .collect())
    }
}
