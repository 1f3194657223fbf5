use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use prospector_storage::{Precondition, PutOutcome, Storage};

use crate::error::{CompactionError, Result};

/// A compaction holding the lock longer than this is presumed dead.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockBody {
    run_id: String,
    holder: String,
    created_at: DateTime<Utc>,
}

/// Exclusive claim on one index for the duration of a compaction run.
/// Must be released explicitly; an abandoned lock expires after its TTL.
pub struct CompactionLock {
    store: Arc<dyn Storage>,
    key: String,
    run_id: String,
}

impl CompactionLock {
    pub async fn acquire(
        store: Arc<dyn Storage>,
        key: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<Self> {
        let body = LockBody {
            run_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            created_at: Utc::now(),
        };
        let data = Bytes::from(serde_json::to_vec(&body)?);

        let outcome = store.put(key, data.clone(), Precondition::DoesNotExist).await?;
        if outcome.is_written() {
            return Ok(Self::held(store, key, body));
        }

        let Some(current) = store.get(key).await? else {
            // Released between our attempt and the read: one more try.
            return match store.put(key, data, Precondition::DoesNotExist).await? {
                PutOutcome::Written { .. } => Ok(Self::held(store, key, body)),
                PutOutcome::PreconditionFailed => Err(locked(key, "unknown", "just now")),
            };
        };

        let existing: Option<LockBody> = serde_json::from_slice(&current.data).ok();
        let stale = match &existing {
            Some(lock) => {
                let age = Utc::now().signed_duration_since(lock.created_at);
                age.to_std().map(|age| age > ttl).unwrap_or(false)
            }
            None => true,
        };
        if !stale {
            let (holder, since) = existing
                .map(|l| (l.holder, l.created_at.to_rfc3339()))
                .unwrap_or_default();
            return Err(locked(key, &holder, &since));
        }

        match store
            .put(key, data, Precondition::MatchesVersion(current.version))
            .await?
        {
            PutOutcome::Written { .. } => {
                warn!(
                    key,
                    previous = existing.as_ref().map(|l| l.holder.as_str()).unwrap_or("corrupt"),
                    "Reclaimed stale compaction lock"
                );
                Ok(Self::held(store, key, body))
            }
            PutOutcome::PreconditionFailed => Err(locked(key, "another reclaimer", "just now")),
        }
    }

    fn held(store: Arc<dyn Storage>, key: &str, body: LockBody) -> Self {
        info!(key, run_id = body.run_id.as_str(), "Acquired compaction lock");
        Self {
            store,
            key: key.to_string(),
            run_id: body.run_id,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Delete the lock if it is still ours.
    pub async fn release(self) -> Result<()> {
        if let Some(current) = self.store.get(&self.key).await? {
            let ours = serde_json::from_slice::<LockBody>(&current.data)
                .map(|l| l.run_id == self.run_id)
                .unwrap_or(false);
            if ours {
                self.store.delete(&self.key).await?;
            } else {
                warn!(key = self.key.as_str(), "Compaction lock was taken over before release");
            }
        }
        Ok(())
    }
}

fn locked(key: &str, holder: &str, since: &str) -> CompactionError {
    CompactionError::Locked {
        index: key.to_string(),
        holder: holder.to_string(),
        since: since.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prospector_storage::MemoryStore;

    const KEY: &str = "campaigns/mpls/indexes/google-maps-prospects/compact.lock";

    #[tokio::test]
    async fn second_holder_is_refused_until_release() {
        let store: Arc<dyn Storage> = Arc::new(MemoryStore::new());
        let first = CompactionLock::acquire(store.clone(), KEY, "node-a", DEFAULT_LOCK_TTL)
            .await
            .unwrap();

        match CompactionLock::acquire(store.clone(), KEY, "node-b", DEFAULT_LOCK_TTL).await {
            Err(CompactionError::Locked { holder, .. }) => assert_eq!(holder, "node-a"),
            Err(e) => panic!("expected Locked, got {e}"),
            Ok(_) => panic!("expected Locked, got the lock"),
        }

        first.release().await.unwrap();
        let second = CompactionLock::acquire(store.clone(), KEY, "node-b", DEFAULT_LOCK_TTL)
            .await
            .unwrap();
        second.release().await.unwrap();
        assert!(store.get(KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_and_corrupt_locks_are_reclaimed() {
        let store: Arc<dyn Storage> = Arc::new(MemoryStore::new());
        let crashed = CompactionLock::acquire(store.clone(), KEY, "node-a", Duration::ZERO)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let taker = CompactionLock::acquire(store.clone(), KEY, "node-b", Duration::ZERO)
            .await
            .unwrap();
        // The crashed holder must not delete the new holder's lock.
        crashed.release().await.unwrap();
        assert!(store.get(KEY).await.unwrap().is_some());
        taker.release().await.unwrap();

        store
            .put(KEY, Bytes::from_static(b"garbage"), Precondition::None)
            .await
            .unwrap();
        let lock = CompactionLock::acquire(store.clone(), KEY, "node-c", DEFAULT_LOCK_TTL)
            .await
            .unwrap();
        assert!(!lock.run_id().is_empty());
    }
}
