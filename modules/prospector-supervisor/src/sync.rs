//! Periodic upload of the node's local index files and the campaign report.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use prospector_common::{keys, QueueName};
use prospector_queue::{DurableQueue, QueueStats};
use prospector_storage::{put_json, Precondition, Storage};

use crate::error::Result;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub uploaded: usize,
    pub unchanged: usize,
}

impl fmt::Display for SyncStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uploaded={} unchanged={}", self.uploaded, self.unchanged)
    }
}

/// Mirrors `{data_root}/indexes/` to `campaigns/{c}/nodes/{node}/indexes/`.
/// A file is uploaded when the remote copy is missing or a different size.
pub struct IndexSync {
    store: Arc<dyn Storage>,
    local_root: PathBuf,
    remote_prefix: String,
}

impl IndexSync {
    pub fn new(store: Arc<dyn Storage>, data_root: &Path, campaign: &str, node_id: &str) -> Self {
        Self {
            store,
            local_root: data_root.join("indexes"),
            remote_prefix: keys::node_indexes_prefix(campaign, node_id),
        }
    }

    pub async fn run(&self) -> Result<SyncStats> {
        let mut stats = SyncStats::default();
        let local = local_files(&self.local_root).await?;
        if local.is_empty() {
            return Ok(stats);
        }
        let remote: HashMap<String, u64> = self
            .store
            .list(&self.remote_prefix)
            .await?
            .into_iter()
            .map(|m| (m.key, m.size))
            .collect();

        for (rel, size) in local {
            let key = format!("{}{rel}", self.remote_prefix);
            if remote.get(&key) == Some(&size) {
                stats.unchanged += 1;
                continue;
            }
            let data = tokio::fs::read(self.local_root.join(&rel)).await?;
            self.store.put(&key, Bytes::from(data), Precondition::None).await?;
            debug!(key = key.as_str(), size, "Uploaded index file");
            stats.uploaded += 1;
        }
        info!(%stats, "Index sync finished");
        Ok(stats)
    }
}

/// `(relative path, size)` of every regular file under `root`, skipping
/// lock and temp files. A missing root is empty.
async fn local_files(root: &Path) -> Result<Vec<(String, u64)>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let meta = entry.metadata().await?;
            if meta.is_dir() {
                stack.push(path);
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".lock") || name.ends_with(".tmp") || name.starts_with('.') {
                continue;
            }
            let Ok(rel) = path.strip_prefix(root) else {
                continue;
            };
            let rel: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect();
            out.push((rel.join("/"), meta.len()));
        }
    }
    out.sort();
    Ok(out)
}

/// `reports/{campaign}.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignReport {
    pub campaign: String,
    pub generated_by: String,
    pub generated_at: DateTime<Utc>,
    pub queues: BTreeMap<String, QueueStats>,
}

/// Collect queue stats and overwrite the campaign report. A queue whose
/// stats cannot be read is left out.
pub async fn write_report(
    store: &dyn Storage,
    campaign: &str,
    node_id: &str,
    queues: &BTreeMap<QueueName, Arc<dyn DurableQueue>>,
) -> Result<CampaignReport> {
    let mut report = CampaignReport {
        campaign: campaign.to_string(),
        generated_by: node_id.to_string(),
        generated_at: Utc::now(),
        queues: BTreeMap::new(),
    };
    for (name, queue) in queues {
        match queue.stats().await {
            Ok(stats) => {
                info!(queue = %name, %stats, "Queue stats");
                report.queues.insert(name.to_string(), stats);
            }
            Err(e) => warn!(queue = %name, error = %e, "Failed to read queue stats"),
        }
    }
    put_json(store, &keys::report_key(campaign), &report, Precondition::None).await?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prospector_storage::MemoryStore;

    #[tokio::test]
    async fn only_new_or_resized_files_are_uploaded() {
        let dir = tempfile::tempdir().unwrap();
        let indexes = dir.path().join("indexes").join("field-state");
        std::fs::create_dir_all(&indexes).unwrap();
        std::fs::write(indexes.join("checkpoint.usv"), "a").unwrap();
        std::fs::write(indexes.join("compact.lock"), "{}").unwrap();

        let store: Arc<dyn Storage> = Arc::new(MemoryStore::new());
        let sync = IndexSync::new(store.clone(), dir.path(), "mpls", "node-a");

        let first = sync.run().await.unwrap();
        assert_eq!(first, SyncStats { uploaded: 1, unchanged: 0 });
        let key = "campaigns/mpls/nodes/node-a/indexes/field-state/checkpoint.usv";
        assert!(store.get(key).await.unwrap().is_some());

        let again = sync.run().await.unwrap();
        assert_eq!(again, SyncStats { uploaded: 0, unchanged: 1 });

        std::fs::write(indexes.join("checkpoint.usv"), "abc").unwrap();
        let resized = sync.run().await.unwrap();
        assert_eq!(resized.uploaded, 1);
        assert_eq!(&store.get(key).await.unwrap().unwrap().data[..], b"abc");
    }

    #[tokio::test]
    async fn missing_index_dir_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn Storage> = Arc::new(MemoryStore::new());
        let sync = IndexSync::new(store, dir.path(), "mpls", "node-a");
        assert_eq!(sync.run().await.unwrap(), SyncStats::default());
    }
}
