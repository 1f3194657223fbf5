use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use prospector_common::keys::WAL_DIR;
use prospector_common::tasks::sanitize_id;

use crate::error::{Result, WalError};
use crate::record::WalRecord;

/// Append-only journal of this node's own field changes, one file per day:
/// `{data_root}/wal/{node}/{YYYY-MM-DD}.usv`.
pub struct WalJournal {
    dir: PathBuf,
    node_id: String,
    write_lock: Mutex<()>,
}

impl WalJournal {
    pub fn new(data_root: &Path, node_id: &str) -> Self {
        Self {
            dir: data_root.join(WAL_DIR).join(sanitize_id(node_id)),
            node_id: node_id.to_string(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for_day(&self, day: &str) -> PathBuf {
        self.dir.join(format!("{day}.usv"))
    }

    /// Record a field change made on this node.
    pub async fn append(&self, target: &str, field: &str, value: &str) -> Result<WalRecord> {
        let record = WalRecord::new(&self.node_id, target, field, value);
        self.append_record(&record).await?;
        Ok(record)
    }

    pub async fn append_record(&self, record: &WalRecord) -> Result<()> {
        if record.origin != self.node_id {
            return Err(WalError::ForeignOrigin {
                origin: record.origin.clone(),
                node: self.node_id.clone(),
            });
        }
        let line = record.encode()?;
        let path = self.path_for_day(record.day());

        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&self.dir).await?;
        let mut file = OpenOptions::new().create(true).append(true).open(&path).await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!(entity = %record.target, field = %record.field, "Appended WAL record");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_tree;

    #[tokio::test]
    async fn appends_land_in_day_file() {
        let dir = tempfile::tempdir().unwrap();
        let journal = WalJournal::new(dir.path(), "node-a");
        let first = journal.append("acme", "phone", "555-0100").await.unwrap();
        journal.append("acme", "email", "hi@acme.com").await.unwrap();

        let path = journal.path_for_day(first.day());
        assert!(path.starts_with(dir.path().join("wal").join("node-a")));

        let out = read_tree(journal.dir()).await.unwrap();
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].field, "phone");
        assert_eq!(out.records[1].field, "email");
    }

    #[tokio::test]
    async fn foreign_records_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let journal = WalJournal::new(dir.path(), "node-a");
        let foreign = WalRecord::new("node-b", "acme", "phone", "1");
        assert!(matches!(
            journal.append_record(&foreign).await,
            Err(WalError::ForeignOrigin { .. })
        ));
    }
}
