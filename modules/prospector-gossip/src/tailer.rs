use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::warn;

use prospector_common::usv::RECORD_SEP;
use prospector_wal::reader::usv_files;
use prospector_wal::{decode_blob, MergedView, WalRecord};

use crate::error::Result;

/// Follows this node's journal directory, remembering how far into each
/// file it has read. Only complete records (terminated by the record
/// separator) are consumed, so a half-written tail is picked up next time.
///
/// Closed days are removed from the journal once compaction folds them into
/// the field-state checkpoint. With a checkpoint attached, the first scan
/// and every scan after a reset also yield this node's own checkpoint rows,
/// so rotated records keep reaching peers that missed them.
pub struct WalTailer {
    dir: PathBuf,
    offsets: HashMap<PathBuf, u64>,
    checkpoint: Option<(PathBuf, String)>,
    replay_checkpoint: bool,
}

impl WalTailer {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            offsets: HashMap::new(),
            checkpoint: None,
            replay_checkpoint: true,
        }
    }

    /// Replay rows of the checkpoint at `path` written by `origin`.
    pub fn with_checkpoint(mut self, path: &Path, origin: &str) -> Self {
        self.checkpoint = Some((path.to_path_buf(), origin.to_string()));
        self
    }

    /// Forget all offsets so the next scan yields every record again.
    pub fn reset(&mut self) {
        self.offsets.clear();
        self.replay_checkpoint = true;
    }

    /// Records appended since the previous scan.
    pub async fn scan(&mut self) -> Result<Vec<WalRecord>> {
        let files = usv_files(&self.dir).await?;
        self.offsets.retain(|path, _| files.contains(path));

        let mut records = Vec::new();
        if std::mem::take(&mut self.replay_checkpoint) {
            if let Some((path, origin)) = &self.checkpoint {
                records.extend(checkpoint_records(path, origin).await?);
            }
        }
        for path in files {
            let offset = self.offsets.get(&path).copied().unwrap_or(0);
            let (fresh, consumed) = read_from(&path, offset).await?;
            records.extend(fresh);
            self.offsets.insert(path, consumed);
        }
        Ok(records)
    }
}

/// This node's rows of the field-state checkpoint, as records. A missing
/// checkpoint yields nothing.
async fn checkpoint_records(path: &Path, origin: &str) -> Result<Vec<WalRecord>> {
    let blob = match fs::read_to_string(path).await {
        Ok(blob) => blob,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut view = MergedView::new();
    let malformed = view.apply_checkpoint(&blob);
    if malformed > 0 {
        warn!(path = %path.display(), malformed, "Skipped malformed checkpoint rows");
    }
    Ok(view
        .entities()
        .flat_map(|(target, fields)| {
            fields.iter().map(move |(field, fv)| WalRecord {
                timestamp: fv.timestamp.clone(),
                origin: fv.origin.clone(),
                target: target.clone(),
                field: field.clone(),
                value: fv.value.clone(),
                causality: String::new(),
            })
        })
        .filter(|record| record.origin == origin)
        .collect())
}

/// Decode complete records after `offset`. Returns the records and the new
/// offset.
async fn read_from(path: &Path, offset: u64) -> Result<(Vec<WalRecord>, u64)> {
    let len = fs::metadata(path).await?.len();
    // Truncated or rotated underneath us: start over.
    let offset = if len < offset { 0 } else { offset };
    if len == offset {
        return Ok((Vec::new(), offset));
    }

    let mut file = fs::File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).await?;

    let sep = RECORD_SEP as u8;
    let Some(last) = buf.iter().rposition(|b| *b == sep) else {
        return Ok((Vec::new(), offset));
    };
    let complete = &buf[..=last];
    let outcome = decode_blob(&String::from_utf8_lossy(complete));
    if outcome.corrupt > 0 {
        warn!(path = %path.display(), corrupt = outcome.corrupt, "Skipped corrupt WAL records while tailing");
    }
    Ok((outcome.records, offset + complete.len() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use prospector_wal::WalJournal;

    #[tokio::test]
    async fn yields_each_record_once_until_reset() {
        let root = tempfile::tempdir().unwrap();
        let journal = WalJournal::new(root.path(), "node-a");
        let mut tailer = WalTailer::new(journal.dir());

        assert!(tailer.scan().await.unwrap().is_empty());

        journal.append("acme", "phone", "1").await.unwrap();
        journal.append("acme", "email", "a@acme.com").await.unwrap();
        assert_eq!(tailer.scan().await.unwrap().len(), 2);
        assert!(tailer.scan().await.unwrap().is_empty());

        journal.append("acme", "phone", "2").await.unwrap();
        let fresh = tailer.scan().await.unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].value, "2");

        tailer.reset();
        assert_eq!(tailer.scan().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn own_checkpoint_rows_are_replayed_after_reset() {
        let root = tempfile::tempdir().unwrap();
        let journal = WalJournal::new(root.path(), "node-a");
        let checkpoint = root.path().join("indexes").join("field-state").join("checkpoint.usv");
        std::fs::create_dir_all(checkpoint.parent().unwrap()).unwrap();
        let view = MergedView::from_records([
            &WalRecord::new("node-a", "acme", "phone", "555-0100"),
            &WalRecord::new("node-b", "acme", "email", "b@acme.com"),
        ]);
        std::fs::write(&checkpoint, view.to_checkpoint()).unwrap();

        let mut tailer = WalTailer::new(journal.dir()).with_checkpoint(&checkpoint, "node-a");
        let first = tailer.scan().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!((first[0].origin.as_str(), first[0].value.as_str()), ("node-a", "555-0100"));
        assert!(tailer.scan().await.unwrap().is_empty());

        tailer.reset();
        assert_eq!(tailer.scan().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn partial_trailing_record_waits_for_completion() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("wal").join("node-a");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("2025-03-01.usv");

        let full = WalRecord::new("node-a", "acme", "phone", "1").encode().unwrap();
        let next = WalRecord::new("node-a", "acme", "phone", "2").encode().unwrap();
        let (head, tail) = next.split_at(10);
        std::fs::write(&path, format!("{full}{head}")).unwrap();

        let mut tailer = WalTailer::new(&dir);
        assert_eq!(tailer.scan().await.unwrap().len(), 1);

        std::fs::write(&path, format!("{full}{head}{tail}")).unwrap();
        let fresh = tailer.scan().await.unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].value, "2");
    }
}
