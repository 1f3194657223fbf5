use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::warn;

use prospector_common::usv::RECORD_SEP;

use crate::error::Result;
use crate::record::WalRecord;

#[derive(Debug, Default)]
pub struct ReadOutcome {
    pub records: Vec<WalRecord>,
    /// Records that failed to decode and were skipped.
    pub corrupt: usize,
}

impl ReadOutcome {
    fn extend(&mut self, other: ReadOutcome) {
        self.records.extend(other.records);
        self.corrupt += other.corrupt;
    }
}

/// Decode every record in a blob. Corrupt records are counted and skipped.
pub fn decode_blob(blob: &str) -> ReadOutcome {
    let mut out = ReadOutcome::default();
    for raw in blob.split(RECORD_SEP) {
        if raw.trim().is_empty() {
            continue;
        }
        match WalRecord::decode(raw) {
            Ok(record) => out.records.push(record),
            Err(_) => out.corrupt += 1,
        }
    }
    out
}

/// Read one journal file. A missing file reads as empty.
pub async fn read_file(path: &Path) -> Result<ReadOutcome> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ReadOutcome::default()),
        Err(e) => return Err(e.into()),
    };
    let outcome = decode_blob(&String::from_utf8_lossy(&bytes));
    if outcome.corrupt > 0 {
        warn!(path = %path.display(), corrupt = outcome.corrupt, "Skipped corrupt WAL records");
    }
    Ok(outcome)
}

/// Every `.usv` file below `dir`, sorted by path.
pub async fn usv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|ext| ext == "usv") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Read every journal file under `dir`.
pub async fn read_tree(dir: &Path) -> Result<ReadOutcome> {
    let mut out = ReadOutcome::default();
    for file in usv_files(dir).await? {
        out.extend(read_file(&file).await?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_records_do_not_block_later_ones() {
        let good_a = WalRecord::new("n1", "acme", "phone", "1").encode().unwrap();
        let good_b = WalRecord::new("n1", "acme", "email", "a@b").encode().unwrap();
        let blob = format!("{good_a}garbage\u{1e}\n{good_b}");
        let out = decode_blob(&blob);
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.corrupt, 1);
    }

    #[tokio::test]
    async fn missing_tree_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let out = read_tree(&dir.path().join("nope")).await.unwrap();
        assert!(out.records.is_empty());
    }
}
