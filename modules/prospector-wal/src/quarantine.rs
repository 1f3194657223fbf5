use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use prospector_common::keys::QUARANTINE_DIR;
use prospector_common::tasks::sanitize_id;

use crate::error::Result;
use crate::reader::read_file;
use crate::record::WalRecord;

/// Encoded records already in each origin's file for one receipt day.
#[derive(Default)]
struct SeenDay {
    day: String,
    by_origin: HashMap<String, HashSet<String>>,
}

/// Records received from peers, kept apart from locally authored ones:
/// `{data_root}/wal-remote/{origin}/{YYYY-MM-DD}.usv`, dated by receipt.
///
/// Gossip resends freely, so each record is stored at most once per receipt
/// day. Only the current day is indexed; a resend on a later day lands in
/// that day's file, and compaction folds the copies together.
pub struct Quarantine {
    dir: PathBuf,
    seen: Mutex<SeenDay>,
}

impl Quarantine {
    pub fn new(data_root: &Path) -> Self {
        Self {
            dir: data_root.join(QUARANTINE_DIR),
            seen: Mutex::new(SeenDay::default()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn day_file(&self, origin: &str, day: &str) -> PathBuf {
        self.dir.join(sanitize_id(origin)).join(format!("{day}.usv"))
    }

    /// Store a remote record. Returns `false` if it was already stored today.
    pub async fn append(&self, record: &WalRecord) -> Result<bool> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        self.append_on(record, &today).await
    }

    async fn append_on(&self, record: &WalRecord, day: &str) -> Result<bool> {
        let line = record.encode()?;
        let mut seen = self.seen.lock().await;
        if seen.day != day {
            *seen = SeenDay {
                day: day.to_string(),
                by_origin: HashMap::new(),
            };
        }

        let path = self.day_file(&record.origin, day);
        if !seen.by_origin.contains_key(&record.origin) {
            let known = read_file(&path)
                .await?
                .records
                .iter()
                .filter_map(|r| r.encode().ok())
                .collect();
            seen.by_origin.insert(record.origin.clone(), known);
        }
        let Some(known) = seen.by_origin.get_mut(&record.origin) else {
            return Ok(false);
        };
        if known.contains(&line) {
            return Ok(false);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        known.insert(line);
        Ok(true)
    }
}
