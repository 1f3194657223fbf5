//! Compaction of the node-local WAL into the field-state checkpoint.
//!
//! Closed day files (every day before today) from the local journal and
//! from quarantine are folded into one last-write-wins checkpoint and then
//! deleted. Today's files are still being appended to and tailed by gossip,
//! so they are left alone. This is the only way WAL files are ever removed.

use bytes::Bytes;
use tracing::{info, warn};

use prospector_common::keys::{QUARANTINE_DIR, WAL_DIR};
use prospector_storage::{Precondition, PutOutcome};
use prospector_wal::{decode_blob, MergedView, STATE_CHECKPOINT_KEY};

use crate::compactor::{CompactionReport, Compactor};
use crate::error::{CompactionError, Result};

pub const FIELD_STATE_INDEX: &str = "field-state";
const FIELD_STATE_LOCK: &str = "indexes/field-state/compact.lock";

/// The day a journal file covers, from its `YYYY-MM-DD.usv` name.
fn day_of(key: &str) -> Option<&str> {
    let name = key.rsplit('/').next()?;
    let day = name.strip_suffix(".usv")?;
    chrono::NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()?;
    Some(day)
}

impl Compactor {
    /// Fold WAL day files older than `today` (`YYYY-MM-DD`) into the
    /// field-state checkpoint. The store must be rooted at the node's data
    /// root.
    pub async fn compact_field_state(&self, today: &str) -> Result<CompactionReport> {
        let lock = self.lock(FIELD_STATE_LOCK).await?;
        let outcome = self.fold_closed_days(today).await;
        if let Err(e) = lock.release().await {
            warn!(error = %e, "Failed to release field-state lock");
        }
        outcome
    }

    async fn fold_closed_days(&self, today: &str) -> Result<CompactionReport> {
        let store = self.store();
        let mut report = CompactionReport::new(FIELD_STATE_INDEX);

        let mut closed = Vec::new();
        for dir in [WAL_DIR, QUARANTINE_DIR] {
            for meta in store.list(&format!("{dir}/")).await? {
                if day_of(&meta.key).is_some_and(|day| day < today) {
                    closed.push(meta.key);
                }
            }
        }

        let mut view = MergedView::new();
        let existing = store.get(STATE_CHECKPOINT_KEY).await?;
        if let Some(obj) = &existing {
            let malformed = view.apply_checkpoint(&String::from_utf8_lossy(&obj.data));
            if malformed > 0 {
                warn!(malformed, "Dropping malformed field-state rows");
            }
        }
        if closed.is_empty() {
            report.checkpoint_rows = view.entities().map(|(_, f)| f.len()).sum();
            return Ok(report);
        }

        for key in &closed {
            let Some(obj) = store.get(key).await? else {
                continue;
            };
            let outcome = decode_blob(&String::from_utf8_lossy(&obj.data));
            if outcome.corrupt > 0 {
                warn!(key = key.as_str(), corrupt = outcome.corrupt, "Skipped corrupt WAL records");
            }
            report.rows_read += outcome.records.len();
            report.malformed_rows += outcome.corrupt;
            for record in &outcome.records {
                view.apply(record);
            }
        }

        let encoded = view.to_checkpoint();
        report.checkpoint_rows = view.entities().map(|(_, f)| f.len()).sum();
        let unchanged = existing
            .as_ref()
            .is_some_and(|obj| obj.data.as_ref() == encoded.as_bytes());
        if !unchanged {
            let precondition = match existing {
                Some(obj) => Precondition::MatchesVersion(obj.version),
                None => Precondition::DoesNotExist,
            };
            match store
                .put(STATE_CHECKPOINT_KEY, Bytes::from(encoded), precondition)
                .await?
            {
                PutOutcome::Written { .. } => report.checkpoint_written = true,
                PutOutcome::PreconditionFailed => {
                    return Err(CompactionError::Conflict {
                        key: STATE_CHECKPOINT_KEY.to_string(),
                    });
                }
            }
        }

        for key in &closed {
            store.delete(key).await?;
            report.deleted_files += 1;
        }
        report.merged_files = closed.len();
        for dir in [WAL_DIR, QUARANTINE_DIR] {
            report.pruned_dirs += store.prune(dir).await?;
        }
        info!(
            files = report.merged_files,
            fields = report.checkpoint_rows,
            "Folded closed WAL days into field state"
        );
        Ok(report)
    }
}
