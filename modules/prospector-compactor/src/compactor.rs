use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info, warn};

use prospector_common::shard::{grid_tile, is_canonical_coordinate};
use prospector_common::{shard, ShardStrategy, SHARD_FUNCTION_VERSION};
use prospector_storage::{Precondition, PutOutcome, Storage};

use crate::error::{CompactionError, Result};
use crate::index::{IndexSpec, Layout, MergeRule};
use crate::lock::{CompactionLock, DEFAULT_LOCK_TTL};
use crate::rows::RowSet;

/// What one compaction run did.
#[derive(Debug, Default, Clone, Serialize)]
pub struct CompactionReport {
    pub index: String,
    pub consolidated_files: usize,
    pub merged_files: usize,
    pub rows_read: usize,
    pub malformed_rows: usize,
    pub checkpoint_rows: usize,
    pub checkpoint_written: bool,
    pub deleted_files: usize,
    pub pruned_dirs: usize,
}

impl CompactionReport {
    pub fn new(index: &str) -> Self {
        Self {
            index: index.to_string(),
            ..Default::default()
        }
    }
}

impl fmt::Display for CompactionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n=== Compaction: {} ===", self.index)?;
        writeln!(f, "Consolidated files: {}", self.consolidated_files)?;
        writeln!(f, "Merged files:       {}", self.merged_files)?;
        writeln!(f, "Rows read:          {}", self.rows_read)?;
        writeln!(f, "Malformed rows:     {}", self.malformed_rows)?;
        writeln!(f, "Checkpoint rows:    {}", self.checkpoint_rows)?;
        writeln!(f, "Checkpoint written: {}", self.checkpoint_written)?;
        writeln!(f, "Deleted files:      {}", self.deleted_files)?;
        write!(f, "Pruned dirs:        {}", self.pruned_dirs)
    }
}

/// Description written next to each checkpoint.
#[derive(Debug, Serialize)]
struct CheckpointSchema<'a> {
    index: &'a str,
    columns: &'a [String],
    key: &'a str,
    merge_rule: &'a MergeRule,
    shard_strategy: ShardStrategy,
    shard_function_version: u32,
}

pub struct Compactor {
    store: Arc<dyn Storage>,
    node_id: String,
    lock_ttl: Duration,
}

impl Compactor {
    pub fn new(store: Arc<dyn Storage>, node_id: &str) -> Self {
        Self {
            store,
            node_id: node_id.to_string(),
            lock_ttl: DEFAULT_LOCK_TTL,
        }
    }

    pub fn store(&self) -> &Arc<dyn Storage> {
        &self.store
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub(crate) async fn lock(&self, key: &str) -> Result<CompactionLock> {
        CompactionLock::acquire(self.store.clone(), key, &self.node_id, self.lock_ttl).await
    }

    /// Consolidate, merge and clean up one index under its lock.
    pub async fn compact(&self, spec: &IndexSpec) -> Result<CompactionReport> {
        spec.validate()?;
        let lock = self.lock(&spec.lock_key()).await?;
        let outcome = self.run(spec).await;
        if let Err(e) = lock.release().await {
            warn!(index = spec.name.as_str(), error = %e, "Failed to release compaction lock");
        }
        outcome
    }

    async fn run(&self, spec: &IndexSpec) -> Result<CompactionReport> {
        let mut report = CompactionReport::new(&spec.name);
        if spec.layout == Layout::GeoGrid {
            self.consolidate(spec, &mut report).await?;
        }
        self.merge(spec, &mut report).await?;
        self.write_schema(spec).await?;
        report.pruned_dirs = self.store.prune(&spec.input_prefix).await?;
        info!(index = spec.name.as_str(), rows = report.checkpoint_rows, "Compaction finished");
        Ok(report)
    }

    /// Re-bucket files written at exact coordinates onto the canonical grid.
    async fn consolidate(&self, spec: &IndexSpec, report: &mut CompactionReport) -> Result<()> {
        let mut moves: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for meta in self.store.list(&spec.input_prefix).await? {
            if !meta.key.ends_with(".usv") {
                continue;
            }
            let rel = &meta.key[spec.input_prefix.len()..];
            if let Some(target) = canonical_location(rel) {
                moves
                    .entry(format!("{}{target}", spec.input_prefix))
                    .or_default()
                    .push(meta.key);
            }
        }

        let key_index = spec.key_index()?;
        let rule_index = spec.rule_index()?;
        for (target, sources) in moves {
            let mut rows = RowSet::new(spec.columns.len(), key_index, rule_index);
            let existing = self.store.get(&target).await?;
            if let Some(obj) = &existing {
                rows.absorb(&String::from_utf8_lossy(&obj.data));
            }
            for source in &sources {
                if let Some(obj) = self.store.get(source).await? {
                    let stats = rows.absorb(&String::from_utf8_lossy(&obj.data));
                    report.malformed_rows += stats.malformed;
                }
            }

            let precondition = match existing {
                Some(obj) => Precondition::MatchesVersion(obj.version),
                None => Precondition::DoesNotExist,
            };
            match self
                .store
                .put(&target, Bytes::from(rows.encode()), precondition)
                .await?
            {
                PutOutcome::Written { .. } => {}
                PutOutcome::PreconditionFailed => {
                    return Err(CompactionError::Conflict { key: target });
                }
            }
            for source in &sources {
                self.store.delete(source).await?;
                report.deleted_files += 1;
            }
            report.consolidated_files += sources.len();
            debug!(partition = target.as_str(), sources = sources.len(), "Consolidated partition");
        }
        Ok(())
    }

    /// Fold every partition file into the checkpoint, then delete them.
    async fn merge(&self, spec: &IndexSpec, report: &mut CompactionReport) -> Result<()> {
        let checkpoint_key = spec.checkpoint_key();
        let mut rows = RowSet::new(spec.columns.len(), spec.key_index()?, spec.rule_index()?);
        let existing = self.store.get(&checkpoint_key).await?;
        if let Some(obj) = &existing {
            let stats = rows.absorb(&String::from_utf8_lossy(&obj.data));
            if stats.malformed > 0 {
                warn!(key = checkpoint_key.as_str(), malformed = stats.malformed, "Dropping malformed checkpoint rows");
            }
        }

        let inputs: Vec<String> = self
            .store
            .list(&spec.input_prefix)
            .await?
            .into_iter()
            .map(|m| m.key)
            .filter(|k| k.ends_with(".usv"))
            .collect();
        if inputs.is_empty() {
            report.checkpoint_rows = rows.len();
            return Ok(());
        }

        let mut merged = Vec::new();
        for key in inputs {
            let Some(obj) = self.store.get(&key).await? else {
                continue;
            };
            let stats = rows.absorb(&String::from_utf8_lossy(&obj.data));
            if stats.malformed > 0 {
                warn!(key = key.as_str(), malformed = stats.malformed, "Skipped malformed rows");
            }
            report.rows_read += stats.read;
            report.malformed_rows += stats.malformed;
            merged.push(key);
        }

        let encoded = rows.encode();
        report.checkpoint_rows = rows.len();
        let unchanged = existing
            .as_ref()
            .is_some_and(|obj| obj.data.as_ref() == encoded.as_bytes());
        if !unchanged {
            let precondition = match existing {
                Some(obj) => Precondition::MatchesVersion(obj.version),
                None => Precondition::DoesNotExist,
            };
            match self
                .store
                .put(&checkpoint_key, Bytes::from(encoded), precondition)
                .await?
            {
                PutOutcome::Written { .. } => report.checkpoint_written = true,
                PutOutcome::PreconditionFailed => {
                    return Err(CompactionError::Conflict { key: checkpoint_key });
                }
            }
        }

        // Sources go only after the checkpoint holds their rows.
        for key in &merged {
            self.store.delete(key).await?;
            report.deleted_files += 1;
        }
        report.merged_files = merged.len();
        Ok(())
    }

    async fn write_schema(&self, spec: &IndexSpec) -> Result<()> {
        let schema = CheckpointSchema {
            index: &spec.name,
            columns: &spec.columns,
            key: &spec.key_column,
            merge_rule: &spec.merge_rule,
            shard_strategy: spec.shard_strategy,
            shard_function_version: SHARD_FUNCTION_VERSION,
        };
        let data = serde_json::to_vec_pretty(&schema)?;
        let key = spec.schema_key();
        let current = self.store.get(&key).await?;
        if current.as_ref().is_some_and(|obj| obj.data.as_ref() == data.as_slice()) {
            return Ok(());
        }
        self.store.put(&key, Bytes::from(data), Precondition::None).await?;
        Ok(())
    }
}

/// For a file at `{shard}/{lat}/{lon}/{file}` relative to the results
/// prefix, the canonical location if it differs from where it is now.
fn canonical_location(rel: &str) -> Option<String> {
    let parts: Vec<&str> = rel.split('/').collect();
    let [shard_code, lat, lon, file] = parts.as_slice() else {
        return None;
    };
    let expected_shard = |lat: &str| shard(lat, ShardStrategy::Geo);
    if is_canonical_coordinate(lat) && is_canonical_coordinate(lon) && *shard_code == expected_shard(*lat) {
        return None;
    }
    let (Ok(lat_val), Ok(lon_val)) = (lat.parse::<f64>(), lon.parse::<f64>()) else {
        warn!(path = rel, "Result file with unparseable coordinates left in place");
        return None;
    };
    let (c_lat, c_lon) = grid_tile(lat_val, lon_val);
    Some(format!("{}/{c_lat}/{c_lon}/{file}", expected_shard(&c_lat)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_coordinates_move_to_their_tile() {
        assert_eq!(
            canonical_location("4/44.98712/-93.26501/coffee.usv").as_deref(),
            Some("4/44.9/-93.3/coffee.usv")
        );
        assert_eq!(
            canonical_location("-/-33.86/151.21/cafe.usv").as_deref(),
            Some("-/-33.9/151.2/cafe.usv")
        );
    }

    #[test]
    fn canonical_files_stay_put() {
        assert_eq!(canonical_location("4/44.9/-93.3/coffee.usv"), None);
        assert_eq!(canonical_location("4/north/west/coffee.usv"), None);
        assert_eq!(canonical_location("coffee.usv"), None);
    }
}
