use std::collections::BTreeMap;
use std::path::Path;

use prospector_common::keys::{QUARANTINE_DIR, WAL_DIR};
use prospector_common::usv::{join_fields, split_fields, split_records, RECORD_SEP};

use crate::error::Result;
use crate::reader::read_tree;
use crate::record::WalRecord;
use crate::STATE_CHECKPOINT_KEY;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldValue {
    pub value: String,
    pub timestamp: String,
    pub origin: String,
}

impl FieldValue {
    /// Later timestamp wins. Equal timestamps fall back to origin, then
    /// value, so every node picks the same winner.
    fn beats(&self, other: &FieldValue) -> bool {
        (&self.timestamp, &self.origin, &self.value) > (&other.timestamp, &other.origin, &other.value)
    }
}

/// Field-granularity last-write-wins view over any set of WAL records.
/// Applying records in any order yields the same view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedView {
    entities: BTreeMap<String, BTreeMap<String, FieldValue>>,
}

impl MergedView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a WalRecord>) -> Self {
        let mut view = Self::new();
        for r in records {
            view.apply(r);
        }
        view
    }

    /// Returns `true` if the record changed the view.
    pub fn apply(&mut self, record: &WalRecord) -> bool {
        let candidate = FieldValue {
            value: record.value.clone(),
            timestamp: record.timestamp.clone(),
            origin: record.origin.clone(),
        };
        let fields = self.entities.entry(record.target.clone()).or_default();
        match fields.get(&record.field) {
            Some(current) if !candidate.beats(current) => false,
            _ => {
                fields.insert(record.field.clone(), candidate);
                true
            }
        }
    }

    pub fn get(&self, target: &str, field: &str) -> Option<&FieldValue> {
        self.entities.get(target)?.get(field)
    }

    pub fn entity(&self, target: &str) -> Option<&BTreeMap<String, FieldValue>> {
        self.entities.get(target)
    }

    pub fn entities(&self) -> impl Iterator<Item = (&String, &BTreeMap<String, FieldValue>)> {
        self.entities.iter()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Fold checkpoint rows (`target, field, value, timestamp, origin`) into
    /// the view. Returns how many rows were malformed and skipped.
    pub fn apply_checkpoint(&mut self, blob: &str) -> usize {
        let mut malformed = 0;
        for row in split_records(blob) {
            let cols = split_fields(row);
            if cols.len() != 5 || cols[0].is_empty() || cols[1].is_empty() {
                malformed += 1;
                continue;
            }
            self.apply(&WalRecord {
                timestamp: cols[3].to_string(),
                origin: cols[4].to_string(),
                target: cols[0].to_string(),
                field: cols[1].to_string(),
                value: cols[2].to_string(),
                causality: String::new(),
            });
        }
        malformed
    }

    /// Checkpoint encoding of the whole view, ordered by entity then field
    /// so equal views encode to identical bytes.
    pub fn to_checkpoint(&self) -> String {
        let mut out = String::new();
        for (target, fields) in &self.entities {
            for (field, fv) in fields {
                out.push_str(&join_fields(&[
                    target.as_str(),
                    field.as_str(),
                    fv.value.as_str(),
                    fv.timestamp.as_str(),
                    fv.origin.as_str(),
                ]));
                out.push(RECORD_SEP);
            }
        }
        out
    }
}

/// Fold the field-state checkpoint, local journals and quarantined remote
/// records under `data_root` into one view.
pub async fn load_view(data_root: &Path) -> Result<MergedView> {
    let mut view = MergedView::new();

    let checkpoint = data_root.join(STATE_CHECKPOINT_KEY);
    if let Ok(blob) = tokio::fs::read_to_string(&checkpoint).await {
        view.apply_checkpoint(&blob);
    }

    for dir in [WAL_DIR, QUARANTINE_DIR] {
        for record in read_tree(&data_root.join(dir)).await?.records {
            view.apply(&record);
        }
    }
    Ok(view)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ts: &str, origin: &str, field: &str, value: &str) -> WalRecord {
        WalRecord {
            timestamp: ts.to_string(),
            origin: origin.to_string(),
            target: "acme".to_string(),
            field: field.to_string(),
            value: value.to_string(),
            causality: String::new(),
        }
    }

    #[test]
    fn later_timestamp_wins_regardless_of_arrival_order() {
        let early = record("2025-01-01T10:00:00.000000Z", "node-a", "phone", "555-0100");
        let late = record("2025-01-01T10:05:00.000000Z", "node-b", "phone", "555-0199");

        let forward = MergedView::from_records([&early, &late]);
        let backward = MergedView::from_records([&late, &early]);
        assert_eq!(forward, backward);
        assert_eq!(forward.get("acme", "phone").unwrap().value, "555-0199");
    }

    #[test]
    fn fields_merge_independently() {
        let phone = record("2025-01-01T10:05:00.000000Z", "node-b", "phone", "555");
        let email = record("2025-01-01T09:00:00.000000Z", "node-a", "email", "a@acme.com");
        let view = MergedView::from_records([&phone, &email]);
        assert_eq!(view.entity("acme").unwrap().len(), 2);
    }

    #[test]
    fn equal_timestamps_resolve_identically_everywhere() {
        let a = record("2025-01-01T10:00:00.000000Z", "node-a", "phone", "1");
        let b = record("2025-01-01T10:00:00.000000Z", "node-b", "phone", "2");
        let one = MergedView::from_records([&a, &b]);
        let two = MergedView::from_records([&b, &a]);
        assert_eq!(one, two);
        assert_eq!(one.get("acme", "phone").unwrap().origin, "node-b");
    }

    #[test]
    fn checkpoint_encoding_reloads_to_the_same_view() {
        let a = record("2025-01-01T10:00:00.000000Z", "node-a", "phone", "1");
        let b = record("2025-01-02T10:00:00.000000Z", "node-b", "email", "b@acme.com");
        let view = MergedView::from_records([&a, &b]);

        let blob = view.to_checkpoint();
        let mut reloaded = MergedView::new();
        assert_eq!(reloaded.apply_checkpoint(&blob), 0);
        assert_eq!(reloaded, view);
        assert_eq!(reloaded.to_checkpoint(), blob);

        assert_eq!(reloaded.apply_checkpoint("only\u{1f}two"), 1);
    }

    #[test]
    fn reapplying_is_a_no_op() {
        let a = record("2025-01-01T10:00:00.000000Z", "node-a", "phone", "1");
        let mut view = MergedView::new();
        assert!(view.apply(&a));
        assert!(!view.apply(&a));
    }
}
