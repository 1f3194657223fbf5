use std::collections::BTreeMap;

use prospector_common::usv::{join_fields, split_fields, split_records, RECORD_SEP};

/// Rows of one index keyed by primary key. Iteration and encoding are in
/// key order.
#[derive(Debug, Clone)]
pub struct RowSet {
    width: usize,
    key_index: usize,
    rule_index: Option<usize>,
    rows: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AbsorbStats {
    pub read: usize,
    pub malformed: usize,
}

impl RowSet {
    pub fn new(width: usize, key_index: usize, rule_index: Option<usize>) -> Self {
        Self {
            width,
            key_index,
            rule_index,
            rows: BTreeMap::new(),
        }
    }

    /// Parse a blob of records and upsert each one. Rows written before a
    /// column was appended to the schema are padded; wider rows and rows
    /// without a key are malformed.
    pub fn absorb(&mut self, blob: &str) -> AbsorbStats {
        let mut stats = AbsorbStats::default();
        for raw in split_records(blob) {
            let mut fields: Vec<String> = split_fields(raw).into_iter().map(str::to_string).collect();
            if fields.len() > self.width || fields.len() <= self.key_index {
                stats.malformed += 1;
                continue;
            }
            fields.resize(self.width, String::new());
            if fields[self.key_index].trim().is_empty() {
                stats.malformed += 1;
                continue;
            }
            self.upsert(fields);
            stats.read += 1;
        }
        stats
    }

    /// Returns `true` if the row was stored.
    pub fn upsert(&mut self, row: Vec<String>) -> bool {
        let key = row[self.key_index].clone();
        if let (Some(existing), Some(col)) = (self.rows.get(&key), self.rule_index) {
            if row[col] < existing[col] {
                return false;
            }
        }
        self.rows.insert(key, row);
        true
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.rows.get(key).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        for row in self.rows.values() {
            out.push_str(&join_fields(row));
            out.push(RECORD_SEP);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fields: &[&str]) -> String {
        let mut r = join_fields(fields);
        r.push(RECORD_SEP);
        r
    }

    #[test]
    fn latest_by_column_keeps_newest() {
        let mut set = RowSet::new(3, 0, Some(2));
        set.absorb(&row(&["p1", "new", "2025-02-01"]));
        set.absorb(&row(&["p1", "old", "2025-01-01"]));
        assert_eq!(set.get("p1").unwrap()[1], "new");

        set.absorb(&row(&["p1", "tie", "2025-02-01"]));
        assert_eq!(set.get("p1").unwrap()[1], "tie");
    }

    #[test]
    fn replace_keeps_last_seen() {
        let mut set = RowSet::new(2, 0, None);
        set.absorb(&format!("{}{}", row(&["p1", "a"]), row(&["p1", "b"])));
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("p1").unwrap()[1], "b");
    }

    #[test]
    fn short_rows_are_padded_and_bad_rows_counted() {
        let mut set = RowSet::new(3, 0, None);
        let blob = format!(
            "{}{}{}\n",
            row(&["p1", "a"]),
            row(&["p2", "a", "b", "extra"]),
            row(&["", "x", "y"])
        );
        let stats = set.absorb(&blob);
        assert_eq!(stats, AbsorbStats { read: 1, malformed: 2 });
        assert_eq!(set.get("p1").unwrap(), ["p1", "a", ""]);
    }

    #[test]
    fn encoding_is_key_ordered() {
        let mut set = RowSet::new(1, 0, None);
        set.absorb("b\u{1e}a\u{1e}c\n");
        assert_eq!(set.encode(), "a\u{1e}b\u{1e}c\u{1e}");
    }
}
