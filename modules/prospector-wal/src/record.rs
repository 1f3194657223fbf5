use chrono::{DateTime, Utc};

use prospector_common::usv::{contains_separator, RECORD_SEP, UNIT_SEP};

use crate::error::{Result, WalError};

/// Fixed-width UTC timestamp so that string order is time order.
pub fn wal_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// One field-level mutation. Never modified once written.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WalRecord {
    pub timestamp: String,
    pub origin: String,
    pub target: String,
    pub field: String,
    pub value: String,
    /// Carried on the wire, not interpreted.
    pub causality: String,
}

impl WalRecord {
    pub fn new(origin: &str, target: &str, field: &str, value: &str) -> Self {
        Self {
            timestamp: wal_timestamp(Utc::now()),
            origin: origin.to_string(),
            target: target.to_string(),
            field: field.to_string(),
            value: value.to_string(),
            causality: String::new(),
        }
    }

    /// The day file this record belongs to (`YYYY-MM-DD`).
    pub fn day(&self) -> &str {
        self.timestamp.get(..10).unwrap_or("unknown")
    }

    /// Encoded form including the trailing record separator.
    pub fn encode(&self) -> Result<String> {
        let fields: [(&'static str, &str); 6] = [
            ("timestamp", &self.timestamp),
            ("origin", &self.origin),
            ("target", &self.target),
            ("field", &self.field),
            ("value", &self.value),
            ("causality", &self.causality),
        ];
        let mut out = String::new();
        for (i, (name, value)) in fields.into_iter().enumerate() {
            if contains_separator(value) {
                return Err(WalError::Separator { field: name });
            }
            if i > 0 {
                out.push(UNIT_SEP);
            }
            out.push_str(value);
        }
        out.push(RECORD_SEP);
        Ok(out)
    }

    /// Decode one record, with or without its trailing separator. Records
    /// from writers that predate the causality column have five fields.
    pub fn decode(raw: &str) -> Result<Self> {
        let body = raw.strip_suffix(RECORD_SEP).unwrap_or(raw);
        let body = body.trim_start_matches(['\n', '\r']);
        let fields: Vec<&str> = body.split(UNIT_SEP).collect();
        if fields.len() != 5 && fields.len() != 6 {
            return Err(WalError::Corrupt(format!(
                "expected 5 or 6 fields, found {}",
                fields.len()
            )));
        }
        let record = Self {
            timestamp: fields[0].to_string(),
            origin: fields[1].to_string(),
            target: fields[2].to_string(),
            field: fields[3].to_string(),
            value: fields[4].to_string(),
            causality: fields.get(5).map(|s| s.to_string()).unwrap_or_default(),
        };
        if record.timestamp.is_empty()
            || record.origin.is_empty()
            || record.target.is_empty()
            || record.field.is_empty()
        {
            return Err(WalError::Corrupt("missing required field".into()));
        }
        if DateTime::parse_from_rfc3339(&record.timestamp).is_err() {
            return Err(WalError::Corrupt(format!("bad timestamp {}", record.timestamp)));
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_sort_chronologically() {
        let a = wal_timestamp(Utc.with_ymd_and_hms(2025, 1, 9, 23, 59, 59).unwrap());
        let b = wal_timestamp(Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap());
        assert_eq!(a, "2025-01-09T23:59:59.000000Z");
        assert!(a < b);
    }

    #[test]
    fn encodes_with_separators() {
        let mut r = WalRecord::new("node-a", "acme", "phone", "555-0100");
        r.timestamp = "2025-01-01T00:00:00.000000Z".into();
        let line = r.encode().unwrap();
        assert_eq!(
            line,
            "2025-01-01T00:00:00.000000Z\u{1f}node-a\u{1f}acme\u{1f}phone\u{1f}555-0100\u{1f}\u{1e}"
        );
        assert_eq!(WalRecord::decode(&line).unwrap(), r);
        assert_eq!(r.day(), "2025-01-01");
    }

    #[test]
    fn five_field_records_decode() {
        let raw = "2025-01-01T00:00:00Z\u{1f}node-a\u{1f}acme\u{1f}email\u{1f}a@acme.com";
        let r = WalRecord::decode(raw).unwrap();
        assert_eq!(r.value, "a@acme.com");
        assert!(r.causality.is_empty());
    }

    #[test]
    fn separators_inside_values_are_rejected() {
        let r = WalRecord::new("node-a", "acme", "notes", "bad\u{1f}value");
        assert!(matches!(r.encode(), Err(WalError::Separator { field: "value" })));
    }

    #[test]
    fn malformed_records_are_corrupt() {
        assert!(WalRecord::decode("just one field").is_err());
        assert!(WalRecord::decode("\u{1f}node\u{1f}t\u{1f}f\u{1f}v").is_err());
        assert!(WalRecord::decode("yesterday\u{1f}node\u{1f}t\u{1f}f\u{1f}v").is_err());
    }
}
