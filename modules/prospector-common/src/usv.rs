//! Unit-separated values: fields joined by U+001F, records ended by U+001E.

pub const UNIT_SEP: char = '\u{1f}';
pub const RECORD_SEP: char = '\u{1e}';

pub fn contains_separator(field: &str) -> bool {
    field.contains(UNIT_SEP) || field.contains(RECORD_SEP)
}

pub fn join_fields<S: AsRef<str>>(fields: &[S]) -> String {
    let mut out = String::new();
    for (i, f) in fields.iter().enumerate() {
        if i > 0 {
            out.push(UNIT_SEP);
        }
        out.push_str(f.as_ref());
    }
    out
}

pub fn split_fields(record: &str) -> Vec<&str> {
    record.split(UNIT_SEP).collect()
}

/// Split a blob into records. Accepts either separator style (RS or newline)
/// and drops blank records.
pub fn split_records(blob: &str) -> impl Iterator<Item = &str> {
    blob.split(|c| c == RECORD_SEP || c == '\n')
        .map(|r| r.trim_end_matches('\r'))
        .filter(|r| !r.trim().is_empty())
}
