//! The per-node status document the dashboard reads: `status/{node}.json`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use prospector_common::keys;
use prospector_storage::{put_json, Precondition, Storage};

use crate::error::Result;

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub load_1m: f64,
    pub memory_percent: f64,
    pub memory_available_gb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusDocument {
    pub node_id: String,
    pub campaign: String,
    pub timestamp: DateTime<Utc>,
    pub status: String,
    pub system: SystemStats,
    /// Running worker loops per queue.
    pub workers: BTreeMap<String, usize>,
}

/// First field of `/proc/loadavg`.
pub fn parse_loadavg(raw: &str) -> Option<f64> {
    raw.split_whitespace().next()?.parse().ok()
}

/// `(percent used, GiB available)` from `/proc/meminfo`.
pub fn parse_meminfo(raw: &str) -> Option<(f64, f64)> {
    let field = |name: &str| -> Option<f64> {
        raw.lines()
            .find_map(|line| line.strip_prefix(name))
            .and_then(|rest| rest.trim_start_matches(':').split_whitespace().next())
            .and_then(|kb| kb.parse::<f64>().ok())
    };
    let total = field("MemTotal")?;
    let available = field("MemAvailable")?;
    if total <= 0.0 {
        return None;
    }
    let percent = ((total - available) / total * 1000.0).round() / 10.0;
    let gb = (available / 1024.0 / 1024.0 * 100.0).round() / 100.0;
    Some((percent, gb))
}

/// Host load and memory. Zeros where `/proc` is unavailable.
pub async fn read_system_stats() -> SystemStats {
    let mut stats = SystemStats::default();
    if let Ok(raw) = tokio::fs::read_to_string("/proc/loadavg").await {
        stats.load_1m = parse_loadavg(&raw).unwrap_or_default();
    }
    if let Ok(raw) = tokio::fs::read_to_string("/proc/meminfo").await {
        if let Some((percent, gb)) = parse_meminfo(&raw) {
            stats.memory_percent = percent;
            stats.memory_available_gb = gb;
        }
    }
    stats
}

/// Overwrite this node's status document.
pub async fn publish(store: &dyn Storage, doc: &StatusDocument) -> Result<()> {
    put_json(store, &keys::status_key(&doc.node_id), doc, Precondition::None).await?;
    debug!(node_id = doc.node_id.as_str(), status = doc.status.as_str(), "Published liveness");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proc_files_parse() {
        assert_eq!(parse_loadavg("0.52 0.48 0.40 1/234 5678\n"), Some(0.52));
        assert_eq!(parse_loadavg(""), None);

        let meminfo = "MemTotal:        8000000 kB\nMemFree:  100 kB\nMemAvailable:    2097152 kB\n";
        let (percent, gb) = parse_meminfo(meminfo).unwrap();
        assert_eq!(percent, 73.8);
        assert_eq!(gb, 2.0);
        assert_eq!(parse_meminfo("MemTotal: 10 kB\n"), None);
    }
}
