//! Storage key layout shared by every node. Keys use `/` separators
//! regardless of backend.

use crate::shard::{shard, ShardStrategy};
use crate::tasks::{sanitize_id, QueueName};

pub const TASK_FILE: &str = "task.json";
pub const LEASE_FILE: &str = "lease.json";

pub fn campaign_root(campaign: &str) -> String {
    format!("campaigns/{campaign}")
}

pub fn queue_root(campaign: &str, queue: QueueName) -> String {
    format!("campaigns/{campaign}/queues/{queue}")
}

pub fn pending_prefix(campaign: &str, queue: QueueName) -> String {
    format!("{}/pending/", queue_root(campaign, queue))
}

pub fn task_dir(campaign: &str, queue: QueueName, shard: &str, task_id: &str) -> String {
    format!("{}/pending/{shard}/{task_id}", queue_root(campaign, queue))
}

pub fn task_key(campaign: &str, queue: QueueName, shard: &str, task_id: &str) -> String {
    format!("{}/{TASK_FILE}", task_dir(campaign, queue, shard, task_id))
}

pub fn lease_key(campaign: &str, queue: QueueName, shard: &str, task_id: &str) -> String {
    format!("{}/{LEASE_FILE}", task_dir(campaign, queue, shard, task_id))
}

pub fn completed_prefix(campaign: &str, queue: QueueName) -> String {
    format!("{}/completed/", queue_root(campaign, queue))
}

pub fn completed_key(campaign: &str, queue: QueueName, task_id: &str) -> String {
    format!("{}/completed/{task_id}.json", queue_root(campaign, queue))
}

pub fn failed_key(campaign: &str, queue: QueueName, task_id: &str) -> String {
    format!("{}/failed/{task_id}.json", queue_root(campaign, queue))
}

/// Where list workers drop their per-viewport result files.
pub fn results_prefix(campaign: &str) -> String {
    format!("{}/completed/results/", queue_root(campaign, QueueName::GmList))
}

/// Result file for one scrape viewport. Coordinates are kept as written;
/// compaction re-buckets them onto the canonical grid.
pub fn results_key(campaign: &str, lat: &str, lon: &str, file_stem: &str) -> String {
    format!(
        "{}{}/{lat}/{lon}/{}.usv",
        results_prefix(campaign),
        shard(lat, ShardStrategy::Geo),
        sanitize_id(file_stem).replace(' ', "-")
    )
}

pub fn index_prefix(campaign: &str, index: &str) -> String {
    format!("campaigns/{campaign}/indexes/{index}/")
}

pub fn indexes_prefix(campaign: &str) -> String {
    format!("campaigns/{campaign}/indexes/")
}

/// Where a node mirrors its local `indexes/` tree.
pub fn node_indexes_prefix(campaign: &str, node_id: &str) -> String {
    format!("campaigns/{campaign}/nodes/{}/indexes/", sanitize_id(node_id))
}

pub fn config_key(campaign: &str) -> String {
    format!("campaigns/{campaign}/config.toml")
}

pub fn exclusions_key(campaign: &str) -> String {
    format!("campaigns/{campaign}/exclusions.json")
}

pub fn status_key(node_id: &str) -> String {
    format!("status/{node_id}.json")
}

pub fn report_key(campaign: &str) -> String {
    format!("reports/{campaign}.json")
}

pub const WAL_DIR: &str = "wal";
pub const QUARANTINE_DIR: &str = "wal-remote";
pub const ENTITY_DIR: &str = "companies";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_layout_nests_shard_then_task() {
        assert_eq!(
            task_key("mpls", QueueName::GmDetails, "1", "place-123"),
            "campaigns/mpls/queues/gm-details/pending/1/place-123/task.json"
        );
        assert_eq!(
            lease_key("mpls", QueueName::GmDetails, "1", "place-123"),
            "campaigns/mpls/queues/gm-details/pending/1/place-123/lease.json"
        );
        assert!(task_key("mpls", QueueName::GmDetails, "1", "x")
            .starts_with(&pending_prefix("mpls", QueueName::GmDetails)));
    }

    #[test]
    fn results_are_sharded_by_latitude() {
        assert_eq!(
            results_key("mpls", "-44.98712", "93.26501", "coffee shops"),
            "campaigns/mpls/queues/gm-list/completed/results/-/-44.98712/93.26501/coffee-shops.usv"
        );
    }

    #[test]
    fn completed_is_flat_per_queue() {
        assert_eq!(
            completed_key("mpls", QueueName::Enrichment, "acme.com"),
            "campaigns/mpls/queues/enrichment/completed/acme.com.json"
        );
    }
}
