use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use crate::error::{ProspectorError, Result};
use crate::node;

/// Where shared state (queues, checkpoints, status documents) lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageMode {
    /// A directory on local or network-mounted disk.
    Local,
    /// An S3-compatible bucket.
    S3 {
        bucket: String,
        region: String,
        endpoint: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct GossipSettings {
    pub port: u16,
    /// Statically configured peer host names.
    pub peers: Vec<String>,
    /// IPv4 range to probe when mDNS and static peers find nothing.
    pub scan_range: Option<String>,
    pub mdns: bool,
    pub tick_interval: Duration,
    /// Every Nth tick the tailer forgets its offsets and resends everything.
    pub full_rescan_every: u32,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub campaign: String,
    pub node_id: String,
    pub data_root: PathBuf,
    pub storage: StorageMode,

    // Control plane
    pub command_queue_url: Option<String>,
    pub tick_interval: Duration,

    // Execution context
    pub browserless_url: String,
    pub browserless_token: Option<String>,

    pub gossip: GossipSettings,
}

impl Config {
    /// Configuration for the worker supervisor. Needs a campaign and a
    /// Browserless endpoint.
    pub fn supervisor_from_env() -> Result<Self> {
        Self::supervisor_from(&|k| env::var(k).ok())
    }

    /// Configuration for the gossip replicator. No campaign required.
    pub fn gossip_from_env() -> Result<Self> {
        Self::base_from(&|k| env::var(k).ok(), false)
    }

    /// Configuration for the compaction engine. An explicit campaign takes
    /// precedence over `PROSPECTOR_CAMPAIGN`.
    pub fn compactor_from_env(campaign: Option<&str>) -> Result<Self> {
        Self::base_from(
            &|k| match (k, campaign) {
                ("PROSPECTOR_CAMPAIGN", Some(c)) => Some(c.to_string()),
                _ => env::var(k).ok(),
            },
            true,
        )
    }

    pub fn supervisor_from(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::base_from(lookup, true)?;
        config.browserless_url = required(lookup, "BROWSERLESS_URL")?;
        config.browserless_token = optional(lookup, "BROWSERLESS_TOKEN");
        Ok(config)
    }

    pub fn base_from(lookup: &dyn Fn(&str) -> Option<String>, needs_campaign: bool) -> Result<Self> {
        let campaign = if needs_campaign {
            required(lookup, "PROSPECTOR_CAMPAIGN")?
        } else {
            optional(lookup, "PROSPECTOR_CAMPAIGN").unwrap_or_default()
        };

        let node_id = match optional(lookup, "PROSPECTOR_NODE_ID") {
            Some(id) => node::normalize(&id),
            None => node::node_id_from_env(),
        };

        let storage = match optional(lookup, "PROSPECTOR_STORAGE").as_deref() {
            None | Some("local") => StorageMode::Local,
            Some("s3") => StorageMode::S3 {
                bucket: required(lookup, "PROSPECTOR_BUCKET")?,
                region: optional(lookup, "AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
                endpoint: optional(lookup, "PROSPECTOR_S3_ENDPOINT"),
            },
            Some(other) => {
                return Err(ProspectorError::Config(format!(
                    "PROSPECTOR_STORAGE must be 'local' or 's3', got '{other}'"
                )))
            }
        };

        let gossip = GossipSettings {
            port: parsed(lookup, "PROSPECTOR_GOSSIP_PORT", 9999)?,
            peers: optional(lookup, "PROSPECTOR_GOSSIP_PEERS")
                .map(|raw| {
                    raw.split(',')
                        .map(|p| p.trim().to_string())
                        .filter(|p| !p.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            scan_range: optional(lookup, "PROSPECTOR_GOSSIP_SCAN"),
            mdns: parsed(lookup, "PROSPECTOR_GOSSIP_MDNS", true)?,
            tick_interval: Duration::from_secs(parsed(lookup, "PROSPECTOR_GOSSIP_TICK_SECS", 5)?),
            full_rescan_every: parsed(lookup, "PROSPECTOR_GOSSIP_FULL_RESCAN_EVERY", 60)?,
        };

        Ok(Self {
            campaign,
            node_id,
            data_root: PathBuf::from(
                optional(lookup, "PROSPECTOR_DATA_ROOT").unwrap_or_else(|| "./data".to_string()),
            ),
            storage,
            command_queue_url: optional(lookup, "PROSPECTOR_COMMAND_QUEUE_URL"),
            tick_interval: Duration::from_secs(parsed(lookup, "PROSPECTOR_TICK_SECS", 30)?),
            browserless_url: String::new(),
            browserless_token: None,
            gossip,
        })
    }

    /// Log the effective configuration with secrets masked.
    pub fn log_redacted(&self) {
        let storage = match &self.storage {
            StorageMode::Local => "local".to_string(),
            StorageMode::S3 { bucket, region, .. } => format!("s3://{bucket} ({region})"),
        };
        info!(
            campaign = self.campaign.as_str(),
            node_id = self.node_id.as_str(),
            data_root = %self.data_root.display(),
            storage = storage.as_str(),
            command_queue = self.command_queue_url.is_some(),
            browserless_url = self.browserless_url.as_str(),
            browserless_token = if self.browserless_token.is_some() { "***" } else { "<unset>" },
            gossip_port = self.gossip.port,
            gossip_peers = self.gossip.peers.len(),
            "Loaded configuration"
        );
    }
}

fn optional(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|v| !v.trim().is_empty())
}

fn required(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    optional(lookup, key)
        .ok_or_else(|| ProspectorError::Config(format!("{key} environment variable is required")))
}

fn parsed<T: std::str::FromStr>(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match optional(lookup, key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ProspectorError::Config(format!("{key} has an invalid value: {raw}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn supervisor_requires_campaign_and_browserless() {
        let lookup = lookup_from(&[("PROSPECTOR_NODE_ID", "n1")]);
        let err = Config::supervisor_from(&lookup).unwrap_err();
        assert!(err.to_string().contains("PROSPECTOR_CAMPAIGN"));

        let lookup = lookup_from(&[("PROSPECTOR_NODE_ID", "n1"), ("PROSPECTOR_CAMPAIGN", "mpls")]);
        let err = Config::supervisor_from(&lookup).unwrap_err();
        assert!(err.to_string().contains("BROWSERLESS_URL"));
    }

    #[test]
    fn defaults_apply() {
        let lookup = lookup_from(&[
            ("PROSPECTOR_NODE_ID", "Worker-1.local"),
            ("PROSPECTOR_CAMPAIGN", "mpls"),
            ("BROWSERLESS_URL", "http://localhost:3000"),
        ]);
        let config = Config::supervisor_from(&lookup).unwrap();
        assert_eq!(config.node_id, "worker-1");
        assert_eq!(config.storage, StorageMode::Local);
        assert_eq!(config.gossip.port, 9999);
        assert!(config.gossip.mdns);
        assert_eq!(config.tick_interval, Duration::from_secs(30));
        assert!(config.command_queue_url.is_none());
    }

    #[test]
    fn s3_mode_needs_bucket() {
        let lookup = lookup_from(&[("PROSPECTOR_NODE_ID", "n1"), ("PROSPECTOR_STORAGE", "s3")]);
        assert!(Config::base_from(&lookup, false).is_err());

        let lookup = lookup_from(&[
            ("PROSPECTOR_NODE_ID", "n1"),
            ("PROSPECTOR_STORAGE", "s3"),
            ("PROSPECTOR_BUCKET", "data"),
        ]);
        let config = Config::base_from(&lookup, false).unwrap();
        assert_eq!(
            config.storage,
            StorageMode::S3 {
                bucket: "data".to_string(),
                region: "us-east-1".to_string(),
                endpoint: None
            }
        );
    }

    #[test]
    fn gossip_peers_are_split_and_ports_validated() {
        let lookup = lookup_from(&[
            ("PROSPECTOR_NODE_ID", "n1"),
            ("PROSPECTOR_GOSSIP_PEERS", "coder, octoprint,,"),
        ]);
        let config = Config::base_from(&lookup, false).unwrap();
        assert_eq!(config.gossip.peers, vec!["coder", "octoprint"]);

        let lookup = lookup_from(&[("PROSPECTOR_NODE_ID", "n1"), ("PROSPECTOR_GOSSIP_PORT", "lots")]);
        assert!(Config::base_from(&lookup, false).is_err());
    }
}
