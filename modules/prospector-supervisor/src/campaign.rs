//! Live campaign configuration, re-read every tick.
//!
//! ```toml
//! [prospecting.scaling.worker-1]
//! gm-list = 1
//! gm-details = 2
//! enrichment = 1
//! ```

use std::collections::BTreeMap;

use serde::Deserialize;

use prospector_common::{keys, node, QueueName};
use prospector_storage::Storage;

use crate::error::Result;

#[derive(Debug, Default, Clone, Deserialize)]
pub struct CampaignConfig {
    #[serde(default)]
    pub prospecting: Prospecting,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct Prospecting {
    #[serde(default)]
    pub scaling: BTreeMap<String, NodeScaling>,
}

/// Worker targets for one node. Older configs use `scrape` and `details`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct NodeScaling {
    #[serde(default, rename = "gm-list", alias = "scrape")]
    pub gm_list: usize,
    #[serde(default, rename = "gm-details", alias = "details")]
    pub gm_details: usize,
    #[serde(default)]
    pub enrichment: usize,
}

impl NodeScaling {
    pub fn target(&self, queue: QueueName) -> usize {
        match queue {
            QueueName::GmList => self.gm_list,
            QueueName::GmDetails => self.gm_details,
            QueueName::Enrichment => self.enrichment,
        }
    }
}

impl CampaignConfig {
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// `None` when the campaign has no config file yet.
    pub async fn load(store: &dyn Storage, campaign: &str) -> Result<Option<Self>> {
        match store.get(&keys::config_key(campaign)).await? {
            None => Ok(None),
            Some(obj) => Self::parse(&String::from_utf8_lossy(&obj.data)).map(Some),
        }
    }

    /// Targets for `node_id`. Section names are matched after the same
    /// normalisation node ids get; a node without a section runs nothing.
    pub fn scaling_for(&self, node_id: &str) -> NodeScaling {
        let wanted = node::normalize(node_id);
        self.prospecting
            .scaling
            .iter()
            .find(|(name, _)| node::normalize(name) == wanted)
            .map(|(_, scaling)| *scaling)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaling_is_looked_up_per_node() {
        let config = CampaignConfig::parse(
            r#"
            [prospecting.scaling.worker-1]
            gm-list = 1
            gm-details = 2
            enrichment = 3

            [prospecting.scaling."Coder.local"]
            scrape = 4
            details = 5
            "#,
        )
        .unwrap();

        let w1 = config.scaling_for("worker-1");
        assert_eq!(w1.target(QueueName::GmList), 1);
        assert_eq!(w1.target(QueueName::GmDetails), 2);
        assert_eq!(w1.target(QueueName::Enrichment), 3);

        let coder = config.scaling_for("coder");
        assert_eq!((coder.gm_list, coder.gm_details, coder.enrichment), (4, 5, 0));

        assert_eq!(config.scaling_for("stranger"), NodeScaling::default());
    }

    #[test]
    fn empty_and_broken_configs() {
        let empty = CampaignConfig::parse("").unwrap();
        assert_eq!(empty.scaling_for("worker-1"), NodeScaling::default());
        assert!(CampaignConfig::parse("[prospecting.scaling.w]\ngm-list = \"many\"").is_err());
    }
}
