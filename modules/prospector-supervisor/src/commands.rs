//! Remote control: the campaign exclusion list and the commands that edit it.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use prospector_common::keys;
use prospector_queue::{CommandQueue, ReceivedCommand};
use prospector_storage::{get_json, put_json, Precondition, Storage};

use crate::error::Result;

/// Commands handled per supervisor tick.
const COMMAND_BATCH: usize = 10;

/// Company slugs and domains that workers must skip.
#[derive(Debug, Default)]
pub struct ExclusionList {
    keys: RwLock<BTreeSet<String>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ExclusionDocument {
    #[serde(default)]
    excluded: Vec<String>,
}

fn normalize(key: &str) -> String {
    key.trim().to_lowercase()
}

impl ExclusionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = keys
            .into_iter()
            .map(|k| normalize(k.as_ref()))
            .filter(|k| !k.is_empty())
            .collect();
        Self {
            keys: RwLock::new(set),
        }
    }

    /// Read `campaigns/{c}/exclusions.json`; absent means empty.
    pub async fn load(store: &dyn Storage, campaign: &str) -> Result<Self> {
        let doc = get_json::<ExclusionDocument>(store, &keys::exclusions_key(campaign)).await?;
        Ok(Self::from_keys(doc.map(|(d, _)| d.excluded).unwrap_or_default()))
    }

    pub async fn save(&self, store: &dyn Storage, campaign: &str) -> Result<()> {
        let doc = ExclusionDocument {
            excluded: self.snapshot(),
        };
        put_json(store, &keys::exclusions_key(campaign), &doc, Precondition::None).await?;
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys
            .read()
            .map(|k| k.contains(&normalize(key)))
            .unwrap_or(false)
    }

    pub fn insert(&self, key: &str) -> bool {
        let key = normalize(key);
        !key.is_empty() && self.keys.write().map(|mut k| k.insert(key)).unwrap_or(false)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.keys
            .write()
            .map(|mut k| k.remove(&normalize(key)))
            .unwrap_or(false)
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.keys
            .read()
            .map(|k| k.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommandSummary {
    pub applied: usize,
    pub unknown: usize,
    /// Addressed to another campaign and left for its supervisor.
    pub skipped: usize,
}

/// Drains the command channel into the exclusion list.
pub struct CommandProcessor {
    queue: Arc<dyn CommandQueue>,
    store: Arc<dyn Storage>,
    campaign: String,
    exclusions: Arc<ExclusionList>,
}

impl CommandProcessor {
    pub fn new(
        queue: Arc<dyn CommandQueue>,
        store: Arc<dyn Storage>,
        campaign: &str,
        exclusions: Arc<ExclusionList>,
    ) -> Self {
        Self {
            queue,
            store,
            campaign: campaign.to_string(),
            exclusions,
        }
    }

    /// Handle one batch. Changes are persisted before any command is acked,
    /// so a failed save leaves the batch to be redelivered.
    pub async fn process(&self) -> Result<CommandSummary> {
        let received = self.queue.poll(COMMAND_BATCH).await?;
        let mut summary = CommandSummary::default();
        let mut handled: Vec<&ReceivedCommand> = Vec::new();
        let mut changed = false;

        for command in &received {
            let envelope = &command.envelope;
            if envelope.campaign.as_deref().is_some_and(|c| c != self.campaign) {
                debug!(command = envelope.command.as_str(), campaign = ?envelope.campaign, "Command for another campaign");
                summary.skipped += 1;
                continue;
            }
            match envelope.command.as_str() {
                "add-exclude" => {
                    for key in &envelope.args {
                        changed |= self.exclusions.insert(key);
                    }
                    info!(keys = ?envelope.args, "Added exclusions");
                    summary.applied += 1;
                }
                "remove-exclude" => {
                    for key in &envelope.args {
                        changed |= self.exclusions.remove(key);
                    }
                    info!(keys = ?envelope.args, "Removed exclusions");
                    summary.applied += 1;
                }
                other => {
                    warn!(command = other, "Ignoring unknown command");
                    summary.unknown += 1;
                }
            }
            handled.push(command);
        }

        if changed {
            self.exclusions.save(self.store.as_ref(), &self.campaign).await?;
        }
        for command in handled {
            self.queue.ack(command).await?;
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prospector_queue::{CommandEnvelope, MemoryCommandQueue};
    use prospector_storage::MemoryStore;

    fn envelope(command: &str, args: &[&str], campaign: Option<&str>) -> CommandEnvelope {
        CommandEnvelope {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            campaign: campaign.map(String::from),
        }
    }

    #[test]
    fn keys_are_case_insensitive() {
        let list = ExclusionList::from_keys([" Acme.COM ", ""]);
        assert!(list.contains("acme.com"));
        assert!(list.contains("ACME.com"));
        assert_eq!(list.snapshot(), vec!["acme.com"]);
        assert!(!list.insert("ACME.COM"));
        assert!(list.remove("Acme.com"));
        assert!(!list.contains("acme.com"));
    }

    #[tokio::test]
    async fn commands_edit_and_persist_the_list() {
        let store: Arc<dyn Storage> = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryCommandQueue::new());
        let exclusions = Arc::new(ExclusionList::new());
        let processor = CommandProcessor::new(queue.clone(), store.clone(), "mpls", exclusions.clone());

        queue.send(&envelope("add-exclude", &["acme", "globex.io"], Some("mpls"))).await.unwrap();
        queue.send(&envelope("remove-exclude", &["globex.io"], None)).await.unwrap();
        queue.send(&envelope("add-exclude", &["initech"], Some("stpaul"))).await.unwrap();
        queue.send(&envelope("reboot", &[], None)).await.unwrap();

        let summary = processor.process().await.unwrap();
        assert_eq!(
            summary,
            CommandSummary {
                applied: 2,
                unknown: 1,
                skipped: 1
            }
        );
        assert_eq!(queue.acked(), 3);
        assert_eq!(queue.in_flight(), 1);

        let reloaded = ExclusionList::load(store.as_ref(), "mpls").await.unwrap();
        assert_eq!(reloaded.snapshot(), vec!["acme"]);
        assert!(!exclusions.contains("initech"));
    }
}
