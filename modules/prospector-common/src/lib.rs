pub mod config;
pub mod error;
pub mod keys;
pub mod node;
pub mod prospect;
pub mod retry;
pub mod shard;
pub mod tasks;
pub mod usv;

pub use config::{Config, GossipSettings, StorageMode};
pub use error::{ProspectorError, Result};
pub use prospect::{ProspectRow, PROSPECT_COLUMNS};
pub use retry::Backoff;
pub use shard::{shard, ShardStrategy, SHARD_FUNCTION_VERSION};
pub use tasks::{DetailsTask, EnrichmentTask, QueueName, ScrapeTask, Task};
