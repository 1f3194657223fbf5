//! Compaction engine: merges scattered, per-shard output into one
//! deduplicated checkpoint per index and deletes what it consumed.

pub mod compactor;
pub mod error;
pub mod field_state;
pub mod index;
pub mod lock;
pub mod rows;

pub use compactor::{CompactionReport, Compactor};
pub use error::{CompactionError, Result};
pub use field_state::FIELD_STATE_INDEX;
pub use index::{IndexSpec, Layout, MergeRule};
pub use lock::{CompactionLock, DEFAULT_LOCK_TTL};
pub use rows::{AbsorbStats, RowSet};
