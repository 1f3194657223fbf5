//! The WAL is the unit of replication. Every locally authored field change
//! is appended here; gossip ships records to peers, who keep them apart in
//! quarantine files; readers fold both into a last-write-wins view.

pub mod error;
pub mod journal;
pub mod merge;
pub mod quarantine;
pub mod reader;
pub mod record;
pub mod registry;

pub use error::{Result, WalError};
pub use journal::WalJournal;
pub use merge::{load_view, FieldValue, MergedView};
pub use quarantine::Quarantine;
pub use reader::{decode_blob, read_file, read_tree, ReadOutcome};
pub use record::{wal_timestamp, WalRecord};
pub use registry::{DirectoryRegistry, EntityRegistry, StaticRegistry};

/// Storage key of the compacted field-state checkpoint, relative to the
/// data root.
pub const STATE_CHECKPOINT_KEY: &str = "indexes/field-state/checkpoint.usv";
