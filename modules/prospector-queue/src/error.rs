use thiserror::Error;

use prospector_common::QueueName;
use prospector_storage::StorageError;

pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The lease expired and was reclaimed, or was released, by someone else.
    #[error("Lease lost on {queue}/{task_id}")]
    LeaseLost { queue: QueueName, task_id: String },

    #[error("Task for queue {task_queue} pushed to queue {queue}")]
    WrongQueue { queue: QueueName, task_queue: QueueName },

    #[error("Invalid lease timings: {0}")]
    Timings(String),

    #[error("Command channel error: {0}")]
    Command(String),
}
