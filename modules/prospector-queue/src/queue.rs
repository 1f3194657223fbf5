use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use prospector_common::{QueueName, Task};

use crate::error::Result;
use crate::lease::Lease;

/// Contents of `task.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub task: Task,
    #[serde(default)]
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// Contents of `completed/{id}.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedRecord {
    pub task: Task,
    pub attempts: u32,
    pub worker_id: String,
    pub completed_at: DateTime<Utc>,
}

/// A task this worker currently holds a lease on.
#[derive(Debug, Clone)]
pub struct LeasedTask {
    pub queue: QueueName,
    pub shard: String,
    pub task_id: String,
    pub task: Task,
    pub attempts: u32,
    pub lease: Lease,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub leased: u64,
    pub completed: u64,
    pub failed: u64,
}

impl fmt::Display for QueueStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pending={} leased={} completed={} failed={}",
            self.pending, self.leased, self.completed, self.failed
        )
    }
}

/// One named queue. At-least-once: a task may be delivered again after a
/// nack or after its lease expires.
#[async_trait]
pub trait DurableQueue: Send + Sync {
    fn name(&self) -> QueueName;

    /// Enqueue a task. Pushing an id that is already pending overwrites it.
    /// Returns the task id.
    async fn push(&self, task: &Task) -> Result<String>;

    /// Lease up to `batch_size` pending tasks.
    async fn poll(&self, batch_size: usize) -> Result<Vec<LeasedTask>>;

    /// Extend the lease. Fails with `LeaseLost` if it is no longer ours.
    async fn heartbeat(&self, task: &LeasedTask) -> Result<()>;

    /// Mark done. Acking twice is a no-op.
    async fn ack(&self, task: &LeasedTask) -> Result<()>;

    /// Release the lease so the task is redelivered.
    async fn nack(&self, task: &LeasedTask) -> Result<()>;

    async fn stats(&self) -> Result<QueueStats>;
}
