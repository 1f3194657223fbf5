use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use prospector_common::keys::{self, LEASE_FILE, TASK_FILE};
use prospector_common::{QueueName, Task};
use prospector_storage::{get_json, put_json, Precondition, PutOutcome, Storage};

use crate::error::{QueueError, Result};
use crate::lease::Lease;
use crate::queue::{CompletedRecord, DurableQueue, LeasedTask, QueueStats, TaskEnvelope};

/// Durable queue laid out as objects:
///
/// ```text
/// campaigns/{c}/queues/{q}/pending/{shard}/{id}/task.json
/// campaigns/{c}/queues/{q}/pending/{shard}/{id}/lease.json
/// campaigns/{c}/queues/{q}/completed/{id}.json
/// campaigns/{c}/queues/{q}/failed/{id}.json
/// ```
///
/// A lease is acquired by creating `lease.json` if absent. An expired lease
/// is taken over with a compare-and-swap on its version, so exactly one
/// poller wins either way.
pub struct ObjectQueue {
    store: Arc<dyn Storage>,
    campaign: String,
    queue: QueueName,
    worker_id: String,
    lease_duration: Duration,
}

impl ObjectQueue {
    pub fn new(
        store: Arc<dyn Storage>,
        campaign: &str,
        queue: QueueName,
        worker_id: &str,
        lease_duration: Duration,
    ) -> Self {
        Self {
            store,
            campaign: campaign.to_string(),
            queue,
            worker_id: worker_id.to_string(),
            lease_duration,
        }
    }

    fn task_key(&self, shard: &str, id: &str) -> String {
        keys::task_key(&self.campaign, self.queue, shard, id)
    }

    fn lease_key(&self, shard: &str, id: &str) -> String {
        keys::lease_key(&self.campaign, self.queue, shard, id)
    }

    /// `(shard, id)` of every pending task.
    async fn candidates(&self) -> Result<Vec<(String, String)>> {
        let prefix = keys::pending_prefix(&self.campaign, self.queue);
        let listing = self.store.list(&prefix).await?;
        Ok(listing
            .into_iter()
            .filter_map(|meta| {
                let rest = meta.key.strip_prefix(&prefix)?;
                let mut parts = rest.split('/');
                let shard = parts.next()?;
                let id = parts.next()?;
                match (parts.next(), parts.next()) {
                    (Some(TASK_FILE), None) => Some((shard.to_string(), id.to_string())),
                    _ => None,
                }
            })
            .collect())
    }

    /// Try to take the lease on one task. `None` if someone else holds it
    /// or the task vanished.
    async fn try_lease(&self, shard: &str, id: &str) -> Result<Option<LeasedTask>> {
        let lease_key = self.lease_key(shard, id);
        let lease = Lease::new(&self.worker_id, self.lease_duration);

        match put_json(self.store.as_ref(), &lease_key, &lease, Precondition::DoesNotExist).await? {
            PutOutcome::Written { .. } => {}
            PutOutcome::PreconditionFailed => {
                let Some(existing) = self.store.get(&lease_key).await? else {
                    // Released between our attempt and this read; next poll.
                    return Ok(None);
                };
                match serde_json::from_slice::<Lease>(&existing.data) {
                    Ok(current) if !current.is_expired(Utc::now()) => return Ok(None),
                    Ok(current) => {
                        debug!(queue = %self.queue, task_id = id, previous = %current.worker_id, "Lease expired, reclaiming");
                    }
                    Err(e) => {
                        warn!(queue = %self.queue, task_id = id, error = %e, "Unreadable lease, reclaiming");
                    }
                }
                let swapped = put_json(
                    self.store.as_ref(),
                    &lease_key,
                    &lease,
                    Precondition::MatchesVersion(existing.version),
                )
                .await?;
                if !swapped.is_written() {
                    return Ok(None);
                }
                info!(queue = %self.queue, task_id = id, "Reclaimed expired lease");
            }
        }

        let task_key = self.task_key(shard, id);
        let Some(raw) = self.store.get(&task_key).await? else {
            // Acked by a previous holder after we listed it.
            self.store.delete(&lease_key).await?;
            return Ok(None);
        };

        match serde_json::from_slice::<TaskEnvelope>(&raw.data) {
            Ok(envelope) => Ok(Some(LeasedTask {
                queue: self.queue,
                shard: shard.to_string(),
                task_id: id.to_string(),
                task: envelope.task,
                attempts: envelope.attempts,
                lease,
            })),
            Err(e) => {
                warn!(queue = %self.queue, task_id = id, error = %e, "Corrupt task payload, moving to failed");
                let failed_key = keys::failed_key(&self.campaign, self.queue, id);
                self.store.put(&failed_key, raw.data, Precondition::None).await?;
                self.store.delete(&task_key).await?;
                self.store.delete(&lease_key).await?;
                Ok(None)
            }
        }
    }

    async fn current_lease(&self, task: &LeasedTask) -> Result<Option<(Lease, String)>> {
        let lease_key = self.lease_key(&task.shard, &task.task_id);
        let Some(obj) = self.store.get(&lease_key).await? else {
            return Ok(None);
        };
        match serde_json::from_slice::<Lease>(&obj.data) {
            Ok(lease) => Ok(Some((lease, obj.version))),
            Err(_) => Ok(None),
        }
    }

    fn lease_lost(&self, task: &LeasedTask) -> QueueError {
        QueueError::LeaseLost {
            queue: self.queue,
            task_id: task.task_id.clone(),
        }
    }
}

#[async_trait]
impl DurableQueue for ObjectQueue {
    fn name(&self) -> QueueName {
        self.queue
    }

    async fn push(&self, task: &Task) -> Result<String> {
        if task.queue() != self.queue {
            return Err(QueueError::WrongQueue {
                queue: self.queue,
                task_queue: task.queue(),
            });
        }
        let id = task.task_id();
        let envelope = TaskEnvelope {
            task: task.clone(),
            attempts: 0,
            enqueued_at: Utc::now(),
        };
        let key = self.task_key(&task.shard(), &id);
        put_json(self.store.as_ref(), &key, &envelope, Precondition::None).await?;
        debug!(queue = %self.queue, task_id = %id, "Pushed task");
        Ok(id)
    }

    async fn poll(&self, batch_size: usize) -> Result<Vec<LeasedTask>> {
        let mut candidates = self.candidates().await?;
        candidates.shuffle(&mut rand::rng());

        let mut leased = Vec::new();
        for (shard, id) in candidates {
            if leased.len() >= batch_size {
                break;
            }
            match self.try_lease(&shard, &id).await {
                Ok(Some(task)) => leased.push(task),
                Ok(None) => {}
                // Hand back what we already hold rather than orphaning it.
                Err(e) if !leased.is_empty() => {
                    warn!(queue = %self.queue, task_id = %id, error = %e, "Poll interrupted");
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(leased)
    }

    async fn heartbeat(&self, task: &LeasedTask) -> Result<()> {
        let Some((current, version)) = self.current_lease(task).await? else {
            return Err(self.lease_lost(task));
        };
        if current.token != task.lease.token {
            return Err(self.lease_lost(task));
        }
        let renewed = current.renewed(self.lease_duration);
        let lease_key = self.lease_key(&task.shard, &task.task_id);
        match put_json(
            self.store.as_ref(),
            &lease_key,
            &renewed,
            Precondition::MatchesVersion(version),
        )
        .await?
        {
            PutOutcome::Written { .. } => Ok(()),
            PutOutcome::PreconditionFailed => Err(self.lease_lost(task)),
        }
    }

    async fn ack(&self, task: &LeasedTask) -> Result<()> {
        let task_key = self.task_key(&task.shard, &task.task_id);
        let lease_key = self.lease_key(&task.shard, &task.task_id);

        // A reclaimed lease belongs to its new holder; leave the task to it.
        if let Some((current, _)) = self.current_lease(task).await? {
            if current.token != task.lease.token {
                warn!(
                    queue = %self.queue,
                    task_id = %task.task_id,
                    holder = current.worker_id.as_str(),
                    "Ack on a lease reclaimed by another worker"
                );
                return Err(self.lease_lost(task));
            }
        }

        if self.store.get(&task_key).await?.is_some() {
            let record = CompletedRecord {
                task: task.task.clone(),
                attempts: task.attempts,
                worker_id: self.worker_id.clone(),
                completed_at: Utc::now(),
            };
            let completed_key = keys::completed_key(&self.campaign, self.queue, &task.task_id);
            put_json(self.store.as_ref(), &completed_key, &record, Precondition::None).await?;
            self.store.delete(&task_key).await?;
        }
        self.store.delete(&lease_key).await?;
        Ok(())
    }

    async fn nack(&self, task: &LeasedTask) -> Result<()> {
        match self.current_lease(task).await? {
            Some((current, _)) if current.token == task.lease.token => {}
            _ => {
                debug!(queue = %self.queue, task_id = %task.task_id, "Nack on a lease we no longer hold");
                return Ok(());
            }
        }

        let task_key = self.task_key(&task.shard, &task.task_id);
        if let Some((mut envelope, _)) =
            get_json::<TaskEnvelope>(self.store.as_ref(), &task_key).await?
        {
            envelope.attempts += 1;
            put_json(self.store.as_ref(), &task_key, &envelope, Precondition::None).await?;
        }
        self.store
            .delete(&self.lease_key(&task.shard, &task.task_id))
            .await?;
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let root = format!("{}/", keys::queue_root(&self.campaign, self.queue));
        let listing = self.store.list(&root).await?;
        let mut stats = QueueStats::default();
        for meta in listing {
            let Some(rest) = meta.key.strip_prefix(&root) else {
                continue;
            };
            if rest.starts_with("pending/") {
                if rest.ends_with(&format!("/{TASK_FILE}")) {
                    stats.pending += 1;
                } else if rest.ends_with(&format!("/{LEASE_FILE}")) {
                    stats.leased += 1;
                }
            } else if rest.starts_with("completed/") && rest.ends_with(".json") {
                stats.completed += 1;
            } else if rest.starts_with("failed/") {
                stats.failed += 1;
            }
        }
        Ok(stats)
    }
}
