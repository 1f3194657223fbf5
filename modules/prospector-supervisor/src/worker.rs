//! One worker loop.
//!
//! ```text
//! POLL -> empty -> SLEEP -> POLL
//!      -> task  -> EXECUTE -> ok     -> PERSIST -> PUSH FOLLOW-UPS -> ACK
//!                          -> failed -> NACK
//! ```
//!
//! A heartbeat runs beside EXECUTE and EXECUTE is bounded by the queue's
//! timeout. Cancellation and a lost execution context both release the
//! in-flight lease before the loop exits.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use prospector_common::{Backoff, QueueName, Task};
use prospector_queue::{DurableQueue, LeaseTimings, LeasedTask, QueueError};
use prospector_storage::{Precondition, Storage};
use prospector_wal::{EntityRegistry, WalError, WalJournal};

use crate::commands::ExclusionList;
use crate::error::{Result, SupervisorError};
use crate::executor::{ExecutionError, ExecutionOutput, TaskExecutor};

pub type QueueMap = BTreeMap<QueueName, Arc<dyn DurableQueue>>;

/// Why a worker loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Cancelled,
    Disconnected,
}

/// Everything worker loops on one node share.
#[derive(Clone)]
pub struct WorkerDeps {
    pub queues: Arc<QueueMap>,
    pub store: Arc<dyn Storage>,
    pub journal: Arc<WalJournal>,
    pub registry: Arc<dyn EntityRegistry>,
    pub exclusions: Arc<ExclusionList>,
    pub timings: LeaseTimings,
    pub backoff: Backoff,
    /// Wait after an empty poll.
    pub idle_sleep: Duration,
}

enum Step {
    Continue,
    Exit(LoopExit),
}

pub struct Worker {
    id: String,
    queue: Arc<dyn DurableQueue>,
    deps: WorkerDeps,
    executor: Arc<dyn TaskExecutor>,
}

impl Worker {
    pub fn new(
        id: &str,
        queue: QueueName,
        deps: WorkerDeps,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<Self> {
        let queue = deps
            .queues
            .get(&queue)
            .cloned()
            .ok_or_else(|| SupervisorError::UnknownQueue(queue.to_string()))?;
        Ok(Self {
            id: id.to_string(),
            queue,
            deps,
            executor,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn run(self, mut cancel: watch::Receiver<bool>) -> LoopExit {
        info!(worker = self.id.as_str(), queue = %self.queue.name(), "Worker started");
        let exit = self.run_loop(&mut cancel).await;
        info!(worker = self.id.as_str(), ?exit, "Worker stopped");
        exit
    }

    async fn run_loop(&self, cancel: &mut watch::Receiver<bool>) -> LoopExit {
        loop {
            if *cancel.borrow() {
                return LoopExit::Cancelled;
            }
            if !self.executor.is_connected() {
                return LoopExit::Disconnected;
            }

            let polled = self.deps.backoff.retry("poll", || self.queue.poll(1)).await;
            let leased = match polled {
                Ok(mut tasks) if !tasks.is_empty() => tasks.swap_remove(0),
                Ok(_) => {
                    if self.idle(cancel).await {
                        return LoopExit::Cancelled;
                    }
                    continue;
                }
                Err(e) => {
                    warn!(worker = self.id.as_str(), error = %e, "Poll failed");
                    if self.idle(cancel).await {
                        return LoopExit::Cancelled;
                    }
                    continue;
                }
            };

            if let Step::Exit(exit) = self.process(&leased, cancel).await {
                return exit;
            }
        }
    }

    /// Sleep for the idle interval. True when cancelled meanwhile.
    async fn idle(&self, cancel: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.deps.idle_sleep) => false,
            _ = cancelled(cancel) => true,
        }
    }

    async fn process(&self, leased: &LeasedTask, cancel: &mut watch::Receiver<bool>) -> Step {
        let task_id = leased.task_id.as_str();
        if self.is_excluded(&leased.task) {
            info!(worker = self.id.as_str(), task_id, "Task is excluded, acking without execution");
            self.ack(leased).await;
            return Step::Continue;
        }

        debug!(worker = self.id.as_str(), task_id, attempts = leased.attempts, "Executing task");
        let heartbeat = self.spawn_heartbeat(leased);
        let timeout = self.deps.timings.execute_timeout(leased.queue);
        let outcome = tokio::select! {
            result = tokio::time::timeout(timeout, self.executor.execute(&leased.task)) => Some(result),
            _ = cancelled(cancel) => None,
        };
        heartbeat.abort();

        match outcome {
            None => {
                info!(worker = self.id.as_str(), task_id, "Cancelled mid-task, releasing lease");
                self.nack(leased).await;
                Step::Exit(LoopExit::Cancelled)
            }
            Some(Err(_)) => {
                warn!(worker = self.id.as_str(), task_id, timeout_secs = timeout.as_secs(), "Task timed out");
                self.nack(leased).await;
                Step::Continue
            }
            Some(Ok(Err(ExecutionError::Disconnected(reason)))) => {
                warn!(worker = self.id.as_str(), task_id, reason = reason.as_str(), "Execution context lost");
                self.nack(leased).await;
                Step::Exit(LoopExit::Disconnected)
            }
            Some(Ok(Err(ExecutionError::Failed(reason)))) => {
                warn!(worker = self.id.as_str(), task_id, reason = reason.as_str(), "Task failed");
                self.nack(leased).await;
                Step::Continue
            }
            Some(Ok(Ok(output))) => match self.complete(leased, output).await {
                Ok(()) => Step::Continue,
                Err(e) => {
                    warn!(worker = self.id.as_str(), task_id, error = %e, "Failed to record task output");
                    self.nack(leased).await;
                    Step::Continue
                }
            },
        }
    }

    fn is_excluded(&self, task: &Task) -> bool {
        task.exclusion_keys()
            .iter()
            .any(|key| self.deps.exclusions.contains(key))
    }

    fn spawn_heartbeat(&self, leased: &LeasedTask) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let leased = leased.clone();
        let period = self.deps.timings.heartbeat_interval.max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match queue.heartbeat(&leased).await {
                    Ok(()) => debug!(task_id = leased.task_id.as_str(), "Lease renewed"),
                    Err(e @ QueueError::LeaseLost { .. }) => {
                        warn!(error = %e, "Stopping heartbeat");
                        break;
                    }
                    Err(e) => warn!(task_id = leased.task_id.as_str(), error = %e, "Heartbeat failed"),
                }
            }
        })
    }

    /// Persist results, record field changes, push follow-ups, then ack.
    async fn complete(&self, leased: &LeasedTask, output: ExecutionOutput) -> Result<()> {
        for batch in &output.results {
            self.deps
                .store
                .put(&batch.key, Bytes::from(batch.rows.clone()), Precondition::None)
                .await?;
        }

        for entity in &output.entities {
            self.deps.registry.register(entity).await?;
        }
        let mut recorded = 0;
        for update in &output.updates {
            if !self.deps.registry.contains(&update.entity).await {
                debug!(entity = update.entity.as_str(), field = update.field.as_str(), "Skipping update for unknown entity");
                continue;
            }
            match self
                .deps
                .journal
                .append(&update.entity, &update.field, &update.value)
                .await
            {
                Ok(_) => recorded += 1,
                Err(e @ WalError::Separator { .. }) => {
                    warn!(entity = update.entity.as_str(), error = %e, "Dropping unencodable update");
                }
                Err(e) => return Err(e.into()),
            }
        }

        for follow_up in &output.follow_ups {
            let queue = self
                .deps
                .queues
                .get(&follow_up.queue())
                .ok_or_else(|| SupervisorError::UnknownQueue(follow_up.queue().to_string()))?;
            self.deps.backoff.retry("push", || queue.push(follow_up)).await?;
        }

        match self.deps.backoff.retry("ack", || self.queue.ack(leased)).await {
            Ok(()) => {}
            Err(e @ QueueError::LeaseLost { .. }) => {
                warn!(worker = self.id.as_str(), error = %e, "Lease reclaimed before ack, task stays with its new holder");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
        info!(
            worker = self.id.as_str(),
            task_id = leased.task_id.as_str(),
            results = output.results.len(),
            updates = recorded,
            follow_ups = output.follow_ups.len(),
            "Task completed"
        );
        Ok(())
    }

    async fn ack(&self, leased: &LeasedTask) {
        if let Err(e) = self.deps.backoff.retry("ack", || self.queue.ack(leased)).await {
            warn!(task_id = leased.task_id.as_str(), error = %e, "Ack failed, task returns after lease expiry");
        }
    }

    async fn nack(&self, leased: &LeasedTask) {
        if let Err(e) = self.deps.backoff.retry("nack", || self.queue.nack(leased)).await {
            warn!(task_id = leased.task_id.as_str(), error = %e, "Nack failed, task returns after lease expiry");
        }
    }
}

/// Resolves once cancellation is signalled or the sender is gone.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            return;
        }
    }
}
