use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use prospector_common::QueueName;

use crate::error::Result;
use crate::executor::TaskExecutor;
use crate::worker::{LoopExit, Worker, WorkerDeps};

struct Slot {
    id: String,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<LoopExit>,
}

/// The worker loops of one queue on this node.
pub struct WorkerPool {
    queue: QueueName,
    node_id: String,
    deps: WorkerDeps,
    running: Vec<Slot>,
    /// Told to stop, not yet finished. Reaped on later ticks.
    draining: Vec<Slot>,
    spawned: u64,
}

impl WorkerPool {
    pub fn new(queue: QueueName, node_id: &str, deps: WorkerDeps) -> Self {
        Self {
            queue,
            node_id: node_id.to_string(),
            deps,
            running: Vec::new(),
            draining: Vec::new(),
            spawned: 0,
        }
    }

    pub fn queue(&self) -> QueueName {
        self.queue
    }

    pub fn active(&self) -> usize {
        self.running.len()
    }

    pub fn draining(&self) -> usize {
        self.draining.len()
    }

    /// Collect finished loops. Returns how the running ones that stopped on
    /// their own exited; drained loops are just dropped.
    pub async fn reap(&mut self) -> Vec<LoopExit> {
        let (done, running): (Vec<Slot>, Vec<Slot>) = std::mem::take(&mut self.running)
            .into_iter()
            .partition(|slot| slot.handle.is_finished());
        self.running = running;
        let mut exits = Vec::new();
        for slot in done {
            if let Some(exit) = join(slot).await {
                exits.push(exit);
            }
        }

        let (done, draining): (Vec<Slot>, Vec<Slot>) = std::mem::take(&mut self.draining)
            .into_iter()
            .partition(|slot| slot.handle.is_finished());
        self.draining = draining;
        for slot in done {
            join(slot).await;
        }
        exits
    }

    /// Move toward `target` running loops. Excess loops, newest first, are
    /// told to stop and left to drain. New loops need an execution context;
    /// without one the pool can only shrink.
    pub fn reconcile(&mut self, target: usize, executor: Option<&Arc<dyn TaskExecutor>>) -> Result<()> {
        while self.running.len() > target {
            let Some(slot) = self.running.pop() else {
                break;
            };
            let _ = slot.cancel.send(true);
            info!(worker = slot.id.as_str(), "Draining worker");
            self.draining.push(slot);
        }

        let Some(executor) = executor else {
            return Ok(());
        };
        while self.running.len() < target {
            self.spawned += 1;
            let id = format!("{}-{}-{}", self.node_id, self.queue, self.spawned);
            let worker = Worker::new(&id, self.queue, self.deps.clone(), executor.clone())?;
            let (cancel, rx) = watch::channel(false);
            let handle = tokio::spawn(worker.run(rx));
            self.running.push(Slot { id, cancel, handle });
        }
        Ok(())
    }

    /// Signal every loop to stop without waiting.
    pub fn cancel_all(&mut self) {
        for slot in self.running.drain(..) {
            let _ = slot.cancel.send(true);
            self.draining.push(slot);
        }
    }

    /// Wait for every draining loop to finish.
    pub async fn join_all(&mut self) {
        for slot in std::mem::take(&mut self.draining) {
            join(slot).await;
        }
    }
}

async fn join(slot: Slot) -> Option<LoopExit> {
    match slot.handle.await {
        Ok(exit) => {
            debug!(worker = slot.id.as_str(), ?exit, "Worker joined");
            Some(exit)
        }
        Err(e) => {
            error!(worker = slot.id.as_str(), error = %e, "Worker loop panicked");
            None
        }
    }
}
