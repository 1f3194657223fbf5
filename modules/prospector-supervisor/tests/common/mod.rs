#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use prospector_common::{keys, Backoff, DetailsTask, EnrichmentTask, ProspectRow, QueueName, Task};
use prospector_queue::{DurableQueue, LeaseTimings, ObjectQueue};
use prospector_storage::{MemoryStore, Storage};
use prospector_supervisor::{
    ContextProvider, ExclusionList, ExecutionError, ExecutionOutput, FieldUpdate, QueueMap,
    ResultBatch, TaskExecutor, WorkerDeps,
};
use prospector_wal::{DirectoryRegistry, WalJournal};

pub const CAMPAIGN: &str = "mpls";
pub const NODE: &str = "node-a";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Succeed,
    Fail,
    Disconnect,
    Hang,
    /// Succeeds after one second.
    Slow,
}

/// Plays back a script of behaviours, one per call, then succeeds.
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<Behaviour>>,
    connected: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new(script: &[Behaviour]) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.iter().copied().collect()),
            connected: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn execute(&self, task: &Task) -> Result<ExecutionOutput, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Behaviour::Succeed);
        match next {
            Behaviour::Succeed => Ok(output_for(task)),
            Behaviour::Fail => Err(ExecutionError::Failed("scripted failure".into())),
            Behaviour::Disconnect => {
                self.connected.store(false, Ordering::SeqCst);
                Err(ExecutionError::Disconnected("scripted disconnect".into()))
            }
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(output_for(task))
            }
            Behaviour::Slow => {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(output_for(task))
            }
        }
    }
}

/// What a well-behaved scraper would return for each task kind.
pub fn output_for(task: &Task) -> ExecutionOutput {
    match task {
        Task::GmList(t) => ExecutionOutput {
            results: vec![ResultBatch {
                key: keys::results_key(
                    CAMPAIGN,
                    &t.latitude.to_string(),
                    &t.longitude.to_string(),
                    &t.search_phrase,
                ),
                rows: ProspectRow {
                    place_id: "place-123".into(),
                    company_slug: "acme".into(),
                    name: "Acme Coffee".into(),
                    latitude: Some(t.latitude),
                    longitude: Some(t.longitude),
                    keyword: t.search_phrase.clone(),
                    updated_at: "2025-03-01T10:00:00Z".into(),
                    ..Default::default()
                }
                .to_usv(),
            }],
            follow_ups: vec![details("place-123", "acme")],
            ..Default::default()
        },
        Task::GmDetails(t) => {
            let slug = t.company_slug.clone().unwrap_or_default();
            ExecutionOutput {
                entities: vec![slug.clone()],
                updates: vec![
                    FieldUpdate::new(&slug, "name", "Acme Coffee"),
                    FieldUpdate::new(&slug, "phone", "555-0100"),
                    FieldUpdate::new("ghost", "phone", "555-0000"),
                ],
                follow_ups: vec![Task::Enrichment(EnrichmentTask {
                    domain: "acme.com".into(),
                    company_slug: slug,
                    force_refresh: false,
                })],
                ..Default::default()
            }
        }
        Task::Enrichment(t) => ExecutionOutput {
            updates: vec![FieldUpdate::new(&t.company_slug, "email", "hi@acme.com")],
            ..Default::default()
        },
    }
}

pub fn details(place_id: &str, slug: &str) -> Task {
    Task::GmDetails(DetailsTask {
        place_id: place_id.into(),
        name: None,
        company_slug: Some(slug.into()),
        discovery_phrase: None,
        discovery_tile_id: None,
        force_refresh: false,
    })
}

/// Hands out a fresh executor per acquisition; the first `failures`
/// acquisitions fail.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Vec<Behaviour>>>,
    failures: AtomicUsize,
    acquired: Mutex<Vec<Arc<ScriptedExecutor>>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Vec<Behaviour>>, failures: usize) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            failures: AtomicUsize::new(failures),
            acquired: Mutex::new(Vec::new()),
        })
    }

    pub fn acquisitions(&self) -> usize {
        self.acquired.lock().unwrap().len()
    }

    pub fn total_calls(&self) -> usize {
        self.acquired.lock().unwrap().iter().map(|e| e.calls()).sum()
    }
}

#[async_trait]
impl ContextProvider for ScriptedProvider {
    async fn acquire(&self) -> Result<Arc<dyn TaskExecutor>, ExecutionError> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ExecutionError::Disconnected("browser not up yet".into()));
        }
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        let executor = ScriptedExecutor::new(&script);
        self.acquired.lock().unwrap().push(executor.clone());
        Ok(executor)
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub store: Arc<dyn Storage>,
    pub deps: WorkerDeps,
}

impl Harness {
    pub fn new(timings: LeaseTimings, exclusions: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn Storage> = Arc::new(MemoryStore::new());
        let queues: QueueMap = QueueName::ALL
            .into_iter()
            .map(|q| {
                let queue: Arc<dyn DurableQueue> = Arc::new(ObjectQueue::new(
                    store.clone(),
                    CAMPAIGN,
                    q,
                    NODE,
                    timings.lease_duration,
                ));
                (q, queue)
            })
            .collect();
        let deps = WorkerDeps {
            queues: Arc::new(queues),
            store: store.clone(),
            journal: Arc::new(WalJournal::new(dir.path(), NODE)),
            registry: Arc::new(DirectoryRegistry::new(dir.path())),
            exclusions: Arc::new(ExclusionList::from_keys(exclusions)),
            timings,
            backoff: Backoff::new(Duration::from_millis(1), Duration::from_millis(5), 3),
            idle_sleep: Duration::from_millis(20),
        };
        Self { dir, store, deps }
    }

    pub fn queue(&self, name: QueueName) -> Arc<dyn DurableQueue> {
        self.deps.queues[&name].clone()
    }
}

/// Poll `check` until it holds, failing the test after five seconds.
pub async fn eventually<F: FnMut() -> bool>(what: &str, mut check: F) {
    for _ in 0..250 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Wait until `queue` reports `n` completed tasks.
pub async fn completed(queue: &Arc<dyn DurableQueue>, n: u64) {
    for _ in 0..250 {
        if queue.stats().await.unwrap().completed >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {n} completed tasks on {}", queue.name());
}
