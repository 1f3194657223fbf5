//! The execution context seam. Workers hand tasks to a [`TaskExecutor`];
//! everything that talks to a browser or the network lives behind it.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use prospector_common::Task;

/// USV rows destined for one result object.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultBatch {
    pub key: String,
    pub rows: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub entity: String,
    pub field: String,
    pub value: String,
}

impl FieldUpdate {
    pub fn new(entity: &str, field: &str, value: &str) -> Self {
        Self {
            entity: entity.to_string(),
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}

/// Everything a successful task produced.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutput {
    pub results: Vec<ResultBatch>,
    pub follow_ups: Vec<Task>,
    /// Entities this task established. They are registered before field
    /// updates are applied.
    pub entities: Vec<String>,
    pub updates: Vec<FieldUpdate>,
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Task failed: {0}")]
    Failed(String),

    /// The context is gone. Workers stop and the supervisor acquires a new one.
    #[error("Execution context disconnected: {0}")]
    Disconnected(String),
}

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn execute(&self, task: &Task) -> Result<ExecutionOutput, ExecutionError>;
}

/// Source of execution contexts.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn acquire(&self) -> Result<Arc<dyn TaskExecutor>, ExecutionError>;
}
