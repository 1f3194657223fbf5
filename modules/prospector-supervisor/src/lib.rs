pub mod browser;
pub mod campaign;
pub mod commands;
pub mod error;
pub mod executor;
pub mod liveness;
pub mod pool;
pub mod supervisor;
pub mod sync;
pub mod worker;

pub use browser::{BrowserExecutor, BrowserProvider};
pub use campaign::{CampaignConfig, NodeScaling};
pub use commands::{CommandProcessor, CommandSummary, ExclusionList};
pub use error::{Result, SupervisorError};
pub use executor::{
    ContextProvider, ExecutionError, ExecutionOutput, FieldUpdate, ResultBatch, TaskExecutor,
};
pub use pool::WorkerPool;
pub use supervisor::{Supervisor, SupervisorSettings, SupervisorStats, TickReport};
pub use worker::{LoopExit, QueueMap, Worker, WorkerDeps};
