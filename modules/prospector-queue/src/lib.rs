pub mod commands;
pub mod error;
pub mod lease;
pub mod object_queue;
pub mod queue;
pub mod sqs;

pub use commands::{parse_command_body, CommandEnvelope, CommandQueue, MemoryCommandQueue, ReceivedCommand};
pub use error::{QueueError, Result};
pub use lease::{Lease, LeaseTimings};
pub use object_queue::ObjectQueue;
pub use queue::{DurableQueue, LeasedTask, QueueStats, TaskEnvelope};
pub use sqs::SqsCommandQueue;
