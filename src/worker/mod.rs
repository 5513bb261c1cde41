//! The provisioning task engine and its queue.

pub mod queue;
pub mod types;
pub mod worker;

pub use queue::{TaskReceiver, TaskSender, task_queue};
pub use types::{QueueError, TaskOutcome, Worker};
pub use worker::{run_tasks, spec_for};
