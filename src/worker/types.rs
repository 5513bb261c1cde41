use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::site::{SiteId, SiteLocks, StatusReporter};
use crate::tasks::runtime::ContainerRuntime;
use crate::tasks::types::{FailureKind, State};

pub struct Worker {
    pub name: String,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub reporter: StatusReporter,
    pub locks: SiteLocks,
    pub pod_domain: String,
    pub task_count: u64,
}

/// What happened to one dequeued task. The persisted site row is the durable
/// record; this is for in-process observers and logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskOutcome {
    pub task_id: uuid::Uuid,
    pub site_id: SiteId,
    pub state: State,
    pub container_id: Option<String>,
    pub failure: Option<FailureKind>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("task queue is closed, task {0} was not enqueued")]
    Closed(uuid::Uuid),
}

pub type QueueResult<T> = Result<T, QueueError>;
