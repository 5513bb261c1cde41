use tokio::sync::mpsc;
use tracing::debug;

use super::types::{QueueError, QueueResult};
use crate::tasks::types::CreateMessage;

/// Producer side of the task queue. Cheap to clone.
#[derive(Debug, Clone)]
pub enum TaskSender {
    Unbounded(mpsc::UnboundedSender<CreateMessage>),
    Bounded(mpsc::Sender<CreateMessage>),
}

#[derive(Debug)]
pub enum TaskReceiver {
    Unbounded(mpsc::UnboundedReceiver<CreateMessage>),
    Bounded(mpsc::Receiver<CreateMessage>),
}

/// FIFO queue between the submission boundary and the worker. `None` or `0`
/// gives an unbounded queue.
pub fn task_queue(capacity: Option<usize>) -> (TaskSender, TaskReceiver) {
    match capacity {
        Some(capacity) if capacity > 0 => {
            let (tx, rx) = mpsc::channel(capacity);
            (TaskSender::Bounded(tx), TaskReceiver::Bounded(rx))
        }
        _ => {
            let (tx, rx) = mpsc::unbounded_channel();
            (TaskSender::Unbounded(tx), TaskReceiver::Unbounded(rx))
        }
    }
}

impl TaskSender {
    /// Hands the message to the worker. Only waits when a bounded queue is
    /// full; the provisioning result lands on the site row later.
    pub async fn enqueue(&self, message: CreateMessage) -> QueueResult<()> {
        let task_id = message.task_id;
        let sent = match self {
            TaskSender::Unbounded(tx) => tx.send(message).is_ok(),
            TaskSender::Bounded(tx) => tx.send(message).await.is_ok(),
        };

        if !sent {
            return Err(QueueError::Closed(task_id));
        }
        debug!(%task_id, "task enqueued");
        Ok(())
    }
}

impl TaskReceiver {
    /// Waits for the next task. `None` once every sender is gone and the
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<CreateMessage> {
        match self {
            TaskReceiver::Unbounded(rx) => rx.recv().await,
            TaskReceiver::Bounded(rx) => rx.recv().await,
        }
    }
}
