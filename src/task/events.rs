#![forbid(unsafe_code)]

use tokio::sync::mpsc;

use crate::task::model::{TaskId, TaskStatus};

/// An update produced by an agent run, addressed to the task it was started for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub kind: TaskEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEventKind {
    Started,
    /// Free-text step description; the status is derived from keywords.
    Progress(String),
    /// Fixed transition with an explicit status.
    Step { status: TaskStatus, message: String },
    Completed(String),
    /// Error reported by the agent itself.
    Failed(String),
    /// Invoking or running the agent blew up.
    InvocationFailed(String),
}

pub type TaskEventSender = mpsc::UnboundedSender<TaskEvent>;
pub type TaskEventReceiver = mpsc::UnboundedReceiver<TaskEvent>;

#[must_use]
pub fn channel() -> (TaskEventSender, TaskEventReceiver) {
    mpsc::unbounded_channel()
}
