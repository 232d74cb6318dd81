#![forbid(unsafe_code)]

//! The automation agent a task is delegated to.
//!
//! An [`Agent`] receives the task description and reports back through four
//! callbacks (start, progress, complete, error) on an [`AgentCallbacks`]
//! handle. Callbacks only enqueue [`TaskEvent`]s; the orchestrator applies
//! them on its own loop.

pub mod command;
pub mod simulated;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::{AgentConfig, AgentMode, Config};
use crate::error::TaskpilotError;
use crate::task::events::{TaskEvent, TaskEventKind, TaskEventSender};
use crate::task::model::{TaskId, TaskStatus};

pub use command::CommandAgent;
pub use simulated::{SimulatedAgent, SimulatedTimeline};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to start agent '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("agent io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("agent timed out after {0:?}")]
    TimedOut(Duration),

    #[error("agent exited without reporting a result (exit code {0:?})")]
    ExitedWithoutResult(Option<i32>),

    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs the task to completion, reporting through `callbacks`.
    ///
    /// An `Err` means the invocation itself failed; errors the agent wants to
    /// show the user go through [`AgentCallbacks::on_error`] instead.
    async fn handle_task(
        &self,
        description: &str,
        callbacks: AgentCallbacks,
    ) -> Result<(), AgentError>;
}

/// Callback handle bound to a single task.
#[derive(Debug, Clone)]
pub struct AgentCallbacks {
    task_id: TaskId,
    events: TaskEventSender,
    cancel: CancellationToken,
}

impl AgentCallbacks {
    #[must_use]
    pub fn new(task_id: TaskId, events: TaskEventSender, cancel: CancellationToken) -> Self {
        Self {
            task_id,
            events,
            cancel,
        }
    }

    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn on_start(&self) {
        self.send(TaskEventKind::Started);
    }

    pub fn on_progress(&self, step: impl Into<String>) {
        self.send(TaskEventKind::Progress(step.into()));
    }

    pub fn on_step(&self, status: TaskStatus, message: impl Into<String>) {
        self.send(TaskEventKind::Step {
            status,
            message: message.into(),
        });
    }

    pub fn on_complete(&self, result: impl Into<String>) {
        self.send(TaskEventKind::Completed(result.into()));
    }

    pub fn on_error(&self, message: impl Into<String>) {
        self.send(TaskEventKind::Failed(message.into()));
    }

    pub(crate) fn on_invocation_failed(&self, message: impl Into<String>) {
        self.send(TaskEventKind::InvocationFailed(message.into()));
    }

    /// Resolves once the task this handle belongs to has been cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    fn send(&self, kind: TaskEventKind) {
        // The receiver lives as long as the orchestrator; a closed channel
        // means the app is shutting down.
        let _ = self.events.send(TaskEvent {
            task_id: self.task_id,
            kind,
        });
    }
}

/// Picks the external agent, if one is configured and present.
///
/// `None` makes the orchestrator fall back to the simulated timeline.
pub fn select_external(cfg: &AgentConfig) -> Result<Option<Arc<dyn Agent>>, TaskpilotError> {
    match cfg.mode {
        AgentMode::Simulated => Ok(None),
        AgentMode::Auto => {
            if cfg.command.trim().is_empty() {
                return Ok(None);
            }
            match resolve_executable(&cfg.command) {
                Some(path) => Ok(Some(Arc::new(CommandAgent::from_config(cfg, path)?))),
                None => {
                    tracing::info!(
                        command = %cfg.command,
                        "agent command not found; using simulated agent"
                    );
                    Ok(None)
                }
            }
        }
        AgentMode::Command => {
            let path = resolve_executable(&cfg.command).ok_or_else(|| {
                TaskpilotError::Config(format!("agent.command '{}' not found", cfg.command))
            })?;
            Ok(Some(Arc::new(CommandAgent::from_config(cfg, path)?)))
        }
    }
}

#[must_use]
pub fn fallback(cfg: &Config) -> Arc<dyn Agent> {
    Arc::new(SimulatedAgent::new(SimulatedTimeline::from_config(
        &cfg.simulation,
    )))
}

/// Finds `program` either as a path or on `PATH`.
#[must_use]
pub fn resolve_executable(program: &str) -> Option<PathBuf> {
    let program = program.trim();
    if program.is_empty() {
        return None;
    }
    let direct = Path::new(program);
    if direct.components().count() > 1 || direct.is_absolute() {
        return direct.is_file().then(|| direct.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&paths) {
        let candidate = dir.join(program);
        if candidate.is_file() {
            return Some(candidate);
        }
        if cfg!(windows) {
            let exe = candidate.with_extension("exe");
            if exe.is_file() {
                return Some(exe);
            }
        }
    }
    None
}
