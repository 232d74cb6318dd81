#![forbid(unsafe_code)]

//! External agent reached through a child process.
//!
//! The process gets the task description as its last argument and reports
//! back on stdout, one JSON object per line:
//!
//! ```text
//! {"type":"start"}
//! {"type":"progress","step":"Searching for dentists"}
//! {"type":"complete","result":"Booked for Friday 9:00"}
//! {"type":"error","error":{"message":"no availability"}}
//! ```
//!
//! Lines that are not JSON are treated as progress steps.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt as _, AsyncRead, BufReader};
use tokio::process::Child;

use crate::agent::{Agent, AgentCallbacks, AgentError};
use crate::config::{self, AgentConfig};
use crate::error::TaskpilotError;

#[derive(Debug, Clone)]
pub struct CommandAgent {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandAgent {
    #[must_use]
    pub fn new(program: PathBuf, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program,
            args,
            timeout,
        }
    }

    pub fn from_config(cfg: &AgentConfig, program: PathBuf) -> Result<Self, TaskpilotError> {
        let timeout = config::parse_duration(&cfg.timeout).map_err(|e| {
            TaskpilotError::InvalidConfigValue {
                key: "agent.timeout".to_owned(),
                msg: e.to_string(),
            }
        })?;
        Ok(Self::new(program, cfg.args.clone(), timeout))
    }
}

#[async_trait]
impl Agent for CommandAgent {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn handle_task(
        &self,
        description: &str,
        callbacks: AgentCallbacks,
    ) -> Result<(), AgentError> {
        let program = self.program.to_string_lossy().into_owned();
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args);
        cmd.arg(description);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| AgentError::Spawn {
            program: program.clone(),
            source,
        })?;
        tracing::debug!(task_id = %callbacks.task_id(), program = %program, "agent process started");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Other("agent stdout unavailable".to_owned()))?;

        if let Some(err) = child.stderr.take() {
            let task_id = callbacks.task_id();
            tokio::spawn(async move {
                let mut lines = BufReader::new(err).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        tracing::debug!(task_id = %task_id, line = %line, "agent stderr");
                    }
                }
            });
        }

        // One deadline covers both reading stdout and waiting for exit.
        let outcome = tokio::select! {
            () = callbacks.cancelled() => None,
            res = tokio::time::timeout(self.timeout, pump_and_wait(&mut child, stdout, &callbacks)) => Some(res),
        };

        let Some(res) = outcome else {
            let _ = child.kill().await;
            return Ok(());
        };
        let Ok(res) = res else {
            tracing::warn!(task_id = %callbacks.task_id(), timeout = ?self.timeout, "agent timed out");
            let _ = child.kill().await;
            return Err(AgentError::TimedOut(self.timeout));
        };
        let (finished, status) = res?;

        tracing::debug!(task_id = %callbacks.task_id(), code = ?status.code(), "agent process exited");
        if !finished {
            return Err(AgentError::ExitedWithoutResult(status.code()));
        }
        Ok(())
    }
}

async fn pump_and_wait<R>(
    child: &mut Child,
    stdout: R,
    callbacks: &AgentCallbacks,
) -> Result<(bool, ExitStatus), AgentError>
where
    R: AsyncRead + Unpin,
{
    let finished = pump_events(stdout, callbacks).await?;
    let status = child.wait().await?;
    Ok((finished, status))
}

// Forwards every stdout line to the callbacks. Returns whether a terminal
// event (complete or error) was seen.
async fn pump_events<R>(stdout: R, callbacks: &AgentCallbacks) -> Result<bool, AgentError>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stdout).lines();
    let mut finished = false;
    while let Some(line) = lines.next_line().await? {
        let Some(msg) = parse_line(&line) else {
            continue;
        };
        if finished {
            tracing::debug!(task_id = %callbacks.task_id(), line = %line, "agent output after final event");
            continue;
        }
        match msg {
            AgentMessage::Start => callbacks.on_start(),
            AgentMessage::Progress { step } => callbacks.on_progress(step),
            AgentMessage::Complete { result } => {
                callbacks.on_complete(result);
                finished = true;
            }
            AgentMessage::Error { error } => {
                callbacks.on_error(error_message(&error));
                finished = true;
            }
        }
    }
    Ok(finished)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum AgentMessage {
    Start,
    Progress {
        step: String,
    },
    Complete {
        #[serde(default)]
        result: String,
    },
    Error {
        #[serde(default, alias = "message")]
        error: serde_json::Value,
    },
}

fn parse_line(line: &str) -> Option<AgentMessage> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line.starts_with('{') {
        match serde_json::from_str::<AgentMessage>(line) {
            Ok(msg) => return Some(msg),
            Err(e) => {
                if serde_json::from_str::<serde_json::Value>(line).is_ok() {
                    tracing::debug!(line, error = %e, "ignoring unrecognised agent message");
                    return None;
                }
            }
        }
    }
    Some(AgentMessage::Progress {
        step: line.to_owned(),
    })
}

/// Extracts a user-facing message from an agent error value: its `message`
/// field when there is one, otherwise the value itself as text.
#[must_use]
pub fn error_message(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "unknown error".to_owned(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(map) => match map.get("message") {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
            _ => value.to_string(),
        },
        other => other.to_string(),
    }
}
