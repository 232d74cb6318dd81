#![forbid(unsafe_code)]

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::agent::{Agent, AgentCallbacks};
use crate::error::TaskpilotError;
use crate::task::events::{self, TaskEvent, TaskEventKind, TaskEventReceiver, TaskEventSender};
use crate::task::history::TaskHistory;
use crate::task::intake::StartRequest;
use crate::task::model::{self, Task, TaskId, TaskIdGenerator, TaskStatus};

pub const MSG_AGENT_STARTED: &str = "Agent is working on your request...";
pub const MSG_COMPLETED: &str = "Task completed successfully!";
pub const MSG_INVOCATION_FAILED: &str = "Failed to process task";

/// Owns the current task and the history, and applies agent events to them.
///
/// Agent runs are spawned on the ambient tokio runtime and only talk back
/// through the event channel, so all state changes happen on whichever loop
/// drains [`Orchestrator::poll_events`] or [`Orchestrator::run_until_idle`].
pub struct Orchestrator {
    external: Option<Arc<dyn Agent>>,
    fallback: Arc<dyn Agent>,
    cancel_on_discard: bool,

    tx: TaskEventSender,
    rx: TaskEventReceiver,
    ids: TaskIdGenerator,

    current: Option<Task>,
    history: TaskHistory,
    processing: bool,
    cancel: Option<CancellationToken>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("external", &self.external.as_ref().map(|a| a.name()))
            .field("fallback", &self.fallback.name())
            .field("current", &self.current)
            .field("history", &self.history.len())
            .field("processing", &self.processing)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    #[must_use]
    pub fn new(external: Option<Arc<dyn Agent>>, fallback: Arc<dyn Agent>) -> Self {
        let (tx, rx) = events::channel();
        Self {
            external,
            fallback,
            cancel_on_discard: false,
            tx,
            rx,
            ids: TaskIdGenerator::new(),
            current: None,
            history: TaskHistory::new(),
            processing: false,
            cancel: None,
        }
    }

    /// Cancel the in-flight agent run when the current task is discarded.
    #[must_use]
    pub fn with_cancel_on_discard(mut self, enabled: bool) -> Self {
        self.cancel_on_discard = enabled;
        self
    }

    #[must_use]
    pub fn current(&self) -> Option<&Task> {
        self.current.as_ref()
    }

    #[must_use]
    pub fn history(&self) -> &TaskHistory {
        &self.history
    }

    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.processing
    }

    /// Name of the agent the next task will be handed to.
    #[must_use]
    pub fn agent_name(&self) -> &'static str {
        self.agent().name()
    }

    fn agent(&self) -> Arc<dyn Agent> {
        self.external
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    /// Creates a new current task and hands it to the agent.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self, request: StartRequest) -> Result<TaskId, TaskpilotError> {
        if self.processing {
            return Err(TaskpilotError::TaskInProgress);
        }
        let description = request.description.trim();
        if description.is_empty() {
            return Err(TaskpilotError::EmptyTask);
        }

        let task = Task::new(self.ids.next_id(), description);
        let task_id = task.id;
        let description = task.description.clone();
        self.current = Some(task);
        self.processing = true;

        let agent = self.agent();
        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());
        let callbacks = AgentCallbacks::new(task_id, self.tx.clone(), cancel);

        tracing::info!(task_id = %task_id, agent = agent.name(), "task started");
        tokio::spawn(async move {
            if let Err(e) = agent.handle_task(&description, callbacks.clone()).await {
                tracing::warn!(task_id = %callbacks.task_id(), error = %e, "agent invocation failed");
                callbacks.on_invocation_failed(e.to_string());
            }
        });

        Ok(task_id)
    }

    /// Applies one event. Returns whether the current task changed.
    ///
    /// Events for any task other than the current one, or arriving after the
    /// current task already finished, are dropped.
    pub fn apply(&mut self, event: TaskEvent) -> bool {
        let Some(task) = self.current.as_mut() else {
            tracing::debug!(task_id = %event.task_id, "dropping event: no current task");
            return false;
        };
        if task.id != event.task_id {
            tracing::debug!(
                task_id = %event.task_id,
                current = %task.id,
                "dropping event for discarded task"
            );
            return false;
        }
        if task.is_terminal() {
            tracing::debug!(task_id = %task.id, "dropping event after final status");
            return false;
        }

        let (status, message, result) = match event.kind {
            TaskEventKind::Started => (TaskStatus::Analyzing, MSG_AGENT_STARTED.to_owned(), None),
            TaskEventKind::Progress(step) => {
                (model::status_for_step(&step), format!("Step: {step}"), None)
            }
            TaskEventKind::Step { status, message } => (status, message, None),
            TaskEventKind::Completed(result) => {
                (TaskStatus::Completed, MSG_COMPLETED.to_owned(), Some(result))
            }
            TaskEventKind::Failed(err) => (TaskStatus::Error, format!("Error: {err}"), None),
            TaskEventKind::InvocationFailed(_) => {
                (TaskStatus::Error, MSG_INVOCATION_FAILED.to_owned(), None)
            }
        };

        task.update(status, message, result);
        tracing::debug!(task_id = %task.id, status = %task.status, message = %task.message, "task updated");

        if status.is_terminal() {
            tracing::info!(task_id = %task.id, status = %status, "task finished");
            self.history.push(task.clone());
            self.processing = false;
            self.cancel = None;
        }
        true
    }

    /// Applies every queued event without waiting. Returns whether anything changed.
    pub fn poll_events(&mut self) -> bool {
        let mut changed = false;
        while let Ok(event) = self.rx.try_recv() {
            changed |= self.apply(event);
        }
        changed
    }

    /// Waits for events until the current task is no longer processing,
    /// calling `on_update` after every applied change.
    pub async fn run_until_idle(&mut self, mut on_update: impl FnMut(&Task)) -> Option<Task> {
        while self.processing {
            let Some(event) = self.rx.recv().await else {
                break;
            };
            if self.apply(event)
                && let Some(task) = self.current.as_ref()
            {
                on_update(task);
            }
        }
        self.current.clone()
    }

    /// Drops the current task ("start new").
    ///
    /// The agent run keeps going unless cancel-on-discard is enabled; its
    /// later events no longer match and are ignored.
    pub fn discard_current(&mut self) -> Option<Task> {
        let discarded = self.current.take();
        self.processing = false;
        if let Some(token) = self.cancel.take()
            && self.cancel_on_discard
        {
            token.cancel();
        }
        if let Some(task) = &discarded {
            tracing::debug!(task_id = %task.id, status = %task.status, "current task discarded");
        }
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentError, SimulatedAgent};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone)]
    enum Script {
        Start,
        Progress(&'static str),
        Complete(&'static str),
        Error(&'static str),
        Wait(u64),
        Fail(&'static str),
    }

    struct ScriptedAgent {
        script: Vec<Script>,
    }

    #[async_trait]
    impl Agent for ScriptedAgent {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn handle_task(
            &self,
            _description: &str,
            callbacks: AgentCallbacks,
        ) -> Result<(), AgentError> {
            for step in &self.script {
                match step {
                    Script::Start => callbacks.on_start(),
                    Script::Progress(s) => callbacks.on_progress(*s),
                    Script::Complete(r) => callbacks.on_complete(*r),
                    Script::Error(e) => callbacks.on_error(*e),
                    Script::Wait(ms) => tokio::time::sleep(Duration::from_millis(*ms)).await,
                    Script::Fail(msg) => return Err(AgentError::Other((*msg).to_owned())),
                }
            }
            Ok(())
        }
    }

    fn scripted(script: Vec<Script>) -> Orchestrator {
        Orchestrator::new(
            Some(Arc::new(ScriptedAgent { script })),
            Arc::new(SimulatedAgent::default()),
        )
    }

    fn request(text: &str) -> StartRequest {
        StartRequest {
            description: text.to_owned(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_path_walks_every_status_in_order() {
        let mut orch = Orchestrator::new(None, Arc::new(SimulatedAgent::default()));
        assert_eq!(orch.agent_name(), "simulated");

        let started = tokio::time::Instant::now();
        orch.start(request("Find a dentist and book a cleaning")).unwrap();
        assert_eq!(orch.current().unwrap().status, TaskStatus::Analyzing);

        let mut seen = Vec::new();
        let done = orch.run_until_idle(|t| seen.push(t.status)).await.unwrap();

        assert_eq!(
            seen,
            vec![
                TaskStatus::Analyzing,
                TaskStatus::Searching,
                TaskStatus::Booking,
                TaskStatus::Completed,
            ]
        );
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(8500));
        assert!(elapsed < Duration::from_millis(8600));
        assert_eq!(done.message, MSG_COMPLETED);
        assert!(done.result.unwrap().ends_with("at 2:00 PM"));
        assert!(!orch.is_processing());
        assert_eq!(orch.history().get(0).map(|t| t.id), Some(done.id));
    }

    #[tokio::test]
    async fn external_progress_is_keyword_mapped() {
        let mut orch = scripted(vec![
            Script::Start,
            Script::Progress("Analyzing the request"),
            Script::Progress("Booking your SEARCH slot"),
            Script::Progress("calling the venue"),
            Script::Complete("Table for two at 7pm"),
        ]);
        orch.start(request("dinner")).unwrap();

        let mut seen = Vec::new();
        let done = orch
            .run_until_idle(|t| seen.push((t.status, t.message.clone())))
            .await
            .unwrap();

        assert_eq!(
            seen,
            vec![
                (TaskStatus::Analyzing, MSG_AGENT_STARTED.to_owned()),
                (
                    TaskStatus::Analyzing,
                    "Step: Analyzing the request".to_owned()
                ),
                (
                    TaskStatus::Booking,
                    "Step: Booking your SEARCH slot".to_owned()
                ),
                (TaskStatus::Searching, "Step: calling the venue".to_owned()),
                (TaskStatus::Completed, MSG_COMPLETED.to_owned()),
            ]
        );
        assert_eq!(done.result.as_deref(), Some("Table for two at 7pm"));
    }

    #[tokio::test]
    async fn agent_reported_error_is_terminal_without_result() {
        let mut orch = scripted(vec![Script::Start, Script::Error("no availability")]);
        orch.start(request("book a flight")).unwrap();
        let done = orch.run_until_idle(|_| {}).await.unwrap();

        assert_eq!(done.status, TaskStatus::Error);
        assert_eq!(done.message, "Error: no availability");
        assert!(done.result.is_none());
        assert_eq!(orch.history().get(0).map(|t| t.status), Some(TaskStatus::Error));
    }

    #[tokio::test]
    async fn invocation_failure_maps_to_generic_error() {
        let mut orch = scripted(vec![Script::Start, Script::Fail("socket closed")]);
        orch.start(request("book a flight")).unwrap();
        let done = orch.run_until_idle(|_| {}).await.unwrap();

        assert_eq!(done.status, TaskStatus::Error);
        assert_eq!(done.message, MSG_INVOCATION_FAILED);
        assert!(!orch.is_processing());
    }

    #[tokio::test]
    async fn events_after_terminal_state_are_ignored() {
        // Completes, then the invocation itself fails.
        let mut orch = scripted(vec![Script::Complete("ok"), Script::Fail("late")]);
        orch.start(request("x")).unwrap();
        orch.run_until_idle(|_| {}).await;
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!orch.poll_events());
        assert_eq!(orch.current().unwrap().status, TaskStatus::Completed);
        assert_eq!(orch.history().len(), 1);
    }

    #[tokio::test]
    async fn start_is_refused_while_processing() {
        let mut orch = scripted(vec![Script::Wait(1_000)]);
        orch.start(request("first")).unwrap();
        let err = orch.start(request("second")).unwrap_err();
        assert!(matches!(err, TaskpilotError::TaskInProgress));
        assert_eq!(orch.current().unwrap().description, "first");
    }

    #[tokio::test]
    async fn blank_request_creates_nothing() {
        let mut orch = scripted(vec![]);
        assert!(matches!(
            orch.start(request("  \n ")).unwrap_err(),
            TaskpilotError::EmptyTask
        ));
        assert!(orch.current().is_none());
        assert!(!orch.is_processing());
    }

    #[tokio::test]
    async fn new_task_after_terminal_starts_clean() {
        let mut orch = scripted(vec![Script::Complete("Booked")]);
        let first = orch.start(request("first")).unwrap();
        orch.run_until_idle(|_| {}).await;

        orch.discard_current();
        assert!(orch.current().is_none());

        let second = orch.start(request("second")).unwrap();
        assert!(second > first);
        let task = orch.current().unwrap();
        assert_eq!(task.status, TaskStatus::Analyzing);
        assert_eq!(task.message, model::INITIAL_MESSAGE);
        assert!(task.result.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn late_events_for_discarded_task_are_dropped() {
        let mut orch = scripted(vec![Script::Wait(500), Script::Complete("late")]);
        let first = orch.start(request("first")).unwrap();
        orch.discard_current();

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert!(!orch.poll_events());
        assert!(orch.current().is_none());
        assert!(orch.history().is_empty());

        // Directly addressed stale event for a newer current task.
        orch.start(request("second")).unwrap();
        let stale = TaskEvent {
            task_id: first,
            kind: TaskEventKind::Completed("stale".to_owned()),
        };
        assert!(!orch.apply(stale));
        assert_eq!(orch.current().unwrap().status, TaskStatus::Analyzing);
    }

    #[tokio::test]
    async fn history_keeps_the_five_latest() {
        let mut orch = scripted(vec![Script::Complete("ok")]);
        let mut ids = Vec::new();
        for i in 0..6 {
            ids.push(orch.start(request(&format!("task {i}"))).unwrap());
            orch.run_until_idle(|_| {}).await;
            orch.discard_current();
        }
        assert_eq!(orch.history().len(), 5);
        let kept: Vec<TaskId> = orch.history().iter().map(|t| t.id).collect();
        let expected: Vec<TaskId> = ids.iter().rev().take(5).copied().collect();
        assert_eq!(kept, expected);
    }

    struct WaitsForCancel {
        cancelled: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Agent for WaitsForCancel {
        fn name(&self) -> &'static str {
            "waits-for-cancel"
        }

        async fn handle_task(
            &self,
            _description: &str,
            callbacks: AgentCallbacks,
        ) -> Result<(), AgentError> {
            callbacks.cancelled().await;
            self.cancelled.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn discard_cancels_only_when_enabled() {
        for enabled in [false, true] {
            let flag = Arc::new(AtomicBool::new(false));
            let mut orch = Orchestrator::new(
                Some(Arc::new(WaitsForCancel {
                    cancelled: Arc::clone(&flag),
                })),
                Arc::new(SimulatedAgent::default()),
            )
            .with_cancel_on_discard(enabled);

            orch.start(request("x")).unwrap();
            tokio::task::yield_now().await;
            orch.discard_current();
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(flag.load(Ordering::SeqCst), enabled);
        }
    }
}
