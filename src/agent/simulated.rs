#![forbid(unsafe_code)]

use std::time::Duration;

use async_trait::async_trait;
use time::{Date, OffsetDateTime};

use crate::agent::{Agent, AgentCallbacks, AgentError};
use crate::config::SimulationConfig;
use crate::task::model::TaskStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedTimeline {
    pub analyzing: Duration,
    pub searching: Duration,
    pub booking: Duration,
    pub completed: Duration,
}

impl Default for SimulatedTimeline {
    fn default() -> Self {
        Self {
            analyzing: Duration::from_millis(2000),
            searching: Duration::from_millis(3000),
            booking: Duration::from_millis(2500),
            completed: Duration::from_millis(1000),
        }
    }
}

impl SimulatedTimeline {
    #[must_use]
    pub fn from_config(cfg: &SimulationConfig) -> Self {
        Self {
            analyzing: Duration::from_millis(cfg.analyzing_ms),
            searching: Duration::from_millis(cfg.searching_ms),
            booking: Duration::from_millis(cfg.booking_ms),
            completed: Duration::from_millis(cfg.completed_ms),
        }
    }

    #[must_use]
    pub fn total(&self) -> Duration {
        self.analyzing + self.searching + self.booking + self.completed
    }
}

/// Stand-in used when no external agent is available: plays a fixed
/// analyzing → searching → booking → completed timeline and fabricates a
/// booking for tomorrow at 2:00 PM.
#[derive(Debug, Clone, Default)]
pub struct SimulatedAgent {
    timeline: SimulatedTimeline,
}

impl SimulatedAgent {
    #[must_use]
    pub fn new(timeline: SimulatedTimeline) -> Self {
        Self { timeline }
    }
}

#[async_trait]
impl Agent for SimulatedAgent {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn handle_task(
        &self,
        description: &str,
        callbacks: AgentCallbacks,
    ) -> Result<(), AgentError> {
        tracing::debug!(task_id = %callbacks.task_id(), description, "running simulated timeline");

        let steps = [
            (
                TaskStatus::Analyzing,
                "Analyzing your task requirements...",
                self.timeline.analyzing,
            ),
            (
                TaskStatus::Searching,
                "Searching for available providers...",
                self.timeline.searching,
            ),
            (
                TaskStatus::Booking,
                "Booking your appointment...",
                self.timeline.booking,
            ),
        ];

        for (status, message, delay) in steps {
            if !pause(&callbacks, delay).await {
                return Ok(());
            }
            callbacks.on_step(status, message);
        }

        if !pause(&callbacks, self.timeline.completed).await {
            return Ok(());
        }
        let tomorrow = (OffsetDateTime::now_utc() + time::Duration::days(1)).date();
        callbacks.on_complete(booking_result(tomorrow));
        Ok(())
    }
}

// Returns false when the run was cancelled while sleeping.
async fn pause(callbacks: &AgentCallbacks, delay: Duration) -> bool {
    tokio::select! {
        () = callbacks.cancelled() => {
            tracing::debug!(task_id = %callbacks.task_id(), "simulated timeline cancelled");
            false
        }
        () = tokio::time::sleep(delay) => true,
    }
}

#[must_use]
pub fn booking_result(date: Date) -> String {
    format!(
        "Appointment booked for {}/{}/{} at 2:00 PM",
        u8::from(date.month()),
        date.day(),
        date.year()
    )
}
