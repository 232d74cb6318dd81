#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Lifecycle tag of a task. Assigned in the order
/// `analyzing → searching → booking → completed`; `error` may follow any
/// non-terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Analyzing,
    Searching,
    Booking,
    Completed,
    Error,
}

impl TaskStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Analyzing => "Analyzing",
            Self::Searching => "Searching",
            Self::Booking => "Booking",
            Self::Completed => "Completed",
            Self::Error => "Error",
        }
    }

    /// Short badge shown in the history list.
    #[must_use]
    pub fn badge(self) -> &'static str {
        match self {
            Self::Completed => "Done",
            Self::Error => "Failed",
            _ => "Running",
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Analyzing => "analyzing",
            Self::Searching => "searching",
            Self::Booking => "booking",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Progress bar fill, in percent.
    #[must_use]
    pub fn progress_percent(self) -> u16 {
        match self {
            Self::Analyzing => 25,
            Self::Searching => 50,
            Self::Booking => 75,
            Self::Completed | Self::Error => 100,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a free-text progress step to a status tag.
///
/// Matching is a case-insensitive substring search. `book` wins over
/// `search`, which wins over `analyz`; anything else counts as searching.
#[must_use]
pub fn status_for_step(step: &str) -> TaskStatus {
    let step = step.to_lowercase();
    if step.contains("book") {
        TaskStatus::Booking
    } else if step.contains("search") {
        TaskStatus::Searching
    } else if step.contains("analyz") {
        TaskStatus::Analyzing
    } else {
        TaskStatus::Searching
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out task ids derived from the wall clock in milliseconds, bumped
/// when needed so every id is strictly greater than the last one.
#[derive(Debug, Default)]
pub struct TaskIdGenerator {
    last: u64,
}

impl TaskIdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> TaskId {
        let now = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        let now = u64::try_from(now).unwrap_or(0);
        self.last = now.max(self.last.saturating_add(1));
        TaskId(self.last)
    }
}

pub const INITIAL_MESSAGE: &str = "Analyzing your task...";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub status: TaskStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl Task {
    #[must_use]
    pub fn new(id: TaskId, description: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
            status: TaskStatus::Analyzing,
            message: INITIAL_MESSAGE.to_owned(),
            result: None,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Overwrites status, message and result, and re-stamps the task.
    ///
    /// A result is only kept for `completed`.
    pub fn update(&mut self, status: TaskStatus, message: impl Into<String>, result: Option<String>) {
        self.status = status;
        self.message = message.into();
        self.result = if status == TaskStatus::Completed {
            result
        } else {
            None
        };
        self.timestamp = next_timestamp(self.timestamp, OffsetDateTime::now_utc());
    }
}

// Keeps per-task timestamps strictly increasing even when the clock stalls.
fn next_timestamp(prev: OffsetDateTime, now: OffsetDateTime) -> OffsetDateTime {
    if now > prev {
        now
    } else {
        prev + time::Duration::microseconds(1)
    }
}
