#![forbid(unsafe_code)]

use crate::error::TaskpilotError;

pub const EXAMPLE_TASKS: [&str; 4] = [
    "Find top-rated dentists nearby and book the earliest available appointment",
    "Search for Italian restaurants with good reviews and make a reservation for tonight",
    "Find a reliable car mechanic and schedule a brake inspection",
    "Look for yoga classes in my area and sign me up for a beginner session",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub description: String,
}

/// Validation and example prefill for the task text box. The text itself
/// lives with the input widget.
#[derive(Debug, Clone, Default)]
pub struct TaskIntake {
    next_example: usize,
}

impl TaskIntake {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Turns `text` into a start request.
    ///
    /// Inert while `disabled`. The caller clears its buffer on `Ok(Some(_))`.
    pub fn submit(text: &str, disabled: bool) -> Result<Option<StartRequest>, TaskpilotError> {
        if disabled {
            return Ok(None);
        }
        let description = text.trim();
        if description.is_empty() {
            return Err(TaskpilotError::EmptyTask);
        }
        Ok(Some(StartRequest {
            description: description.to_owned(),
        }))
    }

    /// Returns the next example task to prefill.
    pub fn cycle_example(&mut self, disabled: bool) -> Option<&'static str> {
        if disabled {
            return None;
        }
        let example = EXAMPLE_TASKS[self.next_example % EXAMPLE_TASKS.len()];
        self.next_example = (self.next_example + 1) % EXAMPLE_TASKS.len();
        Some(example)
    }
}

/// Validates a one-shot description (headless mode).
pub fn validate_description(text: &str) -> Result<StartRequest, TaskpilotError> {
    TaskIntake::submit(text, false)?.ok_or(TaskpilotError::EmptyTask)
}
