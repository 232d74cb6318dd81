#![forbid(unsafe_code)]

use std::collections::VecDeque;

use crate::task::model::Task;

pub const HISTORY_CAPACITY: usize = 5;

/// Most recent finished tasks, newest first.
#[derive(Debug, Clone, Default)]
pub struct TaskHistory {
    entries: VecDeque<Task>,
}

impl TaskHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepends a snapshot; the oldest entry is dropped once the history is full.
    pub fn push(&mut self, task: Task) {
        self.entries.push_front(task);
        self.entries.truncate(HISTORY_CAPACITY);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Task> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.entries.iter()
    }
}
