#![forbid(unsafe_code)]

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskpilotError {
    #[error("Please describe your task")]
    EmptyTask,

    #[error("a task is already in progress")]
    TaskInProgress,

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid config key '{0}'")]
    InvalidConfigKey(String),

    #[error("invalid config value for '{key}': {msg}")]
    InvalidConfigValue { key: String, msg: String },

    #[error("{0}")]
    Other(String),
}
