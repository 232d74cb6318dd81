#![forbid(unsafe_code)]

pub mod events;
pub mod history;
pub mod intake;
pub mod model;
pub mod orchestrator;
