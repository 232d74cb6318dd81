use std::sync::Arc;
use std::time::Duration;

use taskpilot::agent::{self, SimulatedAgent, SimulatedTimeline};
use taskpilot::config::{self, AgentMode};
use taskpilot::task::history::HISTORY_CAPACITY;
use taskpilot::task::intake::validate_description;
use taskpilot::task::model::TaskStatus;
use taskpilot::task::orchestrator::Orchestrator;

fn instant_timeline() -> SimulatedTimeline {
    SimulatedTimeline {
        analyzing: Duration::ZERO,
        searching: Duration::ZERO,
        booking: Duration::ZERO,
        completed: Duration::ZERO,
    }
}

#[tokio::test]
async fn history_keeps_newest_five() {
    let mut orch = Orchestrator::new(None, Arc::new(SimulatedAgent::new(instant_timeline())));

    for i in 0..7 {
        let req = validate_description(&format!("task {i}")).expect("valid");
        orch.start(req).expect("start");
        let done = orch.run_until_idle(|_| {}).await.expect("finished");
        assert_eq!(done.status, TaskStatus::Completed);
        orch.discard_current();
    }

    let descriptions: Vec<&str> = orch
        .history()
        .iter()
        .map(|t| t.description.as_str())
        .collect();
    assert_eq!(descriptions.len(), HISTORY_CAPACITY);
    assert_eq!(descriptions, ["task 6", "task 5", "task 4", "task 3", "task 2"]);

    let ids: Vec<u64> = orch.history().iter().map(|t| t.id.as_u64()).collect();
    assert!(ids.windows(2).all(|w| w[0] > w[1]));
}

#[test]
fn config_set_then_get_round_trips() {
    let td = tempfile::tempdir().expect("tempdir");
    let path = td.path().join("nested").join("config.toml");

    config::set_value_string_at_path(&path, "simulation.analyzing_ms", "5").expect("set");
    config::set_value_string_at_path(&path, "orchestrator.cancel_on_discard", "true")
        .expect("set");
    config::set_value_string_at_path(&path, "agent.mode", "simulated").expect("set");

    assert_eq!(
        config::get_value_string_at_path(&path, "simulation.analyzing_ms")
            .expect("get")
            .as_deref(),
        Some("5")
    );
    let cfg = config::load_at_path(&path).expect("load");
    assert_eq!(cfg.simulation.analyzing_ms, 5);
    assert!(cfg.orchestrator.cancel_on_discard);
    assert_eq!(cfg.agent.mode, AgentMode::Simulated);
    assert!(agent::select_external(&cfg.agent).expect("select").is_none());

    assert!(config::set_value_string_at_path(&path, "simulation.analyzing_ms", "-1").is_err());
    assert!(config::set_value_string_at_path(&path, "no.such.key", "1").is_err());
}

#[cfg(unix)]
#[tokio::test]
async fn command_agent_drives_task_to_completion() {
    use std::os::unix::fs::PermissionsExt as _;

    let td = tempfile::tempdir().expect("tempdir");
    let script = td.path().join("agent.sh");
    std::fs::write(
        &script,
        concat!(
            "#!/bin/sh\n",
            "echo '{\"type\":\"start\"}'\n",
            "echo 'Searching for salons'\n",
            "echo '{\"type\":\"progress\",\"step\":\"Booking a slot\"}'\n",
            "echo \"{\\\"type\\\":\\\"complete\\\",\\\"result\\\":\\\"Booked: $1\\\"}\"\n",
        ),
    )
    .expect("write script");
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).expect("chmod");

    let mut cfg = config::Config::default();
    cfg.agent.mode = AgentMode::Command;
    cfg.agent.command = script.to_string_lossy().into_owned();
    cfg.agent.timeout = "10s".to_owned();

    let external = agent::select_external(&cfg.agent).expect("select");
    let mut orch = Orchestrator::new(external, agent::fallback(&cfg));
    assert_eq!(orch.agent_name(), "command");

    orch.start(validate_description("haircut").expect("valid"))
        .expect("start");
    let mut seen = Vec::new();
    let done = orch
        .run_until_idle(|t| seen.push(t.status))
        .await
        .expect("finished");

    assert_eq!(
        seen,
        vec![
            TaskStatus::Analyzing,
            TaskStatus::Searching,
            TaskStatus::Booking,
            TaskStatus::Completed,
        ]
    );
    assert_eq!(done.result.as_deref(), Some("Booked: haircut"));
}

#[cfg(unix)]
#[tokio::test]
async fn command_agent_exiting_silently_is_an_invocation_failure() {
    use std::os::unix::fs::PermissionsExt as _;

    let td = tempfile::tempdir().expect("tempdir");
    let script = td.path().join("quiet.sh");
    std::fs::write(&script, "#!/bin/sh\nexit 3\n").expect("write script");
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).expect("chmod");

    let mut cfg = config::Config::default();
    cfg.agent.command = script.to_string_lossy().into_owned();

    let external = agent::select_external(&cfg.agent).expect("select");
    let mut orch = Orchestrator::new(external, agent::fallback(&cfg));
    orch.start(validate_description("x").expect("valid"))
        .expect("start");
    let done = orch.run_until_idle(|_| {}).await.expect("finished");

    assert_eq!(done.status, TaskStatus::Error);
    assert_eq!(done.message, "Failed to process task");
}

#[cfg(unix)]
#[tokio::test]
async fn agent_that_hangs_after_closing_stdout_times_out_into_error() {
    use std::os::unix::fs::PermissionsExt as _;

    let td = tempfile::tempdir().expect("tempdir");
    let script = td.path().join("hang.sh");
    std::fs::write(
        &script,
        "#!/bin/sh\necho '{\"type\":\"start\"}'\nexec >&-\nsleep 30\n",
    )
    .expect("write script");
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).expect("chmod");

    let mut cfg = config::Config::default();
    cfg.agent.mode = AgentMode::Command;
    cfg.agent.command = script.to_string_lossy().into_owned();
    cfg.agent.timeout = "1s".to_owned();

    let external = agent::select_external(&cfg.agent).expect("select");
    let mut orch = Orchestrator::new(external, agent::fallback(&cfg));
    orch.start(validate_description("x").expect("valid"))
        .expect("start");

    let done = tokio::time::timeout(Duration::from_secs(10), orch.run_until_idle(|_| {}))
        .await
        .expect("run must finish once the agent timeout expires")
        .expect("finished");

    assert_eq!(done.status, TaskStatus::Error);
    assert_eq!(done.message, "Failed to process task");
    assert!(!orch.is_processing());
}
