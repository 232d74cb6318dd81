#![forbid(unsafe_code)]

use std::io::Write as _;
use std::process::ExitCode;

use anyhow::Context as _;
use clap::{CommandFactory as _, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::agent;
use crate::config::{self, Config};
use crate::output::table;
use crate::task::intake;
use crate::task::model::{Task, TaskStatus};
use crate::task::orchestrator::Orchestrator;
use crate::tui;

#[derive(Debug, Parser)]
#[command(
    name = "taskpilot",
    version,
    about = "Describe a task, let an agent search and book it"
)]
pub struct Cli {
    /// Log filter (overrides logging.level and RUST_LOG)
    #[arg(long = "log-level", global = true)]
    pub log_level: Option<String>,
    #[command(subcommand)]
    pub cmd: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run tasks without the UI and print their progress
    Run(RunArgs),
    /// Show or edit the configuration file
    Config(ConfigArgs),
    /// Generate a shell completion script
    Completion(CompletionArgs),
    /// Print version and build information
    Version,
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Task descriptions, processed one after another
    #[arg(required = true)]
    pub tasks: Vec<String>,
    /// Print every update as a JSON line
    #[arg(long = "json", conflicts_with = "csv")]
    pub json: bool,
    /// Print the final history as CSV
    #[arg(long = "csv")]
    pub csv: bool,
    /// Use the simulated agent even if an external one is configured
    #[arg(long = "simulate")]
    pub simulate: bool,
}

#[derive(Debug, Parser)]
pub struct CompletionArgs {
    pub shell: clap_complete::Shell,
}

#[derive(Debug, Parser)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub cmd: ConfigCmd,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCmd {
    /// Print the resolved configuration as TOML
    List,
    /// Set a dotted key, e.g. `agent.mode simulated`
    Set(ConfigSetArgs),
    /// Print the value of a dotted key
    Get(ConfigGetArgs),
}

#[derive(Debug, Parser)]
pub struct ConfigSetArgs {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Parser)]
pub struct ConfigGetArgs {
    pub key: String,
}

pub async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.cmd {
        None => cmd_default(cli.log_level.as_deref()).await,
        Some(Commands::Run(args)) => cmd_run(args, cli.log_level.as_deref()).await,
        Some(Commands::Completion(args)) => {
            let mut cmd = Cli::command();
            clap_complete::generate(args.shell, &mut cmd, "taskpilot", &mut std::io::stdout());
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::Config(args)) => match args.cmd {
            ConfigCmd::List => {
                print!("{}", config::list_resolved_toml()?);
                Ok(ExitCode::SUCCESS)
            }
            ConfigCmd::Set(set) => {
                config::set_value_string(&set.key, &set.value)?;
                println!("Set {} = {}", set.key, set.value);
                Ok(ExitCode::SUCCESS)
            }
            ConfigCmd::Get(get) => match config::get_value_string(&get.key)? {
                Some(v) => {
                    println!("{v}");
                    Ok(ExitCode::SUCCESS)
                }
                None => anyhow::bail!(
                    "configuration key '{}' not found - use 'taskpilot config list' to see available keys",
                    get.key
                ),
            },
        },
        Some(Commands::Version) => Ok(cmd_version()),
    }
}

async fn load_cfg() -> anyhow::Result<Config> {
    let cfg = tokio::task::spawn_blocking(|| -> anyhow::Result<Config> {
        let (cfg, _paths) = config::load()?;
        Ok(cfg)
    })
    .await??;
    Ok(cfg)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogSink {
    Stderr,
    /// The UI owns the terminal; only `logging.file` (if set) receives logs.
    FileOnly,
}

fn init_tracing(cfg: &Config, override_level: Option<&str>, sink: LogSink) -> anyhow::Result<()> {
    let filter = match override_level {
        Some(level) => EnvFilter::try_new(level).context("invalid --log-level")?,
        None => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&cfg.logging.level))
            .context("invalid logging.level")?,
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let file = if cfg.logging.file.trim().is_empty() {
        None
    } else {
        let path = config::expand_path(&cfg.logging.file)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        Some(f)
    };

    // Ignored when a subscriber is already installed.
    let _ = match (file, sink) {
        (Some(f), _) => builder
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(f))
            .try_init(),
        (None, LogSink::Stderr) => builder.with_writer(std::io::stderr).try_init(),
        (None, LogSink::FileOnly) => builder.with_writer(std::io::sink).try_init(),
    };
    Ok(())
}

fn build_orchestrator(cfg: &Config, force_simulate: bool) -> anyhow::Result<Orchestrator> {
    let external = if force_simulate {
        None
    } else {
        agent::select_external(&cfg.agent)?
    };
    let orchestrator = Orchestrator::new(external, agent::fallback(cfg))
        .with_cancel_on_discard(cfg.orchestrator.cancel_on_discard);
    tracing::debug!(agent = orchestrator.agent_name(), "orchestrator ready");
    Ok(orchestrator)
}

async fn cmd_default(log_level: Option<&str>) -> anyhow::Result<ExitCode> {
    let cfg = load_cfg().await?;
    if !tui::is_tty() {
        anyhow::bail!(
            "the interactive UI requires a TTY - use 'taskpilot run \"<task>\"' for headless mode"
        );
    }
    init_tracing(&cfg, log_level, LogSink::FileOnly)?;
    let orchestrator = build_orchestrator(&cfg, false)?;
    tui::app::run(cfg, orchestrator).await?;
    Ok(ExitCode::SUCCESS)
}

async fn cmd_run(args: RunArgs, log_level: Option<&str>) -> anyhow::Result<ExitCode> {
    let cfg = load_cfg().await?;
    init_tracing(&cfg, log_level, LogSink::Stderr)?;

    // Validate every description before starting any.
    let requests = args
        .tasks
        .iter()
        .map(|t| intake::validate_description(t))
        .collect::<Result<Vec<_>, _>>()?;

    let mut orchestrator = build_orchestrator(&cfg, args.simulate)?;
    let mut failed = 0usize;

    for req in requests {
        orchestrator.start(req)?;
        if let Some(task) = orchestrator.current() {
            print_update(task, args.json)?;
        }
        let finished = orchestrator
            .run_until_idle(|task| {
                if let Err(e) = print_update(task, args.json) {
                    tracing::warn!(error = %e, "failed to write update");
                }
            })
            .await;
        if finished.is_none_or(|t| t.status != TaskStatus::Completed) {
            failed += 1;
        }
        orchestrator.discard_current();
    }

    if args.csv {
        table::history_table(orchestrator.history(), 60).print_csv()?;
    } else if !args.json {
        println!();
        table::history_table(orchestrator.history(), 40).print()?;
    }

    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn print_update(task: &Task, json: bool) -> anyhow::Result<()> {
    let mut out = std::io::stdout().lock();
    if json {
        serde_json::to_writer(&mut out, task)?;
        writeln!(out)?;
    } else {
        writeln!(out, "{}", format_update(task))?;
        if let Some(result) = &task.result {
            writeln!(out, "  -> {result}")?;
        }
    }
    Ok(())
}

fn format_update(task: &Task) -> String {
    format!(
        "[{}] {:<9} {}",
        tui::feed::format_time(task.timestamp),
        task.status.label(),
        task.message
    )
}

fn cmd_version() -> ExitCode {
    println!("taskpilot version {}", env!("CARGO_PKG_VERSION"));
    if let Some(commit) = option_env!("TASKPILOT_GIT_COMMIT") {
        println!("  commit: {commit}");
    }
    if let Some(date) = option_env!("TASKPILOT_BUILD_DATE") {
        println!("  built: {date}");
    }
    println!("  rust: {}", rustc_version_runtime::version());
    println!(
        "  os/arch: {}/{}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::model::TaskIdGenerator;

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "taskpilot",
            "run",
            "--simulate",
            "--json",
            "book a dentist",
            "find a plumber",
        ])
        .unwrap();
        match cli.cmd {
            Some(Commands::Run(args)) => {
                assert_eq!(args.tasks, vec!["book a dentist", "find a plumber"]);
                assert!(args.simulate);
                assert!(args.json);
                assert!(!args.csv);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn json_and_csv_conflict() {
        assert!(Cli::try_parse_from(["taskpilot", "run", "--json", "--csv", "x"]).is_err());
        assert!(Cli::try_parse_from(["taskpilot", "run"]).is_err());
    }

    #[test]
    fn every_subcommand_has_help_text() {
        let cmd = Cli::command();
        for sub in cmd.get_subcommands() {
            assert!(sub.get_about().is_some(), "'{}' has no help", sub.get_name());
            for nested in sub.get_subcommands() {
                assert!(
                    nested.get_about().is_some(),
                    "'{} {}' has no help",
                    sub.get_name(),
                    nested.get_name()
                );
            }
        }
    }

    #[test]
    fn no_subcommand_means_ui() {
        let cli = Cli::try_parse_from(["taskpilot", "--log-level", "debug"]).unwrap();
        assert!(cli.cmd.is_none());
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn update_line_shows_label_and_message() {
        let task = Task::new(TaskIdGenerator::new().next_id(), "x");
        let line = format_update(&task);
        assert!(line.contains("Analyzing"));
        assert!(line.ends_with("Analyzing your task..."));
    }

    #[tokio::test]
    async fn simulate_flag_bypasses_external_agent() {
        let mut cfg = Config::default();
        cfg.agent.mode = config::AgentMode::Command;
        cfg.agent.command = "/nonexistent/agent".to_owned();
        assert!(build_orchestrator(&cfg, false).is_err());
        let orch = build_orchestrator(&cfg, true).unwrap();
        assert_eq!(orch.agent_name(), "simulated");
    }
}
