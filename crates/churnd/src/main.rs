use chrono::{DateTime, Utc};
use churn_core::{
    load_agent_config, AgentConfig, ConfigError, LoadError, Validate, ValidationIssue,
    ValidationLevel,
};
use churnd::{
    ingest_events, ChaosAgent, ControlError, DockerCli, DockerEventSource, RunOutcome,
    ResultSink, RuntimeError, StartAt,
};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "churnd=info,churn_core=info";

#[derive(Debug, Parser)]
#[command(name = "churnd")]
#[command(about = "per-node chaos experiment agent")]
struct Cli {
    /// Path to the agent config. A missing file means defaults.
    #[arg(long, global = true, default_value = "churnd.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load a churn script and print its summary and status report
    Check { script: PathBuf },
    /// Print the timeline of a churn script without touching containers
    DryRun { script: PathBuf },
    /// Replay a churn script against the local docker engine
    Run {
        script: PathBuf,
        /// RFC 3339 start time; starts immediately when omitted.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, thiserror::Error)]
enum MainError {
    #[error("failed to read churn script at {path}: {source}")]
    ReadScript {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0}")]
    InvalidConfig(String),
    #[error("failed to load churn script: {0}")]
    Load(#[from] LoadError),
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("failed to render report: {0}")]
    Json(#[from] serde_json::Error),
    #[error("run task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("churnd failed: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), MainError> {
    let config = load_config_or_default(&cli.config)?;
    validate_agent_config(&config.validate())?;

    let docker = Arc::new(DockerCli::from_config(&config.docker));
    let (sink, mut lines) = ResultSink::channel();
    let mut agent = ChaosAgent::new(&config, docker, sink.clone())?;

    match cli.command {
        Command::Check { script } => {
            let summary = agent.load(&read_script(&script)?).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            println!(
                "{}",
                serde_json::to_string_pretty(&agent.processed_events())?
            );
        }
        Command::DryRun { script } => {
            agent.load(&read_script(&script)?).await?;
            for line in agent.dry_run()? {
                println!("{line}");
            }
        }
        Command::Run { script, at } => {
            let summary = agent.load(&read_script(&script)?).await?;
            info!(seed = summary.seed, events = summary.events, "starting run");

            let printer = tokio::spawn(async move {
                while let Some(line) = lines.recv().await {
                    println!("{line}");
                }
            });

            let source = DockerEventSource::new(&config.docker.binary);
            let events = source.spawn()?;
            let adapter = agent.adapter();
            let presence = agent.presence();
            let running = source.running_containers().await?;
            let seeded = ingest_events(
                tokio_stream::iter(running),
                adapter.as_ref(),
                &presence,
                &sink,
            )
            .await;
            info!(containers = seeded.born, "presence seeded from running containers");

            let ingest_sink = sink.clone();
            let ingest = tokio::spawn(async move {
                ingest_events(events, adapter.as_ref(), &presence, &ingest_sink).await;
            });

            let start = at.map_or(StartAt::Now, StartAt::At);
            let mut handle = agent.start(start)?;
            let finished = tokio::select! {
                joined = &mut handle => Some(joined?),
                _ = tokio::signal::ctrl_c() => None,
            };
            let outcome = match finished {
                Some(outcome) => Some(outcome),
                None => match agent.cancel_pending_start() {
                    Ok(()) => Some(handle.await?),
                    Err(_) => {
                        warn!("interrupted while the run was in progress");
                        handle.abort();
                        let _ = handle.await;
                        None
                    }
                },
            };
            match outcome {
                Some(RunOutcome::Cancelled) => info!("run cancelled before start"),
                Some(RunOutcome::Completed { dispatched }) => info!(dispatched, "run finished"),
                None => {}
            }

            let report = serde_json::to_string_pretty(&agent.processed_events())?;
            // The printer stops once every sink clone is gone.
            ingest.abort();
            let _ = ingest.await;
            drop(agent);
            drop(sink);
            printer.await?;
            println!("{report}");
        }
    }
    Ok(())
}

fn load_config_or_default(path: &Path) -> Result<AgentConfig, MainError> {
    if !path.exists() {
        info!(path = %path.display(), "config not found, using defaults");
        return Ok(AgentConfig::default());
    }
    Ok(load_agent_config(path)?)
}

fn read_script(path: &Path) -> Result<String, MainError> {
    fs::read_to_string(path).map_err(|source| MainError::ReadScript {
        path: path.to_path_buf(),
        source,
    })
}

fn validate_agent_config(issues: &[ValidationIssue]) -> Result<(), MainError> {
    for issue in issues
        .iter()
        .filter(|issue| issue.level == ValidationLevel::Warning)
    {
        warn!(code = issue.code, "{}", issue.message);
    }

    let errors = issues
        .iter()
        .filter(|issue| issue.level == ValidationLevel::Error)
        .collect::<Vec<_>>();
    if errors.is_empty() {
        return Ok(());
    }

    let rendered = errors
        .iter()
        .map(|issue| format!("{}: {}", issue.code, issue.message))
        .collect::<Vec<_>>()
        .join("; ");
    Err(MainError::InvalidConfig(format!(
        "agent config validation failed ({rendered})"
    )))
}
