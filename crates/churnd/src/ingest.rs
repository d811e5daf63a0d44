//! Cluster lifecycle events feeding the presence map.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::adapter::{OrchestratorAdapter, EXPERIMENT_LABEL, SWARM_TASK_NAME};
use crate::presence::ContainerPresence;
use crate::runtime::{render_command, DockerCli, RuntimeError};
use crate::sink::ResultSink;

/// One lifecycle notification from the cluster runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterEvent {
    pub id: String,
    /// Object type, `container` for the events that matter here.
    pub kind: String,
    pub status: String,
    pub attributes: BTreeMap<String, String>,
    pub time_nano: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub born: usize,
    pub died: usize,
    pub ignored: usize,
}

/// Consumes `events` until the stream ends, keeping `presence` current.
pub async fn ingest_events<S>(
    mut events: S,
    adapter: &dyn OrchestratorAdapter,
    presence: &ContainerPresence,
    sink: &ResultSink,
) -> IngestStats
where
    S: Stream<Item = ClusterEvent> + Unpin,
{
    let mut stats = IngestStats::default();
    while let Some(event) = events.next().await {
        if event.kind != "container" {
            continue;
        }
        let verb = match event.status.as_str() {
            "start" => "start",
            "die" => "die",
            _ => continue,
        };

        let identity = match adapter.extract_identity(&event) {
            Ok(identity) => identity,
            Err(err) => {
                debug!(container = %event.id, error = %err, "cluster event ignored");
                sink.event(format!("ignoring container {verb} event: {err}"));
                stats.ignored += 1;
                continue;
            }
        };

        if verb == "start" {
            presence.container_born(identity).await;
            stats.born += 1;
        } else {
            presence.container_died(&identity).await;
            stats.died += 1;
        }
    }
    info!(
        born = stats.born,
        died = stats.died,
        ignored = stats.ignored,
        "cluster event stream ended"
    );
    stats
}

#[derive(Debug, Default, Deserialize)]
struct DockerActor {
    #[serde(rename = "ID", default)]
    id: String,
    #[serde(rename = "Attributes", default)]
    attributes: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct DockerEventMessage {
    #[serde(default)]
    id: String,
    #[serde(default)]
    status: String,
    #[serde(rename = "Type", default)]
    kind: String,
    #[serde(rename = "Action", default)]
    action: String,
    #[serde(rename = "Actor", default)]
    actor: DockerActor,
    #[serde(rename = "timeNano", default)]
    time_nano: i64,
}

/// Parses one line of `docker events --format '{{json .}}'`. Newer engines
/// omit the legacy `id`/`status` fields; `Actor.ID` and `Action` stand in.
pub fn parse_docker_event_line(line: &str) -> Result<ClusterEvent, serde_json::Error> {
    let message: DockerEventMessage = serde_json::from_str(line)?;
    let id = if message.id.is_empty() {
        message.actor.id
    } else {
        message.id
    };
    let status = if message.status.is_empty() {
        message.action
    } else {
        message.status
    };
    Ok(ClusterEvent {
        id,
        kind: message.kind,
        status,
        attributes: message.actor.attributes,
        time_nano: message.time_nano,
    })
}

/// Follows `docker events` in a child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerEventSource {
    pub binary: PathBuf,
}

impl DockerEventSource {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Spawns the follower. The stream ends when the child exits.
    pub fn spawn(&self) -> Result<UnboundedReceiverStream<ClusterEvent>, RuntimeError> {
        let args: Vec<OsString> = ["events", "--format", "{{json .}}"]
            .into_iter()
            .map(OsString::from)
            .collect();
        let rendered = render_command(&self.binary, &args);

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RuntimeError::Io {
                command: rendered.clone(),
                source,
            })?;
        let Some(stdout) = child.stdout.take() else {
            return Err(RuntimeError::Io {
                command: rendered,
                source: std::io::Error::other("child stdout was not captured"),
            });
        };

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match parse_docker_event_line(&line) {
                        Ok(event) => {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, line = %line, "skipping malformed docker event")
                        }
                    },
                    Ok(None) => break,
                    Err(err) => {
                        warn!(error = %err, "reading docker events failed");
                        break;
                    }
                }
            }
            match child.wait().await {
                Ok(status) => info!(command = %rendered, %status, "docker events exited"),
                Err(err) => warn!(command = %rendered, error = %err, "docker events wait failed"),
            }
        });

        Ok(UnboundedReceiverStream::new(rx))
    }

    /// Experiment containers already running, as synthetic `start` events.
    /// Feeding them through [`ingest_events`] seeds the presence map with
    /// containers born before the follower was attached.
    pub async fn running_containers(&self) -> Result<Vec<ClusterEvent>, RuntimeError> {
        let cli = DockerCli {
            binary: self.binary.clone(),
            ..DockerCli::default()
        };
        let args = [
            "ps".to_string(),
            "--filter".to_string(),
            format!("label={EXPERIMENT_LABEL}=true"),
            "--format".to_string(),
            format!("{{{{.ID}}}}\t{{{{.Label \"{SWARM_TASK_NAME}\"}}}}"),
        ];
        let stdout = cli.run(&args).await?;
        let running: Vec<ClusterEvent> = stdout.lines().filter_map(parse_docker_ps_line).collect();
        debug!(containers = running.len(), "listed running experiment containers");
        Ok(running)
    }
}

/// Parses one `ID<TAB>task name` line printed by
/// [`DockerEventSource::running_containers`].
pub fn parse_docker_ps_line(line: &str) -> Option<ClusterEvent> {
    let (id, task_name) = line.trim().split_once('\t')?;
    if id.is_empty() {
        return None;
    }
    let mut attributes = BTreeMap::from([(EXPERIMENT_LABEL.to_string(), "true".to_string())]);
    if !task_name.is_empty() {
        attributes.insert(SWARM_TASK_NAME.to_string(), task_name.to_string());
    }
    Some(ClusterEvent {
        id: id.to_string(),
        kind: "container".to_string(),
        status: "start".to_string(),
        attributes,
        time_nano: 0,
    })
}
