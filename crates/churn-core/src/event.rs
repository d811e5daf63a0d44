//! Executable events produced by materialization and replayed by the agent.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::types::EventId;

pub const DEFAULT_FAULT_EXECUTABLE: &str = "/bin/sh";
pub const DEFAULT_FAULT_FOLDER: &str = "/usr/lib/faultsee/";

/// Fully resolved description of a fault script run inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultDetails {
    pub script_file: String,
    pub script_folder: String,
    pub executable: String,
    pub exec_args: Vec<String>,
    pub script_args: Vec<String>,
}

impl FaultDetails {
    /// Details for `script_file` with the default shell, folder and no
    /// arguments.
    pub fn with_defaults(script_file: impl Into<String>) -> Self {
        Self {
            script_file: script_file.into(),
            script_folder: DEFAULT_FAULT_FOLDER.to_string(),
            executable: DEFAULT_FAULT_EXECUTABLE.to_string(),
            exec_args: Vec::new(),
            script_args: Vec::new(),
        }
    }

    /// Path of the script inside the container.
    pub fn script_path(&self) -> String {
        let folder = if self.script_folder.is_empty() {
            DEFAULT_FAULT_FOLDER
        } else {
            self.script_folder.as_str()
        };
        format!("{folder}{}", self.script_file)
    }

    /// The argv executed in the container:
    /// `executable exec_args... script_path script_args...`.
    pub fn command(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(2 + self.exec_args.len() + self.script_args.len());
        argv.push(self.executable.clone());
        argv.extend(self.exec_args.iter().cloned());
        argv.push(self.script_path());
        argv.extend(self.script_args.iter().cloned());
        argv
    }
}

impl std::fmt::Display for FaultDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.command().join(" "))
    }
}

/// What to do to one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerAction {
    Stop,
    Signal { signal: String },
    Fault(FaultDetails),
}

impl ContainerAction {
    fn mark(&self) -> serde_json::Value {
        match self {
            ContainerAction::Stop => json!({ "type": "event", "moment": "stop container" }),
            ContainerAction::Signal { signal } => {
                json!({ "type": "event", "moment": "send signal", "signal": signal })
            }
            ContainerAction::Fault(details) => {
                json!({ "type": "event", "moment": "fault", "script": details.script_file })
            }
        }
    }
}

impl std::fmt::Display for ContainerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerAction::Stop => f.write_str("stop gracefully"),
            ContainerAction::Signal { signal } => write!(f, "signal {signal}"),
            ContainerAction::Fault(details) => write!(f, "fault `{details}`"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Beginning,
    End,
    Mark {
        message: String,
    },
    /// Informational: replicas are created by an external control plane.
    StartCount {
        service: String,
        count: usize,
    },
    /// `slot` is already in the runtime's numbering.
    ContainerAction {
        service: String,
        slot: u32,
        action: ContainerAction,
    },
}

/// One timed entry of a materialized script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutableEvent {
    pub id: EventId,
    /// Seconds since the run started.
    pub time: u64,
    pub processed: bool,
    pub kind: EventKind,
}

impl ExecutableEvent {
    /// JSON mark emitted on the result stream when the event is processed.
    pub fn mark_message(&self) -> String {
        let mark = match &self.kind {
            EventKind::Beginning => json!({ "type": "event", "moment": "beginning" }),
            EventKind::End => json!({ "type": "event", "moment": "end" }),
            EventKind::Mark { message } => {
                json!({ "type": "mark", "moment": "mark", "message": message })
            }
            EventKind::StartCount { service, count } => json!({
                "type": "event",
                "moment": "start containers",
                "service": service,
                "amount": count,
            }),
            EventKind::ContainerAction { action, .. } => action.mark(),
        };
        mark.to_string()
    }

    /// Side-effect free description used by dry runs.
    pub fn dry_run_line(&self) -> String {
        match &self.kind {
            EventKind::Beginning => "Beginning".to_string(),
            EventKind::End => format!("End: {}s", self.time),
            EventKind::Mark { message } => format!("Time: {} | Message: {message}", self.time),
            EventKind::StartCount { service, count } => format!(
                "Time: {} | Service {service} Amount: {count} containers",
                self.time
            ),
            EventKind::ContainerAction {
                service,
                slot,
                action,
            } => format!(
                "Time: {} | service: {service} ; slot: {slot} | Action: {action}",
                self.time
            ),
        }
    }

    pub fn is_container_action(&self) -> bool {
        matches!(self.kind, EventKind::ContainerAction { .. })
    }
}

impl std::fmt::Display for ExecutableEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} @{}s ", self.id, self.time)?;
        match &self.kind {
            EventKind::Beginning => f.write_str("beginning"),
            EventKind::End => f.write_str("end"),
            EventKind::Mark { message } => write!(f, "mark {message:?}"),
            EventKind::StartCount { service, count } => {
                write!(f, "{service}: start {count} containers")
            }
            EventKind::ContainerAction {
                service,
                slot,
                action,
            } => write!(f, "{service}.{slot}: {action}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ContainerAction, EventKind, ExecutableEvent, FaultDetails};
    use crate::types::EventId;

    fn event(kind: EventKind) -> ExecutableEvent {
        ExecutableEvent {
            id: EventId(4),
            time: 30,
            processed: false,
            kind,
        }
    }

    #[test]
    fn fault_command_places_script_between_argument_lists() {
        let details = FaultDetails {
            script_file: "waste_cpu".to_string(),
            script_folder: "/opt/faults/".to_string(),
            executable: "/bin/bash".to_string(),
            exec_args: vec!["-e".to_string()],
            script_args: vec!["30".to_string()],
        };
        assert_eq!(
            details.command(),
            vec!["/bin/bash", "-e", "/opt/faults/waste_cpu", "30"]
        );
    }

    #[test]
    fn fault_command_falls_back_to_default_folder() {
        let mut details = FaultDetails::with_defaults("drop_packets");
        details.script_folder.clear();
        assert_eq!(
            details.command(),
            vec!["/bin/sh", "/usr/lib/faultsee/drop_packets"]
        );
    }

    #[test]
    fn mark_messages_are_json_objects() {
        let mark = event(EventKind::Mark {
            message: "say \"hi\"".to_string(),
        })
        .mark_message();
        let parsed: serde_json::Value = serde_json::from_str(&mark).unwrap();
        assert_eq!(parsed["type"], "mark");
        assert_eq!(parsed["message"], "say \"hi\"");

        let start = event(EventKind::StartCount {
            service: "web".to_string(),
            count: 2,
        })
        .mark_message();
        let parsed: serde_json::Value = serde_json::from_str(&start).unwrap();
        assert_eq!(parsed["service"], "web");
        assert_eq!(parsed["amount"], 2);
    }

    #[test]
    fn container_action_marks_name_the_action() {
        let signal = event(EventKind::ContainerAction {
            service: "db".to_string(),
            slot: 2,
            action: ContainerAction::Signal {
                signal: "SIGTERM".to_string(),
            },
        });
        let parsed: serde_json::Value = serde_json::from_str(&signal.mark_message()).unwrap();
        assert_eq!(parsed["moment"], "send signal");
        assert_eq!(parsed["signal"], "SIGTERM");
        assert!(signal.is_container_action());
    }

    #[test]
    fn dry_run_lines_describe_time_and_target() {
        let stop = event(EventKind::ContainerAction {
            service: "db".to_string(),
            slot: 2,
            action: ContainerAction::Stop,
        });
        assert_eq!(
            stop.dry_run_line(),
            "Time: 30 | service: db ; slot: 2 | Action: stop gracefully"
        );
        assert_eq!(event(EventKind::End).dry_run_line(), "End: 30s");
        assert_eq!(event(EventKind::Beginning).to_string(), "#4 @30s beginning");
    }
}
