//! Churn script parsing and validation.
//!
//! The script is a YAML document with an `environment` mapping and an ordered
//! `events` list. Every event and every service action is a single-key
//! mapping whose key selects the variant. Parsing is all-or-nothing: the first
//! failure aborts the load.

use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::LoadError;
use crate::event::{FaultDetails, DEFAULT_FAULT_EXECUTABLE, DEFAULT_FAULT_FOLDER};
use crate::script::{is_valid_signal, RawMoment, RawServiceAction};
use crate::target::{render_mapping, render_value, Target};

/// Seed used when the script's environment does not set one.
pub const DEFAULT_SEED: i64 = 789;

const CPU_FAULT_SCRIPT: &str = "waste_cpu";

/// Result of a successful parse: the seed and the moments in declaration
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedScript {
    pub seed: i64,
    pub moments: Vec<RawMoment>,
}

#[derive(Debug, Deserialize)]
struct ScriptDoc {
    #[serde(default)]
    environment: Option<Mapping>,
    #[serde(default)]
    events: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct MomentDoc {
    time: u64,
    #[serde(default)]
    mark: Option<String>,
    #[serde(default)]
    services: Option<BTreeMap<String, Vec<Value>>>,
}

#[derive(Debug, Deserialize)]
struct SignalDoc {
    signal: String,
    kills_container: String,
}

#[derive(Debug, Deserialize)]
struct CpuDoc {
    duration: i64,
}

#[derive(Debug, Deserialize)]
struct CustomDoc {
    #[serde(default)]
    fault_file_name: String,
    #[serde(default = "default_fault_folder")]
    fault_file_folder: String,
    #[serde(default = "default_fault_executable")]
    executable: String,
    kills_container: String,
    #[serde(default)]
    executable_arguments: Vec<String>,
    #[serde(default)]
    fault_script_arguments: Vec<String>,
}

fn default_fault_folder() -> String {
    DEFAULT_FAULT_FOLDER.to_string()
}

fn default_fault_executable() -> String {
    DEFAULT_FAULT_EXECUTABLE.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FaultKind {
    Cpu,
    Custom,
    Kill,
    Signal,
}

impl FaultKind {
    fn from_key(key: &str) -> Option<Self> {
        match key.to_uppercase().as_str() {
            "CPU" => Some(FaultKind::Cpu),
            "CUSTOM" => Some(FaultKind::Custom),
            "KILL" => Some(FaultKind::Kill),
            "SIGNAL" => Some(FaultKind::Signal),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            FaultKind::Cpu => "cpu",
            FaultKind::Custom => "custom",
            FaultKind::Kill => "kill",
            FaultKind::Signal => "signal",
        }
    }
}

/// Parses and validates a churn script.
pub fn parse_script(text: &str) -> Result<ParsedScript, LoadError> {
    let doc: ScriptDoc = serde_yaml::from_str(text).map_err(LoadError::yaml)?;

    let mut moments = Vec::with_capacity(doc.events.len());
    for (index, entry) in doc.events.iter().enumerate() {
        moments.push(parse_moment(index, entry)?);
    }
    validate_moment_counts(&moments)?;

    let seed = parse_seed(doc.environment.as_ref())?;
    debug!(seed, moments = moments.len(), "churn script parsed");
    Ok(ParsedScript { seed, moments })
}

fn parse_seed(environment: Option<&Mapping>) -> Result<i64, LoadError> {
    let Some(value) = environment.and_then(|env| env.get("seed")) else {
        return Ok(DEFAULT_SEED);
    };
    match value {
        Value::Number(number) => number.as_i64().ok_or_else(|| LoadError::InvalidEnvironment {
            message: format!("seed must be an integer, found {number}"),
        }),
        Value::String(text) => text
            .trim()
            .parse::<i64>()
            .map_err(|err| LoadError::InvalidEnvironment {
                message: format!("seed '{text}' is not an integer: {err}"),
            }),
        other => Err(LoadError::InvalidEnvironment {
            message: format!("seed must be an integer, found {}", render_value(other)),
        }),
    }
}

fn validate_moment_counts(moments: &[RawMoment]) -> Result<(), LoadError> {
    for tag in ["beginning", "end"] {
        let found = moments.iter().filter(|moment| moment.tag() == tag).count();
        if found != 1 {
            return Err(LoadError::MomentCount { tag, found });
        }
    }
    Ok(())
}

/// Splits a single-key mapping into its key and payload.
fn single_entry<'a>(entry: &'a Value) -> Result<(&'a str, &'a Value), String> {
    let mapping = entry
        .as_mapping()
        .ok_or_else(|| format!("expected a single-key mapping, found {}", render_value(entry)))?;
    if mapping.len() != 1 {
        return Err(format!(
            "expected exactly one key, found {}: {}",
            mapping.len(),
            render_mapping(mapping)
        ));
    }
    let Some((key, payload)) = mapping.iter().next() else {
        return Err("expected exactly one key, found 0".to_string());
    };
    let key = key
        .as_str()
        .ok_or_else(|| format!("key must be a string: {}", render_mapping(mapping)))?;
    Ok((key, payload))
}

fn parse_moment(index: usize, entry: &Value) -> Result<RawMoment, LoadError> {
    let (tag, payload) =
        single_entry(entry).map_err(|message| LoadError::MalformedEntry { index, message })?;

    let moment = match tag {
        "beginning" => parse_beginning(payload)?,
        "end" => parse_end(payload)?,
        "moment" => parse_timed_moment(payload)?,
        other => {
            return Err(LoadError::UnsupportedMoment {
                tag: other.to_string(),
                payload: render_value(entry),
            })
        }
    };
    debug!(index, tag, time = moment.time(), "moment parsed");
    Ok(moment)
}

fn invalid_moment(tag: &'static str, payload: &Value, message: impl Into<String>) -> LoadError {
    LoadError::InvalidMoment {
        tag,
        message: message.into(),
        payload: render_value(payload),
    }
}

fn parse_beginning(payload: &Value) -> Result<RawMoment, LoadError> {
    if payload.is_null() {
        return Ok(RawMoment::Beginning {
            initial_counts: BTreeMap::new(),
        });
    }
    let initial_counts: BTreeMap<String, u32> = serde_yaml::from_value(payload.clone())
        .map_err(|err| {
            invalid_moment(
                "beginning",
                payload,
                format!("expected service -> replica count: {err}"),
            )
        })?;
    Ok(RawMoment::Beginning { initial_counts })
}

fn parse_end(payload: &Value) -> Result<RawMoment, LoadError> {
    let time: u64 = serde_yaml::from_value(payload.clone()).map_err(|err| {
        invalid_moment("end", payload, format!("expected a time in seconds: {err}"))
    })?;
    if time == 0 {
        return Err(invalid_moment(
            "end",
            payload,
            "experiment end must be bigger than zero",
        ));
    }
    Ok(RawMoment::End { time })
}

fn parse_timed_moment(payload: &Value) -> Result<RawMoment, LoadError> {
    let doc: MomentDoc = serde_yaml::from_value(payload.clone())
        .map_err(|err| invalid_moment("moment", payload, err.to_string()))?;

    let mut services = BTreeMap::new();
    for (service, raw_actions) in doc.services.unwrap_or_default() {
        let mut actions = Vec::with_capacity(raw_actions.len());
        for raw in &raw_actions {
            actions.push(parse_action(&service, raw)?);
        }
        services.insert(service, actions);
    }

    Ok(RawMoment::Moment {
        time: doc.time,
        mark: doc.mark.filter(|mark| !mark.is_empty()),
        services,
    })
}

fn parse_action(service: &str, raw: &Value) -> Result<RawServiceAction, LoadError> {
    let (tag, payload) = single_entry(raw).map_err(|message| LoadError::InvalidAction {
        service: service.to_string(),
        action: "service",
        message,
        payload: render_value(raw),
    })?;

    let action = match tag {
        "start" => RawServiceAction::Start {
            target: inline_target(service, "start", payload)?,
        },
        "stop" => RawServiceAction::Stop {
            target: inline_target(service, "stop", payload)?,
        },
        "fault" => parse_fault(service, payload)?,
        other => {
            return Err(LoadError::UnsupportedAction {
                service: service.to_string(),
                tag: other.to_string(),
                payload: render_value(raw),
            })
        }
    };
    debug!(service, action = %action, "service action parsed");
    Ok(action)
}

fn invalid_action(
    service: &str,
    action: &'static str,
    payload: &Value,
    message: impl Into<String>,
) -> LoadError {
    LoadError::InvalidAction {
        service: service.to_string(),
        action,
        message: message.into(),
        payload: render_value(payload),
    }
}

fn target_from(
    service: &str,
    action: &'static str,
    payload: &Value,
    raw_target: &Value,
) -> Result<Target, LoadError> {
    let mapping = raw_target
        .as_mapping()
        .ok_or_else(|| invalid_action(service, action, payload, "target must be a mapping"))?;
    Target::from_mapping(mapping)
        .map_err(|err| invalid_action(service, action, payload, err.to_string()))
}

/// `start` and `stop` carry their selector inline: `stop: {amount: 2}`.
fn inline_target(service: &str, action: &'static str, payload: &Value) -> Result<Target, LoadError> {
    target_from(service, action, payload, payload)
}

fn parse_fault(service: &str, payload: &Value) -> Result<RawServiceAction, LoadError> {
    let mapping = payload
        .as_mapping()
        .ok_or_else(|| invalid_action(service, "fault", payload, "fault must be a mapping"))?;

    let selected = mapping.iter().find_map(|(key, body)| {
        let kind = FaultKind::from_key(key.as_str()?)?;
        Some((kind, body))
    });
    let Some((kind, body)) = selected else {
        return Err(LoadError::UnrecognizedFault {
            service: service.to_string(),
            payload: render_value(payload),
        });
    };

    let raw_target = mapping
        .get("target")
        .ok_or_else(|| invalid_action(service, kind.name(), payload, "fault target is required"))?;
    let target = target_from(service, kind.name(), payload, raw_target)?;

    match kind {
        FaultKind::Kill => Ok(RawServiceAction::kill(target)),
        FaultKind::Signal => {
            let doc: SignalDoc = serde_yaml::from_value(body.clone())
                .map_err(|err| invalid_action(service, "signal", payload, err.to_string()))?;
            let signal = doc.signal.to_uppercase();
            if !is_valid_signal(&signal) {
                return Err(invalid_action(
                    service,
                    "signal",
                    payload,
                    format!("invalid signal: {signal}"),
                ));
            }
            let kills_container = parse_kills_container(&doc.kills_container)
                .map_err(|message| invalid_action(service, "signal", payload, message))?;
            Ok(RawServiceAction::Signal {
                target,
                signal,
                kills_container,
            })
        }
        FaultKind::Cpu => {
            let doc: CpuDoc = serde_yaml::from_value(body.clone())
                .map_err(|err| invalid_action(service, "cpu", payload, err.to_string()))?;
            if doc.duration <= 0 {
                return Err(invalid_action(
                    service,
                    "cpu",
                    payload,
                    "cpu duration must be set and bigger than 0",
                ));
            }
            let mut fault = FaultDetails::with_defaults(CPU_FAULT_SCRIPT);
            fault.script_args = vec![doc.duration.to_string()];
            Ok(RawServiceAction::CustomFault {
                target,
                fault,
                kills_container: false,
            })
        }
        FaultKind::Custom => {
            let doc: CustomDoc = serde_yaml::from_value(body.clone())
                .map_err(|err| invalid_action(service, "custom", payload, err.to_string()))?;
            let kills_container = parse_kills_container(&doc.kills_container)
                .map_err(|message| invalid_action(service, "custom", payload, message))?;
            Ok(RawServiceAction::CustomFault {
                target,
                fault: FaultDetails {
                    script_file: doc.fault_file_name,
                    script_folder: doc.fault_file_folder,
                    executable: doc.executable,
                    exec_args: doc.executable_arguments,
                    script_args: doc.fault_script_arguments,
                },
                kills_container,
            })
        }
    }
}

fn parse_kills_container(raw: &str) -> Result<bool, String> {
    match raw.to_uppercase().as_str() {
        "YES" => Ok(true),
        "NO" => Ok(false),
        _ => Err(format!(
            "kills_container must be set to either yes or no, received: '{raw}'"
        )),
    }
}
