//! Typed tree of a parsed churn script, before materialization.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::event::FaultDetails;
use crate::target::Target;

/// Signal names accepted by `signal` faults.
pub const VALID_SIGNALS: &[&str] = &[
    "SIGHUP", "SIGINT", "SIGQUIT", "SIGILL", "SIGTRAP", "SIGABRT", "SIGIOT", "SIGBUS", "SIGEMT",
    "SIGFPE", "SIGKILL", "SIGUSR1", "SIGSEGV", "SIGUSR2", "SIGPIPE", "SIGALRM", "SIGTERM",
    "SIGSTKFLT", "SIGCHLD", "SIGCLD", "SIGCONT", "SIGSTOP", "SIGTSTP", "SIGTTIN", "SIGTTOU",
    "SIGURG", "SIGXCPU", "SIGXFSZ", "SIGVTALRM", "SIGPROF", "SIGWINCH", "SIGIO", "SIGPOLL",
    "SIGPWR", "SIGINFO", "SIGLOST", "SIGSYS", "SIGUNUSED",
];

pub fn is_valid_signal(name: &str) -> bool {
    VALID_SIGNALS.contains(&name)
}

/// One action requested against a service inside a moment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawServiceAction {
    Start {
        target: Target,
    },
    Stop {
        target: Target,
    },
    Signal {
        target: Target,
        signal: String,
        kills_container: bool,
    },
    CustomFault {
        target: Target,
        fault: FaultDetails,
        kills_container: bool,
    },
}

impl RawServiceAction {
    /// `kill` is a signal fault that always takes the container down.
    pub fn kill(target: Target) -> Self {
        RawServiceAction::Signal {
            target,
            signal: "SIGKILL".to_string(),
            kills_container: true,
        }
    }

    pub fn target(&self) -> &Target {
        match self {
            RawServiceAction::Start { target }
            | RawServiceAction::Stop { target }
            | RawServiceAction::Signal { target, .. }
            | RawServiceAction::CustomFault { target, .. } => target,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            RawServiceAction::Start { .. } => "start",
            RawServiceAction::Stop { .. } => "stop",
            RawServiceAction::Signal { .. } => "signal",
            RawServiceAction::CustomFault { .. } => "fault",
        }
    }
}

impl std::fmt::Display for RawServiceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawServiceAction::Start { target } => write!(f, "start {target}"),
            RawServiceAction::Stop { target } => write!(f, "stop {target}"),
            RawServiceAction::Signal {
                target,
                signal,
                kills_container,
            } => write!(f, "signal {signal} to {target} (kills: {kills_container})"),
            RawServiceAction::CustomFault {
                target,
                fault,
                kills_container,
            } => write!(
                f,
                "fault {} to {target} (kills: {kills_container})",
                fault.script_file
            ),
        }
    }
}

/// A top-level script entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawMoment {
    Beginning {
        initial_counts: BTreeMap<String, u32>,
    },
    End {
        time: u64,
    },
    Moment {
        time: u64,
        mark: Option<String>,
        services: BTreeMap<String, Vec<RawServiceAction>>,
    },
}

impl RawMoment {
    /// Scheduled time in seconds; the beginning is always at zero.
    pub fn time(&self) -> u64 {
        match self {
            RawMoment::Beginning { .. } => 0,
            RawMoment::End { time } | RawMoment::Moment { time, .. } => *time,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            RawMoment::Beginning { .. } => "beginning",
            RawMoment::End { .. } => "end",
            RawMoment::Moment { .. } => "moment",
        }
    }
}
