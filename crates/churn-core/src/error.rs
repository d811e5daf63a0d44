/// Reason a raw action could not be replayed against the replica state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MaterializeReason {
    #[error("service not specified in beginning counts")]
    UnknownService,
    #[error("not enough replicas alive: alive {alive}, requested {requested}")]
    NotEnoughAlive { alive: usize, requested: usize },
    #[error("slot {slot} is not alive")]
    SlotNotAlive { slot: u32 },
    #[error("specific slots cannot be used to start replicas")]
    AddWithSpecific,
    #[error("slot translation failed: {0}")]
    Translate(String),
}

/// Everything that can make a script load fail. A load either succeeds as a
/// whole or returns one of these.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("script is not valid yaml: {source}")]
    Yaml {
        #[source]
        source: serde_yaml::Error,
    },
    #[error("malformed event entry #{index}: {message}")]
    MalformedEntry { index: usize, message: String },
    #[error("unsupported moment type '{tag}'. input: {payload}")]
    UnsupportedMoment { tag: String, payload: String },
    #[error("invalid '{tag}' moment: {message}. input: {payload}")]
    InvalidMoment {
        tag: &'static str,
        message: String,
        payload: String,
    },
    #[error("unsupported action type '{tag}' for service '{service}'. input: {payload}")]
    UnsupportedAction {
        service: String,
        tag: String,
        payload: String,
    },
    #[error("could not build fault for service '{service}': no recognised fault kind. input: {payload}")]
    UnrecognizedFault { service: String, payload: String },
    #[error("invalid {action} action for service '{service}': {message}. input: {payload}")]
    InvalidAction {
        service: String,
        action: &'static str,
        message: String,
        payload: String,
    },
    #[error("invalid target: {message}. input: {payload}")]
    InvalidTarget { message: String, payload: String },
    #[error("invalid environment: {message}")]
    InvalidEnvironment { message: String },
    #[error("script must contain exactly one '{tag}' moment, found {found}")]
    MomentCount { tag: &'static str, found: usize },
    #[error("time {time}s, {action} on service '{service}': {reason}")]
    Materialize {
        time: u64,
        action: &'static str,
        service: String,
        #[source]
        reason: MaterializeReason,
    },
}

impl LoadError {
    pub(crate) fn yaml(source: serde_yaml::Error) -> Self {
        Self::Yaml { source }
    }
}
