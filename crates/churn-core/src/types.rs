//! Identifiers shared by the engine and the agent.

use serde::{Deserialize, Serialize};

/// Position of an event in the materialized sequence.
///
/// IDs are assigned in walk order starting at zero on every load, so two nodes
/// that load the same script with the same seed agree on every ID.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct EventId(pub u64);

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Runtime-native identity of one live container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContainerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A service slot as seen by the cluster runtime, together with the container
/// currently occupying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerIdentity {
    pub service: String,
    pub slot: u32,
    pub container_id: ContainerId,
}

#[cfg(test)]
mod tests {
    use super::{ContainerId, EventId};

    #[test]
    fn event_id_orders_numerically_and_displays_bare() {
        assert!(EventId(2) < EventId(10));
        assert_eq!(EventId(42).to_string(), "42");
    }

    #[test]
    fn event_id_serializes_as_plain_number() {
        let json = serde_json::to_string(&EventId(7)).unwrap();
        assert_eq!(json, "7");
    }

    #[test]
    fn container_id_displays_inner_value() {
        let id = ContainerId::new("abc123");
        assert_eq!(id.to_string(), "abc123");
        assert_eq!(id.as_ref(), "abc123");
    }
}
