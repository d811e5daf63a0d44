//! Translation between a cluster runtime's container naming and the
//! engine's `(service, slot)` model.

use churn_core::{ContainerId, ContainerIdentity, SlotTranslator};
use std::sync::Arc;

use crate::ingest::ClusterEvent;

pub const EXPERIMENT_LABEL: &str = "org.faultsee.experiment.container";
pub const SWARM_TASK_NAME: &str = "com.docker.swarm.task.name";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    #[error("{name} is not a supported orchestrator")]
    Unsupported { name: String },
    #[error("ignoring container {container_id}: not part of the experiment")]
    NotExperimentContainer { container_id: String },
    #[error("container {container_id} has no {attribute} attribute")]
    MissingAttribute {
        container_id: String,
        attribute: &'static str,
    },
    #[error("expected task name like 'web.1.irxszgnliqiqqel9qf2s0gyj1', found '{name}'")]
    MalformedTaskName { name: String },
    #[error("slot {slot} has no external equivalent")]
    SlotOutOfRange { slot: u32 },
}

pub trait OrchestratorAdapter: SlotTranslator + Send + Sync {
    fn name(&self) -> &'static str;
    fn extract_identity(&self, event: &ClusterEvent) -> Result<ContainerIdentity, AdapterError>;
    fn translate_slot(&self, internal: u32) -> Result<u32, AdapterError>;
}

/// Docker swarm names task containers `service.slot.task_id` with 1-based
/// slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DockerSwarmAdapter;

impl OrchestratorAdapter for DockerSwarmAdapter {
    fn name(&self) -> &'static str {
        "docker-swarm"
    }

    fn extract_identity(&self, event: &ClusterEvent) -> Result<ContainerIdentity, AdapterError> {
        if event.attributes.get(EXPERIMENT_LABEL).map(String::as_str) != Some("true") {
            return Err(AdapterError::NotExperimentContainer {
                container_id: event.id.clone(),
            });
        }
        let task_name =
            event
                .attributes
                .get(SWARM_TASK_NAME)
                .ok_or_else(|| AdapterError::MissingAttribute {
                    container_id: event.id.clone(),
                    attribute: SWARM_TASK_NAME,
                })?;

        let malformed = || AdapterError::MalformedTaskName {
            name: task_name.clone(),
        };
        let parts: Vec<&str> = task_name.split('.').collect();
        let [service, slot, _task_id] = parts.as_slice() else {
            return Err(malformed());
        };
        let slot = slot.parse::<u32>().map_err(|_| malformed())?;

        Ok(ContainerIdentity {
            service: (*service).to_string(),
            slot,
            container_id: ContainerId::new(event.id.clone()),
        })
    }

    fn translate_slot(&self, internal: u32) -> Result<u32, AdapterError> {
        internal
            .checked_add(1)
            .ok_or(AdapterError::SlotOutOfRange { slot: internal })
    }
}

impl SlotTranslator for DockerSwarmAdapter {
    fn external_slot(&self, internal: u32) -> Result<u32, String> {
        self.translate_slot(internal).map_err(|err| err.to_string())
    }
}

/// Selects the adapter for a configured orchestrator name.
pub fn adapter_for(name: &str) -> Result<Arc<dyn OrchestratorAdapter>, AdapterError> {
    match name {
        "docker-swarm" => Ok(Arc::new(DockerSwarmAdapter)),
        other => Err(AdapterError::Unsupported {
            name: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{adapter_for, AdapterError, DockerSwarmAdapter, OrchestratorAdapter};
    use crate::ingest::ClusterEvent;
    use churn_core::{ContainerId, SlotTranslator, SUPPORTED_ORCHESTRATORS};
    use std::collections::BTreeMap;

    fn event(attributes: &[(&str, &str)]) -> ClusterEvent {
        ClusterEvent {
            id: "c0ffee".to_string(),
            kind: "container".to_string(),
            status: "start".to_string(),
            attributes: attributes
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect::<BTreeMap<_, _>>(),
            time_nano: 0,
        }
    }

    #[test]
    fn extracts_service_slot_and_container_id() {
        let identity = DockerSwarmAdapter
            .extract_identity(&event(&[
                ("org.faultsee.experiment.container", "true"),
                ("com.docker.swarm.task.name", "simple_http.3.irxszgnliqiqqel9qf2s0gyj1"),
            ]))
            .expect("identity");
        assert_eq!(identity.service, "simple_http");
        assert_eq!(identity.slot, 3);
        assert_eq!(identity.container_id, ContainerId::new("c0ffee"));
    }

    #[test]
    fn rejects_containers_outside_the_experiment() {
        for attributes in [
            vec![],
            vec![("org.faultsee.experiment.container", "false")],
        ] {
            let err = DockerSwarmAdapter
                .extract_identity(&event(&attributes))
                .expect_err("not experiment");
            assert!(matches!(err, AdapterError::NotExperimentContainer { .. }));
        }
    }

    #[test]
    fn task_name_needs_exactly_three_parts_and_numeric_slot() {
        for name in ["web.1", "web.1.abc.def", "web.one.abc"] {
            let err = DockerSwarmAdapter
                .extract_identity(&event(&[
                    ("org.faultsee.experiment.container", "true"),
                    ("com.docker.swarm.task.name", name),
                ]))
                .expect_err(name);
            assert_eq!(
                err,
                AdapterError::MalformedTaskName {
                    name: name.to_string()
                }
            );
        }

        let err = DockerSwarmAdapter
            .extract_identity(&event(&[("org.faultsee.experiment.container", "true")]))
            .expect_err("missing task name");
        assert!(matches!(err, AdapterError::MissingAttribute { .. }));
    }

    #[test]
    fn internal_slots_become_one_based() {
        assert_eq!(DockerSwarmAdapter.translate_slot(0), Ok(1));
        assert_eq!(DockerSwarmAdapter.external_slot(4), Ok(5));
        assert!(DockerSwarmAdapter.translate_slot(u32::MAX).is_err());
    }

    #[test]
    fn adapter_lookup_covers_supported_names_only() {
        for name in SUPPORTED_ORCHESTRATORS {
            assert_eq!(adapter_for(name).expect("supported").name(), *name);
        }
        let err = adapter_for("kubernetes").err().expect("unsupported");
        assert_eq!(
            err.to_string(),
            "kubernetes is not a supported orchestrator"
        );
    }
}
