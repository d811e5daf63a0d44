//! Which container currently occupies each `(service, slot)`.

use churn_core::{ContainerId, ContainerIdentity};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

type ServiceSlots = BTreeMap<u32, ContainerId>;

/// Shared presence map. Written by cluster-event ingestion, read by every
/// dispatch task. Slots use the runtime's numbering.
#[derive(Debug, Clone, Default)]
pub struct ContainerPresence {
    inner: Arc<RwLock<BTreeMap<String, ServiceSlots>>>,
}

impl ContainerPresence {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn initialize_service(&self, service: &str) {
        let mut guard = self.inner.write().await;
        guard.entry(service.to_string()).or_default();
    }

    pub async fn container_born(&self, identity: ContainerIdentity) {
        debug!(
            service = %identity.service,
            slot = identity.slot,
            container = %identity.container_id,
            "container alive"
        );
        let mut guard = self.inner.write().await;
        guard
            .entry(identity.service)
            .or_default()
            .insert(identity.slot, identity.container_id);
    }

    /// Forgets the slot if it still belongs to `identity.container_id`.
    /// Returns whether an entry was removed.
    pub async fn container_died(&self, identity: &ContainerIdentity) -> bool {
        let mut guard = self.inner.write().await;
        let Some(slots) = guard.get_mut(&identity.service) else {
            warn!(service = %identity.service, "container died in unknown service");
            return false;
        };
        match slots.get(&identity.slot) {
            Some(current) if *current == identity.container_id => {
                slots.remove(&identity.slot);
                debug!(
                    service = %identity.service,
                    slot = identity.slot,
                    container = %identity.container_id,
                    "container dead"
                );
                true
            }
            Some(current) => {
                debug!(
                    service = %identity.service,
                    slot = identity.slot,
                    current = %current,
                    died = %identity.container_id,
                    "slot already taken over by a newer container"
                );
                false
            }
            None => {
                warn!(
                    service = %identity.service,
                    slot = identity.slot,
                    "container died in unknown slot"
                );
                false
            }
        }
    }

    pub async fn container_present(&self, service: &str, slot: u32) -> Option<ContainerId> {
        let guard = self.inner.read().await;
        guard.get(service)?.get(&slot).cloned()
    }

    pub async fn snapshot(&self) -> BTreeMap<String, BTreeMap<u32, ContainerId>> {
        self.inner.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::ContainerPresence;
    use churn_core::{ContainerId, ContainerIdentity};

    fn identity(service: &str, slot: u32, id: &str) -> ContainerIdentity {
        ContainerIdentity {
            service: service.to_string(),
            slot,
            container_id: ContainerId::new(id),
        }
    }

    #[tokio::test]
    async fn born_then_died_clears_slot() {
        let presence = ContainerPresence::new();
        presence.container_born(identity("web", 1, "aaa")).await;
        assert_eq!(
            presence.container_present("web", 1).await,
            Some(ContainerId::new("aaa"))
        );

        assert!(presence.container_died(&identity("web", 1, "aaa")).await);
        assert_eq!(presence.container_present("web", 1).await, None);
    }

    #[tokio::test]
    async fn stale_death_keeps_replacement_container() {
        let presence = ContainerPresence::new();
        presence.container_born(identity("web", 1, "old")).await;
        presence.container_born(identity("web", 1, "new")).await;

        assert!(!presence.container_died(&identity("web", 1, "old")).await);
        assert_eq!(
            presence.container_present("web", 1).await,
            Some(ContainerId::new("new"))
        );
    }

    #[tokio::test]
    async fn unknown_service_or_slot_is_absent() {
        let presence = ContainerPresence::new();
        presence.initialize_service("db").await;
        assert_eq!(presence.container_present("db", 1).await, None);
        assert_eq!(presence.container_present("cache", 1).await, None);
        assert!(!presence.container_died(&identity("cache", 1, "x")).await);
        assert_eq!(presence.snapshot().await.len(), 1);
    }
}
