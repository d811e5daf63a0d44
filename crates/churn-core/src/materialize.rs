//! Turns a parsed script into the flat, ID-ordered event sequence.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::error::{LoadError, MaterializeReason};
use crate::event::{ContainerAction, EventKind, ExecutableEvent};
use crate::parse::{parse_script, ParsedScript};
use crate::replicas::ServiceReplicaState;
use crate::script::{RawMoment, RawServiceAction};
use crate::types::EventId;

/// Maps internal 0-based slots to the numbering used by the cluster runtime.
pub trait SlotTranslator {
    fn external_slot(&self, internal: u32) -> Result<u32, String>;
}

/// Keeps internal slot numbers as they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct InternalSlots;

impl SlotTranslator for InternalSlots {
    fn external_slot(&self, internal: u32) -> Result<u32, String> {
        Ok(internal)
    }
}

/// Output of a successful load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub seed: i64,
    pub events: Vec<ExecutableEvent>,
    /// Replica state of every service after the last moment.
    pub replicas: BTreeMap<String, ServiceReplicaState>,
}

/// Stable in-place sort: walks from the back, swapping only strictly smaller
/// neighbours, so equal elements keep their declaration order.
pub fn stable_bubble_sort<T>(items: &mut [T], less: impl Fn(&T, &T) -> bool) {
    let len = items.len();
    for i in 0..len {
        for j in (i + 1..len).rev() {
            if less(&items[j], &items[j - 1]) {
                items.swap(j, j - 1);
            }
        }
    }
}

/// Single-use walker over one script. Owns the ID counter and the slot
/// selection generator, both fresh for every load.
pub struct Materializer {
    seed: i64,
    next_id: u64,
    rng: ChaCha8Rng,
    replicas: BTreeMap<String, ServiceReplicaState>,
    events: Vec<ExecutableEvent>,
}

impl Materializer {
    pub fn new(seed: i64) -> Self {
        Self {
            seed,
            next_id: 0,
            rng: ChaCha8Rng::seed_from_u64(seed as u64),
            replicas: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    pub fn materialize<T>(
        mut self,
        mut moments: Vec<RawMoment>,
        translator: &T,
    ) -> Result<Plan, LoadError>
    where
        T: SlotTranslator + ?Sized,
    {
        stable_bubble_sort(&mut moments, |a, b| a.time() < b.time());

        for moment in moments {
            match moment {
                RawMoment::Beginning { initial_counts } => {
                    for (service, count) in initial_counts {
                        self.replicas.insert(service, ServiceReplicaState::new(count));
                    }
                    self.push(0, true, EventKind::Beginning);
                }
                RawMoment::End { time } => self.push(time, false, EventKind::End),
                RawMoment::Moment {
                    time,
                    mark,
                    services,
                } => {
                    if services.is_empty() {
                        if let Some(message) = mark.filter(|mark| !mark.is_empty()) {
                            self.push(time, false, EventKind::Mark { message });
                        }
                        continue;
                    }
                    for (service, actions) in services {
                        for action in actions {
                            self.apply(time, &service, &action, translator)
                                .map_err(|reason| LoadError::Materialize {
                                    time,
                                    action: action.kind_name(),
                                    service: service.clone(),
                                    reason,
                                })?;
                        }
                    }
                }
            }
        }

        info!(
            seed = self.seed,
            events = self.events.len(),
            services = self.replicas.len(),
            "script materialized"
        );
        Ok(Plan {
            seed: self.seed,
            events: self.events,
            replicas: self.replicas,
        })
    }

    fn push(&mut self, time: u64, processed: bool, kind: EventKind) {
        let event = ExecutableEvent {
            id: EventId(self.next_id),
            time,
            processed,
            kind,
        };
        self.next_id += 1;
        debug!(event = %event, "event materialized");
        self.events.push(event);
    }

    fn apply<T>(
        &mut self,
        time: u64,
        service: &str,
        action: &RawServiceAction,
        translator: &T,
    ) -> Result<(), MaterializeReason>
    where
        T: SlotTranslator + ?Sized,
    {
        let state = self
            .replicas
            .get_mut(service)
            .ok_or(MaterializeReason::UnknownService)?;
        debug!(
            time,
            service,
            action = %action,
            alive = ?state.alive(),
            dead = ?state.dead(),
            "replica state before action"
        );

        let (slots, container_action) = match action {
            RawServiceAction::Start { target } => {
                let count = target.resolve_add(state)?;
                debug!(time, service, alive = ?state.alive(), "replica state after action");
                self.push(
                    time,
                    false,
                    EventKind::StartCount {
                        service: service.to_string(),
                        count,
                    },
                );
                return Ok(());
            }
            RawServiceAction::Stop { target } => {
                (target.resolve_kill(state, &mut self.rng)?, ContainerAction::Stop)
            }
            RawServiceAction::Signal {
                target,
                signal,
                kills_container,
            } => {
                let slots = if *kills_container {
                    target.resolve_kill(state, &mut self.rng)?
                } else {
                    target.resolve_idle(state, &mut self.rng)?
                };
                let action = ContainerAction::Signal {
                    signal: signal.clone(),
                };
                (slots, action)
            }
            RawServiceAction::CustomFault {
                target,
                fault,
                kills_container,
            } => {
                let slots = if *kills_container {
                    target.resolve_kill(state, &mut self.rng)?
                } else {
                    target.resolve_idle(state, &mut self.rng)?
                };
                (slots, ContainerAction::Fault(fault.clone()))
            }
        };
        debug!(
            time,
            service,
            affected = ?slots,
            alive = ?state.alive(),
            dead = ?state.dead(),
            "replica state after action"
        );

        for slot in slots {
            let slot = translator
                .external_slot(slot)
                .map_err(MaterializeReason::Translate)?;
            self.push(
                time,
                false,
                EventKind::ContainerAction {
                    service: service.to_string(),
                    slot,
                    action: container_action.clone(),
                },
            );
        }
        Ok(())
    }
}

/// Materializes an already parsed script with a fresh [`Materializer`].
pub fn materialize_script<T>(script: ParsedScript, translator: &T) -> Result<Plan, LoadError>
where
    T: SlotTranslator + ?Sized,
{
    Materializer::new(script.seed).materialize(script.moments, translator)
}

/// Parses and materializes `text` in one step.
pub fn load_plan<T>(text: &str, translator: &T) -> Result<Plan, LoadError>
where
    T: SlotTranslator + ?Sized,
{
    materialize_script(parse_script(text)?, translator)
}
