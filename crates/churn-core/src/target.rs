//! Target selectors and their resolution against replica state.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeSet;

use crate::error::{LoadError, MaterializeReason};
use crate::replicas::ServiceReplicaState;

/// Which replicas of a service an action applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// A fixed number of replicas, at least one.
    Amount(u32),
    /// A percentage of the currently alive replicas, rounded up, at least one.
    Percentage(u32),
    /// Explicit slot numbers.
    Specific(BTreeSet<u32>),
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Amount(amount) => write!(f, "amount {amount}"),
            Target::Percentage(percentage) => write!(f, "percentage {percentage}%"),
            Target::Specific(slots) => {
                let rendered: Vec<String> = slots.iter().map(u32::to_string).collect();
                write!(f, "specific [{}]", rendered.join(", "))
            }
        }
    }
}

impl Target {
    /// Parses a target mapping. Exactly one of `amount`, `percentage` or
    /// `specific` must be present.
    pub fn from_mapping(raw: &Mapping) -> Result<Self, LoadError> {
        let payload = render_mapping(raw);
        let invalid = |message: String| LoadError::InvalidTarget {
            message,
            payload: payload.clone(),
        };

        if raw.len() != 1 {
            return Err(invalid(format!(
                "target must have exactly 1 selector, has {}",
                raw.len()
            )));
        }
        let Some((key, value)) = raw.iter().next() else {
            return Err(invalid("target is empty".to_string()));
        };
        let key = key
            .as_str()
            .ok_or_else(|| invalid("target selector must be a string".to_string()))?;

        match key {
            "amount" => {
                let amount = positive_integer(value).map_err(|message| {
                    invalid(format!("amount must be 1 or more ({message})"))
                })?;
                Ok(Target::Amount(amount))
            }
            "percentage" => {
                let percentage = positive_integer(value).map_err(|message| {
                    invalid(format!("percentage must be 1 or more ({message})"))
                })?;
                Ok(Target::Percentage(percentage))
            }
            "specific" => {
                let items = value
                    .as_sequence()
                    .ok_or_else(|| invalid("specific must be a list of slots".to_string()))?;
                let mut slots = BTreeSet::new();
                for item in items {
                    let slot = item
                        .as_i64()
                        .filter(|slot| *slot >= 0)
                        .and_then(|slot| u32::try_from(slot).ok())
                        .ok_or_else(|| {
                            invalid("slot numbers must be 0 or a positive number".to_string())
                        })?;
                    slots.insert(slot);
                }
                Ok(Target::Specific(slots))
            }
            other => Err(invalid(format!("'{other}' is not a supported target type"))),
        }
    }

    /// Number of replicas the selector covers given the current state.
    pub fn count_affected(&self, state: &ServiceReplicaState) -> usize {
        match self {
            Target::Amount(amount) => *amount as usize,
            Target::Percentage(percentage) => percent_of(*percentage, state.alive_count()),
            Target::Specific(slots) => slots.len(),
        }
    }

    /// Births the selected number of replicas. Returns how many were added.
    pub fn resolve_add(&self, state: &mut ServiceReplicaState) -> Result<usize, MaterializeReason> {
        match self {
            Target::Amount(_) | Target::Percentage(_) => {
                let count = self.count_affected(state);
                state.add(count);
                Ok(count)
            }
            Target::Specific(_) => Err(MaterializeReason::AddWithSpecific),
        }
    }

    /// Selects affected slots without changing the state, for actions that
    /// leave the container running.
    pub fn resolve_idle<R: Rng + ?Sized>(
        &self,
        state: &ServiceReplicaState,
        rng: &mut R,
    ) -> Result<Vec<u32>, MaterializeReason> {
        match self {
            Target::Amount(_) | Target::Percentage(_) => {
                state.pick_random(self.count_affected(state), rng)
            }
            Target::Specific(slots) => {
                state.ensure_alive(slots)?;
                Ok(slots.iter().copied().collect())
            }
        }
    }

    /// Selects affected slots and marks them dead.
    pub fn resolve_kill<R: Rng + ?Sized>(
        &self,
        state: &mut ServiceReplicaState,
        rng: &mut R,
    ) -> Result<Vec<u32>, MaterializeReason> {
        match self {
            Target::Amount(_) | Target::Percentage(_) => {
                state.kill_random(self.count_affected(state), rng)
            }
            Target::Specific(slots) => {
                state.ensure_alive(slots)?;
                let slots: Vec<u32> = slots.iter().copied().collect();
                state.kill(&slots);
                Ok(slots)
            }
        }
    }
}

/// `ceil(percentage * alive / 100)` in integer arithmetic.
fn percent_of(percentage: u32, alive: usize) -> usize {
    (percentage as usize * alive).div_ceil(100)
}

fn positive_integer(value: &Value) -> Result<u32, String> {
    let number = value
        .as_i64()
        .ok_or_else(|| format!("expected an integer, found {}", render_value(value)))?;
    if number < 1 {
        return Err(format!("found {number}"));
    }
    u32::try_from(number).map_err(|_| format!("{number} is too large"))
}

pub(crate) fn render_value(value: &Value) -> String {
    serde_yaml::to_string(value)
        .map(|text| text.trim_end().replace('\n', " "))
        .unwrap_or_else(|_| format!("{value:?}"))
}

pub(crate) fn render_mapping(mapping: &Mapping) -> String {
    render_value(&Value::Mapping(mapping.clone()))
}

#[cfg(test)]
mod tests {
    use super::Target;
    use crate::error::{LoadError, MaterializeReason};
    use crate::replicas::ServiceReplicaState;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use serde_yaml::Mapping;
    use std::collections::BTreeSet;

    fn mapping(yaml: &str) -> Mapping {
        serde_yaml::from_str(yaml).expect("test mapping")
    }

    #[test]
    fn parses_each_selector_kind() {
        assert_eq!(
            Target::from_mapping(&mapping("amount: 2")).unwrap(),
            Target::Amount(2)
        );
        assert_eq!(
            Target::from_mapping(&mapping("percentage: 50")).unwrap(),
            Target::Percentage(50)
        );
        assert_eq!(
            Target::from_mapping(&mapping("specific: [3, 1, 3]")).unwrap(),
            Target::Specific(BTreeSet::from([1, 3]))
        );
    }

    #[test]
    fn rejects_zero_amount_and_percentage() {
        for yaml in ["amount: 0", "percentage: 0", "amount: -2"] {
            let err = Target::from_mapping(&mapping(yaml)).expect_err(yaml);
            assert!(matches!(err, LoadError::InvalidTarget { .. }), "{yaml}");
        }
    }

    #[test]
    fn rejects_negative_specific_slots() {
        let err = Target::from_mapping(&mapping("specific: [1, -1]")).expect_err("negative");
        assert!(err.to_string().contains("0 or a positive number"));
    }

    #[test]
    fn requires_exactly_one_selector() {
        let err = Target::from_mapping(&mapping("amount: 1\npercentage: 10")).expect_err("two");
        assert!(err.to_string().contains("exactly 1 selector"));

        let err = Target::from_mapping(&Mapping::new()).expect_err("none");
        assert!(err.to_string().contains("exactly 1 selector"));

        let err = Target::from_mapping(&mapping("some: 1")).expect_err("unknown");
        assert!(err.to_string().contains("'some' is not a supported target type"));
    }

    #[test]
    fn percentage_rounds_up_against_alive_count() {
        let state = ServiceReplicaState::new(5);
        assert_eq!(Target::Percentage(50).count_affected(&state), 3);
        assert_eq!(Target::Percentage(1).count_affected(&state), 1);
        assert_eq!(Target::Percentage(100).count_affected(&state), 5);
    }

    #[test]
    fn add_with_specific_slots_is_rejected() {
        let mut state = ServiceReplicaState::new(2);
        let err = Target::Specific(BTreeSet::from([4]))
            .resolve_add(&mut state)
            .expect_err("specific add");
        assert_eq!(err, MaterializeReason::AddWithSpecific);
    }

    #[test]
    fn percentage_add_grows_alive_by_rounded_share() {
        let mut state = ServiceReplicaState::new(3);
        let added = Target::Percentage(30).resolve_add(&mut state).unwrap();
        assert_eq!(added, 1);
        assert_eq!(state.alive_count(), 4);
    }

    #[test]
    fn specific_kill_requires_every_slot_alive() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut state = ServiceReplicaState::new(6);
        let target = Target::Specific(BTreeSet::from([5]));
        assert_eq!(target.resolve_kill(&mut state, &mut rng).unwrap(), vec![5]);

        let err = target
            .resolve_kill(&mut state, &mut rng)
            .expect_err("already dead");
        assert_eq!(err, MaterializeReason::SlotNotAlive { slot: 5 });
    }

    #[test]
    fn idle_resolution_leaves_state_untouched() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let state = ServiceReplicaState::new(4);
        let before = state.clone();
        let slots = Target::Amount(2).resolve_idle(&state, &mut rng).unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(state, before);
    }

    #[test]
    fn percentage_over_hundred_cannot_kill_more_than_alive() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut state = ServiceReplicaState::new(2);
        let err = Target::Percentage(150)
            .resolve_kill(&mut state, &mut rng)
            .expect_err("too many");
        assert_eq!(
            err,
            MaterializeReason::NotEnoughAlive {
                alive: 2,
                requested: 3
            }
        );
    }
}
