//! Alive/dead slot bookkeeping for one service during materialization.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::MaterializeReason;

/// Simulated replica population of a single service.
///
/// Slots are born with monotonically increasing numbers and are never reused
/// once dead.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceReplicaState {
    alive: BTreeSet<u32>,
    dead: BTreeSet<u32>,
}

impl ServiceReplicaState {
    /// State of a service that starts with `count` replicas in slots `0..count`.
    pub fn new(count: u32) -> Self {
        let mut state = Self::default();
        state.add(count as usize);
        state
    }

    pub fn alive(&self) -> &BTreeSet<u32> {
        &self.alive
    }

    pub fn dead(&self) -> &BTreeSet<u32> {
        &self.dead
    }

    pub fn alive_count(&self) -> usize {
        self.alive.len()
    }

    pub fn is_alive(&self, slot: u32) -> bool {
        self.alive.contains(&slot)
    }

    /// Births `amount` new slots after the highest slot ever used and returns
    /// them in ascending order.
    pub fn add(&mut self, amount: usize) -> Vec<u32> {
        let highest = self.alive.iter().chain(self.dead.iter()).max().copied();
        let mut next = highest.map_or(0, |slot| slot + 1);
        let mut born = Vec::with_capacity(amount);
        for _ in 0..amount {
            self.alive.insert(next);
            born.push(next);
            next += 1;
        }
        born
    }

    /// Picks `amount` distinct alive slots uniformly at random without
    /// touching the state.
    ///
    /// The alive set is walked in ascending order and shuffled with `rng`, so
    /// the pick only depends on the state and the generator position.
    pub fn pick_random<R: Rng + ?Sized>(
        &self,
        amount: usize,
        rng: &mut R,
    ) -> Result<Vec<u32>, MaterializeReason> {
        if amount > self.alive.len() {
            return Err(MaterializeReason::NotEnoughAlive {
                alive: self.alive.len(),
                requested: amount,
            });
        }
        let mut candidates: Vec<u32> = self.alive.iter().copied().collect();
        candidates.shuffle(rng);
        candidates.truncate(amount);
        Ok(candidates)
    }

    /// Same pick as [`pick_random`](Self::pick_random), then moves the picked
    /// slots to the dead set.
    pub fn kill_random<R: Rng + ?Sized>(
        &mut self,
        amount: usize,
        rng: &mut R,
    ) -> Result<Vec<u32>, MaterializeReason> {
        let picked = self.pick_random(amount, rng)?;
        self.kill(&picked);
        Ok(picked)
    }

    pub fn ensure_alive<'a>(
        &self,
        slots: impl IntoIterator<Item = &'a u32>,
    ) -> Result<(), MaterializeReason> {
        for slot in slots {
            if !self.is_alive(*slot) {
                return Err(MaterializeReason::SlotNotAlive { slot: *slot });
            }
        }
        Ok(())
    }

    /// Moves `slots` from alive to dead. Callers validate liveness first.
    pub fn kill(&mut self, slots: &[u32]) {
        for slot in slots {
            if self.alive.remove(slot) {
                self.dead.insert(*slot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ServiceReplicaState;
    use crate::error::MaterializeReason;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::BTreeSet;

    #[test]
    fn new_state_has_contiguous_alive_slots() {
        let state = ServiceReplicaState::new(3);
        assert_eq!(state.alive(), &BTreeSet::from([0, 1, 2]));
        assert!(state.dead().is_empty());
    }

    #[test]
    fn add_never_reuses_dead_slots() {
        let mut state = ServiceReplicaState::new(3);
        state.kill(&[2]);
        let born = state.add(2);
        assert_eq!(born, vec![3, 4]);
        assert_eq!(state.alive(), &BTreeSet::from([0, 1, 3, 4]));
        assert_eq!(state.dead(), &BTreeSet::from([2]));
    }

    #[test]
    fn add_to_empty_state_starts_at_zero() {
        let mut state = ServiceReplicaState::default();
        assert_eq!(state.add(2), vec![0, 1]);
    }

    #[test]
    fn kill_random_moves_slots_and_keeps_sets_disjoint() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut state = ServiceReplicaState::new(6);
        let killed = state.kill_random(4, &mut rng).expect("kill four");

        assert_eq!(killed.len(), 4);
        assert_eq!(state.alive_count(), 2);
        assert_eq!(state.dead().len(), 4);
        assert!(state.alive().is_disjoint(state.dead()));
        for slot in killed {
            assert!(state.dead().contains(&slot));
        }
    }

    #[test]
    fn pick_random_is_reproducible_for_same_seed() {
        let state = ServiceReplicaState::new(10);
        let first = state
            .pick_random(4, &mut ChaCha8Rng::seed_from_u64(568))
            .expect("pick");
        let second = state
            .pick_random(4, &mut ChaCha8Rng::seed_from_u64(568))
            .expect("pick");
        assert_eq!(first, second);
        assert_eq!(state.alive_count(), 10);
    }

    #[test]
    fn pick_random_rejects_more_than_alive() {
        let state = ServiceReplicaState::new(2);
        let err = state
            .pick_random(3, &mut ChaCha8Rng::seed_from_u64(1))
            .expect_err("too many");
        assert_eq!(
            err,
            MaterializeReason::NotEnoughAlive {
                alive: 2,
                requested: 3
            }
        );
    }

    #[test]
    fn ensure_alive_reports_first_missing_slot() {
        let mut state = ServiceReplicaState::new(4);
        state.kill(&[1]);
        assert!(state.ensure_alive(&[0, 2]).is_ok());
        assert_eq!(
            state.ensure_alive(&[0, 1, 9]),
            Err(MaterializeReason::SlotNotAlive { slot: 1 })
        );
    }
}
