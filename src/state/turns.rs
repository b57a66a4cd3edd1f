//! Turn bookkeeping: which station is correct, which is wrong, and who is next.

use std::collections::{HashSet, VecDeque};

use rand::{
    Rng,
    seq::{IndexedRandom, SliceRandom},
};

use crate::state::station::StationId;

/// Role a departing station held in the current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The station to press.
    Correct,
    /// The station to avoid.
    Wrong,
    /// No special role.
    None,
}

/// Selects the correct and wrong stations of each turn.
///
/// Holds the invariants: `correct != wrong`, neither is in `previous_correct`,
/// and `order` contains none of the three.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TurnSelector {
    order: VecDeque<StationId>,
    previous_correct: HashSet<StationId>,
    correct: Option<StationId>,
    wrong: Option<StationId>,
}

impl TurnSelector {
    /// Station currently lit as correct.
    pub fn correct(&self) -> Option<StationId> {
        self.correct
    }

    /// Station currently lit as wrong.
    pub fn wrong(&self) -> Option<StationId> {
        self.wrong
    }

    /// Remaining turn order, front first.
    pub fn order(&self) -> impl Iterator<Item = StationId> + '_ {
        self.order.iter().copied()
    }

    /// Whether no station is waiting for its turn.
    pub fn order_is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Stations already pressed as correct this round.
    pub fn previous_correct(&self) -> &HashSet<StationId> {
        &self.previous_correct
    }

    /// Whether `id` was already correct this round.
    pub fn was_correct(&self, id: StationId) -> bool {
        self.previous_correct.contains(&id)
    }

    /// Forget everything about the current round.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Start a round over `stations` in random order.
    pub fn start_round<R: Rng + ?Sized>(
        &mut self,
        stations: impl IntoIterator<Item = StationId>,
        rng: &mut R,
    ) {
        let mut order: Vec<_> = stations.into_iter().collect();
        order.shuffle(rng);
        self.order = order.into();
        self.previous_correct.clear();
        self.correct = None;
        self.wrong = None;
    }

    /// Pop the next correct station off the turn order.
    pub fn next_correct(&mut self) -> Option<StationId> {
        self.correct = self.order.pop_front();
        self.correct
    }

    /// Reserve a uniformly chosen remaining station as wrong.
    pub fn next_wrong<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<StationId> {
        self.wrong = if self.order.is_empty() {
            None
        } else {
            let index = rng.random_range(0..self.order.len());
            self.order.remove(index)
        };
        self.wrong
    }

    /// Return the reserved wrong station to the turn order; yields it so its light can be cleared.
    pub fn release_wrong(&mut self) -> Option<StationId> {
        let wrong = self.wrong.take()?;
        self.order.push_back(wrong);
        Some(wrong)
    }

    /// Record that the correct station was pressed.
    pub fn mark_correct_pressed(&mut self) -> Option<StationId> {
        let correct = self.correct.take()?;
        self.previous_correct.insert(correct);
        Some(correct)
    }

    /// Forget that `id` was pressed as correct (it let go after the round).
    pub fn forget_correct(&mut self, id: StationId) {
        self.previous_correct.remove(&id);
    }

    /// Pick the pre-game invitation among `candidates`, never the current one twice in a row
    /// when there is a choice.
    pub fn pick_pregame<R: Rng + ?Sized>(
        &mut self,
        candidates: &[StationId],
        rng: &mut R,
    ) -> Option<StationId> {
        let current = self.correct;
        let choices: Vec<StationId> = candidates
            .iter()
            .copied()
            .filter(|id| Some(*id) != current)
            .collect();
        self.correct = choices
            .choose(rng)
            .copied()
            .or_else(|| candidates.first().copied());
        self.correct
    }

    /// Drop a departing station from every structure and report the role it held.
    pub fn remove(&mut self, id: StationId) -> Role {
        self.order.retain(|other| *other != id);
        self.previous_correct.remove(&id);
        if self.correct == Some(id) {
            self.correct = None;
            Role::Correct
        } else if self.wrong == Some(id) {
            self.wrong = None;
            Role::Wrong
        } else {
            Role::None
        }
    }

    /// Check the selector invariants, describing the first violation found.
    pub fn check(&self) -> Result<(), String> {
        if self.correct.is_some() && self.correct == self.wrong {
            return Err(format!("correct and wrong are both {:?}", self.correct));
        }
        for role in [self.correct, self.wrong].into_iter().flatten() {
            if self.previous_correct.contains(&role) {
                return Err(format!("{role} holds a role but was already correct"));
            }
            if self.order.contains(&role) {
                return Err(format!("{role} holds a role but is still queued"));
            }
        }
        if let Some(id) = self.order.iter().find(|id| self.previous_correct.contains(id)) {
            return Err(format!("{id} is queued but was already correct"));
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn force_roles(&mut self, correct: Option<StationId>, wrong: Option<StationId>) {
        for id in [correct, wrong].into_iter().flatten() {
            self.order.retain(|other| *other != id);
            self.previous_correct.remove(&id);
        }
        self.correct = correct;
        self.wrong = wrong;
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn ids(raw: &[u64]) -> Vec<StationId> {
        raw.iter().copied().map(StationId).collect()
    }

    #[test]
    fn round_start_assigns_distinct_roles() {
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut turns = TurnSelector::default();
            turns.start_round(ids(&[1, 2, 3, 4]), &mut rng);

            let correct = turns.next_correct().unwrap();
            let wrong = turns.next_wrong(&mut rng).unwrap();
            assert_ne!(correct, wrong);
            assert_eq!(turns.order().count(), 2);
            turns.check().unwrap();
        }
    }

    #[test]
    fn two_stations_leave_an_empty_order() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut turns = TurnSelector::default();
        turns.start_round(ids(&[1, 2]), &mut rng);
        turns.next_correct();
        turns.next_wrong(&mut rng);

        assert!(turns.order_is_empty());
        let mut roles = vec![turns.correct().unwrap(), turns.wrong().unwrap()];
        roles.sort();
        assert_eq!(roles, ids(&[1, 2]));
    }

    #[test]
    fn empty_order_clears_roles() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut turns = TurnSelector::default();
        assert_eq!(turns.next_correct(), None);
        assert_eq!(turns.next_wrong(&mut rng), None);
    }

    #[test]
    fn advancing_returns_the_wrong_station_to_the_queue() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut turns = TurnSelector::default();
        turns.start_round(ids(&[1, 2, 3]), &mut rng);
        let first = turns.next_correct().unwrap();
        let wrong = turns.next_wrong(&mut rng).unwrap();

        assert_eq!(turns.mark_correct_pressed(), Some(first));
        assert_eq!(turns.release_wrong(), Some(wrong));
        let second = turns.next_correct().unwrap();
        turns.next_wrong(&mut rng);

        assert!(turns.was_correct(first));
        assert_ne!(second, first);
        turns.check().unwrap();
    }

    #[test]
    fn pregame_pick_never_repeats_with_a_choice() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut turns = TurnSelector::default();
        let candidates = ids(&[1, 2]);
        let mut last = turns.pick_pregame(&candidates, &mut rng);
        for _ in 0..20 {
            let next = turns.pick_pregame(&candidates, &mut rng);
            assert_ne!(next, last);
            last = next;
        }

        let single = ids(&[7]);
        assert_eq!(turns.pick_pregame(&single, &mut rng), Some(StationId(7)));
        assert_eq!(turns.pick_pregame(&single, &mut rng), Some(StationId(7)));
    }

    #[test]
    fn removal_reports_the_role() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut turns = TurnSelector::default();
        turns.start_round(ids(&[1, 2, 3]), &mut rng);
        let correct = turns.next_correct().unwrap();
        let wrong = turns.next_wrong(&mut rng).unwrap();
        let other = turns.order().next().unwrap();

        assert_eq!(turns.remove(other), Role::None);
        assert_eq!(turns.remove(wrong), Role::Wrong);
        assert_eq!(turns.remove(correct), Role::Correct);
        assert!(turns.order_is_empty());
        assert_eq!(turns.correct(), None);
        assert_eq!(turns.wrong(), None);
    }
}
