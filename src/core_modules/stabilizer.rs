// THEORY:
// The `TemporalStabilizer` debounces the per-frame occupancy verdict of each
// spot. A single detection is cheap to get wrong (a passing pedestrian, a
// shadow), so a spot only becomes Occupied after a run of consecutive occupied
// frames. Leaving is immediate: one empty frame resets the run and frees the
// spot.
//
// The stabilizer itself holds only the threshold. The per-spot history lives in
// a `StabilizerState` map that callers own and pass in, which lets the parallel
// pipeline move states into worker tasks and take them back afterwards.

use crate::core_modules::spot::SpotId;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OccupancyStatus {
    #[default]
    Free,
    Occupied,
}

impl OccupancyStatus {
    pub fn is_occupied(self) -> bool {
        self == OccupancyStatus::Occupied
    }
}

/// Occupancy history of one spot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpotOccupancyState {
    pub consecutive_occupied_frames: u32,
    pub stable_status: OccupancyStatus,
}

#[derive(Debug, Clone, Copy)]
pub struct TemporalStabilizer {
    threshold: u32,
}

impl TemporalStabilizer {
    pub fn new(consecutive_frames_threshold: u32) -> Self {
        Self {
            threshold: consecutive_frames_threshold,
        }
    }

    /// Folds one frame's verdict into `state` and returns the stable status.
    pub fn observe(
        &self,
        state: &mut SpotOccupancyState,
        occupied_this_frame: bool,
    ) -> OccupancyStatus {
        state.consecutive_occupied_frames = if occupied_this_frame {
            state.consecutive_occupied_frames.saturating_add(1)
        } else {
            0
        };
        state.stable_status = if state.consecutive_occupied_frames >= self.threshold {
            OccupancyStatus::Occupied
        } else {
            OccupancyStatus::Free
        };
        state.stable_status
    }
}

/// Per-spot occupancy histories keyed by spot id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StabilizerState {
    spots: BTreeMap<SpotId, SpotOccupancyState>,
}

impl StabilizerState {
    /// A fresh `{0, Free}` history for every id.
    pub fn new(ids: impl IntoIterator<Item = SpotId>) -> Self {
        Self {
            spots: ids
                .into_iter()
                .map(|id| (id, SpotOccupancyState::default()))
                .collect(),
        }
    }

    pub fn get(&self, id: SpotId) -> Option<&SpotOccupancyState> {
        self.spots.get(&id)
    }

    /// The history of `id`, created fresh if it was never seen.
    pub fn entry(&mut self, id: SpotId) -> &mut SpotOccupancyState {
        self.spots.entry(id).or_default()
    }

    /// Removes the history of `id` so it can be handed to a worker.
    pub fn take(&mut self, id: SpotId) -> SpotOccupancyState {
        self.spots.remove(&id).unwrap_or_default()
    }

    pub fn insert(&mut self, id: SpotId, state: SpotOccupancyState) {
        self.spots.insert(id, state);
    }

    pub fn reset(&mut self) {
        for state in self.spots.values_mut() {
            *state = SpotOccupancyState::default();
        }
    }

    pub fn len(&self) -> usize {
        self.spots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(stabilizer: &TemporalStabilizer, frames: &[bool]) -> Vec<OccupancyStatus> {
        let mut state = SpotOccupancyState::default();
        frames
            .iter()
            .map(|occupied| stabilizer.observe(&mut state, *occupied))
            .collect()
    }

    #[test]
    fn enters_after_exactly_n_frames() {
        use OccupancyStatus::{Free, Occupied};
        let statuses = run(&TemporalStabilizer::new(3), &[true, true, true, true]);
        assert_eq!(statuses, vec![Free, Free, Occupied, Occupied]);
    }

    #[test]
    fn one_empty_frame_frees_the_spot() {
        use OccupancyStatus::{Free, Occupied};
        let statuses = run(
            &TemporalStabilizer::new(3),
            &[true, true, true, false, true, true, true],
        );
        assert_eq!(
            statuses,
            vec![Free, Free, Occupied, Free, Free, Free, Occupied]
        );
    }

    #[test]
    fn interrupted_runs_never_enter() {
        let statuses = run(
            &TemporalStabilizer::new(3),
            &[true, true, false, true, true, false],
        );
        assert!(!statuses.iter().any(|status| status.is_occupied()));
    }

    #[test]
    fn threshold_of_one_follows_the_raw_signal() {
        use OccupancyStatus::{Free, Occupied};
        let statuses = run(&TemporalStabilizer::new(1), &[true, false, true]);
        assert_eq!(statuses, vec![Occupied, Free, Occupied]);
    }

    #[test]
    fn counter_saturates() {
        let stabilizer = TemporalStabilizer::new(3);
        let mut state = SpotOccupancyState {
            consecutive_occupied_frames: u32::MAX,
            stable_status: OccupancyStatus::Occupied,
        };
        assert_eq!(
            stabilizer.observe(&mut state, true),
            OccupancyStatus::Occupied
        );
        assert_eq!(state.consecutive_occupied_frames, u32::MAX);
    }

    #[test]
    fn reset_clears_every_history() {
        let stabilizer = TemporalStabilizer::new(2);
        let mut states = StabilizerState::new([1, 2]);
        for _ in 0..2 {
            stabilizer.observe(states.entry(1), true);
        }
        assert_eq!(
            states.get(1).map(|state| state.stable_status),
            Some(OccupancyStatus::Occupied)
        );
        states.reset();
        assert_eq!(states, StabilizerState::new([1, 2]));
    }

    #[test]
    fn taken_states_come_back_unchanged() {
        let mut states = StabilizerState::new([4]);
        states.entry(4).consecutive_occupied_frames = 2;
        let taken = states.take(4);
        assert!(states.is_empty());
        states.insert(4, taken);
        assert_eq!(
            states.get(4).map(|state| state.consecutive_occupied_frames),
            Some(2)
        );
    }
}
