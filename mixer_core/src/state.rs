//! Process-wide runtime state that persists across jobs.

use crate::error::Result;

/// Self-tuned state the engine updates as it runs: the measured per-valve
/// run-on weights and the scale calibration constants.
///
/// Owned explicitly and passed into the engine at build time; every
/// mutation is followed by a `StatePersist::persist` call.
#[derive(Debug, Clone, PartialEq)]
pub struct MixerRuntimeState {
    /// Grams measured to keep flowing after each valve closes, indexed by
    /// internal valve index. Never negative.
    pub run_on_weight: Vec<f64>,
    /// Raw-counts zero point of the load cell.
    pub scale_offset: f64,
    /// Raw counts per gram.
    pub scale_ratio: f64,
}

impl MixerRuntimeState {
    /// Default run-on seed before the first measured pour of a valve.
    pub const DEFAULT_RUN_ON_G: f64 = 5.0;

    pub fn new(valve_count: usize) -> Self {
        Self::seeded(valve_count, Self::DEFAULT_RUN_ON_G)
    }

    pub fn seeded(valve_count: usize, run_on_seed_g: f64) -> Self {
        Self {
            run_on_weight: vec![run_on_seed_g; valve_count],
            scale_offset: 0.0,
            scale_ratio: 1.0,
        }
    }

    /// Restore from a persisted snapshot, falling back to seeds when the
    /// stored table does not match the valve count (e.g. after rewiring).
    pub fn from_persisted(
        persisted: &mixer_config::PersistedState,
        valve_count: usize,
        run_on_seed_g: f64,
    ) -> Self {
        let mut state = Self::seeded(valve_count, run_on_seed_g);
        if persisted.run_on_weight.len() == valve_count {
            state.run_on_weight = persisted.run_on_weight.clone();
        }
        state.scale_offset = persisted.scale_offset;
        state.scale_ratio = persisted.scale_ratio;
        state
    }

    pub fn to_persisted(&self) -> mixer_config::PersistedState {
        mixer_config::PersistedState {
            run_on_weight: self.run_on_weight.clone(),
            scale_offset: self.scale_offset,
            scale_ratio: self.scale_ratio,
        }
    }
}

/// Persistence hook invoked after each state mutation. Failures are logged
/// by the caller and never block the pour.
pub trait StatePersist {
    fn persist(&mut self, state: &MixerRuntimeState) -> Result<()>;
}

/// Persistence that drops the state; used in tests and simulations.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPersist;

impl StatePersist for NoopPersist {
    fn persist(&mut self, _state: &MixerRuntimeState) -> Result<()> {
        Ok(())
    }
}

impl StatePersist for mixer_config::StateStore {
    fn persist(&mut self, state: &MixerRuntimeState) -> Result<()> {
        self.save(&state.to_persisted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_every_valve() {
        let state = MixerRuntimeState::new(3);
        assert_eq!(state.run_on_weight, vec![5.0, 5.0, 5.0]);
    }

    #[test]
    fn restores_matching_persisted_table() {
        let persisted = mixer_config::PersistedState {
            run_on_weight: vec![1.0, 2.0],
            scale_offset: 10.0,
            scale_ratio: 2.5,
        };
        let state = MixerRuntimeState::from_persisted(&persisted, 2, 5.0);
        assert_eq!(state.run_on_weight, vec![1.0, 2.0]);
        assert!((state.scale_ratio - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn reseeds_on_valve_count_mismatch() {
        let persisted = mixer_config::PersistedState {
            run_on_weight: vec![1.0, 2.0],
            scale_offset: 10.0,
            scale_ratio: 2.5,
        };
        let state = MixerRuntimeState::from_persisted(&persisted, 4, 3.0);
        assert_eq!(state.run_on_weight, vec![3.0; 4]);
    }
}
