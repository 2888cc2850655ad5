use crate::RhythmError;

/// Width of the backtracking pointers; bounds the number of states.
pub type StateIndex = u32;

/// Largest state count addressable by `StateIndex`.
pub const MAX_STATES: u64 = StateIndex::MAX as u64 + 1;

pub(crate) fn check_state_count(num_states: usize) -> Result<(), RhythmError> {
    if num_states as u64 > MAX_STATES {
        return Err(RhythmError::Configuration(format!(
            "{} states exceed the {} addressable by the state index",
            num_states, MAX_STATES
        )));
    }
    Ok(())
}

/// Flat lattice of frame positions, decoded `num_beat_variables` times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowedStateSpace {
    pub num_states: usize,
    pub tau: usize,
    pub num_beat_variables: usize,
}

impl WindowedStateSpace {
    /// `tau` must divide `num_states`; a remainder is rejected rather than
    /// dropped.
    pub fn new(num_states: usize, tau: usize) -> Result<Self, RhythmError> {
        if tau == 0 {
            return Err(RhythmError::InvalidInput("tau must be > 0".to_string()));
        }
        if num_states == 0 {
            return Err(RhythmError::EmptyActivations);
        }
        if num_states % tau != 0 {
            return Err(RhythmError::InvalidInput(format!(
                "tau {} does not divide {} states",
                tau, num_states
            )));
        }
        check_state_count(num_states)?;
        Ok(Self {
            num_states,
            tau,
            num_beat_variables: num_states / tau,
        })
    }
}

/// Beat-phase × tempo lattice; state `tempo_index * num_beat_states + phase`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeStateSpace {
    pub num_beat_states: usize,
    /// Beat-phase steps advanced per frame, strictly increasing.
    pub tempo_states: Vec<usize>,
    pub num_states: usize,
}

impl CompositeStateSpace {
    pub fn new(num_beat_states: usize, tempo_states: Vec<usize>) -> Result<Self, RhythmError> {
        if num_beat_states == 0 {
            return Err(RhythmError::Configuration(
                "num_beat_states must be > 0".to_string(),
            ));
        }
        if tempo_states.is_empty() {
            return Err(RhythmError::Configuration(
                "at least one tempo state is required".to_string(),
            ));
        }
        if tempo_states.contains(&0) {
            return Err(RhythmError::Configuration(
                "tempo states must be > 0".to_string(),
            ));
        }
        let num_states = num_beat_states
            .checked_mul(tempo_states.len())
            .ok_or_else(|| {
                RhythmError::Configuration(format!(
                    "{} beat states x {} tempi overflows",
                    num_beat_states,
                    tempo_states.len()
                ))
            })?;
        check_state_count(num_states)?;
        Ok(Self {
            num_beat_states,
            tempo_states,
            num_states,
        })
    }

    /// Tempo states covering `[min_bpm, max_bpm]` at `fps` frames per second.
    pub fn from_bpm_range(
        num_beat_states: usize,
        min_bpm: f32,
        max_bpm: f32,
        fps: f32,
    ) -> Result<Self, RhythmError> {
        if !fps.is_finite()
            || fps <= 0.0
            || !min_bpm.is_finite()
            || min_bpm <= 0.0
            || !max_bpm.is_finite()
            || max_bpm < min_bpm
        {
            return Err(RhythmError::Configuration(format!(
                "invalid tempo range {}..{} bpm at {} fps",
                min_bpm, max_bpm, fps
            )));
        }
        let steps = |bpm: f32| {
            (bpm as f64 * num_beat_states as f64 / (60.0 * fps as f64)).round() as usize
        };
        let min_tempo = steps(min_bpm).max(1);
        let max_tempo = steps(max_bpm).max(min_tempo);
        Self::new(num_beat_states, (min_tempo..=max_tempo).collect())
    }

    pub fn num_tempi(&self) -> usize {
        self.tempo_states.len()
    }

    pub fn state(&self, tempo_index: usize, beat_phase: usize) -> usize {
        debug_assert!(tempo_index < self.tempo_states.len());
        debug_assert!(beat_phase < self.num_beat_states);
        tempo_index * self.num_beat_states + beat_phase
    }

    pub fn beat_phase(&self, state: usize) -> usize {
        state % self.num_beat_states
    }

    pub fn tempo_index(&self, state: usize) -> usize {
        state / self.num_beat_states
    }

    pub fn tempo(&self, state: usize) -> usize {
        self.tempo_states[self.tempo_index(state)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_state_decomposes() {
        let space = CompositeStateSpace::new(8, vec![1, 2, 3]).expect("valid space");
        assert_eq!(space.num_states, 24);
        for state in 0..space.num_states {
            let rebuilt = space.state(space.tempo_index(state), space.beat_phase(state));
            assert_eq!(rebuilt, state);
        }
        assert_eq!(space.tempo(17), 3);
        assert_eq!(space.beat_phase(17), 1);
    }

    #[test]
    fn composite_rejects_state_count_beyond_index_width() {
        let tempi: Vec<usize> = (1..=4097).collect();
        let err = CompositeStateSpace::new(1 << 20, tempi).expect_err("too many states");
        assert!(matches!(err, RhythmError::Configuration(_)));
    }

    #[test]
    fn composite_accepts_largest_addressable_count() {
        let tempi: Vec<usize> = (1..=4096).collect();
        let space = CompositeStateSpace::new(1 << 20, tempi).expect("at the index limit");
        assert_eq!(space.num_states as u64, MAX_STATES);
    }

    #[test]
    fn bpm_range_maps_to_inclusive_tempo_states() {
        let space = CompositeStateSpace::from_bpm_range(640, 55.0, 205.0, 100.0)
            .expect("valid range");
        // 55 bpm -> 5.87 steps, 205 bpm -> 21.87 steps
        assert_eq!(space.tempo_states.first(), Some(&6));
        assert_eq!(space.tempo_states.last(), Some(&22));
        assert_eq!(space.num_states, 640 * 17);
    }

    #[test]
    fn windowed_requires_divisible_tau() {
        let space = WindowedStateSpace::new(12, 4).expect("divisible");
        assert_eq!(space.num_beat_variables, 3);

        let err = WindowedStateSpace::new(13, 4).expect_err("remainder");
        assert!(matches!(err, RhythmError::InvalidInput(_)));
        assert!(matches!(
            WindowedStateSpace::new(0, 4),
            Err(RhythmError::EmptyActivations)
        ));
    }
}
