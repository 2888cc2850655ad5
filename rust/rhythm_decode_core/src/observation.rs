use crate::state_space::{CompositeStateSpace, WindowedStateSpace};
use crate::RhythmError;
use ndarray::Array2;

/// Emission values of one decode call, in the linear domain.
#[derive(Debug, Clone)]
pub struct Densities {
    /// Shape: frames x columns, or 1 x columns when `per_frame` is false.
    pub values: Array2<f64>,
    pub per_frame: bool,
}

/// Maps states and activations to emission likelihoods.
///
/// States share density columns through `pointer`, so a model only has to
/// materialize as many values per frame as it has distinct emissions.
pub trait ObservationModel: Sync {
    /// Number of states `pointer` accepts.
    fn num_states(&self) -> usize;

    fn num_frames(&self, activations: &[f32]) -> Result<usize, RhythmError>;

    fn densities(&self, activations: &[f32]) -> Result<Densities, RhythmError>;

    /// Density column used by `state`.
    fn pointer(&self, state: usize) -> usize;
}

fn check_activations(activations: &[f32], upper_bound: Option<f32>) -> Result<(), RhythmError> {
    for (i, &a) in activations.iter().enumerate() {
        let out_of_range = match upper_bound {
            Some(max) => a > max,
            None => false,
        };
        if !a.is_finite() || a < 0.0 || out_of_range {
            return Err(RhythmError::InvalidInput(format!(
                "activation {} at index {} is out of range",
                a, i
            )));
        }
    }
    Ok(())
}

/// Beat region versus the rest of the beat period.
#[derive(Debug, Clone)]
pub struct BeatPhaseObservations {
    num_beat_states: usize,
    observation_lambda: usize,
    /// 1 for beat-region states, 0 otherwise.
    pointers: Vec<u8>,
}

impl BeatPhaseObservations {
    pub fn new(
        space: &CompositeStateSpace,
        observation_lambda: usize,
    ) -> Result<Self, RhythmError> {
        if observation_lambda < 2 {
            return Err(RhythmError::Configuration(format!(
                "observation lambda must be >= 2; got {}",
                observation_lambda
            )));
        }
        let mut model = Self {
            num_beat_states: space.num_beat_states,
            observation_lambda,
            pointers: Vec::new(),
        };
        model.pointers = (0..space.num_states)
            .map(|state| u8::from(model.in_beat_region(space.beat_phase(state))))
            .collect();
        Ok(model)
    }

    /// `beat_phase < num_beat_states / observation_lambda`, compared exactly.
    pub fn in_beat_region(&self, beat_phase: usize) -> bool {
        beat_phase
            .checked_mul(self.observation_lambda)
            .map_or(false, |scaled| scaled < self.num_beat_states)
    }

    pub fn num_beat_states(&self) -> usize {
        self.num_beat_states
    }

    pub fn observation_lambda(&self) -> usize {
        self.observation_lambda
    }
}

impl ObservationModel for BeatPhaseObservations {
    fn num_states(&self) -> usize {
        self.pointers.len()
    }

    fn num_frames(&self, activations: &[f32]) -> Result<usize, RhythmError> {
        Ok(activations.len())
    }

    fn densities(&self, activations: &[f32]) -> Result<Densities, RhythmError> {
        check_activations(activations, Some(1.0))?;
        let none_share = (self.observation_lambda - 1) as f64;
        let mut values = Array2::zeros((activations.len(), 2));
        for (mut row, &a) in values.outer_iter_mut().zip(activations.iter()) {
            let a = a as f64;
            row[0] = (1.0 - a) / none_share;
            row[1] = a;
        }
        Ok(Densities {
            values,
            per_frame: true,
        })
    }

    #[inline]
    fn pointer(&self, state: usize) -> usize {
        self.pointers[state] as usize
    }
}

/// Each flattened position emits its own activation, for every beat variable.
#[derive(Debug, Clone)]
pub struct WindowedObservations {
    space: WindowedStateSpace,
}

impl WindowedObservations {
    pub fn new(space: &WindowedStateSpace) -> Self {
        Self {
            space: space.clone(),
        }
    }
}

impl ObservationModel for WindowedObservations {
    fn num_states(&self) -> usize {
        self.space.num_states
    }

    fn num_frames(&self, activations: &[f32]) -> Result<usize, RhythmError> {
        if activations.len() != self.space.num_states {
            return Err(RhythmError::InvalidInput(format!(
                "expected {} activations; got {}",
                self.space.num_states,
                activations.len()
            )));
        }
        Ok(self.space.num_beat_variables)
    }

    fn densities(&self, activations: &[f32]) -> Result<Densities, RhythmError> {
        check_activations(activations, None)?;
        let row: Vec<f64> = activations.iter().map(|&a| a as f64).collect();
        let values = Array2::from_shape_vec((1, row.len()), row)
            .map_err(|e| RhythmError::InvalidInput(e.to_string()))?;
        Ok(Densities {
            values,
            per_frame: false,
        })
    }

    #[inline]
    fn pointer(&self, state: usize) -> usize {
        state
    }
}
