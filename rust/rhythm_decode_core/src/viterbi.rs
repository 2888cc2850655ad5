use crate::config::validate_engine_config;
use crate::observation::{Densities, ObservationModel};
use crate::state_space::{check_state_count, StateIndex};
use crate::transition::{log_or_neg_inf, TransitionModel};
use crate::types::{Decoded, ProgressEvent, ProgressSink, ProgressStage};
use crate::{with_progress, EngineConfig, Normalization, NumericDomain, RhythmError};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::sync::Arc;

/// How the first frame is scored, which also fixes the backtracking
/// convention.
#[derive(Debug, Clone, PartialEq)]
pub enum Initialization {
    /// `v[0][s] = prior[s] ⊗ emission`. No pointers exist for frame 0, so
    /// backtracking reads `bt[k + 1]` to recover frame `k`.
    Prior(Vec<f64>),
    /// Frame 0 runs the full recurrence from a previous vector of ones.
    /// Pointers are recorded for every frame, including frame 0, and
    /// backtracking walks all of them.
    UniformPredecessors,
}

#[derive(Debug, Clone)]
pub struct HiddenModel<T, O> {
    pub transitions: T,
    pub observations: O,
    pub initialization: Initialization,
}

impl<T: TransitionModel, O: ObservationModel> HiddenModel<T, O> {
    pub fn new(
        transitions: T,
        observations: O,
        initialization: Initialization,
    ) -> Result<Self, RhythmError> {
        if observations.num_states() != transitions.num_states() {
            return Err(RhythmError::Configuration(format!(
                "observation model covers {} states; transition model has {}",
                observations.num_states(),
                transitions.num_states()
            )));
        }
        if let Initialization::Prior(prior) = &initialization {
            if prior.len() != transitions.num_states() {
                return Err(RhythmError::InvalidInput(format!(
                    "prior length {} does not match {} states",
                    prior.len(),
                    transitions.num_states()
                )));
            }
            if prior.iter().any(|p| !p.is_finite() || *p < 0.0) {
                return Err(RhythmError::InvalidInput(
                    "prior must be finite and >= 0".to_string(),
                ));
            }
        }
        Ok(Self {
            transitions,
            observations,
            initialization,
        })
    }

    pub fn num_states(&self) -> usize {
        self.transitions.num_states()
    }
}

/// Forward pass and backtracking with one fixed numeric strategy.
///
/// With `num_workers > 1` the engine owns a dedicated pool, built once and
/// shared by clones, so repeated decodes reuse the same threads.
#[derive(Debug, Clone)]
pub struct ViterbiEngine {
    config: EngineConfig,
    pool: Option<Arc<ThreadPool>>,
}

impl ViterbiEngine {
    pub fn new(config: EngineConfig) -> Result<Self, RhythmError> {
        validate_engine_config(&config)
            .map_err(|issue| RhythmError::Configuration(issue.to_string()))?;
        let pool = thread_pool(config.num_workers)?;
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn decode<T, O>(
        &self,
        model: &HiddenModel<T, O>,
        activations: &[f32],
    ) -> Result<Decoded, RhythmError>
    where
        T: TransitionModel,
        O: ObservationModel,
    {
        self.decode_with_progress(model, activations, None)
    }

    /// Decode reporting stage progress and every normalized frame to
    /// `progress`.
    pub fn decode_with_progress<T, O>(
        &self,
        model: &HiddenModel<T, O>,
        activations: &[f32],
        progress: Option<&mut dyn ProgressSink>,
    ) -> Result<Decoded, RhythmError>
    where
        T: TransitionModel,
        O: ObservationModel,
    {
        with_progress(progress, |sink| self.run(model, activations, sink))
    }

    fn run<T, O>(
        &self,
        model: &HiddenModel<T, O>,
        activations: &[f32],
        sink: &mut dyn ProgressSink,
    ) -> Result<Decoded, RhythmError>
    where
        T: TransitionModel,
        O: ObservationModel,
    {
        let num_states = model.num_states();
        let num_frames = model.observations.num_frames(activations)?;
        if num_frames == 0 || num_states == 0 {
            return Err(RhythmError::EmptyActivations);
        }
        check_state_count(num_states)?;
        let table_len = num_frames.checked_mul(num_states).ok_or_else(|| {
            RhythmError::Configuration(format!(
                "backtracking table of {} frames x {} states overflows",
                num_frames, num_states
            ))
        })?;

        let domain = self.config.domain;
        let mut densities = model.observations.densities(activations)?;
        if domain == NumericDomain::Log {
            densities.values.mapv_inplace(log_or_neg_inf);
        }
        log::debug!(
            "viterbi: {} frames x {} states, {:?}/{:?}, {} workers",
            num_frames,
            num_states,
            domain,
            self.config.normalization,
            self.config.num_workers
        );

        sink.on_progress(ProgressEvent {
            stage: ProgressStage::Forward,
            progress: 0.0,
        });

        let mut previous = vec![0.0f64; num_states];
        let mut current = vec![0.0f64; num_states];
        let mut pointers: Vec<StateIndex> = vec![0; table_len];
        let mut log_scale = 0.0f64;

        let first_frame = match &model.initialization {
            Initialization::Prior(prior) => {
                let row = densities.values.row(0);
                for (state, value) in current.iter_mut().enumerate() {
                    let density = row[model.observations.pointer(state)];
                    *value = match domain {
                        NumericDomain::Log => log_or_neg_inf(prior[state]) + density,
                        NumericDomain::Linear => prior[state] * density,
                    };
                }
                log_scale += self.normalize(0, &mut current)?;
                sink.on_frame(0, &current);
                std::mem::swap(&mut previous, &mut current);
                1
            }
            Initialization::UniformPredecessors => {
                previous.fill(one(domain));
                0
            }
        };

        let report_every = (num_frames / 10).max(1);
        for frame in first_frame..num_frames {
            let row = &mut pointers[frame * num_states..(frame + 1) * num_states];
            self.step(
                model,
                &densities,
                frame,
                &previous,
                &mut current,
                row,
                self.pool.as_deref(),
            );
            log_scale += self.normalize(frame, &mut current)?;
            sink.on_frame(frame, &current);
            std::mem::swap(&mut previous, &mut current);
            if (frame + 1) % report_every == 0 {
                sink.on_progress(ProgressEvent {
                    stage: ProgressStage::Forward,
                    progress: (frame + 1) as f32 / num_frames as f32,
                });
            }
        }

        // `previous` now holds the last frame.
        let mut best_state = 0usize;
        let mut best_value = previous[0];
        for (state, &value) in previous.iter().enumerate().skip(1) {
            if value > best_value {
                best_value = value;
                best_state = state;
            }
        }
        let log_probability = match domain {
            NumericDomain::Log => best_value,
            NumericDomain::Linear => log_scale + best_value.ln(),
        };

        sink.on_progress(ProgressEvent {
            stage: ProgressStage::Backtrack,
            progress: 0.0,
        });
        let path = backtrack(
            &pointers,
            num_states,
            num_frames,
            best_state,
            &model.initialization,
        );
        sink.on_progress(ProgressEvent {
            stage: ProgressStage::Backtrack,
            progress: 1.0,
        });
        log::debug!(
            "viterbi: best final state {} with log-probability {}",
            best_state,
            log_probability
        );

        Ok(Decoded {
            path,
            log_probability,
        })
    }

    /// One frame of the recurrence. States are independent of each other, so
    /// they are fanned out over the pool; each state's candidate reduction
    /// stays sequential and ordered.
    #[allow(clippy::too_many_arguments)]
    fn step<T, O>(
        &self,
        model: &HiddenModel<T, O>,
        densities: &Densities,
        frame: usize,
        previous: &[f64],
        current: &mut [f64],
        pointers: &mut [StateIndex],
        pool: Option<&ThreadPool>,
    ) where
        T: TransitionModel,
        O: ObservationModel,
    {
        let domain = self.config.domain;
        let row = densities
            .values
            .row(if densities.per_frame { frame } else { 0 });
        let transitions = &model.transitions;
        let observations = &model.observations;

        let update = |(state, (value, pointer)): (usize, (&mut f64, &mut StateIndex))| {
            let density = row[observations.pointer(state)];
            let mut best = zero(domain);
            let mut best_prev = 0usize;
            let mut seen = false;
            transitions.for_each_candidate(state, domain, |c| {
                let score = match domain {
                    NumericDomain::Log => {
                        previous[c.from] + c.weight + c.norm_factor + density
                    }
                    NumericDomain::Linear => {
                        previous[c.from] * c.weight * c.norm_factor * density
                    }
                };
                // strictly greater: the earliest candidate keeps exact ties
                if !seen || score > best {
                    best = score;
                    best_prev = c.from;
                    seen = true;
                }
            });
            *value = best;
            *pointer = best_prev as StateIndex;
        };

        match (pool, self.config.num_workers) {
            (Some(pool), _) => pool.install(|| {
                current
                    .par_iter_mut()
                    .zip(pointers.par_iter_mut())
                    .enumerate()
                    .for_each(&update)
            }),
            (None, 1) => current
                .iter_mut()
                .zip(pointers.iter_mut())
                .enumerate()
                .for_each(&update),
            (None, _) => current
                .par_iter_mut()
                .zip(pointers.par_iter_mut())
                .enumerate()
                .for_each(&update),
        }
    }

    /// Rescale one frame in place, returning the log of the removed scale.
    /// Reductions run sequentially in state order so results do not depend
    /// on the worker count.
    fn normalize(&self, frame: usize, values: &mut [f64]) -> Result<f64, RhythmError> {
        match (self.config.domain, self.config.normalization) {
            (NumericDomain::Log, _) => {
                let max = frame_max(values);
                if max.is_nan() || max == f64::NEG_INFINITY {
                    return Err(degenerate(frame, "every state has zero probability"));
                }
                Ok(0.0)
            }
            (NumericDomain::Linear, Normalization::None) => {
                let max = frame_max(values);
                check_scale(frame, max, "maximum")?;
                Ok(0.0)
            }
            (NumericDomain::Linear, Normalization::L1) => {
                let sum: f64 = values.iter().sum();
                check_scale(frame, sum, "sum")?;
                values.iter_mut().for_each(|v| *v /= sum);
                Ok(sum.ln())
            }
            (NumericDomain::Linear, Normalization::Max) => {
                let max = frame_max(values);
                check_scale(frame, max, "maximum")?;
                values.iter_mut().for_each(|v| *v /= max);
                Ok(max.ln())
            }
        }
    }

}

fn thread_pool(num_workers: usize) -> Result<Option<Arc<ThreadPool>>, RhythmError> {
    if num_workers <= 1 {
        return Ok(None);
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_workers)
        .build()
        .map(|pool| Some(Arc::new(pool)))
        .map_err(|e| RhythmError::Configuration(e.to_string()))
}

fn backtrack(
    pointers: &[StateIndex],
    num_states: usize,
    num_frames: usize,
    best_state: usize,
    initialization: &Initialization,
) -> Vec<usize> {
    let mut path = vec![0usize; num_frames];
    let mut state = best_state;
    match initialization {
        Initialization::Prior(_) => {
            path[num_frames - 1] = state;
            for frame in (0..num_frames - 1).rev() {
                state = pointers[(frame + 1) * num_states + state] as usize;
                path[frame] = state;
            }
        }
        Initialization::UniformPredecessors => {
            for frame in (0..num_frames).rev() {
                path[frame] = state;
                state = pointers[frame * num_states + state] as usize;
            }
        }
    }
    path
}

#[inline]
fn zero(domain: NumericDomain) -> f64 {
    match domain {
        NumericDomain::Log => f64::NEG_INFINITY,
        NumericDomain::Linear => 0.0,
    }
}

#[inline]
fn one(domain: NumericDomain) -> f64 {
    match domain {
        NumericDomain::Log => 0.0,
        NumericDomain::Linear => 1.0,
    }
}

/// NaN if any value is NaN.
fn frame_max(values: &[f64]) -> f64 {
    let mut max = f64::NEG_INFINITY;
    for &v in values {
        if v.is_nan() {
            return f64::NAN;
        }
        if v > max {
            max = v;
        }
    }
    max
}

fn check_scale(frame: usize, scale: f64, what: &str) -> Result<(), RhythmError> {
    if scale.is_finite() && scale > 0.0 {
        Ok(())
    } else {
        Err(degenerate(frame, &format!("frame {} is {}", what, scale)))
    }
}

fn degenerate(frame: usize, reason: &str) -> RhythmError {
    RhythmError::NumericalDegeneracy {
        frame,
        reason: reason.to_string(),
    }
}
