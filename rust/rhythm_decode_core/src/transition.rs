use crate::state_space::CompositeStateSpace;
use crate::{NumericDomain, RhythmError};

/// One predecessor of a state, with values expressed in the requested domain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub from: usize,
    pub weight: f64,
    /// 1 (or 0 in the log domain) unless the model carries normalization
    /// factors.
    pub norm_factor: f64,
}

/// Enumerates ordered candidate predecessors per state.
///
/// Visit order is part of the contract: the engine keeps the first candidate
/// among exactly tied scores.
pub trait TransitionModel: Sync {
    fn num_states(&self) -> usize;

    fn for_each_candidate<F: FnMut(Candidate)>(
        &self,
        state: usize,
        domain: NumericDomain,
        visit: F,
    );
}

/// Linear values with their logs precomputed.
#[derive(Debug, Clone)]
struct DomainValues {
    linear: Vec<f64>,
    log: Vec<f64>,
}

impl DomainValues {
    fn new(linear: Vec<f64>) -> Self {
        let log = linear.iter().map(|v| log_or_neg_inf(*v)).collect();
        Self { linear, log }
    }

    fn len(&self) -> usize {
        self.linear.len()
    }

    #[inline]
    fn get(&self, domain: NumericDomain, idx: usize) -> f64 {
        match domain {
            NumericDomain::Linear => self.linear[idx],
            NumericDomain::Log => self.log[idx],
        }
    }
}

#[inline]
fn unit(domain: NumericDomain) -> f64 {
    match domain {
        NumericDomain::Linear => 1.0,
        NumericDomain::Log => 0.0,
    }
}

pub(crate) fn log_or_neg_inf(v: f64) -> f64 {
    if v <= 0.0 {
        f64::NEG_INFINITY
    } else {
        v.ln()
    }
}

fn check_weights(name: &str, values: &[f64]) -> Result<(), RhythmError> {
    if let Some(bad) = values.iter().find(|v| !v.is_finite() || **v < 0.0) {
        return Err(RhythmError::InvalidInput(format!(
            "{} must be finite and >= 0; got {}",
            name, bad
        )));
    }
    Ok(())
}

/// Lookback window over a flat lattice: state `i` is reached from `i - j`
/// for `j < min(i, transition_weights.len())`.
#[derive(Debug, Clone)]
pub struct WindowedTransitions {
    num_states: usize,
    weights: DomainValues,
    norm_factor: Option<DomainValues>,
}

impl WindowedTransitions {
    pub fn new(
        num_states: usize,
        transition_weights: Vec<f64>,
        norm_factor: Option<Vec<f64>>,
    ) -> Result<Self, RhythmError> {
        if transition_weights.is_empty() {
            return Err(RhythmError::InvalidInput(
                "transition weights must not be empty".to_string(),
            ));
        }
        check_weights("transition weights", &transition_weights)?;
        if let Some(norm) = &norm_factor {
            if norm.len() != num_states {
                return Err(RhythmError::InvalidInput(format!(
                    "norm factor length {} does not match {} states",
                    norm.len(),
                    num_states
                )));
            }
            check_weights("norm factors", norm)?;
        }
        Ok(Self {
            num_states,
            weights: DomainValues::new(transition_weights),
            norm_factor: norm_factor.map(DomainValues::new),
        })
    }

    pub fn num_transition_weights(&self) -> usize {
        self.weights.len()
    }
}

impl TransitionModel for WindowedTransitions {
    fn num_states(&self) -> usize {
        self.num_states
    }

    #[inline]
    fn for_each_candidate<F: FnMut(Candidate)>(
        &self,
        state: usize,
        domain: NumericDomain,
        mut visit: F,
    ) {
        for offset in 0..state.min(self.weights.len()) {
            let from = state - offset;
            let norm_factor = match &self.norm_factor {
                Some(norm) => norm.get(domain, from),
                None => unit(domain),
            };
            visit(Candidate {
                from,
                weight: self.weights.get(domain, offset),
                norm_factor,
            });
        }
    }
}

/// Same tempo, then one tempo slower, then one tempo faster.
#[derive(Debug, Clone)]
pub struct TempoTransitions {
    num_beat_states: usize,
    tempo_states: Vec<usize>,
    /// `[stay, change]` with `change` being half the tempo change probability.
    weights: DomainValues,
}

impl TempoTransitions {
    pub fn new(
        space: &CompositeStateSpace,
        tempo_change_probability: f64,
    ) -> Result<Self, RhythmError> {
        if !tempo_change_probability.is_finite()
            || !(0.0..1.0).contains(&tempo_change_probability)
        {
            return Err(RhythmError::Configuration(format!(
                "tempo change probability must be in [0, 1); got {}",
                tempo_change_probability
            )));
        }
        Ok(Self {
            num_beat_states: space.num_beat_states,
            tempo_states: space.tempo_states.clone(),
            weights: DomainValues::new(vec![
                1.0 - tempo_change_probability,
                0.5 * tempo_change_probability,
            ]),
        })
    }

    #[inline]
    fn predecessor(&self, tempo_index: usize, beat_phase: usize) -> usize {
        let n = self.num_beat_states;
        let tempo = self.tempo_states[tempo_index] % n;
        tempo_index * n + (beat_phase + n - tempo) % n
    }
}

impl TransitionModel for TempoTransitions {
    fn num_states(&self) -> usize {
        self.num_beat_states * self.tempo_states.len()
    }

    #[inline]
    fn for_each_candidate<F: FnMut(Candidate)>(
        &self,
        state: usize,
        domain: NumericDomain,
        mut visit: F,
    ) {
        let beat_phase = state % self.num_beat_states;
        let tempo_index = state / self.num_beat_states;
        let norm_factor = unit(domain);
        visit(Candidate {
            from: self.predecessor(tempo_index, beat_phase),
            weight: self.weights.get(domain, 0),
            norm_factor,
        });
        if tempo_index > 0 {
            visit(Candidate {
                from: self.predecessor(tempo_index - 1, beat_phase),
                weight: self.weights.get(domain, 1),
                norm_factor,
            });
        }
        if tempo_index + 1 < self.tempo_states.len() {
            visit(Candidate {
                from: self.predecessor(tempo_index + 1, beat_phase),
                weight: self.weights.get(domain, 1),
                norm_factor,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect<T: TransitionModel>(
        tm: &T,
        state: usize,
        domain: NumericDomain,
    ) -> Vec<Candidate> {
        let mut out = Vec::new();
        tm.for_each_candidate(state, domain, |c| out.push(c));
        out
    }

    #[test]
    fn tempo_candidates_follow_fixed_order() {
        let space = CompositeStateSpace::new(10, vec![1, 2, 3]).expect("valid space");
        let tm = TempoTransitions::new(&space, 0.2).expect("valid model");

        // tempo index 1 (tempo 2), phase 1
        let state = space.state(1, 1);
        let cands = collect(&tm, state, NumericDomain::Linear);
        let froms: Vec<usize> = cands.iter().map(|c| c.from).collect();
        assert_eq!(
            froms,
            vec![space.state(1, 9), space.state(0, 0), space.state(2, 8)]
        );
        assert!((cands[0].weight - 0.8).abs() < 1e-12);
        assert!((cands[1].weight - 0.1).abs() < 1e-12);
        assert!((cands[2].weight - 0.1).abs() < 1e-12);
        assert!(cands.iter().all(|c| c.norm_factor == 1.0));
    }

    #[test]
    fn tempo_candidates_skip_missing_neighbours() {
        let space = CompositeStateSpace::new(4, vec![1, 2]).expect("valid space");
        let tm = TempoTransitions::new(&space, 0.0).expect("valid model");

        let slowest = collect(&tm, space.state(0, 0), NumericDomain::Log);
        assert_eq!(slowest.len(), 2);
        assert_eq!(slowest[0].from, space.state(0, 3));
        assert_eq!(slowest[0].weight, 0.0);
        assert_eq!(slowest[1].from, space.state(1, 2));
        assert_eq!(slowest[1].weight, f64::NEG_INFINITY);

        let fastest = collect(&tm, space.state(1, 0), NumericDomain::Log);
        assert_eq!(fastest.len(), 2);
        assert_eq!(fastest[1].from, space.state(0, 3));
    }

    #[test]
    fn windowed_candidates_look_back_and_stop_at_zero() {
        let norm = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let tm =
            WindowedTransitions::new(6, vec![0.1, 0.6, 0.3], Some(norm)).expect("valid model");

        assert!(collect(&tm, 0, NumericDomain::Linear).is_empty());

        let one = collect(&tm, 1, NumericDomain::Linear);
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].from, 1);

        let four = collect(&tm, 4, NumericDomain::Linear);
        let froms: Vec<usize> = four.iter().map(|c| c.from).collect();
        assert_eq!(froms, vec![4, 3, 2]);
        assert_eq!(four[1].weight, 0.6);
        assert_eq!(four[1].norm_factor, 4.0);

        let logs = collect(&tm, 4, NumericDomain::Log);
        assert!((logs[2].norm_factor - 3.0f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn windowed_rejects_misaligned_norm_factor() {
        let err = WindowedTransitions::new(6, vec![0.5, 0.5], Some(vec![1.0; 5]))
            .expect_err("length mismatch");
        assert!(matches!(err, RhythmError::InvalidInput(_)));
    }
}
