use crate::beats::path_beats;
use crate::config::{validate_crf_config, validate_engine_config};
use crate::observation::WindowedObservations;
use crate::state_space::WindowedStateSpace;
use crate::transition::WindowedTransitions;
use crate::types::{BeatTrack, ProgressSink};
use crate::viterbi::{HiddenModel, Initialization, ViterbiEngine};
use crate::{with_progress, DecoderConfig, EngineConfig, RhythmError};

/// Offset 0 would put the log2 interval at -inf.
const ZERO_OFFSET: f64 = 1e-6;

pub type WindowedModel = HiddenModel<WindowedTransitions, WindowedObservations>;

/// Parameters of the windowed model for one activation sequence.
///
/// States are positions in the (flattened) activation sequence; the model is
/// decoded `len / tau` times, once per beat.
#[derive(Debug, Clone)]
pub struct WindowedParams {
    pub pi: Vec<f64>,
    /// Weight of moving `j` positions forward, for `j` in `0..len`.
    pub transition_weights: Vec<f64>,
    /// Per-predecessor factor, aligned with the activations.
    pub norm_factor: Option<Vec<f64>>,
    pub tau: usize,
}

impl WindowedParams {
    /// Model for a fixed beat interval: the first beat falls in the first
    /// interval, and consecutive beats are about `interval` frames apart
    /// with a log-normal spread of `sigma` octaves.
    pub fn from_interval(
        activations: &[f32],
        interval: usize,
        sigma: f64,
    ) -> Result<Self, RhythmError> {
        if interval == 0 {
            return Err(RhythmError::InvalidInput("interval must be > 0".to_string()));
        }
        if !sigma.is_finite() || sigma <= 0.0 {
            return Err(RhythmError::InvalidInput(format!(
                "interval sigma must be > 0; got {}",
                sigma
            )));
        }
        let pi = initial_distribution(activations.len(), interval);
        let transition_weights = transition_distribution(interval, sigma);
        let norm_factor = normalisation_factors(activations, &transition_weights);
        Ok(Self {
            pi,
            transition_weights,
            norm_factor: Some(norm_factor),
            tau: interval,
        })
    }

    pub fn model(&self) -> Result<(WindowedStateSpace, WindowedModel), RhythmError> {
        let space = WindowedStateSpace::new(self.pi.len(), self.tau)?;
        let tm = WindowedTransitions::new(
            space.num_states,
            self.transition_weights.clone(),
            self.norm_factor.clone(),
        )?;
        let om = WindowedObservations::new(&space);
        let hmm = HiddenModel::new(tm, om, Initialization::Prior(self.pi.clone()))?;
        Ok((space, hmm))
    }
}

fn initial_distribution(num_states: usize, interval: usize) -> Vec<f64> {
    let p = 1.0 / interval as f64;
    (0..num_states)
        .map(|s| if s < interval { p } else { 0.0 })
        .collect()
}

fn transition_distribution(interval: usize, sigma: f64) -> Vec<f64> {
    let mu = (interval as f64).log2();
    let scale = 1.0 / (sigma * (2.0 * std::f64::consts::PI).sqrt());
    let mut weights: Vec<f64> = (0..2 * interval)
        .map(|offset| {
            let x = if offset == 0 {
                ZERO_OFFSET
            } else {
                offset as f64
            };
            let z = (x.log2() - mu) / sigma;
            scale * (-0.5 * z * z).exp()
        })
        .collect();
    let total: f64 = weights.iter().sum();
    if total > 0.0 {
        weights.iter_mut().for_each(|w| *w /= total);
    }
    weights
}

/// `1 / Σ_j w[j] * activation[p + j]`, or 0 where nothing is reachable.
fn normalisation_factors(activations: &[f32], weights: &[f64]) -> Vec<f64> {
    (0..activations.len())
        .map(|p| {
            let sum: f64 = weights
                .iter()
                .zip(activations[p..].iter())
                .map(|(w, &a)| w * a as f64)
                .sum();
            if sum > 0.0 {
                1.0 / sum
            } else {
                0.0
            }
        })
        .collect()
}

/// Most likely beat positions assuming beats about `interval` frames apart.
///
/// Only the first `len - len % interval` activations are decoded.
pub fn best_sequence(
    activations: &[f32],
    interval: usize,
    interval_sigma: f64,
    engine: &EngineConfig,
) -> Result<BeatTrack, RhythmError> {
    best_sequence_with_progress(activations, interval, interval_sigma, engine, None)
}

pub fn best_sequence_with_progress(
    activations: &[f32],
    interval: usize,
    interval_sigma: f64,
    engine: &EngineConfig,
    progress: Option<&mut dyn ProgressSink>,
) -> Result<BeatTrack, RhythmError> {
    let engine = ViterbiEngine::new(engine.clone())?;
    decode_interval(activations, interval, interval_sigma, &engine, progress)
}

fn decode_interval(
    activations: &[f32],
    interval: usize,
    interval_sigma: f64,
    engine: &ViterbiEngine,
    progress: Option<&mut dyn ProgressSink>,
) -> Result<BeatTrack, RhythmError> {
    if interval == 0 {
        return Err(RhythmError::InvalidInput("interval must be > 0".to_string()));
    }
    let usable = activations.len() - activations.len() % interval;
    if usable < activations.len() {
        log::debug!(
            "crf: interval {} leaves {} trailing activations undecoded",
            interval,
            activations.len() - usable
        );
    }
    let activations = &activations[..usable];
    let params = WindowedParams::from_interval(activations, interval, interval_sigma)?;
    let (_, model) = params.model()?;
    let decoded = engine.decode_with_progress(&model, activations, progress)?;
    Ok(BeatTrack {
        beats: path_beats(&decoded.path),
        decoded: Some(decoded),
    })
}

/// Try the dominant interval scaled by each configured factor and keep the
/// sequence with the best log-probability per beat.
///
/// Intervals whose decode degenerates are skipped; the error is returned
/// only when no interval can be decoded.
pub fn detect_beats(
    activations: &[f32],
    dominant_interval: usize,
    config: &DecoderConfig,
) -> Result<BeatTrack, RhythmError> {
    detect_beats_with_progress(activations, dominant_interval, config, None)
}

pub fn detect_beats_with_progress(
    activations: &[f32],
    dominant_interval: usize,
    config: &DecoderConfig,
    progress: Option<&mut dyn ProgressSink>,
) -> Result<BeatTrack, RhythmError> {
    if let Err(issue) = validate_engine_config(&config.engine) {
        return Err(RhythmError::Configuration(format!("config {}", issue)));
    }
    if let Err(issue) = validate_crf_config(&config.crf) {
        return Err(RhythmError::Configuration(format!("config {}", issue)));
    }
    if activations.is_empty() {
        return Ok(BeatTrack::empty());
    }

    let intervals: Vec<usize> = config
        .crf
        .interval_factors
        .iter()
        .map(|f| (dominant_interval as f64 * f) as usize)
        .filter(|&i| i >= 1 && i <= activations.len())
        .collect();
    if intervals.is_empty() {
        log::debug!(
            "crf: no usable interval around {} for {} activations",
            dominant_interval,
            activations.len()
        );
        return Ok(BeatTrack::empty());
    }

    let engine = ViterbiEngine::new(config.engine.clone())?;
    with_progress(progress, |sink| {
        let mut best: Option<(f64, BeatTrack)> = None;
        let mut last_error = None;
        for &interval in &intervals {
            let track = match decode_interval(
                activations,
                interval,
                config.crf.interval_sigma,
                &engine,
                Some(&mut *sink),
            ) {
                Ok(track) => track,
                // no path at this interval explains every peak
                Err(err @ RhythmError::NumericalDegeneracy { .. }) => {
                    log::debug!("crf: skipping interval {}: {}", interval, err);
                    last_error = Some(err);
                    continue;
                }
                Err(err) => return Err(err),
            };
            let score = match &track.decoded {
                Some(decoded) => decoded.log_probability / decoded.path.len() as f64,
                None => f64::NEG_INFINITY,
            };
            log::debug!(
                "crf: interval {} -> {} beats, {} per beat",
                interval,
                track.beats.len(),
                score
            );
            let better = match &best {
                Some((best_score, _)) => score > *best_score,
                None => true,
            };
            if better {
                best = Some((score, track));
            }
        }
        match (best, last_error) {
            (Some((_, track)), _) => Ok(track),
            (None, Some(err)) => Err(err),
            (None, None) => Ok(BeatTrack::empty()),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Normalization, NumericDomain};

    fn pulse(len: usize, period: usize, offset: usize, baseline: f32) -> Vec<f32> {
        (0..len)
            .map(|i| if i % period == offset { 0.9 } else { baseline })
            .collect()
    }

    #[test]
    fn initial_distribution_covers_first_interval() {
        let pi = initial_distribution(8, 4);
        assert_eq!(pi, vec![0.25, 0.25, 0.25, 0.25, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn transition_distribution_peaks_at_interval() {
        let weights = transition_distribution(5, 0.18);
        assert_eq!(weights.len(), 10);
        assert!((weights.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        let peak = weights
            .iter()
            .enumerate()
            .fold((0, f64::MIN), |acc, (i, &w)| if w > acc.1 { (i, w) } else { acc });
        assert_eq!(peak.0, 5);
        assert!(weights[0] < 1e-12);
    }

    #[test]
    fn normalisation_factors_invert_reachable_mass() {
        let weights = [0.5, 0.5];
        let factors = normalisation_factors(&[0.2, 0.6, 0.0], &weights);
        assert!((factors[0] - 1.0 / 0.4).abs() < 1e-6);
        assert!((factors[1] - 1.0 / 0.3).abs() < 1e-6);
        assert_eq!(factors[2], 0.0);
    }

    #[test]
    fn best_sequence_follows_pulse_train() {
        let acts = pulse(40, 8, 3, 0.05);
        let track =
            best_sequence(&acts, 8, 0.18, &EngineConfig::default()).expect("valid input");
        assert_eq!(track.beats, vec![3, 11, 19, 27, 35]);
        let decoded = track.decoded.expect("decoded path");
        assert_eq!(decoded.path.len(), 5);
        assert!(decoded.log_probability.is_finite());
    }

    #[test]
    fn best_sequence_agrees_across_numeric_modes() {
        let acts = pulse(36, 6, 2, 0.05);
        let modes = [
            (NumericDomain::Log, Normalization::None),
            (NumericDomain::Linear, Normalization::L1),
            (NumericDomain::Linear, Normalization::Max),
            (NumericDomain::Linear, Normalization::None),
        ];
        let tracks: Vec<BeatTrack> = modes
            .iter()
            .map(|&(domain, normalization)| {
                let engine = EngineConfig {
                    domain,
                    normalization,
                    num_workers: 1,
                };
                best_sequence(&acts, 6, 0.18, &engine).expect("valid input")
            })
            .collect();
        let reference = tracks[0].decoded.as_ref().expect("decoded");
        for track in &tracks[1..] {
            assert_eq!(track.beats, tracks[0].beats);
            let decoded = track.decoded.as_ref().expect("decoded");
            assert!((decoded.log_probability - reference.log_probability).abs() < 1e-6);
        }
    }

    #[test]
    fn trailing_activations_are_trimmed() {
        let acts = pulse(43, 8, 3, 0.05);
        let track =
            best_sequence(&acts, 8, 0.18, &EngineConfig::default()).expect("valid input");
        assert_eq!(track.decoded.expect("decoded").path.len(), 5);
        assert!(track.beats.iter().all(|&b| b < 40));
    }

    #[test]
    fn detect_beats_keeps_interval_matching_peaks() {
        // 5 and 6 frame intervals cannot reach every peak and are skipped
        let acts = pulse(60, 10, 4, 0.0);
        let track = detect_beats(&acts, 10, &DecoderConfig::default()).expect("valid input");
        assert_eq!(track.beats, vec![4, 14, 24, 34, 44, 54]);
        assert_eq!(track.decoded.expect("decoded").path.len(), 6);
    }

    #[test]
    fn detect_beats_reports_degeneracy_when_no_interval_fits() {
        let mut config = DecoderConfig::default();
        config.crf.interval_factors = vec![0.5];
        let acts = pulse(60, 10, 4, 0.0);
        let err = detect_beats(&acts, 10, &config).expect_err("no usable interval");
        assert!(matches!(err, RhythmError::NumericalDegeneracy { .. }));
    }

    #[test]
    fn detect_beats_without_usable_interval_is_empty() {
        let track = detect_beats(&[0.5; 4], 10, &DecoderConfig::default()).expect("valid");
        assert!(track.beats.is_empty());
        assert!(track.decoded.is_none());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = best_sequence(&[0.5; 4], 0, 0.18, &EngineConfig::default())
            .expect_err("zero interval");
        assert!(matches!(err, RhythmError::InvalidInput(_)));
    }
}
