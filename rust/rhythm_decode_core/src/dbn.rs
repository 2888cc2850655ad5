use crate::beats::{beat_phases, corrected_beats, uncorrected_beats};
use crate::config::{validate_dbn_config, validate_engine_config};
use crate::observation::BeatPhaseObservations;
use crate::state_space::CompositeStateSpace;
use crate::transition::TempoTransitions;
use crate::types::{BeatTrack, ProgressEvent, ProgressSink, ProgressStage};
use crate::viterbi::{HiddenModel, Initialization, ViterbiEngine};
use crate::{with_progress, DbnConfig, DecoderConfig, RhythmError};
use std::borrow::Cow;

/// Beat-phase × tempo model together with the state space it indexes.
#[derive(Debug, Clone)]
pub struct CompositeModel {
    pub space: CompositeStateSpace,
    pub hmm: HiddenModel<TempoTransitions, BeatPhaseObservations>,
}

pub fn build_model(dbn: &DbnConfig) -> Result<CompositeModel, RhythmError> {
    let space = match &dbn.tempo_states {
        Some(tempi) => CompositeStateSpace::new(dbn.num_beat_states, tempi.clone())?,
        None => CompositeStateSpace::from_bpm_range(
            dbn.num_beat_states,
            dbn.min_bpm,
            dbn.max_bpm,
            dbn.fps,
        )?,
    };
    let tm = TempoTransitions::new(&space, dbn.tempo_change_probability)?;
    let om = BeatPhaseObservations::new(&space, dbn.observation_lambda)?;
    let hmm = HiddenModel::new(tm, om, Initialization::UniformPredecessors)?;
    log::debug!(
        "dbn model: {} beat states x {} tempi ({}..={})",
        space.num_beat_states,
        space.num_tempi(),
        space.tempo_states[0],
        space.tempo_states[space.num_tempi() - 1]
    );
    Ok(CompositeModel { space, hmm })
}

/// Decode beat frames from per-frame beat activations.
pub fn track_beats(activations: &[f32], config: &DecoderConfig) -> Result<BeatTrack, RhythmError> {
    track_beats_with_progress(activations, config, None)
}

pub fn track_beats_with_progress(
    activations: &[f32],
    config: &DecoderConfig,
    progress: Option<&mut dyn ProgressSink>,
) -> Result<BeatTrack, RhythmError> {
    if let Err(issue) = validate_engine_config(&config.engine) {
        return Err(RhythmError::Configuration(format!("config {}", issue)));
    }
    if let Err(issue) = validate_dbn_config(&config.dbn) {
        return Err(RhythmError::Configuration(format!("config {}", issue)));
    }
    if activations.is_empty() {
        return Ok(BeatTrack::empty());
    }

    let model = build_model(&config.dbn)?;
    let engine = ViterbiEngine::new(config.engine.clone())?;
    let observations = if config.dbn.norm_observations {
        normalize_observations(activations)
    } else {
        Cow::Borrowed(activations)
    };

    with_progress(progress, |sink| {
        let decoded = engine.decode_with_progress(&model.hmm, &observations, Some(&mut *sink))?;

        let phases = beat_phases(&model.space, &decoded.path);
        let om = &model.hmm.observations;
        let beats = if config.dbn.correct {
            corrected_beats(&phases, &observations, om)?
        } else {
            uncorrected_beats(&phases, om)
        };
        sink.on_progress(ProgressEvent {
            stage: ProgressStage::Beats,
            progress: 1.0,
        });
        log::debug!(
            "dbn: {} beats in {} frames (log-probability {})",
            beats.len(),
            activations.len(),
            decoded.log_probability
        );

        Ok(BeatTrack {
            beats,
            decoded: Some(decoded),
        })
    })
}

/// Scale activations so the strongest frame is 1. All-zero input is returned
/// unchanged.
fn normalize_observations(activations: &[f32]) -> Cow<'_, [f32]> {
    let max = activations.iter().copied().fold(0.0f32, f32::max);
    if max > 0.0 {
        Cow::Owned(activations.iter().map(|a| a / max).collect())
    } else {
        log::debug!("dbn: activations are all zero; skipping normalization");
        Cow::Borrowed(activations)
    }
}
