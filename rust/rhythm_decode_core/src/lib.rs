//! Beat and tempo decoding from frame-wise beat activations.
//!
//! Two hidden models share one Viterbi engine:
//! - a composite beat-phase × tempo model (`dbn`), decoded frame by frame;
//! - a windowed model over flattened frame positions (`crf`), decoded beat by
//!   beat around a dominant interval.

mod beats;
mod config;
mod crf;
mod dbn;
mod io;
mod observation;
mod state_space;
mod transition;
mod types;
mod viterbi;

pub use beats::{beat_phases, corrected_beats, path_beats, uncorrected_beats};
pub use config::{
    validate_decoder_config, ConfigValidationIssue, CrfConfig, DbnConfig, DecoderConfig,
    EngineConfig, NumericDomain, Normalization,
};
pub use crf::{
    best_sequence, best_sequence_with_progress, detect_beats, detect_beats_with_progress,
    WindowedModel, WindowedParams,
};
pub use dbn::{build_model, track_beats, track_beats_with_progress, CompositeModel};
pub use io::{load_activations, ActivationFile};
pub use observation::{BeatPhaseObservations, Densities, ObservationModel, WindowedObservations};
pub use state_space::{CompositeStateSpace, StateIndex, WindowedStateSpace, MAX_STATES};
pub use transition::{Candidate, TempoTransitions, TransitionModel, WindowedTransitions};
pub use types::{BeatTrack, Decoded, ProgressEvent, ProgressSink, ProgressStage};
pub use viterbi::{HiddenModel, Initialization, ViterbiEngine};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RhythmError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("empty activation sequence")]
    EmptyActivations,
    #[error("numerical degeneracy at frame {frame}: {reason}")]
    NumericalDegeneracy { frame: usize, reason: String },
    #[error("io error: {0}")]
    Io(String),
}

struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn on_progress(&mut self, _event: ProgressEvent) {}
}

fn with_progress<R>(
    progress: Option<&mut dyn ProgressSink>,
    run: impl FnOnce(&mut dyn ProgressSink) -> R,
) -> R {
    let mut noop = NoopProgressSink;
    let sink: &mut dyn ProgressSink = match progress {
        Some(s) => s,
        None => &mut noop,
    };
    run(sink)
}
