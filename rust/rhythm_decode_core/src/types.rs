use serde::{Deserialize, Serialize};

/// Optimal state path of one decode call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decoded {
    /// One state index per decoded frame.
    pub path: Vec<usize>,
    /// Total log-probability of `path`.
    pub log_probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeatTrack {
    /// Beat frame indices, strictly increasing.
    pub beats: Vec<usize>,
    /// Decoded state path; `None` when there was nothing to decode.
    pub decoded: Option<Decoded>,
}

impl BeatTrack {
    pub(crate) fn empty() -> Self {
        Self {
            beats: Vec::new(),
            decoded: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStage {
    Forward = 0,
    Backtrack = 1,
    Beats = 2,
}

#[derive(Debug, Clone, Copy)]
pub struct ProgressEvent {
    pub stage: ProgressStage,
    pub progress: f32,
}

pub trait ProgressSink {
    fn on_progress(&mut self, event: ProgressEvent);

    /// Called once per frame with the frame's vector after normalization.
    fn on_frame(&mut self, _frame: usize, _probabilities: &[f64]) {}
}

impl<F> ProgressSink for F
where
    F: FnMut(ProgressEvent),
{
    fn on_progress(&mut self, event: ProgressEvent) {
        self(event);
    }
}
