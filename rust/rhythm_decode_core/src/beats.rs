use crate::observation::BeatPhaseObservations;
use crate::state_space::CompositeStateSpace;
use crate::RhythmError;

/// Project composite states onto their beat phase.
pub fn beat_phases(space: &CompositeStateSpace, path: &[usize]) -> Vec<usize> {
    path.iter().map(|&state| space.beat_phase(state)).collect()
}

/// One beat per contiguous beat-region run, at the run's strongest
/// activation (first frame on ties).
pub fn corrected_beats(
    phases: &[usize],
    activations: &[f32],
    observations: &BeatPhaseObservations,
) -> Result<Vec<usize>, RhythmError> {
    if phases.len() != activations.len() {
        return Err(RhythmError::InvalidInput(format!(
            "{} beat phases for {} activations",
            phases.len(),
            activations.len()
        )));
    }
    let beat_range: Vec<bool> = phases
        .iter()
        .map(|&phase| observations.in_beat_region(phase))
        .collect();
    if !beat_range.iter().any(|v| *v) {
        return Ok(Vec::new());
    }

    // run borders as half-open [left, right) pairs
    let mut idx = Vec::new();
    if beat_range[0] {
        idx.push(0);
    }
    for i in 1..beat_range.len() {
        if beat_range[i] != beat_range[i - 1] {
            idx.push(i);
        }
    }
    if beat_range[beat_range.len() - 1] {
        idx.push(beat_range.len());
    }

    let mut beats = Vec::with_capacity(idx.len() / 2);
    for pair in idx.chunks_exact(2) {
        let (left, right) = (pair[0], pair[1]);
        let mut best_idx = left;
        let mut best_val = f32::NEG_INFINITY;
        for (i, &act) in activations.iter().enumerate().take(right).skip(left) {
            if act > best_val {
                best_val = act;
                best_idx = i;
            }
        }
        beats.push(best_idx);
    }
    Ok(beats)
}

/// Strict local minima of the phase path, comparing the first and last
/// frames as neighbours, that lie in the beat region.
pub fn uncorrected_beats(phases: &[usize], observations: &BeatPhaseObservations) -> Vec<usize> {
    let n = phases.len();
    (0..n)
        .filter(|&i| {
            let prev = phases[(i + n - 1) % n];
            let next = phases[(i + 1) % n];
            phases[i] < prev && phases[i] < next
        })
        .filter(|&i| observations.in_beat_region(phases[i]))
        .collect()
}

/// Beat frames of a windowed path. Paths never move backwards, so this
/// only collapses repeated positions.
pub fn path_beats(path: &[usize]) -> Vec<usize> {
    let mut beats = path.to_vec();
    beats.dedup();
    beats
}
