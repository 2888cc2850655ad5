use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericDomain {
    /// Sum log-weights; no rescaling is possible or needed.
    Log,
    /// Multiply linear weights; pair with a normalization for long inputs.
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    None,
    /// Divide each frame by its sum.
    L1,
    /// Divide each frame by its maximum.
    Max,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub domain: NumericDomain,
    pub normalization: Normalization,
    /// 0 uses the global rayon pool, 1 decodes on the calling thread.
    pub num_workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            domain: NumericDomain::Linear,
            normalization: Normalization::L1,
            num_workers: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DbnConfig {
    pub num_beat_states: usize,
    /// Explicit tempo states (beat-phase steps per frame). Derived from the
    /// BPM range when absent.
    pub tempo_states: Option<Vec<usize>>,
    pub min_bpm: f32,
    pub max_bpm: f32,
    pub fps: f32,
    pub tempo_change_probability: f64,
    pub observation_lambda: usize,
    pub correct: bool,
    pub norm_observations: bool,
}

impl Default for DbnConfig {
    fn default() -> Self {
        Self {
            num_beat_states: 640,
            tempo_states: None,
            min_bpm: 55.0,
            max_bpm: 205.0,
            fps: 100.0,
            tempo_change_probability: 0.002,
            observation_lambda: 16,
            correct: true,
            norm_observations: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrfConfig {
    /// Width of the log2-interval distribution between beats.
    pub interval_sigma: f64,
    /// Multiples of the dominant interval evaluated by `detect_beats`.
    pub interval_factors: Vec<f64>,
}

impl Default for CrfConfig {
    fn default() -> Self {
        Self {
            interval_sigma: 0.18,
            interval_factors: vec![0.5, 0.67, 1.0, 1.5, 2.0],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct DecoderConfig {
    pub engine: EngineConfig,
    pub dbn: DbnConfig,
    pub crf: CrfConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigValidationIssue {
    pub path: String,
    pub message: String,
}

impl ConfigValidationIssue {
    fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

pub fn validate_decoder_config(config: &DecoderConfig) -> Result<(), ConfigValidationIssue> {
    validate_engine_config(&config.engine)?;
    validate_dbn_config(&config.dbn)?;
    validate_crf_config(&config.crf)
}

pub(crate) fn validate_engine_config(engine: &EngineConfig) -> Result<(), ConfigValidationIssue> {
    if engine.domain == NumericDomain::Log && engine.normalization != Normalization::None {
        return Err(ConfigValidationIssue::new(
            "engine.normalization",
            "log domain requires normalization \"none\"",
        ));
    }
    Ok(())
}

pub(crate) fn validate_dbn_config(dbn: &DbnConfig) -> Result<(), ConfigValidationIssue> {
    if dbn.num_beat_states == 0 {
        return Err(ConfigValidationIssue::new(
            "dbn.num_beat_states",
            "must be > 0",
        ));
    }
    match &dbn.tempo_states {
        Some(tempi) => {
            if tempi.is_empty() {
                return Err(ConfigValidationIssue::new(
                    "dbn.tempo_states",
                    "must contain at least one tempo",
                ));
            }
            if tempi.contains(&0) {
                return Err(ConfigValidationIssue::new(
                    "dbn.tempo_states",
                    "all values must be > 0",
                ));
            }
            if tempi.windows(2).any(|w| w[0] >= w[1]) {
                return Err(ConfigValidationIssue::new(
                    "dbn.tempo_states",
                    "values must be strictly increasing",
                ));
            }
        }
        None => {
            if !dbn.fps.is_finite() || dbn.fps <= 0.0 {
                return Err(ConfigValidationIssue::new("dbn.fps", "must be > 0"));
            }
            if !dbn.min_bpm.is_finite() || dbn.min_bpm <= 0.0 {
                return Err(ConfigValidationIssue::new("dbn.min_bpm", "must be > 0"));
            }
            if !dbn.max_bpm.is_finite() || dbn.max_bpm < dbn.min_bpm {
                return Err(ConfigValidationIssue::new(
                    "dbn.max_bpm",
                    "must be >= dbn.min_bpm",
                ));
            }
        }
    }
    if !dbn.tempo_change_probability.is_finite()
        || !(0.0..1.0).contains(&dbn.tempo_change_probability)
    {
        return Err(ConfigValidationIssue::new(
            "dbn.tempo_change_probability",
            "must be in [0, 1)",
        ));
    }
    if dbn.observation_lambda < 2 {
        return Err(ConfigValidationIssue::new(
            "dbn.observation_lambda",
            "must be >= 2",
        ));
    }
    Ok(())
}

pub(crate) fn validate_crf_config(crf: &CrfConfig) -> Result<(), ConfigValidationIssue> {
    if !crf.interval_sigma.is_finite() || crf.interval_sigma <= 0.0 {
        return Err(ConfigValidationIssue::new(
            "crf.interval_sigma",
            "must be > 0",
        ));
    }
    if crf.interval_factors.is_empty() {
        return Err(ConfigValidationIssue::new(
            "crf.interval_factors",
            "must contain at least one factor",
        ));
    }
    if crf
        .interval_factors
        .iter()
        .any(|f| !f.is_finite() || *f <= 0.0)
    {
        return Err(ConfigValidationIssue::new(
            "crf.interval_factors",
            "all values must be > 0",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = DecoderConfig::default();
        assert!(validate_decoder_config(&config).is_ok());
    }

    #[test]
    fn validation_reports_field_path() {
        let mut config = DecoderConfig::default();
        config.dbn.observation_lambda = 1;

        let issue = validate_decoder_config(&config).expect_err("expected invalid config");
        assert_eq!(issue.path, "dbn.observation_lambda");
    }

    #[test]
    fn log_domain_rejects_rescaling() {
        let mut config = DecoderConfig::default();
        config.engine.domain = NumericDomain::Log;
        config.engine.normalization = Normalization::Max;

        let issue = validate_decoder_config(&config).expect_err("expected invalid config");
        assert_eq!(issue.path, "engine.normalization");

        config.engine.normalization = Normalization::None;
        assert!(validate_decoder_config(&config).is_ok());
    }

    #[test]
    fn tempo_states_must_be_ordered() {
        let mut config = DecoderConfig::default();
        config.dbn.tempo_states = Some(vec![4, 3]);

        let issue = validate_decoder_config(&config).expect_err("expected invalid config");
        assert_eq!(issue.path, "dbn.tempo_states");
    }

    #[test]
    fn tempo_change_probability_excludes_one() {
        let mut config = DecoderConfig::default();
        config.dbn.tempo_change_probability = 1.0;

        let issue = validate_decoder_config(&config).expect_err("expected invalid config");
        assert_eq!(issue.path, "dbn.tempo_change_probability");
    }

    #[test]
    fn config_deserialize_rejects_unknown_fields() {
        let json = r#"
        {
          "engine": { "domain": "log", "normalization": "none", "num_workers": 2 },
          "dbn": {
            "num_beat_states": 640,
            "min_bpm": 55.0,
            "max_bpm": 205.0,
            "fps": 100.0,
            "tempo_change_probability": 0.002,
            "observation_lambda": 16,
            "correct": true,
            "norm_observations": false,
            "unknown_dbn_field": 1
          },
          "crf": { "interval_sigma": 0.18, "interval_factors": [1.0] }
        }
        "#;
        assert!(serde_json::from_str::<DecoderConfig>(json).is_err());
    }

    #[test]
    fn config_deserialize_defaults_missing_tempo_states() {
        let json = r#"
        {
          "engine": { "domain": "linear", "normalization": "max", "num_workers": 1 },
          "dbn": {
            "num_beat_states": 320,
            "min_bpm": 60.0,
            "max_bpm": 180.0,
            "fps": 100.0,
            "tempo_change_probability": 0.01,
            "observation_lambda": 8,
            "correct": false,
            "norm_observations": true
          },
          "crf": { "interval_sigma": 0.2, "interval_factors": [0.5, 1.0, 2.0] }
        }
        "#;
        let config: DecoderConfig = serde_json::from_str(json).expect("valid config json");
        assert_eq!(config.engine.normalization, Normalization::Max);
        assert!(config.dbn.tempo_states.is_none());
        assert!(validate_decoder_config(&config).is_ok());
    }
}
