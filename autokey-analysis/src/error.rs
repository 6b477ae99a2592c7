//! Error types for key analysis

use thiserror::Error;

/// Per-tick analysis failures
///
/// These never escape `KeyDetector::detect_key`; they are logged and the tick
/// degrades to "no key".
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("window too short: {samples} samples, need {required}")]
    InsufficientData { samples: usize, required: usize },
    #[error("chroma has no energy")]
    DegenerateChroma,
    #[error("non-finite values in {0}")]
    NonFinite(&'static str),
}

/// Setup-time misconfiguration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("unsupported sample rate: {0} Hz")]
    InvalidSampleRate(u32),
    #[error("adaptive lock frames ({lock}) exceed unlock frames ({unlock}) for {band}")]
    AdaptiveFramesInverted {
        band: String,
        lock: usize,
        unlock: usize,
    },
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f32 },
    #[error("{0} history must hold at least one entry")]
    EmptyHistory(&'static str),
    #[error("profile weights must sum to 1.0, got {0}")]
    ProfileWeights(f32),
}
