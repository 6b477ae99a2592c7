//! Key analysis for AutoKey
//!
//! Provides chroma extraction, multi-profile key correlation, temporal
//! aggregation and the key-lock state machine behind `KeyDetector`.

mod aggregator;
mod chroma;
mod config;
mod constant_q;
mod correlator;
mod detector;
mod error;
mod extractor;
mod filters;
mod hpss;
mod key;
mod lock;
mod profiles;
mod spectrum;
mod tuning;

pub use aggregator::TemporalAggregator;
pub use chroma::Chroma;
pub use config::{
    validate_sample_rate, AggregatorConfig, ConfidenceTier, CorrelatorConfig, DetectorConfig,
    ExtractorConfig, LockConfig, LoudnessBand, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE,
};
pub use correlator::{Correlator, ProfileMatch, RankedKey};
pub use detector::KeyDetector;
pub use error::{AnalysisError, ConfigError};
pub use extractor::FeatureExtractor;
pub use key::{Detection, Key, KeyCandidate, Mode, PitchClass};
pub use lock::{KeyLock, LockPhase, LockState};
pub use profiles::{KeyProfile, ProfileBank};
pub use spectrum::rms;
