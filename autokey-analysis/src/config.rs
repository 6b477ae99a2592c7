//! Detector configuration
//!
//! Every empirically tuned constant of the pipeline lives here as a named
//! field. `DetectorConfig::validate` runs at setup time; nothing is checked
//! per tick.

use crate::error::ConfigError;

/// Lowest sample rate the extractor can be bound to
pub const MIN_SAMPLE_RATE: u32 = 8_000;
/// Highest sample rate the extractor can be bound to
pub const MAX_SAMPLE_RATE: u32 = 192_000;

/// Check a sample rate for rebinding
pub fn validate_sample_rate(sample_rate: u32) -> Result<(), ConfigError> {
    if (MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
        Ok(())
    } else {
        Err(ConfigError::InvalidSampleRate(sample_rate))
    }
}

/// Complete detector configuration
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    pub extractor: ExtractorConfig,
    pub aggregator: AggregatorConfig,
    pub correlator: CorrelatorConfig,
    pub lock: LockConfig,
    /// RMS below which a window (or its tail) counts as silence
    pub min_rms: f32,
    /// Length of the trailing segment checked for silence
    pub tail_secs: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            extractor: ExtractorConfig::default(),
            aggregator: AggregatorConfig::default(),
            correlator: CorrelatorConfig::default(),
            lock: LockConfig::default(),
            min_rms: 0.001,
            tail_secs: 0.5,
        }
    }
}

impl DetectorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.extractor.validate()?;
        self.aggregator.validate()?;
        self.correlator.validate()?;
        self.lock.validate()?;
        check_range("min_rms", self.min_rms, 0.0, 1.0)?;
        check_range("tail_secs", self.tail_secs, 0.0, 10.0)?;
        Ok(())
    }
}

/// Chroma extraction parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractorConfig {
    /// Windows shorter than this are rejected
    pub min_window_secs: f32,
    /// Separate harmonic content before pitch analysis
    pub use_hpss: bool,
    /// Percussive mask margin for HPSS
    pub hpss_margin: f32,
    /// Median kernel (frames / bins) for HPSS
    pub hpss_kernel: usize,
    /// Weight of the STFT chroma in the blend
    pub stft_weight: f32,
    /// Weight of the constant-Q chroma in the blend
    pub cq_weight: f32,
    /// Weight of the CENS chroma in the blend
    pub cens_weight: f32,
    /// Median filter length across time, in frames
    pub median_frames: usize,
    /// Octaves covered by the constant-Q bank, starting at C1
    pub cq_octaves: usize,
    /// Constant-Q resolution
    pub cq_bins_per_octave: usize,
    /// Hann smoothing length for CENS, in frames
    pub cens_smoothing_frames: usize,
    /// Estimate and compensate the tuning offset
    pub estimate_tuning: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            min_window_secs: 1.0,
            use_hpss: true,
            hpss_margin: 2.0,
            hpss_kernel: 31,
            stft_weight: 0.45,
            cq_weight: 0.35,
            cens_weight: 0.20,
            median_frames: 5,
            cq_octaves: 7,
            cq_bins_per_octave: 36,
            cens_smoothing_frames: 9,
            estimate_tuning: true,
        }
    }
}

impl ExtractorConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check_range("min_window_secs", self.min_window_secs, 0.25, 30.0)?;
        check_range("hpss_margin", self.hpss_margin, 1.0, 16.0)?;
        check_count("hpss_kernel", self.hpss_kernel, 1, 255)?;
        check_range("stft_weight", self.stft_weight, 0.0, 1.0)?;
        check_range("cq_weight", self.cq_weight, 0.0, 1.0)?;
        check_range("cens_weight", self.cens_weight, 0.0, 1.0)?;
        let total = self.stft_weight + self.cq_weight + self.cens_weight;
        if total <= 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "chroma weights",
                value: total,
            });
        }
        check_count("median_frames", self.median_frames, 1, 63)?;
        check_count("cq_octaves", self.cq_octaves, 1, 9)?;
        if self.cq_bins_per_octave == 0 || self.cq_bins_per_octave % 12 != 0 {
            return Err(ConfigError::OutOfRange {
                field: "cq_bins_per_octave",
                value: self.cq_bins_per_octave as f32,
            });
        }
        check_count("cens_smoothing_frames", self.cens_smoothing_frames, 1, 127)?;
        Ok(())
    }
}

/// Rolling chroma history parameters, in ticks
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorConfig {
    pub short_len: usize,
    pub long_len: usize,
    /// Short entries needed before averaging kicks in
    pub min_short: usize,
    /// Long entries needed before blending kicks in
    pub min_long: usize,
    /// Share of the short-term mean in the blend
    pub short_weight: f32,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            short_len: 20,
            long_len: 60,
            min_short: 4,
            min_long: 12,
            short_weight: 0.6,
        }
    }
}

impl AggregatorConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.short_len == 0 {
            return Err(ConfigError::EmptyHistory("short chroma"));
        }
        if self.long_len == 0 {
            return Err(ConfigError::EmptyHistory("long chroma"));
        }
        check_count("min_short", self.min_short, 1, self.short_len)?;
        check_count("min_long", self.min_long, 1, self.long_len)?;
        check_range("short_weight", self.short_weight, 0.0, 1.0)?;
        Ok(())
    }
}

/// Confidence calibration for the correlator
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelatorConfig {
    /// Score treated as full confidence before the separation boost
    pub calibration: f32,
    /// Boost per unit of separation between the top two keys
    pub separation_gain: f32,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            calibration: 0.85,
            separation_gain: 0.5,
        }
    }
}

impl CorrelatorConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check_range("calibration", self.calibration, 0.05, 2.0)?;
        check_range("separation_gain", self.separation_gain, 0.0, 10.0)?;
        Ok(())
    }
}

/// Loudness band of the adaptive threshold table
#[derive(Debug, Clone, PartialEq)]
pub struct LoudnessBand {
    pub name: &'static str,
    /// Upper RMS bound (exclusive); the last band should be unbounded
    pub max_rms: f32,
    pub lock_frames: usize,
    pub unlock_frames: usize,
    /// Frame multiplier applied for medium-confidence material
    pub frames_multiplier: f32,
    /// Multiplier on the base confidence threshold
    pub threshold_multiplier: f32,
}

/// Used only when a config with no bands is queried before validation
static FALLBACK_BAND: LoudnessBand = LoudnessBand {
    name: "loud",
    max_rms: f32::INFINITY,
    lock_frames: 15,
    unlock_frames: 25,
    frames_multiplier: 1.0,
    threshold_multiplier: 1.0,
};

/// Rolling confidence tier of the adaptive threshold table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceTier {
    Low,
    Medium,
    High,
}

impl ConfidenceTier {
    pub const ALL: [ConfidenceTier; 3] = [Self::Low, Self::Medium, Self::High];
}

/// Key-lock state machine parameters
#[derive(Debug, Clone, PartialEq)]
pub struct LockConfig {
    /// Base confidence needed for a tick to count at all
    pub confidence_threshold: f32,
    /// Lock frames used until the rolling history is deep enough
    pub frames_to_lock: usize,
    /// Unlock frames used until the rolling history is deep enough
    pub frames_to_unlock: usize,
    pub bands: Vec<LoudnessBand>,
    /// Rolling mean confidence above which material counts as clear
    pub high_confidence_mean: f32,
    /// Rolling mean confidence above which material counts as medium
    pub medium_confidence_mean: f32,
    pub lock_frames_range: (usize, usize),
    pub unlock_frames_range: (usize, usize),
    /// Threshold factor for historically low-confidence material
    pub low_tier_threshold_factor: f32,
    /// Threshold factor for historically high-confidence material
    pub high_tier_threshold_factor: f32,
    /// Rolling RMS/confidence history length
    pub signal_history: usize,
    /// Entries needed before the history drives adaptation
    pub min_signal_history: usize,
    /// Raw detections kept for consensus checks
    pub recent_detections: usize,
    pub min_consensus_detections: usize,
    pub consensus_ratio: f32,
    /// Confidence that counts toward the quick-lock streak
    pub quick_lock_confidence: f32,
    pub quick_lock_frames: usize,
    pub fast_switch_confidence: f32,
    pub fast_switch_frames: usize,
    /// Confidence a relative key needs to break an existing lock
    pub relative_override_confidence: f32,
    pub quick_lock_strength: f32,
    pub normal_lock_strength: f32,
    pub fast_switch_strength: f32,
    pub switch_strength: f32,
    pub strengthen_step: f32,
    /// Decay per tick while a different key is seen
    pub contested_decay: f32,
    /// Decay per tick below the confidence threshold
    pub low_confidence_decay: f32,
    /// Lock strength needed to keep reporting through low confidence
    pub hold_floor: f32,
    /// Weight of the existing confidence when smoothing
    pub confidence_smoothing: f32,
    pub vote_decay: f32,
    pub vote_floor: f32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.15,
            frames_to_lock: 15,
            frames_to_unlock: 25,
            bands: vec![
                LoudnessBand {
                    name: "quiet",
                    max_rms: 0.01,
                    lock_frames: 10,
                    unlock_frames: 18,
                    frames_multiplier: 0.8,
                    threshold_multiplier: 0.6,
                },
                LoudnessBand {
                    name: "moderate",
                    max_rms: 0.05,
                    lock_frames: 12,
                    unlock_frames: 20,
                    frames_multiplier: 0.9,
                    threshold_multiplier: 0.8,
                },
                LoudnessBand {
                    name: "loud",
                    max_rms: f32::INFINITY,
                    lock_frames: 15,
                    unlock_frames: 25,
                    frames_multiplier: 1.0,
                    threshold_multiplier: 1.0,
                },
            ],
            high_confidence_mean: 0.6,
            medium_confidence_mean: 0.4,
            lock_frames_range: (6, 20),
            unlock_frames_range: (15, 30),
            low_tier_threshold_factor: 0.85,
            high_tier_threshold_factor: 1.1,
            signal_history: 30,
            min_signal_history: 10,
            recent_detections: 10,
            min_consensus_detections: 6,
            consensus_ratio: 0.8,
            quick_lock_confidence: 0.65,
            quick_lock_frames: 6,
            fast_switch_confidence: 0.75,
            fast_switch_frames: 5,
            relative_override_confidence: 0.70,
            quick_lock_strength: 0.7,
            normal_lock_strength: 0.5,
            fast_switch_strength: 0.6,
            switch_strength: 0.5,
            strengthen_step: 0.1,
            contested_decay: 0.95,
            low_confidence_decay: 0.95,
            hold_floor: 0.3,
            confidence_smoothing: 0.8,
            vote_decay: 0.85,
            vote_floor: 0.05,
        }
    }
}

impl LockConfig {
    /// Band for a (rolling) RMS level
    pub fn band_for(&self, rms: f32) -> &LoudnessBand {
        self.bands
            .iter()
            .find(|band| rms < band.max_rms)
            .or_else(|| self.bands.last())
            .unwrap_or(&FALLBACK_BAND)
    }

    /// Tier for a rolling mean confidence
    pub fn tier_for(&self, mean_confidence: f32) -> ConfidenceTier {
        if mean_confidence > self.high_confidence_mean {
            ConfidenceTier::High
        } else if mean_confidence > self.medium_confidence_mean {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }

    /// Adaptive (lock, unlock) frame counts for a band and confidence tier
    pub fn adaptive_frames(&self, band: &LoudnessBand, tier: ConfidenceTier) -> (usize, usize) {
        let base_lock = band.lock_frames as f32;
        let base_unlock = band.unlock_frames as f32;
        let (lock, unlock) = match tier {
            ConfidenceTier::High => (
                ((base_lock * 0.6) as usize).max(self.lock_frames_range.0),
                ((base_unlock * 0.8) as usize).max(self.unlock_frames_range.0),
            ),
            ConfidenceTier::Medium => (
                (base_lock * band.frames_multiplier) as usize,
                (base_unlock * band.frames_multiplier) as usize,
            ),
            ConfidenceTier::Low => ((base_lock * 1.3) as usize, (base_unlock * 1.2) as usize),
        };
        (
            lock.clamp(self.lock_frames_range.0, self.lock_frames_range.1),
            unlock.clamp(self.unlock_frames_range.0, self.unlock_frames_range.1),
        )
    }

    /// Confidence threshold multiplier for a tier
    pub fn tier_threshold_factor(&self, tier: ConfidenceTier) -> f32 {
        match tier {
            ConfidenceTier::Low => self.low_tier_threshold_factor,
            ConfidenceTier::Medium => 1.0,
            ConfidenceTier::High => self.high_tier_threshold_factor,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        check_range("confidence_threshold", self.confidence_threshold, 0.0, 1.0)?;
        if self.bands.is_empty() {
            return Err(ConfigError::EmptyHistory("loudness band"));
        }
        if self.frames_to_lock == 0 || self.frames_to_lock > self.frames_to_unlock {
            return Err(ConfigError::AdaptiveFramesInverted {
                band: "initial".to_string(),
                lock: self.frames_to_lock,
                unlock: self.frames_to_unlock,
            });
        }
        for (field, range) in [
            ("lock_frames_range", self.lock_frames_range),
            ("unlock_frames_range", self.unlock_frames_range),
        ] {
            if range.0 == 0 || range.0 > range.1 {
                return Err(ConfigError::OutOfRange {
                    field,
                    value: range.0 as f32,
                });
            }
        }
        for band in &self.bands {
            check_range("frames_multiplier", band.frames_multiplier, 0.1, 4.0)?;
            check_range("threshold_multiplier", band.threshold_multiplier, 0.0, 4.0)?;
            for tier in ConfidenceTier::ALL {
                let (lock, unlock) = self.adaptive_frames(band, tier);
                if lock > unlock {
                    return Err(ConfigError::AdaptiveFramesInverted {
                        band: format!("{} / {:?}", band.name, tier),
                        lock,
                        unlock,
                    });
                }
            }
        }
        if self.signal_history == 0 {
            return Err(ConfigError::EmptyHistory("signal"));
        }
        if self.recent_detections == 0 {
            return Err(ConfigError::EmptyHistory("recent detection"));
        }
        check_count("min_signal_history", self.min_signal_history, 1, self.signal_history)?;
        check_count(
            "min_consensus_detections",
            self.min_consensus_detections,
            1,
            self.recent_detections,
        )?;
        check_range("consensus_ratio", self.consensus_ratio, 0.01, 1.0)?;
        for (field, value) in [
            ("high_confidence_mean", self.high_confidence_mean),
            ("medium_confidence_mean", self.medium_confidence_mean),
            ("quick_lock_confidence", self.quick_lock_confidence),
            ("fast_switch_confidence", self.fast_switch_confidence),
            ("relative_override_confidence", self.relative_override_confidence),
            ("quick_lock_strength", self.quick_lock_strength),
            ("normal_lock_strength", self.normal_lock_strength),
            ("fast_switch_strength", self.fast_switch_strength),
            ("switch_strength", self.switch_strength),
            ("strengthen_step", self.strengthen_step),
            ("hold_floor", self.hold_floor),
            ("confidence_smoothing", self.confidence_smoothing),
            ("vote_floor", self.vote_floor),
        ] {
            check_range(field, value, 0.0, 1.0)?;
        }
        for (field, value) in [
            ("contested_decay", self.contested_decay),
            ("low_confidence_decay", self.low_confidence_decay),
            ("vote_decay", self.vote_decay),
        ] {
            check_range(field, value, 0.01, 1.0)?;
        }
        check_range("low_tier_threshold_factor", self.low_tier_threshold_factor, 0.0, 4.0)?;
        check_range("high_tier_threshold_factor", self.high_tier_threshold_factor, 0.0, 4.0)?;
        check_count("quick_lock_frames", self.quick_lock_frames, 1, 1000)?;
        check_count("fast_switch_frames", self.fast_switch_frames, 1, 1000)?;
        Ok(())
    }
}

fn check_range(field: &'static str, value: f32, min: f32, max: f32) -> Result<(), ConfigError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field, value })
    }
}

fn check_count(field: &'static str, value: usize, min: usize, max: usize) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value: value as f32,
        })
    }
}
