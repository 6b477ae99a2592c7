//! Key detector facade
//!
//! Owns the whole pipeline for one stream: extractor, aggregator,
//! correlator and lock state. `detect_key` is called once per tick and never
//! fails; problems inside a tick degrade to "no key".

use std::time::Instant;

use crate::aggregator::TemporalAggregator;
use crate::config::{validate_sample_rate, DetectorConfig};
use crate::correlator::Correlator;
use crate::error::{AnalysisError, ConfigError};
use crate::extractor::FeatureExtractor;
use crate::key::{Detection, KeyCandidate};
use crate::lock::{KeyLock, LockPhase, LockState};
use crate::spectrum::rms;

/// Live key detector for one mono stream
pub struct KeyDetector {
    config: DetectorConfig,
    sample_rate: u32,
    extractor: FeatureExtractor,
    aggregator: TemporalAggregator,
    correlator: Correlator,
    lock: KeyLock,
}

impl KeyDetector {
    /// Validate the configuration and build a detector bound to `sample_rate`
    pub fn new(sample_rate: u32, config: DetectorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        validate_sample_rate(sample_rate)?;

        Ok(Self {
            extractor: FeatureExtractor::new(sample_rate, config.extractor.clone(), config.min_rms),
            aggregator: TemporalAggregator::new(config.aggregator.clone()),
            correlator: Correlator::new(config.correlator.clone()),
            lock: KeyLock::new(config.lock.clone()),
            sample_rate,
            config,
        })
    }

    /// Analyze one window of mono samples at the bound sample rate
    pub fn detect_key(&mut self, samples: &[f32]) -> Detection {
        let start = Instant::now();

        let required = self.extractor.min_samples();
        if samples.len() < required {
            tracing::debug!(samples = samples.len(), required, "window too short");
            return Detection::none();
        }

        let level = rms(samples);
        let tail_len = ((self.config.tail_secs * self.sample_rate as f32) as usize)
            .clamp(1, samples.len());
        let tail_level = rms(&samples[samples.len() - tail_len..]);
        if level < self.config.min_rms || tail_level < self.config.min_rms {
            if self.lock.phase() == LockPhase::Locked {
                tracing::info!(level, tail_level, "silence, lock released");
            }
            self.reset();
            return Detection::none();
        }

        let candidate = match self.candidate(samples) {
            Ok(candidate) => candidate,
            Err(e) => {
                tracing::warn!(error = %e, "detection tick failed");
                return Detection::none();
            }
        };

        let detection = self.lock.update(&candidate, level);
        tracing::debug!(
            raw = %candidate.key,
            raw_confidence = candidate.confidence,
            reported = %detection,
            elapsed_ms = start.elapsed().as_secs_f32() * 1000.0,
            "tick"
        );
        detection
    }

    /// Extract, aggregate and correlate one window
    fn candidate(&mut self, samples: &[f32]) -> Result<KeyCandidate, AnalysisError> {
        let chroma = self.extractor.extract(samples)?;
        if chroma.is_zero() {
            return Err(AnalysisError::DegenerateChroma);
        }
        let aggregated = self.aggregator.push(chroma);
        self.correlator.correlate(&aggregated)
    }

    /// Forget all history and any lock
    pub fn reset(&mut self) {
        self.aggregator.clear();
        self.lock.reset();
    }

    /// Bind to a new sample rate; always resets
    ///
    /// An invalid rate leaves the detector untouched.
    pub fn rebind_sample_rate(&mut self, sample_rate: u32) -> Result<(), ConfigError> {
        validate_sample_rate(sample_rate)?;
        self.extractor.rebind(sample_rate);
        self.sample_rate = sample_rate;
        self.reset();
        tracing::info!(sample_rate, "detector rebound");
        Ok(())
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn lock_state(&self) -> &LockState {
        self.lock.state()
    }

    pub fn phase(&self) -> LockPhase {
        self.lock.phase()
    }

    /// Ticks of chroma history currently held
    pub fn history_depth(&self) -> usize {
        self.aggregator.len()
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{Key, PitchClass};
    use std::f32::consts::PI;

    const SR: u32 = 16_000;

    fn test_config() -> DetectorConfig {
        let mut config = DetectorConfig::new();
        config.extractor.use_hpss = false;
        config
    }

    fn detector() -> KeyDetector {
        KeyDetector::new(SR, test_config()).unwrap()
    }

    fn tones(freqs: &[(f32, f32)], secs: f32) -> Vec<f32> {
        let n = (SR as f32 * secs) as usize;
        (0..n)
            .map(|i| {
                let t = i as f32 / SR as f32;
                freqs
                    .iter()
                    .map(|(f, a)| a * (2.0 * PI * f * t).sin())
                    .sum::<f32>()
                    * 0.1
            })
            .collect()
    }

    fn c_major_window() -> Vec<f32> {
        tones(
            &[
                (523.2511, 1.0),
                (587.3295, 0.3),
                (659.2551, 0.8),
                (698.4565, 0.3),
                (783.9909, 0.9),
                (880.0000, 0.3),
                (987.7666, 0.3),
            ],
            2.0,
        )
    }

    fn locked_detector() -> KeyDetector {
        let mut detector = detector();
        let window = c_major_window();
        for _ in 0..10 {
            detector.detect_key(&window);
        }
        assert_eq!(detector.phase(), LockPhase::Locked);
        detector
    }

    #[test]
    fn test_invalid_setup_rejected() {
        assert!(matches!(
            KeyDetector::new(1_000, test_config()),
            Err(ConfigError::InvalidSampleRate(1_000))
        ));
        let mut config = test_config();
        config.lock.frames_to_lock = 40;
        assert!(KeyDetector::new(SR, config).is_err());
    }

    #[test]
    fn test_c_major_locks() {
        let mut detector = detector();
        let window = c_major_window();
        let lock_frames = detector.config().lock.frames_to_lock;

        let mut locked_at = None;
        let mut last = Detection::none();
        for tick in 1..=20 {
            last = detector.detect_key(&window);
            if locked_at.is_none() && detector.phase() == LockPhase::Locked {
                locked_at = Some(tick);
            }
        }

        let tick = locked_at.expect("should lock");
        assert!(tick <= lock_frames, "locked at tick {}", tick);
        assert_eq!(last.key, Some(Key::major(PitchClass::C)));
        assert!(last.confidence > 0.8, "confidence {}", last.confidence);
        assert_eq!(detector.history_depth(), 20);
    }

    #[test]
    fn test_silence_clears_lock() {
        let mut detector = locked_detector();
        let quiet: Vec<f32> = (0..SR as usize * 4)
            .map(|i| 1e-5 * (i as f32 * 0.1).sin())
            .collect();

        let out = detector.detect_key(&quiet);
        assert_eq!(out, Detection::none());
        assert_eq!(
            detector.lock_state(),
            &LockState::new(&detector.config().lock)
        );
        assert_eq!(detector.history_depth(), 0);
    }

    #[test]
    fn test_short_window_leaves_state_alone() {
        let mut detector = locked_detector();
        let before = detector.lock_state().clone();
        let depth = detector.history_depth();

        let out = detector.detect_key(&c_major_window()[..SR as usize / 2]);
        assert_eq!(out, Detection::none());
        assert_eq!(detector.lock_state(), &before);
        assert_eq!(detector.history_depth(), depth);
    }

    #[test]
    fn test_reset_then_silence() {
        let mut detector = locked_detector();
        detector.reset();
        let out = detector.detect_key(&vec![0.0; SR as usize * 2]);
        assert_eq!(out, Detection::none());
        assert_eq!(out.confidence, 0.0);
        assert_eq!(detector.lock_state().lock_strength(), 0.0);
    }

    #[test]
    fn test_silent_tail_resets() {
        let mut detector = locked_detector();
        let mut window = c_major_window();
        let tail = SR as usize * 6 / 10;
        let len = window.len();
        window[len - tail..].iter_mut().for_each(|s| *s = 0.0);

        assert_eq!(detector.detect_key(&window), Detection::none());
        assert_eq!(detector.phase(), LockPhase::Unlocked);
    }

    #[test]
    fn test_failed_tick_keeps_lock() {
        let mut detector = locked_detector();
        let before = detector.lock_state().clone();
        let depth = detector.history_depth();

        // Pure DC: loud enough, but no pitch content once the offset is removed
        let out = detector.detect_key(&vec![0.5; SR as usize * 2]);
        assert_eq!(out, Detection::none());
        assert_eq!(detector.lock_state(), &before);
        assert_eq!(detector.history_depth(), depth);
    }

    #[test]
    fn test_rebind() {
        let mut detector = locked_detector();
        assert_eq!(
            detector.rebind_sample_rate(500_000),
            Err(ConfigError::InvalidSampleRate(500_000))
        );
        assert_eq!(detector.sample_rate(), SR);
        assert_eq!(detector.phase(), LockPhase::Locked);

        detector.rebind_sample_rate(22_050).unwrap();
        assert_eq!(detector.sample_rate(), 22_050);
        assert_eq!(detector.phase(), LockPhase::Unlocked);
        assert_eq!(detector.history_depth(), 0);
    }
}
