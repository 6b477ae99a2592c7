//! Settings file for the autokey binary
//!
//! Plain `key = value` lines overriding detector and engine defaults.
//! Keys are namespaced by section, e.g. `extractor.use_hpss = false`.

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use autokey_analysis::DetectorConfig;
use autokey_audio::{EngineSettings, DEFAULT_BUFFER_SECS};

/// Everything the binary can be configured with
#[derive(Debug, Clone)]
pub struct Settings {
    pub detector: DetectorConfig,
    pub engine: EngineSettings,
    /// Seconds of live audio kept in the capture ring
    pub buffer_secs: f32,
    /// File replay window length
    pub window_secs: f32,
    /// File replay step between windows
    pub hop_secs: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            engine: EngineSettings::default(),
            buffer_secs: DEFAULT_BUFFER_SECS,
            window_secs: DEFAULT_BUFFER_SECS,
            hop_secs: 0.5,
        }
    }
}

impl Settings {
    /// Default settings file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("autokey")
            .join("detector.conf")
    }

    /// Load from an explicit path, or from the default path when it exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        let settings = Self::parse(&content)
            .with_context(|| format!("parsing settings in {}", path.display()))?;
        tracing::info!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    /// Parse `key = value` lines; `#` starts a comment line
    pub fn parse(content: &str) -> Result<Self> {
        let mut settings = Self::default();

        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                bail!("line {}: expected `key = value`, got `{}`", index + 1, line);
            };
            let (key, value) = (key.trim(), value.trim());

            let known = settings
                .apply(key, value)
                .with_context(|| format!("line {}", index + 1))?;
            if !known {
                tracing::warn!(key, line = index + 1, "unknown setting ignored");
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Reject combinations that could never produce a detection
    pub fn validate(&self) -> Result<()> {
        self.detector.validate().context("detector settings")?;

        let min_window = self.detector.extractor.min_window_secs;
        if !(self.buffer_secs >= min_window) {
            bail!(
                "engine.buffer_secs ({}) is shorter than extractor.min_window_secs ({})",
                self.buffer_secs,
                min_window
            );
        }
        if !(self.window_secs >= min_window) {
            bail!(
                "replay.window_secs ({}) is shorter than extractor.min_window_secs ({})",
                self.window_secs,
                min_window
            );
        }
        if !(self.hop_secs > 0.0) {
            bail!("replay.hop_secs must be positive, got {}", self.hop_secs);
        }
        if self.engine.poll_interval.is_zero() {
            bail!("engine.poll_ms must be positive");
        }
        Ok(())
    }

    /// Set one field; returns false for an unknown key
    fn apply(&mut self, key: &str, value: &str) -> Result<bool> {
        let d = &mut self.detector;
        let x = &mut d.extractor;
        let a = &mut d.aggregator;
        let c = &mut d.correlator;
        let l = &mut d.lock;

        match key {
            "min_rms" => d.min_rms = parse(key, value)?,
            "tail_secs" => d.tail_secs = parse(key, value)?,

            "extractor.min_window_secs" => x.min_window_secs = parse(key, value)?,
            "extractor.use_hpss" => x.use_hpss = parse(key, value)?,
            "extractor.hpss_margin" => x.hpss_margin = parse(key, value)?,
            "extractor.hpss_kernel" => x.hpss_kernel = parse(key, value)?,
            "extractor.stft_weight" => x.stft_weight = parse(key, value)?,
            "extractor.cq_weight" => x.cq_weight = parse(key, value)?,
            "extractor.cens_weight" => x.cens_weight = parse(key, value)?,
            "extractor.median_frames" => x.median_frames = parse(key, value)?,
            "extractor.cq_octaves" => x.cq_octaves = parse(key, value)?,
            "extractor.cq_bins_per_octave" => x.cq_bins_per_octave = parse(key, value)?,
            "extractor.cens_smoothing_frames" => x.cens_smoothing_frames = parse(key, value)?,
            "extractor.estimate_tuning" => x.estimate_tuning = parse(key, value)?,

            "aggregator.short_len" => a.short_len = parse(key, value)?,
            "aggregator.long_len" => a.long_len = parse(key, value)?,
            "aggregator.min_short" => a.min_short = parse(key, value)?,
            "aggregator.min_long" => a.min_long = parse(key, value)?,
            "aggregator.short_weight" => a.short_weight = parse(key, value)?,

            "correlator.calibration" => c.calibration = parse(key, value)?,
            "correlator.separation_gain" => c.separation_gain = parse(key, value)?,

            "lock.confidence_threshold" => l.confidence_threshold = parse(key, value)?,
            "lock.frames_to_lock" => l.frames_to_lock = parse(key, value)?,
            "lock.frames_to_unlock" => l.frames_to_unlock = parse(key, value)?,
            "lock.high_confidence_mean" => l.high_confidence_mean = parse(key, value)?,
            "lock.medium_confidence_mean" => l.medium_confidence_mean = parse(key, value)?,
            "lock.min_lock_frames" => l.lock_frames_range.0 = parse(key, value)?,
            "lock.max_lock_frames" => l.lock_frames_range.1 = parse(key, value)?,
            "lock.min_unlock_frames" => l.unlock_frames_range.0 = parse(key, value)?,
            "lock.max_unlock_frames" => l.unlock_frames_range.1 = parse(key, value)?,
            "lock.quick_lock_confidence" => l.quick_lock_confidence = parse(key, value)?,
            "lock.quick_lock_frames" => l.quick_lock_frames = parse(key, value)?,
            "lock.fast_switch_confidence" => l.fast_switch_confidence = parse(key, value)?,
            "lock.fast_switch_frames" => l.fast_switch_frames = parse(key, value)?,
            "lock.relative_override_confidence" => {
                l.relative_override_confidence = parse(key, value)?
            }
            "lock.hold_floor" => l.hold_floor = parse(key, value)?,
            "lock.confidence_smoothing" => l.confidence_smoothing = parse(key, value)?,
            "lock.vote_decay" => l.vote_decay = parse(key, value)?,

            "engine.poll_ms" => {
                self.engine.poll_interval = Duration::from_millis(parse(key, value)?)
            }
            "engine.error_backoff_ms" => {
                self.engine.error_backoff = Duration::from_millis(parse(key, value)?)
            }
            "engine.buffer_secs" => self.buffer_secs = parse(key, value)?,

            "replay.window_secs" => self.window_secs = parse(key, value)?,
            "replay.hop_secs" => self.hop_secs = parse(key, value)?,

            _ => return Ok(false),
        }
        Ok(true)
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid value `{}` for {}: {}", value, key, e))
}
