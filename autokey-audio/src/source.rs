//! Audio sources feeding the detector

use autokey_analysis::{rms, ConfigError};
use thiserror::Error;

/// Read-only snapshot of mono audio, normalized to [-1, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct AudioWindow {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub rms: f32,
}

impl AudioWindow {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        let rms = rms(&samples);
        Self {
            samples,
            sample_rate,
            rms,
        }
    }

    /// Length in seconds
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.samples.len() as f32 / self.sample_rate as f32
        }
    }
}

/// Capture and engine failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("no input device available")]
    NoDevice,
    #[error("input device not found: {0}")]
    DeviceNotFound(String),
    #[error("audio stream error: {0}")]
    Stream(String),
    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),
    #[error("detector configuration error: {0}")]
    Engine(#[from] ConfigError),
}

/// Anything that can hand the detector its latest window
pub trait AudioSource: Send {
    fn window(&mut self) -> Result<AudioWindow, CaptureError>;

    /// True once after the underlying stream was restarted
    fn restarted(&mut self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_stats() {
        let window = AudioWindow::new(vec![0.5; 8_000], 16_000);
        assert!((window.rms - 0.5).abs() < 1e-6);
        assert!((window.duration_secs() - 0.5).abs() < 1e-6);
        assert_eq!(AudioWindow::new(Vec::new(), 0).duration_secs(), 0.0);
    }

    #[test]
    fn test_config_error_converts() {
        let err: CaptureError = ConfigError::InvalidSampleRate(0).into();
        assert_eq!(err, CaptureError::Engine(ConfigError::InvalidSampleRate(0)));
        assert!(err.to_string().contains("0 Hz"));
    }
}
