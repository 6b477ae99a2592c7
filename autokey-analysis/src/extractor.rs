//! Chroma feature extraction
//!
//! Turns one window of mono audio into a single 12-bin chroma vector:
//! 1. Remove DC offset and (optionally) keep only the harmonic component
//! 2. Estimate the tuning offset from the high-resolution spectrum
//! 3. Compute STFT, constant-Q and CENS chroma on one frame grid
//! 4. Blend them, median filter across time, average, normalize

use crate::chroma::Chroma;
use crate::config::ExtractorConfig;
use crate::constant_q::{cens, ConstantQ};
use crate::error::AnalysisError;
use crate::filters::median_filter_frames;
use crate::hpss::HarmonicSeparator;
use crate::spectrum::{remove_dc_offset, rms, scaled_size, Stft};
use crate::tuning::{estimate_tuning, midi_from_freq};

/// Reference sizes at 44.1 kHz, scaled to the bound sample rate
const STFT_SIZE: usize = 4096;
const CQ_SIZE: usize = 16384;
const HPSS_SIZE: usize = 4096;
const GRID_HOP: usize = 2048;

/// STFT chroma frequency range
const MIN_PITCH_FREQ: f32 = 55.0;
const MAX_PITCH_FREQ: f32 = 5000.0;

/// Frequencies above this are progressively attenuated
const DECAY_KNEE: f32 = 500.0;

/// Chroma extractor bound to one sample rate
pub struct FeatureExtractor {
    config: ExtractorConfig,
    silence_rms: f32,
    sample_rate: u32,
    stft: Stft,
    constant_q: ConstantQ,
    separator: HarmonicSeparator,
}

impl FeatureExtractor {
    /// `silence_rms` is the level below which the harmonic residual is discarded
    pub fn new(sample_rate: u32, config: ExtractorConfig, silence_rms: f32) -> Self {
        let hop = scaled_size(GRID_HOP, sample_rate);
        let stft = Stft::new(scaled_size(STFT_SIZE, sample_rate), hop);
        let constant_q = ConstantQ::new(
            scaled_size(CQ_SIZE, sample_rate),
            hop,
            sample_rate,
            config.cq_octaves,
            config.cq_bins_per_octave,
        );
        let separator = HarmonicSeparator::new(
            scaled_size(HPSS_SIZE, sample_rate),
            config.hpss_kernel,
            config.hpss_margin,
        );

        Self {
            config,
            silence_rms,
            sample_rate,
            stft,
            constant_q,
            separator,
        }
    }

    /// Recompute every sample-rate-dependent size
    pub fn rebind(&mut self, sample_rate: u32) {
        *self = Self::new(sample_rate, self.config.clone(), self.silence_rms);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples needed for a window to be analyzed
    pub fn min_samples(&self) -> usize {
        (self.config.min_window_secs * self.sample_rate as f32).ceil() as usize
    }

    /// Frame sizes in use: (stft, constant-Q, hpss, hop)
    pub fn frame_sizes(&self) -> (usize, usize, usize, usize) {
        (
            self.stft.size(),
            self.constant_q.fft_size(),
            self.separator.fft_size(),
            self.stft.hop(),
        )
    }

    /// Extract the chroma of one window
    pub fn extract(&self, samples: &[f32]) -> Result<Chroma, AnalysisError> {
        let required = self.min_samples();
        if samples.len() < required {
            return Err(AnalysisError::InsufficientData {
                samples: samples.len(),
                required,
            });
        }
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(AnalysisError::NonFinite("input samples"));
        }

        let centered = remove_dc_offset(samples);
        let signal = if self.config.use_hpss {
            let harmonic = self.separator.harmonic(&centered);
            if rms(&harmonic) >= self.silence_rms {
                harmonic
            } else {
                tracing::trace!("harmonic residual below silence floor, using full signal");
                centered
            }
        } else {
            centered
        };

        let cq_power = self.constant_q.power_frames(&signal);
        let tuning = if self.config.estimate_tuning {
            estimate_tuning(&average(&cq_power), self.constant_q.bin_hz())
        } else {
            0.0
        };

        let stft_chroma = self.stft_chroma(&signal, tuning);
        let cq_raw = self.constant_q.chroma(&cq_power, tuning);
        let cens_chroma = cens(&cq_raw, self.config.cens_smoothing_frames);

        let frames = stft_chroma.len().min(cq_raw.len()).min(cens_chroma.len());
        let combined: Vec<[f32; 12]> = (0..frames)
            .map(|t| {
                let stft = max_normalized(stft_chroma[t]);
                let cq = max_normalized(cq_raw[t]);
                let mut out = [0.0f32; 12];
                for (i, slot) in out.iter_mut().enumerate() {
                    *slot = self.config.stft_weight * stft[i]
                        + self.config.cq_weight * cq[i]
                        + self.config.cens_weight * cens_chroma[t][i];
                }
                out
            })
            .collect();

        let filtered = median_filter_frames(&combined, self.config.median_frames);
        let mut mean = [0.0f32; 12];
        for frame in &filtered {
            for (slot, v) in mean.iter_mut().zip(frame) {
                *slot += v;
            }
        }
        if mean.iter().any(|v| !v.is_finite()) {
            return Err(AnalysisError::NonFinite("chroma"));
        }

        tracing::trace!(frames, tuning, "extracted chroma");
        Ok(Chroma::normalized(mean))
    }

    /// Per-frame STFT chroma, each FFT bin folded onto its nearest tuned pitch class
    fn stft_chroma(&self, signal: &[f32], tuning: f32) -> Vec<[f32; 12]> {
        let map = self.pitch_class_map(tuning);
        self.stft
            .power_frames(signal)
            .iter()
            .map(|power| {
                let mut chroma = [0.0f32; 12];
                for (p, entry) in power.iter().zip(&map) {
                    if let Some((pitch_class, weight)) = entry {
                        chroma[*pitch_class] += p * weight;
                    }
                }
                chroma
            })
            .collect()
    }

    /// Bin -> (pitch class, weight) for the STFT chroma
    ///
    /// The weight is 1.0 on an exact pitch falling to 0.0 half a semitone
    /// away, times a sqrt decay above the knee frequency.
    fn pitch_class_map(&self, tuning: f32) -> Vec<Option<(usize, f32)>> {
        let nyquist = self.sample_rate as f32 / 2.0;
        (0..self.stft.bins())
            .map(|bin| {
                let freq = self.stft.bin_frequency(bin, self.sample_rate);
                if !(MIN_PITCH_FREQ..=MAX_PITCH_FREQ).contains(&freq) || freq >= nyquist {
                    return None;
                }
                let midi = midi_from_freq(freq) - tuning;
                let nearest = midi.round();
                let detune = (midi - nearest).abs();
                let pitch_weight = 1.0 - detune.min(0.5) * 2.0;
                let decay = (DECAY_KNEE / freq.max(DECAY_KNEE)).sqrt();
                let pitch_class = (nearest as i32).rem_euclid(12) as usize;
                Some((pitch_class, pitch_weight.max(0.0) * decay))
            })
            .collect()
    }
}

fn average(frames: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = frames.first() else {
        return Vec::new();
    };
    let mut avg = vec![0.0f32; first.len()];
    for frame in frames {
        for (slot, p) in avg.iter_mut().zip(frame) {
            *slot += p;
        }
    }
    let n = frames.len() as f32;
    avg.iter_mut().for_each(|v| *v /= n);
    avg
}

fn max_normalized(frame: [f32; 12]) -> [f32; 12] {
    let max = frame.iter().cloned().fold(0.0f32, f32::max);
    if max > 0.0 {
        frame.map(|v| v / max)
    } else {
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::Correlator;
    use crate::key::{Key, PitchClass};
    use std::f32::consts::PI;

    const SR: u32 = 16_000;

    /// C major scale tones in octave 5, triad emphasized
    fn c_major_signal(sample_rate: u32, secs: f32) -> Vec<f32> {
        let tones = [
            (523.2511, 1.0),  // C
            (587.3295, 0.3),  // D
            (659.2551, 0.8),  // E
            (698.4565, 0.3),  // F
            (783.9909, 0.9),  // G
            (880.0000, 0.3),  // A
            (987.7666, 0.3),  // B
        ];
        let n = (sample_rate as f32 * secs) as usize;
        (0..n)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                tones
                    .iter()
                    .map(|(f, a)| a * (2.0 * PI * f * t).sin())
                    .sum::<f32>()
                    * 0.1
            })
            .collect()
    }

    fn config(use_hpss: bool) -> ExtractorConfig {
        ExtractorConfig {
            use_hpss,
            ..Default::default()
        }
    }

    #[test]
    fn test_sizes_scale_with_rate() {
        let ex = FeatureExtractor::new(44_100, config(false), 0.001);
        assert_eq!(ex.frame_sizes(), (4096, 16384, 4096, 2048));

        let mut ex = FeatureExtractor::new(16_000, config(false), 0.001);
        assert_eq!(ex.frame_sizes(), (2048, 8192, 2048, 1024));
        assert_eq!(ex.min_samples(), 16_000);

        ex.rebind(88_200);
        assert_eq!(ex.sample_rate(), 88_200);
        assert_eq!(ex.frame_sizes(), (8192, 32768, 8192, 4096));
    }

    #[test]
    fn test_short_window_rejected() {
        let ex = FeatureExtractor::new(SR, config(false), 0.001);
        let result = ex.extract(&vec![0.1; 8_000]);
        assert_eq!(
            result,
            Err(AnalysisError::InsufficientData {
                samples: 8_000,
                required: 16_000
            })
        );
    }

    #[test]
    fn test_non_finite_rejected() {
        let ex = FeatureExtractor::new(SR, config(false), 0.001);
        let mut samples = c_major_signal(SR, 1.5);
        samples[100] = f32::NAN;
        assert_eq!(
            ex.extract(&samples),
            Err(AnalysisError::NonFinite("input samples"))
        );
    }

    #[test]
    fn test_silence_gives_zero_chroma() {
        let ex = FeatureExtractor::new(SR, config(false), 0.001);
        let chroma = ex.extract(&vec![0.0; SR as usize * 2]).unwrap();
        assert!(chroma.is_zero());
    }

    #[test]
    fn test_single_tone_dominates() {
        let ex = FeatureExtractor::new(SR, config(false), 0.001);
        let samples: Vec<f32> = (0..SR as usize * 2)
            .map(|i| 0.3 * (2.0 * PI * 440.0 * i as f32 / SR as f32).sin())
            .collect();
        let chroma = ex.extract(&samples).unwrap();
        assert_eq!(chroma.dominant(), Some(9));
        assert!((chroma.norm() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_c_major_signal_correlates_to_c_major() {
        let ex = FeatureExtractor::new(SR, config(false), 0.001);
        let chroma = ex.extract(&c_major_signal(SR, 2.0)).unwrap();
        let candidate = Correlator::default().correlate(&chroma).unwrap();
        assert_eq!(candidate.key, Key::major(PitchClass::C));
    }

    #[test]
    fn test_hpss_path_keeps_key() {
        let ex = FeatureExtractor::new(SR, config(true), 0.001);
        let chroma = ex.extract(&c_major_signal(SR, 2.0)).unwrap();
        let candidate = Correlator::default().correlate(&chroma).unwrap();
        assert_eq!(candidate.key, Key::major(PitchClass::C));
    }

    #[test]
    fn test_dc_offset_ignored() {
        let ex = FeatureExtractor::new(SR, config(false), 0.001);
        let clean = c_major_signal(SR, 2.0);
        let shifted: Vec<f32> = clean.iter().map(|s| s + 0.2).collect();
        let a = ex.extract(&clean).unwrap();
        let b = ex.extract(&shifted).unwrap();
        for i in 0..12 {
            assert!((a[i] - b[i]).abs() < 1e-3);
        }
    }
}
