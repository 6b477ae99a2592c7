//! Constant-Q chroma and CENS
//!
//! The constant-Q bank is a set of triangular log-frequency filters laid over
//! a high-resolution FFT, `bins_per_octave` per octave starting at C1. Bins
//! fold onto pitch classes by rounding to the nearest semitone.

use crate::spectrum::Stft;
use crate::tuning::A4_FREQ;

/// MIDI number of C1, the lowest bank frequency
const C1_MIDI: f32 = 24.0;

/// CENS quantization thresholds on L1-normalized energy
const CENS_STEPS: [f32; 4] = [0.4, 0.2, 0.1, 0.05];
const CENS_STEP_WEIGHT: f32 = 0.25;

/// One filter of the bank: FFT bin taps and the pitch class it folds into
#[derive(Debug, Clone)]
struct CqFilter {
    pitch_class: usize,
    taps: Vec<(usize, f32)>,
}

/// Constant-Q chroma over a high-resolution STFT
pub struct ConstantQ {
    stft: Stft,
    sample_rate: u32,
    octaves: usize,
    bins_per_octave: usize,
}

impl ConstantQ {
    pub fn new(fft_size: usize, hop: usize, sample_rate: u32, octaves: usize, bins_per_octave: usize) -> Self {
        Self {
            stft: Stft::new(fft_size, hop),
            sample_rate,
            octaves,
            bins_per_octave,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.stft.size()
    }

    /// Width of one FFT bin in Hz
    pub fn bin_hz(&self) -> f32 {
        self.stft.bin_frequency(1, self.sample_rate)
    }

    /// High-resolution power spectra on the shared frame grid
    pub fn power_frames(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.stft.power_frames(samples)
    }

    /// Raw (un-normalized) pitch class amplitudes per frame
    pub fn chroma(&self, power_frames: &[Vec<f32>], tuning: f32) -> Vec<[f32; 12]> {
        let filters = self.filters(tuning);
        power_frames
            .iter()
            .map(|power| {
                let mut chroma = [0.0f32; 12];
                for filter in &filters {
                    let amplitude: f32 = filter
                        .taps
                        .iter()
                        .map(|&(bin, w)| power.get(bin).map_or(0.0, |p| p.sqrt()) * w)
                        .sum();
                    chroma[filter.pitch_class] += amplitude;
                }
                chroma
            })
            .collect()
    }

    /// Build the filter bank for a tuning offset in semitones
    fn filters(&self, tuning: f32) -> Vec<CqFilter> {
        let bins_per_semitone = (self.bins_per_octave / 12).max(1);
        let bpo = self.bins_per_octave as f32;
        let nyquist = self.sample_rate as f32 / 2.0;
        let bin_hz = self.bin_hz();
        let fmin = A4_FREQ * 2f32.powf((C1_MIDI + tuning - 69.0) / 12.0);
        let center = |k: f32| fmin * 2f32.powf(k / bpo);

        let total = self.octaves * self.bins_per_octave;
        let mut filters = Vec::with_capacity(total);

        for k in 0..total {
            let freq = center(k as f32);
            let low = center(k as f32 - 1.0);
            let high = center(k as f32 + 1.0);
            if high >= nyquist {
                break;
            }

            let pitch_class = ((k + bins_per_semitone / 2) / bins_per_semitone) % 12;
            let first = (low / bin_hz).ceil() as usize;
            let last = (high / bin_hz).floor() as usize;

            let mut taps: Vec<(usize, f32)> = (first..=last)
                .filter_map(|bin| {
                    let f = bin as f32 * bin_hz;
                    if f <= 0.0 {
                        return None;
                    }
                    let weight = 1.0 - ((f / freq).log2() * bpo).abs();
                    (weight > 0.0).then_some((bin, weight))
                })
                .collect();

            if taps.is_empty() {
                // Narrower than one FFT bin: interpolate between neighbours
                let position = freq / bin_hz;
                let below = position.floor() as usize;
                let frac = position - below as f32;
                taps.push((below, 1.0 - frac));
                taps.push((below + 1, frac));
            }

            let sum: f32 = taps.iter().map(|&(_, w)| w).sum();
            if sum > 0.0 {
                for (_, w) in &mut taps {
                    *w /= sum;
                }
            }
            filters.push(CqFilter { pitch_class, taps });
        }
        filters
    }
}

/// Chroma energy normalized statistics from raw constant-Q chroma
///
/// L1-normalize, quantize, smooth over `smoothing` frames, L2-normalize.
pub fn cens(raw: &[[f32; 12]], smoothing: usize) -> Vec<[f32; 12]> {
    let quantized: Vec<[f32; 12]> = raw
        .iter()
        .map(|frame| {
            let sum: f32 = frame.iter().map(|v| v.abs()).sum();
            frame.map(|v| {
                let share = if sum > 1e-10 { v / sum } else { 0.0 };
                CENS_STEPS
                    .iter()
                    .filter(|&&step| share > step)
                    .count() as f32
                    * CENS_STEP_WEIGHT
            })
        })
        .collect();

    crate::filters::hann_smooth_frames(&quantized, smoothing)
        .into_iter()
        .map(|frame| {
            let norm = frame.iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm > 1e-10 {
                frame.map(|v| v / norm)
            } else {
                frame
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    const SR: u32 = 16_000;

    fn tone(freq: f32) -> Vec<f32> {
        (0..SR as usize * 2)
            .map(|i| (2.0 * PI * freq * i as f32 / SR as f32).sin())
            .collect()
    }

    fn dominant(frame: &[f32; 12]) -> usize {
        frame
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap()
    }

    #[test]
    fn test_a440_folds_to_a() {
        let cq = ConstantQ::new(8192, 1024, SR, 7, 36);
        let power = cq.power_frames(&tone(440.0));
        let chroma = cq.chroma(&power, 0.0);
        assert_eq!(chroma.len(), power.len());
        assert_eq!(dominant(&chroma[chroma.len() / 2]), 9);
    }

    #[test]
    fn test_low_tone_folds_correctly() {
        // G2, where filters are narrower than an FFT bin
        let cq = ConstantQ::new(8192, 1024, SR, 7, 36);
        let power = cq.power_frames(&tone(97.9989));
        let chroma = cq.chroma(&power, 0.0);
        assert_eq!(dominant(&chroma[chroma.len() / 2]), 7);
    }

    #[test]
    fn test_bank_stops_at_nyquist() {
        let cq = ConstantQ::new(512, 128, 8_000, 7, 36);
        let filters = cq.filters(0.0);
        assert!(!filters.is_empty());
        assert!(filters.len() < 7 * 36);
    }

    #[test]
    fn test_tuning_shifts_bank() {
        // An A sharp by 0.45 semitones leaks into A#; compensating the
        // tuning concentrates it back onto A
        let cq = ConstantQ::new(8192, 1024, SR, 7, 36);
        let power = cq.power_frames(&tone(440.0 * 2f32.powf(0.45 / 12.0)));
        let share_of_a = |frame: &[f32; 12]| frame[9] / frame.iter().sum::<f32>();

        let untuned = cq.chroma(&power, 0.0);
        let tuned = cq.chroma(&power, 0.45);
        let mid = tuned.len() / 2;
        assert_eq!(dominant(&tuned[mid]), 9);
        assert!(share_of_a(&tuned[mid]) > share_of_a(&untuned[mid]));
    }

    #[test]
    fn test_cens_quantization() {
        let mut frame = [0.0f32; 12];
        frame[0] = 0.5; // share 0.5: all four steps
        frame[4] = 0.3; // share 0.3: three steps
        frame[7] = 0.2; // share 0.2: two steps (not strictly above 0.2)
        let out = cens(&[frame], 1);
        let norm = (1.0f32 + 0.75 * 0.75 + 0.5 * 0.5).sqrt();
        assert!((out[0][0] - 1.0 / norm).abs() < 1e-5);
        assert!((out[0][4] - 0.75 / norm).abs() < 1e-5);
        assert!((out[0][7] - 0.5 / norm).abs() < 1e-5);
    }

    #[test]
    fn test_cens_unit_or_zero() {
        let mut frames = vec![[0.0f32; 12]; 12];
        for (i, f) in frames.iter_mut().enumerate().skip(2) {
            f[i] = 1.0;
        }
        for frame in cens(&frames, 9) {
            let norm = frame.iter().map(|v| v * v).sum::<f32>().sqrt();
            assert!(norm == 0.0 || (norm - 1.0).abs() < 1e-5);
        }
    }
}
