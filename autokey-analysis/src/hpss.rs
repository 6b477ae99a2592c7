//! Harmonic/percussive separation by median filtering
//!
//! Harmonic energy is smooth along time, percussive energy is smooth along
//! frequency. Median filtering the magnitude spectrogram in each direction
//! gives the two estimates, and a soft mask keeps the harmonic part.

use crate::filters::median_filter;
use crate::spectrum::Stft;

/// Median-filter harmonic extractor
pub struct HarmonicSeparator {
    stft: Stft,
    kernel: usize,
    margin: f32,
}

impl HarmonicSeparator {
    pub fn new(fft_size: usize, kernel: usize, margin: f32) -> Self {
        Self {
            stft: Stft::new(fft_size, fft_size / 4),
            kernel,
            margin,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.stft.size()
    }

    /// Harmonic component of `samples`, same length as the input
    pub fn harmonic(&self, samples: &[f32]) -> Vec<f32> {
        let mut spectra = self.stft.spectra(samples);
        if spectra.is_empty() {
            return samples.to_vec();
        }
        let frames = spectra.len();
        let bins = self.stft.bins();

        let magnitude: Vec<Vec<f32>> = spectra
            .iter()
            .map(|frame| frame.iter().map(|c| c.norm()).collect())
            .collect();

        // Across time, one bin at a time
        let mut harmonic = vec![vec![0.0f32; bins]; frames];
        let mut column = vec![0.0f32; frames];
        for bin in 0..bins {
            for (slot, frame) in column.iter_mut().zip(&magnitude) {
                *slot = frame[bin];
            }
            for (frame, value) in harmonic.iter_mut().zip(median_filter(&column, self.kernel)) {
                frame[bin] = value;
            }
        }

        // Across frequency, one frame at a time
        let percussive: Vec<Vec<f32>> = magnitude
            .iter()
            .map(|frame| median_filter(frame, self.kernel))
            .collect();

        for ((frame, h), p) in spectra.iter_mut().zip(&harmonic).zip(&percussive) {
            for ((c, &h), &p) in frame.iter_mut().zip(h).zip(p) {
                *c = *c * self.mask(h, p);
            }
        }

        self.stft.inverse(&spectra, samples.len())
    }

    /// Soft Wiener mask for the harmonic component
    fn mask(&self, harmonic: f32, percussive: f32) -> f32 {
        let h = harmonic * harmonic;
        let p = (self.margin * percussive).powi(2);
        if h + p > 0.0 {
            h / (h + p)
        } else {
            0.0
        }
    }
}
