//! Short-time Fourier transform helpers
//!
//! Frames are centered on a shared grid: frame `i` is centered on sample
//! `i * hop`, zero-padded past either end of the signal. Transforms of
//! different sizes using the same hop therefore line up frame for frame.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// Sample rate the reference FFT sizes are tuned for
pub const REFERENCE_SAMPLE_RATE: f32 = 44_100.0;

/// Scale a size tuned for 44.1 kHz to another rate, rounded to a power of two
pub fn scaled_size(reference: usize, sample_rate: u32) -> usize {
    let target = reference as f32 * sample_rate as f32 / REFERENCE_SAMPLE_RATE;
    let exponent = target.max(1.0).log2().round() as u32;
    1usize << exponent.clamp(4, 20)
}

/// Periodic Hann window
pub fn hann(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / size as f32).cos()))
        .collect()
}

/// Root mean square of a buffer (0.0 when empty)
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

/// Copy of the signal with its mean removed
pub fn remove_dc_offset(samples: &[f32]) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let mean = samples.iter().sum::<f32>() / samples.len() as f32;
    samples.iter().map(|s| s - mean).collect()
}

/// Hann-windowed STFT of a fixed size and hop
pub struct Stft {
    size: usize,
    hop: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
}

impl Stft {
    pub fn new(size: usize, hop: usize) -> Self {
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);

        Self {
            size,
            hop: hop.max(1),
            forward,
            inverse,
            window: hann(size),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn hop(&self) -> usize {
        self.hop
    }

    /// Number of non-negative frequency bins per frame
    pub fn bins(&self) -> usize {
        self.size / 2 + 1
    }

    /// Center frequency of a bin in Hz
    pub fn bin_frequency(&self, bin: usize, sample_rate: u32) -> f32 {
        bin as f32 * sample_rate as f32 / self.size as f32
    }

    /// Frames on the centered grid for a signal of `len` samples
    pub fn frame_count(&self, len: usize) -> usize {
        if len == 0 {
            0
        } else {
            1 + (len - 1) / self.hop
        }
    }

    /// Half spectra (`bins()` values) of every frame
    pub fn spectra(&self, samples: &[f32]) -> Vec<Vec<Complex<f32>>> {
        let mut buffer = vec![Complex::new(0.0, 0.0); self.size];
        (0..self.frame_count(samples.len()))
            .map(|frame| {
                self.load_frame(samples, frame, &mut buffer);
                self.forward.process(&mut buffer);
                buffer[..self.bins()].to_vec()
            })
            .collect()
    }

    /// Power spectra (`bins()` values) of every frame
    pub fn power_frames(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut buffer = vec![Complex::new(0.0, 0.0); self.size];
        (0..self.frame_count(samples.len()))
            .map(|frame| {
                self.load_frame(samples, frame, &mut buffer);
                self.forward.process(&mut buffer);
                buffer[..self.bins()].iter().map(|c| c.norm_sqr()).collect()
            })
            .collect()
    }

    /// Resynthesize `len` samples from half spectra by weighted overlap-add
    pub fn inverse(&self, spectra: &[Vec<Complex<f32>>], len: usize) -> Vec<f32> {
        let mut output = vec![0.0f32; len];
        let mut norm = vec![0.0f32; len];
        let mut buffer = vec![Complex::new(0.0, 0.0); self.size];
        let half = self.bins();
        let scale = 1.0 / self.size as f32;

        for (frame, spectrum) in spectra.iter().enumerate() {
            for (k, slot) in buffer.iter_mut().enumerate() {
                *slot = if k < half {
                    spectrum.get(k).copied().unwrap_or_default()
                } else {
                    spectrum
                        .get(self.size - k)
                        .map(|c| c.conj())
                        .unwrap_or_default()
                };
            }
            self.inverse.process(&mut buffer);

            let start = self.frame_start(frame);
            for (i, (c, w)) in buffer.iter().zip(&self.window).enumerate() {
                let pos = start + i as isize;
                if pos < 0 || pos as usize >= len {
                    continue;
                }
                let pos = pos as usize;
                output[pos] += c.re * scale * w;
                norm[pos] += w * w;
            }
        }

        for (sample, n) in output.iter_mut().zip(&norm) {
            if *n > 1e-8 {
                *sample /= n;
            }
        }
        output
    }

    fn frame_start(&self, frame: usize) -> isize {
        (frame * self.hop) as isize - (self.size / 2) as isize
    }

    fn load_frame(&self, samples: &[f32], frame: usize, buffer: &mut [Complex<f32>]) {
        let start = self.frame_start(frame);
        for (i, (slot, w)) in buffer.iter_mut().zip(&self.window).enumerate() {
            let pos = start + i as isize;
            let sample = if pos >= 0 {
                samples.get(pos as usize).copied().unwrap_or(0.0)
            } else {
                0.0
            };
            *slot = Complex::new(sample * w, 0.0);
        }
    }
}
