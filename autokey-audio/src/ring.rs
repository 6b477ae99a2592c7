//! Shared capture ring
//!
//! The capture callback pushes into the ring; the detection thread copies a
//! snapshot out of it. Both sides take the same short lock. When full, the
//! oldest samples are overwritten.

use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};

use crate::source::AudioWindow;

/// Default amount of audio kept, in seconds
pub const DEFAULT_BUFFER_SECS: f32 = 4.0;

struct RingInner {
    samples: HeapRb<f32>,
    sample_rate: u32,
    /// Bumped on every rebind
    generation: u64,
}

/// Fixed-capacity mono sample ring shared by producer and consumer
pub struct SampleRing {
    inner: Mutex<RingInner>,
    buffer_secs: f32,
}

impl SampleRing {
    pub fn new(sample_rate: u32, buffer_secs: f32) -> Self {
        Self {
            inner: Mutex::new(RingInner {
                samples: HeapRb::new(capacity_for(sample_rate, buffer_secs)),
                sample_rate,
                generation: 0,
            }),
            buffer_secs,
        }
    }

    /// Append mono samples, overwriting the oldest when full
    pub fn push(&self, samples: &[f32]) {
        let mut inner = self.inner.lock();
        inner.samples.push_slice_overwrite(samples);
    }

    /// Append interleaved frames, averaging channels down to mono
    pub fn push_interleaved(&self, data: &[f32], channels: usize) {
        if channels <= 1 {
            self.push(data);
            return;
        }
        let scale = 1.0 / channels as f32;
        let mut inner = self.inner.lock();
        inner.samples.push_iter_overwrite(
            data.chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() * scale),
        );
    }

    /// Snapshot of everything currently buffered
    pub fn window(&self) -> AudioWindow {
        let inner = self.inner.lock();
        let samples: Vec<f32> = inner.samples.iter().copied().collect();
        AudioWindow::new(samples, inner.sample_rate)
    }

    /// Clear and resize for a new sample rate
    pub fn rebind(&self, sample_rate: u32) {
        let mut inner = self.inner.lock();
        inner.samples = HeapRb::new(capacity_for(sample_rate, self.buffer_secs));
        inner.sample_rate = sample_rate;
        inner.generation += 1;
    }

    /// Number of rebinds so far; changes whenever the stream restarts
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    pub fn clear(&self) {
        self.inner.lock().samples.clear();
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.lock().sample_rate
    }

    /// Samples currently buffered
    pub fn len(&self) -> usize {
        self.inner.lock().samples.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum samples held
    pub fn capacity(&self) -> usize {
        self.inner.lock().samples.capacity().get()
    }
}

fn capacity_for(sample_rate: u32, buffer_secs: f32) -> usize {
    ((sample_rate as f32 * buffer_secs) as usize).max(1)
}
