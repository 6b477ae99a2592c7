//! Offline replay of audio files through the detector

use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

use crate::source::AudioWindow;

/// Errors that can occur while decoding a file
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No audio track found in file")]
    NoAudioTrack,
    #[error("Decode error: {0}")]
    Decode(String),
}

/// One analysis window cut from a file
#[derive(Debug, Clone, PartialEq)]
pub struct TimedWindow {
    /// Position of the window's last sample, in seconds
    pub end_secs: f32,
    pub window: AudioWindow,
}

/// A decoded mono file, cut into overlapping windows
pub struct FileReplay {
    samples: Vec<f32>,
    sample_rate: u32,
    window_len: usize,
    hop_len: usize,
}

impl FileReplay {
    /// Decode `path` to mono at its native rate
    pub fn open(path: &Path, window_secs: f32, hop_secs: f32) -> Result<Self, DecodeError> {
        let (samples, sample_rate) = decode_mono(path)?;
        tracing::info!(
            path = %path.display(),
            sample_rate,
            duration_secs = samples.len() as f32 / sample_rate.max(1) as f32,
            "file decoded"
        );
        Ok(Self::from_samples(samples, sample_rate, window_secs, hop_secs))
    }

    /// Wrap already decoded mono samples
    pub fn from_samples(samples: Vec<f32>, sample_rate: u32, window_secs: f32, hop_secs: f32) -> Self {
        let to_len = |secs: f32| ((secs.max(0.0) * sample_rate as f32).round() as usize).max(1);
        Self {
            samples,
            sample_rate,
            window_len: to_len(window_secs),
            hop_len: to_len(hop_secs),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.samples.len() as f32 / self.sample_rate as f32
        }
    }

    pub fn window_len(&self) -> usize {
        self.window_len
    }

    pub fn hop_len(&self) -> usize {
        self.hop_len
    }

    /// Full windows stepping by the hop; a file shorter than one window
    /// yields a single window holding all of it
    pub fn windows(&self) -> impl Iterator<Item = TimedWindow> + '_ {
        let total = self.samples.len();
        let count = if total == 0 {
            0
        } else if total <= self.window_len {
            1
        } else {
            1 + (total - self.window_len) / self.hop_len
        };

        (0..count).map(move |i| {
            let start = i * self.hop_len;
            let end = (start + self.window_len).min(total);
            TimedWindow {
                end_secs: end as f32 / self.sample_rate.max(1) as f32,
                window: AudioWindow::new(self.samples[start..end].to_vec(), self.sample_rate),
            }
        })
    }
}

fn decode_mono(path: &Path) -> Result<(Vec<f32>, u32), DecodeError> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let opened = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DecodeError::Decode(e.to_string()))?;
    let mut format = opened.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoAudioTrack)?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| DecodeError::Decode("unknown sample rate".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::Decode(e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();
    loop {
        // End of stream surfaces as an error
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(_) => break,
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(e) => {
                tracing::debug!(error = %e, "skipping undecodable packet");
                continue;
            }
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        let scale = 1.0 / channels as f32;
        samples.extend(
            sample_buf
                .samples()
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() * scale),
        );
    }

    Ok((samples, sample_rate))
}
