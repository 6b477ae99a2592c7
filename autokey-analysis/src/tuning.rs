//! Reference tuning estimation
//!
//! Recordings are not always tuned to A4 = 440 Hz. Spectral peaks are
//! located, refined, and their offsets from the nearest equal-tempered pitch
//! collected in a power-weighted histogram; the busiest bin is the offset.

/// Reference frequency for A4 (440 Hz)
pub const A4_FREQ: f32 = 440.0;

/// Histogram bin width in semitones
pub const TUNING_RESOLUTION: f32 = 0.01;

/// Peaks weaker than this share of the strongest peak are ignored
const PEAK_FLOOR: f32 = 0.01;

/// Frequency range searched for peaks
const MIN_PEAK_FREQ: f32 = 55.0;
const MAX_PEAK_FREQ: f32 = 5000.0;

/// Fractional MIDI note number of a frequency
pub fn midi_from_freq(freq: f32) -> f32 {
    12.0 * (freq / A4_FREQ).log2() + 69.0
}

/// Tuning offset in semitones, in [-0.5, 0.5)
///
/// `power` is a (time-averaged) power spectrum with bins `bin_hz` apart.
/// Returns 0.0 when no usable peak exists.
pub fn estimate_tuning(power: &[f32], bin_hz: f32) -> f32 {
    let strongest = power.iter().cloned().fold(0.0f32, f32::max);
    if strongest <= 0.0 || !strongest.is_finite() || bin_hz <= 0.0 {
        return 0.0;
    }
    let floor = strongest * PEAK_FLOOR;

    let bins = (1.0 / TUNING_RESOLUTION).round() as usize;
    let mut histogram = vec![0.0f32; bins];
    let mut peaks = 0usize;

    for k in 1..power.len().saturating_sub(1) {
        let (left, center, right) = (power[k - 1], power[k], power[k + 1]);
        if center <= floor || center <= left || center < right {
            continue;
        }
        let freq = (k as f32 + interpolate_peak(left, center, right)) * bin_hz;
        if !(MIN_PEAK_FREQ..=MAX_PEAK_FREQ).contains(&freq) {
            continue;
        }
        let midi = midi_from_freq(freq);
        let deviation = midi - midi.round();
        let slot = ((deviation + 0.5) / TUNING_RESOLUTION).round() as usize % bins;
        histogram[slot] += center;
        peaks += 1;
    }

    if peaks == 0 {
        return 0.0;
    }

    let best = histogram
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map_or(bins / 2, |(i, _)| i);
    -0.5 + best as f32 * TUNING_RESOLUTION
}

/// Sub-bin offset of a peak by parabolic interpolation of log power
fn interpolate_peak(left: f32, center: f32, right: f32) -> f32 {
    let tiny = f32::MIN_POSITIVE;
    let (a, b, c) = (left.max(tiny).ln(), center.max(tiny).ln(), right.max(tiny).ln());
    let denom = a - 2.0 * b + c;
    if denom.abs() < 1e-12 {
        return 0.0;
    }
    (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
}
