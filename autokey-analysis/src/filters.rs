//! Median and smoothing filters with clamped edges

/// Median of a scratch buffer (reorders it)
pub fn median(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mid = values.len() / 2;
    let (_, m, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    *m
}

/// Sliding median over a 1-D signal
///
/// Positions outside the signal repeat the nearest edge value.
pub fn median_filter(input: &[f32], kernel: usize) -> Vec<f32> {
    let n = input.len();
    if n == 0 || kernel <= 1 {
        return input.to_vec();
    }
    let half = (kernel / 2) as isize;
    let mut scratch = vec![0.0f32; 2 * half as usize + 1];
    (0..n as isize)
        .map(|center| {
            for (slot, offset) in scratch.iter_mut().zip(-half..=half) {
                let idx = (center + offset).clamp(0, n as isize - 1) as usize;
                *slot = input[idx];
            }
            median(&mut scratch)
        })
        .collect()
}

/// Per-bin sliding median of a chroma sequence across time
pub fn median_filter_frames(frames: &[[f32; 12]], kernel: usize) -> Vec<[f32; 12]> {
    let mut out = vec![[0.0f32; 12]; frames.len()];
    for bin in 0..12 {
        let column: Vec<f32> = frames.iter().map(|f| f[bin]).collect();
        for (frame, value) in out.iter_mut().zip(median_filter(&column, kernel)) {
            frame[bin] = value;
        }
    }
    out
}

/// Per-bin Hann smoothing of a chroma sequence across time
///
/// The window is normalized by its full sum, so frames near the edges fade.
pub fn hann_smooth_frames(frames: &[[f32; 12]], length: usize) -> Vec<[f32; 12]> {
    if length <= 1 || frames.is_empty() {
        return frames.to_vec();
    }
    // Symmetric window without zero endpoints
    let window: Vec<f32> = (0..length)
        .map(|i| {
            let x = (i + 1) as f32 / (length + 1) as f32;
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * x).cos())
        })
        .collect();
    let total: f32 = window.iter().sum();
    let half = (length / 2) as isize;
    let n = frames.len() as isize;

    (0..n)
        .map(|center| {
            let mut acc = [0.0f32; 12];
            for (w_idx, w) in window.iter().enumerate() {
                let src = center + w_idx as isize - half;
                if src < 0 || src >= n {
                    continue;
                }
                for (slot, v) in acc.iter_mut().zip(&frames[src as usize]) {
                    *slot += v * w;
                }
            }
            acc.map(|v| v / total)
        })
        .collect()
}
