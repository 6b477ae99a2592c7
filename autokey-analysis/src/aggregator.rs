//! Short/long rolling chroma history

use std::collections::VecDeque;

use crate::chroma::Chroma;
use crate::config::AggregatorConfig;

/// Blends recent chroma vectors into one stable estimate
#[derive(Debug, Clone, PartialEq)]
pub struct TemporalAggregator {
    config: AggregatorConfig,
    short: VecDeque<Chroma>,
    long: VecDeque<Chroma>,
}

impl TemporalAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            short: VecDeque::with_capacity(config.short_len),
            long: VecDeque::with_capacity(config.long_len),
            config,
        }
    }

    /// Record this tick's chroma and return the aggregated vector
    pub fn push(&mut self, chroma: Chroma) -> Chroma {
        push_bounded(&mut self.short, chroma, self.config.short_len);
        push_bounded(&mut self.long, chroma, self.config.long_len);

        if self.short.len() < self.config.min_short {
            return chroma;
        }

        let short_mean = mean(&self.short);
        if self.long.len() < self.config.min_long {
            return Chroma::normalized(short_mean);
        }

        let long_mean = mean(&self.long);
        let w = self.config.short_weight;
        let mut blended = [0.0f32; 12];
        for (i, slot) in blended.iter_mut().enumerate() {
            *slot = w * short_mean[i] + (1.0 - w) * long_mean[i];
        }
        Chroma::normalized(blended)
    }

    pub fn clear(&mut self) {
        self.short.clear();
        self.long.clear();
    }

    /// Number of ticks in the long history
    pub fn len(&self) -> usize {
        self.long.len()
    }

    pub fn is_empty(&self) -> bool {
        self.long.is_empty()
    }

    pub fn short_len(&self) -> usize {
        self.short.len()
    }
}

fn push_bounded(ring: &mut VecDeque<Chroma>, chroma: Chroma, capacity: usize) {
    while ring.len() >= capacity {
        ring.pop_front();
    }
    ring.push_back(chroma);
}

fn mean(ring: &VecDeque<Chroma>) -> [f32; 12] {
    let mut sum = [0.0f32; 12];
    for chroma in ring {
        for (slot, v) in sum.iter_mut().zip(chroma.bins()) {
            *slot += v;
        }
    }
    let n = ring.len().max(1) as f32;
    sum.map(|v| v / n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(pc: usize) -> Chroma {
        let mut raw = [0.0f32; 12];
        raw[pc] = 1.0;
        Chroma::normalized(raw)
    }

    #[test]
    fn test_latest_used_until_short_fills() {
        let mut agg = TemporalAggregator::new(AggregatorConfig::default());
        assert_eq!(agg.push(unit(0)), unit(0));
        assert_eq!(agg.push(unit(1)), unit(1));
        assert_eq!(agg.push(unit(2)), unit(2));
        // Fourth entry switches to the short mean
        let out = agg.push(unit(3));
        for pc in 0..4 {
            assert!((out[pc] - 0.5).abs() < 1e-5);
        }
    }

    #[test]
    fn test_blend_weights_short_history() {
        let mut agg = TemporalAggregator::new(AggregatorConfig::default());
        // Long history full of C, then a short burst of G
        for _ in 0..60 {
            agg.push(unit(0));
        }
        let mut out = Chroma::zero();
        for _ in 0..20 {
            out = agg.push(unit(7));
        }
        // short mean = G, long mean = 2/3 C + 1/3 G
        // blend = 0.6 G + 0.4 (2/3 C + 1/3 G)
        let g: f32 = 0.6 + 0.4 / 3.0;
        let c: f32 = 0.4 * 2.0 / 3.0;
        let norm = (g * g + c * c).sqrt();
        assert!((out[7] - g / norm).abs() < 1e-4);
        assert!((out[0] - c / norm).abs() < 1e-4);
        assert!((out.norm() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_rings_are_bounded() {
        let mut agg = TemporalAggregator::new(AggregatorConfig::default());
        for i in 0..100 {
            agg.push(unit(i % 12));
        }
        assert_eq!(agg.len(), 60);
        assert_eq!(agg.short_len(), 20);
    }

    #[test]
    fn test_clear() {
        let mut agg = TemporalAggregator::new(AggregatorConfig::default());
        for _ in 0..10 {
            agg.push(unit(4));
        }
        agg.clear();
        assert!(agg.is_empty());
        assert_eq!(agg.short_len(), 0);
        assert_eq!(agg.push(unit(9)), unit(9));
    }
}
