//! Key profile correlation
//!
//! Scores a chroma vector against every profile in the bank:
//! 1. For each profile, try all 12 rotations in both modes and keep the best
//! 2. Sum the weighted best scores per key across profiles
//! 3. Turn the winner's score and its lead over the runner-up into a confidence

use std::sync::Arc;

use crate::chroma::Chroma;
use crate::config::CorrelatorConfig;
use crate::error::AnalysisError;
use crate::key::{Key, KeyCandidate, PitchClass};
use crate::profiles::ProfileBank;

/// Best match of a single profile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileMatch {
    pub profile: &'static str,
    pub key: Key,
    /// Unweighted dot product with the winning template
    pub score: f32,
}

/// Key with its weighted score summed across profiles
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedKey {
    pub key: Key,
    pub score: f32,
}

/// Correlates chroma against a profile bank
#[derive(Debug, Clone)]
pub struct Correlator {
    bank: Arc<ProfileBank>,
    config: CorrelatorConfig,
}

impl Correlator {
    pub fn new(config: CorrelatorConfig) -> Self {
        Self::with_bank(ProfileBank::standard(), config)
    }

    /// Score against a custom bank instead of the standard one
    pub fn with_bank(bank: Arc<ProfileBank>, config: CorrelatorConfig) -> Self {
        Self { bank, config }
    }

    /// Best (rotation, mode) of every profile, in bank order
    pub fn profile_matches(&self, chroma: &Chroma) -> Vec<ProfileMatch> {
        let rotations: Vec<Chroma> = (0..12).map(|root| chroma.rotated(root)).collect();

        self.bank
            .profiles()
            .iter()
            .filter_map(|profile| {
                let mut best: Option<(Key, f32)> = None;
                for (root, rotated) in rotations.iter().enumerate() {
                    let tonic = PitchClass::wrapping(root as i32);
                    // Strictly greater wins: ties go to the lower root, major first
                    for (key, template) in [
                        (Key::major(tonic), &profile.major),
                        (Key::minor(tonic), &profile.minor),
                    ] {
                        let score = rotated.dot(template);
                        if best.map_or(true, |(_, b)| score > b) {
                            best = Some((key, score));
                        }
                    }
                }
                best.map(|(key, score)| ProfileMatch {
                    profile: profile.name,
                    key,
                    score,
                })
            })
            .collect()
    }

    /// Keys ranked by their weighted score, best first
    ///
    /// Only keys that won at least one profile appear. Equal scores keep the
    /// order in which profiles first voted for them.
    pub fn rank(&self, chroma: &Chroma) -> Result<Vec<RankedKey>, AnalysisError> {
        if chroma.is_zero() {
            return Err(AnalysisError::DegenerateChroma);
        }

        let mut ranked: Vec<RankedKey> = Vec::with_capacity(self.bank.len());
        for (profile, matched) in self
            .bank
            .profiles()
            .iter()
            .zip(self.profile_matches(chroma))
        {
            let weighted = profile.weight * matched.score;
            match ranked.iter_mut().find(|r| r.key == matched.key) {
                Some(entry) => entry.score += weighted,
                None => ranked.push(RankedKey {
                    key: matched.key,
                    score: weighted,
                }),
            }
        }

        if ranked.iter().any(|r| !r.score.is_finite()) {
            return Err(AnalysisError::NonFinite("profile scores"));
        }

        // Stable: ties keep profile order
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(ranked)
    }

    /// Winning key with its calibrated confidence
    pub fn correlate(&self, chroma: &Chroma) -> Result<KeyCandidate, AnalysisError> {
        let ranked = self.rank(chroma)?;
        let best = ranked.first().ok_or(AnalysisError::DegenerateChroma)?;
        let runner_up = ranked.get(1).map_or(0.0, |r| r.score);

        let separation = best.score - runner_up;
        let confidence = ((best.score / self.config.calibration)
            * (1.0 + separation * self.config.separation_gain))
            .clamp(0.0, 1.0);

        Ok(KeyCandidate {
            key: best.key,
            score: best.score,
            confidence,
        })
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new(CorrelatorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Mode;
    use crate::profiles::KeyProfile;

    /// Chroma of a C major triad with passing scale tones
    fn c_major_chroma() -> Chroma {
        let mut raw = [0.0f32; 12];
        raw[0] = 1.0; // C
        raw[2] = 0.3; // D
        raw[4] = 0.8; // E
        raw[5] = 0.3; // F
        raw[7] = 0.9; // G
        raw[9] = 0.3; // A
        raw[11] = 0.3; // B
        Chroma::normalized(raw)
    }

    fn shifted(chroma: &Chroma, semitones: usize) -> Chroma {
        // rotated(k) moves pitch k to index 0, so rotate the other way to transpose up
        chroma.rotated((12 - semitones % 12) % 12)
    }

    #[test]
    fn test_c_major_detected() {
        let correlator = Correlator::default();
        let candidate = correlator.correlate(&c_major_chroma()).unwrap();
        assert_eq!(candidate.key, Key::major(PitchClass::C));
        assert!(candidate.confidence > 0.8);
    }

    #[test]
    fn test_custom_bank() {
        let triads = KeyProfile::new(
            "triads",
            1.0,
            [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0],
        );
        let bank = Arc::new(ProfileBank::new(vec![triads]).unwrap());
        let correlator = Correlator::with_bank(bank, CorrelatorConfig::default());

        let matches = correlator.profile_matches(&c_major_chroma());
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].profile, "triads");
        assert_eq!(matches[0].key, Key::major(PitchClass::C));

        let ranked = correlator.rank(&c_major_chroma()).unwrap();
        assert_eq!(ranked[0].key, Key::major(PitchClass::C));
    }

    #[test]
    fn test_transposed_input_follows() {
        let correlator = Correlator::default();
        let g_major = shifted(&c_major_chroma(), 7);
        let candidate = correlator.correlate(&g_major).unwrap();
        assert_eq!(candidate.key, Key::major(PitchClass::wrapping(7)));
    }

    #[test]
    fn test_a_minor_detected() {
        let mut raw = [0.0f32; 12];
        raw[9] = 1.0; // A
        raw[0] = 0.8; // C
        raw[4] = 0.9; // E
        raw[11] = 0.2;
        raw[2] = 0.3;
        raw[5] = 0.2;
        let candidate = Correlator::default()
            .correlate(&Chroma::normalized(raw))
            .unwrap();
        assert_eq!(candidate.key, Key::minor(PitchClass::A));
        assert_eq!(candidate.key.mode, Mode::Minor);
    }

    #[test]
    fn test_zero_chroma_rejected() {
        let correlator = Correlator::default();
        assert_eq!(
            correlator.correlate(&Chroma::zero()),
            Err(AnalysisError::DegenerateChroma)
        );
        assert!(correlator.profile_matches(&Chroma::zero()).len() == 3);
    }

    #[test]
    fn test_confidence_in_unit_range() {
        let correlator = Correlator::default();
        // A spread of arbitrary unit chroma vectors
        for seed in 0..64u32 {
            let mut raw = [0.0f32; 12];
            let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
            for v in &mut raw {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                *v = (state % 1000) as f32 / 1000.0;
            }
            let chroma = Chroma::normalized(raw);
            if chroma.is_zero() {
                continue;
            }
            let candidate = correlator.correlate(&chroma).unwrap();
            assert!((0.0..=1.0).contains(&candidate.confidence));
        }
    }

    #[test]
    fn test_rotation_by_twelve_keeps_scores() {
        let correlator = Correlator::default();
        let chroma = c_major_chroma();
        assert_eq!(
            correlator.profile_matches(&chroma),
            correlator.profile_matches(&chroma.rotated(12))
        );
    }

    #[test]
    fn test_flat_chroma_ties_break_to_c_major() {
        // Every rotation scores the same; the first one (C, major) must win
        let flat = Chroma::normalized([1.0; 12]);
        let matches = Correlator::default().profile_matches(&flat);
        for m in &matches {
            assert_eq!(m.key.tonic, PitchClass::C);
        }
    }

    #[test]
    fn test_rank_sorted_descending() {
        let ranked = Correlator::default().rank(&c_major_chroma()).unwrap();
        assert!(!ranked.is_empty());
        for pair in ranked.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }
}
