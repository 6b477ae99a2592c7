//! 12-bin pitch class energy vector

use std::ops::Index;

/// Pitch class energy profile, index 0 = C
///
/// Always either unit length (L2) or exactly zero.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Chroma([f32; 12]);

impl Chroma {
    pub fn zero() -> Self {
        Self([0.0; 12])
    }

    /// Normalize raw energies to unit length
    ///
    /// Negative energies are clamped to zero first. Zero total energy (or
    /// any non-finite input) yields the zero vector.
    pub fn normalized(raw: [f32; 12]) -> Self {
        let mut bins = raw.map(|v| if v.is_finite() { v.max(0.0) } else { 0.0 });
        let norm = bins.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 && norm.is_finite() {
            for v in &mut bins {
                *v /= norm;
            }
            Self(bins)
        } else {
            Self::zero()
        }
    }

    pub fn bins(&self) -> &[f32; 12] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&v| v == 0.0)
    }

    pub fn norm(&self) -> f32 {
        self.0.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Rotate so that pitch class `shift` lands at index 0
    ///
    /// Rotation is cyclic: a shift of 12 is the identity.
    pub fn rotated(&self, shift: usize) -> Self {
        let mut rotated = [0.0f32; 12];
        for (i, slot) in rotated.iter_mut().enumerate() {
            *slot = self.0[(i + shift) % 12];
        }
        Self(rotated)
    }

    pub fn dot(&self, other: &[f32; 12]) -> f32 {
        self.0.iter().zip(other).map(|(a, b)| a * b).sum()
    }

    /// Pitch class with the most energy
    pub fn dominant(&self) -> Option<usize> {
        if self.is_zero() {
            return None;
        }
        self.0
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
    }
}

impl Index<usize> for Chroma {
    type Output = f32;

    fn index(&self, index: usize) -> &f32 {
        &self.0[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_is_unit() {
        let chroma = Chroma::normalized([1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
        assert!((chroma.norm() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_zero_energy_stays_zero() {
        let chroma = Chroma::normalized([0.0; 12]);
        assert!(chroma.is_zero());
        assert_eq!(chroma.dominant(), None);
    }

    #[test]
    fn test_non_finite_collapses() {
        let mut raw = [0.0; 12];
        raw[0] = f32::NAN;
        raw[3] = f32::INFINITY;
        assert!(Chroma::normalized(raw).is_zero());
    }

    #[test]
    fn test_rotate_chroma() {
        let chroma = Chroma([1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);

        assert_eq!(chroma.rotated(0), chroma);
        assert_eq!(chroma.rotated(12), chroma);

        let rotated = chroma.rotated(1);
        assert_eq!(rotated[0], 2.0); // Was at index 1
        assert_eq!(rotated[11], 1.0); // Was at index 0
    }

    #[test]
    fn test_dominant() {
        let mut raw = [0.1; 12];
        raw[7] = 2.0;
        assert_eq!(Chroma::normalized(raw).dominant(), Some(7));
    }
}
