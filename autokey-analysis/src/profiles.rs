//! Key profile templates
//!
//! Each profile is a pair of 12-element templates (major, minor) rooted on C,
//! describing how strongly each pitch class is expected relative to the
//! tonic. Templates are unit-normalized once when the bank is built.

use std::sync::{Arc, OnceLock};

use crate::error::ConfigError;

/// Electronic/pop profile derived from EDM material
const EDMA_MAJOR: [f32; 12] = [
    0.165_195_51, 0.047_490_26, 0.082_930_76, 0.066_871_12, 0.099_946_45, 0.092_741_23,
    0.052_944_87, 0.131_594_76, 0.052_189_86, 0.074_436_53, 0.069_407_23, 0.064_241_52,
];
const EDMA_MINOR: [f32; 12] = [
    0.172_353_48, 0.053_364_89, 0.077_034_78, 0.109_897_45, 0.050_919_88, 0.096_320_16,
    0.047_871_13, 0.134_182_95, 0.090_701_86, 0.057_657_57, 0.072_760_66, 0.066_935_19,
];

/// Ibrahim Sha'ath's balanced profile
const SHAATH_MAJOR: [f32; 12] = [6.6, 2.0, 3.5, 2.3, 4.6, 4.0, 2.5, 5.2, 2.4, 3.7, 2.3, 3.0];
const SHAATH_MINOR: [f32; 12] = [6.5, 2.8, 3.5, 5.4, 2.7, 3.5, 2.5, 5.2, 4.0, 2.7, 4.3, 3.2];

/// Temperley's rock/pop profile
const TEMPERLEY_MAJOR: [f32; 12] = [5.0, 2.0, 3.5, 2.0, 4.5, 4.0, 2.0, 4.5, 2.0, 3.5, 1.5, 4.0];
const TEMPERLEY_MINOR: [f32; 12] = [5.0, 2.0, 3.5, 4.5, 2.0, 4.0, 2.0, 4.5, 3.5, 2.0, 1.5, 4.0];

/// One weighted (major, minor) template pair
#[derive(Debug, Clone, PartialEq)]
pub struct KeyProfile {
    pub name: &'static str,
    pub weight: f32,
    pub major: [f32; 12],
    pub minor: [f32; 12],
}

impl KeyProfile {
    /// Build a profile, unit-normalizing both templates
    pub fn new(name: &'static str, weight: f32, major: [f32; 12], minor: [f32; 12]) -> Self {
        Self {
            name,
            weight,
            major: unit(major),
            minor: unit(minor),
        }
    }
}

/// The weighted set of profiles the correlator scores against
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileBank {
    profiles: Vec<KeyProfile>,
}

static STANDARD: OnceLock<Arc<ProfileBank>> = OnceLock::new();

impl ProfileBank {
    /// Build a custom bank; weights must sum to 1
    pub fn new(profiles: Vec<KeyProfile>) -> Result<Self, ConfigError> {
        let total: f32 = profiles.iter().map(|p| p.weight).sum();
        if profiles.is_empty() || (total - 1.0).abs() > 1e-3 {
            return Err(ConfigError::ProfileWeights(total));
        }
        Ok(Self { profiles })
    }

    /// The standard EDMA / Sha'ath / Temperley bank, shared process-wide
    pub fn standard() -> Arc<ProfileBank> {
        STANDARD
            .get_or_init(|| {
                Arc::new(ProfileBank {
                    profiles: vec![
                        KeyProfile::new("edma", 0.45, EDMA_MAJOR, EDMA_MINOR),
                        KeyProfile::new("shaath", 0.35, SHAATH_MAJOR, SHAATH_MINOR),
                        KeyProfile::new("temperley", 0.20, TEMPERLEY_MAJOR, TEMPERLEY_MINOR),
                    ],
                })
            })
            .clone()
    }

    pub fn profiles(&self) -> &[KeyProfile] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

fn unit(template: [f32; 12]) -> [f32; 12] {
    let norm = template.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        template.map(|v| v / norm)
    } else {
        template
    }
}
