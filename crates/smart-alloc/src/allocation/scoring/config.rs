use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::super::domain::StudentProfile;
use super::super::features::{FeatureSchema, DEFAULT_MAX_DISTANCE_KM};
use super::clamp_score;

pub const DEFAULT_MODEL_VERSION: &str = "v1.0.0";
pub const DEFAULT_SENIORITY_BOOST: f64 = 1.2;
pub const DEFAULT_DISABILITY_FLOOR: f64 = 95.0;

/// Where the predictor looks for its artifact and which schema it expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictorConfig {
    pub schema: FeatureSchema,
    pub model_path: PathBuf,
    pub model_version: String,
    pub max_distance_km: f64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            schema: FeatureSchema::Extended,
            model_path: PathBuf::from("models"),
            model_version: DEFAULT_MODEL_VERSION.to_string(),
            max_distance_km: DEFAULT_MAX_DISTANCE_KM,
        }
    }
}

/// Business adjustments applied on top of the predicted score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringPolicy {
    /// Multiplier for applicants at level 400 or 500.
    pub seniority_boost: Option<f64>,
    /// Minimum final score for applicants with a disability.
    pub disability_floor: Option<f64>,
}

impl ScoringPolicy {
    /// Policy that leaves predicted scores untouched.
    pub const fn none() -> Self {
        Self {
            seniority_boost: None,
            disability_floor: None,
        }
    }

    /// Final score for an applicant given the predicted one, clamped to the score range.
    pub fn apply(&self, profile: &StudentProfile, predicted: f64) -> f64 {
        let mut adjusted = predicted;
        if let Some(boost) = self.seniority_boost {
            if matches!(profile.level, 400 | 500) {
                adjusted *= boost;
            }
        }
        if let Some(floor) = self.disability_floor {
            if profile.disability {
                adjusted = adjusted.max(floor);
            }
        }
        clamp_score(adjusted)
    }
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            seniority_boost: Some(DEFAULT_SENIORITY_BOOST),
            disability_floor: Some(DEFAULT_DISABILITY_FLOOR),
        }
    }
}
