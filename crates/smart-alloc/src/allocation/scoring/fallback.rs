use std::collections::BTreeMap;

use super::super::features::DerivedFeatures;
use super::{clamp_score, round_to, PredictionResult, ScoringMethod};

pub const DOMAIN_KNOWLEDGE_VERSION: &str = "domain_knowledge_v1";
const DOMAIN_KNOWLEDGE_CONFIDENCE: f64 = 0.85;

const GPA_WEIGHT: f64 = 0.40;
const DISTANCE_WEIGHT: f64 = 0.30;
const LEVEL_WEIGHT: f64 = 0.20;
const NEED_WEIGHT: f64 = 0.10;
const MAX_LEVEL_TIER: f64 = 5.0;

/// Deterministic weighted score: GPA 40%, distance 30%, level 20%, need 10%.
///
/// Need is binary: either a disability or financial need contributes the full share.
pub fn domain_knowledge_score(derived: &DerivedFeatures) -> f64 {
    let gpa = derived.gpa_normalized * GPA_WEIGHT * 100.0;
    let distance = derived.distance_transformed * DISTANCE_WEIGHT * 100.0;
    let level = (derived.level_encoded / MAX_LEVEL_TIER) * LEVEL_WEIGHT * 100.0;
    let need = if derived.disability_flag + derived.financial_aid_flag > 0.0 {
        NEED_WEIGHT * 100.0
    } else {
        0.0
    };

    let total = gpa + distance + level + need;
    if total.is_finite() {
        clamp_score(total)
    } else {
        0.0
    }
}

pub(crate) fn domain_knowledge_importance() -> BTreeMap<String, f64> {
    [
        ("gpa_normalized", 0.40),
        ("distance_transformed", 0.30),
        ("level_encoded", 0.20),
        ("disability_flag", 0.05),
        ("financial_aid_flag", 0.05),
    ]
    .into_iter()
    .map(|(name, weight)| (name.to_string(), weight))
    .collect()
}

pub fn domain_knowledge_prediction(derived: &DerivedFeatures) -> PredictionResult {
    let score = round_to(domain_knowledge_score(derived), 2);

    PredictionResult {
        score,
        confidence: DOMAIN_KNOWLEDGE_CONFIDENCE,
        feature_importance: domain_knowledge_importance(),
        model_version: DOMAIN_KNOWLEDGE_VERSION.to_string(),
        scoring_method: ScoringMethod::DomainKnowledge,
        raw_score: score,
    }
}
