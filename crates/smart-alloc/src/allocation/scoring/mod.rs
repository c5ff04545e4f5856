mod config;
mod fallback;
pub mod model;

pub use config::{PredictorConfig, ScoringPolicy};
pub use fallback::{domain_knowledge_prediction, domain_knowledge_score, DOMAIN_KNOWLEDGE_VERSION};
pub use model::{LoadedModel, ModelArtifact, ModelLoadError};

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::domain::StudentProfile;
use super::features::{ApplicantInput, FeatureExtractor, FeatureSchema, FeatureVector};
use model::InferenceError;

pub const MIN_PRIORITY_SCORE: f64 = 0.0;
pub const MAX_PRIORITY_SCORE: f64 = 100.0;

/// Confidence reported by models that cannot estimate their own dispersion.
const DEFAULT_MODEL_CONFIDENCE: f64 = 0.9;
/// Ensemble variance that maps to zero confidence.
const REFERENCE_VARIANCE: f64 = 100.0;

/// Fatal misconfiguration between the extractor and the loaded model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("feature schema mismatch: extractor produces {extractor} features, model expects {model}")]
    SchemaMismatch {
        extractor: FeatureSchema,
        model: FeatureSchema,
    },
}

/// Errors surfaced by [`PriorityPredictor::predict`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PredictionError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("model unavailable: {reason}")]
    ModelUnavailable { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMethod {
    MlModel,
    DomainKnowledge,
}

/// Output of one scoring call; immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub score: f64,
    pub confidence: f64,
    pub feature_importance: BTreeMap<String, f64>,
    pub model_version: String,
    pub scoring_method: ScoringMethod,
    pub raw_score: f64,
}

/// A prediction together with the exact features that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredApplicant {
    pub features: FeatureVector,
    pub prediction: PredictionResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ModelStatus {
    Loaded,
    NotConfigured,
    NotFound,
    LoadFailed { reason: String },
}

/// Descriptive view of the predictor for status endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub schema: FeatureSchema,
    pub model_version: String,
    pub model_path: String,
    pub status: ModelStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimator: Option<String>,
    pub n_features: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_estimators: Option<usize>,
}

/// Scoring seam used by the allocation engine; mocked in tests.
pub trait PriorityScorer: Send + Sync {
    fn score(
        &self,
        profile: &StudentProfile,
        allow_fallback: bool,
    ) -> Result<ScoredApplicant, PredictionError>;

    fn model_info(&self) -> ModelInfo;
}

/// Wraps an optional trained model and the domain-knowledge fallback.
#[derive(Debug, Clone)]
pub struct PriorityPredictor {
    extractor: FeatureExtractor,
    model: Option<LoadedModel>,
    status: ModelStatus,
    model_version: String,
    model_path: PathBuf,
}

impl PriorityPredictor {
    /// Predictor that can only score through the fallback formula.
    pub fn without_model(config: &PredictorConfig) -> Self {
        Self {
            extractor: FeatureExtractor::new(config.schema, config.max_distance_km),
            model: None,
            status: ModelStatus::NotConfigured,
            model_version: config.model_version.clone(),
            model_path: config.model_path.clone(),
        }
    }

    /// Refuses construction when the model was fit on a different schema.
    pub fn with_model(
        config: &PredictorConfig,
        model: LoadedModel,
    ) -> Result<Self, ConfigurationError> {
        if model.schema() != config.schema {
            return Err(ConfigurationError::SchemaMismatch {
                extractor: config.schema,
                model: model.schema(),
            });
        }

        let mut predictor = Self::without_model(config);
        predictor.model = Some(model);
        predictor.status = ModelStatus::Loaded;
        Ok(predictor)
    }

    /// Loads the artifact from `config.model_path`.
    ///
    /// A missing or unreadable artifact leaves the predictor in fallback-only mode; a schema
    /// mismatch is returned as an error.
    pub fn load(config: &PredictorConfig) -> Result<Self, ConfigurationError> {
        match LoadedModel::load(&config.model_path) {
            Ok(model) => {
                let predictor = Self::with_model(config, model)?;
                info!(path = %config.model_path.display(), schema = %config.schema, "loaded priority model");
                Ok(predictor)
            }
            Err(ModelLoadError::NotFound { path }) => {
                warn!(path = %path.display(), "priority model not found, scoring limited to fallback");
                let mut predictor = Self::without_model(config);
                predictor.status = ModelStatus::NotFound;
                Ok(predictor)
            }
            Err(err @ ModelLoadError::LoadFailed { .. }) => {
                error!(error = %err, "priority model failed to load");
                let mut predictor = Self::without_model(config);
                predictor.status = ModelStatus::LoadFailed {
                    reason: err.to_string(),
                };
                Ok(predictor)
            }
        }
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    pub fn is_model_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub fn predict(
        &self,
        features: &FeatureVector,
        allow_fallback: bool,
    ) -> Result<PredictionResult, PredictionError> {
        if features.schema != self.extractor.schema() {
            return Err(ConfigurationError::SchemaMismatch {
                extractor: features.schema,
                model: self.extractor.schema(),
            }
            .into());
        }

        let reason = match &self.model {
            Some(model) => match self.ml_predict(model, features) {
                Ok(result) => return Ok(result),
                Err(err) => {
                    error!(error = %err, "model inference failed");
                    format!("model inference failed: {err}")
                }
            },
            None => "no trained model available".to_string(),
        };

        if allow_fallback {
            Ok(domain_knowledge_prediction(&features.derived))
        } else {
            Err(PredictionError::ModelUnavailable { reason })
        }
    }

    pub fn predict_input<'a>(
        &self,
        input: impl Into<ApplicantInput<'a>>,
        allow_fallback: bool,
    ) -> Result<ScoredApplicant, PredictionError> {
        let features = self.extractor.extract(input);
        let prediction = self.predict(&features, allow_fallback)?;
        Ok(ScoredApplicant {
            features,
            prediction,
        })
    }

    /// Scores every input; a failure for one applicant is reported inline.
    pub fn batch_predict(
        &self,
        inputs: &[ApplicantInput<'_>],
        allow_fallback: bool,
    ) -> Vec<Result<PredictionResult, PredictionError>> {
        inputs
            .iter()
            .map(|input| {
                self.predict_input(*input, allow_fallback)
                    .map(|scored| scored.prediction)
            })
            .collect()
    }

    fn ml_predict(
        &self,
        model: &LoadedModel,
        features: &FeatureVector,
    ) -> Result<PredictionResult, InferenceError> {
        let output = model.predict(&features.values)?;
        let confidence = match output.member_predictions.as_deref() {
            Some(members) => ensemble_confidence(members),
            None => DEFAULT_MODEL_CONFIDENCE,
        };

        Ok(PredictionResult {
            score: round_to(clamp_score(output.value), 2),
            confidence: round_to(confidence, 4),
            feature_importance: self.feature_importance(model),
            model_version: self.model_version.clone(),
            scoring_method: ScoringMethod::MlModel,
            raw_score: round_to(output.value, 2),
        })
    }

    fn feature_importance(&self, model: &LoadedModel) -> BTreeMap<String, f64> {
        match model.artifact.feature_importances() {
            Some(importances) => model
                .schema()
                .feature_names()
                .iter()
                .zip(importances)
                .map(|(name, weight)| (name.to_string(), round_to(*weight, 4)))
                .collect(),
            None => FeatureSchema::Legacy
                .feature_names()
                .iter()
                .map(|name| (name.to_string(), 0.20))
                .collect(),
        }
    }
}

impl PriorityScorer for PriorityPredictor {
    fn score(
        &self,
        profile: &StudentProfile,
        allow_fallback: bool,
    ) -> Result<ScoredApplicant, PredictionError> {
        self.predict_input(profile, allow_fallback)
    }

    fn model_info(&self) -> ModelInfo {
        let (estimator, n_estimators) = match &self.model {
            Some(model) => {
                let n_estimators = match &model.artifact.estimator {
                    model::Estimator::RandomForest { trees, .. } => Some(trees.len()),
                    model::Estimator::Linear { .. } => None,
                };
                (Some(model.artifact.estimator.kind().to_string()), n_estimators)
            }
            None => (None, None),
        };

        ModelInfo {
            schema: self.extractor.schema(),
            model_version: self.model_version.clone(),
            model_path: self.model_path.display().to_string(),
            status: self.status.clone(),
            estimator,
            n_features: self.extractor.schema().len(),
            n_estimators,
        }
    }
}

/// Lower dispersion across ensemble members means higher confidence.
fn ensemble_confidence(members: &[f64]) -> f64 {
    if members.is_empty() {
        return DEFAULT_MODEL_CONFIDENCE;
    }
    let n = members.len() as f64;
    let mean = members.iter().sum::<f64>() / n;
    let variance = members.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
    (1.0 - variance / REFERENCE_VARIANCE).max(0.0)
}

pub(crate) fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        return MIN_PRIORITY_SCORE;
    }
    score.clamp(MIN_PRIORITY_SCORE, MAX_PRIORITY_SCORE)
}

pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
