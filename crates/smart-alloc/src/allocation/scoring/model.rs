//! Serialized regression models and their inference.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::super::features::FeatureSchema;

pub const MODEL_FILENAME: &str = "priority_model.json";
pub const SCALER_FILENAME: &str = "scaler.json";

/// Failure to obtain a model from storage, kept apart from inference failures.
#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("model artifact not found at {}", path.display())]
    NotFound { path: PathBuf },
    #[error("failed to load model artifact {}: {reason}", path.display())]
    LoadFailed { path: PathBuf, reason: String },
}

/// Failure while evaluating a loaded model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InferenceError {
    #[error("expected {expected} input values, received {found}")]
    InputLength { expected: usize, found: usize },
    #[error("tree {tree} is malformed: {detail}")]
    MalformedTree { tree: usize, detail: String },
    #[error("ensemble contains no estimators")]
    EmptyEnsemble,
    #[error("model produced a non-finite prediction")]
    NonFinite,
}

/// One node of a fitted regression tree. Samples with `x[feature] <= threshold` go left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// Flattened regression tree; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    pub nodes: Vec<TreeNode>,
}

impl RegressionTree {
    fn predict(&self, index: usize, input: &[f64]) -> Result<f64, InferenceError> {
        let malformed = |detail: String| InferenceError::MalformedTree {
            tree: index,
            detail,
        };

        let mut cursor = 0usize;
        // A well-formed tree reaches a leaf in fewer steps than it has nodes.
        for _ in 0..self.nodes.len() {
            let node = self
                .nodes
                .get(cursor)
                .ok_or_else(|| malformed(format!("node {cursor} does not exist")))?;
            match node {
                TreeNode::Leaf { value } => return Ok(*value),
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let x = input
                        .get(*feature)
                        .ok_or_else(|| malformed(format!("feature {feature} out of range")))?;
                    cursor = if *x <= *threshold { *left } else { *right };
                }
            }
        }

        Err(malformed("no leaf reached".to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Estimator {
    Linear {
        coefficients: Vec<f64>,
        intercept: f64,
    },
    RandomForest {
        trees: Vec<RegressionTree>,
        #[serde(default)]
        feature_importances: Option<Vec<f64>>,
    },
}

impl Estimator {
    pub fn kind(&self) -> &'static str {
        match self {
            Estimator::Linear { .. } => "linear",
            Estimator::RandomForest { .. } => "random_forest",
        }
    }
}

/// Raw model output plus per-member predictions for ensembles.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutput {
    pub value: f64,
    pub member_predictions: Option<Vec<f64>>,
}

/// Contents of `priority_model.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub schema: FeatureSchema,
    pub estimator: Estimator,
}

impl ModelArtifact {
    pub fn predict(&self, input: &[f64]) -> Result<ModelOutput, InferenceError> {
        let expected = self.schema.len();
        if input.len() != expected {
            return Err(InferenceError::InputLength {
                expected,
                found: input.len(),
            });
        }

        let output = match &self.estimator {
            Estimator::Linear {
                coefficients,
                intercept,
            } => {
                if coefficients.len() != expected {
                    return Err(InferenceError::InputLength {
                        expected: coefficients.len(),
                        found: input.len(),
                    });
                }
                let value = coefficients
                    .iter()
                    .zip(input)
                    .map(|(weight, x)| weight * x)
                    .sum::<f64>()
                    + intercept;
                ModelOutput {
                    value,
                    member_predictions: None,
                }
            }
            Estimator::RandomForest { trees, .. } => {
                if trees.is_empty() {
                    return Err(InferenceError::EmptyEnsemble);
                }
                let members = trees
                    .iter()
                    .enumerate()
                    .map(|(index, tree)| tree.predict(index, input))
                    .collect::<Result<Vec<_>, _>>()?;
                let value = members.iter().sum::<f64>() / members.len() as f64;
                ModelOutput {
                    value,
                    member_predictions: Some(members),
                }
            }
        };

        if !output.value.is_finite() {
            return Err(InferenceError::NonFinite);
        }
        Ok(output)
    }

    /// Native importances when the estimator carries one per feature.
    pub fn feature_importances(&self) -> Option<&[f64]> {
        match &self.estimator {
            Estimator::RandomForest {
                feature_importances: Some(importances),
                ..
            } if importances.len() == self.schema.len() => Some(importances),
            _ => None,
        }
    }
}

/// Standardisation fitted alongside the model: `(x - mean) / scale`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn transform(&self, input: &[f64]) -> Result<Vec<f64>, InferenceError> {
        if self.mean.len() != input.len() || self.scale.len() != input.len() {
            return Err(InferenceError::InputLength {
                expected: self.mean.len(),
                found: input.len(),
            });
        }

        Ok(input
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (mean, scale))| {
                let scale = if *scale == 0.0 { 1.0 } else { *scale };
                (x - mean) / scale
            })
            .collect())
    }
}

/// A model ready for inference, with its optional scaler.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedModel {
    pub artifact: ModelArtifact,
    pub scaler: Option<StandardScaler>,
}

impl LoadedModel {
    pub fn new(artifact: ModelArtifact) -> Self {
        Self {
            artifact,
            scaler: None,
        }
    }

    pub fn with_scaler(mut self, scaler: StandardScaler) -> Self {
        self.scaler = Some(scaler);
        self
    }

    pub fn schema(&self) -> FeatureSchema {
        self.artifact.schema
    }

    pub fn predict(&self, input: &[f64]) -> Result<ModelOutput, InferenceError> {
        match &self.scaler {
            Some(scaler) => self.artifact.predict(&scaler.transform(input)?),
            None => self.artifact.predict(input),
        }
    }

    /// Reads `priority_model.json` and, when present, `scaler.json` from `directory`.
    pub fn load(directory: &Path) -> Result<Self, ModelLoadError> {
        let model_path = directory.join(MODEL_FILENAME);
        let artifact: ModelArtifact = read_json(&model_path)?;

        let scaler_path = directory.join(SCALER_FILENAME);
        let scaler = match read_json::<StandardScaler>(&scaler_path) {
            Ok(scaler) => Some(scaler),
            Err(ModelLoadError::NotFound { .. }) => None,
            Err(err) => return Err(err),
        };

        Ok(Self { artifact, scaler })
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ModelLoadError> {
    let bytes = fs::read(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => ModelLoadError::NotFound {
            path: path.to_path_buf(),
        },
        _ => ModelLoadError::LoadFailed {
            path: path.to_path_buf(),
            reason: err.to_string(),
        },
    })?;

    serde_json::from_slice(&bytes).map_err(|err| ModelLoadError::LoadFailed {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}
