//! Feed-forward label classifier
//!
//! ReLU hidden layers followed by a softmax over the eight lesson labels.
//! Weights are stored input-major (`weights[[input, output]]`) so a batch
//! `x` of shape `[n, features]` is propagated with `x.dot(&weights) + bias`.

use crate::engine::{LabelClassifier, LabelDistribution};
use crate::error::{AppError, Result};
use crate::labels::{Label, LABEL_SET_VERSION};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Bump when the artifact layout changes
const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// One fully-connected layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    /// `[inputs, outputs]`
    pub weights: Array2<f64>,
    /// `[outputs]`
    pub bias: Array1<f64>,
}

impl DenseLayer {
    /// Glorot-uniform initialisation for ReLU/softmax layers
    pub(crate) fn glorot<R: Rng>(fan_in: usize, fan_out: usize, rng: &mut R) -> Self {
        let bound = (6.0 / (fan_in + fan_out) as f64).sqrt();
        let weights = Array2::from_shape_fn((fan_in, fan_out), |_| rng.gen_range(-bound..bound));
        let bias = Array1::from_shape_fn(fan_out, |_| rng.gen_range(-bound..bound));
        Self { weights, bias }
    }

    pub fn inputs(&self) -> usize {
        self.weights.nrows()
    }

    pub fn outputs(&self) -> usize {
        self.weights.ncols()
    }

    fn apply(&self, x: &ArrayView2<f64>) -> Array2<f64> {
        x.dot(&self.weights) + &self.bias
    }
}

/// On-disk form of a trained classifier
#[derive(Debug, Serialize, Deserialize)]
struct ClassifierArtifact {
    format_version: u32,
    label_set_version: u32,
    labels: Vec<String>,
    n_features: usize,
    layers: Vec<DenseLayer>,
    trained_at: Option<String>,
}

/// Trained multilayer perceptron. Read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct MlpClassifier {
    n_features: usize,
    pub(crate) layers: Vec<DenseLayer>,
    trained_at: Option<String>,
}

impl MlpClassifier {
    /// Build from explicit layers, checking that shapes chain and end in one
    /// output per label.
    pub fn from_layers(layers: Vec<DenseLayer>) -> Result<Self> {
        let first = layers
            .first()
            .ok_or_else(|| AppError::ModelLoad("Classifier has no layers".to_string()))?;
        let n_features = first.inputs();

        for (i, layer) in layers.iter().enumerate() {
            if layer.bias.len() != layer.outputs() {
                return Err(AppError::ModelLoad(format!(
                    "Layer {} bias has {} entries for {} outputs",
                    i,
                    layer.bias.len(),
                    layer.outputs()
                )));
            }
            if i > 0 && layers[i - 1].outputs() != layer.inputs() {
                return Err(AppError::ModelLoad(format!(
                    "Layer {} expects {} inputs but previous layer has {} outputs",
                    i,
                    layer.inputs(),
                    layers[i - 1].outputs()
                )));
            }
        }

        let outputs = layers.last().map(|l| l.outputs()).unwrap_or(0);
        if outputs != Label::COUNT {
            return Err(AppError::ModelLoad(format!(
                "Classifier has {} outputs, expected {}",
                outputs,
                Label::COUNT
            )));
        }

        Ok(Self {
            n_features,
            layers,
            trained_at: None,
        })
    }

    /// Freshly initialised network with the given hidden widths
    pub(crate) fn initialize<R: Rng>(n_features: usize, hidden: &[usize], rng: &mut R) -> Self {
        let mut widths = Vec::with_capacity(hidden.len() + 2);
        widths.push(n_features);
        widths.extend_from_slice(hidden);
        widths.push(Label::COUNT);

        let layers = widths
            .windows(2)
            .map(|w| DenseLayer::glorot(w[0], w[1], rng))
            .collect();

        Self {
            n_features,
            layers,
            trained_at: None,
        }
    }

    pub(crate) fn mark_trained(&mut self) {
        self.trained_at = Some(chrono::Utc::now().to_rfc3339());
    }

    pub fn trained_at(&self) -> Option<&str> {
        self.trained_at.as_deref()
    }

    pub fn layer_widths(&self) -> Vec<usize> {
        self.layers.iter().map(|l| l.outputs()).collect()
    }

    /// Every layer's output for a batch; the last entry holds probabilities.
    pub(crate) fn forward_activations(&self, x: ArrayView2<f64>) -> Vec<Array2<f64>> {
        let mut activations: Vec<Array2<f64>> = Vec::with_capacity(self.layers.len());
        let last = self.layers.len() - 1;

        for (i, layer) in self.layers.iter().enumerate() {
            let input = match activations.last() {
                Some(a) => layer.apply(&a.view()),
                None => layer.apply(&x),
            };
            let output = if i == last {
                softmax_rows(input)
            } else {
                input.mapv(|v| v.max(0.0))
            };
            activations.push(output);
        }

        activations
    }

    /// Probabilities for a batch of `[n, n_features]` inputs
    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.n_features {
            return Err(AppError::Inference(format!(
                "Feature vector has {} dimensions, classifier expects {}",
                x.ncols(),
                self.n_features
            )));
        }
        self.forward_activations(x)
            .pop()
            .ok_or_else(|| AppError::Inference("Classifier has no layers".to_string()))
    }

    /// Most likely label for one feature vector
    pub fn predict(&self, features: &[f32]) -> Result<Label> {
        Ok(self.predict_distribution(features)?.most_likely())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let artifact = ClassifierArtifact {
            format_version: ARTIFACT_FORMAT_VERSION,
            label_set_version: LABEL_SET_VERSION,
            labels: Label::symbols(),
            n_features: self.n_features,
            layers: self.layers.clone(),
            trained_at: self.trained_at.clone(),
        };
        Ok(rmp_serde::to_vec_named(&artifact)?)
    }

    /// Decode an artifact, rejecting any whose label order differs from ours
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let artifact: ClassifierArtifact = rmp_serde::from_slice(bytes)
            .map_err(|e| AppError::ModelLoad(format!("Failed to decode classifier: {}", e)))?;

        if artifact.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(AppError::ModelLoad(format!(
                "Unsupported classifier format version {}",
                artifact.format_version
            )));
        }
        if artifact.label_set_version != LABEL_SET_VERSION || artifact.labels != Label::symbols() {
            return Err(AppError::ModelLoad(format!(
                "Classifier label order {:?} (v{}) does not match {:?} (v{})",
                artifact.labels,
                artifact.label_set_version,
                Label::symbols(),
                LABEL_SET_VERSION
            )));
        }

        let mut model = Self::from_layers(artifact.layers)?;
        if model.n_features != artifact.n_features {
            return Err(AppError::ModelLoad(format!(
                "Classifier declares {} features but first layer takes {}",
                artifact.n_features, model.n_features
            )));
        }
        model.trained_at = artifact.trained_at;
        Ok(model)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_bytes()?)?;
        info!("Saved classifier to {:?}", path);
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| AppError::ModelLoad(format!("Failed to read classifier {:?}: {}", path, e)))?;
        let model = Self::from_bytes(&bytes)?;
        info!(
            "Loaded classifier from {:?}: {} features, layers {:?}",
            path,
            model.n_features,
            model.layer_widths()
        );
        Ok(model)
    }
}

impl LabelClassifier for MlpClassifier {
    fn name(&self) -> &str {
        "MLP"
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_distribution(&self, features: &[f32]) -> Result<LabelDistribution> {
        let x = Array2::from_shape_fn((1, features.len()), |(_, j)| features[j] as f64);
        let proba = self.predict_proba(x.view())?;
        LabelDistribution::from_probabilities(proba.row(0).iter().copied())
    }
}

/// Numerically stable row-wise softmax
pub(crate) fn softmax_rows(mut z: Array2<f64>) -> Array2<f64> {
    for mut row in z.axis_iter_mut(Axis(0)) {
        let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    z
}
