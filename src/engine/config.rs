use serde::{Deserialize, Serialize};

/// Hyper-parameters for fitting the label classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Hidden layer widths, input side first
    pub hidden_layers: Vec<usize>,
    /// Mini-batch size (clamped to the training set size)
    pub batch_size: usize,
    /// Initial Adam learning rate
    pub learning_rate: f64,
    /// Maximum number of epochs
    pub max_iter: usize,
    /// Minimum improvement counted as progress
    pub tol: f64,
    /// Epochs without progress before stopping
    pub n_iter_no_change: usize,
    /// L2 penalty on weights
    pub alpha: f64,
    /// Hold out part of the data and stop on validation accuracy plateau
    pub early_stopping: bool,
    /// Fraction of samples held out for validation
    pub validation_fraction: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    /// Seed for weight init, validation split and shuffling
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            hidden_layers: vec![256, 128, 64, 32, 16],
            batch_size: 16,
            learning_rate: 2e-3,
            max_iter: 200,
            tol: 1e-5,
            n_iter_no_change: 10,
            alpha: 1e-4,
            early_stopping: true,
            validation_fraction: 0.1,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            seed: 3,
        }
    }
}

impl TrainingConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter.max(1);
        self
    }

    pub fn with_hidden_layers(mut self, hidden_layers: Vec<usize>) -> Self {
        self.hidden_layers = hidden_layers;
        self
    }

    /// Train on every sample and stop on training-loss plateau instead
    pub fn without_early_stopping(mut self) -> Self {
        self.early_stopping = false;
        self
    }
}

/// How to run the exported wav2vec2 model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// ONNX file name inside the model directory
    pub model_file: String,
    /// Name of the waveform input
    pub input_name: String,
    /// Name of the `[batch, time, hidden]` output to pool
    pub output_name: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_file: "model.onnx".to_string(),
            input_name: "input_values".to_string(),
            output_name: "extract_features".to_string(),
        }
    }
}
