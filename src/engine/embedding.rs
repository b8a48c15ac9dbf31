//! ONNX Runtime backend for wav2vec2 embeddings
//!
//! Expects an ONNX export of `nguyenvulebinh/wav2vec2-base-vietnamese-250h`
//! in the model directory, plus the Hugging Face `preprocessor_config.json`
//! when present:
//! - model.onnx: `input_values [1, N]` -> `extract_features [1, T, H]`
//! - preprocessor_config.json: front-end normalisation settings

use crate::audio::SAMPLE_RATE;
use crate::engine::config::EmbeddingConfig;
use crate::engine::EmbeddingModel;
use crate::error::{AppError, Result};
use ndarray::{ArrayView2, Axis};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use parking_lot::Mutex;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

/// Pretrained representation model the exported ONNX file comes from
pub const EMBEDDING_MODEL_ID: &str = "nguyenvulebinh/wav2vec2-base-vietnamese-250h";

/// Variance floor used by the wav2vec2 feature extractor
const NORMALIZE_EPS: f64 = 1e-7;

/// Subset of a Hugging Face `preprocessor_config.json`
#[derive(Debug, Clone, Deserialize)]
pub struct FrontEndConfig {
    #[serde(default = "default_do_normalize")]
    pub do_normalize: bool,
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: u32,
}

fn default_do_normalize() -> bool {
    true
}

fn default_sampling_rate() -> u32 {
    SAMPLE_RATE as u32
}

impl Default for FrontEndConfig {
    fn default() -> Self {
        Self {
            do_normalize: default_do_normalize(),
            sampling_rate: default_sampling_rate(),
        }
    }
}

impl FrontEndConfig {
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::ModelLoad(format!("Failed to read {:?}: {}", path, e)))?;
        serde_json::from_str(&content)
            .map_err(|e| AppError::ModelLoad(format!("Failed to parse {:?}: {}", path, e)))
    }
}

/// Zero-mean, unit-variance normalisation applied before the encoder
pub fn normalize_waveform(samples: &[f32]) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let n = samples.len() as f64;
    let mean = samples.iter().map(|&s| s as f64).sum::<f64>() / n;
    let var = samples
        .iter()
        .map(|&s| {
            let d = s as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let scale = (var + NORMALIZE_EPS).sqrt();
    samples
        .iter()
        .map(|&s| ((s as f64 - mean) / scale) as f32)
        .collect()
}

/// Mean over the time axis of a `[T, H]` feature sequence
pub fn mean_pool(sequence: ArrayView2<f32>) -> Result<Vec<f32>> {
    let pooled = sequence
        .mean_axis(Axis(0))
        .ok_or_else(|| AppError::Inference("Embedding model produced no time steps".to_string()))?;
    if pooled.iter().any(|v| !v.is_finite()) {
        return Err(AppError::Inference(
            "Embedding contains non-finite values".to_string(),
        ));
    }
    Ok(pooled.to_vec())
}

/// Mean-pool a raw `[1, T, H]` or `[T, H]` model output
pub fn pool_output(shape: &[i64], data: &[f32]) -> Result<Vec<f32>> {
    let (time_steps, hidden) = match *shape {
        [1, t, h] | [t, h] if t >= 0 && h >= 0 => (t as usize, h as usize),
        _ => {
            return Err(AppError::Inference(format!(
                "Unexpected embedding output shape {:?}",
                shape
            )))
        }
    };
    if time_steps * hidden != data.len() {
        return Err(AppError::Inference(format!(
            "Embedding output shape {:?} does not match {} values",
            shape,
            data.len()
        )));
    }

    let sequence = ArrayView2::from_shape((time_steps, hidden), data)
        .map_err(|e| AppError::Inference(format!("Embedding output shape mismatch: {}", e)))?;
    debug!("Embedding output: {} time steps x {} hidden", time_steps, hidden);
    mean_pool(sequence)
}

/// wav2vec2 embedder backed by an ONNX Runtime session
pub struct Wav2Vec2Embedder {
    session: Mutex<Session>,
    config: EmbeddingConfig,
    front_end: FrontEndConfig,
    hidden_size: Option<usize>,
}

impl Wav2Vec2Embedder {
    /// Load the exported model from `model_dir`. Failures are fatal for serving.
    pub fn load(model_dir: &Path, config: &EmbeddingConfig) -> Result<Self> {
        info!("Loading {} embedding model from {:?}", EMBEDDING_MODEL_ID, model_dir);

        let front_end_path = model_dir.join("preprocessor_config.json");
        let front_end = if front_end_path.exists() {
            FrontEndConfig::load_json(&front_end_path)?
        } else {
            debug!("No preprocessor_config.json, using wav2vec2 defaults");
            FrontEndConfig::default()
        };
        if front_end.sampling_rate as usize != SAMPLE_RATE {
            return Err(AppError::ModelLoad(format!(
                "Embedding model expects {}Hz audio, pipeline produces {}Hz",
                front_end.sampling_rate, SAMPLE_RATE
            )));
        }

        let model_path = model_dir.join(&config.model_file);
        if !model_path.exists() {
            return Err(AppError::ModelLoad(format!(
                "Embedding model not found: {:?}",
                model_path
            )));
        }

        // Initialize ONNX Runtime (commit() returns bool in ort 2.0)
        let _ = ort::init().with_name("phatam").commit();

        let session = Session::builder()
            .map_err(|e| AppError::ModelLoad(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| AppError::ModelLoad(format!("Failed to set optimization level: {}", e)))?
            .commit_from_file(&model_path)
            .map_err(|e| AppError::ModelLoad(format!("Failed to load embedding model: {}", e)))?;

        let mut embedder = Self {
            session: Mutex::new(session),
            config: config.clone(),
            front_end,
            hidden_size: None,
        };

        // Run once on silence so a broken export fails at startup
        let warmup = embedder
            .run(&vec![0.0f32; SAMPLE_RATE])
            .map_err(|e| AppError::ModelLoad(format!("Embedding model warm-up failed: {}", e)))?;
        embedder.hidden_size = Some(warmup.len());

        info!(
            "Embedding model loaded: hidden size {}, normalize input: {}",
            warmup.len(),
            embedder.front_end.do_normalize
        );
        Ok(embedder)
    }

    fn run(&self, frame: &[f32]) -> Result<Vec<f32>> {
        let values = if self.front_end.do_normalize {
            normalize_waveform(frame)
        } else {
            frame.to_vec()
        };

        // input_values: [1, N]
        let input_values = Tensor::from_array(([1usize, values.len()], values))
            .map_err(|e| AppError::Inference(format!("Failed to create input tensor: {}", e)))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![self.config.input_name.as_str() => input_values])
            .map_err(|e| AppError::Inference(format!("Embedding inference failed: {}", e)))?;

        // features: [1, T, H]
        let (shape, data) = outputs[self.config.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| {
                AppError::Inference(format!(
                    "Failed to extract {}: {}",
                    self.config.output_name, e
                ))
            })?;

        pool_output(&shape[..], data)
    }
}

impl EmbeddingModel for Wav2Vec2Embedder {
    fn name(&self) -> &str {
        EMBEDDING_MODEL_ID
    }

    fn hidden_size(&self) -> Option<usize> {
        self.hidden_size
    }

    fn embed(&self, frame: &[f32]) -> Result<Vec<f32>> {
        self.run(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_normalize_waveform_statistics() {
        let samples: Vec<f32> = (0..1000).map(|i| (i as f32 * 0.37).sin() * 3.0 + 1.5).collect();
        let normalized = normalize_waveform(&samples);

        let n = normalized.len() as f64;
        let mean = normalized.iter().map(|&v| v as f64).sum::<f64>() / n;
        let var = normalized.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
        assert!(mean.abs() < 1e-5);
        assert!((var - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_normalize_silence_stays_zero() {
        let normalized = normalize_waveform(&[0.0; 160]);
        assert!(normalized.iter().all(|&v| v == 0.0));
        assert!(normalize_waveform(&[]).is_empty());
    }

    #[test]
    fn test_mean_pool_over_time() {
        let seq = array![[1.0f32, 2.0, 3.0], [3.0, 4.0, 5.0]];
        assert_eq!(mean_pool(seq.view()).unwrap(), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_mean_pool_rejects_empty_and_nan() {
        let empty = ndarray::Array2::<f32>::zeros((0, 4));
        assert!(matches!(mean_pool(empty.view()), Err(AppError::Inference(_))));

        let bad = array![[f32::NAN, 1.0]];
        assert!(matches!(mean_pool(bad.view()), Err(AppError::Inference(_))));
    }

    #[test]
    fn test_pool_output_accepts_batched_and_flat() {
        // [1, 2, 3] and [2, 3] hold the same two frames
        let data = [1.0, 2.0, 3.0, 3.0, 4.0, 5.0];
        assert_eq!(pool_output(&[1, 2, 3], &data).unwrap(), vec![2.0, 3.0, 4.0]);
        assert_eq!(pool_output(&[2, 3], &data).unwrap(), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_pool_output_rejects_bad_shapes() {
        let data = [0.5f32; 6];
        for shape in [&[6][..], &[1, 1, 2, 3], &[2, 1, 3], &[-1, 6]] {
            assert!(
                matches!(pool_output(shape, &data), Err(AppError::Inference(_))),
                "shape {:?}",
                shape
            );
        }
        // Fewer values than the shape claims
        assert!(matches!(pool_output(&[1, 3, 3], &data), Err(AppError::Inference(_))));
        // Zero time steps
        assert!(matches!(pool_output(&[1, 0, 4], &[]), Err(AppError::Inference(_))));
    }

    #[test]
    fn test_front_end_config_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preprocessor_config.json");
        std::fs::write(
            &path,
            r#"{"do_normalize": false, "feature_size": 1, "sampling_rate": 16000, "padding_value": 0.0}"#,
        )
        .unwrap();
        let config = FrontEndConfig::load_json(&path).unwrap();
        assert!(!config.do_normalize);
        assert_eq!(config.sampling_rate, 16000);
    }

    #[test]
    fn test_missing_model_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let result = Wav2Vec2Embedder::load(dir.path(), &EmbeddingConfig::default());
        assert!(matches!(result, Err(AppError::ModelLoad(_))));
    }
}
