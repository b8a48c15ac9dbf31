use crate::engine::{EmbeddingConfig, ServiceConfig, TrainingConfig, DEFAULT_GOOD_THRESHOLD};
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_MODEL_DIR: &str = "PHATAM_MODEL_DIR";
pub const ENV_CLASSIFIER: &str = "PHATAM_CLASSIFIER";
pub const ENV_ARCHIVE_DIR: &str = "PHATAM_ARCHIVE_DIR";
pub const ENV_DB: &str = "PHATAM_DB";

/// Application settings, loaded from JSON with every field optional
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Serialized MLP classifier
    pub classifier_path: PathBuf,
    /// Directory holding the exported wav2vec2 model
    pub model_dir: PathBuf,
    pub embedding: EmbeddingConfig,
    /// Root of the local recording archive
    pub archive_dir: PathBuf,
    pub database_path: PathBuf,
    /// Also write logs here when set
    pub log_file: Option<PathBuf>,
    /// Lesson demonstration clips
    pub videos_dir: PathBuf,
    /// Scores strictly above this are praised
    pub good_threshold: f32,
    pub service: ServiceConfig,
    pub training: TrainingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            classifier_path: PathBuf::from("models/classifier.msgpack"),
            model_dir: PathBuf::from("models/wav2vec2"),
            embedding: EmbeddingConfig::default(),
            archive_dir: PathBuf::from("recordings"),
            database_path: PathBuf::from("phatam.db"),
            log_file: None,
            videos_dir: PathBuf::from("assets/videos"),
            good_threshold: DEFAULT_GOOD_THRESHOLD,
            service: ServiceConfig::default(),
            training: TrainingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Read a JSON config file. Missing keys keep their defaults.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read {:?}: {}", path, e)))?;
        serde_json::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse {:?}: {}", path, e)))
    }

    /// Override paths from `lookup`, usually the process environment.
    ///
    /// Returns the keys that were applied.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Vec<&'static str>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = Vec::new();
        let targets: [(&'static str, &mut PathBuf); 4] = [
            (ENV_MODEL_DIR, &mut self.model_dir),
            (ENV_CLASSIFIER, &mut self.classifier_path),
            (ENV_ARCHIVE_DIR, &mut self.archive_dir),
            (ENV_DB, &mut self.database_path),
        ];
        for (key, target) in targets {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *target = PathBuf::from(value);
                applied.push(key);
            }
        }
        applied
    }

    pub fn validate(&self) -> Result<()> {
        if !(1.0..=5.0).contains(&self.good_threshold) {
            return Err(AppError::Config(format!(
                "good_threshold must be within 1..=5, got {}",
                self.good_threshold
            )));
        }
        if self.service.request_timeout_ms == 0 {
            return Err(AppError::Config(
                "service.request_timeout_ms must be positive".to_string(),
            ));
        }
        let split = self.training.validation_fraction;
        if self.training.early_stopping && !(split > 0.0 && split < 1.0) {
            return Err(AppError::Config(format!(
                "training.validation_fraction must be within (0, 1), got {}",
                split
            )));
        }
        Ok(())
    }
}
