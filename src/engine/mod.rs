pub mod classifier;
pub mod config;
pub mod dataset;
pub mod embedding;
pub mod score;
pub mod service;
pub mod training;

#[cfg(test)]
pub(crate) mod testing;

use crate::audio::preprocess;
use crate::error::{AppError, Result};
use crate::labels::Label;
use std::path::Path;
use tracing::info;

pub use classifier::MlpClassifier;
pub use config::{EmbeddingConfig, TrainingConfig};
pub use embedding::{Wav2Vec2Embedder, EMBEDDING_MODEL_ID};
pub use score::{normalize, probability_to_score, ScoreRange, Verdict, DEFAULT_GOOD_THRESHOLD};
pub use service::{ScoringService, ServiceConfig};
pub use training::{fit, TrainingReport};

/// Trait for acoustic embedding models
///
/// Implementations must be deterministic and must not update any weights.
pub trait EmbeddingModel: Send + Sync {
    /// Get the model name for logging
    fn name(&self) -> &str;

    /// Dimension of produced vectors, when known up front
    fn hidden_size(&self) -> Option<usize>;

    /// Embed a preprocessed one-second frame (16kHz mono f32)
    fn embed(&self, frame: &[f32]) -> Result<Vec<f32>>;
}

/// Trait for classifiers over the fixed label set
pub trait LabelClassifier: Send + Sync {
    fn name(&self) -> &str;

    /// Expected feature vector length
    fn n_features(&self) -> usize;

    fn predict_distribution(&self, features: &[f32]) -> Result<LabelDistribution>;
}

/// Categorical distribution over [`Label::ALL`], indexed by [`Label::index`]
#[derive(Debug, Clone, PartialEq)]
pub struct LabelDistribution([f64; Label::COUNT]);

impl LabelDistribution {
    /// Check length, sign and normalisation of raw class probabilities
    pub fn from_probabilities(values: impl IntoIterator<Item = f64>) -> Result<Self> {
        let values: Vec<f64> = values.into_iter().collect();
        let probs: [f64; Label::COUNT] = values.as_slice().try_into().map_err(|_| {
            AppError::Inference(format!(
                "Classifier returned {} probabilities, expected {}",
                values.len(),
                Label::COUNT
            ))
        })?;

        if probs.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(AppError::Inference(format!(
                "Classifier returned invalid probabilities {:?}",
                probs
            )));
        }
        let total: f64 = probs.iter().sum();
        if (total - 1.0).abs() > 1e-6 {
            return Err(AppError::Inference(format!(
                "Class probabilities sum to {}",
                total
            )));
        }

        Ok(Self(probs))
    }

    pub fn probability(&self, label: Label) -> f64 {
        self.0[label.index()]
    }

    pub fn probabilities(&self) -> &[f64; Label::COUNT] {
        &self.0
    }

    pub fn most_likely(&self) -> Label {
        let mut best = Label::ALL[0];
        for label in Label::ALL {
            if self.probability(label) > self.probability(best) {
                best = label;
            }
        }
        best
    }
}

/// Loaded embedding model and classifier, built once at startup.
///
/// Several scorers with different models can live in one process; nothing
/// here is global.
pub struct Scorer {
    embedder: Box<dyn EmbeddingModel>,
    classifier: Box<dyn LabelClassifier>,
}

impl Scorer {
    /// Pair an embedder with a classifier, checking their dimensions agree
    pub fn new(
        embedder: Box<dyn EmbeddingModel>,
        classifier: Box<dyn LabelClassifier>,
    ) -> Result<Self> {
        if let Some(hidden) = embedder.hidden_size() {
            if hidden != classifier.n_features() {
                return Err(AppError::ModelLoad(format!(
                    "{} produces {}-d embeddings but {} classifier expects {}",
                    embedder.name(),
                    hidden,
                    classifier.name(),
                    classifier.n_features()
                )));
            }
        }
        Ok(Self {
            embedder,
            classifier,
        })
    }

    /// Load the ONNX embedder and the serialized classifier
    pub fn load(
        model_dir: &Path,
        embedding: &EmbeddingConfig,
        classifier_path: &Path,
    ) -> Result<Self> {
        let classifier = MlpClassifier::load(classifier_path)?;
        let embedder = Wav2Vec2Embedder::load(model_dir, embedding)?;
        let scorer = Self::new(Box::new(embedder), Box::new(classifier))?;
        info!("Scorer ready: {} + {}", scorer.embedder.name(), scorer.classifier.name());
        Ok(scorer)
    }

    /// Class distribution for a raw recording
    pub fn predict_distribution(&self, waveform: &[f32]) -> Result<LabelDistribution> {
        let frame = preprocess(waveform).map_err(into_inference)?;
        let features = self.embedder.embed(&frame).map_err(into_inference)?;
        self.classifier
            .predict_distribution(&features)
            .map_err(into_inference)
    }

    /// Score a raw recording against the expected label on the 1–5 scale.
    ///
    /// The label is checked before any audio work. Side-effect free.
    pub fn predict_score(&self, waveform: &[f32], expected_label: &str) -> Result<f32> {
        let label = Label::parse(expected_label)?;
        let distribution = self.predict_distribution(waveform)?;
        Ok(probability_to_score(distribution.probability(label)))
    }
}

/// Score `waveform` against `expected_label` with the given scorer
pub fn predict_score(scorer: &Scorer, waveform: &[f32], expected_label: &str) -> Result<f32> {
    scorer.predict_score(waveform, expected_label)
}

/// Fold any pipeline failure into the per-request inference error
fn into_inference(e: AppError) -> AppError {
    match e {
        AppError::Inference(_) => e,
        other => AppError::Inference(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{CountingEmbedder, FailingEmbedder, StatsEmbedder};
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn classifier() -> MlpClassifier {
        let mut rng = StdRng::seed_from_u64(5);
        MlpClassifier::initialize(StatsEmbedder::DIM, &[256, 128, 64, 32, 16], &mut rng)
    }

    fn scorer() -> Scorer {
        Scorer::new(Box::new(StatsEmbedder), Box::new(classifier())).unwrap()
    }

    fn tone(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.7 * (2.0 * std::f32::consts::PI * 300.0 * i as f32 / 16000.0).sin())
            .collect()
    }

    #[test]
    fn test_all_zero_waveform_scores_in_range() {
        let scorer = scorer();
        let score = predict_score(&scorer, &vec![0.0f32; 16000], "E").unwrap();
        assert!((1.0..=5.0).contains(&score), "score = {}", score);
    }

    #[test]
    fn test_score_is_deterministic() {
        let scorer = scorer();
        let waveform = tone(20000);
        for label in Label::ALL {
            let a = scorer.predict_score(&waveform, label.symbol()).unwrap();
            let b = scorer.predict_score(&waveform, label.symbol()).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_scores_match_distribution() {
        let scorer = scorer();
        let waveform = tone(12000);
        let distribution = scorer.predict_distribution(&waveform).unwrap();
        let total: f32 = Label::ALL
            .iter()
            .map(|l| scorer.predict_score(&waveform, l.symbol()).unwrap())
            .sum();
        // Sum of (1 + 4p) over all labels
        assert!((total - 12.0).abs() < 1e-4);
        assert!((distribution.probabilities().iter().sum::<f64>() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_label_skips_pipeline() {
        let (embedder, calls) = CountingEmbedder::new();
        let scorer = Scorer::new(Box::new(embedder), Box::new(classifier())).unwrap();

        let result = scorer.predict_score(&tone(16000), "Z");
        assert!(matches!(result, Err(AppError::InvalidLabel(ref s)) if s == "Z"));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);

        scorer.predict_score(&tone(16000), "V").unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failures_are_inference_errors() {
        let scorer = Scorer::new(Box::new(FailingEmbedder), Box::new(classifier())).unwrap();
        assert!(matches!(
            scorer.predict_score(&tone(16000), "E"),
            Err(AppError::Inference(_))
        ));

        let scorer = self::scorer();
        let mut waveform = tone(16000);
        waveform[100] = f32::INFINITY;
        assert!(matches!(
            scorer.predict_score(&waveform, "E"),
            Err(AppError::Inference(_))
        ));
    }

    #[test]
    fn test_dimension_mismatch_rejected_at_construction() {
        let mut rng = StdRng::seed_from_u64(5);
        let wrong = MlpClassifier::initialize(StatsEmbedder::DIM + 1, &[8], &mut rng);
        assert!(matches!(
            Scorer::new(Box::new(StatsEmbedder), Box::new(wrong)),
            Err(AppError::ModelLoad(_))
        ));
    }

    #[test]
    fn test_distribution_validation() {
        assert!(LabelDistribution::from_probabilities(vec![0.5, 0.5]).is_err());
        assert!(LabelDistribution::from_probabilities(vec![0.125; 8]).is_ok());
        let mut negative = vec![0.125; 8];
        negative[0] = -0.125;
        negative[1] = 0.375;
        assert!(LabelDistribution::from_probabilities(negative).is_err());

        let mut peaked = vec![0.0; 8];
        peaked[Label::OHorn.index()] = 1.0;
        let dist = LabelDistribution::from_probabilities(peaked).unwrap();
        assert_eq!(dist.most_likely(), Label::OHorn);
        assert_eq!(dist.probability(Label::OHorn), 1.0);
    }
}
