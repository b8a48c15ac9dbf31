//! Offline fitting of the label classifier
//!
//! Mini-batch Adam on cross-entropy with an L2 penalty. With early stopping
//! a stratified slice of the data is held out and the weights from the epoch
//! with the best validation accuracy are kept.

use crate::engine::classifier::{DenseLayer, MlpClassifier};
use crate::engine::config::TrainingConfig;
use crate::error::{AppError, Result};
use crate::labels::Label;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Summary of a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub epochs: usize,
    pub n_train: usize,
    pub n_validation: usize,
    pub loss_curve: Vec<f64>,
    pub validation_scores: Vec<f64>,
    pub best_validation_score: Option<f64>,
    /// Stopped on plateau rather than by hitting `max_iter`
    pub converged: bool,
}

impl TrainingReport {
    pub fn final_loss(&self) -> Option<f64> {
        self.loss_curve.last().copied()
    }
}

struct Gradients {
    weights: Vec<Array2<f64>>,
    biases: Vec<Array1<f64>>,
}

struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    t: i32,
    m_w: Vec<Array2<f64>>,
    v_w: Vec<Array2<f64>>,
    m_b: Vec<Array1<f64>>,
    v_b: Vec<Array1<f64>>,
}

impl Adam {
    fn new(layers: &[DenseLayer], config: &TrainingConfig) -> Self {
        Self {
            learning_rate: config.learning_rate,
            beta1: config.beta1,
            beta2: config.beta2,
            epsilon: config.epsilon,
            t: 0,
            m_w: layers.iter().map(|l| Array2::zeros(l.weights.raw_dim())).collect(),
            v_w: layers.iter().map(|l| Array2::zeros(l.weights.raw_dim())).collect(),
            m_b: layers.iter().map(|l| Array1::zeros(l.bias.raw_dim())).collect(),
            v_b: layers.iter().map(|l| Array1::zeros(l.bias.raw_dim())).collect(),
        }
    }

    fn step(&mut self, layers: &mut [DenseLayer], grads: &Gradients) {
        self.t += 1;
        let (b1, b2, eps) = (self.beta1, self.beta2, self.epsilon);
        let lr_t = self.learning_rate * (1.0 - b2.powi(self.t)).sqrt() / (1.0 - b1.powi(self.t));

        for (i, layer) in layers.iter_mut().enumerate() {
            let g = &grads.weights[i];
            self.m_w[i] = &self.m_w[i] * b1 + g * (1.0 - b1);
            self.v_w[i] = &self.v_w[i] * b2 + &(g * g) * (1.0 - b2);
            layer.weights -= &(&self.m_w[i] / &self.v_w[i].mapv(|v| v.sqrt() + eps) * lr_t);

            let g = &grads.biases[i];
            self.m_b[i] = &self.m_b[i] * b1 + g * (1.0 - b1);
            self.v_b[i] = &self.v_b[i] * b2 + &(g * g) * (1.0 - b2);
            layer.bias -= &(&self.m_b[i] / &self.v_b[i].mapv(|v| v.sqrt() + eps) * lr_t);
        }
    }
}

/// Fit a classifier on `(feature vector, label)` pairs.
pub fn fit(
    features: &[Vec<f32>],
    labels: &[Label],
    config: &TrainingConfig,
) -> Result<(MlpClassifier, TrainingReport)> {
    if features.is_empty() {
        return Err(AppError::Training("No training samples".to_string()));
    }
    if features.len() != labels.len() {
        return Err(AppError::Training(format!(
            "{} feature vectors but {} labels",
            features.len(),
            labels.len()
        )));
    }
    let n_features = features[0].len();
    if n_features == 0 {
        return Err(AppError::Training("Feature vectors are empty".to_string()));
    }
    for (i, f) in features.iter().enumerate() {
        if f.len() != n_features {
            return Err(AppError::Training(format!(
                "Sample {} has {} features, expected {}",
                i,
                f.len(),
                n_features
            )));
        }
        if f.iter().any(|v| !v.is_finite()) {
            return Err(AppError::Training(format!("Sample {} has non-finite features", i)));
        }
    }
    if config.early_stopping && features.len() < 2 {
        return Err(AppError::Training(
            "Early stopping needs at least 2 samples".to_string(),
        ));
    }

    let n = features.len();
    let x = Array2::from_shape_fn((n, n_features), |(i, j)| features[i][j] as f64);
    let y: Vec<usize> = labels.iter().map(|l| l.index()).collect();

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut model = MlpClassifier::initialize(n_features, &config.hidden_layers, &mut rng);

    let (train_idx, val_idx) = if config.early_stopping {
        stratified_split(&y, config.validation_fraction, &mut rng)
    } else {
        ((0..n).collect(), Vec::new())
    };

    let batch_size = config.batch_size.clamp(1, train_idx.len());
    info!(
        "Training classifier: {} train / {} validation samples, {} features, layers {:?}, batch {}",
        train_idx.len(),
        val_idx.len(),
        n_features,
        config.hidden_layers,
        batch_size
    );

    let mut adam = Adam::new(&model.layers, config);
    let mut order = train_idx.clone();
    let mut loss_curve = Vec::new();
    let mut validation_scores = Vec::new();
    let mut best_loss = f64::INFINITY;
    let mut best_validation = f64::NEG_INFINITY;
    let mut best_layers = model.layers.clone();
    let mut no_improvement = 0usize;
    let mut converged = false;

    for epoch in 0..config.max_iter {
        order.shuffle(&mut rng);

        let mut accumulated = 0.0;
        for batch in order.chunks(batch_size) {
            let xb = x.select(Axis(0), batch);
            let yb = one_hot(&y, batch);
            let (loss, grads) = backprop(&model, xb.view(), &yb, config.alpha);
            adam.step(&mut model.layers, &grads);
            accumulated += loss * batch.len() as f64;
        }

        let loss = accumulated / order.len() as f64;
        if !loss.is_finite() {
            return Err(AppError::Training(format!(
                "Loss diverged at epoch {}",
                epoch + 1
            )));
        }
        loss_curve.push(loss);

        if config.early_stopping {
            let score = accuracy(&model, &x, &y, &val_idx);
            validation_scores.push(score);
            debug!("Epoch {}: loss={:.6}, validation accuracy={:.4}", epoch + 1, loss, score);

            if score < best_validation + config.tol {
                no_improvement += 1;
            } else {
                no_improvement = 0;
            }
            if score > best_validation {
                best_validation = score;
                best_layers = model.layers.clone();
            }
        } else {
            debug!("Epoch {}: loss={:.6}", epoch + 1, loss);

            if loss > best_loss - config.tol {
                no_improvement += 1;
            } else {
                no_improvement = 0;
            }
            if loss < best_loss {
                best_loss = loss;
            }
        }

        if no_improvement > config.n_iter_no_change {
            info!(
                "No improvement over {} epochs, stopping at epoch {}",
                config.n_iter_no_change,
                epoch + 1
            );
            converged = true;
            break;
        }
    }

    if config.early_stopping {
        model.layers = best_layers;
    }
    model.mark_trained();

    let report = TrainingReport {
        epochs: loss_curve.len(),
        n_train: train_idx.len(),
        n_validation: val_idx.len(),
        best_validation_score: config.early_stopping.then_some(best_validation),
        loss_curve,
        validation_scores,
        converged,
    };

    info!(
        "Training finished after {} epochs, final loss {:.6}, best validation {:?}",
        report.epochs,
        report.final_loss().unwrap_or(f64::NAN),
        report.best_validation_score
    );

    Ok((model, report))
}

/// Forward + backward pass over one batch. Returns the penalised loss.
fn backprop(model: &MlpClassifier, x: ArrayView2<f64>, y: &Array2<f64>, alpha: f64) -> (f64, Gradients) {
    let n = x.nrows() as f64;
    let activations = model.forward_activations(x);
    let layers = &model.layers;
    let probs = &activations[activations.len() - 1];

    let eps = f64::EPSILON;
    let data_loss = -(y * &probs.mapv(|p| p.clamp(eps, 1.0 - eps).ln())).sum() / n;
    let penalty: f64 = layers.iter().map(|l| l.weights.mapv(|w| w * w).sum()).sum();
    let loss = data_loss + 0.5 * alpha * penalty / n;

    let mut weights = vec![Array2::<f64>::zeros((0, 0)); layers.len()];
    let mut biases = vec![Array1::<f64>::zeros(0); layers.len()];
    let mut delta = probs - y;

    for i in (0..layers.len()).rev() {
        let input = if i == 0 { x.view() } else { activations[i - 1].view() };
        weights[i] = (input.t().dot(&delta) + &layers[i].weights * alpha) / n;
        biases[i] = delta.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(delta.ncols()));

        if i > 0 {
            let relu_grad = activations[i - 1].mapv(|a| if a > 0.0 { 1.0 } else { 0.0 });
            delta = delta.dot(&layers[i].weights.t()) * relu_grad;
        }
    }

    (loss, Gradients { weights, biases })
}

fn one_hot(y: &[usize], rows: &[usize]) -> Array2<f64> {
    let mut out = Array2::zeros((rows.len(), Label::COUNT));
    for (r, &i) in rows.iter().enumerate() {
        out[[r, y[i]]] = 1.0;
    }
    out
}

fn accuracy(model: &MlpClassifier, x: &Array2<f64>, y: &[usize], rows: &[usize]) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    let xs = x.select(Axis(0), rows);
    let probs = match model.forward_activations(xs.view()).pop() {
        Some(p) => p,
        None => return 0.0,
    };
    let correct = probs
        .axis_iter(Axis(0))
        .zip(rows)
        .filter(|(row, i)| argmax(row.iter().copied()) == y[**i])
        .count();
    correct as f64 / rows.len() as f64
}

fn argmax(values: impl Iterator<Item = f64>) -> usize {
    let mut best = (0, f64::NEG_INFINITY);
    for (i, v) in values.enumerate() {
        if v > best.1 {
            best = (i, v);
        }
    }
    best.0
}

/// Split indices into `(train, validation)` keeping class proportions.
///
/// The validation size is `ceil(n * fraction)`, capped so at least one
/// sample remains for training. Per-class quotas use largest remainders.
fn stratified_split(y: &[usize], fraction: f64, rng: &mut StdRng) -> (Vec<usize>, Vec<usize>) {
    let n = y.len();
    let n_val = ((n as f64 * fraction).ceil() as usize).clamp(1, n.saturating_sub(1).max(1));

    let mut by_class: Vec<Vec<usize>> = vec![Vec::new(); Label::COUNT];
    for (i, &c) in y.iter().enumerate() {
        by_class[c].push(i);
    }
    for members in by_class.iter_mut() {
        members.shuffle(rng);
    }

    let mut quotas: Vec<usize> = by_class.iter().map(|m| m.len() * n_val / n).collect();
    let mut remainders: Vec<(usize, usize)> = by_class
        .iter()
        .enumerate()
        .map(|(c, m)| (m.len() * n_val % n, c))
        .collect();
    remainders.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    let mut missing = n_val - quotas.iter().sum::<usize>();
    for &(_, c) in remainders.iter().cycle().take(Label::COUNT * 2) {
        if missing == 0 {
            break;
        }
        if quotas[c] < by_class[c].len() {
            quotas[c] += 1;
            missing -= 1;
        }
    }

    let mut train = Vec::with_capacity(n - n_val);
    let mut validation = Vec::with_capacity(n_val);
    for (members, &quota) in by_class.iter().zip(&quotas) {
        validation.extend_from_slice(&members[..quota]);
        train.extend_from_slice(&members[quota..]);
    }
    train.sort_unstable();
    validation.sort_unstable();

    (train, validation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LabelClassifier;
    use rand::Rng;

    /// Well separated clusters: class `c` lights up coordinate `c`.
    fn clusters(per_class: usize, dim: usize, seed: u64) -> (Vec<Vec<f32>>, Vec<Label>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut features = Vec::new();
        let mut labels = Vec::new();
        for label in Label::ALL {
            for _ in 0..per_class {
                let mut v: Vec<f32> = (0..dim).map(|_| rng.gen_range(-0.1..0.1)).collect();
                v[label.index()] += 3.0;
                features.push(v);
                labels.push(label);
            }
        }
        (features, labels)
    }

    fn small_config() -> TrainingConfig {
        TrainingConfig::default().with_hidden_layers(vec![32, 16])
    }

    #[test]
    fn test_learns_separable_clusters() {
        let (features, labels) = clusters(15, 10, 1);
        let config = small_config().without_early_stopping();
        let (model, report) = fit(&features, &labels, &config).unwrap();

        let correct = features
            .iter()
            .zip(&labels)
            .filter(|(f, l)| model.predict(f).unwrap() == **l)
            .count();
        assert!(
            correct as f64 / features.len() as f64 >= 0.9,
            "accuracy {}/{}",
            correct,
            features.len()
        );
        assert!(report.final_loss().unwrap() < report.loss_curve[0]);
        assert!(report.validation_scores.is_empty());
    }

    #[test]
    fn test_gradients_match_layer_shapes() {
        let mut rng = StdRng::seed_from_u64(3);
        let model = MlpClassifier::initialize(5, &[7, 4], &mut rng);
        let x = Array2::<f64>::from_shape_fn((6, 5), |(i, j)| (i * 5 + j) as f64 / 30.0);
        let targets: Vec<usize> = (0..6).map(|i| i % Label::COUNT).collect();
        let rows: Vec<usize> = (0..6).collect();
        let y = one_hot(&targets, &rows);

        let (loss, grads) = backprop(&model, x.view(), &y, 1e-4);
        assert!(loss.is_finite() && loss > 0.0);
        for ((layer, w), b) in model.layers.iter().zip(&grads.weights).zip(&grads.biases) {
            assert_eq!(w.dim(), layer.weights.dim());
            assert_eq!(b.len(), layer.bias.len());
        }
    }

    #[test]
    fn test_fit_is_reproducible() {
        let (features, labels) = clusters(4, 8, 2);
        let config = small_config().with_max_iter(5);
        let (a, _) = fit(&features, &labels, &config).unwrap();
        let (b, _) = fit(&features, &labels, &config).unwrap();
        assert_eq!(a.layers, b.layers);

        let (c, _) = fit(&features, &labels, &config.clone().with_seed(4)).unwrap();
        assert_ne!(a.layers, c.layers);
    }

    #[test]
    fn test_default_architecture_and_early_stopping() {
        let (features, labels) = clusters(5, 8, 3);
        let config = TrainingConfig::default().with_max_iter(3);
        let (model, report) = fit(&features, &labels, &config).unwrap();

        assert_eq!(model.layer_widths(), vec![256, 128, 64, 32, 16, 8]);
        assert_eq!(model.n_features(), 8);
        assert_eq!(report.n_validation, 4);
        assert_eq!(report.n_train, 36);
        assert!(report.epochs <= 3);
        assert_eq!(report.validation_scores.len(), report.epochs);
        assert!(report.best_validation_score.is_some());
        assert!(model.trained_at().is_some());
    }

    #[test]
    fn test_rejects_bad_input() {
        let config = small_config();
        assert!(matches!(fit(&[], &[], &config), Err(AppError::Training(_))));
        assert!(fit(&[vec![1.0, 2.0]], &[Label::E, Label::H], &config).is_err());
        assert!(fit(
            &[vec![1.0, 2.0], vec![1.0]],
            &[Label::E, Label::H],
            &config
        )
        .is_err());
        assert!(fit(
            &[vec![1.0, f32::NAN], vec![1.0, 0.0]],
            &[Label::E, Label::H],
            &config
        )
        .is_err());
    }

    #[test]
    fn test_stratified_split_keeps_every_class() {
        let y: Vec<usize> = (0..80).map(|i| i % Label::COUNT).collect();
        let mut rng = StdRng::seed_from_u64(3);
        let (train, validation) = stratified_split(&y, 0.1, &mut rng);

        assert_eq!(validation.len(), 8);
        assert_eq!(train.len(), 72);
        for c in 0..Label::COUNT {
            assert_eq!(validation.iter().filter(|&&i| y[i] == c).count(), 1);
        }
        let mut all: Vec<usize> = train.iter().chain(&validation).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..80).collect::<Vec<_>>());
    }

    #[test]
    fn test_argmax() {
        assert_eq!(argmax([0.1, 0.7, 0.2].into_iter()), 1);
        assert_eq!(argmax(std::iter::empty()), 0);
    }
}
