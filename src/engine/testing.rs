//! Deterministic stand-in embedders for tests

use super::EmbeddingModel;
use crate::error::{AppError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cheap frame statistics in place of a neural embedding
pub struct StatsEmbedder;

impl StatsEmbedder {
    pub const DIM: usize = 4;

    fn stats(frame: &[f32]) -> Vec<f32> {
        let n = frame.len().max(1) as f32;
        let mean = frame.iter().sum::<f32>() / n;
        let mean_abs = frame.iter().map(|s| s.abs()).sum::<f32>() / n;
        let rms = (frame.iter().map(|s| s * s).sum::<f32>() / n).sqrt();
        let peak = frame.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        vec![mean, mean_abs, rms, peak]
    }
}

impl EmbeddingModel for StatsEmbedder {
    fn name(&self) -> &str {
        "stats"
    }

    fn hidden_size(&self) -> Option<usize> {
        Some(Self::DIM)
    }

    fn embed(&self, frame: &[f32]) -> Result<Vec<f32>> {
        Ok(Self::stats(frame))
    }
}

/// Counts how many frames reach the embedder
pub struct CountingEmbedder {
    calls: Arc<AtomicUsize>,
}

impl CountingEmbedder {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (Self { calls: calls.clone() }, calls)
    }
}

impl EmbeddingModel for CountingEmbedder {
    fn name(&self) -> &str {
        "counting"
    }

    fn hidden_size(&self) -> Option<usize> {
        Some(StatsEmbedder::DIM)
    }

    fn embed(&self, frame: &[f32]) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(StatsEmbedder::stats(frame))
    }
}

/// Always fails, like a model whose runtime fell over mid-request
pub struct FailingEmbedder;

impl EmbeddingModel for FailingEmbedder {
    fn name(&self) -> &str {
        "failing"
    }

    fn hidden_size(&self) -> Option<usize> {
        Some(StatsEmbedder::DIM)
    }

    fn embed(&self, _frame: &[f32]) -> Result<Vec<f32>> {
        Err(AppError::Inference("runtime unavailable".to_string()))
    }
}

/// Sleeps before answering
pub struct SlowEmbedder(pub Duration);

impl EmbeddingModel for SlowEmbedder {
    fn name(&self) -> &str {
        "slow"
    }

    fn hidden_size(&self) -> Option<usize> {
        Some(StatsEmbedder::DIM)
    }

    fn embed(&self, frame: &[f32]) -> Result<Vec<f32>> {
        std::thread::sleep(self.0);
        Ok(StatsEmbedder::stats(frame))
    }
}
