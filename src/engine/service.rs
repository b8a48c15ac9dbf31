//! Bounded inference queue for concurrent callers
//!
//! Each worker thread owns its own [`Scorer`], so models never have to be
//! shared across threads. Requests wait in a bounded queue and every call
//! is bounded by a timeout. A timed-out request is abandoned by the caller;
//! the worker still finishes it and drops the answer.

use super::Scorer;
use crate::error::{AppError, Result};
use crate::labels::Label;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Number of inference workers, each with its own loaded models
    pub workers: usize,
    /// Requests allowed to wait for a worker
    pub queue_depth: usize,
    /// Per-request deadline including queueing time
    pub request_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            queue_depth: 8,
            request_timeout_ms: 30_000,
        }
    }
}

struct ScoreJob {
    waveform: Vec<f32>,
    expected_label: String,
    reply: oneshot::Sender<Result<f32>>,
}

pub struct ScoringService {
    tx: mpsc::Sender<ScoreJob>,
    timeout: Duration,
    handles: Vec<JoinHandle<()>>,
}

impl ScoringService {
    /// Build one scorer per worker and start the workers.
    ///
    /// `factory` receives the worker index. Any load failure aborts startup.
    pub fn spawn<F>(config: &ServiceConfig, factory: F) -> Result<Self>
    where
        F: Fn(usize) -> Result<Scorer>,
    {
        let workers = config.workers.max(1);
        let scorers = (0..workers).map(&factory).collect::<Result<Vec<_>>>()?;

        let (tx, rx) = mpsc::channel::<ScoreJob>(config.queue_depth.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let mut handles = Vec::with_capacity(workers);
        for (index, scorer) in scorers.into_iter().enumerate() {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("scoring-worker-{}", index))
                .spawn(move || worker_loop(index, scorer, rx))?;
            handles.push(handle);
        }

        info!(
            "Scoring service started: {} workers, queue depth {}, timeout {} ms",
            workers, config.queue_depth, config.request_timeout_ms
        );

        Ok(Self {
            tx,
            timeout: Duration::from_millis(config.request_timeout_ms),
            handles,
        })
    }

    /// Queue a recording for scoring and wait for the result
    pub async fn score(&self, waveform: Vec<f32>, expected_label: &str) -> Result<f32> {
        // Reject unknown labels without occupying a worker
        Label::parse(expected_label)?;

        let (reply, response) = oneshot::channel();
        let job = ScoreJob {
            waveform,
            expected_label: expected_label.to_string(),
            reply,
        };

        let request = async {
            if self.tx.send(job).await.is_err() {
                return Err(AppError::InvalidState(
                    "Scoring service is shut down".to_string(),
                ));
            }
            response
                .await
                .unwrap_or_else(|_| Err(AppError::Inference("Scoring worker exited".to_string())))
        };

        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Scoring request timed out after {:?}", self.timeout);
                Err(AppError::Timeout(self.timeout.as_millis() as u64))
            }
        }
    }

    /// Stop accepting requests and wait for workers to drain the queue
    pub fn shutdown(self) {
        drop(self.tx);
        for handle in self.handles {
            if handle.join().is_err() {
                warn!("Scoring worker panicked");
            }
        }
        info!("Scoring service stopped");
    }
}

fn worker_loop(index: usize, scorer: Scorer, rx: Arc<Mutex<mpsc::Receiver<ScoreJob>>>) {
    loop {
        let job = {
            let mut rx = rx.blocking_lock();
            rx.blocking_recv()
        };

        let Some(job) = job else {
            debug!("Worker {} exiting", index);
            break;
        };

        let result = scorer.predict_score(&job.waveform, &job.expected_label);
        if job.reply.send(result).is_err() {
            debug!("Worker {}: caller went away before the result", index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{SlowEmbedder, StatsEmbedder};
    use crate::engine::MlpClassifier;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn classifier() -> MlpClassifier {
        let mut rng = StdRng::seed_from_u64(9);
        MlpClassifier::initialize(StatsEmbedder::DIM, &[16], &mut rng)
    }

    fn tone(len: usize, freq: f32) -> Vec<f32> {
        (0..len)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / 16000.0).sin())
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_requests_match_direct_scoring() {
        let config = ServiceConfig {
            workers: 3,
            queue_depth: 2,
            request_timeout_ms: 10_000,
        };
        let service = ScoringService::spawn(&config, |_| {
            Scorer::new(Box::new(StatsEmbedder), Box::new(classifier()))
        })
        .unwrap();
        let service = Arc::new(service);
        let direct = Scorer::new(Box::new(StatsEmbedder), Box::new(classifier())).unwrap();

        let waveforms: Vec<Vec<f32>> = (1..=6).map(|k| tone(8000 * k, 100.0 * k as f32)).collect();
        let tasks: Vec<_> = waveforms
            .iter()
            .zip(Label::ALL)
            .map(|(w, label)| {
                let service = service.clone();
                let w = w.clone();
                tokio::spawn(async move { service.score(w, label.symbol()).await })
            })
            .collect();

        for ((waveform, label), task) in waveforms.iter().zip(Label::ALL).zip(tasks) {
            let expected = direct.predict_score(waveform, label.symbol()).unwrap();
            assert_eq!(task.await.unwrap().unwrap(), expected);
        }

        match Arc::try_unwrap(service) {
            Ok(service) => service.shutdown(),
            Err(_) => panic!("service still shared"),
        }
    }

    #[tokio::test]
    async fn test_invalid_label_rejected_before_queueing() {
        let service = ScoringService::spawn(&ServiceConfig::default(), |_| {
            Scorer::new(Box::new(StatsEmbedder), Box::new(classifier()))
        })
        .unwrap();

        let result = service.score(vec![0.0; 100], "Q").await;
        assert!(matches!(result, Err(AppError::InvalidLabel(_))));
        service.shutdown();
    }

    #[tokio::test]
    async fn test_slow_inference_times_out() {
        let config = ServiceConfig {
            workers: 1,
            queue_depth: 1,
            request_timeout_ms: 20,
        };
        let service = ScoringService::spawn(&config, |_| {
            Scorer::new(
                Box::new(SlowEmbedder(Duration::from_millis(300))),
                Box::new(classifier()),
            )
        })
        .unwrap();

        let result = service.score(tone(16000, 440.0), "E").await;
        assert!(matches!(result, Err(AppError::Timeout(20))));
        service.shutdown();
    }

    #[test]
    fn test_factory_failure_is_fatal() {
        let result = ScoringService::spawn(&ServiceConfig::default(), |_| {
            Err(AppError::ModelLoad("missing weights".to_string()))
        });
        assert!(matches!(result, Err(AppError::ModelLoad(_))));
    }
}
