//! Training data collection
//!
//! Recordings are laid out one directory per label:
//! `<root>/<label>/*.wav`. Directory names are parsed with [`Label::parse`],
//! so the historical lowercase `i` folder is accepted.

use crate::audio::{load_recording, preprocess};
use crate::engine::EmbeddingModel;
use crate::error::{AppError, Result};
use crate::labels::Label;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Embedded recordings ready for [`crate::engine::fit`]
#[derive(Debug, Default)]
pub struct Dataset {
    pub features: Vec<Vec<f32>>,
    pub labels: Vec<Label>,
    pub sources: Vec<PathBuf>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of samples per label, in index order
    pub fn class_counts(&self) -> [usize; Label::COUNT] {
        let mut counts = [0; Label::COUNT];
        for label in &self.labels {
            counts[label.index()] += 1;
        }
        counts
    }
}

/// List `(label, path)` for every WAV file under `root`, sorted for stable order
pub fn collect_recordings(root: &Path) -> Result<Vec<(Label, PathBuf)>> {
    if !root.is_dir() {
        return Err(AppError::NotFound(format!("Dataset directory {:?}", root)));
    }

    let mut recordings = Vec::new();
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(root)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();

    for dir in dirs {
        let name = dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let label = match Label::parse(name) {
            Ok(label) => label,
            Err(_) => {
                warn!("Skipping {:?}: not a lesson label", dir);
                continue;
            }
        };

        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case("wav"))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        recordings.extend(files.into_iter().map(|f| (label, f)));
    }

    Ok(recordings)
}

/// Load, preprocess and embed every recording under `root`.
///
/// Unreadable files are skipped with a warning; embedding failures abort.
pub fn build_dataset(root: &Path, embedder: &dyn EmbeddingModel) -> Result<Dataset> {
    let recordings = collect_recordings(root)?;
    info!("Embedding {} recordings from {:?}", recordings.len(), root);

    let mut dataset = Dataset::default();
    for (i, (label, path)) in recordings.into_iter().enumerate() {
        let samples = match load_recording(&path) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("Skipping {:?}: {}", path, e);
                continue;
            }
        };

        let frame = preprocess(&samples)?;
        let features = embedder.embed(&frame)?;

        if (i + 1) % 50 == 0 {
            info!("Embedded {} recordings", i + 1);
        }

        dataset.features.push(features);
        dataset.labels.push(label);
        dataset.sources.push(path);
    }

    info!("Dataset ready: {} samples, per label {:?}", dataset.len(), dataset.class_counts());
    Ok(dataset)
}
