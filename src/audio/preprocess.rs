//! Fixed one-second framing of raw recordings

use super::trim::{trim_silence, TrimConfig};
use crate::error::{AppError, Result};

/// Sample rate expected by the embedding model
pub const SAMPLE_RATE: usize = 16000;

/// Samples in the fixed classifier window (one second)
pub const FRAME_SAMPLES: usize = SAMPLE_RATE;

/// Trim silence, then truncate or zero-pad to exactly [`FRAME_SAMPLES`].
///
/// Empty and all-silent input produce an all-zero frame. Non-finite samples
/// are rejected as a malformed waveform.
pub fn preprocess(waveform: &[f32]) -> Result<Vec<f32>> {
    preprocess_with(waveform, &TrimConfig::default())
}

pub fn preprocess_with(waveform: &[f32], config: &TrimConfig) -> Result<Vec<f32>> {
    if let Some(pos) = waveform.iter().position(|s| !s.is_finite()) {
        return Err(AppError::Inference(format!(
            "Malformed waveform: non-finite sample at index {}",
            pos
        )));
    }

    let trimmed = trim_silence(waveform, config);
    let take = trimmed.len().min(FRAME_SAMPLES);

    let mut frame = Vec::with_capacity(FRAME_SAMPLES);
    frame.extend_from_slice(&trimmed[..take]);
    frame.resize(FRAME_SAMPLES, 0.0);

    Ok(frame)
}
