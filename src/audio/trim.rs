//! Leading/trailing silence trimming
//!
//! Frame-based RMS energy thresholding. Frames are centered on multiples of
//! the hop (the signal is zero-padded by half a frame on both sides) and a
//! frame counts as sound when its energy is within `top_db` of the loudest
//! frame. The same input always yields the same span.

use tracing::debug;

/// Floor applied to frame power before taking the log
const AMIN: f64 = 1e-10;

/// Configuration for silence trimming
#[derive(Debug, Clone)]
pub struct TrimConfig {
    /// Frame length in samples for energy calculation
    pub frame_length: usize,
    /// Step between frames in samples
    pub hop_length: usize,
    /// Threshold in decibels below the peak frame
    pub top_db: f32,
}

impl Default for TrimConfig {
    fn default() -> Self {
        Self {
            frame_length: 2048,
            hop_length: 512,
            top_db: 12.0,
        }
    }
}

impl TrimConfig {
    /// Create a trim config with a custom threshold
    pub fn with_top_db(top_db: f32) -> Self {
        Self {
            top_db,
            ..Default::default()
        }
    }
}

/// RMS energy of every centered frame
pub fn frame_rms(samples: &[f32], config: &TrimConfig) -> Vec<f32> {
    if samples.is_empty() || config.hop_length == 0 {
        return Vec::new();
    }

    let half = config.frame_length / 2;
    let n_frames = 1 + samples.len() / config.hop_length;
    let mut frames = Vec::with_capacity(n_frames);

    for i in 0..n_frames {
        // Window in padded coordinates is [i*hop, i*hop + frame_length)
        let padded_start = i * config.hop_length;
        let start = padded_start.saturating_sub(half).min(samples.len());
        let end = (padded_start + config.frame_length)
            .saturating_sub(half)
            .min(samples.len());

        let sum_sq: f64 = samples[start..end]
            .iter()
            .map(|&s| (s as f64) * (s as f64))
            .sum();
        frames.push((sum_sq / config.frame_length as f64).sqrt() as f32);
    }

    frames
}

/// Find the `[start, end)` span of non-silent audio.
///
/// Returns `(0, 0)` for empty input.
pub fn non_silent_span(samples: &[f32], config: &TrimConfig) -> (usize, usize) {
    let rms = frame_rms(samples, config);
    if rms.is_empty() {
        return (0, 0);
    }

    let power: Vec<f64> = rms.iter().map(|&r| (r as f64) * (r as f64)).collect();
    let reference = power.iter().cloned().fold(0.0f64, f64::max);
    let ref_db = 10.0 * reference.max(AMIN).log10();
    let threshold = -(config.top_db as f64);

    let is_sound = |p: f64| 10.0 * p.max(AMIN).log10() - ref_db > threshold;

    let first = power.iter().position(|&p| is_sound(p));
    let last = power.iter().rposition(|&p| is_sound(p));

    match (first, last) {
        (Some(first), Some(last)) => {
            let start = (first * config.hop_length).min(samples.len());
            let end = ((last + 1) * config.hop_length).min(samples.len());
            debug!(
                "Non-silent span: {}..{} of {} samples ({} frames)",
                start,
                end,
                samples.len(),
                rms.len()
            );
            (start, end)
        }
        _ => (0, 0),
    }
}

/// Remove leading and trailing near-silence
pub fn trim_silence<'a>(samples: &'a [f32], config: &TrimConfig) -> &'a [f32] {
    let (start, end) = non_silent_span(samples, config);
    &samples[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16000.0).sin())
            .collect()
    }

    #[test]
    fn test_trims_leading_and_trailing_silence() {
        let mut samples = vec![0.0f32; 8000];
        samples.extend(tone(8000, 0.5));
        samples.extend(vec![0.0f32; 8000]);

        let (start, end) = non_silent_span(&samples, &TrimConfig::default());

        // Bounds land within one frame of the tone edges
        assert!(start <= 8000 && start >= 8000 - 2048, "start = {}", start);
        assert!(end >= 16000 && end <= 16000 + 2048, "end = {}", end);
    }

    #[test]
    fn test_loud_constant_tone_not_trimmed() {
        let samples = tone(32000, 0.8);
        let trimmed = trim_silence(&samples, &TrimConfig::default());
        assert_eq!(trimmed.len(), samples.len());
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(non_silent_span(&[], &TrimConfig::default()), (0, 0));
        assert!(frame_rms(&[], &TrimConfig::default()).is_empty());
    }

    #[test]
    fn test_span_is_deterministic() {
        let mut samples = vec![0.001f32; 3000];
        samples.extend(tone(5000, 0.3));
        samples.extend(vec![0.002f32; 7000]);

        let config = TrimConfig::default();
        assert_eq!(
            non_silent_span(&samples, &config),
            non_silent_span(&samples, &config)
        );
    }

    #[test]
    fn test_higher_top_db_keeps_more() {
        let mut samples = vec![0.02f32; 6000];
        samples.extend(tone(6000, 0.5));
        samples.extend(vec![0.02f32; 6000]);

        let strict = trim_silence(&samples, &TrimConfig::with_top_db(12.0)).len();
        let loose = trim_silence(&samples, &TrimConfig::with_top_db(60.0)).len();
        assert!(loose >= strict);
        assert_eq!(loose, samples.len());
    }
}
