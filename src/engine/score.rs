//! Mapping class probabilities to the 1–5 score shown to learners

use serde::{Deserialize, Serialize};

/// Closed numeric interval used by [`normalize`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRange {
    pub lo: f64,
    pub hi: f64,
}

impl ScoreRange {
    pub const PROBABILITY: ScoreRange = ScoreRange::new(0.0, 1.0);
    pub const SCORE: ScoreRange = ScoreRange::new(1.0, 5.0);

    pub const fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    pub fn width(&self) -> f64 {
        self.hi - self.lo
    }
}

/// Affine rescale of `value` from `source` to `target`. No clamping.
pub fn normalize(value: f64, source: ScoreRange, target: ScoreRange) -> f64 {
    debug_assert!(source.width() != 0.0, "degenerate source range {:?}", source);
    target.lo + target.width() * (value - source.lo) / source.width()
}

/// Probability of the expected label on the learner-facing scale
pub fn probability_to_score(probability: f64) -> f32 {
    normalize(probability, ScoreRange::PROBABILITY, ScoreRange::SCORE) as f32
}

/// Scores strictly above this count as a good pronunciation
pub const DEFAULT_GOOD_THRESHOLD: f32 = 3.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Good,
    NeedsPractice,
}

impl Verdict {
    pub fn for_score(score: f32, threshold: f32) -> Self {
        if score > threshold {
            Verdict::Good
        } else {
            Verdict::NeedsPractice
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Verdict::Good => "Great pronunciation!",
            Verdict::NeedsPractice => "Keep practising. Watch the video again and try once more.",
        }
    }
}
