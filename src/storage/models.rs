use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub started_at: String,
}

/// How a single attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Scored,
    /// Preprocessing or model failure
    Failed,
    /// Expected label was not one of the lesson letters
    InvalidLabel,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Scored => "scored",
            AttemptOutcome::Failed => "failed",
            AttemptOutcome::InvalidLabel => "invalid_label",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scored" => Some(AttemptOutcome::Scored),
            "failed" => Some(AttemptOutcome::Failed),
            "invalid_label" => Some(AttemptOutcome::InvalidLabel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub id: String,
    pub session_id: String,
    pub created_at: String,
    /// Lesson letter as shown to the learner
    pub label: String,
    pub outcome: AttemptOutcome,
    /// Present only when the attempt was scored
    pub score: Option<f32>,
    /// Archive destination, absent when archiving failed
    pub archive_path: Option<String>,
    pub duration_ms: i64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub attempts: usize,
    pub scored: usize,
    /// Attempts that produced no score
    pub failed: usize,
    pub mean_score: Option<f32>,
    pub best_score: Option<f32>,
}
