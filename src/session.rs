//! Lesson walk-through and attempt evaluation
//!
//! A session starts on a greeting, then visits the eight lessons in order.
//! Each recorded attempt is scored, archived and stored; archiving never
//! changes the feedback a learner gets.

use crate::archive::{unique_audio_filename, unique_session_id, Uploader};
use crate::audio::{duration_ms, encode_wav, SAMPLE_RATE};
use crate::engine::{Scorer, Verdict};
use crate::error::{AppError, Result};
use crate::labels::{Lesson, LESSONS};
use crate::storage::{self, AttemptOutcome, AttemptRecord, Database, SessionRecord};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

/// Where a session currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Greeting,
    /// Index into [`LESSONS`]
    Lesson(usize),
    Done,
}

pub struct Session {
    id: String,
    started_at: String,
    step: Step,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: unique_session_id(),
            started_at: chrono::Utc::now().to_rfc3339(),
            step: Step::Greeting,
        }
    }

    /// Create a session and persist it
    pub fn start(db: &Database) -> Result<Self> {
        let session = Self::new();
        db.with_conn(|conn| {
            storage::insert_session(
                conn,
                &SessionRecord {
                    id: session.id.clone(),
                    started_at: session.started_at.clone(),
                },
            )
        })?;
        info!("Session {} started", session.id);
        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn step(&self) -> Step {
        self.step
    }

    /// Advance one step. Stays on [`Step::Done`] once reached.
    pub fn next_step(&mut self) -> Step {
        self.step = match self.step {
            Step::Greeting => Step::Lesson(0),
            Step::Lesson(i) if i + 1 < LESSONS.len() => Step::Lesson(i + 1),
            Step::Lesson(_) | Step::Done => Step::Done,
        };
        self.step
    }

    pub fn current_lesson(&self) -> Option<&'static Lesson> {
        match self.step {
            Step::Lesson(i) => LESSONS.get(i),
            _ => None,
        }
    }

    /// Lesson counter shown to the learner, e.g. `#3/8`
    pub fn progress(&self) -> Option<String> {
        match self.step {
            Step::Lesson(i) => Some(format!("#{}/{}", i + 1, LESSONS.len())),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.step == Step::Done
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// What the learner is told after an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Feedback {
    /// Nothing was recorded
    EmptyRecording,
    Verdict(Verdict),
    /// Scoring failed; ask for another recording
    RetryRecording,
}

impl Feedback {
    pub fn message(&self) -> &'static str {
        match self {
            Feedback::EmptyRecording => "No audio was recorded. Please try again.",
            Feedback::Verdict(verdict) => verdict.message(),
            Feedback::RetryRecording => "Something went wrong while scoring. Please record again.",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptReport {
    /// Stored attempt id; absent for empty recordings
    pub attempt_id: Option<String>,
    pub feedback: Feedback,
    pub score: Option<f32>,
    pub archive_path: Option<String>,
    pub error: Option<String>,
}

/// Score one recording for `lesson`, archive it and record the attempt.
///
/// Only database failures are returned as errors; scoring and archive
/// failures end up in the report.
pub fn evaluate_attempt(
    scorer: &Scorer,
    uploader: &dyn Uploader,
    db: &Database,
    session: &Session,
    lesson: &Lesson,
    waveform: &[f32],
    threshold: f32,
) -> Result<AttemptReport> {
    if waveform.is_empty() {
        return Ok(AttemptReport {
            attempt_id: None,
            feedback: Feedback::EmptyRecording,
            score: None,
            archive_path: None,
            error: None,
        });
    }

    let scored = scorer.predict_score(waveform, lesson.id());
    let (outcome, score, feedback, error) = match &scored {
        Ok(score) => (
            AttemptOutcome::Scored,
            Some(*score),
            Feedback::Verdict(Verdict::for_score(*score, threshold)),
            None,
        ),
        Err(e) => {
            warn!("Scoring failed for lesson {}: {}", lesson.id(), e);
            let outcome = match e {
                AppError::InvalidLabel(_) => AttemptOutcome::InvalidLabel,
                _ => AttemptOutcome::Failed,
            };
            (outcome, None, Feedback::RetryRecording, Some(e.to_string()))
        }
    };

    let destination = unique_audio_filename(&session.id, lesson.label, score);
    let archive_path = match encode_wav(waveform).and_then(|wav| uploader.upload(&wav, &destination)) {
        Ok(()) => Some(destination),
        Err(e) => {
            warn!("Failed to archive recording {}: {}", destination, e);
            None
        }
    };

    let record = AttemptRecord {
        id: Uuid::new_v4().to_string(),
        session_id: session.id.clone(),
        created_at: chrono::Utc::now().to_rfc3339(),
        label: lesson.id().to_string(),
        outcome,
        score,
        archive_path: archive_path.clone(),
        duration_ms: duration_ms(waveform, SAMPLE_RATE as u32),
        error: error.clone(),
    };
    db.with_conn(|conn| storage::insert_attempt(conn, &record))?;

    info!(
        "Attempt {} on {}: {:?} ({})",
        record.id,
        lesson.id(),
        score,
        outcome.as_str()
    );

    Ok(AttemptReport {
        attempt_id: Some(record.id),
        feedback,
        score,
        archive_path,
        error,
    })
}
