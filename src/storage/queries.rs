use crate::error::Result;
use crate::storage::models::{AttemptOutcome, AttemptRecord, SessionRecord, SessionSummary};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};

// Session queries

pub fn insert_session(conn: &Connection, s: &SessionRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO sessions (id, started_at) VALUES (?1, ?2)",
        params![s.id, s.started_at],
    )?;
    Ok(())
}

pub fn get_session(conn: &Connection, id: &str) -> Result<Option<SessionRecord>> {
    let session = conn.query_row(
        "SELECT id, started_at FROM sessions WHERE id = ?1",
        [id],
        |row| {
            Ok(SessionRecord {
                id: row.get(0)?,
                started_at: row.get(1)?,
            })
        },
    );

    match session {
        Ok(s) => Ok(Some(s)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// Attempt queries

const ATTEMPT_COLUMNS: &str =
    "id, session_id, created_at, label, outcome, score, archive_path, duration_ms, error";

pub fn insert_attempt(conn: &Connection, a: &AttemptRecord) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO attempts (id, session_id, created_at, label, outcome, score, archive_path, duration_ms, error)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            a.id,
            a.session_id,
            a.created_at,
            a.label,
            a.outcome.as_str(),
            a.score.map(|s| s as f64),
            a.archive_path,
            a.duration_ms,
            a.error
        ],
    )?;
    Ok(())
}

fn attempt_from_row(row: &Row) -> rusqlite::Result<AttemptRecord> {
    let outcome: String = row.get(4)?;
    let outcome = AttemptOutcome::parse(&outcome).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            Type::Text,
            format!("unknown attempt outcome {:?}", outcome).into(),
        )
    })?;

    Ok(AttemptRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        created_at: row.get(2)?,
        label: row.get(3)?,
        outcome,
        score: row.get::<_, Option<f64>>(5)?.map(|s| s as f32),
        archive_path: row.get(6)?,
        duration_ms: row.get(7)?,
        error: row.get(8)?,
    })
}

pub fn get_attempt(conn: &Connection, id: &str) -> Result<Option<AttemptRecord>> {
    let attempt = conn.query_row(
        &format!("SELECT {} FROM attempts WHERE id = ?1", ATTEMPT_COLUMNS),
        [id],
        attempt_from_row,
    );

    match attempt {
        Ok(a) => Ok(Some(a)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Attempts of one session, oldest first
pub fn list_attempts(conn: &Connection, session_id: &str) -> Result<Vec<AttemptRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM attempts WHERE session_id = ?1 ORDER BY created_at, rowid",
        ATTEMPT_COLUMNS
    ))?;

    let rows = stmt.query_map([session_id], attempt_from_row)?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

pub fn session_summary(conn: &Connection, session_id: &str) -> Result<SessionSummary> {
    let attempts = list_attempts(conn, session_id)?;
    let scores: Vec<f32> = attempts.iter().filter_map(|a| a.score).collect();

    let mean_score = if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f32>() / scores.len() as f32)
    };
    let best_score = scores.iter().copied().fold(None, |best: Option<f32>, s| {
        Some(best.map_or(s, |b| b.max(s)))
    });

    Ok(SessionSummary {
        session_id: session_id.to_string(),
        attempts: attempts.len(),
        scored: scores.len(),
        failed: attempts
            .iter()
            .filter(|a| a.outcome != AttemptOutcome::Scored)
            .count(),
        mean_score,
        best_score,
    })
}
