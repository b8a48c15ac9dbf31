//! Recording archive
//!
//! Every attempt's audio is kept, whatever the scoring outcome, under
//! `{session_id}/{label}_{uuid}_{score}.wav`.

use crate::error::{AppError, Result};
use crate::labels::Label;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

// session/label_uuid_score.wav; label may be a non-ASCII letter
static RE_DESTINATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-f]{32}/[\p{L}]+_[0-9a-f]{32}_(?:[0-9]+\.[0-9]{3}|none)\.wav$").unwrap()
});

/// Destination for archived recordings
pub trait Uploader: Send + Sync {
    /// Store `data` under the relative `destination` name
    fn upload(&self, data: &[u8], destination: &str) -> Result<()>;
}

/// Fresh 32-char hex session id
pub fn unique_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Archive name for one attempt. A failed scoring is recorded as `none`.
pub fn unique_audio_filename(session_id: &str, label: Label, score: Option<f32>) -> String {
    let score = match score {
        Some(score) => format!("{:.3}", score),
        None => "none".to_string(),
    };
    format!(
        "{}/{}_{}_{}.wav",
        session_id,
        label.symbol(),
        Uuid::new_v4().simple(),
        score
    )
}

/// Whether `destination` looks like a name from [`unique_audio_filename`]
pub fn is_valid_destination(destination: &str) -> bool {
    RE_DESTINATION.is_match(destination)
}

/// Archive on the local filesystem
pub struct LocalArchive {
    root: PathBuf,
}

impl LocalArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path for a destination name, rejecting anything that could escape the root
    pub fn resolve(&self, destination: &str) -> Result<PathBuf> {
        if !is_valid_destination(destination) {
            return Err(AppError::InvalidState(format!(
                "Refusing archive destination {:?}",
                destination
            )));
        }
        Ok(self.root.join(destination))
    }
}

impl Uploader for LocalArchive {
    fn upload(&self, data: &[u8], destination: &str) -> Result<()> {
        let path = self.resolve(destination)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, data)?;
        debug!("Archived {} bytes to {:?}", data.len(), path);
        Ok(())
    }
}
