use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Classifier or embedding model could not be loaded. Fatal at startup.
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// Expected label is not one of the fixed lesson letters.
    #[error("Invalid label: {0:?}")]
    InvalidLabel(String),

    /// Preprocessing or model execution failed for a single request.
    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Whether the error is tied to one scoring request rather than to the process.
    pub fn is_per_request(&self) -> bool {
        matches!(
            self,
            AppError::InvalidLabel(_) | AppError::Inference(_) | AppError::Timeout(_)
        )
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for AppError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        AppError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for AppError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        AppError::Serialization(e.to_string())
    }
}

impl From<hound::Error> for AppError {
    fn from(e: hound::Error) -> Self {
        AppError::Audio(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_errors_are_recoverable() {
        assert!(AppError::InvalidLabel("X".to_string()).is_per_request());
        assert!(AppError::Inference("empty embedding".to_string()).is_per_request());
        assert!(AppError::Timeout(30_000).is_per_request());

        assert!(!AppError::ModelLoad("missing".to_string()).is_per_request());
        assert!(!AppError::InvalidState("service stopped".to_string()).is_per_request());
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert!(!AppError::from(io).is_per_request());
    }

    #[test]
    fn test_display_includes_context() {
        assert_eq!(
            AppError::InvalidLabel("Q".to_string()).to_string(),
            "Invalid label: \"Q\""
        );
        assert_eq!(
            AppError::Timeout(250).to_string(),
            "Request timed out after 250 ms"
        );
    }
}
