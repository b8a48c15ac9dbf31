pub mod archive;
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod labels;
pub mod session;
pub mod storage;

use std::fs::File;
use std::path::Path;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub use config::AppConfig;
pub use engine::{predict_score, Scorer};
pub use error::{AppError, Result};
pub use labels::{Label, Lesson, LESSONS};

/// Initialize logging to the console and, optionally, a file.
///
/// `RUST_LOG` takes precedence; otherwise `phatam=info` (or `debug` when verbose).
pub fn init_logging(log_file: Option<&Path>, verbose: bool) -> Result<()> {
    let default_level = if verbose { "phatam=debug" } else { "phatam=info" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| AppError::Config(format!("Invalid log filter: {}", e)))?;

    let file_layer = match log_file {
        Some(path) => {
            let file = File::create(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr)) // Console output
        .with(file_layer) // File output
        .with(filter)
        .try_init()
        .map_err(|e| AppError::InvalidState(format!("Logging already initialized: {}", e)))
}
