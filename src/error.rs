use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by mixer and transport operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("No stem player active")]
    NoActiveSource,

    #[error("Invalid stem index: {0}")]
    InvalidStem(usize),

    #[error("Playback is not running")]
    NotPlaying,
}

/// Central error type for the stem-live crate.
#[derive(Debug, Error)]
pub enum ServiceError {
    // Generic fallback (wraps anyhow)
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),

    #[error("{0}")]
    Validation(String),

    #[error("Audio file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Separation failed: {0}")]
    Separation(String),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error("{0}")]
    Protocol(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// --- Implement From conversions for common errors ---
impl From<serde_json::Error> for ServiceError {
    fn from(e: serde_json::Error) -> Self {
        ServiceError::Anyhow(e.into())
    }
}

impl From<hound::Error> for ServiceError {
    fn from(e: hound::Error) -> Self {
        ServiceError::Anyhow(e.into())
    }
}

impl From<ndarray::ShapeError> for ServiceError {
    fn from(e: ndarray::ShapeError) -> Self {
        ServiceError::Anyhow(e.into())
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
