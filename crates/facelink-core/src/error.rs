//! Error types for the FaceLink streaming engine

use std::path::PathBuf;

use thiserror::Error;

/// Core FaceLink errors
///
/// Every variant is recoverable at the stage that observes it: the frame or
/// clip involved is dropped, the failure is logged, and the session goes on.
#[derive(Error, Debug)]
pub enum FaceLinkError {
    // Codec errors
    #[error("Pose width mismatch: expected {expected} channels, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    // Transport errors
    #[error("Transport send failure: {0}")]
    TransportSendFailure(String),

    // Clip errors
    #[error("Failed to load clip {path}: {reason}")]
    ClipLoadFailure { path: PathBuf, reason: String },

    #[error("Invalid clip: {0}")]
    InvalidClip(String),

    // Audio errors
    #[error("Unsupported audio format: {0}")]
    AudioFormat(String),

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    // Pipeline errors
    #[error("Queue closed")]
    QueueClosed,

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FaceLinkError {
    pub fn clip_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        FaceLinkError::ClipLoadFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for FaceLink operations
pub type FaceLinkResult<T> = Result<T, FaceLinkError>;
