//! Error types for tono
//!
//! Centralized error handling using thiserror. Public session operations
//! never return these; they log and carry on. The internal steps do.

use thiserror::Error;

/// Main error type for tono
#[derive(Error, Debug)]
pub enum TonoError {
    #[error("no track set, can't play")]
    NoTrack,

    #[error("fail timeout can't be negative (got {0}ms)")]
    NegativeTimeout(i64),

    #[error("session has been destroyed")]
    Destroyed,

    #[error("volume {0} out of range (0-100)")]
    VolumeOutOfRange(u32),

    #[error("invalid player options: {0}")]
    Options(#[from] serde_json::Error),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for tono
pub type Result<T> = std::result::Result<T, TonoError>;

impl From<symphonia::core::errors::Error> for TonoError {
    fn from(e: symphonia::core::errors::Error) -> Self {
        TonoError::Decode(e.to_string())
    }
}
