//! Error types for seamless.

use thiserror::Error;

/// Result type alias using seamless's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for seamless.
#[derive(Error, Debug)]
pub enum Error {
    // Session contract violations
    #[error("Invalid stream id: {0}")]
    InvalidStream(String),

    #[error("Cannot call start more than once")]
    DoubleStart,

    #[error("Cannot call stop without calling start first")]
    StopBeforeStart,

    #[error("No stream attached")]
    NotAttached,

    #[error("Cannot attach a stream to a session that has already started")]
    AttachAfterStart,

    // Playback shortfalls
    #[error("Buffer not loaded for chunk {index}")]
    BufferUnavailable { index: usize },

    #[error("Chunk decode failed: {0}")]
    DecodeFailure(String),

    #[error("Invalid chunk catalog: {0}")]
    InvalidCatalog(String),

    #[error("Audio output error: {0}")]
    AudioOutput(String),

    // Network errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] HttpError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// HTTP-specific errors.
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Request failed with status {status}: {message}")]
    StatusError { status: u16, message: String },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl Error {
    /// Returns true if playback can continue past this error with degraded
    /// quality instead of aborting the session.
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::BufferUnavailable { .. }
                | Self::DecodeFailure(_)
                | Self::Network(_)
                | Self::Http(_)
        )
    }

    /// Returns true if the failed request is worth retrying.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_)
                | Self::Http(
                    HttpError::ConnectionFailed(_)
                        | HttpError::Timeout
                        | HttpError::StatusError { status: 500..=599, .. }
                )
        )
    }

    /// Returns true if this error is a misuse of the session lifecycle.
    pub const fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidStream(_)
                | Self::DoubleStart
                | Self::StopBeforeStart
                | Self::NotAttached
                | Self::AttachAfterStart
        )
    }
}
