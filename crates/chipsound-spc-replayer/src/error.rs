//! Error handling for SPC and SFM replayer components.

use chipsound::CoreError;
use chipsound_common::PlayerError;
use thiserror::Error;

/// Convenient result alias for SPC/SFM parsing and playback.
pub type Result<T> = std::result::Result<T, SpcError>;

/// Errors that may occur while parsing or replaying SPC and SFM files.
#[derive(Debug, Error)]
pub enum SpcError {
    /// File does not carry the expected signature.
    #[error("not an {format} file")]
    InvalidFileId {
        /// Format that was expected.
        format: &'static str,
    },
    /// File is shorter than its fixed layout.
    #[error("{format} file needs {needed} bytes, got {available}")]
    TooSmall {
        /// Format that was expected.
        format: &'static str,
        /// Minimum size.
        needed: usize,
        /// Bytes actually present.
        available: usize,
    },
    /// Resampler setup failed.
    #[error(transparent)]
    Core(#[from] CoreError),
    /// Generic validation error.
    #[error("{msg}")]
    InvalidData {
        /// Human-readable explanation of the validation failure.
        msg: String,
    },
}

impl From<String> for SpcError {
    fn from(s: String) -> Self {
        SpcError::InvalidData { msg: s }
    }
}

impl From<&str> for SpcError {
    fn from(s: &str) -> Self {
        SpcError::InvalidData { msg: s.to_string() }
    }
}

impl From<SpcError> for PlayerError {
    fn from(err: SpcError) -> Self {
        match err {
            SpcError::InvalidFileId { format } => PlayerError::WrongFileType { format },
            SpcError::TooSmall {
                needed, available, ..
            } => PlayerError::TooSmall { needed, available },
            SpcError::Core(core) => PlayerError::Core(core),
            other => PlayerError::InvalidData {
                msg: other.to_string(),
            },
        }
    }
}
