//! Error handling for NSF replayer components.

use chipsound::CoreError;
use chipsound_common::PlayerError;
use thiserror::Error;

/// Convenient result alias for NSF parsing and playback.
pub type Result<T> = std::result::Result<T, NsfError>;

/// Errors that may occur while parsing or replaying NSF files.
#[derive(Debug, Error)]
pub enum NsfError {
    /// File does not start with the `NESM\x1A` marker.
    #[error("NSF file must start with NESM header")]
    InvalidFileId,
    /// Buffer too small to contain the fixed header.
    #[error("NSF header needs {needed} bytes, got {available}")]
    TooSmall {
        /// Size of the header.
        needed: usize,
        /// Bytes actually present.
        available: usize,
    },
    /// Header declares no tracks.
    #[error("NSF file declares no tracks")]
    NoTracks,
    /// Synthesis buffer setup failed.
    #[error(transparent)]
    Core(#[from] CoreError),
    /// Generic validation error.
    #[error("{msg}")]
    InvalidData {
        /// Human-readable explanation of the validation failure.
        msg: String,
    },
}

impl From<String> for NsfError {
    fn from(s: String) -> Self {
        NsfError::InvalidData { msg: s }
    }
}

impl From<&str> for NsfError {
    fn from(s: &str) -> Self {
        NsfError::InvalidData { msg: s.to_string() }
    }
}

impl From<NsfError> for PlayerError {
    fn from(err: NsfError) -> Self {
        match err {
            NsfError::InvalidFileId => PlayerError::WrongFileType { format: "NSF" },
            NsfError::TooSmall { needed, available } => PlayerError::TooSmall { needed, available },
            NsfError::Core(core) => PlayerError::Core(core),
            other => PlayerError::InvalidData {
                msg: other.to_string(),
            },
        }
    }
}
