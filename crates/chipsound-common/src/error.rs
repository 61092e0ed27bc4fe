//! Error handling shared by every replayer.

use chipsound::CoreError;
use thiserror::Error;

/// Convenient result alias for track loading and playback.
pub type Result<T> = std::result::Result<T, PlayerError>;

/// Errors raised while loading, configuring or playing a track.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// Data is not in the format the replayer expects.
    #[error("wrong file type: {format} signature not found")]
    WrongFileType {
        /// Format the data was tested against.
        format: &'static str,
    },
    /// File ends before a mandatory structure.
    #[error("file too small: {needed} bytes needed, {available} available")]
    TooSmall {
        /// Bytes the structure requires.
        needed: usize,
        /// Bytes actually present.
        available: usize,
    },
    /// Track index outside the file's track list.
    #[error("track {track} out of range ({count} available)")]
    NoSuchTrack {
        /// Requested track.
        track: usize,
        /// Number of tracks in the file.
        count: usize,
    },
    /// A playback operation was issued before any track was started.
    #[error("no track started")]
    NoTrackStarted,
    /// A configuration field is outside its supported range.
    #[error("invalid configuration: {field}: {msg}")]
    InvalidConfig {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        msg: String,
    },
    /// Configuration could not be parsed or serialized.
    #[error("configuration format: {0}")]
    ConfigFormat(#[from] serde_json::Error),
    /// Buffer or resampler setup failed.
    #[error(transparent)]
    Core(#[from] CoreError),
    /// The emulated program misbehaved badly enough to stop the track.
    #[error("emulation error: {msg}")]
    Emulation {
        /// Description of the failure.
        msg: String,
    },
    /// Operation is not available for this format.
    #[error("{0} is not supported by this format")]
    Unsupported(&'static str),
    /// Generic validation error.
    #[error("{msg}")]
    InvalidData {
        /// Human-readable explanation of the validation failure.
        msg: String,
    },
}

impl From<String> for PlayerError {
    fn from(s: String) -> Self {
        PlayerError::InvalidData { msg: s }
    }
}

impl From<&str> for PlayerError {
    fn from(s: &str) -> Self {
        PlayerError::InvalidData { msg: s.to_string() }
    }
}
