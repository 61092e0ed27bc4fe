//! Error types for the synthesis and resampling primitives.

use thiserror::Error;

/// Convenient result alias for buffer and resampler configuration.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while configuring buffers, resamplers or chips.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Requested buffer is larger than the fixed-point time range allows.
    #[error("buffer of {requested} samples exceeds limit of {limit} samples")]
    BufferTooLarge {
        /// Number of samples requested.
        requested: usize,
        /// Largest representable buffer size.
        limit: usize,
    },
    /// Output sample rate outside the supported range.
    #[error("unsupported sample rate {rate} Hz")]
    UnsupportedSampleRate {
        /// Rate that was requested.
        rate: u32,
    },
    /// Resampling ratio is not a finite positive number.
    #[error("invalid resampling ratio {ratio}")]
    InvalidRatio {
        /// Ratio that was requested.
        ratio: f64,
    },
    /// Generic validation error.
    #[error("{msg}")]
    InvalidData {
        /// Human-readable explanation of the validation failure.
        msg: String,
    },
}

impl From<String> for CoreError {
    fn from(s: String) -> Self {
        CoreError::InvalidData { msg: s }
    }
}

impl From<&str> for CoreError {
    fn from(s: &str) -> Self {
        CoreError::InvalidData { msg: s.to_string() }
    }
}
