//! Shared track handling for chipsound replayers.
//!
//! A format crate implements [`EmuCore`] for its driver; wrapping the
//! driver in a [`MusicEmu`] adds play length and fade, silence detection,
//! seeking and the output stage.
//!
//! # Example
//!
//! ```ignore
//! use chipsound_common::{MusicEmu, PlaybackConfig};
//!
//! let mut music = MusicEmu::new(driver, PlaybackConfig::default())?;
//! music.start_track(0)?;
//! let mut buffer = vec![0i16; 2048];
//! while music.play(&mut buffer)? > 0 {
//!     // ... hand buffer to the audio device
//! }
//! ```

#![warn(missing_docs)]

mod config;
mod emu;
mod error;
mod metadata;
mod music_emu;
pub mod pcm;
mod player;
pub mod track_filter;

pub use config::{
    EndBehavior, InterpolationMode, PlaybackConfig, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE, PLAY_ALL,
    REPEAT_FOREVER,
};
pub use emu::{EmuCore, Equalizer, DEFAULT_MAX_INITIAL_SILENCE_SECS, DEFAULT_SILENCE_LOOKAHEAD};
pub use error::{PlayerError, Result};
pub use metadata::{MetadataFields, ProbeResult, TrackInfo};
pub use music_emu::MusicEmu;
pub use pcm::ChannelLayout;
pub use player::{ChiptunePlayer, ChiptunePlayerBase, PlaybackState};
pub use track_filter::TrackFilter;

/// Standard audio sample rate (44.1 kHz CD quality).
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
