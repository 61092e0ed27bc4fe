//! SPC and SFM (Super Nintendo sound) replayer.
//!
//! Both formats are snapshots of the SNES audio subsystem: the SPC700 CPU
//! with its 64 KiB of RAM and the S-DSP. An SPC file holds the state and
//! lets the sound driver run freely; an SFM file also carries the complete
//! machine state in BML metadata plus a log of the values the main CPU
//! sent to the sound ports, which is fed back while playing.
//!
//! - [`SpcFile`] / [`SfmFile`]: file parsing, tags and [`probe_spc`] /
//!   [`probe_sfm`]
//! - [`Smp`]: the SPC700 CPU, timers and memory map
//! - [`Dsp`]: the sample decoder, envelopes, echo and mixer
//! - [`BmlDocument`]: SFM metadata documents
//! - [`SpcPlayer`] / [`SfmPlayer`]: the drivers, implementing
//!   [`EmuCore`](chipsound_common::EmuCore)
//!
//! # Example
//!
//! ```no_run
//! use chipsound_common::PlaybackConfig;
//! use chipsound_spc_replayer::load_spc;
//!
//! # fn main() -> chipsound_common::Result<()> {
//! let data = std::fs::read("song.spc").unwrap();
//! let mut music = load_spc(&data, PlaybackConfig::default())?;
//! music.start_track(0)?;
//! let mut buffer = vec![0i16; 4096];
//! music.play(&mut buffer)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod bml;
pub mod dsp;
pub mod error;
pub mod player;
pub mod sfm;
pub mod smp;
pub mod spc_file;

pub use bml::{BmlDocument, BmlNode};
pub use dsp::Dsp;
pub use error::{Result, SpcError};
pub use player::{SfmPlayer, SpcPlayer};
pub use sfm::{probe_sfm, SfmFile};
pub use smp::Smp;
pub use spc_file::{probe_spc, SpcFile, SpcTags};

use chipsound_common::{MusicEmu, PlaybackConfig};

/// Parse an SPC file and wrap the driver in a [`MusicEmu`] configured by
/// `config`.
pub fn load_spc(data: &[u8], config: PlaybackConfig) -> chipsound_common::Result<MusicEmu<SpcPlayer>> {
    let player = SpcPlayer::new(data)?;
    MusicEmu::new(player, config)
}

/// Parse an SFM file and wrap the driver in a [`MusicEmu`] configured by
/// `config`.
pub fn load_sfm(data: &[u8], config: PlaybackConfig) -> chipsound_common::Result<MusicEmu<SfmPlayer>> {
    let player = SfmPlayer::new(data)?;
    MusicEmu::new(player, config)
}
