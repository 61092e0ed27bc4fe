//! NSF (NES Sound Format) replayer.
//!
//! An NSF file is a 6502 program plus its data. The player loads it into an
//! emulated NES memory map, calls the init routine for the chosen track and
//! then the play routine at the rate the header asks for, while the 2A03 APU
//! and any cartridge sound chips synthesize the output.
//!
//! - [`NsfHeader`]: header parsing and [`probe_header`]
//! - [`Cpu`]: the 6502 core
//! - [`NsfPlayer`]: the driver, an [`EmuCore`](chipsound_common::EmuCore)
//!
//! # Example
//!
//! ```no_run
//! use chipsound_common::PlaybackConfig;
//! use chipsound_nsf_replayer::load_nsf;
//!
//! # fn main() -> chipsound_common::Result<()> {
//! let data = std::fs::read("song.nsf").unwrap();
//! let mut music = load_nsf(&data, PlaybackConfig::default())?;
//! music.start_track(0)?;
//! let mut buffer = vec![0i16; 4096];
//! music.play(&mut buffer)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cpu;
pub mod error;
pub mod header;
pub mod machine;
pub mod player;

pub use cpu::{Bus, Cpu, Registers, Status};
pub use error::{NsfError, Result};
pub use header::{probe_header, ExpansionChips, NsfHeader};
pub use player::NsfPlayer;

use chipsound_common::{MusicEmu, PlaybackConfig};

/// Parse `data` and wrap the driver in a [`MusicEmu`] configured by `config`.
pub fn load_nsf(data: &[u8], config: PlaybackConfig) -> chipsound_common::Result<MusicEmu<NsfPlayer>> {
    let player = NsfPlayer::new(data)?;
    MusicEmu::new(player, config)
}
