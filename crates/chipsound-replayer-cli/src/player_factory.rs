//! Format detection and player creation.
//!
//! Every supported format is probed by content, never by file extension.

use anyhow::{bail, Context, Result};
use chipsound_common::{ChannelLayout, MusicEmu, PlaybackConfig, ProbeResult, TrackInfo};
use chipsound_nsf_replayer::{load_nsf, probe_header, NsfPlayer};
use chipsound_spc_replayer::{load_sfm, load_spc, probe_sfm, probe_spc, SfmPlayer, SpcPlayer};

/// A loaded file of any supported format.
pub enum AnyPlayer {
    /// NES Sound Format.
    Nsf(MusicEmu<NsfPlayer>),
    /// SNES SPC snapshot.
    Spc(MusicEmu<SpcPlayer>),
    /// SNES state snapshot with port log.
    Sfm(MusicEmu<SfmPlayer>),
}

macro_rules! with_player {
    ($self:expr, $music:ident => $body:expr) => {
        match $self {
            AnyPlayer::Nsf($music) => $body,
            AnyPlayer::Spc($music) => $body,
            AnyPlayer::Sfm($music) => $body,
        }
    };
}

/// File formats the renderer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// NES Sound Format.
    Nsf,
    /// SNES SPC snapshot.
    Spc,
    /// SNES state snapshot with port log.
    Sfm,
}

impl Format {
    /// Short display name.
    pub fn name(self) -> &'static str {
        match self {
            Format::Nsf => "NSF",
            Format::Spc => "SPC",
            Format::Sfm => "SFM",
        }
    }
}

type Probe = fn(&[u8]) -> ProbeResult;

const PROBES: [(Format, Probe); 3] = [
    (Format::Nsf, probe_header),
    (Format::Spc, probe_spc),
    (Format::Sfm, probe_sfm),
];

/// Format `data` is in.
pub fn detect_format(data: &[u8]) -> Result<Format> {
    for (format, probe) in PROBES {
        match probe(data) {
            ProbeResult::Match => return Ok(format),
            ProbeResult::NeedMoreData { needed } => {
                bail!("truncated {} file: {} of {needed} bytes", format.name(), data.len())
            }
            ProbeResult::NoMatch => {}
        }
    }
    bail!("unrecognized file format")
}

impl AnyPlayer {
    /// Probe `data` and load it with `config`.
    pub fn load(data: &[u8], config: PlaybackConfig) -> Result<Self> {
        let format = detect_format(data)?;
        tracing::debug!("detected {}", format.name());
        let player = match format {
            Format::Nsf => AnyPlayer::Nsf(load_nsf(data, config).context("loading NSF")?),
            Format::Spc => AnyPlayer::Spc(load_spc(data, config).context("loading SPC")?),
            Format::Sfm => AnyPlayer::Sfm(load_sfm(data, config).context("loading SFM")?),
        };
        Ok(player)
    }

    /// Format of the loaded file.
    pub fn format(&self) -> Format {
        match self {
            AnyPlayer::Nsf(_) => Format::Nsf,
            AnyPlayer::Spc(_) => Format::Spc,
            AnyPlayer::Sfm(_) => Format::Sfm,
        }
    }

    /// Output rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        with_player!(self, music => music.sample_rate())
    }

    /// Tracks in the file.
    pub fn track_count(&self) -> usize {
        with_player!(self, music => music.track_count())
    }

    /// Metadata for `track`.
    pub fn track_info(&self, track: usize) -> Result<TrackInfo> {
        with_player!(self, music => Ok(music.track_info(track)?))
    }

    /// Voice names of the loaded file.
    pub fn voice_names(&self) -> Vec<&'static str> {
        with_player!(self, music => music.voice_names())
    }

    /// Start `track` from its beginning.
    pub fn start_track(&mut self, track: usize) -> Result<()> {
        with_player!(self, music => music.start_track(track))
            .with_context(|| format!("starting track {track}"))
    }

    /// Play length of the current track, if bounded.
    pub fn length_ms(&self) -> Option<u64> {
        with_player!(self, music => music.length_ms())
    }

    /// Track currently playing.
    pub fn current_track(&self) -> Option<usize> {
        with_player!(self, music => music.current_track())
    }

    /// Render interleaved 16-bit stereo. Returns frames produced.
    pub fn play(&mut self, out: &mut [i16]) -> Result<usize> {
        Ok(with_player!(self, music => music.play(out))?)
    }

    /// Render interleaved float stereo. Returns frames produced.
    pub fn play_f32(&mut self, out: &mut [f32]) -> Result<usize> {
        Ok(with_player!(self, music => music.render_f32(out, ChannelLayout::Stereo))?)
    }

    /// Non-fatal problems found while loading or playing.
    pub fn warnings(&self) -> &[String] {
        with_player!(self, music => music.warnings())
    }
}

/// Multi-line description of the file and its tracks.
pub fn describe(player: &AnyPlayer) -> Result<String> {
    let mut text = String::new();
    let first = player.track_info(0)?;
    text.push_str(&format!("Format:  {} ({})\n", player.format().name(), first.system));
    if !first.game.is_empty() {
        text.push_str(&format!("Game:    {}\n", first.game));
    }
    if !first.author.is_empty() {
        text.push_str(&format!("Author:  {}\n", first.author));
    }
    if !first.copyright.is_empty() {
        text.push_str(&format!("(C)      {}\n", first.copyright));
    }
    if !first.dumper.is_empty() {
        text.push_str(&format!("Dumper:  {}\n", first.dumper));
    }
    text.push_str(&format!("Voices:  {}\n", player.voice_names().join(", ")));
    for warning in player.warnings() {
        text.push_str(&format!("Warning: {warning}\n"));
    }
    for track in 0..player.track_count() {
        let info = player.track_info(track)?;
        let length = match info.play_length_ms(0) {
            Some(ms) => format!("{}:{:02}", ms / 60_000, ms / 1000 % 60),
            None => "-".to_string(),
        };
        let title = if info.song.is_empty() { "(untitled)" } else { info.song.as_str() };
        text.push_str(&format!("  {:>3}  {:>6}  {}\n", track, length, title));
    }
    Ok(text)
}

/// An SPC image whose program only spins, for tests.
#[cfg(test)]
pub(crate) fn idle_spc() -> Vec<u8> {
    use chipsound_spc_replayer::smp::RAM_SIZE;
    use chipsound_spc_replayer::spc_file::{MIN_FILE_SIZE, RAM_OFFSET, SIGNATURE};

    let mut data = vec![0u8; MIN_FILE_SIZE];
    data[..SIGNATURE.len()].copy_from_slice(SIGNATURE);
    data[0x23] = 0x1A;
    data[0x24] = 30;
    data[0x25..0x27].copy_from_slice(&0x0200u16.to_le_bytes());
    data[0x2B] = 0xEF;
    data[0x2E..0x33].copy_from_slice(b"Quiet");
    let ram = &mut data[RAM_OFFSET..RAM_OFFSET + RAM_SIZE];
    // BRA *
    ram[0x0200] = 0x2F;
    ram[0x0201] = 0xFE;
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(&idle_spc()).unwrap(), Format::Spc);
        assert!(detect_format(b"RIFF....WAVE").is_err());
        let err = detect_format(b"NESM\x1a").unwrap_err();
        assert!(err.to_string().contains("truncated NSF"));

        let mut sfm = vec![0u8; chipsound_spc_replayer::sfm::MIN_FILE_SIZE];
        sfm[..4].copy_from_slice(chipsound_spc_replayer::sfm::SIGNATURE);
        assert_eq!(detect_format(&sfm).unwrap(), Format::Sfm);
        assert_eq!(Format::Sfm.name(), "SFM");
    }

    #[test]
    fn test_load_spc_and_describe() {
        let player = AnyPlayer::load(&idle_spc(), PlaybackConfig::default()).unwrap();
        assert_eq!(player.format(), Format::Spc);
        assert_eq!(player.track_count(), 1);
        let text = describe(&player).unwrap();
        assert!(text.contains("Super Nintendo"));
        assert!(text.contains("Quiet"));
        assert!(text.contains("DSP 1"));
    }
}
