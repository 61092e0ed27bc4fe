//! The hooks a format driver implements.
//!
//! A driver owns its CPU, chips and buffers and knows how to produce
//! interleaved stereo for the current track. Track timing, silence
//! detection, fading and the output stage live in [`MusicEmu`](crate::MusicEmu).

use crate::error::Result;
use crate::metadata::TrackInfo;
use chipsound::Interpolation;

/// Default rate multiplier for running ahead during silence.
pub const DEFAULT_SILENCE_LOOKAHEAD: u32 = 3;
/// Default limit on silence skipped at the start of a track.
pub const DEFAULT_MAX_INITIAL_SILENCE_SECS: u32 = 21;

/// Treble and bass equalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Equalizer {
    /// Treble level in dB at the rolloff frequency; negative cuts.
    pub treble_db: f64,
    /// High-pass cutoff in Hz.
    pub bass_hz: f64,
}

impl Equalizer {
    /// Sound of a small TV speaker.
    pub const TV: Equalizer = Equalizer {
        treble_db: -8.0,
        bass_hz: 180.0,
    };
}

impl Default for Equalizer {
    fn default() -> Self {
        Self {
            treble_db: -1.0,
            bass_hz: 60.0,
        }
    }
}

/// Format driver hooks.
///
/// Sample counts are in `i16` units of interleaved stereo and always even.
pub trait EmuCore {
    /// Tracks in the loaded file.
    fn track_count(&self) -> usize;

    /// Metadata for `track`.
    fn track_info(&self, track: usize) -> Result<TrackInfo>;

    /// Configure the output rate. Called once, before any track starts.
    fn set_sample_rate(&mut self, rate: u32) -> Result<()>;

    /// Prepare `track` for playback from its beginning.
    fn start_track(&mut self, track: usize) -> Result<()>;

    /// Fill `out` completely with the next samples.
    fn play(&mut self, out: &mut [i16]) -> Result<()>;

    /// Advance by `count` samples without keeping the output.
    fn skip(&mut self, count: usize) -> Result<()> {
        let mut scratch = [0i16; 2048];
        let mut remain = count;
        while remain > 0 {
            let n = remain.min(scratch.len());
            self.play(&mut scratch[..n])?;
            remain -= n;
        }
        Ok(())
    }

    /// True once the emulated program can produce nothing more.
    fn reached_end(&self) -> bool {
        false
    }

    /// Display names of the voices, in mute-mask bit order.
    fn voice_names(&self) -> Vec<&'static str>;

    /// Mute voices whose bit is set.
    fn mute_voices(&mut self, mask: u32);

    /// Scale playback speed, 1.0 normal.
    fn set_tempo(&mut self, tempo: f64);

    /// Scale pitch, 1.0 normal. Drivers without pitch control ignore it.
    fn set_pitch(&mut self, _pitch: f64) {}

    /// Resampling filter for drivers that render at a fixed native rate.
    fn set_interpolation(&mut self, _kind: Interpolation) {}

    /// Equalization the driver uses by default.
    fn equalizer(&self) -> Equalizer {
        Equalizer::default()
    }

    /// Change equalization.
    fn set_equalizer(&mut self, _eq: Equalizer) {}

    /// Approximate current level of each voice, 0.0 to 1.0.
    fn voice_levels(&self) -> Vec<f32> {
        Vec::new()
    }

    /// Non-fatal problems found while loading.
    fn warnings(&self) -> &[String] {
        &[]
    }

    /// How much faster than real time to scan ahead through silence.
    fn silence_lookahead(&self) -> u32 {
        DEFAULT_SILENCE_LOOKAHEAD
    }

    /// Longest initial silence skipped before giving up and ending.
    fn max_initial_silence_secs(&self) -> u32 {
        DEFAULT_MAX_INITIAL_SILENCE_SECS
    }
}
