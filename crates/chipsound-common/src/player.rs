//! Object-safe playback interface.
//!
//! [`ChiptunePlayerBase`] is what a host (an audio callback, a GUI) drives
//! without knowing the format; [`ChiptunePlayer`] adds the metadata type.
//! [`MusicEmu`](crate::MusicEmu) implements both for every driver.

use crate::metadata::MetadataFields;

/// Transport state of a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// Stopped at the beginning or after the track ended.
    #[default]
    Stopped,
    /// Producing audio.
    Playing,
    /// Paused; resumes where it left off.
    Paused,
}

/// Transport, rendering and voice control usable as `dyn ChiptunePlayerBase`.
///
/// ```ignore
/// fn drain(player: &mut dyn ChiptunePlayerBase) {
///     let mut block = vec![0.0f32; 2048];
///     player.play();
///     while player.render_into(&mut block) > 0 {
///         // hand `block` to the device
///     }
/// }
/// ```
pub trait ChiptunePlayerBase: Send {
    /// Start, or resume after a pause.
    fn play(&mut self);

    /// Hold the current position.
    fn pause(&mut self);

    /// Rewind the current track and stop.
    fn stop(&mut self);

    /// Current transport state.
    fn state(&self) -> PlaybackState;

    /// True while producing audio.
    fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    /// Fill `buffer` with interleaved float stereo and return the frames
    /// produced. Writes silence and returns 0 unless playing.
    fn render_into(&mut self, buffer: &mut [f32]) -> usize;

    /// Output rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Voices the current file exposes.
    fn voice_count(&self) -> usize;

    /// Silence or restore voice `index`.
    fn set_voice_muted(&mut self, index: usize, muted: bool);

    /// Whether voice `index` is silenced.
    fn is_voice_muted(&self, index: usize) -> bool;

    /// Tracks in the file.
    fn track_count(&self) -> usize {
        1
    }

    /// Selected track, 0-based.
    fn track(&self) -> usize {
        0
    }

    /// Start track `index`. Returns `false` if it does not exist.
    fn select_track(&mut self, _index: usize) -> bool {
        false
    }

    /// Play length of the current track, `None` when unbounded.
    fn duration_ms(&self) -> Option<u64> {
        None
    }

    /// Milliseconds played in the current track.
    fn elapsed_ms(&self) -> u64;

    /// Fraction of the play length already played; 0.0 when unbounded.
    fn position(&self) -> f32 {
        match self.duration_ms() {
            Some(total) if total > 0 => (self.elapsed_ms() as f32 / total as f32).min(1.0),
            _ => 0.0,
        }
    }

    /// Jump to `fraction` of the play length. Returns `false` when the
    /// length is unbounded or seeking failed.
    fn seek_to(&mut self, _fraction: f32) -> bool {
        false
    }
}

/// [`ChiptunePlayerBase`] plus typed metadata. Not object-safe.
pub trait ChiptunePlayer: ChiptunePlayerBase {
    /// Metadata record of the format.
    type Metadata: MetadataFields;

    /// Metadata of the current track.
    fn metadata(&self) -> &Self::Metadata;
}
