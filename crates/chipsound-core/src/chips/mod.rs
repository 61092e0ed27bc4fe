//! Sound chip emulators.
//!
//! Two families share one contract: every register write first brings the
//! chip's oscillators up to the write's timestamp and only then changes
//! state, so each amplitude change lands at the right time.
//!
//! - [`SoundChip`] chips emit band-limited deltas into caller-provided
//!   [`BlipBuffer`]s. Times are native CPU clocks within the current frame.
//! - [`StreamChip`] chips render PCM at their own sample rate. Wrap one in
//!   [`TimedStream`] to drive it with clock-stamped writes.
//!
//! Muting a voice only suppresses its output; its oscillator keeps running,
//! so unmuting resumes in phase.

use crate::blip_buffer::{BlipBuffer, BlipEq, BlipSynth, BlipTime};

pub mod fme7;
pub mod k051649;
pub mod mmc5;
pub mod namco163;
pub mod nes_apu;
mod nes_oscs;
pub mod okim6258;
pub mod rf5c68;
pub mod segapcm;
pub mod timed_stream;
pub mod vrc6;
pub mod vrc7;

pub use timed_stream::TimedStream;

/// Where a voice sends its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VoiceOutput {
    /// Index into the buffer slice passed to the chip, or `None` for silence.
    pub buffer: Option<usize>,
    /// Muted voices keep running but emit nothing.
    pub muted: bool,
}

impl VoiceOutput {
    /// Buffer index deltas should go to, if any.
    #[inline]
    pub fn target(&self) -> Option<usize> {
        if self.muted {
            None
        } else {
            self.buffer
        }
    }
}

/// A chip that synthesizes into band-limited buffers.
pub trait SoundChip {
    /// Number of independently routable voices.
    fn voice_count(&self) -> usize;

    /// Display name of each voice.
    fn voice_names(&self) -> &'static [&'static str];

    /// Restore power-up state.
    fn reset(&mut self);

    /// Route `voice` to buffer index `output`, or silence it with `None`.
    fn set_voice_output(&mut self, voice: usize, output: Option<usize>);

    /// Route every voice to the same buffer.
    fn set_output(&mut self, output: Option<usize>) {
        for voice in 0..self.voice_count() {
            self.set_voice_output(voice, output);
        }
    }

    /// Mute voices whose bit is set in `mask`.
    fn mute_voices(&mut self, mask: u32);

    /// Overall output level, 1.0 being the chip's nominal level.
    fn set_volume(&mut self, volume: f64);

    /// Treble equalization for all voices.
    fn set_treble_eq(&mut self, eq: BlipEq);

    /// Emulate up to `time`, then write `data` to register `addr`.
    fn write(&mut self, out: &mut [BlipBuffer], time: BlipTime, addr: u16, data: u8);

    /// Emulate up to `time` and begin a new frame there.
    fn end_frame(&mut self, out: &mut [BlipBuffer], time: BlipTime);
}

/// A chip that renders PCM at its own rate.
pub trait StreamChip {
    /// Native output rate in Hz.
    fn sample_rate(&self) -> f64;

    /// Number of voices.
    fn voice_count(&self) -> usize;

    /// Restore power-up state.
    fn reset(&mut self);

    /// Write `data` to `port` immediately.
    fn write(&mut self, port: u32, data: u8);

    /// Mute voices whose bit is set in `mask`.
    fn mute_voices(&mut self, mask: u32);

    /// Render `out.len() / 2` interleaved stereo frames, overwriting `out`.
    fn render(&mut self, out: &mut [i16]);
}

/// Emit `delta` at `time` if the voice is routed and unmuted.
#[inline]
pub(crate) fn emit(
    synth: &BlipSynth,
    out: &mut [BlipBuffer],
    target: Option<usize>,
    time: BlipTime,
    delta: i32,
) {
    if let Some(index) = target {
        if delta != 0 {
            synth.offset(time, delta, &mut out[index]);
        }
    }
}

#[inline]
pub(crate) fn clamp_sample(s: i32) -> i16 {
    s.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}
