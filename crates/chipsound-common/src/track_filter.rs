//! End-of-track detection, initial silence removal and fade out.
//!
//! The filter sits between a driver and the caller. It runs the driver
//! ahead of the output during silence so that long silence can be
//! recognized as the end of the track, skips silence at the start of a
//! track, and applies a logarithmic fade. All times are counts of `i16`
//! samples of interleaved stereo.

use crate::emu::EmuCore;
use crate::error::{PlayerError, Result};

/// Samples within this distance of zero count as silence.
pub const SILENCE_THRESHOLD: i32 = 8;
/// Size of the lookahead buffer.
pub const BUF_SIZE: usize = 2048;
/// Samples sharing one fade gain step.
pub const FADE_BLOCK_SIZE: usize = 512;
/// Fade ends once gain falls below `1 >> FADE_SHIFT`.
pub const FADE_SHIFT: u32 = 8;
/// Silence after which a track is considered over.
pub const MAX_SILENCE_SECS: u32 = 6;

const INDEFINITE: i64 = i64::MAX / 2;
const GAIN_BITS: u32 = 14;
const GAIN_UNIT: i32 = 1 << GAIN_BITS;

/// Parameters fixed for the duration of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterSetup {
    /// Initial silence skipped before the track is ended.
    pub max_initial: i64,
    /// Lookahead rate multiplier during silence.
    pub lookahead: i64,
    /// Silence that ends the track.
    pub max_silence: i64,
}

impl FilterSetup {
    /// Setup for `sample_rate` with the given driver preferences.
    pub fn new(sample_rate: u32, max_initial_secs: u32, lookahead: u32) -> Self {
        let per_sec = sample_rate as i64 * 2;
        Self {
            max_initial: max_initial_secs as i64 * per_sec,
            lookahead: lookahead.max(1) as i64,
            max_silence: MAX_SILENCE_SECS as i64 * per_sec,
        }
    }
}

/// `unit / 2^(x / step)`, piecewise linear between powers of two.
fn int_log(x: i64, step: i64, unit: i32) -> i32 {
    let shift = x / step;
    let fraction = ((x - shift * step) * unit as i64 / step) as i32;
    if shift >= 31 {
        return 0;
    }
    ((unit - fraction) + (fraction >> 1)) >> shift
}

fn is_silent(s: i16) -> bool {
    (s as i32).abs() <= SILENCE_THRESHOLD
}

/// Number of consecutive silent samples at the end of `buf`.
fn count_silence(buf: &[i16]) -> usize {
    buf.iter().rev().take_while(|&&s| is_silent(s)).count()
}

/// Track end and fade state.
#[derive(Debug)]
pub struct TrackFilter {
    setup: FilterSetup,
    buf: Vec<i16>,
    buf_remain: usize,
    emu_time: i64,
    out_time: i64,
    silence_time: i64,
    silence_count: i64,
    fade_start: i64,
    fade_step: i64,
    silence_ignored: bool,
    track_ended: bool,
    emu_track_ended: bool,
    error: Option<PlayerError>,
}

impl TrackFilter {
    /// Create a filter with no track running.
    pub fn new(setup: FilterSetup) -> Self {
        Self {
            setup,
            buf: vec![0; BUF_SIZE],
            buf_remain: 0,
            emu_time: 0,
            out_time: 0,
            silence_time: 0,
            silence_count: 0,
            fade_start: INDEFINITE,
            fade_step: 1,
            silence_ignored: false,
            track_ended: true,
            emu_track_ended: true,
            error: None,
        }
    }

    /// Replace the setup. Takes effect at the next track start.
    pub fn set_setup(&mut self, setup: FilterSetup) {
        self.setup = setup;
    }

    /// Disable silence detection and initial silence skipping.
    pub fn ignore_silence(&mut self, ignore: bool) {
        self.silence_ignored = ignore;
    }

    /// Samples handed out since the track started.
    pub fn sample_count(&self) -> i64 {
        self.out_time
    }

    /// True once nothing but silence will come out.
    pub fn track_ended(&self) -> bool {
        self.track_ended
    }

    /// Make further output silent.
    pub fn set_track_ended(&mut self) {
        self.emu_track_ended = true;
    }

    /// Start the fade at `start` samples, lasting roughly `length` samples.
    pub fn set_fade(&mut self, start: Option<i64>, length: i64) {
        self.fade_start = start.unwrap_or(INDEFINITE);
        self.fade_step = (length / (FADE_BLOCK_SIZE as i64 * FADE_SHIFT as i64)).max(1);
    }

    /// Current fade start and step.
    pub fn fade(&self) -> (i64, i64) {
        (self.fade_start, self.fade_step)
    }

    /// Restore values returned by [`fade`](Self::fade).
    pub fn restore_fade(&mut self, fade: (i64, i64)) {
        self.fade_start = fade.0;
        self.fade_step = fade.1;
    }

    fn is_fading(&self) -> bool {
        self.fade_start != INDEFINITE && self.out_time >= self.fade_start
    }

    // buffered samples stay queued; time restarts at them
    fn clear_time_vars(&mut self) {
        self.emu_time = self.buf_remain as i64;
        self.out_time = 0;
        self.silence_time = 0;
        self.silence_count = 0;
    }

    /// Stop and forget the current track.
    pub fn stop(&mut self) {
        self.track_ended = true;
        self.buf_remain = 0;
        self.clear_time_vars();
        self.fade_start = INDEFINITE;
        self.fade_step = 1;
    }

    fn take_error(&mut self) -> Result<()> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn end_track_if_error(&mut self, result: Result<()>) {
        if let Err(err) = result {
            self.emu_track_ended = true;
            if self.error.is_none() {
                self.error = Some(err);
            }
        }
    }

    /// Begin a track the driver has just started, skipping its initial silence.
    pub fn start_track<E: EmuCore>(&mut self, emu: &mut E) -> Result<()> {
        self.error = None;
        self.stop();
        self.emu_track_ended = false;
        self.track_ended = false;

        if !self.silence_ignored {
            while self.emu_time < self.setup.max_initial {
                self.fill_buf(emu);
                if self.buf_remain > 0 || self.emu_track_ended {
                    break;
                }
            }
        }
        self.clear_time_vars();
        self.take_error()
    }

    fn emu_play<E: EmuCore>(&mut self, emu: &mut E, out: &mut [i16]) {
        self.emu_time += out.len() as i64;
        if self.emu_track_ended {
            out.fill(0);
            return;
        }
        let result = emu.play(out);
        if result.is_err() {
            out.fill(0);
        }
        self.end_track_if_error(result);
        if emu.reached_end() {
            self.emu_track_ended = true;
        }
    }

    // fill the lookahead buffer and check it for silence
    fn fill_buf<E: EmuCore>(&mut self, emu: &mut E) {
        debug_assert_eq!(self.buf_remain, 0);
        if !self.emu_track_ended {
            let mut buf = std::mem::take(&mut self.buf);
            self.emu_play(emu, &mut buf);
            let silence = count_silence(&buf);
            self.buf = buf;
            if silence < BUF_SIZE {
                self.silence_time = self.emu_time - silence as i64;
                self.buf_remain = BUF_SIZE;
                return;
            }
        }
        self.silence_count += BUF_SIZE as i64;
    }

    /// Fill `out` with the next samples.
    pub fn play<E: EmuCore>(&mut self, emu: &mut E, out: &mut [i16]) -> Result<()> {
        self.error = None;
        let out_count = out.len();
        if self.track_ended {
            out.fill(0);
        } else {
            let mut pos = 0;
            if self.silence_count > 0 {
                if !self.silence_ignored {
                    // run ahead during silence
                    let ahead_time = self.setup.lookahead
                        * (self.out_time + out_count as i64 - self.silence_time)
                        + self.silence_time;
                    while self.emu_time < ahead_time && self.buf_remain == 0 && !self.emu_track_ended {
                        self.fill_buf(emu);
                    }

                    if self.emu_time - self.silence_time > self.setup.max_silence {
                        log::debug!("track ended after {} samples of silence", self.emu_time - self.silence_time);
                        self.track_ended = true;
                        self.emu_track_ended = true;
                        self.silence_count = out_count as i64;
                        self.buf_remain = 0;
                    }
                }

                pos = (self.silence_count as usize).min(out_count);
                out[..pos].fill(0);
                self.silence_count -= pos as i64;
            }

            if self.buf_remain > 0 {
                let n = self.buf_remain.min(out_count - pos);
                let start = BUF_SIZE - self.buf_remain;
                out[pos..pos + n].copy_from_slice(&self.buf[start..start + n]);
                self.buf_remain -= n;
                pos += n;
            }

            let remain = out_count - pos;
            if remain > 0 {
                self.emu_play(emu, &mut out[pos..]);
                self.track_ended |= self.emu_track_ended;

                if self.silence_ignored && !self.is_fading() {
                    self.silence_time = self.emu_time;
                } else {
                    let silence = count_silence(&out[pos..]);
                    if silence < remain {
                        self.silence_time = self.emu_time - silence as i64;
                    }
                    if self.emu_time - self.silence_time >= BUF_SIZE as i64 {
                        // detect the silence on the next call
                        self.fill_buf(emu);
                    }
                }
            }

            if self.fade_start != INDEFINITE && self.out_time + out_count as i64 > self.fade_start {
                self.handle_fade(out);
            }
        }
        self.out_time += out_count as i64;
        self.take_error()
    }

    /// Advance by `count` samples.
    pub fn skip<E: EmuCore>(&mut self, emu: &mut E, count: usize) -> Result<()> {
        self.error = None;
        self.out_time += count as i64;
        let mut count = count as i64;

        let n = count.min(self.silence_count);
        self.silence_count -= n;
        count -= n;

        let n = count.min(self.buf_remain as i64);
        self.buf_remain -= n as usize;
        count -= n;

        if count > 0 && !self.emu_track_ended {
            self.emu_time += count;
            self.silence_time = self.emu_time;
            let result = emu.skip(count as usize);
            self.end_track_if_error(result);
            if emu.reached_end() {
                self.emu_track_ended = true;
            }
        }

        if !(self.silence_ignored || self.is_fading()) {
            self.track_ended |= self.emu_track_ended;
        }
        self.take_error()
    }

    // `out` ends at out_time + out.len(); blocks are aligned to the fade start
    fn handle_fade(&mut self, out: &mut [i16]) {
        let block = FADE_BLOCK_SIZE as i64;
        let mut i = 0usize;
        while i < out.len() {
            let t = self.out_time + i as i64;
            if t < self.fade_start {
                let skip = (self.fade_start - t).min((out.len() - i) as i64) as usize;
                i += skip;
                continue;
            }
            let elapsed = t - self.fade_start;
            let gain = int_log(elapsed / block, self.fade_step, GAIN_UNIT);
            if gain < GAIN_UNIT >> FADE_SHIFT {
                self.track_ended = true;
                self.emu_track_ended = true;
                out[i..].fill(0);
                return;
            }
            let block_end = (block - elapsed % block) as usize;
            let end = (i + block_end).min(out.len());
            for s in &mut out[i..end] {
                *s = ((*s as i32 * gain) >> GAIN_BITS) as i16;
            }
            i = end;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::TrackInfo;

    /// Square wave that goes quiet after `tone` samples.
    struct Beeper {
        pos: usize,
        tone: usize,
        lead_in: usize,
    }

    impl Beeper {
        fn new(lead_in: usize, tone: usize) -> Self {
            Self { pos: 0, tone, lead_in }
        }
    }

    impl EmuCore for Beeper {
        fn track_count(&self) -> usize {
            1
        }
        fn track_info(&self, _track: usize) -> Result<TrackInfo> {
            Ok(TrackInfo::default())
        }
        fn set_sample_rate(&mut self, _rate: u32) -> Result<()> {
            Ok(())
        }
        fn start_track(&mut self, _track: usize) -> Result<()> {
            self.pos = 0;
            Ok(())
        }
        fn play(&mut self, out: &mut [i16]) -> Result<()> {
            for s in out.iter_mut() {
                let t = self.pos;
                self.pos += 1;
                *s = if t >= self.lead_in && t < self.lead_in + self.tone {
                    if (t / 50) % 2 == 0 { 8000 } else { -8000 }
                } else {
                    0
                };
            }
            Ok(())
        }
        fn voice_names(&self) -> Vec<&'static str> {
            vec!["Beep"]
        }
        fn mute_voices(&mut self, _mask: u32) {}
        fn set_tempo(&mut self, _tempo: f64) {}
    }

    fn setup() -> FilterSetup {
        FilterSetup::new(1_000, 21, 3)
    }

    #[test]
    fn test_int_log_halves_per_step() {
        assert_eq!(int_log(0, 4, GAIN_UNIT), GAIN_UNIT);
        assert_eq!(int_log(4, 4, GAIN_UNIT), GAIN_UNIT / 2);
        assert_eq!(int_log(8, 4, GAIN_UNIT), GAIN_UNIT / 4);
        assert!(int_log(2, 4, GAIN_UNIT) < GAIN_UNIT);
    }

    #[test]
    fn test_initial_silence_is_skipped() {
        let mut emu = Beeper::new(5 * BUF_SIZE, 100_000);
        let mut filter = TrackFilter::new(setup());
        filter.start_track(&mut emu).unwrap();
        let mut out = [0i16; 64];
        filter.play(&mut emu, &mut out).unwrap();
        // the tone starts at the first output sample
        assert_eq!(out[0], 8000);
        assert_eq!(filter.sample_count(), 64);
    }

    #[test]
    fn test_long_silence_ends_track() {
        let mut emu = Beeper::new(0, 4_000);
        let mut filter = TrackFilter::new(setup());
        filter.start_track(&mut emu).unwrap();
        let mut out = vec![0i16; 1024];
        let mut calls = 0;
        while !filter.track_ended() {
            filter.play(&mut emu, &mut out).unwrap();
            calls += 1;
            assert!(calls < 1_000, "track never ended");
        }
        // six seconds of silence at 2000 samples per second, after 4000 of tone
        assert!(filter.sample_count() < 4_000 + 12_000 + 4 * BUF_SIZE as i64);
    }

    #[test]
    fn test_fade_ends_track_independent_of_call_size() {
        let run = |chunk: usize| {
            let mut emu = Beeper::new(0, usize::MAX / 2);
            let mut filter = TrackFilter::new(setup());
            filter.ignore_silence(true);
            filter.start_track(&mut emu).unwrap();
            filter.set_fade(Some(3_000), 4_096);
            let mut all = Vec::new();
            let mut out = vec![0i16; chunk];
            while !filter.track_ended() {
                filter.play(&mut emu, &mut out).unwrap();
                all.extend_from_slice(&out);
            }
            let end = all.iter().rposition(|&s| s != 0).unwrap_or(0);
            (all[..3_000].to_vec(), end)
        };
        let (head_a, end_a) = run(300);
        let (head_b, end_b) = run(2_048);
        assert_eq!(head_a, head_b);
        assert_eq!(end_a, end_b);
        assert!(end_a > 3_000);
    }
}
