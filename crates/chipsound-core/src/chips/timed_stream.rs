//! Clock-stamped driver for [`StreamChip`]s.
//!
//! Writes carry a time in host clocks. Before each write the chip renders
//! every sample that falls before it; the fractional sample position
//! carries across frames, so the long-run sample count matches the chip
//! rate exactly.

use super::StreamChip;
use crate::blip_buffer::BlipTime;

const FRAC_BITS: u32 = 32;

/// A [`StreamChip`] plus the clock-to-sample mapping and pending output.
#[derive(Debug, Clone)]
pub struct TimedStream<C> {
    chip: C,
    clock_rate: f64,
    chip_rate: f64,
    // samples per clock, FRAC_BITS fraction
    step: i64,
    // sample position at clock 0 of this frame, FRAC_BITS fraction
    base: i64,
    rendered: usize,
    pending: Vec<i16>,
    read_pos: usize,
}

impl<C: StreamChip> TimedStream<C> {
    /// Drive `chip` from a host clock of `clock_rate` Hz.
    pub fn new(chip: C, clock_rate: f64) -> Self {
        let mut stream = Self {
            chip_rate: chip.sample_rate(),
            chip,
            clock_rate,
            step: 0,
            base: 0,
            rendered: 0,
            pending: Vec::new(),
            read_pos: 0,
        };
        stream.step = stream.compute_step();
        stream
    }

    fn compute_step(&self) -> i64 {
        if self.clock_rate <= 0.0 {
            return 0;
        }
        (self.chip_rate / self.clock_rate * (1u64 << FRAC_BITS) as f64).round() as i64
    }

    /// The wrapped chip.
    pub fn chip(&self) -> &C {
        &self.chip
    }

    /// Direct access to the chip for bulk loads that do not affect timing.
    pub fn chip_mut(&mut self) -> &mut C {
        &mut self.chip
    }

    /// Native rate of the chip's output.
    pub fn sample_rate(&self) -> f64 {
        self.chip_rate
    }

    /// Change the host clock. Takes effect from the start of the next frame.
    pub fn set_clock_rate(&mut self, clock_rate: f64) {
        self.clock_rate = clock_rate;
        self.step = self.compute_step();
    }

    fn position(&self, time: BlipTime) -> i64 {
        self.base + time.max(0) as i64 * self.step
    }

    /// Render everything due before `time`.
    pub fn run_until(&mut self, time: BlipTime) {
        let due = (self.position(time) >> FRAC_BITS).max(0) as usize;
        if due > self.rendered {
            let count = due - self.rendered;
            let start = self.pending.len();
            self.pending.resize(start + count * 2, 0);
            self.chip.render(&mut self.pending[start..]);
            self.rendered = due;
        }
    }

    /// Write `data` to `port` at `time`, after rendering the output before it.
    pub fn write(&mut self, time: BlipTime, port: u32, data: u8) {
        self.run_until(time);
        self.chip.write(port, data);
        let rate = self.chip.sample_rate();
        if rate != self.chip_rate {
            // rebase so the position at `time` is unchanged
            let here = self.position(time);
            self.chip_rate = rate;
            self.step = self.compute_step();
            self.base = here - time.max(0) as i64 * self.step;
        }
    }

    /// Mute voices whose bit is set in `mask`.
    pub fn mute_voices(&mut self, mask: u32) {
        self.chip.mute_voices(mask);
    }

    /// Reset the chip and drop pending output.
    pub fn reset(&mut self) {
        self.chip.reset();
        self.chip_rate = self.chip.sample_rate();
        self.step = self.compute_step();
        self.base = 0;
        self.rendered = 0;
        self.pending.clear();
        self.read_pos = 0;
    }

    /// Finish the frame at `time`. The frame's samples become readable.
    pub fn end_frame(&mut self, time: BlipTime) {
        self.run_until(time);
        let end = self.position(time);
        self.base = end - ((self.rendered as i64) << FRAC_BITS);
        self.rendered = 0;
    }

    /// Stereo frames waiting to be read.
    pub fn frames_avail(&self) -> usize {
        (self.pending.len() - self.read_pos) / 2
    }

    /// Copy up to `out.len() / 2` frames into `out`. Returns samples written.
    pub fn read_samples(&mut self, out: &mut [i16]) -> usize {
        let count = (out.len() / 2).min(self.frames_avail()) * 2;
        out[..count].copy_from_slice(&self.pending[self.read_pos..self.read_pos + count]);
        self.read_pos += count;
        if self.read_pos == self.pending.len() {
            self.pending.clear();
            self.read_pos = 0;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Outputs its last written value, and jumps rate on port 1.
    #[derive(Default)]
    struct Latch {
        value: i16,
        fast: bool,
    }

    impl StreamChip for Latch {
        fn sample_rate(&self) -> f64 {
            if self.fast {
                256.0
            } else {
                128.0
            }
        }
        fn voice_count(&self) -> usize {
            1
        }
        fn reset(&mut self) {
            *self = Self::default();
        }
        fn write(&mut self, port: u32, data: u8) {
            match port {
                0 => self.value = data as i16,
                _ => self.fast = data != 0,
            }
        }
        fn mute_voices(&mut self, _mask: u32) {}
        fn render(&mut self, out: &mut [i16]) {
            out.fill(self.value);
        }
    }

    fn drain(stream: &mut TimedStream<Latch>) -> Vec<i16> {
        let mut out = vec![0; stream.frames_avail() * 2];
        let n = stream.read_samples(&mut out);
        out.truncate(n);
        out.into_iter().step_by(2).collect()
    }

    #[test]
    fn test_write_lands_after_prior_samples() {
        let mut stream = TimedStream::new(Latch::default(), 1024.0);
        stream.write(40, 0, 7);
        stream.end_frame(80);
        assert_eq!(drain(&mut stream), [0, 0, 0, 0, 0, 7, 7, 7, 7, 7]);
    }

    #[test]
    fn test_fraction_carries_across_frames() {
        let mut stream = TimedStream::new(Latch::default(), 1024.0);
        // 0.5 samples per frame
        let mut total = 0;
        for _ in 0..9 {
            stream.end_frame(4);
            total += drain(&mut stream).len();
        }
        assert_eq!(total, 4);
        stream.end_frame(4);
        assert_eq!(drain(&mut stream).len(), 1);
    }

    #[test]
    fn test_rate_change_rebases() {
        let mut stream = TimedStream::new(Latch::default(), 1024.0);
        stream.write(40, 1, 1);
        stream.end_frame(80);
        // 5 samples at the slow rate, then 10 at the fast one
        assert_eq!(drain(&mut stream).len(), 15);
        stream.end_frame(80);
        assert_eq!(drain(&mut stream).len(), 20);
    }

    #[test]
    fn test_partial_reads_keep_order() {
        let mut stream = TimedStream::new(Latch::default(), 1024.0);
        stream.write(16, 0, 3);
        stream.end_frame(32);
        let mut out = [0i16; 4];
        assert_eq!(stream.read_samples(&mut out), 4);
        assert_eq!(out, [0, 0, 0, 0]);
        assert_eq!(stream.read_samples(&mut out), 4);
        assert_eq!(out, [3, 3, 3, 3]);
        assert_eq!(stream.frames_avail(), 0);
    }
}
