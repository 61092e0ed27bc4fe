//! Three-channel buffer set mixed down to interleaved stereo.
//!
//! Voices write into the center buffer unless they are panned, in which case
//! they use the left or right buffer. While the side buffers are silent the
//! read path copies the center channel to both outputs.

use crate::blip_buffer::{BlipBuffer, BlipTime, MAX_QUALITY};
use crate::error::Result;

/// Index of the center buffer.
pub const CENTER: usize = 0;
/// Index of the left buffer.
pub const LEFT: usize = 1;
/// Index of the right buffer.
pub const RIGHT: usize = 2;

#[inline]
fn clamp_sample(s: i32) -> i16 {
    s.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Center/left/right synthesis buffers.
#[derive(Debug, Clone, Default)]
pub struct StereoBuffer {
    bufs: [BlipBuffer; 3],
    side_remain: usize,
}

impl StereoBuffer {
    /// Create an unconfigured buffer set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resize all buffers. See [`BlipBuffer::set_sample_rate`].
    pub fn set_sample_rate(&mut self, rate: u32, msec: u32) -> Result<()> {
        let mut resized = self.bufs.clone();
        for buf in &mut resized {
            buf.set_sample_rate(rate, msec)?;
        }
        self.bufs = resized;
        self.side_remain = 0;
        Ok(())
    }

    /// Set the native clock rate for all buffers.
    pub fn set_clock_rate(&mut self, clock_hz: f64) {
        for buf in &mut self.bufs {
            buf.set_clock_rate(clock_hz);
        }
    }

    /// Set the high-pass cutoff for all buffers.
    pub fn set_bass_freq(&mut self, freq: i32) {
        for buf in &mut self.bufs {
            buf.set_bass_freq(freq);
        }
    }

    /// Clear all buffers.
    pub fn clear(&mut self) {
        for buf in &mut self.bufs {
            buf.clear();
        }
        self.side_remain = 0;
    }

    /// End the frame in all buffers.
    pub fn end_frame(&mut self, time: BlipTime) {
        let mut side_written = false;
        for (i, buf) in self.bufs.iter_mut().enumerate() {
            let modified = buf.clear_modified();
            if i != CENTER {
                side_written |= modified;
            }
            buf.end_frame(time);
        }
        if side_written {
            self.side_remain = self.bufs[CENTER].samples_avail() + MAX_QUALITY;
        }
    }

    /// All three buffers, indexed by [`CENTER`], [`LEFT`] and [`RIGHT`].
    pub fn channels_mut(&mut self) -> &mut [BlipBuffer] {
        &mut self.bufs
    }

    /// One buffer by index.
    pub fn channel(&self, index: usize) -> &BlipBuffer {
        &self.bufs[index]
    }

    /// Stereo frames ready to be read.
    pub fn samples_avail(&self) -> usize {
        self.bufs[CENTER].samples_avail()
    }

    /// Clocks needed before `frames` more frames are available.
    pub fn count_clocks(&self, frames: usize) -> BlipTime {
        self.bufs[CENTER].count_clocks(frames)
    }

    /// Output sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.bufs[CENTER].sample_rate()
    }

    /// Buffer length in milliseconds.
    pub fn length_ms(&self) -> u32 {
        self.bufs[CENTER].length_ms()
    }

    /// Read up to `out.len() / 2` interleaved stereo frames. Returns frames read.
    pub fn read_samples(&mut self, out: &mut [i16]) -> usize {
        let count = self.samples_avail().min(out.len() / 2);
        if count == 0 {
            return 0;
        }

        if self.sides_active() {
            self.mix_stereo(&mut out[..count * 2]);
        } else {
            self.mix_mono(&mut out[..count * 2]);
        }
        self.remove_samples(count);
        count
    }

    /// Whether the side buffers hold anything that still has to be mixed.
    pub fn sides_active(&self) -> bool {
        self.side_remain > 0
            || self.bufs[LEFT].reader().read_raw() != 0
            || self.bufs[RIGHT].reader().read_raw() != 0
    }

    /// Remove `count` frames from all three buffers after reading them
    /// through [`BlipBuffer::reader`].
    pub fn remove_samples(&mut self, count: usize) {
        for buf in &mut self.bufs {
            buf.remove_samples(count);
        }
        self.side_remain = self.side_remain.saturating_sub(count);
    }

    fn mix_mono(&mut self, out: &mut [i16]) {
        let center = &self.bufs[CENTER];
        let mut c = center.reader();
        for frame in out.chunks_exact_mut(2) {
            let s = clamp_sample(c.read());
            frame[0] = s;
            frame[1] = s;
            c.next(center);
        }
        c.end(&mut self.bufs[CENTER]);
    }

    fn mix_stereo(&mut self, out: &mut [i16]) {
        let [center, left, right] = &mut self.bufs;
        let mut c = center.reader();
        let mut l = left.reader();
        let mut r = right.reader();
        for frame in out.chunks_exact_mut(2) {
            let mid = c.read();
            frame[0] = clamp_sample(mid + l.read());
            frame[1] = clamp_sample(mid + r.read());
            c.next(center);
            l.next(left);
            r.next(right);
        }
        c.end(center);
        l.end(left);
        r.end(right);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blip_buffer::{BlipSynth, QUALITY_GOOD};

    fn stereo() -> StereoBuffer {
        let mut buf = StereoBuffer::new();
        buf.set_sample_rate(44_100, 100).unwrap();
        buf.set_clock_rate(44_100.0);
        buf.set_bass_freq(0);
        buf
    }

    #[test]
    fn test_center_only_is_mono() {
        let mut buf = stereo();
        let mut synth = BlipSynth::new(QUALITY_GOOD, 1);
        synth.set_volume_unit(0.25);
        synth.update(0, 1, &mut buf.channels_mut()[CENTER]);
        buf.end_frame(100);

        let mut out = vec![0i16; 200];
        assert_eq!(buf.read_samples(&mut out), 100);
        assert!(out.chunks(2).all(|f| f[0] == f[1]));
        assert_eq!(out[198], 16384);
    }

    #[test]
    fn test_left_voice_stays_left() {
        let mut buf = stereo();
        let mut synth = BlipSynth::new(QUALITY_GOOD, 1);
        synth.set_volume_unit(0.25);
        synth.update(0, 1, &mut buf.channels_mut()[LEFT]);
        buf.end_frame(100);

        let mut out = vec![0i16; 200];
        buf.read_samples(&mut out);
        assert_eq!(out[198], 16384);
        assert!(out.chunks(2).all(|f| f[1] == 0));
    }

    #[test]
    fn test_mix_clamps() {
        let mut buf = stereo();
        let mut synth = BlipSynth::new(QUALITY_GOOD, 1);
        synth.set_volume_unit(0.4);
        let mut side = synth.clone();
        synth.update(0, 1, &mut buf.channels_mut()[CENTER]);
        side.update(0, 1, &mut buf.channels_mut()[RIGHT]);
        buf.end_frame(100);

        let mut out = vec![0i16; 200];
        buf.read_samples(&mut out);
        assert_eq!(out[198], 26214);
        assert_eq!(out[199], i16::MAX);
    }
}
