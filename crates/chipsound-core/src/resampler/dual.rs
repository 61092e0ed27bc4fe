//! Mixes a resampled sample stream with band-limited buffers, frame by frame.
//!
//! Emulators that combine a chip rendering at its own sample rate (PCM or FM
//! cores) with blip-synthesized voices run one "frame" at a time: the blip
//! side needs a clock count, the stream side a sample count. The dual
//! resampler asks the caller for both at once and mixes the results.

use super::{Interpolation, Resampler};
use crate::blip_buffer::BlipTime;
use crate::error::Result;
use crate::stereo_buffer::{StereoBuffer, CENTER, LEFT, RIGHT};

/// Fractional bits of the stream gain.
pub const GAIN_BITS: u32 = 14;

/// Stream samples requested beyond a frame; the resampler holds some back.
const RESAMPLER_EXTRA: usize = 34;

#[inline]
fn clamp_sample(s: i32) -> i16 {
    s.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Frame-based mixer of a stream chip and a [`StereoBuffer`].
#[derive(Debug, Clone)]
pub struct DualResampler {
    resampler: Resampler,
    sample_buf: Vec<i16>,
    frame_samples: usize,
    oversamples_per_frame: usize,
    buf_pos: usize,
    buffered: usize,
    gain: i32,
}

impl DualResampler {
    /// Create a mixer using `kind` for the stream side.
    pub fn new(kind: Interpolation) -> Self {
        Self {
            resampler: Resampler::new(kind, 2),
            sample_buf: Vec::new(),
            frame_samples: 0,
            oversamples_per_frame: 0,
            buf_pos: 0,
            buffered: 0,
            gain: 1 << GAIN_BITS,
        }
    }

    /// Set stream rate divided by output rate. Call before [`reset`](Self::reset).
    pub fn set_rate(&mut self, ratio: f64) -> Result<f64> {
        self.resampler.set_rate(ratio)
    }

    /// Scale applied to the stream before mixing.
    pub fn set_gain(&mut self, gain: f64) {
        self.gain = (gain * (1 << GAIN_BITS) as f64) as i32;
    }

    /// Allocate for frames of `pairs` stereo output frames and clear.
    pub fn reset(&mut self, pairs: usize) -> Result<()> {
        let oversamples = (pairs as f64 * self.resampler.ratio()) as usize * 2 + 2;
        let resampler_frames = (oversamples + (oversamples >> 2)) / 2 + RESAMPLER_EXTRA;
        self.resampler.resize_buffer(resampler_frames)?;
        self.sample_buf = vec![0; (pairs + (pairs >> 2)) * 2];
        self.frame_samples = pairs * 2;
        self.oversamples_per_frame = oversamples;
        self.clear();
        Ok(())
    }

    /// Drop buffered output and stream input.
    pub fn clear(&mut self) {
        self.buf_pos = 0;
        self.buffered = 0;
        self.resampler.clear();
    }

    /// Output samples (both channels) produced per frame.
    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    /// Fill `out` with interleaved stereo samples.
    ///
    /// `fill(stereo, clocks, stream)` must run the emulation for `clocks`
    /// native clocks into `stereo`, write stream samples into `stream` and
    /// return how many it wrote.
    pub fn dual_play<F>(&mut self, out: &mut [i16], stereo: &mut StereoBuffer, mut fill: F)
    where
        F: FnMut(&mut StereoBuffer, BlipTime, &mut [i16]) -> usize,
    {
        let mut done = 0;
        while done < out.len() {
            if self.buf_pos >= self.buffered {
                self.buffered = self.play_frame(stereo, &mut fill);
                self.buf_pos = 0;
                if self.buffered == 0 {
                    out[done..].fill(0);
                    return;
                }
            }
            let n = (self.buffered - self.buf_pos).min(out.len() - done);
            out[done..done + n].copy_from_slice(&self.sample_buf[self.buf_pos..self.buf_pos + n]);
            self.buf_pos += n;
            done += n;
        }
    }

    fn play_frame<F>(&mut self, stereo: &mut StereoBuffer, fill: &mut F) -> usize
    where
        F: FnMut(&mut StereoBuffer, BlipTime, &mut [i16]) -> usize,
    {
        let pairs = self.frame_samples / 2;
        let blip_time = stereo.count_clocks(pairs);
        let want = (self.oversamples_per_frame + RESAMPLER_EXTRA)
            .saturating_sub(self.resampler.written())
            .min(self.resampler.max_write())
            & !1;

        let stream = &mut self.resampler.buffer_mut()[..want];
        let written = fill(stereo, blip_time, stream).min(want) & !1;
        self.resampler.commit(written);
        stereo.end_frame(blip_time);

        let count = self.resampler.read(&mut self.sample_buf[..self.frame_samples]);
        self.mix(stereo, count);
        stereo.remove_samples(count / 2);
        count
    }

    fn mix(&mut self, stereo: &mut StereoBuffer, count: usize) {
        let gain = self.gain;
        let frames = &mut self.sample_buf[..count];
        let sides = stereo.sides_active();
        let bufs = stereo.channels_mut();
        let (center, sides_bufs) = bufs.split_at_mut(LEFT);
        let center = &mut center[CENTER];
        let (left, right) = sides_bufs.split_at_mut(RIGHT - LEFT);
        let (left, right) = (&mut left[0], &mut right[0]);

        let mut c = center.reader();
        let mut l = left.reader();
        let mut r = right.reader();
        for frame in frames.chunks_exact_mut(2) {
            let mid = c.read();
            let (side_l, side_r) = if sides { (l.read(), r.read()) } else { (0, 0) };
            let sl = (frame[0] as i32 * gain >> GAIN_BITS) + mid + side_l;
            let sr = (frame[1] as i32 * gain >> GAIN_BITS) + mid + side_r;
            frame[0] = clamp_sample(sl);
            frame[1] = clamp_sample(sr);
            c.next(center);
            if sides {
                l.next(left);
                r.next(right);
            }
        }
        c.end(center);
        if sides {
            l.end(left);
            r.end(right);
        }
    }
}
