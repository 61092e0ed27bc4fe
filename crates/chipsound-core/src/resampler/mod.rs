//! Sample rate conversion.
//!
//! Every strategy in [`Interpolation`] is expressed as a table of integer FIR
//! rows, one per sub-sample phase, so a single engine ([`Resampler`]) runs all
//! of them. The input/output ratio is approximated by a rational `N / P` with
//! at most [`MAX_PHASES`] phases; the engine walks the phases in order and
//! advances the input by the exact integer step each phase calls for, which
//! keeps multi-call sequences seamless. All channels of a frame share one
//! position, so interleaved stereo never drifts out of phase.

mod dual;
mod kernels;

pub use dual::{DualResampler, GAIN_BITS};
pub use kernels::{FILTER_BITS, FILTER_UNIT};

use crate::error::{CoreError, Result};

/// Largest number of phases the ratio search considers.
pub const MAX_PHASES: usize = 512;

/// Largest input buffer, in frames.
pub const MAX_BUFFER_FRAMES: usize = 1 << 20;

/// Interpolation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Interpolation {
    /// Nearest input sample.
    None,
    /// Plain two-point linear interpolation.
    Upsampler,
    /// Linear interpolation with a low-pass pre-filter when downsampling.
    #[default]
    Linear,
    /// Four-point Catmull-Rom spline.
    Cubic,
    /// Kaiser-windowed sinc.
    Sinc,
}

/// Best rational approximation of `ratio` with at most `max_phases` phases.
///
/// Returns `(phases, input_steps_per_cycle)`; the effective ratio is
/// `steps / phases`.
pub fn find_ratio(ratio: f64, max_phases: usize) -> (usize, usize) {
    let mut least_error = 2.0;
    let mut pos = 0.0;
    let mut best = (1, ratio.round().max(1.0) as usize);
    for phases in 1..=max_phases {
        pos += ratio;
        let nearest = (pos + 0.5).floor();
        let error = (pos - nearest).abs();
        if error < least_error && nearest >= 1.0 {
            best = (phases, nearest as usize);
            least_error = error;
        }
    }
    best
}

/// Buffered FIR resampler for interleaved 16-bit audio.
#[derive(Clone)]
pub struct Resampler {
    kind: Interpolation,
    channels: usize,
    width: usize,
    ratio: f64,
    phases: usize,
    table: Vec<i32>,
    steps: Vec<usize>,
    phase: usize,
    skip: usize,
    buf: Vec<i16>,
    write_pos: usize,
}

impl Resampler {
    /// Create a resampler with no input buffer and a 1:1 ratio.
    pub fn new(kind: Interpolation, channels: usize) -> Self {
        let mut resampler = Self {
            kind,
            channels: channels.max(1),
            width: kernels::width(kind),
            ratio: 1.0,
            phases: 1,
            table: Vec::new(),
            steps: Vec::new(),
            phase: 0,
            skip: 0,
            buf: Vec::new(),
            write_pos: 0,
        };
        resampler.rebuild(1, 1);
        resampler
    }

    /// Allocate an input buffer of `frames` frames and clear it.
    pub fn resize_buffer(&mut self, frames: usize) -> Result<()> {
        if frames > MAX_BUFFER_FRAMES {
            return Err(CoreError::BufferTooLarge {
                requested: frames,
                limit: MAX_BUFFER_FRAMES,
            });
        }
        if frames < self.width * 2 {
            return Err(CoreError::InvalidData {
                msg: format!("resampler buffer of {frames} frames is smaller than its kernel"),
            });
        }
        log::debug!("resampler: {frames} frames of {} channels", self.channels);
        self.buf = vec![0; frames * self.channels];
        self.clear();
        Ok(())
    }

    /// Set the input/output ratio (input samples per output sample).
    /// Returns the ratio actually used.
    pub fn set_rate(&mut self, ratio: f64) -> Result<f64> {
        if !ratio.is_finite() || ratio <= 0.0 || ratio > 64.0 {
            return Err(CoreError::InvalidRatio { ratio });
        }
        let (phases, steps) = find_ratio(ratio, MAX_PHASES);
        self.rebuild(phases, steps);
        Ok(self.ratio)
    }

    /// Switch interpolation strategy. Clears buffered input.
    pub fn set_interpolation(&mut self, kind: Interpolation) {
        if kind == self.kind {
            return;
        }
        self.kind = kind;
        self.width = kernels::width(kind);
        let steps = (self.ratio * self.phases as f64).round() as usize;
        self.rebuild(self.phases, steps);
        self.clear();
    }

    fn rebuild(&mut self, phases: usize, total_steps: usize) {
        self.phases = phases;
        self.ratio = total_steps as f64 / phases as f64;
        let mut fractions = Vec::with_capacity(phases);
        self.steps.clear();
        for i in 0..phases {
            let here = i * total_steps;
            fractions.push((here % phases) as f64 / phases as f64);
            self.steps
                .push((i + 1) * total_steps / phases - here / phases);
        }
        self.table = kernels::build(self.kind, self.ratio, &fractions);
        self.phase = 0;
    }

    /// Drop buffered input and rewind to phase zero.
    pub fn clear(&mut self) {
        self.buf.fill(0);
        self.write_pos = ((self.width / 2 - 1) * self.channels).min(self.buf.len());
        self.phase = 0;
        self.skip = 0;
    }

    /// Current interpolation strategy.
    pub fn interpolation(&self) -> Interpolation {
        self.kind
    }

    /// Effective input/output ratio.
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Number of phases in the current ratio approximation.
    pub fn phase_count(&self) -> usize {
        self.phases
    }

    /// Coefficient row for `phase`.
    pub fn phase_coefficients(&self, phase: usize) -> &[i32] {
        &self.table[phase * self.width..(phase + 1) * self.width]
    }

    /// Channels per frame.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Samples currently buffered.
    pub fn written(&self) -> usize {
        self.write_pos
    }

    /// Samples of free input space.
    pub fn max_write(&self) -> usize {
        self.buf.len() - self.write_pos
    }

    /// Free region of the input buffer. Fill it, then call [`commit`](Self::commit).
    pub fn buffer_mut(&mut self) -> &mut [i16] {
        &mut self.buf[self.write_pos..]
    }

    /// Mark `count` samples of [`buffer_mut`](Self::buffer_mut) as written.
    ///
    /// # Panics
    ///
    /// Panics if `count` exceeds the free space.
    pub fn commit(&mut self, count: usize) {
        assert!(count <= self.max_write(), "resampler buffer overrun");
        self.write_pos += count;
    }

    /// Copy as much of `input` as fits. Returns samples accepted.
    pub fn write(&mut self, input: &[i16]) -> usize {
        let count = input.len().min(self.max_write());
        let count = count - count % self.channels;
        self.buf[self.write_pos..self.write_pos + count].copy_from_slice(&input[..count]);
        self.write_pos += count;
        count
    }

    /// Discard up to `count` buffered input samples. Returns samples dropped.
    pub fn skip_input(&mut self, count: usize) -> usize {
        let count = count.min(self.write_pos);
        let count = count - count % self.channels;
        self.buf.copy_within(count..self.write_pos, 0);
        self.write_pos -= count;
        count
    }

    /// Frames that can be produced from buffered input.
    pub fn output_avail(&self) -> usize {
        let frames = (self.write_pos / self.channels).saturating_sub(self.skip);
        let mut pos = 0;
        let mut phase = self.phase;
        let mut count = 0;
        while pos + self.width <= frames {
            pos += self.steps[phase];
            phase = (phase + 1) % self.phases;
            count += 1;
        }
        count
    }

    /// Produce up to `out.len()` samples from buffered input, removing the
    /// input that is no longer needed. Returns samples written.
    pub fn read(&mut self, out: &mut [i16]) -> usize {
        let ch = self.channels;
        let skipped = self.skip.min(self.write_pos / ch);
        self.skip -= skipped;
        let start = skipped * ch;

        let buf = std::mem::take(&mut self.buf);
        let (produced, consumed) = self.run(&buf[start..self.write_pos], out);
        self.buf = buf;

        let drop = start + consumed * ch;
        self.buf.copy_within(drop..self.write_pos, 0);
        self.write_pos -= drop;
        produced
    }

    /// Resample a caller-owned input array without touching the internal
    /// buffer. Returns `(samples_written, frames_consumed)`; unconsumed
    /// frames must be passed again on the next call.
    pub fn resample(&mut self, out: &mut [i16], input: &[i16]) -> (usize, usize) {
        let frames = input.len() / self.channels;
        let skipped = self.skip.min(frames);
        self.skip -= skipped;
        let (produced, consumed) = self.run(&input[skipped * self.channels..], out);
        (produced, skipped + consumed)
    }

    fn run(&mut self, input: &[i16], out: &mut [i16]) -> (usize, usize) {
        let ch = self.channels;
        let width = self.width;
        let frames = input.len() / ch;
        let half = 1i64 << (FILTER_BITS - 1);
        let mut pos = 0;
        let mut produced = 0;

        while produced + ch <= out.len() && pos + width <= frames {
            let row = &self.table[self.phase * width..(self.phase + 1) * width];
            let window = &input[pos * ch..(pos + width) * ch];
            for c in 0..ch {
                let sum: i64 = row
                    .iter()
                    .zip(window.iter().skip(c).step_by(ch))
                    .map(|(&k, &s)| k as i64 * s as i64)
                    .sum();
                let s = (sum + half) >> FILTER_BITS;
                out[produced + c] = s.clamp(i16::MIN as i64, i16::MAX as i64) as i16;
            }
            produced += ch;
            pos += self.steps[self.phase];
            self.phase = (self.phase + 1) % self.phases;
        }

        let consumed = pos.min(frames);
        self.skip += pos - consumed;
        (produced, consumed)
    }
}

impl std::fmt::Debug for Resampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resampler")
            .field("kind", &self.kind)
            .field("channels", &self.channels)
            .field("ratio", &self.ratio)
            .field("phases", &self.phases)
            .field("written", &self.write_pos)
            .finish_non_exhaustive()
    }
}
