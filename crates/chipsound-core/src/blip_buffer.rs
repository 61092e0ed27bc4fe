//! Band-limited synthesis buffer.
//!
//! Chip emulators describe their output as amplitude changes at native clock
//! timestamps. A [`BlipSynth`] spreads each change over a short windowed-sinc
//! step kernel inside a [`BlipBuffer`], which later integrates the accumulated
//! deltas into 16-bit PCM at the output rate. Because every step is
//! band-limited, square and pulse waves come out free of aliasing no matter
//! how far the chip clock is from the output rate.
//!
//! Time inside the buffer is "resampled time": output samples in the integer
//! part and [`BUFFER_ACCURACY`] bits of sub-sample phase.

use crate::error::{CoreError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Number of fractional bits in resampled time.
pub const BUFFER_ACCURACY: u32 = 16;

/// Number of bits of sub-sample phase used to pick a kernel.
pub const PHASE_BITS: u32 = 5;

/// Number of kernel phases per output sample.
pub const PHASE_COUNT: usize = 1 << PHASE_BITS;

/// Widest supported kernel, in output samples.
pub const MAX_QUALITY: usize = 32;

/// Cells kept past the end of the buffer so kernels never write out of range.
pub const BUFFER_EXTRA: usize = MAX_QUALITY + 2;

/// Bits of internal sample resolution. `1 << (SAMPLE_BITS - 1)` is half scale.
pub const SAMPLE_BITS: u32 = 30;

/// Sum every kernel phase is normalized to.
pub const KERNEL_UNIT: i32 = 32768;

/// Default buffer length in milliseconds.
pub const DEFAULT_LENGTH_MS: u32 = 250;

/// Narrow kernel, used for voices with little high-frequency content.
pub const QUALITY_MEDIUM: usize = 8;
/// Default kernel width for pulse and square voices.
pub const QUALITY_GOOD: usize = 12;
/// Wide kernel.
pub const QUALITY_HIGH: usize = 16;

const DELTA_BITS: u32 = SAMPLE_BITS - 16;
const PHASE_SHIFT: u32 = BUFFER_ACCURACY - PHASE_BITS;

/// Time in native chip clocks, relative to the start of the current frame.
pub type BlipTime = i32;

/// Time in output samples with [`BUFFER_ACCURACY`] fractional bits.
pub type ResampledTime = u64;

/// Largest buffer the resampled time representation can address.
pub const fn max_buffer_size() -> usize {
    (u32::MAX >> BUFFER_ACCURACY) as usize - BUFFER_EXTRA - 64
}

#[inline]
fn clamp_sample(s: i32) -> i16 {
    s.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

// ============================================================================
// BlipBuffer
// ============================================================================

/// Delta accumulation buffer integrated into PCM on read.
#[derive(Clone)]
pub struct BlipBuffer {
    factor: u64,
    offset: u64,
    buffer: Vec<i32>,
    size: usize,
    sample_rate: u32,
    clock_rate: f64,
    bass_freq: i32,
    bass_shift: u32,
    length_ms: u32,
    integrator: i32,
    modified: bool,
}

impl BlipBuffer {
    /// Create an empty buffer. Call [`set_sample_rate`](Self::set_sample_rate)
    /// before synthesizing into it.
    pub fn new() -> Self {
        Self {
            factor: (u32::MAX / 2 + 1) as u64,
            offset: 0,
            buffer: Vec::new(),
            size: 0,
            sample_rate: 0,
            clock_rate: 0.0,
            bass_freq: 16,
            bass_shift: 0,
            length_ms: 0,
            integrator: 0,
            modified: false,
        }
    }

    /// Resize the buffer to hold `msec` milliseconds at `rate` and clear it.
    ///
    /// On error the buffer keeps its previous configuration.
    pub fn set_sample_rate(&mut self, rate: u32, msec: u32) -> Result<()> {
        if rate == 0 {
            return Err(CoreError::UnsupportedSampleRate { rate });
        }
        let requested = ((rate as u64 * (msec as u64 + 1) + 999) / 1000) as usize;
        let limit = max_buffer_size();
        if requested > limit {
            return Err(CoreError::BufferTooLarge { requested, limit });
        }

        if self.size != requested || self.buffer.is_empty() {
            log::debug!("blip buffer: {requested} samples at {rate} Hz ({msec} ms)");
            self.buffer = vec![0; requested + BUFFER_EXTRA];
            self.size = requested;
        }

        self.sample_rate = rate;
        self.length_ms = (requested as u64 * 1000 / rate as u64) as u32;
        self.length_ms = self.length_ms.saturating_sub(1);
        if self.clock_rate > 0.0 {
            self.factor = self.clock_rate_factor(self.clock_rate);
        }
        self.set_bass_freq(self.bass_freq);
        self.clear();
        Ok(())
    }

    /// Set the native clock rate of the sources feeding this buffer.
    ///
    /// # Panics
    ///
    /// Panics if the clock to output ratio is so large that the conversion
    /// factor rounds to zero.
    pub fn set_clock_rate(&mut self, clock_hz: f64) {
        self.clock_rate = clock_hz;
        self.factor = self.clock_rate_factor(clock_hz);
    }

    /// Conversion factor from native clocks at `clock_hz` to resampled time.
    pub fn clock_rate_factor(&self, clock_hz: f64) -> u64 {
        let ratio = self.sample_rate as f64 / clock_hz;
        let factor = (ratio * (1u64 << BUFFER_ACCURACY) as f64 + 0.5).floor();
        assert!(
            factor >= 1.0 || self.sample_rate == 0,
            "clock/output ratio too large"
        );
        factor as u64
    }

    /// Set the high-pass cutoff. Zero or negative disables it.
    pub fn set_bass_freq(&mut self, freq: i32) {
        self.bass_freq = freq;
        let mut shift = 31;
        if freq > 0 && self.sample_rate > 0 {
            shift = 13;
            let mut f = ((freq as i64) << 16) / self.sample_rate as i64;
            loop {
                f >>= 1;
                if f == 0 {
                    break;
                }
                shift -= 1;
                if shift == 0 {
                    break;
                }
            }
        }
        self.bass_shift = shift;
    }

    /// Drop all buffered samples and reset the integrator.
    pub fn clear(&mut self) {
        self.offset = 0;
        self.integrator = 0;
        self.modified = false;
        self.buffer.fill(0);
    }

    /// Close the current frame `time` clocks after its start, making the
    /// samples before it available for reading.
    ///
    /// # Panics
    ///
    /// Panics if the frame ends beyond the buffer capacity.
    pub fn end_frame(&mut self, time: BlipTime) {
        self.offset += time as u64 * self.factor;
        assert!(
            self.samples_avail() <= self.size,
            "time is past end of buffer"
        );
    }

    /// Number of output samples covered by `time` clocks from now.
    pub fn count_samples(&self, time: BlipTime) -> usize {
        let last = self.to_resampled(time) >> BUFFER_ACCURACY;
        let first = self.offset >> BUFFER_ACCURACY;
        (last - first) as usize
    }

    /// Clocks to run from the current position until `count` samples in total
    /// are available, counting those already buffered. Zero when that many
    /// are already there.
    pub fn count_clocks(&self, count: usize) -> BlipTime {
        let count = count.min(self.size);
        let time = (count as u64) << BUFFER_ACCURACY;
        if time <= self.offset {
            return 0;
        }
        ((time - self.offset + self.factor - 1) / self.factor) as BlipTime
    }

    /// Number of samples ready to be read.
    #[inline]
    pub fn samples_avail(&self) -> usize {
        (self.offset >> BUFFER_ACCURACY) as usize
    }

    /// Discard `count` samples without shifting the buffer contents.
    ///
    /// # Panics
    ///
    /// Panics if more samples are removed than are available.
    pub fn remove_silence(&mut self, count: usize) {
        assert!(count <= self.samples_avail(), "removed more samples than available");
        self.offset -= (count as u64) << BUFFER_ACCURACY;
    }

    /// Remove `count` samples, shifting the rest to the start of the buffer.
    pub fn remove_samples(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        self.remove_silence(count);
        let remain = self.samples_avail() + BUFFER_EXTRA;
        self.buffer.copy_within(count..count + remain, 0);
        self.buffer[remain..remain + count].fill(0);
    }

    /// Integrate up to `out.len()` samples (half that when `stereo`, writing
    /// every other slot) into `out` and remove them. Returns samples read.
    pub fn read_samples(&mut self, out: &mut [i16], stereo: bool) -> usize {
        let step = if stereo { 2 } else { 1 };
        let count = self.samples_avail().min(out.len() / step);
        if count == 0 {
            return 0;
        }

        let bass = self.bass_shift;
        let mut sum = self.integrator;
        for (i, &cell) in self.buffer[..count].iter().enumerate() {
            let s = sum >> DELTA_BITS;
            sum = sum.wrapping_sub(sum >> bass).wrapping_add(cell);
            out[i * step] = clamp_sample(s);
        }
        self.integrator = sum;
        self.remove_samples(count);
        count
    }

    /// Add externally generated 16-bit samples at the current read position.
    pub fn mix_samples(&mut self, input: &[i16]) {
        let start = MAX_QUALITY / 2 + self.samples_avail();
        let shift = SAMPLE_BITS - 16;
        let mut prev = 0i32;
        for (cell, &s) in self.buffer[start..].iter_mut().zip(input) {
            let s = (s as i32) << shift;
            *cell = cell.wrapping_add(s - prev);
            prev = s;
        }
        let end = start + input.len();
        self.buffer[end] = self.buffer[end].wrapping_sub(prev);
        self.modified = true;
    }

    /// Convert a clock time in the current frame to resampled time.
    #[inline]
    pub fn to_resampled(&self, time: BlipTime) -> ResampledTime {
        self.offset + time as u64 * self.factor
    }

    /// Duration of `time` clocks in resampled time.
    #[inline]
    pub fn resampled_duration(&self, time: BlipTime) -> ResampledTime {
        time as u64 * self.factor
    }

    /// Output sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Native clock rate.
    pub fn clock_rate(&self) -> f64 {
        self.clock_rate
    }

    /// Buffer length in milliseconds, as actually allocated.
    pub fn length_ms(&self) -> u32 {
        self.length_ms
    }

    /// Buffer capacity in samples.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Delay in samples between a delta and its kernel center.
    pub fn output_latency(&self) -> usize {
        MAX_QUALITY / 2
    }

    /// Current high-pass shift.
    pub fn highpass_shift(&self) -> u32 {
        self.bass_shift
    }

    /// Mark the buffer as holding non-silent data.
    pub fn set_modified(&mut self) {
        self.modified = true;
    }

    /// Return whether anything was written since the last call, clearing the flag.
    pub fn clear_modified(&mut self) -> bool {
        std::mem::replace(&mut self.modified, false)
    }

    /// Whether anything was written since the flag was last cleared.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Start a sample-by-sample read.
    pub fn reader(&self) -> BlipReader {
        BlipReader {
            accum: self.integrator,
            pos: 0,
            bass: self.bass_shift,
        }
    }

    #[inline]
    pub(crate) fn cells_mut(&mut self) -> &mut [i32] {
        &mut self.buffer
    }

    #[inline]
    fn cell(&self, index: usize) -> i32 {
        self.buffer[index]
    }
}

impl Default for BlipBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BlipBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlipBuffer")
            .field("sample_rate", &self.sample_rate)
            .field("clock_rate", &self.clock_rate)
            .field("size", &self.size)
            .field("samples_avail", &self.samples_avail())
            .field("bass_shift", &self.bass_shift)
            .finish_non_exhaustive()
    }
}

/// Incremental reader over a [`BlipBuffer`], for mixers that combine several
/// buffers sample by sample.
///
/// After reading `n` samples, call [`end`](Self::end) and then
/// [`BlipBuffer::remove_samples`] with the same `n`.
#[derive(Debug, Clone, Copy)]
pub struct BlipReader {
    accum: i32,
    pos: usize,
    bass: u32,
}

impl BlipReader {
    /// Current sample at 16-bit scale, not clamped.
    #[inline]
    pub fn read(&self) -> i32 {
        self.accum >> DELTA_BITS
    }

    /// Current sample at full internal resolution.
    #[inline]
    pub fn read_raw(&self) -> i32 {
        self.accum
    }

    /// Advance to the next sample.
    #[inline]
    pub fn next(&mut self, buf: &BlipBuffer) {
        self.accum = self
            .accum
            .wrapping_add(buf.cell(self.pos))
            .wrapping_sub(self.accum >> self.bass);
        self.pos += 1;
    }

    /// Store the integrator back into the buffer.
    pub fn end(self, buf: &mut BlipBuffer) {
        buf.integrator = self.accum;
    }
}

// ============================================================================
// Equalization
// ============================================================================

/// Treble shaping applied when generating a synthesis kernel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlipEq {
    /// Response at the cutoff frequency in dB (-6 = half, -12 = quarter).
    pub treble: f64,
    /// Kaiser window beta.
    pub kaiser: f64,
    /// Frequency the rolloff begins at, 0 for the default.
    pub rolloff_freq: i32,
    /// Sample rate the rolloff frequency refers to.
    pub sample_rate: i32,
    /// Explicit cutoff frequency, 0 for automatic.
    pub cutoff_freq: i32,
}

impl BlipEq {
    /// Equalizer with only a treble setting.
    pub fn new(treble: f64) -> Self {
        Self {
            treble,
            kaiser: 5.2,
            rolloff_freq: 0,
            sample_rate: 44_100,
            cutoff_freq: 0,
        }
    }

    /// Equalizer with an explicit rolloff point.
    pub fn with_rolloff(treble: f64, rolloff_freq: i32, sample_rate: i32) -> Self {
        Self {
            rolloff_freq,
            sample_rate,
            ..Self::new(treble)
        }
    }

    /// Fill `out` with the right half of the kernel, center first.
    fn generate(&self, out: &mut [f64]) {
        let count = out.len();
        // narrow kernels get a lower cutoff to offset their wide transition band
        let mut cutoff_adj = PHASE_COUNT as f64 * 2.25 / count as f64 + 0.85;
        if cutoff_adj < 1.02 {
            cutoff_adj = 1.02;
        }
        let half_rate = self.sample_rate as f64 * 0.5;
        if self.cutoff_freq != 0 {
            cutoff_adj = half_rate / self.cutoff_freq as f64;
        }
        let cutoff = self.rolloff_freq as f64 * cutoff_adj / half_rate;

        gen_sinc(out, PHASE_COUNT as f64 * cutoff_adj, self.treble, cutoff);
        kaiser_window(out, self.kaiser);
    }
}

impl Default for BlipEq {
    fn default() -> Self {
        Self::new(-8.0)
    }
}

/// Right half of a sinc kernel with its cutoff at `sample_rate / 2 / oversample`
/// and `treble` dB of response there. `mid` is where the rolloff starts.
fn gen_sinc(out: &mut [f64], oversample: f64, treble: f64, mid: f64) {
    let mid = mid.min(0.9999);
    let treble = treble.clamp(-300.0, 5.0);

    let maxh = 4096.0;
    let rolloff = 10f64.powf(1.0 / (maxh * 20.0) * treble / (1.0 - mid));
    let pow_a_n = rolloff.powf(maxh - maxh * mid);
    let to_angle = std::f64::consts::PI / maxh / oversample;
    for (i, slot) in out.iter_mut().enumerate().skip(1) {
        let angle = i as f64 * to_angle;
        let c = rolloff * (angle * maxh - angle).cos() - (angle * maxh).cos();
        let cos_nc_angle = (angle * maxh * mid).cos();
        let cos_nc1_angle = (angle * maxh * mid - angle).cos();
        let cos_angle = angle.cos();

        let c = c * pow_a_n - rolloff * cos_nc1_angle + cos_nc_angle;
        let d = 1.0 + rolloff * (rolloff - cos_angle - cos_angle);
        let b = 2.0 - cos_angle - cos_angle;
        let a = 1.0 - cos_angle - cos_nc_angle + cos_nc1_angle;

        *slot = (a * d + c * b) / (b * d);
    }

    // center extrapolated from its neighbours
    if out.len() > 2 {
        out[0] = out[1] + 0.5 * (out[1] - out[2]);
    }
}

/// Apply a Kaiser window, center at index 0. The window gain is not unity;
/// kernel normalization absorbs it.
fn kaiser_window(io: &mut [f64], beta: f64) {
    const ACCURACY: u32 = 10;

    let beta2 = beta * beta;
    let step = 0.5 / io.len() as f64;
    let mut pos = 0.5;
    for sample in io.iter_mut() {
        let x = (pos - pos * pos) * beta2;
        let mut u = x;
        let mut k = 1.0;
        let mut n = 2.0;
        loop {
            u *= x / (n * n);
            n += 1.0;
            k += u;
            if k > u * (1u32 << ACCURACY) as f64 {
                break;
            }
        }
        pos += step;
        *sample *= k;
    }
}

// ============================================================================
// BlipSynth
// ============================================================================

/// Band-limited step generator writing into a [`BlipBuffer`].
///
/// `quality` is the kernel width in output samples and `range` the largest
/// amplitude the caller will pass to [`update`](Self::update).
#[derive(Clone)]
pub struct BlipSynth {
    quality: usize,
    range: i32,
    /// `PHASE_COUNT` rows of `quality` coefficients.
    phases: Vec<i32>,
    kernel_unit: i32,
    volume_unit: f64,
    delta_factor: i32,
    last_amp: i32,
    eq: BlipEq,
}

impl BlipSynth {
    /// Create a synth with the given kernel width and amplitude range.
    ///
    /// # Panics
    ///
    /// Panics if `quality` is odd or outside `8..=MAX_QUALITY`.
    pub fn new(quality: usize, range: i32) -> Self {
        assert!(
            quality % 2 == 0 && (QUALITY_MEDIUM..=MAX_QUALITY).contains(&quality),
            "unsupported kernel quality {quality}"
        );
        let mut synth = Self {
            quality,
            range,
            phases: vec![0; PHASE_COUNT * quality],
            kernel_unit: 0,
            volume_unit: 0.0,
            delta_factor: 0,
            last_amp: 0,
            eq: BlipEq::default(),
        };
        synth.build_kernel();
        synth
    }

    /// Kernel width in output samples.
    pub fn quality(&self) -> usize {
        self.quality
    }

    /// Set the treble equalization and regenerate the kernel.
    pub fn set_treble_eq(&mut self, eq: BlipEq) {
        self.eq = eq;
        self.build_kernel();
        let vol = self.volume_unit;
        self.volume_unit = 0.0;
        if vol != 0.0 {
            self.set_volume_unit(vol);
        }
    }

    /// Set overall volume, where `volume` corresponds to an amplitude of `range`.
    pub fn set_volume(&mut self, volume: f64) {
        let range = self.range.unsigned_abs().max(1) as f64;
        self.set_volume_unit(volume / range);
    }

    /// Set the output level of an amplitude of 1.
    pub fn set_volume_unit(&mut self, unit: f64) {
        if unit == self.volume_unit {
            return;
        }
        if self.kernel_unit != KERNEL_UNIT {
            self.build_kernel();
        }
        self.volume_unit = unit;
        let mut factor = unit * (1u64 << SAMPLE_BITS) as f64 / self.kernel_unit as f64;

        if factor > 0.0 {
            // low factors lose precision, so shrink the kernel instead
            let mut shift = 0;
            while factor < 2.0 {
                shift += 1;
                factor *= 2.0;
            }
            if shift > 0 {
                self.kernel_unit >>= shift;
                assert!(self.kernel_unit > 0, "volume unit is too low");
                self.rescale_kernel(shift);
            }
        }
        self.delta_factor = (factor + 0.5).floor() as i32;
    }

    /// Sum every phase of the kernel is normalized to.
    pub fn kernel_unit(&self) -> i32 {
        self.kernel_unit
    }

    /// Coefficients of the kernel for sub-sample `phase`.
    pub fn phase_coefficients(&self, phase: usize) -> &[i32] {
        &self.phases[phase * self.quality..(phase + 1) * self.quality]
    }

    /// Output a step of `delta` at clock `time` in the current frame.
    #[inline]
    pub fn offset(&self, time: BlipTime, delta: i32, buf: &mut BlipBuffer) {
        self.offset_resampled(buf.to_resampled(time), delta, buf);
    }

    /// Output a step of `delta` at resampled `time`.
    #[inline]
    pub fn offset_resampled(&self, time: ResampledTime, delta: i32, buf: &mut BlipBuffer) {
        let delta = delta.wrapping_mul(self.delta_factor);
        let q = self.quality;
        let base = (time >> BUFFER_ACCURACY) as usize + (MAX_QUALITY / 2 - q / 2);
        let phase = ((time >> PHASE_SHIFT) as usize) & (PHASE_COUNT - 1);
        let kernel = &self.phases[phase * q..(phase + 1) * q];
        let cells = &mut buf.cells_mut()[base..base + q];
        for (cell, &k) in cells.iter_mut().zip(kernel) {
            *cell = cell.wrapping_add(k.wrapping_mul(delta));
        }
        buf.set_modified();
    }

    /// Move the output to `amp` at clock `time`, emitting the difference.
    #[inline]
    pub fn update(&mut self, time: BlipTime, amp: i32, buf: &mut BlipBuffer) {
        let delta = amp - self.last_amp;
        self.last_amp = amp;
        self.offset(time, delta, buf);
    }

    /// Last amplitude passed to [`update`](Self::update).
    pub fn last_amp(&self) -> i32 {
        self.last_amp
    }

    /// Forget the last amplitude.
    pub fn reset_amp(&mut self) {
        self.last_amp = 0;
    }

    /// Generate the kernel: integrate the impulse, sample the integral at each
    /// phase's cell boundaries and difference, then correct rounding so each
    /// phase sums to exactly `KERNEL_UNIT`.
    fn build_kernel(&mut self) {
        let q = self.quality;
        let half_size = (q - 1) * PHASE_COUNT / 2 + 1;
        let mut half = vec![0.0f64; half_size];
        self.eq.generate(&mut half);

        // small to large reduces error
        let mut total = 0.0;
        for &v in half[1..].iter().rev() {
            total += v;
        }
        let total = total * 2.0 + half[0];
        let rescale = KERNEL_UNIT as f64 / total;

        let len = 2 * (half_size - 1) + 1;
        let center = half_size - 1;
        let mut integral = vec![0.0f64; len + 1];
        for j in 0..len {
            integral[j + 1] = integral[j] + half[center.abs_diff(j)];
        }
        let at = |pos: isize| -> f64 {
            let idx = pos.clamp(0, len as isize) as usize;
            (integral[idx] * rescale + 0.5).floor()
        };

        for phase in 0..PHASE_COUNT {
            for tap in 0..q {
                let lo = (tap * PHASE_COUNT) as isize - phase as isize;
                let hi = lo + PHASE_COUNT as isize;
                self.phases[phase * q + tap] = (at(hi) - at(lo)) as i32;
            }
        }

        self.kernel_unit = KERNEL_UNIT;
        self.adjust_impulse();
    }

    fn adjust_impulse(&mut self) {
        let q = self.quality;
        for phase in 0..PHASE_COUNT {
            let row = &mut self.phases[phase * q..(phase + 1) * q];
            let error = self.kernel_unit - row.iter().sum::<i32>();
            row[q / 2] += error;
        }
    }

    fn rescale_kernel(&mut self, shift: u32) {
        // integrate, rescale, then differentiate so rounding does not accumulate
        let keep_positive = 0x8000 + (1 << (shift - 1));
        let q = self.quality;
        for phase in 0..PHASE_COUNT {
            let mut sum = keep_positive;
            for c in &mut self.phases[phase * q..(phase + 1) * q] {
                let prev = sum;
                sum += *c;
                *c = (sum >> shift) - (prev >> shift);
            }
        }
        self.adjust_impulse();
    }
}

impl std::fmt::Debug for BlipSynth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlipSynth")
            .field("quality", &self.quality)
            .field("range", &self.range)
            .field("kernel_unit", &self.kernel_unit)
            .field("delta_factor", &self.delta_factor)
            .finish_non_exhaustive()
    }
}
