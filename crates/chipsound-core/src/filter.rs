//! Post-synthesis filtering: analog output shaping, gain and limiting.
//!
//! [`OutputFilter`] models the gentle treble cut and DC blocking of a
//! console's analog output stage and applies a fixed-point gain.
//! [`SoftLimiter`] keeps boosted output from hard clipping, [`GainRamp`]
//! smooths master volume changes and [`apply_stereo_separation`] widens or
//! narrows the stereo image.

/// Unity gain for [`OutputFilter::set_gain`].
pub const GAIN_UNIT: i32 = 0x100;
const GAIN_BITS: u32 = 8;

/// Strongest high-pass, removing nearly all bass.
pub const BASS_NONE: u32 = 0;
/// High-pass matching typical hardware.
pub const BASS_NORMAL: u32 = 8;
/// Weakest high-pass, keeping all bass.
pub const BASS_MAX: u32 = 31;

#[inline]
fn clamp_sample(s: i32) -> i16 {
    s.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    p1: i32,
    pp1: i32,
    sum: i32,
}

/// Low-pass, leaky high-pass and gain for interleaved stereo.
#[derive(Debug, Clone)]
pub struct OutputFilter {
    gain: i32,
    bass: u32,
    enabled: bool,
    channels: [ChannelState; 2],
}

impl OutputFilter {
    /// Create a filter at unity gain with the normal high-pass.
    pub fn new() -> Self {
        Self {
            gain: GAIN_UNIT,
            bass: BASS_NORMAL,
            enabled: true,
            channels: [ChannelState::default(); 2],
        }
    }

    /// Gain in units of [`GAIN_UNIT`].
    pub fn set_gain(&mut self, gain: i32) {
        self.gain = gain;
    }

    /// High-pass shift, from [`BASS_NONE`] to [`BASS_MAX`]. Larger keeps more bass.
    pub fn set_bass(&mut self, bass: u32) {
        self.bass = bass.min(BASS_MAX);
    }

    /// When disabled only the gain is applied.
    pub fn enable(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Clear filter history.
    pub fn clear(&mut self) {
        self.channels = [ChannelState::default(); 2];
    }

    /// Filter interleaved stereo samples in place.
    pub fn run(&mut self, io: &mut [i16]) {
        let gain = self.gain;
        if !self.enabled {
            if gain != GAIN_UNIT {
                for s in io.iter_mut() {
                    *s = clamp_sample((*s as i32 * gain) >> GAIN_BITS);
                }
            }
            return;
        }

        let bass = self.bass;
        for (c, state) in self.channels.iter_mut().enumerate() {
            let mut p1 = state.p1;
            let mut pp1 = state.pp1;
            let mut sum = state.sum;
            for s in io.iter_mut().skip(c).step_by(2) {
                // low-pass
                let x = *s as i32;
                let f = x + p1;
                p1 = x * 3;

                // leaky integrator removes DC
                let delta = f - pp1;
                pp1 = f;
                let out = sum >> (GAIN_BITS + 2);
                sum = sum.wrapping_add(delta.wrapping_mul(gain)).wrapping_sub(sum >> bass);

                *s = clamp_sample(out);
            }
            *state = ChannelState { p1, pp1, sum };
        }
    }
}

impl Default for OutputFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Soft-knee limiter for samples that may exceed 16-bit range.
///
/// Samples below the knee pass unchanged; above it they approach full scale
/// asymptotically, never reaching past ±32767.
#[derive(Debug, Clone, Copy)]
pub struct SoftLimiter {
    knee: f32,
}

impl SoftLimiter {
    /// Limiter whose knee sits at `knee` of full scale (0.1 to 1.0).
    pub fn new(knee: f32) -> Self {
        Self {
            knee: knee.clamp(0.1, 1.0),
        }
    }

    /// Limit one sample.
    #[inline]
    pub fn process(&self, sample: i32) -> i16 {
        let full = i16::MAX as f32;
        let knee = self.knee * full;
        let mag = sample.unsigned_abs() as f32;
        if mag <= knee {
            return sample as i16;
        }
        let room = full - knee;
        let limited = if room <= 0.0 {
            full
        } else {
            knee + room * ((mag - knee) / room).tanh()
        };
        let limited = limited.min(full) as i32;
        if sample < 0 {
            -limited as i16
        } else {
            limited as i16
        }
    }

    /// Scale `io` by `gain` and limit the result in place.
    pub fn apply_gain(&self, io: &mut [i16], gain: f32) {
        for s in io.iter_mut() {
            *s = self.process((*s as f32 * gain) as i32);
        }
    }
}

impl Default for SoftLimiter {
    fn default() -> Self {
        Self::new(0.85)
    }
}

/// Linear ramp between master gain levels.
#[derive(Debug, Clone)]
pub struct GainRamp {
    current: f32,
    target: f32,
    step: f32,
    limiter: SoftLimiter,
}

impl GainRamp {
    /// Start at `gain` with no ramp in progress.
    pub fn new(gain: f32) -> Self {
        Self {
            current: gain,
            target: gain,
            step: 0.0,
            limiter: SoftLimiter::default(),
        }
    }

    /// Move to `gain` over `frames` stereo frames (immediately when zero).
    pub fn set_target(&mut self, gain: f32, frames: usize) {
        self.target = gain;
        if frames == 0 {
            self.current = gain;
            self.step = 0.0;
        } else {
            self.step = (gain - self.current) / frames as f32;
        }
    }

    /// Gain currently applied.
    pub fn current(&self) -> f32 {
        self.current
    }

    /// Apply the gain to interleaved stereo. The limiter only runs while the
    /// gain is above unity.
    pub fn process(&mut self, io: &mut [i16]) {
        if self.step == 0.0 && self.current == 1.0 {
            return;
        }
        for frame in io.chunks_exact_mut(2) {
            if self.step != 0.0 {
                self.current += self.step;
                let reached = (self.step > 0.0 && self.current >= self.target)
                    || (self.step < 0.0 && self.current <= self.target);
                if reached {
                    self.current = self.target;
                    self.step = 0.0;
                }
            }
            let boost = self.current > 1.0;
            for s in frame.iter_mut() {
                let scaled = (*s as f32 * self.current) as i32;
                *s = if boost || scaled != scaled as i16 as i32 {
                    self.limiter.process(scaled)
                } else {
                    scaled as i16
                };
            }
        }
    }
}

/// Mid/side stereo width: 0 is mono, 100 unchanged, 200 double width.
pub fn apply_stereo_separation(io: &mut [i16], percent: u32) {
    if percent == 100 {
        return;
    }
    let width = percent.min(200) as i32;
    for frame in io.chunks_exact_mut(2) {
        let l = frame[0] as i32;
        let r = frame[1] as i32;
        let mid = (l + r) / 2;
        let side = (l - r) / 2 * width / 100;
        frame[0] = clamp_sample(mid + side);
        frame[1] = clamp_sample(mid - side);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_blocks_dc() {
        let mut filter = OutputFilter::new();
        let mut io = vec![10_000i16; 2 * 20_000];
        filter.run(&mut io);
        assert!(io[io.len() - 2].abs() < 50);
        assert!(io[io.len() - 1].abs() < 50);
    }

    #[test]
    fn test_disabled_filter_only_scales() {
        let mut filter = OutputFilter::new();
        filter.enable(false);
        filter.set_gain(GAIN_UNIT * 2);
        let mut io = vec![1000, -1000, 20_000, -20_000];
        filter.run(&mut io);
        assert_eq!(io, vec![2000, -2000, i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_filter_passes_midband_at_unity() {
        let mut filter = OutputFilter::new();
        // 1 kHz square at 32 kHz
        let mut io: Vec<i16> = (0..64_000)
            .map(|i| if (i / 2) % 32 < 16 { 4000 } else { -4000 })
            .collect();
        filter.run(&mut io);
        let peak = io[32_000..].iter().map(|s| s.abs()).max().unwrap();
        assert!((3000..=4500).contains(&peak), "{peak}");
    }

    #[test]
    fn test_limiter_never_exceeds_full_scale() {
        let limiter = SoftLimiter::default();
        for s in [-200_000, -40_000, -32_768, 0, 1000, 30_000, 32_767, 100_000] {
            let out = limiter.process(s) as i32;
            assert!(out.abs() <= 32_767);
            assert_eq!(out.signum(), s.signum());
        }
        assert_eq!(limiter.process(1000), 1000);
    }

    #[test]
    fn test_limiter_is_monotonic() {
        let limiter = SoftLimiter::new(0.5);
        let mut prev = 0;
        for s in (0..80_000).step_by(997) {
            let out = limiter.process(s);
            assert!(out >= prev);
            prev = out;
        }
    }

    #[test]
    fn test_gain_ramp_reaches_target() {
        let mut ramp = GainRamp::new(1.0);
        ramp.set_target(0.5, 100);
        let mut io = vec![10_000i16; 400];
        ramp.process(&mut io);
        assert_eq!(ramp.current(), 0.5);
        assert_eq!(io[398], 5000);
        assert!(io[0] > 9_800);
    }

    #[test]
    fn test_attenuation_leaves_peaks_unlimited() {
        let mut ramp = GainRamp::new(0.968_75);
        let mut io = vec![32_000i16, -32_000];
        ramp.process(&mut io);
        assert_eq!(io, vec![31_000, -31_000]);

        let mut ramp = GainRamp::new(2.0);
        let mut io = vec![30_000i16, 1_000];
        ramp.process(&mut io);
        assert!(io[0] > 30_000);
        assert_eq!(io[1], 2_000);
    }

    #[test]
    fn test_stereo_separation() {
        let mut io = vec![1000, -1000];
        apply_stereo_separation(&mut io, 0);
        assert_eq!(io, vec![0, 0]);

        let mut io = vec![1000, 0];
        apply_stereo_separation(&mut io, 200);
        assert_eq!(io, vec![1500, -500]);
    }
}
