//! Konami SCC (K051649) five-voice wavetable, with the K052539 (SCC+)
//! waveform port.
//!
//! Ports take `(function << 8) | register`: function 0 writes waveform
//! bytes, 1 frequency, 2 volume, 3 key on/off and 4 the SCC+ waveform.
//! On the plain SCC voices 4 and 5 share one waveform.

use super::{clamp_sample, StreamChip};

/// Usual master clock.
pub const DEFAULT_CLOCK: u32 = 1_789_772;

/// Waveform function.
pub const FN_WAVEFORM: u32 = 0;
/// Frequency function, two registers per voice.
pub const FN_FREQUENCY: u32 = 1;
/// Volume function.
pub const FN_VOLUME: u32 = 2;
/// Key on/off function, one bit per voice.
pub const FN_KEY: u32 = 3;
/// SCC+ waveform function, without the shared fifth waveform.
pub const FN_WAVEFORM_PLUS: u32 = 4;

const CHANNELS: usize = 5;
const WAVE_LEN: usize = 32;
const FREQ_BASE_BITS: u32 = 16;

#[derive(Debug, Clone, Copy, Default)]
struct Channel {
    counter: u32,
    frequency: u32,
    volume: i32,
    key: bool,
    waveform: [i8; WAVE_LEN],
}

/// SCC state.
#[derive(Debug, Clone)]
pub struct K051649 {
    clock: u32,
    channels: [Channel; CHANNELS],
    freq_regs: [u8; 10],
    muted: u32,
    mix: Vec<i32>,
}

impl K051649 {
    /// Create a chip at `clock` Hz.
    pub fn new(clock: u32) -> Self {
        Self {
            clock,
            channels: [Channel::default(); CHANNELS],
            freq_regs: [0; 10],
            muted: 0,
            mix: Vec::new(),
        }
    }

    fn rate(&self) -> u32 {
        self.clock / 16
    }

    fn write_waveform(&mut self, offset: u8, data: u8, shared: bool) {
        let voice = (offset >> 5) as usize;
        if voice >= CHANNELS {
            return;
        }
        let index = offset as usize & (WAVE_LEN - 1);
        self.channels[voice].waveform[index] = data as i8;
        if shared && offset >= 0x60 {
            self.channels[4].waveform[index] = data as i8;
        }
    }

    fn write_frequency(&mut self, offset: u8, data: u8) {
        let offset = offset as usize;
        if offset >= self.freq_regs.len() {
            return;
        }
        self.freq_regs[offset] = data;
        let lo = self.freq_regs[offset & 0x0E] as u32;
        let hi = self.freq_regs[offset | 1] as u32;
        self.channels[offset >> 1].frequency = (lo + (hi << 8)) & 0xFFF;
    }

    /// Read back a waveform byte.
    pub fn read_waveform(&self, offset: u8) -> u8 {
        let voice = (offset >> 5) as usize;
        if voice >= CHANNELS {
            return 0xFF;
        }
        self.channels[voice].waveform[offset as usize & (WAVE_LEN - 1)] as u8
    }

    /// Counter step per output sample for a frequency register value.
    fn counter_step(&self, frequency: u32) -> u32 {
        let tone = self.clock as f64 / ((frequency + 1) * 16) as f64;
        let per_sample = (self.rate() / 32) as f64;
        (tone * (1u32 << FREQ_BASE_BITS) as f64 / per_sample) as u32
    }
}

impl Default for K051649 {
    fn default() -> Self {
        Self::new(DEFAULT_CLOCK)
    }
}

impl StreamChip for K051649 {
    fn sample_rate(&self) -> f64 {
        self.rate() as f64
    }

    fn voice_count(&self) -> usize {
        CHANNELS
    }

    fn reset(&mut self) {
        for chan in &mut self.channels {
            chan.frequency = 0;
            chan.volume = 0;
            chan.counter = 0;
            chan.key = false;
        }
        self.freq_regs = [0; 10];
    }

    fn write(&mut self, port: u32, data: u8) {
        let reg = port as u8;
        match port >> 8 {
            FN_WAVEFORM => self.write_waveform(reg, data, true),
            FN_FREQUENCY => self.write_frequency(reg, data),
            FN_VOLUME => {
                if let Some(chan) = self.channels.get_mut(reg as usize & 7) {
                    chan.volume = (data & 0x0F) as i32;
                }
            }
            FN_KEY => {
                for (i, chan) in self.channels.iter_mut().enumerate() {
                    chan.key = (data >> i) & 1 != 0;
                }
            }
            FN_WAVEFORM_PLUS => self.write_waveform(reg, data, false),
            _ => {}
        }
    }

    fn mute_voices(&mut self, mask: u32) {
        self.muted = mask;
    }

    fn render(&mut self, out: &mut [i16]) {
        let frames = out.len() / 2;
        self.mix.clear();
        self.mix.resize(frames, 0);

        for i in 0..CHANNELS {
            let chan = self.channels[i];
            // no sound below frequency 9
            if chan.volume == 0 || chan.frequency <= 8 || !chan.key {
                continue;
            }
            let step = self.counter_step(chan.frequency);
            let muted = (self.muted >> i) & 1 != 0;
            let mut counter = chan.counter;
            for m in self.mix.iter_mut() {
                counter = counter.wrapping_add(step);
                if !muted {
                    let offs = (counter >> FREQ_BASE_BITS) as usize & (WAVE_LEN - 1);
                    *m += (chan.waveform[offs] as i32 * chan.volume) >> 3;
                }
            }
            self.channels[i].counter = counter;
        }

        for (frame, &m) in out.chunks_exact_mut(2).zip(&self.mix) {
            let sample = clamp_sample(m * 8 * 16 / CHANNELS as i32);
            frame[0] = sample;
            frame[1] = sample;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_voice(chip: &mut K051649, voice: u8) {
        for i in 0..32u8 {
            let value = if i < 16 { 0x7F } else { 0x80 };
            chip.write(FN_WAVEFORM << 8 | (voice as u32 * 32 + i as u32), value);
        }
        chip.write(FN_FREQUENCY << 8 | (voice as u32 * 2), 0xFF);
        chip.write(FN_FREQUENCY << 8 | (voice as u32 * 2 + 1), 0x00);
        chip.write(FN_VOLUME << 8 | voice as u32, 0x0F);
    }

    #[test]
    fn test_shared_fifth_waveform() {
        let mut chip = K051649::default();
        chip.write(FN_WAVEFORM << 8 | 0x65, 0x12);
        assert_eq!(chip.read_waveform(0x65), 0x12);
        assert_eq!(chip.read_waveform(0x85), 0x12);

        chip.write(FN_WAVEFORM_PLUS << 8 | 0x66, 0x34);
        assert_eq!(chip.read_waveform(0x66), 0x34);
        assert_eq!(chip.read_waveform(0x86), 0x00);
    }

    #[test]
    fn test_frequency_pairs() {
        let mut chip = K051649::default();
        chip.write(FN_FREQUENCY << 8 | 2, 0x34);
        chip.write(FN_FREQUENCY << 8 | 3, 0xF2);
        assert_eq!(chip.channels[1].frequency, 0x234);
    }

    #[test]
    fn test_keyed_voice_sounds() {
        let mut chip = K051649::default();
        square_voice(&mut chip, 0);
        let mut out = vec![0i16; 2 * 1024];
        chip.render(&mut out);
        assert!(out.iter().all(|&s| s == 0));

        chip.write(FN_KEY << 8, 0x01);
        chip.render(&mut out);
        let max = out.iter().copied().max().unwrap_or(0);
        let min = out.iter().copied().min().unwrap_or(0);
        let level = (((0x7F * 15) >> 3) * 8 * 16 / 5) as i16;
        assert_eq!(max, level);
        assert!(min < 0);
        assert_eq!(out[0], out[1]);
    }

    #[test]
    fn test_muted_voice_keeps_counter() {
        let mut a = K051649::default();
        let mut b = K051649::default();
        for chip in [&mut a, &mut b] {
            square_voice(chip, 2);
            chip.write(FN_KEY << 8, 0x04);
        }
        b.mute_voices(1 << 2);
        let mut out = vec![0i16; 2 * 300];
        a.render(&mut out);
        b.render(&mut out);
        assert!(out.iter().all(|&s| s == 0));
        assert_eq!(a.channels[2].counter, b.channels[2].counter);
    }
}
