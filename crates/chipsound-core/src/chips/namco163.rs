//! Namco 163 wavetable sound: up to eight voices reading 4-bit samples from
//! 128 bytes of shared sound RAM.
//!
//! Voices are time-multiplexed, so each one runs slower the more voices are
//! enabled. The upper 64 bytes of RAM hold the voice registers, eight bytes
//! per voice with voice 7 at `$78`.

use super::{emit, SoundChip, VoiceOutput};
use crate::blip_buffer::{BlipBuffer, BlipEq, BlipSynth, BlipTime, QUALITY_MEDIUM};

/// Write the RAM address (bit 7 enables auto-increment).
pub const ADDR_REG: u16 = 0xF800;
/// Read or write sound RAM at the current address.
pub const DATA_REG: u16 = 0x4800;

const VOICE_COUNT: usize = 8;
const RAM_SIZE: usize = 0x80;
const FRAC_BITS: u32 = 16;
// 15 CPU clocks per voice update, times the 16-bit phase step
const CLOCKS_PER_CYCLE: i64 = 15 << 16;

const VOICE_NAMES: [&str; VOICE_COUNT] = [
    "Wave 1", "Wave 2", "Wave 3", "Wave 4", "Wave 5", "Wave 6", "Wave 7", "Wave 8",
];

#[derive(Debug, Clone, Copy, Default)]
struct Osc {
    output: VoiceOutput,
    // clocks with FRAC_BITS fractional bits
    delay: i64,
    last_amp: i32,
    wave_pos: usize,
}

/// Namco 163 sound hardware.
#[derive(Debug, Clone)]
pub struct Namco163 {
    oscs: [Osc; VOICE_COUNT],
    ram: [u8; RAM_SIZE],
    addr_reg: u8,
    last_time: BlipTime,
    synth: BlipSynth,
}

impl Namco163 {
    /// Create a silent chip at nominal volume.
    pub fn new() -> Self {
        let mut chip = Self {
            oscs: [Osc::default(); VOICE_COUNT],
            ram: [0; RAM_SIZE],
            addr_reg: 0,
            last_time: 0,
            synth: BlipSynth::new(QUALITY_MEDIUM, 15 * 15),
        };
        chip.set_volume(1.0);
        chip
    }

    fn access(&mut self) -> usize {
        let addr = (self.addr_reg & 0x7F) as usize;
        if self.addr_reg & 0x80 != 0 {
            self.addr_reg = self.addr_reg.wrapping_add(1) | 0x80;
        }
        addr
    }

    /// Read sound RAM at `time` through [`DATA_REG`].
    pub fn read_data(&mut self, out: &mut [BlipBuffer], time: BlipTime) -> u8 {
        self.run_until(out, time);
        let addr = self.access();
        self.ram[addr]
    }

    fn active_voices(&self) -> usize {
        ((self.ram[0x7F] >> 4) & 7) as usize + 1
    }

    fn run_until(&mut self, out: &mut [BlipBuffer], end_time: BlipTime) {
        if end_time <= self.last_time {
            return;
        }
        let active = self.active_voices();
        let start = (self.last_time as i64) << FRAC_BITS;
        let end = (end_time as i64) << FRAC_BITS;

        for i in VOICE_COUNT - active..VOICE_COUNT {
            let osc = &mut self.oscs[i];
            let target = osc.output.target();
            if target.is_none() {
                osc.last_amp = 0;
            }
            let mut time = start + osc.delay;
            osc.delay = 0;
            if time >= end {
                osc.delay = time - end;
                continue;
            }

            let regs = &self.ram[0x40 + i * 8..0x48 + i * 8];
            let volume = (regs[7] & 15) as i32;
            let freq = (regs[4] as i64 & 3) << 16 | (regs[2] as i64) << 8 | regs[0] as i64;
            let wave_size = 32 - ((regs[4] >> 2) & 7) as usize * 4;
            // very low frequencies would stall register changes
            if regs[4] & 0xE0 == 0 || volume == 0 || freq < 64 * active as i64 || wave_size == 0 {
                continue;
            }

            let period = CLOCKS_PER_CYCLE * active as i64 * (1 << FRAC_BITS) / freq;
            let wave_base = regs[6] as usize;
            let mut last_amp = osc.last_amp;
            let mut wave_pos = osc.wave_pos;
            loop {
                let addr = (wave_pos + wave_base) & 0xFF;
                let sample = (self.ram[addr >> 1] >> ((addr & 1) * 4)) as i32 & 15;
                let amp = sample * volume;
                if target.is_some() && amp != last_amp {
                    emit(&self.synth, out, target, (time >> FRAC_BITS) as BlipTime, amp - last_amp);
                    last_amp = amp;
                }
                wave_pos += 1;
                if wave_pos >= wave_size {
                    wave_pos = 0;
                }
                time += period;
                if time >= end {
                    break;
                }
            }
            osc.wave_pos = wave_pos;
            osc.last_amp = last_amp;
            osc.delay = time - end;
        }
        self.last_time = end_time;
    }
}

impl Default for Namco163 {
    fn default() -> Self {
        Self::new()
    }
}

impl SoundChip for Namco163 {
    fn voice_count(&self) -> usize {
        VOICE_COUNT
    }

    fn voice_names(&self) -> &'static [&'static str] {
        &VOICE_NAMES
    }

    fn reset(&mut self) {
        self.last_time = 0;
        self.addr_reg = 0;
        self.ram = [0; RAM_SIZE];
        for osc in &mut self.oscs {
            *osc = Osc {
                output: osc.output,
                ..Osc::default()
            };
        }
    }

    fn set_voice_output(&mut self, voice: usize, output: Option<usize>) {
        if let Some(osc) = self.oscs.get_mut(voice) {
            osc.output.buffer = output;
        }
    }

    fn mute_voices(&mut self, mask: u32) {
        for (i, osc) in self.oscs.iter_mut().enumerate() {
            osc.output.muted = (mask >> i) & 1 != 0;
        }
    }

    fn set_volume(&mut self, volume: f64) {
        self.synth.set_volume_unit(0.10 / VOICE_COUNT as f64 / 225.0 * volume);
    }

    fn set_treble_eq(&mut self, eq: BlipEq) {
        self.synth.set_treble_eq(eq);
    }

    fn write(&mut self, out: &mut [BlipBuffer], time: BlipTime, addr: u16, data: u8) {
        match addr & 0xF800 {
            ADDR_REG => self.addr_reg = data,
            DATA_REG => {
                self.run_until(out, time);
                let addr = self.access();
                self.ram[addr] = data;
            }
            _ => {}
        }
    }

    fn end_frame(&mut self, out: &mut [BlipBuffer], time: BlipTime) {
        self.run_until(out, time);
        self.last_time -= time;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> BlipBuffer {
        let mut buf = BlipBuffer::new();
        buf.set_sample_rate(44_100, 200).unwrap();
        buf.set_clock_rate(1_789_772.727);
        buf
    }

    fn poke(chip: &mut Namco163, out: &mut [BlipBuffer], addr: u8, data: u8) {
        chip.write(out, 0, ADDR_REG, addr);
        chip.write(out, 0, DATA_REG, data);
    }

    #[test]
    fn test_auto_increment() {
        let mut out = [buffer()];
        let mut chip = Namco163::new();
        chip.write(&mut out, 0, ADDR_REG, 0x80 | 0x10);
        for value in 1..=4 {
            chip.write(&mut out, 0, DATA_REG, value);
        }
        assert_eq!(&chip.ram[0x10..0x14], &[1, 2, 3, 4]);

        chip.write(&mut out, 0, ADDR_REG, 0x80 | 0x12);
        assert_eq!(chip.read_data(&mut out, 0), 3);
        assert_eq!(chip.read_data(&mut out, 0), 4);
    }

    #[test]
    fn test_single_voice_produces_wave() {
        let mut out = [buffer()];
        let mut chip = Namco163::new();
        chip.set_output(Some(0));
        // square wave in the first 8 bytes: 16 samples of 15 then 16 of 0
        for i in 0..8u8 {
            poke(&mut chip, &mut out, i, if i < 4 { 0xFF } else { 0x00 });
        }
        // voice 8 at $78, one voice enabled
        poke(&mut chip, &mut out, 0x78, 0x00);
        poke(&mut chip, &mut out, 0x7A, 0x40);
        poke(&mut chip, &mut out, 0x7C, 0xE0 | 0x01);
        poke(&mut chip, &mut out, 0x7E, 0x00);
        poke(&mut chip, &mut out, 0x7F, 0x0F);

        chip.end_frame(&mut out, 29_830);
        out[0].end_frame(29_830);
        let mut samples = vec![0i16; out[0].samples_avail()];
        out[0].read_samples(&mut samples, false);
        let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
        assert!(peak > 200, "{peak}");
    }
}
