//! Sega 16-channel 8-bit PCM.
//!
//! Each channel owns eight bytes at `ch * 8` (volume, address, end) and
//! eight at `0x80 + ch * 8` (loop address, flags, bank). Samples come from
//! banked ROM loaded with [`SegaPcm::write_rom`].

use super::{clamp_sample, StreamChip};

/// Usual master clock.
pub const DEFAULT_CLOCK: u32 = 4_000_000;
/// Bank shift of 11 bits, the default for most boards.
pub const BANK_256: u32 = 11;
/// Bank shift of 12 bits.
pub const BANK_512: u32 = 12;
/// Bank shift of 13 bits.
pub const BANK_12M: u32 = 13;
/// Seven bank select bits.
pub const BANK_MASK7: u32 = 0x70 << 16;
/// Fifteen bank select bits.
pub const BANK_MASKF: u32 = 0xF0 << 16;

const CHANNELS: usize = 16;
const RAM_SIZE: usize = 0x800;
const DEFAULT_ROM_SIZE: usize = 0x80000;

/// SegaPCM state.
#[derive(Debug, Clone)]
pub struct SegaPcm {
    clock: u32,
    ram: Vec<u8>,
    low: [u8; CHANNELS],
    rom: Vec<u8>,
    bank: u32,
    bank_shift: u32,
    bank_mask: usize,
    rgn_mask: usize,
    muted: u32,
    mix: Vec<i32>,
}

impl SegaPcm {
    /// Create a chip with `bank` configuration (shift in the low byte, select
    /// mask in bits 16..24; zero mask means [`BANK_MASK7`]).
    pub fn new(clock: u32, bank: u32) -> Self {
        let mut chip = Self {
            clock,
            ram: vec![0xFF; RAM_SIZE],
            low: [0; CHANNELS],
            rom: Vec::new(),
            bank,
            bank_shift: bank & 0xFF,
            bank_mask: 0,
            rgn_mask: 0,
            muted: 0,
            mix: Vec::new(),
        };
        chip.resize_rom(DEFAULT_ROM_SIZE);
        chip
    }

    fn resize_rom(&mut self, size: usize) {
        self.rom = vec![0xFF; size];
        self.rgn_mask = size.next_power_of_two() - 1;
        let mut mask = (self.bank >> 16) as usize;
        if mask == 0 {
            mask = (BANK_MASK7 >> 16) as usize;
        }
        self.bank_mask = mask & (self.rgn_mask >> self.bank_shift);
    }

    /// Load `data` at `start` into a ROM of `rom_size` bytes, reallocating
    /// when the size changes.
    pub fn write_rom(&mut self, rom_size: usize, start: usize, data: &[u8]) {
        if rom_size != self.rom.len() {
            self.resize_rom(rom_size);
        }
        if start > self.rom.len() {
            return;
        }
        let len = data.len().min(self.rom.len() - start);
        self.rom[start..start + len].copy_from_slice(&data[..len]);
    }

    /// Read channel RAM.
    pub fn read(&self, offset: u32) -> u8 {
        self.ram[offset as usize & (RAM_SIZE - 1)]
    }
}

impl Default for SegaPcm {
    fn default() -> Self {
        Self::new(DEFAULT_CLOCK, BANK_256)
    }
}

impl StreamChip for SegaPcm {
    fn sample_rate(&self) -> f64 {
        self.clock as f64 / 128.0
    }

    fn voice_count(&self) -> usize {
        CHANNELS
    }

    fn reset(&mut self) {
        self.ram.fill(0xFF);
        self.low = [0; CHANNELS];
    }

    /// `port` is the channel RAM offset.
    fn write(&mut self, port: u32, data: u8) {
        self.ram[port as usize & (RAM_SIZE - 1)] = data;
    }

    fn mute_voices(&mut self, mask: u32) {
        self.muted = mask;
    }

    fn render(&mut self, out: &mut [i16]) {
        let frames = out.len() / 2;
        self.mix.clear();
        self.mix.resize(frames * 2, 0);

        for ch in 0..CHANNELS {
            let base = ch * 8;
            let mut flags = self.ram[base + 0x86];
            if flags & 1 != 0 {
                continue;
            }
            let muted = (self.muted >> ch) & 1 != 0;
            let bank = ((flags as usize) & self.bank_mask) << self.bank_shift;
            let mut addr = (self.ram[base + 5] as u32) << 16
                | (self.ram[base + 4] as u32) << 8
                | self.low[ch] as u32;
            let loop_addr = (self.ram[base + 0x85] as u32) << 8 | self.ram[base + 0x84] as u32;
            let end = self.ram[base + 6].wrapping_add(1) as u32;
            let delta = self.ram[base + 7] as u32;
            let vol_l = self.ram[base + 2] as i32;
            let vol_r = self.ram[base + 3] as i32;

            for frame in self.mix.chunks_exact_mut(2) {
                if (addr >> 16) & 0xFF == end {
                    if flags & 2 == 0 {
                        addr = loop_addr << 8;
                    } else {
                        flags |= 1;
                        break;
                    }
                }
                let index = (bank + (addr >> 8) as usize) & self.rgn_mask;
                let v = self.rom.get(index).copied().unwrap_or(0x80) as i32 - 0x80;
                if !muted {
                    frame[0] += v * vol_l;
                    frame[1] += v * vol_r;
                }
                addr = addr.wrapping_add(delta) & 0xFF_FFFF;
            }

            self.ram[base + 0x86] = flags;
            self.ram[base + 4] = (addr >> 8) as u8;
            self.ram[base + 5] = (addr >> 16) as u8;
            self.low[ch] = if flags & 1 != 0 { 0 } else { addr as u8 };
        }

        for (o, &m) in out.iter_mut().zip(&self.mix) {
            *o = clamp_sample(m);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start_channel(chip: &mut SegaPcm, ch: u32, end: u8, flags: u8) {
        let base = ch * 8;
        chip.write(base + 2, 0x40);
        chip.write(base + 3, 0x00);
        chip.write(base + 4, 0x00);
        chip.write(base + 5, 0x00);
        chip.write(base + 6, end);
        chip.write(base + 7, 0x80);
        chip.write(base + 0x84, 0x00);
        chip.write(base + 0x85, 0x00);
        chip.write(base + 0x86, flags);
    }

    #[test]
    fn test_one_shot_stops_at_end() {
        let mut chip = SegaPcm::default();
        chip.write_rom(0x80000, 0, &[0xC0; 0x100]);
        start_channel(&mut chip, 0, 0x00, 0x02);

        // end page 1 is reached after 0x10000 / 0x80 = 512 samples
        let mut out = vec![0i16; 2 * 600];
        chip.render(&mut out);
        assert_eq!(out[0], 0x40 * 0x40);
        assert_eq!(out[1], 0);
        assert_eq!(out[2 * 520], 0);
        assert_eq!(chip.read(0x86) & 1, 1);
    }

    #[test]
    fn test_muted_channel_keeps_position() {
        let run = |mask: u32| {
            let mut chip = SegaPcm::default();
            chip.mute_voices(mask);
            start_channel(&mut chip, 3, 0x10, 0x00);
            let mut out = vec![0i16; 2 * 100];
            chip.render(&mut out);
            (chip.read(3 * 8 + 4), chip.read(3 * 8 + 5), out.iter().any(|&s| s != 0))
        };
        let (lo, hi, _) = run(0);
        assert_eq!(run(1 << 3), (lo, hi, false));
    }
}
