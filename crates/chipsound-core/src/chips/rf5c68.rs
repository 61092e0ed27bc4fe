//! Ricoh RF5C68 eight-channel PCM with 64K of sample RAM.
//!
//! Samples are sign/magnitude bytes; `0xFF` marks a loop point. Register
//! writes go to the channel picked by the control register, RAM writes go
//! through a 4K window into the selected bank.

use super::{clamp_sample, StreamChip};

/// Usual master clock.
pub const DEFAULT_CLOCK: u32 = 12_500_000;
/// First port of the 4K sample RAM window.
pub const RAM_WINDOW: u32 = 0x1000;

const CHANNELS: usize = 8;
const RAM_SIZE: usize = 0x10000;
const ADDR_SHIFT: u32 = 11;

#[derive(Debug, Clone, Copy, Default)]
struct Channel {
    enable: bool,
    env: u8,
    pan: u8,
    start: u8,
    addr: u32,
    step: u16,
    loop_start: u16,
}

/// RF5C68 state.
#[derive(Debug, Clone)]
pub struct Rf5c68 {
    clock: u32,
    channels: [Channel; CHANNELS],
    ram: Vec<u8>,
    cbank: usize,
    wbank: usize,
    enable: bool,
    muted: u32,
    mix: Vec<i32>,
}

impl Rf5c68 {
    /// Create a chip at `clock` Hz.
    pub fn new(clock: u32) -> Self {
        let mut chip = Self {
            clock,
            channels: [Channel::default(); CHANNELS],
            ram: vec![0; RAM_SIZE],
            cbank: 0,
            wbank: 0,
            enable: false,
            muted: 0,
            mix: Vec::new(),
        };
        chip.reset();
        chip
    }

    /// Write one register (`0x00..=0x08`).
    pub fn write_register(&mut self, reg: u8, data: u8) {
        let chan = &mut self.channels[self.cbank];
        match reg {
            0x00 => chan.env = data,
            0x01 => chan.pan = data,
            0x02 => chan.step = (chan.step & 0xFF00) | data as u16,
            0x03 => chan.step = (chan.step & 0x00FF) | (data as u16) << 8,
            0x04 => chan.loop_start = (chan.loop_start & 0xFF00) | data as u16,
            0x05 => chan.loop_start = (chan.loop_start & 0x00FF) | (data as u16) << 8,
            0x06 => {
                chan.start = data;
                if !chan.enable {
                    chan.addr = (data as u32) << (8 + ADDR_SHIFT);
                }
            }
            0x07 => {
                self.enable = data & 0x80 != 0;
                if data & 0x40 != 0 {
                    self.cbank = (data & 7) as usize;
                } else {
                    self.wbank = (data & 15) as usize;
                }
            }
            0x08 => {
                for (i, chan) in self.channels.iter_mut().enumerate() {
                    chan.enable = (!data >> i) & 1 != 0;
                    if !chan.enable {
                        chan.addr = (chan.start as u32) << (8 + ADDR_SHIFT);
                    }
                }
            }
            _ => {}
        }
    }

    /// Write through the RAM window at `offset` within the current bank.
    pub fn write_memory(&mut self, offset: u16, data: u8) {
        let addr = self.wbank * 0x1000 | (offset as usize & 0x0FFF);
        self.ram[addr] = data;
    }

    /// Block-load RAM at `start` relative to the current bank.
    pub fn write_ram(&mut self, start: usize, data: &[u8]) {
        let base = self.wbank * 0x1000 | start;
        if base >= RAM_SIZE {
            return;
        }
        let len = data.len().min(RAM_SIZE - base);
        self.ram[base..base + len].copy_from_slice(&data[..len]);
    }

    /// Read sample RAM through the window.
    pub fn read_memory(&self, offset: u16) -> u8 {
        self.ram[self.wbank * 0x1000 | (offset as usize & 0x0FFF)]
    }
}

impl Default for Rf5c68 {
    fn default() -> Self {
        Self::new(DEFAULT_CLOCK)
    }
}

impl StreamChip for Rf5c68 {
    fn sample_rate(&self) -> f64 {
        self.clock as f64 / 384.0
    }

    fn voice_count(&self) -> usize {
        CHANNELS
    }

    fn reset(&mut self) {
        self.ram.fill(0xFF);
        self.channels = [Channel::default(); CHANNELS];
        self.cbank = 0;
        self.wbank = 0;
        self.enable = false;
    }

    /// Ports below [`RAM_WINDOW`] are registers, the next 4K are RAM.
    fn write(&mut self, port: u32, data: u8) {
        match port {
            0x00..=0x08 => self.write_register(port as u8, data),
            0x1000..=0x1FFF => self.write_memory((port - RAM_WINDOW) as u16, data),
            _ => {}
        }
    }

    fn mute_voices(&mut self, mask: u32) {
        self.muted = mask;
    }

    fn render(&mut self, out: &mut [i16]) {
        let frames = out.len() / 2;
        self.mix.clear();
        self.mix.resize(frames * 2, 0);

        if self.enable {
            for (i, chan) in self.channels.iter_mut().enumerate() {
                if !chan.enable {
                    continue;
                }
                let muted = (self.muted >> i) & 1 != 0;
                let lv = (chan.pan & 0x0F) as i32 * chan.env as i32;
                let rv = (chan.pan >> 4) as i32 * chan.env as i32;

                for frame in self.mix.chunks_exact_mut(2) {
                    let mut sample = self.ram[(chan.addr >> ADDR_SHIFT) as usize & 0xFFFF];
                    if sample == 0xFF {
                        chan.addr = (chan.loop_start as u32) << ADDR_SHIFT;
                        sample = self.ram[(chan.addr >> ADDR_SHIFT) as usize & 0xFFFF];
                        // looping onto a loop marker
                        if sample == 0xFF {
                            break;
                        }
                    }
                    chan.addr = chan.addr.wrapping_add(chan.step as u32);

                    if muted {
                        continue;
                    }
                    let magnitude = (sample & 0x7F) as i32;
                    let (l, r) = ((magnitude * lv) >> 5, (magnitude * rv) >> 5);
                    if sample & 0x80 != 0 {
                        frame[0] += l;
                        frame[1] += r;
                    } else {
                        frame[0] -= l;
                        frame[1] -= r;
                    }
                }
            }
        }

        for (o, &m) in out.iter_mut().zip(&self.mix) {
            *o = clamp_sample(m);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(chip: &mut Rf5c68) {
        // bank 0 for writes, samples at 0: +0x40, -0x40, loop marker
        chip.write(0x07, 0x00);
        chip.write_ram(0, &[0xC0, 0x40, 0xFF]);
        // select channel 0 and enable the chip
        chip.write(0x07, 0xC0);
        chip.write(0x00, 0xFF);
        chip.write(0x01, 0x0F);
        chip.write(0x02, 0x00);
        chip.write(0x03, 0x08);
        chip.write(0x04, 0x00);
        chip.write(0x05, 0x00);
        chip.write(0x06, 0x00);
        chip.write(0x08, 0xFE);
    }

    #[test]
    fn test_sign_magnitude_and_loop() {
        let mut chip = Rf5c68::default();
        setup(&mut chip);
        let mut out = [0i16; 2 * 4];
        chip.render(&mut out);
        let level = ((0x40 * 0x0F * 0xFF) >> 5) as i16;
        // right pan nibble is zero
        assert_eq!(out, [level, 0, -level, 0, level, 0, -level, 0]);
    }

    #[test]
    fn test_dead_loop_stops_channel() {
        let mut chip = Rf5c68::default();
        chip.write(0x07, 0xC0);
        chip.write(0x00, 0xFF);
        chip.write(0x01, 0xFF);
        chip.write(0x02, 0x00);
        chip.write(0x03, 0x08);
        chip.write(0x08, 0xFE);
        // reset leaves RAM full of loop markers
        let mut out = [1i16; 8];
        chip.render(&mut out);
        assert_eq!(out, [0; 8]);
    }

    #[test]
    fn test_ram_window_uses_write_bank() {
        let mut chip = Rf5c68::default();
        chip.write(0x07, 0x03);
        chip.write(RAM_WINDOW + 0x10, 0x55);
        assert_eq!(chip.ram[0x3010], 0x55);
        assert_eq!(chip.read_memory(0x10), 0x55);
    }

    #[test]
    fn test_mute_keeps_address() {
        let mut a = Rf5c68::default();
        let mut b = Rf5c68::default();
        setup(&mut a);
        setup(&mut b);
        b.mute_voices(1);
        let mut out = [0i16; 2 * 3];
        a.render(&mut out);
        b.render(&mut out);
        assert_eq!(out, [0; 6]);
        assert_eq!(a.channels[0].addr, b.channels[0].addr);
    }
}
