//! OKI MSM6258 4-bit ADPCM voice.
//!
//! The host streams bytes to the data port; each byte holds two nibbles,
//! low first. Output is mono, gated per side by the pan register.

use std::sync::OnceLock;

use super::{clamp_sample, StreamChip};

/// Usual master clock.
pub const DEFAULT_CLOCK: u32 = 4_000_000;

/// Command port (stop, play, record).
pub const PORT_CONTROL: u32 = 0x00;
/// ADPCM data port.
pub const PORT_DATA: u32 = 0x01;
/// Pan port, bit 1 silences left and bit 0 silences right.
pub const PORT_PAN: u32 = 0x02;
/// Master clock bytes, least significant first. The last byte applies it.
pub const PORT_CLOCK: [u32; 4] = [0x08, 0x09, 0x0A, 0x0B];
/// Divider select.
pub const PORT_DIVIDER: u32 = 0x0C;

const COMMAND_STOP: u8 = 1 << 0;
const COMMAND_PLAY: u8 = 1 << 1;
const COMMAND_RECORD: u8 = 1 << 2;
const STATUS_PLAYING: u8 = 1 << 1;
const STATUS_RECORDING: u8 = 1 << 2;

const DIVIDERS: [u32; 4] = [1024, 768, 512, 512];
const INDEX_SHIFT: [i32; 8] = [-1, -1, -1, -1, 2, 4, 6, 8];
const STEPS: usize = 49;

fn diff_lookup() -> &'static [i32; STEPS * 16] {
    static TABLE: OnceLock<[i32; STEPS * 16]> = OnceLock::new();
    TABLE.get_or_init(|| {
        const NBL2BIT: [[i32; 4]; 16] = [
            [1, 0, 0, 0],
            [1, 0, 0, 1],
            [1, 0, 1, 0],
            [1, 0, 1, 1],
            [1, 1, 0, 0],
            [1, 1, 0, 1],
            [1, 1, 1, 0],
            [1, 1, 1, 1],
            [-1, 0, 0, 0],
            [-1, 0, 0, 1],
            [-1, 0, 1, 0],
            [-1, 0, 1, 1],
            [-1, 1, 0, 0],
            [-1, 1, 0, 1],
            [-1, 1, 1, 0],
            [-1, 1, 1, 1],
        ];
        let mut table = [0; STEPS * 16];
        for step in 0..STEPS {
            let stepval = (16.0 * 1.1f64.powi(step as i32)).floor() as i32;
            for (nib, bits) in NBL2BIT.iter().enumerate() {
                table[step * 16 + nib] = bits[0]
                    * (stepval * bits[1] + stepval / 2 * bits[2] + stepval / 4 * bits[3] + stepval / 8);
            }
        }
        table
    })
}

/// MSM6258 state.
#[derive(Debug, Clone)]
pub struct Okim6258 {
    master_clock: u32,
    initial_clock: u32,
    clock_buffer: [u8; 4],
    divider: usize,
    initial_divider: usize,
    output_bits: u32,
    status: u8,
    pan: u8,
    signal: i32,
    step: i32,
    data_in: u8,
    nibble_shift: u8,
    data_buf: [u8; 2],
    data_buf_pos: u8,
    data_empty: u8,
    last_sample: i16,
    muted: bool,
}

impl Okim6258 {
    /// Create a chip. `divider` indexes the 1024/768/512 divider table;
    /// `output_12bit` selects 12-bit instead of 10-bit converter output.
    pub fn new(clock: u32, divider: usize, output_12bit: bool) -> Self {
        let divider = divider & 3;
        let mut chip = Self {
            master_clock: clock,
            initial_clock: clock,
            clock_buffer: clock.to_le_bytes(),
            divider,
            initial_divider: divider,
            output_bits: if output_12bit { 12 } else { 10 },
            status: 0,
            pan: 0,
            signal: 0,
            step: 0,
            data_in: 0,
            nibble_shift: 0,
            data_buf: [0; 2],
            data_buf_pos: 0,
            data_empty: 0,
            last_sample: 0,
            muted: false,
        };
        chip.reset();
        chip
    }

    /// Current status bits.
    pub fn status(&self) -> u8 {
        self.status
    }

    fn clock_adpcm(&mut self, nibble: u8) -> i16 {
        let max = (1 << (self.output_bits - 1)) - 1;
        let min = -(1 << (self.output_bits - 1));

        self.signal += diff_lookup()[(self.step * 16 + (nibble & 15) as i32) as usize];
        self.signal = self.signal.clamp(min, max);
        self.step = (self.step + INDEX_SHIFT[(nibble & 7) as usize]).clamp(0, STEPS as i32 - 1);
        (self.signal << 4) as i16
    }

    fn write_control(&mut self, data: u8) {
        if data & COMMAND_STOP != 0 {
            self.status &= !(STATUS_PLAYING | STATUS_RECORDING);
            return;
        }
        if data & COMMAND_PLAY != 0 {
            self.status |= STATUS_PLAYING;
            self.step = 0;
            self.nibble_shift = 0;
        } else {
            self.status &= !STATUS_PLAYING;
        }
        if data & COMMAND_RECORD != 0 {
            self.status |= STATUS_RECORDING;
        } else {
            self.status &= !STATUS_RECORDING;
        }
    }

    fn write_data(&mut self, data: u8) {
        if self.data_empty >= 2 {
            self.data_buf_pos = 0;
            self.data_buf[0] = 0x80;
        }
        self.data_buf[(self.data_buf_pos & 0x0F) as usize & 1] = data;
        self.data_buf_pos ^= 1;
        self.data_empty = 0;
    }
}

impl Default for Okim6258 {
    fn default() -> Self {
        Self::new(DEFAULT_CLOCK, 0, false)
    }
}

impl StreamChip for Okim6258 {
    fn sample_rate(&self) -> f64 {
        self.master_clock as f64 / DIVIDERS[self.divider] as f64
    }

    fn voice_count(&self) -> usize {
        1
    }

    fn reset(&mut self) {
        self.master_clock = self.initial_clock;
        self.clock_buffer = self.initial_clock.to_le_bytes();
        self.divider = self.initial_divider;
        self.signal = -2;
        self.step = 0;
        self.status = 0;
        self.data_in = 0;
        self.nibble_shift = 0;
        self.data_buf = [0; 2];
        self.data_buf_pos = 0;
        self.data_empty = 0xFF;
        self.pan = 0;
        self.last_sample = 0;
    }

    fn write(&mut self, port: u32, data: u8) {
        match port {
            PORT_CONTROL => self.write_control(data),
            PORT_DATA => self.write_data(data),
            PORT_PAN => self.pan = data,
            0x08..=0x0A => self.clock_buffer[(port - 0x08) as usize] = data,
            0x0B => {
                self.clock_buffer[3] = data;
                self.master_clock = u32::from_le_bytes(self.clock_buffer);
            }
            PORT_DIVIDER => self.divider = (data & 3) as usize,
            _ => {}
        }
    }

    fn mute_voices(&mut self, mask: u32) {
        self.muted = mask & 1 != 0;
    }

    fn render(&mut self, out: &mut [i16]) {
        for frame in out.chunks_exact_mut(2) {
            let sample = if self.status & STATUS_PLAYING != 0 {
                let nibble_shift = self.nibble_shift;
                if nibble_shift == 0 {
                    if self.data_empty == 0 {
                        // high nibble of the position reads, low nibble writes
                        self.data_in = self.data_buf[(self.data_buf_pos >> 4) as usize & 1];
                        self.data_buf_pos ^= 0x10;
                        if self.data_buf_pos >> 4 == self.data_buf_pos & 0x0F {
                            self.data_empty += 1;
                        }
                    } else {
                        self.data_in = 0x80;
                        if self.data_empty < 0x80 {
                            self.data_empty += 1;
                        }
                    }
                }

                let nibble = (self.data_in >> nibble_shift) & 0x0F;
                if self.data_empty < 2 {
                    self.last_sample = self.clock_adpcm(nibble);
                } else if self.data_empty >= 0x12 {
                    // starved: the held sample stays, the predictor decays
                    self.data_empty -= 0x10;
                    if self.signal < 0 {
                        self.signal += 1;
                    } else if self.signal > 0 {
                        self.signal -= 1;
                    }
                }
                self.nibble_shift ^= 4;
                self.last_sample
            } else {
                0
            };

            if self.muted {
                frame[0] = 0;
                frame[1] = 0;
            } else {
                frame[0] = if self.pan & 0x02 != 0 { 0 } else { clamp_sample(sample as i32) };
                frame[1] = if self.pan & 0x01 != 0 { 0 } else { clamp_sample(sample as i32) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_table_symmetry() {
        let table = diff_lookup();
        for step in 0..STEPS {
            for nib in 0..8 {
                assert_eq!(table[step * 16 + nib], -table[step * 16 + nib + 8]);
            }
        }
        assert_eq!(table[0], 2);
    }

    #[test]
    fn test_clock_bytes_change_rate() {
        let mut chip = Okim6258::default();
        assert_eq!(chip.sample_rate(), 4_000_000.0 / 1024.0);
        for (port, byte) in PORT_CLOCK.iter().zip(8_000_000u32.to_le_bytes()) {
            chip.write(*port, byte);
        }
        chip.write(PORT_DIVIDER, 2);
        assert_eq!(chip.sample_rate(), 8_000_000.0 / 512.0);
        chip.reset();
        assert_eq!(chip.sample_rate(), 4_000_000.0 / 1024.0);
    }

    #[test]
    fn test_positive_nibbles_raise_output() {
        let mut chip = Okim6258::default();
        chip.write(PORT_CONTROL, COMMAND_PLAY);
        let mut out = vec![0i16; 2 * 8];
        for chunk in out.chunks_mut(4) {
            chip.write(PORT_DATA, 0x77);
            chip.render(chunk);
        }
        assert!(out[14] > out[2], "{out:?}");
        assert_eq!(out[14], out[15]);
    }

    #[test]
    fn test_pan_and_stop() {
        let mut chip = Okim6258::default();
        chip.write(PORT_CONTROL, COMMAND_PLAY);
        chip.write(PORT_PAN, 0x02);
        chip.write(PORT_DATA, 0x77);
        let mut out = [0i16; 4];
        chip.render(&mut out);
        assert_eq!(out[0], 0);
        assert!(out[1] > 0);

        chip.write(PORT_CONTROL, COMMAND_STOP);
        chip.render(&mut out);
        assert_eq!(out, [0; 4]);
        assert_eq!(chip.status() & STATUS_PLAYING, 0);
    }
}
