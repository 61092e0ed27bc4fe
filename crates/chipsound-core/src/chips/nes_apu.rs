//! Ricoh 2A03 APU: two pulse voices, triangle, noise and delta modulation.
//!
//! Register writes are addressed `$4000..=$4017`; anything else is ignored.
//! The DMC fetches its sample bytes from a 32 KiB window mirroring CPU
//! space `$8000..=$FFFF`. Keep it current with [`NesApu::dmc_memory_mut`]
//! after bringing the APU up to the bank switch time with
//! [`NesApu::run_until`].

use super::nes_oscs::{Dmc, Noise, OscBase, Square, Triangle, DMC_LOOP_FLAG, DMC_PERIODS};
use super::{SoundChip, VoiceOutput};
use crate::blip_buffer::{BlipBuffer, BlipEq, BlipSynth, BlipTime, QUALITY_GOOD, QUALITY_MEDIUM};

/// Time value meaning no interrupt is scheduled.
pub const NO_IRQ: BlipTime = i32::MAX / 2 + 1;

/// First APU register.
pub const IO_ADDR: u16 = 0x4000;
/// Number of APU registers.
pub const IO_SIZE: u16 = 0x18;
/// Status register, readable through [`NesApu::read_status`].
pub const STATUS_ADDR: u16 = 0x4015;

/// NTSC CPU clock in Hz.
pub const CLOCK_NTSC: f64 = 1_789_772.727;
/// PAL CPU clock in Hz.
pub const CLOCK_PAL: f64 = 1_662_607.125;

const VOICE_NAMES: [&str; 5] = ["Square 1", "Square 2", "Triangle", "Noise", "DMC"];
const AMP_RANGE: f64 = 15.0;
const DMC_WINDOW: usize = 0x8000;

const LENGTH_TABLE: [u8; 0x20] = [
    0x0A, 0xFE, 0x14, 0x02, 0x28, 0x04, 0x50, 0x06, 0xA0, 0x08, 0x3C, 0x0A, 0x0E, 0x0C, 0x1A, 0x0E,
    0x0C, 0x10, 0x18, 0x12, 0x30, 0x14, 0x60, 0x16, 0xC0, 0x18, 0x48, 0x1A, 0x10, 0x1C, 0x20, 0x1E,
];

// DAC response of the delta modulation channel
const DMC_TABLE: [i32; 128] = [
    0, 24, 48, 71, 94, 118, 141, 163, 186, 209, 231, 253, 275, 297, 319, 340, 361, 383, 404, 425,
    445, 466, 486, 507, 527, 547, 567, 587, 606, 626, 645, 664, 683, 702, 721, 740, 758, 777, 795,
    813, 832, 850, 867, 885, 903, 920, 938, 955, 972, 989, 1006, 1023, 1040, 1056, 1073, 1089,
    1105, 1122, 1138, 1154, 1170, 1185, 1201, 1217, 1232, 1248, 1263, 1278, 1293, 1308, 1323,
    1338, 1353, 1368, 1382, 1397, 1411, 1425, 1440, 1454, 1468, 1482, 1496, 1510, 1523, 1537,
    1551, 1564, 1578, 1591, 1604, 1618, 1631, 1644, 1657, 1670, 1683, 1695, 1708, 1721, 1733,
    1746, 1758, 1771, 1783, 1795, 1807, 1819, 1831, 1843, 1855, 1867, 1879, 1890, 1902, 1914,
    1925, 1937, 1948, 1959, 1971, 1982, 1993, 2004, 2015, 2026, 2037, 2048,
];

/// The 2A03 sound hardware.
#[derive(Debug, Clone)]
pub struct NesApu {
    square1: Square,
    square2: Square,
    triangle: Triangle,
    noise: Noise,
    dmc: Dmc,

    square_synth: BlipSynth,
    triangle_synth: BlipSynth,
    noise_synth: BlipSynth,
    dmc_synth: BlipSynth,

    dmc_memory: Vec<u8>,

    tempo: f64,
    last_time: BlipTime,
    last_dmc_time: BlipTime,
    earliest_irq: BlipTime,
    next_irq: BlipTime,
    frame_period: i32,
    frame_delay: i32,
    frame: i32,
    frame_mode: u8,
    osc_enables: u8,
    irq_flag: bool,
}

impl NesApu {
    /// Create an NTSC APU at nominal volume, routed nowhere.
    pub fn new() -> Self {
        let mut apu = Self {
            square1: Square::default(),
            square2: Square::default(),
            triangle: Triangle::default(),
            noise: Noise::default(),
            dmc: Dmc::default(),
            square_synth: BlipSynth::new(QUALITY_GOOD, 15),
            triangle_synth: BlipSynth::new(QUALITY_MEDIUM, 15),
            noise_synth: BlipSynth::new(QUALITY_MEDIUM, 15),
            dmc_synth: BlipSynth::new(QUALITY_MEDIUM, 2048),
            dmc_memory: vec![0; DMC_WINDOW],
            tempo: 1.0,
            last_time: 0,
            last_dmc_time: 0,
            earliest_irq: NO_IRQ,
            next_irq: NO_IRQ,
            frame_period: 7458,
            frame_delay: 1,
            frame: 0,
            frame_mode: 0,
            osc_enables: 0,
            irq_flag: false,
        };
        apu.set_volume(1.0);
        apu.reset_mode(false, 0);
        apu
    }

    /// Reset to power-up state in NTSC or PAL timing, with the DMC DAC
    /// preset to `initial_dmc_dac` so no click is produced.
    pub fn reset_mode(&mut self, pal_mode: bool, initial_dmc_dac: u8) {
        self.dmc.pal_mode = pal_mode;
        self.set_tempo(self.tempo);

        self.square1.reset();
        self.square2.reset();
        self.triangle.reset();
        self.noise.reset();
        self.dmc.reset();

        self.last_time = 0;
        self.last_dmc_time = 0;
        self.osc_enables = 0;
        self.irq_flag = false;
        self.earliest_irq = NO_IRQ;
        self.frame_delay = 1;

        // nothing is run at time zero, so no buffers are touched
        self.write_register(&mut [], 0, 0x4017, 0x00);
        self.write_register(&mut [], 0, 0x4015, 0x00);
        for addr in IO_ADDR..=0x4013 {
            let data = if addr & 3 != 0 { 0x00 } else { 0x10 };
            self.write_register(&mut [], 0, addr, data);
        }

        let dac = initial_dmc_dac & 0x7F;
        self.dmc.dac = dac as i32;
        self.dmc.osc.last_amp = DMC_TABLE[dac as usize];
        self.triangle.osc.last_amp = 15;
    }

    /// Whether PAL timing is in effect.
    pub fn is_pal(&self) -> bool {
        self.dmc.pal_mode
    }

    /// Scale the frame sequencer rate. 1.0 is normal speed.
    pub fn set_tempo(&mut self, tempo: f64) {
        self.tempo = tempo;
        self.frame_period = if self.dmc.pal_mode { 8314 } else { 7458 };
        if tempo != 1.0 {
            self.frame_period = (self.frame_period as f64 / tempo) as i32 & !1;
        }
    }

    /// The DMC's view of CPU memory `$8000..=$FFFF`.
    pub fn dmc_memory_mut(&mut self) -> &mut [u8] {
        &mut self.dmc_memory
    }

    /// Copy `data` into the DMC window at CPU address `addr`.
    pub fn map_dmc_memory(&mut self, addr: u16, data: &[u8]) {
        if addr < 0x8000 {
            return;
        }
        let start = (addr - 0x8000) as usize;
        let end = (start + data.len()).min(DMC_WINDOW);
        self.dmc_memory[start..end].copy_from_slice(&data[..end - start]);
    }

    /// Earliest time an IRQ is pending, 0 if one is asserted now, or [`NO_IRQ`].
    pub fn earliest_irq(&self) -> BlipTime {
        self.earliest_irq
    }

    /// Read `$4015` at `time`. Acknowledges the frame IRQ.
    pub fn read_status(&mut self, out: &mut [BlipBuffer], time: BlipTime) -> u8 {
        self.run_until(out, time - 1);

        let mut result = ((self.dmc.irq_flag as u8) << 7) | ((self.irq_flag as u8) << 6);
        for i in 0..VOICE_NAMES.len() {
            if self.osc(i).length_counter != 0 {
                result |= 1 << i;
            }
        }

        self.run_until(out, time);

        if self.irq_flag {
            result |= 0x40;
            self.irq_flag = false;
            self.irq_changed();
        }
        result
    }

    /// Run all voices and the frame sequencer up to `end_time`.
    pub fn run_until(&mut self, out: &mut [BlipBuffer], end_time: BlipTime) {
        if end_time <= self.last_time {
            return;
        }

        if self.last_dmc_time < end_time {
            let start = self.last_dmc_time;
            self.last_dmc_time = end_time;
            self.run_dmc(out, start, end_time);
        }

        loop {
            let time = (self.last_time + self.frame_delay).min(end_time);
            self.frame_delay -= time - self.last_time;

            let start = self.last_time;
            self.square1.run(&self.square_synth, out, start, time);
            self.square2.run(&self.square_synth, out, start, time);
            self.triangle.run(&self.triangle_synth, out, start, time);
            self.noise.run(&self.noise_synth, out, start, time);
            self.last_time = time;

            if time == end_time {
                break;
            }
            self.clock_frame(time);
        }
    }

    fn clock_frame(&mut self, time: BlipTime) {
        self.frame_delay = self.frame_period;
        let frame = self.frame;
        self.frame += 1;
        match frame {
            0 | 2 => {
                if frame == 0 && self.frame_mode & 0xC0 == 0 {
                    self.next_irq = time + self.frame_period * 4 + 2;
                    self.irq_flag = true;
                }
                self.square1.env.osc.clock_length(0x20);
                self.square2.env.osc.clock_length(0x20);
                self.noise.env.osc.clock_length(0x20);
                // triangle halt flag is a different bit
                self.triangle.osc.clock_length(0x80);

                self.square1.clock_sweep(-1);
                self.square2.clock_sweep(0);

                if self.dmc.pal_mode && self.frame == 3 {
                    self.frame_delay -= 2;
                }
            }
            1 => {
                if !self.dmc.pal_mode {
                    self.frame_delay -= 2;
                }
            }
            _ => {
                self.frame = 0;
                // five step mode stretches the last step
                if self.frame_mode & 0x80 != 0 {
                    self.frame_delay += self.frame_period - if self.dmc.pal_mode { 2 } else { 6 };
                }
            }
        }

        self.triangle.clock_linear_counter();
        self.square1.env.clock_envelope();
        self.square2.env.clock_envelope();
        self.noise.env.clock_envelope();
    }

    fn write_register(&mut self, out: &mut [BlipBuffer], time: BlipTime, addr: u16, data: u8) {
        if addr.wrapping_sub(IO_ADDR) >= IO_SIZE {
            return;
        }
        self.run_until(out, time);

        if addr < 0x4014 {
            let index = ((addr - IO_ADDR) >> 2) as usize;
            let reg = (addr & 3) as usize;
            let enabled = (self.osc_enables >> index) & 1 != 0;
            let osc = self.osc_mut(index);
            osc.regs[reg] = data;
            osc.reg_written[reg] = true;

            if index == 4 {
                self.write_dmc(reg, data);
            } else if reg == 3 {
                if enabled {
                    self.osc_mut(index).length_counter = LENGTH_TABLE[(data >> 3) as usize & 0x1F] as i32;
                }
                match index {
                    0 => self.square1.reset_phase(),
                    1 => self.square2.reset_phase(),
                    _ => {}
                }
            }
        } else if addr == STATUS_ADDR {
            for i in 0..VOICE_NAMES.len() {
                if (data >> i) & 1 == 0 {
                    self.osc_mut(i).length_counter = 0;
                }
            }

            let mut recalc_irq = self.dmc.irq_flag;
            self.dmc.irq_flag = false;

            let old_enables = self.osc_enables;
            self.osc_enables = data;
            if data & 0x10 == 0 {
                self.dmc.next_irq = NO_IRQ;
                recalc_irq = true;
            } else if old_enables & 0x10 == 0 {
                self.start_dmc();
            }

            if recalc_irq {
                self.irq_changed();
            }
        } else if addr == 0x4017 {
            self.frame_mode = data;
            let irq_enabled = data & 0x40 == 0;
            self.irq_flag &= irq_enabled;
            self.next_irq = NO_IRQ;

            self.frame_delay &= 1;
            self.frame = 0;
            if data & 0x80 == 0 {
                self.frame = 1;
                self.frame_delay += self.frame_period;
                if irq_enabled {
                    self.next_irq = time + self.frame_delay + self.frame_period * 3 + 1;
                }
            }
            self.irq_changed();
        }
    }

    fn osc(&self, index: usize) -> &OscBase {
        match index {
            0 => &self.square1.env.osc,
            1 => &self.square2.env.osc,
            2 => &self.triangle.osc,
            3 => &self.noise.env.osc,
            _ => &self.dmc.osc,
        }
    }

    fn osc_mut(&mut self, index: usize) -> &mut OscBase {
        match index {
            0 => &mut self.square1.env.osc,
            1 => &mut self.square2.env.osc,
            2 => &mut self.triangle.osc,
            3 => &mut self.noise.env.osc,
            _ => &mut self.dmc.osc,
        }
    }

    fn irq_changed(&mut self) {
        let new_irq = if self.dmc.irq_flag || self.irq_flag {
            0
        } else {
            self.dmc.next_irq.min(self.next_irq)
        };
        self.earliest_irq = new_irq;
    }

    // ========================================================================
    // DMC
    // ========================================================================

    fn write_dmc(&mut self, reg: usize, data: u8) {
        match reg {
            0 => {
                self.dmc.period = DMC_PERIODS[self.dmc.pal_mode as usize][(data & 15) as usize];
                // IRQ only fires with looping off
                self.dmc.irq_enabled = data & 0xC0 == 0x80;
                self.dmc.irq_flag &= self.dmc.irq_enabled;
                self.recalc_dmc_irq();
            }
            1 => self.dmc.dac = (data & 0x7F) as i32,
            _ => {}
        }
    }

    fn start_dmc(&mut self) {
        self.dmc.reload_sample();
        self.fill_dmc_buffer();
        self.recalc_dmc_irq();
    }

    fn recalc_dmc_irq(&mut self) {
        let dmc = &self.dmc;
        let irq = if dmc.irq_enabled && dmc.osc.length_counter != 0 {
            self.last_dmc_time
                + dmc.osc.delay
                + ((dmc.osc.length_counter - 1) * 8 + dmc.bits_remain - 1) * dmc.period
                + 1
        } else {
            NO_IRQ
        };
        if irq != self.dmc.next_irq {
            self.dmc.next_irq = irq;
            self.irq_changed();
        }
    }

    fn fill_dmc_buffer(&mut self) {
        if self.dmc.buf_full || self.dmc.osc.length_counter == 0 {
            return;
        }
        self.dmc.buf = self.dmc_memory[self.dmc.address as usize & 0x7FFF];
        self.dmc.address = (self.dmc.address + 1) & 0x7FFF;
        self.dmc.buf_full = true;

        self.dmc.osc.length_counter -= 1;
        if self.dmc.osc.length_counter == 0 {
            if self.dmc.osc.regs[0] & DMC_LOOP_FLAG != 0 {
                self.dmc.reload_sample();
            } else {
                self.osc_enables &= !0x10;
                self.dmc.irq_flag = self.dmc.irq_enabled;
                self.dmc.next_irq = NO_IRQ;
                self.irq_changed();
            }
        }
    }

    /// Next time the DMC fetches a byte, or [`NO_IRQ`] when idle.
    pub fn next_dmc_read_time(&self) -> BlipTime {
        self.dmc.next_read_time(self.last_dmc_time)
    }

    fn emit_dmc(&mut self, out: &mut [BlipBuffer], time: BlipTime) {
        match self.dmc.osc.output.target() {
            Some(index) => {
                let delta = self.dmc.update_amp(DMC_TABLE[self.dmc.dac as usize]);
                if delta != 0 {
                    self.dmc_synth.offset(time, delta, &mut out[index]);
                }
            }
            None => self.dmc.osc.last_amp = 0,
        }
    }

    fn run_dmc(&mut self, out: &mut [BlipBuffer], mut time: BlipTime, end_time: BlipTime) {
        self.emit_dmc(out, time);

        time += self.dmc.osc.delay;
        if time < end_time {
            let period = self.dmc.period;
            if self.dmc.silence && !self.dmc.buf_full {
                let count = (end_time - time + period - 1) / period;
                self.dmc.bits_remain = (self.dmc.bits_remain - 1 + 8 - count % 8) % 8 + 1;
                time += count * period;
            } else {
                loop {
                    if !self.dmc.silence {
                        let step = (self.dmc.bits & 1) * 4 - 2;
                        self.dmc.bits >>= 1;
                        let dac = self.dmc.dac + step;
                        if (0..=0x7F).contains(&dac) {
                            self.dmc.dac = dac;
                            self.emit_dmc(out, time);
                        }
                    }

                    time += period;

                    self.dmc.bits_remain -= 1;
                    if self.dmc.bits_remain == 0 {
                        self.dmc.bits_remain = 8;
                        if self.dmc.buf_full {
                            self.dmc.silence = false;
                            self.dmc.bits = self.dmc.buf as i32;
                            self.dmc.buf_full = false;
                            self.fill_dmc_buffer();
                        } else {
                            self.dmc.silence = true;
                        }
                    }

                    if time >= end_time {
                        break;
                    }
                }
            }
        }
        self.dmc.osc.delay = time - end_time;
    }
}

impl Default for NesApu {
    fn default() -> Self {
        Self::new()
    }
}

impl SoundChip for NesApu {
    fn voice_count(&self) -> usize {
        VOICE_NAMES.len()
    }

    fn voice_names(&self) -> &'static [&'static str] {
        &VOICE_NAMES
    }

    fn reset(&mut self) {
        self.reset_mode(self.dmc.pal_mode, 0);
    }

    fn set_voice_output(&mut self, voice: usize, output: Option<usize>) {
        if voice < VOICE_NAMES.len() {
            self.osc_mut(voice).output.buffer = output;
        }
    }

    fn mute_voices(&mut self, mask: u32) {
        for i in 0..VOICE_NAMES.len() {
            let output: &mut VoiceOutput = &mut self.osc_mut(i).output;
            output.muted = (mask >> i) & 1 != 0;
        }
    }

    fn set_volume(&mut self, volume: f64) {
        let v = volume / 1.11;
        self.square_synth.set_volume_unit(0.125 / AMP_RANGE * v);
        self.triangle_synth.set_volume_unit(0.150 / AMP_RANGE * v);
        self.noise_synth.set_volume_unit(0.095 / AMP_RANGE * v);
        self.dmc_synth.set_volume_unit(0.450 / 2048.0 * v);
    }

    fn set_treble_eq(&mut self, eq: BlipEq) {
        self.square_synth.set_treble_eq(eq);
        self.triangle_synth.set_treble_eq(eq);
        self.noise_synth.set_treble_eq(eq);
        self.dmc_synth.set_treble_eq(eq);
    }

    fn write(&mut self, out: &mut [BlipBuffer], time: BlipTime, addr: u16, data: u8) {
        self.write_register(out, time, addr, data);
    }

    fn end_frame(&mut self, out: &mut [BlipBuffer], time: BlipTime) {
        if time > self.last_time {
            self.run_until(out, time);
        }

        self.last_time -= time;
        self.last_dmc_time -= time;
        if self.next_irq != NO_IRQ {
            self.next_irq -= time;
        }
        if self.dmc.next_irq != NO_IRQ {
            self.dmc.next_irq -= time;
        }
        if self.earliest_irq != NO_IRQ {
            self.earliest_irq = (self.earliest_irq - time).max(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: BlipTime = 29_830;

    fn buffer() -> BlipBuffer {
        let mut buf = BlipBuffer::new();
        buf.set_sample_rate(44_100, 1000).unwrap();
        buf.set_clock_rate(CLOCK_NTSC);
        buf
    }

    fn play_square(apu: &mut NesApu, out: &mut [BlipBuffer], period: u16) {
        apu.write(out, 0, 0x4015, 0x01);
        // 50% duty, constant volume 15, length halted
        apu.write(out, 0, 0x4000, 0xBF);
        apu.write(out, 0, 0x4001, 0x08);
        apu.write(out, 0, 0x4002, (period & 0xFF) as u8);
        apu.write(out, 0, 0x4003, (period >> 8) as u8);
    }

    #[test]
    fn test_square_frequency() {
        let mut out = [buffer()];
        let mut apu = NesApu::new();
        apu.set_output(Some(0));
        play_square(&mut apu, &mut out, 253);

        let mut samples = Vec::new();
        for _ in 0..60 {
            apu.end_frame(&mut out, FRAME);
            out[0].end_frame(FRAME);
            let mut chunk = vec![0i16; out[0].samples_avail()];
            out[0].read_samples(&mut chunk, false);
            samples.extend(chunk);
        }

        let tail = &samples[4410..];
        let mean = tail.iter().map(|&s| s as i64).sum::<i64>() / tail.len() as i64;
        let rising = tail
            .windows(2)
            .filter(|w| (w[0] as i64) < mean && (w[1] as i64) >= mean)
            .count();
        let seconds = tail.len() as f64 / 44_100.0;
        let measured = rising as f64 / seconds;
        let expected = CLOCK_NTSC / (16.0 * 254.0);
        assert!((measured - expected).abs() < 3.0, "{measured} vs {expected}");
    }

    #[test]
    fn test_muted_voices_keep_phase() {
        let run = |mute_first: bool| {
            let mut out = [buffer()];
            let mut apu = NesApu::new();
            apu.set_output(Some(0));
            play_square(&mut apu, &mut out, 0x123);
            apu.write(&mut out, 0, 0x4015, 0x09);
            apu.write(&mut out, 0, 0x400C, 0x3F);
            apu.write(&mut out, 0, 0x400E, 0x03);
            apu.write(&mut out, 0, 0x400F, 0x00);
            if mute_first {
                apu.mute_voices(0x1F);
            }
            for frame in 0..10 {
                if frame == 5 {
                    apu.mute_voices(0);
                }
                apu.end_frame(&mut out, FRAME + frame);
                out[0].end_frame(FRAME + frame);
                out[0].remove_samples(out[0].samples_avail());
            }
            (
                apu.square1.phase,
                apu.square1.env.osc.delay,
                apu.noise.lfsr,
                apu.noise.env.osc.delay,
            )
        };
        assert_eq!(run(true), run(false));
    }

    #[test]
    fn test_status_reports_length_counters() {
        let mut out = [buffer()];
        let mut apu = NesApu::new();
        play_square(&mut apu, &mut out, 0x200);
        assert_eq!(apu.read_status(&mut out, 10) & 0x1F, 0x01);

        apu.write(&mut out, 20, 0x4015, 0x00);
        assert_eq!(apu.read_status(&mut out, 30) & 0x1F, 0x00);
    }

    #[test]
    fn test_frame_irq() {
        let mut out = [buffer()];
        let mut apu = NesApu::new();
        apu.write(&mut out, 0, 0x4017, 0x00);
        assert_eq!(apu.earliest_irq(), 29_834);
        assert_ne!(apu.read_status(&mut out, 30_000) & 0x40, 0);
        // acknowledged by the read
        assert_eq!(apu.read_status(&mut out, 30_010) & 0x40, 0);

        let mut apu = NesApu::new();
        apu.write(&mut out, 0, 0x4017, 0x40);
        assert_eq!(apu.earliest_irq(), NO_IRQ);
        assert_eq!(apu.read_status(&mut out, 30_000) & 0x40, 0);
    }

    #[test]
    fn test_dmc_plays_from_window() {
        let mut out = [buffer()];
        let mut apu = NesApu::new();
        apu.set_output(Some(0));
        apu.map_dmc_memory(0xC000, &[0xFF; 17]);
        apu.write(&mut out, 0, 0x4010, 0x0F);
        apu.write(&mut out, 0, 0x4012, 0x00);
        apu.write(&mut out, 0, 0x4013, 0x01);
        apu.write(&mut out, 0, 0x4015, 0x10);
        assert_ne!(apu.read_status(&mut out, 100) & 0x10, 0);

        apu.end_frame(&mut out, FRAME);
        // 17 bytes of rising deltas saturate the DAC and end the sample
        assert_eq!(apu.dmc.dac, 126);
        assert_eq!(apu.read_status(&mut out, 10) & 0x10, 0);
    }
}
