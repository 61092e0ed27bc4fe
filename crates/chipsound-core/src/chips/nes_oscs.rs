//! 2A03 oscillators: pulse, triangle, noise and the DMC state.

use crate::blip_buffer::{BlipBuffer, BlipSynth, BlipTime};

use super::VoiceOutput;

/// Register state shared by every 2A03 voice.
#[derive(Debug, Clone, Default)]
pub(crate) struct OscBase {
    pub regs: [u8; 4],
    pub reg_written: [bool; 4],
    pub output: VoiceOutput,
    pub length_counter: i32,
    pub delay: BlipTime,
    pub last_amp: i32,
}

impl OscBase {
    pub fn reset(&mut self) {
        self.delay = 0;
        self.last_amp = 0;
    }

    pub fn clock_length(&mut self, halt_mask: u8) {
        if self.length_counter != 0 && self.regs[0] & halt_mask == 0 {
            self.length_counter -= 1;
        }
    }

    /// 11-bit timer period from registers 2 and 3.
    pub fn period(&self) -> i32 {
        (self.regs[3] as i32 & 7) * 0x100 + self.regs[2] as i32
    }

    #[inline]
    pub fn update_amp(&mut self, amp: i32) -> i32 {
        let delta = amp - self.last_amp;
        self.last_amp = amp;
        delta
    }
}

/// Volume envelope used by the pulse and noise voices.
#[derive(Debug, Clone, Default)]
pub(crate) struct Envelope {
    pub osc: OscBase,
    pub envelope: i32,
    pub env_delay: i32,
}

impl Envelope {
    pub fn reset(&mut self) {
        self.envelope = 0;
        self.env_delay = 0;
        self.osc.reset();
    }

    pub fn clock_envelope(&mut self) {
        let period = (self.osc.regs[0] & 15) as i32;
        if self.osc.reg_written[3] {
            self.osc.reg_written[3] = false;
            self.env_delay = period;
            self.envelope = 15;
        } else {
            self.env_delay -= 1;
            if self.env_delay < 0 {
                self.env_delay = period;
                if self.envelope != 0 || self.osc.regs[0] & 0x20 != 0 {
                    self.envelope = (self.envelope - 1) & 15;
                }
            }
        }
    }

    pub fn volume(&self) -> i32 {
        if self.osc.length_counter == 0 {
            0
        } else if self.osc.regs[0] & 0x10 != 0 {
            (self.osc.regs[0] & 15) as i32
        } else {
            self.envelope
        }
    }
}

// ============================================================================
// Pulse
// ============================================================================

const SQUARE_PHASE_RANGE: i32 = 8;
const NEGATE_FLAG: u8 = 0x08;
const SHIFT_MASK: u8 = 0x07;

#[derive(Debug, Clone, Default)]
pub(crate) struct Square {
    pub env: Envelope,
    pub phase: i32,
    pub sweep_delay: i32,
}

impl Square {
    pub fn reset(&mut self) {
        self.sweep_delay = 0;
        self.env.reset();
    }

    pub fn reset_phase(&mut self) {
        self.phase = SQUARE_PHASE_RANGE - 1;
    }

    pub fn clock_sweep(&mut self, negative_adjust: i32) {
        let osc = &mut self.env.osc;
        let sweep = osc.regs[1];

        self.sweep_delay -= 1;
        if self.sweep_delay < 0 {
            osc.reg_written[1] = true;
            let mut period = osc.period();
            let shift = sweep & SHIFT_MASK;
            if shift != 0 && sweep & 0x80 != 0 && period >= 8 {
                let mut offset = period >> shift;
                if sweep & NEGATE_FLAG != 0 {
                    offset = negative_adjust - offset;
                }
                if period + offset < 0x800 {
                    period += offset;
                    osc.regs[2] = (period & 0xFF) as u8;
                    osc.regs[3] = (osc.regs[3] & !7) | ((period >> 8) & 7) as u8;
                }
            }
        }

        if osc.reg_written[1] {
            osc.reg_written[1] = false;
            self.sweep_delay = ((sweep >> 4) & 7) as i32;
        }
    }

    fn maintain_phase(&mut self, mut time: BlipTime, end_time: BlipTime, timer_period: i32) -> BlipTime {
        let remain = end_time - time;
        if remain > 0 {
            let count = (remain + timer_period - 1) / timer_period;
            self.phase = (self.phase + count) & (SQUARE_PHASE_RANGE - 1);
            time += count * timer_period;
        }
        time
    }

    pub fn run(
        &mut self,
        synth: &BlipSynth,
        out: &mut [BlipBuffer],
        mut time: BlipTime,
        end_time: BlipTime,
    ) {
        let period = self.env.osc.period();
        let timer_period = (period + 1) * 2;

        let Some(index) = self.env.osc.output.target() else {
            let start = time + self.env.osc.delay;
            self.env.osc.delay = self.maintain_phase(start, end_time, timer_period) - end_time;
            self.env.osc.last_amp = 0;
            return;
        };
        let buf = &mut out[index];

        let regs = self.env.osc.regs;
        let mut offset = period >> (regs[1] & SHIFT_MASK);
        if regs[1] & NEGATE_FLAG != 0 {
            offset = 0;
        }

        let volume = self.env.volume();
        if volume == 0 || period < 8 || period + offset >= 0x800 {
            let last = self.env.osc.last_amp;
            if last != 0 {
                synth.offset(time, -last, buf);
                self.env.osc.last_amp = 0;
            }
            time += self.env.osc.delay;
            time = self.maintain_phase(time, end_time, timer_period);
        } else {
            // duty 12.5%, 25%, 50%, 25% negated
            let duty_select = (regs[0] >> 6) & 3;
            let mut duty = 1 << duty_select;
            let mut amp = 0;
            if duty_select == 3 {
                duty = 2;
                amp = volume;
            }
            if self.phase < duty {
                amp ^= volume;
            }

            let delta = self.env.osc.update_amp(amp);
            if delta != 0 {
                synth.offset(time, delta, buf);
            }

            time += self.env.osc.delay;
            if time < end_time {
                let mut delta = amp * 2 - volume;
                let mut phase = self.phase;
                loop {
                    phase = (phase + 1) & (SQUARE_PHASE_RANGE - 1);
                    if phase == 0 || phase == duty {
                        delta = -delta;
                        synth.offset(time, delta, buf);
                    }
                    time += timer_period;
                    if time >= end_time {
                        break;
                    }
                }
                self.env.osc.last_amp = (delta + volume) >> 1;
                self.phase = phase;
            }
        }
        self.env.osc.delay = time - end_time;
    }
}

// ============================================================================
// Triangle
// ============================================================================

const TRIANGLE_PHASE_RANGE: i32 = 16;

#[derive(Debug, Clone, Default)]
pub(crate) struct Triangle {
    pub osc: OscBase,
    pub phase: i32,
    pub linear_counter: i32,
}

impl Triangle {
    pub fn reset(&mut self) {
        self.linear_counter = 0;
        self.phase = 1;
        self.osc.reset();
    }

    pub fn clock_linear_counter(&mut self) {
        if self.osc.reg_written[3] {
            self.linear_counter = (self.osc.regs[0] & 0x7F) as i32;
        } else if self.linear_counter != 0 {
            self.linear_counter -= 1;
        }
        if self.osc.regs[0] & 0x80 == 0 {
            self.osc.reg_written[3] = false;
        }
    }

    fn calc_amp(&self) -> i32 {
        let amp = TRIANGLE_PHASE_RANGE - self.phase;
        if amp < 0 {
            self.phase - (TRIANGLE_PHASE_RANGE + 1)
        } else {
            amp
        }
    }

    fn maintain_phase(&mut self, mut time: BlipTime, end_time: BlipTime, timer_period: i32) -> BlipTime {
        let remain = end_time - time;
        if remain > 0 {
            let count = (remain + timer_period - 1) / timer_period;
            self.phase = (self.phase + 1 - count).rem_euclid(TRIANGLE_PHASE_RANGE * 2);
            self.phase += 1;
            time += count * timer_period;
        }
        time
    }

    pub fn run(
        &mut self,
        synth: &BlipSynth,
        out: &mut [BlipBuffer],
        mut time: BlipTime,
        end_time: BlipTime,
    ) {
        let timer_period = self.osc.period() + 1;
        let Some(index) = self.osc.output.target() else {
            time += self.osc.delay;
            self.osc.delay = 0;
            if self.osc.length_counter != 0 && self.linear_counter != 0 && timer_period >= 3 {
                self.osc.delay = self.maintain_phase(time, end_time, timer_period) - end_time;
            }
            return;
        };
        let buf = &mut out[index];

        let delta = self.osc.update_amp(self.calc_amp());
        if delta != 0 {
            synth.offset(time, delta, buf);
        }

        time += self.osc.delay;
        if self.osc.length_counter == 0 || self.linear_counter == 0 || timer_period < 3 {
            time = end_time;
        } else if time < end_time {
            let mut phase = self.phase;
            let mut volume = 1;
            if phase > TRIANGLE_PHASE_RANGE {
                phase -= TRIANGLE_PHASE_RANGE;
                volume = -volume;
            }
            loop {
                phase -= 1;
                if phase == 0 {
                    phase = TRIANGLE_PHASE_RANGE;
                    volume = -volume;
                } else {
                    synth.offset(time, volume, buf);
                }
                time += timer_period;
                if time >= end_time {
                    break;
                }
            }
            if volume < 0 {
                phase += TRIANGLE_PHASE_RANGE;
            }
            self.phase = phase;
            self.osc.last_amp = self.calc_amp();
        }
        self.osc.delay = time - end_time;
    }
}

// ============================================================================
// Noise
// ============================================================================

const NOISE_PERIODS: [i32; 16] = [
    0x004, 0x008, 0x010, 0x020, 0x040, 0x060, 0x080, 0x0A0, 0x0CA, 0x0FE, 0x17C, 0x1FC, 0x2FA,
    0x3F8, 0x7F2, 0xFE4,
];

#[derive(Debug, Clone)]
pub(crate) struct Noise {
    pub env: Envelope,
    pub lfsr: i32,
}

impl Default for Noise {
    fn default() -> Self {
        Self {
            env: Envelope::default(),
            lfsr: 1 << 14,
        }
    }
}

impl Noise {
    pub fn reset(&mut self) {
        self.lfsr = 1 << 14;
        self.env.reset();
    }

    pub fn run(
        &mut self,
        synth: &BlipSynth,
        out: &mut [BlipBuffer],
        mut time: BlipTime,
        end_time: BlipTime,
    ) {
        const MODE_FLAG: u8 = 0x80;
        let regs = self.env.osc.regs;
        let period = NOISE_PERIODS[(regs[2] & 15) as usize];
        let volume = self.env.volume();
        let short_mode = regs[2] & MODE_FLAG != 0;

        let index = self.env.osc.output.target();
        if index.is_none() || volume == 0 {
            if let Some(index) = index {
                let delta = self.env.osc.update_amp(0);
                if delta != 0 {
                    synth.offset(time, delta, &mut out[index]);
                }
            } else {
                self.env.osc.last_amp = 0;
            }
            time += self.env.osc.delay;
            if time < end_time {
                let count = (end_time - time + period - 1) / period;
                time += count * period;
                let tap = if short_mode { 8 } else { 13 };
                for _ in 0..count {
                    let feedback = (self.lfsr << tap) ^ (self.lfsr << 14);
                    self.lfsr = (feedback & 0x4000) | (self.lfsr >> 1);
                }
            }
            self.env.osc.delay = time - end_time;
            return;
        }
        let Some(index) = index else { return };
        let buf = &mut out[index];

        let amp = if self.lfsr & 1 != 0 { volume } else { 0 };
        let delta = self.env.osc.update_amp(amp);
        if delta != 0 {
            synth.offset(time, delta, buf);
        }

        time += self.env.osc.delay;
        if time < end_time {
            let rperiod = buf.resampled_duration(period);
            let mut rtime = buf.to_resampled(time);
            let mut lfsr = self.lfsr;
            let mut delta = amp * 2 - volume;
            let tap = if short_mode { 8 } else { 13 };
            loop {
                let feedback = (lfsr << tap) ^ (lfsr << 14);
                time += period;
                // bits 0 and 1 differ
                if (lfsr + 1) & 2 != 0 {
                    delta = -delta;
                    synth.offset_resampled(rtime, delta, buf);
                }
                rtime += rperiod;
                lfsr = (feedback & 0x4000) | (lfsr >> 1);
                if time >= end_time {
                    break;
                }
            }
            self.env.osc.last_amp = (delta + volume) >> 1;
            self.lfsr = lfsr;
        }
        self.env.osc.delay = time - end_time;
    }
}

// ============================================================================
// DMC
// ============================================================================

pub(crate) const DMC_PERIODS: [[i32; 16]; 2] = [
    [428, 380, 340, 320, 286, 254, 226, 214, 190, 160, 142, 128, 106, 84, 72, 54],
    [398, 354, 316, 298, 276, 236, 210, 198, 176, 148, 132, 118, 98, 78, 66, 50],
];

pub(crate) const DMC_LOOP_FLAG: u8 = 0x40;

/// Delta modulation channel state. The sample fetch logic lives on the APU
/// because it touches the shared enable and IRQ state.
#[derive(Debug, Clone)]
pub(crate) struct Dmc {
    pub osc: OscBase,
    pub address: u16,
    pub period: i32,
    pub dac: i32,
    pub buf: u8,
    pub bits_remain: i32,
    pub bits: i32,
    pub buf_full: bool,
    pub silence: bool,
    pub next_irq: BlipTime,
    pub irq_flag: bool,
    pub irq_enabled: bool,
    pub pal_mode: bool,
}

impl Default for Dmc {
    fn default() -> Self {
        Self {
            osc: OscBase::default(),
            address: 0,
            period: 0x1AC,
            dac: 0,
            buf: 0,
            bits_remain: 1,
            bits: 0,
            buf_full: false,
            silence: true,
            next_irq: super::nes_apu::NO_IRQ,
            irq_flag: false,
            irq_enabled: false,
            pal_mode: false,
        }
    }
}

impl Dmc {
    pub fn reset(&mut self) {
        let pal_mode = self.pal_mode;
        let regs = self.osc.regs;
        let output = self.osc.output;
        *self = Self {
            pal_mode,
            ..Self::default()
        };
        self.osc.regs = regs;
        self.osc.output = output;
    }

    pub fn reload_sample(&mut self) {
        self.address = 0x4000 + self.osc.regs[2] as u16 * 0x40;
        self.osc.length_counter = self.osc.regs[3] as i32 * 0x10 + 1;
    }

    pub fn next_read_time(&self, last_dmc_time: BlipTime) -> BlipTime {
        if self.osc.length_counter == 0 {
            return super::nes_apu::NO_IRQ;
        }
        last_dmc_time + self.osc.delay + (self.bits_remain - 1) * self.period
    }

    pub fn update_amp(&mut self, dac: i32) -> i32 {
        self.osc.update_amp(dac)
    }
}
