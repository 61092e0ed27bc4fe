//! Sunsoft FME-7 (5B): three AY-style square voices with a logarithmic
//! volume curve. Noise and the hardware envelope are not emulated; voices
//! using them stay silent.

use super::{emit, SoundChip, VoiceOutput};
use crate::blip_buffer::{BlipBuffer, BlipEq, BlipSynth, BlipTime, QUALITY_GOOD};

/// Register select port.
pub const LATCH_ADDR: u16 = 0xC000;
/// Register data port.
pub const DATA_ADDR: u16 = 0xE000;
/// Both ports decode on these address bits.
pub const ADDR_MASK: u16 = 0xE000;

const VOICE_NAMES: [&str; 3] = ["Square A", "Square B", "Square C"];
const REG_COUNT: usize = 14;
const AMP_RANGE: i32 = 192;
const PERIOD_FACTOR: i32 = 16;

// 3 dB per step, full scale at 15
const AMP_TABLE: [u8; 16] = [0, 1, 2, 3, 4, 6, 8, 12, 17, 24, 34, 48, 68, 96, 136, 192];

#[derive(Debug, Clone, Copy, Default)]
struct Osc {
    output: VoiceOutput,
    last_amp: i32,
    delay: BlipTime,
    phase: bool,
}

/// FME-7 sound hardware.
#[derive(Debug, Clone)]
pub struct Fme7 {
    regs: [u8; REG_COUNT],
    latch: u8,
    oscs: [Osc; 3],
    last_time: BlipTime,
    synth: BlipSynth,
}

impl Fme7 {
    /// Create a silent chip at nominal volume.
    pub fn new() -> Self {
        let mut chip = Self {
            regs: [0; REG_COUNT],
            latch: 0,
            oscs: [Osc::default(); 3],
            last_time: 0,
            synth: BlipSynth::new(QUALITY_GOOD, AMP_RANGE),
        };
        chip.set_volume(1.0);
        chip
    }

    fn run_until(&mut self, out: &mut [BlipBuffer], end_time: BlipTime) {
        if end_time <= self.last_time {
            return;
        }
        for index in 0..self.oscs.len() {
            let mode = self.regs[7] >> index;
            let vol_mode = self.regs[0o10 + index];
            let mut volume = AMP_TABLE[(vol_mode & 0x0F) as usize] as i32;

            // tone disabled or envelope mode
            if mode & 0o01 != 0 || vol_mode & 0x10 != 0 {
                volume = 0;
            }

            let mut period = (self.regs[index * 2 + 1] as i32 & 0x0F) * 0x100 * PERIOD_FACTOR
                + self.regs[index * 2] as i32 * PERIOD_FACTOR;
            // above roughly 22 kHz
            if period < 50 {
                volume = 0;
                if period == 0 {
                    period = PERIOD_FACTOR;
                }
            }

            let osc = &mut self.oscs[index];
            let target = osc.output.target();
            let amp = if osc.phase { volume } else { 0 };
            if target.is_some() {
                emit(&self.synth, out, target, self.last_time, amp - osc.last_amp);
                osc.last_amp = amp;
            } else {
                osc.last_amp = 0;
            }

            let mut time = self.last_time + osc.delay;
            if time < end_time {
                if volume != 0 {
                    let mut delta = amp * 2 - volume;
                    loop {
                        delta = -delta;
                        emit(&self.synth, out, target, time, delta);
                        time += period;
                        if time >= end_time {
                            break;
                        }
                    }
                    if target.is_some() {
                        osc.last_amp = (delta + volume) >> 1;
                    }
                    osc.phase = delta > 0;
                } else {
                    // keep phase while silent
                    let count = (end_time - time + period - 1) / period;
                    osc.phase ^= count & 1 != 0;
                    time += count * period;
                }
            }
            osc.delay = time - end_time;
        }
        self.last_time = end_time;
    }
}

impl Default for Fme7 {
    fn default() -> Self {
        Self::new()
    }
}

impl SoundChip for Fme7 {
    fn voice_count(&self) -> usize {
        VOICE_NAMES.len()
    }

    fn voice_names(&self) -> &'static [&'static str] {
        &VOICE_NAMES
    }

    fn reset(&mut self) {
        self.last_time = 0;
        self.latch = 0;
        self.regs = [0; REG_COUNT];
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
        self.synth.set_volume_unit(0.38 / AMP_RANGE as f64 * volume);
    }

    fn set_treble_eq(&mut self, eq: BlipEq) {
        self.synth.set_treble_eq(eq);
    }

    fn write(&mut self, out: &mut [BlipBuffer], time: BlipTime, addr: u16, data: u8) {
        match addr & ADDR_MASK {
            LATCH_ADDR => self.latch = data,
            DATA_ADDR => {
                let reg = self.latch as usize;
                if reg < REG_COUNT {
                    self.run_until(out, time);
                    self.regs[reg] = data;
                }
            }
            _ => {}
        }
    }

    fn end_frame(&mut self, out: &mut [BlipBuffer], time: BlipTime) {
        self.run_until(out, time);
        self.last_time -= time;
    }
}
