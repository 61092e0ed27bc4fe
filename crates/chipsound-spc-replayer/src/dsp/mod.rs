//! The S-DSP: eight BRR sample voices with gaussian interpolation,
//! ADSR/GAIN envelopes, noise, pitch modulation and an eight-tap echo.
//!
//! One output sample takes 32 steps, one per SMP clock. Each step performs
//! the same slice of voice, echo and housekeeping work the chip does on that
//! clock, so register writes and RAM accesses by the SMP interleave with the
//! DSP exactly as on hardware. Finished stereo pairs queue up until the SMP
//! side collects them.

mod tables;

use tables::{COUNTER_OFFSETS, COUNTER_RANGE, COUNTER_RATES, GAUSS};

/// Number of voices.
pub const VOICE_COUNT: usize = 8;
/// Size of the register file.
pub const REGISTER_COUNT: usize = 128;
/// Native output rate in Hz.
pub const SAMPLE_RATE: u32 = 32_000;
/// Steps (SMP clocks) per output sample.
pub const PHASES: u32 = 32;

const BRR_BUF_SIZE: usize = 12;
const BRR_BLOCK_SIZE: i32 = 9;
const ECHO_HIST_SIZE: usize = 8;

/// Global register addresses.
pub mod reg {
    /// Main volume, left.
    pub const MVOLL: usize = 0x0C;
    /// Main volume, right.
    pub const MVOLR: usize = 0x1C;
    /// Echo volume, left.
    pub const EVOLL: usize = 0x2C;
    /// Echo volume, right.
    pub const EVOLR: usize = 0x3C;
    /// Key on.
    pub const KON: usize = 0x4C;
    /// Key off.
    pub const KOFF: usize = 0x5C;
    /// Reset, mute, echo disable and noise rate.
    pub const FLG: usize = 0x6C;
    /// Voices that reached a sample end.
    pub const ENDX: usize = 0x7C;
    /// Echo feedback.
    pub const EFB: usize = 0x0D;
    /// Pitch modulation enable.
    pub const PMON: usize = 0x2D;
    /// Noise enable.
    pub const NON: usize = 0x3D;
    /// Echo enable.
    pub const EON: usize = 0x4D;
    /// Sample directory page.
    pub const DIR: usize = 0x5D;
    /// Echo buffer page.
    pub const ESA: usize = 0x6D;
    /// Echo delay in 16 ms steps.
    pub const EDL: usize = 0x7D;
    /// First echo FIR coefficient; the others follow every 0x10.
    pub const FIR: usize = 0x0F;
}

/// Register offsets within a voice's 16-byte block.
pub mod voice_reg {
    /// Left volume.
    pub const VOLL: usize = 0x00;
    /// Right volume.
    pub const VOLR: usize = 0x01;
    /// Pitch, low byte.
    pub const PITCHL: usize = 0x02;
    /// Pitch, high six bits.
    pub const PITCHH: usize = 0x03;
    /// Source number in the sample directory.
    pub const SRCN: usize = 0x04;
    /// ADSR enable, decay and attack.
    pub const ADSR0: usize = 0x05;
    /// Sustain level and rate.
    pub const ADSR1: usize = 0x06;
    /// GAIN mode and value.
    pub const GAIN: usize = 0x07;
    /// Current envelope, read back.
    pub const ENVX: usize = 0x08;
    /// Current output, read back.
    pub const OUTX: usize = 0x09;
}

/// FLG bit that holds every voice in release at zero level.
pub const FLG_SOFT_RESET: u8 = 0x80;
/// FLG bit that silences the output.
pub const FLG_MUTE: u8 = 0x40;
/// FLG bit that stops echo buffer writes.
pub const FLG_ECHO_DISABLE: u8 = 0x20;

/// Envelope stage of a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum EnvMode {
    /// Falling to zero.
    #[default]
    Release = 0,
    /// Rising to full level.
    Attack = 1,
    /// Falling to the sustain level.
    Decay = 2,
    /// Falling at the sustain rate.
    Sustain = 3,
}

impl EnvMode {
    /// Mode stored under `index`, as saved in state snapshots.
    pub fn from_index(index: i64) -> Self {
        match index & 3 {
            1 => EnvMode::Attack,
            2 => EnvMode::Decay,
            3 => EnvMode::Sustain,
            _ => EnvMode::Release,
        }
    }
}

/// Decoding and envelope state of one voice.
#[derive(Debug, Clone)]
pub struct Voice {
    /// Decoded samples, stored twice so interpolation never wraps.
    pub(crate) buf: [i32; BRR_BUF_SIZE * 2],
    pub(crate) buf_pos: usize,
    /// Pitch counter; the top bits index `buf`, the rest is the fraction.
    pub(crate) interp_pos: i32,
    pub(crate) brr_addr: i32,
    pub(crate) brr_offset: i32,
    pub(crate) vbit: u8,
    /// Offset of this voice's registers.
    pub(crate) regs: usize,
    pub(crate) kon_delay: i32,
    pub(crate) env_mode: EnvMode,
    pub(crate) env: i32,
    /// Envelope before clamping, seen by the bent GAIN line.
    pub(crate) hidden_env: i32,
    pub(crate) envx_out: u8,
}

impl Voice {
    fn new(index: usize) -> Self {
        Self {
            buf: [0; BRR_BUF_SIZE * 2],
            buf_pos: 0,
            interp_pos: 0,
            brr_addr: 0,
            brr_offset: 1,
            vbit: 1 << index,
            regs: index * 0x10,
            kon_delay: 0,
            env_mode: EnvMode::Release,
            env: 0,
            hidden_env: 0,
            envx_out: 0,
        }
    }
}

fn power_on_registers() -> [u8; REGISTER_COUNT] {
    let mut regs = [0u8; REGISTER_COUNT];
    regs[reg::FLG] = FLG_SOFT_RESET | FLG_MUTE | FLG_ECHO_DISABLE;
    regs
}

#[inline]
fn clamp16(s: i32) -> i32 {
    s.clamp(i16::MIN as i32, i16::MAX as i32)
}

#[inline]
fn ram_byte(ram: &[u8], addr: i32) -> i32 {
    ram[(addr & 0xFFFF) as usize] as i32
}

/// S-DSP register file and internal state.
///
/// Fields mirror the chip's latches so a full snapshot can be saved and
/// restored between any two steps.
#[derive(Debug, Clone)]
pub struct Dsp {
    pub(crate) regs: [u8; REGISTER_COUNT],
    pub(crate) voices: [Voice; VOICE_COUNT],
    pub(crate) echo_hist: [[i32; 2]; ECHO_HIST_SIZE * 2],
    pub(crate) echo_hist_pos: usize,
    pub(crate) every_other_sample: bool,
    pub(crate) kon: u8,
    pub(crate) new_kon: u8,
    pub(crate) noise: i32,
    pub(crate) counter: i32,
    pub(crate) echo_offset: i32,
    pub(crate) echo_length: i32,
    pub(crate) phase: u32,
    pub(crate) endx_buf: u8,
    pub(crate) envx_buf: u8,
    pub(crate) outx_buf: u8,
    pub(crate) t_pmon: u8,
    pub(crate) t_non: u8,
    pub(crate) t_eon: u8,
    pub(crate) t_dir: i32,
    pub(crate) t_koff: u8,
    pub(crate) t_brr_next_addr: i32,
    pub(crate) t_adsr0: i32,
    pub(crate) t_brr_header: i32,
    pub(crate) t_brr_byte: i32,
    pub(crate) t_srcn: i32,
    pub(crate) t_esa: i32,
    pub(crate) t_echo_enabled: bool,
    pub(crate) t_dir_addr: i32,
    pub(crate) t_pitch: i32,
    pub(crate) t_output: i32,
    pub(crate) t_looped: u8,
    pub(crate) t_echo_ptr: i32,
    pub(crate) t_main_out: [i32; 2],
    pub(crate) t_echo_out: [i32; 2],
    pub(crate) t_echo_in: [i32; 2],
    muted: u8,
    out: Vec<i16>,
}

impl Dsp {
    /// DSP after power-on: soft reset, muted, echo writes off.
    pub fn new() -> Self {
        Self::with_registers(&power_on_registers(), 0, Vec::with_capacity(64))
    }

    fn with_registers(regs: &[u8; REGISTER_COUNT], muted: u8, out: Vec<i16>) -> Self {
        Self {
            regs: *regs,
            voices: std::array::from_fn(Voice::new),
            echo_hist: [[0; 2]; ECHO_HIST_SIZE * 2],
            echo_hist_pos: 0,
            every_other_sample: true,
            kon: 0,
            new_kon: regs[reg::KON],
            noise: 0x4000,
            counter: 0,
            echo_offset: 0,
            echo_length: 0,
            phase: 0,
            endx_buf: 0,
            envx_buf: 0,
            outx_buf: 0,
            t_pmon: 0,
            t_non: 0,
            t_eon: 0,
            t_dir: regs[reg::DIR] as i32,
            t_koff: 0,
            t_brr_next_addr: 0,
            t_adsr0: 0,
            t_brr_header: 0,
            t_brr_byte: 0,
            t_srcn: 0,
            t_esa: regs[reg::ESA] as i32,
            t_echo_enabled: false,
            t_dir_addr: 0,
            t_pitch: 0,
            t_output: 0,
            t_looped: 0,
            t_echo_ptr: 0,
            t_main_out: [0; 2],
            t_echo_out: [0; 2],
            t_echo_in: [0; 2],
            muted,
            out,
        }
    }

    /// Soft reset with the power-on register values.
    pub fn reset(&mut self) {
        self.load(&power_on_registers());
    }

    /// Replace the register file and clear all internal state.
    ///
    /// Voice mutes survive.
    pub fn load(&mut self, regs: &[u8; REGISTER_COUNT]) {
        let mut out = std::mem::take(&mut self.out);
        out.clear();
        *self = Self::with_registers(regs, self.muted, out);
    }

    /// Register value as the SMP reads it through $F3.
    pub fn read(&self, addr: u8) -> u8 {
        self.regs[(addr & 0x7F) as usize]
    }

    /// Register write from the SMP.
    pub fn write(&mut self, addr: u8, data: u8) {
        let addr = (addr & 0x7F) as usize;
        self.regs[addr] = data;
        if addr & 0x0F == 0x0C {
            if addr == reg::KON {
                self.new_kon = data;
            }
            if addr == reg::ENDX {
                // any write clears it
                self.endx_buf = 0;
                self.regs[reg::ENDX] = 0;
            }
        }
    }

    /// The whole register file.
    pub fn registers(&self) -> &[u8; REGISTER_COUNT] {
        &self.regs
    }

    /// Silence or restore one voice. The voice keeps running while muted.
    pub fn channel_enable(&mut self, voice: usize, enabled: bool) {
        if voice < VOICE_COUNT {
            let bit = 1u8 << voice;
            if enabled {
                self.muted &= !bit;
            } else {
                self.muted |= bit;
            }
        }
    }

    /// Current envelope level of `voice`, 0.0 to 1.0.
    pub fn voice_level(&self, voice: usize) -> f32 {
        match self.voices.get(voice) {
            Some(v) if self.muted & v.vbit == 0 => v.env as f32 / 0x7FF as f32,
            _ => 0.0,
        }
    }

    /// Step within the current sample, 0 to 31.
    pub fn phase(&self) -> u32 {
        self.phase
    }

    /// Samples waiting to be collected.
    pub fn pending(&self) -> usize {
        self.out.len()
    }

    /// Move queued samples into `dest`. Returns how many were moved.
    pub fn take_samples(&mut self, dest: &mut [i16]) -> usize {
        let n = dest.len().min(self.out.len());
        dest[..n].copy_from_slice(&self.out[..n]);
        self.out.drain(..n);
        n
    }

    /// Drop queued samples.
    pub fn discard_samples(&mut self) {
        self.out.clear();
    }

    #[inline]
    fn vreg(&self, v: usize, offset: usize) -> u8 {
        self.regs[(self.voices[v].regs + offset) & 0x7F]
    }

    #[inline]
    fn read_counter(&self, rate: usize) -> bool {
        (self.counter as u32 + COUNTER_OFFSETS[rate] as u32) % COUNTER_RATES[rate] as u32 == 0
    }

    /// Run one step.
    pub fn run(&mut self, ram: &mut [u8]) {
        debug_assert!(ram.len() >= 0x10000);
        match self.phase {
            0 => {
                self.voice_v5(0);
                self.voice_v2(1, ram);
            }
            1 => {
                self.voice_v6(0);
                self.voice_v3(1, ram);
            }
            2 => self.voice_v7_v4_v1(0, ram),
            3 => self.voice_v8_v5_v2(0, ram),
            4 => self.voice_v9_v6_v3(0, ram),
            5 => self.voice_v7_v4_v1(1, ram),
            6 => self.voice_v8_v5_v2(1, ram),
            7 => self.voice_v9_v6_v3(1, ram),
            8 => self.voice_v7_v4_v1(2, ram),
            9 => self.voice_v8_v5_v2(2, ram),
            10 => self.voice_v9_v6_v3(2, ram),
            11 => self.voice_v7_v4_v1(3, ram),
            12 => self.voice_v8_v5_v2(3, ram),
            13 => self.voice_v9_v6_v3(3, ram),
            14 => self.voice_v7_v4_v1(4, ram),
            15 => self.voice_v8_v5_v2(4, ram),
            16 => self.voice_v9_v6_v3(4, ram),
            17 => {
                self.voice_v1(0);
                self.voice_v7(5);
                self.voice_v4(6, ram);
            }
            18 => self.voice_v8_v5_v2(5, ram),
            19 => self.voice_v9_v6_v3(5, ram),
            20 => {
                self.voice_v1(1);
                self.voice_v7(6);
                self.voice_v4(7, ram);
            }
            21 => {
                self.voice_v8(6);
                self.voice_v5(7);
                self.voice_v2(0, ram);
            }
            22 => {
                self.voice_v3a(0);
                self.voice_v9(6);
                self.voice_v6(7);
                self.echo_22(ram);
            }
            23 => {
                self.voice_v7(7);
                self.echo_23(ram);
            }
            24 => {
                self.voice_v8(7);
                self.echo_24();
            }
            25 => {
                self.voice_v3b(0, ram);
                self.voice_v9(7);
                self.echo_25();
            }
            26 => self.echo_26(),
            27 => {
                self.misc_27();
                self.echo_27();
            }
            28 => {
                self.misc_28();
                self.echo_28();
            }
            29 => {
                self.misc_29();
                self.echo_29(ram);
            }
            30 => {
                self.misc_30();
                self.voice_v3c(0);
                self.echo_30(ram);
            }
            _ => {
                self.voice_v4(0, ram);
                self.voice_v1(2);
            }
        }
        self.phase = (self.phase + 1) & (PHASES - 1);
    }

    fn voice_v7_v4_v1(&mut self, v: usize, ram: &mut [u8]) {
        self.voice_v7(v);
        self.voice_v1(v + 3);
        self.voice_v4(v + 1, ram);
    }

    fn voice_v8_v5_v2(&mut self, v: usize, ram: &[u8]) {
        self.voice_v8(v);
        self.voice_v5(v + 1);
        self.voice_v2(v + 2, ram);
    }

    fn voice_v9_v6_v3(&mut self, v: usize, ram: &[u8]) {
        self.voice_v9(v);
        self.voice_v6(v + 1);
        self.voice_v3(v + 2, ram);
    }

    // Voice steps

    fn voice_v1(&mut self, v: usize) {
        self.t_dir_addr = self.t_dir * 0x100 + self.t_srcn * 4;
        self.t_srcn = self.vreg(v, voice_reg::SRCN) as i32;
    }

    fn voice_v2(&mut self, v: usize, ram: &[u8]) {
        // start address while keying on, loop address otherwise
        let mut entry = self.t_dir_addr;
        if self.voices[v].kon_delay == 0 {
            entry += 2;
        }
        self.t_brr_next_addr = ram_byte(ram, entry) | ram_byte(ram, entry + 1) << 8;
        self.t_adsr0 = self.vreg(v, voice_reg::ADSR0) as i32;
        self.t_pitch = self.vreg(v, voice_reg::PITCHL) as i32;
    }

    fn voice_v3(&mut self, v: usize, ram: &[u8]) {
        self.voice_v3a(v);
        self.voice_v3b(v, ram);
        self.voice_v3c(v);
    }

    fn voice_v3a(&mut self, v: usize) {
        self.t_pitch += ((self.vreg(v, voice_reg::PITCHH) & 0x3F) as i32) << 8;
    }

    fn voice_v3b(&mut self, v: usize, ram: &[u8]) {
        let voice = &self.voices[v];
        self.t_brr_byte = ram_byte(ram, voice.brr_addr + voice.brr_offset);
        self.t_brr_header = ram_byte(ram, voice.brr_addr);
    }

    fn voice_v3c(&mut self, v: usize) {
        let vbit = self.voices[v].vbit;

        // pitch modulation by the previous voice's output
        if self.t_pmon & vbit != 0 {
            self.t_pitch += ((self.t_output >> 5) * self.t_pitch) >> 10;
        }

        let voice = &mut self.voices[v];
        if voice.kon_delay != 0 {
            if voice.kon_delay == 5 {
                voice.brr_addr = self.t_brr_next_addr;
                voice.brr_offset = 1;
                voice.buf_pos = 0;
                // header is ignored on this sample
                self.t_brr_header = 0;
            }

            voice.env = 0;
            voice.hidden_env = 0;

            // BRR decoding stays off until the last three samples
            voice.interp_pos = 0;
            voice.kon_delay -= 1;
            if voice.kon_delay & 3 != 0 {
                voice.interp_pos = 0x4000;
            }

            self.t_pitch = 0;
        }

        let mut output = self.interpolate(v);
        if self.t_non & vbit != 0 {
            output = (self.noise * 2) as i16 as i32;
        }
        let voice = &mut self.voices[v];
        self.t_output = ((output * voice.env) >> 11) & !1;
        voice.envx_out = (voice.env >> 4) as u8;

        // end of sample without loop, or soft reset
        if self.regs[reg::FLG] & FLG_SOFT_RESET != 0 || self.t_brr_header & 3 == 1 {
            voice.env_mode = EnvMode::Release;
            voice.env = 0;
        }

        if self.every_other_sample {
            if self.t_koff & vbit != 0 {
                voice.env_mode = EnvMode::Release;
            }
            if self.kon & vbit != 0 {
                voice.kon_delay = 5;
                voice.env_mode = EnvMode::Attack;
            }
        }

        if self.voices[v].kon_delay == 0 {
            self.run_envelope(v);
        }
    }

    fn voice_output(&mut self, v: usize, ch: usize) {
        let vol = self.vreg(v, voice_reg::VOLL + ch) as i8 as i32;
        let vbit = self.voices[v].vbit;
        let amp = if self.muted & vbit != 0 {
            0
        } else {
            (self.t_output * vol) >> 7
        };

        self.t_main_out[ch] = clamp16(self.t_main_out[ch] + amp);
        if self.t_eon & vbit != 0 {
            self.t_echo_out[ch] = clamp16(self.t_echo_out[ch] + amp);
        }
    }

    fn voice_v4(&mut self, v: usize, ram: &[u8]) {
        self.t_looped = 0;
        if self.voices[v].interp_pos >= 0x4000 {
            self.decode_brr(v, ram);
            let voice = &mut self.voices[v];
            voice.brr_offset += 2;
            if voice.brr_offset >= BRR_BLOCK_SIZE {
                voice.brr_addr = (voice.brr_addr + BRR_BLOCK_SIZE) & 0xFFFF;
                if self.t_brr_header & 1 != 0 {
                    voice.brr_addr = self.t_brr_next_addr;
                    self.t_looped = voice.vbit;
                }
                voice.brr_offset = 1;
            }
        }

        let voice = &mut self.voices[v];
        voice.interp_pos = ((voice.interp_pos & 0x3FFF) + self.t_pitch).min(0x7FFF);

        self.voice_output(v, 0);
    }

    fn voice_v5(&mut self, v: usize) {
        self.voice_output(v, 1);

        let voice = &self.voices[v];
        let mut endx = self.regs[reg::ENDX] | self.t_looped;
        if voice.kon_delay == 5 {
            endx &= !voice.vbit;
        }
        self.endx_buf = endx;
    }

    fn voice_v6(&mut self, _v: usize) {
        self.outx_buf = (self.t_output >> 8) as u8;
    }

    fn voice_v7(&mut self, v: usize) {
        self.regs[reg::ENDX] = self.endx_buf;
        self.envx_buf = self.voices[v].envx_out;
    }

    fn voice_v8(&mut self, v: usize) {
        let at = (self.voices[v].regs + voice_reg::OUTX) & 0x7F;
        self.regs[at] = self.outx_buf;
    }

    fn voice_v9(&mut self, v: usize) {
        let at = (self.voices[v].regs + voice_reg::ENVX) & 0x7F;
        self.regs[at] = self.envx_buf;
    }

    fn decode_brr(&mut self, v: usize, ram: &[u8]) {
        let header = self.t_brr_header;
        let voice = &mut self.voices[v];
        // four nybbles as 0xABCD
        let mut nybbles = self.t_brr_byte << 8 | ram_byte(ram, voice.brr_addr + voice.brr_offset + 1);

        let start = voice.buf_pos;
        voice.buf_pos = if start + 4 >= BRR_BUF_SIZE { 0 } else { start + 4 };

        let shift = header >> 4;
        let filter = header & 0x0C;
        for pos in start..start + 4 {
            let mut s = ((nybbles as i16) >> 12) as i32;
            s = (s << shift) >> 1;
            if shift >= 0xD {
                s = (s >> 25) << 11;
            }

            let p1 = voice.buf[pos + BRR_BUF_SIZE - 1];
            let p2 = voice.buf[pos + BRR_BUF_SIZE - 2] >> 1;
            if filter >= 8 {
                s += p1;
                s -= p2;
                if filter == 8 {
                    s += p2 >> 4;
                    s += (p1 * -3) >> 6;
                } else {
                    s += (p1 * -13) >> 7;
                    s += (p2 * 3) >> 4;
                }
            } else if filter != 0 {
                s += p1 >> 1;
                s += (-p1) >> 5;
            }

            let s = (clamp16(s) * 2) as i16 as i32;
            voice.buf[pos + BRR_BUF_SIZE] = s;
            voice.buf[pos] = s;
            nybbles <<= 4;
        }
    }

    fn interpolate(&self, v: usize) -> i32 {
        let voice = &self.voices[v];
        let offset = ((voice.interp_pos >> 4) & 0xFF) as usize;
        let fwd = 255 - offset;
        let rev = offset;
        let base = (voice.interp_pos >> 12) as usize + voice.buf_pos;
        let input = &voice.buf[base..base + 4];

        let mut out = (GAUSS[fwd] as i32 * input[0]) >> 11;
        out += (GAUSS[fwd + 256] as i32 * input[1]) >> 11;
        out += (GAUSS[rev + 256] as i32 * input[2]) >> 11;
        out = out as i16 as i32;
        out += (GAUSS[rev] as i32 * input[3]) >> 11;
        clamp16(out) & !1
    }

    fn run_envelope(&mut self, v: usize) {
        let voice = &self.voices[v];
        let mut env = voice.env;
        if voice.env_mode == EnvMode::Release {
            env = (env - 0x8).max(0);
            self.voices[v].env = env;
            return;
        }

        let rate;
        let mut env_data = self.vreg(v, voice_reg::ADSR1) as i32;
        let mut mode = voice.env_mode;
        if self.t_adsr0 & 0x80 != 0 {
            if mode >= EnvMode::Decay {
                env -= 1;
                env -= env >> 8;
                rate = if mode == EnvMode::Decay {
                    ((self.t_adsr0 >> 3) & 0x0E) + 0x10
                } else {
                    env_data & 0x1F
                };
            } else {
                rate = (self.t_adsr0 & 0x0F) * 2 + 1;
                env += if rate < 31 { 0x20 } else { 0x400 };
            }
        } else {
            env_data = self.vreg(v, voice_reg::GAIN) as i32;
            let gain_mode = env_data >> 5;
            if gain_mode < 4 {
                // direct
                env = env_data * 0x10;
                rate = 31;
            } else {
                rate = env_data & 0x1F;
                match gain_mode {
                    4 => env -= 0x20,
                    5 => {
                        env -= 1;
                        env -= env >> 8;
                    }
                    _ => {
                        env += 0x20;
                        if gain_mode > 6 && voice.hidden_env as u32 >= 0x600 {
                            // bent line
                            env += 0x8 - 0x20;
                        }
                    }
                }
            }
        }

        if env >> 8 == env_data >> 5 && mode == EnvMode::Decay {
            mode = EnvMode::Sustain;
        }

        let voice = &mut self.voices[v];
        voice.hidden_env = env;

        // unsigned compare also catches a linear decrease going negative
        if env as u32 > 0x7FF {
            env = if env < 0 { 0 } else { 0x7FF };
            if mode == EnvMode::Attack {
                mode = EnvMode::Decay;
            }
        }
        voice.env_mode = mode;

        if self.read_counter(rate as usize) {
            self.voices[v].env = env;
        }
    }

    // Housekeeping

    fn misc_27(&mut self) {
        // voice 0 has no previous voice to modulate it
        self.t_pmon = self.regs[reg::PMON] & 0xFE;
    }

    fn misc_28(&mut self) {
        self.t_non = self.regs[reg::NON];
        self.t_eon = self.regs[reg::EON];
        self.t_dir = self.regs[reg::DIR] as i32;
    }

    fn misc_29(&mut self) {
        self.every_other_sample = !self.every_other_sample;
        if self.every_other_sample {
            // KON is cleared 63 clocks after it was last read
            self.new_kon &= !self.kon;
        }
    }

    fn misc_30(&mut self) {
        if self.every_other_sample {
            self.kon = self.new_kon;
            self.t_koff = self.regs[reg::KOFF];
        }

        self.counter -= 1;
        if self.counter < 0 {
            self.counter = COUNTER_RANGE - 1;
        }

        if self.read_counter((self.regs[reg::FLG] & 0x1F) as usize) {
            let feedback = (self.noise << 13) ^ (self.noise << 14);
            self.noise = (feedback & 0x4000) ^ (self.noise >> 1);
        }
    }

    // Echo

    fn echo_fir(&self, tap: usize, ch: usize) -> i32 {
        let coef = self.regs[reg::FIR + tap * 0x10] as i8 as i32;
        (self.echo_hist[self.echo_hist_pos + tap + 1][ch] * coef) >> 6
    }

    fn echo_read(&mut self, ch: usize, ram: &[u8]) {
        let addr = self.t_echo_ptr + ch as i32 * 2;
        let s = (ram_byte(ram, addr) | ram_byte(ram, addr + 1) << 8) as u16 as i16 as i32;
        let pos = self.echo_hist_pos;
        self.echo_hist[pos][ch] = s >> 1;
        self.echo_hist[pos + ECHO_HIST_SIZE][ch] = s >> 1;
    }

    fn echo_write(&mut self, ch: usize, ram: &mut [u8]) {
        if self.t_echo_enabled {
            let addr = self.t_echo_ptr + ch as i32 * 2;
            let s = self.t_echo_out[ch];
            ram[(addr & 0xFFFF) as usize] = s as u8;
            ram[((addr + 1) & 0xFFFF) as usize] = (s >> 8) as u8;
        }
        self.t_echo_out[ch] = 0;
    }

    fn echo_output(&self, ch: usize) -> i32 {
        let mvol = self.regs[reg::MVOLL + ch * 0x10] as i8 as i32;
        let evol = self.regs[reg::EVOLL + ch * 0x10] as i8 as i32;
        let main = ((self.t_main_out[ch] * mvol) >> 7) as i16 as i32;
        let echo = ((self.t_echo_in[ch] * evol) >> 7) as i16 as i32;
        clamp16(main + echo)
    }

    fn echo_22(&mut self, ram: &[u8]) {
        self.echo_hist_pos += 1;
        if self.echo_hist_pos >= ECHO_HIST_SIZE {
            self.echo_hist_pos = 0;
        }

        self.t_echo_ptr = (self.t_esa * 0x100 + self.echo_offset) & 0xFFFF;
        self.echo_read(0, ram);

        self.t_echo_in = [self.echo_fir(0, 0), self.echo_fir(0, 1)];
    }

    fn echo_23(&mut self, ram: &[u8]) {
        for ch in 0..2 {
            self.t_echo_in[ch] += self.echo_fir(1, ch) + self.echo_fir(2, ch);
        }
        self.echo_read(1, ram);
    }

    fn echo_24(&mut self) {
        for ch in 0..2 {
            self.t_echo_in[ch] += self.echo_fir(3, ch) + self.echo_fir(4, ch) + self.echo_fir(5, ch);
        }
    }

    fn echo_25(&mut self) {
        for ch in 0..2 {
            let mut s = (self.t_echo_in[ch] + self.echo_fir(6, ch)) as i16 as i32;
            s += self.echo_fir(7, ch) as i16 as i32;
            self.t_echo_in[ch] = clamp16(s) & !1;
        }
    }

    fn echo_26(&mut self) {
        // left output is held until the right one is ready
        self.t_main_out[0] = self.echo_output(0);

        let efb = self.regs[reg::EFB] as i8 as i32;
        for ch in 0..2 {
            let s = self.t_echo_out[ch] + ((self.t_echo_in[ch] * efb) >> 7) as i16 as i32;
            self.t_echo_out[ch] = clamp16(s) & !1;
        }
    }

    fn echo_27(&mut self) {
        let mut l = self.t_main_out[0];
        let mut r = self.echo_output(1);
        self.t_main_out = [0; 2];

        if self.regs[reg::FLG] & FLG_MUTE != 0 {
            l = 0;
            r = 0;
        }
        self.out.push(l as i16);
        self.out.push(r as i16);
    }

    fn echo_28(&mut self) {
        self.t_echo_enabled = self.regs[reg::FLG] & FLG_ECHO_DISABLE == 0;
    }

    fn echo_29(&mut self, ram: &mut [u8]) {
        self.t_esa = self.regs[reg::ESA] as i32;

        if self.echo_offset == 0 {
            self.echo_length = (self.regs[reg::EDL] & 0x0F) as i32 * 0x800;
        }
        self.echo_offset += 4;
        if self.echo_offset >= self.echo_length {
            self.echo_offset = 0;
        }

        self.echo_write(0, ram);
        self.t_echo_enabled = self.regs[reg::FLG] & FLG_ECHO_DISABLE == 0;
    }

    fn echo_30(&mut self, ram: &mut [u8]) {
        self.echo_write(1, ram);
    }
}

impl Default for Dsp {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIR_PAGE: u8 = 0x02;
    const SAMPLE_ADDR: u16 = 0x0300;

    /// RAM with one looping square-wave BRR block at `SAMPLE_ADDR`.
    fn square_ram() -> Vec<u8> {
        let mut ram = vec![0u8; 0x10000];
        let dir = DIR_PAGE as usize * 0x100;
        ram[dir..dir + 2].copy_from_slice(&SAMPLE_ADDR.to_le_bytes());
        ram[dir + 2..dir + 4].copy_from_slice(&SAMPLE_ADDR.to_le_bytes());
        let s = SAMPLE_ADDR as usize;
        // shift 11, no filter, loop + end
        ram[s] = 0xB3;
        ram[s + 1..s + 5].fill(0x77);
        ram[s + 5..s + 9].fill(0x99);
        ram
    }

    fn keyed_regs(pitch: u16) -> [u8; REGISTER_COUNT] {
        let mut regs = [0u8; REGISTER_COUNT];
        regs[reg::MVOLL] = 0x7F;
        regs[reg::MVOLR] = 0x7F;
        regs[reg::FLG] = FLG_ECHO_DISABLE;
        regs[reg::DIR] = DIR_PAGE;
        regs[reg::KON] = 0x01;
        regs[voice_reg::VOLL] = 0x7F;
        regs[voice_reg::VOLR] = 0x7F;
        regs[voice_reg::PITCHL] = pitch as u8;
        regs[voice_reg::PITCHH] = (pitch >> 8) as u8;
        regs[voice_reg::GAIN] = 0x7F;
        regs
    }

    fn render(dsp: &mut Dsp, ram: &mut [u8], samples: usize) -> Vec<i16> {
        let mut out = vec![0i16; samples * 2];
        for _ in 0..samples * PHASES as usize {
            dsp.run(ram);
        }
        assert_eq!(dsp.take_samples(&mut out), samples * 2);
        out
    }

    #[test]
    fn test_one_sample_per_32_steps() {
        let mut dsp = Dsp::new();
        let mut ram = vec![0u8; 0x10000];
        for _ in 0..PHASES * 3 {
            dsp.run(&mut ram);
        }
        assert_eq!(dsp.pending(), 6);
        assert_eq!(dsp.phase(), 0);
    }

    #[test]
    fn test_power_on_is_silent() {
        let mut dsp = Dsp::new();
        let mut ram = square_ram();
        let out = render(&mut dsp, &mut ram, 256);
        assert!(out.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_keyed_voice_plays_square() {
        let mut dsp = Dsp::new();
        dsp.load(&keyed_regs(0x1000));
        let mut ram = square_ram();
        let out = render(&mut dsp, &mut ram, 2048);
        let peak = out.iter().map(|&s| (s as i32).abs()).max().unwrap_or(0);
        assert!(peak > 10_000, "peak {peak}");

        // 16 decoded samples per period at pitch $1000
        let left: Vec<i16> = out.chunks_exact(2).skip(64).map(|f| f[0]).collect();
        let crossings = left.windows(2).filter(|w| w[0] < 0 && w[1] >= 0).count();
        let expected = left.len() / 16;
        assert!(crossings.abs_diff(expected) <= 2, "{crossings} vs {expected}");
    }

    #[test]
    fn test_muted_channel_keeps_envelope() {
        let mut dsp = Dsp::new();
        dsp.load(&keyed_regs(0x1000));
        dsp.channel_enable(0, false);
        let mut ram = square_ram();
        let out = render(&mut dsp, &mut ram, 512);
        assert!(out.iter().all(|&s| s == 0));
        assert!(dsp.voices[0].env > 0);
        assert_eq!(dsp.voice_level(0), 0.0);

        dsp.channel_enable(0, true);
        let out = render(&mut dsp, &mut ram, 512);
        assert!(out.iter().any(|&s| s != 0));
        assert!(dsp.voice_level(0) > 0.9);
    }

    #[test]
    fn test_flg_mute_silences_output() {
        let mut regs = keyed_regs(0x1000);
        regs[reg::FLG] |= FLG_MUTE;
        let mut dsp = Dsp::new();
        dsp.load(&regs);
        let mut ram = square_ram();
        let out = render(&mut dsp, &mut ram, 512);
        assert!(out.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_endx_write_clears_register() {
        let mut dsp = Dsp::new();
        dsp.load(&keyed_regs(0x1000));
        let mut ram = square_ram();
        render(&mut dsp, &mut ram, 256);
        assert_ne!(dsp.read(reg::ENDX as u8) & 1, 0);
        dsp.write(reg::ENDX as u8, 0xFF);
        assert_eq!(dsp.read(reg::ENDX as u8), 0);
    }

    #[test]
    fn test_key_off_releases_voice() {
        let mut dsp = Dsp::new();
        dsp.load(&keyed_regs(0x1000));
        let mut ram = square_ram();
        render(&mut dsp, &mut ram, 64);
        dsp.write(reg::KOFF as u8, 0x01);
        // release falls 8 units per sample from 0x7F0
        render(&mut dsp, &mut ram, 300);
        assert_eq!(dsp.voices[0].env, 0);
        assert_eq!(dsp.voices[0].env_mode, EnvMode::Release);
    }

    #[test]
    fn test_echo_writes_buffer_when_enabled() {
        let mut regs = keyed_regs(0x1000);
        regs[reg::FLG] = 0;
        regs[reg::EON] = 0x01;
        regs[reg::ESA] = 0x80;
        regs[reg::EDL] = 0x01;
        let mut dsp = Dsp::new();
        dsp.load(&regs);
        let mut ram = square_ram();
        render(&mut dsp, &mut ram, 512);
        assert!(ram[0x8000..0x8800].iter().any(|&b| b != 0));
    }

    #[test]
    fn test_ram_is_untouched_with_echo_disabled() {
        let mut regs = keyed_regs(0x1000);
        regs[reg::EON] = 0x01;
        regs[reg::ESA] = 0x80;
        regs[reg::EDL] = 0x01;
        let mut dsp = Dsp::new();
        dsp.load(&regs);
        let mut ram = square_ram();
        render(&mut dsp, &mut ram, 512);
        assert!(ram[0x8000..0x8800].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_noise_lfsr_advances() {
        let mut regs = keyed_regs(0x1000);
        regs[reg::FLG] = FLG_ECHO_DISABLE | 0x1F;
        regs[reg::NON] = 0x01;
        let mut dsp = Dsp::new();
        dsp.load(&regs);
        let mut ram = square_ram();
        let start = dsp.noise;
        render(&mut dsp, &mut ram, 4);
        assert_ne!(dsp.noise, start);
    }
}
