//! Konami VRC7: a cut-down YM2413 (OPLL) with six two-operator FM channels
//! and a built-in set of fifteen instruments plus one user patch.
//!
//! The FM core produces one sample every 36 CPU clocks (about 49.7 kHz on
//! NTSC); each sample's change per channel is emitted as a band-limited
//! delta. Operators work in the log domain like the hardware: a quarter-wave
//! log-sine table feeds an exponent table, and attenuation is added before
//! the exponent lookup. Both tables are built once per process.

use std::sync::OnceLock;

use super::{emit, SoundChip, VoiceOutput};
use crate::blip_buffer::{BlipBuffer, BlipEq, BlipSynth, BlipTime, QUALITY_MEDIUM};

/// Register select port.
pub const ADDR_REG: u16 = 0x9010;
/// Register data port.
pub const DATA_REG: u16 = 0x9030;
/// CPU clocks per FM sample.
pub const CLOCKS_PER_SAMPLE: BlipTime = 36;

const CHANNEL_COUNT: usize = 6;
const VOICE_NAMES: [&str; CHANNEL_COUNT] = ["FM 1", "FM 2", "FM 3", "FM 4", "FM 5", "FM 6"];
const OUTPUT_RANGE: i32 = 4095;

const ENV_MAX: u32 = 127;
const ENV_OFF_THRESHOLD: u32 = 124;

// Instrument ROM, eight bytes per patch in register order
const PATCH_ROM: [[u8; 8]; 15] = [
    [0x03, 0x21, 0x05, 0x06, 0xE8, 0x81, 0x42, 0x27],
    [0x13, 0x41, 0x14, 0x0D, 0xD8, 0xF6, 0x23, 0x12],
    [0x11, 0x11, 0x08, 0x08, 0xFA, 0xB2, 0x20, 0x12],
    [0x31, 0x61, 0x0C, 0x07, 0xA8, 0x64, 0x61, 0x27],
    [0x32, 0x21, 0x1E, 0x06, 0xE1, 0x76, 0x01, 0x28],
    [0x02, 0x01, 0x06, 0x00, 0xA3, 0xE2, 0xF4, 0xF4],
    [0x21, 0x61, 0x1D, 0x07, 0x82, 0x81, 0x11, 0x07],
    [0x23, 0x21, 0x22, 0x17, 0xA2, 0x72, 0x01, 0x17],
    [0x35, 0x11, 0x25, 0x00, 0x40, 0x73, 0x72, 0x01],
    [0xB5, 0x01, 0x0F, 0x0F, 0xA8, 0xA5, 0x51, 0x02],
    [0x17, 0xC1, 0x24, 0x07, 0xF8, 0xF8, 0x22, 0x12],
    [0x71, 0x23, 0x11, 0x06, 0x65, 0x74, 0x18, 0x16],
    [0x01, 0x02, 0xD3, 0x05, 0xC9, 0x95, 0x03, 0x02],
    [0x61, 0x63, 0x0C, 0x00, 0x94, 0xC0, 0x33, 0xF6],
    [0x21, 0x72, 0x0D, 0x00, 0xC1, 0xD5, 0x56, 0x06],
];

// Frequency multipliers times two
const MULTIPLIERS: [u32; 16] = [1, 2, 4, 6, 8, 10, 12, 14, 16, 18, 20, 20, 24, 24, 30, 30];

// Key scale level at block 7, in envelope units (0.375 dB)
const KSL_TABLE: [i32; 16] = [0, 24, 32, 37, 40, 43, 45, 47, 48, 50, 51, 52, 53, 54, 55, 56];

// Envelope increments for the four fine rates over an eight-step cycle
const EG_STEPS: [[u32; 8]; 4] = [
    [0, 1, 0, 1, 0, 1, 0, 1],
    [0, 1, 0, 1, 1, 1, 0, 1],
    [0, 1, 1, 1, 0, 1, 1, 1],
    [0, 1, 1, 1, 1, 1, 1, 1],
];

const VIBRATO: [i32; 8] = [0, 1, 2, 1, 0, -1, -2, -1];
const TREMOLO_DEPTH: u32 = 13;

struct Tables {
    log_sin: [u32; 256],
    exp: [u32; 256],
}

impl Tables {
    fn build() -> Self {
        let mut log_sin = [0u32; 256];
        let mut exp = [0u32; 256];
        for i in 0..256 {
            let angle = (i as f64 + 0.5) * std::f64::consts::PI / 512.0;
            log_sin[i] = (-angle.sin().log2() * 256.0).round() as u32;
            exp[i] = ((4096.0 * (-(i as f64) / 256.0).exp2()).round() as u32).min(4095);
        }
        Self { log_sin, exp }
    }
}

fn tables() -> &'static Tables {
    static TABLES: OnceLock<Tables> = OnceLock::new();
    TABLES.get_or_init(Tables::build)
}

/// One sine lookup at 10-bit `phase` with `atten` in envelope units.
fn operator_output(phase: i32, atten: u32, rectify: bool) -> i32 {
    let tables = tables();
    let phase = (phase & 0x3FF) as usize;
    let negative = phase & 0x200 != 0;
    if negative && rectify {
        return 0;
    }
    let index = if phase & 0x100 != 0 { 0xFF - (phase & 0xFF) } else { phase & 0xFF };
    let level = tables.log_sin[index] + (atten.min(ENV_MAX) << 4);
    let shift = level >> 8;
    if shift >= 12 {
        return 0;
    }
    let magnitude = (tables.exp[(level & 0xFF) as usize] >> shift) as i32;
    if negative {
        -magnitude
    } else {
        magnitude
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum EnvState {
    Attack,
    Decay,
    Sustain,
    Release,
    #[default]
    Off,
}

#[derive(Debug, Clone, Copy)]
struct Operator {
    phase: u32,
    env: u32,
    state: EnvState,
}

impl Default for Operator {
    fn default() -> Self {
        Self {
            phase: 0,
            env: ENV_MAX,
            state: EnvState::Off,
        }
    }
}

/// Decoded parameters of one operator of a patch.
#[derive(Debug, Clone, Copy)]
struct OpParams {
    tremolo: bool,
    vibrato: bool,
    sustained: bool,
    key_scale_rate: bool,
    multiplier: u32,
    key_scale_level: u8,
    attack: u8,
    decay: u8,
    sustain_level: u32,
    release: u8,
}

impl OpParams {
    fn decode(patch: &[u8; 8], op: usize) -> Self {
        let flags = patch[op];
        let ksl = if op == 0 { patch[2] >> 6 } else { patch[3] >> 6 };
        Self {
            tremolo: flags & 0x80 != 0,
            vibrato: flags & 0x40 != 0,
            sustained: flags & 0x20 != 0,
            key_scale_rate: flags & 0x10 != 0,
            multiplier: MULTIPLIERS[(flags & 0x0F) as usize],
            key_scale_level: ksl,
            attack: patch[4 + op] >> 4,
            decay: patch[4 + op] & 0x0F,
            sustain_level: ((patch[6 + op] >> 4) as u32 * 8).min(ENV_MAX),
            release: patch[6 + op] & 0x0F,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Channel {
    fnum: u32,
    block: u32,
    key: bool,
    sustain: bool,
    instrument: usize,
    volume: u32,
    ops: [Operator; 2],
    feedback: [i32; 2],
    output: VoiceOutput,
    last_amp: i32,
}

impl Channel {
    fn key_on(&mut self) {
        for op in &mut self.ops {
            op.state = EnvState::Attack;
            op.phase = 0;
        }
    }

    fn key_off(&mut self) {
        for op in &mut self.ops {
            if op.state != EnvState::Off {
                op.state = EnvState::Release;
            }
        }
    }

    fn key_scale_level(&self, ksl: u8) -> u32 {
        if ksl == 0 {
            return 0;
        }
        let base = KSL_TABLE[(self.fnum >> 5) as usize & 15] - ((7 - self.block as i32) << 4);
        if base <= 0 {
            return 0;
        }
        // 1.5, 3 and 6 dB per octave
        (base >> (3 - ksl as i32)) as u32
    }
}

/// VRC7 sound hardware.
#[derive(Debug, Clone)]
pub struct Vrc7 {
    addr: u8,
    custom: [u8; 8],
    channels: [Channel; CHANNEL_COUNT],
    eg_counter: u32,
    lfo_counter: u32,
    next_time: BlipTime,
    synth: BlipSynth,
}

impl Vrc7 {
    /// Create a silent chip at nominal volume.
    pub fn new() -> Self {
        let mut chip = Self {
            addr: 0,
            custom: [0; 8],
            channels: Default::default(),
            eg_counter: 0,
            lfo_counter: 0,
            next_time: 0,
            synth: BlipSynth::new(QUALITY_MEDIUM, OUTPUT_RANGE),
        };
        chip.set_volume(1.0);
        chip
    }

    fn patch(&self, instrument: usize) -> [u8; 8] {
        match instrument {
            0 => self.custom,
            n => PATCH_ROM[n - 1],
        }
    }

    fn write_reg(&mut self, reg: u8, data: u8) {
        match reg {
            0x00..=0x07 => self.custom[reg as usize] = data,
            0x10..=0x15 => {
                let ch = &mut self.channels[(reg & 0x0F) as usize];
                ch.fnum = (ch.fnum & 0x100) | data as u32;
            }
            0x20..=0x25 => {
                let ch = &mut self.channels[(reg & 0x0F) as usize];
                ch.fnum = (ch.fnum & 0xFF) | ((data as u32 & 1) << 8);
                ch.block = (data as u32 >> 1) & 7;
                ch.sustain = data & 0x20 != 0;
                let key = data & 0x10 != 0;
                if key && !ch.key {
                    ch.key_on();
                } else if !key && ch.key {
                    ch.key_off();
                }
                ch.key = key;
            }
            0x30..=0x35 => {
                let ch = &mut self.channels[(reg & 0x0F) as usize];
                ch.instrument = (data >> 4) as usize;
                ch.volume = (data & 0x0F) as u32;
            }
            _ => {}
        }
    }

    fn run_until(&mut self, out: &mut [BlipBuffer], end_time: BlipTime) {
        while self.next_time < end_time {
            self.clock_sample(out, self.next_time);
            self.next_time += CLOCKS_PER_SAMPLE;
        }
    }

    fn clock_sample(&mut self, out: &mut [BlipBuffer], time: BlipTime) {
        self.eg_counter = self.eg_counter.wrapping_add(1);
        self.lfo_counter = self.lfo_counter.wrapping_add(1);

        let tremolo = {
            let step = (self.lfo_counter >> 6) % (TREMOLO_DEPTH * 4);
            if step < TREMOLO_DEPTH * 2 {
                step / 2
            } else {
                (TREMOLO_DEPTH * 4 - step) / 2
            }
        };
        let vibrato = VIBRATO[((self.lfo_counter >> 10) & 7) as usize];

        for index in 0..CHANNEL_COUNT {
            let patch = self.patch(self.channels[index].instrument);
            let eg_counter = self.eg_counter;
            let ch = &mut self.channels[index];
            let amp = clock_channel(ch, &patch, eg_counter, tremolo, vibrato);

            let target = ch.output.target();
            if target.is_some() {
                emit(&self.synth, out, target, time, amp - ch.last_amp);
                ch.last_amp = amp;
            } else {
                ch.last_amp = 0;
            }
        }
    }
}

impl Default for Vrc7 {
    fn default() -> Self {
        Self::new()
    }
}

fn envelope_step(rate: u32, counter: u32) -> u32 {
    if rate < 4 {
        return 0;
    }
    let coarse = rate >> 2;
    let fine = (rate & 3) as usize;
    if coarse < 12 {
        let shift = 12 - coarse;
        if counter & ((1 << shift) - 1) != 0 {
            0
        } else {
            EG_STEPS[fine][((counter >> shift) & 7) as usize]
        }
    } else {
        EG_STEPS[fine][(counter & 7) as usize] << (coarse - 12)
    }
}

fn clock_envelope(op: &mut Operator, params: &OpParams, ch_sustain: bool, rks: u32, counter: u32) {
    let reg_rate = match op.state {
        EnvState::Attack => params.attack as u32,
        EnvState::Decay => params.decay as u32,
        EnvState::Sustain if params.sustained => 0,
        EnvState::Sustain => params.release as u32,
        EnvState::Release if ch_sustain => 5,
        EnvState::Release => params.release as u32,
        EnvState::Off => return,
    };
    let rate = if reg_rate == 0 { 0 } else { (reg_rate * 4 + rks).min(63) };
    let inc = envelope_step(rate, counter);

    match op.state {
        EnvState::Attack => {
            if rate >= 60 {
                op.env = 0;
            } else {
                op.env -= ((op.env * inc + 7) >> 3).min(op.env);
            }
            if op.env == 0 {
                op.state = EnvState::Decay;
            }
        }
        EnvState::Decay => {
            op.env = (op.env + inc).min(ENV_MAX);
            if op.env >= params.sustain_level {
                op.env = params.sustain_level;
                op.state = EnvState::Sustain;
            }
        }
        EnvState::Sustain | EnvState::Release => {
            op.env = (op.env + inc).min(ENV_MAX);
            if op.env >= ENV_OFF_THRESHOLD {
                op.env = ENV_MAX;
                op.state = EnvState::Off;
            }
        }
        EnvState::Off => {}
    }
}

fn clock_channel(ch: &mut Channel, patch: &[u8; 8], counter: u32, tremolo: u32, vibrato: i32) -> i32 {
    let mut outputs = [0i32; 2];
    let feedback_shift = patch[3] & 7;

    for op_index in 0..2 {
        let params = OpParams::decode(patch, op_index);

        let mut fnum = ch.fnum as i32;
        if params.vibrato {
            fnum += (vibrato * (fnum >> 6)) >> 1;
        }
        let inc = ((fnum.max(0) as u32) << ch.block) * params.multiplier >> 1;
        let rks_shift = if params.key_scale_rate { 0 } else { 2 };
        let rks = ((ch.block << 1) | (ch.fnum >> 8)) >> rks_shift;
        let ksl = ch.key_scale_level(params.key_scale_level);

        let op = &mut ch.ops[op_index];
        op.phase = (op.phase + inc) & 0x7FFFF;
        clock_envelope(op, &params, ch.sustain, rks, counter);
        if op.state == EnvState::Off {
            continue;
        }

        let mut atten = op.env + ksl;
        if params.tremolo {
            atten += tremolo;
        }
        let phase = (op.phase >> 9) as i32;
        outputs[op_index] = if op_index == 0 {
            atten += (patch[2] as u32 & 0x3F) << 1;
            let fb = if feedback_shift != 0 {
                (ch.feedback[0] + ch.feedback[1]) >> (9 - feedback_shift)
            } else {
                0
            };
            operator_output(phase + fb, atten, patch[3] & 0x08 != 0)
        } else {
            atten += ch.volume << 3;
            operator_output(phase + outputs[0], atten, patch[3] & 0x10 != 0)
        };
    }

    ch.feedback = [ch.feedback[1], outputs[0]];
    outputs[1]
}

impl SoundChip for Vrc7 {
    fn voice_count(&self) -> usize {
        CHANNEL_COUNT
    }

    fn voice_names(&self) -> &'static [&'static str] {
        &VOICE_NAMES
    }

    fn reset(&mut self) {
        self.addr = 0;
        self.custom = [0; 8];
        self.eg_counter = 0;
        self.lfo_counter = 0;
        self.next_time = 0;
        for ch in &mut self.channels {
            *ch = Channel {
                output: ch.output,
                ..Channel::default()
            };
        }
    }

    fn set_voice_output(&mut self, voice: usize, output: Option<usize>) {
        if let Some(ch) = self.channels.get_mut(voice) {
            ch.output.buffer = output;
        }
    }

    fn mute_voices(&mut self, mask: u32) {
        for (i, ch) in self.channels.iter_mut().enumerate() {
            ch.output.muted = (mask >> i) & 1 != 0;
        }
    }

    fn set_volume(&mut self, volume: f64) {
        self.synth.set_volume_unit(0.5 / CHANNEL_COUNT as f64 / OUTPUT_RANGE as f64 * volume);
    }

    fn set_treble_eq(&mut self, eq: BlipEq) {
        self.synth.set_treble_eq(eq);
    }

    fn write(&mut self, out: &mut [BlipBuffer], time: BlipTime, addr: u16, data: u8) {
        match addr & 0xF030 {
            0x9010 => self.addr = data,
            0x9030 => {
                self.run_until(out, time);
                self.write_reg(self.addr, data);
            }
            _ => {}
        }
    }

    fn end_frame(&mut self, out: &mut [BlipBuffer], time: BlipTime) {
        self.run_until(out, time);
        self.next_time -= time;
    }
}
