//! Konami VRC6 expansion sound: two pulse voices with 16-step duty and a
//! sawtooth accumulator.

use super::{emit, SoundChip, VoiceOutput};
use crate::blip_buffer::{BlipBuffer, BlipEq, BlipSynth, BlipTime, QUALITY_MEDIUM};

/// First register of the first pulse voice.
pub const BASE_ADDR: u16 = 0x9000;
/// Address distance between voices.
pub const ADDR_STEP: u16 = 0x1000;

const VOICE_NAMES: [&str; 3] = ["Square 1", "Square 2", "Saw"];

#[derive(Debug, Clone, Default)]
struct Osc {
    regs: [u8; 3],
    output: VoiceOutput,
    delay: BlipTime,
    last_amp: i32,
    phase: i32,
    amp: i32,
}

impl Osc {
    fn period(&self) -> i32 {
        (self.regs[2] as i32 & 0x0F) * 0x100 + self.regs[1] as i32 + 1
    }

    fn enabled(&self) -> bool {
        self.regs[2] & 0x80 != 0
    }
}

/// VRC6 sound hardware.
#[derive(Debug, Clone)]
pub struct Vrc6 {
    oscs: [Osc; 3],
    last_time: BlipTime,
    square_synth: BlipSynth,
    saw_synth: BlipSynth,
}

impl Vrc6 {
    /// Create a silent chip at nominal volume.
    pub fn new() -> Self {
        let mut chip = Self {
            oscs: Default::default(),
            last_time: 0,
            square_synth: BlipSynth::new(QUALITY_MEDIUM, 15),
            saw_synth: BlipSynth::new(QUALITY_MEDIUM, 31),
        };
        chip.set_volume(1.0);
        chip.reset();
        chip
    }

    fn run_until(&mut self, out: &mut [BlipBuffer], time: BlipTime) {
        if time <= self.last_time {
            return;
        }
        let start = self.last_time;
        let (squares, saw) = self.oscs.split_at_mut(2);
        for osc in squares {
            run_square(osc, &self.square_synth, out, start, time);
        }
        run_saw(&mut saw[0], &self.saw_synth, out, start, time);
        self.last_time = time;
    }
}

impl Default for Vrc6 {
    fn default() -> Self {
        Self::new()
    }
}

fn run_square(osc: &mut Osc, synth: &BlipSynth, out: &mut [BlipBuffer], start: BlipTime, end_time: BlipTime) {
    let target = osc.output.target();
    let volume = if osc.enabled() { osc.regs[0] as i32 & 15 } else { 0 };
    let gate = osc.regs[0] & 0x80 != 0;
    let duty = ((osc.regs[0] >> 4) & 7) as i32 + 1;

    let amp = if gate || osc.phase < duty { volume } else { 0 };
    if target.is_some() {
        emit(synth, out, target, start, amp - osc.last_amp);
        osc.last_amp = amp;
    } else {
        osc.last_amp = 0;
    }

    let mut time = start + osc.delay;
    osc.delay = 0;
    let period = osc.period();
    if volume != 0 && !gate && period > 4 {
        if time < end_time {
            let mut phase = osc.phase;
            loop {
                phase += 1;
                if phase == 16 {
                    phase = 0;
                    emit(synth, out, target, time, volume);
                } else if phase == duty {
                    emit(synth, out, target, time, -volume);
                }
                time += period;
                if time >= end_time {
                    break;
                }
            }
            osc.phase = phase;
            if target.is_some() {
                osc.last_amp = if phase < duty { volume } else { 0 };
            }
        }
        osc.delay = time - end_time;
    }
}

fn run_saw(osc: &mut Osc, synth: &BlipSynth, out: &mut [BlipBuffer], start: BlipTime, end_time: BlipTime) {
    let target = osc.output.target();
    let amp_step = osc.regs[0] as i32 & 0x3F;
    let mut last_amp = if target.is_some() { osc.last_amp } else { 0 };
    let mut amp = osc.amp;

    if !osc.enabled() || (amp_step | amp) == 0 {
        osc.delay = 0;
        let level = amp >> 3;
        emit(synth, out, target, start, level - last_amp);
        if target.is_some() {
            last_amp = level;
        }
    } else {
        let mut time = start + osc.delay;
        if time < end_time {
            let period = osc.period() * 2;
            let mut phase = osc.phase;
            loop {
                phase -= 1;
                if phase == 0 {
                    phase = 7;
                    amp = 0;
                }
                let level = amp >> 3;
                if target.is_some() && level != last_amp {
                    emit(synth, out, target, time, level - last_amp);
                    last_amp = level;
                }
                time += period;
                amp = (amp + amp_step) & 0xFF;
                if time >= end_time {
                    break;
                }
            }
            osc.phase = phase;
            osc.amp = amp;
        }
        osc.delay = time - end_time;
    }
    osc.last_amp = last_amp;
}

impl SoundChip for Vrc6 {
    fn voice_count(&self) -> usize {
        VOICE_NAMES.len()
    }

    fn voice_names(&self) -> &'static [&'static str] {
        &VOICE_NAMES
    }

    fn reset(&mut self) {
        self.last_time = 0;
        for osc in &mut self.oscs {
            *osc = Osc {
                output: osc.output,
                phase: 1,
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
        let factor = 0.0967 * 2.0;
        self.saw_synth.set_volume_unit(factor / 31.0 * volume);
        self.square_synth.set_volume_unit(factor * 0.5 / 15.0 * volume);
    }

    fn set_treble_eq(&mut self, eq: BlipEq) {
        self.square_synth.set_treble_eq(eq);
        self.saw_synth.set_treble_eq(eq);
    }

    /// `addr` is the CPU address, `$9000..=$B002`.
    fn write(&mut self, out: &mut [BlipBuffer], time: BlipTime, addr: u16, data: u8) {
        let Some(offset) = addr.checked_sub(BASE_ADDR) else {
            return;
        };
        let index = (offset / ADDR_STEP) as usize;
        let reg = (offset & 0x0FFF) as usize;
        if index >= self.oscs.len() || reg >= 3 {
            return;
        }
        self.run_until(out, time);
        self.oscs[index].regs[reg] = data;
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

    #[test]
    fn test_square_duty_cycle() {
        let mut out = [buffer()];
        let mut chip = Vrc6::new();
        chip.set_output(Some(0));
        // duty 8/16, volume 15, period 0x100
        chip.write(&mut out, 0, 0x9000, 0x7F);
        chip.write(&mut out, 0, 0x9001, 0xFF);
        chip.write(&mut out, 0, 0x9002, 0x80);
        chip.end_frame(&mut out, 30_000);
        out[0].end_frame(30_000);

        let mut samples = vec![0i16; out[0].samples_avail()];
        out[0].read_samples(&mut samples, false);
        let tail = &samples[100..];
        let high = tail.iter().filter(|&&s| s > 0).count();
        let ratio = high as f64 / tail.len() as f64;
        assert!((0.4..0.6).contains(&ratio), "{ratio}");
    }

    #[test]
    fn test_saw_phase_runs_while_muted() {
        let run = |muted: bool| {
            let mut out = [buffer()];
            let mut chip = Vrc6::new();
            chip.set_output(Some(0));
            chip.mute_voices(if muted { 0x04 } else { 0 });
            chip.write(&mut out, 0, 0xB000, 0x2A);
            chip.write(&mut out, 0, 0xB001, 0x40);
            chip.write(&mut out, 0, 0xB002, 0x81);
            chip.end_frame(&mut out, 12_345);
            (chip.oscs[2].phase, chip.oscs[2].amp, chip.oscs[2].delay)
        };
        assert_eq!(run(true), run(false));
    }

    #[test]
    fn test_ignores_unmapped_registers() {
        let mut out = [buffer()];
        let mut chip = Vrc6::new();
        chip.write(&mut out, 0, 0x9003, 0xFF);
        chip.write(&mut out, 0, 0xC000, 0xFF);
        assert!(chip.oscs.iter().all(|o| o.regs == [0; 3]));
    }
}
