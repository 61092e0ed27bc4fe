//! Nintendo MMC5 expansion sound: two 2A03-style pulse voices mapped at
//! `$5000` plus an 8-bit PCM DAC at `$5011`.

use super::nes_apu::NesApu;
use super::{SoundChip, VoiceOutput};
use crate::blip_buffer::{BlipBuffer, BlipEq, BlipSynth, BlipTime, QUALITY_MEDIUM};

/// First MMC5 sound register.
pub const REGS_ADDR: u16 = 0x5000;
/// Last MMC5 sound register.
pub const REGS_END: u16 = 0x5015;

const VOICE_NAMES: [&str; 3] = ["Square 3", "Square 4", "PCM"];

/// MMC5 sound hardware.
#[derive(Debug, Clone)]
pub struct Mmc5 {
    apu: NesApu,
    pcm_synth: BlipSynth,
    pcm_output: VoiceOutput,
    pcm_amp: i32,
    pcm_last_amp: i32,
    pcm_read_mode: bool,
}

impl Mmc5 {
    /// Create a silent chip at nominal volume.
    pub fn new() -> Self {
        let mut chip = Self {
            apu: NesApu::new(),
            pcm_synth: BlipSynth::new(QUALITY_MEDIUM, 255),
            pcm_output: VoiceOutput::default(),
            pcm_amp: 0,
            pcm_last_amp: 0,
            pcm_read_mode: false,
        };
        chip.set_volume(1.0);
        chip
    }

    fn set_pcm(&mut self, out: &mut [BlipBuffer], time: BlipTime, amp: i32) {
        self.pcm_amp = amp;
        match self.pcm_output.target() {
            Some(index) => {
                let delta = amp - self.pcm_last_amp;
                if delta != 0 {
                    self.pcm_synth.offset(time, delta, &mut out[index]);
                }
                self.pcm_last_amp = amp;
            }
            None => self.pcm_last_amp = 0,
        }
    }
}

impl Default for Mmc5 {
    fn default() -> Self {
        Self::new()
    }
}

impl SoundChip for Mmc5 {
    fn voice_count(&self) -> usize {
        VOICE_NAMES.len()
    }

    fn voice_names(&self) -> &'static [&'static str] {
        &VOICE_NAMES
    }

    fn reset(&mut self) {
        self.apu.reset();
        self.pcm_amp = 0;
        self.pcm_last_amp = 0;
        self.pcm_read_mode = false;
    }

    fn set_voice_output(&mut self, voice: usize, output: Option<usize>) {
        match voice {
            0 | 1 => self.apu.set_voice_output(voice, output),
            2 => self.pcm_output.buffer = output,
            _ => {}
        }
    }

    fn mute_voices(&mut self, mask: u32) {
        self.apu.mute_voices(mask & 0x03 | !0x03);
        let was_muted = self.pcm_output.muted;
        self.pcm_output.muted = mask & 0x04 != 0;
        if was_muted && !self.pcm_output.muted {
            self.pcm_last_amp = 0;
        }
    }

    fn set_volume(&mut self, volume: f64) {
        self.apu.set_volume(volume);
        self.pcm_synth.set_volume_unit(0.125 / 255.0 * volume);
    }

    fn set_treble_eq(&mut self, eq: BlipEq) {
        self.apu.set_treble_eq(eq);
        self.pcm_synth.set_treble_eq(eq);
    }

    fn write(&mut self, out: &mut [BlipBuffer], time: BlipTime, addr: u16, data: u8) {
        match addr {
            0x5000..=0x5007 => self.apu.write(out, time, addr - REGS_ADDR + 0x4000, data),
            0x5010 => self.pcm_read_mode = data & 0x01 != 0,
            0x5011 => {
                // zero is ignored by the DAC
                if !self.pcm_read_mode && data != 0 {
                    self.apu.run_until(out, time);
                    self.set_pcm(out, time, data as i32);
                }
            }
            0x5015 => self.apu.write(out, time, 0x4015, data & 0x03),
            _ => {}
        }
    }

    fn end_frame(&mut self, out: &mut [BlipBuffer], time: BlipTime) {
        self.apu.end_frame(out, time);
        if self.pcm_output.target().is_some() && self.pcm_last_amp != self.pcm_amp {
            self.set_pcm(out, time, self.pcm_amp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pulse_maps_to_apu() {
        let mut buf = BlipBuffer::new();
        buf.set_sample_rate(44_100, 200).unwrap();
        buf.set_clock_rate(1_789_772.727);
        let mut out = [buf];

        let mut chip = Mmc5::new();
        chip.set_output(Some(0));
        chip.write(&mut out, 0, 0x5015, 0x01);
        chip.write(&mut out, 0, 0x5000, 0xBF);
        chip.write(&mut out, 0, 0x5002, 0x80);
        chip.write(&mut out, 0, 0x5003, 0x00);
        chip.write(&mut out, 100, 0x5011, 0x80);
        chip.end_frame(&mut out, 20_000);
        out[0].end_frame(20_000);
        assert!(out[0].samples_avail() > 0);
        let mut samples = vec![0i16; out[0].samples_avail()];
        out[0].read_samples(&mut samples, false);
        assert!(samples.iter().any(|&s| s != 0));
        assert_eq!(chip.pcm_amp, 0x80);
    }
}
