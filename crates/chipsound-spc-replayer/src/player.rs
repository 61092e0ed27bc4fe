//! SPC and SFM drivers.
//!
//! Both run the same machine at the DSP's native 32 kHz. Output goes
//! through the high-pass/gain filter and, for any other rate, the
//! resampler.

use chipsound::filter::GAIN_UNIT;
use chipsound::{Interpolation, OutputFilter, Resampler};
use chipsound_common::{EmuCore, PlayerError, TrackInfo};
use log::debug;

use crate::dsp::{reg, FLG_ECHO_DISABLE, SAMPLE_RATE, VOICE_COUNT};
use crate::error::Result;
use crate::sfm::{self, SfmFile};
use crate::smp::{Psw, Smp, IPL_ROM_ADDR, RAM_SIZE};
use crate::spc_file::SpcFile;

/// Overall output gain.
pub const GAIN: f64 = 1.4;
/// Silence scan rate for SFM logs, which often start with long setup code.
pub const SFM_SILENCE_LOOKAHEAD: u32 = 30;
/// Initial silence limit for SFM logs.
pub const SFM_MAX_INITIAL_SILENCE_SECS: u32 = 30;

/// Samples played after a seek to flush the resampler.
const RESAMPLER_LATENCY: usize = 64;
/// Input buffer of 50 ms at the native rate.
const RESAMPLER_FRAMES: usize = SAMPLE_RATE as usize / 20;

const VOICE_NAMES: [&str; VOICE_COUNT] = [
    "DSP 1", "DSP 2", "DSP 3", "DSP 4", "DSP 5", "DSP 6", "DSP 7", "DSP 8",
];

/// Filter and optional rate conversion after the DSP.
struct SpcOutput {
    resampler: Resampler,
    filter: OutputFilter,
    resampling: bool,
    rate: u32,
    pitch: f64,
}

impl SpcOutput {
    fn new() -> Self {
        let mut filter = OutputFilter::new();
        filter.set_gain((GAIN * GAIN_UNIT as f64) as i32);
        Self {
            resampler: Resampler::new(Interpolation::default(), 2),
            filter,
            resampling: false,
            rate: SAMPLE_RATE,
            pitch: 1.0,
        }
    }

    fn set_sample_rate(&mut self, rate: u32) -> Result<()> {
        self.rate = rate;
        self.configure()
    }

    fn set_pitch(&mut self, pitch: f64) -> Result<()> {
        self.pitch = pitch;
        self.configure()
    }

    // Pitch is applied by reading the native stream faster or slower.
    fn configure(&mut self) -> Result<()> {
        self.resampling = self.rate != SAMPLE_RATE || self.pitch != 1.0;
        if self.resampling {
            self.resampler.resize_buffer(RESAMPLER_FRAMES)?;
            let wanted = SAMPLE_RATE as f64 * self.pitch / self.rate as f64;
            let ratio = self.resampler.set_rate(wanted)?;
            debug!(
                "spc: resampling {} Hz to {} Hz at pitch {:.3}, ratio {:.5}",
                SAMPLE_RATE, self.rate, self.pitch, ratio
            );
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.resampler.clear();
        self.filter.clear();
    }

    fn play(&mut self, smp: &mut Smp, out: &mut [i16]) {
        if !self.resampling {
            smp.render(out);
            self.filter.run(out);
            return;
        }

        let mut done = 0;
        while done < out.len() {
            done += self.resampler.read(&mut out[done..]);
            if done < out.len() {
                let n = self.resampler.max_write() & !1;
                let input = &mut self.resampler.buffer_mut()[..n];
                smp.render(input);
                self.filter.run(input);
                self.resampler.commit(n);
            }
        }
    }

    fn skip(&mut self, smp: &mut Smp, count: usize) {
        let mut count = count;
        if self.resampling {
            count = (count as f64 * self.resampler.ratio()) as usize & !1;
            count -= self.resampler.skip_input(count);
        }

        if count > 0 {
            smp.skip(count);
            self.filter.clear();
        }

        if self.resampling {
            let mut scratch = [0i16; RESAMPLER_LATENCY];
            self.play(smp, &mut scratch);
        }
    }
}

fn mute_channels(smp: &mut Smp, mask: u32) {
    for voice in 0..VOICE_COUNT {
        smp.dsp_mut().channel_enable(voice, mask & (1 << voice) == 0);
    }
}

fn voice_levels(smp: &Smp) -> Vec<f32> {
    (0..VOICE_COUNT).map(|v| smp.dsp().voice_level(v)).collect()
}

fn check_track(track: usize) -> chipsound_common::Result<()> {
    if track != 0 {
        return Err(PlayerError::NoSuchTrack { track, count: 1 });
    }
    Ok(())
}

/// SPC snapshot driver.
pub struct SpcPlayer {
    file: SpcFile,
    smp: Smp,
    output: SpcOutput,
}

impl SpcPlayer {
    /// Load an SPC image.
    pub fn new(data: &[u8]) -> Result<Self> {
        let file = SpcFile::parse(data)?;
        Ok(Self {
            file,
            smp: Smp::new(),
            output: SpcOutput::new(),
        })
    }

    /// The parsed file.
    pub fn file(&self) -> &SpcFile {
        &self.file
    }

    /// The emulated machine.
    pub fn smp(&self) -> &Smp {
        &self.smp
    }

    fn load_state(&mut self) {
        let file = &self.file;
        let smp = &mut self.smp;
        smp.reset();

        smp.regs.pc = file.registers.pc;
        smp.regs.a = file.registers.a;
        smp.regs.x = file.registers.x;
        smp.regs.y = file.registers.y;
        smp.regs.psw = Psw::from_bits_retain(file.registers.psw);
        smp.regs.sp = file.registers.sp;

        smp.ram.copy_from_slice(&file.ram);
        if let Some(extra) = &file.extra_ram {
            if file.ram[0xF1] & 0x80 != 0 {
                smp.ram[IPL_ROM_ADDR..RAM_SIZE].copy_from_slice(extra);
            }
        }

        // the CPU-side port values are whatever the snapshot holds
        let mut ports = [0u8; 4];
        ports.copy_from_slice(&file.ram[0xF4..0xF8]);
        smp.set_ports(ports);
        smp.ram[0xF4..0xF8].fill(0);

        for addr in [0xFC, 0xFB, 0xFA, 0xF9, 0xF8, 0xF2] {
            smp.bus_write(addr, file.ram[addr as usize]);
        }
        smp.bus_write(0xF1, file.ram[0xF1] & 0x87);
        for timer in 0..3 {
            smp.set_timer_output(timer, file.ram[0xFD + timer]);
        }

        smp.dsp.load(&file.dsp_registers);

        // echo writes are on, so the echo buffer would hold garbage
        let regs = &file.dsp_registers;
        if regs[reg::FLG] & FLG_ECHO_DISABLE == 0 {
            let start = regs[reg::ESA] as usize * 0x100;
            let end = (start + 0x800 * (regs[reg::EDL] & 0x0F) as usize).min(RAM_SIZE);
            smp.ram[start..end].fill(0xFF);
        }
    }
}

impl EmuCore for SpcPlayer {
    fn track_count(&self) -> usize {
        1
    }

    fn track_info(&self, track: usize) -> chipsound_common::Result<TrackInfo> {
        check_track(track)?;
        Ok(self.file.track_info())
    }

    fn set_sample_rate(&mut self, rate: u32) -> chipsound_common::Result<()> {
        self.smp.power();
        self.output.set_sample_rate(rate)?;
        Ok(())
    }

    fn start_track(&mut self, track: usize) -> chipsound_common::Result<()> {
        check_track(track)?;
        self.output.clear();
        self.load_state();
        Ok(())
    }

    fn play(&mut self, out: &mut [i16]) -> chipsound_common::Result<()> {
        self.output.play(&mut self.smp, out);
        Ok(())
    }

    fn skip(&mut self, count: usize) -> chipsound_common::Result<()> {
        self.output.skip(&mut self.smp, count);
        Ok(())
    }

    fn voice_names(&self) -> Vec<&'static str> {
        VOICE_NAMES.to_vec()
    }

    fn mute_voices(&mut self, mask: u32) {
        mute_channels(&mut self.smp, mask);
    }

    fn set_tempo(&mut self, tempo: f64) {
        self.smp.set_tempo(tempo);
    }

    fn set_pitch(&mut self, pitch: f64) {
        if let Err(err) = self.output.set_pitch(pitch) {
            log::warn!("spc: pitch {pitch} not applied: {err}");
        }
    }

    fn set_interpolation(&mut self, kind: Interpolation) {
        self.output.resampler.set_interpolation(kind);
    }

    fn voice_levels(&self) -> Vec<f32> {
        voice_levels(&self.smp)
    }
}

/// SFM state-and-log driver.
pub struct SfmPlayer {
    file: SfmFile,
    smp: Smp,
    output: SpcOutput,
}

impl SfmPlayer {
    /// Load an SFM image.
    pub fn new(data: &[u8]) -> Result<Self> {
        let file = SfmFile::parse(data)?;
        Ok(Self {
            file,
            smp: Smp::new(),
            output: SpcOutput::new(),
        })
    }

    /// The parsed file.
    pub fn file(&self) -> &SfmFile {
        &self.file
    }

    /// The emulated machine.
    pub fn smp(&self) -> &Smp {
        &self.smp
    }

    /// Replace the file's tags.
    pub fn set_track_info(&mut self, info: &TrackInfo) {
        self.file.set_track_info(info);
    }

    /// Encode the current machine state and the unplayed part of the port
    /// log as a new SFM file that resumes from this point.
    pub fn save(&self) -> Vec<u8> {
        sfm::save_state(&self.file.metadata, &self.smp)
    }
}

impl EmuCore for SfmPlayer {
    fn track_count(&self) -> usize {
        1
    }

    fn track_info(&self, track: usize) -> chipsound_common::Result<TrackInfo> {
        check_track(track)?;
        Ok(self.file.track_info())
    }

    fn set_sample_rate(&mut self, rate: u32) -> chipsound_common::Result<()> {
        self.smp.power();
        self.output.set_sample_rate(rate)?;
        Ok(())
    }

    fn start_track(&mut self, track: usize) -> chipsound_common::Result<()> {
        check_track(track)?;
        self.output.clear();
        self.file.restore(&mut self.smp);
        Ok(())
    }

    fn play(&mut self, out: &mut [i16]) -> chipsound_common::Result<()> {
        self.output.play(&mut self.smp, out);
        Ok(())
    }

    fn skip(&mut self, count: usize) -> chipsound_common::Result<()> {
        self.output.skip(&mut self.smp, count);
        Ok(())
    }

    fn voice_names(&self) -> Vec<&'static str> {
        VOICE_NAMES.to_vec()
    }

    fn mute_voices(&mut self, mask: u32) {
        mute_channels(&mut self.smp, mask);
    }

    fn set_tempo(&mut self, tempo: f64) {
        self.smp.set_tempo(tempo);
    }

    fn set_pitch(&mut self, pitch: f64) {
        if let Err(err) = self.output.set_pitch(pitch) {
            log::warn!("spc: pitch {pitch} not applied: {err}");
        }
    }

    fn set_interpolation(&mut self, kind: Interpolation) {
        self.output.resampler.set_interpolation(kind);
    }

    fn voice_levels(&self) -> Vec<f32> {
        voice_levels(&self.smp)
    }

    fn silence_lookahead(&self) -> u32 {
        SFM_SILENCE_LOOKAHEAD
    }

    fn max_initial_silence_secs(&self) -> u32 {
        SFM_MAX_INITIAL_SILENCE_SECS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spc_file::{DSP_OFFSET, MIN_FILE_SIZE, RAM_OFFSET, SIGNATURE};

    fn spc_image(program: &[u8], dsp: &[(usize, u8)]) -> Vec<u8> {
        let mut data = vec![0u8; MIN_FILE_SIZE];
        data[..27].copy_from_slice(SIGNATURE);
        data[0x25] = 0x00;
        data[0x26] = 0x02;
        data[0x2B] = 0xEF;
        data[RAM_OFFSET + 0x200..RAM_OFFSET + 0x200 + program.len()].copy_from_slice(program);
        data[DSP_OFFSET + reg::FLG] = FLG_ECHO_DISABLE;
        for &(addr, value) in dsp {
            data[DSP_OFFSET + addr] = value;
        }
        data
    }

    #[test]
    fn test_start_track_restores_registers_and_io() {
        let mut data = spc_image(&[0x2F, 0xFE], &[]);
        data[0x27] = 0x11;
        data[0x2A] = 0x02;
        data[RAM_OFFSET + 0xF4] = 0xAB;
        data[RAM_OFFSET + 0xF2] = 0x4C;
        data[RAM_OFFSET + 0xFA] = 0x20;
        data[RAM_OFFSET + 0xFD] = 0x13;
        data[RAM_OFFSET + 0xF1] = 0x31;

        let mut player = SpcPlayer::new(&data).unwrap();
        player.set_sample_rate(32_000).unwrap();
        player.start_track(0).unwrap();

        let smp = player.smp();
        assert_eq!(smp.regs.pc, 0x0200);
        assert_eq!(smp.regs.a, 0x11);
        assert_eq!(smp.regs.psw, Psw::Z);
        assert_eq!(smp.ports(), [0xAB, 0, 0, 0]);
        assert_eq!(smp.ram()[0xF4], 0);
        assert_eq!(smp.status().dsp_addr, 0x4C);
        assert!(!smp.status().iplrom_enable);
        assert_eq!(smp.timers()[0].target, 0x20);
        assert!(smp.timers()[0].enable);
        assert_eq!(smp.timers()[0].stage3, 0x03);
    }

    #[test]
    fn test_echo_region_cleared_when_writes_enabled() {
        let data = spc_image(
            &[0x2F, 0xFE],
            &[(reg::FLG, 0), (reg::ESA, 0x80), (reg::EDL, 0x02)],
        );
        let mut player = SpcPlayer::new(&data).unwrap();
        player.set_sample_rate(32_000).unwrap();
        player.start_track(0).unwrap();
        let ram = player.smp().ram();
        assert!(ram[0x8000..0x9000].iter().all(|&b| b == 0xFF));
        assert_eq!(ram[0x9000], 0);
        assert_eq!(ram[0x7FFF], 0);
    }

    #[test]
    fn test_echo_region_kept_when_writes_disabled() {
        let data = spc_image(&[0x2F, 0xFE], &[(reg::ESA, 0x80), (reg::EDL, 0x02)]);
        let mut player = SpcPlayer::new(&data).unwrap();
        player.set_sample_rate(32_000).unwrap();
        player.start_track(0).unwrap();
        assert_eq!(player.smp().ram()[0x8000], 0);
    }

    #[test]
    fn test_ipl_shadow_restored_when_rom_enabled() {
        let mut data = spc_image(&[0x2F, 0xFE], &[]);
        data[RAM_OFFSET + 0xF1] = 0x80;
        data.resize(0x10200, 0);
        data[0x101C0] = 0x5A;
        let mut player = SpcPlayer::new(&data).unwrap();
        player.set_sample_rate(32_000).unwrap();
        player.start_track(0).unwrap();
        assert_eq!(player.smp().ram()[0xFFC0], 0x5A);
    }

    #[test]
    fn test_only_track_zero_exists() {
        let mut player = SpcPlayer::new(&spc_image(&[0x2F, 0xFE], &[])).unwrap();
        assert!(matches!(
            player.start_track(1),
            Err(PlayerError::NoSuchTrack { track: 1, count: 1 })
        ));
        assert!(player.track_info(0).is_ok());
    }

    #[test]
    fn test_resampled_play_fills_buffer() {
        let mut player = SpcPlayer::new(&spc_image(&[0x2F, 0xFE], &[])).unwrap();
        player.set_sample_rate(44_100).unwrap();
        player.start_track(0).unwrap();
        let mut out = vec![1i16; 4410];
        player.play(&mut out).unwrap();
        assert!(out.iter().all(|&s| s == 0));
        player.skip(44_100).unwrap();
        player.play(&mut out).unwrap();
    }

    #[test]
    fn test_voice_names_and_mute() {
        let mut player = SpcPlayer::new(&spc_image(&[0x2F, 0xFE], &[])).unwrap();
        assert_eq!(player.voice_names()[0], "DSP 1");
        assert_eq!(player.voice_names().len(), 8);
        player.mute_voices(0xFF);
        assert_eq!(player.voice_levels(), vec![0.0; 8]);
    }
}
