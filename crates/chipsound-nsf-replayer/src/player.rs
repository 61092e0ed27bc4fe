//! NSF driver: schedules init and play calls on the 6502 and runs the
//! sound hardware in fixed frames.

use chipsound::stereo_buffer::CENTER;
use chipsound::BlipEq;
use chipsound_common::{EmuCore, Equalizer, PlayerError, TrackInfo};

use crate::cpu::{Cpu, Registers};
use crate::error::{NsfError, Result};
use crate::header::{NsfHeader, HEADER_SIZE, ROM_ADDR};
use crate::machine::{
    Expansions, NsfMachine, Rom, BANK_COUNT, BANK_SIZE, FDS_BANKS, IDLE_ADDR, SRAM_ADDR,
};

/// Number of play periods before play may interrupt a running init.
const INITIAL_PLAY_DELAY: u32 = 7;
/// Buffer length; one frame fills most of it.
const BUFFER_MS: u32 = 100;
/// Clocks a frame stays short of the buffer length.
const FRAME_MARGIN: i32 = 100;
/// Overall output gain.
pub const GAIN: f64 = 1.4;
/// How much faster than real time silence is scanned.
pub const SILENCE_LOOKAHEAD: u32 = 6;
/// Default NES equalization.
pub const NES_EQ: Equalizer = Equalizer {
    treble_db: -1.0,
    bass_hz: 80.0,
};
/// Muffled Famicom equalization.
pub const FAMICOM_EQ: Equalizer = Equalizer {
    treble_db: -15.0,
    bass_hz: 80.0,
};

const APU_NAMES: [&str; 5] = ["Square 1", "Square 2", "Triangle", "Noise", "DMC"];
const VRC6_NAMES: [&str; 3] = ["Square 3", "Square 4", "Saw Wave"];
const FME7_NAMES: [&str; 3] = ["Square 3", "Square 4", "Square 5"];
const MMC5_NAMES: [&str; 3] = ["Square 3", "Square 4", "PCM"];
const NAMCO_NAMES: [&str; 8] = [
    "Wave 1", "Wave 2", "Wave 3", "Wave 4", "Wave 5", "Wave 6", "Wave 7", "Wave 8",
];
const VRC7_NAMES: [&str; 6] = ["FM 1", "FM 2", "FM 3", "FM 4", "FM 5", "FM 6"];

/// NSF file driver.
pub struct NsfPlayer {
    cpu: Cpu,
    machine: NsfMachine,
    header: NsfHeader,
    initial_banks: [u8; BANK_COUNT],
    voice_names: Vec<&'static str>,
    warnings: Vec<String>,
    play_period: i32,
    next_play: i32,
    play_extra: i32,
    play_delay: u32,
    // init routine interrupted by play
    saved: Option<Registers>,
    sample_rate: u32,
    tempo: f64,
    pitch: f64,
    eq: Equalizer,
}

impl NsfPlayer {
    /// Load an NSF image.
    pub fn new(data: &[u8]) -> Result<Self> {
        let header = NsfHeader::parse(data)?;
        if header.track_count == 0 {
            return Err(NsfError::NoTracks);
        }

        let mut warnings = Vec::new();
        if header.version != 1 {
            warnings.push("Unknown file version".to_string());
        }
        if header.uses_unsupported_chips() {
            warnings.push("Uses unsupported audio expansion hardware".to_string());
        }
        let load_addr = header.load_address();
        if load_addr < ROM_ADDR {
            warnings.push("Load address is too low".to_string());
        }

        let rom = Rom::new(&data[HEADER_SIZE..], load_addr);
        let initial_banks = initial_banks(&header, &rom);
        let expansions = Expansions::from_flags(header.expansions());

        let mut voice_names = APU_NAMES.to_vec();
        if expansions.vrc6.is_some() {
            voice_names.extend_from_slice(&VRC6_NAMES);
        }
        if expansions.fme7.is_some() {
            voice_names.extend_from_slice(&FME7_NAMES);
        }
        if expansions.mmc5.is_some() {
            voice_names.extend_from_slice(&MMC5_NAMES);
        }
        if expansions.namco.is_some() {
            voice_names.extend_from_slice(&NAMCO_NAMES);
        }
        if expansions.vrc7.is_some() {
            voice_names.extend_from_slice(&VRC7_NAMES);
        }

        let mut player = Self {
            cpu: Cpu::new(),
            machine: NsfMachine::new(rom, expansions),
            play_period: header.play_period(),
            header,
            initial_banks,
            voice_names,
            warnings,
            next_play: 0,
            play_extra: 0,
            play_delay: 0,
            saved: None,
            sample_rate: 0,
            tempo: 1.0,
            pitch: 1.0,
            eq: NES_EQ,
        };
        for chip in player.machine.chips_mut() {
            chip.set_output(Some(CENTER));
        }
        player.apply_gain();
        Ok(player)
    }

    /// The parsed header.
    pub fn header(&self) -> &NsfHeader {
        &self.header
    }

    /// Zero-based track the file suggests starting with.
    pub fn first_track(&self) -> usize {
        (self.header.first_track as usize)
            .saturating_sub(1)
            .min(self.header.track_count as usize - 1)
    }

    /// CPU clocks between play calls at the current tempo.
    pub fn play_period(&self) -> i32 {
        self.play_period
    }

    /// Speed factor in effect.
    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    /// Undocumented or trapping instructions met so far.
    pub fn error_count(&self) -> u32 {
        self.cpu.error_count()
    }

    /// The CPU, for inspection.
    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    /// The memory map and chips, for inspection.
    pub fn machine(&self) -> &NsfMachine {
        &self.machine
    }

    fn apply_gain(&mut self) {
        // one expansion chip next to the APU plays at unity
        let mut adjusted = GAIN / 0.75;
        for _ in 0..self.machine.expansions().count() {
            adjusted *= 0.75;
        }
        let mut chips = self.machine.chips_mut().into_iter();
        if let Some(apu) = chips.next() {
            apu.set_volume(adjusted.min(GAIN));
        }
        for chip in chips {
            chip.set_volume(adjusted);
        }
    }

    fn apply_eq(&mut self) {
        if self.sample_rate == 0 {
            return;
        }
        let eq = BlipEq::with_rolloff(self.eq.treble_db, 0, self.sample_rate as i32);
        for chip in self.machine.chips_mut() {
            chip.set_treble_eq(eq);
        }
        self.machine.buffer_mut().set_bass_freq(self.eq.bass_hz as i32);
    }

    fn apply_clock_rate(&mut self) {
        let clock = self.header.clock_rate() * self.pitch;
        self.machine.buffer_mut().set_clock_rate(clock);
    }

    fn frame_clocks(&self) -> i32 {
        let clock = self.header.clock_rate() * self.pitch;
        (self.machine.buffer().length_ms() as f64 * clock / 1000.0) as i32 - FRAME_MARGIN
    }

    fn jsr_then_stop(&mut self, raw_addr: u16) {
        self.cpu.r.pc = NsfHeader::resolve_addr(raw_addr);
        let ret = IDLE_ADDR - 1;
        self.cpu.push(&mut self.machine, (ret >> 8) as u8);
        self.cpu.push(&mut self.machine, ret as u8);
    }

    fn run_once(&mut self, end: i32) {
        let limit = self.next_play.min(end);
        if self.cpu.run(&mut self.machine, limit) {
            if self.cpu.r.pc != IDLE_ADDR {
                log::debug!("illegal instruction at ${:04X}", self.cpu.r.pc);
                self.cpu.count_error();
                self.cpu.set_time(limit);
                return;
            }

            // init or play returned; play may now run every period
            self.play_delay = 1;
            match self.saved.take() {
                Some(regs) => self.cpu.r = regs,
                None => {
                    if self.cpu.time() < limit {
                        self.cpu.set_time(limit);
                    }
                }
            }
        }

        if self.cpu.time() >= self.next_play {
            self.play_extra ^= 1;
            self.next_play += self.play_period + self.play_extra;

            if self.play_delay > 0 {
                self.play_delay -= 1;
                if self.play_delay == 0 {
                    if self.cpu.r.pc != IDLE_ADDR {
                        self.saved = Some(self.cpu.r);
                        log::debug!("play called during init");
                    }
                    self.jsr_then_stop(self.header.play_addr);
                }
            }
        }
    }

    fn end_frame(&mut self, end: i32) {
        while self.cpu.time() < end {
            self.run_once(end);
        }
        self.cpu.adjust_time(-end);
        self.next_play = (self.next_play - end).max(0);
        self.machine.end_frame(end);
    }
}

/// Banks mapped at track start, FDS pair first.
fn initial_banks(header: &NsfHeader, rom: &Rom) -> [u8; BANK_COUNT] {
    let mut banks = [0u8; BANK_COUNT];
    if header.has_banks() {
        banks[0] = header.banks[6];
        banks[1] = header.banks[7];
        banks[FDS_BANKS..].copy_from_slice(&header.banks);
    } else {
        let first_bank = (header.load_address() as i32 - SRAM_ADDR as i32) / BANK_SIZE as i32;
        let total = rom.bank_count() as i32;
        for (i, slot) in banks.iter_mut().enumerate() {
            let bank = i as i32 - first_bank;
            *slot = if (0..total).contains(&bank) { bank as u8 } else { 0 };
        }
    }
    banks
}

impl EmuCore for NsfPlayer {
    fn track_count(&self) -> usize {
        self.header.track_count as usize
    }

    fn track_info(&self, track: usize) -> chipsound_common::Result<TrackInfo> {
        let count = self.track_count();
        if track >= count {
            return Err(PlayerError::NoSuchTrack { track, count });
        }
        let system = if self.header.chip_flags != 0 {
            "Famicom"
        } else {
            "Nintendo NES"
        };
        Ok(TrackInfo {
            system: system.to_string(),
            game: self.header.game.clone(),
            author: self.header.author.clone(),
            copyright: self.header.copyright.clone(),
            track_count: count,
            ..Default::default()
        })
    }

    fn set_sample_rate(&mut self, rate: u32) -> chipsound_common::Result<()> {
        self.machine
            .buffer_mut()
            .set_sample_rate(rate, BUFFER_MS)
            .map_err(NsfError::from)?;
        self.sample_rate = rate;
        self.apply_clock_rate();
        self.apply_eq();
        Ok(())
    }

    fn start_track(&mut self, track: usize) -> chipsound_common::Result<()> {
        let count = self.track_count();
        if track >= count {
            return Err(PlayerError::NoSuchTrack { track, count });
        }

        self.machine.buffer_mut().clear();
        self.cpu.reset();
        let pal = self.header.pal_only();
        self.machine.reset(pal, &self.initial_banks);

        self.play_extra = 0;
        self.next_play = self.play_period;
        self.play_delay = INITIAL_PLAY_DELAY;
        self.saved = None;

        self.cpu.r.a = track as u8;
        self.cpu.r.x = pal as u8;
        self.cpu.r.sp = 0xFF;
        self.jsr_then_stop(self.header.init_addr);
        if self.cpu.r.pc < self.header.load_address() {
            let warning = "Init address < load address";
            log::warn!("{warning}");
            if !self.warnings.iter().any(|w| w == warning) {
                self.warnings.push(warning.to_string());
            }
        }
        Ok(())
    }

    fn play(&mut self, out: &mut [i16]) -> chipsound_common::Result<()> {
        let mut done = 0;
        while done < out.len() {
            let frames = self.machine.buffer_mut().read_samples(&mut out[done..]);
            done += frames * 2;
            if done < out.len() {
                let clocks = self.frame_clocks();
                self.end_frame(clocks);
            }
        }
        Ok(())
    }

    fn voice_names(&self) -> Vec<&'static str> {
        self.voice_names.clone()
    }

    fn mute_voices(&mut self, mask: u32) {
        let mut shift = 0;
        for chip in self.machine.chips_mut() {
            let bits = mask.checked_shr(shift).unwrap_or(0);
            chip.mute_voices(bits);
            shift += chip.voice_count() as u32;
        }
    }

    fn set_tempo(&mut self, tempo: f64) {
        self.tempo = tempo;
        self.play_period = (self.header.play_period() as f64 / tempo) as i32;
        self.machine.apu_mut().set_tempo(tempo);
    }

    fn set_pitch(&mut self, pitch: f64) {
        self.pitch = pitch;
        if self.sample_rate != 0 {
            self.apply_clock_rate();
        }
    }

    fn equalizer(&self) -> Equalizer {
        self.eq
    }

    fn set_equalizer(&mut self, eq: Equalizer) {
        self.eq = eq;
        self.apply_eq();
    }

    fn warnings(&self) -> &[String] {
        &self.warnings
    }

    fn silence_lookahead(&self) -> u32 {
        SILENCE_LOOKAHEAD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::Bus;
    use crate::header::MAGIC;

    fn image(load: u16, init: u16, play: u16, code: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        data[..5].copy_from_slice(MAGIC);
        data[5] = 1;
        data[6] = 2;
        data[7] = 1;
        data[0x08..0x0A].copy_from_slice(&load.to_le_bytes());
        data[0x0A..0x0C].copy_from_slice(&init.to_le_bytes());
        data[0x0C..0x0E].copy_from_slice(&play.to_le_bytes());
        data[0x6E..0x70].copy_from_slice(&0x411Au16.to_le_bytes());
        data.extend_from_slice(code);
        data
    }

    #[test]
    fn test_initial_banks_from_load_address() {
        let data = image(0x8000, 0x8000, 0x8000, &[0x60; 0x2000]);
        let player = NsfPlayer::new(&data).unwrap();
        assert_eq!(player.initial_banks[FDS_BANKS], 0);
        assert_eq!(player.initial_banks[FDS_BANKS + 1], 1);
        // past the two-bank image
        assert_eq!(player.initial_banks[FDS_BANKS + 2], 0);
    }

    #[test]
    fn test_warnings_for_low_load_address() {
        let mut data = image(0x7000, 0x8000, 0x8000, &[0x60; 16]);
        data[5] = 2;
        let player = NsfPlayer::new(&data).unwrap();
        assert!(player.warnings().iter().any(|w| w == "Load address is too low"));
        assert!(player.warnings().iter().any(|w| w == "Unknown file version"));
    }

    fn run_frames(player: &mut NsfPlayer, frames: &[i32]) {
        let mut scratch = vec![0i16; 16_384];
        for &clocks in frames {
            player.end_frame(clocks);
            player.machine.buffer_mut().read_samples(&mut scratch);
        }
    }

    #[test]
    fn test_init_runs_with_track_in_a() {
        // init: STA $00 ; RTS   play: INC $01 ; RTS
        let code = [0x85, 0x00, 0x60, 0xE6, 0x01, 0x60];
        let data = image(0x8000, 0x8000, 0x8003, &code);
        let mut player = NsfPlayer::new(&data).unwrap();
        player.set_sample_rate(44_100).unwrap();
        player.start_track(1).unwrap();

        // ten play periods
        run_frames(&mut player, &[10_000; 30]);
        assert_eq!(player.machine.read(0x0000, 0), 1);
        assert_eq!(player.machine.read(0x0001, 0), 10);
    }

    #[test]
    fn test_play_interrupts_long_init() {
        // init: loop forever   play: INC $02 ; RTS
        let code = [0x4C, 0x00, 0x80, 0xE6, 0x02, 0x60];
        let data = image(0x8000, 0x8000, 0x8003, &code);
        let mut player = NsfPlayer::new(&data).unwrap();
        player.set_sample_rate(44_100).unwrap();
        player.start_track(0).unwrap();

        // first play after seven periods, then one per period
        run_frames(&mut player, &[134_015, 134_015]);
        assert!(player.saved.is_some());
        assert_eq!(player.machine.read(0x0002, 0), 3);
    }

    #[test]
    fn test_voice_names_follow_chip_order() {
        let mut data = image(0x8000, 0x8000, 0x8000, &[0x60; 16]);
        data[0x7B] = 0x01 | 0x10;
        let player = NsfPlayer::new(&data).unwrap();
        let names = player.voice_names();
        assert_eq!(names.len(), 5 + 3 + 8);
        assert_eq!(names[5], "Square 3");
        assert_eq!(names[7], "Saw Wave");
        assert_eq!(names[8], "Wave 1");
        assert_eq!(player.track_info(0).unwrap().system, "Famicom");
    }

    #[test]
    fn test_tempo_scales_play_period() {
        let data = image(0x8000, 0x8000, 0x8000, &[0x60; 16]);
        let mut player = NsfPlayer::new(&data).unwrap();
        player.set_tempo(2.0);
        assert_eq!(player.play_period(), 29_780 / 2);
    }
}
