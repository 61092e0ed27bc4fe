//! SFM state snapshots.
//!
//! An SFM file is a complete SMP + DSP machine state plus a log of the
//! values the main CPU wrote to the four communication ports:
//!
//! ```text
//! "SFM1"  le32 metadata size  BML metadata  RAM (64 KiB)  DSP registers (128)  port log
//! ```
//!
//! Everything that is not memory (CPU registers, timers, internal DSP
//! pipeline state) lives in the metadata under the `smp` and `dsp` nodes.

use chipsound_common::{ProbeResult, TrackInfo};
use log::debug;

use crate::bml::BmlDocument;
use crate::dsp::{EnvMode, REGISTER_COUNT, VOICE_COUNT};
use crate::error::{Result, SpcError};
use crate::smp::{Psw, Smp, RAM_SIZE};

/// Signature at the start of every SFM file.
pub const SIGNATURE: &[u8; 4] = b"SFM1";
/// Smallest valid file: signature, size, RAM and DSP registers.
pub const MIN_FILE_SIZE: usize = 8 + RAM_SIZE + REGISTER_COUNT;

const SYSTEM: &str = "Super Nintendo with log";
const ECHO_HIST_PAIRS: usize = 8;
const BRR_HIST_SIZE: usize = 12;
const CLOCK_UNIT: i64 = 4096;

/// Test whether `data` starts like an SFM file.
pub fn probe_sfm(data: &[u8]) -> ProbeResult {
    let prefix = data.len().min(SIGNATURE.len());
    if data[..prefix] != SIGNATURE[..prefix] {
        return ProbeResult::NoMatch;
    }
    if data.len() < MIN_FILE_SIZE {
        return ProbeResult::NeedMoreData {
            needed: MIN_FILE_SIZE,
        };
    }
    ProbeResult::Match
}

/// A parsed SFM file.
#[derive(Debug, Clone)]
pub struct SfmFile {
    /// Metadata document.
    pub metadata: BmlDocument,
    /// RAM image.
    pub ram: Vec<u8>,
    /// DSP register file.
    pub dsp_registers: [u8; REGISTER_COUNT],
    /// Port writes, one byte per SMP port read.
    pub port_log: Vec<u8>,
}

impl SfmFile {
    /// Parse a complete file.
    pub fn parse(data: &[u8]) -> Result<Self> {
        match probe_sfm(data) {
            ProbeResult::NoMatch => return Err(SpcError::InvalidFileId { format: "SFM" }),
            ProbeResult::NeedMoreData { needed } => {
                return Err(SpcError::TooSmall {
                    format: "SFM",
                    needed,
                    available: data.len(),
                })
            }
            ProbeResult::Match => {}
        }

        let meta_size = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
        let needed = meta_size.saturating_add(MIN_FILE_SIZE);
        if data.len() < needed {
            return Err(SpcError::TooSmall {
                format: "SFM",
                needed,
                available: data.len(),
            });
        }

        let meta = &data[8..8 + meta_size];
        let meta_end = meta.iter().position(|&b| b == 0).unwrap_or(meta.len());
        let metadata = BmlDocument::parse(&String::from_utf8_lossy(&meta[..meta_end]));

        let ram_start = 8 + meta_size;
        let dsp_start = ram_start + RAM_SIZE;
        let log_start = dsp_start + REGISTER_COUNT;
        let mut dsp_registers = [0u8; REGISTER_COUNT];
        dsp_registers.copy_from_slice(&data[dsp_start..log_start]);

        let file = Self {
            metadata,
            ram: data[ram_start..dsp_start].to_vec(),
            dsp_registers,
            port_log: data[log_start..].to_vec(),
        };
        debug!(
            "SFM: {} metadata bytes, {} port log bytes",
            meta_size,
            file.port_log.len()
        );
        Ok(file)
    }

    /// Port log position playback returns to after its last byte.
    pub fn loop_start(&self) -> usize {
        self.metadata
            .int_value("timing:loopstart")
            .map_or(self.port_log.len(), |v| v.clamp(0, self.port_log.len() as i64) as usize)
    }

    /// Value of an `information` tag such as `title`, `composer` or `disc`.
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.metadata.value_of(&format!("information:{name}"))
    }

    /// Metadata in the shared form.
    pub fn track_info(&self) -> TrackInfo {
        let tag = |name: &str| self.tag(name).unwrap_or_default().to_string();
        let mut author = tag("author");
        if author.is_empty() {
            author = tag("composer");
        }
        let millis = |path: &str| {
            self.metadata
                .int_value(path)
                .filter(|&ms| ms > 0)
                .map(|ms| ms.min(u32::MAX as i64) as u32)
        };
        TrackInfo {
            system: SYSTEM.to_string(),
            game: tag("game"),
            song: tag("title"),
            author,
            copyright: tag("copyright"),
            comment: String::new(),
            dumper: tag("dumper"),
            track_count: 1,
            length_ms: millis("timing:length"),
            intro_ms: None,
            loop_ms: None,
            fade_ms: millis("timing:fade"),
        }
    }

    /// Store `info` back into the metadata.
    pub fn set_track_info(&mut self, info: &TrackInfo) {
        let doc = &mut self.metadata;
        doc.set_value("information:title", info.song.as_str());
        doc.set_value("information:game", info.game.as_str());
        doc.set_value("information:author", info.author.as_str());
        doc.set_value("information:copyright", info.copyright.as_str());
        doc.set_value("information:dumper", info.dumper.as_str());
        doc.set_int("timing:length", info.length_ms.unwrap_or(0) as i64);
        doc.set_int("timing:fade", info.fade_ms.unwrap_or(0) as i64);
    }

    /// Encode the file with its current metadata.
    pub fn to_bytes(&self) -> Vec<u8> {
        encode(&self.metadata, &self.ram, &self.dsp_registers, &self.port_log)
    }

    /// Put `smp` into the state this file describes.
    pub fn restore(&self, smp: &mut Smp) {
        smp.reset();
        smp.ram.copy_from_slice(&self.ram);
        smp.dsp.load(&self.dsp_registers);
        smp.set_port_log(&self.port_log, self.loop_start());
        restore_smp(&self.metadata, smp);
        restore_dsp(&self.metadata, smp);
    }
}

/// Serialize a machine state as an SFM file. `base` supplies the metadata
/// that is not machine state.
pub fn save_state(base: &BmlDocument, smp: &Smp) -> Vec<u8> {
    let mut metadata = BmlDocument::parse(&base.serialize());
    capture_state(smp, &mut metadata);
    let (log, loop_start) = smp.port_log_state();
    metadata.set_int("timing:loopstart", loop_start as i64);
    encode(&metadata, smp.ram(), smp.dsp().registers(), &log)
}

fn encode(metadata: &BmlDocument, ram: &[u8], regs: &[u8], port_log: &[u8]) -> Vec<u8> {
    let text = metadata.serialize();
    let mut out = Vec::with_capacity(MIN_FILE_SIZE + text.len() + port_log.len());
    out.extend_from_slice(SIGNATURE);
    out.extend_from_slice(&(text.len() as u32).to_le_bytes());
    out.extend_from_slice(text.as_bytes());
    out.extend_from_slice(ram);
    out.extend_from_slice(regs);
    out.extend_from_slice(port_log);
    out
}

fn int_or(doc: &BmlDocument, path: &str, default: i64) -> i64 {
    doc.int_value(path).unwrap_or(default)
}

fn restore_smp(doc: &BmlDocument, smp: &mut Smp) {
    let test = int_or(doc, "smp:test", smp.status.test_register() as i64);
    smp.status.set_test_register(test as u8);
    smp.status.iplrom_enable = int_or(doc, "smp:iplrom", 1) != 0;
    smp.status.dsp_addr = int_or(doc, "smp:dspaddr", 0) as u8;
    if let Some(ram) = doc.int_list("smp:ram") {
        if let Some(&f8) = ram.first() {
            smp.status.ram00f8 = f8 as u8;
        }
        if let Some(&f9) = ram.get(1) {
            smp.status.ram00f9 = f9 as u8;
        }
    }

    smp.regs.pc = int_or(doc, "smp:regs:pc", 0xFFC0) as u16;
    smp.regs.a = int_or(doc, "smp:regs:a", 0) as u8;
    smp.regs.x = int_or(doc, "smp:regs:x", 0) as u8;
    smp.regs.y = int_or(doc, "smp:regs:y", 0) as u8;
    smp.regs.sp = int_or(doc, "smp:regs:s", 0xEF) as u8;
    smp.regs.psw = Psw::from_bits_retain(int_or(doc, "smp:regs:psw", 0x02) as u8);

    if let Some(ports) = doc.int_list("smp:ports") {
        for (port, value) in smp.ports.iter_mut().zip(ports) {
            *port = value as u8;
        }
    }

    for (i, timer) in smp.timers.iter_mut().enumerate() {
        let key = |name: &str| format!("smp:timer[{i}]:{name}");
        if let Some(enable) = doc.int_value(&key("enable")) {
            timer.enable = enable != 0;
        }
        if let Some(target) = doc.int_value(&key("target")) {
            timer.target = target as u8;
        }
        if let Some(stages) = doc.int_list(&key("stage")) {
            let mut stages = stages.into_iter();
            if let Some(s0) = stages.next() {
                timer.stage0 = s0.max(0) as u32;
            }
            if let Some(s1) = stages.next() {
                timer.stage1 = s1 != 0;
            }
            if let Some(s2) = stages.next() {
                timer.stage2 = s2 as u8;
            }
            if let Some(s3) = stages.next() {
                timer.stage3 = (s3 & 0x0F) as u8;
            }
        }
        if let Some(line) = doc.int_value(&key("line")) {
            timer.line = line != 0;
        }
    }

    smp.set_dsp_clock(int_or(doc, "dsp:clock", 0) * CLOCK_UNIT);
}

fn restore_dsp(doc: &BmlDocument, smp: &mut Smp) {
    let dsp = &mut smp.dsp;
    let int = |path: &str, current: i64| int_or(doc, path, current);

    dsp.echo_hist_pos = int("dsp:echohistaddr", dsp.echo_hist_pos as i64).clamp(0, 7) as usize;
    if let Some(hist) = doc.int_list("dsp:echohistdata") {
        for (i, pair) in hist.chunks(2).take(ECHO_HIST_PAIRS).enumerate() {
            for (ch, &value) in pair.iter().enumerate() {
                dsp.echo_hist[i][ch] = value as i32;
                dsp.echo_hist[i + ECHO_HIST_PAIRS][ch] = value as i32;
            }
        }
    }

    dsp.phase = (int("dsp:sample", dsp.phase as i64) & 31) as u32;
    dsp.kon = int("dsp:kon", dsp.kon as i64) as u8;
    dsp.noise = int("dsp:noise", dsp.noise as i64) as i32;
    dsp.counter = int("dsp:counter", dsp.counter as i64) as i32;
    dsp.echo_offset = int("dsp:echooffset", dsp.echo_offset as i64) as i32;
    dsp.echo_length = int("dsp:echolength", dsp.echo_length as i64) as i32;
    dsp.new_kon = int("dsp:koncache", dsp.new_kon as i64) as u8;
    dsp.endx_buf = int("dsp:endx", dsp.endx_buf as i64) as u8;
    dsp.envx_buf = int("dsp:envx", dsp.envx_buf as i64) as u8;
    dsp.outx_buf = int("dsp:outx", dsp.outx_buf as i64) as u8;
    dsp.t_pmon = int("dsp:pmon", dsp.t_pmon as i64) as u8;
    dsp.t_non = int("dsp:non", dsp.t_non as i64) as u8;
    dsp.t_eon = int("dsp:eon", dsp.t_eon as i64) as u8;
    dsp.t_dir = int("dsp:dir", dsp.t_dir as i64) as i32;
    dsp.t_koff = int("dsp:koff", dsp.t_koff as i64) as u8;
    dsp.t_brr_next_addr = int("dsp:brrnext", dsp.t_brr_next_addr as i64) as i32;
    dsp.t_adsr0 = int("dsp:adsr0", dsp.t_adsr0 as i64) as i32;
    dsp.t_brr_header = int("dsp:brrheader", dsp.t_brr_header as i64) as i32;
    dsp.t_brr_byte = int("dsp:brrdata", dsp.t_brr_byte as i64) as i32;
    dsp.t_srcn = int("dsp:srcn", dsp.t_srcn as i64) as i32;
    dsp.t_esa = int("dsp:esa", dsp.t_esa as i64) as i32;
    dsp.t_echo_enabled = int("dsp:echodisable", (!dsp.t_echo_enabled) as i64) == 0;
    dsp.t_dir_addr = int("dsp:diraddr", dsp.t_dir_addr as i64) as i32;
    dsp.t_pitch = int("dsp:pitch", dsp.t_pitch as i64) as i32;
    dsp.t_output = int("dsp:output", dsp.t_output as i64) as i32;
    dsp.t_looped = int("dsp:looped", dsp.t_looped as i64) as u8;
    dsp.t_echo_ptr = int("dsp:echoaddr", dsp.t_echo_ptr as i64) as i32;

    for (path, levels) in [
        ("dsp:mainout", &mut dsp.t_main_out),
        ("dsp:echoout", &mut dsp.t_echo_out),
        ("dsp:echoin", &mut dsp.t_echo_in),
    ] {
        if let Some(values) = doc.int_list(path) {
            for (level, value) in levels.iter_mut().zip(values) {
                *level = value as i32;
            }
        }
    }

    for (i, voice) in dsp.voices.iter_mut().enumerate() {
        let key = |name: &str| format!("dsp:voice[{i}]:{name}");
        let int = |name: &str, current: i64| int_or(doc, &key(name), current);

        voice.buf_pos = int("brrhistaddr", voice.buf_pos as i64).clamp(0, BRR_HIST_SIZE as i64 - 1) as usize;
        if let Some(history) = doc.int_list(&key("brrhistdata")) {
            for (j, &value) in history.iter().take(BRR_HIST_SIZE).enumerate() {
                voice.buf[j] = value as i32;
                voice.buf[j + BRR_HIST_SIZE] = value as i32;
            }
        }
        voice.interp_pos = int("interpaddr", voice.interp_pos as i64) as i32;
        voice.brr_addr = int("brraddr", voice.brr_addr as i64) as i32;
        voice.brr_offset = int("brroffset", voice.brr_offset as i64) as i32;
        voice.vbit = int("vbit", voice.vbit as i64) as u8;
        voice.regs = (int("vidx", voice.regs as i64) as usize) & 0x70;
        voice.kon_delay = int("kondelay", voice.kon_delay as i64) as i32;
        voice.env_mode = EnvMode::from_index(int("envmode", voice.env_mode as i64));
        voice.env = int("env", voice.env as i64) as i32;
        voice.envx_out = int("envxout", voice.envx_out as i64) as u8;
        voice.hidden_env = int("envcache", voice.hidden_env as i64) as i32;
    }
}

/// Write the machine state of `smp` into `doc`.
pub fn capture_state(smp: &Smp, doc: &mut BmlDocument) {
    let status = smp.status();
    doc.set_int("smp:test", status.test_register() as i64);
    doc.set_int("smp:iplrom", status.iplrom_enable as i64);
    doc.set_int("smp:dspaddr", status.dsp_addr as i64);
    doc.set_list("smp:ram", [status.ram00f8, status.ram00f9]);

    let regs = &smp.regs;
    doc.set_int("smp:regs:pc", regs.pc as i64);
    doc.set_int("smp:regs:a", regs.a as i64);
    doc.set_int("smp:regs:x", regs.x as i64);
    doc.set_int("smp:regs:y", regs.y as i64);
    doc.set_int("smp:regs:s", regs.sp as i64);
    doc.set_int("smp:regs:psw", regs.psw.bits() as i64);
    doc.set_list("smp:ports", smp.ports());

    for (i, timer) in smp.timers().iter().enumerate() {
        let key = |name: &str| format!("smp:timer[{i}]:{name}");
        doc.set_int(&key("enable"), timer.enable as i64);
        doc.set_int(&key("target"), timer.target as i64);
        doc.set_list(
            &key("stage"),
            [
                timer.stage0,
                timer.stage1 as u32,
                timer.stage2 as u32,
                timer.stage3 as u32,
            ],
        );
        doc.set_int(&key("line"), timer.line as i64);
    }

    doc.set_int("dsp:clock", smp.dsp_clock() / CLOCK_UNIT);

    let dsp = smp.dsp();
    doc.set_int("dsp:echohistaddr", dsp.echo_hist_pos as i64);
    doc.set_list(
        "dsp:echohistdata",
        dsp.echo_hist[..ECHO_HIST_PAIRS].iter().flatten(),
    );

    let scalars: [(&str, i64); 27] = [
        ("dsp:sample", dsp.phase as i64),
        ("dsp:kon", dsp.kon as i64),
        ("dsp:noise", dsp.noise as i64),
        ("dsp:counter", dsp.counter as i64),
        ("dsp:echooffset", dsp.echo_offset as i64),
        ("dsp:echolength", dsp.echo_length as i64),
        ("dsp:koncache", dsp.new_kon as i64),
        ("dsp:endx", dsp.endx_buf as i64),
        ("dsp:envx", dsp.envx_buf as i64),
        ("dsp:outx", dsp.outx_buf as i64),
        ("dsp:pmon", dsp.t_pmon as i64),
        ("dsp:non", dsp.t_non as i64),
        ("dsp:eon", dsp.t_eon as i64),
        ("dsp:dir", dsp.t_dir as i64),
        ("dsp:koff", dsp.t_koff as i64),
        ("dsp:brrnext", dsp.t_brr_next_addr as i64),
        ("dsp:adsr0", dsp.t_adsr0 as i64),
        ("dsp:brrheader", dsp.t_brr_header as i64),
        ("dsp:brrdata", dsp.t_brr_byte as i64),
        ("dsp:srcn", dsp.t_srcn as i64),
        ("dsp:esa", dsp.t_esa as i64),
        ("dsp:echodisable", (!dsp.t_echo_enabled) as i64),
        ("dsp:diraddr", dsp.t_dir_addr as i64),
        ("dsp:pitch", dsp.t_pitch as i64),
        ("dsp:output", dsp.t_output as i64),
        ("dsp:looped", dsp.t_looped as i64),
        ("dsp:echoaddr", dsp.t_echo_ptr as i64),
    ];
    for (path, value) in scalars {
        doc.set_int(path, value);
    }
    doc.set_list("dsp:mainout", dsp.t_main_out);
    doc.set_list("dsp:echoout", dsp.t_echo_out);
    doc.set_list("dsp:echoin", dsp.t_echo_in);

    for (i, voice) in dsp.voices.iter().enumerate().take(VOICE_COUNT) {
        let key = |name: &str| format!("dsp:voice[{i}]:{name}");
        doc.set_int(&key("brrhistaddr"), voice.buf_pos as i64);
        doc.set_list(&key("brrhistdata"), &voice.buf[..BRR_HIST_SIZE]);
        doc.set_int(&key("interpaddr"), voice.interp_pos as i64);
        doc.set_int(&key("brraddr"), voice.brr_addr as i64);
        doc.set_int(&key("brroffset"), voice.brr_offset as i64);
        doc.set_int(&key("vbit"), voice.vbit as i64);
        doc.set_int(&key("vidx"), voice.regs as i64);
        doc.set_int(&key("kondelay"), voice.kon_delay as i64);
        doc.set_int(&key("envmode"), voice.env_mode as i64);
        doc.set_int(&key("env"), voice.env as i64);
        doc.set_int(&key("envxout"), voice.envx_out as i64);
        doc.set_int(&key("envcache"), voice.hidden_env as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(meta: &str, log: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(SIGNATURE);
        data.extend_from_slice(&(meta.len() as u32).to_le_bytes());
        data.extend_from_slice(meta.as_bytes());
        let mut ram = vec![0u8; RAM_SIZE];
        ram[0x0200] = 0x2F;
        ram[0x0201] = 0xFE;
        data.extend_from_slice(&ram);
        let mut regs = [0u8; REGISTER_COUNT];
        regs[0x5D] = 0x03;
        data.extend_from_slice(&regs);
        data.extend_from_slice(log);
        data
    }

    const META: &str = "information\n  title: Battle\n  composer: Someone\n  track: 3\ntiming\n  length: 90000\n  fade: 5000\n  loopstart: 2\nsmp\n  regs\n    pc: 512\n    a: 17\n    psw: 130\n  ports: 1,2,3,4\n  ram: 5,6\n  timer\n    enable: 0\n  timer\n    enable: 1\n    target: 100\n    stage: 10,1,20,7\ndsp\n  clock: 3\n  sample: 7\n  echohistdata: 1,2,3,4\n  voice\n    env: 0\n  voice\n    env: 0\n  voice\n    env: 1024\n    envmode: 3\n    vidx: 32\n";

    #[test]
    fn test_probe() {
        let data = image("", &[]);
        assert_eq!(probe_sfm(&data), ProbeResult::Match);
        assert_eq!(probe_sfm(b"SF"), ProbeResult::NeedMoreData { needed: MIN_FILE_SIZE });
        assert_eq!(probe_sfm(b"SNES-SPC700"), ProbeResult::NoMatch);
    }

    #[test]
    fn test_metadata_size_is_checked() {
        let mut data = image("", &[]);
        data[4..8].copy_from_slice(&100u32.to_le_bytes());
        assert!(matches!(
            SfmFile::parse(&data),
            Err(SpcError::TooSmall { needed, .. }) if needed == MIN_FILE_SIZE + 100
        ));
    }

    #[test]
    fn test_parse_layout() {
        let sfm = SfmFile::parse(&image(META, &[9, 8, 7, 6])).unwrap();
        assert_eq!(sfm.ram[0x0200], 0x2F);
        assert_eq!(sfm.dsp_registers[0x5D], 0x03);
        assert_eq!(sfm.port_log, [9, 8, 7, 6]);
        assert_eq!(sfm.loop_start(), 2);
        assert_eq!(sfm.tag("track"), Some("3"));
    }

    #[test]
    fn test_loop_start_defaults_to_log_end() {
        let sfm = SfmFile::parse(&image("", &[1, 2, 3])).unwrap();
        assert_eq!(sfm.loop_start(), 3);
    }

    #[test]
    fn test_track_info_mapping() {
        let sfm = SfmFile::parse(&image(META, &[])).unwrap();
        let info = sfm.track_info();
        assert_eq!(info.system, "Super Nintendo with log");
        assert_eq!(info.song, "Battle");
        assert_eq!(info.author, "Someone");
        assert_eq!(info.length_ms, Some(90_000));
        assert_eq!(info.fade_ms, Some(5000));
    }

    #[test]
    fn test_set_track_info_updates_document() {
        let mut sfm = SfmFile::parse(&image(META, &[])).unwrap();
        let mut info = sfm.track_info();
        info.song = "Boss".to_string();
        info.length_ms = None;
        sfm.set_track_info(&info);
        let again = SfmFile::parse(&sfm.to_bytes()).unwrap();
        assert_eq!(again.track_info().song, "Boss");
        assert_eq!(again.track_info().length_ms, None);
        assert_eq!(again.tag("track"), Some("3"));
    }

    #[test]
    fn test_restore_applies_state() {
        let sfm = SfmFile::parse(&image(META, &[9, 8, 7, 6])).unwrap();
        let mut smp = Smp::new();
        sfm.restore(&mut smp);

        assert_eq!(smp.regs.pc, 512);
        assert_eq!(smp.regs.a, 17);
        assert_eq!(smp.regs.sp, 0xEF);
        assert_eq!(smp.regs.psw, Psw::N | Psw::Z);
        assert_eq!(smp.ports(), [1, 2, 3, 4]);
        assert_eq!(smp.status().ram00f8, 5);
        assert_eq!(smp.status().ram00f9, 6);
        assert!(smp.status().iplrom_enable);
        assert_eq!(smp.ram()[0x0200], 0x2F);

        let timer = &smp.timers()[1];
        assert!(timer.enable);
        assert_eq!(timer.target, 100);
        assert_eq!((timer.stage0, timer.stage1, timer.stage2, timer.stage3), (10, true, 20, 7));
        assert!(!smp.timers()[0].enable);

        assert_eq!(smp.dsp_clock(), 3 * 4096);
        let dsp = smp.dsp();
        assert_eq!(dsp.phase(), 7);
        assert_eq!(dsp.registers()[0x5D], 0x03);
        assert_eq!(dsp.echo_hist[1], [3, 4]);
        assert_eq!(dsp.echo_hist[9], [3, 4]);
        assert_eq!(dsp.voices[2].env, 1024);
        assert_eq!(dsp.voices[2].env_mode, EnvMode::Sustain);
        assert_eq!(dsp.voices[2].regs, 0x20);

        assert_eq!(smp.port_log_state(), (vec![9, 8, 7, 6], 2));
    }

    #[test]
    fn test_saved_state_restores_identically() {
        let sfm = SfmFile::parse(&image(META, &[9, 8, 7, 6])).unwrap();
        let mut smp = Smp::new();
        sfm.restore(&mut smp);
        let mut out = [0i16; 256];
        smp.render(&mut out);

        let saved = SfmFile::parse(&save_state(&sfm.metadata, &smp)).unwrap();
        assert_eq!(saved.tag("title"), Some("Battle"));

        let mut copy = Smp::new();
        saved.restore(&mut copy);
        assert_eq!(copy.regs, smp.regs);
        assert_eq!(copy.ram(), smp.ram());
        assert_eq!(copy.timers(), smp.timers());
        assert_eq!(copy.ports(), smp.ports());
        assert_eq!(copy.dsp().registers(), smp.dsp().registers());
        assert_eq!(copy.dsp().phase(), smp.dsp().phase());

        let mut a = [0i16; 512];
        let mut b = [0i16; 512];
        smp.render(&mut a);
        copy.render(&mut b);
        assert_eq!(a, b);
    }
}
