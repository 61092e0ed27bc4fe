use approx::assert_abs_diff_eq;
use chipsound_common::{EmuCore, PlaybackConfig, PlayerError, ProbeResult};
use chipsound_spc_replayer::dsp::{reg, voice_reg, FLG_ECHO_DISABLE, REGISTER_COUNT};
use chipsound_spc_replayer::smp::RAM_SIZE;
use chipsound_spc_replayer::spc_file::{DSP_OFFSET, MIN_FILE_SIZE, RAM_OFFSET, SIGNATURE};
use chipsound_spc_replayer::{
    load_sfm, load_spc, probe_sfm, probe_spc, sfm, SfmFile, SfmPlayer, Smp, SpcPlayer,
};

const RATE: u32 = 44_100;

/// A 16-sample square wave: one looping BRR block, range 11, +7 then -7.
fn sample_ram() -> Vec<u8> {
    let mut ram = vec![0u8; RAM_SIZE];
    // directory entry 0 at $0300: start and loop both $0400
    ram[0x0300..0x0304].copy_from_slice(&[0x00, 0x04, 0x00, 0x04]);
    ram[0x0400] = 0xB3;
    ram[0x0401..0x0405].fill(0x77);
    ram[0x0405..0x0409].fill(0x99);
    ram
}

/// Voice 0 on sample 0 at pitch $1000 (2 kHz for this sample), full
/// volume, fixed GAIN, echo writes off.
fn voice_registers(key_on: bool) -> [u8; REGISTER_COUNT] {
    let mut regs = [0u8; REGISTER_COUNT];
    regs[voice_reg::VOLL] = 0x7F;
    regs[voice_reg::VOLR] = 0x7F;
    regs[voice_reg::PITCHL] = 0x00;
    regs[voice_reg::PITCHH] = 0x10;
    regs[voice_reg::SRCN] = 0;
    regs[voice_reg::GAIN] = 0x7F;
    regs[reg::MVOLL] = 0x7F;
    regs[reg::MVOLR] = 0x7F;
    regs[reg::FLG] = FLG_ECHO_DISABLE;
    regs[reg::DIR] = 0x03;
    regs[reg::KON] = key_on as u8;
    regs
}

fn build_spc(program: &[u8], key_on: bool) -> Vec<u8> {
    let mut data = vec![0u8; MIN_FILE_SIZE];
    data[..27].copy_from_slice(SIGNATURE);
    data[0x21] = 0x1A;
    data[0x22] = 0x1A;
    data[0x23] = 0x1A;
    data[0x24] = 30;
    data[0x25..0x27].copy_from_slice(&0x0200u16.to_le_bytes());
    data[0x2B] = 0xEF;
    data[0x2E..0x34].copy_from_slice(b"Square");
    data[0x4E..0x52].copy_from_slice(b"Test");

    let mut ram = sample_ram();
    ram[0x0200..0x0200 + program.len()].copy_from_slice(program);
    data[RAM_OFFSET..RAM_OFFSET + RAM_SIZE].copy_from_slice(&ram);
    data[DSP_OFFSET..DSP_OFFSET + REGISTER_COUNT].copy_from_slice(&voice_registers(key_on));
    data
}

fn build_sfm(meta: &str, program: &[u8], log: &[u8]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(sfm::SIGNATURE);
    data.extend_from_slice(&(meta.len() as u32).to_le_bytes());
    data.extend_from_slice(meta.as_bytes());
    let mut ram = sample_ram();
    ram[0x0200..0x0200 + program.len()].copy_from_slice(program);
    data.extend_from_slice(&ram);
    data.extend_from_slice(&voice_registers(false));
    data.extend_from_slice(log);
    data
}

/// BRA to itself.
const IDLE: [u8; 2] = [0x2F, 0xFE];

/// MOV $F2,#$4C ; MOV $F3,#$01 ; BRA *
const KEY_ON_PROGRAM: [u8; 8] = [0x8F, 0x4C, 0xF2, 0x8F, 0x01, 0xF3, 0x2F, 0xFE];

/// MOV $F2,#$4C ; MOV A,$F4 ; MOV $F3,A ; BRA *
const PORT_KEY_ON_PROGRAM: [u8; 9] = [0x8F, 0x4C, 0xF2, 0xE4, 0xF4, 0xC4, 0xF3, 0x2F, 0xFE];

const SFM_META: &str = "information\n  title: Port Test\n  game: Test\ntiming\n  length: 60000\nsmp\n  regs\n    pc: 512\n    s: 239\n";

fn config() -> PlaybackConfig {
    PlaybackConfig {
        sample_rate: RATE,
        ..Default::default()
    }
}

fn rising_crossings(left: impl Iterator<Item = i16>) -> usize {
    let mut count = 0;
    let mut prev = 0i16;
    for s in left {
        if prev < 0 && s >= 0 {
            count += 1;
        }
        prev = s;
    }
    count
}

#[test]
fn test_probe_both_formats() {
    let spc = build_spc(&IDLE, true);
    let sfm = build_sfm("", &IDLE, &[]);
    assert_eq!(probe_spc(&spc), ProbeResult::Match);
    assert_eq!(probe_spc(&sfm), ProbeResult::NoMatch);
    assert_eq!(probe_sfm(&sfm), ProbeResult::Match);
    assert_eq!(probe_sfm(&spc), ProbeResult::NoMatch);
    assert_eq!(
        probe_spc(&spc[..0x200]),
        ProbeResult::NeedMoreData {
            needed: MIN_FILE_SIZE
        }
    );
}

#[test]
fn test_short_and_foreign_files_are_rejected() {
    let data = build_spc(&IDLE, true);
    assert!(matches!(
        load_spc(&data[..0x8000], config()),
        Err(PlayerError::TooSmall {
            needed: MIN_FILE_SIZE,
            ..
        })
    ));
    let mut bad = data.clone();
    bad[0] = b'X';
    assert!(matches!(
        load_spc(&bad, config()),
        Err(PlayerError::WrongFileType { format: "SPC" })
    ));
    assert!(matches!(
        load_sfm(&data, config()),
        Err(PlayerError::WrongFileType { format: "SFM" })
    ));
}

#[test]
fn test_square_voice_plays_at_its_pitch() {
    let data = build_spc(&IDLE, true);
    let mut music = load_spc(&data, config()).unwrap();
    music.start_track(0).unwrap();
    let mut out = vec![0i16; 2 * 2 * RATE as usize];
    assert_eq!(music.play(&mut out).unwrap(), 2 * RATE as usize);

    let left = out
        .chunks_exact(2)
        .skip(RATE as usize / 2)
        .take(RATE as usize)
        .map(|f| f[0]);
    let measured = rising_crossings(left) as f64;
    assert_abs_diff_eq!(measured, 2000.0, epsilon = 5.0);

    let peak = out.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
    assert!(peak > 4000, "peak {peak}");

    let info = music.track_info(0).unwrap();
    assert_eq!(info.song, "Square");
    assert_eq!(info.system, "Super Nintendo");
    assert_eq!(music.voice_count(), 8);
}

#[test]
fn test_program_keys_voice_on() {
    let silent = build_spc(&IDLE, false);
    let keyed = build_spc(&KEY_ON_PROGRAM, false);

    let mut player = SpcPlayer::new(&silent).unwrap();
    player.set_sample_rate(32_000).unwrap();
    player.start_track(0).unwrap();
    let mut out = vec![0i16; 8_192];
    player.play(&mut out).unwrap();
    assert!(out.iter().all(|&s| s == 0));

    let mut player = SpcPlayer::new(&keyed).unwrap();
    player.set_sample_rate(32_000).unwrap();
    player.start_track(0).unwrap();
    player.play(&mut out).unwrap();
    assert!(out.iter().any(|&s| s != 0));
    assert!(player.voice_levels()[0] > 0.5);
}

#[test]
fn test_muted_voice_is_silent() {
    let data = build_spc(&IDLE, true);
    let cfg = PlaybackConfig {
        mute_mask: 1,
        ..config()
    };
    let mut music = load_spc(&data, cfg).unwrap();
    music.start_track(0).unwrap();
    let mut out = vec![0i16; 8_192];
    music.play(&mut out).unwrap();
    assert!(out.iter().all(|&s| s == 0));
}

#[test]
fn test_restart_is_deterministic() {
    let data = build_spc(&KEY_ON_PROGRAM, false);
    let mut music = load_spc(&data, config()).unwrap();
    let mut first = vec![0i16; 8_192];
    let mut second = vec![0i16; 8_192];
    music.start_track(0).unwrap();
    music.play(&mut first).unwrap();
    music.start_track(0).unwrap();
    music.play(&mut second).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_sfm_port_log_drives_program() {
    let keyed = build_sfm(SFM_META, &PORT_KEY_ON_PROGRAM, &[0x01]);
    let silent = build_sfm(SFM_META, &PORT_KEY_ON_PROGRAM, &[0x00]);

    let mut player = SfmPlayer::new(&keyed).unwrap();
    player.set_sample_rate(32_000).unwrap();
    player.start_track(0).unwrap();
    let mut out = vec![0i16; 8_192];
    player.play(&mut out).unwrap();
    assert!(out.iter().any(|&s| s != 0));
    assert!(player.smp().port_log_remaining().is_empty());

    let mut player = SfmPlayer::new(&silent).unwrap();
    player.set_sample_rate(32_000).unwrap();
    player.start_track(0).unwrap();
    player.play(&mut out).unwrap();
    assert!(out.iter().all(|&s| s == 0));
}

#[test]
fn test_sfm_metadata_and_defaults() {
    let data = build_sfm(SFM_META, &IDLE, &[]);
    let music = load_sfm(&data, config()).unwrap();
    let info = music.track_info(0).unwrap();
    assert_eq!(info.system, "Super Nintendo with log");
    assert_eq!(info.song, "Port Test");
    assert_eq!(info.length_ms, Some(60_000));
    assert_eq!(music.emu().silence_lookahead(), 30);
    assert_eq!(music.emu().max_initial_silence_secs(), 30);
}

#[test]
fn test_sfm_save_resumes_where_it_left_off() {
    let data = build_sfm(SFM_META, &PORT_KEY_ON_PROGRAM, &[0x01]);
    let mut player = SfmPlayer::new(&data).unwrap();
    player.set_sample_rate(32_000).unwrap();
    player.start_track(0).unwrap();
    let mut out = vec![0i16; 16_000];
    player.play(&mut out).unwrap();

    let saved = player.save();
    let file = SfmFile::parse(&saved).unwrap();
    assert_eq!(file.tag("title"), Some("Port Test"));
    assert_eq!(file.metadata.int_value("smp:regs:pc"), Some(player.smp().regs.pc as i64));

    let mut resumed = Smp::new();
    file.restore(&mut resumed);
    let mut original = player.smp().clone();

    let mut a = vec![0i16; 4_096];
    let mut b = vec![0i16; 4_096];
    original.render(&mut a);
    resumed.render(&mut b);
    assert!(a.iter().any(|&s| s != 0));
    assert_eq!(a, b);
}

#[test]
fn test_pitch_scales_frequency() {
    let data = build_spc(&IDLE, true);
    for rate in [32_000u32, RATE] {
        let cfg = PlaybackConfig {
            sample_rate: rate,
            pitch: 2.0,
            ..Default::default()
        };
        let mut music = load_spc(&data, cfg).unwrap();
        music.start_track(0).unwrap();
        let mut out = vec![0i16; 2 * rate as usize];
        music.play(&mut out).unwrap();
        let left = out
            .chunks_exact(2)
            .skip(rate as usize / 2)
            .take(rate as usize / 2)
            .map(|f| f[0]);
        let measured = rising_crossings(left) as f64;
        assert_abs_diff_eq!(measured, 2000.0, epsilon = 5.0);
    }
}

#[test]
fn test_embedded_length_can_be_ignored() {
    let data = build_sfm(SFM_META, &IDLE, &[]);
    let music = |ignore_embedded_track_length| {
        let cfg = PlaybackConfig {
            sample_rate: 8_000,
            default_length_ms: 1_000,
            end_behavior: chipsound_common::EndBehavior::Stop,
            ignore_silence: true,
            ignore_embedded_track_length,
            ..Default::default()
        };
        let mut music = load_sfm(&data, cfg).unwrap();
        music.start_track(0).unwrap();
        music
    };

    assert_eq!(music(false).length_ms(), Some(60_000));

    let mut short = music(true);
    assert_eq!(short.length_ms(), Some(1_000));
    let mut out = vec![0i16; 2_000 * 2];
    let mut total = 0;
    loop {
        let frames = short.play(&mut out).unwrap();
        if frames == 0 {
            break;
        }
        total += frames;
    }
    assert_eq!(total, 8_000);
}
