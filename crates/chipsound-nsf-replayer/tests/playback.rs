use approx::assert_abs_diff_eq;
use chipsound_common::{EndBehavior, PlaybackConfig, PlayerError, ProbeResult};
use chipsound_nsf_replayer::header::{CLOCK_NTSC, HEADER_SIZE, MAGIC};
use chipsound_nsf_replayer::{load_nsf, probe_header, NsfPlayer};

const RATE: u32 = 44_100;

/// Single-track image loaded at $8000 with init at $8000 and play at the
/// final RTS of `init`.
fn build_nsf(init: &[u8], chip_flags: u8) -> Vec<u8> {
    let mut data = vec![0u8; HEADER_SIZE];
    data[..5].copy_from_slice(MAGIC);
    data[5] = 1;
    data[6] = 1;
    data[7] = 1;
    let play = 0x8000 + init.len() as u16 - 1;
    data[0x08..0x0A].copy_from_slice(&0x8000u16.to_le_bytes());
    data[0x0A..0x0C].copy_from_slice(&0x8000u16.to_le_bytes());
    data[0x0C..0x0E].copy_from_slice(&play.to_le_bytes());
    data[0x0E..0x14].copy_from_slice(b"Test 1");
    data[0x6E..0x70].copy_from_slice(&0x411Au16.to_le_bytes());
    data[0x7B] = chip_flags;
    data.extend_from_slice(init);
    data
}

/// Square 1 at constant volume 15, 50% duty, period $0FD.
fn square_program() -> Vec<u8> {
    vec![
        0xA9, 0x01, 0x8D, 0x15, 0x40, // LDA #$01 ; STA $4015
        0xA9, 0xBF, 0x8D, 0x00, 0x40, // LDA #$BF ; STA $4000
        0xA9, 0xFD, 0x8D, 0x02, 0x40, // LDA #$FD ; STA $4002
        0xA9, 0x00, 0x8D, 0x03, 0x40, // LDA #$00 ; STA $4003
        0x60, // RTS
    ]
}

/// VRC6 pulse 1 at volume 15, 50% duty, period $0FD.
fn vrc6_program() -> Vec<u8> {
    vec![
        0xA9, 0x7F, 0x8D, 0x00, 0x90, // LDA #$7F ; STA $9000
        0xA9, 0xFD, 0x8D, 0x01, 0x90, // LDA #$FD ; STA $9001
        0xA9, 0x80, 0x8D, 0x02, 0x90, // LDA #$80 ; STA $9002
        0x60, // RTS
    ]
}

fn config() -> PlaybackConfig {
    PlaybackConfig {
        sample_rate: RATE,
        ..Default::default()
    }
}

fn render(data: &[u8], cfg: PlaybackConfig, frames: usize) -> Vec<i16> {
    let mut music = load_nsf(data, cfg).unwrap();
    music.start_track(0).unwrap();
    let mut out = vec![0i16; frames * 2];
    music.play(&mut out).unwrap();
    out
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
fn test_short_header_needs_more_data() {
    let data = build_nsf(&square_program(), 0);
    assert_eq!(
        probe_header(&data[..0x40]),
        ProbeResult::NeedMoreData { needed: HEADER_SIZE }
    );
    assert_eq!(probe_header(&data), ProbeResult::Match);
    assert!(matches!(
        load_nsf(&data[..0x40], config()),
        Err(PlayerError::TooSmall { needed: HEADER_SIZE, .. })
    ));
}

#[test]
fn test_wrong_signature_is_rejected() {
    let mut data = build_nsf(&square_program(), 0);
    data[0] = b'X';
    assert!(matches!(
        load_nsf(&data, config()),
        Err(PlayerError::WrongFileType { format: "NSF" })
    ));
}

#[test]
fn test_renders_requested_frames() {
    let data = build_nsf(&square_program(), 0);
    let mut music = load_nsf(&data, config()).unwrap();
    music.start_track(0).unwrap();
    let mut out = vec![0i16; 4_096 * 2];
    assert_eq!(music.play(&mut out).unwrap(), 4_096);
    assert!(out.iter().any(|&s| s != 0));
    assert_eq!(music.track_info(0).unwrap().game, "Test 1");
    assert_eq!(music.voice_count(), 5);
}

#[test]
fn test_square_fundamental_matches_period() {
    let data = build_nsf(&square_program(), 0);
    let out = render(&data, config(), 2 * RATE as usize);
    // skip the first half second, measure one second
    let start = RATE as usize / 2;
    let left = out
        .chunks_exact(2)
        .skip(start)
        .take(RATE as usize)
        .map(|f| f[0]);
    let measured = rising_crossings(left) as f64;
    let expected = CLOCK_NTSC / (16.0 * (0xFD as f64 + 1.0));
    assert_abs_diff_eq!(measured, expected, epsilon = 3.0);
}

#[test]
fn test_pitch_scales_frequency() {
    let data = build_nsf(&square_program(), 0);
    let cfg = PlaybackConfig {
        pitch: 2.0,
        ..config()
    };
    let out = render(&data, cfg, 2 * RATE as usize);
    let left = out
        .chunks_exact(2)
        .skip(RATE as usize / 2)
        .take(RATE as usize)
        .map(|f| f[0]);
    let measured = rising_crossings(left) as f64;
    let expected = 2.0 * CLOCK_NTSC / (16.0 * 254.0);
    assert_abs_diff_eq!(measured, expected, epsilon = 5.0);
}

#[test]
fn test_restart_is_deterministic() {
    let data = build_nsf(&square_program(), 0);
    let mut music = load_nsf(&data, config()).unwrap();
    let mut first = vec![0i16; 8_192];
    let mut second = vec![0i16; 8_192];
    music.start_track(0).unwrap();
    music.play(&mut first).unwrap();
    music.start_track(0).unwrap();
    music.play(&mut second).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_vrc6_voice_plays_and_mutes() {
    let data = build_nsf(&vrc6_program(), 0x01);
    let out = render(&data, config(), 8_192);
    assert!(out.iter().any(|&s| s != 0));

    // Square 3 is the first voice after the five APU voices
    let cfg = PlaybackConfig {
        mute_mask: 1 << 5,
        ..config()
    };
    let muted = render(&data, cfg, 8_192);
    assert!(muted.iter().all(|&s| s == 0));
}

#[test]
fn test_driver_reports_nsf_defaults() {
    use chipsound_common::EmuCore;

    let data = build_nsf(&square_program(), 0);
    let player = NsfPlayer::new(&data).unwrap();
    assert_eq!(player.silence_lookahead(), 6);
    assert_eq!(player.equalizer().bass_hz, 80.0);
    assert_eq!(player.first_track(), 0);
    assert_eq!(player.track_info(0).unwrap().system, "Nintendo NES");
    assert!(player.warnings().is_empty());
}

#[test]
fn test_unsupported_expansion_is_a_warning() {
    // FDS flag: loads and plays the 2A03 voices only
    let data = build_nsf(&square_program(), 0x04);
    let mut music = load_nsf(&data, config()).unwrap();
    assert!(music
        .warnings()
        .iter()
        .any(|w| w.contains("unsupported audio expansion")));
    music.start_track(0).unwrap();
    let mut out = vec![0i16; 4096 * 2];
    assert_eq!(music.play(&mut out).unwrap(), 4096);
    assert!(out.iter().any(|&s| s != 0));
}

fn frames_until_end(data: &[u8], cfg: PlaybackConfig) -> usize {
    let mut music = load_nsf(data, cfg).unwrap();
    music.start_track(0).unwrap();
    let mut out = vec![0i16; 1_000 * 2];
    let mut total = 0;
    loop {
        let frames = music.play(&mut out).unwrap();
        if frames == 0 {
            break total;
        }
        total += frames;
    }
}

#[test]
fn test_repeat_count_extends_default_length() {
    let data = build_nsf(&square_program(), 0);
    let cfg = |repeat_count| PlaybackConfig {
        sample_rate: 8_000,
        default_length_ms: 1_000,
        end_behavior: EndBehavior::Stop,
        ignore_silence: true,
        repeat_count,
        ..Default::default()
    };
    assert_eq!(frames_until_end(&data, cfg(0)), 8_000);
    assert_eq!(frames_until_end(&data, cfg(2)), 24_000);
}
