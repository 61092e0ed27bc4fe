//! WAV export.

use std::io::{Seek, Write};
use std::path::Path;

use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};

use crate::player_factory::AnyPlayer;

/// Stereo frames rendered per call into the player.
const BLOCK_FRAMES: usize = 4096;

/// Sample encoding of the output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WavEncoding {
    /// 16-bit signed integers, the players' native format.
    Int16,
    /// 32-bit IEEE float.
    Float32,
}

/// Header for a stereo file at `sample_rate`.
pub fn wav_spec(sample_rate: u32, encoding: WavEncoding) -> WavSpec {
    match encoding {
        WavEncoding::Int16 => WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        },
        WavEncoding::Float32 => WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        },
    }
}

/// Render `player` into a new file at `path`. Returns the frames written.
pub fn export_to_wav(
    player: &mut AnyPlayer,
    path: &Path,
    encoding: WavEncoding,
    max_frames: u64,
) -> Result<u64> {
    let spec = wav_spec(player.sample_rate(), encoding);
    let writer = WavWriter::create(path, spec)
        .with_context(|| format!("creating {}", path.display()))?;
    render_into(player, writer, encoding, max_frames)
}

/// Render `player` until its track ends or `max_frames` have been written,
/// then finalize the file.
pub fn render_into<W: Write + Seek>(
    player: &mut AnyPlayer,
    mut writer: WavWriter<W>,
    encoding: WavEncoding,
    max_frames: u64,
) -> Result<u64> {
    let mut written = 0u64;
    let mut pcm = vec![0i16; BLOCK_FRAMES * 2];
    let mut float = vec![0f32; BLOCK_FRAMES * 2];

    while written < max_frames {
        let want = (max_frames - written).min(BLOCK_FRAMES as u64) as usize;
        let frames = match encoding {
            WavEncoding::Int16 => {
                let frames = player.play(&mut pcm[..want * 2])?;
                for &sample in &pcm[..frames * 2] {
                    writer.write_sample(sample).context("writing sample")?;
                }
                frames
            }
            WavEncoding::Float32 => {
                let frames = player.play_f32(&mut float[..want * 2])?;
                for &sample in &float[..frames * 2] {
                    writer.write_sample(sample).context("writing sample")?;
                }
                frames
            }
        };
        if frames == 0 {
            break;
        }
        written += frames as u64;
    }

    writer.finalize().context("finalizing WAV file")?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player_factory::idle_spc;
    use chipsound_common::PlaybackConfig;
    use std::io::Cursor;

    fn render(encoding: WavEncoding, max_frames: u64) -> (u64, hound::WavReader<Cursor<Vec<u8>>>) {
        let config = PlaybackConfig {
            ignore_silence: true,
            ..Default::default()
        };
        let mut player = AnyPlayer::load(&idle_spc(), config).unwrap();
        player.start_track(0).unwrap();
        let mut bytes = Cursor::new(Vec::new());
        let spec = wav_spec(player.sample_rate(), encoding);
        let writer = WavWriter::new(&mut bytes, spec).unwrap();
        let frames = render_into(&mut player, writer, encoding, max_frames).unwrap();
        bytes.set_position(0);
        (frames, hound::WavReader::new(bytes).unwrap())
    }

    #[test]
    fn test_render_stops_at_frame_limit() {
        let (frames, reader) = render(WavEncoding::Int16, 10_000);
        assert_eq!(frames, 10_000);
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 44_100);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.duration(), 10_000);
    }

    #[test]
    fn test_float_render() {
        let (frames, mut reader) = render(WavEncoding::Float32, 5_000);
        assert_eq!(frames, 5_000);
        assert_eq!(reader.spec().sample_format, SampleFormat::Float);
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 10_000);
        assert!(samples.iter().all(|s| s.abs() <= 1.0));
    }
}
