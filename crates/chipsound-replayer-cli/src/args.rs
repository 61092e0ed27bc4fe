//! Command-line arguments for the renderer.
//!
//! Options come from three places, later ones winning: the built-in
//! defaults, an optional JSON config file and the flags given here.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chipsound_common::{EndBehavior, InterpolationMode, PlaybackConfig};
use clap::{Parser, ValueEnum};

/// Resampling filter choice on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InterpolationArg {
    /// Nearest sample
    None,
    /// Linear interpolation
    Linear,
    /// Cubic spline
    Cubic,
    /// Windowed sinc
    Sinc,
}

impl From<InterpolationArg> for InterpolationMode {
    fn from(arg: InterpolationArg) -> Self {
        match arg {
            InterpolationArg::None => InterpolationMode::None,
            InterpolationArg::Linear => InterpolationMode::Linear,
            InterpolationArg::Cubic => InterpolationMode::Cubic,
            InterpolationArg::Sinc => InterpolationMode::Sinc,
        }
    }
}

/// End-of-track handling on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EndArg {
    /// Fade out, then stop
    Fadeout,
    /// Loop until the render limit
    Loop,
    /// Stop at the play length
    Stop,
}

impl From<EndArg> for EndBehavior {
    fn from(arg: EndArg) -> Self {
        match arg {
            EndArg::Fadeout => EndBehavior::Fadeout,
            EndArg::Loop => EndBehavior::Loop,
            EndArg::Stop => EndBehavior::Stop,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "chipsound-render")]
#[command(version, about = "Render NSF, SPC and SFM chiptunes to WAV")]
pub struct CliArgs {
    /// Input file (.nsf, .spc or .sfm)
    pub input: PathBuf,

    /// Output WAV file [default: input with a .wav extension]
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// JSON playback configuration
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output sample rate in Hz
    #[arg(short, long)]
    pub rate: Option<u32>,

    /// Track to render, 0-based; -1 renders every track in turn
    #[arg(short, long, allow_negative_numbers = true)]
    pub track: Option<i32>,

    /// Extra plays after the first
    #[arg(long)]
    pub repeat: Option<i32>,

    /// Tempo scale, 1.0 is normal
    #[arg(long)]
    pub tempo: Option<f64>,

    /// Voices to mute, one bit per voice (0x prefix for hex)
    #[arg(long, value_parser = parse_mask)]
    pub mute: Option<u32>,

    /// Resampling filter
    #[arg(long, value_enum)]
    pub interpolation: Option<InterpolationArg>,

    /// What happens once the play length has elapsed
    #[arg(long, value_enum)]
    pub end: Option<EndArg>,

    /// Master gain in millibel
    #[arg(long, allow_negative_numbers = true)]
    pub gain: Option<i32>,

    /// Use the default length and fade even when the file declares its own
    #[arg(long)]
    pub ignore_length: bool,

    /// Stop after this many seconds whatever the track length
    #[arg(long, default_value_t = 600)]
    pub max_seconds: u32,

    /// Write 32-bit float samples instead of 16-bit integers
    #[arg(long)]
    pub float: bool,

    /// Print track information and exit
    #[arg(long)]
    pub info: bool,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    pub dump_config: bool,
}

fn parse_mask(text: &str) -> std::result::Result<u32, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("invalid mask {text:?}: {e}"))
}

impl CliArgs {
    /// Output path, derived from the input when not given.
    pub fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| self.input.with_extension("wav"))
    }

    /// Configuration file contents with the flag overrides applied.
    pub fn playback_config(&self) -> Result<PlaybackConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                PlaybackConfig::from_json(&text)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => PlaybackConfig::default(),
        };
        self.apply_overrides(&mut config);
        config.validate().context("invalid playback option")?;
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut PlaybackConfig) {
        if let Some(rate) = self.rate {
            config.sample_rate = rate;
        }
        if let Some(track) = self.track {
            config.subsong = track;
        }
        if let Some(repeat) = self.repeat {
            config.repeat_count = repeat;
        }
        if let Some(tempo) = self.tempo {
            config.tempo = tempo;
        }
        if let Some(mask) = self.mute {
            config.mute_mask = mask;
        }
        if let Some(interpolation) = self.interpolation {
            config.interpolation = interpolation.into();
        }
        if let Some(end) = self.end {
            config.end_behavior = end.into();
        }
        if let Some(gain) = self.gain {
            config.gain_millibel = gain;
        }
        if self.ignore_length {
            config.ignore_embedded_track_length = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("chipsound-render").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["song.spc"]);
        assert_eq!(args.output_path(), PathBuf::from("song.wav"));
        assert_eq!(args.max_seconds, 600);
        assert_eq!(args.playback_config().unwrap(), PlaybackConfig::default());
    }

    #[test]
    fn test_flags_override_config() {
        let args = parse(&[
            "song.nsf",
            "-o",
            "out.wav",
            "--rate",
            "48000",
            "--track",
            "-1",
            "--mute",
            "0x05",
            "--interpolation",
            "sinc",
            "--end",
            "stop",
            "--gain",
            "-300",
            "--ignore-length",
        ]);
        assert_eq!(args.output_path(), PathBuf::from("out.wav"));
        let config = args.playback_config().unwrap();
        assert_eq!(config.sample_rate, 48_000);
        assert!(config.plays_all());
        assert_eq!(config.mute_mask, 5);
        assert_eq!(config.interpolation, InterpolationMode::Sinc);
        assert_eq!(config.end_behavior, EndBehavior::Stop);
        assert_eq!(config.gain_millibel, -300);
        assert!(config.ignore_embedded_track_length);
    }

    #[test]
    fn test_out_of_range_override_is_rejected() {
        let args = parse(&["song.nsf", "--rate", "1000"]);
        assert!(args.playback_config().is_err());
    }

    #[test]
    fn test_missing_config_file_is_reported() {
        let args = parse(&["song.nsf", "--config", "/nonexistent/chipsound.json"]);
        let err = args.playback_config().unwrap_err();
        assert!(format!("{err:#}").contains("reading config"));
    }

    #[test]
    fn test_parse_mask() {
        assert_eq!(parse_mask("12"), Ok(12));
        assert_eq!(parse_mask("0xff"), Ok(255));
        assert!(parse_mask("voice").is_err());
    }
}
