//! Chipsound command-line renderer.
//!
//! Loads an NSF, SPC or SFM file, plays the selected track (or every track
//! with `--track -1`) through the shared track wrapper and writes the result
//! to a WAV file.

mod args;
mod player_factory;
mod wav;

use std::fs;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use args::CliArgs;
use player_factory::{describe, AnyPlayer};
use wav::{export_to_wav, WavEncoding};

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: CliArgs) -> Result<()> {
    let config = args.playback_config()?;
    if args.dump_config {
        println!("{}", config.to_json()?);
        return Ok(());
    }

    let data = fs::read(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let first_track = config.first_track();
    let mut player = AnyPlayer::load(&data, config)
        .with_context(|| format!("loading {}", args.input.display()))?;

    if args.info {
        print!("{}", describe(&player)?);
        return Ok(());
    }

    player.start_track(first_track)?;
    let info = player.track_info(first_track)?;
    match player.length_ms() {
        Some(ms) => tracing::info!(
            "{} track {}: {:?} ({}.{:03} s)",
            player.format().name(),
            first_track,
            info.song,
            ms / 1000,
            ms % 1000
        ),
        None => tracing::info!(
            "{} track {}: {:?} (no end, stopping after {} s)",
            player.format().name(),
            first_track,
            info.song,
            args.max_seconds
        ),
    }

    let output = args.output_path();
    let encoding = if args.float {
        WavEncoding::Float32
    } else {
        WavEncoding::Int16
    };
    let max_frames = args.max_seconds as u64 * player.sample_rate() as u64;
    let frames = export_to_wav(&mut player, &output, encoding, max_frames)?;

    let rate = player.sample_rate() as u64;
    tracing::info!(
        "wrote {} frames ({}.{:01} s) to {}",
        frames,
        frames / rate,
        frames % rate * 10 / rate,
        output.display()
    );
    if let Some(track) = player.current_track() {
        if track != first_track {
            tracing::info!("finished on track {track}");
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    init_logging();
    run(CliArgs::parse())
}
