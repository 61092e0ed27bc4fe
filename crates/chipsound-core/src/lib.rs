//! Sound synthesis primitives for classic game music
//!
//! The building blocks shared by the chiptune replayers in this workspace:
//! band-limited step synthesis, sample rate conversion, the output filter
//! stage and emulations of the sound chips found in NES cartridges and
//! arcade/console PCM hardware.
//!
//! # Features
//! - [`BlipBuffer`] / [`BlipSynth`]: amplitude changes become band-limited
//!   impulses, so square and wavetable voices emerge at the output rate
//!   without aliasing
//! - [`StereoBuffer`]: centre, left and right buffers mixed to stereo
//! - [`Resampler`] and [`DualResampler`]: FIR rate conversion with
//!   selectable interpolation, plus the mixer that combines a fixed-rate
//!   stream with blip output
//! - [`filter`]: bass/gain filter, soft limiter, gain ramps and stereo
//!   separation
//! - [`chips`]: NES APU and its expansions, SegaPCM, OKIM6258, RF5C68 and SCC
//!
//! # Quick start
//! ```no_run
//! use chipsound::chips::nes_apu::{NesApu, CLOCK_NTSC};
//! use chipsound::chips::SoundChip;
//! use chipsound::BlipBuffer;
//!
//! let mut buf = BlipBuffer::new();
//! buf.set_sample_rate(44_100, 100).unwrap();
//! buf.set_clock_rate(CLOCK_NTSC);
//! let mut out = [buf];
//!
//! let mut apu = NesApu::new();
//! apu.set_output(Some(0));
//! apu.write(&mut out, 0, 0x4015, 0x01); // enable square 1
//! apu.write(&mut out, 0, 0x4000, 0xBF); // constant volume 15
//! apu.write(&mut out, 0, 0x4002, 0xFD); // ~440 Hz
//! apu.write(&mut out, 0, 0x4003, 0x00);
//! apu.end_frame(&mut out, 29_780);
//! out[0].end_frame(29_780);
//!
//! let mut samples = vec![0i16; out[0].samples_avail()];
//! out[0].read_samples(&mut samples, false);
//! ```

#![warn(missing_docs)]

pub mod blip_buffer;
pub mod chips;
pub mod error;
pub mod filter;
pub mod resampler;
pub mod stereo_buffer;

pub use blip_buffer::{BlipBuffer, BlipEq, BlipSynth, BlipTime};
pub use chips::{SoundChip, StreamChip, TimedStream};
pub use error::{CoreError, Result};
pub use filter::{GainRamp, OutputFilter, SoftLimiter};
pub use resampler::{DualResampler, Interpolation, Resampler};
pub use stereo_buffer::StereoBuffer;
