//! Track playback on top of a format driver.
//!
//! [`MusicEmu`] owns one [`EmuCore`] and adds everything that is the same
//! for every format: track selection, play length and fade, silence
//! detection, seeking, stereo width and master gain.

use chipsound::filter::apply_stereo_separation;
use chipsound::GainRamp;

use crate::config::{EndBehavior, PlaybackConfig, REPEAT_FOREVER};
use crate::emu::EmuCore;
use crate::error::{PlayerError, Result};
use crate::metadata::TrackInfo;
use crate::pcm::{convert_stereo, ChannelLayout};
use crate::player::{ChiptunePlayer, ChiptunePlayerBase, PlaybackState};
use crate::track_filter::{FilterSetup, TrackFilter};

/// A loaded file ready to play tracks.
#[derive(Debug)]
pub struct MusicEmu<E> {
    emu: E,
    config: PlaybackConfig,
    filter: TrackFilter,
    gain: GainRamp,
    current_track: Option<usize>,
    info: TrackInfo,
    length_ms: Option<u64>,
    stop_at: Option<i64>,
    stopped: bool,
    mute_mask: u32,
    tempo: f64,
    state: PlaybackState,
    scratch: Vec<i16>,
}

impl<E: EmuCore> MusicEmu<E> {
    /// Wrap `emu`, applying `config`. No track is started yet.
    pub fn new(mut emu: E, config: PlaybackConfig) -> Result<Self> {
        config.validate()?;
        emu.set_sample_rate(config.sample_rate)?;
        emu.set_interpolation(config.interpolation.into());
        emu.set_pitch(config.pitch);
        emu.set_tempo(config.tempo);

        if config.treble_db.is_some() || config.bass_hz.is_some() {
            let mut eq = emu.equalizer();
            if let Some(treble) = config.treble_db {
                eq.treble_db = treble;
            }
            if let Some(bass) = config.bass_hz {
                eq.bass_hz = bass;
            }
            emu.set_equalizer(eq);
        }
        emu.mute_voices(config.mute_mask);

        let setup = FilterSetup::new(
            config.sample_rate,
            emu.max_initial_silence_secs(),
            emu.silence_lookahead(),
        );
        let mut filter = TrackFilter::new(setup);
        filter.ignore_silence(config.ignore_silence);

        for warning in emu.warnings() {
            log::warn!("{warning}");
        }

        Ok(Self {
            gain: GainRamp::new(config.gain_factor()),
            mute_mask: config.mute_mask,
            tempo: config.tempo,
            emu,
            config,
            filter,
            current_track: None,
            info: TrackInfo::default(),
            length_ms: None,
            stop_at: None,
            stopped: false,
            state: PlaybackState::Stopped,
            scratch: Vec::new(),
        })
    }

    /// The wrapped driver.
    pub fn emu(&self) -> &E {
        &self.emu
    }

    /// The wrapped driver, mutably.
    pub fn emu_mut(&mut self) -> &mut E {
        &mut self.emu
    }

    /// Give up the wrapper and return the driver.
    pub fn into_inner(self) -> E {
        self.emu
    }

    /// Configuration in effect.
    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    /// Output rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    /// Tracks in the file.
    pub fn track_count(&self) -> usize {
        self.emu.track_count()
    }

    /// Track currently selected.
    pub fn current_track(&self) -> Option<usize> {
        self.current_track
    }

    /// Metadata for `track`.
    pub fn track_info(&self, track: usize) -> Result<TrackInfo> {
        let count = self.emu.track_count();
        if track >= count {
            return Err(PlayerError::NoSuchTrack { track, count });
        }
        self.emu.track_info(track)
    }

    /// Play length of the current track including repeats, if bounded.
    pub fn length_ms(&self) -> Option<u64> {
        self.length_ms
    }

    fn msec_to_samples(&self, ms: u64) -> i64 {
        let rate = self.config.sample_rate as u64;
        let sec = ms / 1000;
        ((sec * rate + (ms % 1000) * rate / 1000) * 2) as i64
    }

    /// Start `track` from its beginning.
    pub fn start_track(&mut self, track: usize) -> Result<()> {
        let info = self.track_info(track)?;
        log::debug!("starting track {track} of {}", self.emu.track_count());

        self.current_track = Some(track);
        self.stopped = false;
        self.stop_at = None;
        self.filter.set_setup(FilterSetup::new(
            self.config.sample_rate,
            self.emu.max_initial_silence_secs(),
            self.emu.silence_lookahead(),
        ));
        self.filter.set_fade(None, 0);

        self.emu.start_track(track)?;
        self.filter.start_track(&mut self.emu)?;

        let repeat = self.config.repeat_count;
        self.length_ms = if repeat == REPEAT_FOREVER || self.config.end_behavior == EndBehavior::Loop {
            None
        } else {
            Some(self.config.play_length_ms(&info, repeat as u32))
        };

        if let Some(length) = self.length_ms {
            let end = self.msec_to_samples(length);
            match self.config.end_behavior {
                EndBehavior::Fadeout => {
                    let fade = self.msec_to_samples(self.config.fade_ms(&info));
                    self.filter.set_fade(Some(end), fade);
                }
                EndBehavior::Stop => self.stop_at = Some(end),
                EndBehavior::Loop => {}
            }
        }

        self.gain = GainRamp::new(self.config.gain_factor());
        self.info = info;
        Ok(())
    }

    /// True once the current track has nothing more to play.
    pub fn track_ended(&self) -> bool {
        self.current_track.is_none() || self.stopped || self.filter.track_ended()
    }

    /// Render interleaved stereo into `out`.
    ///
    /// Returns the stereo frames produced; 0 once the track has ended. With
    /// play-all, the next track starts once the current one ends.
    pub fn play(&mut self, out: &mut [i16]) -> Result<usize> {
        let track = self.current_track.ok_or(PlayerError::NoTrackStarted)?;
        let frames = out.len() / 2;
        let out = &mut out[..frames * 2];
        if self.track_ended() {
            out.fill(0);
            return Ok(0);
        }

        let before = self.filter.sample_count();
        let result = self.filter.play(&mut self.emu, out);

        let mut produced = frames;
        if let Some(stop) = self.stop_at {
            if before + out.len() as i64 >= stop {
                let keep = (stop - before).clamp(0, out.len() as i64) as usize & !1;
                out[keep..].fill(0);
                produced = keep / 2;
                self.stopped = true;
            }
        }

        apply_stereo_separation(out, self.config.stereo_separation);
        self.gain.process(out);

        if let Err(err) = result {
            log::warn!("track {track} stopped: {err}");
            return Err(err);
        }

        if self.track_ended() && self.config.plays_all() && track + 1 < self.emu.track_count() {
            self.start_track(track + 1)?;
        }
        Ok(produced)
    }

    /// Render into `out` as 32-bit float in `layout`. Returns frames produced.
    pub fn render_f32(&mut self, out: &mut [f32], layout: ChannelLayout) -> Result<usize> {
        let frames = out.len() / layout.channels();
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.resize(frames * 2, 0);
        let result = self.play(&mut scratch);
        convert_stereo(&scratch, out, layout);
        self.scratch = scratch;
        result
    }

    /// Skip `frames` stereo frames.
    pub fn skip(&mut self, frames: usize) -> Result<()> {
        if self.current_track.is_none() {
            return Err(PlayerError::NoTrackStarted);
        }
        self.filter.skip(&mut self.emu, frames * 2)
    }

    /// Milliseconds played in the current track.
    pub fn tell_ms(&self) -> u64 {
        let rate = self.config.sample_rate as u64;
        let frames = (self.filter.sample_count() / 2) as u64;
        frames / rate * 1000 + frames % rate * 1000 / rate
    }

    /// Move to `ms` in the current track, restarting it when seeking back.
    pub fn seek_ms(&mut self, ms: u64) -> Result<()> {
        let track = self.current_track.ok_or(PlayerError::NoTrackStarted)?;
        let target = self.msec_to_samples(ms);
        let mut now = self.filter.sample_count();
        if target < now {
            let fade = self.filter.fade();
            let stop_at = self.stop_at;
            self.start_track(track)?;
            self.filter.restore_fade(fade);
            self.stop_at = stop_at;
            now = 0;
        }
        let remain = (target - now) as usize;
        self.filter.skip(&mut self.emu, remain)?;
        if let Some(stop) = self.stop_at {
            self.stopped = target >= stop;
        }
        Ok(())
    }

    /// Fade out over `length_ms` starting at `start_ms`; `None` never fades.
    pub fn set_fade(&mut self, start_ms: Option<u64>, length_ms: u64) {
        let start = start_ms.map(|ms| self.msec_to_samples(ms));
        let length = self.msec_to_samples(length_ms);
        self.filter.set_fade(start, length);
    }

    /// Disable end-of-track detection by silence.
    pub fn ignore_silence(&mut self, ignore: bool) {
        self.filter.ignore_silence(ignore);
    }

    /// Scale playback speed, 1.0 normal.
    pub fn set_tempo(&mut self, tempo: f64) {
        let tempo = tempo.clamp(0.02, 4.0);
        self.tempo = tempo;
        self.emu.set_tempo(tempo);
    }

    /// Current tempo scale.
    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    /// Change master gain, smoothing over the configured ramp.
    pub fn set_gain_millibel(&mut self, millibel: i32) {
        self.config.gain_millibel = millibel.clamp(-10_000, 2_000);
        self.gain
            .set_target(self.config.gain_factor(), self.config.ramp_frames());
    }

    /// Number of mutable voices.
    pub fn voice_count(&self) -> usize {
        self.emu.voice_names().len()
    }

    /// Voice names in mask bit order.
    pub fn voice_names(&self) -> Vec<&'static str> {
        self.emu.voice_names()
    }

    /// Mute or unmute one voice.
    pub fn mute_voice(&mut self, index: usize, mute: bool) {
        if index >= 32 {
            return;
        }
        let bit = 1u32 << index;
        let mask = if mute {
            self.mute_mask | bit
        } else {
            self.mute_mask & !bit
        };
        self.mute_voices(mask);
    }

    /// Mute voices whose bit is set.
    pub fn mute_voices(&mut self, mask: u32) {
        self.mute_mask = mask;
        self.emu.mute_voices(mask);
    }

    /// Mask of muted voices.
    pub fn muted_voices(&self) -> u32 {
        self.mute_mask
    }

    /// Approximate level of each voice.
    pub fn voice_levels(&self) -> Vec<f32> {
        self.emu.voice_levels()
    }

    /// Problems found while loading.
    pub fn warnings(&self) -> &[String] {
        self.emu.warnings()
    }

    /// Metadata of the current track.
    pub fn info(&self) -> &TrackInfo {
        &self.info
    }
}

impl<E: EmuCore + Send> ChiptunePlayerBase for MusicEmu<E> {
    fn play(&mut self) {
        if self.current_track.is_none() || self.track_ended() {
            let track = self.current_track.unwrap_or(self.config.first_track());
            if let Err(err) = self.start_track(track) {
                log::warn!("cannot start track {track}: {err}");
                return;
            }
        }
        self.state = PlaybackState::Playing;
    }

    fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
        }
    }

    fn stop(&mut self) {
        self.state = PlaybackState::Stopped;
        if let Some(track) = self.current_track {
            if let Err(err) = self.start_track(track) {
                log::warn!("cannot rewind track {track}: {err}");
            }
        }
    }

    fn state(&self) -> PlaybackState {
        self.state
    }

    fn render_into(&mut self, buffer: &mut [f32]) -> usize {
        if self.state != PlaybackState::Playing {
            buffer.fill(0.0);
            return 0;
        }
        match self.render_f32(buffer, ChannelLayout::Stereo) {
            Ok(0) => {
                self.state = PlaybackState::Stopped;
                0
            }
            Ok(frames) => frames,
            Err(err) => {
                log::warn!("playback failed: {err}");
                self.state = PlaybackState::Stopped;
                0
            }
        }
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn voice_count(&self) -> usize {
        self.emu.voice_names().len()
    }

    fn set_voice_muted(&mut self, index: usize, muted: bool) {
        self.mute_voice(index, muted);
    }

    fn is_voice_muted(&self, index: usize) -> bool {
        index < 32 && self.mute_mask & (1 << index) != 0
    }

    fn track_count(&self) -> usize {
        self.emu.track_count()
    }

    fn track(&self) -> usize {
        self.current_track.unwrap_or(self.config.first_track())
    }

    fn select_track(&mut self, index: usize) -> bool {
        self.start_track(index).is_ok()
    }

    fn duration_ms(&self) -> Option<u64> {
        self.length_ms
    }

    fn elapsed_ms(&self) -> u64 {
        self.tell_ms()
    }

    fn seek_to(&mut self, fraction: f32) -> bool {
        match self.length_ms {
            Some(length) => {
                let ms = (length as f64 * fraction.clamp(0.0, 1.0) as f64) as u64;
                self.seek_ms(ms).is_ok()
            }
            None => false,
        }
    }
}

impl<E: EmuCore + Send> ChiptunePlayer for MusicEmu<E> {
    type Metadata = TrackInfo;

    fn metadata(&self) -> &TrackInfo {
        &self.info
    }
}
