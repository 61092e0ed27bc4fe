//! Playback configuration.
//!
//! [`PlaybackConfig`] is plain data: it round-trips through JSON and is
//! checked once by [`PlaybackConfig::validate`] before a track wrapper
//! accepts it.

use serde::{Deserialize, Serialize};

use crate::error::{PlayerError, Result};
use crate::metadata::TrackInfo;
use chipsound::Interpolation;

/// Lowest supported output rate.
pub const MIN_SAMPLE_RATE: u32 = 8_000;
/// Highest supported output rate.
pub const MAX_SAMPLE_RATE: u32 = 192_000;
/// Play every track in turn.
pub const PLAY_ALL: i32 = -1;
/// Repeat without end.
pub const REPEAT_FOREVER: i32 = -1;

/// Resampling filter for formats that render at a fixed native rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMode {
    /// Nearest sample.
    None,
    /// Linear interpolation.
    #[default]
    Linear,
    /// Cubic spline.
    Cubic,
    /// Windowed sinc.
    Sinc,
}

impl From<InterpolationMode> for Interpolation {
    fn from(mode: InterpolationMode) -> Self {
        match mode {
            InterpolationMode::None => Interpolation::None,
            InterpolationMode::Linear => Interpolation::Linear,
            InterpolationMode::Cubic => Interpolation::Cubic,
            InterpolationMode::Sinc => Interpolation::Sinc,
        }
    }
}

/// What happens once a track's play length has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndBehavior {
    /// Fade out over the track's fade length, then end.
    #[default]
    Fadeout,
    /// Keep looping; the track never ends on its own.
    Loop,
    /// End at the play length without a fade.
    Stop,
}

/// Every recognized playback option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Output rate in Hz.
    pub sample_rate: u32,
    /// Track to play, or [`PLAY_ALL`].
    pub subsong: i32,
    /// Extra plays after the first, or [`REPEAT_FOREVER`].
    pub repeat_count: i32,
    /// Master gain in millibel (0 is unity).
    pub gain_millibel: i32,
    /// Stereo width in percent: 0 mono, 100 unchanged, 200 double.
    pub stereo_separation: u32,
    /// Resampling filter.
    pub interpolation: InterpolationMode,
    /// Strength of gain smoothing, 0 (instant) to 10.
    pub volume_ramping: u32,
    /// Voices to mute, one bit per voice.
    pub mute_mask: u32,
    /// Tempo scale, 1.0 normal.
    pub tempo: f64,
    /// Pitch scale, 1.0 normal.
    pub pitch: f64,
    /// End-of-track handling.
    pub end_behavior: EndBehavior,
    /// Length used when the file declares none.
    pub default_length_ms: u32,
    /// Fade used when the file declares none.
    pub default_fade_ms: u32,
    /// Use the default length and fade even when the file declares its own.
    pub ignore_embedded_track_length: bool,
    /// Disable silence detection and initial silence skipping.
    pub ignore_silence: bool,
    /// Treble equalization override in dB.
    pub treble_db: Option<f64>,
    /// Bass cutoff override in Hz.
    pub bass_hz: Option<f64>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            subsong: 0,
            repeat_count: 0,
            gain_millibel: 0,
            stereo_separation: 100,
            interpolation: InterpolationMode::default(),
            volume_ramping: 0,
            mute_mask: 0,
            tempo: 1.0,
            pitch: 1.0,
            end_behavior: EndBehavior::default(),
            default_length_ms: 150_000,
            default_fade_ms: 8_000,
            ignore_embedded_track_length: false,
            ignore_silence: false,
            treble_db: None,
            bass_hz: None,
        }
    }
}

fn invalid(field: &'static str, msg: impl Into<String>) -> PlayerError {
    PlayerError::InvalidConfig {
        field,
        msg: msg.into(),
    }
}

impl PlaybackConfig {
    /// Check every field against its supported range.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(invalid(
                "sample_rate",
                format!("{} outside {MIN_SAMPLE_RATE}..={MAX_SAMPLE_RATE}", self.sample_rate),
            ));
        }
        if self.subsong < PLAY_ALL {
            return Err(invalid("subsong", format!("{} is below -1", self.subsong)));
        }
        if self.repeat_count < REPEAT_FOREVER {
            return Err(invalid("repeat_count", format!("{} is below -1", self.repeat_count)));
        }
        if !(-10_000..=2_000).contains(&self.gain_millibel) {
            return Err(invalid("gain_millibel", format!("{} outside -10000..=2000", self.gain_millibel)));
        }
        if self.stereo_separation > 200 {
            return Err(invalid("stereo_separation", format!("{} above 200", self.stereo_separation)));
        }
        if self.volume_ramping > 10 {
            return Err(invalid("volume_ramping", format!("{} above 10", self.volume_ramping)));
        }
        if !(0.02..=4.0).contains(&self.tempo) {
            return Err(invalid("tempo", format!("{} outside 0.02..=4.0", self.tempo)));
        }
        if !(0.25..=4.0).contains(&self.pitch) {
            return Err(invalid("pitch", format!("{} outside 0.25..=4.0", self.pitch)));
        }
        if let Some(treble) = self.treble_db {
            if !(-50.0..=5.0).contains(&treble) {
                return Err(invalid("treble_db", format!("{treble} outside -50..=5")));
            }
        }
        if let Some(bass) = self.bass_hz {
            if !(1.0..=16_000.0).contains(&bass) {
                return Err(invalid("bass_hz", format!("{bass} outside 1..=16000")));
            }
        }
        Ok(())
    }

    /// Parse and validate a JSON document. Missing fields take defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Master gain as a linear factor.
    pub fn gain_factor(&self) -> f32 {
        10f32.powf(self.gain_millibel as f32 / 2000.0)
    }

    /// Stereo frames over which gain changes are smoothed.
    pub fn ramp_frames(&self) -> usize {
        // 5 ms per step
        (self.sample_rate as usize * self.volume_ramping as usize * 5) / 1000
    }

    /// Track number to start with.
    pub fn first_track(&self) -> usize {
        self.subsong.max(0) as usize
    }

    /// Play length of `info` with `repeats` extra plays, falling back to the
    /// default length for files that declare none.
    pub fn play_length_ms(&self, info: &TrackInfo, repeats: u32) -> u64 {
        let plays = repeats as u64 + 1;
        let declared = if self.ignore_embedded_track_length {
            None
        } else {
            info.play_length_ms(repeats)
        };
        declared.unwrap_or(self.default_length_ms as u64 * plays)
    }

    /// Fade length for `info`.
    pub fn fade_ms(&self, info: &TrackInfo) -> u64 {
        let declared = if self.ignore_embedded_track_length {
            None
        } else {
            info.fade_ms
        };
        declared.unwrap_or(self.default_fade_ms) as u64
    }

    /// True when every track should play in turn.
    pub fn plays_all(&self) -> bool {
        self.subsong == PLAY_ALL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_defaults_validate() {
        assert!(PlaybackConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_fields() {
        let config = PlaybackConfig {
            sample_rate: 4_000,
            ..Default::default()
        };
        match config.validate() {
            Err(PlayerError::InvalidConfig { field, .. }) => assert_eq!(field, "sample_rate"),
            other => panic!("unexpected {other:?}"),
        }

        let config = PlaybackConfig {
            tempo: 8.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PlayerError::InvalidConfig { field: "tempo", .. })
        ));
    }

    #[test]
    fn test_json_round_trip_with_partial_document() {
        let config = PlaybackConfig::from_json(
            r#"{ "sample_rate": 48000, "interpolation": "sinc", "end_behavior": "stop" }"#,
        )
        .unwrap();
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.interpolation, InterpolationMode::Sinc);
        assert_eq!(config.end_behavior, EndBehavior::Stop);
        assert_eq!(config.repeat_count, 0);

        let text = config.to_json().unwrap();
        assert_eq!(PlaybackConfig::from_json(&text).unwrap(), config);
    }

    #[test]
    fn test_default_length_counts_repeats() {
        let config = PlaybackConfig {
            default_length_ms: 1000,
            ..Default::default()
        };
        let undeclared = TrackInfo::default();
        assert_eq!(config.play_length_ms(&undeclared, 0), 1000);
        assert_eq!(config.play_length_ms(&undeclared, 2), 3000);
        assert_eq!(config.fade_ms(&undeclared), 8000);
    }

    #[test]
    fn test_ignore_embedded_track_length() {
        let info = TrackInfo {
            length_ms: Some(90_000),
            fade_ms: Some(2_000),
            ..Default::default()
        };
        let mut config = PlaybackConfig {
            default_length_ms: 1000,
            default_fade_ms: 500,
            ..Default::default()
        };
        assert_eq!(config.play_length_ms(&info, 1), 180_000);
        assert_eq!(config.fade_ms(&info), 2_000);

        config.ignore_embedded_track_length = true;
        assert_eq!(config.play_length_ms(&info, 1), 2000);
        assert_eq!(config.fade_ms(&info), 500);
    }

    #[test]
    fn test_gain_factor() {
        let mut config = PlaybackConfig::default();
        assert_relative_eq!(config.gain_factor(), 1.0);
        config.gain_millibel = -600;
        assert_relative_eq!(config.gain_factor(), 0.501, epsilon = 0.001);
    }
}
