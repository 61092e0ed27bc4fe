//! Track metadata.
//!
//! [`TrackInfo`] is what every format driver reports for a track;
//! [`MetadataFields`] is the read-only view players expose.

use serde::{Deserialize, Serialize};

/// Uniform read access to song metadata.
pub trait MetadataFields {
    /// Song title.
    fn title(&self) -> &str;

    /// Composer.
    fn author(&self) -> &str;

    /// Free-form comment, empty when absent.
    fn comments(&self) -> &str {
        ""
    }

    /// Format or system name, e.g. "Nintendo NES".
    fn format(&self) -> &str;

    /// Declared duration in seconds, if known.
    fn duration_seconds(&self) -> Option<f32> {
        None
    }
}

/// Metadata and timing of one track.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    /// Console or chip family.
    pub system: String,
    /// Game the music comes from.
    pub game: String,
    /// Song title.
    pub song: String,
    /// Composer.
    pub author: String,
    /// Copyright line.
    pub copyright: String,
    /// Comment.
    pub comment: String,
    /// Who ripped the file.
    pub dumper: String,
    /// Tracks in the file.
    pub track_count: usize,
    /// Total length, if the file declares one.
    pub length_ms: Option<u32>,
    /// Length of the non-repeating intro.
    pub intro_ms: Option<u32>,
    /// Length of one loop.
    pub loop_ms: Option<u32>,
    /// Fade length the file asks for.
    pub fade_ms: Option<u32>,
}

impl TrackInfo {
    /// Length for one play plus `repeats` repeats, if it can be derived.
    ///
    /// A declared loop repeats after the intro; otherwise the whole declared
    /// length repeats.
    pub fn play_length_ms(&self, repeats: u32) -> Option<u64> {
        let plays = repeats as u64 + 1;
        match (self.loop_ms, self.length_ms) {
            (Some(loop_ms), _) if loop_ms > 0 => {
                Some(self.intro_ms.unwrap_or(0) as u64 + loop_ms as u64 * plays)
            }
            (_, Some(length)) if length > 0 => Some(length as u64 * plays),
            _ => None,
        }
    }
}

impl MetadataFields for TrackInfo {
    fn title(&self) -> &str {
        if self.song.is_empty() {
            &self.game
        } else {
            &self.song
        }
    }

    fn author(&self) -> &str {
        &self.author
    }

    fn comments(&self) -> &str {
        &self.comment
    }

    fn format(&self) -> &str {
        &self.system
    }

    fn duration_seconds(&self) -> Option<f32> {
        self.play_length_ms(0).map(|ms| ms as f32 / 1000.0)
    }
}

/// Outcome of testing a file prefix against a format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The data carries this format's signature.
    Match,
    /// The data is some other format.
    NoMatch,
    /// The prefix is too short to decide.
    NeedMoreData {
        /// Bytes required for a verdict.
        needed: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_play_length_prefers_loop() {
        let info = TrackInfo {
            length_ms: Some(60_000),
            intro_ms: Some(2_000),
            loop_ms: Some(10_000),
            ..Default::default()
        };
        assert_eq!(info.play_length_ms(0), Some(12_000));
        assert_eq!(info.play_length_ms(2), Some(32_000));
    }

    #[test]
    fn test_play_length_repeats_whole_track() {
        let info = TrackInfo {
            length_ms: Some(1_000),
            ..Default::default()
        };
        assert_eq!(info.play_length_ms(2), Some(3_000));
        assert_eq!(TrackInfo::default().play_length_ms(0), None);
    }

    #[test]
    fn test_title_falls_back_to_game() {
        let info = TrackInfo {
            game: "Mega Quest".into(),
            ..Default::default()
        };
        assert_eq!(info.title(), "Mega Quest");
    }
}
