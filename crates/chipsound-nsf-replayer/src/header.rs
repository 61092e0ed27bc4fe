//! The 128-byte NSF header.

use bitflags::bitflags;

use crate::error::{NsfError, Result};
use chipsound_common::ProbeResult;

/// Size of the fixed header; ROM data follows it.
pub const HEADER_SIZE: usize = 0x80;
/// File signature.
pub const MAGIC: &[u8; 5] = b"NESM\x1A";
/// Address the header's zero addresses stand for.
pub const ROM_ADDR: u16 = 0x8000;

/// NTSC CPU clock in Hz.
pub const CLOCK_NTSC: f64 = 1_789_772.727_272_727;
/// PAL CPU clock in Hz.
pub const CLOCK_PAL: f64 = 1_662_607.125;

bitflags! {
    /// Expansion sound hardware declared by the header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExpansionChips: u8 {
        /// Konami VRC6.
        const VRC6 = 0x01;
        /// Konami VRC7.
        const VRC7 = 0x02;
        /// Famicom Disk System.
        const FDS = 0x04;
        /// Nintendo MMC5.
        const MMC5 = 0x08;
        /// Namco 163.
        const NAMCO = 0x10;
        /// Sunsoft FME-7.
        const FME7 = 0x20;
    }
}

impl ExpansionChips {
    /// Chips this player emulates.
    pub const SUPPORTED: ExpansionChips = ExpansionChips::VRC6
        .union(ExpansionChips::VRC7)
        .union(ExpansionChips::MMC5)
        .union(ExpansionChips::NAMCO)
        .union(ExpansionChips::FME7);
}

/// Parsed NSF header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsfHeader {
    /// Format version, 1 for every known file.
    pub version: u8,
    /// Number of tracks.
    pub track_count: u8,
    /// 1-based track to start with.
    pub first_track: u8,
    /// Raw load address field.
    pub load_addr: u16,
    /// Raw init address field.
    pub init_addr: u16,
    /// Raw play address field.
    pub play_addr: u16,
    /// Game title.
    pub game: String,
    /// Composer.
    pub author: String,
    /// Copyright line.
    pub copyright: String,
    /// NTSC play period in microseconds.
    pub ntsc_speed: u16,
    /// Initial bank numbers for `$8000..=$FFFF`; all zero means none.
    pub banks: [u8; 8],
    /// PAL play period in microseconds.
    pub pal_speed: u16,
    /// Bit 0 PAL, bit 1 dual NTSC/PAL.
    pub speed_flags: u8,
    /// Raw expansion byte.
    pub chip_flags: u8,
}

fn le16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn text_field(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).trim().to_string()
}

/// Check whether `data` starts an NSF file.
pub fn probe_header(data: &[u8]) -> ProbeResult {
    let prefix = data.len().min(MAGIC.len());
    if data[..prefix] != MAGIC[..prefix] {
        return ProbeResult::NoMatch;
    }
    if data.len() < HEADER_SIZE {
        return ProbeResult::NeedMoreData {
            needed: HEADER_SIZE,
        };
    }
    ProbeResult::Match
}

impl NsfHeader {
    /// Parse the header at the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        match probe_header(data) {
            ProbeResult::NoMatch => return Err(NsfError::InvalidFileId),
            ProbeResult::NeedMoreData { needed } => {
                return Err(NsfError::TooSmall {
                    needed,
                    available: data.len(),
                })
            }
            ProbeResult::Match => {}
        }

        let mut banks = [0u8; 8];
        banks.copy_from_slice(&data[0x70..0x78]);
        Ok(Self {
            version: data[0x05],
            track_count: data[0x06],
            first_track: data[0x07],
            load_addr: le16(data, 0x08),
            init_addr: le16(data, 0x0A),
            play_addr: le16(data, 0x0C),
            game: text_field(&data[0x0E..0x2E]),
            author: text_field(&data[0x2E..0x4E]),
            copyright: text_field(&data[0x4E..0x6E]),
            ntsc_speed: le16(data, 0x6E),
            banks,
            pal_speed: le16(data, 0x78),
            speed_flags: data[0x7A],
            chip_flags: data[0x7B],
        })
    }

    /// True when the tune only runs at PAL timing.
    pub fn pal_only(&self) -> bool {
        self.speed_flags & 3 == 1
    }

    /// CPU clock the tune expects.
    pub fn clock_rate(&self) -> f64 {
        if self.pal_only() {
            CLOCK_PAL
        } else {
            CLOCK_NTSC
        }
    }

    /// CPU clocks between play calls.
    pub fn play_period(&self) -> i32 {
        let (mut clocks, default_rate, rate) = if self.pal_only() {
            (33_247, 0x4E20, self.pal_speed)
        } else {
            (29_780, 0x411A, self.ntsc_speed)
        };
        let rate = if rate == 0 { default_rate } else { rate };
        if rate != default_rate {
            clocks = (rate as f64 * self.clock_rate() / 1_000_000.0) as i32;
        }
        clocks
    }

    /// Declared expansion hardware, unknown bits dropped.
    pub fn expansions(&self) -> ExpansionChips {
        ExpansionChips::from_bits_truncate(self.chip_flags)
    }

    /// True when the header asks for hardware this player lacks.
    pub fn uses_unsupported_chips(&self) -> bool {
        self.chip_flags & !ExpansionChips::SUPPORTED.bits() != 0
    }

    /// Address field resolved, zero meaning [`ROM_ADDR`].
    pub fn resolve_addr(raw: u16) -> u16 {
        if raw == 0 {
            ROM_ADDR
        } else {
            raw
        }
    }

    /// Load address with the zero default applied.
    pub fn load_address(&self) -> u16 {
        Self::resolve_addr(self.load_addr)
    }

    /// True when the header assigns initial banks.
    pub fn has_banks(&self) -> bool {
        self.banks.iter().any(|&b| b != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes() -> Vec<u8> {
        let mut h = vec![0u8; HEADER_SIZE];
        h[..5].copy_from_slice(MAGIC);
        h[5] = 1;
        h[6] = 3;
        h[7] = 1;
        h[0x08..0x0A].copy_from_slice(&0x8000u16.to_le_bytes());
        h[0x0E..0x13].copy_from_slice(b"Quest");
        h[0x6E..0x70].copy_from_slice(&0x411Au16.to_le_bytes());
        h
    }

    #[test]
    fn test_probe_short_buffer_wants_more() {
        assert_eq!(probe_header(b"NES"), ProbeResult::NeedMoreData { needed: HEADER_SIZE });
        assert_eq!(
            probe_header(&header_bytes()[..0x40]),
            ProbeResult::NeedMoreData { needed: HEADER_SIZE }
        );
        assert_eq!(probe_header(b"RIFF"), ProbeResult::NoMatch);
        assert_eq!(probe_header(&header_bytes()), ProbeResult::Match);
    }

    #[test]
    fn test_parse_fields() {
        let header = NsfHeader::parse(&header_bytes()).unwrap();
        assert_eq!(header.track_count, 3);
        assert_eq!(header.game, "Quest");
        assert_eq!(header.play_period(), 29_780);
        assert!(!header.has_banks());
        assert!(matches!(
            NsfHeader::parse(&header_bytes()[..10]),
            Err(NsfError::TooSmall { needed: HEADER_SIZE, .. })
        ));
    }

    #[test]
    fn test_custom_speed_changes_period() {
        let mut bytes = header_bytes();
        // 100 Hz
        bytes[0x6E..0x70].copy_from_slice(&10_000u16.to_le_bytes());
        let header = NsfHeader::parse(&bytes).unwrap();
        assert_eq!(header.play_period(), 17_897);
    }

    #[test]
    fn test_unsupported_chip_flags() {
        let mut bytes = header_bytes();
        bytes[0x7B] = 0x04;
        let header = NsfHeader::parse(&bytes).unwrap();
        assert!(header.uses_unsupported_chips());
        assert!(header.expansions().contains(ExpansionChips::FDS));
        bytes[0x7B] = 0x21;
        assert!(!NsfHeader::parse(&bytes).unwrap().uses_unsupported_chips());
    }
}
