//! SPC snapshot files: header, ID666 tags, memory image and the optional
//! xid6 trailer.
//!
//! Layout:
//!
//! | Offset    | Size    | Content                                 |
//! |-----------|---------|-----------------------------------------|
//! | `0x00000` | `0x100` | signature, CPU registers, ID666 tags    |
//! | `0x00100` | 64 KiB  | SMP RAM                                 |
//! | `0x10100` | 128     | DSP registers                           |
//! | `0x101C0` | 64      | RAM hidden under the IPL ROM            |
//! | `0x10200` | rest    | xid6 extended tags                      |

use chipsound_common::{ProbeResult, TrackInfo};
use log::{debug, warn};

use crate::dsp::REGISTER_COUNT;
use crate::error::{Result, SpcError};
use crate::smp::RAM_SIZE;

/// Signature at the start of every SPC file.
pub const SIGNATURE: &[u8; 27] = b"SNES-SPC700 Sound File Data";
/// Size of the header block.
pub const HEADER_SIZE: usize = 0x100;
/// Offset of the RAM image.
pub const RAM_OFFSET: usize = 0x100;
/// Offset of the DSP registers.
pub const DSP_OFFSET: usize = 0x10100;
/// Offset of the RAM under the IPL ROM.
pub const EXTRA_RAM_OFFSET: usize = 0x101C0;
/// Offset of the xid6 trailer.
pub const XID6_OFFSET: usize = 0x10200;
/// Smallest valid file: header, RAM and DSP registers.
pub const MIN_FILE_SIZE: usize = DSP_OFFSET + REGISTER_COUNT;

const SYSTEM: &str = "Super Nintendo";

/// Test whether `data` starts like an SPC file.
pub fn probe_spc(data: &[u8]) -> ProbeResult {
    let prefix = data.len().min(SIGNATURE.len());
    if data[..prefix] != SIGNATURE[..prefix] {
        return ProbeResult::NoMatch;
    }
    if data.len() < MIN_FILE_SIZE {
        return ProbeResult::NeedMoreData {
            needed: MIN_FILE_SIZE,
        };
    }
    ProbeResult::Match
}

/// CPU registers stored in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpcRegisters {
    /// Program counter.
    pub pc: u16,
    /// Accumulator.
    pub a: u8,
    /// X index.
    pub x: u8,
    /// Y index.
    pub y: u8,
    /// Status word.
    pub psw: u8,
    /// Stack pointer.
    pub sp: u8,
}

/// Tags from the ID666 header and the xid6 trailer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpcTags {
    /// Song title.
    pub song: String,
    /// Game title.
    pub game: String,
    /// Composer.
    pub author: String,
    /// Who dumped the file.
    pub dumper: String,
    /// Comment.
    pub comment: String,
    /// Official soundtrack title.
    pub ost: String,
    /// Disc number on the soundtrack.
    pub disc: String,
    /// Track number on the soundtrack, with an optional letter suffix.
    pub track: String,
    /// Copyright, prefixed with the year when one is tagged.
    pub copyright: String,
    /// Dump date.
    pub date: String,
    /// Play length before fading.
    pub length_ms: Option<u32>,
    /// Fade length.
    pub fade_ms: Option<u32>,
}

/// A parsed SPC file.
#[derive(Debug, Clone)]
pub struct SpcFile {
    /// Header format byte at 0x23.
    pub format: u8,
    /// Header version byte at 0x24.
    pub version: u8,
    /// CPU registers.
    pub registers: SpcRegisters,
    /// Full RAM image.
    pub ram: Vec<u8>,
    /// DSP register file.
    pub dsp_registers: [u8; REGISTER_COUNT],
    /// RAM under the IPL ROM, when the file is long enough to carry it.
    pub extra_ram: Option<[u8; 64]>,
    /// Metadata.
    pub tags: SpcTags,
}

impl SpcFile {
    /// Parse a complete file.
    pub fn parse(data: &[u8]) -> Result<Self> {
        match probe_spc(data) {
            ProbeResult::NoMatch => return Err(SpcError::InvalidFileId { format: "SPC" }),
            ProbeResult::NeedMoreData { needed } => {
                return Err(SpcError::TooSmall {
                    format: "SPC",
                    needed,
                    available: data.len(),
                })
            }
            ProbeResult::Match => {}
        }

        let header = &data[..HEADER_SIZE];
        let registers = SpcRegisters {
            pc: u16::from_le_bytes([header[0x25], header[0x26]]),
            a: header[0x27],
            x: header[0x28],
            y: header[0x29],
            psw: header[0x2A],
            sp: header[0x2B],
        };

        let ram = data[RAM_OFFSET..RAM_OFFSET + RAM_SIZE].to_vec();
        let mut dsp_registers = [0u8; REGISTER_COUNT];
        dsp_registers.copy_from_slice(&data[DSP_OFFSET..DSP_OFFSET + REGISTER_COUNT]);

        let extra_ram = data.get(EXTRA_RAM_OFFSET..XID6_OFFSET).map(|bytes| {
            let mut extra = [0u8; 64];
            extra.copy_from_slice(bytes);
            extra
        });

        let mut tags = parse_id666(header);
        if let Some(trailer) = data.get(XID6_OFFSET..).filter(|t| !t.is_empty()) {
            parse_xid6(trailer, &mut tags);
        }

        Ok(Self {
            format: header[0x23],
            version: header[0x24],
            registers,
            ram,
            dsp_registers,
            extra_ram,
            tags,
        })
    }

    /// Metadata in the shared form.
    pub fn track_info(&self) -> TrackInfo {
        TrackInfo {
            system: SYSTEM.to_string(),
            game: self.tags.game.clone(),
            song: self.tags.song.clone(),
            author: self.tags.author.clone(),
            copyright: self.tags.copyright.clone(),
            comment: self.tags.comment.clone(),
            dumper: self.tags.dumper.clone(),
            track_count: 1,
            length_ms: self.tags.length_ms,
            intro_ms: None,
            loop_ms: None,
            fade_ms: self.tags.fade_ms,
        }
    }
}

/// Tag text up to the first NUL, without surrounding junk or placeholder
/// values.
pub(crate) fn text_field(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    let bytes = &data[..end];
    let start = bytes.iter().position(|&b| b > b' ').unwrap_or(bytes.len());
    let stop = bytes.iter().rposition(|&b| b > b' ').map_or(start, |i| i + 1);
    let text = String::from_utf8_lossy(&bytes[start..stop.max(start)]).into_owned();
    match text.as_str() {
        "?" | "<?>" | "< ? >" => String::new(),
        _ => text,
    }
}

/// Decimal digits at the start of `digits`. Returns the value and how many
/// digits were read.
fn text_number(digits: &[u8]) -> (i64, usize) {
    let mut value = 0i64;
    for (i, &b) in digits.iter().enumerate() {
        if !b.is_ascii_digit() {
            return (value, i);
        }
        value = value * 10 + (b - b'0') as i64;
    }
    (value, digits.len())
}

fn parse_id666(header: &[u8]) -> SpcTags {
    let author = &header[0xB0..0xD0];
    // text-format tags shift the author field one byte
    let single_digit_is_text = author[0] != 0 || author[1] == 0;

    // the length can be text or binary and the two are ambiguous
    let len_field = &header[0xA9..0xAC];
    let (mut len_secs, digits) = text_number(len_field);
    if digits == 1 && single_digit_is_text {
        len_secs = 0;
    }
    if len_secs == 0 || len_secs > 0x1FFF {
        len_secs = u16::from_le_bytes([len_field[0], len_field[1]]) as i64;
    }
    let length_ms = (len_secs > 0 && len_secs < 0x1FFF).then(|| len_secs as u32 * 1000);

    let fade_field = &header[0xAC..0xB0];
    let (mut fade_ms, digits) = text_number(fade_field);
    if digits == 1 && single_digit_is_text {
        fade_ms = -1;
    }
    if digits == 4 && author[0].is_ascii_digit() {
        fade_ms = fade_ms * 10 + (author[0] - b'0') as i64;
    }
    if !(0..=0x7FFF).contains(&fade_ms) {
        fade_ms = u32::from_le_bytes([fade_field[0], fade_field[1], fade_field[2], fade_field[3]]) as i64;
    }
    let fade_ms = (fade_ms > 0 && fade_ms < 0x7FFF).then_some(fade_ms as u32);

    let author_offset = usize::from(author[0] < b' ' || author[0].is_ascii_digit());

    SpcTags {
        song: text_field(&header[0x2E..0x4E]),
        game: text_field(&header[0x4E..0x6E]),
        author: text_field(&author[author_offset..]),
        dumper: text_field(&header[0x6E..0x7E]),
        comment: text_field(&header[0x7E..0x9E]),
        date: text_field(&header[0x9E..0xA9]),
        length_ms,
        fade_ms,
        ..SpcTags::default()
    }
}

/// Merge the xid6 trailer into `tags`.
fn parse_xid6(trailer: &[u8], tags: &mut SpcTags) {
    if trailer.len() < 8 || &trailer[..4] != b"xid6" {
        warn!("SPC: trailer is not an xid6 block");
        return;
    }
    let info_size = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]) as usize;
    let mut end = trailer.len();
    if end - 8 > info_size {
        debug!("SPC: extra data after xid6");
        end = 8 + info_size;
    }

    let mut year = 0u16;
    let mut copyright = String::new();
    let mut disc = 0u16;
    let mut track = 0u16;

    let mut pos = 8;
    while end - pos >= 4 {
        let id = trailer[pos];
        let kind = trailer[pos + 1];
        let data = u16::from_le_bytes([trailer[pos + 2], trailer[pos + 3]]);
        let len = if kind != 0 { data as usize } else { 0 };
        pos += 4;
        if len > end - pos {
            debug!("SPC: xid6 block runs past the end");
            break;
        }
        let payload = &trailer[pos..pos + len];

        match id {
            0x01 => tags.song = text_field(payload),
            0x02 => tags.game = text_field(payload),
            0x03 => tags.author = text_field(payload),
            0x04 => tags.dumper = text_field(payload),
            0x07 => tags.comment = text_field(payload),
            0x10 => tags.ost = text_field(payload),
            0x11 => disc = data,
            0x12 => track = data,
            0x13 => copyright = text_field(payload),
            0x14 => year = data,
            0x33 => {
                if let Some(bytes) = payload.get(..4) {
                    let ticks = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                    tags.fade_ms = Some(ticks / 64);
                }
            }
            _ => debug!("SPC: skipping xid6 block {:#04X}", id),
        }
        pos += len;

        // blocks should be padded to four bytes with zeros, but not all are
        let unaligned = pos;
        while pos & 3 != 0 && pos < end {
            if trailer[pos] != 0 {
                pos = unaligned;
                break;
            }
            pos += 1;
        }
    }

    if year != 0 {
        copyright = format!("{:04} {}", year % 10_000, copyright);
    }
    if !copyright.trim().is_empty() {
        tags.copyright = copyright.trim_end().to_string();
    }
    if (1..=9).contains(&disc) {
        tags.disc = disc.to_string();
    }
    if track > 255 && track < (100 << 8) - 1 {
        let number = track >> 8;
        let suffix = (track & 0xFF) as u8;
        tags.track = number.to_string();
        if suffix != 0 {
            tags.track.push(suffix as char);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_spc() -> Vec<u8> {
        let mut data = vec![0u8; MIN_FILE_SIZE];
        data[..27].copy_from_slice(SIGNATURE);
        data[0x21] = 0x1A;
        data[0x22] = 0x1A;
        data[0x23] = 0x1A;
        data[0x24] = 30;
        data
    }

    fn put(data: &mut [u8], offset: usize, text: &[u8]) {
        data[offset..offset + text.len()].copy_from_slice(text);
    }

    fn xid6_block(id: u8, kind: u8, payload: &[u8], data: u16) -> Vec<u8> {
        let mut block = vec![id, kind];
        if kind == 0 {
            block.extend_from_slice(&data.to_le_bytes());
        } else {
            block.extend_from_slice(&(payload.len() as u16).to_le_bytes());
            block.extend_from_slice(payload);
            while block.len() % 4 != 0 {
                block.push(0);
            }
        }
        block
    }

    fn with_xid6(mut data: Vec<u8>, blocks: &[Vec<u8>]) -> Vec<u8> {
        data.resize(XID6_OFFSET, 0);
        let body: Vec<u8> = blocks.concat();
        data.extend_from_slice(b"xid6");
        data.extend_from_slice(&(body.len() as u32).to_le_bytes());
        data.extend_from_slice(&body);
        data
    }

    #[test]
    fn test_probe() {
        let data = blank_spc();
        assert_eq!(probe_spc(&data), ProbeResult::Match);
        assert_eq!(
            probe_spc(&data[..0x100]),
            ProbeResult::NeedMoreData {
                needed: MIN_FILE_SIZE
            }
        );
        assert_eq!(probe_spc(b"SNES-SPC7"), ProbeResult::NeedMoreData { needed: MIN_FILE_SIZE });
        assert_eq!(probe_spc(b"NESM\x1a"), ProbeResult::NoMatch);
    }

    #[test]
    fn test_parse_registers_and_memory() {
        let mut data = blank_spc();
        put(&mut data, 0x25, &[0x34, 0x12, 0xAA, 0xBB, 0xCC, 0x02, 0xEF]);
        data[RAM_OFFSET + 0x200] = 0x5F;
        data[DSP_OFFSET + 0x0C] = 0x7F;
        let spc = SpcFile::parse(&data).unwrap();
        assert_eq!(spc.registers.pc, 0x1234);
        assert_eq!(spc.registers.a, 0xAA);
        assert_eq!(spc.registers.x, 0xBB);
        assert_eq!(spc.registers.y, 0xCC);
        assert_eq!(spc.registers.psw, 0x02);
        assert_eq!(spc.registers.sp, 0xEF);
        assert_eq!(spc.ram[0x200], 0x5F);
        assert_eq!(spc.dsp_registers[0x0C], 0x7F);
        assert!(spc.extra_ram.is_none());
        assert_eq!(spc.version, 30);
    }

    #[test]
    fn test_short_file_is_rejected() {
        let data = blank_spc();
        assert!(matches!(
            SpcFile::parse(&data[..0x1000]),
            Err(SpcError::TooSmall { needed: MIN_FILE_SIZE, .. })
        ));
        let mut bad = data.clone();
        bad[0] = b'X';
        assert!(matches!(
            SpcFile::parse(&bad),
            Err(SpcError::InvalidFileId { format: "SPC" })
        ));
    }

    #[test]
    fn test_text_id666() {
        let mut data = blank_spc();
        put(&mut data, 0x2E, b"Opening Theme");
        put(&mut data, 0x4E, b"Some Game");
        put(&mut data, 0x6E, b"ripper");
        put(&mut data, 0x7E, b"  <?>  ");
        put(&mut data, 0xA9, b"180");
        put(&mut data, 0xAC, b"5000");
        put(&mut data, 0xB1, b"Composer");
        let spc = SpcFile::parse(&data).unwrap();
        let tags = &spc.tags;
        assert_eq!(tags.song, "Opening Theme");
        assert_eq!(tags.game, "Some Game");
        assert_eq!(tags.dumper, "ripper");
        assert_eq!(tags.comment, "");
        assert_eq!(tags.author, "Composer");
        assert_eq!(tags.length_ms, Some(180_000));
        assert_eq!(tags.fade_ms, Some(5000));
    }

    #[test]
    fn test_binary_id666() {
        let mut data = blank_spc();
        put(&mut data, 0xA9, &[0x78, 0x00, 0x00]);
        put(&mut data, 0xAC, &0x1031u32.to_le_bytes());
        put(&mut data, 0xB0, b"Composer");
        let tags = SpcFile::parse(&data).unwrap().tags;
        assert_eq!(tags.length_ms, Some(120_000));
        assert_eq!(tags.fade_ms, Some(0x1031));
        assert_eq!(tags.author, "Composer");
    }

    #[test]
    fn test_fade_takes_fifth_digit_from_author() {
        let mut data = blank_spc();
        put(&mut data, 0xA9, b"60");
        put(&mut data, 0xAC, b"1000");
        put(&mut data, 0xB0, b"0Composer");
        let tags = SpcFile::parse(&data).unwrap().tags;
        assert_eq!(tags.fade_ms, Some(10_000));
        assert_eq!(tags.author, "Composer");
    }

    #[test]
    fn test_xid6_overrides_and_extends() {
        let data = with_xid6(
            blank_spc(),
            &[
                xid6_block(0x01, 1, b"Longer Song Title Than ID666 Allows", 0),
                xid6_block(0x10, 1, b"Original Soundtrack", 0),
                xid6_block(0x11, 0, &[], 2),
                xid6_block(0x12, 0, &[], (12 << 8) | b'b' as u16),
                xid6_block(0x13, 1, b"Publisher", 0),
                xid6_block(0x14, 0, &[], 1994),
                xid6_block(0x33, 4, &(64_000u32 * 3).to_le_bytes(), 0),
            ],
        );
        let spc = SpcFile::parse(&data).unwrap();
        assert!(spc.extra_ram.is_some());
        let tags = &spc.tags;
        assert_eq!(tags.song, "Longer Song Title Than ID666 Allows");
        assert_eq!(tags.ost, "Original Soundtrack");
        assert_eq!(tags.disc, "2");
        assert_eq!(tags.track, "12b");
        assert_eq!(tags.copyright, "1994 Publisher");
        assert_eq!(tags.fade_ms, Some(3000));
    }

    #[test]
    fn test_xid6_unpadded_blocks() {
        let mut body = vec![0x01, 1, 3, 0];
        body.extend_from_slice(b"abc");
        body.extend_from_slice(&[0x02, 1, 2, 0]);
        body.extend_from_slice(b"xy");
        let data = with_xid6(blank_spc(), &[body]);
        let tags = SpcFile::parse(&data).unwrap().tags;
        assert_eq!(tags.song, "abc");
        assert_eq!(tags.game, "xy");
    }

    #[test]
    fn test_truncated_xid6_block_stops() {
        let data = with_xid6(blank_spc(), &[vec![0x01, 1, 0x40, 0], b"short".to_vec()]);
        let tags = SpcFile::parse(&data).unwrap().tags;
        assert_eq!(tags.song, "");
    }

    #[test]
    fn test_track_info_mapping() {
        let mut data = blank_spc();
        put(&mut data, 0x4E, b"Game");
        let info = SpcFile::parse(&data).unwrap().track_info();
        assert_eq!(info.system, "Super Nintendo");
        assert_eq!(info.game, "Game");
        assert_eq!(info.track_count, 1);
    }
}
