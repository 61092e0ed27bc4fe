//! NES memory map and sound hardware bus.
//!
//! ```text
//! $0000-$1FFF  2K RAM, mirrored
//! $4000-$4017  APU
//! $5FF6-$5FFF  bank registers ($5FF8 maps $8000)
//! $6000-$7FFF  8K RAM
//! $8000-$FFFF  eight 4K ROM banks
//! ```
//!
//! Code fetches from anything unmapped return the halt opcode, so a routine
//! returning to the idle address stops the CPU.

use chipsound::chips::fme7::{self, Fme7};
use chipsound::chips::mmc5::{self, Mmc5};
use chipsound::chips::namco163::{self, Namco163};
use chipsound::chips::nes_apu::{NesApu, IO_ADDR, IO_SIZE, STATUS_ADDR};
use chipsound::chips::vrc6::{self, Vrc6};
use chipsound::chips::vrc7::{self, Vrc7};
use chipsound::chips::SoundChip;
use chipsound::StereoBuffer;

use crate::cpu::{Bus, HALT_OPCODE};
use crate::header::{ExpansionChips, ROM_ADDR};

/// Size of one switchable ROM bank.
pub const BANK_SIZE: usize = 0x1000;
/// Return address of init and play; holds a halt opcode.
pub const IDLE_ADDR: u16 = 0x5FF6;
/// First bank register. The first two are FDS-only.
pub const BANKS_ADDR: u16 = IDLE_ADDR;
/// Bank registers, FDS pair included.
pub const BANK_COUNT: usize = FDS_BANKS + 8;
/// Bank registers that only exist with FDS hardware.
pub const FDS_BANKS: usize = 2;
/// Battery RAM base.
pub const SRAM_ADDR: u16 = 0x6000;

const LOW_RAM_SIZE: usize = 0x800;
const SRAM_SIZE: usize = 0x2000;
const MMC5_MUL_LO: u16 = 0x5205;
const MMC5_MUL_HI: u16 = 0x5206;
const MMC5_EXRAM_ADDR: u16 = 0x5C00;
const MMC5_EXRAM_SIZE: usize = 0x400;

/// Cartridge ROM image positioned in 4K banks.
#[derive(Debug, Clone)]
pub struct Rom {
    data: Vec<u8>,
    mask: usize,
}

impl Rom {
    /// Place `image` so that its first byte lands at `load_addr` within a bank.
    pub fn new(image: &[u8], load_addr: u16) -> Self {
        let pad = load_addr as usize % BANK_SIZE;
        let size = (pad + image.len()).div_ceil(BANK_SIZE).max(1) * BANK_SIZE;
        let mut data = vec![0u8; size];
        data[pad..pad + image.len()].copy_from_slice(image);
        let mask = size.next_power_of_two() - 1;
        Self { data, mask }
    }

    /// Size in bytes, a multiple of [`BANK_SIZE`].
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Number of 4K banks.
    pub fn bank_count(&self) -> usize {
        self.data.len() / BANK_SIZE
    }

    /// Offset of bank `number`, or `None` if it lies past the image.
    pub fn bank_offset(&self, number: u8) -> Option<usize> {
        let offset = (number as usize * BANK_SIZE) & self.mask;
        (offset < self.data.len()).then_some(offset)
    }

    fn bank(&self, offset: Option<usize>) -> &[u8] {
        match offset {
            Some(start) => &self.data[start..start + BANK_SIZE],
            None => &ZERO_BANK,
        }
    }
}

static ZERO_BANK: [u8; BANK_SIZE] = [0; BANK_SIZE];

/// Expansion chips present on the cartridge.
#[derive(Debug, Default)]
pub struct Expansions {
    /// Konami VRC6.
    pub vrc6: Option<Vrc6>,
    /// Sunsoft FME-7.
    pub fme7: Option<Fme7>,
    /// Nintendo MMC5.
    pub mmc5: Option<Mmc5>,
    /// Namco 163.
    pub namco: Option<Namco163>,
    /// Konami VRC7.
    pub vrc7: Option<Vrc7>,
}

impl Expansions {
    /// Instantiate the chips named by `flags`.
    pub fn from_flags(flags: ExpansionChips) -> Self {
        Self {
            vrc6: flags.contains(ExpansionChips::VRC6).then(Vrc6::new),
            fme7: flags.contains(ExpansionChips::FME7).then(Fme7::new),
            mmc5: flags.contains(ExpansionChips::MMC5).then(Mmc5::new),
            namco: flags.contains(ExpansionChips::NAMCO).then(Namco163::new),
            vrc7: flags.contains(ExpansionChips::VRC7).then(Vrc7::new),
        }
    }

    /// Number of chips present.
    pub fn count(&self) -> usize {
        self.chips().len()
    }

    fn chips(&self) -> Vec<&dyn SoundChip> {
        let mut chips: Vec<&dyn SoundChip> = Vec::new();
        if let Some(c) = &self.vrc6 {
            chips.push(c);
        }
        if let Some(c) = &self.fme7 {
            chips.push(c);
        }
        if let Some(c) = &self.mmc5 {
            chips.push(c);
        }
        if let Some(c) = &self.namco {
            chips.push(c);
        }
        if let Some(c) = &self.vrc7 {
            chips.push(c);
        }
        chips
    }

    /// Present chips in voice order.
    pub fn chips_mut(&mut self) -> Vec<&mut dyn SoundChip> {
        let mut chips: Vec<&mut dyn SoundChip> = Vec::new();
        if let Some(c) = &mut self.vrc6 {
            chips.push(c);
        }
        if let Some(c) = &mut self.fme7 {
            chips.push(c);
        }
        if let Some(c) = &mut self.mmc5 {
            chips.push(c);
        }
        if let Some(c) = &mut self.namco {
            chips.push(c);
        }
        if let Some(c) = &mut self.vrc7 {
            chips.push(c);
        }
        chips
    }
}

/// RAM, banked ROM and sound hardware as seen by the CPU.
pub struct NsfMachine {
    low_ram: Box<[u8; LOW_RAM_SIZE]>,
    sram: Box<[u8; SRAM_SIZE]>,
    rom: Rom,
    // ROM offset mapped at $8000 + i * $1000
    banks: [Option<usize>; 8],
    apu: NesApu,
    expansions: Expansions,
    mmc5_mul: [u8; 2],
    mmc5_exram: Box<[u8; MMC5_EXRAM_SIZE]>,
    buffer: StereoBuffer,
    invalid_banks: u32,
}

impl NsfMachine {
    /// Assemble a machine around `rom` with the given expansions.
    pub fn new(rom: Rom, expansions: Expansions) -> Self {
        Self {
            low_ram: Box::new([0; LOW_RAM_SIZE]),
            sram: Box::new([0; SRAM_SIZE]),
            rom,
            banks: [None; 8],
            apu: NesApu::new(),
            expansions,
            mmc5_mul: [0; 2],
            mmc5_exram: Box::new([0; MMC5_EXRAM_SIZE]),
            buffer: StereoBuffer::new(),
            invalid_banks: 0,
        }
    }

    /// The ROM image.
    pub fn rom(&self) -> &Rom {
        &self.rom
    }

    /// The 2A03 APU.
    pub fn apu(&self) -> &NesApu {
        &self.apu
    }

    /// The 2A03 APU (mutable).
    pub fn apu_mut(&mut self) -> &mut NesApu {
        &mut self.apu
    }

    /// Cartridge sound chips.
    pub fn expansions(&self) -> &Expansions {
        &self.expansions
    }

    /// Output buffers.
    pub fn buffer(&self) -> &StereoBuffer {
        &self.buffer
    }

    /// Output buffers (mutable).
    pub fn buffer_mut(&mut self) -> &mut StereoBuffer {
        &mut self.buffer
    }

    /// Bank switches that pointed past the ROM image.
    pub fn invalid_banks(&self) -> u32 {
        self.invalid_banks
    }

    /// All chips, APU first, in voice order.
    pub fn chips_mut(&mut self) -> Vec<&mut dyn SoundChip> {
        let mut chips: Vec<&mut dyn SoundChip> = vec![&mut self.apu];
        chips.extend(self.expansions.chips_mut());
        chips
    }

    /// Voices across every chip.
    pub fn voice_count(&self) -> usize {
        self.apu.voice_count()
            + self
                .expansions
                .chips()
                .iter()
                .map(|c| c.voice_count())
                .sum::<usize>()
    }

    /// Power-on state for a new track: RAM cleared, APU reset, banks mapped.
    pub fn reset(&mut self, pal: bool, initial_banks: &[u8; BANK_COUNT]) {
        self.apu.reset_mode(pal, 0);
        let out = self.buffer.channels_mut();
        self.apu.write(out, 0, STATUS_ADDR, 0x0F);
        self.apu.write(out, 0, 0x4017, 0x00);
        for chip in self.expansions.chips_mut() {
            chip.reset();
        }

        self.low_ram.fill(0);
        self.sram.fill(0);
        self.mmc5_mul = [0; 2];
        self.mmc5_exram.fill(0);
        self.invalid_banks = 0;

        for (i, &bank) in initial_banks.iter().enumerate().skip(FDS_BANKS) {
            self.write_bank(i, bank);
        }
    }

    /// Point bank register `index` at ROM bank `number`.
    pub fn write_bank(&mut self, index: usize, number: u8) {
        if index < FDS_BANKS || index >= BANK_COUNT {
            return;
        }
        let offset = self.rom.bank_offset(number);
        if offset.is_none() {
            self.invalid_banks += 1;
            log::debug!("invalid bank {number} for ${:04X}", bank_addr(index));
        }
        let slot = index - FDS_BANKS;
        self.banks[slot] = offset;
        let addr = ROM_ADDR + (slot * BANK_SIZE) as u16;
        let data = self.rom.bank(offset);
        self.apu.map_dmc_memory(addr, data);
    }

    /// Bring every chip to `time` and close the frame.
    pub fn end_frame(&mut self, time: i32) {
        let out = self.buffer.channels_mut();
        self.apu.end_frame(out, time);
        for chip in self.expansions.chips_mut() {
            chip.end_frame(out, time);
        }
        self.buffer.end_frame(time);
    }

    fn read_misc(&mut self, addr: u16, time: i32) -> u8 {
        if let Some(namco) = &mut self.expansions.namco {
            if addr == namco163::DATA_REG {
                return namco.read_data(self.buffer.channels_mut(), time);
            }
        }
        if self.expansions.mmc5.is_some() {
            match addr {
                MMC5_MUL_LO => {
                    return (self.mmc5_mul[0] as u16 * self.mmc5_mul[1] as u16) as u8;
                }
                MMC5_MUL_HI => {
                    return ((self.mmc5_mul[0] as u16 * self.mmc5_mul[1] as u16) >> 8) as u8;
                }
                _ => {}
            }
            if let Some(i) = exram_offset(addr) {
                return self.mmc5_exram[i];
            }
        }
        log::trace!("unmapped read ${addr:04X}");
        (addr >> 8) as u8
    }

    fn write_misc(&mut self, addr: u16, data: u8, time: i32) {
        let out = self.buffer.channels_mut();
        let mut handled = false;

        if let Some(namco) = &mut self.expansions.namco {
            if addr == namco163::DATA_REG || addr == namco163::ADDR_REG {
                namco.write(out, time, addr, data);
                handled = true;
            }
        }
        if let Some(chip) = &mut self.expansions.vrc6 {
            let offset = addr.wrapping_sub(vrc6::BASE_ADDR);
            if offset < 3 * vrc6::ADDR_STEP && offset & (vrc6::ADDR_STEP - 1) < 3 {
                chip.write(out, time, addr, data);
                handled = true;
            }
        }
        if let Some(chip) = &mut self.expansions.fme7 {
            let masked = addr & fme7::ADDR_MASK;
            if masked == fme7::LATCH_ADDR || masked == fme7::DATA_ADDR {
                chip.write(out, time, addr, data);
                handled = true;
            }
        }
        if let Some(chip) = &mut self.expansions.mmc5 {
            if (mmc5::REGS_ADDR..=mmc5::REGS_END).contains(&addr) {
                chip.write(out, time, addr, data);
                handled = true;
            } else if addr == MMC5_MUL_LO || addr == MMC5_MUL_HI {
                self.mmc5_mul[(addr - MMC5_MUL_LO) as usize] = data;
                handled = true;
            } else if let Some(i) = exram_offset(addr) {
                self.mmc5_exram[i] = data;
                handled = true;
            }
        }
        if let Some(chip) = &mut self.expansions.vrc7 {
            if addr == vrc7::ADDR_REG || addr == vrc7::DATA_REG {
                chip.write(out, time, addr, data);
                handled = true;
            }
        }

        if !handled {
            log::trace!("unmapped write ${addr:04X} <- ${data:02X}");
        }
    }
}

fn exram_offset(addr: u16) -> Option<usize> {
    let offset = addr.wrapping_sub(MMC5_EXRAM_ADDR) as usize;
    (offset < MMC5_EXRAM_SIZE).then_some(offset)
}

fn bank_addr(index: usize) -> u16 {
    BANKS_ADDR + index as u16
}

impl Bus for NsfMachine {
    fn read_code(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x1FFF => self.low_ram[addr as usize & (LOW_RAM_SIZE - 1)],
            0x6000..=0x7FFF => self.sram[(addr - SRAM_ADDR) as usize],
            0x8000..=0xFFFF => {
                let offset = (addr - ROM_ADDR) as usize;
                match self.banks[offset / BANK_SIZE] {
                    Some(start) => self.rom.data[start + offset % BANK_SIZE],
                    None => 0,
                }
            }
            _ => HALT_OPCODE,
        }
    }

    fn read(&mut self, addr: u16, time: i32) -> u8 {
        match addr {
            0x0000..=0x1FFF => self.low_ram[addr as usize & (LOW_RAM_SIZE - 1)],
            STATUS_ADDR => self.apu.read_status(self.buffer.channels_mut(), time),
            0x2000..=0x5FFF => self.read_misc(addr, time),
            _ => self.read_code(addr),
        }
    }

    fn write(&mut self, addr: u16, data: u8, time: i32) {
        match addr {
            0x0000..=0x1FFF => self.low_ram[addr as usize & (LOW_RAM_SIZE - 1)] = data,
            0x6000..=0x7FFF => self.sram[(addr - SRAM_ADDR) as usize] = data,
            _ => {
                let bank = addr.wrapping_sub(BANKS_ADDR) as usize;
                if bank < BANK_COUNT {
                    self.write_bank(bank, data);
                } else if addr.wrapping_sub(IO_ADDR) < IO_SIZE {
                    self.apu.write(self.buffer.channels_mut(), time, addr, data);
                } else {
                    self.write_misc(addr, data, time);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(image: &[u8], flags: ExpansionChips) -> NsfMachine {
        let mut m = NsfMachine::new(Rom::new(image, 0x8000), Expansions::from_flags(flags));
        let mut banks = [0u8; BANK_COUNT];
        for (i, bank) in banks.iter_mut().enumerate().skip(FDS_BANKS) {
            *bank = (i - FDS_BANKS) as u8;
        }
        m.reset(false, &banks);
        m
    }

    #[test]
    fn test_low_ram_mirrors() {
        let mut m = machine(&[0; 0x1000], ExpansionChips::empty());
        m.write(0x0012, 0x5A, 0);
        assert_eq!(m.read(0x0812, 0), 0x5A);
        assert_eq!(m.read(0x1812, 0), 0x5A);
    }

    #[test]
    fn test_unmapped_code_is_halt() {
        let m = machine(&[0; 0x1000], ExpansionChips::empty());
        assert_eq!(m.read_code(IDLE_ADDR), HALT_OPCODE);
        assert_eq!(m.read_code(0x3000), HALT_OPCODE);
    }

    #[test]
    fn test_unmapped_read_returns_high_byte() {
        let mut m = machine(&[0; 0x1000], ExpansionChips::empty());
        assert_eq!(m.read(0x5123, 0), 0x51);
    }

    #[test]
    fn test_bank_switch() {
        let mut image = vec![0u8; 3 * BANK_SIZE];
        image[0] = 0xA0;
        image[BANK_SIZE] = 0xA1;
        image[2 * BANK_SIZE] = 0xA2;
        let mut m = machine(&image, ExpansionChips::empty());
        assert_eq!(m.read_code(0x9000), 0xA1);
        m.write(0x5FF9, 2, 0);
        assert_eq!(m.read_code(0x9000), 0xA2);
        // $5FF8 is the first cartridge bank register
        m.write(0x5FF8, 1, 0);
        assert_eq!(m.read_code(0x8000), 0xA1);
    }

    #[test]
    fn test_invalid_bank_maps_zeroes() {
        let mut image = vec![0xEEu8; 3 * BANK_SIZE];
        image[0] = 0xA0;
        let mut m = machine(&image, ExpansionChips::empty());
        // the 3-bank image wraps on a 4-bank mask, so banks 3 and 7 are already invalid
        assert_eq!(m.invalid_banks(), 2);
        assert_eq!(m.read_code(0xB000), 0x00);
        m.write(0x5FF8, 3, 0);
        assert_eq!(m.read_code(0x8000), 0x00);
        assert_eq!(m.invalid_banks(), 3);
        // bank 4 wraps to bank 0
        m.write(0x5FF8, 4, 0);
        assert_eq!(m.read_code(0x8000), 0xA0);
        assert_eq!(m.invalid_banks(), 3);
    }

    #[test]
    fn test_rom_padding_follows_load_address() {
        let rom = Rom::new(&[1, 2, 3], 0x8010);
        assert_eq!(rom.size(), BANK_SIZE);
        assert_eq!(rom.data[0x10], 1);
    }

    #[test]
    fn test_mmc5_multiplier_and_exram() {
        let mut m = machine(&[0; 0x1000], ExpansionChips::MMC5);
        m.write(MMC5_MUL_LO, 200, 0);
        m.write(MMC5_MUL_HI, 3, 0);
        assert_eq!(m.read(MMC5_MUL_LO, 0), (600u16 & 0xFF) as u8);
        assert_eq!(m.read(MMC5_MUL_HI, 0), (600u16 >> 8) as u8);
        m.write(0x5C10, 0x77, 0);
        assert_eq!(m.read(0x5C10, 0), 0x77);
    }

    #[test]
    fn test_voice_count_includes_expansions() {
        let m = machine(&[0; 0x1000], ExpansionChips::VRC6 | ExpansionChips::NAMCO);
        assert_eq!(m.voice_count(), 5 + 3 + 8);
        assert_eq!(m.expansions().count(), 2);
    }
}
