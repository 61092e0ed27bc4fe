//! 6502 core as found in the 2A03 (no decimal mode).
//!
//! The core executes whole instructions and charges their cycles before
//! performing the memory accesses, so a write lands at the clock the
//! instruction completes. Execution stops at the end time or at a halt
//! opcode, leaving `pc` on the halt.

use bitflags::bitflags;

/// Opcode used to trap execution.
pub const HALT_OPCODE: u8 = 0x22;

bitflags! {
    /// Processor status register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Status: u8 {
        /// Carry.
        const C = 0x01;
        /// Zero.
        const Z = 0x02;
        /// Interrupt disable.
        const I = 0x04;
        /// Decimal (stored, has no effect).
        const D = 0x08;
        /// Break, only present in pushed copies.
        const B = 0x10;
        /// Always reads as set.
        const R = 0x20;
        /// Overflow.
        const V = 0x40;
        /// Negative.
        const N = 0x80;
    }
}

/// CPU registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    /// Program counter.
    pub pc: u16,
    /// Accumulator.
    pub a: u8,
    /// X index.
    pub x: u8,
    /// Y index.
    pub y: u8,
    /// Stack pointer within page 1.
    pub sp: u8,
    /// Status flags.
    pub status: Status,
}

impl Default for Registers {
    fn default() -> Self {
        Self {
            pc: 0,
            a: 0,
            x: 0,
            y: 0,
            sp: 0xFF,
            status: Status::I | Status::R,
        }
    }
}

/// Memory seen by the CPU.
pub trait Bus {
    /// Fetch an opcode or operand byte. Has no side effects.
    fn read_code(&self, addr: u16) -> u8;

    /// Data read at clock `time`.
    fn read(&mut self, addr: u16, time: i32) -> u8;

    /// Data write at clock `time`.
    fn write(&mut self, addr: u16, data: u8, time: i32);
}

#[rustfmt::skip]
const CLOCK_TABLE: [u8; 256] = [
//  0 1 2 3 4 5 6 7 8 9 A B C D E F
    0,6,2,8,3,3,5,5,3,2,2,2,4,4,6,6, // 0
    2,5,2,8,4,4,6,6,2,4,2,7,4,4,7,7, // 1
    6,6,0,8,3,3,5,5,4,2,2,2,4,4,6,6, // 2
    2,5,2,8,4,4,6,6,2,4,2,7,4,4,7,7, // 3
    6,6,2,8,3,3,5,5,3,2,2,2,3,4,6,6, // 4
    2,5,2,8,4,4,6,6,2,4,2,7,4,4,7,7, // 5
    6,6,2,8,3,3,5,5,4,2,2,2,5,4,6,6, // 6
    2,5,2,8,4,4,6,6,2,4,2,7,4,4,7,7, // 7
    2,6,2,6,3,3,3,3,2,2,2,2,4,4,4,4, // 8
    2,6,2,6,4,4,4,4,2,5,2,5,5,5,5,5, // 9
    2,6,2,6,3,3,3,3,2,2,2,2,4,4,4,4, // A
    2,5,2,5,4,4,4,4,2,4,2,4,4,4,4,4, // B
    2,6,2,8,3,3,5,5,2,2,2,2,4,4,6,6, // C
    2,5,2,8,4,4,6,6,2,4,2,7,4,4,7,7, // D
    2,6,2,8,3,3,5,5,2,2,2,2,4,4,6,6, // E
    2,5,2,8,4,4,6,6,2,4,2,7,4,4,7,7, // F
];

// operand bytes of undocumented opcodes, two bits per opcode column
const ILLEGAL_LENGTHS: [u8; 8] = [0x40, 0x40, 0x40, 0x80, 0x40, 0x40, 0x80, 0xA0];

/// Where an operand comes from.
#[derive(Debug, Clone, Copy)]
enum Operand {
    Imm(u8),
    Mem(u16),
}

/// The CPU.
#[derive(Debug, Clone, Default)]
pub struct Cpu {
    /// Registers, exposed so drivers can set up calls.
    pub r: Registers,
    time: i32,
    error_count: u32,
}

impl Cpu {
    /// Create a CPU at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset registers, time and the error count.
    pub fn reset(&mut self) {
        self.r = Registers::default();
        self.time = 0;
        self.error_count = 0;
    }

    /// Current clock.
    pub fn time(&self) -> i32 {
        self.time
    }

    /// Set the current clock.
    pub fn set_time(&mut self, time: i32) {
        self.time = time;
    }

    /// Shift the time base by `delta` clocks.
    pub fn adjust_time(&mut self, delta: i32) {
        self.time += delta;
    }

    /// Undocumented opcodes skipped so far.
    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    /// Record a driver-detected execution error.
    pub fn count_error(&mut self) {
        self.error_count += 1;
    }

    /// Push a byte onto the stack.
    pub fn push<B: Bus>(&mut self, bus: &mut B, data: u8) {
        bus.write(0x100 | self.r.sp as u16, data, self.time);
        self.r.sp = self.r.sp.wrapping_sub(1);
    }

    fn pull<B: Bus>(&mut self, bus: &mut B) -> u8 {
        self.r.sp = self.r.sp.wrapping_add(1);
        bus.read(0x100 | self.r.sp as u16, self.time)
    }

    fn fetch<B: Bus>(&mut self, bus: &B) -> u8 {
        let b = bus.read_code(self.r.pc);
        self.r.pc = self.r.pc.wrapping_add(1);
        b
    }

    fn fetch16<B: Bus>(&mut self, bus: &B) -> u16 {
        let lo = self.fetch(bus) as u16;
        let hi = self.fetch(bus) as u16;
        lo | hi << 8
    }

    fn set_nz(&mut self, value: u8) {
        self.r.status.set(Status::Z, value == 0);
        self.r.status.set(Status::N, value & 0x80 != 0);
    }

    fn zp_word<B: Bus>(&mut self, bus: &mut B, ptr: u8) -> u16 {
        let lo = bus.read(ptr as u16, self.time) as u16;
        let hi = bus.read(ptr.wrapping_add(1) as u16, self.time) as u16;
        lo | hi << 8
    }

    fn indexed(&mut self, base: u16, index: u8, penalty: bool) -> u16 {
        let addr = base.wrapping_add(index as u16);
        if penalty && (base & 0xFF00) != (addr & 0xFF00) {
            self.time += 1;
        }
        addr
    }

    /// Decode the operand of a read instruction in column groups 1, 2 or 5.
    fn read_operand<B: Bus>(&mut self, bus: &mut B, opcode: u8) -> Operand {
        match opcode & 0x1F {
            0x01 => {
                let ptr = self.fetch(bus).wrapping_add(self.r.x);
                Operand::Mem(self.zp_word(bus, ptr))
            }
            0x00 | 0x02 | 0x09 => Operand::Imm(self.fetch(bus)),
            0x04 | 0x05 | 0x06 => Operand::Mem(self.fetch(bus) as u16),
            0x0C | 0x0D | 0x0E => Operand::Mem(self.fetch16(bus)),
            0x11 => {
                let ptr = self.fetch(bus);
                let base = self.zp_word(bus, ptr);
                Operand::Mem(self.indexed(base, self.r.y, true))
            }
            0x14 | 0x15 => Operand::Mem(self.fetch(bus).wrapping_add(self.r.x) as u16),
            0x16 => {
                // LDX/STX zp,Y
                let index = if opcode & 0xC0 == 0x80 { self.r.y } else { self.r.x };
                Operand::Mem(self.fetch(bus).wrapping_add(index) as u16)
            }
            0x19 => {
                let base = self.fetch16(bus);
                Operand::Mem(self.indexed(base, self.r.y, true))
            }
            0x1C | 0x1D => {
                let base = self.fetch16(bus);
                Operand::Mem(self.indexed(base, self.r.x, true))
            }
            0x1E => {
                let base = self.fetch16(bus);
                // LDX abs,Y reads with Y
                let index = if opcode & 0xC0 == 0x80 { self.r.y } else { self.r.x };
                Operand::Mem(self.indexed(base, index, opcode == 0xBE))
            }
            _ => Operand::Imm(0),
        }
    }

    fn load<B: Bus>(&mut self, bus: &mut B, opcode: u8) -> u8 {
        match self.read_operand(bus, opcode) {
            Operand::Imm(v) => v,
            Operand::Mem(addr) => bus.read(addr, self.time),
        }
    }

    fn store_addr<B: Bus>(&mut self, bus: &mut B, opcode: u8) -> u16 {
        // stores never take the page penalty; their table cycles include it
        let addr = match opcode & 0x1F {
            0x19 => {
                let base = self.fetch16(bus);
                return base.wrapping_add(self.r.y as u16);
            }
            0x1D => {
                let base = self.fetch16(bus);
                return base.wrapping_add(self.r.x as u16);
            }
            0x11 => {
                let ptr = self.fetch(bus);
                let base = self.zp_word(bus, ptr);
                return base.wrapping_add(self.r.y as u16);
            }
            _ => self.read_operand(bus, opcode),
        };
        match addr {
            Operand::Mem(a) => a,
            Operand::Imm(_) => 0,
        }
    }

    fn rmw_addr<B: Bus>(&mut self, bus: &mut B, opcode: u8) -> u16 {
        match opcode & 0x1F {
            0x06 => self.fetch(bus) as u16,
            0x16 => self.fetch(bus).wrapping_add(self.r.x) as u16,
            0x0E => self.fetch16(bus),
            _ => {
                let base = self.fetch16(bus);
                base.wrapping_add(self.r.x as u16)
            }
        }
    }

    fn adc(&mut self, data: u8) {
        let carry = self.r.status.contains(Status::C) as u16;
        let sum = self.r.a as u16 + data as u16 + carry;
        let result = sum as u8;
        let overflow = (!(self.r.a ^ data) & (self.r.a ^ result)) & 0x80 != 0;
        self.r.status.set(Status::V, overflow);
        self.r.status.set(Status::C, sum > 0xFF);
        self.r.a = result;
        self.set_nz(result);
    }

    fn compare(&mut self, reg: u8, data: u8) {
        self.r.status.set(Status::C, reg >= data);
        self.set_nz(reg.wrapping_sub(data));
    }

    fn branch<B: Bus>(&mut self, bus: &B, cond: bool) {
        let offset = self.fetch(bus) as i8;
        if cond {
            self.time += 1;
            let target = self.r.pc.wrapping_add(offset as u16);
            if (target & 0xFF00) != (self.r.pc & 0xFF00) {
                self.time += 1;
            }
            self.r.pc = target;
        }
    }

    fn shift(&mut self, op: u8, value: u8) -> u8 {
        let carry_in = self.r.status.contains(Status::C) as u8;
        let (result, carry_out) = match op {
            0 => (value << 1, value & 0x80 != 0),
            1 => (value << 1 | carry_in, value & 0x80 != 0),
            2 => (value >> 1, value & 0x01 != 0),
            _ => (value >> 1 | carry_in << 7, value & 0x01 != 0),
        };
        self.r.status.set(Status::C, carry_out);
        self.set_nz(result);
        result
    }

    fn pushed_status(&self, brk: bool) -> u8 {
        let mut s = self.r.status | Status::R;
        s.set(Status::B, brk);
        s.bits()
    }

    fn set_status(&mut self, value: u8) {
        self.r.status = Status::from_bits_truncate(value) - Status::B | Status::R;
    }

    /// Run until the clock reaches `end` or a halt opcode is met.
    ///
    /// Returns `true` if execution stopped on a halt opcode.
    pub fn run<B: Bus>(&mut self, bus: &mut B, end: i32) -> bool {
        while self.time < end {
            let opcode = bus.read_code(self.r.pc);
            if is_halt(opcode) {
                return true;
            }
            self.r.pc = self.r.pc.wrapping_add(1);
            self.time += CLOCK_TABLE[opcode as usize] as i32;
            self.execute(bus, opcode);
        }
        false
    }

    fn execute<B: Bus>(&mut self, bus: &mut B, opcode: u8) {
        match opcode {
            // ORA AND EOR ADC LDA CMP SBC
            0x01 | 0x05 | 0x09 | 0x0D | 0x11 | 0x15 | 0x19 | 0x1D => {
                let v = self.r.a | self.load(bus, opcode);
                self.r.a = v;
                self.set_nz(v);
            }
            0x21 | 0x25 | 0x29 | 0x2D | 0x31 | 0x35 | 0x39 | 0x3D => {
                let v = self.r.a & self.load(bus, opcode);
                self.r.a = v;
                self.set_nz(v);
            }
            0x41 | 0x45 | 0x49 | 0x4D | 0x51 | 0x55 | 0x59 | 0x5D => {
                let v = self.r.a ^ self.load(bus, opcode);
                self.r.a = v;
                self.set_nz(v);
            }
            0x61 | 0x65 | 0x69 | 0x6D | 0x71 | 0x75 | 0x79 | 0x7D => {
                let data = self.load(bus, opcode);
                self.adc(data);
            }
            0xA1 | 0xA5 | 0xA9 | 0xAD | 0xB1 | 0xB5 | 0xB9 | 0xBD => {
                let v = self.load(bus, opcode);
                self.r.a = v;
                self.set_nz(v);
            }
            0xC1 | 0xC5 | 0xC9 | 0xCD | 0xD1 | 0xD5 | 0xD9 | 0xDD => {
                let data = self.load(bus, opcode);
                self.compare(self.r.a, data);
            }
            0xE1 | 0xE5 | 0xE9 | 0xEB | 0xED | 0xF1 | 0xF5 | 0xF9 | 0xFD => {
                let op = if opcode == 0xEB { 0xE9 } else { opcode };
                let data = self.load(bus, op);
                self.adc(data ^ 0xFF);
            }

            // STA STX STY
            0x81 | 0x85 | 0x8D | 0x91 | 0x95 | 0x99 | 0x9D => {
                let addr = self.store_addr(bus, opcode);
                bus.write(addr, self.r.a, self.time);
            }
            0x86 | 0x8E | 0x96 => {
                let addr = self.store_addr(bus, opcode);
                bus.write(addr, self.r.x, self.time);
            }
            0x84 | 0x8C | 0x94 => {
                let addr = self.store_addr(bus, opcode);
                bus.write(addr, self.r.y, self.time);
            }

            // LDX LDY
            0xA2 | 0xA6 | 0xAE | 0xB6 | 0xBE => {
                let v = self.load(bus, opcode);
                self.r.x = v;
                self.set_nz(v);
            }
            0xA0 | 0xA4 | 0xAC | 0xB4 | 0xBC => {
                let v = self.load(bus, opcode);
                self.r.y = v;
                self.set_nz(v);
            }

            // CPX CPY BIT
            0xE0 | 0xE4 | 0xEC => {
                let data = self.load(bus, opcode);
                self.compare(self.r.x, data);
            }
            0xC0 | 0xC4 | 0xCC => {
                let data = self.load(bus, opcode);
                self.compare(self.r.y, data);
            }
            0x24 | 0x2C => {
                let data = self.load(bus, opcode);
                self.r.status.set(Status::Z, self.r.a & data == 0);
                self.r.status.set(Status::N, data & 0x80 != 0);
                self.r.status.set(Status::V, data & 0x40 != 0);
            }

            // ASL ROL LSR ROR on the accumulator
            0x0A | 0x2A | 0x4A | 0x6A => {
                self.r.a = self.shift(opcode >> 5, self.r.a);
            }
            // ASL ROL LSR ROR on memory
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x36 | 0x3E | 0x46 | 0x4E | 0x56 | 0x5E
            | 0x66 | 0x6E | 0x76 | 0x7E => {
                let addr = self.rmw_addr(bus, opcode);
                let value = bus.read(addr, self.time);
                let result = self.shift(opcode >> 5, value);
                bus.write(addr, result, self.time);
            }
            // INC DEC on memory
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let addr = self.rmw_addr(bus, opcode);
                let value = bus.read(addr, self.time);
                let result = if opcode >= 0xE0 {
                    value.wrapping_add(1)
                } else {
                    value.wrapping_sub(1)
                };
                self.set_nz(result);
                bus.write(addr, result, self.time);
            }

            // register increments and transfers
            0xE8 => {
                self.r.x = self.r.x.wrapping_add(1);
                self.set_nz(self.r.x);
            }
            0xC8 => {
                self.r.y = self.r.y.wrapping_add(1);
                self.set_nz(self.r.y);
            }
            0xCA => {
                self.r.x = self.r.x.wrapping_sub(1);
                self.set_nz(self.r.x);
            }
            0x88 => {
                self.r.y = self.r.y.wrapping_sub(1);
                self.set_nz(self.r.y);
            }
            0xAA => {
                self.r.x = self.r.a;
                self.set_nz(self.r.x);
            }
            0x8A => {
                self.r.a = self.r.x;
                self.set_nz(self.r.a);
            }
            0xA8 => {
                self.r.y = self.r.a;
                self.set_nz(self.r.y);
            }
            0x98 => {
                self.r.a = self.r.y;
                self.set_nz(self.r.a);
            }
            0xBA => {
                self.r.x = self.r.sp;
                self.set_nz(self.r.x);
            }
            0x9A => self.r.sp = self.r.x,

            // branches
            0x10 => self.branch(bus, !self.r.status.contains(Status::N)),
            0x30 => self.branch(bus, self.r.status.contains(Status::N)),
            0x50 => self.branch(bus, !self.r.status.contains(Status::V)),
            0x70 => self.branch(bus, self.r.status.contains(Status::V)),
            0x90 => self.branch(bus, !self.r.status.contains(Status::C)),
            0xB0 => self.branch(bus, self.r.status.contains(Status::C)),
            0xD0 => self.branch(bus, !self.r.status.contains(Status::Z)),
            0xF0 => self.branch(bus, self.r.status.contains(Status::Z)),

            // jumps and subroutines
            0x4C => self.r.pc = self.fetch16(bus),
            0x6C => {
                let ptr = self.fetch16(bus);
                // the high byte wraps within the page
                let hi_ptr = (ptr & 0xFF00) | (ptr.wrapping_add(1) & 0x00FF);
                let lo = bus.read_code(ptr) as u16;
                let hi = bus.read_code(hi_ptr) as u16;
                self.r.pc = lo | hi << 8;
            }
            0x20 => {
                let target = self.fetch16(bus);
                let ret = self.r.pc.wrapping_sub(1);
                self.push(bus, (ret >> 8) as u8);
                self.push(bus, ret as u8);
                self.r.pc = target;
            }
            0x60 => {
                let lo = self.pull(bus) as u16;
                let hi = self.pull(bus) as u16;
                self.r.pc = (lo | hi << 8).wrapping_add(1);
            }
            0x40 => {
                let status = self.pull(bus);
                self.set_status(status);
                let lo = self.pull(bus) as u16;
                let hi = self.pull(bus) as u16;
                self.r.pc = lo | hi << 8;
            }
            0x00 => {
                self.r.pc = self.r.pc.wrapping_add(1);
                self.time += 7;
                let pc = self.r.pc;
                self.push(bus, (pc >> 8) as u8);
                self.push(bus, pc as u8);
                let status = self.pushed_status(true);
                self.push(bus, status);
                self.r.status.insert(Status::I);
                let lo = bus.read_code(0xFFFE) as u16;
                let hi = bus.read_code(0xFFFF) as u16;
                self.r.pc = lo | hi << 8;
            }

            // stack
            0x48 => self.push(bus, self.r.a),
            0x68 => {
                self.r.a = self.pull(bus);
                self.set_nz(self.r.a);
            }
            0x08 => {
                let status = self.pushed_status(true);
                self.push(bus, status);
            }
            0x28 => {
                let status = self.pull(bus);
                self.set_status(status);
            }

            // flags
            0x18 => self.r.status.remove(Status::C),
            0x38 => self.r.status.insert(Status::C),
            0x58 => self.r.status.remove(Status::I),
            0x78 => self.r.status.insert(Status::I),
            0xB8 => self.r.status.remove(Status::V),
            0xD8 => self.r.status.remove(Status::D),
            0xF8 => self.r.status.insert(Status::D),

            // documented and undocumented no-ops
            0xEA | 0x1A | 0x3A | 0x5A | 0x7A | 0xDA | 0xFA => {}
            0x80 | 0x82 | 0x89 | 0xC2 | 0xE2 | 0x04 | 0x44 | 0x64 | 0x14 | 0x34 | 0x54 | 0x74
            | 0xD4 | 0xF4 => {
                self.r.pc = self.r.pc.wrapping_add(1);
            }
            0x0C => {
                self.r.pc = self.r.pc.wrapping_add(2);
            }
            0x1C | 0x3C | 0x5C | 0x7C | 0xDC | 0xFC => {
                let base = self.fetch16(bus);
                self.indexed(base, self.r.x, true);
            }

            _ => {
                let shift = (opcode << 1) & 6;
                let mut len = (ILLEGAL_LENGTHS[(opcode >> 2 & 7) as usize] >> shift) & 3;
                if opcode == 0x9C {
                    len = 2;
                }
                self.r.pc = self.r.pc.wrapping_add(len as u16);
                self.error_count += 1;
                log::trace!("skipped undocumented opcode ${opcode:02X}");
            }
        }
    }
}

fn is_halt(opcode: u8) -> bool {
    matches!(
        opcode,
        HALT_OPCODE | 0x02 | 0x12 | 0x32 | 0x42 | 0x52 | 0x62 | 0x72 | 0x92 | 0xB2 | 0xD2 | 0xF2
    )
}
