//! SPC700 instruction set.
//!
//! Every instruction is a sequence of bus cycles with the same order of
//! reads, writes and idle cycles as the chip, including the dummy reads of
//! store targets.

use super::{Psw, Smp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Alu {
    Or,
    And,
    Eor,
    Cmp,
    Adc,
    Sbc,
    Ld,
}

// by opcode bits 5-7; row 6 holds the stores and never reaches `alu`
const ALU_ROWS: [Alu; 8] = [
    Alu::Or,
    Alu::And,
    Alu::Eor,
    Alu::Cmp,
    Alu::Adc,
    Alu::Sbc,
    Alu::Ld,
    Alu::Ld,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Modify {
    Asl,
    Rol,
    Lsr,
    Ror,
    Dec,
    Inc,
}

const MODIFY_ROWS: [Modify; 6] = [
    Modify::Asl,
    Modify::Rol,
    Modify::Lsr,
    Modify::Ror,
    Modify::Dec,
    Modify::Inc,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reg {
    A,
    X,
    Y,
}

impl Smp {
    // Register helpers

    fn get(&self, r: Reg) -> u8 {
        match r {
            Reg::A => self.regs.a,
            Reg::X => self.regs.x,
            Reg::Y => self.regs.y,
        }
    }

    fn set(&mut self, r: Reg, value: u8) {
        match r {
            Reg::A => self.regs.a = value,
            Reg::X => self.regs.x = value,
            Reg::Y => self.regs.y = value,
        }
    }

    fn set_nz(&mut self, value: u8) {
        self.regs.psw.set(Psw::N, value & 0x80 != 0);
        self.regs.psw.set(Psw::Z, value == 0);
    }

    fn flag(&self, flag: Psw) -> bool {
        self.regs.psw.contains(flag)
    }

    // Fetch, direct page and stack

    fn fetch(&mut self) -> u8 {
        let pc = self.regs.pc;
        self.regs.pc = pc.wrapping_add(1);
        self.read(pc)
    }

    fn fetch_word(&mut self) -> u16 {
        let lo = self.fetch();
        let hi = self.fetch();
        u16::from_le_bytes([lo, hi])
    }

    fn page(&self, dp: u8) -> u16 {
        if self.flag(Psw::P) {
            0x100 | dp as u16
        } else {
            dp as u16
        }
    }

    fn read_dp(&mut self, dp: u8) -> u8 {
        let addr = self.page(dp);
        self.read(addr)
    }

    fn write_dp(&mut self, dp: u8, data: u8) {
        let addr = self.page(dp);
        self.write(addr, data);
    }

    /// Little-endian pointer stored at `dp`, wrapping within the page.
    fn read_dp_word(&mut self, dp: u8) -> u16 {
        let lo = self.read_dp(dp);
        let hi = self.read_dp(dp.wrapping_add(1));
        u16::from_le_bytes([lo, hi])
    }

    fn push(&mut self, data: u8) {
        let sp = self.regs.sp;
        self.regs.sp = sp.wrapping_sub(1);
        self.write(0x100 | sp as u16, data);
    }

    fn pull(&mut self) -> u8 {
        self.regs.sp = self.regs.sp.wrapping_add(1);
        self.read(0x100 | self.regs.sp as u16)
    }

    fn push_pc(&mut self) {
        let [lo, hi] = self.regs.pc.to_le_bytes();
        self.push(hi);
        self.push(lo);
    }

    /// Effective address for the common addressing modes, keyed by opcode
    /// bits 0-4.
    fn operand_addr(&mut self, mode: u8) -> u16 {
        match mode {
            // dp
            0x04 => {
                let dp = self.fetch();
                self.page(dp)
            }
            // !abs
            0x05 => self.fetch_word(),
            // (X)
            0x06 => {
                self.io();
                self.page(self.regs.x)
            }
            // [dp+X]
            0x07 => {
                let dp = self.fetch().wrapping_add(self.regs.x);
                self.io();
                self.read_dp_word(dp)
            }
            // dp+X
            0x14 => {
                let dp = self.fetch();
                self.io();
                self.page(dp.wrapping_add(self.regs.x))
            }
            // !abs+X
            0x15 => {
                let addr = self.fetch_word();
                self.io();
                addr.wrapping_add(self.regs.x as u16)
            }
            // !abs+Y
            0x16 => {
                let addr = self.fetch_word();
                self.io();
                addr.wrapping_add(self.regs.y as u16)
            }
            // [dp]+Y
            _ => {
                let dp = self.fetch();
                self.io();
                self.read_dp_word(dp).wrapping_add(self.regs.y as u16)
            }
        }
    }

    /// Store with the dummy read the chip performs first.
    fn store(&mut self, addr: u16, data: u8) {
        self.read(addr);
        self.write(addr, data);
    }

    fn store_dp(&mut self, dp: u8, data: u8) {
        let addr = self.page(dp);
        self.store(addr, data);
    }

    // ALU

    fn adc(&mut self, x: u8, y: u8) -> u8 {
        let sum = x as u16 + y as u16 + self.flag(Psw::C) as u16;
        let r = sum as u8;
        self.regs.psw.set(Psw::V, !(x ^ y) & (x ^ r) & 0x80 != 0);
        self.regs.psw.set(Psw::H, (x ^ y ^ r) & 0x10 != 0);
        self.regs.psw.set(Psw::C, sum > 0xFF);
        self.set_nz(r);
        r
    }

    fn alu(&mut self, op: Alu, x: u8, y: u8) -> u8 {
        let r = match op {
            Alu::Or => x | y,
            Alu::And => x & y,
            Alu::Eor => x ^ y,
            Alu::Ld => y,
            Alu::Adc => return self.adc(x, y),
            Alu::Sbc => return self.adc(x, !y),
            Alu::Cmp => {
                self.regs.psw.set(Psw::C, x >= y);
                self.set_nz(x.wrapping_sub(y));
                return x;
            }
        };
        self.set_nz(r);
        r
    }

    fn apply(&mut self, op: Alu, r: Reg, value: u8) {
        let result = self.alu(op, self.get(r), value);
        self.set(r, result);
    }

    fn modify(&mut self, op: Modify, x: u8) -> u8 {
        let carry = self.flag(Psw::C) as u8;
        let r = match op {
            Modify::Asl => {
                self.regs.psw.set(Psw::C, x & 0x80 != 0);
                x << 1
            }
            Modify::Rol => {
                self.regs.psw.set(Psw::C, x & 0x80 != 0);
                x << 1 | carry
            }
            Modify::Lsr => {
                self.regs.psw.set(Psw::C, x & 1 != 0);
                x >> 1
            }
            Modify::Ror => {
                self.regs.psw.set(Psw::C, x & 1 != 0);
                carry << 7 | x >> 1
            }
            Modify::Dec => x.wrapping_sub(1),
            Modify::Inc => x.wrapping_add(1),
        };
        self.set_nz(r);
        r
    }

    fn addw(&mut self, x: u16, y: u16) -> u16 {
        self.regs.psw.remove(Psw::C);
        let lo = self.adc(x as u8, y as u8);
        let hi = self.adc((x >> 8) as u8, (y >> 8) as u8);
        let r = u16::from_le_bytes([lo, hi]);
        self.regs.psw.set(Psw::Z, r == 0);
        r
    }

    fn subw(&mut self, x: u16, y: u16) -> u16 {
        self.regs.psw.insert(Psw::C);
        let lo = self.adc(x as u8, !(y as u8));
        let hi = self.adc((x >> 8) as u8, !((y >> 8) as u8));
        let r = u16::from_le_bytes([lo, hi]);
        self.regs.psw.set(Psw::Z, r == 0);
        r
    }

    fn cmpw(&mut self, x: u16, y: u16) {
        let r = x.wrapping_sub(y);
        self.regs.psw.set(Psw::N, r & 0x8000 != 0);
        self.regs.psw.set(Psw::Z, r == 0);
        self.regs.psw.set(Psw::C, x >= y);
    }

    // Control flow

    fn branch(&mut self, take: bool) {
        let rel = self.fetch() as i8;
        if take {
            self.io();
            self.io();
            self.regs.pc = self.regs.pc.wrapping_add_signed(rel as i16);
        }
    }

    /// Finish a 3-byte conditional branch whose offset is fetched last.
    fn branch_tail(&mut self, rel: u8, take: bool) {
        if take {
            self.io();
            self.io();
            self.regs.pc = self.regs.pc.wrapping_add_signed(rel as i8 as i16);
        }
    }

    // Instruction groups

    /// OR, AND, EOR, CMP, ADC, SBC and MOV A in every addressing mode.
    fn execute_alu(&mut self, opcode: u8) {
        let op = ALU_ROWS[(opcode >> 5) as usize];
        match opcode & 0x1F {
            // #imm
            0x08 => {
                let value = self.fetch();
                self.apply(op, Reg::A, value);
            }
            // dp, dp
            0x09 => {
                let src = self.fetch();
                let value = self.read_dp(src);
                let dst = self.fetch();
                let target = self.read_dp(dst);
                let result = self.alu(op, target, value);
                self.finish_rmw(op, dst, result);
            }
            // dp, #imm
            0x18 => {
                let value = self.fetch();
                let dst = self.fetch();
                let target = self.read_dp(dst);
                let result = self.alu(op, target, value);
                self.finish_rmw(op, dst, result);
            }
            // (X), (Y)
            0x19 => {
                self.io();
                let value = self.read_dp(self.regs.y);
                let target = self.read_dp(self.regs.x);
                let result = self.alu(op, target, value);
                self.finish_rmw(op, self.regs.x, result);
            }
            mode => {
                let addr = self.operand_addr(mode);
                let value = self.read(addr);
                self.apply(op, Reg::A, value);
            }
        }
    }

    fn finish_rmw(&mut self, op: Alu, dp: u8, result: u8) {
        if op == Alu::Cmp {
            self.io();
        } else {
            self.write_dp(dp, result);
        }
    }

    /// ASL, ROL, LSR, ROR, DEC and INC on memory or A.
    fn execute_modify(&mut self, opcode: u8) {
        let op = MODIFY_ROWS[(opcode >> 5) as usize];
        match opcode & 0x1F {
            0x0B => {
                let dp = self.fetch();
                let value = self.read_dp(dp);
                let result = self.modify(op, value);
                self.write_dp(dp, result);
            }
            0x1B => {
                let dp = self.fetch();
                self.io();
                let dp = dp.wrapping_add(self.regs.x);
                let value = self.read_dp(dp);
                let result = self.modify(op, value);
                self.write_dp(dp, result);
            }
            0x0C => {
                let addr = self.fetch_word();
                let value = self.read(addr);
                let result = self.modify(op, value);
                self.write(addr, result);
            }
            _ => {
                self.io();
                self.regs.a = self.modify(op, self.regs.a);
            }
        }
    }

    fn modify_reg(&mut self, op: Modify, r: Reg) {
        self.io();
        let result = self.modify(op, self.get(r));
        self.set(r, result);
    }

    fn transfer(&mut self, to: Reg, from: Reg) {
        self.io();
        let value = self.get(from);
        self.set(to, value);
        self.set_nz(value);
    }

    /// OR1, AND1, EOR1, MOV1 and NOT1 on a bit of the low 8 KiB.
    fn execute_mem_bit(&mut self, opcode: u8) {
        let raw = self.fetch_word();
        let bit = (raw >> 13) as u8;
        let addr = raw & 0x1FFF;
        let value = self.read(addr);
        let set = value & (1 << bit) != 0;
        let invert = opcode & 0x20 != 0;
        let carry = self.flag(Psw::C);
        match opcode >> 5 {
            0 | 1 => {
                self.io();
                self.regs.psw.set(Psw::C, carry | (set ^ invert));
            }
            2 | 3 => self.regs.psw.set(Psw::C, carry & (set ^ invert)),
            4 => {
                self.io();
                self.regs.psw.set(Psw::C, carry ^ set);
            }
            5 => self.regs.psw.set(Psw::C, set),
            6 => {
                self.io();
                let result = (value & !(1 << bit)) | (carry as u8) << bit;
                self.write(addr, result);
            }
            _ => self.write(addr, value ^ (1 << bit)),
        }
    }

    fn compare_reg(&mut self, r: Reg, value: u8) {
        self.alu(Alu::Cmp, self.get(r), value);
    }

    fn pull_io(&mut self) -> u8 {
        self.io();
        self.io();
        self.pull()
    }

    fn push_io(&mut self, data: u8) {
        self.io();
        self.io();
        self.push(data);
    }

    fn set_flag_io(&mut self, flag: Psw, value: bool) {
        self.io();
        self.regs.psw.set(flag, value);
    }

    fn test_and_modify(&mut self, set: bool) {
        let addr = self.fetch_word();
        let value = self.read(addr);
        let a = self.regs.a;
        self.set_nz(a.wrapping_sub(value));
        self.read(addr);
        let result = if set { value | a } else { value & !a };
        self.write(addr, result);
    }

    /// Fetch and execute one instruction.
    pub(super) fn execute(&mut self) {
        let opcode = self.fetch();
        match opcode {
            // ALU and MOV A: columns 4-9 of rows 0-5, loads of rows 7
            op if op < 0xC0 && matches!(op & 0x1F, 0x04..=0x09 | 0x14..=0x19) => {
                self.execute_alu(op)
            }
            op if op >= 0xE0 && matches!(op & 0x1F, 0x04..=0x08 | 0x14..=0x17) => {
                self.execute_alu(op)
            }
            // MOV mem, A
            op if (0xC0..0xE0).contains(&op) && matches!(op & 0x1F, 0x04..=0x07 | 0x14..=0x17) => {
                let addr = self.operand_addr(op & 0x1F);
                self.store(addr, self.regs.a);
            }
            op if op < 0xC0 && matches!(op & 0x1F, 0x0B | 0x1B | 0x0C | 0x1C) => {
                self.execute_modify(op)
            }
            op if op & 0x0F == 0x01 => {
                // TCALL n
                let vector = 0xFFDE - ((op >> 4) as u16) * 2;
                let lo = self.read(vector);
                let hi = self.read(vector + 1);
                self.io();
                self.push_pc();
                self.io();
                self.io();
                self.regs.pc = u16::from_le_bytes([lo, hi]);
            }
            op if op & 0x0F == 0x02 => {
                // SET1 / CLR1 dp.bit
                let dp = self.fetch();
                let value = self.read_dp(dp);
                let mask = 1u8 << (op >> 5);
                let result = if op & 0x10 != 0 { value & !mask } else { value | mask };
                self.write_dp(dp, result);
            }
            op if op & 0x0F == 0x03 => {
                // BBS / BBC dp.bit, rel
                let dp = self.fetch();
                let value = self.read_dp(dp);
                let rel = self.fetch();
                self.io();
                let set = value & (1 << (op >> 5)) != 0;
                self.branch_tail(rel, set == (op & 0x10 == 0));
            }
            op if op & 0x1F == 0x0A => self.execute_mem_bit(op),

            // column 0
            0x00 => self.io(),
            0x10 => self.branch(!self.flag(Psw::N)),
            0x30 => self.branch(self.flag(Psw::N)),
            0x50 => self.branch(!self.flag(Psw::V)),
            0x70 => self.branch(self.flag(Psw::V)),
            0x90 => self.branch(!self.flag(Psw::C)),
            0xB0 => self.branch(self.flag(Psw::C)),
            0xD0 => self.branch(!self.flag(Psw::Z)),
            0xF0 => self.branch(self.flag(Psw::Z)),
            0x20 => self.set_flag_io(Psw::P, false),
            0x40 => self.set_flag_io(Psw::P, true),
            0x60 => self.set_flag_io(Psw::C, false),
            0x80 => self.set_flag_io(Psw::C, true),
            0xA0 => {
                self.io();
                self.set_flag_io(Psw::I, true);
            }
            0xC0 => {
                self.io();
                self.set_flag_io(Psw::I, false);
            }
            0xE0 => {
                self.io();
                self.regs.psw.remove(Psw::V | Psw::H);
            }

            // columns 8 and 9 outside the ALU rows
            0xC8 => {
                let value = self.fetch();
                self.compare_reg(Reg::X, value);
            }
            0xD8 => {
                let dp = self.fetch();
                self.store_dp(dp, self.regs.x);
            }
            0xF8 => {
                let dp = self.fetch();
                let value = self.read_dp(dp);
                self.apply(Alu::Ld, Reg::X, value);
            }
            0xC9 => {
                let addr = self.fetch_word();
                self.store(addr, self.regs.x);
            }
            0xD9 => {
                let dp = self.fetch().wrapping_add(self.regs.y);
                self.io();
                self.store_dp(dp, self.regs.x);
            }
            0xE9 => {
                let addr = self.fetch_word();
                let value = self.read(addr);
                self.apply(Alu::Ld, Reg::X, value);
            }
            0xF9 => {
                let dp = self.fetch();
                self.io();
                let value = self.read_dp(dp.wrapping_add(self.regs.y));
                self.apply(Alu::Ld, Reg::X, value);
            }

            // column A words
            0x1A | 0x3A => {
                // DECW / INCW dp
                let dp = self.fetch();
                let lo = self.read_dp(dp);
                let delta: i16 = if opcode == 0x3A { 1 } else { -1 };
                let word = (lo as u16).wrapping_add_signed(delta);
                self.write_dp(dp, word as u8);
                let next = dp.wrapping_add(1);
                let hi = self.read_dp(next).wrapping_add((word >> 8) as u8);
                self.write_dp(next, hi);
                let result = u16::from_le_bytes([word as u8, hi]);
                self.regs.psw.set(Psw::N, result & 0x8000 != 0);
                self.regs.psw.set(Psw::Z, result == 0);
            }
            0x5A => {
                let dp = self.fetch();
                let value = self.read_dp_word(dp);
                self.cmpw(self.regs.ya(), value);
            }
            0x7A | 0x9A | 0xBA => {
                // ADDW / SUBW / MOVW YA, dp
                let dp = self.fetch();
                let lo = self.read_dp(dp);
                self.io();
                let hi = self.read_dp(dp.wrapping_add(1));
                let value = u16::from_le_bytes([lo, hi]);
                let ya = self.regs.ya();
                let result = match opcode {
                    0x7A => self.addw(ya, value),
                    0x9A => self.subw(ya, value),
                    _ => {
                        self.regs.psw.set(Psw::N, value & 0x8000 != 0);
                        self.regs.psw.set(Psw::Z, value == 0);
                        value
                    }
                };
                self.regs.set_ya(result);
            }
            0xDA => {
                // MOVW dp, YA
                let dp = self.fetch();
                self.read_dp(dp);
                self.write_dp(dp, self.regs.a);
                self.write_dp(dp.wrapping_add(1), self.regs.y);
            }
            0xFA => {
                // MOV dp, dp
                let src = self.fetch();
                let value = self.read_dp(src);
                let dst = self.fetch();
                self.write_dp(dst, value);
            }

            // columns B and C outside the shift rows
            0xCB => {
                let dp = self.fetch();
                self.store_dp(dp, self.regs.y);
            }
            0xDB => {
                let dp = self.fetch().wrapping_add(self.regs.x);
                self.io();
                self.store_dp(dp, self.regs.y);
            }
            0xEB => {
                let dp = self.fetch();
                let value = self.read_dp(dp);
                self.apply(Alu::Ld, Reg::Y, value);
            }
            0xFB => {
                let dp = self.fetch();
                self.io();
                let value = self.read_dp(dp.wrapping_add(self.regs.x));
                self.apply(Alu::Ld, Reg::Y, value);
            }
            0xCC => {
                let addr = self.fetch_word();
                self.store(addr, self.regs.y);
            }
            0xDC => self.modify_reg(Modify::Dec, Reg::Y),
            0xEC => {
                let addr = self.fetch_word();
                let value = self.read(addr);
                self.apply(Alu::Ld, Reg::Y, value);
            }
            0xFC => self.modify_reg(Modify::Inc, Reg::Y),

            // column D
            0x0D => self.push_io(self.regs.psw.bits()),
            0x2D => self.push_io(self.regs.a),
            0x4D => self.push_io(self.regs.x),
            0x6D => self.push_io(self.regs.y),
            0x1D => self.modify_reg(Modify::Dec, Reg::X),
            0x3D => self.modify_reg(Modify::Inc, Reg::X),
            0x5D => self.transfer(Reg::X, Reg::A),
            0x7D => self.transfer(Reg::A, Reg::X),
            0xDD => self.transfer(Reg::A, Reg::Y),
            0xFD => self.transfer(Reg::Y, Reg::A),
            0x8D => {
                let value = self.fetch();
                self.apply(Alu::Ld, Reg::Y, value);
            }
            0xCD => {
                let value = self.fetch();
                self.apply(Alu::Ld, Reg::X, value);
            }
            0xAD => {
                let value = self.fetch();
                self.compare_reg(Reg::Y, value);
            }
            0x9D => {
                self.io();
                self.regs.x = self.regs.sp;
                self.set_nz(self.regs.x);
            }
            0xBD => {
                self.io();
                self.regs.sp = self.regs.x;
            }
            0xED => {
                self.io();
                self.io();
                self.regs.psw.toggle(Psw::C);
            }

            // column E
            0x0E | 0x4E => self.test_and_modify(opcode == 0x0E),
            0x1E | 0x5E => {
                let addr = self.fetch_word();
                let value = self.read(addr);
                self.compare_reg(if opcode == 0x1E { Reg::X } else { Reg::Y }, value);
            }
            0x3E | 0x7E => {
                let dp = self.fetch();
                let value = self.read_dp(dp);
                self.compare_reg(if opcode == 0x3E { Reg::X } else { Reg::Y }, value);
            }
            0x2E => {
                // CBNE dp, rel
                let dp = self.fetch();
                let value = self.read_dp(dp);
                let rel = self.fetch();
                self.io();
                self.branch_tail(rel, self.regs.a != value);
            }
            0xDE => {
                // CBNE dp+X, rel
                let dp = self.fetch();
                self.io();
                let value = self.read_dp(dp.wrapping_add(self.regs.x));
                let rel = self.fetch();
                self.io();
                self.branch_tail(rel, self.regs.a != value);
            }
            0x6E => {
                // DBNZ dp, rel
                let dp = self.fetch();
                let value = self.read_dp(dp).wrapping_sub(1);
                self.write_dp(dp, value);
                let rel = self.fetch();
                self.branch_tail(rel, value != 0);
            }
            0xFE => {
                // DBNZ Y, rel
                let rel = self.fetch();
                self.io();
                self.regs.y = self.regs.y.wrapping_sub(1);
                self.io();
                self.branch_tail(rel, self.regs.y != 0);
            }
            0x8E => {
                let psw = self.pull_io();
                self.regs.psw = Psw::from_bits_retain(psw);
            }
            0xAE => self.regs.a = self.pull_io(),
            0xCE => self.regs.x = self.pull_io(),
            0xEE => self.regs.y = self.pull_io(),
            0x9E => self.divide(),
            0xBE => {
                // DAS
                self.io();
                self.io();
                let mut a = self.regs.a;
                if !self.flag(Psw::C) || a > 0x99 {
                    a = a.wrapping_sub(0x60);
                    self.regs.psw.remove(Psw::C);
                }
                if !self.flag(Psw::H) || a & 0x0F > 0x09 {
                    a = a.wrapping_sub(0x06);
                }
                self.regs.a = a;
                self.set_nz(a);
            }

            // column F
            0x0F => {
                // BRK
                let lo = self.read(0xFFDE);
                let hi = self.read(0xFFDF);
                self.io();
                self.io();
                self.push_pc();
                self.push(self.regs.psw.bits());
                self.regs.pc = u16::from_le_bytes([lo, hi]);
                self.regs.psw.insert(Psw::B);
                self.regs.psw.remove(Psw::I);
            }
            0x1F => {
                // JMP [!abs+X]
                let addr = self.fetch_word();
                self.io();
                let addr = addr.wrapping_add(self.regs.x as u16);
                let lo = self.read(addr);
                let hi = self.read(addr.wrapping_add(1));
                self.regs.pc = u16::from_le_bytes([lo, hi]);
            }
            0x2F => {
                let rel = self.fetch();
                self.branch_tail(rel, true);
            }
            0x3F => {
                // CALL !abs
                let target = self.fetch_word();
                self.io();
                self.io();
                self.io();
                self.push_pc();
                self.regs.pc = target;
            }
            0x4F => {
                // PCALL up
                let offset = self.fetch();
                self.io();
                self.io();
                self.push_pc();
                self.regs.pc = 0xFF00 | offset as u16;
            }
            0x5F => self.regs.pc = self.fetch_word(),
            0x6F => {
                // RET
                let lo = self.pull();
                let hi = self.pull();
                self.io();
                self.io();
                self.regs.pc = u16::from_le_bytes([lo, hi]);
            }
            0x7F => {
                // RETI
                let psw = self.pull();
                self.regs.psw = Psw::from_bits_retain(psw);
                let lo = self.pull();
                let hi = self.pull();
                self.io();
                self.io();
                self.regs.pc = u16::from_le_bytes([lo, hi]);
            }
            0x8F => {
                // MOV dp, #imm
                let value = self.fetch();
                let dp = self.fetch();
                self.store_dp(dp, value);
            }
            0x9F => {
                // XCN
                for _ in 0..4 {
                    self.io();
                }
                self.regs.a = self.regs.a.rotate_left(4);
                self.set_nz(self.regs.a);
            }
            0xAF => {
                // MOV (X)+, A
                self.io();
                self.io();
                let x = self.regs.x;
                self.write_dp(x, self.regs.a);
                self.regs.x = x.wrapping_add(1);
            }
            0xBF => {
                // MOV A, (X)+
                self.io();
                let x = self.regs.x;
                self.regs.a = self.read_dp(x);
                self.regs.x = x.wrapping_add(1);
                self.io();
                self.set_nz(self.regs.a);
            }
            0xCF => {
                // MUL YA
                for _ in 0..8 {
                    self.io();
                }
                let product = self.regs.y as u16 * self.regs.a as u16;
                self.regs.set_ya(product);
                self.set_nz(self.regs.y);
            }
            0xDF => {
                // DAA
                self.io();
                self.io();
                let mut a = self.regs.a;
                if self.flag(Psw::C) || a > 0x99 {
                    a = a.wrapping_add(0x60);
                    self.regs.psw.insert(Psw::C);
                }
                if self.flag(Psw::H) || a & 0x0F > 0x09 {
                    a = a.wrapping_add(0x06);
                }
                self.regs.a = a;
                self.set_nz(a);
            }
            _ => {
                // SLEEP / STOP
                self.io();
                self.io();
                self.halted = true;
            }
        }
    }

    fn divide(&mut self) {
        for _ in 0..11 {
            self.io();
        }
        let ya = self.regs.ya() as u32;
        let x = self.regs.x as u32;
        let y = self.regs.y as u32;
        self.regs.psw.set(Psw::V, y >= x);
        self.regs.psw.set(Psw::H, (y & 0x0F) >= (x & 0x0F));
        if y < x << 1 {
            self.regs.a = (ya / x) as u8;
            self.regs.y = (ya % x) as u8;
        } else {
            // the quotient does not fit in nine bits
            let rest = ya - (x << 9);
            self.regs.a = (255 - rest / (256 - x)) as u8;
            self.regs.y = (x + rest % (256 - x)) as u8;
        }
        self.set_nz(self.regs.a);
    }
}
