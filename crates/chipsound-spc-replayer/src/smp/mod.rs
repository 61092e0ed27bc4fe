//! The SPC700 sound CPU (S-SMP) with its 64 KiB of RAM, memory-mapped I/O,
//! timers and the attached DSP.
//!
//! Time is counted in units of 1/24 SMP cycle. Every bus access advances
//! the clock, ticks the timers and lets the DSP catch up, so the DSP always
//! observes RAM and register writes at the cycle they happen.

mod ops;
pub mod timer;

use bitflags::bitflags;
use log::trace;

use crate::dsp::{Dsp, PHASES};
use timer::{Timer, FAST_FREQUENCY, SLOW_FREQUENCY};

/// Size of the SMP address space.
pub const RAM_SIZE: usize = 0x10000;
/// Address the IPL ROM is mapped at.
pub const IPL_ROM_ADDR: usize = 0xFFC0;
/// Clock units per SMP cycle.
pub const CLOCKS_PER_CYCLE: i64 = 24;
/// SMP cycles per second.
pub const CYCLE_RATE: u32 = 1_024_000;
/// SMP cycles per DSP output sample.
pub const CYCLES_PER_SAMPLE: u32 = PHASES;

const DSP_UNIT: i64 = 4096;

/// Boot loader mapped at $FFC0 while enabled in $F1.
pub const IPL_ROM: [u8; 64] = [
    0xCD, 0xEF, 0xBD, 0xE8, 0x00, 0xC6, 0x1D, 0xD0, 0xFC, 0x8F, 0xAA, 0xF4, 0x8F, 0xBB, 0xF5, 0x78,
    0xCC, 0xF4, 0xD0, 0xFB, 0x2F, 0x19, 0xEB, 0xF4, 0xD0, 0xFC, 0x7E, 0xF4, 0xD0, 0x0B, 0xE4, 0xF5,
    0xCB, 0xF4, 0xD7, 0x00, 0xFC, 0xD0, 0xF3, 0xAB, 0x01, 0x10, 0xEF, 0x7E, 0xF4, 0x10, 0xEB, 0xBA,
    0xF6, 0xDA, 0x00, 0xBA, 0xF4, 0xC4, 0xF4, 0xDD, 0x5D, 0xD0, 0xDB, 0x1F, 0x00, 0x00, 0xC0, 0xFF,
];

bitflags! {
    /// Program status word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Psw: u8 {
        /// Carry.
        const C = 0x01;
        /// Zero.
        const Z = 0x02;
        /// Interrupt enable (no interrupt sources are wired).
        const I = 0x04;
        /// Half carry.
        const H = 0x08;
        /// Break.
        const B = 0x10;
        /// Direct page at $0100 instead of $0000.
        const P = 0x20;
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
    pub psw: Psw,
}

impl Registers {
    /// Y and A as one 16-bit register.
    pub fn ya(&self) -> u16 {
        u16::from_le_bytes([self.a, self.y])
    }

    /// Load Y and A from a 16-bit value.
    pub fn set_ya(&mut self, value: u16) {
        let [a, y] = value.to_le_bytes();
        self.a = a;
        self.y = y;
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self {
            pc: 0xFFC0,
            a: 0,
            x: 0,
            y: 0,
            sp: 0xEF,
            psw: Psw::Z,
        }
    }
}

/// I/O latches controlled through $F0-$F2 and $F8-$F9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmpStatus {
    /// $F0 bits 6-7: extra wait states per cycle.
    pub clock_speed: u8,
    /// $F0 bits 4-5: timer prescaler slowdown.
    pub timer_speed: u8,
    /// $F0 bit 3.
    pub timers_enable: bool,
    /// $F0 bit 2: RAM reads return $5A.
    pub ram_disable: bool,
    /// $F0 bit 1.
    pub ram_writable: bool,
    /// $F0 bit 0.
    pub timers_disable: bool,
    /// $F1 bit 7: IPL ROM mapped at $FFC0.
    pub iplrom_enable: bool,
    /// $F2: selected DSP register.
    pub dsp_addr: u8,
    /// $F8 general purpose latch.
    pub ram00f8: u8,
    /// $F9 general purpose latch.
    pub ram00f9: u8,
}

impl Default for SmpStatus {
    fn default() -> Self {
        Self {
            clock_speed: 0,
            timer_speed: 0,
            timers_enable: true,
            ram_disable: false,
            ram_writable: true,
            timers_disable: false,
            iplrom_enable: true,
            dsp_addr: 0,
            ram00f8: 0,
            ram00f9: 0,
        }
    }
}

impl SmpStatus {
    /// Value of the $F0 test register these fields decode from.
    pub fn test_register(&self) -> u8 {
        (self.clock_speed & 3) << 6
            | (self.timer_speed & 3) << 4
            | (self.timers_enable as u8) << 3
            | (self.ram_disable as u8) << 2
            | (self.ram_writable as u8) << 1
            | self.timers_disable as u8
    }

    /// Decode a $F0 test register value.
    pub fn set_test_register(&mut self, data: u8) {
        self.clock_speed = (data >> 6) & 3;
        self.timer_speed = (data >> 4) & 3;
        self.timers_enable = data & 0x08 != 0;
        self.ram_disable = data & 0x04 != 0;
        self.ram_writable = data & 0x02 != 0;
        self.timers_disable = data & 0x01 != 0;
    }

    fn timer_step(&self) -> u32 {
        (1 << self.clock_speed) + (2 << self.timer_speed)
    }

    fn timer_gate(&self) -> bool {
        self.timers_enable && !self.timers_disable
    }
}

/// The sound CPU, its memory and the DSP.
#[derive(Debug, Clone)]
pub struct Smp {
    /// CPU registers.
    pub regs: Registers,
    pub(crate) status: SmpStatus,
    pub(crate) timers: [Timer; 3],
    pub(crate) ram: Vec<u8>,
    pub(crate) dsp: Dsp,
    pub(crate) ipl_rom: [u8; 64],
    /// Values the SMP sees at $F4-$F7.
    pub(crate) ports: [u8; 4],
    port_log: Vec<u8>,
    log_pos: usize,
    log_loop: usize,
    halted: bool,
    clock: i64,
    dsp_clock: i64,
    dsp_step: i64,
}

impl Smp {
    /// Powered-on SMP with cleared RAM.
    pub fn new() -> Self {
        let mut smp = Self {
            regs: Registers::default(),
            status: SmpStatus::default(),
            timers: [
                Timer::new(SLOW_FREQUENCY),
                Timer::new(SLOW_FREQUENCY),
                Timer::new(FAST_FREQUENCY),
            ],
            ram: vec![0; RAM_SIZE],
            dsp: Dsp::new(),
            ipl_rom: IPL_ROM,
            ports: [0; 4],
            port_log: Vec::new(),
            log_pos: 0,
            log_loop: 0,
            halted: false,
            clock: 0,
            dsp_clock: 0,
            dsp_step: DSP_UNIT,
        };
        smp.power();
        smp
    }

    /// Clear RAM and reset.
    pub fn power(&mut self) {
        self.ram.fill(0);
        self.reset();
    }

    /// Reset CPU, I/O, timers and DSP. RAM and tempo are kept.
    pub fn reset(&mut self) {
        self.regs = Registers::default();
        self.status = SmpStatus::default();
        for timer in &mut self.timers {
            timer.reset();
        }
        self.ports = [0; 4];
        self.port_log.clear();
        self.log_pos = 0;
        self.log_loop = 0;
        self.halted = false;
        self.clock = 0;
        self.dsp_clock = 0;
        self.dsp.reset();
    }

    /// Playback speed factor; 1.0 is normal.
    pub fn set_tempo(&mut self, tempo: f64) {
        let tempo = if tempo > 0.0 { tempo } else { 1.0 };
        self.dsp_step = ((DSP_UNIT as f64 / tempo).round() as i64).max(1);
    }

    /// Full 64 KiB of RAM.
    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    /// Mutable RAM.
    pub fn ram_mut(&mut self) -> &mut [u8] {
        &mut self.ram
    }

    /// The DSP.
    pub fn dsp(&self) -> &Dsp {
        &self.dsp
    }

    /// Mutable DSP.
    pub fn dsp_mut(&mut self) -> &mut Dsp {
        &mut self.dsp
    }

    /// I/O latches.
    pub fn status(&self) -> &SmpStatus {
        &self.status
    }

    /// Values the SMP reads at $F4-$F7 once the port log is exhausted.
    pub fn ports(&self) -> [u8; 4] {
        self.ports
    }

    /// Set the values the SMP reads at $F4-$F7.
    pub fn set_ports(&mut self, ports: [u8; 4]) {
        self.ports = ports;
    }

    /// Timer stage counters.
    pub fn timers(&self) -> &[Timer; 3] {
        &self.timers
    }

    /// Set the output counter of timer `index`, masked to 4 bits.
    pub fn set_timer_output(&mut self, index: usize, value: u8) {
        if let Some(timer) = self.timers.get_mut(index) {
            timer.stage3 = value & 0x0F;
        }
    }

    /// Queue bytes to be returned by successive port reads. After the last
    /// byte, reading continues from `loop_start`.
    pub fn set_port_log(&mut self, log: &[u8], loop_start: usize) {
        self.port_log = log.to_vec();
        self.log_pos = 0;
        self.log_loop = loop_start.min(log.len());
    }

    /// The unread part of the port log.
    pub fn port_log_remaining(&self) -> &[u8] {
        &self.port_log[self.log_pos.min(self.port_log.len())..]
    }

    /// The bytes still to be read from the port log, unrolled so that they
    /// play back identically from the start, and the loop point within them.
    pub fn port_log_state(&self) -> (Vec<u8>, usize) {
        let pos = self.log_pos.min(self.port_log.len());
        let mut rest = self.port_log[pos..].to_vec();
        if pos >= self.log_loop {
            rest.extend_from_slice(&self.port_log[self.log_loop..pos]);
            (rest, 0)
        } else {
            (rest, self.log_loop - pos)
        }
    }

    /// DSP catch-up counter, in 1/4096 clock units.
    pub(crate) fn dsp_clock(&self) -> i64 {
        self.dsp_clock
    }

    pub(crate) fn set_dsp_clock(&mut self, clock: i64) {
        self.dsp_clock = clock;
    }

    /// SMP cycles run since the last reset.
    pub fn cycles(&self) -> u64 {
        (self.clock / CLOCKS_PER_CYCLE) as u64
    }

    /// True after SLEEP or STOP.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Execute one instruction.
    pub fn step(&mut self) {
        if self.halted {
            self.io();
        } else {
            self.execute();
        }
    }

    /// Run until `out` can be filled with interleaved stereo samples.
    pub fn render(&mut self, out: &mut [i16]) {
        while self.dsp.pending() < out.len() {
            self.step();
        }
        self.dsp.take_samples(out);
    }

    /// Run for `count` samples, discarding the output.
    pub fn skip(&mut self, count: usize) {
        let mut scratch = [0i16; 1024];
        let mut remain = count & !1;
        trace!("smp: skipping {} samples", remain);
        while remain > 0 {
            let n = remain.min(scratch.len());
            self.render(&mut scratch[..n]);
            remain -= n;
        }
    }

    // Clocking

    fn add_clocks(&mut self, units: i64) {
        self.clock += units;
        self.dsp_clock -= units * self.dsp_step;
        while self.dsp_clock < 0 {
            self.dsp.run(&mut self.ram);
            self.dsp_clock += CLOCKS_PER_CYCLE * DSP_UNIT;
        }
    }

    fn cycle_edge(&mut self) {
        let step = self.status.timer_step();
        let gate = self.status.timer_gate();
        for timer in &mut self.timers {
            timer.tick(step, gate);
        }

        match self.status.clock_speed {
            1 => self.add_clocks(CLOCKS_PER_CYCLE),
            2 => {
                // the CPU never reaches the next cycle
                self.halted = true;
                self.add_clocks(CLOCKS_PER_CYCLE);
            }
            3 => self.add_clocks(CLOCKS_PER_CYCLE * 9),
            _ => {}
        }
    }

    /// One internal cycle.
    pub(crate) fn io(&mut self) {
        self.add_clocks(CLOCKS_PER_CYCLE);
        self.cycle_edge();
    }

    /// One read cycle.
    pub(crate) fn read(&mut self, addr: u16) -> u8 {
        self.add_clocks(CLOCKS_PER_CYCLE / 2);
        let data = self.bus_read(addr);
        self.add_clocks(CLOCKS_PER_CYCLE / 2);
        self.cycle_edge();
        data
    }

    /// One write cycle.
    pub(crate) fn write(&mut self, addr: u16, data: u8) {
        self.add_clocks(CLOCKS_PER_CYCLE);
        self.bus_write(addr, data);
        self.cycle_edge();
    }

    // Bus

    fn ram_read(&self, addr: u16) -> u8 {
        if addr as usize >= IPL_ROM_ADDR && self.status.iplrom_enable {
            return self.ipl_rom[addr as usize - IPL_ROM_ADDR];
        }
        if self.status.ram_disable {
            return 0x5A;
        }
        self.ram[addr as usize]
    }

    fn ram_write(&mut self, addr: u16, data: u8) {
        // writes reach RAM under the IPL ROM too
        if self.status.ram_writable && !self.status.ram_disable {
            self.ram[addr as usize] = data;
        }
    }

    fn read_port(&mut self, index: usize) -> u8 {
        if self.log_pos < self.port_log.len() {
            let data = self.port_log[self.log_pos];
            self.log_pos += 1;
            if self.log_pos == self.port_log.len() {
                self.log_pos = self.log_loop;
            }
            self.ports[index] = data;
            return data;
        }
        self.ports[index]
    }

    pub(crate) fn bus_read(&mut self, addr: u16) -> u8 {
        match addr {
            0xF0 | 0xF1 | 0xFA..=0xFC => 0,
            0xF2 => self.status.dsp_addr,
            0xF3 => self.dsp.read(self.status.dsp_addr & 0x7F),
            0xF4..=0xF7 => self.read_port(addr as usize - 0xF4),
            0xF8 => self.status.ram00f8,
            0xF9 => self.status.ram00f9,
            0xFD..=0xFF => self.timers[addr as usize - 0xFD].read_counter(),
            _ => self.ram_read(addr),
        }
    }

    pub(crate) fn bus_write(&mut self, addr: u16, data: u8) {
        match addr {
            0xF0 => {
                // only writable with the P flag clear
                if !self.regs.psw.contains(Psw::P) {
                    self.status.set_test_register(data);
                    let gate = self.status.timer_gate();
                    for timer in &mut self.timers {
                        timer.sync_stage1(gate);
                    }
                }
            }
            0xF1 => {
                self.status.iplrom_enable = data & 0x80 != 0;
                if data & 0x20 != 0 {
                    self.ports[2] = 0;
                    self.ports[3] = 0;
                }
                if data & 0x10 != 0 {
                    self.ports[0] = 0;
                    self.ports[1] = 0;
                }
                for (i, timer) in self.timers.iter_mut().enumerate() {
                    let enable = data & (1 << i) != 0;
                    if !timer.enable && enable {
                        timer.restart();
                    }
                    timer.enable = enable;
                }
            }
            0xF2 => self.status.dsp_addr = data,
            0xF3 => {
                if self.status.dsp_addr & 0x80 == 0 {
                    self.dsp.write(self.status.dsp_addr, data);
                }
            }
            0xF8 => self.status.ram00f8 = data,
            0xF9 => self.status.ram00f9 = data,
            0xFA..=0xFC => self.timers[addr as usize - 0xFA].target = data,
            // $F4-$F7 go to the main CPU, $FD-$FF are read-only
            _ => {}
        }
        self.ram_write(addr, data);
    }
}

impl Default for Smp {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::reg;

    /// SMP with `program` at $0200, IPL disabled and the PC on it.
    fn with_program(program: &[u8]) -> Smp {
        let mut smp = Smp::new();
        smp.ram[0x200..0x200 + program.len()].copy_from_slice(program);
        smp.status.iplrom_enable = false;
        smp.regs.pc = 0x200;
        smp
    }

    fn cycles_of(program: &[u8]) -> u64 {
        let mut smp = with_program(program);
        smp.step();
        smp.cycles()
    }

    #[test]
    fn test_reset_state() {
        let smp = Smp::new();
        assert_eq!(smp.regs.pc, 0xFFC0);
        assert_eq!(smp.regs.sp, 0xEF);
        assert_eq!(smp.regs.psw, Psw::Z);
        assert!(smp.status.iplrom_enable);
        assert_eq!(smp.status.test_register(), 0x0A);
    }

    #[test]
    fn test_instruction_cycle_counts() {
        assert_eq!(cycles_of(&[0x00]), 2); // NOP
        assert_eq!(cycles_of(&[0x3F, 0x00, 0x03]), 8); // CALL
        assert_eq!(cycles_of(&[0xE8, 0x12]), 2); // MOV A,#
        assert_eq!(cycles_of(&[0xC5, 0x00, 0x03]), 5); // MOV !a,A
        assert_eq!(cycles_of(&[0xCF]), 9); // MUL
        assert_eq!(cycles_of(&[0x9E]), 12); // DIV
        assert_eq!(cycles_of(&[0x2D]), 4); // PUSH A
        assert_eq!(cycles_of(&[0xBA, 0x10]), 5); // MOVW YA,dp
        assert_eq!(cycles_of(&[0x5A, 0x10]), 4); // CMPW YA,dp
    }

    #[test]
    fn test_branch_cycles() {
        // BEQ with Z set after reset
        assert_eq!(cycles_of(&[0xF0, 0x02]), 4);
        assert_eq!(cycles_of(&[0xD0, 0x02]), 2);
        let mut smp = with_program(&[0x2F, 0xFE]);
        smp.step();
        assert_eq!(smp.regs.pc, 0x200);
    }

    #[test]
    fn test_adc_sets_overflow_and_half_carry() {
        // MOV A,#$78 ; CLRC ; ADC A,#$08
        let mut smp = with_program(&[0xE8, 0x78, 0x60, 0x88, 0x08]);
        for _ in 0..3 {
            smp.step();
        }
        assert_eq!(smp.regs.a, 0x80);
        assert!(smp.regs.psw.contains(Psw::V | Psw::H | Psw::N));
        assert!(!smp.regs.psw.contains(Psw::C));
    }

    #[test]
    fn test_sbc_borrows() {
        // MOV A,#$10 ; SETC ; SBC A,#$20
        let mut smp = with_program(&[0xE8, 0x10, 0x80, 0xA8, 0x20]);
        for _ in 0..3 {
            smp.step();
        }
        assert_eq!(smp.regs.a, 0xF0);
        assert!(!smp.regs.psw.contains(Psw::C));
        assert!(smp.regs.psw.contains(Psw::N));
    }

    #[test]
    fn test_mul_and_div() {
        // MOV A,#$20 ; MOV Y,#$10 ; MUL YA
        let mut smp = with_program(&[0xE8, 0x20, 0x8D, 0x10, 0xCF]);
        for _ in 0..3 {
            smp.step();
        }
        assert_eq!(smp.regs.ya(), 0x0200);

        // YA = $0203 / X = $10
        let mut smp = with_program(&[0x9E]);
        smp.regs.set_ya(0x0203);
        smp.regs.x = 0x10;
        smp.step();
        assert_eq!(smp.regs.a, 0x20);
        assert_eq!(smp.regs.y, 0x03);
        assert!(!smp.regs.psw.contains(Psw::V));
    }

    #[test]
    fn test_div_overflow() {
        let mut smp = with_program(&[0x9E]);
        smp.regs.set_ya(0xFFFF);
        smp.regs.x = 0x01;
        smp.step();
        assert!(smp.regs.psw.contains(Psw::V));
        // 255 - (65535 - 512) / 255 and 1 + (65535 - 512) % 255
        assert_eq!(smp.regs.a, 0x01);
        assert_eq!(smp.regs.y, 0xFE);
    }

    #[test]
    fn test_daa_adjusts_bcd() {
        // MOV A,#$19 ; CLRC ; ADC A,#$28 ; DAA
        let mut smp = with_program(&[0xE8, 0x19, 0x60, 0x88, 0x28, 0xDF]);
        for _ in 0..4 {
            smp.step();
        }
        assert_eq!(smp.regs.a, 0x47);
    }

    #[test]
    fn test_tcall_uses_vector_table() {
        let mut smp = with_program(&[0x11]);
        // TCALL 1 reads $FFDC
        smp.ram[0xFFDC] = 0x34;
        smp.ram[0xFFDD] = 0x12;
        smp.step();
        assert_eq!(smp.regs.pc, 0x1234);
        assert_eq!(smp.regs.sp, 0xED);
        assert_eq!(smp.ram[0x1EF], 0x02);
        assert_eq!(smp.ram[0x1EE], 0x01);
    }

    #[test]
    fn test_call_and_ret_round_trip() {
        let mut smp = with_program(&[0x3F, 0x00, 0x03]);
        smp.ram[0x300] = 0x6F;
        smp.step();
        assert_eq!(smp.regs.pc, 0x300);
        smp.step();
        assert_eq!(smp.regs.pc, 0x203);
        assert_eq!(smp.regs.sp, 0xEF);
    }

    #[test]
    fn test_dsp_register_access_through_f2_f3() {
        // MOV $F2,#$0C ; MOV $F3,#$7F ; MOV A,$F3
        let mut smp = with_program(&[0x8F, 0x0C, 0xF2, 0x8F, 0x7F, 0xF3, 0xE4, 0xF3]);
        for _ in 0..3 {
            smp.step();
        }
        assert_eq!(smp.dsp.read(reg::MVOLL as u8), 0x7F);
        assert_eq!(smp.regs.a, 0x7F);
    }

    #[test]
    fn test_dsp_writes_above_7f_are_ignored() {
        let mut smp = with_program(&[0x8F, 0x8C, 0xF2, 0x8F, 0x55, 0xF3]);
        smp.step();
        smp.step();
        assert_eq!(smp.dsp.read(reg::MVOLL as u8), 0);
    }

    #[test]
    fn test_ipl_rom_overlays_ram() {
        let mut smp = Smp::new();
        smp.ram[0xFFC0] = 0x11;
        assert_eq!(smp.bus_read(0xFFC0), IPL_ROM[0]);
        smp.bus_write(0xF1, 0x00);
        assert_eq!(smp.bus_read(0xFFC0), 0x11);
        // writes land in RAM below the ROM
        smp.bus_write(0xF1, 0x80);
        smp.bus_write(0xFFC1, 0x22);
        assert_eq!(smp.ram[0xFFC1], 0x22);
        assert_eq!(smp.bus_read(0xFFC1), IPL_ROM[1]);
    }

    #[test]
    fn test_test_register_ignored_with_p_set() {
        let mut smp = Smp::new();
        smp.regs.psw.insert(Psw::P);
        smp.bus_write(0xF0, 0x04);
        assert!(!smp.status.ram_disable);
        smp.regs.psw.remove(Psw::P);
        smp.bus_write(0xF0, 0x04);
        assert!(smp.status.ram_disable);
        assert_eq!(smp.bus_read(0x1234), 0x5A);
    }

    #[test]
    fn test_timer_counts_through_io() {
        let mut smp = Smp::new();
        smp.bus_write(0xFA, 2);
        smp.bus_write(0xF1, 0x01);
        // 256 cycles of 8 kHz timer: 2 falling edges, one count
        for _ in 0..256 {
            smp.io();
        }
        assert_eq!(smp.bus_read(0xFD), 1);
        assert_eq!(smp.bus_read(0xFD), 0);
    }

    #[test]
    fn test_port_log_consumed_then_loops() {
        let mut smp = Smp::new();
        smp.set_port_log(&[1, 2, 3], 1);
        let reads: Vec<u8> = (0..6).map(|_| smp.bus_read(0xF4)).collect();
        assert_eq!(reads, [1, 2, 3, 2, 3, 2]);
        assert_eq!(smp.port_log_remaining(), &[3]);
        assert_eq!(smp.port_log_state(), (vec![3, 2], 0));
    }

    #[test]
    fn test_port_log_state_before_loop_point() {
        let mut smp = Smp::new();
        smp.set_port_log(&[1, 2, 3, 4], 3);
        smp.bus_read(0xF4);
        assert_eq!(smp.port_log_state(), (vec![2, 3, 4], 2));
    }

    #[test]
    fn test_port_log_without_loop_falls_back_to_ports() {
        let mut smp = Smp::new();
        smp.set_port_log(&[9], 1);
        assert_eq!(smp.bus_read(0xF5), 9);
        assert_eq!(smp.bus_read(0xF5), 9);
        assert_eq!(smp.bus_read(0xF6), 0);
    }

    #[test]
    fn test_f1_clears_ports() {
        let mut smp = Smp::new();
        smp.set_ports([1, 2, 3, 4]);
        smp.bus_write(0xF1, 0x10);
        assert_eq!(smp.ports(), [0, 0, 3, 4]);
        smp.bus_write(0xF1, 0x20);
        assert_eq!(smp.ports(), [0; 4]);
    }

    #[test]
    fn test_render_produces_one_sample_per_32_cycles() {
        let mut smp = with_program(&[0x2F, 0xFE]);
        let mut out = [0i16; 64];
        smp.render(&mut out);
        let cycles = smp.cycles();
        assert!((32 * 31..=32 * 33).contains(&cycles), "{cycles}");
    }

    #[test]
    fn test_tempo_speeds_up_cpu() {
        let mut smp = with_program(&[0x2F, 0xFE]);
        smp.set_tempo(2.0);
        let mut out = [0i16; 64];
        smp.render(&mut out);
        assert!(smp.cycles() >= 2 * 31 * 32);
    }

    #[test]
    fn test_sleep_halts() {
        let mut smp = with_program(&[0xEF, 0xE8, 0x01]);
        smp.step();
        assert!(smp.is_halted());
        let pc = smp.regs.pc;
        smp.step();
        assert_eq!(smp.regs.pc, pc);
        assert_eq!(smp.regs.a, 0);
    }
}
