//! The three SMP timers.
//!
//! Each timer divides the SMP clock down in three stages: a prescaler
//! (`stage0`), a toggle whose falling edge clocks the divider (`stage1`), an
//! 8-bit up-counter compared against the target (`stage2`) and the 4-bit
//! output counter read through $FD-$FF (`stage3`).

/// Prescaler period of timers 0 and 1 (8 kHz).
pub const SLOW_FREQUENCY: u32 = 192;
/// Prescaler period of timer 2 (64 kHz).
pub const FAST_FREQUENCY: u32 = 24;

/// Stage state of one timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timer {
    pub(crate) frequency: u32,
    pub(crate) stage0: u32,
    pub(crate) stage1: bool,
    pub(crate) stage2: u8,
    pub(crate) stage3: u8,
    pub(crate) line: bool,
    pub(crate) enable: bool,
    /// Divider target; zero counts 256.
    pub(crate) target: u8,
}

impl Timer {
    /// A stopped timer with the given prescaler period.
    pub fn new(frequency: u32) -> Self {
        Self {
            frequency,
            stage0: 0,
            stage1: false,
            stage2: 0,
            stage3: 0,
            line: false,
            enable: false,
            target: 0,
        }
    }

    /// Clear every stage, keeping the period.
    pub fn reset(&mut self) {
        *self = Self::new(self.frequency);
    }

    /// Advance the prescaler by `step`. `gate` is high when timers are
    /// globally enabled.
    pub(crate) fn tick(&mut self, step: u32, gate: bool) {
        self.stage0 += step;
        if self.stage0 < self.frequency {
            return;
        }
        self.stage0 -= self.frequency;
        self.stage1 = !self.stage1;
        self.sync_stage1(gate);
    }

    /// Recompute the stage1 line; a falling edge clocks the divider.
    pub(crate) fn sync_stage1(&mut self, gate: bool) {
        let new_line = self.stage1 && gate;
        let old_line = self.line;
        self.line = new_line;
        if !old_line || new_line || !self.enable {
            return;
        }

        self.stage2 = self.stage2.wrapping_add(1);
        if self.stage2 == self.target {
            self.stage2 = 0;
            self.stage3 = (self.stage3 + 1) & 0x0F;
        }
    }

    /// Output counter, cleared by reading.
    pub(crate) fn read_counter(&mut self) -> u8 {
        let value = self.stage3;
        self.stage3 = 0;
        value
    }

    /// Restart the divider and output counter, as when enabled.
    pub(crate) fn restart(&mut self) {
        self.stage2 = 0;
        self.stage3 = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(timer: &mut Timer, ticks: u32) {
        for _ in 0..ticks {
            timer.tick(3, true);
        }
    }

    #[test]
    fn test_slow_timer_divides_by_128_cycles() {
        let mut timer = Timer::new(SLOW_FREQUENCY);
        timer.enable = true;
        timer.target = 1;
        // one output count per two stage1 toggles of 64 cycles
        run(&mut timer, 128 * 4);
        assert_eq!(timer.stage3, 4);
    }

    #[test]
    fn test_target_zero_counts_256() {
        let mut timer = Timer::new(FAST_FREQUENCY);
        timer.enable = true;
        timer.target = 0;
        run(&mut timer, 16 * 255);
        assert_eq!(timer.stage3, 0);
        run(&mut timer, 16);
        assert_eq!(timer.stage3, 1);
    }

    #[test]
    fn test_output_counter_wraps_and_clears_on_read() {
        let mut timer = Timer::new(FAST_FREQUENCY);
        timer.enable = true;
        timer.target = 1;
        run(&mut timer, 16 * 17);
        assert_eq!(timer.read_counter(), 1);
        assert_eq!(timer.read_counter(), 0);
    }

    #[test]
    fn test_disabled_timer_holds_counters() {
        let mut timer = Timer::new(FAST_FREQUENCY);
        timer.target = 1;
        run(&mut timer, 1_000);
        assert_eq!(timer.stage2, 0);
        assert_eq!(timer.stage3, 0);
    }

    #[test]
    fn test_closed_gate_blocks_edges() {
        let mut timer = Timer::new(FAST_FREQUENCY);
        timer.enable = true;
        timer.target = 1;
        for _ in 0..1_000 {
            timer.tick(3, false);
        }
        assert_eq!(timer.stage3, 0);
    }
}
