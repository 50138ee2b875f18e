use crate::snapshot::TimerState;

/// TIMA input clock periods in CPU cycles, indexed by TAC bits 0-1.
const TIMA_PERIODS: [u16; 4] = [1024, 16, 64, 256];

pub struct Timer {
    /// 16-bit internal divider counter. DIV register is the upper 8 bits.
    pub div: u16,
    /// Timer counter
    pub tima: u8,
    /// Timer modulo
    pub tma: u8,
    /// Timer control
    pub tac: u8,
    /// Cycles accumulated toward the next TIMA increment.
    counter: u16,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            div: 0,
            tima: 0,
            tma: 0,
            tac: 0,
            counter: 0,
        }
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0xFF04 => (self.div >> 8) as u8,
            0xFF05 => self.tima,
            0xFF06 => self.tma,
            0xFF07 => self.tac | 0xF8,
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF04 => self.reset_div(),
            0xFF05 => self.tima = val,
            0xFF06 => self.tma = val,
            0xFF07 => {
                let old = self.tac;
                self.tac = val & 0x07;
                if old & 0x03 != self.tac & 0x03 || self.tac & 0x04 == 0 {
                    self.counter = 0;
                }
            }
            _ => {}
        }
    }

    pub fn reset_div(&mut self) {
        self.div = 0;
    }

    fn enabled(&self) -> bool {
        self.tac & 0x04 != 0
    }

    fn period(&self) -> u16 {
        TIMA_PERIODS[(self.tac & 0x03) as usize]
    }

    /// Advance the timer by `cycles` CPU cycles and update IF when TIMA
    /// overflows.
    pub fn step(&mut self, cycles: u32, if_reg: &mut u8) {
        self.div = self.div.wrapping_add(cycles as u16);
        if !self.enabled() {
            return;
        }

        let period = self.period() as u32;
        let mut pending = self.counter as u32 + cycles;
        while pending >= period {
            pending -= period;
            self.increment(if_reg);
        }
        self.counter = pending as u16;
    }

    fn increment(&mut self, if_reg: &mut u8) {
        let (next, overflow) = self.tima.overflowing_add(1);
        if overflow {
            self.tima = self.tma;
            *if_reg |= 0x04;
        } else {
            self.tima = next;
        }
    }

    pub fn snapshot(&self) -> TimerState {
        TimerState {
            div: self.div,
            tima: self.tima,
            tma: self.tma,
            tac: self.tac,
            counter: self.counter,
        }
    }

    pub fn restore(&mut self, state: &TimerState) {
        self.div = state.div;
        self.tima = state.tima;
        self.tma = state.tma;
        self.tac = state.tac & 0x07;
        self.counter = state.counter;
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
