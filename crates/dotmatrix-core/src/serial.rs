use crate::snapshot::SerialState;

/// Serial interrupt request bit in IF.
const SERIAL_IRQ: u8 = 0x08;
/// Eight bits shifted at 8192 Hz on the internal clock.
const TRANSFER_CYCLES: u32 = 4096;

pub trait LinkPort: Send {
    /// Exchange one byte with the partner and return what it sent back.
    fn transfer(&mut self, byte: u8) -> u8;
}

/// Link port with no cable attached. Incoming bits float high so every
/// transfer receives 0xFF, unless `loopback` echoes the outgoing byte.
#[derive(Default)]
pub struct NullLinkPort {
    loopback: bool,
}

impl NullLinkPort {
    pub fn new(loopback: bool) -> Self {
        Self { loopback }
    }
}

impl LinkPort for NullLinkPort {
    fn transfer(&mut self, byte: u8) -> u8 {
        if self.loopback { byte } else { 0xFF }
    }
}

/// SB/SC registers. Bytes sent with the internal clock are also captured in
/// an output buffer, which test ROMs use as a console.
pub struct Serial {
    sb: u8,
    sc: u8,
    out_buf: Vec<u8>,
    port: Box<dyn LinkPort>,
    /// Cycles left in the active transfer, 0 when idle.
    remaining: u32,
}

impl Serial {
    pub fn new() -> Self {
        Self {
            sb: 0,
            sc: 0,
            out_buf: Vec::new(),
            port: Box::new(NullLinkPort::default()),
            remaining: 0,
        }
    }

    pub fn connect(&mut self, port: Box<dyn LinkPort>) {
        self.port = port;
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0xFF01 => self.sb,
            0xFF02 => self.sc | 0x7E,
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF01 => self.sb = val,
            0xFF02 => {
                self.sc = val & 0x81;
                // Only the internal clock drives a transfer; an external
                // clock never ticks without a partner.
                self.remaining = if val & 0x81 == 0x81 {
                    TRANSFER_CYCLES
                } else {
                    0
                };
            }
            _ => {}
        }
    }

    pub fn step(&mut self, cycles: u32, if_reg: &mut u8) {
        if self.remaining == 0 {
            return;
        }
        if cycles < self.remaining {
            self.remaining -= cycles;
            return;
        }
        self.remaining = 0;
        let outgoing = self.sb;
        self.out_buf.push(outgoing);
        self.sb = self.port.transfer(outgoing);
        self.sc &= 0x7F;
        *if_reg |= SERIAL_IRQ;
    }

    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.out_buf)
    }

    pub fn peek_output(&self) -> &[u8] {
        &self.out_buf
    }

    pub fn snapshot(&self) -> SerialState {
        SerialState {
            sb: self.sb,
            sc: self.sc,
            remaining: self.remaining,
        }
    }

    pub fn restore(&mut self, state: &SerialState) {
        self.sb = state.sb;
        self.sc = state.sc & 0x81;
        self.remaining = state.remaining;
    }
}

impl Default for Serial {
    fn default() -> Self {
        Self::new()
    }
}
