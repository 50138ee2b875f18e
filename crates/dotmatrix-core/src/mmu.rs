use crate::{
    apu::Apu,
    cartridge::Cartridge,
    error::{CoreError, Result},
    input::{Button, Joypad},
    ppu::Ppu,
    serial::Serial,
    snapshot::MmuState,
    timer::Timer,
};

const WRAM_SIZE: usize = 0x2000;
const HRAM_SIZE: usize = 0x7F;
const OAM_SIZE: u16 = 0xA0;

/// Interrupt bits in IF / IE.
pub const INT_VBLANK: u8 = 0x01;
pub const INT_STAT: u8 = 0x02;
pub const INT_TIMER: u8 = 0x04;
pub const INT_SERIAL: u8 = 0x08;
pub const INT_JOYPAD: u8 = 0x10;

/// The DMG address space. Every CPU access goes through `read_byte` /
/// `write_byte`, which dispatch to the component owning the address.
pub struct Mmu {
    pub wram: [u8; WRAM_SIZE],
    pub hram: [u8; HRAM_SIZE],
    pub cart: Option<Cartridge>,
    /// Low five bits of IF. Reads set bits 5-7.
    pub if_reg: u8,
    pub ie_reg: u8,
    pub serial: Serial,
    pub ppu: Ppu,
    pub apu: Apu,
    pub timer: Timer,
    pub input: Joypad,
}

impl Mmu {
    /// Fresh bus with DMG post-boot register values and no cartridge.
    pub fn new() -> Self {
        Self {
            wram: [0; WRAM_SIZE],
            hram: [0; HRAM_SIZE],
            cart: None,
            if_reg: INT_VBLANK,
            ie_reg: 0,
            serial: Serial::new(),
            ppu: Ppu::new(),
            apu: Apu::new(),
            timer: Timer::new(),
            input: Joypad::new(),
        }
    }

    pub fn load_cart(&mut self, cart: Cartridge) {
        self.cart = Some(cart);
    }

    pub fn take_cart(&mut self) -> Option<Cartridge> {
        self.cart.take()
    }

    pub fn read_byte(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x7FFF | 0xA000..=0xBFFF => match &self.cart {
                Some(cart) => cart.read(addr),
                None => 0xFF,
            },
            0x8000..=0x9FFF => self.ppu.vram[(addr - 0x8000) as usize],
            0xC000..=0xDFFF => self.wram[(addr - 0xC000) as usize],
            0xE000..=0xFDFF => self.wram[(addr - 0xE000) as usize],
            0xFE00..=0xFE9F => self.ppu.oam[(addr - 0xFE00) as usize],
            0xFEA0..=0xFEFF => 0xFF,
            0xFF00 => self.input.read(),
            0xFF01 | 0xFF02 => self.serial.read(addr),
            0xFF04..=0xFF07 => self.timer.read(addr),
            0xFF0F => self.if_reg | 0xE0,
            0xFF10..=0xFF3F => self.apu.read_reg(addr),
            0xFF40..=0xFF4B => self.ppu.read_reg(addr),
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize],
            0xFFFF => self.ie_reg,
            _ => 0xFF,
        }
    }

    pub fn write_byte(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x7FFF | 0xA000..=0xBFFF => {
                if let Some(cart) = self.cart.as_mut() {
                    cart.write(addr, val);
                }
            }
            0x8000..=0x9FFF => self.ppu.vram[(addr - 0x8000) as usize] = val,
            0xC000..=0xDFFF => self.wram[(addr - 0xC000) as usize] = val,
            0xE000..=0xFDFF => self.wram[(addr - 0xE000) as usize] = val,
            0xFE00..=0xFE9F => self.ppu.oam[(addr - 0xFE00) as usize] = val,
            0xFEA0..=0xFEFF => {}
            0xFF00 => self.input.write(val),
            0xFF01 | 0xFF02 => self.serial.write(addr, val),
            0xFF04..=0xFF07 => self.timer.write(addr, val),
            0xFF0F => self.if_reg = val & 0x1F,
            0xFF10..=0xFF3F => self.apu.write_reg(addr, val),
            0xFF46 => {
                self.ppu.write_reg(addr, val);
                self.oam_dma(val);
            }
            0xFF40..=0xFF4B => self.ppu.write_reg(addr, val),
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize] = val,
            0xFFFF => self.ie_reg = val,
            _ => {}
        }
    }

    pub fn read_word(&self, addr: u16) -> u16 {
        let lo = self.read_byte(addr) as u16;
        let hi = self.read_byte(addr.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }

    pub fn write_word(&mut self, addr: u16, val: u16) {
        self.write_byte(addr, val as u8);
        self.write_byte(addr.wrapping_add(1), (val >> 8) as u8);
    }

    /// Instantaneous OAM DMA: 160 bytes from `page << 8` through the normal
    /// read path.
    fn oam_dma(&mut self, page: u8) {
        let src = (page as u16) << 8;
        for i in 0..OAM_SIZE {
            let byte = self.read_byte(src.wrapping_add(i));
            self.ppu.oam[i as usize] = byte;
        }
    }

    pub fn request_interrupt(&mut self, bits: u8) {
        self.if_reg |= bits & 0x1F;
    }

    /// Interrupts both requested and enabled.
    pub fn pending_interrupts(&self) -> u8 {
        self.if_reg & self.ie_reg & 0x1F
    }

    /// DIV/TIMA and the serial shift clock.
    pub fn advance_timers(&mut self, cycles: u32) {
        self.timer.step(cycles, &mut self.if_reg);
        self.serial.step(cycles, &mut self.if_reg);
    }

    /// Feed `cycles` CPU cycles to every clocked component. Returns true when
    /// the PPU finished a frame.
    pub fn advance(&mut self, cycles: u32) -> bool {
        self.advance_timers(cycles);
        let frame = self.ppu.step(cycles, &mut self.if_reg);
        self.apu.step(cycles);
        frame
    }

    pub fn set_button(&mut self, button: Button, pressed: bool) {
        self.input.set_button(button, pressed, &mut self.if_reg);
    }

    pub fn snapshot(&self) -> MmuState {
        MmuState {
            wram: self.wram.to_vec(),
            hram: self.hram.to_vec(),
            if_reg: self.if_reg,
            ie_reg: self.ie_reg,
            timer: self.timer.snapshot(),
            joypad: self.input.snapshot(),
            serial: self.serial.snapshot(),
            ppu: self.ppu.snapshot(),
            apu: self.apu.snapshot(),
            cart: self.cart.as_ref().map(Cartridge::snapshot),
        }
    }

    /// Every check runs before any component is written, so a rejected
    /// state leaves the machine as it was.
    pub fn restore(&mut self, state: &MmuState) -> Result<()> {
        if state.wram.len() != WRAM_SIZE {
            return Err(CoreError::SnapshotMismatch("work RAM size"));
        }
        if state.hram.len() != HRAM_SIZE {
            return Err(CoreError::SnapshotMismatch("high RAM size"));
        }
        match (self.cart.as_ref(), state.cart.as_ref()) {
            (Some(cart), Some(cs)) => cart.validate(cs)?,
            (None, None) => {}
            _ => return Err(CoreError::SnapshotMismatch("cartridge presence")),
        }
        self.ppu.validate(&state.ppu)?;
        self.apu.validate(&state.apu)?;

        if let (Some(cart), Some(cs)) = (self.cart.as_mut(), state.cart.as_ref()) {
            cart.restore(cs)?;
        }
        self.ppu.restore(&state.ppu)?;
        self.apu.restore(&state.apu)?;
        self.wram.copy_from_slice(&state.wram);
        self.hram.copy_from_slice(&state.hram);
        self.if_reg = state.if_reg & 0x1F;
        self.ie_reg = state.ie_reg;
        self.timer.restore(&state.timer);
        self.input.restore(&state.joypad);
        self.serial.restore(&state.serial);
        Ok(())
    }
}

impl Default for Mmu {
    fn default() -> Self {
        Self::new()
    }
}
