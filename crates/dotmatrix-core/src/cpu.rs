use crate::error::{CoreError, Result};
use crate::mmu::Mmu;
use crate::snapshot::CpuState;

#[cfg(feature = "cpu-trace")]
macro_rules! cpu_trace {
    ($($arg:tt)*) => {
        log::trace!($($arg)*);
    };
}
#[cfg(not(feature = "cpu-trace"))]
macro_rules! cpu_trace {
    ($($arg:tt)*) => {};
}

// Flag bit masks
const FLAG_Z: u8 = 0x80; // Zero
const FLAG_N: u8 = 0x40; // Subtract
const FLAG_H: u8 = 0x20; // Half Carry
const FLAG_C: u8 = 0x10; // Carry

// Interrupt vector addresses, in priority order
const INTERRUPT_VECTORS: [(u8, u16); 5] = [
    (0x01, 0x40), // VBlank
    (0x02, 0x48), // STAT
    (0x04, 0x50), // Timer
    (0x08, 0x58), // Serial
    (0x10, 0x60), // Joypad
];

// Register values left behind by the DMG boot ROM
const BOOT_PC: u16 = 0x0100;
const BOOT_SP: u16 = 0xFFFE;
const BOOT_A: u8 = 0x01;
const BOOT_F: u8 = 0xB0;
const BOOT_B: u8 = 0x00;
const BOOT_C: u8 = 0x13;
const BOOT_D: u8 = 0x00;
const BOOT_E: u8 = 0xD8;
const BOOT_H: u8 = 0x01;
const BOOT_L: u8 = 0x4D;

const CYCLES_PER_M_CYCLE: u32 = 4;

/// Eight-bit ALU operations selected by bits 3-5 of the 0x80-0xBF block and
/// the immediate-operand column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AluOp {
    Add,
    Adc,
    Sub,
    Sbc,
    And,
    Xor,
    Or,
    Cp,
}

impl AluOp {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => AluOp::Add,
            1 => AluOp::Adc,
            2 => AluOp::Sub,
            3 => AluOp::Sbc,
            4 => AluOp::And,
            5 => AluOp::Xor,
            6 => AluOp::Or,
            _ => AluOp::Cp,
        }
    }
}

pub struct Cpu {
    pub a: u8,
    pub f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub pc: u16,
    pub sp: u16,
    /// Total CPU cycles executed since reset.
    pub cycles: u64,
    pub ime: bool,
    pub halted: bool,
    /// Counts down to IME=1 after EI; 0 when nothing is scheduled.
    ime_enable_delay: u8,
    /// Cycles accumulated by the instruction currently executing.
    step_cycles: u32,
}

impl Cpu {
    /// CPU in the state the boot ROM hands over to the cartridge.
    pub fn new() -> Self {
        Self {
            a: BOOT_A,
            f: BOOT_F,
            b: BOOT_B,
            c: BOOT_C,
            d: BOOT_D,
            e: BOOT_E,
            h: BOOT_H,
            l: BOOT_L,
            pc: BOOT_PC,
            sp: BOOT_SP,
            cycles: 0,
            ime: false,
            halted: false,
            ime_enable_delay: 0,
            step_cycles: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn get_af(&self) -> u16 {
        ((self.a as u16) << 8) | self.f as u16
    }

    fn set_af(&mut self, val: u16) {
        self.a = (val >> 8) as u8;
        // Low nibble of F is hard-wired to zero.
        self.f = val as u8 & 0xF0;
    }

    pub fn get_bc(&self) -> u16 {
        ((self.b as u16) << 8) | self.c as u16
    }

    fn set_bc(&mut self, val: u16) {
        self.b = (val >> 8) as u8;
        self.c = val as u8;
    }

    pub fn get_de(&self) -> u16 {
        ((self.d as u16) << 8) | self.e as u16
    }

    fn set_de(&mut self, val: u16) {
        self.d = (val >> 8) as u8;
        self.e = val as u8;
    }

    pub fn get_hl(&self) -> u16 {
        ((self.h as u16) << 8) | self.l as u16
    }

    fn set_hl(&mut self, val: u16) {
        self.h = (val >> 8) as u8;
        self.l = val as u8;
    }

    #[inline]
    fn tick(&mut self, m_cycles: u32) {
        self.step_cycles += CYCLES_PER_M_CYCLE * m_cycles;
    }

    #[inline(always)]
    fn fetch8(&mut self, mmu: &Mmu) -> u8 {
        let val = mmu.read_byte(self.pc);
        self.pc = self.pc.wrapping_add(1);
        self.tick(1);
        val
    }

    #[inline(always)]
    fn fetch16(&mut self, mmu: &Mmu) -> u16 {
        let lo = self.fetch8(mmu) as u16;
        let hi = self.fetch8(mmu) as u16;
        (hi << 8) | lo
    }

    #[inline(always)]
    fn read8(&mut self, mmu: &Mmu, addr: u16) -> u8 {
        let val = mmu.read_byte(addr);
        self.tick(1);
        val
    }

    #[inline(always)]
    fn write8(&mut self, mmu: &mut Mmu, addr: u16, val: u8) {
        mmu.write_byte(addr, val);
        self.tick(1);
    }

    /// Formatted CPU state string for debugging.
    pub fn debug_state(&self) -> String {
        format!(
            "AF:{:04X} BC:{:04X} DE:{:04X} HL:{:04X} PC:{:04X} SP:{:04X} IME:{} CY:{}",
            self.get_af(),
            self.get_bc(),
            self.get_de(),
            self.get_hl(),
            self.pc,
            self.sp,
            self.ime as u8,
            self.cycles
        )
    }

    fn push_stack(&mut self, mmu: &mut Mmu, val: u16) {
        self.sp = self.sp.wrapping_sub(1);
        self.write8(mmu, self.sp, (val >> 8) as u8);
        self.sp = self.sp.wrapping_sub(1);
        self.write8(mmu, self.sp, val as u8);
    }

    fn pop_stack(&mut self, mmu: &Mmu) -> u16 {
        let lo = self.read8(mmu, self.sp) as u16;
        self.sp = self.sp.wrapping_add(1);
        let hi = self.read8(mmu, self.sp) as u16;
        self.sp = self.sp.wrapping_add(1);
        (hi << 8) | lo
    }

    /// Operand index order used by every register-encoded opcode:
    /// B C D E H L (HL) A.
    fn read_reg(&mut self, mmu: &Mmu, index: u8) -> u8 {
        match index & 0x07 {
            0 => self.b,
            1 => self.c,
            2 => self.d,
            3 => self.e,
            4 => self.h,
            5 => self.l,
            6 => self.read8(mmu, self.get_hl()),
            _ => self.a,
        }
    }

    fn write_reg(&mut self, mmu: &mut Mmu, index: u8, val: u8) {
        match index & 0x07 {
            0 => self.b = val,
            1 => self.c = val,
            2 => self.d = val,
            3 => self.e = val,
            4 => self.h = val,
            5 => self.l = val,
            6 => {
                let addr = self.get_hl();
                self.write8(mmu, addr, val);
            }
            _ => self.a = val,
        }
    }

    /// BC DE HL SP, as encoded in bits 4-5.
    fn read_pair(&self, index: u8) -> u16 {
        match index & 0x03 {
            0 => self.get_bc(),
            1 => self.get_de(),
            2 => self.get_hl(),
            _ => self.sp,
        }
    }

    fn write_pair(&mut self, index: u8, val: u16) {
        match index & 0x03 {
            0 => self.set_bc(val),
            1 => self.set_de(val),
            2 => self.set_hl(val),
            _ => self.sp = val,
        }
    }

    /// NZ Z NC C, as encoded in bits 3-4.
    fn condition(&self, index: u8) -> bool {
        match index & 0x03 {
            0 => self.f & FLAG_Z == 0,
            1 => self.f & FLAG_Z != 0,
            2 => self.f & FLAG_C == 0,
            _ => self.f & FLAG_C != 0,
        }
    }

    fn alu(&mut self, op: AluOp, val: u8) {
        let a = self.a;
        let carry_in = u8::from(self.f & FLAG_C != 0);
        match op {
            AluOp::Add | AluOp::Adc => {
                let c = if op == AluOp::Adc { carry_in } else { 0 };
                let sum = a as u16 + val as u16 + c as u16;
                let res = sum as u8;
                self.f = if res == 0 { FLAG_Z } else { 0 }
                    | if (a & 0x0F) + (val & 0x0F) + c > 0x0F {
                        FLAG_H
                    } else {
                        0
                    }
                    | if sum > 0xFF { FLAG_C } else { 0 };
                self.a = res;
            }
            AluOp::Sub | AluOp::Sbc | AluOp::Cp => {
                let c = if op == AluOp::Sbc { carry_in } else { 0 };
                let res = a.wrapping_sub(val).wrapping_sub(c);
                self.f = FLAG_N
                    | if res == 0 { FLAG_Z } else { 0 }
                    | if (a & 0x0F) < (val & 0x0F) + c {
                        FLAG_H
                    } else {
                        0
                    }
                    | if (a as u16) < val as u16 + c as u16 {
                        FLAG_C
                    } else {
                        0
                    };
                if op != AluOp::Cp {
                    self.a = res;
                }
            }
            AluOp::And => {
                self.a = a & val;
                self.f = FLAG_H | if self.a == 0 { FLAG_Z } else { 0 };
            }
            AluOp::Xor => {
                self.a = a ^ val;
                self.f = if self.a == 0 { FLAG_Z } else { 0 };
            }
            AluOp::Or => {
                self.a = a | val;
                self.f = if self.a == 0 { FLAG_Z } else { 0 };
            }
        }
    }

    fn inc8(&mut self, val: u8) -> u8 {
        let res = val.wrapping_add(1);
        self.f = (self.f & FLAG_C)
            | if res == 0 { FLAG_Z } else { 0 }
            | if val & 0x0F == 0x0F { FLAG_H } else { 0 };
        res
    }

    fn dec8(&mut self, val: u8) -> u8 {
        let res = val.wrapping_sub(1);
        self.f = (self.f & FLAG_C)
            | FLAG_N
            | if res == 0 { FLAG_Z } else { 0 }
            | if val & 0x0F == 0 { FLAG_H } else { 0 };
        res
    }

    fn add_hl(&mut self, val: u16) {
        let hl = self.get_hl();
        let res = hl.wrapping_add(val);
        self.f = (self.f & FLAG_Z)
            | if (hl & 0x0FFF) + (val & 0x0FFF) > 0x0FFF {
                FLAG_H
            } else {
                0
            }
            | if hl as u32 + val as u32 > 0xFFFF {
                FLAG_C
            } else {
                0
            };
        self.set_hl(res);
    }

    /// SP plus a signed immediate. Flags come from the unsigned low-byte add.
    fn sp_offset(&mut self, offset: u8) -> u16 {
        let val = offset as i8 as i16 as u16;
        let sp = self.sp;
        self.f = if (sp & 0x0F) + (val & 0x0F) > 0x0F {
            FLAG_H
        } else {
            0
        } | if (sp & 0xFF) + (val & 0xFF) > 0xFF {
            FLAG_C
        } else {
            0
        };
        sp.wrapping_add(val)
    }

    fn daa(&mut self) {
        let mut a = self.a;
        let mut carry = self.f & FLAG_C != 0;
        if self.f & FLAG_N == 0 {
            if carry || a > 0x99 {
                a = a.wrapping_add(0x60);
                carry = true;
            }
            if self.f & FLAG_H != 0 || (a & 0x0F) > 0x09 {
                a = a.wrapping_add(0x06);
            }
        } else {
            if carry {
                a = a.wrapping_sub(0x60);
            }
            if self.f & FLAG_H != 0 {
                a = a.wrapping_sub(0x06);
            }
        }
        self.a = a;
        self.f = (self.f & FLAG_N) | if a == 0 { FLAG_Z } else { 0 } | if carry { FLAG_C } else { 0 };
    }

    /// Shared body of the CB-prefixed rotate/shift/swap group (0x00-0x3F).
    fn shift_op(&mut self, kind: u8, val: u8) -> u8 {
        let carry_in = u8::from(self.f & FLAG_C != 0);
        let (res, carry_out) = match kind & 0x07 {
            0 => (val.rotate_left(1), val & 0x80 != 0),
            1 => (val.rotate_right(1), val & 0x01 != 0),
            2 => ((val << 1) | carry_in, val & 0x80 != 0),
            3 => ((val >> 1) | (carry_in << 7), val & 0x01 != 0),
            4 => (val << 1, val & 0x80 != 0),
            5 => ((val >> 1) | (val & 0x80), val & 0x01 != 0),
            6 => (val.rotate_left(4), false),
            _ => (val >> 1, val & 0x01 != 0),
        };
        self.f = if res == 0 { FLAG_Z } else { 0 } | if carry_out { FLAG_C } else { 0 };
        res
    }

    fn handle_cb(&mut self, mmu: &mut Mmu) {
        let opcode = self.fetch8(mmu);
        let r = opcode & 0x07;
        let bit = (opcode >> 3) & 0x07;
        match opcode {
            0x00..=0x3F => {
                let val = self.read_reg(mmu, r);
                let res = self.shift_op(bit, val);
                self.write_reg(mmu, r, res);
            }
            0x40..=0x7F => {
                // BIT n,(HL) only reads; 12 cycles total.
                let val = self.read_reg(mmu, r);
                self.f =
                    (self.f & FLAG_C) | FLAG_H | if val & (1 << bit) == 0 { FLAG_Z } else { 0 };
            }
            0x80..=0xBF => {
                let val = self.read_reg(mmu, r);
                self.write_reg(mmu, r, val & !(1 << bit));
            }
            0xC0..=0xFF => {
                let val = self.read_reg(mmu, r);
                self.write_reg(mmu, r, val | (1 << bit));
            }
        }
    }

    /// Dispatch the highest-priority pending interrupt. Costs 20 cycles.
    fn service_interrupt(&mut self, mmu: &mut Mmu, pending: u8) {
        let Some(&(bit, vector)) = INTERRUPT_VECTORS.iter().find(|(bit, _)| pending & bit != 0)
        else {
            return;
        };
        cpu_trace!("IRQ {:02X} -> {:04X} from PC={:04X}", bit, vector, self.pc);
        self.ime = false;
        self.ime_enable_delay = 0;
        mmu.if_reg &= !bit;
        self.tick(2);
        let pc = self.pc;
        self.push_stack(mmu, pc);
        self.pc = vector;
        self.tick(1);
    }

    /// Execute one instruction, or service one interrupt, or idle one
    /// machine cycle while halted. Returns the CPU cycles consumed; the caller
    /// feeds the same count to the rest of the machine.
    pub fn step(&mut self, mmu: &mut Mmu) -> Result<u32> {
        self.step_cycles = 0;

        let pending = mmu.pending_interrupts();
        if pending != 0 {
            // Any pending interrupt ends HALT, even with IME clear.
            self.halted = false;
            if self.ime {
                self.service_interrupt(mmu, pending);
                self.cycles += self.step_cycles as u64;
                return Ok(self.step_cycles);
            }
        }

        if self.halted {
            self.tick(1);
            self.cycles += self.step_cycles as u64;
            return Ok(self.step_cycles);
        }

        let opcode_pc = self.pc;
        let opcode = self.fetch8(mmu);
        cpu_trace!("{:04X}: {:02X} {}", opcode_pc, opcode, self.debug_state());

        match opcode {
            0x00 => {}
            0x01 | 0x11 | 0x21 | 0x31 => {
                let val = self.fetch16(mmu);
                self.write_pair(opcode >> 4, val);
            }
            0x02 => {
                let addr = self.get_bc();
                self.write8(mmu, addr, self.a);
            }
            0x12 => {
                let addr = self.get_de();
                self.write8(mmu, addr, self.a);
            }
            0x22 => {
                let addr = self.get_hl();
                self.write8(mmu, addr, self.a);
                self.set_hl(addr.wrapping_add(1));
            }
            0x32 => {
                let addr = self.get_hl();
                self.write8(mmu, addr, self.a);
                self.set_hl(addr.wrapping_sub(1));
            }
            0x03 | 0x13 | 0x23 | 0x33 => {
                let idx = opcode >> 4;
                let val = self.read_pair(idx).wrapping_add(1);
                self.write_pair(idx, val);
                self.tick(1);
            }
            0x0B | 0x1B | 0x2B | 0x3B => {
                let idx = opcode >> 4;
                let val = self.read_pair(idx).wrapping_sub(1);
                self.write_pair(idx, val);
                self.tick(1);
            }
            0x09 | 0x19 | 0x29 | 0x39 => {
                let val = self.read_pair(opcode >> 4);
                self.add_hl(val);
                self.tick(1);
            }
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x34 | 0x3C => {
                let r = opcode >> 3;
                let val = self.read_reg(mmu, r);
                let res = self.inc8(val);
                self.write_reg(mmu, r, res);
            }
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x35 | 0x3D => {
                let r = opcode >> 3;
                let val = self.read_reg(mmu, r);
                let res = self.dec8(val);
                self.write_reg(mmu, r, res);
            }
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x36 | 0x3E => {
                let val = self.fetch8(mmu);
                self.write_reg(mmu, opcode >> 3, val);
            }
            0x07 => {
                let carry = self.a & 0x80 != 0;
                self.a = self.a.rotate_left(1);
                self.f = if carry { FLAG_C } else { 0 };
            }
            0x0F => {
                let carry = self.a & 0x01 != 0;
                self.a = self.a.rotate_right(1);
                self.f = if carry { FLAG_C } else { 0 };
            }
            0x17 => {
                let carry = self.a & 0x80 != 0;
                self.a = (self.a << 1) | u8::from(self.f & FLAG_C != 0);
                self.f = if carry { FLAG_C } else { 0 };
            }
            0x1F => {
                let carry = self.a & 0x01 != 0;
                self.a = (self.a >> 1) | if self.f & FLAG_C != 0 { 0x80 } else { 0 };
                self.f = if carry { FLAG_C } else { 0 };
            }
            0x08 => {
                let addr = self.fetch16(mmu);
                self.write8(mmu, addr, self.sp as u8);
                self.write8(mmu, addr.wrapping_add(1), (self.sp >> 8) as u8);
            }
            0x0A => {
                let addr = self.get_bc();
                self.a = self.read8(mmu, addr);
            }
            0x1A => {
                let addr = self.get_de();
                self.a = self.read8(mmu, addr);
            }
            0x2A => {
                let addr = self.get_hl();
                self.a = self.read8(mmu, addr);
                self.set_hl(addr.wrapping_add(1));
            }
            0x3A => {
                let addr = self.get_hl();
                self.a = self.read8(mmu, addr);
                self.set_hl(addr.wrapping_sub(1));
            }
            0x10 => {
                // STOP: the padding byte is skipped without a bus cycle.
                self.pc = self.pc.wrapping_add(1);
                mmu.timer.reset_div();
                self.halted = true;
                log::debug!("STOP at PC={:04X}", opcode_pc);
            }
            0x18 => {
                let offset = self.fetch8(mmu) as i8;
                self.pc = self.pc.wrapping_add(offset as u16);
                self.tick(1);
            }
            0x20 | 0x28 | 0x30 | 0x38 => {
                let offset = self.fetch8(mmu) as i8;
                if self.condition(opcode >> 3) {
                    self.pc = self.pc.wrapping_add(offset as u16);
                    self.tick(1);
                }
            }
            0x27 => self.daa(),
            0x2F => {
                self.a = !self.a;
                self.f = (self.f & (FLAG_Z | FLAG_C)) | FLAG_N | FLAG_H;
            }
            0x37 => {
                self.f = (self.f & FLAG_Z) | FLAG_C;
            }
            0x3F => {
                self.f = (self.f & FLAG_Z) | ((self.f & FLAG_C) ^ FLAG_C);
            }
            0x76 => {
                self.halted = true;
            }
            0x40..=0x7F => {
                let val = self.read_reg(mmu, opcode);
                self.write_reg(mmu, opcode >> 3, val);
            }
            0x80..=0xBF => {
                let val = self.read_reg(mmu, opcode);
                self.alu(AluOp::from_bits(opcode >> 3), val);
            }
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let val = self.fetch8(mmu);
                self.alu(AluOp::from_bits(opcode >> 3), val);
            }
            0xC0 | 0xC8 | 0xD0 | 0xD8 => {
                self.tick(1);
                if self.condition(opcode >> 3) {
                    self.pc = self.pop_stack(mmu);
                    self.tick(1);
                }
            }
            0xC9 => {
                self.pc = self.pop_stack(mmu);
                self.tick(1);
            }
            0xD9 => {
                self.pc = self.pop_stack(mmu);
                self.tick(1);
                self.ime = true;
            }
            0xC1 | 0xD1 | 0xE1 => {
                let val = self.pop_stack(mmu);
                self.write_pair((opcode >> 4) & 0x03, val);
            }
            0xF1 => {
                let val = self.pop_stack(mmu);
                self.set_af(val);
            }
            0xC5 | 0xD5 | 0xE5 => {
                let val = self.read_pair((opcode >> 4) & 0x03);
                self.tick(1);
                self.push_stack(mmu, val);
            }
            0xF5 => {
                let val = self.get_af();
                self.tick(1);
                self.push_stack(mmu, val);
            }
            0xC3 => {
                self.pc = self.fetch16(mmu);
                self.tick(1);
            }
            0xC2 | 0xCA | 0xD2 | 0xDA => {
                let addr = self.fetch16(mmu);
                if self.condition(opcode >> 3) {
                    self.pc = addr;
                    self.tick(1);
                }
            }
            0xE9 => {
                self.pc = self.get_hl();
            }
            0xCD => {
                let addr = self.fetch16(mmu);
                self.tick(1);
                let ret = self.pc;
                self.push_stack(mmu, ret);
                self.pc = addr;
            }
            0xC4 | 0xCC | 0xD4 | 0xDC => {
                let addr = self.fetch16(mmu);
                if self.condition(opcode >> 3) {
                    self.tick(1);
                    let ret = self.pc;
                    self.push_stack(mmu, ret);
                    self.pc = addr;
                }
            }
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
                self.tick(1);
                let ret = self.pc;
                self.push_stack(mmu, ret);
                self.pc = (opcode & 0x38) as u16;
            }
            0xCB => self.handle_cb(mmu),
            0xE0 => {
                let offset = self.fetch8(mmu) as u16;
                self.write8(mmu, 0xFF00 | offset, self.a);
            }
            0xF0 => {
                let offset = self.fetch8(mmu) as u16;
                self.a = self.read8(mmu, 0xFF00 | offset);
            }
            0xE2 => {
                self.write8(mmu, 0xFF00 | self.c as u16, self.a);
            }
            0xF2 => {
                self.a = self.read8(mmu, 0xFF00 | self.c as u16);
            }
            0xEA => {
                let addr = self.fetch16(mmu);
                self.write8(mmu, addr, self.a);
            }
            0xFA => {
                let addr = self.fetch16(mmu);
                self.a = self.read8(mmu, addr);
            }
            0xE8 => {
                let offset = self.fetch8(mmu);
                self.sp = self.sp_offset(offset);
                self.tick(2);
            }
            0xF8 => {
                let offset = self.fetch8(mmu);
                let val = self.sp_offset(offset);
                self.set_hl(val);
                self.tick(1);
            }
            0xF9 => {
                self.sp = self.get_hl();
                self.tick(1);
            }
            0xF3 => {
                self.ime = false;
                self.ime_enable_delay = 0;
            }
            0xFB => {
                // Takes effect after the next instruction completes.
                if !self.ime && self.ime_enable_delay == 0 {
                    self.ime_enable_delay = 2;
                }
            }
            0xD3 | 0xDB | 0xDD | 0xE3 | 0xE4 | 0xEB | 0xEC | 0xED | 0xF4 | 0xFC | 0xFD => {
                self.pc = opcode_pc;
                log::error!(
                    "unimplemented opcode {:02X} at {:04X}: {}",
                    opcode,
                    opcode_pc,
                    self.debug_state()
                );
                return Err(CoreError::UnimplementedOpcode {
                    opcode,
                    pc: opcode_pc,
                });
            }
        }

        if self.ime_enable_delay > 0 {
            self.ime_enable_delay -= 1;
            if self.ime_enable_delay == 0 {
                self.ime = true;
            }
        }

        self.cycles += self.step_cycles as u64;
        Ok(self.step_cycles)
    }

    pub fn snapshot(&self) -> CpuState {
        CpuState {
            a: self.a,
            f: self.f,
            b: self.b,
            c: self.c,
            d: self.d,
            e: self.e,
            h: self.h,
            l: self.l,
            sp: self.sp,
            pc: self.pc,
            ime: self.ime,
            halted: self.halted,
            ime_enable_delay: self.ime_enable_delay,
            cycles: self.cycles,
        }
    }

    pub fn restore(&mut self, state: &CpuState) {
        self.a = state.a;
        self.f = state.f & 0xF0;
        self.b = state.b;
        self.c = state.c;
        self.d = state.d;
        self.e = state.e;
        self.h = state.h;
        self.l = state.l;
        self.sp = state.sp;
        self.pc = state.pc;
        self.ime = state.ime;
        self.halted = state.halted;
        self.ime_enable_delay = state.ime_enable_delay.min(2);
        self.cycles = state.cycles;
        self.step_cycles = 0;
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}
