//! Plain-data machine state for save states.
//!
//! Each stateful component has a matching record here and exposes
//! `snapshot()` / `restore()`. The records carry no behavior; binary encoding
//! is provided by [`MachineState::to_bytes`] for hosts that want a ready-made
//! file format.

use serde::{Deserialize, Serialize};

use crate::cartridge::MbcType;
use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuState {
    pub a: u8,
    pub f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub sp: u16,
    pub pc: u16,
    pub ime: bool,
    pub halted: bool,
    pub ime_enable_delay: u8,
    pub cycles: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerState {
    pub div: u16,
    pub tima: u8,
    pub tma: u8,
    pub tac: u8,
    pub counter: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoypadState {
    /// P1 bits 4-5 as last written.
    pub select_bits: u8,
    pub a: bool,
    pub b: bool,
    pub select: bool,
    pub start: bool,
    pub right: bool,
    pub left: bool,
    pub up: bool,
    pub down: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialState {
    pub sb: u8,
    pub sc: u8,
    pub remaining: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PpuState {
    pub vram: Vec<u8>,
    pub oam: Vec<u8>,
    pub lcdc: u8,
    pub stat: u8,
    pub scy: u8,
    pub scx: u8,
    pub ly: u8,
    pub lyc: u8,
    pub lyc_eq_ly: bool,
    pub dma: u8,
    pub bgp: u8,
    pub obp0: u8,
    pub obp1: u8,
    pub wy: u8,
    pub wx: u8,
    pub mode: u8,
    pub mode_clock: u32,
    pub scx_per_line: Vec<u8>,
    pub scy_per_line: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeState {
    pub initial: u8,
    pub add: bool,
    pub period: u8,
    pub volume: u8,
    pub timer: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepState {
    pub period: u8,
    pub negate: bool,
    pub shift: u8,
    pub timer: u8,
    pub shadow: u16,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseState {
    pub enabled: bool,
    pub duty: u8,
    pub length_load: u8,
    pub length: u16,
    pub length_enabled: bool,
    pub envelope: EnvelopeState,
    pub frequency: u16,
    pub timer: i32,
    pub duty_pos: u8,
    /// Present on channel 1 only.
    pub sweep: Option<SweepState>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveState {
    pub enabled: bool,
    pub dac_enabled: bool,
    pub length_load: u8,
    pub length: u16,
    pub length_enabled: bool,
    pub volume_code: u8,
    pub frequency: u16,
    pub timer: i32,
    pub position: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoiseState {
    pub enabled: bool,
    pub length_load: u8,
    pub length: u16,
    pub length_enabled: bool,
    pub envelope: EnvelopeState,
    pub clock_shift: u8,
    pub width7: bool,
    pub divisor_code: u8,
    pub timer: i32,
    pub lfsr: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApuState {
    pub ch1: PulseState,
    pub ch2: PulseState,
    pub ch3: WaveState,
    pub ch4: NoiseState,
    pub wave_ram: [u8; 16],
    pub regs: Vec<u8>,
    pub nr50: u8,
    pub nr51: u8,
    pub powered: bool,
    pub sequencer_step: u8,
    pub sequencer_clock: u32,
    pub sample_clock: f64,
}

/// Banking registers of whichever controller the cartridge carries. Fields a
/// controller lacks stay at their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartridgeState {
    pub mbc: MbcType,
    pub rom_bank: u16,
    pub ram_bank: u8,
    pub mode: u8,
    pub ram_enable: bool,
    pub rtc: [u8; 5],
    pub rtc_latched: [u8; 5],
    pub latch_pending: bool,
    pub ram: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MmuState {
    pub wram: Vec<u8>,
    pub hram: Vec<u8>,
    pub if_reg: u8,
    pub ie_reg: u8,
    pub timer: TimerState,
    pub joypad: JoypadState,
    pub serial: SerialState,
    pub ppu: PpuState,
    pub apu: ApuState,
    pub cart: Option<CartridgeState>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineState {
    pub cpu: CpuState,
    pub mmu: MmuState,
}

impl MachineState {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
