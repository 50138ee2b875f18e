use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::snapshot::CartridgeState;

const ROM_BANK_SIZE: usize = 0x4000;
const RAM_BANK_SIZE: usize = 0x2000;
const HEADER_END: usize = 0x0150;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MbcType {
    #[default]
    NoMbc,
    Mbc1,
    Mbc2,
    Mbc3,
    Mbc5,
}

#[derive(Debug)]
pub struct Cartridge {
    pub rom: Vec<u8>,
    pub ram: Vec<u8>,
    pub mbc: MbcType,
    pub title: String,
    cart_type: u8,
    save_path: Option<PathBuf>,
    mbc_state: MbcState,
}

/// Per-controller banking registers. Only the fields a controller actually
/// exposes are carried by its variant.
#[derive(Debug, Clone)]
enum MbcState {
    NoMbc,
    Mbc1 {
        rom_bank: u8,
        ram_bank: u8,
        mode: u8,
        ram_enable: bool,
    },
    Mbc2 {
        rom_bank: u8,
        ram_enable: bool,
    },
    Mbc3 {
        rom_bank: u8,
        ram_bank: u8,
        ram_enable: bool,
        rtc: [u8; 5],
        latched: [u8; 5],
        latch_pending: bool,
    },
    Mbc5 {
        rom_bank: u16,
        ram_bank: u8,
        ram_enable: bool,
    },
}

// Writable bits of the MBC3 clock registers 0x08..=0x0C.
const RTC_MASKS: [u8; 5] = [0x3F, 0x3F, 0x1F, 0xFF, 0xC1];

impl MbcState {
    fn for_type(mbc: MbcType) -> Self {
        match mbc {
            MbcType::NoMbc => MbcState::NoMbc,
            MbcType::Mbc1 => MbcState::Mbc1 {
                rom_bank: 1,
                ram_bank: 0,
                mode: 0,
                ram_enable: false,
            },
            MbcType::Mbc2 => MbcState::Mbc2 {
                rom_bank: 1,
                ram_enable: false,
            },
            MbcType::Mbc3 => MbcState::Mbc3 {
                rom_bank: 1,
                ram_bank: 0,
                ram_enable: false,
                rtc: [0; 5],
                latched: [0; 5],
                latch_pending: false,
            },
            MbcType::Mbc5 => MbcState::Mbc5 {
                rom_bank: 1,
                ram_bank: 0,
                ram_enable: false,
            },
        }
    }
}

impl Cartridge {
    /// Parse a raw cartridge image. The controller kind and external RAM size
    /// come from header bytes 0x0147 and 0x0149 and never change afterwards.
    pub fn load(data: Vec<u8>) -> Result<Self> {
        let header = Header::parse(&data)?;
        let mbc = header.mbc_type()?;
        let cart_type = header.cart_type();
        let ram_size = header.ram_size();
        let title = header.title();

        if data.len() % ROM_BANK_SIZE != 0 {
            warn!(
                "ROM size {:#X} is not a multiple of 16 KiB; missing bytes read as 0xFF",
                data.len()
            );
        }

        info!(
            "Loaded ROM: {} (MBC: {:?}, ROM: {} KiB, RAM: {} KiB)",
            if title.is_empty() { "<untitled>" } else { &title },
            mbc,
            data.len() / 1024,
            ram_size / 1024
        );

        Ok(Self {
            rom: data,
            ram: vec![0; ram_size],
            mbc,
            title,
            cart_type,
            save_path: None,
            mbc_state: MbcState::for_type(mbc),
        })
    }

    /// Load a ROM from disk. Battery-backed cartridges pick up `<rom>.sav`
    /// from the same directory when it exists.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read(&path)?;
        let mut cart = Self::load(data)?;

        if cart.has_battery() {
            let save = path.as_ref().with_extension("sav");
            if let Ok(bytes) = fs::read(&save) {
                for (d, s) in cart.ram.iter_mut().zip(bytes.iter()) {
                    *d = *s;
                }
                info!("Restored {} bytes of battery RAM from {}", bytes.len(), save.display());
            }
            cart.save_path = Some(save);
        }

        Ok(cart)
    }

    /// Flush battery-backed RAM to the `.sav` file chosen by `from_file`.
    pub fn save_ram(&self) -> Result<()> {
        if let (true, Some(path)) = (self.has_battery(), &self.save_path)
            && !self.ram.is_empty()
        {
            fs::write(path, &self.ram)?;
        }
        Ok(())
    }

    pub fn has_battery(&self) -> bool {
        matches!(
            self.cart_type,
            0x03 | 0x06 | 0x09 | 0x0F | 0x10 | 0x13 | 0x1B | 0x1E
        )
    }

    /// Return the controller registers to their power-on values. RAM
    /// contents are kept.
    pub fn reset_banks(&mut self) {
        self.mbc_state = MbcState::for_type(self.mbc);
    }

    fn rom_bank_count(&self) -> usize {
        self.rom.len().div_ceil(ROM_BANK_SIZE).max(1)
    }

    /// Bank currently mapped into 0x4000..=0x7FFF.
    pub fn rom_bank(&self) -> usize {
        let bank = match &self.mbc_state {
            MbcState::NoMbc => 1,
            MbcState::Mbc1 {
                rom_bank, ram_bank, ..
            } => ((*ram_bank as usize & 0x03) << 5) | *rom_bank as usize,
            MbcState::Mbc2 { rom_bank, .. } | MbcState::Mbc3 { rom_bank, .. } => {
                *rom_bank as usize
            }
            MbcState::Mbc5 { rom_bank, .. } => *rom_bank as usize,
        };
        bank % self.rom_bank_count()
    }

    /// Bank visible through 0x0000..=0x3FFF. Only MBC1 in mode 1 moves it.
    fn fixed_rom_bank(&self) -> usize {
        match &self.mbc_state {
            MbcState::Mbc1 { ram_bank, mode, .. } if *mode == 1 => {
                ((*ram_bank as usize & 0x03) << 5) % self.rom_bank_count()
            }
            _ => 0,
        }
    }

    fn ram_enabled(&self) -> bool {
        match &self.mbc_state {
            MbcState::NoMbc => true,
            MbcState::Mbc1 { ram_enable, .. }
            | MbcState::Mbc2 { ram_enable, .. }
            | MbcState::Mbc3 { ram_enable, .. }
            | MbcState::Mbc5 { ram_enable, .. } => *ram_enable,
        }
    }

    fn ram_index(&self, addr: u16) -> Option<usize> {
        if self.ram.is_empty() {
            return None;
        }
        let offset = addr as usize - 0xA000;
        let bank = match &self.mbc_state {
            MbcState::NoMbc => 0,
            MbcState::Mbc2 { .. } => return Some(offset & 0x01FF),
            MbcState::Mbc1 { ram_bank, mode, .. } => {
                if *mode == 0 {
                    0
                } else {
                    *ram_bank as usize
                }
            }
            MbcState::Mbc3 { ram_bank, .. } => (*ram_bank & 0x03) as usize,
            MbcState::Mbc5 { ram_bank, .. } => *ram_bank as usize,
        };
        Some((bank * RAM_BANK_SIZE + offset) % self.ram.len())
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x3FFF => {
                let idx = self.fixed_rom_bank() * ROM_BANK_SIZE + addr as usize;
                self.rom.get(idx).copied().unwrap_or(0xFF)
            }
            0x4000..=0x7FFF => {
                let idx = self.rom_bank() * ROM_BANK_SIZE + (addr as usize - 0x4000);
                self.rom.get(idx).copied().unwrap_or(0xFF)
            }
            0xA000..=0xBFFF => {
                if !self.ram_enabled() {
                    return 0xFF;
                }
                if let MbcState::Mbc3 {
                    ram_bank: reg @ 0x08..=0x0C,
                    latched,
                    ..
                } = &self.mbc_state
                {
                    return latched[(*reg - 0x08) as usize];
                }
                match self.ram_index(addr) {
                    Some(idx) if self.mbc == MbcType::Mbc2 => self.ram[idx] | 0xF0,
                    Some(idx) => self.ram[idx],
                    None => 0xFF,
                }
            }
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x7FFF => self.write_control(addr, val),
            0xA000..=0xBFFF => {
                if !self.ram_enabled() {
                    return;
                }
                if let MbcState::Mbc3 {
                    ram_bank: reg @ 0x08..=0x0C,
                    rtc,
                    ..
                } = &mut self.mbc_state
                {
                    let i = (*reg - 0x08) as usize;
                    rtc[i] = val & RTC_MASKS[i];
                    return;
                }
                if let Some(idx) = self.ram_index(addr) {
                    self.ram[idx] = if self.mbc == MbcType::Mbc2 {
                        val & 0x0F
                    } else {
                        val
                    };
                }
            }
            _ => {}
        }
    }

    fn write_control(&mut self, addr: u16, val: u8) {
        match &mut self.mbc_state {
            MbcState::NoMbc => {}
            MbcState::Mbc1 {
                rom_bank,
                ram_bank,
                mode,
                ram_enable,
            } => match addr {
                0x0000..=0x1FFF => *ram_enable = val & 0x0F == 0x0A,
                0x2000..=0x3FFF => {
                    let bank = val & 0x1F;
                    *rom_bank = if bank == 0 { 1 } else { bank };
                }
                0x4000..=0x5FFF => *ram_bank = val & 0x03,
                _ => *mode = val & 0x01,
            },
            MbcState::Mbc2 {
                rom_bank,
                ram_enable,
            } => {
                if addr >= 0x4000 {
                    return;
                }
                // Address bit 8 picks between the RAM gate and the bank register.
                if addr & 0x0100 == 0 {
                    *ram_enable = val & 0x0F == 0x0A;
                } else {
                    let bank = val & 0x0F;
                    *rom_bank = if bank == 0 { 1 } else { bank };
                }
            }
            MbcState::Mbc3 {
                rom_bank,
                ram_bank,
                ram_enable,
                rtc,
                latched,
                latch_pending,
            } => match addr {
                0x0000..=0x1FFF => *ram_enable = val & 0x0F == 0x0A,
                0x2000..=0x3FFF => {
                    let bank = val & 0x7F;
                    *rom_bank = if bank == 0 { 1 } else { bank };
                }
                0x4000..=0x5FFF => *ram_bank = val,
                _ => {
                    if *latch_pending && val == 0x01 {
                        *latched = *rtc;
                    }
                    *latch_pending = val == 0x00;
                }
            },
            MbcState::Mbc5 {
                rom_bank,
                ram_bank,
                ram_enable,
            } => match addr {
                0x0000..=0x1FFF => *ram_enable = val & 0x0F == 0x0A,
                0x2000..=0x2FFF => *rom_bank = (*rom_bank & 0x100) | val as u16,
                0x3000..=0x3FFF => *rom_bank = (*rom_bank & 0x0FF) | ((val as u16 & 0x01) << 8),
                0x4000..=0x5FFF => *ram_bank = val & 0x0F,
                _ => {}
            },
        }
    }

    pub fn snapshot(&self) -> CartridgeState {
        let mut state = CartridgeState {
            mbc: self.mbc,
            ram: self.ram.clone(),
            ..CartridgeState::default()
        };
        match &self.mbc_state {
            MbcState::NoMbc => {}
            MbcState::Mbc1 {
                rom_bank,
                ram_bank,
                mode,
                ram_enable,
            } => {
                state.rom_bank = *rom_bank as u16;
                state.ram_bank = *ram_bank;
                state.mode = *mode;
                state.ram_enable = *ram_enable;
            }
            MbcState::Mbc2 {
                rom_bank,
                ram_enable,
            } => {
                state.rom_bank = *rom_bank as u16;
                state.ram_enable = *ram_enable;
            }
            MbcState::Mbc3 {
                rom_bank,
                ram_bank,
                ram_enable,
                rtc,
                latched,
                latch_pending,
            } => {
                state.rom_bank = *rom_bank as u16;
                state.ram_bank = *ram_bank;
                state.ram_enable = *ram_enable;
                state.rtc = *rtc;
                state.rtc_latched = *latched;
                state.latch_pending = *latch_pending;
            }
            MbcState::Mbc5 {
                rom_bank,
                ram_bank,
                ram_enable,
            } => {
                state.rom_bank = *rom_bank;
                state.ram_bank = *ram_bank;
                state.ram_enable = *ram_enable;
            }
        }
        state
    }

    pub fn validate(&self, state: &CartridgeState) -> Result<()> {
        if state.mbc != self.mbc {
            return Err(CoreError::SnapshotMismatch("cartridge controller kind"));
        }
        if state.ram.len() != self.ram.len() {
            return Err(CoreError::SnapshotMismatch("external RAM size"));
        }
        Ok(())
    }

    pub fn restore(&mut self, state: &CartridgeState) -> Result<()> {
        self.validate(state)?;
        self.ram.copy_from_slice(&state.ram);
        self.mbc_state = match self.mbc {
            MbcType::NoMbc => MbcState::NoMbc,
            MbcType::Mbc1 => MbcState::Mbc1 {
                rom_bank: state.rom_bank as u8,
                ram_bank: state.ram_bank,
                mode: state.mode,
                ram_enable: state.ram_enable,
            },
            MbcType::Mbc2 => MbcState::Mbc2 {
                rom_bank: state.rom_bank as u8,
                ram_enable: state.ram_enable,
            },
            MbcType::Mbc3 => MbcState::Mbc3 {
                rom_bank: state.rom_bank as u8,
                ram_bank: state.ram_bank,
                ram_enable: state.ram_enable,
                rtc: state.rtc,
                latched: state.rtc_latched,
                latch_pending: state.latch_pending,
            },
            MbcType::Mbc5 => MbcState::Mbc5 {
                rom_bank: state.rom_bank & 0x1FF,
                ram_bank: state.ram_bank,
                ram_enable: state.ram_enable,
            },
        };
        Ok(())
    }
}

struct Header<'a> {
    data: &'a [u8],
}

impl<'a> Header<'a> {
    fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < HEADER_END {
            return Err(CoreError::RomTooSmall { len: data.len() });
        }
        Ok(Self { data })
    }

    fn title(&self) -> String {
        let mut slice = &self.data[0x0134..0x0144];
        if let Some(pos) = slice.iter().position(|&b| b == 0) {
            slice = &slice[..pos];
        }
        String::from_utf8_lossy(slice).trim().to_string()
    }

    fn cart_type(&self) -> u8 {
        self.data[0x0147]
    }

    fn mbc_type(&self) -> Result<MbcType> {
        match self.cart_type() {
            0x00 | 0x08 | 0x09 => Ok(MbcType::NoMbc),
            0x01..=0x03 => Ok(MbcType::Mbc1),
            0x05 | 0x06 => Ok(MbcType::Mbc2),
            0x0F..=0x13 => Ok(MbcType::Mbc3),
            0x19..=0x1E => Ok(MbcType::Mbc5),
            code => Err(CoreError::UnsupportedCartridge { code }),
        }
    }

    fn ram_size(&self) -> usize {
        // MBC2 carries 512x4-bit RAM on the controller regardless of 0x0149.
        if matches!(self.cart_type(), 0x05 | 0x06) {
            return 0x200;
        }

        match self.data[0x0149] {
            0x00 => 0,
            0x01 => 0x800,
            0x02 => 0x2000,
            0x03 => 0x8000,
            0x04 => 0x20000,
            0x05 => 0x10000,
            code => {
                warn!("Unknown RAM size code {code:#04X}, assuming 8 KiB");
                0x2000
            }
        }
    }
}
