#![allow(dead_code)]

use dotmatrix_core::cartridge::Cartridge;
use dotmatrix_core::cpu::Cpu;
use dotmatrix_core::gameboy::GameBoy;
use dotmatrix_core::mmu::Mmu;

pub const BANK_SIZE: usize = 0x4000;

/// ROM image of `banks` 16 KiB banks with the given header type and RAM
/// size codes. The first byte of every bank holds the bank number so tests
/// can tell which bank is mapped.
pub fn banked_rom(cart_type: u8, ram_code: u8, banks: usize) -> Vec<u8> {
    let mut rom = vec![0u8; banks.max(2) * BANK_SIZE];
    for bank in 1..banks {
        rom[bank * BANK_SIZE] = bank as u8;
        rom[bank * BANK_SIZE + 1] = (bank >> 8) as u8;
    }
    rom[0x0134..0x0138].copy_from_slice(b"TEST");
    rom[0x0147] = cart_type;
    rom[0x0149] = ram_code;
    rom
}

/// 32 KiB ROM-only image with `code` placed at the entry point 0x0100.
pub fn program_rom(code: &[u8]) -> Vec<u8> {
    let mut rom = banked_rom(0x00, 0x00, 2);
    // The header area overlaps 0x0104..; programs here are short enough to
    // run before reaching it, or jump over it.
    rom[0x0100..0x0100 + code.len()].copy_from_slice(code);
    rom
}

pub fn machine_with_program(code: &[u8]) -> GameBoy {
    let cart = Cartridge::load(program_rom(code)).unwrap();
    GameBoy::new(cart)
}

/// Bare CPU and bus with `code` copied into work RAM at 0xC000 and PC
/// pointing at it.
pub fn cpu_in_wram(code: &[u8]) -> (Cpu, Mmu) {
    let mut mmu = Mmu::new();
    for (i, byte) in code.iter().enumerate() {
        mmu.write_byte(0xC000 + i as u16, *byte);
    }
    let mut cpu = Cpu::new();
    cpu.pc = 0xC000;
    (cpu, mmu)
}
