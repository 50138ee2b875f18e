mod common;

use common::{banked_rom, machine_with_program};
use dotmatrix_core::CoreError;
use dotmatrix_core::cartridge::Cartridge;
use dotmatrix_core::cpu::Cpu;
use dotmatrix_core::mmu::Mmu;
use dotmatrix_core::sink::NullSink;
use dotmatrix_core::snapshot::{CpuState, MachineState};

// LD A,1 ; loop: INC A ; LD (C000),A ; JR loop
const COUNTER_LOOP: [u8; 8] = [0x3E, 0x01, 0x3C, 0xEA, 0x00, 0xC0, 0x18, 0xFA];

fn mmu_with(cart_type: u8, ram_code: u8) -> Mmu {
    let mut mmu = Mmu::new();
    mmu.load_cart(Cartridge::load(banked_rom(cart_type, ram_code, 4)).unwrap());
    mmu
}

#[test]
fn machine_state_survives_encoding_and_resumes_identically() {
    let mut gb = machine_with_program(&COUNTER_LOOP);
    let mut sink = NullSink;
    let mut audio = NullSink;
    for _ in 0..3 {
        gb.run_frame(&mut sink, &mut audio).unwrap();
    }
    gb.mmu.write_byte(0xFF24, 0x53);

    let state = gb.snapshot();
    let bytes = state.to_bytes().unwrap();
    let decoded = MachineState::from_bytes(&bytes).unwrap();
    assert_eq!(decoded, state);

    let mut resumed = machine_with_program(&COUNTER_LOOP);
    resumed.restore(&decoded).unwrap();
    assert_eq!(resumed.snapshot(), state);
    assert_eq!(resumed.mmu.read_byte(0xFF24), 0x53);

    for _ in 0..2 {
        gb.run_frame(&mut sink, &mut audio).unwrap();
        resumed.run_frame(&mut sink, &mut audio).unwrap();
    }
    assert_eq!(resumed.snapshot(), gb.snapshot());
    assert_eq!(resumed.mmu.ppu.framebuffer(), gb.mmu.ppu.framebuffer());
}

#[test]
fn cpu_restore_masks_flag_nibble() {
    let mut cpu = Cpu::new();
    let state = CpuState {
        f: 0xFF,
        pc: 0x4321,
        ime_enable_delay: 9,
        ..cpu.snapshot()
    };
    cpu.restore(&state);
    assert_eq!(cpu.f, 0xF0);
    assert_eq!(cpu.pc, 0x4321);
    assert_eq!(cpu.snapshot().ime_enable_delay, 2);
}

#[test]
fn bank_registers_and_ram_round_trip() {
    let mut mmu = mmu_with(0x03, 0x03);
    mmu.write_byte(0x0000, 0x0A);
    mmu.write_byte(0x6000, 0x01);
    mmu.write_byte(0x4000, 0x02);
    mmu.write_byte(0x2000, 0x03);
    mmu.write_byte(0xA010, 0x77);
    let state = mmu.snapshot();

    let mut other = mmu_with(0x03, 0x03);
    other.restore(&state).unwrap();
    assert_eq!(other.read_byte(0x4000), 3);
    assert_eq!(other.read_byte(0xA010), 0x77);
    assert_eq!(other.snapshot(), state);
}

#[test]
fn controller_kind_must_match() {
    let state = mmu_with(0x03, 0x03).snapshot();
    let mut other = mmu_with(0x1B, 0x03);
    let err = other.restore(&state).unwrap_err();
    assert!(matches!(err, CoreError::SnapshotMismatch(_)));
}

#[test]
fn external_ram_size_must_match() {
    let state = mmu_with(0x03, 0x03).snapshot();
    let mut other = mmu_with(0x03, 0x02);
    assert!(matches!(
        other.restore(&state),
        Err(CoreError::SnapshotMismatch(_))
    ));
}

#[test]
fn cartridge_presence_must_match() {
    let state = mmu_with(0x00, 0x00).snapshot();
    let mut empty = Mmu::new();
    assert!(matches!(
        empty.restore(&state),
        Err(CoreError::SnapshotMismatch(_))
    ));
}

#[test]
fn short_memory_image_is_rejected_before_anything_changes() {
    let mut mmu = Mmu::new();
    mmu.write_byte(0xC000, 0x11);
    let mut state = mmu.snapshot();
    state.wram.pop();
    state.hram[0] = 0x99;

    assert!(mmu.restore(&state).is_err());
    assert_eq!(mmu.read_byte(0xC000), 0x11);
    assert_eq!(mmu.read_byte(0xFF80), 0x00);
}

#[test]
fn truncated_bytes_fail_to_decode() {
    let gb = machine_with_program(&COUNTER_LOOP);
    let bytes = gb.snapshot().to_bytes().unwrap();
    let err = MachineState::from_bytes(&bytes[..16]).unwrap_err();
    assert!(matches!(err, CoreError::Encoding(_)));
}

#[test]
fn failed_restore_leaves_cartridge_and_video_untouched() {
    let mut mmu = mmu_with(0x03, 0x03);
    mmu.write_byte(0x0000, 0x0A);
    mmu.write_byte(0xA000, 0x77);
    mmu.write_byte(0xFF43, 0x05);
    let saved = mmu.snapshot();
    mmu.write_byte(0xA000, 0x11);
    mmu.write_byte(0xFF43, 0x00);

    let mut short_vram = saved.clone();
    short_vram.ppu.vram.pop();
    assert!(matches!(
        mmu.restore(&short_vram),
        Err(CoreError::SnapshotMismatch(_))
    ));
    assert_eq!(mmu.read_byte(0xA000), 0x11);

    let mut short_regs = saved;
    short_regs.apu.regs.pop();
    assert!(matches!(
        mmu.restore(&short_regs),
        Err(CoreError::SnapshotMismatch(_))
    ));
    assert_eq!(mmu.read_byte(0xA000), 0x11);
    assert_eq!(mmu.read_byte(0xFF43), 0x00);
}

#[test]
fn impossible_ppu_timing_is_rejected() {
    let mut mmu = Mmu::new();
    let good = mmu.snapshot();
    let cases = [
        (0u8, 255u8, 0u32), // LY past line 153
        (0, 144, 0),        // HBlank during VBlank lines
        (2, 150, 0),
        (1, 10, 0), // VBlank on a visible line
        (2, 5, 80), // OAM clock already spent
        (1, 153, 456),
    ];
    for (mode, ly, mode_clock) in cases {
        let mut state = good.clone();
        state.ppu.mode = mode;
        state.ppu.ly = ly;
        state.ppu.mode_clock = mode_clock;
        assert!(
            matches!(mmu.restore(&state), Err(CoreError::SnapshotMismatch(_))),
            "mode {mode} ly {ly} clock {mode_clock}"
        );
    }
    assert_eq!(mmu.snapshot(), good);
}

#[test]
fn restored_last_vblank_line_wraps_to_the_top() {
    let mut mmu = Mmu::new();
    let mut state = mmu.snapshot();
    state.ppu.mode = 1;
    state.ppu.ly = 153;
    state.ppu.mode_clock = 400;
    mmu.restore(&state).unwrap();

    let mut if_reg = 0;
    mmu.ppu.step(56, &mut if_reg);
    assert_eq!(mmu.ppu.ly(), 0);
    for _ in 0..200 {
        mmu.ppu.step(456, &mut if_reg);
    }
    assert!(mmu.ppu.ly() <= 153);
}
