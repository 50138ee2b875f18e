use dotmatrix_core::ppu::{
    DEFAULT_PALETTE, MODE_HBLANK, MODE_OAM, MODE_TRANSFER, MODE_VBLANK, Ppu, SCREEN_WIDTH,
};

const LINE: u32 = 456;

fn stat_mode(ppu: &Ppu) -> u8 {
    ppu.read_reg(0xFF41) & 0x03
}

fn pixel(ppu: &Ppu, x: usize, y: usize) -> [u8; 3] {
    let idx = (y * SCREEN_WIDTH + x) * 4;
    let fb = ppu.framebuffer();
    [fb[idx], fb[idx + 1], fb[idx + 2]]
}

fn fill_tile(ppu: &mut Ppu, tile: usize, rows: std::ops::Range<usize>, color: u8) {
    for row in rows {
        ppu.vram[tile * 16 + row * 2] = if color & 1 != 0 { 0xFF } else { 0 };
        ppu.vram[tile * 16 + row * 2 + 1] = if color & 2 != 0 { 0xFF } else { 0 };
    }
}

#[test]
fn lcd_enable_then_mode_3_then_hblank() {
    let mut ppu = Ppu::new();
    let mut if_reg = 0;
    ppu.write_reg(0xFF40, 0x00);
    ppu.write_reg(0xFF40, 0x91);
    assert_eq!(stat_mode(&ppu), MODE_OAM);
    ppu.step(80, &mut if_reg);
    assert_eq!(stat_mode(&ppu), MODE_TRANSFER);
    ppu.step(172, &mut if_reg);
    assert_eq!(stat_mode(&ppu), MODE_HBLANK);
}

#[test]
fn frame_takes_154_lines_of_456_cycles() {
    let mut ppu = Ppu::new();
    let mut if_reg = 0;
    let mut cycles = 0u32;
    while !ppu.step(4, &mut if_reg) {
        cycles += 4;
    }
    cycles += 4;
    assert_eq!(cycles, 144 * LINE);
    assert_eq!(ppu.ly(), 144);
    assert_eq!(stat_mode(&ppu), MODE_VBLANK);
    assert_eq!(if_reg & 0x01, 0x01);
    assert!(ppu.frame_ready());
    ppu.clear_frame_flag();

    if_reg = 0;
    for _ in 0..(10 * LINE / 4) {
        assert!(!ppu.step(4, &mut if_reg));
    }
    assert_eq!(ppu.ly(), 0);
    assert_eq!(stat_mode(&ppu), MODE_OAM);
    assert_eq!(ppu.mode_clock(), 0);
    assert_eq!(if_reg & 0x01, 0, "VBlank fires once per frame");
    assert!(!ppu.frame_ready());
}

#[test]
fn mode_sequence_over_one_frame() {
    let mut ppu = Ppu::new();
    let mut if_reg = 0;
    let mut seen = vec![stat_mode(&ppu)];
    for _ in 0..(154 * LINE / 4) {
        ppu.step(4, &mut if_reg);
        let mode = stat_mode(&ppu);
        if Some(&mode) != seen.last() {
            seen.push(mode);
        }
    }
    let mut expected = Vec::new();
    for _ in 0..144 {
        expected.extend_from_slice(&[MODE_OAM, MODE_TRANSFER, MODE_HBLANK]);
    }
    expected.push(MODE_VBLANK);
    expected.push(MODE_OAM);
    assert_eq!(seen, expected);
}

#[test]
fn large_step_matches_small_steps() {
    let mut a = Ppu::new();
    let mut b = Ppu::new();
    let (mut if_a, mut if_b) = (0, 0);
    a.step(3 * LINE + 100, &mut if_a);
    for _ in 0..(3 * LINE + 100) / 4 {
        b.step(4, &mut if_b);
    }
    assert_eq!(a.ly(), b.ly());
    assert_eq!(a.mode, b.mode);
    assert_eq!(a.mode_clock(), b.mode_clock());
}

#[test]
fn lcd_off_holds_line_zero() {
    let mut ppu = Ppu::new();
    let mut if_reg = 0;
    ppu.step(5 * LINE + 100, &mut if_reg);
    ppu.write_reg(0xFF41, 0x78);
    ppu.write_reg(0xFF40, 0x11);
    if_reg = 0;
    ppu.step(10 * LINE, &mut if_reg);
    assert_eq!(ppu.ly(), 0);
    assert_eq!(ppu.read_reg(0xFF41) & 0x07, 0);
    assert_eq!(if_reg, 0);
    assert!(!ppu.lcd_enabled());
}

#[test]
fn ly_compare_raises_stat_interrupt() {
    let mut ppu = Ppu::new();
    let mut if_reg = 0;
    ppu.write_reg(0xFF45, 2);
    ppu.write_reg(0xFF41, 0x40);
    ppu.step(LINE, &mut if_reg);
    assert_eq!(if_reg & 0x02, 0);
    assert_eq!(ppu.read_reg(0xFF41) & 0x04, 0);
    ppu.step(LINE, &mut if_reg);
    assert_eq!(if_reg & 0x02, 0x02);
    assert_eq!(ppu.read_reg(0xFF41) & 0x44, 0x44);
}

#[test]
fn hblank_source_raises_stat_interrupt() {
    let mut ppu = Ppu::new();
    let mut if_reg = 0;
    ppu.write_reg(0xFF41, 0x08);
    ppu.step(80 + 171, &mut if_reg);
    assert_eq!(if_reg, 0);
    ppu.step(1, &mut if_reg);
    assert_eq!(if_reg, 0x02);
}

#[test]
fn ly_is_read_only_and_stat_keeps_enable_bits() {
    let mut ppu = Ppu::new();
    ppu.write_reg(0xFF44, 0x42);
    assert_eq!(ppu.read_reg(0xFF44), 0);
    ppu.write_reg(0xFF41, 0xFF);
    assert_eq!(ppu.read_reg(0xFF41) & 0xF8, 0xF8);
    assert_eq!(ppu.read_reg(0xFF41) & 0x03, MODE_OAM);
}

#[test]
fn window_covers_background_from_wx_minus_7() {
    let mut ppu = Ppu::new();
    let mut if_reg = 0;
    ppu.write_reg(0xFF47, 0xE4);
    // LCD on, window on with map 0x9C00, unsigned tiles, BG on.
    ppu.write_reg(0xFF40, 0xF1);
    ppu.write_reg(0xFF4A, 0);
    ppu.write_reg(0xFF4B, 7 + 80);
    fill_tile(&mut ppu, 1, 0..8, 3);
    for i in 0..0x400 {
        ppu.vram[0x1C00 + i] = 1;
    }
    assert!(ppu.step(144 * LINE, &mut if_reg));
    assert_eq!(pixel(&ppu, 79, 0), DEFAULT_PALETTE[0]);
    assert_eq!(pixel(&ppu, 80, 0), DEFAULT_PALETTE[3]);
    assert_eq!(pixel(&ppu, 159, 143), DEFAULT_PALETTE[3]);
}

#[test]
fn sprite_vertical_flip() {
    let mut ppu = Ppu::new();
    let mut if_reg = 0;
    ppu.write_reg(0xFF47, 0xE4);
    ppu.write_reg(0xFF48, 0xE4);
    ppu.write_reg(0xFF40, 0x93);
    fill_tile(&mut ppu, 2, 0..1, 3);
    ppu.oam[0..4].copy_from_slice(&[16 + 10, 8 + 20, 2, 0x40]);
    assert!(ppu.step(144 * LINE, &mut if_reg));
    assert_eq!(pixel(&ppu, 20, 10), DEFAULT_PALETTE[0]);
    assert_eq!(pixel(&ppu, 20, 17), DEFAULT_PALETTE[3]);
    assert_eq!(pixel(&ppu, 28, 17), DEFAULT_PALETTE[0]);
}

#[test]
fn host_palette_maps_shades() {
    let mut ppu = Ppu::new();
    let mut if_reg = 0;
    let grey = [[255, 255, 255], [170, 170, 170], [85, 85, 85], [0, 0, 0]];
    ppu.set_palette(grey);
    ppu.write_reg(0xFF47, 0xE4);
    fill_tile(&mut ppu, 0, 0..8, 2);
    assert!(ppu.step(144 * LINE, &mut if_reg));
    assert_eq!(pixel(&ppu, 0, 0), [85, 85, 85]);
    assert_eq!(ppu.framebuffer()[3], 0xFF);
}
