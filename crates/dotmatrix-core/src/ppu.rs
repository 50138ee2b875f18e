use crate::error::{CoreError, Result};
use crate::snapshot::PpuState;

#[cfg(feature = "ppu-trace")]
macro_rules! ppu_trace {
    ($($arg:tt)*) => {
        log::trace!($($arg)*);
    };
}
#[cfg(not(feature = "ppu-trace"))]
macro_rules! ppu_trace {
    ($($arg:tt)*) => {};
}

// Screen resolution used by the Game Boy PPU
pub const SCREEN_WIDTH: usize = 160;
pub const SCREEN_HEIGHT: usize = 144;
/// Size of one presented RGBA frame in bytes.
pub const FRAME_BYTES: usize = SCREEN_WIDTH * SCREEN_HEIGHT * 4;

// Timing constants per LCD mode in T-cycles
const MODE0_CYCLES: u32 = 204; // HBlank
const MODE1_CYCLES: u32 = 456; // One line during VBlank
const MODE2_CYCLES: u32 = 80; // OAM scan
const MODE3_CYCLES: u32 = 172; // Pixel transfer

const TOTAL_LINES: usize = 154;
const LAST_LINE: u8 = 153;

const TOTAL_SPRITES: usize = 40;

// Internal memory sizes
const VRAM_SIZE: usize = 0x2000;
const OAM_SIZE: usize = 0xA0;

// VRAM layout constants, relative to 0x8000
const BG_MAP_0_BASE: usize = 0x1800;
const BG_MAP_1_BASE: usize = 0x1C00;
const SIGNED_TILE_BASE: i32 = 0x1000;

// LCD modes used in the `mode` field
pub const MODE_HBLANK: u8 = 0;
pub const MODE_VBLANK: u8 = 1;
pub const MODE_OAM: u8 = 2;
pub const MODE_TRANSFER: u8 = 3;

/// Shades for palette entries 0 (lightest) through 3 (darkest).
pub const DEFAULT_PALETTE: [[u8; 3]; 4] = [
    [224, 248, 208],
    [136, 192, 112],
    [52, 104, 86],
    [8, 24, 32],
];

pub struct Ppu {
    pub vram: [u8; VRAM_SIZE],
    pub oam: [u8; OAM_SIZE],

    lcdc: u8,
    /// Interrupt enable bits 3-6 only; mode and coincidence are composed on read.
    stat: u8,
    scy: u8,
    scx: u8,
    ly: u8,
    lyc: u8,
    lyc_eq_ly: bool,
    pub dma: u8,
    bgp: u8,
    obp0: u8,
    obp1: u8,
    wy: u8,
    wx: u8,

    mode_clock: u32,
    pub mode: u8,

    /// Scroll registers as they were when each line entered OAM search.
    scx_per_line: [u8; TOTAL_LINES],
    scy_per_line: [u8; TOTAL_LINES],

    framebuffer: Vec<u8>,
    frame_ready: bool,
    palette: [[u8; 3]; 4],
}

impl Ppu {
    /// PPU in the state the boot ROM leaves it: LCD on, line 0, OAM search.
    pub fn new() -> Self {
        let mut ppu = Self {
            vram: [0; VRAM_SIZE],
            oam: [0; OAM_SIZE],
            lcdc: 0x91,
            stat: 0,
            scy: 0,
            scx: 0,
            ly: 0,
            lyc: 0,
            lyc_eq_ly: true,
            dma: 0xFF,
            bgp: 0xFC,
            obp0: 0xFF,
            obp1: 0xFF,
            wy: 0,
            wx: 0,
            mode_clock: 0,
            mode: MODE_OAM,
            scx_per_line: [0; TOTAL_LINES],
            scy_per_line: [0; TOTAL_LINES],
            framebuffer: vec![0xFF; FRAME_BYTES],
            frame_ready: false,
            palette: DEFAULT_PALETTE,
        };
        ppu.sample_line_registers();
        ppu
    }

    pub fn set_palette(&mut self, palette: [[u8; 3]; 4]) {
        self.palette = palette;
    }

    pub fn palette(&self) -> [[u8; 3]; 4] {
        self.palette
    }

    pub fn lcd_enabled(&self) -> bool {
        self.lcdc & 0x80 != 0
    }

    pub fn ly(&self) -> u8 {
        self.ly
    }

    pub fn mode_clock(&self) -> u32 {
        self.mode_clock
    }

    /// The last completed frame as 160x144 RGBA bytes.
    pub fn framebuffer(&self) -> &[u8] {
        &self.framebuffer
    }

    pub fn frame_ready(&self) -> bool {
        self.frame_ready
    }

    pub fn clear_frame_flag(&mut self) {
        self.frame_ready = false;
    }

    pub fn read_reg(&self, addr: u16) -> u8 {
        match addr {
            0xFF40 => self.lcdc,
            0xFF41 => {
                (self.stat & 0x78)
                    | 0x80
                    | (self.mode & 0x03)
                    | if self.lyc_eq_ly { 0x04 } else { 0 }
            }
            0xFF42 => self.scy,
            0xFF43 => self.scx,
            0xFF44 => self.ly,
            0xFF45 => self.lyc,
            0xFF46 => self.dma,
            0xFF47 => self.bgp,
            0xFF48 => self.obp0,
            0xFF49 => self.obp1,
            0xFF4A => self.wy,
            0xFF4B => self.wx,
            _ => 0xFF,
        }
    }

    pub fn write_reg(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF40 => {
                let was_on = self.lcd_enabled();
                self.lcdc = val;
                if was_on && !self.lcd_enabled() {
                    log::debug!("LCD disabled at LY={}", self.ly);
                    self.force_off();
                } else if !was_on && self.lcd_enabled() {
                    log::debug!("LCD enabled");
                    self.mode = MODE_OAM;
                    self.mode_clock = 0;
                    self.ly = 0;
                    self.lyc_eq_ly = self.ly == self.lyc;
                    self.sample_line_registers();
                }
            }
            0xFF41 => self.stat = val & 0x78,
            0xFF42 => self.scy = val,
            0xFF43 => self.scx = val,
            0xFF44 => {}
            0xFF45 => {
                self.lyc = val;
                if self.lcd_enabled() {
                    self.lyc_eq_ly = self.ly == self.lyc;
                }
            }
            0xFF46 => self.dma = val,
            0xFF47 => self.bgp = val,
            0xFF48 => self.obp0 = val,
            0xFF49 => self.obp1 = val,
            0xFF4A => self.wy = val,
            0xFF4B => self.wx = val,
            _ => {}
        }
    }

    fn force_off(&mut self) {
        self.mode = MODE_HBLANK;
        self.mode_clock = 0;
        self.ly = 0;
        self.lyc_eq_ly = false;
    }

    fn sample_line_registers(&mut self) {
        let line = self.ly as usize;
        if line < SCREEN_HEIGHT {
            self.scx_per_line[line] = self.scx;
            self.scy_per_line[line] = self.scy;
        }
    }

    /// Latch a new mode and raise the STAT interrupt if its source is enabled.
    fn enter_mode(&mut self, mode: u8, if_reg: &mut u8) {
        ppu_trace!("PPU mode {} -> {} at LY={}", self.mode, mode, self.ly);
        self.mode = mode;
        let source = match mode {
            MODE_HBLANK => 0x08,
            MODE_VBLANK => 0x10,
            MODE_OAM => {
                self.sample_line_registers();
                0x20
            }
            _ => 0,
        };
        if self.stat & source != 0 {
            *if_reg |= 0x02;
        }
    }

    fn check_lyc(&mut self, if_reg: &mut u8) {
        self.lyc_eq_ly = self.ly == self.lyc;
        if self.lyc_eq_ly && self.stat & 0x40 != 0 {
            *if_reg |= 0x02;
        }
    }

    /// Advance the mode state machine by `cycles` CPU cycles. Returns true
    /// when a frame was completed and rendered during this call.
    pub fn step(&mut self, cycles: u32, if_reg: &mut u8) -> bool {
        if !self.lcd_enabled() {
            self.force_off();
            return false;
        }

        self.mode_clock += cycles;
        let mut frame_done = false;

        loop {
            match self.mode {
                MODE_OAM => {
                    if self.mode_clock < MODE2_CYCLES {
                        break;
                    }
                    self.mode_clock -= MODE2_CYCLES;
                    self.enter_mode(MODE_TRANSFER, if_reg);
                }
                MODE_TRANSFER => {
                    if self.mode_clock < MODE3_CYCLES {
                        break;
                    }
                    self.mode_clock -= MODE3_CYCLES;
                    self.enter_mode(MODE_HBLANK, if_reg);
                }
                MODE_HBLANK => {
                    if self.mode_clock < MODE0_CYCLES {
                        break;
                    }
                    self.mode_clock -= MODE0_CYCLES;
                    self.ly += 1;
                    self.check_lyc(if_reg);
                    if self.ly as usize == SCREEN_HEIGHT {
                        self.enter_mode(MODE_VBLANK, if_reg);
                        *if_reg |= 0x01;
                        self.render_frame();
                        self.frame_ready = true;
                        frame_done = true;
                    } else {
                        self.enter_mode(MODE_OAM, if_reg);
                    }
                }
                _ => {
                    if self.mode_clock < MODE1_CYCLES {
                        break;
                    }
                    self.mode_clock -= MODE1_CYCLES;
                    if self.ly >= LAST_LINE {
                        self.ly = 0;
                        self.check_lyc(if_reg);
                        self.enter_mode(MODE_OAM, if_reg);
                    } else {
                        self.ly += 1;
                        self.check_lyc(if_reg);
                    }
                }
            }
        }

        frame_done
    }

    #[inline(always)]
    fn dmg_shade(palette: u8, color_id: u8) -> u8 {
        (palette >> (color_id * 2)) & 0x03
    }

    #[inline(always)]
    fn tile_pixel(&self, tile_addr: usize, row: usize, col: usize) -> u8 {
        let lo = self.vram[tile_addr + row * 2];
        let hi = self.vram[tile_addr + row * 2 + 1];
        let bit = 7 - col;
        (((hi >> bit) & 1) << 1) | ((lo >> bit) & 1)
    }

    /// Shade from the first sprite covering (x, y), or `None` when the
    /// background shows through. OAM order is priority order, and a sprite
    /// hidden behind the background ends the scan for this pixel.
    fn sprite_shade(&self, x: i32, y: i32, bg_color: u8, height: i32) -> Option<u8> {
        for sprite in 0..TOTAL_SPRITES {
            let base = sprite * 4;
            let sy = self.oam[base] as i32 - 16;
            let sx = self.oam[base + 1] as i32 - 8;
            let mut tile = self.oam[base + 2] as usize;
            let attr = self.oam[base + 3];

            if y < sy || y >= sy + height || x < sx || x >= sx + 8 {
                continue;
            }
            if height == 16 {
                tile &= 0xFE;
            }

            let mut row = y - sy;
            let mut col = x - sx;
            if attr & 0x40 != 0 {
                row = height - 1 - row;
            }
            if attr & 0x20 != 0 {
                col = 7 - col;
            }

            let tile_addr = (tile + (row / 8) as usize) * 16;
            let color = self.tile_pixel(tile_addr, (row % 8) as usize, col as usize);
            if color == 0 {
                continue;
            }
            if attr & 0x80 != 0 && bg_color != 0 {
                return None;
            }

            let palette = if attr & 0x10 != 0 {
                self.obp1
            } else {
                self.obp0
            };
            return Some(Self::dmg_shade(palette, color));
        }
        None
    }

    fn render_frame(&mut self) {
        let window_enabled = self.lcdc & 0x20 != 0;
        let sprites_enabled = self.lcdc & 0x02 != 0;
        let sprite_height = if self.lcdc & 0x04 != 0 { 16 } else { 8 };
        let wy = self.wy as i32;
        let wx = self.wx as i32 - 7;

        for y in 0..SCREEN_HEIGHT as i32 {
            let scx = self.scx_per_line[y as usize] as i32;
            let scy = self.scy_per_line[y as usize] as i32;
            for x in 0..SCREEN_WIDTH as i32 {
                let use_window = window_enabled && y >= wy && x >= wx;
                let (world_x, world_y, high_map) = if use_window {
                    ((x - wx) & 0xFF, (y - wy) & 0xFF, self.lcdc & 0x40 != 0)
                } else {
                    ((x + scx) & 0xFF, (y + scy) & 0xFF, self.lcdc & 0x08 != 0)
                };

                let map_base = if high_map { BG_MAP_1_BASE } else { BG_MAP_0_BASE };
                let map_addr = map_base + (world_y as usize / 8) * 32 + world_x as usize / 8;
                let tile_index = self.vram[map_addr];
                let tile_addr = if self.lcdc & 0x10 != 0 {
                    tile_index as usize * 16
                } else {
                    (SIGNED_TILE_BASE + (tile_index as i8 as i32) * 16) as usize
                };
                let bg_color =
                    self.tile_pixel(tile_addr, world_y as usize % 8, world_x as usize % 8);

                let sprite = if sprites_enabled {
                    self.sprite_shade(x, y, bg_color, sprite_height)
                } else {
                    None
                };
                let shade = sprite.unwrap_or_else(|| Self::dmg_shade(self.bgp, bg_color));

                let color = self.palette[shade as usize];
                let idx = (y as usize * SCREEN_WIDTH + x as usize) * 4;
                self.framebuffer[idx..idx + 3].copy_from_slice(&color);
                self.framebuffer[idx + 3] = 0xFF;
            }
        }
    }

    pub fn snapshot(&self) -> PpuState {
        PpuState {
            vram: self.vram.to_vec(),
            oam: self.oam.to_vec(),
            lcdc: self.lcdc,
            stat: self.stat,
            scy: self.scy,
            scx: self.scx,
            ly: self.ly,
            lyc: self.lyc,
            lyc_eq_ly: self.lyc_eq_ly,
            dma: self.dma,
            bgp: self.bgp,
            obp0: self.obp0,
            obp1: self.obp1,
            wy: self.wy,
            wx: self.wx,
            mode: self.mode,
            mode_clock: self.mode_clock,
            scx_per_line: self.scx_per_line.to_vec(),
            scy_per_line: self.scy_per_line.to_vec(),
        }
    }

    /// Reject states the mode state machine could never reach: LY past the
    /// last line, a visible-line mode during VBlank (or the reverse), or a
    /// mode clock at or over its mode's length.
    pub fn validate(&self, state: &PpuState) -> Result<()> {
        if state.vram.len() != VRAM_SIZE || state.oam.len() != OAM_SIZE {
            return Err(CoreError::SnapshotMismatch("video memory size"));
        }
        if state.scx_per_line.len() != TOTAL_LINES || state.scy_per_line.len() != TOTAL_LINES {
            return Err(CoreError::SnapshotMismatch("scroll line cache size"));
        }
        if state.ly > LAST_LINE {
            return Err(CoreError::SnapshotMismatch("LY past the last line"));
        }
        let in_vblank = state.ly as usize >= SCREEN_HEIGHT;
        let budget = match state.mode {
            MODE_HBLANK if !in_vblank => MODE0_CYCLES,
            MODE_OAM if !in_vblank => MODE2_CYCLES,
            MODE_TRANSFER if !in_vblank => MODE3_CYCLES,
            MODE_VBLANK if in_vblank => MODE1_CYCLES,
            _ => return Err(CoreError::SnapshotMismatch("PPU mode for this line")),
        };
        if state.mode_clock >= budget {
            return Err(CoreError::SnapshotMismatch("PPU mode clock"));
        }
        Ok(())
    }

    pub fn restore(&mut self, state: &PpuState) -> Result<()> {
        self.validate(state)?;
        self.vram.copy_from_slice(&state.vram);
        self.oam.copy_from_slice(&state.oam);
        self.lcdc = state.lcdc;
        self.stat = state.stat & 0x78;
        self.scy = state.scy;
        self.scx = state.scx;
        self.ly = state.ly;
        self.lyc = state.lyc;
        self.lyc_eq_ly = state.lyc_eq_ly;
        self.dma = state.dma;
        self.bgp = state.bgp;
        self.obp0 = state.obp0;
        self.obp1 = state.obp1;
        self.wy = state.wy;
        self.wx = state.wx;
        self.mode = state.mode;
        self.mode_clock = state.mode_clock;
        self.scx_per_line.copy_from_slice(&state.scx_per_line);
        self.scy_per_line.copy_from_slice(&state.scy_per_line);
        self.frame_ready = false;
        Ok(())
    }
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_tile(ppu: &mut Ppu, tile: usize, color: u8) {
        let lo = if color & 1 != 0 { 0xFF } else { 0x00 };
        let hi = if color & 2 != 0 { 0xFF } else { 0x00 };
        for row in 0..8 {
            ppu.vram[tile * 16 + row * 2] = lo;
            ppu.vram[tile * 16 + row * 2 + 1] = hi;
        }
    }

    fn pixel(ppu: &Ppu, x: usize, y: usize) -> [u8; 3] {
        let idx = (y * SCREEN_WIDTH + x) * 4;
        [
            ppu.framebuffer[idx],
            ppu.framebuffer[idx + 1],
            ppu.framebuffer[idx + 2],
        ]
    }

    #[test]
    fn background_uses_unsigned_tile_data() {
        let mut ppu = Ppu::new();
        ppu.write_reg(0xFF47, 0xE4);
        solid_tile(&mut ppu, 1, 3);
        ppu.vram[BG_MAP_0_BASE] = 1;
        ppu.render_frame();
        assert_eq!(pixel(&ppu, 0, 0), DEFAULT_PALETTE[3]);
        assert_eq!(pixel(&ppu, 8, 0), DEFAULT_PALETTE[0]);
    }

    #[test]
    fn signed_tile_addressing_reads_below_0x9000() {
        let mut ppu = Ppu::new();
        ppu.write_reg(0xFF47, 0xE4);
        ppu.write_reg(0xFF40, 0x81);
        // Tile index 0xFF resolves to 0x8FF0 in signed mode.
        solid_tile(&mut ppu, 0xFF, 2);
        ppu.vram[BG_MAP_0_BASE] = 0xFF;
        ppu.render_frame();
        assert_eq!(pixel(&ppu, 0, 0), DEFAULT_PALETTE[2]);
    }

    #[test]
    fn first_sprite_in_oam_wins() {
        let mut ppu = Ppu::new();
        ppu.write_reg(0xFF40, 0x93);
        ppu.write_reg(0xFF48, 0xE4);
        ppu.write_reg(0xFF49, 0x1B);
        solid_tile(&mut ppu, 2, 1);
        ppu.oam[0..4].copy_from_slice(&[16, 8, 2, 0x00]);
        ppu.oam[4..8].copy_from_slice(&[16, 8, 2, 0x10]);
        ppu.render_frame();
        assert_eq!(pixel(&ppu, 0, 0), DEFAULT_PALETTE[1]);
    }

    #[test]
    fn hidden_sprite_stops_scan() {
        let mut ppu = Ppu::new();
        ppu.write_reg(0xFF40, 0x93);
        ppu.write_reg(0xFF47, 0xE4);
        ppu.write_reg(0xFF48, 0xE4);
        solid_tile(&mut ppu, 0, 1);
        solid_tile(&mut ppu, 2, 3);
        // Background tile 0 has color 1 everywhere. Sprite 0 is behind the
        // background; sprite 1 would otherwise be visible.
        ppu.oam[0..4].copy_from_slice(&[16, 8, 2, 0x80]);
        ppu.oam[4..8].copy_from_slice(&[16, 8, 2, 0x00]);
        ppu.render_frame();
        assert_eq!(pixel(&ppu, 0, 0), DEFAULT_PALETTE[1]);
    }

    #[test]
    fn scroll_is_sampled_when_line_starts() {
        let mut ppu = Ppu::new();
        let mut if_reg = 0;
        ppu.write_reg(0xFF43, 5);
        // Finish line 0 and start line 1, which samples SCX=5.
        ppu.step(456, &mut if_reg);
        ppu.write_reg(0xFF43, 9);
        assert_eq!(ppu.scx_per_line[1], 5);
        assert_eq!(ppu.scx_per_line[0], 0);
    }
}
