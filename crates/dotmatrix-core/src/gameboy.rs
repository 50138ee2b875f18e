use crate::{
    cartridge::Cartridge,
    cpu::Cpu,
    error::Result,
    input::Button,
    mmu::Mmu,
    snapshot::{JoypadState, MachineState},
    sink::{AudioSink, FrameSink},
};

/// CPU cycles in one full LCD frame (154 lines of 456 cycles).
pub const CYCLES_PER_FRAME: u64 = 154 * 456;

// Pending samples are handed to the audio sink in batches of at least this
// many frames, or at every VBlank.
const AUDIO_BATCH: usize = 512;

pub struct GameBoy {
    pub cpu: Cpu,
    pub mmu: Mmu,
    frame_count: u64,
}

impl GameBoy {
    /// Post-boot machine with `cart` inserted.
    pub fn new(cart: Cartridge) -> Self {
        let mut mmu = Mmu::new();
        log::info!("Inserting cartridge \"{}\" ({:?})", cart.title, cart.mbc);
        mmu.load_cart(cart);
        Self {
            cpu: Cpu::new(),
            mmu,
            frame_count: 0,
        }
    }

    /// Return to the post-boot state while keeping the cartridge, its RAM and
    /// the host's palette and audio settings.
    pub fn reset(&mut self) {
        let cart = self.mmu.take_cart();
        let palette = self.mmu.ppu.palette();
        let sample_rate = self.mmu.apu.sample_rate();
        let volume = self.mmu.apu.master_volume();

        self.cpu.reset();
        self.mmu = Mmu::new();
        self.mmu.ppu.set_palette(palette);
        self.mmu.apu.set_sample_rate(sample_rate);
        self.mmu.apu.set_master_volume(volume);
        if let Some(mut c) = cart {
            c.reset_banks();
            self.mmu.load_cart(c);
        }
        self.frame_count = 0;
        log::debug!("Machine reset");
    }

    /// Frames completed since construction or the last reset.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Run one CPU step and feed its cycles to the rest of the machine.
    pub fn step(&mut self) -> Result<u32> {
        let cycles = self.cpu.step(&mut self.mmu)?;
        if self.mmu.advance(cycles) {
            self.frame_count += 1;
        }
        Ok(cycles)
    }

    /// [`step`](Self::step), then present a completed frame and hand off
    /// buffered audio.
    pub fn step_with(&mut self, frames: &mut dyn FrameSink, audio: &mut dyn AudioSink) -> Result<u32> {
        let cycles = self.step()?;
        let presented = self.present_frame(frames);
        if presented || self.mmu.apu.pending_samples() >= AUDIO_BATCH {
            self.mmu.apu.drain_samples(audio);
        }
        Ok(cycles)
    }

    fn present_frame(&mut self, frames: &mut dyn FrameSink) -> bool {
        if !self.mmu.ppu.frame_ready() {
            return false;
        }
        frames.present(self.mmu.ppu.framebuffer());
        self.mmu.ppu.clear_frame_flag();
        true
    }

    /// Step until the next frame is presented. With the LCD off no frame ever
    /// completes, so the run ends after one frame's worth of cycles and the
    /// last rendered image is presented again. Returns the cycles consumed.
    pub fn run_frame(&mut self, frames: &mut dyn FrameSink, audio: &mut dyn AudioSink) -> Result<u64> {
        let start = self.frame_count;
        let mut cycles = 0u64;
        while self.frame_count == start {
            cycles += self.step_with(frames, audio)? as u64;
            if cycles >= CYCLES_PER_FRAME && !self.mmu.ppu.lcd_enabled() {
                frames.present(self.mmu.ppu.framebuffer());
                break;
            }
        }
        self.mmu.apu.drain_samples(audio);
        Ok(cycles)
    }

    pub fn set_button(&mut self, button: Button, pressed: bool) {
        self.mmu.set_button(button, pressed);
    }

    pub fn set_joypad(&mut self, state: &JoypadState) {
        self.mmu.input.set_state(state, &mut self.mmu.if_reg);
    }

    /// Bytes shifted out over the serial port since the last call.
    pub fn take_serial_output(&mut self) -> Vec<u8> {
        self.mmu.serial.take_output()
    }

    pub fn snapshot(&self) -> MachineState {
        MachineState {
            cpu: self.cpu.snapshot(),
            mmu: self.mmu.snapshot(),
        }
    }

    pub fn restore(&mut self, state: &MachineState) -> Result<()> {
        self.mmu.restore(&state.mmu)?;
        self.cpu.restore(&state.cpu);
        log::debug!("Restored machine state at PC={:04X}", self.cpu.pc);
        Ok(())
    }
}
