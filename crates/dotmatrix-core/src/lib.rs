//! Cycle-stepped DMG Game Boy emulation core.
//!
//! This crate contains the platform-agnostic emulator logic (CPU/MMU/PPU/APU/etc).
//! Frontends drive it through the [`gameboy`] facade and receive output through
//! the traits in [`sink`].

/// Audio Processing Unit (APU) emulation.
pub mod apu;

/// Lock-free audio ring buffer for handing samples to an output thread.
pub mod audio_queue;

/// Cartridge header parsing, memory bank controllers and battery RAM.
pub mod cartridge;

/// SM83 CPU core.
pub mod cpu;

/// Error type shared by the whole core.
pub mod error;

/// High-level facade that wires the CPU and MMU into a single machine.
pub mod gameboy;

/// Joypad input register and edge-triggered interrupt behavior.
pub mod input;

/// Memory map and hardware plumbing.
pub mod mmu;

/// Pixel Processing Unit (PPU) emulation.
pub mod ppu;

/// Serial unit and link cable plumbing.
pub mod serial;

/// Frame and sample sinks.
pub mod sink;

/// Serializable machine state.
pub mod snapshot;

/// Divider/timer unit.
pub mod timer;

pub use error::{CoreError, Result};
