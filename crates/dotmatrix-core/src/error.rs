use std::io;

use thiserror::Error;

/// Faults the core can surface to the host.
///
/// Out-of-range addresses and accesses to disabled resources are not errors;
/// they resolve to the hardware's open-bus or ignored-write behavior.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unimplemented opcode {opcode:#04X} at PC={pc:#06X}")]
    UnimplementedOpcode { opcode: u8, pc: u16 },

    #[error("cartridge image is {len} bytes, shorter than the 0x150-byte header")]
    RomTooSmall { len: usize },

    #[error("unsupported cartridge type {code:#04X}")]
    UnsupportedCartridge { code: u8 },

    #[error("snapshot does not match machine: {0}")]
    SnapshotMismatch(&'static str),

    #[error("snapshot encoding failed: {0}")]
    Encoding(#[from] bincode::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
