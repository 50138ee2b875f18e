//! Presentation boundary between the core and whatever displays or plays its
//! output. The core pushes into these synchronously; buffering policy belongs
//! to the implementor.

use crate::ppu::FRAME_BYTES;

/// Receives one fully rendered 160x144 RGBA frame per VBlank.
pub trait FrameSink {
    fn present(&mut self, frame: &[u8]);
}

/// Receives stereo frames at the sound unit's sample rate. Returns how many
/// frames were taken; the rest are dropped by the caller.
pub trait AudioSink {
    fn push_samples(&mut self, samples: &[[f32; 2]]) -> usize;
}

/// Keeps only the most recent frame.
impl FrameSink for Vec<u8> {
    fn present(&mut self, frame: &[u8]) {
        self.clear();
        self.extend_from_slice(&frame[..frame.len().min(FRAME_BYTES)]);
    }
}

/// Unbounded capture.
impl AudioSink for Vec<[f32; 2]> {
    fn push_samples(&mut self, samples: &[[f32; 2]]) -> usize {
        self.extend_from_slice(samples);
        samples.len()
    }
}

/// Discards everything; for headless runs that only care about CPU state.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn present(&mut self, _frame: &[u8]) {}
}

impl AudioSink for NullSink {
    fn push_samples(&mut self, samples: &[[f32; 2]]) -> usize {
        samples.len()
    }
}
