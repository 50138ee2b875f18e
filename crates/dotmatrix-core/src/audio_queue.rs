//! Bounded stereo sample queue shared between the emulation thread and an
//! audio writer or output callback.
//!
//! Each slot is one `AtomicU64` carrying both channels' `f32` bits, so the
//! queue needs no `unsafe`. `written` and `read` count frames since creation
//! and only ever grow; their difference is the fill level and a counter
//! modulo the capacity is its slot. When full, new frames are dropped so the
//! emulation clock never waits on the consumer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::sink::AudioSink;

struct Ring {
    slots: Box<[AtomicU64]>,
    written: AtomicUsize,
    read: AtomicUsize,
}

impl Ring {
    fn fill(&self) -> usize {
        let read = self.read.load(Ordering::Acquire);
        self.written.load(Ordering::Acquire).wrapping_sub(read)
    }

    fn slot(&self, count: usize) -> &AtomicU64 {
        &self.slots[count % self.slots.len()]
    }
}

fn pack(left: f32, right: f32) -> u64 {
    (u64::from(left.to_bits()) << 32) | u64::from(right.to_bits())
}

fn unpack(bits: u64) -> (f32, f32) {
    (f32::from_bits((bits >> 32) as u32), f32::from_bits(bits as u32))
}

/// Writing half. Owned by whoever runs the core.
pub struct AudioProducer {
    ring: Arc<Ring>,
}

/// Reading half.
pub struct AudioConsumer {
    ring: Arc<Ring>,
}

/// Create a queue holding up to `capacity_frames` stereo frames (at least one).
pub fn audio_queue(capacity_frames: usize) -> (AudioProducer, AudioConsumer) {
    let slots = (0..capacity_frames.max(1)).map(|_| AtomicU64::new(0)).collect();
    let ring = Arc::new(Ring {
        slots,
        written: AtomicUsize::new(0),
        read: AtomicUsize::new(0),
    });
    (
        AudioProducer {
            ring: Arc::clone(&ring),
        },
        AudioConsumer { ring },
    )
}

impl AudioProducer {
    /// Returns false when the queue was full and the frame was dropped.
    pub fn push_stereo(&self, left: f32, right: f32) -> bool {
        let ring = &*self.ring;
        let written = ring.written.load(Ordering::Relaxed);
        let read = ring.read.load(Ordering::Acquire);
        if written.wrapping_sub(read) == ring.slots.len() {
            return false;
        }
        ring.slot(written).store(pack(left, right), Ordering::Relaxed);
        ring.written.store(written.wrapping_add(1), Ordering::Release);
        true
    }

    pub fn len(&self) -> usize {
        self.ring.fill()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity_frames(&self) -> usize {
        self.ring.slots.len()
    }
}

impl AudioSink for AudioProducer {
    fn push_samples(&mut self, samples: &[[f32; 2]]) -> usize {
        samples
            .iter()
            .take_while(|&&[left, right]| self.push_stereo(left, right))
            .count()
    }
}

impl AudioConsumer {
    pub fn pop_stereo(&self) -> Option<(f32, f32)> {
        let ring = &*self.ring;
        let read = ring.read.load(Ordering::Relaxed);
        if ring.written.load(Ordering::Acquire) == read {
            return None;
        }
        let frame = unpack(ring.slot(read).load(Ordering::Relaxed));
        ring.read.store(read.wrapping_add(1), Ordering::Release);
        Some(frame)
    }

    pub fn len(&self) -> usize {
        self.ring.fill()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity_frames(&self) -> usize {
        self.ring.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_drops_newest() {
        let (mut tx, rx) = audio_queue(2);
        assert_eq!(tx.push_samples(&[[0.1, 0.1], [0.2, 0.2], [0.3, 0.3]]), 2);
        assert_eq!(rx.len(), 2);
        assert_eq!(rx.pop_stereo(), Some((0.1, 0.1)));
        assert_eq!(rx.pop_stereo(), Some((0.2, 0.2)));
        assert_eq!(rx.pop_stereo(), None);
    }

    #[test]
    fn slots_are_reused_after_reads() {
        let (tx, rx) = audio_queue(3);
        for i in 0..10 {
            assert!(tx.push_stereo(i as f32, -(i as f32)));
            assert_eq!(rx.pop_stereo(), Some((i as f32, -(i as f32))));
        }
        assert!(rx.is_empty());
        assert_eq!(tx.capacity_frames(), 3);
    }

    #[test]
    fn zero_capacity_still_holds_one_frame() {
        let (tx, rx) = audio_queue(0);
        assert!(tx.push_stereo(-0.5, 0.25));
        assert!(!tx.push_stereo(1.0, 1.0));
        assert_eq!(rx.pop_stereo(), Some((-0.5, 0.25)));
    }

    #[test]
    fn frames_cross_threads_in_order() {
        let (tx, rx) = audio_queue(16);
        let writer = std::thread::spawn(move || {
            let mut next = 0u32;
            while next < 1000 {
                if tx.push_stereo(next as f32, 0.0) {
                    next += 1;
                }
            }
        });
        let mut expected = 0u32;
        while expected < 1000 {
            if let Some((left, _)) = rx.pop_stereo() {
                assert_eq!(left, expected as f32);
                expected += 1;
            }
        }
        writer.join().unwrap();
    }
}
