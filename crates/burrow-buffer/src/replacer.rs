//! Page replacement policies for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Trait for page replacement algorithms.
///
/// Eviction candidates are filtered through a caller-supplied predicate, so
/// the policy never needs to know about pin counts or resident pages.
pub trait Replacer: Send + Sync {
    /// Records that the given frame was accessed.
    fn record_access(&self, frame_id: FrameId);

    /// Selects a victim frame for eviction. Only frames for which
    /// `can_evict` returns true are considered. Returns None if no frame
    /// qualifies.
    fn evict(&self, can_evict: &dyn Fn(FrameId) -> bool) -> Option<FrameId>;

    /// Forgets any access history for a frame.
    fn remove(&self, frame_id: FrameId);
}

/// Clock replacement algorithm.
///
/// Reference bits are atomics so access recording is lock-free; only the
/// clock hand lives behind a mutex.
pub struct ClockReplacer {
    /// Number of frames.
    num_frames: usize,
    /// Reference bits for each frame.
    reference_bits: Vec<AtomicBool>,
    /// Current clock hand position.
    clock_hand: Mutex<usize>,
}

impl ClockReplacer {
    /// Creates a new clock replacer with the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        let reference_bits: Vec<AtomicBool> =
            (0..num_frames).map(|_| AtomicBool::new(false)).collect();

        Self {
            num_frames,
            reference_bits,
            clock_hand: Mutex::new(0),
        }
    }

    /// Returns the total capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.num_frames
    }
}

impl Replacer for ClockReplacer {
    #[inline]
    fn record_access(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx < self.num_frames {
            self.reference_bits[idx].store(true, Ordering::Relaxed);
        }
    }

    fn evict(&self, can_evict: &dyn Fn(FrameId) -> bool) -> Option<FrameId> {
        let mut hand = self.clock_hand.lock();

        // Two full rotations: the first clears reference bits, the second
        // must then find a victim among the evictable frames.
        for _ in 0..(2 * self.num_frames) {
            let pos = *hand;
            *hand = (pos + 1) % self.num_frames;

            let frame_id = FrameId(pos as u32);
            if !can_evict(frame_id) {
                continue;
            }

            if self.reference_bits[pos].swap(false, Ordering::Relaxed) {
                // Had a second chance; bit is now cleared
                continue;
            }

            return Some(frame_id);
        }

        None
    }

    fn remove(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx < self.num_frames {
            self.reference_bits[idx].store(false, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evict_any(replacer: &ClockReplacer) -> Option<FrameId> {
        replacer.evict(&|_| true)
    }

    #[test]
    fn test_clock_replacer_new() {
        let replacer = ClockReplacer::new(10);
        assert_eq!(replacer.capacity(), 10);
    }

    #[test]
    fn test_clock_replacer_evict_none_allowed() {
        let replacer = ClockReplacer::new(10);
        assert!(replacer.evict(&|_| false).is_none());
    }

    #[test]
    fn test_clock_replacer_evict_any() {
        let replacer = ClockReplacer::new(4);
        let victim = evict_any(&replacer);
        assert!(victim.is_some());
    }

    #[test]
    fn test_clock_replacer_second_chance() {
        let replacer = ClockReplacer::new(3);

        // Reference frames 0 and 1; frame 2 should be the first victim.
        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));

        let victim = evict_any(&replacer);
        assert_eq!(victim, Some(FrameId(2)));
    }

    #[test]
    fn test_clock_replacer_evicts_after_clearing_bits() {
        let replacer = ClockReplacer::new(3);

        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));
        replacer.record_access(FrameId(2));

        // All referenced: the sweep clears bits and still finds a victim.
        assert!(evict_any(&replacer).is_some());
    }

    #[test]
    fn test_clock_replacer_predicate_filtering() {
        let replacer = ClockReplacer::new(4);

        // Only frame 2 is evictable.
        let victim = replacer.evict(&|fid| fid.0 == 2);
        assert_eq!(victim, Some(FrameId(2)));
    }

    #[test]
    fn test_clock_replacer_remove_clears_bit() {
        let replacer = ClockReplacer::new(2);

        replacer.record_access(FrameId(0));
        replacer.remove(FrameId(0));

        // With its bit cleared, frame 0 is evicted on the first pass.
        let victim = evict_any(&replacer);
        assert_eq!(victim, Some(FrameId(0)));
    }

    #[test]
    fn test_clock_replacer_out_of_bounds() {
        let replacer = ClockReplacer::new(5);

        // These should not panic
        replacer.record_access(FrameId(100));
        replacer.remove(FrameId(100));
    }
}
