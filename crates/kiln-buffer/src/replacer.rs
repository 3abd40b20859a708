//! Page replacement policies for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Trait for page replacement algorithms.
///
/// Eviction candidacy is decided by the caller: `evict` is handed a predicate
/// (typically a pin-count check) and only frames passing it are considered.
pub trait Replacer: Send + Sync {
    /// Records that the given frame was accessed.
    fn record_access(&self, frame_id: FrameId);

    /// Selects a victim frame for eviction among frames passing `can_evict`.
    ///
    /// Returns None if no candidate frame is evictable.
    fn evict(&self, can_evict: &dyn Fn(FrameId) -> bool) -> Option<FrameId>;

    /// Removes a frame from the replacer's bookkeeping.
    fn remove(&self, frame_id: FrameId);
}

/// Clock replacement algorithm implementation.
///
/// Uses atomic reference bits for lock-free access recording; only the
/// clock hand is behind a mutex.
pub struct ClockReplacer {
    /// Number of frames.
    num_frames: usize,
    /// Reference bits for each frame (atomic for lock-free access).
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
        let num_frames = self.num_frames;

        // First rotation clears reference bits of candidates; a candidate
        // with a clear bit on either rotation is the victim.
        for _ in 0..(2 * num_frames) {
            let pos = *hand;
            *hand = (pos + 1) % num_frames;

            let frame_id = FrameId(pos as u32);
            if !can_evict(frame_id) {
                continue;
            }
            if self.reference_bits[pos].load(Ordering::Relaxed) {
                self.reference_bits[pos].store(false, Ordering::Relaxed);
            } else {
                return Some(frame_id);
            }
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
