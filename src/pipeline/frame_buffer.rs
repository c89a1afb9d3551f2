//! Bounded drop-oldest frame buffer

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crossbeam::utils::CachePadded;

use crate::Frame;

/// Fixed-capacity frame buffer shared between a producer and one consumer.
///
/// `put` never fails: when the buffer is full the oldest frame is evicted.
/// `take` hands out the most recently inserted frame, so a consumer that
/// falls behind always sees the freshest picture rather than a backlog.
pub struct BoundedFrameBuffer {
    frames: Mutex<VecDeque<Frame>>,
    capacity: usize,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    frames_written: AtomicU64,
    frames_taken: AtomicU64,
    frames_evicted: AtomicU64,
}

/// Snapshot of buffer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub written: u64,
    pub taken: u64,
    pub evicted: u64,
}

impl BoundedFrameBuffer {
    /// Create a buffer holding at most `capacity` frames (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            stats: CachePadded::new(Stats::default()),
        }
    }

    // A panic while holding the lock cannot leave the deque half-updated,
    // so a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, VecDeque<Frame>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Producer: insert `frame` as the newest element, evicting the oldest
    /// one first if the buffer is full.
    pub fn put(&self, frame: Frame) {
        let evicted = {
            let mut frames = self.lock();
            let evicted = if frames.len() >= self.capacity {
                frames.pop_front()
            } else {
                None
            };
            frames.push_back(frame);
            evicted
        };

        self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("okcapture.frames.written").increment(1);
        if evicted.is_some() {
            self.stats.frames_evicted.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("okcapture.frames.evicted").increment(1);
        }
    }

    /// Consumer: remove and return the newest frame, or `None` when empty.
    pub fn take(&self) -> Option<Frame> {
        let frame = self.lock().pop_back();
        if frame.is_some() {
            self.stats.frames_taken.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("okcapture.frames.taken").increment(1);
        }
        frame
    }

    /// Discard every buffered frame.
    pub fn clear(&self) {
        let stale = std::mem::take(&mut *self.lock());
        drop(stale);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            written: self.stats.frames_written.load(Ordering::Relaxed),
            taken: self.stats.frames_taken.load(Ordering::Relaxed),
            evicted: self.stats.frames_evicted.load(Ordering::Relaxed),
        }
    }
}
