//! Bounded, non-blocking pool of hardware-encoder slots.
//!
//! There is no queue: a caller either wins a slot immediately or falls back
//! to software encoding. The pool is process-wide and holds no state beyond
//! an in-use counter — it does not persist across restarts and does not
//! coordinate across processes.

use std::sync::atomic::{AtomicUsize, Ordering};

/// A single atomic counter bounded by `max_slots`.
pub struct HwSlotPool {
    max_slots: usize,
    in_use: AtomicUsize,
}

impl HwSlotPool {
    pub fn new(max_slots: usize) -> Self {
        Self {
            max_slots,
            in_use: AtomicUsize::new(0),
        }
    }

    /// Atomically increments the in-use counter if under the bound, returning
    /// whether the caller won a slot.
    pub fn acquire(&self) -> bool {
        self.in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current < self.max_slots {
                    Some(current + 1)
                } else {
                    None
                }
            })
            .is_ok()
    }

    /// Decrements the in-use counter, never below zero.
    pub fn release(&self) {
        let _ = self
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(1))
            });
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn max_slots(&self) -> usize {
        self.max_slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn acquire_respects_bound() {
        let pool = HwSlotPool::new(2);
        assert!(pool.acquire());
        assert!(pool.acquire());
        assert!(!pool.acquire());
        assert_eq!(pool.in_use(), 2);
    }

    #[test]
    fn release_never_goes_below_zero() {
        let pool = HwSlotPool::new(1);
        pool.release();
        pool.release();
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn acquire_release_round_trip() {
        let pool = HwSlotPool::new(1);
        assert!(pool.acquire());
        pool.release();
        assert!(pool.acquire());
    }

    #[test]
    fn concurrent_acquire_never_exceeds_max() {
        let pool = Arc::new(HwSlotPool::new(4));
        let mut handles = Vec::new();
        for _ in 0..32 {
            let pool = pool.clone();
            handles.push(std::thread::spawn(move || {
                if pool.acquire() {
                    std::thread::yield_now();
                    pool.release();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pool.in_use(), 0);
        assert!(pool.max_slots() == 4);
    }
}
