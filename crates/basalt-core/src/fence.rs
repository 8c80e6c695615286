//! # Fence Tracker
//!
//! Bounded-ahead tracking of submissions on a device timeline.
//!
//! The host hands out fence ids in increasing order and the device completes
//! them in the same order. A fixed ring of backend fences backs the ids: id
//! `n` signals through slot `n % window`. The host may run at most `window`
//! ids ahead of the last one it saw complete; allocating beyond that stalls
//! on the oldest outstanding slot.
//!
//! ```text
//!   completed        submitted       issued
//!       │                │              │
//!  ─────┼────────────────┼──────────────┼────────▶ fence ids
//!       └──────── at most `window` ─────┘
//! ```

use arrayvec::ArrayVec;

use crate::error::{Error, Result};
use crate::traits::FenceDriver;
use crate::types::*;

/// Largest supported fence window
pub const MAX_FENCE_WINDOW: usize = 16;

// =============================================================================
// STATISTICS
// =============================================================================

/// Fence tracker statistics
#[derive(Debug, Clone, Default)]
pub struct FenceStats {
    /// Ids handed out
    pub allocated: u64,
    /// Allocations that had to wait for the device
    pub stalls: u64,
    /// Blocking backend waits performed
    pub backend_waits: u64,
    /// Waits answered without touching the backend
    pub fast_waits: u64,
}

// =============================================================================
// FENCE TRACKER
// =============================================================================

/// Host-side view of a device timeline
#[derive(Debug)]
pub struct FenceTracker {
    /// Backend fence per slot
    slots: ArrayVec<RawFence, MAX_FENCE_WINDOW>,
    /// Last id handed out
    issued: u64,
    /// Last id whose recording reached the queue
    submitted: u64,
    /// Last id known to have completed
    completed: u64,
    /// Statistics
    stats: FenceStats,
}

impl FenceTracker {
    /// Create a tracker with `window` backend fences
    pub fn new<D: FenceDriver + ?Sized>(driver: &mut D, window: usize) -> Result<Self> {
        if window == 0 || window > MAX_FENCE_WINDOW {
            return Err(Error::InvalidParameter);
        }

        let mut slots = ArrayVec::new();
        for _ in 0..window {
            match driver.create_fence() {
                Ok(fence) => slots.push(fence),
                Err(err) => {
                    for fence in slots.drain(..) {
                        driver.destroy_fence(fence);
                    }
                    return Err(err);
                }
            }
        }

        log::debug!("fence tracker ready with a window of {}", window);

        Ok(Self {
            slots,
            issued: 0,
            submitted: 0,
            completed: 0,
            stats: FenceStats::default(),
        })
    }

    /// Number of fence slots
    #[inline]
    pub fn window(&self) -> u64 {
        self.slots.len() as u64
    }

    /// Last id handed out
    #[inline]
    pub fn issued(&self) -> FenceId {
        FenceId::new(self.issued)
    }

    /// Last id handed to the queue
    #[inline]
    pub fn submitted(&self) -> FenceId {
        FenceId::new(self.submitted)
    }

    /// Last id known complete
    #[inline]
    pub fn completed(&self) -> FenceId {
        FenceId::new(self.completed)
    }

    /// Ids issued but not yet known complete
    #[inline]
    pub fn outstanding(&self) -> u64 {
        self.issued - self.completed
    }

    /// Whether `id` is known to have completed
    #[inline]
    pub fn has_passed(&self, id: FenceId) -> bool {
        id.raw() <= self.completed
    }

    /// Backend fence that signals `id`
    pub fn slot(&self, id: FenceId) -> RawFence {
        assert!(!id.is_none(), "fence id 0 has no slot");
        self.slots[(id.raw() % self.window()) as usize]
    }

    /// Hand out the next id, stalling while the window is full
    ///
    /// On return the previous occupant of the id's slot has completed, so
    /// the slot may be reset.
    pub fn allocate_next<D: FenceDriver + ?Sized>(&mut self, driver: &mut D) -> Result<FenceId> {
        let next = self.issued + 1;

        if next - self.completed > self.window() {
            self.stats.stalls += 1;
            log::debug!(
                "fence window full ({} outstanding), stalling before {}",
                self.outstanding(),
                FenceId::new(next)
            );
            while next - self.completed > self.window() {
                self.wait_oldest(driver)?;
            }
        }

        self.issued = next;
        self.stats.allocated += 1;
        Ok(FenceId::new(next))
    }

    /// Record that the recording for `id` reached the queue
    pub fn mark_submitted(&mut self, id: FenceId) {
        assert_eq!(
            id.raw(),
            self.submitted + 1,
            "fence {} submitted out of order (last submitted {})",
            id,
            self.submitted()
        );
        assert!(id.raw() <= self.issued, "fence {} was never allocated", id);
        self.submitted = id.raw();
    }

    /// Block until `id` has completed
    ///
    /// # Panics
    ///
    /// If `id` lies beyond the window or was never submitted. Either means
    /// the caller broke the submission protocol and the wait could never
    /// finish.
    pub fn wait_for<D: FenceDriver + ?Sized>(&mut self, driver: &mut D, id: FenceId) -> Result<()> {
        if self.has_passed(id) {
            self.stats.fast_waits += 1;
            return Ok(());
        }

        assert!(
            id.raw() <= self.completed + self.window(),
            "fence {} is beyond the window (completed {}, window {})",
            id,
            self.completed(),
            self.window()
        );
        assert!(
            id.raw() <= self.submitted,
            "fence {} was never submitted (last submitted {})",
            id,
            self.submitted()
        );

        while !self.has_passed(id) {
            self.wait_oldest(driver)?;
        }
        Ok(())
    }

    /// Advance `completed` over every slot that has already signaled
    pub fn poll<D: FenceDriver + ?Sized>(&mut self, driver: &mut D) -> Result<FenceId> {
        while self.completed < self.submitted {
            let next = FenceId::new(self.completed + 1);
            if !driver.fence_signaled(self.slot(next))? {
                break;
            }
            self.completed = next.raw();
        }
        Ok(self.completed())
    }

    /// Release every backend fence
    ///
    /// The tracker has no slots afterwards and must not be used again.
    pub fn release<D: FenceDriver + ?Sized>(&mut self, driver: &mut D) {
        for fence in self.slots.drain(..) {
            driver.destroy_fence(fence);
        }
    }

    /// Get statistics
    pub fn stats(&self) -> &FenceStats {
        &self.stats
    }

    fn wait_oldest<D: FenceDriver + ?Sized>(&mut self, driver: &mut D) -> Result<()> {
        let oldest = FenceId::new(self.completed + 1);
        assert!(
            oldest.raw() <= self.submitted,
            "stalled on fence {} which was never submitted",
            oldest
        );
        driver.wait_fence(self.slot(oldest))?;
        self.stats.backend_waits += 1;
        self.completed = oldest.raw();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::VecDeque;
    use alloc::vec::Vec;

    /// In-order device: fences signal only when the host waits on them
    #[derive(Default)]
    struct LaggingFences {
        signaled: Vec<bool>,
        queue: VecDeque<RawFence>,
        waits: u32,
        fail_create_after: Option<usize>,
        destroyed: usize,
    }

    impl LaggingFences {
        fn submit(&mut self, fence: RawFence) {
            self.queue.push_back(fence);
        }

        fn complete_one(&mut self) {
            if let Some(fence) = self.queue.pop_front() {
                self.signaled[fence.id() as usize] = true;
            }
        }
    }

    impl FenceDriver for LaggingFences {
        fn create_fence(&mut self) -> Result<RawFence> {
            if self.fail_create_after == Some(self.signaled.len()) {
                return Err(Error::OutOfHostMemory);
            }
            self.signaled.push(false);
            Ok(RawFence::new(self.signaled.len() as u64 - 1))
        }

        fn destroy_fence(&mut self, _fence: RawFence) {
            self.destroyed += 1;
        }

        fn reset_fence(&mut self, fence: RawFence) -> Result<()> {
            self.signaled[fence.id() as usize] = false;
            Ok(())
        }

        fn wait_fence(&mut self, fence: RawFence) -> Result<()> {
            self.waits += 1;
            while !self.signaled[fence.id() as usize] {
                if self.queue.is_empty() {
                    return Err(Error::DeviceLost);
                }
                self.complete_one();
            }
            Ok(())
        }

        fn fence_signaled(&mut self, fence: RawFence) -> Result<bool> {
            Ok(self.signaled[fence.id() as usize])
        }
    }

    fn issue(tracker: &mut FenceTracker, fences: &mut LaggingFences) -> FenceId {
        let id = tracker.allocate_next(fences).unwrap();
        fences.reset_fence(tracker.slot(id)).unwrap();
        fences.submit(tracker.slot(id));
        tracker.mark_submitted(id);
        id
    }

    #[test]
    fn test_window_bound_holds() {
        let mut fences = LaggingFences::default();
        let mut tracker = FenceTracker::new(&mut fences, 3).unwrap();

        for expected in 1..=10 {
            let id = issue(&mut tracker, &mut fences);
            assert_eq!(id, FenceId::new(expected));
            assert!(tracker.outstanding() <= tracker.window());
        }
        // The first three fit without stalling, every later one waited once
        assert_eq!(tracker.stats().stalls, 7);
        assert_eq!(tracker.completed(), FenceId::new(7));
    }

    #[test]
    fn test_wait_for_advances_completed() {
        let mut fences = LaggingFences::default();
        let mut tracker = FenceTracker::new(&mut fences, 3).unwrap();
        let first = issue(&mut tracker, &mut fences);
        let second = issue(&mut tracker, &mut fences);

        tracker.wait_for(&mut fences, second).unwrap();
        assert!(tracker.has_passed(first));
        assert!(tracker.has_passed(second));
        assert!(tracker.completed() >= second);
    }

    #[test]
    fn test_wait_on_passed_id_skips_backend() {
        let mut fences = LaggingFences::default();
        let mut tracker = FenceTracker::new(&mut fences, 2).unwrap();
        let id = issue(&mut tracker, &mut fences);
        tracker.wait_for(&mut fences, id).unwrap();
        let waits = fences.waits;

        tracker.wait_for(&mut fences, id).unwrap();
        tracker.wait_for(&mut fences, FenceId::NONE).unwrap();
        assert_eq!(fences.waits, waits);
        assert_eq!(tracker.stats().fast_waits, 2);
    }

    #[test]
    fn test_poll_never_blocks() {
        let mut fences = LaggingFences::default();
        let mut tracker = FenceTracker::new(&mut fences, 4).unwrap();
        let first = issue(&mut tracker, &mut fences);
        let second = issue(&mut tracker, &mut fences);

        assert_eq!(tracker.poll(&mut fences).unwrap(), FenceId::NONE);
        fences.complete_one();
        assert_eq!(tracker.poll(&mut fences).unwrap(), first);
        assert!(!tracker.has_passed(second));
        assert_eq!(fences.waits, 0);
    }

    #[test]
    fn test_slots_rotate() {
        let mut fences = LaggingFences::default();
        let tracker = FenceTracker::new(&mut fences, 3).unwrap();
        assert_eq!(tracker.slot(FenceId::new(1)), tracker.slot(FenceId::new(4)));
        assert_ne!(tracker.slot(FenceId::new(1)), tracker.slot(FenceId::new(2)));
    }

    #[test]
    fn test_invalid_window_rejected() {
        let mut fences = LaggingFences::default();
        assert_eq!(
            FenceTracker::new(&mut fences, 0).unwrap_err(),
            Error::InvalidParameter
        );
        assert_eq!(
            FenceTracker::new(&mut fences, MAX_FENCE_WINDOW + 1).unwrap_err(),
            Error::InvalidParameter
        );
    }

    #[test]
    fn test_partial_creation_cleans_up() {
        let mut fences = LaggingFences {
            fail_create_after: Some(2),
            ..Default::default()
        };
        assert_eq!(
            FenceTracker::new(&mut fences, 3).unwrap_err(),
            Error::OutOfHostMemory
        );
        assert_eq!(fences.destroyed, 2);
    }

    #[test]
    #[should_panic(expected = "never submitted")]
    fn test_wait_on_unsubmitted_id_panics() {
        let mut fences = LaggingFences::default();
        let mut tracker = FenceTracker::new(&mut fences, 3).unwrap();
        let id = tracker.allocate_next(&mut fences).unwrap();
        let _ = tracker.wait_for(&mut fences, id);
    }

    #[test]
    #[should_panic(expected = "beyond the window")]
    fn test_wait_beyond_window_panics() {
        let mut fences = LaggingFences::default();
        let mut tracker = FenceTracker::new(&mut fences, 2).unwrap();
        let _ = tracker.wait_for(&mut fences, FenceId::new(3));
    }

    #[test]
    #[should_panic(expected = "out of order")]
    fn test_out_of_order_submission_panics() {
        let mut fences = LaggingFences::default();
        let mut tracker = FenceTracker::new(&mut fences, 3).unwrap();
        let _first = tracker.allocate_next(&mut fences).unwrap();
        let second = tracker.allocate_next(&mut fences).unwrap();
        tracker.mark_submitted(second);
    }
}
