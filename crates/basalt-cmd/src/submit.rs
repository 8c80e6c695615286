//! # Submission Queue
//!
//! Hands closed recordings to the driver queue, each with the slot fence of
//! its id.
//!
//! The device timeline must stay gap-free: every issued id is eventually
//! submitted, or the fence tracker would wait on it forever. When the driver
//! refuses a recording, the queue submits the same fence again with no
//! commands. If that fails too, the queue is lost.

use basalt_core::{Driver, Error, FenceId, FenceTracker, Result};

use crate::recorder::{CommandRecorder, Recording};

// =============================================================================
// QUEUE STATE
// =============================================================================

/// Queue state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueState {
    /// Accepting submissions
    #[default]
    Ready,
    /// A fence could not be resolved; nothing can be submitted again
    Lost,
}

/// Queue statistics
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    /// Recordings submitted
    pub submissions: u64,
    /// Commands submitted
    pub commands: u64,
    /// Empty submissions issued to resolve a failed or discarded recording
    pub empty_resubmissions: u64,
    /// Submissions the caller blocked on
    pub blocking_waits: u64,
}

// =============================================================================
// SUBMISSION QUEUE
// =============================================================================

/// Per-device submission queue
#[derive(Debug)]
pub struct SubmissionQueue {
    family_index: u32,
    state: QueueState,
    stats: QueueStats,
}

impl SubmissionQueue {
    /// Create a queue for a queue family
    pub fn new(family_index: u32) -> Self {
        Self {
            family_index,
            state: QueueState::Ready,
            stats: QueueStats::default(),
        }
    }

    /// Queue family index
    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    /// Current state
    pub fn state(&self) -> QueueState {
        self.state
    }

    /// Whether the queue was lost
    pub fn is_lost(&self) -> bool {
        self.state == QueueState::Lost
    }

    /// Put the queue in the lost state
    pub fn mark_lost(&mut self) {
        if self.state != QueueState::Lost {
            log::error!("submission queue (family {}) lost", self.family_index);
            self.state = QueueState::Lost;
        }
    }

    /// Submit a closed recording
    ///
    /// On driver failure the fence is resolved with an empty submission and
    /// the driver's error is returned.
    pub fn submit<D: Driver + ?Sized>(
        &mut self,
        driver: &mut D,
        tracker: &mut FenceTracker,
        recording: Recording,
    ) -> Result<FenceId> {
        if self.is_lost() {
            return Err(Error::DeviceLost);
        }

        let fence = recording.fence();
        match driver.submit(recording.commands(), tracker.slot(fence)) {
            Ok(()) => {
                tracker.mark_submitted(fence);
                self.stats.submissions += 1;
                self.stats.commands += recording.len() as u64;
                log::trace!(
                    "submitted fence {} with {} commands",
                    fence,
                    recording.len()
                );
                Ok(fence)
            }
            Err(err) => {
                log::warn!("submission of fence {} failed: {}", fence, err);
                self.submit_empty(driver, tracker, fence)?;
                Err(err)
            }
        }
    }

    /// Resolve `fence` with an empty submission
    pub fn submit_empty<D: Driver + ?Sized>(
        &mut self,
        driver: &mut D,
        tracker: &mut FenceTracker,
        fence: FenceId,
    ) -> Result<()> {
        if self.is_lost() {
            return Err(Error::DeviceLost);
        }

        match driver.submit(&[], tracker.slot(fence)) {
            Ok(()) => {
                tracker.mark_submitted(fence);
                self.stats.empty_resubmissions += 1;
                Ok(())
            }
            Err(err) => {
                log::error!("fence {} could not be resolved: {}", fence, err);
                self.mark_lost();
                Err(Error::DeviceLost)
            }
        }
    }

    /// Close the open recording and submit it
    ///
    /// With `wait` set, blocks until the submission has completed.
    pub fn end_recording<D: Driver + ?Sized>(
        &mut self,
        driver: &mut D,
        tracker: &mut FenceTracker,
        recorder: &mut CommandRecorder,
        wait: bool,
    ) -> Result<FenceId> {
        let recording = recorder.end();
        let fence = self.submit(driver, tracker, recording)?;
        if wait {
            self.stats.blocking_waits += 1;
            tracker.wait_for(driver, fence)?;
        }
        Ok(fence)
    }

    /// Discard the open recording and resolve its fence
    pub fn abandon<D: Driver + ?Sized>(
        &mut self,
        driver: &mut D,
        tracker: &mut FenceTracker,
        recorder: &mut CommandRecorder,
    ) -> Result<()> {
        let fence = recorder.abort();
        self.submit_empty(driver, tracker, fence)
    }

    /// Get statistics
    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }
}
