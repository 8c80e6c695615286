//! # Command Recorder
//!
//! Accumulates commands between explicit start and end boundaries. At most
//! one recording is open at a time and every recording owns exactly one
//! fence id.

use alloc::vec::Vec;

use basalt_core::{Command, Driver, FenceId, FenceTracker, Result};

// =============================================================================
// RECORDER STATE
// =============================================================================

/// Recorder state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecorderState {
    /// No recording open
    #[default]
    Idle,
    /// Recording open for a fence id
    Recording(FenceId),
}

/// A closed recording, ready for submission
#[derive(Debug)]
#[must_use = "a closed recording must be submitted or its fence is never resolved"]
pub struct Recording {
    fence: FenceId,
    commands: Vec<Command>,
}

impl Recording {
    /// Fence id that signals this recording
    pub fn fence(&self) -> FenceId {
        self.fence
    }

    /// Recorded commands, in execution order
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Number of commands
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Recorder statistics
#[derive(Debug, Clone, Default)]
pub struct RecorderStats {
    /// Recordings opened
    pub started: u64,
    /// Recordings discarded
    pub aborted: u64,
    /// Commands recorded
    pub commands: u64,
}

// =============================================================================
// COMMAND RECORDER
// =============================================================================

/// Per-device command recorder
#[derive(Debug, Default)]
pub struct CommandRecorder {
    state: RecorderState,
    commands: Vec<Command>,
    #[cfg(feature = "validation")]
    pipeline_bound: bool,
    stats: RecorderStats,
}

impl CommandRecorder {
    /// Create an idle recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// Whether a recording is open
    pub fn is_recording(&self) -> bool {
        matches!(self.state, RecorderState::Recording(_))
    }

    /// Open a recording on the next fence id
    ///
    /// Allocation may stall until the device frees a window slot. If the
    /// slot reset fails the id stays issued with nothing able to submit it;
    /// the caller must treat that as device loss.
    ///
    /// # Panics
    ///
    /// If a recording is already open.
    pub fn start<D: Driver + ?Sized>(
        &mut self,
        tracker: &mut FenceTracker,
        driver: &mut D,
    ) -> Result<FenceId> {
        if let RecorderState::Recording(open) = self.state {
            panic!("recording for fence {} is still open", open);
        }

        let fence = tracker.allocate_next(driver)?;
        driver.reset_fence(tracker.slot(fence))?;

        self.commands.clear();
        #[cfg(feature = "validation")]
        {
            self.pipeline_bound = false;
        }
        self.state = RecorderState::Recording(fence);
        self.stats.started += 1;
        log::trace!("recording opened for fence {}", fence);
        Ok(fence)
    }

    /// Append a command
    ///
    /// # Panics
    ///
    /// If no recording is open. With the `validation` feature, also when a
    /// dispatch is recorded before any pipeline was bound.
    pub fn record(&mut self, command: Command) {
        assert!(
            self.is_recording(),
            "{} recorded with no open recording",
            command.name()
        );

        self.validate(&command);
        self.commands.push(command);
        self.stats.commands += 1;
    }

    /// Close the open recording
    ///
    /// # Panics
    ///
    /// If no recording is open.
    pub fn end(&mut self) -> Recording {
        let RecorderState::Recording(fence) = self.state else {
            panic!("end called with no open recording");
        };
        self.state = RecorderState::Idle;
        Recording {
            fence,
            commands: core::mem::take(&mut self.commands),
        }
    }

    /// Close the open recording and drop its commands
    ///
    /// Returns the fence id, which the caller still has to resolve.
    ///
    /// # Panics
    ///
    /// If no recording is open.
    pub fn abort(&mut self) -> FenceId {
        let RecorderState::Recording(fence) = self.state else {
            panic!("abort called with no open recording");
        };
        log::debug!(
            "discarding {} recorded commands for fence {}",
            self.commands.len(),
            fence
        );
        self.commands.clear();
        self.state = RecorderState::Idle;
        self.stats.aborted += 1;
        fence
    }

    /// Get statistics
    pub fn stats(&self) -> &RecorderStats {
        &self.stats
    }

    #[cfg(feature = "validation")]
    fn validate(&mut self, command: &Command) {
        match command {
            Command::BindPipeline { .. } => self.pipeline_bound = true,
            Command::Dispatch(_) => {
                assert!(self.pipeline_bound, "dispatch recorded with no pipeline bound");
            }
            _ => {}
        }
    }

    #[cfg(not(feature = "validation"))]
    fn validate(&mut self, _command: &Command) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDriver;
    use basalt_core::{DispatchSize, RawPipeline};

    fn setup() -> (MockDriver, FenceTracker, CommandRecorder) {
        let mut driver = MockDriver::default();
        let tracker = FenceTracker::new(&mut driver, 3).unwrap();
        (driver, tracker, CommandRecorder::new())
    }

    #[test]
    fn test_start_resets_slot_fence() {
        let (mut driver, mut tracker, mut recorder) = setup();
        let fence = recorder.start(&mut tracker, &mut driver).unwrap();

        assert_eq!(fence, FenceId::new(1));
        assert_eq!(recorder.state(), RecorderState::Recording(fence));
        assert_eq!(driver.resets, alloc::vec![tracker.slot(fence)]);
    }

    #[test]
    fn test_commands_keep_order() {
        let (mut driver, mut tracker, mut recorder) = setup();
        recorder.start(&mut tracker, &mut driver).unwrap();

        let bind = Command::BindPipeline {
            pipeline: RawPipeline::new(9),
        };
        let dispatch = Command::Dispatch(DispatchSize {
            global: 64,
            local: 8,
        });
        recorder.record(bind);
        recorder.record(dispatch);

        let recording = recorder.end();
        assert_eq!(recording.commands(), &[bind, dispatch]);
        assert_eq!(recorder.state(), RecorderState::Idle);
    }

    #[test]
    fn test_abort_returns_fence() {
        let (mut driver, mut tracker, mut recorder) = setup();
        let fence = recorder.start(&mut tracker, &mut driver).unwrap();
        recorder.record(Command::BindPipeline {
            pipeline: RawPipeline::new(1),
        });

        assert_eq!(recorder.abort(), fence);
        assert!(!recorder.is_recording());
        assert_eq!(recorder.stats().aborted, 1);
    }

    #[test]
    #[should_panic(expected = "still open")]
    fn test_second_start_panics() {
        let (mut driver, mut tracker, mut recorder) = setup();
        recorder.start(&mut tracker, &mut driver).unwrap();
        let _ = recorder.start(&mut tracker, &mut driver);
    }

    #[test]
    #[should_panic(expected = "no open recording")]
    fn test_record_while_idle_panics() {
        let mut recorder = CommandRecorder::new();
        recorder.record(Command::Dispatch(DispatchSize { global: 1, local: 1 }));
    }

    #[cfg(feature = "validation")]
    #[test]
    #[should_panic(expected = "no pipeline bound")]
    fn test_unbound_dispatch_rejected() {
        let (mut driver, mut tracker, mut recorder) = setup();
        recorder.start(&mut tracker, &mut driver).unwrap();
        recorder.record(Command::Dispatch(DispatchSize { global: 1, local: 1 }));
    }
}
