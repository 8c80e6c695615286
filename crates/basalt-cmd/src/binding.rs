//! # Function Bindings
//!
//! The pipeline and binding set a function dispatches through. They are
//! created the first time the function executes and kept for its lifetime;
//! only the buffer slots are rewritten per dispatch.

use basalt_core::{
    Command, Driver, FenceId, RawBindingSet, RawBuffer, RawPipeline, RawShader, Result,
};

use crate::recorder::CommandRecorder;

/// Cached pipeline objects of one function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionBinding {
    pipeline: RawPipeline,
    binding_set: RawBindingSet,
    slots: u32,
    /// Last submission that used the binding set
    last_use: FenceId,
}

impl FunctionBinding {
    /// Create the binding set and pipeline for a shader
    pub fn create<D: Driver + ?Sized>(driver: &mut D, shader: RawShader, slots: u32) -> Result<Self> {
        let binding_set = driver.create_binding_set(slots)?;
        let pipeline = match driver.create_pipeline(shader, binding_set) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                driver.destroy_binding_set(binding_set);
                return Err(err);
            }
        };

        log::debug!(
            "created pipeline {:?} with {} binding slots",
            pipeline,
            slots
        );

        Ok(Self {
            pipeline,
            binding_set,
            slots,
            last_use: FenceId::NONE,
        })
    }

    /// Compute pipeline
    pub fn pipeline(&self) -> RawPipeline {
        self.pipeline
    }

    /// Binding set
    pub fn binding_set(&self) -> RawBindingSet {
        self.binding_set
    }

    /// Number of buffer slots
    pub fn slots(&self) -> u32 {
        self.slots
    }

    /// Last submission that used the binding set
    pub fn last_use(&self) -> FenceId {
        self.last_use
    }

    /// Record the submission that now uses the binding set
    pub fn set_last_use(&mut self, fence: FenceId) {
        self.last_use = fence;
    }

    /// Point a slot at a buffer
    ///
    /// The binding set must not be in use by a pending submission; wait for
    /// [`last_use`](Self::last_use) first.
    pub fn bind<D: Driver + ?Sized>(&self, driver: &mut D, slot: u32, buffer: RawBuffer) -> Result<()> {
        debug_assert!(slot < self.slots);
        driver.update_binding(self.binding_set, slot, buffer)
    }

    /// Record the pipeline and binding set binds
    pub fn record_bind(&self, recorder: &mut CommandRecorder) {
        recorder.record(Command::BindPipeline {
            pipeline: self.pipeline,
        });
        recorder.record(Command::BindBindingSet {
            set: self.binding_set,
            index: 0,
        });
    }

    /// Release the pipeline objects
    pub fn destroy<D: Driver + ?Sized>(self, driver: &mut D) {
        driver.destroy_pipeline(self.pipeline);
        driver.destroy_binding_set(self.binding_set);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDriver;
    use basalt_core::{Error, FenceTracker};

    #[test]
    fn test_create_and_bind() {
        let mut driver = MockDriver::default();
        let binding = FunctionBinding::create(&mut driver, RawShader::new(100), 2).unwrap();

        binding.bind(&mut driver, 0, RawBuffer::new(7)).unwrap();
        binding.bind(&mut driver, 1, RawBuffer::new(8)).unwrap();

        assert_eq!(driver.pipelines_created, 1);
        assert_eq!(
            driver.bindings,
            alloc::vec![
                (binding.binding_set(), 0, RawBuffer::new(7)),
                (binding.binding_set(), 1, RawBuffer::new(8)),
            ]
        );
        assert!(binding.last_use().is_none());
    }

    #[test]
    fn test_failed_pipeline_releases_set() {
        let mut driver = MockDriver {
            fail_pipeline: true,
            ..Default::default()
        };
        let err = FunctionBinding::create(&mut driver, RawShader::new(1), 1).unwrap_err();
        assert_eq!(err, Error::PipelineCreationFailed);
        assert_eq!(driver.destroyed_sets, 1);
    }

    #[test]
    fn test_record_bind_order() {
        let mut driver = MockDriver::default();
        let mut tracker = FenceTracker::new(&mut driver, 2).unwrap();
        let mut recorder = CommandRecorder::new();
        let binding = FunctionBinding::create(&mut driver, RawShader::new(1), 1).unwrap();

        recorder.start(&mut tracker, &mut driver).unwrap();
        binding.record_bind(&mut recorder);
        let recording = recorder.end();

        assert_eq!(
            recording.commands(),
            &[
                Command::BindPipeline {
                    pipeline: binding.pipeline()
                },
                Command::BindBindingSet {
                    set: binding.binding_set(),
                    index: 0
                },
            ]
        );
    }

    #[test]
    fn test_destroy_releases_objects() {
        let mut driver = MockDriver::default();
        let binding = FunctionBinding::create(&mut driver, RawShader::new(1), 3).unwrap();
        binding.destroy(&mut driver);
        assert_eq!(driver.destroyed_pipelines, 1);
        assert_eq!(driver.destroyed_sets, 1);
    }
}
