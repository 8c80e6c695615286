//! # Native Backend
//!
//! A device driven through discrete command buffers and fences.
//!
//! Every operation follows the same path:
//!
//! 1. Check the target buffers against their last writer
//! 2. Open a recording on the next fence id (stalls while the window is full)
//! 3. Record the operation's barriers, copies and dispatch
//! 4. Close and submit the recording with its slot fence
//! 5. Block on the fence, or hand the caller an [`Event`] for it
//!
//! Transfers go through host-visible staging buffers. Staging, deleted
//! buffers and abandoned readbacks are only released once the fence of
//! their last use has passed.

mod execute;
mod proxy;
mod transfer;

use alloc::vec::Vec;

use hashbrown::HashMap;

use basalt_cmd::{CommandRecorder, FunctionBinding, QueueStats, SubmissionQueue};
use basalt_core::{
    BufferFlags, DeviceId, DeviceSpec, Driver, Error, FenceId, FenceTracker, FunctionId,
    MapAccess, QueueId, RawShader, ReadbackId, Result,
};
use basalt_mem::{BufferTable, Mapping, PendingReadback, RetireKind};

use crate::buffer::Buffer;
use crate::config::DeviceConfig;
use crate::device::{Completion, Device, Platform, next_device_id};
use crate::event::{Event, EventSource, Readback, ReadbackLease};
use crate::function::Function;

/// Device-side state of a created function
#[derive(Debug)]
struct FunctionRecord {
    shader: RawShader,
    parameter_count: u32,
    /// Created on first execute
    binding: Option<FunctionBinding>,
}

impl FunctionRecord {
    fn destroy<D: Driver>(&self, driver: &mut D) {
        if let Some(binding) = self.binding {
            binding.destroy(driver);
        }
        driver.destroy_shader(self.shader);
    }
}

/// Staging of an asynchronous read, owned until completed or abandoned
#[derive(Debug)]
struct AsyncRead {
    pending: PendingReadback,
    lease: ReadbackLease,
}

// =============================================================================
// NATIVE DEVICE
// =============================================================================

/// Device on a native [`Driver`]
#[derive(Debug)]
pub struct NativeDevice<D: Driver> {
    id: DeviceId,
    config: DeviceConfig,
    spec: DeviceSpec,
    driver: D,
    tracker: FenceTracker,
    recorder: CommandRecorder,
    queue: SubmissionQueue,
    buffers: BufferTable,
    functions: HashMap<FunctionId, FunctionRecord>,
    readbacks: HashMap<ReadbackId, AsyncRead>,
    /// Deleted functions whose last dispatch has not completed
    retired_functions: Vec<(FenceId, FunctionRecord)>,
    next_function: u64,
    next_readback: u64,
    closed: bool,
}

impl<D: Driver> NativeDevice<D> {
    /// Create a device on `driver`
    pub fn new(mut driver: D, config: DeviceConfig) -> Result<Self> {
        config.validate()?;

        let spec = driver.spec().clone();
        let tracker = FenceTracker::new(&mut driver, config.fence_window)?;
        let queue = SubmissionQueue::new(driver.queue_family_index());
        let id = next_device_id();

        log::debug!(
            "native device {:?} '{}' on {} ({} fence slots)",
            id,
            config.display_label(),
            spec.name,
            config.fence_window
        );

        Ok(Self {
            id,
            config,
            spec,
            driver,
            tracker,
            recorder: CommandRecorder::new(),
            queue,
            buffers: BufferTable::new(),
            functions: HashMap::new(),
            readbacks: HashMap::new(),
            retired_functions: Vec::new(),
            next_function: 0,
            next_readback: 0,
            closed: false,
        })
    }

    /// Configuration the device was created with
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Underlying driver
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Underlying driver, mutably (backend-specific control)
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Fence timeline of the device
    pub fn tracker(&self) -> &FenceTracker {
        &self.tracker
    }

    /// Submission statistics
    pub fn queue_stats(&self) -> &QueueStats {
        self.queue.stats()
    }

    /// Whether the device was lost
    pub fn is_lost(&self) -> bool {
        self.queue.is_lost()
    }

    /// Raw buffers waiting for the device before they can be released
    pub fn retired_buffers(&self) -> usize {
        self.buffers.retired_count()
    }

    /// Cached pipeline objects of `function`, once it has executed
    pub fn function_binding(&self, function: &Function) -> Option<FunctionBinding> {
        self.functions.get(&function.id())?.binding
    }

    /// Finish all work and release every backend object
    ///
    /// The device accepts no further work afterwards. Dropping the device
    /// does the same, logging instead of returning errors.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        let drained = if self.queue.is_lost() {
            Err(Error::DeviceLost)
        } else {
            self.finish_queue(QueueId::DEFAULT)
        };

        for raw in self.buffers.drain() {
            self.driver.destroy_buffer(raw);
        }
        for (_, read) in self.readbacks.drain() {
            self.driver.destroy_buffer(read.pending.staging);
        }
        for (_, record) in self.functions.drain() {
            record.destroy(&mut self.driver);
        }
        for (_, record) in self.retired_functions.drain(..) {
            record.destroy(&mut self.driver);
        }
        self.tracker.release(&mut self.driver);
        self.closed = true;

        log::debug!("native device {:?} shut down", self.id);
        drained
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn ensure_usable(&self, queue: QueueId) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidState);
        }
        if self.queue.is_lost() {
            return Err(Error::DeviceLost);
        }
        self.spec.check_queue(queue)
    }

    fn check_device(&self, device: DeviceId) -> Result<()> {
        if device == self.id {
            Ok(())
        } else {
            Err(Error::DeviceMismatch)
        }
    }

    /// Fold a backend result into the device state
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if matches!(result, Err(Error::DeviceLost)) {
            self.queue.mark_lost();
        }
        result
    }

    /// Release retired objects whose fence has passed
    fn reclaim(&mut self) {
        self.sweep_readbacks();

        let completed = self.tracker.completed();
        for raw in self.buffers.collect(completed) {
            self.driver.destroy_buffer(raw);
        }

        let driver = &mut self.driver;
        self.retired_functions.retain(|(last_use, record)| {
            if *last_use <= completed {
                record.destroy(driver);
                false
            } else {
                true
            }
        });
    }

    /// Retire the staging of readbacks the caller dropped
    fn sweep_readbacks(&mut self) {
        let buffers = &mut self.buffers;
        self.readbacks.retain(|id, read| {
            if !read.lease.is_abandoned() {
                return true;
            }
            log::trace!("readback {:?} dropped before completion", id);
            buffers.retire(read.pending.staging, read.pending.fence, RetireKind::Staging);
            false
        });
    }

    /// Block until `fence` has completed
    fn wait(&mut self, fence: FenceId) -> Result<()> {
        if self.tracker.has_passed(fence) {
            return Ok(());
        }
        let waited = self.tracker.wait_for(&mut self.driver, fence);
        let waited = self.settle(waited);
        self.reclaim();
        waited
    }

    /// Open a recording on the next fence id
    fn begin(&mut self) -> Result<FenceId> {
        match self.recorder.start(&mut self.tracker, &mut self.driver) {
            Ok(fence) => {
                self.reclaim();
                Ok(fence)
            }
            Err(err) => {
                if self.tracker.issued() != self.tracker.submitted() {
                    // The id was issued but its slot could not be reset
                    self.queue.mark_lost();
                }
                self.settle(Err(err))
            }
        }
    }

    /// Record one unit of work with `build` and submit it
    ///
    /// If `build` fails, nothing it recorded is submitted.
    fn submit_with<F>(&mut self, build: F) -> Result<FenceId>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.begin()?;

        if let Err(err) = build(self) {
            let abandoned =
                self.queue
                    .abandon(&mut self.driver, &mut self.tracker, &mut self.recorder);
            if let Err(lost) = abandoned {
                log::error!("discarded recording could not be resolved: {}", lost);
            }
            return self.settle(Err(err));
        }

        let submitted =
            self.queue
                .end_recording(&mut self.driver, &mut self.tracker, &mut self.recorder, false);
        self.settle(submitted)
    }

    /// Block on `fence` or wrap it in an event
    fn complete(&mut self, fence: FenceId, completion: Completion) -> Result<Option<Event>> {
        match completion {
            Completion::Block => {
                self.wait(fence)?;
                Ok(None)
            }
            Completion::Event => Ok(Some(Event::fence(self.id, fence))),
        }
    }

    // =========================================================================
    // Queue and events
    // =========================================================================

    fn flush_queue(&mut self, queue: QueueId) -> Result<()> {
        self.ensure_usable(queue)?;
        if self.recorder.is_recording() {
            let submitted =
                self.queue
                    .end_recording(&mut self.driver, &mut self.tracker, &mut self.recorder, false);
            self.settle(submitted)?;
        }
        Ok(())
    }

    fn finish_queue(&mut self, queue: QueueId) -> Result<()> {
        self.flush_queue(queue)?;
        let last = self.tracker.issued();
        self.wait(last)?;
        self.reclaim();
        Ok(())
    }

    fn event_fence(&self, event: &Event) -> Result<FenceId> {
        self.check_device(event.device())?;
        match event.source() {
            EventSource::Fence(fence) => Ok(fence),
            EventSource::Backend(_) => Err(Error::InvalidParameter),
        }
    }

    fn wait_event(&mut self, event: &Event) -> Result<()> {
        let fence = self.event_fence(event)?;
        if self.tracker.has_passed(fence) {
            return Ok(());
        }
        if self.queue.is_lost() {
            return Err(Error::DeviceLost);
        }
        self.wait(fence)
    }

    fn poll_event(&mut self, event: &Event) -> Result<bool> {
        let fence = self.event_fence(event)?;
        if self.tracker.has_passed(fence) {
            return Ok(true);
        }
        if self.queue.is_lost() {
            return Err(Error::DeviceLost);
        }
        let polled = self.tracker.poll(&mut self.driver);
        self.settle(polled)?;
        self.reclaim();
        Ok(self.tracker.has_passed(fence))
    }
}

impl<D: Driver> Drop for NativeDevice<D> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!("device {:?} teardown: {}", self.id, err);
        }
    }
}

// =============================================================================
// DEVICE IMPLEMENTATION
// =============================================================================

impl<D: Driver> Device for NativeDevice<D> {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn platform(&self) -> Platform {
        Platform::Native
    }

    fn spec(&self) -> &DeviceSpec {
        &self.spec
    }

    fn create_buffer(&mut self, size: usize, flags: BufferFlags, init: Option<&[u8]>) -> Result<Buffer> {
        self.allocate_buffer(size, flags, init)
    }

    fn delete_buffer(&mut self, buffer: Buffer) -> Result<()> {
        self.release_buffer(buffer)
    }

    fn read_buffer(&mut self, buffer: &Buffer, queue: QueueId, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.read_range(buffer, queue, offset, dst)
    }

    fn read_buffer_async(
        &mut self,
        buffer: &Buffer,
        queue: QueueId,
        offset: usize,
        size: usize,
    ) -> Result<Readback> {
        self.read_range_async(buffer, queue, offset, size)
    }

    fn complete_read(&mut self, readback: Readback, dst: &mut [u8]) -> Result<()> {
        self.collect_read(readback, dst)
    }

    fn write_buffer(
        &mut self,
        buffer: &Buffer,
        queue: QueueId,
        offset: usize,
        src: &[u8],
        completion: Completion,
    ) -> Result<Option<Event>> {
        self.write_range(buffer, queue, offset, src, completion)
    }

    fn map_buffer(
        &mut self,
        buffer: &Buffer,
        queue: QueueId,
        offset: usize,
        size: usize,
        access: MapAccess,
        completion: Completion,
    ) -> Result<(Mapping, Option<Event>)> {
        self.map_range(buffer, queue, offset, size, access, completion)
    }

    fn mapped(&mut self, mapping: &Mapping) -> Result<&[u8]> {
        self.mapped_bytes(mapping)
    }

    fn mapped_mut(&mut self, mapping: &Mapping) -> Result<&mut [u8]> {
        self.mapped_bytes_mut(mapping)
    }

    fn unmap_buffer(
        &mut self,
        buffer: &Buffer,
        queue: QueueId,
        mapping: Mapping,
        completion: Completion,
    ) -> Result<Option<Event>> {
        self.unmap_range(buffer, queue, mapping, completion)
    }

    fn create_function(&mut self, entry_point: &str, code: &[u8], parameter_count: u32) -> Result<Function> {
        self.compile(entry_point, code, parameter_count)
    }

    fn delete_function(&mut self, function: Function) -> Result<()> {
        self.release_function(function)
    }

    fn execute(
        &mut self,
        function: &mut Function,
        queue: QueueId,
        global_size: usize,
        local_size: usize,
        completion: Completion,
    ) -> Result<Option<Event>> {
        self.dispatch(function, queue, global_size, local_size, completion)
    }

    fn flush(&mut self, queue: QueueId) -> Result<()> {
        self.flush_queue(queue)
    }

    fn finish(&mut self, queue: QueueId) -> Result<()> {
        self.finish_queue(queue)
    }

    fn wait_for_event(&mut self, event: &Event) -> Result<()> {
        self.wait_event(event)
    }

    fn is_event_complete(&mut self, event: &Event) -> Result<bool> {
        self.poll_event(event)
    }

    fn delete_event(&mut self, event: Event) -> Result<()> {
        self.event_fence(&event).map(|_| ())
    }
}

#[cfg(all(test, feature = "soft"))]
mod tests {
    use super::*;
    use crate::soft::{ExecutionMode, SoftDriver};
    use alloc::vec;
    use alloc::vec::Vec;
    use basalt_core::DispatchSize;

    const Q: QueueId = QueueId::DEFAULT;

    fn add_one(buffers: &mut [Vec<u8>], size: DispatchSize) {
        for byte in buffers[0].iter_mut().take(size.global as usize) {
            *byte = byte.wrapping_add(1);
        }
    }

    fn device(mode: ExecutionMode) -> NativeDevice<SoftDriver> {
        let driver = SoftDriver::new(mode).with_kernel("add_one", add_one);
        NativeDevice::new(driver, DeviceConfig::default().with_label("test")).unwrap()
    }

    fn read_all(device: &mut NativeDevice<SoftDriver>, buffer: &Buffer) -> Vec<u8> {
        let mut out = vec![0u8; buffer.size()];
        device.read_buffer(buffer, Q, 0, &mut out).unwrap();
        out
    }

    #[test]
    fn test_write_event_then_read() {
        let mut device = device(ExecutionMode::Immediate);
        let buffer = device
            .create_buffer(4096, BufferFlags::READ_WRITE, None)
            .unwrap();
        let data: Vec<u8> = (0..4096).map(|i| (i % 256) as u8).collect();

        let event = device
            .write_buffer(&buffer, Q, 0, &data, Completion::Event)
            .unwrap()
            .unwrap();
        device.wait_for_event(&event).unwrap();
        assert!(device.is_event_complete(&event).unwrap());
        device.delete_event(event).unwrap();

        assert_eq!(read_all(&mut device, &buffer), data);
        device.delete_buffer(buffer).unwrap();
        assert_eq!(device.driver().live_buffers(), 0);
    }

    #[test]
    fn test_window_bounds_outstanding_work() {
        let mut device = device(ExecutionMode::Deferred);
        let buffer = device.create_buffer(64, BufferFlags::READ_WRITE, None).unwrap();

        for i in 0..8u8 {
            let event = device
                .write_buffer(&buffer, Q, 0, &[i; 64], Completion::Event)
                .unwrap()
                .unwrap();
            device.delete_event(event).unwrap();

            let tracker = device.tracker();
            assert!(tracker.issued().raw() - tracker.completed().raw() <= 3);
            assert!(device.driver().pending_submissions() <= 3);
        }
        assert_eq!(device.tracker().stats().stalls, 5);

        device.finish(Q).unwrap();
        assert_eq!(read_all(&mut device, &buffer), [7u8; 64]);
    }

    #[test]
    fn test_finish_leaves_nothing_open() {
        let mut device = device(ExecutionMode::Deferred);
        let buffer = device.create_buffer(16, BufferFlags::READ_WRITE, None).unwrap();
        for _ in 0..2 {
            let event = device
                .write_buffer(&buffer, Q, 0, &[3; 16], Completion::Event)
                .unwrap()
                .unwrap();
            device.delete_event(event).unwrap();
        }

        device.flush(Q).unwrap();
        assert_eq!(device.driver().pending_submissions(), 2);

        device.finish(Q).unwrap();
        assert!(!device.recorder.is_recording());
        assert_eq!(device.tracker().completed(), device.tracker().issued());
        assert_eq!(device.driver().pending_submissions(), 0);
        assert_eq!(device.retired_buffers(), 0);
    }

    #[test]
    fn test_delete_in_flight_buffer_is_deferred() {
        let mut device = device(ExecutionMode::Deferred);
        let buffer = device.create_buffer(256, BufferFlags::READ_WRITE, None).unwrap();
        let event = device
            .write_buffer(&buffer, Q, 0, &[9; 256], Completion::Event)
            .unwrap()
            .unwrap();

        device.delete_buffer(buffer).unwrap();
        assert_eq!(device.retired_buffers(), 2);
        assert_eq!(device.driver().live_buffers(), 2);
        assert_eq!(device.buffers.stats().deferred_frees, 1);

        device.wait_for_event(&event).unwrap();
        device.delete_event(event).unwrap();
        assert_eq!(device.retired_buffers(), 0);
        assert_eq!(device.driver().live_buffers(), 0);
    }

    #[test]
    fn test_pipeline_cached_bindings_fresh() {
        let mut device = device(ExecutionMode::Deferred);
        let a = device
            .create_buffer(4, BufferFlags::READ_WRITE, Some(&[1, 2, 3, 4]))
            .unwrap();
        let b = device
            .create_buffer(4, BufferFlags::READ_WRITE, Some(&[10, 20, 30, 40]))
            .unwrap();
        let mut function = device.create_function("add_one", &[], 1).unwrap();

        function.set_buffer(0, &a).unwrap();
        let first = device
            .execute(&mut function, Q, 4, 1, Completion::Event)
            .unwrap()
            .unwrap();
        assert_eq!(function.argument(0), None);
        let binding = device.function_binding(&function).unwrap();

        function.set_buffer(0, &b).unwrap();
        let second = device
            .execute(&mut function, Q, 4, 1, Completion::Event)
            .unwrap()
            .unwrap();

        let cached = device.function_binding(&function).unwrap();
        assert_eq!(cached.pipeline(), binding.pipeline());
        assert_eq!(cached.binding_set(), binding.binding_set());
        assert_eq!(device.driver().stats().pipelines_created, 1);
        assert_eq!(device.driver().stats().binding_updates, 2);

        let events = [first, second];
        device.wait_for_multiple_events(&events).unwrap();
        for event in events {
            device.delete_event(event).unwrap();
        }

        assert_eq!(read_all(&mut device, &a), [2, 3, 4, 5]);
        assert_eq!(read_all(&mut device, &b), [11, 21, 31, 41]);
    }

    #[test]
    fn test_execute_requires_every_argument() {
        let mut device = device(ExecutionMode::Immediate);
        let mut function = device.create_function("add_one", &[], 1).unwrap();

        assert_eq!(
            device.execute(&mut function, Q, 4, 1, Completion::Block),
            Err(Error::MissingArgument(0))
        );
        assert_eq!(
            device.execute(&mut function, Q, 4, 0, Completion::Block),
            Err(Error::InvalidParameter)
        );
        assert_eq!(
            device.execute(&mut function, Q, 4, 512, Completion::Block),
            Err(Error::InvalidParameter)
        );
        assert_eq!(device.tracker().issued(), FenceId::NONE);
    }

    #[test]
    fn test_delete_function_waits_for_last_dispatch() {
        let mut device = device(ExecutionMode::Deferred);
        let buffer = device.create_buffer(4, BufferFlags::READ_WRITE, None).unwrap();
        let mut function = device.create_function("add_one", &[], 1).unwrap();
        function.set_buffer(0, &buffer).unwrap();
        let event = device
            .execute(&mut function, Q, 4, 1, Completion::Event)
            .unwrap()
            .unwrap();

        device.delete_function(function).unwrap();
        assert_eq!(device.driver().pending_submissions(), 0);
        assert_eq!(device.driver().live_pipelines(), 0);
        assert_eq!(device.driver().live_shaders(), 0);
        assert!(device.is_event_complete(&event).unwrap());
        device.delete_event(event).unwrap();
    }

    #[test]
    fn test_failed_delete_function_retires_objects() {
        let mut device = device(ExecutionMode::Deferred);
        let buffer = device.create_buffer(4, BufferFlags::READ_WRITE, None).unwrap();
        let mut function = device.create_function("add_one", &[], 1).unwrap();
        function.set_buffer(0, &buffer).unwrap();
        let event = device
            .execute(&mut function, Q, 4, 1, Completion::Event)
            .unwrap()
            .unwrap();

        device.driver.fail_next_wait(Error::Backend(-1));
        assert_eq!(device.delete_function(function), Err(Error::Backend(-1)));
        assert!(!device.queue.is_lost());
        assert_eq!(device.retired_functions.len(), 1);
        assert_eq!(device.driver().live_pipelines(), 1);

        device.finish(Q).unwrap();
        assert!(device.retired_functions.is_empty());
        assert_eq!(device.driver().live_pipelines(), 0);
        assert_eq!(device.driver().live_shaders(), 0);
        assert_eq!(device.driver().live_binding_sets(), 0);
        device.delete_event(event).unwrap();
    }

    #[test]
    fn test_value_arguments_unsupported() {
        let mut device = device(ExecutionMode::Immediate);
        let buffer = device.create_buffer(4, BufferFlags::READ_WRITE, None).unwrap();
        let mut function = device.create_function("add_one", &[], 2).unwrap();

        function.set_buffer(0, &buffer).unwrap();
        function.set_arg(1, &[1, 0, 0, 0]).unwrap();
        assert_eq!(
            device.execute(&mut function, Q, 4, 1, Completion::Block),
            Err(Error::Unsupported)
        );
        function.set_shared_memory(1, 64).unwrap();
        assert_eq!(
            device.execute(&mut function, Q, 4, 1, Completion::Block),
            Err(Error::Unsupported)
        );
        assert_eq!(device.tracker().issued(), FenceId::NONE);
    }

    #[test]
    fn test_read_only_unmap_has_no_traffic() {
        let mut device = device(ExecutionMode::Immediate);
        let buffer = device
            .create_buffer(16, BufferFlags::READ_WRITE, Some(&[7; 16]))
            .unwrap();
        let copies = device.driver().stats().copies_to_device;

        let (mapping, event) = device
            .map_buffer(&buffer, Q, 4, 8, MapAccess::READ, Completion::Block)
            .unwrap();
        assert!(event.is_none());
        assert_eq!(device.mapped(&mapping).unwrap(), &[7u8; 8][..]);
        assert!(matches!(
            device.mapped_mut(&mapping),
            Err(Error::AccessDenied)
        ));

        let submissions = device.queue_stats().submissions;
        let done = device
            .unmap_buffer(&buffer, Q, mapping, Completion::Block)
            .unwrap();
        assert!(done.is_none());
        assert_eq!(device.driver().stats().copies_to_device, copies);
        assert_eq!(device.queue_stats().submissions, submissions);
    }

    #[test]
    fn test_map_round_trip_with_events() {
        let mut device = device(ExecutionMode::Deferred);
        let buffer = device.create_buffer(32, BufferFlags::READ_WRITE, None).unwrap();

        let (mapping, event) = device
            .map_buffer(&buffer, Q, 0, 32, MapAccess::WRITE, Completion::Event)
            .unwrap();
        let event = event.unwrap();
        assert!(device.is_event_complete(&event).unwrap());
        device.delete_event(event).unwrap();

        device.mapped_mut(&mapping).unwrap().copy_from_slice(&[0xAB; 32]);
        let event = device
            .unmap_buffer(&buffer, Q, mapping, Completion::Event)
            .unwrap()
            .unwrap();
        assert!(!device.is_event_complete(&event).unwrap());
        device.wait_for_event(&event).unwrap();
        device.delete_event(event).unwrap();

        let (mapping, event) = device
            .map_buffer(&buffer, Q, 8, 8, MapAccess::READ, Completion::Event)
            .unwrap();
        let event = event.unwrap();
        assert_eq!(device.mapped(&mapping).unwrap(), &[0xAB; 8][..]);
        assert!(device.is_event_complete(&event).unwrap());
        device.delete_event(event).unwrap();

        let done = device
            .unmap_buffer(&buffer, Q, mapping, Completion::Block)
            .unwrap();
        assert!(done.is_none());
    }

    #[test]
    fn test_read_write_map_keeps_untouched_bytes() {
        let mut device = device(ExecutionMode::Immediate);
        let init: Vec<u8> = (0..16).collect();
        let buffer = device
            .create_buffer(16, BufferFlags::READ_WRITE, Some(&init))
            .unwrap();

        let (mapping, _) = device
            .map_buffer(&buffer, Q, 0, 16, MapAccess::READ_WRITE, Completion::Block)
            .unwrap();
        device.mapped_mut(&mapping).unwrap()[0] = 0xFF;
        assert_eq!(
            device.write_buffer(&buffer, Q, 0, &[1], Completion::Block),
            Err(Error::BufferMapped)
        );
        device
            .unmap_buffer(&buffer, Q, mapping, Completion::Block)
            .unwrap();

        let mut expected = init.clone();
        expected[0] = 0xFF;
        assert_eq!(read_all(&mut device, &buffer), expected);
    }

    #[test]
    fn test_async_read() {
        let mut device = device(ExecutionMode::Deferred);
        let buffer = device
            .create_buffer(8, BufferFlags::READ_WRITE, Some(&[5; 8]))
            .unwrap();

        let readback = device.read_buffer_async(&buffer, Q, 2, 4).unwrap();
        assert_eq!(readback.len(), 4);
        assert!(!device.is_event_complete(readback.event()).unwrap());

        let mut out = [0u8; 4];
        device.complete_read(readback, &mut out).unwrap();
        assert_eq!(out, [5; 4]);
        assert_eq!(device.driver().live_buffers(), 1);

        let readback = device.read_buffer_async(&buffer, Q, 0, 8).unwrap();
        assert_eq!(
            device.complete_read(readback, &mut [0u8; 3]),
            Err(Error::InvalidParameter)
        );
    }

    #[test]
    fn test_dropped_readback_releases_staging() {
        for mode in [ExecutionMode::Immediate, ExecutionMode::Deferred] {
            let mut device = device(mode);
            let buffer = device.create_buffer(64, BufferFlags::READ_WRITE, None).unwrap();

            for _ in 0..100 {
                drop(device.read_buffer_async(&buffer, Q, 0, 64).unwrap());
            }
            assert_eq!(device.readbacks.len(), 1);

            device.finish(Q).unwrap();
            assert!(device.readbacks.is_empty());
            assert_eq!(device.retired_buffers(), 0);
            assert_eq!(device.driver().live_buffers(), 1);
        }
    }

    #[test]
    fn test_argument_errors() {
        let mut device = device(ExecutionMode::Immediate);
        assert_eq!(
            device.create_buffer(0, BufferFlags::READ, None),
            Err(Error::InvalidParameter)
        );
        assert_eq!(
            device.create_buffer(4, BufferFlags::READ, Some(&[1, 2])),
            Err(Error::InvalidParameter)
        );

        let buffer = device.create_buffer(8, BufferFlags::READ, None).unwrap();
        let mut out = [0u8; 4];
        assert_eq!(
            device.read_buffer(&buffer, Q, 6, &mut out),
            Err(Error::OutOfBounds)
        );
        assert_eq!(
            device.read_buffer(&buffer, QueueId::new(1), 0, &mut out),
            Err(Error::InvalidQueue(1))
        );
        assert!(matches!(
            device.map_buffer(&buffer, Q, 0, 4, MapAccess::empty(), Completion::Block),
            Err(Error::InvalidParameter)
        ));
        assert_eq!(device.platform(), Platform::Native);
        assert_eq!(device.spec().name, "BASALT Soft Device");
    }

    #[test]
    fn test_foreign_handles_rejected() {
        let mut first = device(ExecutionMode::Immediate);
        let mut second = device(ExecutionMode::Immediate);
        assert_ne!(first.id(), second.id());

        let buffer = first.create_buffer(8, BufferFlags::READ_WRITE, None).unwrap();
        assert_eq!(
            second.write_buffer(&buffer, Q, 0, &[0; 8], Completion::Block),
            Err(Error::DeviceMismatch)
        );

        let event = first
            .write_buffer(&buffer, Q, 0, &[1; 8], Completion::Event)
            .unwrap()
            .unwrap();
        assert_eq!(second.wait_for_event(&event), Err(Error::DeviceMismatch));
        assert_eq!(
            second.wait_for_multiple_events(core::slice::from_ref(&event)),
            Err(Error::DeviceMismatch)
        );
        first.delete_event(event).unwrap();
    }

    #[test]
    #[should_panic(expected = "already mapped")]
    fn test_double_map_panics() {
        let mut device = device(ExecutionMode::Immediate);
        let buffer = device.create_buffer(8, BufferFlags::READ_WRITE, None).unwrap();
        let (_first, _) = device
            .map_buffer(&buffer, Q, 0, 8, MapAccess::WRITE, Completion::Block)
            .unwrap();
        let _ = device.map_buffer(&buffer, Q, 0, 4, MapAccess::READ, Completion::Block);
    }

    #[test]
    #[should_panic(expected = "unmap token")]
    fn test_unmap_with_wrong_buffer_panics() {
        let mut device = device(ExecutionMode::Immediate);
        let a = device.create_buffer(8, BufferFlags::READ_WRITE, None).unwrap();
        let b = device.create_buffer(8, BufferFlags::READ_WRITE, None).unwrap();
        let (mapping, _) = device
            .map_buffer(&a, Q, 0, 8, MapAccess::WRITE, Completion::Block)
            .unwrap();
        let _ = device.unmap_buffer(&b, Q, mapping, Completion::Block);
    }

    #[test]
    fn test_failed_submission_keeps_timeline() {
        let mut device = device(ExecutionMode::Immediate);
        let buffer = device.create_buffer(4, BufferFlags::READ_WRITE, None).unwrap();

        device.driver_mut().fail_next_submit(Error::SubmissionFailed);
        assert_eq!(
            device.write_buffer(&buffer, Q, 0, &[1; 4], Completion::Block),
            Err(Error::SubmissionFailed)
        );
        assert!(!device.is_lost());
        assert_eq!(device.queue_stats().empty_resubmissions, 1);
        assert_eq!(device.tracker().submitted(), device.tracker().issued());

        device
            .write_buffer(&buffer, Q, 0, &[2; 4], Completion::Block)
            .unwrap();
        assert_eq!(read_all(&mut device, &buffer), [2; 4]);
    }

    #[test]
    fn test_device_lost_is_sticky() {
        let mut device = device(ExecutionMode::Immediate);
        let buffer = device.create_buffer(4, BufferFlags::READ_WRITE, None).unwrap();

        device.driver_mut().fail_next_submit(Error::SubmissionFailed);
        device.driver_mut().fail_next_submit(Error::SubmissionFailed);
        assert_eq!(
            device.write_buffer(&buffer, Q, 0, &[1; 4], Completion::Block),
            Err(Error::DeviceLost)
        );
        assert!(device.is_lost());

        assert_eq!(
            device.write_buffer(&buffer, Q, 0, &[1; 4], Completion::Block),
            Err(Error::DeviceLost)
        );
        assert_eq!(device.finish(Q), Err(Error::DeviceLost));
        device.delete_buffer(buffer).unwrap();
        assert_eq!(device.shutdown(), Err(Error::DeviceLost));
        assert_eq!(device.driver().live_fences(), 0);
    }

    #[test]
    fn test_backend_loss_reported() {
        let mut device = device(ExecutionMode::Immediate);
        let buffer = device.create_buffer(4, BufferFlags::READ_WRITE, None).unwrap();
        device.driver_mut().lose_device();

        assert_eq!(
            device.write_buffer(&buffer, Q, 0, &[1; 4], Completion::Block),
            Err(Error::DeviceLost)
        );
        assert!(device.is_lost());
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let mut device = device(ExecutionMode::Deferred);
        let buffer = device
            .create_buffer(64, BufferFlags::READ_WRITE, Some(&[1; 64]))
            .unwrap();
        let mut function = device.create_function("add_one", &[], 1).unwrap();
        function.set_buffer(0, &buffer).unwrap();
        let event = device
            .execute(&mut function, Q, 64, 8, Completion::Event)
            .unwrap()
            .unwrap();
        device.delete_event(event).unwrap();
        let event = device
            .write_buffer(&buffer, Q, 0, &[2; 64], Completion::Event)
            .unwrap()
            .unwrap();
        device.delete_event(event).unwrap();
        let _mapping = device
            .map_buffer(&buffer, Q, 0, 8, MapAccess::READ, Completion::Event)
            .unwrap();

        device.shutdown().unwrap();
        let driver = device.driver();
        assert_eq!(driver.pending_submissions(), 0);
        assert_eq!(driver.live_buffers(), 0);
        assert_eq!(driver.live_fences(), 0);
        assert_eq!(driver.live_shaders(), 0);
        assert_eq!(driver.live_pipelines(), 0);
        assert_eq!(driver.live_binding_sets(), 0);

        assert_eq!(
            device.create_buffer(4, BufferFlags::READ, None),
            Err(Error::InvalidState)
        );
    }
}
