//! # Device Interface
//!
//! The object-safe trait every backend implements.
//!
//! Calls that touch the device take `&mut self`: one submitter per device.
//! Handles carry their device id and are rejected with
//! [`Error::DeviceMismatch`] by any other device.

use core::sync::atomic::{AtomicU64, Ordering};

use basalt_core::{BufferFlags, DeviceId, DeviceSpec, Error, MapAccess, QueueId, Result};
use basalt_mem::Mapping;

use crate::buffer::Buffer;
use crate::event::{Event, Readback};
use crate::function::Function;

// =============================================================================
// COMPLETION / PLATFORM
// =============================================================================

/// How an asynchronous call reports completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Completion {
    /// Return once the work has finished
    #[default]
    Block,
    /// Return at once with an [`Event`]
    Event,
}

/// Backend kind of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    /// Operations forwarded to a function table
    FunctionTable,
    /// Command buffers and fences on a native driver
    Native,
}

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique device id
pub(crate) fn next_device_id() -> DeviceId {
    DeviceId::new(NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed))
}

// =============================================================================
// DEVICE TRAIT
// =============================================================================

/// A compute device
pub trait Device {
    /// Process-unique id of this device
    fn id(&self) -> DeviceId;

    /// Backend kind
    fn platform(&self) -> Platform;

    /// Device capabilities
    fn spec(&self) -> &DeviceSpec;

    /// Allocate a buffer of `size` bytes
    ///
    /// `init`, when given, must be exactly `size` bytes; it is uploaded
    /// before the call returns.
    fn create_buffer(&mut self, size: usize, flags: BufferFlags, init: Option<&[u8]>) -> Result<Buffer>;

    /// Release a buffer
    ///
    /// Memory still in use by the device is released once that work has
    /// completed. An active mapping is dropped without write-back.
    fn delete_buffer(&mut self, buffer: Buffer) -> Result<()>;

    /// Read `dst.len()` bytes at `offset`, blocking until they arrive
    fn read_buffer(&mut self, buffer: &Buffer, queue: QueueId, offset: usize, dst: &mut [u8]) -> Result<()>;

    /// Start reading `size` bytes at `offset` without blocking
    ///
    /// A readback dropped without [`complete_read`](Self::complete_read) has
    /// its data released by the device once the read has finished.
    fn read_buffer_async(
        &mut self,
        buffer: &Buffer,
        queue: QueueId,
        offset: usize,
        size: usize,
    ) -> Result<Readback>;

    /// Finish an asynchronous read, copying its data into `dst`
    ///
    /// Blocks until the read has completed. `dst` must be exactly as long
    /// as the read.
    fn complete_read(&mut self, readback: Readback, dst: &mut [u8]) -> Result<()>;

    /// Write `src` at `offset`
    ///
    /// `src` is copied before the call returns, whatever the completion.
    fn write_buffer(
        &mut self,
        buffer: &Buffer,
        queue: QueueId,
        offset: usize,
        src: &[u8],
        completion: Completion,
    ) -> Result<Option<Event>>;

    /// Map a range of a buffer into host scratch memory
    ///
    /// # Panics
    ///
    /// If the buffer is already mapped.
    fn map_buffer(
        &mut self,
        buffer: &Buffer,
        queue: QueueId,
        offset: usize,
        size: usize,
        access: MapAccess,
        completion: Completion,
    ) -> Result<(Mapping, Option<Event>)>;

    /// Host view of an active mapping
    ///
    /// Waits for a readback issued by an event-mode map on first access.
    fn mapped(&mut self, mapping: &Mapping) -> Result<&[u8]>;

    /// Writable host view of an active mapping
    fn mapped_mut(&mut self, mapping: &Mapping) -> Result<&mut [u8]>;

    /// Release a mapping, flushing it to the device if it was writable
    ///
    /// # Panics
    ///
    /// If `mapping` is not the active mapping of `buffer`.
    fn unmap_buffer(
        &mut self,
        buffer: &Buffer,
        queue: QueueId,
        mapping: Mapping,
        completion: Completion,
    ) -> Result<Option<Event>>;

    /// Create a function for `entry_point` with `parameter_count` parameters
    fn create_function(&mut self, entry_point: &str, code: &[u8], parameter_count: u32) -> Result<Function>;

    /// Release a function, waiting for its last dispatch
    ///
    /// A failed wait is returned, but the handle is still consumed: its
    /// backend objects are released once the dispatch has passed, or at
    /// teardown.
    fn delete_function(&mut self, function: Function) -> Result<()>;

    /// Dispatch a function over `global_size` work items
    ///
    /// Every parameter must be set; the argument list is cleared on
    /// success.
    fn execute(
        &mut self,
        function: &mut Function,
        queue: QueueId,
        global_size: usize,
        local_size: usize,
        completion: Completion,
    ) -> Result<Option<Event>>;

    /// Submit pending work without waiting
    fn flush(&mut self, queue: QueueId) -> Result<()>;

    /// Submit pending work and wait until all of it has completed
    fn finish(&mut self, queue: QueueId) -> Result<()>;

    /// Block until an event's operation has completed
    fn wait_for_event(&mut self, event: &Event) -> Result<()>;

    /// Block until every event has completed
    ///
    /// Events are waited on one after another, in order.
    fn wait_for_multiple_events(&mut self, events: &[Event]) -> Result<()> {
        if events.iter().any(|event| event.device() != self.id()) {
            return Err(Error::DeviceMismatch);
        }
        for event in events {
            self.wait_for_event(event)?;
        }
        Ok(())
    }

    /// Whether an event's operation has completed, without blocking
    fn is_event_complete(&mut self, event: &Event) -> Result<bool>;

    /// Release an event; never blocks
    fn delete_event(&mut self, event: Event) -> Result<()>;
}
