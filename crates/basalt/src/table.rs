//! # Function Table Backend
//!
//! A device whose every operation is forwarded to a caller-supplied table
//! of plain function pointers.
//!
//! ```text
//!   TableContext::new(table) ──▶ Arc<TableContext>
//!                                   │
//!            create_device(index) ──┼──▶ FunctionTableDevice ──▶ table fns
//!            create_device(index) ──┴──▶ FunctionTableDevice ──▶ table fns
//! ```
//!
//! The device keeps only the bookkeeping the caller-facing handles need:
//! buffer and function ids mapped to raw handles, mapping records, and the
//! device id carried by every event.
//!
//! ## Table Contract
//!
//! - Borrowed host memory is only used until the entry returns
//! - Entries called with `want_event == false` finish before returning
//! - Returned events report backend-side completion only
//!
//! Buffer mapping and batched event waits are optional. Without
//! [`BufferMapTable`] entries a mapping is staged through `read_buffer` and
//! `write_buffer`; without `wait_for_multiple_events` the events are waited
//! on one at a time.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use hashbrown::HashMap;

use basalt_core::{
    BufferFlags, BufferId, DeviceId, DeviceSpec, Error, FunctionId, MapAccess, QueueId,
    RawBuffer, RawDevice, RawEvent, RawFunction, ReadbackId, Result,
};
use basalt_mem::{Mapping, MappingSlot, validate_range};

use crate::buffer::Buffer;
use crate::device::{Completion, Device, Platform, next_device_id};
use crate::event::{Event, EventSource, Readback, ReadbackLease};
use crate::function::{Argument, Function};

// =============================================================================
// FUNCTION TABLE
// =============================================================================

/// Backend operations, one entry per pass-through call
#[derive(Debug, Clone, Copy)]
pub struct FunctionTable {
    /// Number of devices the backend exposes
    pub device_count: fn() -> u32,
    /// Capabilities of device `index`
    pub device_spec: fn(index: u32) -> Result<DeviceSpec>,
    /// Open device `index`
    pub create_device: fn(index: u32) -> Result<RawDevice>,
    /// Close a device
    pub delete_device: fn(device: RawDevice),

    /// Allocate a buffer, optionally filled with `init`
    pub create_buffer:
        fn(device: RawDevice, size: u64, flags: BufferFlags, init: Option<&[u8]>) -> Result<RawBuffer>,
    /// Release a buffer
    pub delete_buffer: fn(device: RawDevice, buffer: RawBuffer),
    /// Read into `dst`
    pub read_buffer: fn(
        device: RawDevice,
        buffer: RawBuffer,
        queue: QueueId,
        offset: u64,
        dst: &mut [u8],
        want_event: bool,
    ) -> Result<Option<RawEvent>>,
    /// Write `src`
    pub write_buffer: fn(
        device: RawDevice,
        buffer: RawBuffer,
        queue: QueueId,
        offset: u64,
        src: &[u8],
        want_event: bool,
    ) -> Result<Option<RawEvent>>,
    /// Native buffer mapping, if the backend has it
    pub map: Option<BufferMapTable>,

    /// Create a function
    pub create_function: fn(
        device: RawDevice,
        entry_point: &str,
        code: &[u8],
        parameter_count: u32,
    ) -> Result<RawFunction>,
    /// Release a function
    pub delete_function: fn(device: RawDevice, function: RawFunction),
    /// Bind a buffer to a function parameter
    pub set_buffer: fn(device: RawDevice, function: RawFunction, index: u32, buffer: RawBuffer) -> Result<()>,
    /// Pass bytes by value to a function parameter
    pub set_arg: fn(device: RawDevice, function: RawFunction, index: u32, value: &[u8]) -> Result<()>,
    /// Reserve shared memory for a function parameter
    pub set_shared_memory: fn(device: RawDevice, function: RawFunction, index: u32, size: u64) -> Result<()>,
    /// Dispatch a function with its bound parameters
    pub execute: fn(
        device: RawDevice,
        function: RawFunction,
        queue: QueueId,
        global_size: u64,
        local_size: u64,
        want_event: bool,
    ) -> Result<Option<RawEvent>>,

    /// Submit pending work
    pub flush: fn(device: RawDevice, queue: QueueId) -> Result<()>,
    /// Submit pending work and wait for it
    pub finish: fn(device: RawDevice, queue: QueueId) -> Result<()>,

    /// Block on an event
    pub wait_event: fn(device: RawDevice, event: RawEvent) -> Result<()>,
    /// Block on several events at once
    pub wait_for_multiple_events: Option<fn(device: RawDevice, events: &[RawEvent]) -> Result<()>>,
    /// Query an event without blocking
    pub event_complete: fn(device: RawDevice, event: RawEvent) -> Result<bool>,
    /// Release an event
    pub delete_event: fn(device: RawDevice, event: RawEvent),
}

/// Map and unmap entries of a backend that maps buffers itself
///
/// Mapped contents travel through the device's host scratch: `map_buffer`
/// fills it when `access` includes READ, and `unmap_buffer` receives it
/// back for every unmap, written or not.
#[derive(Debug, Clone, Copy)]
pub struct BufferMapTable {
    /// Map `offset..offset + scratch.len()`
    pub map_buffer: fn(
        device: RawDevice,
        buffer: RawBuffer,
        queue: QueueId,
        offset: u64,
        access: MapAccess,
        scratch: &mut [u8],
        want_event: bool,
    ) -> Result<Option<RawEvent>>,
    /// Unmap a range mapped by `map_buffer`
    pub unmap_buffer: fn(
        device: RawDevice,
        buffer: RawBuffer,
        queue: QueueId,
        offset: u64,
        access: MapAccess,
        scratch: &[u8],
        want_event: bool,
    ) -> Result<Option<RawEvent>>,
}

// =============================================================================
// TABLE CONTEXT
// =============================================================================

/// Explicit context owning a function table
///
/// Shared by every device it creates; dropped with the last of them.
#[derive(Debug)]
pub struct TableContext {
    table: FunctionTable,
}

impl TableContext {
    /// Create a context
    pub fn new(table: FunctionTable) -> Arc<Self> {
        Arc::new(Self { table })
    }

    /// The function table
    pub fn table(&self) -> &FunctionTable {
        &self.table
    }

    /// Number of devices the backend exposes
    pub fn device_count(&self) -> u32 {
        (self.table.device_count)()
    }

    /// Capabilities of device `index`
    pub fn device_spec(&self, index: u32) -> Result<DeviceSpec> {
        self.check_index(index)?;
        (self.table.device_spec)(index)
    }

    /// Open device `index`
    pub fn create_device(self: &Arc<Self>, index: u32) -> Result<FunctionTableDevice> {
        let spec = self.device_spec(index)?;
        let raw = (self.table.create_device)(index)?;
        let id = next_device_id();

        log::debug!(
            "table device {:?} opened on '{}' (index {})",
            id,
            spec.name,
            index
        );

        Ok(FunctionTableDevice {
            id,
            context: Arc::clone(self),
            raw,
            spec,
            buffers: HashMap::new(),
            functions: HashMap::new(),
            readbacks: HashMap::new(),
            next_buffer: 0,
            next_function: 0,
            next_readback: 0,
        })
    }

    fn check_index(&self, index: u32) -> Result<()> {
        if index < self.device_count() {
            Ok(())
        } else {
            Err(Error::InvalidParameter)
        }
    }
}

// =============================================================================
// FUNCTION TABLE DEVICE
// =============================================================================

#[derive(Debug)]
struct TableBuffer {
    raw: RawBuffer,
    size: u64,
    mapping: MappingSlot,
}

/// Data of a read started asynchronously
#[derive(Debug)]
struct TableReadback {
    data: Vec<u8>,
    event: Option<RawEvent>,
    lease: ReadbackLease,
}

/// A function argument resolved to what its table entry takes
#[derive(Debug, Clone, Copy)]
enum TableArgument<'a> {
    Buffer(RawBuffer),
    Value(&'a [u8]),
    SharedMemory(u64),
}

/// Device forwarding to a [`FunctionTable`]
#[derive(Debug)]
pub struct FunctionTableDevice {
    id: DeviceId,
    context: Arc<TableContext>,
    raw: RawDevice,
    spec: DeviceSpec,
    buffers: HashMap<BufferId, TableBuffer>,
    functions: HashMap<FunctionId, RawFunction>,
    readbacks: HashMap<ReadbackId, TableReadback>,
    next_buffer: u64,
    next_function: u64,
    next_readback: u64,
}

impl FunctionTableDevice {
    /// Backend device handle
    pub fn raw(&self) -> RawDevice {
        self.raw
    }

    /// Context the device was created from
    pub fn context(&self) -> &Arc<TableContext> {
        &self.context
    }

    fn table(&self) -> &FunctionTable {
        &self.context.table
    }

    fn check_device(&self, device: DeviceId) -> Result<()> {
        if device == self.id {
            Ok(())
        } else {
            Err(Error::DeviceMismatch)
        }
    }

    /// Raw buffer behind `buffer`, checked for a transfer of `offset..offset + size`
    fn resolve(&self, buffer: &Buffer, queue: QueueId, offset: usize, size: usize) -> Result<RawBuffer> {
        self.check_device(buffer.device())?;
        self.spec.check_queue(queue)?;
        let state = self.buffers.get(&buffer.id()).ok_or(Error::NotFound)?;
        validate_range(state.size, offset as u64, size as u64)?;
        if state.mapping.is_mapped() {
            return Err(Error::BufferMapped);
        }
        Ok(state.raw)
    }

    /// Turn a backend event into the completion the caller asked for
    fn settle(&self, event: Option<RawEvent>, completion: Completion) -> Result<Option<Event>> {
        match (completion, event) {
            (Completion::Block, None) => Ok(None),
            (Completion::Block, Some(raw)) => {
                let waited = (self.table().wait_event)(self.raw, raw);
                (self.table().delete_event)(self.raw, raw);
                waited.map(|()| None)
            }
            (Completion::Event, Some(raw)) => Ok(Some(Event::backend(self.id, raw))),
            (Completion::Event, None) => Ok(Some(Event::completed(self.id))),
        }
    }

    /// Release readbacks whose handle was dropped before completing
    fn sweep_readbacks(&mut self) {
        let table = self.context.table;
        let device = self.raw;
        self.readbacks.retain(|id, read| {
            if !read.lease.is_abandoned() {
                return true;
            }
            log::trace!("readback {:?} dropped; releasing its data", id);
            if let Some(event) = read.event {
                (table.delete_event)(device, event);
            }
            false
        });
    }

    fn event_source(&self, event: &Event) -> Result<Option<RawEvent>> {
        self.check_device(event.device())?;
        match event.source() {
            EventSource::Backend(raw) => Ok(Some(raw)),
            EventSource::Fence(fence) if fence.is_none() => Ok(None),
            EventSource::Fence(_) => Err(Error::InvalidParameter),
        }
    }
}

impl Device for FunctionTableDevice {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn platform(&self) -> Platform {
        Platform::FunctionTable
    }

    fn spec(&self) -> &DeviceSpec {
        &self.spec
    }

    fn create_buffer(&mut self, size: usize, flags: BufferFlags, init: Option<&[u8]>) -> Result<Buffer> {
        if size == 0 || size as u64 > self.spec.max_alloc_size {
            return Err(Error::InvalidParameter);
        }
        if init.is_some_and(|data| data.len() != size) {
            return Err(Error::InvalidParameter);
        }

        let raw = (self.table().create_buffer)(self.raw, size as u64, flags, init)?;
        self.next_buffer += 1;
        let id = BufferId::new(self.next_buffer);
        self.buffers.insert(
            id,
            TableBuffer {
                raw,
                size: size as u64,
                mapping: MappingSlot::default(),
            },
        );
        Ok(Buffer::new(self.id, id, size, flags))
    }

    fn delete_buffer(&mut self, buffer: Buffer) -> Result<()> {
        self.check_device(buffer.device())?;
        let state = self.buffers.remove(&buffer.id()).ok_or(Error::NotFound)?;
        if state.mapping.is_mapped() {
            log::warn!("deleting {:?} while mapped; scratch discarded", buffer.id());
        }
        (self.table().delete_buffer)(self.raw, state.raw);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: &Buffer, queue: QueueId, offset: usize, dst: &mut [u8]) -> Result<()> {
        let raw = self.resolve(buffer, queue, offset, dst.len())?;
        let event = (self.table().read_buffer)(self.raw, raw, queue, offset as u64, dst, false)?;
        self.settle(event, Completion::Block).map(|_| ())
    }

    fn read_buffer_async(
        &mut self,
        buffer: &Buffer,
        queue: QueueId,
        offset: usize,
        size: usize,
    ) -> Result<Readback> {
        self.sweep_readbacks();
        let raw = self.resolve(buffer, queue, offset, size)?;
        let mut data = vec![0; size];
        let pending = (self.table().read_buffer)(self.raw, raw, queue, offset as u64, &mut data, true)?;
        let event = match pending {
            Some(raw) => Event::backend(self.id, raw),
            None => Event::completed(self.id),
        };

        self.next_readback += 1;
        let id = ReadbackId::new(self.next_readback);
        let readback = Readback::new(id, size, event);
        self.readbacks.insert(
            id,
            TableReadback {
                data,
                event: pending,
                lease: readback.lease(),
            },
        );
        Ok(readback)
    }

    fn complete_read(&mut self, readback: Readback, dst: &mut [u8]) -> Result<()> {
        self.check_device(readback.event().device())?;
        let data = self
            .readbacks
            .remove(&readback.id())
            .ok_or(Error::NotFound)?
            .data;

        let event = readback.into_event();
        let waited = if dst.len() == data.len() {
            self.wait_for_event(&event)
        } else {
            Err(Error::InvalidParameter)
        };
        self.delete_event(event)?;
        waited?;

        dst.copy_from_slice(&data);
        Ok(())
    }

    fn write_buffer(
        &mut self,
        buffer: &Buffer,
        queue: QueueId,
        offset: usize,
        src: &[u8],
        completion: Completion,
    ) -> Result<Option<Event>> {
        let raw = self.resolve(buffer, queue, offset, src.len())?;
        let want_event = completion == Completion::Event;
        let event = (self.table().write_buffer)(self.raw, raw, queue, offset as u64, src, want_event)?;
        self.settle(event, completion)
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
        self.check_device(buffer.device())?;
        self.spec.check_queue(queue)?;
        if access.is_empty() {
            return Err(Error::InvalidParameter);
        }

        let table = self.context.table;
        let state = self.buffers.get_mut(&buffer.id()).ok_or(Error::NotFound)?;
        validate_range(state.size, offset as u64, size as u64)?;
        assert!(
            !state.mapping.is_mapped(),
            "buffer {:?} is already mapped",
            buffer.id()
        );

        let raw = state.raw;
        let mapping = state
            .mapping
            .attach(self.id, buffer.id(), offset as u64, size as u64, access, None);

        let want_event = completion == Completion::Event;
        let scratch = state.mapping.active_mut(&mapping).data_mut();
        let started = match table.map {
            Some(map) => (map.map_buffer)(self.raw, raw, queue, offset as u64, access, scratch, want_event),
            None if access.contains(MapAccess::READ) => {
                (table.read_buffer)(self.raw, raw, queue, offset as u64, scratch, false)
            }
            None => Ok(None),
        };

        // Staged reads have finished once the entry returns
        let settled = started.and_then(|event| match table.map {
            Some(_) => self.settle(event, completion),
            None => self
                .settle(event, Completion::Block)
                .and_then(|_| self.settle(None, completion)),
        });
        match settled {
            Ok(event) => Ok((mapping, event)),
            Err(err) => {
                if let Some(state) = self.buffers.get_mut(&buffer.id()) {
                    let _ = state.mapping.clear();
                }
                Err(err)
            }
        }
    }

    fn mapped(&mut self, mapping: &Mapping) -> Result<&[u8]> {
        self.check_device(mapping.device())?;
        let state = self.buffers.get(&mapping.buffer()).ok_or(Error::NotFound)?;
        Ok(state.mapping.active(mapping).data())
    }

    fn mapped_mut(&mut self, mapping: &Mapping) -> Result<&mut [u8]> {
        self.check_device(mapping.device())?;
        if !mapping.access().contains(MapAccess::WRITE) {
            return Err(Error::AccessDenied);
        }
        let state = self
            .buffers
            .get_mut(&mapping.buffer())
            .ok_or(Error::NotFound)?;
        Ok(state.mapping.active_mut(mapping).data_mut())
    }

    fn unmap_buffer(
        &mut self,
        buffer: &Buffer,
        queue: QueueId,
        mapping: Mapping,
        completion: Completion,
    ) -> Result<Option<Event>> {
        self.check_device(buffer.device())?;
        assert!(
            mapping.device() == self.id && mapping.buffer() == buffer.id(),
            "unmap token for {:?} passed with {:?}",
            mapping.buffer(),
            buffer.id()
        );

        let state = self.buffers.get_mut(&buffer.id()).ok_or(Error::NotFound)?;
        let raw = state.raw;
        let memory = state.mapping.detach(mapping);
        let want_event = completion == Completion::Event;

        if let Some(map) = self.table().map {
            self.spec.check_queue(queue)?;
            let event = (map.unmap_buffer)(
                self.raw,
                raw,
                queue,
                memory.offset(),
                memory.access(),
                memory.data(),
                want_event,
            )?;
            return self.settle(event, completion);
        }

        if !memory.is_writable() {
            return self.settle(None, completion);
        }

        self.spec.check_queue(queue)?;
        let event = (self.table().write_buffer)(
            self.raw,
            raw,
            queue,
            memory.offset(),
            memory.data(),
            want_event,
        )?;
        self.settle(event, completion)
    }

    fn create_function(&mut self, entry_point: &str, code: &[u8], parameter_count: u32) -> Result<Function> {
        if entry_point.is_empty() {
            return Err(Error::InvalidParameter);
        }

        let raw = (self.table().create_function)(self.raw, entry_point, code, parameter_count)?;
        self.next_function += 1;
        let id = FunctionId::new(self.next_function);
        self.functions.insert(id, raw);
        Ok(Function::new(self.id, id, entry_point, parameter_count))
    }

    fn delete_function(&mut self, function: Function) -> Result<()> {
        self.check_device(function.device())?;
        let raw = self
            .functions
            .remove(&function.id())
            .ok_or(Error::NotFound)?;
        (self.table().delete_function)(self.raw, raw);
        Ok(())
    }

    fn execute(
        &mut self,
        function: &mut Function,
        queue: QueueId,
        global_size: usize,
        local_size: usize,
        completion: Completion,
    ) -> Result<Option<Event>> {
        self.check_device(function.device())?;
        self.spec.check_queue(queue)?;
        if global_size == 0 || local_size == 0 || local_size as u64 > self.spec.max_local_size {
            return Err(Error::InvalidParameter);
        }
        let raw = *self.functions.get(&function.id()).ok_or(Error::NotFound)?;

        let mut arguments = Vec::with_capacity(function.arguments().len());
        for (slot, argument) in function.arguments().iter().enumerate() {
            let argument = match argument {
                Some(Argument::Buffer(id)) => {
                    let state = self.buffers.get(id).ok_or(Error::NotFound)?;
                    if state.mapping.is_mapped() {
                        return Err(Error::BufferMapped);
                    }
                    TableArgument::Buffer(state.raw)
                }
                Some(Argument::Value(bytes)) => TableArgument::Value(bytes),
                Some(Argument::SharedMemory(size)) => TableArgument::SharedMemory(*size),
                None => return Err(Error::MissingArgument(slot as u32)),
            };
            arguments.push(argument);
        }

        let table = self.context.table;
        for (slot, argument) in arguments.into_iter().enumerate() {
            let index = slot as u32;
            match argument {
                TableArgument::Buffer(buffer) => (table.set_buffer)(self.raw, raw, index, buffer)?,
                TableArgument::Value(bytes) => (table.set_arg)(self.raw, raw, index, bytes)?,
                TableArgument::SharedMemory(size) => (table.set_shared_memory)(self.raw, raw, index, size)?,
            }
        }
        let want_event = completion == Completion::Event;
        let event = (table.execute)(
            self.raw,
            raw,
            queue,
            global_size as u64,
            local_size as u64,
            want_event,
        )?;
        function.clear_arguments();
        self.settle(event, completion)
    }

    fn flush(&mut self, queue: QueueId) -> Result<()> {
        self.spec.check_queue(queue)?;
        (self.table().flush)(self.raw, queue)
    }

    fn finish(&mut self, queue: QueueId) -> Result<()> {
        self.spec.check_queue(queue)?;
        (self.table().finish)(self.raw, queue)?;
        self.sweep_readbacks();
        Ok(())
    }

    fn wait_for_event(&mut self, event: &Event) -> Result<()> {
        match self.event_source(event)? {
            Some(raw) => (self.table().wait_event)(self.raw, raw),
            None => Ok(()),
        }
    }

    fn wait_for_multiple_events(&mut self, events: &[Event]) -> Result<()> {
        let mut raws = Vec::with_capacity(events.len());
        for event in events {
            if let Some(raw) = self.event_source(event)? {
                raws.push(raw);
            }
        }
        if raws.is_empty() {
            return Ok(());
        }

        let table = self.context.table;
        match table.wait_for_multiple_events {
            Some(wait_all) => wait_all(self.raw, &raws),
            None => raws.into_iter().try_for_each(|raw| (table.wait_event)(self.raw, raw)),
        }
    }

    fn is_event_complete(&mut self, event: &Event) -> Result<bool> {
        match self.event_source(event)? {
            Some(raw) => (self.table().event_complete)(self.raw, raw),
            None => Ok(true),
        }
    }

    fn delete_event(&mut self, event: Event) -> Result<()> {
        if let Some(raw) = self.event_source(&event)? {
            (self.table().delete_event)(self.raw, raw);
        }
        Ok(())
    }
}

impl Drop for FunctionTableDevice {
    fn drop(&mut self) {
        let table = self.context.table;
        for (_, raw) in self.functions.drain() {
            (table.delete_function)(self.raw, raw);
        }
        for (_, state) in self.buffers.drain() {
            (table.delete_buffer)(self.raw, state.raw);
        }
        for (_, read) in self.readbacks.drain() {
            if let Some(event) = read.event {
                (table.delete_event)(self.raw, event);
            }
        }
        (table.delete_device)(self.raw);
        log::debug!("table device {:?} closed", self.id);
    }
}
