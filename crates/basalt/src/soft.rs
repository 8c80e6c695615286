//! # Soft Driver
//!
//! A host-emulated [`Driver`]. Buffers are byte vectors, kernels are plain
//! Rust functions registered by entry point name, and submissions run on
//! the host.
//!
//! ## Execution Modes
//!
//! ```text
//! Immediate:  submit ──▶ run ──▶ fence signaled
//!
//! Deferred:   submit ──▶ queued ─── wait_fence / step ──▶ run ──▶ signaled
//!                         (fence_signaled never runs work)
//! ```
//!
//! Deferred mode behaves like a device that lags behind the host, which
//! makes window stalls, deferred frees and polling observable.

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use hashbrown::HashMap;

use basalt_core::{
    BufferFlags, Command, DeviceSpec, DeviceType, DispatchSize, Driver, Error, FenceDriver,
    MemoryLocation, RawBindingSet, RawBuffer, RawFence, RawPipeline, RawShader, Result,
    SourceTypes,
};

/// A kernel run by the soft driver
///
/// Receives the contents of the bound buffers in binding slot order.
pub type HostKernel = fn(buffers: &mut [Vec<u8>], size: DispatchSize);

/// When submitted work runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Run each submission as it is queued
    #[default]
    Immediate,
    /// Run submissions only when a fence is waited on or the queue stepped
    Deferred,
}

// =============================================================================
// OBJECTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Unsignaled,
    Pending,
    Signaled,
}

#[derive(Debug)]
struct SoftBuffer {
    data: Vec<u8>,
    location: MemoryLocation,
}

#[derive(Debug, Clone, Copy)]
struct SoftPipeline {
    kernel: HostKernel,
    layout: RawBindingSet,
}

#[derive(Debug)]
struct Submission {
    commands: Vec<Command>,
    fence: RawFence,
}

/// Soft driver statistics
#[derive(Debug, Clone, Default)]
pub struct SoftStats {
    /// Submissions queued
    pub submissions: u64,
    /// Submissions run to completion
    pub executed: u64,
    /// Copies into device-local memory
    pub copies_to_device: u64,
    /// Bytes copied into device-local memory
    pub bytes_to_device: u64,
    /// Copies into host-visible memory
    pub copies_to_host: u64,
    /// Dispatches run
    pub dispatches: u64,
    /// Barriers seen
    pub barriers: u64,
    /// Pipelines created
    pub pipelines_created: u64,
    /// Binding sets created
    pub binding_sets_created: u64,
    /// Binding slot updates
    pub binding_updates: u64,
    /// Shaders created
    pub shaders_created: u64,
    /// Buffers created
    pub buffers_created: u64,
    /// Buffers destroyed
    pub buffers_destroyed: u64,
    /// Fence waits
    pub fence_waits: u64,
    /// Fence resets
    pub fence_resets: u64,
}

// =============================================================================
// SOFT DRIVER
// =============================================================================

/// Host-emulated compute driver
#[derive(Debug)]
pub struct SoftDriver {
    spec: DeviceSpec,
    mode: ExecutionMode,
    next_handle: u64,
    kernels: HashMap<String, HostKernel>,
    buffers: HashMap<RawBuffer, SoftBuffer>,
    fences: HashMap<RawFence, FenceState>,
    shaders: HashMap<RawShader, HostKernel>,
    binding_sets: HashMap<RawBindingSet, Vec<Option<RawBuffer>>>,
    pipelines: HashMap<RawPipeline, SoftPipeline>,
    queue: VecDeque<Submission>,
    failures: VecDeque<Error>,
    wait_failures: VecDeque<Error>,
    lost: bool,
    stats: SoftStats,
}

impl SoftDriver {
    /// Create a driver with the default soft device spec
    pub fn new(mode: ExecutionMode) -> Self {
        Self::with_spec(mode, Self::default_spec())
    }

    /// Create a driver reporting `spec`
    pub fn with_spec(mode: ExecutionMode, spec: DeviceSpec) -> Self {
        Self {
            spec,
            mode,
            next_handle: 1,
            kernels: HashMap::new(),
            buffers: HashMap::new(),
            fences: HashMap::new(),
            shaders: HashMap::new(),
            binding_sets: HashMap::new(),
            pipelines: HashMap::new(),
            queue: VecDeque::new(),
            failures: VecDeque::new(),
            wait_failures: VecDeque::new(),
            lost: false,
            stats: SoftStats::default(),
        }
    }

    /// Capabilities of the default soft device
    pub fn default_spec() -> DeviceSpec {
        DeviceSpec {
            name: String::from("BASALT Soft Device"),
            vendor: String::from("BASALT"),
            device_type: DeviceType::Cpu,
            source_types: SourceTypes::HOST,
            min_alignment: 16,
            max_num_queues: 1,
            global_mem_size: 256 * 1024 * 1024,
            local_mem_size: 32 * 1024,
            max_alloc_size: 64 * 1024 * 1024,
            max_local_size: 256,
            has_fp16: false,
        }
    }

    /// Register a kernel under an entry point name
    pub fn register_kernel(&mut self, entry_point: &str, kernel: HostKernel) {
        self.kernels.insert(String::from(entry_point), kernel);
    }

    /// Builder form of [`register_kernel`](Self::register_kernel)
    pub fn with_kernel(mut self, entry_point: &str, kernel: HostKernel) -> Self {
        self.register_kernel(entry_point, kernel);
        self
    }

    /// Execution mode
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Switch execution mode; switching to immediate runs the queue
    pub fn set_mode(&mut self, mode: ExecutionMode) {
        self.mode = mode;
        if mode == ExecutionMode::Immediate {
            self.run_all();
        }
    }

    /// Fail the next submission with `err`, queuing nothing
    ///
    /// Calls accumulate: each failure consumes one submission.
    pub fn fail_next_submit(&mut self, err: Error) {
        self.failures.push_back(err);
    }

    /// Fail the next fence wait with `err`, leaving the fence untouched
    pub fn fail_next_wait(&mut self, err: Error) {
        self.wait_failures.push_back(err);
    }

    /// Put the device in the lost state
    pub fn lose_device(&mut self) {
        if !self.lost {
            log::error!("soft device '{}' lost", self.spec.name);
        }
        self.lost = true;
    }

    /// Whether the device was lost
    pub fn is_lost(&self) -> bool {
        self.lost
    }

    /// Run the oldest queued submission
    ///
    /// Returns `false` if nothing was queued.
    pub fn step(&mut self) -> bool {
        if self.lost {
            return false;
        }
        let Some(submission) = self.queue.pop_front() else {
            return false;
        };

        match self.execute(&submission.commands) {
            Ok(()) => {
                if let Some(state) = self.fences.get_mut(&submission.fence) {
                    *state = FenceState::Signaled;
                }
                self.stats.executed += 1;
            }
            Err(err) => {
                log::error!("soft device fault: {}", err);
                self.lose_device();
            }
        }
        true
    }

    /// Run every queued submission
    pub fn run_all(&mut self) {
        while self.step() {}
    }

    /// Submissions queued and not yet run
    pub fn pending_submissions(&self) -> usize {
        self.queue.len()
    }

    /// Live buffers, staging included
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Live fences
    pub fn live_fences(&self) -> usize {
        self.fences.len()
    }

    /// Live shaders
    pub fn live_shaders(&self) -> usize {
        self.shaders.len()
    }

    /// Live pipelines
    pub fn live_pipelines(&self) -> usize {
        self.pipelines.len()
    }

    /// Live binding sets
    pub fn live_binding_sets(&self) -> usize {
        self.binding_sets.len()
    }

    /// Get statistics
    pub fn stats(&self) -> &SoftStats {
        &self.stats
    }

    fn next_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn host_visible(&mut self, buffer: RawBuffer) -> Result<&mut SoftBuffer> {
        let buffer = self.buffers.get_mut(&buffer).ok_or(Error::InvalidParameter)?;
        if buffer.location != MemoryLocation::HostVisible {
            return Err(Error::AccessDenied);
        }
        Ok(buffer)
    }

    fn in_use_by_queue(&self, set: RawBindingSet) -> bool {
        self.queue.iter().any(|submission| {
            submission
                .commands
                .iter()
                .any(|command| matches!(command, Command::BindBindingSet { set: bound, .. } if *bound == set))
        })
    }

    // =========================================================================
    // Execution
    // =========================================================================

    fn execute(&mut self, commands: &[Command]) -> Result<()> {
        let mut pipeline = None;
        let mut set = None;

        for command in commands {
            match *command {
                Command::BindPipeline { pipeline: bound } => {
                    let bound = *self.pipelines.get(&bound).ok_or(Error::SubmissionFailed)?;
                    pipeline = Some(bound);
                }
                Command::BindBindingSet { set: bound, .. } => {
                    if !self.binding_sets.contains_key(&bound) {
                        return Err(Error::SubmissionFailed);
                    }
                    set = Some(bound);
                }
                Command::BufferBarrier(barrier) => {
                    if !self.buffers.contains_key(&barrier.buffer) {
                        return Err(Error::SubmissionFailed);
                    }
                    self.stats.barriers += 1;
                }
                Command::CopyBuffer {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => self.copy(src, src_offset, dst, dst_offset, size)?,
                Command::Dispatch(size) => {
                    let pipeline = pipeline.ok_or(Error::SubmissionFailed)?;
                    let set = set.ok_or(Error::SubmissionFailed)?;
                    if set != pipeline.layout {
                        return Err(Error::SubmissionFailed);
                    }
                    self.dispatch(pipeline.kernel, set, size)?;
                }
            }
        }
        Ok(())
    }

    fn copy(&mut self, src: RawBuffer, src_offset: u64, dst: RawBuffer, dst_offset: u64, size: u64) -> Result<()> {
        let source = self.buffers.get(&src).ok_or(Error::SubmissionFailed)?;
        let start = src_offset as usize;
        let end = start.checked_add(size as usize).ok_or(Error::OutOfBounds)?;
        let bytes = source.data.get(start..end).ok_or(Error::OutOfBounds)?.to_vec();

        let target = self.buffers.get_mut(&dst).ok_or(Error::SubmissionFailed)?;
        let start = dst_offset as usize;
        let end = start.checked_add(size as usize).ok_or(Error::OutOfBounds)?;
        target
            .data
            .get_mut(start..end)
            .ok_or(Error::OutOfBounds)?
            .copy_from_slice(&bytes);

        match target.location {
            MemoryLocation::DeviceLocal => {
                self.stats.copies_to_device += 1;
                self.stats.bytes_to_device += size;
            }
            MemoryLocation::HostVisible => self.stats.copies_to_host += 1,
        }
        Ok(())
    }

    fn dispatch(&mut self, kernel: HostKernel, set: RawBindingSet, size: DispatchSize) -> Result<()> {
        let slots = self.binding_sets.get(&set).ok_or(Error::SubmissionFailed)?.clone();

        let mut bound = Vec::with_capacity(slots.len());
        for slot in &slots {
            let taken = slot.and_then(|raw| self.buffers.get_mut(&raw).map(|buffer| (raw, buffer)));
            match taken {
                // Aliased bindings fault
                Some((raw, buffer)) if !bound.iter().any(|(seen, _)| *seen == raw) => {
                    bound.push((raw, core::mem::take(&mut buffer.data)));
                }
                _ => {
                    self.restore(bound);
                    return Err(Error::SubmissionFailed);
                }
            }
        }

        let (raws, mut data): (Vec<RawBuffer>, Vec<Vec<u8>>) = bound.into_iter().unzip();
        kernel(&mut data, size);
        self.restore(raws.into_iter().zip(data));

        self.stats.dispatches += 1;
        Ok(())
    }

    fn restore(&mut self, bound: impl IntoIterator<Item = (RawBuffer, Vec<u8>)>) {
        for (raw, data) in bound {
            if let Some(buffer) = self.buffers.get_mut(&raw) {
                buffer.data = data;
            }
        }
    }
}

impl Default for SoftDriver {
    fn default() -> Self {
        Self::new(ExecutionMode::default())
    }
}

// =============================================================================
// DRIVER IMPLEMENTATION
// =============================================================================

impl FenceDriver for SoftDriver {
    fn create_fence(&mut self) -> Result<RawFence> {
        let fence = RawFence::new(self.next_handle());
        self.fences.insert(fence, FenceState::Unsignaled);
        Ok(fence)
    }

    fn destroy_fence(&mut self, fence: RawFence) {
        self.fences.remove(&fence);
    }

    fn reset_fence(&mut self, fence: RawFence) -> Result<()> {
        let state = self.fences.get_mut(&fence).ok_or(Error::InvalidParameter)?;
        if *state == FenceState::Pending {
            return Err(Error::InvalidState);
        }
        *state = FenceState::Unsignaled;
        self.stats.fence_resets += 1;
        Ok(())
    }

    fn wait_fence(&mut self, fence: RawFence) -> Result<()> {
        self.stats.fence_waits += 1;
        if let Some(err) = self.wait_failures.pop_front() {
            return Err(err);
        }
        loop {
            match self.fences.get(&fence).copied() {
                None => return Err(Error::InvalidParameter),
                Some(FenceState::Signaled) => return Ok(()),
                // Nothing queued will ever signal it
                Some(FenceState::Unsignaled) => return Err(Error::InvalidState),
                Some(FenceState::Pending) => {
                    if !self.step() {
                        return Err(Error::DeviceLost);
                    }
                }
            }
        }
    }

    fn fence_signaled(&mut self, fence: RawFence) -> Result<bool> {
        match self.fences.get(&fence) {
            None => Err(Error::InvalidParameter),
            Some(FenceState::Signaled) => Ok(true),
            Some(_) if self.lost => Err(Error::DeviceLost),
            Some(_) => Ok(false),
        }
    }
}

impl Driver for SoftDriver {
    fn spec(&self) -> &DeviceSpec {
        &self.spec
    }

    fn queue_family_index(&self) -> u32 {
        0
    }

    fn create_buffer(&mut self, size: u64, flags: BufferFlags, location: MemoryLocation) -> Result<RawBuffer> {
        if size == 0 {
            return Err(Error::InvalidParameter);
        }
        if size > self.spec.max_alloc_size {
            return Err(Error::OutOfDeviceMemory);
        }

        let buffer = RawBuffer::new(self.next_handle());
        self.buffers.insert(
            buffer,
            SoftBuffer {
                data: vec![0; size as usize],
                location,
            },
        );
        self.stats.buffers_created += 1;
        log::trace!("soft {:?}: {} bytes {:?} {:?}", buffer, size, location, flags);
        Ok(buffer)
    }

    fn destroy_buffer(&mut self, buffer: RawBuffer) {
        if self.buffers.remove(&buffer).is_some() {
            self.stats.buffers_destroyed += 1;
        } else {
            log::warn!("destroying unknown soft buffer {:?}", buffer);
        }
    }

    fn write_host_visible(&mut self, buffer: RawBuffer, offset: u64, data: &[u8]) -> Result<()> {
        let buffer = self.host_visible(buffer)?;
        let start = offset as usize;
        let end = start.checked_add(data.len()).ok_or(Error::OutOfBounds)?;
        buffer
            .data
            .get_mut(start..end)
            .ok_or(Error::OutOfBounds)?
            .copy_from_slice(data);
        Ok(())
    }

    fn read_host_visible(&mut self, buffer: RawBuffer, offset: u64, dst: &mut [u8]) -> Result<()> {
        let buffer = self.host_visible(buffer)?;
        let start = offset as usize;
        let end = start.checked_add(dst.len()).ok_or(Error::OutOfBounds)?;
        dst.copy_from_slice(buffer.data.get(start..end).ok_or(Error::OutOfBounds)?);
        Ok(())
    }

    fn create_shader(&mut self, entry_point: &str, _code: &[u8]) -> Result<RawShader> {
        let kernel = *self
            .kernels
            .get(entry_point)
            .ok_or(Error::ShaderCreationFailed)?;
        let shader = RawShader::new(self.next_handle());
        self.shaders.insert(shader, kernel);
        self.stats.shaders_created += 1;
        Ok(shader)
    }

    fn destroy_shader(&mut self, shader: RawShader) {
        self.shaders.remove(&shader);
    }

    fn create_binding_set(&mut self, bindings: u32) -> Result<RawBindingSet> {
        let set = RawBindingSet::new(self.next_handle());
        self.binding_sets.insert(set, vec![None; bindings as usize]);
        self.stats.binding_sets_created += 1;
        Ok(set)
    }

    fn update_binding(&mut self, set: RawBindingSet, slot: u32, buffer: RawBuffer) -> Result<()> {
        if self.in_use_by_queue(set) {
            return Err(Error::InvalidState);
        }
        if !self.buffers.contains_key(&buffer) {
            return Err(Error::InvalidParameter);
        }
        let slots = self.binding_sets.get_mut(&set).ok_or(Error::InvalidParameter)?;
        let entry = slots.get_mut(slot as usize).ok_or(Error::InvalidParameter)?;
        *entry = Some(buffer);
        self.stats.binding_updates += 1;
        Ok(())
    }

    fn destroy_binding_set(&mut self, set: RawBindingSet) {
        self.binding_sets.remove(&set);
    }

    fn create_pipeline(&mut self, shader: RawShader, layout: RawBindingSet) -> Result<RawPipeline> {
        let kernel = *self
            .shaders
            .get(&shader)
            .ok_or(Error::PipelineCreationFailed)?;
        if !self.binding_sets.contains_key(&layout) {
            return Err(Error::PipelineCreationFailed);
        }

        let pipeline = RawPipeline::new(self.next_handle());
        self.pipelines.insert(pipeline, SoftPipeline { kernel, layout });
        self.stats.pipelines_created += 1;
        Ok(pipeline)
    }

    fn destroy_pipeline(&mut self, pipeline: RawPipeline) {
        self.pipelines.remove(&pipeline);
    }

    fn submit(&mut self, commands: &[Command], fence: RawFence) -> Result<()> {
        if self.lost {
            return Err(Error::DeviceLost);
        }
        if let Some(err) = self.failures.pop_front() {
            return Err(err);
        }

        let state = self.fences.get_mut(&fence).ok_or(Error::InvalidParameter)?;
        if *state != FenceState::Unsignaled {
            return Err(Error::InvalidState);
        }
        *state = FenceState::Pending;

        self.queue.push_back(Submission {
            commands: commands.to_vec(),
            fence,
        });
        self.stats.submissions += 1;

        if self.mode == ExecutionMode::Immediate {
            self.run_all();
        }
        Ok(())
    }
}
