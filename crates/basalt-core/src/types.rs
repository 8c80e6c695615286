//! # BASALT Core Types
//!
//! Identifiers, typed handles, flags and device capabilities used across
//! the BASALT crates.
//!
//! These types provide:
//! - Strong typing for fence ids, queue indices and device ids
//! - Typed opaque handles that cannot be mixed between resource kinds
//! - Buffer and mapping access flags

use alloc::string::String;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;

use bitflags::bitflags;

// =============================================================================
// FENCE ID
// =============================================================================

/// Position of a submission on a device's timeline
///
/// Ids increase by one per submission. [`FenceId::NONE`] marks a resource
/// that was never touched by the device and has always passed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct FenceId(u64);

impl FenceId {
    /// The id that has always passed
    pub const NONE: Self = Self(0);

    /// Create a fence id
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw u64 value
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Check if this is the never-used id
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Next id on the timeline
    #[inline]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Debug for FenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FenceId({})", self.0)
    }
}

impl fmt::Display for FenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// QUEUE / DEVICE IDS
// =============================================================================

/// Index of a device queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct QueueId(u32);

impl QueueId {
    /// The first queue, present on every device
    pub const DEFAULT: Self = Self(0);

    /// Create a queue id
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get the queue index
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Process-unique identity of a device instance
///
/// Buffers, functions and events remember the device they came from so a
/// handle passed to the wrong device is rejected instead of misused.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct DeviceId(u64);

impl DeviceId {
    /// Create a device id
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw u64 value
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.0)
    }
}

// =============================================================================
// HANDLE TYPES
// =============================================================================

/// Opaque handle to a device or backend resource
///
/// Handles are type-safe wrappers that prevent mixing different resource
/// types. The marker only exists at the type level, so every handle is
/// `Copy + Send + Sync` whatever the marker is.
#[repr(transparent)]
pub struct Handle<T> {
    id: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Create a new handle
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// Create a null handle
    #[inline]
    pub const fn null() -> Self {
        Self::new(0)
    }

    /// Get the raw ID
    #[inline]
    pub const fn id(self) -> u64 {
        self.id
    }

    /// Check if null
    #[inline]
    pub const fn is_null(self) -> bool {
        self.id == 0
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = core::any::type_name::<T>();
        let short = name.rsplit("::").next().unwrap_or(name);
        write!(f, "Handle<{}>(0x{:x})", short, self.id)
    }
}

// Marker types for handles
/// Marker for a device-side buffer record
#[derive(Debug)]
pub enum BufferMarker {}
/// Marker for a compiled function record
#[derive(Debug)]
pub enum FunctionMarker {}
/// Marker for an outstanding asynchronous read
#[derive(Debug)]
pub enum ReadbackMarker {}
/// Marker for a host mapping token
#[derive(Debug)]
pub enum MappingMarker {}
/// Marker for a backend buffer object
#[derive(Debug)]
pub enum RawBufferMarker {}
/// Marker for a backend fence object
#[derive(Debug)]
pub enum RawFenceMarker {}
/// Marker for a backend shader module
#[derive(Debug)]
pub enum RawShaderMarker {}
/// Marker for a backend compute pipeline
#[derive(Debug)]
pub enum RawPipelineMarker {}
/// Marker for a backend binding (descriptor) set
#[derive(Debug)]
pub enum RawBindingSetMarker {}
/// Marker for a backend event object
#[derive(Debug)]
pub enum RawEventMarker {}
/// Marker for a backend device object
#[derive(Debug)]
pub enum RawDeviceMarker {}
/// Marker for a backend function object
#[derive(Debug)]
pub enum RawFunctionMarker {}

/// Id of a buffer owned by a device
pub type BufferId = Handle<BufferMarker>;
/// Id of a function created on a device
pub type FunctionId = Handle<FunctionMarker>;
/// Id of an outstanding asynchronous read
pub type ReadbackId = Handle<ReadbackMarker>;
/// Id of a host mapping
pub type MappingId = Handle<MappingMarker>;
/// Backend buffer object
pub type RawBuffer = Handle<RawBufferMarker>;
/// Backend fence object
pub type RawFence = Handle<RawFenceMarker>;
/// Backend shader module
pub type RawShader = Handle<RawShaderMarker>;
/// Backend compute pipeline
pub type RawPipeline = Handle<RawPipelineMarker>;
/// Backend binding set
pub type RawBindingSet = Handle<RawBindingSetMarker>;
/// Backend event object
pub type RawEvent = Handle<RawEventMarker>;
/// Backend device object
pub type RawDevice = Handle<RawDeviceMarker>;
/// Backend function object
pub type RawFunction = Handle<RawFunctionMarker>;

static_assertions::assert_impl_all!(FenceId: Send, Sync, Copy);
static_assertions::assert_impl_all!(BufferId: Send, Sync, Copy);
static_assertions::assert_impl_all!(RawFence: Send, Sync, Copy);
static_assertions::assert_impl_all!(RawEvent: Send, Sync, Copy);

// =============================================================================
// FLAGS
// =============================================================================

bitflags! {
    /// How kernels may access a buffer
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferFlags: u32 {
        /// Kernels read the buffer
        const READ = 1 << 0;
        /// Kernels write the buffer
        const WRITE = 1 << 1;
        /// Prefer host-pinned backing memory
        const PINNED = 1 << 2;
        /// Kernels read and write the buffer
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl Default for BufferFlags {
    fn default() -> Self {
        Self::READ_WRITE
    }
}

bitflags! {
    /// Host access requested when mapping a buffer
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MapAccess: u32 {
        /// Host reads the mapped range; its contents are fetched first
        const READ = 1 << 0;
        /// Host writes the mapped range; it is flushed back on unmap
        const WRITE = 1 << 1;
        /// Both
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

bitflags! {
    /// Program source formats a device accepts
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SourceTypes: u32 {
        /// SPIR-V compute modules
        const SPIRV = 1 << 0;
        /// OpenCL C source
        const OPENCL_C = 1 << 1;
        /// Backend-native binaries
        const BINARY = 1 << 2;
        /// Host functions registered by name
        const HOST = 1 << 3;
    }
}

/// Where a backend buffer lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryLocation {
    /// Device-local memory, only reachable through copies
    DeviceLocal,
    /// Host-visible memory used for staging
    HostVisible,
}

// =============================================================================
// DEVICE CAPABILITIES
// =============================================================================

/// Kind of compute device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceType {
    /// Unknown device type
    #[default]
    Unknown,
    /// Discrete GPU
    DiscreteGpu,
    /// GPU sharing memory with the host
    IntegratedGpu,
    /// Host CPU
    Cpu,
    /// Fixed-function or custom accelerator
    Accelerator,
}

/// Capabilities a backend reports for one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec {
    /// Device name
    pub name: String,
    /// Vendor name
    pub vendor: String,
    /// Device kind
    pub device_type: DeviceType,
    /// Accepted program formats
    pub source_types: SourceTypes,
    /// Minimum buffer offset alignment in bytes
    pub min_alignment: u64,
    /// Number of queues callers may address
    pub max_num_queues: u32,
    /// Total device memory in bytes
    pub global_mem_size: u64,
    /// Workgroup-shared memory in bytes
    pub local_mem_size: u64,
    /// Largest single buffer in bytes
    pub max_alloc_size: u64,
    /// Largest workgroup size
    pub max_local_size: u64,
    /// Half-precision arithmetic support
    pub has_fp16: bool,
}

impl DeviceSpec {
    /// Check a queue id against the device's queue count
    pub fn check_queue(&self, queue: QueueId) -> crate::Result<()> {
        if queue.index() < self.max_num_queues.max(1) {
            Ok(())
        } else {
            Err(crate::Error::InvalidQueue(queue.index()))
        }
    }
}
