//! # BASALT Driver Traits
//!
//! The interface a low-level compute backend implements so a native device
//! can drive it with discrete command buffers and fences.
//!
//! ## Trait Hierarchy
//!
//! ```text
//! Driver
//!    │
//!    ├── FenceDriver   (slot fences: create, reset, wait, query)
//!    │
//!    ├── buffers       (device-local and host-visible staging)
//!    ├── shaders / binding sets / pipelines
//!    └── submit        (one closed recording + one fence)
//! ```
//!
//! Driver calls are synchronous from the host's point of view except
//! `submit`, whose commands run on the device in submission order and
//! signal the given fence when they have all completed.

use crate::command::Command;
use crate::error::Result;
use crate::types::*;

// =============================================================================
// FENCE DRIVER
// =============================================================================

/// Backend fence objects
pub trait FenceDriver {
    /// Create an unsignaled fence
    fn create_fence(&mut self) -> Result<RawFence>;

    /// Destroy a fence; it must not be pending
    fn destroy_fence(&mut self, fence: RawFence);

    /// Return a fence to the unsignaled state
    fn reset_fence(&mut self, fence: RawFence) -> Result<()>;

    /// Block until the fence signals
    fn wait_fence(&mut self, fence: RawFence) -> Result<()>;

    /// Query the fence without blocking
    fn fence_signaled(&mut self, fence: RawFence) -> Result<bool>;
}

// =============================================================================
// DRIVER
// =============================================================================

/// Low-level compute backend
pub trait Driver: FenceDriver {
    /// Device capabilities
    fn spec(&self) -> &DeviceSpec;

    /// Queue family the device submits to
    fn queue_family_index(&self) -> u32;

    /// Allocate a buffer
    fn create_buffer(
        &mut self,
        size: u64,
        flags: BufferFlags,
        location: MemoryLocation,
    ) -> Result<RawBuffer>;

    /// Release a buffer; no pending submission may reference it
    fn destroy_buffer(&mut self, buffer: RawBuffer);

    /// Copy host data into a host-visible buffer
    fn write_host_visible(&mut self, buffer: RawBuffer, offset: u64, data: &[u8]) -> Result<()>;

    /// Copy a host-visible buffer's contents out to the host
    fn read_host_visible(&mut self, buffer: RawBuffer, offset: u64, dst: &mut [u8]) -> Result<()>;

    /// Create a shader module for an entry point
    fn create_shader(&mut self, entry_point: &str, code: &[u8]) -> Result<RawShader>;

    /// Destroy a shader module
    fn destroy_shader(&mut self, shader: RawShader);

    /// Create a binding set with `bindings` storage-buffer slots
    fn create_binding_set(&mut self, bindings: u32) -> Result<RawBindingSet>;

    /// Point a slot of a binding set at a buffer
    ///
    /// The set must not be in use by a pending submission.
    fn update_binding(&mut self, set: RawBindingSet, slot: u32, buffer: RawBuffer) -> Result<()>;

    /// Destroy a binding set
    fn destroy_binding_set(&mut self, set: RawBindingSet);

    /// Create a compute pipeline whose layout matches `layout`
    fn create_pipeline(&mut self, shader: RawShader, layout: RawBindingSet) -> Result<RawPipeline>;

    /// Destroy a pipeline
    fn destroy_pipeline(&mut self, pipeline: RawPipeline);

    /// Queue a closed recording; `fence` signals once every command completed
    ///
    /// On error nothing was queued and the fence is untouched.
    fn submit(&mut self, commands: &[Command], fence: RawFence) -> Result<()>;
}
