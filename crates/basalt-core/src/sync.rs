//! # Synchronization Primitives
//!
//! Pipeline stages, access masks and the buffer barriers recorded ahead of
//! dispatches and copies.

use crate::types::*;

// =============================================================================
// STAGES AND ACCESS
// =============================================================================

/// Pipeline stage flags for barriers
bitflags::bitflags! {
    /// Pipeline stages that can be synchronized
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStage: u32 {
        /// Top of pipe (beginning)
        const TOP_OF_PIPE = 1 << 0;
        /// Compute shader
        const COMPUTE_SHADER = 1 << 1;
        /// Transfer operations
        const TRANSFER = 1 << 2;
        /// Bottom of pipe (end)
        const BOTTOM_OF_PIPE = 1 << 3;
        /// Host operations
        const HOST = 1 << 4;
        /// All commands
        const ALL_COMMANDS = 0x1F;
    }
}

/// Access flags for memory barriers
bitflags::bitflags! {
    /// Memory access types
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u32 {
        /// Uniform read
        const UNIFORM_READ = 1 << 0;
        /// Shader read
        const SHADER_READ = 1 << 1;
        /// Shader write
        const SHADER_WRITE = 1 << 2;
        /// Transfer read
        const TRANSFER_READ = 1 << 3;
        /// Transfer write
        const TRANSFER_WRITE = 1 << 4;
        /// Host read
        const HOST_READ = 1 << 5;
        /// Host write
        const HOST_WRITE = 1 << 6;
        /// Memory read
        const MEMORY_READ = 1 << 7;
        /// Memory write
        const MEMORY_WRITE = 1 << 8;
    }
}

// =============================================================================
// BUFFER BARRIER
// =============================================================================

/// Queue family placeholder meaning "no ownership transfer"
pub const QUEUE_FAMILY_IGNORED: u32 = u32::MAX;

/// Memory dependency on a range of one buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferBarrier {
    /// Buffer the dependency covers
    pub buffer: RawBuffer,
    /// Start of the range
    pub offset: u64,
    /// Length of the range
    pub size: u64,
    /// Accesses that must be made available
    pub src_access: AccessFlags,
    /// Accesses that must see them
    pub dst_access: AccessFlags,
    /// Stages that produced the accesses
    pub src_stage: PipelineStage,
    /// Stages that wait
    pub dst_stage: PipelineStage,
    /// Releasing queue family
    pub src_queue_family: u32,
    /// Acquiring queue family
    pub dst_queue_family: u32,
}

impl BufferBarrier {
    /// Barrier placed before a dispatch reads or writes `buffer`
    ///
    /// Makes host uploads and transfer writes visible to shader access over
    /// every stage, within one queue family.
    pub const fn before_dispatch(buffer: RawBuffer, size: u64, queue_family: u32) -> Self {
        Self {
            buffer,
            offset: 0,
            size,
            src_access: AccessFlags::HOST_WRITE.union(AccessFlags::TRANSFER_WRITE),
            dst_access: AccessFlags::SHADER_READ.union(AccessFlags::SHADER_WRITE),
            src_stage: PipelineStage::ALL_COMMANDS,
            dst_stage: PipelineStage::ALL_COMMANDS,
            src_queue_family: queue_family,
            dst_queue_family: queue_family,
        }
    }

    /// Barrier placed before a copy touches a range of `buffer`
    pub const fn before_transfer(buffer: RawBuffer, offset: u64, size: u64) -> Self {
        Self {
            buffer,
            offset,
            size,
            src_access: AccessFlags::SHADER_WRITE.union(AccessFlags::TRANSFER_WRITE),
            dst_access: AccessFlags::TRANSFER_READ.union(AccessFlags::TRANSFER_WRITE),
            src_stage: PipelineStage::ALL_COMMANDS,
            dst_stage: PipelineStage::TRANSFER,
            src_queue_family: QUEUE_FAMILY_IGNORED,
            dst_queue_family: QUEUE_FAMILY_IGNORED,
        }
    }
}
