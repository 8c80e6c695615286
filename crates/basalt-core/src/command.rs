//! # Command Vocabulary
//!
//! Commands a recording accumulates and a driver queue executes, in the
//! order they were recorded.

use crate::sync::BufferBarrier;
use crate::types::*;

/// Workgroup geometry of a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSize {
    /// Total work items
    pub global: u32,
    /// Work items per workgroup
    pub local: u32,
}

impl DispatchSize {
    /// Number of workgroups, rounding up a partial last group
    #[inline]
    pub const fn workgroups(&self) -> u32 {
        if self.local == 0 {
            0
        } else {
            self.global.div_ceil(self.local)
        }
    }
}

/// A recorded device command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Bind a compute pipeline
    BindPipeline {
        /// Pipeline to bind
        pipeline: RawPipeline,
    },
    /// Bind a binding set at a set index
    BindBindingSet {
        /// Set to bind
        set: RawBindingSet,
        /// Set index in the pipeline layout
        index: u32,
    },
    /// Buffer memory dependency
    BufferBarrier(BufferBarrier),
    /// Launch the bound pipeline
    Dispatch(DispatchSize),
    /// Copy a byte range between buffers
    CopyBuffer {
        /// Source buffer
        src: RawBuffer,
        /// Offset into the source
        src_offset: u64,
        /// Destination buffer
        dst: RawBuffer,
        /// Offset into the destination
        dst_offset: u64,
        /// Bytes to copy
        size: u64,
    },
}

impl Command {
    /// Short name for logging
    pub const fn name(&self) -> &'static str {
        match self {
            Self::BindPipeline { .. } => "bind-pipeline",
            Self::BindBindingSet { .. } => "bind-set",
            Self::BufferBarrier(_) => "barrier",
            Self::Dispatch(_) => "dispatch",
            Self::CopyBuffer { .. } => "copy",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workgroups_round_up() {
        assert_eq!(DispatchSize { global: 1024, local: 64 }.workgroups(), 16);
        assert_eq!(DispatchSize { global: 1000, local: 64 }.workgroups(), 16);
        assert_eq!(DispatchSize { global: 1, local: 256 }.workgroups(), 1);
    }
}
