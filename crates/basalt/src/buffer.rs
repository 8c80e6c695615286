//! # Buffers

use basalt_core::{BufferFlags, BufferId, DeviceId};

/// Caller handle to a device buffer
///
/// The device owns the memory until the handle is passed to
/// `delete_buffer`.
#[derive(Debug, PartialEq, Eq)]
pub struct Buffer {
    device: DeviceId,
    id: BufferId,
    size: usize,
    flags: BufferFlags,
}

impl Buffer {
    pub(crate) fn new(device: DeviceId, id: BufferId, size: usize, flags: BufferFlags) -> Self {
        Self {
            device,
            id,
            size,
            flags,
        }
    }

    /// Owning device
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Buffer id on its device
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Kernel access flags
    pub fn flags(&self) -> BufferFlags {
        self.flags
    }
}
