//! # Host Mappings
//!
//! A mapping is a host scratch copy of a buffer range, not a live view. The
//! scratch is filled from the device when the mapping can be read and
//! flushed back when a writable mapping is released.
//!
//! The caller holds a [`Mapping`] token. The buffer holds the matching
//! [`MappedMemory`] in its [`MappingSlot`]; a buffer has at most one.

use alloc::vec;
use alloc::vec::Vec;

use basalt_core::{
    BufferId, DeviceId, Error, FenceId, MapAccess, MappingId, RawBuffer, Result,
};

// =============================================================================
// RANGE VALIDATION
// =============================================================================

/// Check that `offset..offset + size` is a non-empty range inside a buffer
pub fn validate_range(buffer_size: u64, offset: u64, size: u64) -> Result<()> {
    if size == 0 {
        return Err(Error::InvalidParameter);
    }
    match offset.checked_add(size) {
        Some(end) if end <= buffer_size => Ok(()),
        _ => Err(Error::OutOfBounds),
    }
}

// =============================================================================
// MAPPING TOKEN
// =============================================================================

/// Token for an active host mapping
///
/// Returned by a map and consumed by the matching unmap.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a mapping must be passed back to unmap"]
pub struct Mapping {
    id: MappingId,
    device: DeviceId,
    buffer: BufferId,
    offset: u64,
    size: u64,
    access: MapAccess,
}

impl Mapping {
    /// Mapping id, unique per buffer
    pub fn id(&self) -> MappingId {
        self.id
    }

    /// Device that owns the buffer
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Mapped buffer
    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// Start of the mapped range
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Length of the mapped range
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Requested host access
    pub fn access(&self) -> MapAccess {
        self.access
    }
}

// =============================================================================
// MAPPED MEMORY
// =============================================================================

/// Device-to-host copy that has not landed in scratch yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingReadback {
    /// Submission carrying the copy
    pub fence: FenceId,
    /// Host-visible staging buffer the copy writes
    pub staging: RawBuffer,
}

/// Scratch memory backing an active mapping
#[derive(Debug)]
pub struct MappedMemory {
    id: MappingId,
    offset: u64,
    access: MapAccess,
    data: Vec<u8>,
    pending: Option<PendingReadback>,
}

impl MappedMemory {
    /// Start of the mapped range
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Requested host access
    pub fn access(&self) -> MapAccess {
        self.access
    }

    /// Whether the host may write the scratch
    pub fn is_writable(&self) -> bool {
        self.access.contains(MapAccess::WRITE)
    }

    /// Scratch contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Scratch contents, mutably
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Readback that still has to land in scratch
    pub fn pending(&self) -> Option<PendingReadback> {
        self.pending
    }

    /// Take the pending readback, leaving none
    pub fn take_pending(&mut self) -> Option<PendingReadback> {
        self.pending.take()
    }

    /// Put back a readback that could not be resolved
    pub fn restore_pending(&mut self, pending: PendingReadback) {
        debug_assert!(self.pending.is_none());
        self.pending = Some(pending);
    }
}

// =============================================================================
// MAPPING SLOT
// =============================================================================

/// Per-buffer holder of the active mapping
#[derive(Debug, Default)]
pub struct MappingSlot {
    active: Option<MappedMemory>,
    next_id: u64,
}

impl MappingSlot {
    /// Whether a mapping is active
    pub fn is_mapped(&self) -> bool {
        self.active.is_some()
    }

    /// Attach a new mapping with zeroed scratch
    ///
    /// # Panics
    ///
    /// If the buffer is already mapped.
    pub fn attach(
        &mut self,
        device: DeviceId,
        buffer: BufferId,
        offset: u64,
        size: u64,
        access: MapAccess,
        pending: Option<PendingReadback>,
    ) -> Mapping {
        assert!(self.active.is_none(), "buffer {:?} is already mapped", buffer);

        self.next_id += 1;
        let id = MappingId::new(self.next_id);
        self.active = Some(MappedMemory {
            id,
            offset,
            access,
            data: vec![0; size as usize],
            pending,
        });

        Mapping {
            id,
            device,
            buffer,
            offset,
            size,
            access,
        }
    }

    /// Active mapping matching `mapping`
    ///
    /// # Panics
    ///
    /// If `mapping` is not the active mapping of this slot.
    pub fn active(&self, mapping: &Mapping) -> &MappedMemory {
        match self.active.as_ref() {
            Some(memory) if Self::matches(memory, mapping) => memory,
            _ => panic!(
                "mapping {:?} of {:?} is not active",
                mapping.id, mapping.buffer
            ),
        }
    }

    /// Active mapping matching `mapping`, mutably
    ///
    /// # Panics
    ///
    /// If `mapping` is not the active mapping of this slot.
    pub fn active_mut(&mut self, mapping: &Mapping) -> &mut MappedMemory {
        match self.active.as_mut() {
            Some(memory) if Self::matches(memory, mapping) => memory,
            _ => panic!(
                "mapping {:?} of {:?} is not active",
                mapping.id, mapping.buffer
            ),
        }
    }

    /// Detach the active mapping, consuming its token
    ///
    /// # Panics
    ///
    /// If `mapping` is not the active mapping of this slot.
    pub fn detach(&mut self, mapping: Mapping) -> MappedMemory {
        match self.active.take() {
            Some(memory) if Self::matches(&memory, &mapping) => memory,
            other => {
                self.active = other;
                panic!(
                    "unmap token {:?} does not match the mapping of {:?}",
                    mapping.id, mapping.buffer
                );
            }
        }
    }

    /// Drop the active mapping, if any
    pub fn clear(&mut self) -> Option<MappedMemory> {
        self.active.take()
    }

    fn matches(memory: &MappedMemory, mapping: &Mapping) -> bool {
        memory.id == mapping.id
            && memory.offset == mapping.offset
            && memory.data.len() as u64 == mapping.size
            && memory.access == mapping.access
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICE: DeviceId = DeviceId::new(1);
    const BUFFER: BufferId = BufferId::new(4);

    #[test]
    fn test_validate_range() {
        assert_eq!(validate_range(64, 0, 64), Ok(()));
        assert_eq!(validate_range(64, 60, 4), Ok(()));
        assert_eq!(validate_range(64, 0, 0), Err(Error::InvalidParameter));
        assert_eq!(validate_range(64, 60, 8), Err(Error::OutOfBounds));
        assert_eq!(validate_range(64, u64::MAX, 2), Err(Error::OutOfBounds));
    }

    #[test]
    fn test_attach_zeroes_scratch() {
        let mut slot = MappingSlot::default();
        let mapping = slot.attach(DEVICE, BUFFER, 16, 32, MapAccess::WRITE, None);

        assert!(slot.is_mapped());
        let memory = slot.active(&mapping);
        assert_eq!(memory.data(), &[0u8; 32][..]);
        assert!(memory.is_writable());
        assert_eq!(mapping.offset(), 16);
    }

    #[test]
    fn test_detach_returns_written_scratch() {
        let mut slot = MappingSlot::default();
        let mapping = slot.attach(DEVICE, BUFFER, 0, 4, MapAccess::WRITE, None);
        slot.active_mut(&mapping).data_mut().copy_from_slice(&[1, 2, 3, 4]);

        let memory = slot.detach(mapping);
        assert_eq!(memory.data(), &[1, 2, 3, 4]);
        assert!(!slot.is_mapped());
    }

    #[test]
    fn test_pending_readback_round_trip() {
        let mut slot = MappingSlot::default();
        let pending = PendingReadback {
            fence: FenceId::new(3),
            staging: RawBuffer::new(77),
        };
        let mapping = slot.attach(DEVICE, BUFFER, 0, 8, MapAccess::READ, Some(pending));

        let memory = slot.active_mut(&mapping);
        assert_eq!(memory.take_pending(), Some(pending));
        assert_eq!(memory.pending(), None);
        memory.restore_pending(pending);
        assert_eq!(slot.active(&mapping).pending(), Some(pending));
    }

    #[test]
    #[should_panic(expected = "already mapped")]
    fn test_double_map_panics() {
        let mut slot = MappingSlot::default();
        let _first = slot.attach(DEVICE, BUFFER, 0, 4, MapAccess::READ, None);
        let _second = slot.attach(DEVICE, BUFFER, 0, 4, MapAccess::READ, None);
    }

    #[test]
    #[should_panic(expected = "does not match")]
    fn test_stale_token_panics() {
        let mut slot = MappingSlot::default();
        let first = slot.attach(DEVICE, BUFFER, 0, 4, MapAccess::READ, None);
        let _ = slot.detach(first);
        let _second = slot.attach(DEVICE, BUFFER, 0, 4, MapAccess::READ, None);

        let stale = Mapping {
            id: MappingId::new(1),
            device: DEVICE,
            buffer: BUFFER,
            offset: 0,
            size: 4,
            access: MapAccess::READ,
        };
        let _ = slot.detach(stale);
    }
}
