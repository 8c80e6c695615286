//! # Buffer Table
//!
//! Tracks device buffers and their last writer for timeline safety.
//!
//! A raw buffer may only be released once every submission that touched it
//! has completed. Deleting a buffer whose last writer is still in flight
//! moves it to the retired list; transfer staging buffers are retired the
//! same way. [`BufferTable::collect`] hands back everything whose fence has
//! passed.

use alloc::vec::Vec;

use basalt_core::{BufferFlags, BufferId, Error, FenceId, RawBuffer, Result};
use hashbrown::HashMap;

use crate::mapping::MappingSlot;

// =============================================================================
// BUFFER STATE
// =============================================================================

/// Device-side record of a buffer
#[derive(Debug)]
pub struct BufferState {
    /// Unique ID
    id: BufferId,
    /// Backend buffer
    raw: RawBuffer,
    /// Size in bytes
    size: u64,
    /// Kernel access flags
    flags: BufferFlags,
    /// Last submission that may read or write the buffer
    last_writer: FenceId,
    /// Active host mapping
    pub mapping: MappingSlot,
}

impl BufferState {
    /// Get buffer ID
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Get backend buffer
    pub fn raw(&self) -> RawBuffer {
        self.raw
    }

    /// Get size
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Get flags
    pub fn flags(&self) -> BufferFlags {
        self.flags
    }

    /// Last submission that may still touch the buffer
    pub fn last_writer(&self) -> FenceId {
        self.last_writer
    }
}

// =============================================================================
// RETIRED BUFFERS
// =============================================================================

/// Why a raw buffer was retired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireKind {
    /// A deleted device buffer
    Buffer,
    /// Host-visible staging of a transfer
    Staging,
}

/// A raw buffer waiting for its fence
#[derive(Debug)]
struct Retired {
    raw: RawBuffer,
    fence: FenceId,
    kind: RetireKind,
}

/// Table statistics
#[derive(Debug, Clone, Default)]
pub struct TableStats {
    /// Buffers registered
    pub total_created: u64,
    /// Buffers removed
    pub total_removed: u64,
    /// Removals that had to wait for the device
    pub deferred_frees: u64,
    /// Staging buffers retired
    pub staging_retired: u64,
    /// Raw buffers handed back by `collect`
    pub collected: u64,
    /// Bytes held by live buffers
    pub memory_in_use: u64,
}

// =============================================================================
// BUFFER TABLE
// =============================================================================

/// Tracks buffers owned by one device
#[derive(Debug)]
pub struct BufferTable {
    /// Live buffers
    buffers: HashMap<BufferId, BufferState>,
    /// Next buffer ID
    next_id: u64,
    /// Raw buffers waiting for the device
    retired: Vec<Retired>,
    /// Statistics
    stats: TableStats,
}

impl BufferTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            buffers: HashMap::new(),
            next_id: 1,
            retired: Vec::new(),
            stats: TableStats::default(),
        }
    }

    /// Register a new buffer
    pub fn insert(&mut self, raw: RawBuffer, size: u64, flags: BufferFlags) -> BufferId {
        let id = BufferId::new(self.next_id);
        self.next_id += 1;

        self.buffers.insert(
            id,
            BufferState {
                id,
                raw,
                size,
                flags,
                last_writer: FenceId::NONE,
                mapping: MappingSlot::default(),
            },
        );

        self.stats.total_created += 1;
        self.stats.memory_in_use += size;
        id
    }

    /// Get buffer by ID
    pub fn get(&self, id: BufferId) -> Option<&BufferState> {
        self.buffers.get(&id)
    }

    /// Get buffer by ID, mutably
    pub fn get_mut(&mut self, id: BufferId) -> Option<&mut BufferState> {
        self.buffers.get_mut(&id)
    }

    /// Record that a submission touches the buffer
    pub fn mark_used(&mut self, id: BufferId, fence: FenceId) -> Result<()> {
        let buffer = self.buffers.get_mut(&id).ok_or(Error::NotFound)?;
        debug_assert!(fence >= buffer.last_writer);
        buffer.last_writer = fence;
        Ok(())
    }

    /// Remove a buffer from the table
    ///
    /// Returns the raw buffer if it can be released now; otherwise it is
    /// retired until its last writer passes.
    pub fn remove(&mut self, id: BufferId, completed: FenceId) -> Result<Option<RawBuffer>> {
        let buffer = self.buffers.remove(&id).ok_or(Error::NotFound)?;
        self.stats.total_removed += 1;
        self.stats.memory_in_use -= buffer.size;

        if buffer.last_writer <= completed {
            return Ok(Some(buffer.raw));
        }

        log::debug!(
            "deferring release of {:?} until fence {}",
            buffer.raw,
            buffer.last_writer
        );
        self.stats.deferred_frees += 1;
        self.retired.push(Retired {
            raw: buffer.raw,
            fence: buffer.last_writer,
            kind: RetireKind::Buffer,
        });
        Ok(None)
    }

    /// Retire a raw buffer until `fence` passes
    pub fn retire(&mut self, raw: RawBuffer, fence: FenceId, kind: RetireKind) {
        if kind == RetireKind::Staging {
            self.stats.staging_retired += 1;
        }
        self.retired.push(Retired { raw, fence, kind });
    }

    /// Take every retired buffer whose fence has passed
    pub fn collect(&mut self, completed: FenceId) -> Vec<RawBuffer> {
        let mut freed = Vec::new();
        let mut i = 0;

        while i < self.retired.len() {
            if self.retired[i].fence <= completed {
                let retired = self.retired.swap_remove(i);
                log::trace!("releasing retired {:?} ({:?})", retired.raw, retired.kind);
                freed.push(retired.raw);
            } else {
                i += 1;
            }
        }

        self.stats.collected += freed.len() as u64;
        freed
    }

    /// Take every raw buffer, live or retired, for teardown
    pub fn drain(&mut self) -> Vec<RawBuffer> {
        let mut raws: Vec<RawBuffer> = self.retired.drain(..).map(|r| r.raw).collect();
        for (_, mut buffer) in self.buffers.drain() {
            if let Some(memory) = buffer.mapping.clear() {
                if let Some(pending) = memory.pending() {
                    raws.push(pending.staging);
                }
            }
            raws.push(buffer.raw);
        }
        self.stats.memory_in_use = 0;
        raws
    }

    /// Number of retired buffers still waiting for the device
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// Number of live buffers
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether no buffers are live
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Get statistics
    pub fn stats(&self) -> &TableStats {
        &self.stats
    }
}

impl Default for BufferTable {
    fn default() -> Self {
        Self::new()
    }
}
