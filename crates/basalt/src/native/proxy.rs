//! Buffer mapping proxy
//!
//! ```text
//!   map ──▶ wait last writer ──▶ attach scratch ──┬── READ:  download ──▶ land
//!                                                 └── WRITE: zeroed scratch
//!
//!   unmap ──▶ detach ──┬── writable: upload scratch, new last writer
//!                      └── read-only: no device traffic
//! ```
//!
//! An event-mode map leaves its download pending. The data lands on first
//! access through [`mapped`](crate::Device::mapped) or
//! [`mapped_mut`](crate::Device::mapped_mut).

use basalt_core::{Driver, Error, FenceId, MapAccess, QueueId, Result};
use basalt_mem::{Mapping, RetireKind, validate_range};

use super::NativeDevice;
use crate::buffer::Buffer;
use crate::device::Completion;
use crate::event::Event;

impl<D: Driver> NativeDevice<D> {
    pub(super) fn map_range(
        &mut self,
        buffer: &Buffer,
        queue: QueueId,
        offset: usize,
        size: usize,
        access: MapAccess,
        completion: Completion,
    ) -> Result<(Mapping, Option<Event>)> {
        self.check_device(buffer.device())?;
        self.ensure_usable(queue)?;
        if access.is_empty() {
            return Err(Error::InvalidParameter);
        }

        let (raw, last_writer) = {
            let state = self.buffers.get(buffer.id()).ok_or(Error::NotFound)?;
            validate_range(state.size(), offset as u64, size as u64)?;
            assert!(
                !state.mapping.is_mapped(),
                "buffer {:?} is already mapped",
                buffer.id()
            );
            (state.raw(), state.last_writer())
        };
        self.wait(last_writer)?;

        let pending = if access.contains(MapAccess::READ) {
            let pending = self.download(raw, offset as u64, size as u64)?;
            self.buffers.mark_used(buffer.id(), pending.fence)?;
            Some(pending)
        } else {
            None
        };

        let state = self.buffers.get_mut(buffer.id()).ok_or(Error::NotFound)?;
        let mapping = state.mapping.attach(
            self.id,
            buffer.id(),
            offset as u64,
            size as u64,
            access,
            pending,
        );
        log::trace!(
            "mapped {:?} [{}..{}] {:?}",
            buffer.id(),
            offset,
            offset + size,
            access
        );

        match completion {
            Completion::Block => {
                if let Err(err) = self.resolve(&mapping) {
                    self.drop_mapping(mapping);
                    return Err(err);
                }
                Ok((mapping, None))
            }
            Completion::Event => {
                let fence = pending.map_or(FenceId::NONE, |pending| pending.fence);
                Ok((mapping, Some(Event::fence(self.id, fence))))
            }
        }
    }

    /// Land the pending download of `mapping` in its scratch, if any
    ///
    /// On failure the download stays pending.
    fn resolve(&mut self, mapping: &Mapping) -> Result<()> {
        let resolved = {
            let Self {
                buffers,
                tracker,
                driver,
                queue,
                ..
            } = self;

            let state = buffers.get_mut(mapping.buffer()).ok_or(Error::NotFound)?;
            let memory = state.mapping.active_mut(mapping);
            let Some(pending) = memory.take_pending() else {
                return Ok(());
            };

            let landed = tracker
                .wait_for(driver, pending.fence)
                .and_then(|()| driver.read_host_visible(pending.staging, 0, memory.data_mut()));
            match landed {
                Ok(()) => {
                    driver.destroy_buffer(pending.staging);
                    Ok(())
                }
                Err(err) => {
                    memory.restore_pending(pending);
                    if err.is_device_lost() {
                        queue.mark_lost();
                    }
                    Err(err)
                }
            }
        };
        self.reclaim();
        resolved
    }

    /// Detach a mapping without write-back
    fn drop_mapping(&mut self, mapping: Mapping) {
        if let Some(state) = self.buffers.get_mut(mapping.buffer()) {
            let mut memory = state.mapping.detach(mapping);
            if let Some(pending) = memory.take_pending() {
                self.buffers
                    .retire(pending.staging, pending.fence, RetireKind::Staging);
            }
        }
    }

    pub(super) fn mapped_bytes(&mut self, mapping: &Mapping) -> Result<&[u8]> {
        self.check_device(mapping.device())?;
        self.resolve(mapping)?;
        let state = self.buffers.get(mapping.buffer()).ok_or(Error::NotFound)?;
        Ok(state.mapping.active(mapping).data())
    }

    pub(super) fn mapped_bytes_mut(&mut self, mapping: &Mapping) -> Result<&mut [u8]> {
        self.check_device(mapping.device())?;
        if !mapping.access().contains(MapAccess::WRITE) {
            return Err(Error::AccessDenied);
        }
        self.resolve(mapping)?;
        let state = self
            .buffers
            .get_mut(mapping.buffer())
            .ok_or(Error::NotFound)?;
        Ok(state.mapping.active_mut(mapping).data_mut())
    }

    /// Release a mapping, writing writable scratch back
    ///
    /// The mapping is released even when the write-back fails.
    pub(super) fn unmap_range(
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

        let state = self.buffers.get_mut(buffer.id()).ok_or(Error::NotFound)?;
        let raw = state.raw();
        let mut memory = state.mapping.detach(mapping);

        // Scratch whose download never landed was never seen by the host
        let untouched = match memory.take_pending() {
            Some(pending) => {
                self.buffers
                    .retire(pending.staging, pending.fence, RetireKind::Staging);
                true
            }
            None => false,
        };

        if !memory.is_writable() || untouched {
            return Ok(match completion {
                Completion::Block => None,
                Completion::Event => Some(Event::completed(self.id)),
            });
        }

        self.ensure_usable(queue)?;
        let fence = self.upload(raw, memory.offset(), memory.data())?;
        self.buffers.mark_used(buffer.id(), fence)?;
        self.complete(fence, completion)
    }
}
