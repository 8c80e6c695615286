//! Staged transfers and buffer lifetime
//!
//! Device-local buffers are only reached through copies. Uploads fill a
//! host-visible staging buffer and record a copy out of it; downloads
//! record a copy into one and read it once the fence has passed.

use basalt_core::{
    BufferBarrier, BufferFlags, BufferId, Command, Driver, Error, FenceId, MemoryLocation,
    QueueId, RawBuffer, ReadbackId, Result,
};
use basalt_mem::{PendingReadback, RetireKind, validate_range};

use super::{AsyncRead, NativeDevice};
use crate::buffer::Buffer;
use crate::device::Completion;
use crate::event::{Event, Readback};

impl<D: Driver> NativeDevice<D> {
    // =========================================================================
    // Staging
    // =========================================================================

    fn stage_upload(&mut self, data: &[u8]) -> Result<RawBuffer> {
        let staging =
            self.driver
                .create_buffer(data.len() as u64, BufferFlags::READ, MemoryLocation::HostVisible)?;
        if let Err(err) = self.driver.write_host_visible(staging, 0, data) {
            self.driver.destroy_buffer(staging);
            return Err(err);
        }
        Ok(staging)
    }

    /// Submit a copy of `data` into `dst` at `offset`
    ///
    /// `data` is staged before this returns. The staging buffer is retired
    /// on the returned fence.
    pub(super) fn upload(&mut self, dst: RawBuffer, offset: u64, data: &[u8]) -> Result<FenceId> {
        let staging = self.stage_upload(data)?;
        let size = data.len() as u64;

        let submitted = self.submit_with(|device| {
            device
                .recorder
                .record(Command::BufferBarrier(BufferBarrier::before_transfer(dst, offset, size)));
            device.recorder.record(Command::CopyBuffer {
                src: staging,
                src_offset: 0,
                dst,
                dst_offset: offset,
                size,
            });
            Ok(())
        });

        match submitted {
            Ok(fence) => {
                self.buffers.retire(staging, fence, RetireKind::Staging);
                Ok(fence)
            }
            Err(err) => {
                // Nothing that references the staging reached the queue
                self.driver.destroy_buffer(staging);
                Err(err)
            }
        }
    }

    /// Submit a copy of `src[offset..offset + size]` into fresh staging
    pub(super) fn download(&mut self, src: RawBuffer, offset: u64, size: u64) -> Result<PendingReadback> {
        let staging = self
            .driver
            .create_buffer(size, BufferFlags::WRITE, MemoryLocation::HostVisible)?;

        let submitted = self.submit_with(|device| {
            device
                .recorder
                .record(Command::BufferBarrier(BufferBarrier::before_transfer(src, offset, size)));
            device.recorder.record(Command::CopyBuffer {
                src,
                src_offset: offset,
                dst: staging,
                dst_offset: 0,
                size,
            });
            Ok(())
        });

        match submitted {
            Ok(fence) => Ok(PendingReadback { fence, staging }),
            Err(err) => {
                self.driver.destroy_buffer(staging);
                Err(err)
            }
        }
    }

    /// Wait for a download and copy its staging into `dst`
    ///
    /// The staging is released in every case.
    pub(super) fn land(&mut self, pending: PendingReadback, dst: &mut [u8]) -> Result<()> {
        if let Err(err) = self.wait(pending.fence) {
            self.buffers
                .retire(pending.staging, pending.fence, RetireKind::Staging);
            return Err(err);
        }
        let read = self.driver.read_host_visible(pending.staging, 0, dst);
        self.driver.destroy_buffer(pending.staging);
        read
    }

    // =========================================================================
    // Buffer lifetime
    // =========================================================================

    pub(super) fn allocate_buffer(
        &mut self,
        size: usize,
        flags: BufferFlags,
        init: Option<&[u8]>,
    ) -> Result<Buffer> {
        self.ensure_usable(QueueId::DEFAULT)?;
        if size == 0 || size as u64 > self.spec.max_alloc_size {
            return Err(Error::InvalidParameter);
        }
        if init.is_some_and(|data| data.len() != size) {
            return Err(Error::InvalidParameter);
        }

        let raw = self
            .driver
            .create_buffer(size as u64, flags, MemoryLocation::DeviceLocal)?;
        let id = self.buffers.insert(raw, size as u64, flags);

        if let Some(data) = init {
            let uploaded = self.upload(raw, 0, data).and_then(|fence| {
                self.buffers.mark_used(id, fence)?;
                self.wait(fence)
            });
            if let Err(err) = uploaded {
                let completed = self.tracker.completed();
                if let Ok(Some(raw)) = self.buffers.remove(id, completed) {
                    self.driver.destroy_buffer(raw);
                }
                return Err(err);
            }
        }

        log::trace!("created {:?} ({} bytes, {:?})", id, size, flags);
        Ok(Buffer::new(self.id, id, size, flags))
    }

    /// Release a buffer, deferring the backend release while it is in flight
    ///
    /// Works on a lost device too.
    pub(super) fn release_buffer(&mut self, buffer: Buffer) -> Result<()> {
        self.check_device(buffer.device())?;

        let state = self.buffers.get_mut(buffer.id()).ok_or(Error::NotFound)?;
        let pending = match state.mapping.clear() {
            Some(mut memory) => {
                log::warn!(
                    "deleting {:?} while mapped; {} bytes of scratch discarded",
                    buffer.id(),
                    memory.data().len()
                );
                memory.take_pending()
            }
            None => None,
        };
        if let Some(pending) = pending {
            self.buffers
                .retire(pending.staging, pending.fence, RetireKind::Staging);
        }

        let completed = self.tracker.completed();
        if let Some(raw) = self.buffers.remove(buffer.id(), completed)? {
            self.driver.destroy_buffer(raw);
        }
        Ok(())
    }

    /// Raw buffer behind `id`, checked for a transfer of `offset..offset + size`
    fn resolve_unmapped(&self, id: BufferId, offset: u64, size: u64) -> Result<RawBuffer> {
        let state = self.buffers.get(id).ok_or(Error::NotFound)?;
        validate_range(state.size(), offset, size)?;
        if state.mapping.is_mapped() {
            return Err(Error::BufferMapped);
        }
        Ok(state.raw())
    }

    // =========================================================================
    // Reads and writes
    // =========================================================================

    pub(super) fn write_range(
        &mut self,
        buffer: &Buffer,
        queue: QueueId,
        offset: usize,
        src: &[u8],
        completion: Completion,
    ) -> Result<Option<Event>> {
        self.check_device(buffer.device())?;
        self.ensure_usable(queue)?;
        let raw = self.resolve_unmapped(buffer.id(), offset as u64, src.len() as u64)?;

        let fence = self.upload(raw, offset as u64, src)?;
        self.buffers.mark_used(buffer.id(), fence)?;
        self.complete(fence, completion)
    }

    pub(super) fn read_range(
        &mut self,
        buffer: &Buffer,
        queue: QueueId,
        offset: usize,
        dst: &mut [u8],
    ) -> Result<()> {
        self.check_device(buffer.device())?;
        self.ensure_usable(queue)?;
        let raw = self.resolve_unmapped(buffer.id(), offset as u64, dst.len() as u64)?;

        let pending = self.download(raw, offset as u64, dst.len() as u64)?;
        self.buffers.mark_used(buffer.id(), pending.fence)?;
        self.land(pending, dst)
    }

    pub(super) fn read_range_async(
        &mut self,
        buffer: &Buffer,
        queue: QueueId,
        offset: usize,
        size: usize,
    ) -> Result<Readback> {
        self.check_device(buffer.device())?;
        self.ensure_usable(queue)?;
        let raw = self.resolve_unmapped(buffer.id(), offset as u64, size as u64)?;

        let pending = self.download(raw, offset as u64, size as u64)?;
        self.buffers.mark_used(buffer.id(), pending.fence)?;

        self.next_readback += 1;
        let id = ReadbackId::new(self.next_readback);
        let readback = Readback::new(id, size, Event::fence(self.id, pending.fence));
        self.readbacks.insert(
            id,
            AsyncRead {
                pending,
                lease: readback.lease(),
            },
        );
        Ok(readback)
    }

    /// Copy a finished readback out
    ///
    /// A `dst` of the wrong length consumes the readback without copying.
    pub(super) fn collect_read(&mut self, readback: Readback, dst: &mut [u8]) -> Result<()> {
        self.check_device(readback.event().device())?;
        let pending = self
            .readbacks
            .remove(&readback.id())
            .ok_or(Error::NotFound)?
            .pending;

        if dst.len() != readback.len() {
            self.buffers
                .retire(pending.staging, pending.fence, RetireKind::Staging);
            return Err(Error::InvalidParameter);
        }
        self.land(pending, dst)
    }
}
