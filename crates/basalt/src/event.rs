//! # Events
//!
//! Completion handles returned by asynchronous operations.

use alloc::sync::Arc;

use basalt_core::{DeviceId, FenceId, RawEvent, ReadbackId};

/// What an event waits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    /// A submission on a native device timeline
    Fence(FenceId),
    /// An event object owned by a function table backend
    Backend(RawEvent),
}

/// Completion handle for one asynchronous operation
///
/// Owned by the caller. Pass it to `wait_for_event` or `is_event_complete`
/// as often as needed, then to `delete_event`.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "events hold backend resources until deleted"]
pub struct Event {
    device: DeviceId,
    source: EventSource,
}

impl Event {
    pub(crate) const fn fence(device: DeviceId, fence: FenceId) -> Self {
        Self {
            device,
            source: EventSource::Fence(fence),
        }
    }

    pub(crate) const fn backend(device: DeviceId, event: RawEvent) -> Self {
        Self {
            device,
            source: EventSource::Backend(event),
        }
    }

    /// An event that has already completed
    pub(crate) const fn completed(device: DeviceId) -> Self {
        Self::fence(device, FenceId::NONE)
    }

    /// Device that issued the event
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// What the event waits on
    pub fn source(&self) -> EventSource {
        self.source
    }
}

/// An asynchronous read whose data is still on the device side
///
/// Its event reports when the copy has finished; `complete_read` then
/// copies the data out and releases the staging. A readback dropped
/// without `complete_read` is released by the device once its copy has
/// finished.
#[derive(Debug)]
#[must_use = "a readback holds device staging until completed"]
pub struct Readback {
    id: ReadbackId,
    len: usize,
    event: Event,
    lease: ReadbackLease,
}

impl Readback {
    pub(crate) fn new(id: ReadbackId, len: usize, event: Event) -> Self {
        Self {
            id,
            len,
            event,
            lease: ReadbackLease(Arc::new(())),
        }
    }

    /// Completion of the device-side copy
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Number of bytes read
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the read is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn id(&self) -> ReadbackId {
        self.id
    }

    pub(crate) fn into_event(self) -> Event {
        self.event
    }

    /// Device-side half of the lease, kept next to the staging
    pub(crate) fn lease(&self) -> ReadbackLease {
        self.lease.clone()
    }
}

/// Shared marker between a [`Readback`] and the device entry it owns
#[derive(Debug, Clone)]
pub(crate) struct ReadbackLease(Arc<()>);

impl ReadbackLease {
    /// Whether the caller dropped its readback
    pub(crate) fn is_abandoned(&self) -> bool {
        Arc::strong_count(&self.0) == 1
    }
}

// Handles move between threads but are never duplicated
static_assertions::assert_impl_all!(Event: Send, Sync);
static_assertions::assert_impl_all!(Readback: Send, Sync);
static_assertions::assert_not_impl_any!(Event: Clone, Copy);
static_assertions::assert_not_impl_any!(Readback: Clone, Copy);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dropped_readback_abandons_lease() {
        let device = DeviceId::new(1);
        let readback = Readback::new(ReadbackId::new(1), 8, Event::completed(device));
        let lease = readback.lease();
        assert!(!lease.is_abandoned());

        let event = readback.into_event();
        assert!(lease.is_abandoned());
        assert_eq!(event.source(), EventSource::Fence(FenceId::NONE));
    }
}
