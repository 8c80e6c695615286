//! # BASALT
//!
//! Asynchronous compute devices behind one object-safe [`Device`] trait.
//!
//! A device runs buffer transfers and compute dispatches either through a
//! caller-supplied [`FunctionTable`] or through a [`Driver`] that records
//! discrete command buffers and signals fences.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           dyn Device                            │
//! │                                                                 │
//! │  ┌────────────────────────────┐  ┌───────────────────────────┐  │
//! │  │    NativeDevice<Driver>    │  │   FunctionTableDevice     │  │
//! │  │  recorder ─▶ queue ─▶ fence│  │   forwards to an          │  │
//! │  │  tracker, buffer table,    │  │   Arc<TableContext>       │  │
//! │  │  mapping proxy             │  │                           │  │
//! │  └─────────────┬──────────────┘  └─────────────┬─────────────┘  │
//! │                │                               │                │
//! │        basalt-cmd / basalt-mem          FunctionTable fns       │
//! │                │                                                │
//! │        basalt-core (FenceTracker, Driver, Command)              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Completion
//!
//! Every asynchronous call takes a [`Completion`]. `Block` returns once the
//! work has finished; `Event` returns at once with an [`Event`] the caller
//! waits on, polls, and finally deletes.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod buffer;
pub mod config;
pub mod device;
pub mod event;
pub mod function;
pub mod native;
#[cfg(feature = "soft")]
pub mod soft;
pub mod table;

// Re-exports for convenience
pub use basalt_core::{
    BufferFlags, DeviceId, DeviceSpec, DeviceType, DispatchSize, Driver, Error, ErrorKind,
    FenceDriver, FenceId, MapAccess, QueueId, Result, SourceTypes,
};
pub use basalt_mem::Mapping;
pub use buffer::Buffer;
pub use config::DeviceConfig;
pub use device::{Completion, Device, Platform};
pub use event::{Event, EventSource, Readback};
pub use function::{Argument, Function};
pub use native::NativeDevice;
#[cfg(feature = "soft")]
pub use soft::{ExecutionMode, HostKernel, SoftDriver, SoftStats};
pub use table::{BufferMapTable, FunctionTable, FunctionTableDevice, TableContext};
