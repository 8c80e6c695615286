//! # BASALT Memory Tracking
//!
//! Buffer records, last-writer tracking and host mappings.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      BASALT Memory Tracking                     │
//! │                                                                 │
//! │  ┌───────────────────────────┐   ┌───────────────────────────┐  │
//! │  │        BufferTable        │   │       MappingSlot         │  │
//! │  │  id → raw, size, flags,   │──▶│  one active mapping per   │  │
//! │  │       last writer         │   │  buffer: scratch + token  │  │
//! │  └─────────────┬─────────────┘   └───────────────────────────┘  │
//! │                │                                                │
//! │  ┌─────────────▼─────────────────────────────────────────────┐  │
//! │  │      Retired raw buffers, released once their fence       │  │
//! │  │      has passed (deleted buffers, transfer staging)       │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing here talks to a driver. The tables decide *when* a raw buffer
//! may be released; the device releases it.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

pub mod mapping;
pub mod tracker;

// Re-exports
pub use mapping::{MappedMemory, Mapping, MappingSlot, PendingReadback, validate_range};
pub use tracker::{BufferState, BufferTable, RetireKind, TableStats};
