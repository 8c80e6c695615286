//! # BASALT Core
//!
//! Foundational types for the BASALT compute-device layer.
//!
//! This crate holds everything the recording, memory and device crates agree
//! on: the error type, typed handles, access flags and barriers, the command
//! vocabulary handed to a driver queue, the driver traits, and the
//! bounded-ahead fence tracker that every submission goes through.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      basalt-core                            │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │   Traits    │  │   Types     │  │   FenceTracker      │  │
//! │  │  (Driver,   │  │ (FenceId,   │  │  issued/submitted/  │  │
//! │  │ FenceDriver)│  │  Handle<T>) │  │  completed window   │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │  Command    │  │    Sync     │  │      Error          │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod command;
pub mod error;
pub mod fence;
pub mod sync;
pub mod traits;
pub mod types;

// Re-exports for convenience
pub use command::{Command, DispatchSize};
pub use error::{Error, ErrorKind, Result};
pub use fence::{FenceTracker, MAX_FENCE_WINDOW};
pub use sync::{AccessFlags, BufferBarrier, PipelineStage, QUEUE_FAMILY_IGNORED};
pub use traits::*;
pub use types::*;
