//! # BASALT Command System
//!
//! Command recording, queue submission and cached pipeline bindings.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                    Command Submission Pipeline                    │
//! │                                                                   │
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────────┐     │
//! │  │   Command    │    │  Recording   │    │   Submission     │     │
//! │  │   Recorder   │───▶│  (closed,    │───▶│   Queue          │     │
//! │  │  (open)      │    │   fenced)    │    │                  │     │
//! │  └──────────────┘    └──────────────┘    └────────┬─────────┘     │
//! │                                                   │               │
//! │                                          ┌────────▼─────────┐     │
//! │                                          │  Driver queue    │     │
//! │                                          │  + slot fence    │     │
//! │                                          └──────────────────┘     │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Submission Flow
//!
//! 1. `start` allocates the next fence id and resets its slot
//! 2. Commands are recorded in the order they must execute
//! 3. `end` closes the recording
//! 4. The queue submits it with the slot fence and marks the id submitted
//! 5. The fence tracker observes completion

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

pub mod binding;
pub mod recorder;
pub mod submit;

#[cfg(test)]
mod testing;

// Re-exports
pub use binding::FunctionBinding;
pub use recorder::{CommandRecorder, RecorderState, Recording};
pub use submit::{QueueState, QueueStats, SubmissionQueue};
