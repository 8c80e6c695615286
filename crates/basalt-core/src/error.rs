//! # BASALT Error Handling
//!
//! Error types shared by every BASALT crate.
//!
//! Errors fall into two groups, reported by [`Error::kind`]:
//! - invalid arguments, rejected at the call site before any device work
//! - backend failures, carried up unchanged from the driver
//!
//! Protocol violations (a second open recording, a mismatched unmap token,
//! waiting on a fence that was never submitted) are not errors. They panic.

use core::fmt;

// =============================================================================
// RESULT TYPE
// =============================================================================

/// BASALT Result type alias
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// ERROR ENUM
// =============================================================================

/// BASALT unified error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Argument Errors
    // =========================================================================
    /// Invalid parameter provided
    InvalidParameter,
    /// Offset and size describe a range outside the buffer
    OutOfBounds,
    /// Queue index beyond the device's queue count
    InvalidQueue(u32),
    /// Resource not found
    NotFound,
    /// Handle or event belongs to a different device
    DeviceMismatch,
    /// Function argument was never set
    MissingArgument(u32),
    /// Access denied
    AccessDenied,
    /// Buffer is currently mapped by the host
    BufferMapped,
    /// Object is in the wrong state for the request
    InvalidState,
    /// The device does not implement the request
    Unsupported,

    // =========================================================================
    // Backend Errors
    // =========================================================================
    /// Device was lost; no further work can be submitted
    DeviceLost,
    /// Out of device memory
    OutOfDeviceMemory,
    /// Out of host memory
    OutOfHostMemory,
    /// Queue refused the submission
    SubmissionFailed,
    /// Shader module could not be created
    ShaderCreationFailed,
    /// Pipeline creation failed
    PipelineCreationFailed,
    /// Backend-specific failure code
    Backend(i32),
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller passed something the device cannot accept
    InvalidArgument,
    /// The backend failed to carry out a valid request
    Backend,
}

impl Error {
    /// Classify this error
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParameter
            | Self::OutOfBounds
            | Self::InvalidQueue(_)
            | Self::NotFound
            | Self::DeviceMismatch
            | Self::MissingArgument(_)
            | Self::AccessDenied
            | Self::BufferMapped
            | Self::InvalidState
            | Self::Unsupported => ErrorKind::InvalidArgument,
            Self::DeviceLost
            | Self::OutOfDeviceMemory
            | Self::OutOfHostMemory
            | Self::SubmissionFailed
            | Self::ShaderCreationFailed
            | Self::PipelineCreationFailed
            | Self::Backend(_) => ErrorKind::Backend,
        }
    }

    /// Whether the device can no longer accept work after this error
    pub const fn is_device_lost(&self) -> bool {
        matches!(self, Self::DeviceLost)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Argument
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::OutOfBounds => write!(f, "range exceeds buffer bounds"),
            Self::InvalidQueue(index) => write!(f, "invalid queue index {}", index),
            Self::NotFound => write!(f, "resource not found"),
            Self::DeviceMismatch => write!(f, "handle belongs to another device"),
            Self::MissingArgument(index) => write!(f, "function argument {} not set", index),
            Self::AccessDenied => write!(f, "access denied"),
            Self::BufferMapped => write!(f, "buffer is mapped"),
            Self::InvalidState => write!(f, "invalid object state"),
            Self::Unsupported => write!(f, "not supported by this device"),

            // Backend
            Self::DeviceLost => write!(f, "device lost"),
            Self::OutOfDeviceMemory => write!(f, "out of device memory"),
            Self::OutOfHostMemory => write!(f, "out of host memory"),
            Self::SubmissionFailed => write!(f, "submission failed"),
            Self::ShaderCreationFailed => write!(f, "shader creation failed"),
            Self::PipelineCreationFailed => write!(f, "pipeline creation failed"),
            Self::Backend(code) => write!(f, "backend error {}", code),
        }
    }
}

impl core::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_kind_classification() {
        assert_eq!(Error::OutOfBounds.kind(), ErrorKind::InvalidArgument);
        assert_eq!(Error::MissingArgument(2).kind(), ErrorKind::InvalidArgument);
        assert_eq!(Error::DeviceLost.kind(), ErrorKind::Backend);
        assert_eq!(Error::Backend(-4).kind(), ErrorKind::Backend);
    }

    #[test]
    fn test_display_carries_context() {
        assert_eq!(Error::InvalidQueue(3).to_string(), "invalid queue index 3");
        assert_eq!(Error::MissingArgument(1).to_string(), "function argument 1 not set");
        assert_eq!(Error::Backend(-7).to_string(), "backend error -7");
    }
}
