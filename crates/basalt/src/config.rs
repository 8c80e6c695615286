//! # Device Configuration

use basalt_core::{Error, MAX_FENCE_WINDOW, Result};

/// Default number of submissions the host may run ahead of the device
pub const DEFAULT_FENCE_WINDOW: usize = 3;

/// Native device configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Backend fences in the ring; bounds how far the host runs ahead
    pub fence_window: usize,
    /// Debug label (for logs)
    pub label: Option<&'static str>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            fence_window: DEFAULT_FENCE_WINDOW,
            label: None,
        }
    }
}

impl DeviceConfig {
    /// Set the fence window
    pub const fn with_fence_window(mut self, window: usize) -> Self {
        self.fence_window = window;
        self
    }

    /// Set the debug label
    pub const fn with_label(mut self, label: &'static str) -> Self {
        self.label = Some(label);
        self
    }

    /// Check every field is in range
    pub fn validate(&self) -> Result<()> {
        if self.fence_window == 0 || self.fence_window > MAX_FENCE_WINDOW {
            return Err(Error::InvalidParameter);
        }
        Ok(())
    }

    /// Label for log output
    pub fn display_label(&self) -> &'static str {
        self.label.unwrap_or("unnamed")
    }
}
