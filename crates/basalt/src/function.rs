//! # Functions
//!
//! A compiled kernel entry point and its ordered argument list.
//!
//! Arguments are consumed by an execute: they are cleared afterwards and
//! must be set again before the next call.
//!
//! A parameter takes a buffer, a by-value scalar, or a size of
//! work-group shared memory. Which kinds a device accepts is up to its
//! backend.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use basalt_core::{BufferId, DeviceId, Error, FunctionId, Result};

use crate::buffer::Buffer;

/// Value bound to one function parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argument {
    /// A device buffer
    Buffer(BufferId),
    /// Bytes passed by value
    Value(Vec<u8>),
    /// Work-group shared memory of the given size in bytes
    SharedMemory(u64),
}

/// Caller handle to a compiled function
#[derive(Debug)]
pub struct Function {
    device: DeviceId,
    id: FunctionId,
    entry_point: String,
    arguments: Vec<Option<Argument>>,
}

impl Function {
    pub(crate) fn new(device: DeviceId, id: FunctionId, entry_point: &str, parameter_count: u32) -> Self {
        Self {
            device,
            id,
            entry_point: String::from(entry_point),
            arguments: vec![None; parameter_count as usize],
        }
    }

    /// Owning device
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Function id on its device
    pub fn id(&self) -> FunctionId {
        self.id
    }

    /// Kernel entry point
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Number of parameters
    pub fn parameter_count(&self) -> u32 {
        self.arguments.len() as u32
    }

    /// Bind a buffer to parameter `index` for the next execute
    pub fn set_buffer(&mut self, index: u32, buffer: &Buffer) -> Result<()> {
        if buffer.device() != self.device {
            return Err(Error::DeviceMismatch);
        }
        self.set(index, Argument::Buffer(buffer.id()))
    }

    /// Pass `value` by value as parameter `index`
    pub fn set_arg(&mut self, index: u32, value: &[u8]) -> Result<()> {
        if value.is_empty() {
            return Err(Error::InvalidParameter);
        }
        self.set(index, Argument::Value(value.to_vec()))
    }

    /// Reserve `size` bytes of shared memory for parameter `index`
    pub fn set_shared_memory(&mut self, index: u32, size: u64) -> Result<()> {
        if size == 0 {
            return Err(Error::InvalidParameter);
        }
        self.set(index, Argument::SharedMemory(size))
    }

    /// Argument currently set for parameter `index`
    pub fn argument(&self, index: u32) -> Option<&Argument> {
        self.arguments.get(index as usize)?.as_ref()
    }

    fn set(&mut self, index: u32, argument: Argument) -> Result<()> {
        let slot = self
            .arguments
            .get_mut(index as usize)
            .ok_or(Error::InvalidParameter)?;
        *slot = Some(argument);
        Ok(())
    }

    pub(crate) fn arguments(&self) -> &[Option<Argument>] {
        &self.arguments
    }

    pub(crate) fn clear_arguments(&mut self) {
        self.arguments.iter_mut().for_each(|slot| *slot = None);
    }
}
